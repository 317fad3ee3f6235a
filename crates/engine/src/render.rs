//! Template rendering for inline strings.
//!
//! A template carries zero or more `<! expr !>` placeholders. When the whole
//! string is exactly one placeholder, the expression's raw value is returned
//! with its kind intact; otherwise every placeholder renders to a string and
//! concatenates with the surrounding literal spans. The `{{ }}` delimiters
//! used in sequence YAML are rewritten to `<! !>` by the loader before any
//! template reaches this code.

use smelter_types::Value;

use crate::eval::{self, EvalError, VariableLookup};

const OPEN: &str = "<!";
const CLOSE: &str = "!>";

/// Renders `template`, returning the raw expression value for a single
/// encompassing placeholder and a concatenated string otherwise.
pub fn render(template: &str, lookup: &dyn VariableLookup) -> Result<Value, EvalError> {
    let placeholders = find_placeholders(template);

    if placeholders.len() == 1 {
        let (start, end) = placeholders[0];
        if start == 0 && end == template.len() {
            let expression = &template[OPEN.len()..end - CLOSE.len()];
            return eval::evaluate(expression.trim(), lookup);
        }
    }

    let mut output = String::with_capacity(template.len());
    let mut last_end = 0;
    for (start, end) in placeholders {
        output.push_str(&template[last_end..start]);
        let expression = &template[start + OPEN.len()..end - CLOSE.len()];
        let value = eval::evaluate(expression.trim(), lookup)?;
        output.push_str(&value.to_display_string());
        last_end = end;
    }
    output.push_str(&template[last_end..]);
    Ok(Value::String(output))
}

/// Renders a template and stringifies the result regardless of kind.
pub fn render_to_string(template: &str, lookup: &dyn VariableLookup) -> Result<String, EvalError> {
    Ok(render(template, lookup)?.to_display_string())
}

/// Locates `(start, end)` byte ranges of each placeholder, delimiters
/// included. An unclosed opener leaves the remainder as literal text.
fn find_placeholders(template: &str) -> Vec<(usize, usize)> {
    let mut placeholders = Vec::new();
    let mut offset = 0;
    while let Some(open_at) = template[offset..].find(OPEN) {
        let start = offset + open_at;
        let Some(close_at) = template[start + OPEN.len()..].find(CLOSE) else {
            break;
        };
        let end = start + OPEN.len() + close_at + CLOSE.len();
        placeholders.push((start, end));
        offset = end;
    }
    placeholders
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::NoVariables;
    use smelter_types::{Store, Value};

    struct ValuesLookup(Store);

    impl VariableLookup for ValuesLookup {
        fn lookup(&self, identifier: &str) -> Result<Value, EvalError> {
            Ok(self.0.get_path(identifier.trim_start_matches(".Values.")))
        }
    }

    fn values(source: &str) -> ValuesLookup {
        let value: Value = serde_yaml::from_str(source).unwrap();
        let Value::Mapping(map) = value else {
            panic!("expected mapping");
        };
        ValuesLookup(Store::from_mapping(map))
    }

    #[test]
    fn literal_text_passes_through() {
        assert_eq!(
            render("plain text", &NoVariables).unwrap(),
            Value::String("plain text".into())
        );
    }

    #[test]
    fn single_placeholder_returns_raw_value() {
        assert_eq!(render("<! 'x' !>", &NoVariables).unwrap(), Value::String("x".into()));

        let lookup = values("a: 3\n");
        assert_eq!(render("<! .Values.a !>", &lookup).unwrap(), Value::Number(3.0));
    }

    #[test]
    fn surrounded_placeholder_stringifies() {
        assert_eq!(
            render("x<! 'y' !>z", &NoVariables).unwrap(),
            Value::String("xyz".into())
        );

        let lookup = values("a: 3\n");
        assert_eq!(
            render("n=<! .Values.a !>", &lookup).unwrap(),
            Value::String("n=3".into())
        );
    }

    #[test]
    fn multiple_placeholders_concatenate() {
        let lookup = values("a: 1\nb: 2\n");
        assert_eq!(
            render("<! .Values.a !>-<! .Values.b !>", &lookup).unwrap(),
            Value::String("1-2".into())
        );
    }

    #[test]
    fn absent_renders_as_empty_string() {
        let lookup = values("a: 1\n");
        assert_eq!(
            render("[<! .Values.missing !>]", &lookup).unwrap(),
            Value::String("[]".into())
        );
    }

    #[test]
    fn whole_sequence_value_passes_through() {
        let lookup = values("xs: [1, 2]\n");
        let result = render("<! .Values.xs !>", &lookup).unwrap();
        assert_eq!(
            result,
            Value::Sequence(vec![Value::Number(1.0), Value::Number(2.0)])
        );
    }

    #[test]
    fn expression_errors_propagate() {
        assert!(render("<! 'a' + 1 !>", &NoVariables).is_err());
    }

    #[test]
    fn unclosed_placeholder_is_literal() {
        assert_eq!(
            render("before <! oops", &NoVariables).unwrap(),
            Value::String("before <! oops".into())
        );
    }
}
