//! Phase 4: evaluation.
//!
//! Left-to-right reduction over a token list with operator precedence
//! (`* /` over `+ -` over comparisons over `&&` over `||`) and proper
//! short-circuiting: when the left side of `&&`/`||` decides the result, the
//! right side is structurally consumed but no variable lookups or function
//! calls run.

use smelter_types::Value;

use super::token::{Token, TokenKind};
use super::{functions, EvalError, VariableLookup};

fn precedence(op: &str) -> Option<u8> {
    match op {
        "*" | "/" => Some(4),
        "+" | "-" => Some(3),
        "==" | "!=" | ">=" | "<=" | ">" | "<" => Some(2),
        "&&" => Some(1),
        "||" => Some(0),
        _ => None,
    }
}

/// Evaluates a token list produced by [`super::token::tokenize`].
pub fn evaluate_tokens(tokens: &[Token], lookup: &dyn VariableLookup) -> Result<Value, EvalError> {
    if tokens.is_empty() {
        return Err(EvalError::Syntax("empty expression".to_string()));
    }
    let mut pos = 0;
    let value = eval_expr(tokens, &mut pos, 0, lookup, true)?;
    if pos != tokens.len() {
        return Err(EvalError::Syntax(
            "values must be separated by operators".to_string(),
        ));
    }
    Ok(value)
}

/// Precedence-climbing evaluation. `active` is false while consuming a
/// short-circuited branch: structure is still validated, but lookups and
/// calls are suppressed.
fn eval_expr(
    tokens: &[Token],
    pos: &mut usize,
    min_precedence: u8,
    lookup: &dyn VariableLookup,
    active: bool,
) -> Result<Value, EvalError> {
    let mut left = eval_operand(tokens, pos, lookup, active)?;

    while *pos < tokens.len() {
        let token = &tokens[*pos];
        if token.kind == TokenKind::Separator {
            return Err(EvalError::Syntax("unexpected argument separator".to_string()));
        }
        if token.kind != TokenKind::Operator {
            return Err(EvalError::Syntax(
                "values must be separated by operators".to_string(),
            ));
        }
        let Some(op_precedence) = precedence(&token.text) else {
            return Err(EvalError::Syntax(format!("unrecognized operator {}", token.text)));
        };
        if op_precedence < min_precedence {
            break;
        }
        let op = token.text.clone();
        *pos += 1;

        match op.as_str() {
            "&&" => {
                let take_right = active && left.is_truthy();
                let right = eval_expr(tokens, pos, op_precedence + 1, lookup, take_right)?;
                if active {
                    left = Value::Bool(left.is_truthy() && right.is_truthy());
                }
            }
            "||" => {
                let take_right = active && !left.is_truthy();
                let right = eval_expr(tokens, pos, op_precedence + 1, lookup, take_right)?;
                if active {
                    left = Value::Bool(left.is_truthy() || right.is_truthy());
                }
            }
            _ => {
                let right = eval_expr(tokens, pos, op_precedence + 1, lookup, active)?;
                if active {
                    left = apply_binary(&op, &left, &right)?;
                }
            }
        }
    }

    Ok(left)
}

fn eval_operand(
    tokens: &[Token],
    pos: &mut usize,
    lookup: &dyn VariableLookup,
    active: bool,
) -> Result<Value, EvalError> {
    let Some(token) = tokens.get(*pos) else {
        return Err(EvalError::Syntax("expression ended unexpectedly".to_string()));
    };
    *pos += 1;

    match token.kind {
        TokenKind::Group => evaluate_group(&token.children, lookup, active),
        TokenKind::Function => {
            if !active {
                return Ok(Value::Absent);
            }
            let mut args = Vec::with_capacity(token.children.len());
            for arg_group in &token.children {
                args.push(evaluate_group(&arg_group.children, lookup, true)?);
            }
            functions::call(&token.text, &args)
        }
        TokenKind::Variable => {
            if active {
                lookup.lookup(&token.text)
            } else {
                Ok(Value::Absent)
            }
        }
        TokenKind::Number => token
            .text
            .parse::<f64>()
            .map(Value::Number)
            .map_err(|_| EvalError::Syntax(format!("bad number literal {}", token.text))),
        TokenKind::Bool => Ok(Value::Bool(token.text == "true")),
        TokenKind::String | TokenKind::InferredString => Ok(Value::String(token.text.clone())),
        TokenKind::Operator => Err(EvalError::Syntax(
            "bad expression, multiple adjacent operators".to_string(),
        )),
        TokenKind::Separator => Err(EvalError::Syntax("unexpected argument separator".to_string())),
    }
}

fn evaluate_group(
    tokens: &[Token],
    lookup: &dyn VariableLookup,
    active: bool,
) -> Result<Value, EvalError> {
    if tokens.is_empty() {
        return Err(EvalError::Syntax("empty expression".to_string()));
    }
    let mut pos = 0;
    let value = eval_expr(tokens, &mut pos, 0, lookup, active)?;
    if pos != tokens.len() {
        return Err(EvalError::Syntax(
            "values must be separated by operators".to_string(),
        ));
    }
    Ok(value)
}

fn apply_binary(op: &str, left: &Value, right: &Value) -> Result<Value, EvalError> {
    match op {
        "==" => Ok(Value::Bool(equals(left, right)?)),
        "!=" => Ok(Value::Bool(!equals(left, right)?)),
        ">" | "<" | ">=" | "<=" => ordering(op, left, right),
        "+" => add(left, right),
        "-" | "*" | "/" => arithmetic(op, left, right),
        other => Err(EvalError::Syntax(format!("unrecognized operator {other}"))),
    }
}

/// Same-kind equality. Absent equals only absent; any other cross-kind
/// comparison is a type error.
fn equals(left: &Value, right: &Value) -> Result<bool, EvalError> {
    match (left, right) {
        (Value::Absent, Value::Absent) => Ok(true),
        (Value::Absent, _) | (_, Value::Absent) => Ok(false),
        (Value::Number(a), Value::Number(b)) => Ok(a == b),
        (Value::String(a), Value::String(b)) => Ok(a == b),
        (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
        (Value::Sequence(a), Value::Sequence(b)) => Ok(a == b),
        (Value::Mapping(a), Value::Mapping(b)) => Ok(a == b),
        _ => Err(EvalError::Type(format!(
            "cannot compare {} with {}",
            left.kind(),
            right.kind()
        ))),
    }
}

/// Numeric or lexicographic ordering; anything else is a type error.
fn ordering(op: &str, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let result = match (left, right) {
        (Value::Number(a), Value::Number(b)) => compare(op, a.partial_cmp(b)),
        (Value::String(a), Value::String(b)) => compare(op, Some(a.cmp(b))),
        _ => None,
    };
    result.map(Value::Bool).ok_or_else(|| {
        EvalError::Type(format!(
            "cannot order {} against {} with {op}",
            left.kind(),
            right.kind()
        ))
    })
}

fn compare(op: &str, ordering: Option<std::cmp::Ordering>) -> Option<bool> {
    let ordering = ordering?;
    Some(match op {
        ">" => ordering.is_gt(),
        "<" => ordering.is_lt(),
        ">=" => ordering.is_ge(),
        "<=" => ordering.is_le(),
        _ => return None,
    })
}

fn add(left: &Value, right: &Value) -> Result<Value, EvalError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        _ => Err(EvalError::Type(format!(
            "cannot add {} to {}",
            right.kind(),
            left.kind()
        ))),
    }
}

fn arithmetic(op: &str, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let (Value::Number(a), Value::Number(b)) = (left, right) else {
        return Err(EvalError::Type(format!(
            "operator {op} requires numbers, found {} and {}",
            left.kind(),
            right.kind()
        )));
    };
    let result = match op {
        "-" => a - b,
        "*" => a * b,
        "/" => a / b,
        _ => return Err(EvalError::Syntax(format!("unrecognized operator {op}"))),
    };
    Ok(Value::Number(result))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::super::token::tokenize;
    use super::*;
    use smelter_types::Value;

    /// Records whether any lookup happened; used to prove short-circuiting.
    struct CountingLookup {
        calls: Cell<usize>,
        value: Value,
    }

    impl CountingLookup {
        fn returning(value: Value) -> Self {
            Self {
                calls: Cell::new(0),
                value,
            }
        }
    }

    impl VariableLookup for CountingLookup {
        fn lookup(&self, _identifier: &str) -> Result<Value, EvalError> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.value.clone())
        }
    }

    fn eval(expression: &str, lookup: &dyn VariableLookup) -> Result<Value, EvalError> {
        let root = tokenize(expression)?;
        evaluate_tokens(&root.children, lookup)
    }

    #[test]
    fn and_short_circuits_on_falsy_left() {
        let lookup = CountingLookup::returning(Value::Bool(true));
        let result = eval("0 && .Values.side", &lookup).unwrap();
        assert_eq!(result, Value::Bool(false));
        assert_eq!(lookup.calls.get(), 0);
    }

    #[test]
    fn or_short_circuits_on_truthy_left() {
        let lookup = CountingLookup::returning(Value::Bool(false));
        let result = eval("1 || .Values.side", &lookup).unwrap();
        assert_eq!(result, Value::Bool(true));
        assert_eq!(lookup.calls.get(), 0);
    }

    #[test]
    fn short_circuit_skips_function_calls_too() {
        // len() on the right must not run when the left side decides.
        let lookup = CountingLookup::returning(Value::Bool(true));
        let result = eval("'' && len(.Values.side)", &lookup).unwrap();
        assert_eq!(result, Value::Bool(false));
        assert_eq!(lookup.calls.get(), 0);
    }

    #[test]
    fn non_short_circuit_path_still_evaluates() {
        let lookup = CountingLookup::returning(Value::Number(2.0));
        let result = eval("1 && .Values.side == 2", &lookup).unwrap();
        assert_eq!(result, Value::Bool(true));
        assert_eq!(lookup.calls.get(), 1);
    }

    #[test]
    fn equality_is_symmetric_and_negation_consistent() {
        let lookup = CountingLookup::returning(Value::Absent);
        for (a, b) in [("1", "1"), ("'x'", "'y'"), ("true", "false")] {
            let forward = eval(&format!("{a} == {b}"), &lookup).unwrap();
            let backward = eval(&format!("{b} == {a}"), &lookup).unwrap();
            let negated = eval(&format!("{a} != {b}"), &lookup).unwrap();
            assert_eq!(forward, backward);
            assert_eq!(
                forward,
                Value::Bool(!matches!(negated, Value::Bool(true))),
                "negation of {a} != {b}"
            );
        }
    }

    #[test]
    fn division_and_precedence() {
        let lookup = CountingLookup::returning(Value::Absent);
        assert_eq!(eval("8 - 6 / 2", &lookup).unwrap(), Value::Number(5.0));
        assert_eq!(eval("(8 - 6) / 2", &lookup).unwrap(), Value::Number(1.0));
    }

    #[test]
    fn ordering_with_absent_is_a_type_error() {
        let lookup = CountingLookup::returning(Value::Absent);
        assert!(matches!(eval(".Values.x > 1", &lookup), Err(EvalError::Type(_))));
    }

    #[test]
    fn arithmetic_on_strings_is_a_type_error() {
        let lookup = CountingLookup::returning(Value::Absent);
        assert!(matches!(eval("'a' * 2", &lookup), Err(EvalError::Type(_))));
    }

    #[test]
    fn logical_operators_return_bools() {
        let lookup = CountingLookup::returning(Value::Absent);
        assert_eq!(eval("'x' && 1", &lookup).unwrap(), Value::Bool(true));
        assert_eq!(eval("'' || 0", &lookup).unwrap(), Value::Bool(false));
    }
}
