//! Phase 1: grouping.
//!
//! A linear scan over the expression splits it into an ordered list of
//! groups: quoted string contents (verbatim, no nested interpretation),
//! balanced parenthesis contents (recursively grouped later), and everything
//! else as trimmed unqualified spans. Quotes and parentheses nest
//! independently; leaving either unclosed is a syntax error.

use super::EvalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    /// Contents of a matched `'…'` or `"…"`.
    String,
    /// Contents of a balanced `(…)`.
    Parenthesis,
    /// Any other span, trimmed of surrounding spaces.
    Unqualified,
}

#[derive(Debug, Clone)]
pub struct Group {
    pub text: String,
    pub kind: GroupKind,
}

/// Splits `expression` into groups.
pub fn parse_groups(expression: &str) -> Result<Vec<Group>, EvalError> {
    let bytes = expression.as_bytes();
    let mut groups = Vec::new();
    let mut quote_char: Option<u8> = None;
    let mut paren_depth: i32 = 0;
    let mut group_start = 0usize;

    for (i, &c) in bytes.iter().enumerate() {
        // Quote state tracks everywhere so parentheses inside strings never
        // count, but string groups only split out at the top level; inside a
        // parenthesis group the text stays verbatim for the recursive pass.
        if let Some(quote) = quote_char {
            if c == quote {
                if paren_depth == 0 {
                    groups.push(Group {
                        text: expression[group_start + 1..i].to_string(),
                        kind: GroupKind::String,
                    });
                    group_start = i + 1;
                }
                quote_char = None;
            }
            continue;
        }

        if c == b'"' || c == b'\'' {
            if paren_depth == 0 {
                push_unqualified(&mut groups, &expression[group_start..i]);
                group_start = i;
            }
            quote_char = Some(c);
            continue;
        }

        if paren_depth == 0 && c == b'(' {
            push_unqualified(&mut groups, &expression[group_start..i]);
            paren_depth = 1;
            group_start = i;
            continue;
        }

        if paren_depth == 1 && c == b')' {
            paren_depth = 0;
            let text = expression[group_start + 1..i].trim();
            if text.is_empty() {
                return Err(EvalError::Syntax("empty parenthesis group".to_string()));
            }
            groups.push(Group {
                text: text.to_string(),
                kind: GroupKind::Parenthesis,
            });
            group_start = i + 1;
            continue;
        }

        if c == b'(' {
            paren_depth += 1;
        } else if c == b')' {
            paren_depth -= 1;
        }
    }

    if paren_depth != 0 {
        return Err(EvalError::Syntax("unclosed parenthesis group".to_string()));
    }
    if quote_char.is_some() {
        return Err(EvalError::Syntax("unclosed quotation mark".to_string()));
    }

    push_unqualified(&mut groups, &expression[group_start..]);
    Ok(groups)
}

fn push_unqualified(groups: &mut Vec<Group>, span: &str) {
    let text = span.trim();
    if !text.is_empty() {
        groups.push(Group {
            text: text.to_string(),
            kind: GroupKind::Unqualified,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_quoted_strings_group_verbatim() {
        let groups = parse_groups("hello world && 'hello world'").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].text, "hello world &&");
        assert_eq!(groups[0].kind, GroupKind::Unqualified);
        assert_eq!(groups[1].text, "hello world");
        assert_eq!(groups[1].kind, GroupKind::String);
    }

    #[test]
    fn double_quoted_strings_group_verbatim() {
        let groups = parse_groups("hello world && \"hello world\"").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].kind, GroupKind::String);
    }

    #[test]
    fn parenthesis_groups_are_extracted() {
        let groups = parse_groups("(hello world) && \"hello world\"").unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].text, "hello world");
        assert_eq!(groups[0].kind, GroupKind::Parenthesis);
        assert_eq!(groups[1].text, "&&");
        assert_eq!(groups[1].kind, GroupKind::Unqualified);
        assert_eq!(groups[2].text, "hello world");
        assert_eq!(groups[2].kind, GroupKind::String);
    }

    #[test]
    fn nested_parentheses_stay_in_one_group() {
        let groups = parse_groups("((1 + 2) * 3)").unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].text, "(1 + 2) * 3");
        assert_eq!(groups[0].kind, GroupKind::Parenthesis);
    }

    #[test]
    fn quotes_shield_parentheses() {
        let groups = parse_groups("'a (b' == x").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].text, "a (b");
        assert_eq!(groups[0].kind, GroupKind::String);
    }

    #[test]
    fn quoted_string_inside_parens_stays_in_the_group() {
        let groups = parse_groups("len('a b c')").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].text, "len");
        assert_eq!(groups[1].text, "'a b c'");
        assert_eq!(groups[1].kind, GroupKind::Parenthesis);
    }

    #[test]
    fn parens_inside_quotes_inside_parens_do_not_count() {
        let groups = parse_groups("trim('(x')").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].text, "'(x'");
        assert_eq!(groups[1].kind, GroupKind::Parenthesis);
    }

    #[test]
    fn unclosed_quote_errors() {
        assert!(parse_groups("'oops").is_err());
    }

    #[test]
    fn unclosed_parenthesis_errors() {
        assert!(parse_groups("(1 + 2").is_err());
        assert!(parse_groups("1 + 2)").is_err());
    }

    #[test]
    fn empty_parenthesis_group_errors() {
        assert!(parse_groups("( )").is_err());
    }

    #[test]
    fn trailing_single_character_is_kept() {
        let groups = parse_groups("'x' == y").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].text, "== y");
    }
}
