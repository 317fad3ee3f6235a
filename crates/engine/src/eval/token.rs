//! Phase 2 and 3: tokenization and function rectification.
//!
//! Each unqualified group is scanned character-wise; runs of operator
//! characters become candidate operator tokens and everything between them
//! splits on spaces into identifier, number, and variable tokens. A
//! parenthesis group becomes a `Group` token holding its recursive token
//! list; an identifier immediately followed by a group is rewritten into a
//! `Function` token with one child group per comma-delimited argument.

use super::group::{parse_groups, Group, GroupKind};
use super::{functions, EvalError};

const OPERATORS: [&str; 13] = [
    "==", "!=", ">=", "<=", ">", "<", "&&", "||", "+", "-", "*", "/", ",",
];

fn is_operator_char(c: u8) -> bool {
    matches!(c, b'=' | b'!' | b'>' | b'<' | b'&' | b'|' | b'+' | b'-' | b'*' | b'/' | b',')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// A quoted string literal.
    String,
    /// An unquoted identifier; may name a function before rectification.
    InferredString,
    Number,
    Bool,
    /// A parenthesized sub-expression; children hold its tokens.
    Group,
    Operator,
    /// A dotted store path (`.Values.x`, `.Context.y`, `.item`).
    Variable,
    /// A rectified call; children hold one `Group` per argument.
    Function,
    /// A bare comma inside a parenthesis group.
    Separator,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub text: String,
    pub kind: TokenKind,
    pub children: Vec<Token>,
}

impl Token {
    fn new(text: impl Into<String>, kind: TokenKind) -> Self {
        Token {
            text: text.into(),
            kind,
            children: Vec::new(),
        }
    }
}

/// Tokenizes a whole expression into a root `Group` token.
pub fn tokenize(expression: &str) -> Result<Token, EvalError> {
    let groups = parse_groups(expression)?;
    let mut tokens = Vec::new();
    for group in &groups {
        tokens.extend(emit_tokens(group)?);
    }

    Ok(Token {
        text: expression.to_string(),
        kind: TokenKind::Group,
        children: rectify(tokens)?,
    })
}

/// Expands one group into tokens, recursing into parenthesis groups.
fn emit_tokens(group: &Group) -> Result<Vec<Token>, EvalError> {
    match group.kind {
        GroupKind::Parenthesis => {
            let sub_groups = parse_groups(&group.text)?;
            let mut children = Vec::new();
            for sub in &sub_groups {
                children.extend(emit_tokens(sub)?);
            }
            Ok(vec![Token {
                text: group.text.clone(),
                kind: TokenKind::Group,
                children: rectify(children)?,
            }])
        }
        GroupKind::String => Ok(vec![Token::new(group.text.clone(), TokenKind::String)]),
        GroupKind::Unqualified => scan_unqualified(&group.text),
    }
}

/// Character-wise scan of an unqualified span. Token boundaries fall where
/// the stream flips between operator characters and everything else.
fn scan_unqualified(text: &str) -> Result<Vec<Token>, EvalError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut run_start = 0usize;
    let mut run_is_operator = false;

    for i in 0..=bytes.len() {
        let boundary = if i == bytes.len() {
            true
        } else {
            let current_is_operator = is_operator_char(bytes[i]);
            if i == run_start {
                run_is_operator = current_is_operator;
                false
            } else {
                current_is_operator != run_is_operator
            }
        };

        if !boundary {
            continue;
        }

        let run = &text[run_start..i];
        for piece in run.split(' ').filter(|piece| !piece.is_empty()) {
            tokens.push(classify(piece, run_is_operator)?);
        }
        run_start = i;
        if i < bytes.len() {
            run_is_operator = is_operator_char(bytes[i]);
        }
    }

    Ok(tokens)
}

fn classify(piece: &str, from_operator_run: bool) -> Result<Token, EvalError> {
    if OPERATORS.contains(&piece) {
        let kind = if piece == "," {
            TokenKind::Separator
        } else {
            TokenKind::Operator
        };
        return Ok(Token::new(piece, kind));
    }
    if from_operator_run {
        return Err(EvalError::Syntax(format!("unrecognized operator {piece}")));
    }
    if piece.parse::<f64>().is_ok() {
        return Ok(Token::new(piece, TokenKind::Number));
    }
    if piece.starts_with('.') {
        return Ok(Token::new(piece, TokenKind::Variable));
    }
    if piece == "true" || piece == "false" {
        return Ok(Token::new(piece, TokenKind::Bool));
    }
    Ok(Token::new(piece, TokenKind::InferredString))
}

/// Phase 3: rewrites `InferredString, Group` pairs into `Function` tokens
/// whose children are one group per comma-delimited argument. The name must
/// exist in the registered function table.
fn rectify(tokens: Vec<Token>) -> Result<Vec<Token>, EvalError> {
    let mut rectified: Vec<Token> = Vec::with_capacity(tokens.len());
    for token in tokens {
        let is_call = matches!(rectified.last(), Some(prev) if prev.kind == TokenKind::InferredString)
            && token.kind == TokenKind::Group;
        if !is_call {
            rectified.push(token);
            continue;
        }

        let mut name_token = rectified.pop().unwrap_or_else(|| Token::new("", TokenKind::InferredString));
        if !functions::is_registered(&name_token.text) {
            return Err(EvalError::Syntax(format!("unknown function {}", name_token.text)));
        }

        let mut arg = Token::new("", TokenKind::Group);
        for child in token.children {
            if child.kind == TokenKind::Separator {
                name_token.children.push(arg);
                arg = Token::new("", TokenKind::Group);
            } else {
                arg.children.push(child);
            }
        }
        name_token.children.push(arg);
        name_token.kind = TokenKind::Function;
        rectified.push(name_token);
    }
    Ok(rectified)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(expression: &str) -> Vec<TokenKind> {
        tokenize(expression).unwrap().children.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn operators_split_from_operands_without_spaces() {
        assert_eq!(
            kinds("1==2"),
            vec![TokenKind::Number, TokenKind::Operator, TokenKind::Number]
        );
    }

    #[test]
    fn multi_character_operators_are_single_tokens() {
        let root = tokenize("a >= b && c != d").unwrap();
        let ops: Vec<&str> = root
            .children
            .iter()
            .filter(|t| t.kind == TokenKind::Operator)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(ops, vec![">=", "&&", "!="]);
    }

    #[test]
    fn unknown_operator_run_is_rejected() {
        assert!(matches!(tokenize("a => b"), Err(EvalError::Syntax(_))));
    }

    #[test]
    fn leading_dot_paths_are_variables() {
        assert_eq!(
            kinds(".Values.a == .item"),
            vec![TokenKind::Variable, TokenKind::Operator, TokenKind::Variable]
        );
    }

    #[test]
    fn bool_literals_are_classified() {
        assert_eq!(
            kinds("x == true"),
            vec![TokenKind::InferredString, TokenKind::Operator, TokenKind::Bool]
        );
    }

    #[test]
    fn numbers_parse_as_floats() {
        assert_eq!(kinds("3.25"), vec![TokenKind::Number]);
        assert_eq!(kinds(".5"), vec![TokenKind::Number]);
    }

    #[test]
    fn known_function_with_group_becomes_function_token() {
        let root = tokenize("len('abc')").unwrap();
        assert_eq!(root.children.len(), 1);
        let call = &root.children[0];
        assert_eq!(call.kind, TokenKind::Function);
        assert_eq!(call.text, "len");
        assert_eq!(call.children.len(), 1);
    }

    #[test]
    fn function_arguments_split_on_separators() {
        let root = tokenize("map(.Values.xs, 'trim')").unwrap();
        let call = &root.children[0];
        assert_eq!(call.kind, TokenKind::Function);
        assert_eq!(call.children.len(), 2);
    }

    #[test]
    fn unknown_function_name_is_rejected() {
        assert!(matches!(tokenize("nope('x')"), Err(EvalError::Syntax(_))));
    }

    #[test]
    fn parenthesis_group_nests_tokens() {
        let root = tokenize("(1 + 2) * 3").unwrap();
        assert_eq!(root.children.len(), 3);
        assert_eq!(root.children[0].kind, TokenKind::Group);
        assert_eq!(root.children[0].children.len(), 3);
    }
}
