//! Lexer for the infix expression grammar.
//!
//! The lexer works on normalized text: lowercase and free of whitespace. [`normalize`] produces
//! that form; [`crate::expression::Expression`] applies it before lexing so callers rarely need
//! to. Identifiers are resolved against a [`LexContext`], which holds the variables known to one
//! expression together with the real-valued assumptions handed to the symbolic engine.

use crate::errors::ExpressionError;
use crate::symbolic::Assumptions;
use crate::token::{BinaryOperator, FunctionKind, Token, UnaryOperator};

/// Variables recognised while lexing one expression, plus the assumptions that go with them.
///
/// Every variable is assumed real. A context is owned by one expression and is cloned, never
/// shared, when a derived expression needs to extend it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LexContext {
    variables: Vec<String>,
    assumptions: Assumptions,
}

impl LexContext {
    pub fn new<S: AsRef<str>>(variables: &[S]) -> Self {
        let mut context = LexContext::default();
        for name in variables {
            context.insert_variable(name.as_ref());
        }
        context
    }

    /// Registers a variable and assumes it real. Returns `false` if it was already known.
    pub fn insert_variable(&mut self, name: &str) -> bool {
        let name = name.to_lowercase();
        if self.contains(&name) {
            return false;
        }
        self.assumptions.assume_real(&name);
        self.variables.push(name);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.iter().any(|v| v == name)
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn assumptions(&self) -> &Assumptions {
        &self.assumptions
    }
}

/// Lowercases `text` and removes all whitespace.
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Splits normalized text into tokens.
///
/// A `-` is unary when it starts the input or follows an operator, a comma or `(`. A unary `-`
/// directly followed by the literal `1` becomes the single `NegUnity` token. A unary `+` is
/// dropped.
pub fn lex(text: &str, context: &LexContext) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens: Vec<Token> = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        match c {
            '0'..='9' | '.' => {
                let (token, next) = lex_number(&chars, pos)?;
                tokens.push(token);
                pos = next;
            }
            'a'..='z' | '_' => {
                let start = pos;
                while pos < chars.len()
                    && (chars[pos].is_ascii_lowercase()
                        || chars[pos].is_ascii_digit()
                        || chars[pos] == '_')
                {
                    pos += 1;
                }
                let name: String = chars[start..pos].iter().collect();
                tokens.push(lex_identifier(name, context)?);
            }
            '+' => {
                if !is_unary_position(&tokens) {
                    tokens.push(Token::BinaryOperator(BinaryOperator::Add));
                }
                pos += 1;
            }
            '-' => {
                if is_unary_position(&tokens) {
                    match chars.get(pos + 1) {
                        Some('0'..='9') | Some('.') => {
                            let (token, next) = lex_number(&chars, pos + 1)?;
                            if token == Token::Unity {
                                tokens.push(Token::NegUnity);
                                pos = next;
                                continue;
                            }
                        }
                        _ => {}
                    }
                    tokens.push(Token::UnaryOperator(UnaryOperator::Neg));
                } else {
                    tokens.push(Token::BinaryOperator(BinaryOperator::Sub));
                }
                pos += 1;
            }
            '*' => {
                tokens.push(Token::BinaryOperator(BinaryOperator::Mul));
                pos += 1;
            }
            '/' => {
                tokens.push(Token::BinaryOperator(BinaryOperator::Div));
                pos += 1;
            }
            '^' => {
                tokens.push(Token::BinaryOperator(BinaryOperator::Pow));
                pos += 1;
            }
            '(' => {
                tokens.push(Token::LeftParen);
                pos += 1;
            }
            ')' => {
                tokens.push(Token::RightParen);
                pos += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                pos += 1;
            }
            other => {
                return Err(ExpressionError::UnexpectedCharacter {
                    character: other,
                    position: pos,
                })
            }
        }
    }

    log::trace!(
        "lexed '{}' into {} tokens: {}",
        text,
        tokens.len(),
        itertools::join(&tokens, " ")
    );
    Ok(tokens)
}

fn is_unary_position(tokens: &[Token]) -> bool {
    !matches!(tokens.last(), Some(last) if last.ends_operand())
}

fn lex_identifier(name: String, context: &LexContext) -> Result<Token, ExpressionError> {
    if context.contains(&name) {
        return Ok(Token::Variable(name));
    }
    if name == "nan" {
        return Ok(Token::NaN);
    }
    match FunctionKind::from_name(&name) {
        Some(kind) => Ok(Token::Function(kind, kind.arity().unwrap_or(0))),
        None => Err(ExpressionError::UnknownIdentifier(name)),
    }
}

/// Reads a decimal literal starting at `start`: digits, an optional fraction and an optional
/// exponent. Literals in exponent notation are rewritten in plain decimal notation so the
/// canonical text stays readable by every engine.
fn lex_number(chars: &[char], start: usize) -> Result<(Token, usize), ExpressionError> {
    let mut pos = start;
    let digits = |pos: &mut usize| {
        while *pos < chars.len() && chars[*pos].is_ascii_digit() {
            *pos += 1;
        }
    };

    digits(&mut pos);
    if pos < chars.len() && chars[pos] == '.' {
        pos += 1;
        digits(&mut pos);
    }

    let mut has_exponent = false;
    if pos < chars.len() && chars[pos] == 'e' {
        let mut look = pos + 1;
        if look < chars.len() && (chars[look] == '+' || chars[look] == '-') {
            look += 1;
        }
        if look < chars.len() && chars[look].is_ascii_digit() {
            pos = look;
            digits(&mut pos);
            has_exponent = true;
        }
    }

    let text: String = chars[start..pos].iter().collect();
    let value: f64 = text
        .parse()
        .map_err(|_| ExpressionError::InvalidNumber(text.clone()))?;

    let token = match text.as_str() {
        "0" => Token::Zero,
        "1" => Token::Unity,
        _ if has_exponent => Token::Number(value.to_string()),
        _ => Token::Number(text),
    };
    Ok((token, pos))
}
