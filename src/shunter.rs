//! Shunting-yard rewrite of an infix token stream into postfix order.
//!
//! Besides the usual precedence handling this pass counts the arguments of every function call
//! and validates the count against the function's declared arity. The emitted function tokens
//! carry the counted arity, which tells the tree builder how many operands to pop.

use crate::errors::ExpressionError;
use crate::token::{FunctionKind, Token};

/// Precedence of the unary minus: above every binary operator, `^` included.
const UNARY_PRECEDENCE: u8 = 4;

/// One open parenthesis.
struct Frame {
    function: Option<FunctionKind>,
    commas: usize,
    has_content: bool,
}

/// Converts infix tokens to postfix order.
pub fn shunt(tokens: Vec<Token>) -> Result<Vec<Token>, ExpressionError> {
    let mut output: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut operators: Vec<Token> = Vec::new();
    let mut frames: Vec<Frame> = Vec::new();

    let mut iter = tokens.into_iter().peekable();
    while let Some(token) = iter.next() {
        if token != Token::RightParen {
            if let Some(frame) = frames.last_mut() {
                frame.has_content = true;
            }
        }

        match token {
            Token::Zero
            | Token::Unity
            | Token::NegUnity
            | Token::NaN
            | Token::Number(_)
            | Token::Variable(_) => output.push(token),

            Token::Function(kind, _) => {
                if iter.peek() != Some(&Token::LeftParen) {
                    return Err(ExpressionError::Malformed(format!(
                        "function '{}' must be followed by '('",
                        kind.name()
                    )));
                }
                operators.push(token);
            }

            Token::LeftParen => {
                let function = match operators.last() {
                    Some(Token::Function(kind, _)) => Some(*kind),
                    _ => None,
                };
                frames.push(Frame {
                    function,
                    commas: 0,
                    has_content: false,
                });
                operators.push(Token::LeftParen);
            }

            Token::Comma => {
                pop_until_left_paren(&mut operators, &mut output)
                    .ok_or(ExpressionError::MisplacedComma)?;
                match frames.last_mut() {
                    Some(frame) if frame.function.is_some() => frame.commas += 1,
                    _ => return Err(ExpressionError::MisplacedComma),
                }
            }

            Token::RightParen => {
                pop_until_left_paren(&mut operators, &mut output)
                    .ok_or(ExpressionError::UnbalancedParentheses)?;
                operators.pop();
                let frame = frames.pop().ok_or(ExpressionError::UnbalancedParentheses)?;

                if let Some(kind) = frame.function {
                    operators.pop();
                    let count = if frame.has_content {
                        frame.commas + 1
                    } else {
                        0
                    };
                    if !kind.accepts(count) {
                        return Err(ExpressionError::ArgumentCount {
                            function: kind.name().to_string(),
                            expected: kind.arity_description(),
                            got: count,
                        });
                    }
                    output.push(Token::Function(kind, count));
                }
            }

            Token::UnaryOperator(_) => operators.push(token),

            Token::BinaryOperator(op) => {
                while let Some(top) = operators.last() {
                    let pops = match top {
                        Token::UnaryOperator(_) => UNARY_PRECEDENCE >= op.precedence(),
                        Token::BinaryOperator(top_op) => {
                            top_op.precedence() > op.precedence()
                                || (top_op.precedence() == op.precedence() && op.is_left_assoc())
                        }
                        _ => false,
                    };
                    if !pops {
                        break;
                    }
                    if let Some(popped) = operators.pop() {
                        output.push(popped);
                    }
                }
                operators.push(token);
            }
        }
    }

    while let Some(token) = operators.pop() {
        match token {
            Token::LeftParen => return Err(ExpressionError::UnbalancedParentheses),
            Token::Function(kind, _) => {
                return Err(ExpressionError::Malformed(format!(
                    "unterminated call to '{}'",
                    kind.name()
                )))
            }
            other => output.push(other),
        }
    }

    log::trace!("postfix: {}", itertools::join(&output, " "));
    Ok(output)
}

/// Moves operators to the output until a `(` is on top. Returns `None` if there is none.
fn pop_until_left_paren(operators: &mut Vec<Token>, output: &mut Vec<Token>) -> Option<()> {
    loop {
        match operators.last() {
            Some(Token::LeftParen) => return Some(()),
            Some(_) => {
                if let Some(token) = operators.pop() {
                    output.push(token);
                }
            }
            None => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::{lex, LexContext};

    fn postfix(text: &str) -> String {
        let context = LexContext::new(&["a", "b", "c", "x"]);
        let tokens = shunt(lex(text, &context).unwrap()).unwrap();
        itertools::join(&tokens, " ")
    }

    fn shunt_err(text: &str) -> ExpressionError {
        let context = LexContext::new(&["a", "b", "c", "x"]);
        shunt(lex(text, &context).unwrap()).unwrap_err()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(postfix("a+b*c"), "a b c * +");
        assert_eq!(postfix("(a+b)*c"), "a b + c *");
        assert_eq!(postfix("a-b-c"), "a b - c -");
        assert_eq!(postfix("a/b*c"), "a b / c *");
    }

    #[test]
    fn test_power_is_right_associative() {
        assert_eq!(postfix("a^b^c"), "a b c ^ ^");
    }

    #[test]
    fn test_unary_minus_binds_tighter_than_power() {
        assert_eq!(postfix("-a^b"), "a neg b ^");
        assert_eq!(postfix("-a*b"), "a neg b *");
        assert_eq!(postfix("a*-b"), "a b neg *");
    }

    #[test]
    fn test_function_arity() {
        assert_eq!(postfix("sin(a+b)"), "a b + sin/1");
        assert_eq!(postfix("pow(a,b*c)"), "a b c * pow/2");
        assert_eq!(postfix("subs(a*x,x,b,a,c)"), "a x * x b a c subs/5");
        assert_eq!(postfix("exp(pow(x,2))"), "x 2 pow/2 exp/1");
    }

    #[test]
    fn test_argument_count_errors() {
        assert!(matches!(
            shunt_err("pow(a)"),
            ExpressionError::ArgumentCount { got: 1, .. }
        ));
        assert!(matches!(
            shunt_err("sin(a,b)"),
            ExpressionError::ArgumentCount { got: 2, .. }
        ));
        assert!(matches!(
            shunt_err("exp()"),
            ExpressionError::ArgumentCount { got: 0, .. }
        ));
        assert!(matches!(
            shunt_err("subs(a,x)"),
            ExpressionError::ArgumentCount { got: 2, .. }
        ));
    }

    #[test]
    fn test_unbalanced_parentheses() {
        assert!(matches!(
            shunt_err("(a+b"),
            ExpressionError::UnbalancedParentheses
        ));
        assert!(matches!(
            shunt_err("a+b)"),
            ExpressionError::UnbalancedParentheses
        ));
    }

    #[test]
    fn test_misplaced_comma() {
        assert!(matches!(shunt_err("a,b"), ExpressionError::MisplacedComma));
        assert!(matches!(
            shunt_err("(a,b)"),
            ExpressionError::MisplacedComma
        ));
    }

    #[test]
    fn test_function_without_parenthesis() {
        assert!(matches!(shunt_err("sin+a"), ExpressionError::Malformed(_)));
    }
}
