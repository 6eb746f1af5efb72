//! Postfix token stream to expression tree.
//!
//! The builder keeps an operand stack and dispatches every token through a [`CreationMap`].
//! A creation function either pushes a leaf or pops the operands it needs and pushes one
//! interior node. Adding an operator or function means registering one more creation function;
//! the builder loop itself never changes.

use std::collections::HashMap;

use crate::errors::ExpressionError;
use crate::lexer::LexContext;
use crate::node::{BinaryFn, Literal, Node, UnaryFn};
use crate::symbolic::Differentiator;
use crate::token::{BinaryOperator, FunctionKind, Token, TokenId, UnaryOperator};

/// Builds a node for one token on top of the builder's operand stack.
pub type CreationFn = fn(&mut Builder<'_>, &Token) -> Result<(), ExpressionError>;

/// Token kind to creation function.
#[derive(Clone)]
pub struct CreationMap {
    functions: HashMap<TokenId, CreationFn>,
}

impl CreationMap {
    pub fn empty() -> Self {
        CreationMap {
            functions: HashMap::new(),
        }
    }

    /// Registers `function` for `id`, returning the previous entry.
    pub fn insert(&mut self, id: TokenId, function: CreationFn) -> Option<CreationFn> {
        self.functions.insert(id, function)
    }

    pub fn get(&self, id: TokenId) -> Option<CreationFn> {
        self.functions.get(&id).copied()
    }
}

impl Default for CreationMap {
    fn default() -> Self {
        let mut map = CreationMap::empty();
        map.insert(TokenId::Zero, create_literal);
        map.insert(TokenId::Unity, create_literal);
        map.insert(TokenId::NegUnity, create_literal);
        map.insert(TokenId::NaN, create_literal);
        map.insert(TokenId::Number, create_literal);
        map.insert(TokenId::Variable, create_variable);
        map.insert(TokenId::Unary(UnaryOperator::Neg), create_neg);
        for op in [
            BinaryOperator::Add,
            BinaryOperator::Sub,
            BinaryOperator::Mul,
            BinaryOperator::Div,
            BinaryOperator::Pow,
        ] {
            map.insert(TokenId::Binary(op), create_binary);
        }
        for kind in FunctionKind::ALL {
            let function: CreationFn = match kind {
                FunctionKind::Pow => create_binary,
                FunctionKind::Derivative => create_derivative,
                FunctionKind::Subs => create_subs,
                _ => create_unary_function,
            };
            map.insert(TokenId::Function(kind), function);
        }
        map
    }
}

/// Operand stack plus the context and engine creation functions may need.
pub struct Builder<'a> {
    nodes: Vec<Node>,
    context: LexContext,
    engine: &'a dyn Differentiator,
}

impl<'a> Builder<'a> {
    pub fn new(context: LexContext, engine: &'a dyn Differentiator) -> Self {
        Builder {
            nodes: Vec::new(),
            context,
            engine,
        }
    }

    pub fn push(&mut self, node: Node) {
        self.nodes.push(node);
    }

    pub fn pop(&mut self) -> Result<Node, ExpressionError> {
        self.nodes
            .pop()
            .ok_or_else(|| ExpressionError::Malformed("no nodes left".to_string()))
    }

    /// Pops `count` nodes, returned in push order.
    pub fn pop_n(&mut self, count: usize) -> Result<Vec<Node>, ExpressionError> {
        if self.nodes.len() < count {
            return Err(ExpressionError::Malformed("no nodes left".to_string()));
        }
        Ok(self.nodes.split_off(self.nodes.len() - count))
    }

    pub fn context(&self) -> &LexContext {
        &self.context
    }

    pub fn engine(&self) -> &'a dyn Differentiator {
        self.engine
    }

    /// Adds variables introduced by a resolved sub-tree.
    pub fn absorb(&mut self, context: &LexContext) {
        for name in context.variables() {
            self.context.insert_variable(name);
        }
    }

    /// Runs every token through `map` and returns the single remaining node.
    pub fn build(
        mut self,
        postfix: &[Token],
        map: &CreationMap,
    ) -> Result<(Node, LexContext), ExpressionError> {
        for token in postfix {
            let create = token
                .id()
                .and_then(|id| map.get(id))
                .ok_or_else(|| ExpressionError::NoCreationFunction(token.to_string()))?;
            create(&mut self, token)?;
        }

        match self.nodes.len() {
            0 => Err(ExpressionError::Malformed("no nodes left".to_string())),
            1 => {
                let root = self.pop()?;
                Ok((root, self.context))
            }
            n => Err(ExpressionError::Malformed(format!(
                "more than one node left ({})",
                n
            ))),
        }
    }
}

fn create_literal(builder: &mut Builder<'_>, token: &Token) -> Result<(), ExpressionError> {
    let literal = match token {
        Token::Zero => Literal::Zero,
        Token::Unity => Literal::Unity,
        Token::NegUnity => Literal::NegUnity,
        Token::NaN => Literal::NaN,
        Token::Number(text) => Literal::Number(text.clone()),
        other => return Err(ExpressionError::NoCreationFunction(other.to_string())),
    };
    builder.push(Node::Token(literal));
    Ok(())
}

fn create_variable(builder: &mut Builder<'_>, token: &Token) -> Result<(), ExpressionError> {
    match token {
        Token::Variable(name) => {
            builder.push(Node::Variable(name.clone()));
            Ok(())
        }
        other => Err(ExpressionError::NoCreationFunction(other.to_string())),
    }
}

fn create_neg(builder: &mut Builder<'_>, _token: &Token) -> Result<(), ExpressionError> {
    let child = builder.pop()?;
    builder.push(Node::unary(UnaryFn::Neg, child));
    Ok(())
}

fn create_binary(builder: &mut Builder<'_>, token: &Token) -> Result<(), ExpressionError> {
    let function = match token {
        Token::BinaryOperator(BinaryOperator::Add) => BinaryFn::Add,
        Token::BinaryOperator(BinaryOperator::Sub) => BinaryFn::Sub,
        Token::BinaryOperator(BinaryOperator::Mul) => BinaryFn::Mul,
        Token::BinaryOperator(BinaryOperator::Div) => BinaryFn::Div,
        Token::BinaryOperator(BinaryOperator::Pow) | Token::Function(FunctionKind::Pow, _) => {
            BinaryFn::Pow
        }
        other => return Err(ExpressionError::NoCreationFunction(other.to_string())),
    };
    let right = builder.pop()?;
    let left = builder.pop()?;
    builder.push(Node::binary(function, left, right));
    Ok(())
}

fn create_unary_function(builder: &mut Builder<'_>, token: &Token) -> Result<(), ExpressionError> {
    let function = match token {
        Token::Function(kind, _) => UnaryFn::from_function(*kind),
        _ => None,
    }
    .ok_or_else(|| ExpressionError::NoCreationFunction(token.to_string()))?;
    let child = builder.pop()?;
    builder.push(Node::unary(function, child));
    Ok(())
}

fn create_derivative(builder: &mut Builder<'_>, _token: &Token) -> Result<(), ExpressionError> {
    let wrt = builder.pop()?;
    let target = builder.pop()?;
    let name = match wrt {
        Node::Variable(name) => name,
        other => return Err(ExpressionError::InvalidDerivativeArgument(other.to_string())),
    };

    let derivative = target.diff(&name, builder.context(), builder.engine())?;
    builder.absorb(derivative.context());
    builder.push(Node::Derivative {
        target: Box::new(target),
        wrt: name,
        resolved: Box::new(derivative.into_root()),
    });
    Ok(())
}

fn create_subs(builder: &mut Builder<'_>, token: &Token) -> Result<(), ExpressionError> {
    let count = match token {
        Token::Function(FunctionKind::Subs, count) if FunctionKind::Subs.accepts(*count) => *count,
        other => {
            return Err(ExpressionError::ArgumentCount {
                function: "subs".to_string(),
                expected: FunctionKind::Subs.arity_description(),
                got: match other {
                    Token::Function(_, count) => *count,
                    _ => 0,
                },
            })
        }
    };

    let args = builder.pop_n(count)?;
    let mut replacements = Vec::with_capacity(count / 2);
    for pair in args[1..].chunks(2) {
        match &pair[0] {
            Node::Variable(name) => replacements.push((name.clone(), pair[1].clone())),
            other => return Err(ExpressionError::InvalidSubsArgument(other.to_string())),
        }
    }

    let resolved = args[0].substitute(&replacements);
    builder.push(Node::Subs {
        args,
        resolved: Box::new(resolved),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::shunter::shunt;
    use crate::symbolic::EvalexprEngine;

    fn build(text: &str, map: &CreationMap) -> Result<Node, ExpressionError> {
        let context = LexContext::new(&["x", "y"]);
        let postfix = shunt(lex(text, &context)?)?;
        Builder::new(context, &EvalexprEngine)
            .build(&postfix, map)
            .map(|(node, _)| node)
    }

    #[test]
    fn test_build_tree() {
        let node = build("x*(y+1)", &CreationMap::default()).unwrap();
        assert_eq!(
            node,
            Node::binary(
                BinaryFn::Mul,
                Node::Variable("x".into()),
                Node::binary(
                    BinaryFn::Add,
                    Node::Variable("y".into()),
                    Node::Token(Literal::Unity)
                )
            )
        );
    }

    #[test]
    fn test_malformed() {
        let map = CreationMap::default();
        // shunting accepts adjacent operands, the builder does not
        let context = LexContext::new(&["x", "y"]);
        let postfix = vec![Token::Variable("x".into()), Token::Variable("y".into())];
        let result = Builder::new(context.clone(), &EvalexprEngine).build(&postfix, &map);
        assert!(matches!(result, Err(ExpressionError::Malformed(msg)) if msg.starts_with("more than one")));

        let result = Builder::new(context.clone(), &EvalexprEngine).build(&[], &map);
        assert!(matches!(result, Err(ExpressionError::Malformed(msg)) if msg == "no nodes left"));

        let postfix = vec![
            Token::Variable("x".into()),
            Token::BinaryOperator(BinaryOperator::Mul),
        ];
        let result = Builder::new(context, &EvalexprEngine).build(&postfix, &map);
        assert!(matches!(result, Err(ExpressionError::Malformed(_))));
    }

    #[test]
    fn test_creation_map_is_the_extension_point() {
        fn create_double(builder: &mut Builder<'_>, _token: &Token) -> Result<(), ExpressionError> {
            let child = builder.pop()?;
            builder.push(Node::binary(
                BinaryFn::Mul,
                Node::Token(Literal::Number("2".into())),
                child,
            ));
            Ok(())
        }

        let mut map = CreationMap::default();
        let previous = map.insert(TokenId::Function(FunctionKind::Sqrt), create_double);
        assert!(previous.is_some());
        assert_eq!(build("sqrt(x)", &map).unwrap().str(), "(2*x)");

        let mut map = CreationMap::default();
        map.functions.remove(&TokenId::Binary(BinaryOperator::Add));
        assert!(matches!(
            build("x+y", &map),
            Err(ExpressionError::NoCreationFunction(_))
        ));
    }

    #[test]
    fn test_derivative_requires_variable() {
        let result = build("derivative(x,(x*y))", &CreationMap::default());
        assert!(matches!(
            result,
            Err(ExpressionError::InvalidDerivativeArgument(text)) if text == "(x*y)"
        ));
    }

    #[test]
    fn test_subs() {
        let node = build("subs(x*y,x,y+1,y,2)", &CreationMap::default()).unwrap();
        assert_eq!(node.str(), "((y+1)*2)");

        let result = build("subs(x*y,2,y)", &CreationMap::default());
        assert!(matches!(result, Err(ExpressionError::InvalidSubsArgument(_))));
    }
}
