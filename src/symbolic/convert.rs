//! Conversion of evalexpr AST nodes into the engine's [`Expr`] tree.
//!
//! The entry point is [`build_ast`], which recursively traverses the evalexpr AST. Function
//! arguments arrive as a single child that may be wrapped in root nodes (parentheses) and, for
//! more than one argument, is a tuple; [`arguments`] unwraps both.

use evalexpr::{Node, Operator, Value};

use super::expr::{Elementary, Expr};
use crate::errors::EngineError;

/// Converts an evalexpr AST node into an [`Expr`].
///
/// # Supported operations
/// * Arithmetic: +, -, *, /, unary minus and `^`
/// * Variables and numeric constants
/// * Functions: abs, sgn, sqrt, exp, log (ln), the trigonometric and hyperbolic functions and
///   their inverses, pow(a, b)
/// * Unevaluated forms: derivative(f, x) and subs(f, x, value)
pub fn build_ast(node: &Node) -> Result<Expr, EngineError> {
    match node.operator() {
        // Addition operator - combines multiple children into a series of binary Add expressions
        Operator::Add => fold_children(node, Expr::Add),
        // Multiplication operator - combines multiple children into a series of binary Mul expressions
        Operator::Mul => fold_children(node, Expr::Mul),
        Operator::Div => {
            let (l, r) = two_children(node)?;
            Ok(Expr::Div(Box::new(l), Box::new(r)))
        }
        Operator::Sub => {
            let (l, r) = two_children(node)?;
            Ok(Expr::Sub(Box::new(l), Box::new(r)))
        }
        Operator::Const { value } => match value {
            Value::Float(f) => Ok(Expr::Const(*f)),
            Value::Int(i) => Ok(Expr::Const(*i as f64)),
            _ => Err(EngineError::ConstOperator(format!("{:?}", value))),
        },
        Operator::VariableIdentifierRead { identifier } => Ok(Expr::Var(identifier.to_string())),
        Operator::Neg => {
            let child = single_child(node)?;
            Ok(Expr::Neg(Box::new(child)))
        }
        // Exponentiation - integer constant exponents become Pow, anything else PowExpr
        Operator::Exp => {
            let (base, exponent) = two_children(node)?;
            Ok(power(base, exponent))
        }
        Operator::FunctionIdentifier { identifier } => {
            let children = node.children();
            let args = match children.first() {
                Some(child) => arguments(child),
                None => Vec::new(),
            };
            build_function(identifier, &args)
        }
        // Root node - should have exactly one child
        Operator::RootNode => single_child(node),
        _ => Err(EngineError::UnsupportedOperator(format!(
            "{:?}",
            node.operator()
        ))),
    }
}

fn build_function(name: &str, args: &[&Node]) -> Result<Expr, EngineError> {
    let expect = |expected: usize| {
        if args.len() == expected {
            Ok(())
        } else {
            Err(EngineError::Arity {
                function: name.to_string(),
                expected,
                got: args.len(),
            })
        }
    };

    match name {
        "pow" => {
            expect(2)?;
            Ok(power(build_ast(args[0])?, build_ast(args[1])?))
        }
        "derivative" => {
            expect(2)?;
            let target = build_ast(args[0])?;
            let symbol = symbol_name(args[1])?;
            Ok(Expr::Derivative(Box::new(target), symbol))
        }
        "subs" => {
            expect(3)?;
            let target = build_ast(args[0])?;
            let symbol = symbol_name(args[1])?;
            let value = build_ast(args[2])?;
            Ok(Expr::Subs(Box::new(target), symbol, Box::new(value)))
        }
        _ => {
            let unary: fn(Box<Expr>) -> Expr = match name {
                "abs" => Expr::Abs,
                "sgn" | "sign" => Expr::Sgn,
                "sqrt" => Expr::Sqrt,
                "exp" => Expr::Exp,
                "log" | "ln" => Expr::Ln,
                "sin" => Expr::Sin,
                "cos" => Expr::Cos,
                other => match Elementary::from_name(other) {
                    Some(function) => {
                        expect(1)?;
                        return Ok(Expr::Elementary(function, Box::new(build_ast(args[0])?)));
                    }
                    None => return Err(EngineError::UnsupportedFunction(other.to_string())),
                },
            };
            expect(1)?;
            Ok(unary(Box::new(build_ast(args[0])?)))
        }
    }
}

fn power(base: Expr, exponent: Expr) -> Expr {
    match exponent {
        Expr::Const(n) if n.fract() == 0.0 && n.abs() < 1e9 => Expr::Pow(Box::new(base), n as i64),
        _ => Expr::PowExpr(Box::new(base), Box::new(exponent)),
    }
}

/// Function arguments, with root nodes unwrapped and tuples expanded.
fn arguments(node: &Node) -> Vec<&Node> {
    let node = unwrap_root(node);
    match node.operator() {
        Operator::Tuple => node.children().iter().collect(),
        _ => vec![node],
    }
}

fn unwrap_root(mut node: &Node) -> &Node {
    while let (Operator::RootNode, [child]) = (node.operator(), node.children()) {
        node = child;
    }
    node
}

fn symbol_name(node: &Node) -> Result<String, EngineError> {
    match unwrap_root(node).operator() {
        Operator::VariableIdentifierRead { identifier } => Ok(identifier.to_string()),
        other => Err(EngineError::ExpectedVariable(format!("{:?}", other))),
    }
}

fn single_child(node: &Node) -> Result<Expr, EngineError> {
    match node.children() {
        [child] => build_ast(child),
        children => Err(EngineError::UnsupportedOperator(format!(
            "expected a single child for {:?}, found {}",
            node.operator(),
            children.len()
        ))),
    }
}

fn two_children(node: &Node) -> Result<(Expr, Expr), EngineError> {
    match node.children() {
        [l, r] => Ok((build_ast(l)?, build_ast(r)?)),
        children => Err(EngineError::UnsupportedOperator(format!(
            "expected two children for {:?}, found {}",
            node.operator(),
            children.len()
        ))),
    }
}

fn fold_children(node: &Node, combine: fn(Box<Expr>, Box<Expr>) -> Expr) -> Result<Expr, EngineError> {
    let children = node.children();
    let (first, rest) = children.split_first().ok_or_else(|| {
        EngineError::UnsupportedOperator(format!("{:?} without operands", node.operator()))
    })?;
    rest.iter().try_fold(build_ast(first)?, |acc, child| {
        Ok(combine(Box::new(acc), Box::new(build_ast(child)?)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalexpr::build_operator_tree;

    fn parse(text: &str) -> Expr {
        let node: Node = build_operator_tree(text).unwrap();
        build_ast(&node).unwrap()
    }

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::Var(name.to_string()))
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(
            parse("(a+b)*c"),
            Expr::Mul(Box::new(Expr::Add(var("a"), var("b"))), var("c"))
        );
        assert_eq!(parse("(-b)"), Expr::Neg(var("b")));
        assert_eq!(parse("x^2"), Expr::Pow(var("x"), 2));
        assert_eq!(parse("2.5"), Expr::Const(2.5));
    }

    #[test]
    fn test_functions() {
        assert_eq!(parse("sgn(x)"), Expr::Sgn(var("x")));
        assert_eq!(parse("log(x)"), Expr::Ln(var("x")));
        assert_eq!(
            parse("atanh((x*y))"),
            Expr::Elementary(Elementary::Atanh, Box::new(Expr::Mul(var("x"), var("y"))))
        );
        assert_eq!(
            parse("pow(x,y)"),
            Expr::PowExpr(var("x"), var("y"))
        );
    }

    #[test]
    fn test_unevaluated_forms() {
        assert_eq!(
            parse("derivative(abs(x),x)"),
            Expr::Derivative(Box::new(Expr::Abs(var("x"))), "x".to_string())
        );
        assert_eq!(
            parse("subs(sgn(xi_1),xi_1,(2*x))"),
            Expr::Subs(
                Box::new(Expr::Sgn(var("xi_1"))),
                "xi_1".to_string(),
                Box::new(Expr::Mul(Box::new(Expr::Const(2.0)), var("x")))
            )
        );
    }

    #[test]
    fn test_unsupported_function() {
        let node: Node = build_operator_tree("gamma(x)").unwrap();
        assert!(matches!(
            build_ast(&node),
            Err(EngineError::UnsupportedFunction(name)) if name == "gamma"
        ));

        let node: Node = build_operator_tree("pow(x)").unwrap();
        assert!(matches!(
            build_ast(&node),
            Err(EngineError::Arity { expected: 2, got: 1, .. })
        ));
    }
}
