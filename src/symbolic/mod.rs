//! The symbolic engine boundary used for differentiation.
//!
//! Expression trees are not differentiated in place. A node is rendered to canonical text,
//! handed to a [`SymbolicEngine`] which parses, simplifies and differentiates it, and the
//! result comes back as canonical text that is parsed into a fresh expression. The engine owns
//! simplification semantics; this crate only guarantees the text round trip and supplies the
//! set of variables the engine may assume to be real.
//!
//! [`EvalexprEngine`] is the default engine. It parses with `evalexpr` and works on the
//! [`Expr`] tree from [`expr`].

use std::collections::BTreeSet;

use evalexpr::{build_operator_tree, Node};

use crate::errors::EngineError;
use crate::lexer::{normalize, LexContext};

pub mod convert;
pub mod expr;

pub use expr::{Elementary, Expr};

/// Names the engine may treat as real-valued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assumptions {
    real: BTreeSet<String>,
}

impl Assumptions {
    pub fn assume_real(&mut self, name: &str) {
        self.real.insert(name.to_string());
    }

    pub fn is_real(&self, name: &str) -> bool {
        self.real.contains(name)
    }

    pub fn real(&self) -> impl Iterator<Item = &str> {
        self.real.iter().map(String::as_str)
    }
}

/// A computer-algebra backend.
pub trait SymbolicEngine {
    /// The engine's own expression tree.
    type Ast;

    fn parse(&self, text: &str) -> Result<Self::Ast, EngineError>;

    fn simplify(&self, ast: &Self::Ast, assumptions: &Assumptions) -> Self::Ast;

    fn diff(&self, ast: &Self::Ast, symbol: &str) -> Self::Ast;

    /// Every symbol name in the tree, bound dummies included.
    fn free_symbols(&self, ast: &Self::Ast) -> BTreeSet<String>;

    /// Renders the tree in the canonical grammar understood by the lexer.
    fn render(&self, ast: &Self::Ast) -> String;
}

/// Object-safe, text level differentiation.
///
/// Implemented for every [`SymbolicEngine`]; expression trees only ever see this trait.
pub trait Differentiator {
    /// Differentiates canonical `text` with respect to `symbol`.
    ///
    /// Returns the normalized derivative text and a copy of `context` extended with every
    /// symbol the derivative introduced.
    fn differentiate(
        &self,
        text: &str,
        symbol: &str,
        context: &LexContext,
    ) -> Result<(String, LexContext), EngineError>;
}

impl<E: SymbolicEngine> Differentiator for E {
    fn differentiate(
        &self,
        text: &str,
        symbol: &str,
        context: &LexContext,
    ) -> Result<(String, LexContext), EngineError> {
        let mut context = context.clone();

        let parsed = self.parse(text)?;
        let simplified = self.simplify(&parsed, context.assumptions());
        let derivative = self.diff(&simplified, symbol);

        for name in self.free_symbols(&derivative) {
            if context.insert_variable(&name) {
                log::warn!(
                    "derivative of '{}' w.r.t. '{}' introduced new symbol '{}'",
                    text,
                    symbol,
                    name
                );
            }
        }

        let result = normalize(&self.render(&self.simplify(&derivative, context.assumptions())));
        log::debug!("d/d{} {} = {}", symbol, text, result);
        Ok((result, context))
    }
}

/// The default engine, backed by the `evalexpr` parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalexprEngine;

impl SymbolicEngine for EvalexprEngine {
    type Ast = Expr;

    fn parse(&self, text: &str) -> Result<Expr, EngineError> {
        let node: Node = build_operator_tree(text)?;
        convert::build_ast(&node)
    }

    fn simplify(&self, ast: &Expr, assumptions: &Assumptions) -> Expr {
        *ast.simplify(assumptions)
    }

    fn diff(&self, ast: &Expr, symbol: &str) -> Expr {
        let mut taken = ast.free_symbols();
        taken.insert(symbol.to_string());
        let mut dummies = expr::Dummies::avoiding(taken);
        *ast.derivative(symbol, &mut dummies)
    }

    fn free_symbols(&self, ast: &Expr) -> BTreeSet<String> {
        ast.free_symbols()
    }

    fn render(&self, ast: &Expr) -> String {
        ast.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_render() {
        let engine = EvalexprEngine;
        let ast = engine.parse("(s0*exp(((-b)*d1)))").unwrap();
        assert_eq!(engine.render(&ast), "(s0*exp(((-b)*d1)))");

        let ast = engine.parse("pow(x,2)").unwrap();
        assert_eq!(ast, Expr::Pow(Box::new(Expr::Var("x".to_string())), 2));
    }

    #[test]
    fn test_differentiate_keeps_context() {
        let context = LexContext::new(&["x", "y"]);
        let (text, extended) = EvalexprEngine
            .differentiate("(x*y)", "x", &context)
            .unwrap();
        assert_eq!(text, "y");
        assert_eq!(extended, context);
    }

    #[test]
    fn test_differentiate_grows_context() {
        let context = LexContext::new(&["x"]);
        let (text, extended) = EvalexprEngine
            .differentiate("abs((2*x))", "x", &context)
            .unwrap();
        assert!(text.contains("subs(derivative(abs(xi_1),xi_1),xi_1,"));
        assert!(extended.contains("xi_1"));
        assert!(!context.contains("xi_1"));
    }

    #[test]
    fn test_real_assumptions() {
        let engine = EvalexprEngine;
        let ast = engine.parse("sqrt(pow(x,2))").unwrap();

        let mut assumptions = Assumptions::default();
        assert_eq!(engine.render(&engine.simplify(&ast, &assumptions)), "sqrt(pow(x,2))");

        assumptions.assume_real("x");
        assert_eq!(engine.render(&engine.simplify(&ast, &assumptions)), "abs(x)");
    }
}
