//! Parsed expressions.
//!
//! An [`Expression`] is the root of a complete formula together with the [`LexContext`] it was
//! parsed against and its normalized source text. Expressions are immutable; differentiation
//! returns a new expression with its own, possibly extended, context.
//!
//! # Example
//!
//! ```rust
//! use shadergen::prelude::*;
//!
//! let expr = Expression::new("s0*exp(-b*d1)", &["s0", "b", "d1"]).unwrap();
//! assert_eq!(expr.str(), "(s0*exp(((-b)*d1)))");
//!
//! let ds0 = expr.diff("s0").unwrap();
//! assert_eq!(ds0.str(), "exp(((-b)*d1))");
//! ```

use std::fmt;

use colored::Colorize;

use crate::builder::{Builder, CreationMap};
use crate::context::SymbolicContext;
use crate::errors::ExpressionError;
use crate::lexer::{lex, normalize, LexContext};
use crate::node::{Literal, Node};
use crate::shunter::shunt;
use crate::symbolic::{Differentiator, EvalexprEngine};

#[derive(Clone, PartialEq)]
pub struct Expression {
    root: Node,
    context: LexContext,
    text: String,
}

impl Expression {
    /// Parses `text` with the given variables and the default symbolic engine.
    ///
    /// The text is lowercased and stripped of whitespace before lexing.
    pub fn new<S: AsRef<str>>(text: &str, variables: &[S]) -> Result<Self, ExpressionError> {
        Self::with_context(text, &LexContext::new(variables))
    }

    /// Parses `text` against an existing context with the default symbolic engine.
    pub fn with_context(text: &str, context: &LexContext) -> Result<Self, ExpressionError> {
        Self::parse_with(text, context.clone(), &EvalexprEngine)
    }

    /// Parses `text` using `engine` for any `derivative` it contains.
    pub fn parse_with(
        text: &str,
        context: LexContext,
        engine: &dyn Differentiator,
    ) -> Result<Self, ExpressionError> {
        Self::parse_with_map(text, context, engine, &CreationMap::default())
    }

    /// Parses `text` building nodes through a custom creation map.
    pub fn parse_with_map(
        text: &str,
        context: LexContext,
        engine: &dyn Differentiator,
        map: &CreationMap,
    ) -> Result<Self, ExpressionError> {
        let text = normalize(text);
        let postfix = shunt(lex(&text, &context)?)?;
        let (root, context) = Builder::new(context, engine).build(&postfix, map)?;
        Ok(Expression {
            root,
            context,
            text,
        })
    }

    pub(crate) fn from_parts(root: Node, context: LexContext) -> Self {
        let text = root.to_string();
        Expression {
            root,
            context,
            text,
        }
    }

    pub(crate) fn into_parts(self) -> (Node, LexContext) {
        (self.root, self.context)
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn into_root(self) -> Node {
        self.root
    }

    pub fn context(&self) -> &LexContext {
        &self.context
    }

    /// The variables the expression was parsed against, in registration order.
    pub fn variables(&self) -> &[String] {
        self.context.variables()
    }

    /// The normalized text this expression was built from.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Canonical string form.
    pub fn str(&self) -> String {
        self.root.str()
    }

    /// GLSL form, with variables bound through `symtext` and identity terms folded away.
    ///
    /// The canonical form keeps terms like `*1` that differentiation leaves behind; the kernel
    /// text does not.
    pub fn glsl_str(&self, symtext: &SymbolicContext) -> Result<String, ExpressionError> {
        self.root.folded().glsl_str(symtext)
    }

    /// Derivative with respect to `var`, using the default symbolic engine.
    pub fn diff(&self, var: &str) -> Result<Expression, ExpressionError> {
        self.diff_with(var, &EvalexprEngine)
    }

    pub fn diff_with(
        &self,
        var: &str,
        engine: &dyn Differentiator,
    ) -> Result<Expression, ExpressionError> {
        self.root.diff(var, &self.context, engine)
    }

    /// True when the expression folds to the literal `0`.
    pub fn is_zero(&self) -> bool {
        self.root.folded() == Node::Token(Literal::Zero)
    }

    pub fn evaluate<F>(&self, lookup: F) -> Result<f64, ExpressionError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        self.root.evaluate(&lookup)
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{\n")?;
        writeln!(f, "    {}: {}\n", "Expression".cyan(), self.text)?;
        writeln!(f, "    {}: {}\n", "Canonical".cyan(), self.root)?;
        writeln!(f, "    {}: {:?}\n", "Variables".cyan(), self.variables())?;
        writeln!(f, "}}")?;
        Ok(())
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}
