//! Expression tree nodes.
//!
//! A [`Node`] is a closed sum type. Every node renders in two forms:
//!
//! - the canonical form ([`fmt::Display`], [`Node::str`]), fully parenthesized and readable by
//!   the lexer and by the symbolic engine, e.g. `"(-x)"`, `"pow(a,b)"`, `"sgn(x)"`
//! - the GLSL form ([`Node::glsl_str`]), with the same structure except that variables become
//!   buffer accesses resolved through a [`SymbolicContext`] and `sgn` becomes `sign`
//!
//! `derivative` and `subs` nodes are resolved when they are built; both forms render the
//! resolved tree.

use std::collections::BTreeSet;
use std::fmt;

use crate::context::SymbolicContext;
use crate::errors::ExpressionError;
use crate::expression::Expression;
use crate::lexer::{normalize, LexContext};
use crate::symbolic::expr::sign;
use crate::symbolic::Differentiator;
use crate::token::FunctionKind;

/// Literal leaves.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Zero,
    Unity,
    NegUnity,
    NaN,
    Number(String),
}

impl Literal {
    pub fn value(&self) -> Result<f64, ExpressionError> {
        match self {
            Literal::Zero => Ok(0.0),
            Literal::Unity => Ok(1.0),
            Literal::NegUnity => Ok(-1.0),
            Literal::NaN => Ok(f64::NAN),
            Literal::Number(text) => text
                .parse()
                .map_err(|_| ExpressionError::InvalidNumber(text.clone())),
        }
    }
}

/// Nodes with a single child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryFn {
    Neg,
    Abs,
    Sgn,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Asinh,
    Acosh,
    Atanh,
}

impl UnaryFn {
    /// The unary function a function token stands for, if any.
    pub fn from_function(kind: FunctionKind) -> Option<Self> {
        let function = match kind {
            FunctionKind::Abs => UnaryFn::Abs,
            FunctionKind::Sgn => UnaryFn::Sgn,
            FunctionKind::Sqrt => UnaryFn::Sqrt,
            FunctionKind::Exp => UnaryFn::Exp,
            FunctionKind::Log => UnaryFn::Log,
            FunctionKind::Sin => UnaryFn::Sin,
            FunctionKind::Cos => UnaryFn::Cos,
            FunctionKind::Tan => UnaryFn::Tan,
            FunctionKind::Asin => UnaryFn::Asin,
            FunctionKind::Acos => UnaryFn::Acos,
            FunctionKind::Atan => UnaryFn::Atan,
            FunctionKind::Sinh => UnaryFn::Sinh,
            FunctionKind::Cosh => UnaryFn::Cosh,
            FunctionKind::Tanh => UnaryFn::Tanh,
            FunctionKind::Asinh => UnaryFn::Asinh,
            FunctionKind::Acosh => UnaryFn::Acosh,
            FunctionKind::Atanh => UnaryFn::Atanh,
            FunctionKind::Pow | FunctionKind::Derivative | FunctionKind::Subs => return None,
        };
        Some(function)
    }

    /// Name in the canonical form. `Neg` has no function name.
    pub fn name(self) -> &'static str {
        match self {
            UnaryFn::Neg => "-",
            UnaryFn::Abs => "abs",
            UnaryFn::Sgn => "sgn",
            UnaryFn::Sqrt => "sqrt",
            UnaryFn::Exp => "exp",
            UnaryFn::Log => "log",
            UnaryFn::Sin => "sin",
            UnaryFn::Cos => "cos",
            UnaryFn::Tan => "tan",
            UnaryFn::Asin => "asin",
            UnaryFn::Acos => "acos",
            UnaryFn::Atan => "atan",
            UnaryFn::Sinh => "sinh",
            UnaryFn::Cosh => "cosh",
            UnaryFn::Tanh => "tanh",
            UnaryFn::Asinh => "asinh",
            UnaryFn::Acosh => "acosh",
            UnaryFn::Atanh => "atanh",
        }
    }

    /// Name of the GLSL builtin.
    pub fn glsl_name(self) -> &'static str {
        match self {
            UnaryFn::Sgn => "sign",
            other => other.name(),
        }
    }

    /// Whether GLSL 4.50 defines a `double` overload of the builtin.
    pub fn has_double_overload(self) -> bool {
        matches!(
            self,
            UnaryFn::Neg | UnaryFn::Abs | UnaryFn::Sgn | UnaryFn::Sqrt
        )
    }

    pub fn apply(self, x: f64) -> f64 {
        match self {
            UnaryFn::Neg => -x,
            UnaryFn::Abs => x.abs(),
            UnaryFn::Sgn => sign(x),
            UnaryFn::Sqrt => x.sqrt(),
            UnaryFn::Exp => x.exp(),
            UnaryFn::Log => x.ln(),
            UnaryFn::Sin => x.sin(),
            UnaryFn::Cos => x.cos(),
            UnaryFn::Tan => x.tan(),
            UnaryFn::Asin => x.asin(),
            UnaryFn::Acos => x.acos(),
            UnaryFn::Atan => x.atan(),
            UnaryFn::Sinh => x.sinh(),
            UnaryFn::Cosh => x.cosh(),
            UnaryFn::Tanh => x.tanh(),
            UnaryFn::Asinh => x.asinh(),
            UnaryFn::Acosh => x.acosh(),
            UnaryFn::Atanh => x.atanh(),
        }
    }
}

/// Nodes with two children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryFn {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryFn {
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryFn::Add => a + b,
            BinaryFn::Sub => a - b,
            BinaryFn::Mul => a * b,
            BinaryFn::Div => a / b,
            BinaryFn::Pow => a.powf(b),
        }
    }

    fn symbol(self) -> char {
        match self {
            BinaryFn::Add => '+',
            BinaryFn::Sub => '-',
            BinaryFn::Mul => '*',
            BinaryFn::Div => '/',
            BinaryFn::Pow => '^',
        }
    }
}

/// An expression tree node. Children are owned exclusively.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Token(Literal),
    Variable(String),
    Unary(UnaryFn, Box<Node>),
    Binary(BinaryFn, Box<Node>, Box<Node>),
    /// `derivative(target, wrt)`, resolved to the derivative tree at build time.
    Derivative {
        target: Box<Node>,
        wrt: String,
        resolved: Box<Node>,
    },
    /// `subs(expr, var1, val1, ...)`, resolved to the substituted tree at build time.
    Subs { args: Vec<Node>, resolved: Box<Node> },
}

impl Node {
    pub fn unary(function: UnaryFn, child: Node) -> Node {
        Node::Unary(function, Box::new(child))
    }

    pub fn binary(function: BinaryFn, left: Node, right: Node) -> Node {
        Node::Binary(function, Box::new(left), Box::new(right))
    }

    /// Canonical string form.
    pub fn str(&self) -> String {
        self.to_string()
    }

    /// GLSL form; variables are rendered through `symtext`.
    pub fn glsl_str(&self, symtext: &SymbolicContext) -> Result<String, ExpressionError> {
        let text = match self {
            Node::Token(Literal::NaN) => "(0.0/0.0)".to_string(),
            Node::Token(_) => self.to_string(),
            Node::Variable(name) => symtext.get_glsl_var_name(name)?,
            Node::Unary(UnaryFn::Neg, child) => format!("(-{})", child.glsl_str(symtext)?),
            Node::Unary(function, child) => {
                format!("{}({})", function.glsl_name(), child.glsl_str(symtext)?)
            }
            Node::Binary(BinaryFn::Pow, left, right) => format!(
                "pow({},{})",
                left.glsl_str(symtext)?,
                right.glsl_str(symtext)?
            ),
            Node::Binary(function, left, right) => format!(
                "({}{}{})",
                left.glsl_str(symtext)?,
                function.symbol(),
                right.glsl_str(symtext)?
            ),
            Node::Derivative { resolved, .. } | Node::Subs { resolved, .. } => {
                resolved.glsl_str(symtext)?
            }
        };
        Ok(text)
    }

    /// Derivative with respect to `var`, as a new expression with its own context.
    ///
    /// `abs` and `sgn` are handled here: d/dx abs(f) = sgn(f) * df/dx and d/dx sgn(f) = 0.
    /// Everything else goes through `engine` as canonical text.
    pub fn diff(
        &self,
        var: &str,
        context: &LexContext,
        engine: &dyn Differentiator,
    ) -> Result<Expression, ExpressionError> {
        match self {
            Node::Unary(UnaryFn::Abs, inner) => {
                let inner_derivative = inner.diff(var, context, engine)?;
                if inner_derivative.is_zero() {
                    return Ok(inner_derivative);
                }
                let (derivative, extended) = inner_derivative.into_parts();
                let root = Node::binary(
                    BinaryFn::Mul,
                    Node::Unary(UnaryFn::Sgn, inner.clone()),
                    derivative,
                );
                Ok(Expression::from_parts(root, extended))
            }
            Node::Unary(UnaryFn::Sgn, _) => Ok(Expression::from_parts(
                Node::Token(Literal::Zero),
                context.clone(),
            )),
            Node::Derivative { resolved, .. } | Node::Subs { resolved, .. } => {
                resolved.diff(var, context, engine)
            }
            _ => {
                let text = normalize(&self.to_string());
                let (derived, extended) =
                    engine.differentiate(&text, &normalize(var), context)?;
                Expression::parse_with(&derived, extended, engine)
            }
        }
    }

    /// Replaces variables simultaneously. `derivative` and `subs` nodes are replaced by their
    /// substituted resolved trees.
    pub fn substitute(&self, replacements: &[(String, Node)]) -> Node {
        match self {
            Node::Token(_) => self.clone(),
            Node::Variable(name) => replacements
                .iter()
                .find(|(var, _)| var == name)
                .map(|(_, value)| value.clone())
                .unwrap_or_else(|| self.clone()),
            Node::Unary(function, child) => Node::unary(*function, child.substitute(replacements)),
            Node::Binary(function, left, right) => Node::binary(
                *function,
                left.substitute(replacements),
                right.substitute(replacements),
            ),
            Node::Derivative { resolved, .. } | Node::Subs { resolved, .. } => {
                resolved.substitute(replacements)
            }
        }
    }

    /// Evaluates the tree in `f64` with GLSL semantics (`sgn(0) = 0`, natural `log`).
    pub fn evaluate<F>(&self, lookup: &F) -> Result<f64, ExpressionError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        match self {
            Node::Token(literal) => literal.value(),
            Node::Variable(name) => {
                lookup(name).ok_or_else(|| ExpressionError::UnboundVariable(name.clone()))
            }
            Node::Unary(function, child) => Ok(function.apply(child.evaluate(lookup)?)),
            Node::Binary(function, left, right) => {
                Ok(function.apply(left.evaluate(lookup)?, right.evaluate(lookup)?))
            }
            Node::Derivative { resolved, .. } | Node::Subs { resolved, .. } => {
                resolved.evaluate(lookup)
            }
        }
    }

    /// Copy with `x*1`, `x*0`, `x+0`, `x-0`, `0-x`, `0/x`, `x/1`, `x^1` and `x^0` folded away and
    /// resolved `derivative`/`subs` nodes replaced by their trees.
    ///
    /// `x*0` and `0/x` fold to `0` even where `x` would be infinite or NaN.
    pub fn folded(&self) -> Node {
        match self {
            Node::Token(_) | Node::Variable(_) => self.clone(),
            Node::Unary(function, child) => match (function, child.folded()) {
                (UnaryFn::Neg, child) if child.literal_value() == Some(0.0) => {
                    Node::Token(Literal::Zero)
                }
                (function, child) => Node::unary(*function, child),
            },
            Node::Binary(function, left, right) => {
                let left = left.folded();
                let right = right.folded();
                let (l, r) = (left.literal_value(), right.literal_value());
                match function {
                    BinaryFn::Mul if l == Some(0.0) || r == Some(0.0) => Node::Token(Literal::Zero),
                    BinaryFn::Mul if l == Some(1.0) => right,
                    BinaryFn::Mul if r == Some(1.0) => left,
                    BinaryFn::Add if l == Some(0.0) => right,
                    BinaryFn::Add | BinaryFn::Sub if r == Some(0.0) => left,
                    BinaryFn::Sub if l == Some(0.0) => Node::unary(UnaryFn::Neg, right),
                    BinaryFn::Div if l == Some(0.0) => Node::Token(Literal::Zero),
                    BinaryFn::Div if r == Some(1.0) => left,
                    BinaryFn::Pow if r == Some(1.0) => left,
                    BinaryFn::Pow if r == Some(0.0) => Node::Token(Literal::Unity),
                    _ => Node::binary(*function, left, right),
                }
            }
            Node::Derivative { resolved, .. } | Node::Subs { resolved, .. } => resolved.folded(),
        }
    }

    fn literal_value(&self) -> Option<f64> {
        match self {
            Node::Token(Literal::NaN) => None,
            Node::Token(literal) => literal.value().ok(),
            _ => None,
        }
    }

    /// Names of the GLSL builtins in the tree that have no `double` overload.
    pub fn float_only_functions(&self) -> BTreeSet<&'static str> {
        let mut functions = BTreeSet::new();
        self.collect_float_only(&mut functions);
        functions
    }

    fn collect_float_only(&self, functions: &mut BTreeSet<&'static str>) {
        match self {
            Node::Token(_) | Node::Variable(_) => {}
            Node::Unary(function, child) => {
                if !function.has_double_overload() {
                    functions.insert(function.glsl_name());
                }
                child.collect_float_only(functions);
            }
            Node::Binary(function, left, right) => {
                if *function == BinaryFn::Pow {
                    functions.insert("pow");
                }
                left.collect_float_only(functions);
                right.collect_float_only(functions);
            }
            Node::Derivative { resolved, .. } | Node::Subs { resolved, .. } => {
                resolved.collect_float_only(functions)
            }
        }
    }

    /// Names of the variables the rendered tree refers to.
    pub fn free_variables(&self) -> BTreeSet<String> {
        let mut variables = BTreeSet::new();
        self.collect_variables(&mut variables);
        variables
    }

    fn collect_variables(&self, variables: &mut BTreeSet<String>) {
        match self {
            Node::Token(_) => {}
            Node::Variable(name) => {
                variables.insert(name.clone());
            }
            Node::Unary(_, child) => child.collect_variables(variables),
            Node::Binary(_, left, right) => {
                left.collect_variables(variables);
                right.collect_variables(variables);
            }
            Node::Derivative { resolved, .. } | Node::Subs { resolved, .. } => {
                resolved.collect_variables(variables)
            }
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Zero => write!(f, "0"),
            Literal::Unity => write!(f, "1"),
            Literal::NegUnity => write!(f, "-1"),
            Literal::NaN => write!(f, "nan"),
            Literal::Number(text) => write!(f, "{}", text),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Token(literal) => write!(f, "{}", literal),
            Node::Variable(name) => write!(f, "{}", name),
            Node::Unary(UnaryFn::Neg, child) => write!(f, "(-{})", child),
            Node::Unary(function, child) => write!(f, "{}({})", function.name(), child),
            Node::Binary(BinaryFn::Pow, left, right) => write!(f, "pow({},{})", left, right),
            Node::Binary(function, left, right) => {
                write!(f, "({}{}{})", left, function.symbol(), right)
            }
            Node::Derivative { resolved, .. } | Node::Subs { resolved, .. } => {
                write!(f, "{}", resolved)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Node {
        Node::Variable(name.to_string())
    }

    fn symtext() -> SymbolicContext {
        let mut symtext = SymbolicContext::new();
        symtext.insert_param("x", 0).unwrap();
        symtext.insert_param("y", 1).unwrap();
        symtext.insert_const("t", 0).unwrap();
        symtext
    }

    #[test]
    fn test_canonical_form() {
        let node = Node::binary(
            BinaryFn::Mul,
            Node::unary(UnaryFn::Neg, var("x")),
            Node::binary(BinaryFn::Pow, var("y"), Node::Token(Literal::Number("2.5".into()))),
        );
        assert_eq!(node.str(), "((-x)*pow(y,2.5))");
        assert_eq!(Node::unary(UnaryFn::Sgn, var("x")).str(), "sgn(x)");
        assert_eq!(Node::Token(Literal::NegUnity).str(), "-1");
    }

    #[test]
    fn test_glsl_form() {
        let node = Node::binary(
            BinaryFn::Add,
            Node::unary(UnaryFn::Sgn, var("x")),
            Node::binary(BinaryFn::Mul, var("t"), var("y")),
        );
        assert_eq!(
            node.glsl_str(&symtext()).unwrap(),
            "(sign(params[0])+(consts[i*nconst+0]*params[1]))"
        );
        assert_eq!(
            Node::Token(Literal::NaN).glsl_str(&symtext()).unwrap(),
            "(0.0/0.0)"
        );
    }

    #[test]
    fn test_glsl_form_unbound_variable() {
        let result = var("z").glsl_str(&symtext());
        assert!(matches!(result, Err(ExpressionError::Symbol(_))));
    }

    #[test]
    fn test_substitute_is_simultaneous() {
        let node = Node::binary(BinaryFn::Sub, var("x"), var("y"));
        let swapped = node.substitute(&[("x".into(), var("y")), ("y".into(), var("x"))]);
        assert_eq!(swapped.str(), "(y-x)");
    }

    #[test]
    fn test_evaluate() {
        let node = Node::binary(
            BinaryFn::Mul,
            Node::unary(UnaryFn::Sgn, var("x")),
            Node::unary(UnaryFn::Exp, var("y")),
        );
        let at = |x: f64, y: f64| {
            node.evaluate(&|name: &str| match name {
                "x" => Some(x),
                "y" => Some(y),
                _ => None,
            })
            .unwrap()
        };
        assert_eq!(at(0.0, 1.0), 0.0);
        assert_eq!(at(-2.0, 0.0), -1.0);
        assert!((at(3.0, 1.0) - std::f64::consts::E).abs() < 1e-12);

        let unbound = var("z").evaluate(&|_: &str| None);
        assert!(matches!(unbound, Err(ExpressionError::UnboundVariable(name)) if name == "z"));
    }

    #[test]
    fn test_folded_identities() {
        let one = || Node::Token(Literal::Unity);
        let zero = || Node::Token(Literal::Zero);

        // sgn(x) + x*0
        let node = Node::binary(
            BinaryFn::Add,
            Node::unary(UnaryFn::Sgn, var("x")),
            Node::binary(BinaryFn::Mul, var("x"), zero()),
        );
        assert_eq!(node.folded().str(), "sgn(x)");

        // sgn(x-y)*1
        let node = Node::binary(
            BinaryFn::Mul,
            Node::unary(UnaryFn::Sgn, Node::binary(BinaryFn::Sub, var("x"), var("y"))),
            one(),
        );
        assert_eq!(node.folded().str(), "sgn((x-y))");

        let node = Node::binary(BinaryFn::Sub, zero(), Node::binary(BinaryFn::Div, var("x"), one()));
        assert_eq!(node.folded().str(), "(-x)");

        let node = Node::binary(
            BinaryFn::Pow,
            var("x"),
            Node::Token(Literal::Number("1.0".into())),
        );
        assert_eq!(node.folded().str(), "x");

        // (1-x) and x*nan keep their operands
        let node = Node::binary(BinaryFn::Sub, one(), var("x"));
        assert_eq!(node.folded(), node);
        let node = Node::binary(BinaryFn::Mul, var("x"), Node::Token(Literal::NaN));
        assert_eq!(node.folded(), node);
    }

    #[test]
    fn test_float_only_functions() {
        let node = Node::binary(
            BinaryFn::Add,
            Node::unary(UnaryFn::Sqrt, Node::unary(UnaryFn::Abs, var("x"))),
            Node::binary(
                BinaryFn::Mul,
                Node::unary(UnaryFn::Sgn, var("y")),
                Node::binary(BinaryFn::Div, var("x"), var("t")),
            ),
        );
        assert!(node.float_only_functions().is_empty());

        let node = Node::binary(
            BinaryFn::Mul,
            Node::unary(UnaryFn::Exp, var("x")),
            Node::binary(BinaryFn::Pow, var("y"), Node::Token(Literal::Number("2".into()))),
        );
        let functions: Vec<&str> = node.float_only_functions().into_iter().collect();
        assert_eq!(functions, vec!["exp", "pow"]);
    }

    #[test]
    fn test_free_variables() {
        let node = Node::binary(
            BinaryFn::Add,
            var("b"),
            Node::binary(BinaryFn::Mul, var("a"), var("b")),
        );
        let names: Vec<String> = node.free_variables().into_iter().collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
