//! Symbolic expression tree of the default engine.
//!
//! `Expr` is what [`super::EvalexprEngine`] parses canonical text into. It supports:
//!
//! - Symbolic differentiation with the usual calculus rules
//! - Algebraic simplification, some of it conditional on real-valued assumptions
//! - Rendering back into the canonical grammar
//!
//! # Tree
//! - Leaves: `Const` and `Var`
//! - Unary operations: Neg, Abs, Sgn, Exp, Ln, Sqrt, Sin, Cos and the other elementary functions
//! - Binary operations: Add, Sub, Mul, Div, PowExpr
//! - Special nodes: Pow (integer exponent), unevaluated Derivative and Subs
//!
//! # Derivatives
//! `abs` and `sgn` have no derivative that holds on their whole domain, so their derivatives are
//! left unevaluated. For a bare variable the result is `derivative(abs(x),x)`. For any other
//! argument the chain rule is applied through a fresh dummy symbol:
//! `subs(derivative(abs(xi_1),xi_1),xi_1,f) * f'`. Resolving these forms is up to the consumer.
//!
//! # Simplification
//! - Folding of constant subtrees
//! - Neutral and absorbing elements of `+`, `-`, `*` and `/`
//! - Power rules, including nested and combined exponents
//! - Rules valid over the reals only, applied when every symbol involved is assumed real:
//!   sqrt(x^2) → |x|, ln(exp(x)) → x, |x^2| → x^2, sgn(exp(x)) → 1

use std::collections::BTreeSet;
use std::fmt;

use super::Assumptions;

/// Elementary functions without special simplification rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elementary {
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

impl Elementary {
    pub const ALL: [Elementary; 10] = [
        Elementary::Tan,
        Elementary::Asin,
        Elementary::Acos,
        Elementary::Atan,
        Elementary::Sinh,
        Elementary::Cosh,
        Elementary::Tanh,
        Elementary::Asinh,
        Elementary::Acosh,
        Elementary::Atanh,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Elementary::Tan => "tan",
            Elementary::Asin => "asin",
            Elementary::Acos => "acos",
            Elementary::Atan => "atan",
            Elementary::Sinh => "sinh",
            Elementary::Cosh => "cosh",
            Elementary::Tanh => "tanh",
            Elementary::Asinh => "asinh",
            Elementary::Acosh => "acosh",
            Elementary::Atanh => "atanh",
        }
    }

    pub fn apply(self, x: f64) -> f64 {
        match self {
            Elementary::Tan => x.tan(),
            Elementary::Asin => x.asin(),
            Elementary::Acos => x.acos(),
            Elementary::Atan => x.atan(),
            Elementary::Sinh => x.sinh(),
            Elementary::Cosh => x.cosh(),
            Elementary::Tanh => x.tanh(),
            Elementary::Asinh => x.asinh(),
            Elementary::Acosh => x.acosh(),
            Elementary::Atanh => x.atanh(),
        }
    }

    /// Outer derivative f'(u), to be multiplied by du/dx.
    fn outer_derivative(self, u: &Expr) -> Expr {
        let arg = || Box::new(u.clone());
        let one = || Box::new(Expr::Const(1.0));
        let square = || Box::new(Expr::Pow(arg(), 2));
        match self {
            // d/du tan(u) = 1 / cos(u)^2
            Elementary::Tan => {
                Expr::Div(one(), Box::new(Expr::Pow(Box::new(Expr::Cos(arg())), 2)))
            }
            // d/du asin(u) = 1 / sqrt(1 - u^2)
            Elementary::Asin => Expr::Div(
                one(),
                Box::new(Expr::Sqrt(Box::new(Expr::Sub(one(), square())))),
            ),
            // d/du acos(u) = -1 / sqrt(1 - u^2)
            Elementary::Acos => Expr::Neg(Box::new(Expr::Div(
                one(),
                Box::new(Expr::Sqrt(Box::new(Expr::Sub(one(), square())))),
            ))),
            // d/du atan(u) = 1 / (1 + u^2)
            Elementary::Atan => Expr::Div(one(), Box::new(Expr::Add(one(), square()))),
            Elementary::Sinh => Expr::Elementary(Elementary::Cosh, arg()),
            Elementary::Cosh => Expr::Elementary(Elementary::Sinh, arg()),
            // d/du tanh(u) = 1 / cosh(u)^2
            Elementary::Tanh => Expr::Div(
                one(),
                Box::new(Expr::Pow(
                    Box::new(Expr::Elementary(Elementary::Cosh, arg())),
                    2,
                )),
            ),
            // d/du asinh(u) = 1 / sqrt(u^2 + 1)
            Elementary::Asinh => Expr::Div(
                one(),
                Box::new(Expr::Sqrt(Box::new(Expr::Add(square(), one())))),
            ),
            // d/du acosh(u) = 1 / sqrt(u^2 - 1)
            Elementary::Acosh => Expr::Div(
                one(),
                Box::new(Expr::Sqrt(Box::new(Expr::Sub(square(), one())))),
            ),
            // d/du atanh(u) = 1 / (1 - u^2)
            Elementary::Atanh => Expr::Div(one(), Box::new(Expr::Sub(one(), square()))),
        }
    }
}

/// An expression tree node of the default engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal
    Const(f64),
    /// A symbol
    Var(String),
    /// `a + b`
    Add(Box<Expr>, Box<Expr>),
    /// `a * b`
    Mul(Box<Expr>, Box<Expr>),
    /// `a - b`
    Sub(Box<Expr>, Box<Expr>),
    /// `a / b`
    Div(Box<Expr>, Box<Expr>),
    /// `abs(a)`
    Abs(Box<Expr>),
    /// Sign of an expression, 0 at the origin
    Sgn(Box<Expr>),
    /// `a^n` with an integer exponent
    Pow(Box<Expr>, i64),
    /// `a^b` with a symbolic exponent
    PowExpr(Box<Expr>, Box<Expr>),
    /// `exp(a)`
    Exp(Box<Expr>),
    /// `log(a)`, natural
    Ln(Box<Expr>),
    /// `sqrt(a)`
    Sqrt(Box<Expr>),
    /// `sin(a)`
    Sin(Box<Expr>),
    /// `cos(a)`
    Cos(Box<Expr>),
    /// Any other elementary function
    Elementary(Elementary, Box<Expr>),
    /// `-a`
    Neg(Box<Expr>),
    /// Unevaluated derivative of an expression with respect to a symbol
    Derivative(Box<Expr>, String),
    /// Unevaluated substitution of a symbol by an expression
    Subs(Box<Expr>, String, Box<Expr>),
}

/// Supply of fresh dummy symbols `xi_1`, `xi_2`, ... avoiding a set of taken names.
#[derive(Debug, Clone, Default)]
pub struct Dummies {
    taken: BTreeSet<String>,
    next: usize,
}

impl Dummies {
    pub fn avoiding(taken: BTreeSet<String>) -> Self {
        Dummies { taken, next: 0 }
    }

    pub fn fresh(&mut self) -> String {
        loop {
            self.next += 1;
            let name = format!("xi_{}", self.next);
            if self.taken.insert(name.clone()) {
                return name;
            }
        }
    }
}

impl Expr {
    /// Computes the symbolic derivative of this expression with respect to a variable.
    ///
    /// The rules implemented are:
    /// - d/dx(c) = 0 for constants, d/dx(x) = 1, d/dx(y) = 0 for other variables
    /// - Sum rule, product rule and quotient rule
    /// - Power rule: d/dx(f^n) = n * f^(n-1) * df/dx
    /// - Chain rule for exp, ln, sqrt and the trigonometric and hyperbolic functions
    /// - Negation: d/dx(-f) = -(df/dx)
    /// - `abs` and `sgn`: unevaluated, see the module documentation
    ///
    /// # Arguments
    /// * `with_respect_to` - The name of the variable to differentiate with respect to
    /// * `dummies` - Source of fresh symbols for unevaluated chain rules
    pub fn derivative(&self, with_respect_to: &str, dummies: &mut Dummies) -> Box<Expr> {
        match self {
            Expr::Const(_) => Box::new(Expr::Const(0.0)),

            Expr::Var(name) => {
                if name == with_respect_to {
                    Box::new(Expr::Const(1.0))
                } else {
                    Box::new(Expr::Const(0.0))
                }
            }

            Expr::Add(left, right) => {
                // d/dx(f + g) = df/dx + dg/dx
                Box::new(Expr::Add(
                    left.derivative(with_respect_to, dummies),
                    right.derivative(with_respect_to, dummies),
                ))
            }

            Expr::Sub(left, right) => {
                // d/dx(f - g) = df/dx - dg/dx
                Box::new(Expr::Sub(
                    left.derivative(with_respect_to, dummies),
                    right.derivative(with_respect_to, dummies),
                ))
            }

            Expr::Mul(left, right) => {
                // d/dx(f * g) = f * dg/dx + g * df/dx
                Box::new(Expr::Add(
                    Box::new(Expr::Mul(
                        left.clone(),
                        right.derivative(with_respect_to, dummies),
                    )),
                    Box::new(Expr::Mul(
                        right.clone(),
                        left.derivative(with_respect_to, dummies),
                    )),
                ))
            }

            Expr::Div(left, right) => {
                // d/dx(f/g) = (g * df/dx - f * dg/dx) / g^2
                Box::new(Expr::Div(
                    Box::new(Expr::Sub(
                        Box::new(Expr::Mul(
                            right.clone(),
                            left.derivative(with_respect_to, dummies),
                        )),
                        Box::new(Expr::Mul(
                            left.clone(),
                            right.derivative(with_respect_to, dummies),
                        )),
                    )),
                    Box::new(Expr::Pow(right.clone(), 2)),
                ))
            }

            Expr::Abs(inner) => unevaluated_chain(Expr::Abs, inner, with_respect_to, dummies),

            Expr::Sgn(inner) => unevaluated_chain(Expr::Sgn, inner, with_respect_to, dummies),

            Expr::Pow(base, exp) => {
                // d/dx(f^n) = n * f^(n-1) * df/dx
                Box::new(Expr::Mul(
                    Box::new(Expr::Mul(
                        Box::new(Expr::Const(*exp as f64)),
                        Box::new(Expr::Pow(base.clone(), exp - 1)),
                    )),
                    base.derivative(with_respect_to, dummies),
                ))
            }

            Expr::PowExpr(base, exponent) => {
                // d/dx(f^g) = f^g * (g' * ln(f) + g * f'/f)
                Box::new(Expr::Mul(
                    Box::new(Expr::PowExpr(base.clone(), exponent.clone())),
                    Box::new(Expr::Add(
                        Box::new(Expr::Mul(
                            exponent.derivative(with_respect_to, dummies),
                            Box::new(Expr::Ln(base.clone())),
                        )),
                        Box::new(Expr::Mul(
                            exponent.clone(),
                            Box::new(Expr::Div(
                                base.derivative(with_respect_to, dummies),
                                base.clone(),
                            )),
                        )),
                    )),
                ))
            }

            Expr::Exp(inner) => {
                // d/dx(e^f) = e^f * df/dx
                Box::new(Expr::Mul(
                    Box::new(Expr::Exp(inner.clone())),
                    inner.derivative(with_respect_to, dummies),
                ))
            }

            Expr::Ln(inner) => {
                // d/dx(ln(f)) = 1/f * df/dx
                Box::new(Expr::Mul(
                    Box::new(Expr::Div(Box::new(Expr::Const(1.0)), inner.clone())),
                    inner.derivative(with_respect_to, dummies),
                ))
            }

            Expr::Sqrt(inner) => {
                // d/dx(sqrt(f)) = 1/(2*sqrt(f)) * df/dx
                Box::new(Expr::Mul(
                    Box::new(Expr::Div(
                        Box::new(Expr::Const(1.0)),
                        Box::new(Expr::Mul(
                            Box::new(Expr::Const(2.0)),
                            Box::new(Expr::Sqrt(inner.clone())),
                        )),
                    )),
                    inner.derivative(with_respect_to, dummies),
                ))
            }

            Expr::Sin(inner) => {
                // d/dx(sin(f)) = cos(f) * df/dx
                Box::new(Expr::Mul(
                    Box::new(Expr::Cos(inner.clone())),
                    inner.derivative(with_respect_to, dummies),
                ))
            }

            Expr::Cos(inner) => {
                // d/dx(cos(f)) = -sin(f) * df/dx
                Box::new(Expr::Mul(
                    Box::new(Expr::Neg(Box::new(Expr::Sin(inner.clone())))),
                    inner.derivative(with_respect_to, dummies),
                ))
            }

            Expr::Elementary(function, inner) => Box::new(Expr::Mul(
                Box::new(function.outer_derivative(inner)),
                inner.derivative(with_respect_to, dummies),
            )),

            Expr::Neg(inner) => {
                // d/dx(-f) = -(df/dx)
                Box::new(Expr::Neg(inner.derivative(with_respect_to, dummies)))
            }

            Expr::Derivative(..) | Expr::Subs(..) => {
                if self.contains_var(with_respect_to) {
                    Box::new(Expr::Derivative(
                        Box::new(self.clone()),
                        with_respect_to.to_string(),
                    ))
                } else {
                    Box::new(Expr::Const(0.0))
                }
            }
        }
    }

    /// Whether the value of the expression depends on `name`.
    pub fn contains_var(&self, name: &str) -> bool {
        match self {
            Expr::Const(_) => false,
            Expr::Var(var) => var == name,
            Expr::Add(l, r)
            | Expr::Sub(l, r)
            | Expr::Mul(l, r)
            | Expr::Div(l, r)
            | Expr::PowExpr(l, r) => l.contains_var(name) || r.contains_var(name),
            Expr::Abs(e)
            | Expr::Sgn(e)
            | Expr::Pow(e, _)
            | Expr::Exp(e)
            | Expr::Ln(e)
            | Expr::Sqrt(e)
            | Expr::Sin(e)
            | Expr::Cos(e)
            | Expr::Elementary(_, e)
            | Expr::Neg(e)
            | Expr::Derivative(e, _) => e.contains_var(name),
            Expr::Subs(e, var, value) => {
                (var != name && e.contains_var(name)) || value.contains_var(name)
            }
        }
    }

    /// Every symbol name in the tree, including bound symbols of `derivative` and `subs`.
    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut symbols = BTreeSet::new();
        self.collect_symbols(&mut symbols);
        symbols
    }

    fn collect_symbols(&self, symbols: &mut BTreeSet<String>) {
        match self {
            Expr::Const(_) => {}
            Expr::Var(name) => {
                symbols.insert(name.clone());
            }
            Expr::Add(l, r)
            | Expr::Sub(l, r)
            | Expr::Mul(l, r)
            | Expr::Div(l, r)
            | Expr::PowExpr(l, r) => {
                l.collect_symbols(symbols);
                r.collect_symbols(symbols);
            }
            Expr::Abs(e)
            | Expr::Sgn(e)
            | Expr::Pow(e, _)
            | Expr::Exp(e)
            | Expr::Ln(e)
            | Expr::Sqrt(e)
            | Expr::Sin(e)
            | Expr::Cos(e)
            | Expr::Elementary(_, e)
            | Expr::Neg(e) => e.collect_symbols(symbols),
            Expr::Derivative(e, var) => {
                e.collect_symbols(symbols);
                symbols.insert(var.clone());
            }
            Expr::Subs(e, var, value) => {
                e.collect_symbols(symbols);
                symbols.insert(var.clone());
                value.collect_symbols(symbols);
            }
        }
    }

    /// Whether every symbol of the expression is assumed real.
    pub fn is_real(&self, assumptions: &Assumptions) -> bool {
        self.free_symbols()
            .iter()
            .all(|name| assumptions.is_real(name))
    }

    /// Simplifies the expression by folding constants and applying basic algebraic rules.
    ///
    /// # Constant Folding
    /// - Evaluates constant expressions: 2 + 3 → 5
    /// - Simplifies operations with special constants: x * 0 → 0
    ///
    /// # Identity Rules
    /// - Additive identity: x + 0 → x
    /// - Multiplicative identity: x * 1 → x
    /// - Division identity: x / 1 → x
    /// - Division by self: x / x → 1
    ///
    /// # Exponent Rules
    /// - Zero exponent: x^0 → 1
    /// - First power: x^1 → x
    /// - Nested exponents: (x^a)^b → x^(a*b)
    ///
    /// # Real-valued Rules
    /// Only applied when every symbol in the argument is assumed real:
    /// - sqrt(x^2) → |x|
    /// - ln(exp(x)) → x
    /// - |x^(2n)| → x^(2n)
    /// - sgn(exp(x)) → 1
    pub fn simplify(&self, assumptions: &Assumptions) -> Box<Expr> {
        match self {
            // leaves
            Expr::Const(_) | Expr::Var(_) => Box::new(self.clone()),

            Expr::Add(left, right) => {
                let l = left.simplify(assumptions);
                let r = right.simplify(assumptions);
                match (&*l, &*r) {
                    (Expr::Const(a), Expr::Const(b)) => Box::new(Expr::Const(a + b)),
                    // x + 0 -> x
                    (expr, Expr::Const(0.0)) | (Expr::Const(0.0), expr) => Box::new(expr.clone()),
                    // x + (-y) -> x - y
                    (expr, Expr::Neg(inner)) => {
                        Box::new(Expr::Sub(Box::new(expr.clone()), inner.clone()))
                    }
                    // c1*x + c2*x -> (c1+c2)*x
                    (Expr::Mul(a1, x1), Expr::Mul(a2, x2)) if x1 == x2 => {
                        let combined_coeff =
                            Expr::Add(a1.clone(), a2.clone()).simplify(assumptions);
                        Expr::Mul(combined_coeff, x1.clone()).simplify(assumptions)
                    }
                    // (x + c1) + c2 -> x + (c1 + c2)
                    (Expr::Add(x, c1), c2)
                        if matches!(**c1, Expr::Const(_)) && matches!(*c2, Expr::Const(_)) =>
                    {
                        Box::new(Expr::Add(
                            x.clone(),
                            Expr::Add(c1.clone(), Box::new(c2.clone())).simplify(assumptions),
                        ))
                    }
                    _ => Box::new(Expr::Add(l, r)),
                }
            }

            Expr::Sub(left, right) => {
                let l = left.simplify(assumptions);
                let r = right.simplify(assumptions);
                match (&*l, &*r) {
                    (Expr::Const(a), Expr::Const(b)) => Box::new(Expr::Const(a - b)),
                    // x - 0 -> x
                    (expr, Expr::Const(0.0)) => Box::new(expr.clone()),
                    // 0 - x -> -x
                    (Expr::Const(0.0), _) => Expr::Neg(r).simplify(assumptions),
                    // x - x -> 0
                    (a, b) if a == b => Box::new(Expr::Const(0.0)),
                    // x - (-y) -> x + y
                    (expr, Expr::Neg(inner)) => {
                        Box::new(Expr::Add(Box::new(expr.clone()), inner.clone()))
                    }
                    // c1*x - c2*x -> (c1-c2)*x
                    (Expr::Mul(a1, x1), Expr::Mul(a2, x2)) if x1 == x2 => {
                        let combined_coeff =
                            Expr::Sub(a1.clone(), a2.clone()).simplify(assumptions);
                        Expr::Mul(combined_coeff, x1.clone()).simplify(assumptions)
                    }
                    // x - c -> x + (-c)
                    (x, Expr::Const(c)) => {
                        Box::new(Expr::Add(Box::new(x.clone()), Box::new(Expr::Const(-c))))
                    }
                    _ => Box::new(Expr::Sub(l, r)),
                }
            }

            Expr::Mul(left, right) => {
                let l = left.simplify(assumptions);
                let r = right.simplify(assumptions);

                match (&*l, &*r) {
                    (Expr::Const(a), Expr::Const(b)) => Box::new(Expr::Const(a * b)),
                    // x * 0 -> 0
                    (Expr::Const(0.0), _) | (_, Expr::Const(0.0)) => Box::new(Expr::Const(0.0)),
                    // x * 1 -> x
                    (expr, Expr::Const(1.0)) | (Expr::Const(1.0), expr) => Box::new(expr.clone()),
                    // x * (-1) -> -x
                    (expr, Expr::Const(-1.0)) | (Expr::Const(-1.0), expr) => {
                        Box::new(Expr::Neg(Box::new(expr.clone())))
                    }
                    // x * x -> x^2
                    (a, b) if a == b => Box::new(Expr::Pow(l.clone(), 2)),
                    // (-x) * (-y) -> x * y
                    (Expr::Neg(a), Expr::Neg(b)) => {
                        Expr::Mul(a.clone(), b.clone()).simplify(assumptions)
                    }
                    // x^a * x^b -> x^(a+b)
                    (Expr::Pow(b1, e1), Expr::Pow(b2, e2)) if b1 == b2 => {
                        Expr::Pow(b1.clone(), e1 + e2).simplify(assumptions)
                    }
                    // c * (x + y) -> c*x + c*y for small c
                    (Expr::Const(c), Expr::Add(x, y)) | (Expr::Add(x, y), Expr::Const(c))
                        if c.abs() < 10.0 =>
                    {
                        Expr::Add(
                            Box::new(Expr::Mul(Box::new(Expr::Const(*c)), x.clone())),
                            Box::new(Expr::Mul(Box::new(Expr::Const(*c)), y.clone())),
                        )
                        .simplify(assumptions)
                    }
                    // (c1 * x) * c2 -> (c1 * c2) * x
                    (Expr::Mul(c1, x), Expr::Const(c2)) | (Expr::Const(c2), Expr::Mul(c1, x))
                        if matches!(**c1, Expr::Const(_)) =>
                    {
                        Box::new(Expr::Mul(
                            Expr::Mul(c1.clone(), Box::new(Expr::Const(*c2))).simplify(assumptions),
                            x.clone(),
                        ))
                    }
                    // x * c -> c * x
                    (expr, Expr::Const(c)) => Box::new(Expr::Mul(
                        Box::new(Expr::Const(*c)),
                        Box::new(expr.clone()),
                    )),
                    _ => Box::new(Expr::Mul(l, r)),
                }
            }

            Expr::Div(left, right) => {
                let l = left.simplify(assumptions);
                let r = right.simplify(assumptions);
                match (&*l, &*r) {
                    (Expr::Const(a), Expr::Const(b)) if *b != 0.0 => Box::new(Expr::Const(a / b)),
                    // 0 / x -> 0
                    (Expr::Const(0.0), _) => Box::new(Expr::Const(0.0)),
                    // x / 1 -> x
                    (expr, Expr::Const(1.0)) => Box::new(expr.clone()),
                    // x / (-1) -> -x
                    (expr, Expr::Const(-1.0)) => Box::new(Expr::Neg(Box::new(expr.clone()))),
                    // x / x -> 1
                    (a, b) if a == b => Box::new(Expr::Const(1.0)),
                    // x^a / x^b -> x^(a-b)
                    (Expr::Pow(b1, e1), Expr::Pow(b2, e2)) if b1 == b2 => {
                        Expr::Pow(b1.clone(), e1 - e2).simplify(assumptions)
                    }
                    // (x/y)/z -> x/(y*z)
                    (Expr::Div(x, y), z) => Box::new(Expr::Div(
                        x.clone(),
                        Box::new(Expr::Mul(y.clone(), Box::new(z.clone()))),
                    )),
                    _ => Box::new(Expr::Div(l, r)),
                }
            }

            Expr::Abs(expr) => {
                let e = expr.simplify(assumptions);
                match &*e {
                    Expr::Const(a) => Box::new(Expr::Const(a.abs())),
                    // abs(abs(x)) -> abs(x)
                    Expr::Abs(_) => e,
                    // abs(-x) -> abs(x)
                    Expr::Neg(inner) => Box::new(Expr::Abs(inner.clone())),
                    // abs(x^2) -> x^2 (even powers of reals are never negative)
                    Expr::Pow(_, exp) if exp % 2 == 0 && e.is_real(assumptions) => e,
                    _ => Box::new(Expr::Abs(e)),
                }
            }

            Expr::Sgn(expr) => {
                let e = expr.simplify(assumptions);
                match &*e {
                    Expr::Const(a) => Box::new(Expr::Const(sign(*a))),
                    Expr::Sgn(_) => e,
                    // sgn(-x) -> -sgn(x)
                    Expr::Neg(inner) => Box::new(Expr::Neg(Box::new(Expr::Sgn(inner.clone())))),
                    Expr::Exp(_) if e.is_real(assumptions) => Box::new(Expr::Const(1.0)),
                    _ => Box::new(Expr::Sgn(e)),
                }
            }

            Expr::Pow(base, exp) => {
                let b = base.simplify(assumptions);
                match (&*b, exp) {
                    // x^0 -> 1 (including 0^0 = 1 by convention)
                    (_, 0) => Box::new(Expr::Const(1.0)),
                    (Expr::Const(a), exp) => Box::new(Expr::Const(a.powi(*exp as i32))),
                    // x^1 -> x
                    (expr, 1) => Box::new(expr.clone()),
                    // x^(-n) -> 1/(x^n)
                    (expr, exp) if *exp < 0 => Box::new(Expr::Div(
                        Box::new(Expr::Const(1.0)),
                        Box::new(Expr::Pow(Box::new(expr.clone()), -exp)),
                    )),
                    // (x^a)^b -> x^(a*b)
                    (Expr::Pow(inner_base, inner_exp), outer_exp) => {
                        Box::new(Expr::Pow(inner_base.clone(), inner_exp * outer_exp))
                    }
                    _ => Box::new(Expr::Pow(b, *exp)),
                }
            }

            Expr::PowExpr(base, exponent) => {
                let b = base.simplify(assumptions);
                let e = exponent.simplify(assumptions);
                match (&*b, &*e) {
                    (Expr::Const(a), Expr::Const(b)) => Box::new(Expr::Const(a.powf(*b))),
                    // Convert to an integer power if possible
                    (expr, Expr::Const(exp)) if exp.fract() == 0.0 && exp.abs() < 1e9 => {
                        Expr::Pow(Box::new(expr.clone()), *exp as i64).simplify(assumptions)
                    }
                    _ => Box::new(Expr::PowExpr(b, e)),
                }
            }

            Expr::Exp(expr) => {
                let e = expr.simplify(assumptions);
                match &*e {
                    // exp(0) -> 1
                    Expr::Const(0.0) => Box::new(Expr::Const(1.0)),
                    Expr::Const(a) => Box::new(Expr::Const(a.exp())),
                    // exp(ln(x)) -> x
                    Expr::Ln(inner) => inner.clone(),
                    _ => Box::new(Expr::Exp(e)),
                }
            }

            Expr::Ln(expr) => {
                let e = expr.simplify(assumptions);
                match &*e {
                    // ln(1) -> 0
                    Expr::Const(1.0) => Box::new(Expr::Const(0.0)),
                    Expr::Const(a) if *a > 0.0 => Box::new(Expr::Const(a.ln())),
                    // ln(exp(x)) -> x
                    Expr::Exp(inner) if inner.is_real(assumptions) => inner.clone(),
                    // ln(x^n) -> n * ln(x)
                    Expr::Pow(x, n) if n % 2 != 0 => Box::new(Expr::Mul(
                        Box::new(Expr::Const(*n as f64)),
                        Box::new(Expr::Ln(x.clone())),
                    )),
                    _ => Box::new(Expr::Ln(e)),
                }
            }

            Expr::Sqrt(expr) => {
                let e = expr.simplify(assumptions);
                match &*e {
                    Expr::Const(a) if *a >= 0.0 => Box::new(Expr::Const(a.sqrt())),
                    // sqrt(x^2) -> abs(x)
                    Expr::Pow(x, 2) if x.is_real(assumptions) => {
                        Expr::Abs(x.clone()).simplify(assumptions)
                    }
                    _ => Box::new(Expr::Sqrt(e)),
                }
            }

            Expr::Sin(expr) => {
                let e = expr.simplify(assumptions);
                match &*e {
                    Expr::Const(a) => Box::new(Expr::Const(a.sin())),
                    // sin(-x) -> -sin(x)
                    Expr::Neg(inner) => Box::new(Expr::Neg(Box::new(Expr::Sin(inner.clone())))),
                    _ => Box::new(Expr::Sin(e)),
                }
            }

            Expr::Cos(expr) => {
                let e = expr.simplify(assumptions);
                match &*e {
                    Expr::Const(a) => Box::new(Expr::Const(a.cos())),
                    // cos(-x) -> cos(x)
                    Expr::Neg(inner) => Box::new(Expr::Cos(inner.clone())),
                    _ => Box::new(Expr::Cos(e)),
                }
            }

            Expr::Elementary(function, expr) => {
                let e = expr.simplify(assumptions);
                match &*e {
                    Expr::Const(a) if function.apply(*a).is_finite() => {
                        Box::new(Expr::Const(function.apply(*a)))
                    }
                    _ => Box::new(Expr::Elementary(*function, e)),
                }
            }

            Expr::Neg(expr) => {
                let e = expr.simplify(assumptions);
                match &*e {
                    Expr::Const(a) => Box::new(Expr::Const(-a)),
                    // -(-x) -> x
                    Expr::Neg(inner) => inner.clone(),
                    // Distribute negation: -(x - y) -> y - x
                    Expr::Sub(x, y) => Box::new(Expr::Sub(y.clone(), x.clone())),
                    // Factor out negation: -(c*x) -> (-c)*x
                    Expr::Mul(c, x) if matches!(**c, Expr::Const(_)) => {
                        Expr::Mul(Box::new(Expr::Neg(c.clone())), x.clone()).simplify(assumptions)
                    }
                    _ => Box::new(Expr::Neg(e)),
                }
            }

            Expr::Derivative(expr, var) => {
                let e = expr.simplify(assumptions);
                if e.contains_var(var) {
                    Box::new(Expr::Derivative(e, var.clone()))
                } else {
                    Box::new(Expr::Const(0.0))
                }
            }

            Expr::Subs(expr, var, value) => {
                let e = expr.simplify(assumptions);
                let v = value.simplify(assumptions);
                if !e.contains_var(var) || *v == Expr::Var(var.clone()) {
                    e
                } else {
                    Box::new(Expr::Subs(e, var.clone(), v))
                }
            }
        }
    }
}

/// Sign with `sgn(0) = 0`.
pub fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        // keeps NaN
        x * 0.0
    }
}

/// d/dx g(f) for `g` in {abs, sgn}, left unevaluated.
fn unevaluated_chain(
    wrap: fn(Box<Expr>) -> Expr,
    inner: &Expr,
    with_respect_to: &str,
    dummies: &mut Dummies,
) -> Box<Expr> {
    if !inner.contains_var(with_respect_to) {
        return Box::new(Expr::Const(0.0));
    }
    if let Expr::Var(_) = inner {
        return Box::new(Expr::Derivative(
            Box::new(wrap(Box::new(inner.clone()))),
            with_respect_to.to_string(),
        ));
    }

    let dummy = dummies.fresh();
    let outer = Expr::Subs(
        Box::new(Expr::Derivative(
            Box::new(wrap(Box::new(Expr::Var(dummy.clone())))),
            dummy.clone(),
        )),
        dummy,
        Box::new(inner.clone()),
    );
    Box::new(Expr::Mul(
        Box::new(outer),
        inner.derivative(with_respect_to, dummies),
    ))
}

fn fmt_const(value: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if value.is_nan() {
        write!(f, "nan")
    } else if value.is_infinite() {
        if value > 0.0 {
            write!(f, "(1/0)")
        } else {
            write!(f, "(-1/0)")
        }
    } else if value == 0.0 {
        write!(f, "0")
    } else if value < 0.0 {
        write!(f, "(-{})", -value)
    } else {
        write!(f, "{}", value)
    }
}

/// Canonical, fully parenthesized rendering.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(value) => fmt_const(*value, f),
            Expr::Var(name) => write!(f, "{}", name),
            Expr::Add(l, r) => write!(f, "({}+{})", l, r),
            Expr::Sub(l, r) => write!(f, "({}-{})", l, r),
            Expr::Mul(l, r) => write!(f, "({}*{})", l, r),
            Expr::Div(l, r) => write!(f, "({}/{})", l, r),
            Expr::Neg(e) => write!(f, "(-{})", e),
            Expr::Abs(e) => write!(f, "abs({})", e),
            Expr::Sgn(e) => write!(f, "sgn({})", e),
            Expr::Pow(base, exp) if *exp < 0 => write!(f, "pow({},(-{}))", base, -exp),
            Expr::Pow(base, exp) => write!(f, "pow({},{})", base, exp),
            Expr::PowExpr(base, exp) => write!(f, "pow({},{})", base, exp),
            Expr::Exp(e) => write!(f, "exp({})", e),
            Expr::Ln(e) => write!(f, "log({})", e),
            Expr::Sqrt(e) => write!(f, "sqrt({})", e),
            Expr::Sin(e) => write!(f, "sin({})", e),
            Expr::Cos(e) => write!(f, "cos({})", e),
            Expr::Elementary(function, e) => write!(f, "{}({})", function.name(), e),
            Expr::Derivative(e, var) => write!(f, "derivative({},{})", e, var),
            Expr::Subs(e, var, value) => write!(f, "subs({},{},{})", e, var, value),
        }
    }
}
