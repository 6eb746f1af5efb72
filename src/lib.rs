//! GLSL compute-kernel generation from symbolic expressions.
//!
//! This crate parses infix mathematical expressions into a differentiable syntax tree,
//! differentiates them through a swappable symbolic engine, and assembles the results into
//! GLSL compute kernels that fit many independent least-squares problems in parallel, one per
//! kernel invocation. It builds on [evalexpr](https://github.com/ISibboI/evalexpr) for parsing
//! inside the default symbolic engine.
//!
//! # Features
//!
//! - Shunting-yard expression parser with an extensible creation map
//! - Symbolic differentiation with dedicated rules for `abs` and `sgn`
//! - Binding of variables to per-instance params and per-row consts
//! - Kernel assembly with dependency-ordered functions and generated copy loops
//! - Residual, Jacobian and Hessian kernels sharing one model function
//! - CPU evaluation of the generated residuals, Jacobians and Hessians for checking device results
//!
//! # Example
//!
//! ```rust
//! use shadergen::prelude::*;
//!
//! let expr = Expression::new("s0*exp(-b*adc)", &["s0", "b", "adc"]).unwrap();
//!
//! let mut symtext = SymbolicContext::new();
//! symtext.insert_param("s0", 0).unwrap();
//! symtext.insert_param("adc", 1).unwrap();
//! symtext.insert_const("b", 0).unwrap();
//!
//! let vars = NlsqVariables::new(&symtext, 21, ElementType::Float);
//! let mut shader = Shader::new();
//! shader.add_input_vector(&vars.params, 0).unwrap();
//! shader.add_input_matrix(&vars.consts, 1).unwrap();
//! shader.add_input_vector(&vars.data, 2).unwrap();
//! shader.add_output_vector(&vars.residuals, 3).unwrap();
//! shader.add_output_matrix(&vars.jacobian, 4).unwrap();
//!
//! let function = residuals_jacobian(&expr, &symtext, &vars).unwrap();
//! let args = [&vars.params, &vars.consts, &vars.data, &vars.residuals, &vars.jacobian];
//! shader.apply(&function, None, &args).unwrap();
//!
//! let kernel = shader.compile().unwrap();
//! assert!(kernel.contains("jacobian[i*2+0] = exp(((-consts[i*nconst+0])*params[1]));"));
//! ```

pub use expression::Expression;
pub use glsl::Shader;

pub mod prelude {
    pub use crate::config::{Kernel, KernelSpec};
    pub use crate::context::{SymbolKind, SymbolNames, SymbolicContext};
    pub use crate::expression::Expression;
    pub use crate::glsl::nlsq::{
        residuals, residuals_jacobian, residuals_jacobian_hessian, NlsqVariables,
    };
    pub use crate::glsl::{
        ElementType, Function, FunctionRegistry, GlslangCompiler, KernelCompiler, Optimization,
        Shader, ShaderConfig, ShaderVariable,
    };
    pub use crate::host::HostEvaluator;
    pub use crate::lexer::LexContext;
    pub use crate::symbolic::{Differentiator, EvalexprEngine, SymbolicEngine};
}

/// Postfix tokens to expression tree, through the creation map
pub mod builder;
/// JSON kernel descriptions
pub mod config;
/// Param/const binding
pub mod context;
/// Error types for the various failure modes
pub mod errors;
/// Parsed, differentiable expressions
pub mod expression;
/// Kernel assembly
pub mod glsl;
/// CPU evaluation of residual kernels
pub mod host;
/// Tokenization of normalized expression text
pub mod lexer;
/// Expression tree nodes
pub mod node;
/// Infix to postfix conversion
pub mod shunter;
/// Symbolic engines used for differentiation
pub mod symbolic;
/// Token types
pub mod token;
