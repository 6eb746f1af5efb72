//! GLSL compute-kernel assembly.
//!
//! - [`variable`]: kernel-local variables, declarations and copy templates
//! - [`function`]: kernel functions and the dependency-ordered registry
//! - [`shader`]: the kernel assembler
//! - [`nlsq`]: least-squares residual and Jacobian function generators
//! - [`compile`]: downstream compilation to SPIR-V
//! - [`print`]: inspection helpers

pub mod compile;
pub mod function;
pub mod nlsq;
pub mod print;
pub mod shader;
pub mod variable;

pub use compile::{GlslangCompiler, KernelCompiler, Optimization};
pub use function::{Function, FunctionRegistry};
pub use shader::{BufferBinding, Shader, ShaderConfig};
pub use variable::{ElementType, ShaderVariable};
