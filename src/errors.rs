//! Error types for the shadergen crate.
//!
//! Every stage of the expression-to-kernel pipeline has its own error enum. Lower stages are
//! wrapped by higher ones with `#[from]`, so callers can propagate with `?` all the way up:
//!
//! - `EngineError`: Failures inside the symbolic engine used for differentiation
//! - `ExpressionError`: Lexing, shunting, tree construction and differentiation failures
//! - `SymbolError`: Inconsistent param/const binding setup or lookups of unbound names
//! - `ShaderError`: Kernel assembly failures
//! - `CompileError`: Failures of the downstream GLSL to SPIR-V tools
//! - `KernelError`: Top-level errors of the configuration driven pipeline

use evalexpr::{DefaultNumericTypes, EvalexprError};
use thiserror::Error;

/// Errors raised by a symbolic engine while parsing, converting or differentiating.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine's own parser rejected the canonical text
    #[error("failed to parse canonical expression: {0}")]
    Parse(#[from] EvalexprError<DefaultNumericTypes>),
    /// An operator that has no counterpart in the symbolic tree
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),
    /// A function name that has no counterpart in the symbolic tree
    #[error("unsupported function: {0}")]
    UnsupportedFunction(String),
    /// A constant that is not numeric
    #[error("expected numeric constant: {0}")]
    ConstOperator(String),
    /// A function call with the wrong number of arguments
    #[error("function '{function}' expects {expected} argument(s), got {got}")]
    Arity {
        function: String,
        expected: usize,
        got: usize,
    },
    /// A node that was expected to hold a variable name
    #[error("expected a variable, found: {0}")]
    ExpectedVariable(String),
}

/// Errors raised while turning an expression string into a tree or while deriving from it.
#[derive(Error, Debug)]
pub enum ExpressionError {
    /// A character that starts no token
    #[error("unexpected character '{character}' at position {position}")]
    UnexpectedCharacter { character: char, position: usize },
    /// An identifier that is neither a registered variable nor a known function
    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),
    /// A numeric literal that cannot be read as a number
    #[error("invalid numeric literal: {0}")]
    InvalidNumber(String),
    /// Parentheses do not pair up
    #[error("unbalanced parentheses")]
    UnbalancedParentheses,
    /// A comma outside of a function argument list
    #[error("misplaced comma")]
    MisplacedComma,
    /// A function called with the wrong number of arguments
    #[error("function '{function}' expects {expected} argument(s), got {got}")]
    ArgumentCount {
        function: String,
        expected: String,
        got: usize,
    },
    /// The operand stack did not end with exactly one node
    #[error("malformed expression: {0}")]
    Malformed(String),
    /// Tokens that carry no node (parentheses and commas) reached the builder
    #[error("no creation function registered for token: {0}")]
    NoCreationFunction(String),
    /// The second argument of `derivative` is not a variable
    #[error("Right argument in derivative must be a variable, got: {0}")]
    InvalidDerivativeArgument(String),
    /// A substitution target of `subs` is not a variable
    #[error("substitution targets in subs must be variables, got: {0}")]
    InvalidSubsArgument(String),
    /// A variable without a value during numeric evaluation
    #[error("no value bound for variable: {0}")]
    UnboundVariable(String),
    /// A variable that cannot be rendered as a kernel buffer access
    #[error("failed to bind variable")]
    Symbol(#[from] SymbolError),
    /// The symbolic engine failed while differentiating
    #[error("symbolic engine failed")]
    Engine(#[from] EngineError),
}

/// Errors raised by the param/const symbol binding context.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SymbolError {
    /// The name is already registered as a param or a const
    #[error("'{name}' is already registered as a {kind}")]
    DuplicateName { name: String, kind: String },
    /// The index is already taken within the same category
    #[error("{kind} index {index} is already bound to '{existing}'")]
    DuplicateIndex {
        kind: String,
        index: usize,
        existing: String,
    },
    /// The name is registered in neither category
    #[error("'{0}' is not a registered param or const")]
    UnknownName(String),
    /// No name is registered at this index
    #[error("no {kind} registered at index {index}")]
    UnknownIndex { kind: String, index: usize },
}

/// Errors raised while assembling kernel source text.
#[derive(Error, Debug)]
pub enum ShaderError {
    /// Copy statements need two variables of identical shape
    #[error("cannot copy between '{source_name}' and '{destination}': both variables must be matrices, vectors or singles of the same shape")]
    IncompatibleCopy {
        source_name: String,
        destination: String,
    },
    /// `void` cannot be declared or bound
    #[error("unsupported element type '{element}' for variable '{variable}'")]
    UnsupportedElementType { element: String, variable: String },
    /// Two different bodies registered under the same name and signature
    #[error("function '{0}' is already registered with a different body")]
    ConflictingFunction(String),
    /// Two different buffers requested for the same binding slot
    #[error("binding slot {slot} is already used by '{existing}'")]
    ConflictingBinding { slot: u32, existing: String },
    /// Two variables with one name but different shapes
    #[error("variable '{0}' is already declared with a different shape or type")]
    ConflictingVariable(String),
    /// GLSL has no zero-sized arrays
    #[error("variable '{0}' has no elements")]
    ZeroSized(String),
    /// A builtin without an overload for the kernel's element type
    #[error("GLSL has no {element} overload of '{function}'")]
    UnsupportedBuiltin { function: String, element: String },
    /// A shape-specific add operation received another shape
    #[error("expected a {expected} variable, got '{variable}'")]
    WrongShape { expected: String, variable: String },
    /// An expression could not be rendered for the kernel
    #[error("failed to render expression")]
    Expression(#[from] ExpressionError),
}

/// Errors raised by the downstream GLSL to SPIR-V compilation tools.
#[derive(Error, Debug)]
pub enum CompileError {
    /// Reading or writing the intermediate files failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A tool could not be started
    #[error("failed to run '{tool}': {message}")]
    Spawn { tool: String, message: String },
    /// A tool ran but reported failure
    #[error("'{tool}' failed:\n{output}")]
    ToolFailed { tool: String, output: String },
    /// The produced binary is not a sequence of 32-bit words
    #[error("SPIR-V binary has a length of {0} bytes, not a multiple of 4")]
    InvalidBinary(usize),
    /// The produced binary does not start with the SPIR-V magic number
    #[error("SPIR-V binary starts with {0:#010x} instead of the magic number")]
    InvalidMagic(u32),
}

/// Errors of the configuration driven pipeline used by the command line tool.
#[derive(Error, Debug)]
pub enum KernelError {
    /// The kernel description could not be read
    #[error("failed to read kernel description: {0}")]
    Io(#[from] std::io::Error),
    /// The kernel description is not valid JSON for a `KernelSpec`
    #[error("invalid kernel description: {0}")]
    Json(#[from] serde_json::Error),
    /// Building the expression failed
    #[error("expression error: {0}")]
    Expression(#[from] ExpressionError),
    /// Binding params and consts failed
    #[error("symbol error: {0}")]
    Symbol(#[from] SymbolError),
    /// Assembling the kernel failed
    #[error("shader error: {0}")]
    Shader(#[from] ShaderError),
    /// Compiling the kernel to SPIR-V failed
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
    /// A host buffer does not match the declared layout
    #[error("invalid buffer length for '{buffer}': expected {expected}, got {got}")]
    BufferLength {
        buffer: String,
        expected: usize,
        got: usize,
    },
}
