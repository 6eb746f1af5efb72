//! Kernel-local variables and their copy templates.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::errors::ShaderError;

/// Prefix of the buffer-backed twin of a local variable.
pub const GLOBAL_PREFIX: &str = "global_";

/// Scalar type of a variable's elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Int,
    Float,
    Double,
    Void,
}

impl ElementType {
    /// GLSL spelling. `void` is only valid as a function return type.
    pub fn glsl_name(self) -> &'static str {
        match self {
            ElementType::Int => "int",
            ElementType::Float => "float",
            ElementType::Double => "double",
            ElementType::Void => "void",
        }
    }

    fn storable(self, variable: &str) -> Result<&'static str, ShaderError> {
        match self {
            ElementType::Void => Err(ShaderError::UnsupportedElementType {
                element: self.glsl_name().to_string(),
                variable: variable.to_string(),
            }),
            other => Ok(other.glsl_name()),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.glsl_name())
    }
}

/// A variable declared inside the kernel entry point.
///
/// Matrices and vectors are flat fixed-size arrays; a matrix is stored row-major with
/// `rows*cols` elements. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShaderVariable {
    Matrix {
        name: String,
        rows: usize,
        cols: usize,
        element: ElementType,
    },
    Vector {
        name: String,
        length: usize,
        element: ElementType,
    },
    Single {
        name: String,
        element: ElementType,
        /// Initializer text, emitted verbatim in the declaration
        value: Option<String>,
    },
}

impl ShaderVariable {
    pub fn matrix(name: &str, rows: usize, cols: usize, element: ElementType) -> Self {
        ShaderVariable::Matrix {
            name: name.to_string(),
            rows,
            cols,
            element,
        }
    }

    pub fn vector(name: &str, length: usize, element: ElementType) -> Self {
        ShaderVariable::Vector {
            name: name.to_string(),
            length,
            element,
        }
    }

    pub fn single(name: &str, element: ElementType) -> Self {
        ShaderVariable::Single {
            name: name.to_string(),
            element,
            value: None,
        }
    }

    pub fn single_with_value(name: &str, element: ElementType, value: &str) -> Self {
        ShaderVariable::Single {
            name: name.to_string(),
            element,
            value: Some(value.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ShaderVariable::Matrix { name, .. }
            | ShaderVariable::Vector { name, .. }
            | ShaderVariable::Single { name, .. } => name,
        }
    }

    pub fn element(&self) -> ElementType {
        match self {
            ShaderVariable::Matrix { element, .. }
            | ShaderVariable::Vector { element, .. }
            | ShaderVariable::Single { element, .. } => *element,
        }
    }

    /// Shape name used in error messages.
    pub fn shape(&self) -> &'static str {
        match self {
            ShaderVariable::Matrix { .. } => "matrix",
            ShaderVariable::Vector { .. } => "vector",
            ShaderVariable::Single { .. } => "single",
        }
    }

    /// Number of elements one instance occupies in a global buffer.
    pub fn len(&self) -> usize {
        match self {
            ShaderVariable::Matrix { rows, cols, .. } => rows * cols,
            ShaderVariable::Vector { length, .. } => *length,
            ShaderVariable::Single { .. } => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_global(&self) -> bool {
        self.name().starts_with(GLOBAL_PREFIX)
    }

    /// The buffer-backed twin: same shape and type, `global_` name, no initializer.
    pub fn global(&self) -> ShaderVariable {
        let name = format!("{}{}", GLOBAL_PREFIX, self.name());
        match self {
            ShaderVariable::Matrix {
                rows,
                cols,
                element,
                ..
            } => ShaderVariable::matrix(&name, *rows, *cols, *element),
            ShaderVariable::Vector {
                length, element, ..
            } => ShaderVariable::vector(&name, *length, *element),
            ShaderVariable::Single { element, .. } => ShaderVariable::single(&name, *element),
        }
    }

    /// Hash of shape and element type, independent of the name.
    ///
    /// Function signatures are keyed on these hashes, so two arguments of the same type share
    /// a hash regardless of what the caller names them.
    pub fn type_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.shape().hash(&mut hasher);
        self.element().hash(&mut hasher);
        match self {
            ShaderVariable::Matrix { rows, cols, .. } => (rows, cols).hash(&mut hasher),
            ShaderVariable::Vector { length, .. } => length.hash(&mut hasher),
            ShaderVariable::Single { .. } => {}
        }
        hasher.finish()
    }

    /// Local declaration statement, e.g. `float jacobian[21*4];`.
    pub fn declaration(&self) -> Result<String, ShaderError> {
        let ty = self.storable()?;
        let text = match self {
            ShaderVariable::Matrix {
                name, rows, cols, ..
            } => format!("{} {}[{}*{}];", ty, name, rows, cols),
            ShaderVariable::Vector { name, length, .. } => format!("{} {}[{}];", ty, name, length),
            ShaderVariable::Single {
                name,
                value: Some(value),
                ..
            } => format!("{} {} = {};", ty, name, value),
            ShaderVariable::Single { name, .. } => format!("{} {};", ty, name),
        };
        Ok(text)
    }

    /// Function parameter form with a qualifier, e.g. `inout float residuals[21]`.
    pub fn parameter(&self, qualifier: &str) -> Result<String, ShaderError> {
        let ty = self.storable()?;
        let text = match self {
            ShaderVariable::Matrix {
                name, rows, cols, ..
            } => format!("{} {} {}[{}*{}]", qualifier, ty, name, rows, cols),
            ShaderVariable::Vector { name, length, .. } => {
                format!("{} {} {}[{}]", qualifier, ty, name, length)
            }
            ShaderVariable::Single { name, .. } => format!("{} {} {}", qualifier, ty, name),
        };
        Ok(text)
    }

    // Element type name, if the variable can be declared at all.
    fn storable(&self) -> Result<&'static str, ShaderError> {
        if self.is_empty() {
            return Err(ShaderError::ZeroSized(self.name().to_string()));
        }
        self.element().storable(self.name())
    }

    /// Copies this instance's slice of the global buffer `source` into the local `self`.
    pub fn copying_from(
        &self,
        source: &ShaderVariable,
        instance_index: &str,
    ) -> Result<String, ShaderError> {
        let bound = Self::copy_bound(source, self)?;
        Ok(match bound {
            Some(bound) => format!(
                "\n\tstart_index = {bound}*{index};\n\tfor (int i = 0; i < {bound}; ++i) {{\n\t\t{dst}[i] = {src}[start_index + i];\n\t}}\n",
                bound = bound,
                index = instance_index,
                dst = self.name(),
                src = source.name(),
            ),
            None => format!(
                "\n\t{} = {}[{}];\n",
                self.name(),
                source.name(),
                instance_index
            ),
        })
    }

    /// Copies the local `self` back into this instance's slice of the global `destination`.
    pub fn copying_to(
        &self,
        destination: &ShaderVariable,
        instance_index: &str,
    ) -> Result<String, ShaderError> {
        let bound = Self::copy_bound(self, destination)?;
        Ok(match bound {
            Some(bound) => format!(
                "\n\tstart_index = {bound}*{index};\n\tfor (int i = 0; i < {bound}; ++i) {{\n\t\t{dst}[start_index + i] = {src}[i];\n\t}}\n",
                bound = bound,
                index = instance_index,
                dst = destination.name(),
                src = self.name(),
            ),
            None => format!(
                "\n\t{}[{}] = {};\n",
                destination.name(),
                instance_index,
                self.name()
            ),
        })
    }

    // Loop bound text for matching shapes, None for a pair of singles.
    fn copy_bound(
        source: &ShaderVariable,
        destination: &ShaderVariable,
    ) -> Result<Option<String>, ShaderError> {
        match (source, destination) {
            (
                ShaderVariable::Matrix { rows, cols, .. },
                ShaderVariable::Matrix {
                    rows: r, cols: c, ..
                },
            ) if rows == r && cols == c => Ok(Some(format!("{}*{}", rows, cols))),
            (
                ShaderVariable::Vector { length, .. },
                ShaderVariable::Vector { length: l, .. },
            ) if length == l => Ok(Some(length.to_string())),
            (ShaderVariable::Single { .. }, ShaderVariable::Single { .. }) => Ok(None),
            _ => Err(ShaderError::IncompatibleCopy {
                source_name: source.name().to_string(),
                destination: destination.name().to_string(),
            }),
        }
    }
}

impl fmt::Display for ShaderVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderVariable::Matrix {
                name,
                rows,
                cols,
                element,
            } => write!(f, "{} {}[{}x{}]", element, name, rows, cols),
            ShaderVariable::Vector {
                name,
                length,
                element,
            } => write!(f, "{} {}[{}]", element, name, length),
            ShaderVariable::Single { name, element, .. } => write!(f, "{} {}", element, name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declarations() {
        let jacobian = ShaderVariable::matrix("jacobian", 21, 4, ElementType::Float);
        assert_eq!(jacobian.declaration().unwrap(), "float jacobian[21*4];");

        let params = ShaderVariable::vector("params", 4, ElementType::Double);
        assert_eq!(params.declaration().unwrap(), "double params[4];");

        let mu = ShaderVariable::single_with_value("mu", ElementType::Float, "0.25");
        assert_eq!(mu.declaration().unwrap(), "float mu = 0.25;");
        assert_eq!(
            ShaderVariable::single("step_type", ElementType::Int)
                .declaration()
                .unwrap(),
            "int step_type;"
        );

        let void = ShaderVariable::single("nothing", ElementType::Void);
        assert!(matches!(
            void.declaration(),
            Err(ShaderError::UnsupportedElementType { .. })
        ));
    }

    #[test]
    fn test_zero_sized_arrays() {
        let params = ShaderVariable::vector("params", 0, ElementType::Float);
        assert!(matches!(
            params.declaration(),
            Err(ShaderError::ZeroSized(name)) if name == "params"
        ));
        let jacobian = ShaderVariable::matrix("jacobian", 21, 0, ElementType::Float);
        assert!(matches!(
            jacobian.parameter("inout"),
            Err(ShaderError::ZeroSized(_))
        ));
    }

    #[test]
    fn test_global_twin() {
        let mu = ShaderVariable::single_with_value("mu", ElementType::Float, "0.25");
        let global = mu.global();
        assert_eq!(global, ShaderVariable::single("global_mu", ElementType::Float));
        assert!(global.is_global());
        assert!(!mu.is_global());
        assert_eq!(mu.type_hash(), global.type_hash());
    }

    #[test]
    fn test_type_hash_ignores_name() {
        let a = ShaderVariable::vector("a", 4, ElementType::Float);
        let b = ShaderVariable::vector("b", 4, ElementType::Float);
        let c = ShaderVariable::vector("a", 5, ElementType::Float);
        let d = ShaderVariable::vector("a", 4, ElementType::Double);
        assert_eq!(a.type_hash(), b.type_hash());
        assert_ne!(a.type_hash(), c.type_hash());
        assert_ne!(a.type_hash(), d.type_hash());
    }

    #[test]
    fn test_copy_templates() {
        let params = ShaderVariable::vector("params", 4, ElementType::Float);
        let text = params
            .copying_from(&params.global(), "gl_GlobalInvocationID.x")
            .unwrap();
        assert_eq!(
            text,
            "\n\tstart_index = 4*gl_GlobalInvocationID.x;\n\tfor (int i = 0; i < 4; ++i) {\n\t\tparams[i] = global_params[start_index + i];\n\t}\n"
        );

        let hessian = ShaderVariable::matrix("hessian", 4, 4, ElementType::Float);
        let text = hessian.copying_to(&hessian.global(), "k").unwrap();
        assert!(text.contains("start_index = 4*4*k;"));
        assert!(text.contains("global_hessian[start_index + i] = hessian[i];"));

        let lambda = ShaderVariable::single("lambda", ElementType::Float);
        assert_eq!(
            lambda.copying_from(&lambda.global(), "k").unwrap(),
            "\n\tlambda = global_lambda[k];\n"
        );
        assert_eq!(
            lambda.copying_to(&lambda.global(), "k").unwrap(),
            "\n\tglobal_lambda[k] = lambda;\n"
        );
    }

    #[test]
    fn test_incompatible_copy() {
        let v = ShaderVariable::vector("v", 4, ElementType::Float);
        let m = ShaderVariable::matrix("m", 2, 2, ElementType::Float);
        assert!(matches!(
            v.copying_from(&m, "k"),
            Err(ShaderError::IncompatibleCopy { .. })
        ));
        let w = ShaderVariable::vector("w", 5, ElementType::Float);
        assert!(v.copying_to(&w, "k").is_err());
    }
}
