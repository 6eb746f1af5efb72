//! JSON kernel descriptions.
//!
//! A [`KernelSpec`] names a model expression, which of its variables are params and which are
//! consts, and the number of data rows per instance. [`KernelSpec::build`] turns it into a
//! complete residual kernel, optionally with the Jacobian and the Hessian, using a fixed binding
//! layout:
//!
//! | slot | variable    | direction |
//! |------|-------------|-----------|
//! | 0    | `params`    | in        |
//! | 1    | `consts`    | in        |
//! | 2    | `data`      | in        |
//! | 3    | `residuals` | out       |
//! | 4    | `jacobian`  | out       |
//! | 5    | `hessian`   | out       |
//!
//! Slots 4 and 5 are only bound when requested. Requesting the Hessian implies the Jacobian.
//!
//! ```json
//! {
//!     "expression": "s0*exp(-b*adc)",
//!     "params": ["s0", "adc"],
//!     "consts": ["b"],
//!     "ndata": 21,
//!     "jacobian": true
//! }
//! ```

use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::context::{SymbolNames, SymbolicContext};
use crate::errors::KernelError;
use crate::expression::Expression;
use crate::glsl::compile::Optimization;
use crate::glsl::nlsq::{self, NlsqVariables};
use crate::glsl::shader::{Shader, ShaderConfig};
use crate::glsl::variable::ElementType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSpec {
    /// Model expression
    pub expression: String,
    /// Param names, bound to indices in order
    pub params: Vec<String>,
    /// Const names, bound to indices in order
    #[serde(default)]
    pub consts: Vec<String>,
    /// Data rows per instance
    pub ndata: usize,
    /// Also emit the Jacobian with respect to the params
    #[serde(default)]
    pub jacobian: bool,
    /// Also emit the `nparams x nparams` Hessian of the summed squared residuals
    #[serde(default)]
    pub hessian: bool,
    #[serde(default = "default_precision")]
    pub precision: ElementType,
    #[serde(default)]
    pub shader: ShaderConfig,
    #[serde(default)]
    pub names: SymbolNames,
    #[serde(default)]
    pub optimization: Optimization,
}

fn default_precision() -> ElementType {
    ElementType::Float
}

/// A built kernel together with everything needed to feed and check it.
#[derive(Debug, Clone)]
pub struct Kernel {
    pub expression: Expression,
    pub symtext: SymbolicContext,
    pub variables: NlsqVariables,
    pub shader: Shader,
}

impl KernelSpec {
    pub fn from_json(text: &str) -> Result<Self, KernelError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, KernelError> {
        let text = fs::read_to_string(path)?;
        KernelSpec::from_json(&text)
    }

    /// Parses the model against params followed by consts.
    pub fn parse_expression(&self) -> Result<Expression, KernelError> {
        let variables: Vec<&str> = self
            .params
            .iter()
            .chain(&self.consts)
            .map(String::as_str)
            .collect();
        Ok(Expression::new(&self.expression, &variables)?)
    }

    pub fn symbolic_context(&self) -> Result<SymbolicContext, KernelError> {
        let mut symtext = SymbolicContext::with_names(self.names.clone());
        for (index, name) in self.params.iter().enumerate() {
            symtext.insert_param(name, index)?;
        }
        for (index, name) in self.consts.iter().enumerate() {
            symtext.insert_const(name, index)?;
        }
        Ok(symtext)
    }

    pub fn build(&self) -> Result<Kernel, KernelError> {
        let symtext = self.symbolic_context()?;
        let expression = self.parse_expression()?;
        let variables = NlsqVariables::new(&symtext, self.ndata, self.precision);

        let mut shader = Shader::with_config(self.shader.clone());
        shader.add_input_vector(&variables.params, 0)?;
        shader.add_input_matrix(&variables.consts, 1)?;
        shader.add_input_vector(&variables.data, 2)?;
        shader.add_output_vector(&variables.residuals, 3)?;

        let all = [
            &variables.params,
            &variables.consts,
            &variables.data,
            &variables.residuals,
            &variables.jacobian,
            &variables.hessian,
        ];
        let (function, arguments) = if self.hessian {
            shader.add_output_matrix(&variables.jacobian, 4)?;
            shader.add_output_matrix(&variables.hessian, 5)?;
            (
                nlsq::residuals_jacobian_hessian(&expression, &symtext, &variables)?,
                &all[..],
            )
        } else if self.jacobian {
            shader.add_output_matrix(&variables.jacobian, 4)?;
            (
                nlsq::residuals_jacobian(&expression, &symtext, &variables)?,
                &all[..5],
            )
        } else {
            (
                nlsq::residuals(&expression, &symtext, &variables)?,
                &all[..4],
            )
        };
        shader.apply(&function, None, arguments)?;

        info!(
            "built kernel for '{}' with {} params, {} consts, {} rows",
            expression.str(),
            symtext.nparams(),
            symtext.nconsts(),
            self.ndata
        );
        Ok(Kernel {
            expression,
            symtext,
            variables,
            shader,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ShaderError;

    const SPEC: &str = r#"{
        "expression": "s0*exp(-b*adc)",
        "params": ["s0", "adc"],
        "consts": ["b"],
        "ndata": 21
    }"#;

    #[test]
    fn test_defaults() {
        let spec = KernelSpec::from_json(SPEC).unwrap();
        assert!(!spec.jacobian);
        assert!(!spec.hessian);
        assert_eq!(spec.precision, ElementType::Float);
        assert_eq!(spec.shader, ShaderConfig::default());
        assert_eq!(spec.names, SymbolNames::default());
        assert_eq!(spec.optimization, Optimization::none());
    }

    #[test]
    fn test_build_residual_kernel() {
        let kernel = KernelSpec::from_json(SPEC).unwrap().build().unwrap();
        let text = kernel.shader.compile().unwrap();

        assert!(text.contains(
            "layout(set = 0, binding = 3) buffer buf_global_residuals { float global_residuals[]; };"
        ));
        assert!(text.contains("\tnlsq_residuals(params, consts, data, residuals);\n"));
        assert!(!text.contains("jacobian"));
        assert_eq!(kernel.shader.functions().names(), vec!["nlsq_model", "nlsq_residuals"]);
    }

    #[test]
    fn test_build_jacobian_kernel() {
        let mut spec = KernelSpec::from_json(SPEC).unwrap();
        spec.expression = "s0+adc*b".into();
        spec.jacobian = true;
        spec.precision = ElementType::Double;
        let text = spec.build().unwrap().shader.compile().unwrap();

        assert!(text.contains("\tdouble jacobian[21*2];\n"));
        assert!(text.contains("global_jacobian[start_index + i] = jacobian[i];"));
        assert!(text.contains("\tnlsq_residuals_jacobian(params, consts, data, residuals, jacobian);\n"));
        assert!(!text.contains("hessian"));
    }

    #[test]
    fn test_build_hessian_kernel() {
        let mut spec = KernelSpec::from_json(SPEC).unwrap();
        spec.hessian = true;
        let kernel = spec.build().unwrap();
        let text = kernel.shader.compile().unwrap();

        assert!(text.contains(
            "layout(set = 0, binding = 4) buffer buf_global_jacobian { float global_jacobian[]; };"
        ));
        assert!(text.contains(
            "layout(set = 0, binding = 5) buffer buf_global_hessian { float global_hessian[]; };"
        ));
        assert!(text.contains("\tfloat hessian[2*2];\n"));
        assert!(text.contains("global_hessian[start_index + i] = hessian[i];"));
        assert!(text.contains(
            "\tnlsq_residuals_jacobian_hessian(params, consts, data, residuals, jacobian, hessian);\n"
        ));
        assert_eq!(
            kernel.shader.functions().names(),
            vec!["nlsq_model", "nlsq_residuals_jacobian_hessian"]
        );
    }

    #[test]
    fn test_double_transcendental_rejected() {
        let mut spec = KernelSpec::from_json(SPEC).unwrap();
        spec.precision = ElementType::Double;
        assert!(matches!(
            spec.build(),
            Err(KernelError::Shader(ShaderError::UnsupportedBuiltin { function, .. }))
                if function == "exp"
        ));
    }

    #[test]
    fn test_zero_params_rejected() {
        let spec = KernelSpec::from_json(
            r#"{ "expression": "b*2", "params": [], "consts": ["b"], "ndata": 4 }"#,
        )
        .unwrap();
        assert!(matches!(
            spec.build(),
            Err(KernelError::Shader(ShaderError::ZeroSized(name))) if name == "params"
        ));
    }

    #[test]
    fn test_custom_names_and_config() {
        let spec = KernelSpec::from_json(
            r#"{
                "expression": "a*t",
                "params": ["a"],
                "consts": ["t"],
                "ndata": 4,
                "shader": { "local_size_x": 32 },
                "names": { "params": "p", "consts": "c" }
            }"#,
        )
        .unwrap();
        assert_eq!(spec.shader.version, 450);
        let text = spec.build().unwrap().shader.compile().unwrap();
        assert!(text.contains("layout (local_size_x = 32) in;"));
        assert!(text.contains("return (p[0]*c[i*nconst+0]);"));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            KernelSpec::from_json("{"),
            Err(KernelError::Json(_))
        ));
        assert!(matches!(
            KernelSpec::from_file("/nonexistent/shadergen/spec.json"),
            Err(KernelError::Io(_))
        ));

        let mut spec = KernelSpec::from_json(SPEC).unwrap();
        spec.consts = vec!["s0".into()];
        assert!(matches!(spec.build(), Err(KernelError::Symbol(_))));

        let mut spec = KernelSpec::from_json(SPEC).unwrap();
        spec.expression = "s0*q".into();
        assert!(matches!(spec.build(), Err(KernelError::Expression(_))));
    }
}
