//! Kernel assembly.
//!
//! A [`Shader`] collects buffer bindings, functions, variables, copy statements and call
//! statements, and renders them into one compute kernel with [`Shader::compile`]. Every variable
//! bound to a buffer gets a `global_` twin of the same shape; the twin lives in the buffer and is
//! never declared locally. Each kernel invocation works on one instance, whose slice of every
//! buffer starts at `len * instance_index`.
//!
//! # Example
//!
//! ```rust
//! use shadergen::prelude::*;
//!
//! let mut shader = Shader::new();
//! let params = ShaderVariable::vector("params", 4, ElementType::Float);
//! shader.add_input_vector(&params, 0).unwrap();
//!
//! let text = shader.compile().unwrap();
//! assert!(text.contains("params[i] = global_params[start_index + i];"));
//! ```

use std::fmt;

use colored::Colorize;
use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use super::function::{Function, FunctionRegistry};
use super::variable::{ElementType, ShaderVariable};
use crate::errors::ShaderError;

// most kernels are smaller than 30 kB
const DEFAULT_SHADER_SIZE: usize = 30_000;

/// Preamble settings shared by every kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    /// `#version` directive
    pub version: u32,
    /// Workgroup size along x
    pub local_size_x: u32,
    /// Expression yielding the instance an invocation works on
    pub instance_index: String,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        ShaderConfig {
            version: 450,
            local_size_x: 1,
            instance_index: "gl_GlobalInvocationID.x".to_string(),
        }
    }
}

/// A storage buffer holding the `global_` twin of a variable for every instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferBinding {
    slot: u32,
    element: ElementType,
    name: String,
}

impl BufferBinding {
    pub fn new(slot: u32, element: ElementType, name: &str) -> Self {
        BufferBinding {
            slot,
            element,
            name: name.to_string(),
        }
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn render(&self) -> Result<String, ShaderError> {
        match self.element {
            ElementType::Void => Err(ShaderError::UnsupportedElementType {
                element: self.element.to_string(),
                variable: self.name.clone(),
            }),
            element => Ok(format!(
                "layout(set = 0, binding = {slot}) buffer buf_global_{name} {{ {ty} global_{name}[]; }};",
                slot = self.slot,
                name = self.name,
                ty = element
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Declared {
    variable: ShaderVariable,
    global: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct Call {
    function: usize,
    result: Option<usize>,
    arguments: Vec<usize>,
}

#[derive(Clone, Copy, PartialEq)]
enum Direction {
    In,
    Out,
}

#[derive(Clone, Default)]
pub struct Shader {
    config: ShaderConfig,
    bindings: Vec<BufferBinding>,
    functions: FunctionRegistry,
    variables: Vec<Declared>,
    inputs: Vec<(usize, usize)>,
    outputs: Vec<(usize, usize)>,
    calls: Vec<Call>,
    before_copying_from: String,
    after_copying_from: String,
    before_copying_back: String,
    after_copying_back: String,
}

impl Shader {
    pub fn new() -> Self {
        Shader::default()
    }

    pub fn with_config(config: ShaderConfig) -> Self {
        Shader {
            config,
            ..Shader::default()
        }
    }

    pub fn config(&self) -> &ShaderConfig {
        &self.config
    }

    pub fn bindings(&self) -> &[BufferBinding] {
        &self.bindings
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Declared variables in registration order, `global_` twins included.
    pub fn variables(&self) -> impl Iterator<Item = &ShaderVariable> {
        self.variables.iter().map(|declared| &declared.variable)
    }

    /// Registers `function` and its dependencies without calling it.
    pub fn add_function(&mut self, function: &Function) -> Result<usize, ShaderError> {
        self.functions.add(function)
    }

    /// Declares a plain local variable with no buffer behind it.
    pub fn add_variable(&mut self, variable: &ShaderVariable) -> Result<usize, ShaderError> {
        self.declare(variable, false)
    }

    /// Binds `variable` at `slot` and copies it in from its buffer.
    pub fn add_input(&mut self, variable: &ShaderVariable, slot: u32) -> Result<(), ShaderError> {
        self.bind(variable, slot, Direction::In, true)
    }

    /// Binds `variable` at `slot` and copies it back to its buffer.
    pub fn add_output(&mut self, variable: &ShaderVariable, slot: u32) -> Result<(), ShaderError> {
        self.bind(variable, slot, Direction::Out, true)
    }

    /// Binds `variable` once at `slot` and copies it both in and back.
    pub fn add_input_output(
        &mut self,
        variable: &ShaderVariable,
        slot: u32,
    ) -> Result<(), ShaderError> {
        self.bind(variable, slot, Direction::In, true)?;
        self.bind(variable, slot, Direction::Out, false)
    }

    pub fn add_input_matrix(&mut self, matrix: &ShaderVariable, slot: u32) -> Result<(), ShaderError> {
        self.add_input(expect_shape(matrix, "matrix")?, slot)
    }

    pub fn add_output_matrix(&mut self, matrix: &ShaderVariable, slot: u32) -> Result<(), ShaderError> {
        self.add_output(expect_shape(matrix, "matrix")?, slot)
    }

    pub fn add_input_output_matrix(
        &mut self,
        matrix: &ShaderVariable,
        slot: u32,
    ) -> Result<(), ShaderError> {
        self.add_input_output(expect_shape(matrix, "matrix")?, slot)
    }

    pub fn add_input_vector(&mut self, vector: &ShaderVariable, slot: u32) -> Result<(), ShaderError> {
        self.add_input(expect_shape(vector, "vector")?, slot)
    }

    pub fn add_output_vector(&mut self, vector: &ShaderVariable, slot: u32) -> Result<(), ShaderError> {
        self.add_output(expect_shape(vector, "vector")?, slot)
    }

    pub fn add_input_output_vector(
        &mut self,
        vector: &ShaderVariable,
        slot: u32,
    ) -> Result<(), ShaderError> {
        self.add_input_output(expect_shape(vector, "vector")?, slot)
    }

    pub fn add_input_single(&mut self, single: &ShaderVariable, slot: u32) -> Result<(), ShaderError> {
        self.add_input(expect_shape(single, "single")?, slot)
    }

    pub fn add_output_single(&mut self, single: &ShaderVariable, slot: u32) -> Result<(), ShaderError> {
        self.add_output(expect_shape(single, "single")?, slot)
    }

    pub fn add_input_output_single(
        &mut self,
        single: &ShaderVariable,
        slot: u32,
    ) -> Result<(), ShaderError> {
        self.add_input_output(expect_shape(single, "single")?, slot)
    }

    /// Appends a call statement `[result = ]function(arguments...);`.
    ///
    /// The function is registered with its dependencies; variables not declared yet are
    /// declared as plain locals.
    pub fn apply(
        &mut self,
        function: &Function,
        result: Option<&ShaderVariable>,
        arguments: &[&ShaderVariable],
    ) -> Result<(), ShaderError> {
        let function = self.functions.add(function)?;
        let result = result
            .map(|variable| self.declare(variable, false))
            .transpose()?;
        let arguments = arguments
            .iter()
            .map(|variable| self.declare(variable, false))
            .collect::<Result<Vec<_>, _>>()?;

        self.calls.push(Call {
            function,
            result,
            arguments,
        });
        Ok(())
    }

    pub fn set_before_copying_from(&mut self, text: &str) {
        self.before_copying_from = text.to_string();
    }

    pub fn set_after_copying_from(&mut self, text: &str) {
        self.after_copying_from = text.to_string();
    }

    pub fn set_before_copying_back(&mut self, text: &str) {
        self.before_copying_back = text.to_string();
    }

    pub fn set_after_copying_back(&mut self, text: &str) {
        self.after_copying_back = text.to_string();
    }

    /// Renders the kernel. Compiling an unchanged shader always yields the same text.
    pub fn compile(&self) -> Result<String, ShaderError> {
        let mut ret = String::with_capacity(DEFAULT_SHADER_SIZE);
        let index = &self.config.instance_index;

        ret += &format!(
            "#version {}\n\nlayout (local_size_x = {}) in;\n\n",
            self.config.version, self.config.local_size_x
        );

        for binding in &self.bindings {
            ret += &binding.render()?;
            ret += "\n";
        }
        ret += "\n";

        for function in self.functions.iter() {
            ret += &function.code();
            ret += "\n";
        }
        ret += "\n";

        ret += "void main() {\n";

        for declared in self.variables.iter().filter(|declared| !declared.global) {
            ret += &format!("\t{}\n", declared.variable.declaration()?);
        }
        ret += "\n";

        ret += &self.before_copying_from;

        ret += "\tuint start_index;\n";
        for &(source, destination) in &self.inputs {
            let source = &self.variables[source].variable;
            let destination = &self.variables[destination].variable;
            ret += &destination.copying_from(source, index)?;
        }
        ret += "\n";

        ret += &self.after_copying_from;

        for call in &self.calls {
            ret += &self.render_call(call);
        }
        ret += "\n";

        ret += &self.before_copying_back;

        for &(source, destination) in &self.outputs {
            let source = &self.variables[source].variable;
            let destination = &self.variables[destination].variable;
            ret += &source.copying_to(destination, index)?;
        }

        ret += &self.after_copying_back;

        ret += "}\n";

        debug!(
            "compiled kernel: {} bindings, {} functions, {} calls, {} bytes",
            self.bindings.len(),
            self.functions.len(),
            self.calls.len(),
            ret.len()
        );
        Ok(ret)
    }

    fn render_call(&self, call: &Call) -> String {
        let function = &self.functions[call.function];
        let result = match call.result {
            Some(result) => format!("{} = ", self.variables[result].variable.name()),
            None => String::new(),
        };
        let arguments = call
            .arguments
            .iter()
            .map(|&argument| self.variables[argument].variable.name())
            .join(", ");
        format!("\t{}{}({});\n", result, function.name(), arguments)
    }

    fn bind(
        &mut self,
        variable: &ShaderVariable,
        slot: u32,
        direction: Direction,
        add_binding: bool,
    ) -> Result<(), ShaderError> {
        let local = self.declare(variable, false)?;
        let global = self.declare(&variable.global(), true)?;

        if add_binding {
            self.add_binding(BufferBinding::new(slot, variable.element(), variable.name()))?;
        }

        match direction {
            Direction::In => self.inputs.push((global, local)),
            Direction::Out => self.outputs.push((local, global)),
        }
        Ok(())
    }

    fn add_binding(&mut self, binding: BufferBinding) -> Result<bool, ShaderError> {
        match self.bindings.iter().find(|b| b.slot == binding.slot) {
            Some(existing) if *existing == binding => Ok(false),
            Some(existing) => Err(ShaderError::ConflictingBinding {
                slot: binding.slot,
                existing: existing.name.clone(),
            }),
            None => {
                debug!("binding '{}' at slot {}", binding.name, binding.slot);
                self.bindings.push(binding);
                Ok(true)
            }
        }
    }

    // Variables are keyed by name; redeclaring with another shape is an error.
    fn declare(&mut self, variable: &ShaderVariable, global: bool) -> Result<usize, ShaderError> {
        if let Some(position) = self
            .variables
            .iter()
            .position(|declared| declared.variable.name() == variable.name())
        {
            return if self.variables[position].variable == *variable {
                Ok(position)
            } else {
                Err(ShaderError::ConflictingVariable(variable.name().to_string()))
            };
        }

        variable.declaration()?;
        self.variables.push(Declared {
            variable: variable.clone(),
            global,
        });
        Ok(self.variables.len() - 1)
    }
}

fn expect_shape<'v>(
    variable: &'v ShaderVariable,
    expected: &str,
) -> Result<&'v ShaderVariable, ShaderError> {
    if variable.shape() == expected {
        Ok(variable)
    } else {
        Err(ShaderError::WrongShape {
            expected: expected.to_string(),
            variable: variable.name().to_string(),
        })
    }
}

impl fmt::Debug for Shader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{\n")?;
        writeln!(f, "    {}: {:?}\n", "Config".cyan(), self.config)?;
        writeln!(
            f,
            "    {}: {:?}\n",
            "Bindings".cyan(),
            self.bindings
                .iter()
                .map(|b| format!("{}:{}", b.slot, b.name))
                .collect::<Vec<_>>()
        )?;
        writeln!(f, "    {}: {:?}\n", "Functions".cyan(), self.functions.names())?;
        writeln!(
            f,
            "    {}: {:?}\n",
            "Variables".cyan(),
            self.variables().map(|v| v.to_string()).collect::<Vec<_>>()
        )?;
        writeln!(f, "    {}: {}\n", "Calls".cyan(), self.calls.len())?;
        writeln!(f, "}}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn float_vector(name: &str, length: usize) -> ShaderVariable {
        ShaderVariable::vector(name, length, ElementType::Float)
    }

    #[test]
    fn test_vector_input_copy_loop() {
        let mut shader = Shader::new();
        shader.add_input_vector(&float_vector("params", 4), 0).unwrap();
        let text = shader.compile().unwrap();

        let expected = "#version 450

layout (local_size_x = 1) in;

layout(set = 0, binding = 0) buffer buf_global_params { float global_params[]; };


void main() {
\tfloat params[4];

\tuint start_index;

\tstart_index = 4*gl_GlobalInvocationID.x;
\tfor (int i = 0; i < 4; ++i) {
\t\tparams[i] = global_params[start_index + i];
\t}


}
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_compile_is_idempotent() {
        let mut shader = Shader::new();
        let residuals = float_vector("residuals", 21);
        let lambda = ShaderVariable::single("lambda", ElementType::Float);
        shader.add_input_output_vector(&float_vector("params", 4), 0).unwrap();
        shader.add_output_vector(&residuals, 1).unwrap();
        shader.add_input_output_single(&lambda, 2).unwrap();
        shader.set_after_copying_from("\tfor (int k = 0; k < 3; ++k) {\n");
        shader.set_before_copying_back("\t}\n");

        let first = shader.compile().unwrap();
        let second = shader.compile().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_section_order() {
        let g = Function::from_code("g", vec![], "void g() {}".into());
        let f = Function::from_code("f", vec![], "float f() { g(); return 1.0; }".into())
            .with_dependencies(vec![g]);

        let mut shader = Shader::new();
        let out = ShaderVariable::single("out_value", ElementType::Float);
        shader.add_output_single(&out, 3).unwrap();
        shader.apply(&f, Some(&out), &[]).unwrap();
        shader.set_before_copying_from("\t// before in\n");
        shader.set_after_copying_from("\t// after in\n");
        shader.set_before_copying_back("\t// before back\n");
        shader.set_after_copying_back("\t// after back\n");

        let text = shader.compile().unwrap();
        let order = [
            "#version 450",
            "layout(set = 0, binding = 3)",
            "void g() {}",
            "float f()",
            "void main() {",
            "\tfloat out_value;",
            "// before in",
            "uint start_index;",
            "// after in",
            "\tout_value = f();",
            "// before back",
            "global_out_value[gl_GlobalInvocationID.x] = out_value;",
            "// after back",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|needle| text.find(needle).unwrap_or_else(|| panic!("missing {}", needle)))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{}", text);
        assert!(!text.contains("float global_out_value;"));
    }

    #[test]
    fn test_input_output_binds_once() {
        let mut shader = Shader::new();
        let params = float_vector("params", 4);
        shader.add_input_output(&params, 0).unwrap();

        assert_eq!(shader.bindings().len(), 1);
        let text = shader.compile().unwrap();
        assert!(text.contains("params[i] = global_params[start_index + i];"));
        assert!(text.contains("global_params[start_index + i] = params[i];"));
        assert_eq!(text.matches("float params[4];").count(), 1);
    }

    #[test]
    fn test_apply_call_statement() {
        let step = Function::from_code("step", vec![], "void step() {}".into());
        let mut shader = Shader::new();
        let params = float_vector("params", 4);
        let data = float_vector("data", 21);
        shader.add_input_vector(&params, 0).unwrap();
        shader.apply(&step, None, &[&params, &data]).unwrap();
        shader.apply(&step, None, &[]).unwrap();

        let text = shader.compile().unwrap();
        assert!(text.contains("\tstep(params, data);\n"));
        assert!(text.contains("\tstep();\n"));
        assert!(text.contains("\tfloat data[21];\n"));
        assert_eq!(shader.functions().len(), 1);
    }

    #[test]
    fn test_matrix_and_single_copies() {
        let mut shader = Shader::new();
        shader
            .add_input_matrix(&ShaderVariable::matrix("consts", 21, 1, ElementType::Float), 1)
            .unwrap();
        shader
            .add_input_single(
                &ShaderVariable::single_with_value("mu", ElementType::Float, "0.25"),
                5,
            )
            .unwrap();

        let text = shader.compile().unwrap();
        assert!(text.contains("\tfloat consts[21*1];\n"));
        assert!(text.contains("start_index = 21*1*gl_GlobalInvocationID.x;"));
        assert!(text.contains("for (int i = 0; i < 21*1; ++i) {"));
        assert!(text.contains("\tfloat mu = 0.25;\n"));
        assert!(text.contains("\tmu = global_mu[gl_GlobalInvocationID.x];\n"));
        assert!(text.contains(
            "layout(set = 0, binding = 5) buffer buf_global_mu { float global_mu[]; };"
        ));
    }

    #[test]
    fn test_shape_errors() {
        let mut shader = Shader::new();
        let vector = float_vector("v", 3);
        assert!(matches!(
            shader.add_input_matrix(&vector, 0),
            Err(ShaderError::WrongShape { .. })
        ));

        shader.add_input_vector(&vector, 0).unwrap();
        assert!(matches!(
            shader.add_variable(&float_vector("v", 4)),
            Err(ShaderError::ConflictingVariable(_))
        ));
        assert!(matches!(
            shader.add_input_vector(&float_vector("w", 3), 0),
            Err(ShaderError::ConflictingBinding { slot: 0, .. })
        ));
        assert!(matches!(
            shader.add_variable(&ShaderVariable::single("nothing", ElementType::Void)),
            Err(ShaderError::UnsupportedElementType { .. })
        ));
    }

    #[test]
    fn test_custom_config() {
        let mut shader = Shader::with_config(ShaderConfig {
            version: 460,
            local_size_x: 64,
            instance_index: "instance".into(),
        });
        shader.add_output_vector(&float_vector("out", 2), 0).unwrap();
        let text = shader.compile().unwrap();
        assert!(text.starts_with("#version 460\n\nlayout (local_size_x = 64) in;\n"));
        assert!(text.contains("start_index = 2*instance;"));
    }
}
