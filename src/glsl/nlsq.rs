//! Least-squares residual, Jacobian and Hessian functions.
//!
//! All generators share one `nlsq_model` function, which evaluates the model expression for one
//! data row. Registering several in the same shader therefore emits the model once. Params are
//! laid out per instance in the params vector; consts are a `ndata x nconst` matrix, one row per
//! data point.
//!
//! The Hessian is that of the objective `sum(residuals[i]^2) / 2`:
//! `H[j][k] = sum(J[i][j]*J[i][k] + residuals[i]*d2model(i)/dp_j dp_k)`.

use itertools::Itertools;

use super::function::Function;
use super::variable::{ElementType, ShaderVariable};
use crate::context::SymbolicContext;
use crate::errors::{ExpressionError, ShaderError};
use crate::expression::Expression;

/// The kernel variables the generated functions operate on.
#[derive(Debug, Clone, PartialEq)]
pub struct NlsqVariables {
    pub params: ShaderVariable,
    pub consts: ShaderVariable,
    pub data: ShaderVariable,
    pub residuals: ShaderVariable,
    pub jacobian: ShaderVariable,
    pub hessian: ShaderVariable,
}

impl NlsqVariables {
    /// Shapes for `ndata` data points. A model without consts still gets one padding column so
    /// the consts array is never empty.
    pub fn new(symtext: &SymbolicContext, ndata: usize, element: ElementType) -> Self {
        let names = symtext.names();
        let nparams = symtext.nparams();
        let nconsts = symtext.nconsts().max(1);
        NlsqVariables {
            params: ShaderVariable::vector(&names.params, nparams, element),
            consts: ShaderVariable::matrix(&names.consts, ndata, nconsts, element),
            data: ShaderVariable::vector("data", ndata, element),
            residuals: ShaderVariable::vector("residuals", ndata, element),
            jacobian: ShaderVariable::matrix("jacobian", ndata, nparams, element),
            hessian: ShaderVariable::matrix("hessian", nparams, nparams, element),
        }
    }

    pub fn ndata(&self) -> usize {
        self.data.len()
    }

    pub fn nparams(&self) -> usize {
        self.params.len()
    }

    /// Columns of the consts matrix.
    pub fn nconst(&self) -> usize {
        match self.consts {
            ShaderVariable::Matrix { cols, .. } => cols,
            _ => 1,
        }
    }
}

/// `float nlsq_model(params, consts, i)`: the model value at data row `i`.
pub fn model(
    expr: &Expression,
    symtext: &SymbolicContext,
    vars: &NlsqVariables,
) -> Result<Function, ShaderError> {
    let names = symtext.names();
    let row = ShaderVariable::single(&names.consts_iterable_by, ElementType::Int);
    let element = vars.params.element().glsl_name();

    let code = format!(
        "{ty} nlsq_model({params}, {consts}, {row}) {{\n\tint {nconst} = {ncols};\n\treturn {body};\n}}\n",
        ty = element,
        params = vars.params.parameter("in")?,
        consts = vars.consts.parameter("in")?,
        row = row.parameter("in")?,
        nconst = names.nconst,
        ncols = vars.nconst(),
        body = render(expr, symtext, vars)?,
    );

    Ok(Function::from_code(
        "nlsq_model",
        vec![
            vars.params.type_hash(),
            vars.consts.type_hash(),
            row.type_hash(),
        ],
        code,
    ))
}

/// `void nlsq_residuals(params, consts, data, residuals)`: `residuals[i] = model(i) - data[i]`.
pub fn residuals(
    expr: &Expression,
    symtext: &SymbolicContext,
    vars: &NlsqVariables,
) -> Result<Function, ShaderError> {
    let model = model(expr, symtext, vars)?;
    let row = &symtext.names().consts_iterable_by;

    let code = format!(
        "void nlsq_residuals({}) {{\n\tfor (int {row} = 0; {row} < {ndata}; ++{row}) {{\n\t\t{residual}\n\t}}\n}}\n",
        parameters(&[
            (&vars.params, "in"),
            (&vars.consts, "in"),
            (&vars.data, "in"),
            (&vars.residuals, "inout"),
        ])?,
        row = row,
        ndata = vars.ndata(),
        residual = residual_statement(vars, row),
    );

    Ok(Function::from_code(
        "nlsq_residuals",
        type_hashes(&[&vars.params, &vars.consts, &vars.data, &vars.residuals]),
        code,
    )
    .with_dependencies(vec![model]))
}

/// `void nlsq_residuals_jacobian(params, consts, data, residuals, jacobian)`.
///
/// Row `i` of the Jacobian holds the derivatives of residual `i` with respect to every param,
/// in param index order.
pub fn residuals_jacobian(
    expr: &Expression,
    symtext: &SymbolicContext,
    vars: &NlsqVariables,
) -> Result<Function, ShaderError> {
    let model = model(expr, symtext, vars)?;
    let names = symtext.names();
    let row = &names.consts_iterable_by;
    let derivatives = first_derivatives(expr, symtext)?;

    let code = format!(
        "void nlsq_residuals_jacobian({}) {{\n\tint {nconst} = {ncols};\n\tfor (int {row} = 0; {row} < {ndata}; ++{row}) {{\n\t\t{residual}\n{entries}\t}}\n}}\n",
        parameters(&[
            (&vars.params, "in"),
            (&vars.consts, "in"),
            (&vars.data, "in"),
            (&vars.residuals, "inout"),
            (&vars.jacobian, "inout"),
        ])?,
        nconst = names.nconst,
        ncols = vars.nconst(),
        row = row,
        ndata = vars.ndata(),
        residual = residual_statement(vars, row),
        entries = jacobian_statements(&derivatives, symtext, vars, row)?,
    );

    Ok(Function::from_code(
        "nlsq_residuals_jacobian",
        type_hashes(&[
            &vars.params,
            &vars.consts,
            &vars.data,
            &vars.residuals,
            &vars.jacobian,
        ]),
        code,
    )
    .with_dependencies(vec![model]))
}

/// `void nlsq_residuals_jacobian_hessian(params, consts, data, residuals, jacobian, hessian)`.
///
/// Fills residuals and Jacobian like [`residuals_jacobian`] and accumulates the upper triangle of
/// the `nparams x nparams` Hessian row by row, then mirrors it. Entries whose second derivative
/// vanishes reduce to the Gauss-Newton product of Jacobian columns.
pub fn residuals_jacobian_hessian(
    expr: &Expression,
    symtext: &SymbolicContext,
    vars: &NlsqVariables,
) -> Result<Function, ShaderError> {
    let model = model(expr, symtext, vars)?;
    let names = symtext.names();
    let row = &names.consts_iterable_by;
    let nparams = vars.nparams();
    let derivatives = first_derivatives(expr, symtext)?;

    let mut hessian = String::new();
    for (j, dj) in derivatives.iter().enumerate() {
        for k in j..nparams {
            let gauss_newton = format!(
                "{jac}[{row}*{np}+{j}]*{jac}[{row}*{np}+{k}]",
                jac = vars.jacobian.name(),
                row = row,
                np = nparams,
                j = j,
                k = k,
            );
            let second = dj.diff(symtext.get_params_name(k).map_err(ExpressionError::from)?)?;
            let term = if second.is_zero() {
                gauss_newton
            } else {
                format!(
                    "{} + {}[{}]*{}",
                    gauss_newton,
                    vars.residuals.name(),
                    row,
                    render(&second, symtext, vars)?
                )
            };
            hessian += &format!(
                "\t\t{}[{}] += {};\n",
                vars.hessian.name(),
                j * nparams + k,
                term
            );
        }
    }

    let code = format!(
        "void nlsq_residuals_jacobian_hessian({params}) {{\n\tint {nconst} = {ncols};\n\tfor (int entry = 0; entry < {np}*{np}; ++entry) {{\n\t\t{hes}[entry] = 0.0;\n\t}}\n\tfor (int {row} = 0; {row} < {ndata}; ++{row}) {{\n\t\t{residual}\n{entries}{hessian}\t}}\n\tfor (int hrow = 1; hrow < {np}; ++hrow) {{\n\t\tfor (int hcol = 0; hcol < hrow; ++hcol) {{\n\t\t\t{hes}[hrow*{np}+hcol] = {hes}[hcol*{np}+hrow];\n\t\t}}\n\t}}\n}}\n",
        params = parameters(&[
            (&vars.params, "in"),
            (&vars.consts, "in"),
            (&vars.data, "in"),
            (&vars.residuals, "inout"),
            (&vars.jacobian, "inout"),
            (&vars.hessian, "inout"),
        ])?,
        nconst = names.nconst,
        ncols = vars.nconst(),
        np = nparams,
        hes = vars.hessian.name(),
        row = row,
        ndata = vars.ndata(),
        residual = residual_statement(vars, row),
        entries = jacobian_statements(&derivatives, symtext, vars, row)?,
        hessian = hessian,
    );

    Ok(Function::from_code(
        "nlsq_residuals_jacobian_hessian",
        type_hashes(&[
            &vars.params,
            &vars.consts,
            &vars.data,
            &vars.residuals,
            &vars.jacobian,
            &vars.hessian,
        ]),
        code,
    )
    .with_dependencies(vec![model]))
}

/// Derivatives of `expr` with respect to every param, in param index order.
fn first_derivatives(
    expr: &Expression,
    symtext: &SymbolicContext,
) -> Result<Vec<Expression>, ExpressionError> {
    (0..symtext.nparams())
        .map(|index| expr.diff(symtext.get_params_name(index)?))
        .collect()
}

fn jacobian_statements(
    derivatives: &[Expression],
    symtext: &SymbolicContext,
    vars: &NlsqVariables,
    row: &str,
) -> Result<String, ShaderError> {
    let nparams = vars.nparams();
    let statements = derivatives.iter().enumerate().map(|(index, derivative)| {
        Ok::<_, ShaderError>(format!(
            "\t\t{jacobian}[{row}*{nparams}+{index}] = {value};\n",
            jacobian = vars.jacobian.name(),
            row = row,
            nparams = nparams,
            index = index,
            value = render(derivative, symtext, vars)?,
        ))
    });
    itertools::process_results(statements, |mut statements| statements.join(""))
}

// Kernel text of `expr`, rejecting builtins the element type has no overload for.
fn render(
    expr: &Expression,
    symtext: &SymbolicContext,
    vars: &NlsqVariables,
) -> Result<String, ShaderError> {
    let element = vars.params.element();
    if element == ElementType::Double {
        if let Some(function) = expr.root().folded().float_only_functions().into_iter().next() {
            return Err(ShaderError::UnsupportedBuiltin {
                function: function.to_string(),
                element: element.to_string(),
            });
        }
    }
    Ok(expr.glsl_str(symtext)?)
}

fn residual_statement(vars: &NlsqVariables, row: &str) -> String {
    format!(
        "{residuals}[{row}] = nlsq_model({params}, {consts}, {row}) - {data}[{row}];",
        residuals = vars.residuals.name(),
        row = row,
        params = vars.params.name(),
        consts = vars.consts.name(),
        data = vars.data.name(),
    )
}

fn parameters(arguments: &[(&ShaderVariable, &str)]) -> Result<String, ShaderError> {
    itertools::process_results(
        arguments
            .iter()
            .map(|(variable, qualifier)| variable.parameter(qualifier)),
        |mut parameters| parameters.join(", "),
    )
}

fn type_hashes(arguments: &[&ShaderVariable]) -> Vec<u64> {
    arguments.iter().map(|variable| variable.type_hash()).collect()
}
