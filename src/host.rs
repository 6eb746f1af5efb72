//! CPU evaluation of residual kernels.
//!
//! [`HostEvaluator`] computes what `nlsq_residuals`, `nlsq_residuals_jacobian` and
//! `nlsq_residuals_jacobian_hessian` compute, using the same flat buffers and the same
//! per-instance offsets, so results can be compared element by element with buffers read back
//! from a device. Instances are evaluated in parallel.

use rayon::prelude::*;

use crate::context::{SymbolKind, SymbolicContext};
use crate::errors::{ExpressionError, KernelError};
use crate::expression::Expression;
use crate::glsl::nlsq::NlsqVariables;
use crate::glsl::variable::{ElementType, ShaderVariable};

/// How much of a kernel's output an instance evaluation produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Outputs {
    Residuals,
    Jacobian,
    Hessian,
}

#[derive(Default)]
struct InstanceOutput {
    residuals: Vec<f64>,
    jacobian: Vec<f64>,
    hessian: Vec<f64>,
}

pub struct HostEvaluator {
    model: Expression,
    jacobian: Vec<Expression>,
    // Upper triangle of the model's second derivatives, row by row.
    second: Vec<Expression>,
    symtext: SymbolicContext,
    vars: NlsqVariables,
}

impl HostEvaluator {
    /// Prepares the model, one derivative per param in param index order, and the second
    /// derivatives `d2/dp_j dp_k` for `j <= k`.
    pub fn new(
        expr: &Expression,
        symtext: &SymbolicContext,
        ndata: usize,
    ) -> Result<Self, KernelError> {
        let names = symtext.params();
        let jacobian = names
            .iter()
            .map(|param| expr.diff(param))
            .collect::<Result<Vec<_>, _>>()?;

        let mut second = Vec::with_capacity(names.len() * (names.len() + 1) / 2);
        for (j, derivative) in jacobian.iter().enumerate() {
            for param in &names[j..] {
                second.push(derivative.diff(param)?);
            }
        }
        log::debug!(
            "host evaluator: {} first and {} second derivatives",
            jacobian.len(),
            second.len()
        );

        Ok(HostEvaluator {
            model: expr.clone(),
            jacobian,
            second,
            symtext: symtext.clone(),
            vars: NlsqVariables::new(symtext, ndata, ElementType::Double),
        })
    }

    pub fn variables(&self) -> &NlsqVariables {
        &self.vars
    }

    /// Model value for one instance's params and one row of consts.
    pub fn model_value(&self, params: &[f64], consts_row: &[f64]) -> Result<f64, ExpressionError> {
        self.model.evaluate(self.lookup(params, consts_row))
    }

    /// `residuals[i] = model(i) - data[i]` for every instance.
    pub fn residuals(
        &self,
        ninstances: usize,
        params: &[f64],
        consts: &[f64],
        data: &[f64],
    ) -> Result<Vec<f64>, KernelError> {
        let per_instance = self.evaluate(ninstances, params, consts, data, Outputs::Residuals)?;
        Ok(per_instance
            .into_iter()
            .flat_map(|output| output.residuals)
            .collect())
    }

    /// Residuals and the row-major `ndata x nparams` Jacobian for every instance.
    pub fn residuals_jacobian(
        &self,
        ninstances: usize,
        params: &[f64],
        consts: &[f64],
        data: &[f64],
    ) -> Result<(Vec<f64>, Vec<f64>), KernelError> {
        let per_instance = self.evaluate(ninstances, params, consts, data, Outputs::Jacobian)?;

        let mut residuals = Vec::with_capacity(ninstances * self.vars.residuals.len());
        let mut jacobian = Vec::with_capacity(ninstances * self.vars.jacobian.len());
        for output in per_instance {
            residuals.extend(output.residuals);
            jacobian.extend(output.jacobian);
        }
        Ok((residuals, jacobian))
    }

    /// Residuals, Jacobian and the symmetric row-major `nparams x nparams` Hessian of
    /// `sum(residuals^2) / 2` for every instance.
    pub fn residuals_jacobian_hessian(
        &self,
        ninstances: usize,
        params: &[f64],
        consts: &[f64],
        data: &[f64],
    ) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>), KernelError> {
        let per_instance = self.evaluate(ninstances, params, consts, data, Outputs::Hessian)?;

        let mut residuals = Vec::with_capacity(ninstances * self.vars.residuals.len());
        let mut jacobian = Vec::with_capacity(ninstances * self.vars.jacobian.len());
        let mut hessian = Vec::with_capacity(ninstances * self.vars.hessian.len());
        for output in per_instance {
            residuals.extend(output.residuals);
            jacobian.extend(output.jacobian);
            hessian.extend(output.hessian);
        }
        Ok((residuals, jacobian, hessian))
    }

    fn evaluate(
        &self,
        ninstances: usize,
        params: &[f64],
        consts: &[f64],
        data: &[f64],
        outputs: Outputs,
    ) -> Result<Vec<InstanceOutput>, KernelError> {
        self.check_lengths(ninstances, params, consts, data)?;

        Ok((0..ninstances)
            .into_par_iter()
            .map(|instance| self.instance(instance, params, consts, data, outputs))
            .collect::<Result<Vec<_>, ExpressionError>>()?)
    }

    fn instance(
        &self,
        instance: usize,
        params: &[f64],
        consts: &[f64],
        data: &[f64],
        outputs: Outputs,
    ) -> Result<InstanceOutput, ExpressionError> {
        let ndata = self.vars.ndata();
        let nparams = self.vars.nparams();
        let nconst = self.vars.nconst();
        let params = slice(&self.vars.params, params, instance);
        let consts = slice(&self.vars.consts, consts, instance);
        let data = slice(&self.vars.data, data, instance);

        let mut output = InstanceOutput {
            residuals: Vec::with_capacity(ndata),
            ..InstanceOutput::default()
        };
        if outputs == Outputs::Hessian {
            output.hessian = vec![0.0; nparams * nparams];
        }

        for row in 0..ndata {
            let lookup = self.lookup(params, &consts[row * nconst..(row + 1) * nconst]);
            let residual = self.model.evaluate(&lookup)? - data[row];
            output.residuals.push(residual);
            if outputs < Outputs::Jacobian {
                continue;
            }

            let start = output.jacobian.len();
            for derivative in &self.jacobian {
                output.jacobian.push(derivative.evaluate(&lookup)?);
            }
            if outputs < Outputs::Hessian {
                continue;
            }

            let gradient = &output.jacobian[start..];
            for (derivative, (j, k)) in self.second.iter().zip(upper_triangle(nparams)) {
                let curvature = derivative.evaluate(&lookup)?;
                output.hessian[j * nparams + k] += gradient[j] * gradient[k] + residual * curvature;
            }
        }

        if outputs == Outputs::Hessian {
            for (j, k) in upper_triangle(nparams).filter(|(j, k)| j != k) {
                output.hessian[k * nparams + j] = output.hessian[j * nparams + k];
            }
        }
        Ok(output)
    }

    fn lookup<'a>(&'a self, params: &'a [f64], row: &'a [f64]) -> impl Fn(&str) -> Option<f64> + 'a {
        move |name: &str| match self.symtext.kind(name)? {
            SymbolKind::Param => params.get(self.symtext.get_params_index(name).ok()?).copied(),
            SymbolKind::Const => row.get(self.symtext.get_consts_index(name).ok()?).copied(),
        }
    }

    fn check_lengths(
        &self,
        ninstances: usize,
        params: &[f64],
        consts: &[f64],
        data: &[f64],
    ) -> Result<(), KernelError> {
        for (variable, buffer) in [
            (&self.vars.params, params),
            (&self.vars.consts, consts),
            (&self.vars.data, data),
        ] {
            let expected = variable.len() * ninstances;
            if buffer.len() != expected {
                return Err(KernelError::BufferLength {
                    buffer: variable.name().to_string(),
                    expected,
                    got: buffer.len(),
                });
            }
        }
        Ok(())
    }
}

/// Index pairs `(j, k)` with `j <= k`, row by row.
fn upper_triangle(n: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..n).flat_map(move |j| (j..n).map(move |k| (j, k)))
}

// Lengths are checked before any instance is evaluated.
fn slice<'b>(variable: &ShaderVariable, buffer: &'b [f64], instance: usize) -> &'b [f64] {
    let start = variable.len() * instance;
    &buffer[start..start + variable.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glsl::nlsq;
    use crate::glsl::shader::Shader;

    const BIEXP: &str = "s0*(f*exp(-b*d1)+(1-f)*exp(-b*d2))";

    fn biexp() -> (Expression, SymbolicContext) {
        let expr = Expression::new(BIEXP, &["s0", "f", "d1", "d2", "b"]).unwrap();
        let mut symtext = SymbolicContext::new();
        symtext.insert_const("b", 0).unwrap();
        symtext.insert_param("s0", 0).unwrap();
        symtext.insert_param("f", 1).unwrap();
        symtext.insert_param("d1", 2).unwrap();
        symtext.insert_param("d2", 3).unwrap();
        (expr, symtext)
    }

    fn oracle(s0: f64, f: f64, d1: f64, d2: f64, b: f64) -> f64 {
        s0 * (f * (-b * d1).exp() + (1.0 - f) * (-b * d2).exp())
    }

    // Reads a kernel right-hand side back as an expression over p0..p3 and c0.
    fn kernel_expression(glsl: &str) -> Expression {
        let mut text = glsl.replace("consts[i*nconst+0]", "c0").replace("sign(", "sgn(");
        for k in 0..4 {
            text = text.replace(&format!("params[{}]", k), &format!("p{}", k));
        }
        Expression::new(&text, &["p0", "p1", "p2", "p3", "c0"]).unwrap()
    }

    fn kernel_value(expr: &Expression, params: &[f64], b: f64) -> f64 {
        expr.evaluate(|name: &str| match name {
            "c0" => Some(b),
            _ => name
                .strip_prefix('p')
                .and_then(|k| k.parse::<usize>().ok())
                .and_then(|k| params.get(k).copied()),
        })
        .unwrap()
    }

    #[test]
    fn test_end_to_end_single_instance() {
        let (expr, symtext) = biexp();
        let params = [0.2041, 0.9306, 0.4506, 0.4654];
        let b = 0.2876;
        let expected = oracle(params[0], params[1], params[2], params[3], b);
        assert!((expected - 0.17923946309141991).abs() < 1e-9);

        let evaluator = HostEvaluator::new(&expr, &symtext, 1).unwrap();
        let residuals = evaluator.residuals(1, &params, &[b], &[0.0]).unwrap();
        assert!((residuals[0] - expected).abs() < 1e-12);

        // the generated kernel text computes the same model
        let vars = NlsqVariables::new(&symtext, 1, ElementType::Float);
        let model = nlsq::model(&expr, &symtext, &vars).unwrap().code();
        let body = model
            .split("\treturn ")
            .nth(1)
            .and_then(|rest| rest.split(";\n").next())
            .unwrap();
        let kernel_model = kernel_expression(body);
        assert!((kernel_value(&kernel_model, &params, b) - expected).abs() < 1e-12);

        // and the same Jacobian
        let code = nlsq::residuals_jacobian(&expr, &symtext, &vars)
            .unwrap()
            .code();
        let (_, host_jacobian) = evaluator
            .residuals_jacobian(1, &params, &[b], &[0.0])
            .unwrap();
        let h = 1e-6;
        for p in 0..4 {
            let prefix = format!("jacobian[i*4+{}] = ", p);
            let rhs = code
                .lines()
                .find_map(|line| line.trim().strip_prefix(prefix.as_str()))
                .and_then(|rest| rest.strip_suffix(';'))
                .unwrap();
            let value = kernel_value(&kernel_expression(rhs), &params, b);

            let mut plus = params;
            let mut minus = params;
            plus[p] += h;
            minus[p] -= h;
            let numeric = (oracle(plus[0], plus[1], plus[2], plus[3], b)
                - oracle(minus[0], minus[1], minus[2], minus[3], b))
                / (2.0 * h);
            assert!((value - numeric).abs() < 1e-6, "param {}", p);
            assert!((value - host_jacobian[p]).abs() < 1e-12, "param {}", p);
        }

        let mut shader = Shader::new();
        shader.add_input_vector(&vars.params, 0).unwrap();
        shader.add_input_matrix(&vars.consts, 1).unwrap();
        shader.add_input_vector(&vars.data, 2).unwrap();
        shader.add_output_vector(&vars.residuals, 3).unwrap();
        shader
            .apply(
                &nlsq::residuals(&expr, &symtext, &vars).unwrap(),
                None,
                &[&vars.params, &vars.consts, &vars.data, &vars.residuals],
            )
            .unwrap();
        let text = shader.compile().unwrap();
        assert!(text.contains(&format!("\treturn {};\n", body)));
        assert!(text.contains("\tnlsq_residuals(params, consts, data, residuals);\n"));
    }

    #[test]
    fn test_hessian_matches_finite_differences() {
        let (expr, symtext) = biexp();
        let evaluator = HostEvaluator::new(&expr, &symtext, 2).unwrap();
        let params = [0.2041, 0.9306, 0.4506, 0.4654];
        let consts = [0.2876, 1.5];
        let data = [0.05, 0.3];

        let (residuals, jacobian, hessian) = evaluator
            .residuals_jacobian_hessian(1, &params, &consts, &data)
            .unwrap();
        assert_eq!(residuals.len(), 2);
        assert_eq!(jacobian.len(), 8);
        assert_eq!(hessian.len(), 16);

        // gradient of sum(r^2)/2 is J^T r
        let gradient = |params: &[f64]| -> Vec<f64> {
            let (r, j) = evaluator
                .residuals_jacobian(1, params, &consts, &data)
                .unwrap();
            (0..4)
                .map(|p| (0..2).map(|row| j[row * 4 + p] * r[row]).sum())
                .collect()
        };

        let h = 1e-6;
        for k in 0..4 {
            let mut plus = params;
            let mut minus = params;
            plus[k] += h;
            minus[k] -= h;
            let (gp, gm) = (gradient(&plus), gradient(&minus));
            for j in 0..4 {
                let numeric = (gp[j] - gm[j]) / (2.0 * h);
                assert!(
                    (hessian[j * 4 + k] - numeric).abs() < 1e-6,
                    "entry ({}, {})",
                    j,
                    k
                );
                assert_eq!(hessian[j * 4 + k], hessian[k * 4 + j]);
            }
        }
    }

    #[test]
    fn test_hessian_of_linear_model_is_gauss_newton() {
        let expr = Expression::new("a*x+c", &["a", "c", "x"]).unwrap();
        let mut symtext = SymbolicContext::new();
        symtext.insert_param("a", 0).unwrap();
        symtext.insert_param("c", 1).unwrap();
        symtext.insert_const("x", 0).unwrap();
        let evaluator = HostEvaluator::new(&expr, &symtext, 3).unwrap();

        let params = [1.0, 2.0, 3.0, 4.0];
        let consts = [0.0, 1.0, 2.0, 1.0, 2.0, 3.0];
        let (_, _, hessian) = evaluator
            .residuals_jacobian_hessian(2, &params, &consts, &[1.0; 6])
            .unwrap();
        // J rows are (x, 1): H = [[sum x^2, sum x], [sum x, n]]
        assert_eq!(hessian, vec![5.0, 3.0, 3.0, 3.0, 14.0, 6.0, 6.0, 3.0]);
    }

    #[test]
    fn test_many_instances() {
        let (expr, symtext) = biexp();
        let ndata = 3;
        let ninstances = 50;
        let evaluator = HostEvaluator::new(&expr, &symtext, ndata).unwrap();

        let params: Vec<f64> = (0..ninstances * 4)
            .map(|i| 0.1 + (i % 7) as f64 * 0.05)
            .collect();
        let consts: Vec<f64> = (0..ninstances * ndata)
            .map(|i| (i % ndata) as f64 * 0.5)
            .collect();
        let data = vec![0.1; ninstances * ndata];

        let residuals = evaluator.residuals(ninstances, &params, &consts, &data).unwrap();
        assert_eq!(residuals.len(), ninstances * ndata);

        for instance in [0, 17, 49] {
            let p = &params[instance * 4..instance * 4 + 4];
            for row in 0..ndata {
                let b = consts[instance * ndata + row];
                let expected = oracle(p[0], p[1], p[2], p[3], b) - 0.1;
                assert!((residuals[instance * ndata + row] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_jacobian_matches_finite_differences() {
        let (expr, symtext) = biexp();
        let evaluator = HostEvaluator::new(&expr, &symtext, 2).unwrap();
        let params = [0.2041, 0.9306, 0.4506, 0.4654];
        let consts = [0.2876, 1.5];
        let data = [0.0, 0.0];

        let (residuals, jacobian) = evaluator
            .residuals_jacobian(1, &params, &consts, &data)
            .unwrap();
        assert_eq!(residuals.len(), 2);
        assert_eq!(jacobian.len(), 8);

        let h = 1e-6;
        for row in 0..2 {
            for p in 0..4 {
                let mut plus = params;
                let mut minus = params;
                plus[p] += h;
                minus[p] -= h;
                let numeric = (evaluator.model_value(&plus, &consts[row..row + 1]).unwrap()
                    - evaluator.model_value(&minus, &consts[row..row + 1]).unwrap())
                    / (2.0 * h);
                assert!(
                    (jacobian[row * 4 + p] - numeric).abs() < 1e-6,
                    "row {} param {}",
                    row,
                    p
                );
            }
        }
    }

    #[test]
    fn test_buffer_length_mismatch() {
        let (expr, symtext) = biexp();
        let evaluator = HostEvaluator::new(&expr, &symtext, 2).unwrap();
        let result = evaluator.residuals(1, &[0.0; 4], &[0.0; 3], &[0.0; 2]);
        assert!(matches!(
            result,
            Err(KernelError::BufferLength { expected: 2, got: 3, .. })
        ));
    }
}
