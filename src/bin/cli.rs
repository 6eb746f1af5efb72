use clap::Parser;
use log::info;
use shadergen::errors::KernelError;
use shadergen::glsl::print::{add_line_numbers, format_instance};
use shadergen::prelude::*;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "shadergen")]
#[command(about = "Generate GLSL least-squares kernels from mathematical expressions")]
#[command(version)]
struct Args {
    /// JSON kernel description
    #[arg(long, conflicts_with = "expression")]
    spec: Option<PathBuf>,

    /// Model expression, e.g. "s0*exp(-b*adc)"
    #[arg(short, long, required_unless_present = "spec")]
    expression: Option<String>,

    /// Param name; repeat in index order
    #[arg(short, long = "param")]
    params: Vec<String>,

    /// Const name; repeat in index order
    #[arg(short, long = "const")]
    consts: Vec<String>,

    /// Data rows per instance
    #[arg(long, default_value_t = 1)]
    ndata: usize,

    /// Also compute the Jacobian with respect to the params
    #[arg(long)]
    jacobian: bool,

    /// Also compute the Hessian of the summed squared residuals; implies --jacobian
    #[arg(long)]
    hessian: bool,

    /// Use double precision buffers
    #[arg(long)]
    double: bool,

    /// Prefix kernel lines with line numbers
    #[arg(long)]
    line_numbers: bool,

    /// Evaluate the model on the host for one instance: param values, then const values row by row
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    sample: Option<Vec<f64>>,

    /// Compile the kernel to SPIR-V inside this directory
    #[arg(long)]
    compile: Option<PathBuf>,

    /// Run spirv-opt and spirv-remap after compiling
    #[arg(long)]
    optimize: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), KernelError> {
    let spec = match &args.spec {
        Some(path) => KernelSpec::from_file(path)?,
        None => KernelSpec {
            expression: args.expression.clone().unwrap_or_default(),
            params: args.params.clone(),
            consts: args.consts.clone(),
            ndata: args.ndata,
            jacobian: args.jacobian,
            hessian: args.hessian,
            precision: if args.double {
                ElementType::Double
            } else {
                ElementType::Float
            },
            shader: ShaderConfig::default(),
            names: SymbolNames::default(),
            optimization: Optimization::none(),
        },
    };

    let kernel = spec.build()?;
    let text = kernel.shader.compile()?;

    if args.line_numbers {
        println!("{}", add_line_numbers(&text));
    } else {
        print!("{}", text);
    }

    if let Some(sample) = &args.sample {
        let evaluator = HostEvaluator::new(&kernel.expression, &kernel.symtext, spec.ndata)?;
        let nparams = kernel.symtext.nparams();
        let (params, consts) = sample.split_at(nparams.min(sample.len()));
        let data = vec![0.0; spec.ndata];
        let values = evaluator.residuals(1, params, consts, &data)?;

        println!("model values for '{}':", kernel.expression);
        if let Some(line) = format_instance(&evaluator.variables().residuals, &values, 0) {
            println!("{}", line);
        }
    }

    if let Some(dir) = &args.compile {
        let optimization = if args.optimize {
            Optimization::all()
        } else {
            spec.optimization
        };
        let words = GlslangCompiler::new(dir).compile(&text, optimization)?;
        info!("compiled {} SPIR-V words into {}", words.len(), dir.display());
        eprintln!("SPIR-V: {} words", words.len());
    }

    Ok(())
}
