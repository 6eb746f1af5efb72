//! Downstream compilation of kernel text to SPIR-V.
//!
//! The crate does not optimize kernels itself. [`GlslangCompiler`] hands the text to
//! `glslangValidator` and, on request, runs `spirv-opt` and `spirv-remap` over the result.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::errors::CompileError;

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

const SOURCE_FILE: &str = "kernel.comp";
const BINARY_FILE: &str = "kernel.comp.spv";

/// Post-processing applied to the compiled binary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Optimization {
    /// Run `spirv-opt -O`
    pub speed: bool,
    /// Run `spirv-remap --do-everything`
    pub remap: bool,
}

impl Optimization {
    pub fn none() -> Self {
        Optimization::default()
    }

    pub fn all() -> Self {
        Optimization {
            speed: true,
            remap: true,
        }
    }
}

/// Turns kernel text into an executable binary.
pub trait KernelCompiler {
    fn compile(&self, source: &str, optimization: Optimization) -> Result<Vec<u32>, CompileError>;
}

/// Compiles through the Khronos command line tools, which must be on `PATH`.
#[derive(Debug, Clone)]
pub struct GlslangCompiler {
    work_dir: PathBuf,
    validator: String,
    optimizer: String,
    remapper: String,
}

impl GlslangCompiler {
    /// Intermediate files are written to `work_dir`, which is created if missing.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        GlslangCompiler {
            work_dir: work_dir.into(),
            validator: "glslangValidator".to_string(),
            optimizer: "spirv-opt".to_string(),
            remapper: "spirv-remap".to_string(),
        }
    }

    /// Overrides the tool executables.
    pub fn with_tools(mut self, validator: &str, optimizer: &str, remapper: &str) -> Self {
        self.validator = validator.to_string();
        self.optimizer = optimizer.to_string();
        self.remapper = remapper.to_string();
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn run<I, S>(&self, tool: &str, args: I) -> Result<(), CompileError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        debug!("running {}", tool);
        let output = Command::new(tool)
            .args(args)
            .current_dir(&self.work_dir)
            .output()
            .map_err(|e| CompileError::Spawn {
                tool: tool.to_string(),
                message: e.to_string(),
            })?;

        if output.status.success() {
            return Ok(());
        }

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        warn!("{} exited with {}", tool, output.status);
        Err(CompileError::ToolFailed {
            tool: tool.to_string(),
            output: text,
        })
    }
}

impl KernelCompiler for GlslangCompiler {
    fn compile(&self, source: &str, optimization: Optimization) -> Result<Vec<u32>, CompileError> {
        fs::create_dir_all(&self.work_dir)?;
        fs::write(self.work_dir.join(SOURCE_FILE), source)?;

        self.run(&self.validator, ["-V", SOURCE_FILE, "-o", BINARY_FILE])?;
        if optimization.speed {
            self.run(&self.optimizer, ["-O", BINARY_FILE, "-o", BINARY_FILE])?;
        }
        if optimization.remap {
            self.run(
                &self.remapper,
                ["--do-everything", "--input", BINARY_FILE, "--output", "."],
            )?;
        }

        let bytes = fs::read(self.work_dir.join(BINARY_FILE))?;
        words_from_bytes(&bytes)
    }
}

/// Reinterprets a little-endian SPIR-V file as 32-bit words and checks the magic number.
pub fn words_from_bytes(bytes: &[u8]) -> Result<Vec<u32>, CompileError> {
    if bytes.len() % 4 != 0 {
        return Err(CompileError::InvalidBinary(bytes.len()));
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
        .collect();
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&other) => Err(CompileError::InvalidMagic(other)),
        None => Err(CompileError::InvalidBinary(0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_from_bytes() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        assert_eq!(words_from_bytes(&bytes).unwrap(), vec![SPIRV_MAGIC, 0x0001_0000]);

        assert!(matches!(
            words_from_bytes(&bytes[..5]),
            Err(CompileError::InvalidBinary(5))
        ));
        assert!(matches!(
            words_from_bytes(&[]),
            Err(CompileError::InvalidBinary(0))
        ));
        assert!(matches!(
            words_from_bytes(&[1, 0, 0, 0]),
            Err(CompileError::InvalidMagic(1))
        ));
    }

    #[test]
    fn test_missing_tool() {
        let dir = std::env::temp_dir().join(format!("shadergen-test-{}", std::process::id()));
        let compiler = GlslangCompiler::new(&dir).with_tools(
            "shadergen-no-such-validator",
            "spirv-opt",
            "spirv-remap",
        );
        let result = compiler.compile("#version 450\nvoid main() {}\n", Optimization::none());
        assert!(matches!(
            result,
            Err(CompileError::Spawn { tool, .. }) if tool == "shadergen-no-such-validator"
        ));
        assert!(dir.join(SOURCE_FILE).exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_optimization_flags() {
        assert_eq!(Optimization::none(), Optimization { speed: false, remap: false });
        assert!(Optimization::all().speed && Optimization::all().remap);
    }
}
