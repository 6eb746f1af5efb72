//! Text helpers for inspecting kernels and their buffers.

use itertools::Itertools;

use super::variable::ShaderVariable;

const NUMBER_WIDTH: usize = 15;
const SEPARATOR: &str = "  ";

/// Prefixes every line with its 1-based number, right-aligned to the widest number.
pub fn add_line_numbers(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let width = lines.len().to_string().len();
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{:>width$}: {}", i + 1, line, width = width))
        .join("\n")
}

/// Formats one instance's slice of `buffer` as laid out for `variable`.
///
/// Matrices print one row per line. Returns `None` when the buffer is too short to hold the
/// instance.
pub fn format_instance(variable: &ShaderVariable, buffer: &[f64], instance: usize) -> Option<String> {
    let start = variable.len() * instance;
    let values = buffer.get(start..start + variable.len())?;
    let number = |value: &f64| format!("{:>width$}", value, width = NUMBER_WIDTH);

    let text = match variable {
        ShaderVariable::Matrix { cols, .. } if *cols > 0 => values
            .chunks(*cols)
            .map(|row| row.iter().map(number).join(SEPARATOR))
            .join("\n"),
        _ => values.iter().map(number).join(SEPARATOR),
    };
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glsl::variable::ElementType;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_line_numbers() {
        let text = (1..=10).map(|i| format!("line{}", i)).join("\n");
        let numbered = add_line_numbers(&text);
        let lines: Vec<&str> = numbered.lines().collect();
        assert_eq!(lines[0], " 1: line1");
        assert_eq!(lines[9], "10: line10");
    }

    #[test]
    fn test_format_matrix_instance() {
        let matrix = ShaderVariable::matrix("m", 2, 2, ElementType::Float);
        let buffer = [0.0, 0.0, 0.0, 0.0, 1.0, 2.5, -3.0, 4.0];
        let text = format_instance(&matrix, &buffer, 1).unwrap();
        assert_eq!(
            text,
            format!(
                "{:>15}  {:>15}\n{:>15}  {:>15}",
                "1", "2.5", "-3", "4"
            )
        );
        assert!(format_instance(&matrix, &buffer, 2).is_none());
    }

    #[test]
    fn test_format_single_instance() {
        let single = ShaderVariable::single("lambda", ElementType::Float);
        let text = format_instance(&single, &[0.5, 0.25], 1).unwrap();
        assert_eq!(text, format!("{:>15}", "0.25"));
    }
}
