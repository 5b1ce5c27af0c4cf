//! CLI command implementations.

pub mod hub;
pub mod leaf;
pub mod queue;

/// Result type shared by commands.
pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Prints `value` as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
