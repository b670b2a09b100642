//! Terminal output helpers.

use console::style;
use serde::Serialize;

pub fn print_json<T: Serialize + ?Sized>(data: &T) -> vigil_core::Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

pub fn print_success(message: &str) {
    println!("{} {}", style("✓").green(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", style("✗").red(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", style("⚠").yellow(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", style("ℹ").blue(), message);
}

/// Truncate to `max` characters on one line, appending "..." if cut.
pub fn truncate(s: &str, max: usize) -> String {
    let flat = s.replace('\n', " ");
    match flat.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}
