//! Console messages for the user
//!
//! Logging goes through `tracing`; these are the few lines that are always
//! shown, such as the final success or failure of a run.

use colored::Colorize;

/// Print a success confirmation
pub fn success(message: &str) {
    eprintln!("{}", message.green());
}

/// Print an error
pub fn error(message: &str) {
    eprintln!("{} {}", "Error:".red().bold(), message);
}

/// Print a warning
pub fn warning(message: &str) {
    eprintln!("{} {}", "Warning:".yellow().bold(), message);
}

/// Format a task listing line
pub fn task_line(name: &str, description: &str) -> String {
    if description.is_empty() {
        format!("  {}", name.cyan())
    } else {
        format!("  {:<20} {}", name.cyan(), description)
    }
}
