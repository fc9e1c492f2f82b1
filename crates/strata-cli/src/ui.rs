//! Terminal output helpers.

use colored::Colorize;

pub fn success(msg: &str) {
    println!("  {} {}", "\u{2714}".bright_green(), msg);
}

pub fn error(msg: &str) {
    eprintln!("  {} {}", "\u{2718}".bright_red(), msg.bright_red());
}

/// Red error + yellow "fix:" suggestion.
pub fn error_with_fix(msg: &str, fix: &str) {
    eprintln!("  {} {}", "\u{2718}".bright_red(), msg.bright_red());
    eprintln!("    {} {}", "fix:".bright_yellow(), fix);
}

/// Section header: ">> Title" in cyan.
pub fn section(title: &str) {
    println!("  {} {}", ">>".bright_cyan().bold(), title.bold());
}

/// Key-value display: "  Label:       value".
pub fn kv(label: &str, value: &str) {
    println!("  {:<13}{}", format!("{label}:"), value);
}

pub fn kv_ok(label: &str, value: &str) {
    println!("  {:<13}{}", format!("{label}:"), value.bright_green());
}

pub fn kv_warn(label: &str, value: &str) {
    println!("  {:<13}{}", format!("{label}:"), value.bright_yellow());
}

/// Hint line in dimmed text.
pub fn hint(msg: &str) {
    println!("  {} {}", "hint:".dimmed(), msg.dimmed());
}

pub fn blank() {
    println!();
}

/// Pretty-print a serializable value as JSON on stdout.
pub fn json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => error(&format!("Failed to encode JSON: {e}")),
    }
}

/// Collapse whitespace and cut to `max` characters with an ellipsis.
pub fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview() {
        assert_eq!(preview("short\n  text", 40), "short text");
        assert_eq!(preview("abcdefghij", 8), "abcde...");
        assert_eq!(preview("héllo wörld", 11), "héllo wörld");
    }
}
