//! Compact output rendering helpers for CLI surfaces.

use colored::Colorize;

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Print a titled list of names, one per line, or a dimmed placeholder.
pub fn print_names(title: &str, names: &[String]) {
    println!("{}", title.bold());
    if names.is_empty() {
        println!("  {}", "(none)".dimmed());
        return;
    }
    for name in names {
        println!("  {} {}", "▸".bright_cyan(), name);
    }
}

pub fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("{}", value),
    }
}
