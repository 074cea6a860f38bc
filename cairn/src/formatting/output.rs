//! Headers, key-value lines and summary boxes.

use owo_colors::OwoColorize;

/// Prints a section header followed by a blank line.
pub fn print_section_header(title: &str) {
    println!("{}", title.cyan().bold());
    println!();
}

/// Prints a titled box of key-value rows with aligned keys.
pub fn print_summary_box(title: &str, items: &[(&str, &str)]) {
    let width = items.iter().map(|(key, _)| key.len()).max().unwrap_or(0);

    println!("┌─ {} {}", title.cyan().bold(), "─".repeat(50).bright_black());
    for (key, value) in items {
        println!(
            "│ {} {}",
            format!("{:<width$}", key, width = width).bright_black().bold(),
            value.bold()
        );
    }
    println!("└{}", "─".repeat(60).bright_black());
}

pub fn print_key_value(key: &str, value: &str) {
    println!("  {} {}", format!("{}:", key).bright_black().bold(), value.bold().white());
}

/// Formats a duration in seconds, e.g. `850ms`, `2.41s` or `3m 12.0s`.
pub fn format_duration(seconds: f64) -> String {
    if seconds < 1.0 {
        format!("{:.0}ms", seconds * 1000.0)
    } else if seconds < 60.0 {
        format!("{:.2}s", seconds)
    } else {
        let mins = (seconds / 60.0) as u64;
        let secs = seconds % 60.0;
        format!("{}m {:.1}s", mins, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.85), "850ms");
        assert_eq!(format_duration(2.412), "2.41s");
        assert_eq!(format_duration(192.0), "3m 12.0s");
    }
}
