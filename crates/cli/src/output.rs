//! Output formatting utilities

use anyhow::Result;
use ccopt_lib::Action;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Pretty-print any serializable value as JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print rows as a rounded table
pub fn print_table<T: Tabled>(rows: Vec<T>) {
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print a section heading with an underline
pub fn print_heading(title: &str, underline: char) {
    println!("{}", title.bold());
    println!("{}", underline.to_string().repeat(50));
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format currency in US dollars
pub fn format_currency(amount: f64) -> String {
    format!("${:.2}", amount)
}

/// Format a 0..1 ratio as a percentage
pub fn format_percent(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

/// Color an action: downsize stands out, keep stays plain
pub fn color_action(action: Action) -> String {
    match action {
        Action::Downsize => action.to_string().green().bold().to_string(),
        Action::Keep => action.to_string(),
    }
}

/// Color the downsize probability by how decisive it is
pub fn color_confidence(confidence: f64) -> String {
    let formatted = format!("{:.0}%", confidence * 100.0);
    let decisiveness = (confidence - 0.5).abs();
    if decisiveness >= 0.3 {
        formatted.green().to_string()
    } else if decisiveness >= 0.1 {
        formatted.yellow().to_string()
    } else {
        formatted.red().to_string()
    }
}

/// Format timestamp for display
pub fn format_timestamp(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_currency_and_percent() {
        assert_eq!(format_currency(28.8), "$28.80");
        assert_eq!(format_percent(0.923), "92.3%");
    }

    #[test]
    fn test_confidence_keeps_percentage_text() {
        colored::control::set_override(false);
        assert_eq!(color_confidence(0.95), "95%");
        assert_eq!(color_confidence(0.52), "52%");
        assert_eq!(color_action(Action::Keep), "keep");
    }
}
