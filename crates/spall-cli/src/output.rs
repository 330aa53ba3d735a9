//! Table and status-line rendering.

use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use serde_json::Value;

/// Renders a list of JSON objects as a table with the given columns
/// (keys double as headers).
pub fn json_table(rows: &[Value], columns: &[&str]) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS);
    table.set_header(columns.to_vec());

    for row in rows {
        let cells: Vec<Cell> = columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                let text = match &row[*column] {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                if i == 0 {
                    Cell::new(text).fg(Color::Cyan)
                } else {
                    Cell::new(text)
                }
            })
            .collect();
        table.add_row(cells);
    }
    table.to_string()
}

/// Truncates a content preview to one line of at most `width` chars.
pub fn preview(content: &str, width: usize) -> String {
    let line = content.lines().next().unwrap_or("");
    if line.chars().count() > width {
        let cut: String = line.chars().take(width).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}

pub fn success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn info(message: &str) {
    println!("{} {}", "ℹ".blue(), message);
}

pub fn error(message: &str) {
    eprintln!("{} {}", "✗".red(), message.red());
}
