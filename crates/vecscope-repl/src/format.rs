//! Output formatting for REPL results

use std::time::Duration;

use colored::*;
use vecscope_client::{DiscoveredAttribute, EngineState, HistoryEntry, default_visible_columns};
use vecscope_common::{Document, Value};

/// Columns shown besides `id`.
const MAX_COLUMNS: usize = 6;

/// Handles formatting of pages, schemas and history.
pub struct Formatter {
    /// Maximum column width before truncation
    max_col_width: usize,
}

impl Formatter {
    pub fn new() -> Self {
        Self { max_col_width: 40 }
    }

    /// Print the current page with a status line.
    pub fn format_page(&self, state: &EngineState, elapsed: Duration) {
        if state.documents.is_empty() {
            println!("{}", "(no documents)".dimmed());
        } else {
            let columns = default_visible_columns(&state.attributes, MAX_COLUMNS);
            self.format_table(&state.documents, &columns);
        }

        let total = state
            .total_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!(
            "\nPage {} of {} ({} row(s), {} total)",
            state.query.current_page().to_string().bold(),
            state.total_pages().unwrap_or(1),
            state.documents.len(),
            total
        );
        println!("{}", format!("({:.2?})", elapsed).dimmed());
        println!();
    }

    /// Format documents as a table with box-drawing characters
    fn format_table(&self, documents: &[Document], columns: &[String]) {
        let cells: Vec<Vec<String>> = documents
            .iter()
            .map(|doc| columns.iter().map(|col| self.get_cell_string(doc.get(col))).collect())
            .collect();

        let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
        for row in &cells {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count()).min(self.max_col_width);
            }
        }

        self.print_table_border(&widths, '┌', '┬', '┐');

        print!("│");
        for (i, col) in columns.iter().enumerate() {
            let display = self.truncate(col, widths[i]);
            print!(" {} │", pad(&display, widths[i]).bold().cyan());
        }
        println!();

        self.print_table_border(&widths, '├', '┼', '┤');

        for (doc, row) in documents.iter().zip(&cells) {
            print!("│");
            for (i, cell) in row.iter().enumerate() {
                let display = pad(&self.truncate(cell, widths[i]), widths[i]);
                print!(" {} │", colorize_cell(&display, doc.get(&columns[i])));
            }
            println!();
        }

        self.print_table_border(&widths, '└', '┴', '┘');
    }

    fn print_table_border(&self, widths: &[usize], left: char, mid: char, right: char) {
        print!("{}", left);
        for (i, width) in widths.iter().enumerate() {
            print!("{}", "─".repeat(width + 2));
            if i < widths.len() - 1 {
                print!("{}", mid);
            }
        }
        println!("{}", right);
    }

    fn get_cell_string(&self, val: Option<&Value>) -> String {
        match val {
            None | Some(Value::Null) => "NULL".to_string(),
            Some(v) => v.to_display_string(),
        }
    }

    fn truncate(&self, s: &str, width: usize) -> String {
        if s.chars().count() <= width {
            s.to_string()
        } else {
            let kept: String = s.chars().take(width.saturating_sub(1)).collect();
            format!("{kept}…")
        }
    }

    /// Print discovered attributes, most frequent first.
    pub fn format_attributes(&self, attributes: &[DiscoveredAttribute]) {
        if attributes.is_empty() {
            println!("{}", "(no attributes discovered)".dimmed());
            println!();
            return;
        }

        let name_width = attributes.iter().map(|a| a.name.len()).max().unwrap_or(0);
        for attr in attributes {
            let mut ty = format!("{:?}", attr.attr_type).to_lowercase();
            if let Some(element) = &attr.array_element_type {
                ty = format!("{ty}<{}>", format!("{element:?}").to_lowercase());
            }

            let mut details = vec![format!("{}/{}", attr.frequency, attr.total_documents)];
            if attr.is_nullable {
                details.push("nullable".to_string());
            }
            if let Some(range) = &attr.range {
                details.push(format!("{}..{}", range.min, range.max));
            }
            if let Some(values) = &attr.unique_values {
                let shown: Vec<String> = values.iter().take(5).map(Value::to_display_string).collect();
                let more = if values.len() > 5 { ", …" } else { "" };
                details.push(format!("[{}{more}]", shown.join(", ")));
            }
            if let Some(patterns) = &attr.common_patterns {
                let names: Vec<String> = patterns.iter().map(|p| format!("{p:?}").to_lowercase()).collect();
                details.push(names.join(","));
            }

            println!(
                "  {:<width$}  {}  {}",
                attr.name.bold(),
                ty.cyan(),
                details.join("  ").dimmed(),
                width = name_width
            );
        }
        println!();
    }

    /// Print history entries, newest first, numbered for `:restore`.
    pub fn format_history(&self, entries: &[HistoryEntry]) {
        if entries.is_empty() {
            println!("{}", "(no history)".dimmed());
            println!();
            return;
        }
        for (i, entry) in entries.iter().enumerate() {
            println!(
                "{} {}  {}",
                format!("{:>3})", i + 1).dimmed(),
                entry.description,
                entry.timestamp.format("%H:%M:%S").to_string().dimmed()
            );
        }
        println!();
    }
}

fn pad(s: &str, width: usize) -> String {
    let len = s.chars().count();
    format!("{s}{}", " ".repeat(width.saturating_sub(len)))
}

fn colorize_cell(display: &str, val: Option<&Value>) -> ColoredString {
    match val {
        None | Some(Value::Null) => display.dimmed(),
        Some(Value::Bool(true)) => display.green(),
        Some(Value::Bool(false)) => display.red(),
        Some(Value::Int(_) | Value::Float(_)) => display.cyan(),
        Some(Value::String(_)) => display.yellow(),
        _ => display.normal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        let f = Formatter::new();
        assert_eq!(f.truncate("short", 10), "short");
        assert_eq!(f.truncate("a longer value", 6), "a lon…");
    }

    #[test]
    fn test_pad_counts_chars() {
        assert_eq!(pad("é", 3), "é  ");
        assert_eq!(pad("wide", 2), "wide");
    }

    #[test]
    fn test_null_cell() {
        let f = Formatter::new();
        assert_eq!(f.get_cell_string(None), "NULL");
        assert_eq!(f.get_cell_string(Some(&Value::Int(3))), "3");
    }
}
