use renderwatch_core::config::{ConfigWarning, WarnLevel};
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

/// Column alignment. Counts and percentages read best flush right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub title: &'static str,
    pub align: Align,
}

pub const fn left(title: &'static str) -> Column {
    Column {
        title,
        align: Align::Left,
    }
}

pub const fn right(title: &'static str) -> Column {
    Column {
        title,
        align: Align::Right,
    }
}

fn pad(cell: &str, width: usize, align: Align) -> String {
    match align {
        Align::Left => format!("{cell:<width$}"),
        Align::Right => format!("{cell:>width$}"),
    }
}

fn render_row<'a>(
    columns: &[Column],
    widths: &[usize],
    cells: impl Iterator<Item = &'a str>,
) -> String {
    let line = cells
        .zip(columns.iter().zip(widths))
        .map(|(cell, (col, &w))| pad(cell, w, col.align))
        .collect::<Vec<_>>()
        .join("  ");
    format!("{}\n", line.trim_end())
}

/// Lay out `rows` under `columns`. Cells beyond the last column are dropped.
pub fn render_table(columns: &[Column], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = columns.iter().map(|c| c.title.chars().count()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let mut out = render_row(columns, &widths, columns.iter().map(|c| c.title));
    let rule: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    out.push_str(&rule.join("  "));
    out.push('\n');
    for row in rows {
        out.push_str(&render_row(columns, &widths, row.iter().map(String::as_str)));
    }
    out
}

pub fn print_table(columns: &[Column], rows: Vec<Vec<String>>) {
    print!("{}", render_table(columns, &rows));
}

pub fn print_warnings(warnings: &[ConfigWarning]) {
    for w in warnings {
        let prefix = match w.level {
            WarnLevel::Warning => "warning",
            WarnLevel::Error => "error",
        };
        println!("[{prefix}] {}", w.message);
    }
}

pub fn has_errors(warnings: &[ConfigWarning]) -> bool {
    warnings.iter().any(|w| w.level == WarnLevel::Error)
}
