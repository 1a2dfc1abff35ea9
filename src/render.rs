//! Table rendering of counter rows and dispatch statistics.
//!
//! This module requires the `table` feature:
//!
//! ```toml
//! [dependencies]
//! contesa = { version = "0.1", features = ["table"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use contesa::render::{TableRenderer, TableStyle};
//!
//! let renderer = TableRenderer::new().with_style(TableStyle::Rounded);
//! println!("{}", renderer.render_rows(&dispatcher.list_rows()?));
//! // ╭────┬───────╮
//! // │ Id │ Value │
//! // ├────┼───────┤
//! // │ 1  │ 0     │
//! // │ 2  │ 0     │
//! // ╰────┴───────╯
//! ```

use tabled::settings::object::Rows;
use tabled::settings::{Remove, Style};
use tabled::{Table, Tabled};

use crate::stats::StatsSnapshot;
use crate::store::CounterRow;

/// Available table styles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TableStyle {
    /// ASCII table with simple characters: +, -, |
    Ascii,
    /// Modern rounded corners (default)
    #[default]
    Rounded,
    /// Sharp corners with box-drawing characters
    Sharp,
    /// GitHub-flavored Markdown table
    Markdown,
    /// No borders, just spacing
    Blank,
}

/// Configuration for the renderer.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// The style to use for rendering.
    pub style: TableStyle,
    /// Whether to show the header row.
    pub show_header: bool,
    /// Custom title printed above the table (optional).
    pub title: Option<String>,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            style: TableStyle::default(),
            show_header: true,
            title: None,
        }
    }
}

#[derive(Tabled)]
struct RowLine {
    #[tabled(rename = "Id")]
    id: i64,
    #[tabled(rename = "Value")]
    value: i64,
}

#[derive(Tabled)]
struct StatsLine {
    #[tabled(rename = "Strategy")]
    strategy: String,
    #[tabled(rename = "Allocated")]
    allocated: u64,
    #[tabled(rename = "Busy")]
    busy: u64,
    #[tabled(rename = "Failed")]
    failed: u64,
}

/// Renders rows and statistics as formatted tables.
#[derive(Debug, Clone, Default)]
pub struct TableRenderer {
    config: TableConfig,
}

impl TableRenderer {
    /// Creates a renderer with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a renderer with the specified configuration.
    pub fn with_config(config: TableConfig) -> Self {
        Self { config }
    }

    /// Sets the table style.
    pub fn with_style(mut self, style: TableStyle) -> Self {
        self.config.style = style;
        self
    }

    /// Sets whether to show the header row.
    pub fn with_header(mut self, show: bool) -> Self {
        self.config.show_header = show;
        self
    }

    /// Sets a title printed above the table.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.config.title = Some(title.into());
        self
    }

    /// Renders counter rows, one line per row.
    pub fn render_rows(&self, rows: &[CounterRow]) -> String {
        let lines = rows.iter().map(|row| RowLine {
            id: row.id,
            value: row.value,
        });
        self.finish(Table::new(lines))
    }

    /// Renders a statistics snapshot, one line per strategy.
    pub fn render_stats(&self, stats: &StatsSnapshot) -> String {
        let lines = stats.strategies.iter().map(|entry| StatsLine {
            strategy: entry.strategy.to_string(),
            allocated: entry.allocated,
            busy: entry.busy,
            failed: entry.failed,
        });
        self.finish(Table::new(lines))
    }

    fn finish(&self, mut table: Table) -> String {
        match self.config.style {
            TableStyle::Ascii => table.with(Style::ascii()),
            TableStyle::Rounded => table.with(Style::rounded()),
            TableStyle::Sharp => table.with(Style::sharp()),
            TableStyle::Markdown => table.with(Style::markdown()),
            TableStyle::Blank => table.with(Style::blank()),
        };

        if !self.config.show_header {
            table.with(Remove::row(Rows::first()));
        }

        match &self.config.title {
            Some(title) => format!("{}\n{}", title, table),
            None => table.to_string(),
        }
    }
}
