use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Something the CLI prints as one row per item.
pub trait Row: Serialize {
    fn header() -> Vec<&'static str>;
    fn cells(&self) -> Vec<String>;
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

/// Print `rows` in `format`. JSON output wraps the rows in `envelope`.
pub fn print_rows<R: Row, E: Serialize>(rows: &[R], envelope: &E, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(envelope),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(R::header());
            for row in rows {
                table.add_row(row.cells());
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let header = R::header();
            for row in rows {
                let line = header
                    .iter()
                    .zip(row.cells())
                    .map(|(name, cell)| format!("{}={cell}", name.to_ascii_lowercase()))
                    .collect::<Vec<_>>()
                    .join(" ");
                println!("{line}");
            }
        }
    }
}
