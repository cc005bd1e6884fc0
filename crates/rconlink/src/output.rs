use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use rconlink_session::{Catalogue, CommandOutcome};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
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

#[derive(Serialize)]
pub struct OutcomeOutput<'a> {
    pub server: &'a str,
    pub command: &'a str,
    pub via: &'a str,
    pub elapsed_ms: f64,
    #[serde(flatten)]
    pub outcome: &'a CommandOutcome,
}

pub fn print_outcome(out: &OutcomeOutput<'_>, format: OutputFormat) {
    let (status, detail) = match out.outcome {
        CommandOutcome::Completed(value) => ("completed".to_string(), value_text(value)),
        CommandOutcome::Rejected(failure) => (
            format!("rejected: {failure}"),
            value_text(&failure.detail),
        ),
    };
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SERVER", "COMMAND", "VIA", "MS", "STATUS", "RESULT"])
                .add_row(vec![
                    out.server.to_string(),
                    out.command.to_string(),
                    out.via.to_string(),
                    format!("{:.1}", out.elapsed_ms),
                    status,
                    detail,
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "server={} command={} via={} ms={:.1} status={}",
                out.server, out.command, out.via, out.elapsed_ms, status
            );
            println!("{detail}");
        }
        OutputFormat::Raw => {
            let value = match out.outcome {
                CommandOutcome::Completed(value) => value,
                CommandOutcome::Rejected(failure) => &failure.detail,
            };
            print_raw(value_text(value).as_bytes());
            println!();
        }
    }
}

#[derive(Serialize)]
struct CatalogueOutput<'a> {
    server: &'a str,
    via: &'a str,
    count: usize,
    #[serde(flatten)]
    catalogue: &'a Catalogue,
}

pub fn print_catalogue(server: &str, via: &str, catalogue: &Catalogue, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&CatalogueOutput {
            server,
            via,
            count: catalogue.len(),
            catalogue,
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COMMAND", "METHOD", "ARGS"]);
            for info in catalogue.commands() {
                table.add_row(vec![
                    info.name.clone(),
                    info.method.clone().unwrap_or_default(),
                    info.args.join(", "),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for name in catalogue.names() {
                println!("{name}");
            }
        }
    }
}

/// Key/value report rendered as a two-column table.
pub fn print_report<T: Serialize>(report: &T, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(report),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (key, value) in report_fields(report) {
                table.add_row(vec![key, value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let line: Vec<String> = report_fields(report)
                .into_iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            println!("{}", line.join(" "));
        }
    }
}

/// Rows as a JSON array, or a table built with `cells`.
pub fn print_rows<T, F>(rows: &[T], headers: &[&str], cells: F, format: OutputFormat)
where
    T: Serialize,
    F: Fn(&T) -> Vec<String>,
{
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(rows),
        OutputFormat::Table | OutputFormat::Pretty => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(headers.to_vec());
            for row in rows {
                table.add_row(cells(row));
            }
            println!("{table}");
        }
    }
}

fn report_fields<T: Serialize>(report: &T) -> Vec<(String, String)> {
    match serde_json::to_value(report) {
        Ok(Value::Object(map)) => map
            .into_iter()
            .map(|(key, value)| (key, value_text(&value)))
            .collect(),
        _ => Vec::new(),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Strings print bare, `null` prints empty, everything else as JSON.
fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
