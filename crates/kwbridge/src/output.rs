use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
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
struct MessageOutput<'a> {
    kind: &'a str,
    size: usize,
    message: &'a Value,
    timestamp: String,
}

/// Print one message received from the broker.
pub fn print_message(message: &Value, format: OutputFormat) {
    let kind = if message.get("error").is_some() {
        "error"
    } else {
        "response"
    };
    let text = message.to_string();

    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                kind,
                size: text.len(),
                message,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "SIZE", "MESSAGE"])
                .add_row(vec![kind.to_string(), text.len().to_string(), text]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let pretty = serde_json::to_string_pretty(message).unwrap_or(text);
            println!("{kind}:\n{pretty}");
        }
        OutputFormat::Raw => print_raw(text.as_bytes()),
    }
}

/// Print `(field, value)` pairs.
pub fn print_record(fields: &[(&str, String)], format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => {
            let map: serde_json::Map<String, Value> = fields
                .iter()
                .map(|(key, value)| ((*key).to_string(), Value::String(value.clone())))
                .collect();
            println!("{}", Value::Object(map));
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (key, value) in fields {
                table.add_row(vec![(*key).to_string(), value.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (key, value) in fields {
                println!("{key}: {value}");
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.write_all(b"\n");
    let _ = out.flush();
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
