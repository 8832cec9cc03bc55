use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::{Map, Value};

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

/// Something a session received from the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Ack,
    Status,
    Event,
}

impl RecordKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Status => "status",
            Self::Event => "event",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub kind: RecordKind,
    pub sid: String,
    pub body: Value,
    pub timestamp: String,
}

impl Record {
    pub fn new(kind: RecordKind, sid: &str, body: Value) -> Self {
        Self {
            kind,
            sid: sid.to_string(),
            body,
            timestamp: now_unix_seconds(),
        }
    }

    pub fn ack(sid: &str, body: Map<String, Value>) -> Self {
        Self::new(RecordKind::Ack, sid, Value::Object(body))
    }

    pub fn status(sid: &str, status: &str) -> Self {
        Self::new(RecordKind::Status, sid, Value::from(status))
    }
}

pub fn print_record(record: &Record, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "SESSION", "BODY"])
                .add_row(vec![
                    record.kind.as_str().to_string(),
                    record.sid.clone(),
                    body_text(&record.body),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} sid={} {}",
                record.kind.as_str(),
                record.sid,
                body_text(&record.body)
            );
        }
    }
}

fn body_text(body: &Value) -> String {
    match body {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
