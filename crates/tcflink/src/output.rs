use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;
use tcflink_codec::{decode_args, Message};

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
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
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    service: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    args: Vec<Value>,
    args_size: usize,
    peer: &'a str,
    timestamp: String,
}

impl<'a> MessageOutput<'a> {
    fn new(msg: &'a Message, peer: &'a str) -> Self {
        Self {
            kind: kind_name(msg),
            token: msg.token().map(ToString::to_string),
            service: msg.service(),
            name: msg.name(),
            args: args_preview(msg),
            args_size: msg.args().len(),
            peer,
            timestamp: now_unix_seconds(),
        }
    }
}

pub fn print_message(msg: &Message, peer: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput::new(msg, peer);
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let out = MessageOutput::new(msg, peer);
            let args = out
                .args
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join("\n");
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "TOKEN", "SERVICE", "NAME", "PEER", "ARGS"])
                .add_row(vec![
                    out.kind.to_string(),
                    out.token.unwrap_or_default(),
                    out.service.unwrap_or_default().to_string(),
                    out.name.unwrap_or_default().to_string(),
                    peer.to_string(),
                    args,
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{msg} (peer={peer})"),
        OutputFormat::Raw => {
            let mut buf = BytesMut::new();
            msg.encode(&mut buf);
            print_raw(&buf);
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn kind_name(msg: &Message) -> &'static str {
    match msg {
        Message::Command { .. } => "COMMAND",
        Message::ProgressReply { .. } => "PROGRESS",
        Message::Result { .. } => "RESULT",
        Message::Notify { .. } => "NOTIFY",
        Message::Event { .. } => "EVENT",
        Message::FlowControl { .. } => "FLOW",
    }
}

/// Arguments as JSON values; undecodable bytes are shown as one string.
fn args_preview(msg: &Message) -> Vec<Value> {
    match decode_args(msg.args()) {
        Ok(values) => values,
        Err(_) => vec![Value::String(format!(
            "<binary {} bytes>",
            msg.args().len()
        ))],
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
