use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use h2pipe_conn::{ClientResponse, ShutdownOutcome};
use serde::Serialize;

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
struct ResponseOutput<'a> {
    kind: &'static str,
    endpoint: &'a str,
    status: u16,
    headers: Vec<(String, String)>,
    body_size: usize,
    body: String,
    elapsed_ms: u128,
}

pub fn print_response(
    response: &ClientResponse,
    endpoint: &str,
    elapsed_ms: u128,
    format: OutputFormat,
) {
    let headers: Vec<(String, String)> = response
        .headers
        .iter()
        .map(|field| {
            (
                String::from_utf8_lossy(&field.name).into_owned(),
                String::from_utf8_lossy(&field.value).into_owned(),
            )
        })
        .collect();

    match format {
        OutputFormat::Json => {
            let out = ResponseOutput {
                kind: "response",
                endpoint,
                status: response.status,
                headers,
                body_size: response.body.len(),
                body: body_preview(&response.body),
                elapsed_ms,
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"])
                .add_row(vec![":status".to_string(), response.status.to_string()]);
            for (name, value) in headers {
                table.add_row(vec![name, value]);
            }
            table.add_row(vec!["body".to_string(), body_preview(&response.body)]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("status={} time={elapsed_ms}ms", response.status);
            for (name, value) in headers {
                println!("{name}: {value}");
            }
            println!();
            println!("{}", body_preview(&response.body));
        }
        OutputFormat::Raw => {
            print_raw(&response.body);
        }
    }
}

#[derive(Serialize)]
struct ServerEvent<'a> {
    kind: &'static str,
    event: &'a str,
    endpoint: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    accept_loops: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<String>,
    timestamp: String,
}

pub fn print_listening(endpoint: &str, accept_loops: usize, format: OutputFormat) {
    let event = ServerEvent {
        kind: "server",
        event: "listening",
        endpoint,
        accept_loops: Some(accept_loops),
        outcome: None,
        timestamp: now_unix_seconds(),
    };
    print_event(&event, format);
}

pub fn print_stopped(endpoint: &str, outcome: ShutdownOutcome, format: OutputFormat) {
    let event = ServerEvent {
        kind: "server",
        event: "stopped",
        endpoint,
        accept_loops: None,
        outcome: Some(outcome.to_string()),
        timestamp: now_unix_seconds(),
    };
    print_event(&event, format);
}

fn print_event(event: &ServerEvent<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(event),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "ENDPOINT", "DETAIL"])
                .add_row(vec![
                    event.event.to_string(),
                    event.endpoint.to_string(),
                    event_detail(event),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!(
                "{} endpoint={} {}",
                event.event,
                event.endpoint,
                event_detail(event)
            );
        }
    }
    let _ = std::io::stdout().flush();
}

fn event_detail(event: &ServerEvent<'_>) -> String {
    match (&event.accept_loops, &event.outcome) {
        (Some(loops), _) => format!("accept_loops={loops}"),
        (None, Some(outcome)) => format!("outcome={outcome}"),
        (None, None) => String::new(),
    }
}

fn print_json<T: Serialize>(value: &T) {
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

fn body_preview(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", body.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
