use std::fmt::Write as _;

use refdata_core::time::{format_instant_ms, now_ms, parse_instant_ms};
use refdata_core::Value;
use refdata_lookup::{ReferenceDataResult, StreamContext};
use serde::Serialize;

use crate::app::App;

#[derive(Debug, Serialize)]
struct LookupReport {
    map: String,
    key: String,
    time: String,
    value: Option<Value>,
    satisfied_by: Option<String>,
    messages: Vec<String>,
}

/// One lookup as given on the command line.
pub struct LookupRequest<'a> {
    pub map: &'a str,
    pub key: &'a str,
    /// RFC 3339; now when absent.
    pub time: Option<&'a str>,
    /// Event stream whose context data `Context` references read.
    pub context: Option<u64>,
}

/// Resolve `request`, returning the result and the event time used.
pub fn resolve(app: &App, request: &LookupRequest<'_>) -> anyhow::Result<(ReferenceDataResult, i64)> {
    let event_time_ms = match request.time {
        Some(t) => parse_instant_ms(t)?,
        None => now_ms(),
    };
    let result = match request.context {
        Some(stream_id) => app.reference_data.lookup_in_context(
            &app.references,
            request.map,
            request.key,
            event_time_ms,
            &StreamContext::new(stream_id),
        )?,
        None => app
            .reference_data
            .lookup(&app.references, request.map, request.key, event_time_ms)?,
    };
    Ok((result, event_time_ms))
}

pub fn lookup(app: &App, request: &LookupRequest<'_>, trace: bool, format: &str) -> anyhow::Result<()> {
    let (map, key) = (request.map, request.key);
    let (result, event_time_ms) = resolve(app, request)?;
    let value = result.supply_value()?;

    match format {
        "json" => {
            let report = LookupReport {
                map: map.to_string(),
                key: key.to_string(),
                time: format_instant_ms(event_time_ms),
                value,
                satisfied_by: result.satisfied_by().map(ToString::to_string),
                messages: result.messages().iter().map(ToString::to_string).collect(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            match &value {
                Some(value) => println!("{}", render_value(value)),
                None => eprintln!("No value for key '{key}' in {map}"),
            }
            if trace {
                print!("{}", render_trace(&result));
            }
        }
    }
    Ok(())
}

pub fn render_value(value: &Value) -> String {
    match value {
        Value::Text(text) => text.clone(),
        Value::Binary(bytes) => format!("0x{}", hex::encode(bytes)),
        Value::Null => "null".to_string(),
    }
}

pub fn render_trace(result: &ReferenceDataResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Lookup: {}", result.current_lookup());
    for visit in result.effective_streams() {
        let qualifying = result.qualifying_streams().contains(visit);
        let _ = writeln!(
            out,
            "  {} {} via {}",
            if qualifying { "+" } else { "-" },
            visit.stream,
            visit.pipeline_reference
        );
    }
    for message in result.messages() {
        let _ = writeln!(out, "  {message}");
    }
    out
}
