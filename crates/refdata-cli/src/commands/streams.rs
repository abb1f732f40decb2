use std::fmt::Write as _;

use anyhow::Context;
use refdata_core::time::format_instant_ms;
use refdata_store::StreamRecord;

use crate::app::App;

pub fn streams(app: &App, limit: Option<usize>) -> anyhow::Result<()> {
    let records = app.store.list_processing_info(limit)?;
    if records.is_empty() {
        println!("No streams loaded");
        return Ok(());
    }
    print!("{}", render_streams(&records));
    Ok(())
}

pub fn maps(app: &App, stream_id: u64) -> anyhow::Result<()> {
    let record = app
        .store
        .list_processing_info(None)?
        .into_iter()
        .find(|r| r.stream.stream_id == stream_id)
        .with_context(|| format!("stream {stream_id} is not in the store"))?;
    for name in app.store.map_names(&record.stream)? {
        println!("{name}");
    }
    Ok(())
}

pub fn render_streams(records: &[StreamRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<8} {:<24} {:<8} {:<10} {:<26} {:<26}",
        "STREAM", "PIPELINE", "VERSION", "STATE", "EFFECTIVE", "LAST ACCESSED"
    );
    for record in records {
        let _ = writeln!(
            out,
            "{:<8} {:<24} {:<8} {:<10} {:<26} {:<26}",
            record.stream.stream_id,
            record.stream.pipeline.name,
            record.stream.pipeline_version,
            record.info.state,
            format_instant_ms(record.info.effective_time_ms),
            format_instant_ms(record.info.last_accessed_time_ms),
        );
    }
    out
}
