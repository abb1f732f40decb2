use refdata_core::time::{now_ms, parse_duration};
use refdata_store::PurgeSummary;

use crate::app::App;

pub fn purge(app: &App, age: Option<&str>, stream_id: Option<u64>) -> anyhow::Result<()> {
    let summary = run(app, age, stream_id)?;
    if summary.is_zero() {
        println!("Nothing to purge");
    } else {
        println!(
            "✓ Purged {} stream(s), {} map(s), {} entries; {} value(s) deleted",
            summary.streams_purged, summary.maps_purged, summary.entries_purged, summary.values_deleted
        );
    }
    Ok(())
}

pub fn run(app: &App, age: Option<&str>, stream_id: Option<u64>) -> anyhow::Result<PurgeSummary> {
    let summary = match stream_id {
        Some(id) => app.store.purge_stream(id)?,
        None => {
            let age = match age {
                Some(age) => parse_duration(age)?,
                None => app.config.reference_data.store.purge_age()?,
            };
            app.store.purge_old_data(now_ms(), age)?
        }
    };
    app.reference_data.clear_map_names();
    Ok(summary)
}
