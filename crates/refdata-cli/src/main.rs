use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod app;
mod commands;
mod config;
mod data;

#[derive(Parser)]
#[command(
    name = "refdata",
    about = "Temporal reference data lookups over versioned streams",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "refdata.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a key against the configured references.
    ///
    /// Nested map paths such as CARD_TO_USER/USER_TO_LOCATION feed each
    /// value into the next map as its key.
    Lookup {
        /// Map name or '/'-separated map path
        #[arg(short, long)]
        map: String,
        #[arg(short, long)]
        key: String,
        /// Event time (RFC 3339). Defaults to now.
        #[arg(short, long)]
        time: Option<String>,
        /// Event stream whose context data Context references read
        #[arg(long)]
        context: Option<u64>,
        /// Print the streams consulted and the messages recorded
        #[arg(long)]
        trace: bool,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// List loaded streams, most recently used first
    Streams {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// List the maps of a loaded stream
    Maps {
        #[arg(short, long)]
        stream: u64,
    },
    /// Delete streams unused for longer than the purge age, or one stream
    Purge {
        /// e.g. 30d, 12h. Defaults to store.purge_age.
        #[arg(long)]
        age: Option<String>,
        #[arg(long)]
        stream: Option<u64>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("refdata=info".parse()?)
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::AppConfig::from_file(&cli.config)?;
    let app = app::App::new(config)?;

    match cli.command {
        Commands::Lookup { map, key, time, context, trace, format } => {
            let request = commands::lookup::LookupRequest {
                map: &map,
                key: &key,
                time: time.as_deref(),
                context,
            };
            commands::lookup::lookup(&app, &request, trace, &format)
        }
        Commands::Streams { limit } => commands::streams::streams(&app, limit),
        Commands::Maps { stream } => commands::streams::maps(&app, stream),
        Commands::Purge { age, stream } => {
            commands::purge::purge(&app, age.as_deref(), stream)
        }
    }
}
