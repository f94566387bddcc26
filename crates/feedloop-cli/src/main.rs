// ai
//! 🚀 feedloop-cli: the front door, the bouncer, the maitre d' of feedloop.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Three subcommands, one thin wrapper: parse args, set up logging, load config, and let
//! the library do the heavy lifting. Like a manager. 🦆
//!
//! - `feedloop serve [--config feedloop.toml]`: the HTTP simulator
//! - `feedloop drain --chunk-size 100 --total 10000 --chunk-delay-ms 10 [--from URL]` -
//!   how fast can we go, and is it fast enough for 500k calls a day?
//! - `feedloop generate --conversations 1000 --out data/conversations.jsonl [--seed 42]`

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table, presets::NOTHING};
use feedloop::DrainOptions;
use feedloop::dataset::synthetic::SyntheticConfig;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "feedloop", version, about = "🛰️ Finite datasets, infinite streams.")]
struct Cli {
    /// 🔧 TOML config; environment variables (FEEDLOOP_*) apply either way
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 🌐 Serve the HTTP simulator
    Serve,
    /// 📊 Stream transcripts as fast as the knobs allow and report throughput
    Drain {
        #[arg(long, default_value_t = 100)]
        chunk_size: usize,
        /// 🎯 0 streams until Ctrl-C
        #[arg(long, default_value_t = 10_000)]
        total: u64,
        #[arg(long, default_value_t = 10)]
        chunk_delay_ms: u64,
        /// 🌐 poll a running feedloop at this base URL instead of loading a dataset
        #[arg(long)]
        from: Option<String>,
    },
    /// 🎭 Write a synthetic call-center dataset
    Generate {
        #[arg(long, default_value_t = 1_000)]
        conversations: usize,
        #[arg(long, default_value = "data/conversations.jsonl")]
        out: PathBuf,
        #[arg(long)]
        seed: Option<u64>,
    },
}

/// 🚀 main(): where it all begins. The "I pressed F5 and held my breath" moment.
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 Set up tracing: because println! debugging is a lifestyle choice
    // we're trying to move past, like flip phones and cargo shorts
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(err) = dispatch(cli).await {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        // -- 📡 if it smells like a connection problem, it's probably a connection problem
        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like an upstream isn't reachable. If you used --from, check that \
                 the other feedloop is running (`feedloop serve`). If this is OpenSky, check your \
                 network and OPENSKY_CLIENT_ID / OPENSKY_CLIENT_SECRET. ☕"
            );
        }

        std::process::exit(1);
    }
    Ok(())
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve => {
            let app_config = load(cli.config.as_deref())?;
            feedloop::run(app_config).await
        }
        Command::Drain {
            chunk_size,
            total,
            chunk_delay_ms,
            from,
        } => {
            let app_config = load(cli.config.as_deref())?;
            let report = feedloop::drain(
                app_config,
                DrainOptions {
                    chunk_size,
                    total,
                    chunk_delay: Duration::from_millis(chunk_delay_ms),
                    from,
                },
            )
            .await?;
            println!("{}", report.table());
            Ok(())
        }
        Command::Generate {
            conversations,
            out,
            seed,
        } => {
            let written = feedloop::generate(SyntheticConfig { conversations, seed }, &out)?;
            let mut table = Table::new();
            table.load_preset(NOTHING);
            table.add_row(vec![Cell::new("file"), Cell::new(out.display())]);
            table.add_row(vec![Cell::new("conversations"), Cell::new(conversations)]);
            table.add_row(vec![Cell::new("utterances"), Cell::new(written)]);
            table.add_row(vec![
                Cell::new("seed"),
                Cell::new(seed.map_or_else(|| "random".to_string(), |s| s.to_string())),
            ]);
            println!("{table}");
            Ok(())
        }
    }
}

/// 🔧 Load the config, making sure a named file actually exists first.
fn load(config_file: Option<&Path>) -> Result<feedloop::app_config::AppConfig> {
    if let Some(path) = config_file {
        let exists = path.try_exists().with_context(|| {
            format!(
                "💀 Couldn't check whether the configuration file exists. Was checking here: '{}'",
                path.display()
            )
        })?;
        if !exists {
            anyhow::bail!(
                "💀 Configuration file '{}' does not exist. If it's a relative path, it's relative to \
                 where you ran feedloop, not where feedloop lives.",
                path.display()
            );
        }
    }
    feedloop::app_config::load_config(config_file)
        .context("💀 In feedloop-cli we couldn't load the configuration. Take a look at the file and the FEEDLOOP_* variables.")
}
