use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use trendline::storage::disk::load_store;
use trendline::{QuerySpec, TrendResult, TrendsConfig, TrendsEngine};

/// Run a trends query against a file of events.
#[derive(Debug, Parser)]
#[command(name = "trendline-cli", version)]
struct Args {
    /// Events as a JSON array or JSON lines
    #[arg(long, short)]
    events: PathBuf,

    /// Query JSON file
    #[arg(long, short)]
    query: PathBuf,

    /// Evaluation instant (RFC 3339); defaults to the current time
    #[arg(long)]
    now: Option<DateTime<Utc>>,

    /// Print a short table instead of JSON
    #[arg(long)]
    summary: bool,

    /// Compute slices one at a time
    #[arg(long)]
    sequential: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = TrendsConfig::from_env();
    if args.sequential {
        config.parallel_slices = false;
    }

    let store = load_store(&args.events).await?;
    let spec: QuerySpec = serde_json::from_str(&tokio::fs::read_to_string(&args.query).await?)?;
    let now = args.now.unwrap_or_else(Utc::now);

    let engine = TrendsEngine::new(Arc::new(store), config);
    let results = engine.run(&spec, now).await?;

    if args.summary {
        print_summary(&results);
    } else {
        println!("{}", serde_json::to_string_pretty(&results)?);
    }

    Ok(())
}

fn print_summary(results: &[TrendResult]) {
    for result in results {
        println!("{}", result.label.as_deref().unwrap_or("(formula)"));
        println!("   Total: {}", result.count);
        for (day, value) in result.labels.iter().zip(&result.data) {
            println!("     {} -> {}", day, value);
        }
        println!();
    }
}
