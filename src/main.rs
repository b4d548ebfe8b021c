mod error;
mod extract;
mod fetch;
mod geocode;
mod pipeline;
mod record;
mod settings;
mod store;
mod sweep;
mod upsert;

use std::time::Instant;

use clap::Parser;
use tracing::info;

use crate::geocode::geocodio::GeocodioClient;
use crate::settings::Settings;

#[derive(Parser)]
#[command(
    name = "lcb_scraper",
    about = "Scrape WA liquor/cannabis license notifications, geocode and store them"
)]
struct Cli {
    /// Limit the number of rows processed (for testing; 0 means no limit)
    #[arg(short = 'n', long)]
    limit: Option<usize>,

    /// Create tables and indexes, then exit without scraping
    #[arg(long)]
    create_tables: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;
    info!(settings = ?settings, "Starting license scraper");

    if cli.create_tables {
        let store = store::open(&settings)?;
        store.init_schema()?;
        println!("Tables ready ({:?}).", settings.db_path);
        return Ok(());
    }

    let geocoder = GeocodioClient::new(&settings.geocodio_url, settings.require_geocodio_key()?);
    let store = store::open(&settings)?;
    store.init_schema()?;

    let summary = pipeline::run(&settings, store.as_ref(), &geocoder, cli.limit).await?;
    summary.print();

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
