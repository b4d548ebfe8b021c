use anyhow::Result;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info};

use crate::extract;
use crate::fetch;
use crate::geocode::{GeocodeCache, Geocoder, ResolveStats};
use crate::settings::Settings;
use crate::store::LicenseStore;
use crate::sweep;
use crate::upsert::{self, UpsertStats};

/// What one scrape pass did.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub extracted: usize,
    pub processed: usize,
    pub geocode: ResolveStats,
    pub upsert: UpsertStats,
    pub swept: Option<usize>,
}

impl RunSummary {
    pub fn print(&self) {
        println!(
            "Extracted {} records, processed {}.",
            self.extracted, self.processed
        );
        println!(
            "Geocoding: {} addresses ({} cached, {} geocoded, {} unresolved).",
            self.geocode.requested, self.geocode.hits, self.geocode.geocoded, self.geocode.unresolved
        );
        println!(
            "Saved {} new, {} updated, {} failed.",
            self.upsert.inserted, self.upsert.updated, self.upsert.failed
        );
        if let Some(n) = self.swept {
            println!("Swept {} records past retention.", n);
        }
    }
}

/// Fetch the page and run it through the pipeline.
pub async fn run(
    settings: &Settings,
    store: &dyn LicenseStore,
    geocoder: &dyn Geocoder,
    limit: Option<usize>,
) -> Result<RunSummary> {
    let client = reqwest::Client::new();
    let html = fetch::fetch_page(&client, &settings.source_url).await?;
    Ok(process_page(settings, store, geocoder, &html, limit).await)
}

/// Extract → geocode → upsert → sweep. Nothing past extraction is fatal.
pub async fn process_page(
    settings: &Settings,
    store: &dyn LicenseStore,
    geocoder: &dyn Geocoder,
    html: &str,
    limit: Option<usize>,
) -> RunSummary {
    let mut entries = extract::parse_entries(html);
    let extracted = entries.len();
    // A zero limit means no limit.
    if let Some(n) = limit.filter(|&n| n > 0) {
        debug!("Limiting the number of rows to {}", n);
        entries.truncate(n);
    }
    info!("Processing {} of {} extracted records", entries.len(), extracted);

    let addresses = entries.iter().filter_map(|e| e.business_location.as_deref());
    let (geocodes, geocode) = GeocodeCache::new(store, geocoder).resolve(addresses).await;

    let pb = progress_bar(entries.len());
    let upsert = upsert::apply(store, &entries, &geocodes, Utc::now(), &pb);
    pb.finish_and_clear();

    let swept = if settings.sweep {
        match sweep::sweep(store, settings.retention_days, Utc::now()) {
            Ok(n) => Some(n),
            Err(e) => {
                error!(error = %e, "Retention sweep failed");
                None
            }
        }
    } else {
        None
    };

    RunSummary {
        extracted,
        processed: entries.len(),
        geocode,
        upsert,
        swept,
    }
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

// ── Tests ──
