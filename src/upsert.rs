use std::collections::HashMap;

use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::geocode::GeocodeEntry;
use crate::record::{License, LicenseEntry};
use crate::store::LicenseStore;

/// Upsert stats returned after completion.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpsertStats {
    pub total: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
}

enum Outcome {
    Inserted,
    Updated,
}

/// Attach the cached geocode for the entry's address, if there is one.
pub fn attach_geocode(entry: &LicenseEntry, geocodes: &HashMap<String, GeocodeEntry>) -> License {
    let geocode = entry
        .business_location
        .as_ref()
        .and_then(|addr| geocodes.get(addr))
        .cloned();
    License {
        entry: entry.clone(),
        geocode,
    }
}

/// Merge each entry into the store by natural key.
///
/// Best effort: a failing record is logged with its key and skipped; records
/// written before it stay written.
pub fn apply(
    store: &dyn LicenseStore,
    entries: &[LicenseEntry],
    geocodes: &HashMap<String, GeocodeEntry>,
    now: DateTime<Utc>,
    pb: &ProgressBar,
) -> UpsertStats {
    let mut stats = UpsertStats {
        total: entries.len(),
        ..Default::default()
    };

    for entry in entries {
        let license = attach_geocode(entry, geocodes);
        match upsert_one(store, &license, now) {
            Ok(Outcome::Inserted) => stats.inserted += 1,
            Ok(Outcome::Updated) => stats.updated += 1,
            Err(e) => {
                stats.failed += 1;
                error!(
                    key = %license.natural_key(),
                    error = %e,
                    "Upsert failed, skipping record"
                );
                debug!(license = ?license, "Failed record");
            }
        }
        pb.inc(1);
    }

    info!(
        "Upserted {} records ({} new, {} updated, {} failed)",
        stats.total, stats.inserted, stats.updated, stats.failed
    );
    stats
}

fn upsert_one(store: &dyn LicenseStore, license: &License, now: DateTime<Utc>) -> Result<Outcome> {
    match store.find_license(&license.natural_key())? {
        Some(existing) => {
            debug!(
                id = existing.id,
                created = %existing.creation_date,
                last_updated = %existing.last_updated_date,
                "Updating existing record"
            );
            store.update_license(existing.id, license, now)?;
            Ok(Outcome::Updated)
        }
        None => {
            store.insert_license(license, now)?;
            Ok(Outcome::Inserted)
        }
    }
}

// ── Tests ──
