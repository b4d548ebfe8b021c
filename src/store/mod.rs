pub mod memory;
pub mod sqlite;

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::geocode::GeocodeEntry;
use crate::record::{License, NaturalKey, StoredLicense};
use crate::settings::{Settings, StoreKind};

/// Storage capabilities the cache and the reconciler rely on.
///
/// Natural-key lookups are null-safe: an absent component matches an absent
/// component. Geocode entries are write-once.
pub trait LicenseStore {
    /// Create tables and indexes if missing.
    fn init_schema(&self) -> Result<()>;

    /// Bulk read: every cached entry among `addresses`, in one round trip.
    fn cached_geocodes(&self, addresses: &[String]) -> Result<HashMap<String, GeocodeEntry>>;

    /// Insert a cache entry. An existing entry for the address is left untouched.
    fn insert_geocode(&self, address: &str, entry: &GeocodeEntry) -> Result<()>;

    fn find_license(&self, key: &NaturalKey) -> Result<Option<StoredLicense>>;

    /// Returns the new record's id. Both timestamps are set to `now`.
    fn insert_license(&self, license: &License, now: DateTime<Utc>) -> Result<i64>;

    /// Overwrite every mutable field of record `id`; creation_date is kept.
    fn update_license(&self, id: i64, license: &License, now: DateTime<Utc>) -> Result<()>;

    /// Delete records created strictly before `cutoff`. Returns the count.
    fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Open the store selected in settings.
pub fn open(settings: &Settings) -> Result<Box<dyn LicenseStore>> {
    match settings.store {
        StoreKind::Sqlite => Ok(Box::new(sqlite::SqliteStore::open(&settings.db_path)?)),
        StoreKind::Memory => Ok(Box::new(memory::MemoryStore::new())),
    }
}
