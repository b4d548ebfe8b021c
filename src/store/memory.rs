use std::cell::RefCell;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::LicenseStore;
use crate::error::Result;
use crate::geocode::GeocodeEntry;
use crate::record::{License, NaturalKey, StoredLicense};

/// Process-local store. Key matching mirrors the SQLite store, including
/// null components matching each other.
#[derive(Default)]
pub struct MemoryStore {
    inner: RefCell<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    licenses: Vec<StoredLicense>,
    geocodes: HashMap<String, GeocodeEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn licenses(&self) -> Vec<StoredLicense> {
        self.inner.borrow().licenses.clone()
    }
}

impl LicenseStore for MemoryStore {
    fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    fn cached_geocodes(&self, addresses: &[String]) -> Result<HashMap<String, GeocodeEntry>> {
        let inner = self.inner.borrow();
        Ok(addresses
            .iter()
            .filter_map(|a| inner.geocodes.get(a).map(|g| (a.clone(), g.clone())))
            .collect())
    }

    fn insert_geocode(&self, address: &str, entry: &GeocodeEntry) -> Result<()> {
        self.inner
            .borrow_mut()
            .geocodes
            .entry(address.to_string())
            .or_insert_with(|| entry.clone());
        Ok(())
    }

    fn find_license(&self, key: &NaturalKey) -> Result<Option<StoredLicense>> {
        Ok(self
            .inner
            .borrow()
            .licenses
            .iter()
            .find(|s| &s.license.natural_key() == key)
            .cloned())
    }

    fn insert_license(&self, license: &License, now: DateTime<Utc>) -> Result<i64> {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.licenses.push(StoredLicense {
            id,
            license: license.clone(),
            creation_date: now,
            last_updated_date: now,
        });
        Ok(id)
    }

    fn update_license(&self, id: i64, license: &License, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if let Some(stored) = inner.licenses.iter_mut().find(|s| s.id == id) {
            stored.license = license.clone();
            stored.last_updated_date = now;
        }
        Ok(())
    }

    fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.borrow_mut();
        let before = inner.licenses.len();
        inner.licenses.retain(|s| s.creation_date >= cutoff);
        Ok(before - inner.licenses.len())
    }
}
