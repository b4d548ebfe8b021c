pub mod geocodio;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::store::LicenseStore;

/// Characters of geohash stored per address.
pub const GEOHASH_PRECISION: usize = 12;

/// Memoized resolution of one address string.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeEntry {
    pub latitude: f64,
    pub longitude: f64,
    pub geohash: String,
    pub zipcode: Option<String>,
    pub formatted_address: String,
}

// ── Geocoder payload ──

#[derive(Debug, Clone, Deserialize)]
pub struct GeocodeResult {
    pub location: Location,
    #[serde(default)]
    pub address_components: AddressComponents,
    #[serde(default)]
    pub formatted_address: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddressComponents {
    #[serde(default)]
    pub zip: Option<String>,
}

/// External batch geocoder. The output is aligned with the input order;
/// `None` marks an address the service could not resolve.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn batch_geocode(&self, addresses: &[String]) -> Result<Vec<Option<GeocodeResult>>>;
}

impl GeocodeEntry {
    pub fn from_result(result: &GeocodeResult) -> Option<Self> {
        let Location { lat, lng } = result.location;
        let geohash = match encode_geohash(lat, lng) {
            Ok(h) => h,
            Err(e) => {
                warn!(lat, lng, error = %e, "Geocoder returned coordinates outside geohash range");
                return None;
            }
        };
        Some(GeocodeEntry {
            latitude: lat,
            longitude: lng,
            geohash,
            zipcode: result.address_components.zip.clone(),
            formatted_address: result.formatted_address.clone().unwrap_or_default(),
        })
    }
}

pub fn encode_geohash(lat: f64, lng: f64) -> std::result::Result<String, geohash::GeohashError> {
    geohash::encode(geohash::Coord { x: lng, y: lat }, GEOHASH_PRECISION)
}

// ── Cache ──

/// Hit/miss counts from one `resolve` call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResolveStats {
    pub requested: usize,
    pub hits: usize,
    pub geocoded: usize,
    pub unresolved: usize,
}

/// Read-through cache in front of the geocoder. Entries are written once and
/// never refreshed; keys are the raw address strings.
pub struct GeocodeCache<'a> {
    store: &'a dyn LicenseStore,
    geocoder: &'a dyn Geocoder,
}

impl<'a> GeocodeCache<'a> {
    pub fn new(store: &'a dyn LicenseStore, geocoder: &'a dyn Geocoder) -> Self {
        Self { store, geocoder }
    }

    /// Resolve every address it can. An address missing from the returned map
    /// is unresolved; none of the failures in here are fatal.
    pub async fn resolve<I, S>(&self, addresses: I) -> (HashMap<String, GeocodeEntry>, ResolveStats)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let addresses = dedup(addresses);
        let mut stats = ResolveStats {
            requested: addresses.len(),
            ..Default::default()
        };
        if addresses.is_empty() {
            return (HashMap::new(), stats);
        }
        debug!("Resolving {} addresses", addresses.len());

        let mut resolved = match self.store.cached_geocodes(&addresses) {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "Geocode cache lookup failed, treating all addresses as misses");
                HashMap::new()
            }
        };
        stats.hits = resolved.len();

        let misses: Vec<String> = addresses
            .into_iter()
            .filter(|a| !resolved.contains_key(a))
            .collect();

        if misses.is_empty() {
            debug!("All addresses found in the cache");
            return (resolved, stats);
        }

        info!("{} addresses not cached, sending batch to geocoder", misses.len());
        let results = match self.geocoder.batch_geocode(&misses).await {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, count = misses.len(), "Batch geocode failed, addresses left unresolved");
                stats.unresolved = misses.len();
                return (resolved, stats);
            }
        };

        for (address, result) in misses.into_iter().zip(results) {
            let Some(entry) = result.as_ref().and_then(GeocodeEntry::from_result) else {
                debug!(address = %address, "Geocoder could not resolve address");
                stats.unresolved += 1;
                continue;
            };
            if let Err(e) = self.store.insert_geocode(&address, &entry) {
                warn!(address = %address, error = %e, "Failed to cache geocode");
            }
            stats.geocoded += 1;
            resolved.insert(address, entry);
        }

        (resolved, stats)
    }
}

/// Unique, non-empty addresses in first-seen order.
fn dedup<I, S>(addresses: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    addresses
        .into_iter()
        .map(|a| a.as_ref().to_string())
        .filter(|a| !a.trim().is_empty())
        .filter(|a| seen.insert(a.clone()))
        .collect()
}


// ── Tests ──

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::testing::FakeGeocoder;
    use super::*;
    use crate::error::Error;
    use crate::record::{License, NaturalKey, StoredLicense};
    use crate::store::memory::MemoryStore;

    fn main_st() -> GeocodeEntry {
        GeocodeEntry {
            latitude: 47.6,
            longitude: -122.3,
            geohash: "geohash1".into(),
            zipcode: Some("98101".into()),
            formatted_address: "100 Main St, WA".into(),
        }
    }

    #[test]
    fn geohash_known_value() {
        let hash = encode_geohash(57.64911, 10.40744).unwrap();
        assert_eq!(hash.len(), GEOHASH_PRECISION);
        assert!(hash.starts_with("u4pruydqqvj"));
    }

    #[test]
    fn entry_from_result_extracts_zip_and_address() {
        let payload = serde_json::json!({
            "address_components": { "number": "1500", "zip": "98101" },
            "formatted_address": "1500 4th Ave, Seattle, WA 98101",
            "location": { "lat": 47.610, "lng": -122.336 },
            "accuracy": 1
        });
        let result: GeocodeResult = serde_json::from_value(payload).unwrap();
        let entry = GeocodeEntry::from_result(&result).unwrap();
        assert_eq!(entry.zipcode.as_deref(), Some("98101"));
        assert_eq!(entry.formatted_address, "1500 4th Ave, Seattle, WA 98101");
        assert_eq!(entry.geohash.len(), GEOHASH_PRECISION);
        assert!(entry.geohash.starts_with("c23"));
    }

    #[test]
    fn entry_from_result_without_optional_fields() {
        let payload = serde_json::json!({ "location": { "lat": 47.0, "lng": -120.0 } });
        let result: GeocodeResult = serde_json::from_value(payload).unwrap();
        let entry = GeocodeEntry::from_result(&result).unwrap();
        assert_eq!(entry.zipcode, None);
        assert_eq!(entry.formatted_address, "");
    }

    #[tokio::test]
    async fn only_misses_reach_the_geocoder() {
        let store = MemoryStore::new();
        store.insert_geocode("100 Main St", &main_st()).unwrap();
        let geocoder = FakeGeocoder::with(&[("200 Oak St", 47.7, -122.4, Some("98103"))]);
        let cache = GeocodeCache::new(&store, &geocoder);

        let (resolved, stats) = cache.resolve(["100 Main St", "200 Oak St"]).await;

        assert_eq!(geocoder.calls(), vec![vec!["200 Oak St".to_string()]]);
        assert_eq!(resolved["100 Main St"], main_st());
        assert_eq!(resolved["200 Oak St"].zipcode.as_deref(), Some("98103"));
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.geocoded, 1);
    }

    #[tokio::test]
    async fn second_resolve_only_retries_unresolved() {
        let store = MemoryStore::new();
        let geocoder = FakeGeocoder::with(&[
            ("1 A St", 47.1, -122.1, Some("98001")),
            ("2 B St", 47.2, -122.2, None),
        ]);
        let cache = GeocodeCache::new(&store, &geocoder);

        let addresses = ["1 A St", "2 B St", "3 Nowhere"];
        let (first, _) = cache.resolve(addresses).await;
        let (second, stats) = cache.resolve(addresses).await;

        // Only the unresolvable address goes back out; it is never cached.
        let calls = geocoder.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], vec!["3 Nowhere".to_string()]);
        assert_eq!(first["1 A St"], second["1 A St"]);
        assert_eq!(first["2 B St"], second["2 B St"]);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.unresolved, 1);
    }

    #[tokio::test]
    async fn unresolvable_address_is_absent_not_error() {
        let store = MemoryStore::new();
        let geocoder = FakeGeocoder::with(&[("1 A St", 47.1, -122.1, None)]);
        let cache = GeocodeCache::new(&store, &geocoder);

        let (resolved, stats) = cache.resolve(["1 A St", "nowhere"]).await;

        assert!(resolved.contains_key("1 A St"));
        assert!(!resolved.contains_key("nowhere"));
        assert_eq!(stats.unresolved, 1);
        // Unresolved addresses are not cached and get retried next run.
        let (_, _) = cache.resolve(["nowhere"]).await;
        assert_eq!(geocoder.calls().len(), 2);
    }

    #[tokio::test]
    async fn duplicates_and_blanks_sent_once() {
        let store = MemoryStore::new();
        let geocoder = FakeGeocoder::with(&[("1 A St", 47.1, -122.1, None)]);
        let cache = GeocodeCache::new(&store, &geocoder);

        cache.resolve(["1 A St", "", "1 A St", "  "]).await;

        assert_eq!(geocoder.calls(), vec![vec!["1 A St".to_string()]]);
    }

    #[tokio::test]
    async fn cache_keys_are_not_normalized() {
        let store = MemoryStore::new();
        store.insert_geocode("100 Main St", &main_st()).unwrap();
        let geocoder = FakeGeocoder::default();
        let cache = GeocodeCache::new(&store, &geocoder);

        cache.resolve(["100 MAIN ST"]).await;

        assert_eq!(geocoder.calls(), vec![vec!["100 MAIN ST".to_string()]]);
    }

    #[tokio::test]
    async fn batch_failure_degrades_to_unresolved() {
        let store = MemoryStore::new();
        store.insert_geocode("100 Main St", &main_st()).unwrap();
        let geocoder = FakeGeocoder {
            fail: true,
            ..Default::default()
        };
        let cache = GeocodeCache::new(&store, &geocoder);

        let (resolved, stats) = cache.resolve(["100 Main St", "200 Oak St"]).await;

        assert_eq!(resolved.len(), 1);
        assert_eq!(stats.unresolved, 1);
    }

    /// Store whose bulk cache read fails, and which refuses to cache one address.
    struct BrokenCacheStore {
        inner: MemoryStore,
        reject: &'static str,
    }

    fn broken() -> Error {
        Error::Sqlite(rusqlite::Error::QueryReturnedNoRows)
    }

    impl LicenseStore for BrokenCacheStore {
        fn init_schema(&self) -> Result<()> {
            self.inner.init_schema()
        }
        fn cached_geocodes(&self, _: &[String]) -> Result<HashMap<String, GeocodeEntry>> {
            Err(broken())
        }
        fn insert_geocode(&self, a: &str, e: &GeocodeEntry) -> Result<()> {
            if a == self.reject {
                return Err(broken());
            }
            self.inner.insert_geocode(a, e)
        }
        fn find_license(&self, key: &NaturalKey) -> Result<Option<StoredLicense>> {
            self.inner.find_license(key)
        }
        fn insert_license(&self, license: &License, now: DateTime<Utc>) -> Result<i64> {
            self.inner.insert_license(license, now)
        }
        fn update_license(&self, id: i64, license: &License, now: DateTime<Utc>) -> Result<()> {
            self.inner.update_license(id, license, now)
        }
        fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
            self.inner.delete_created_before(cutoff)
        }
    }

    #[tokio::test]
    async fn store_failures_are_not_fatal() {
        let store = BrokenCacheStore {
            inner: MemoryStore::new(),
            reject: "2 B St",
        };
        // Already cached, but the failed read means it is asked for again.
        store.inner.insert_geocode("1 A St", &main_st()).unwrap();
        let geocoder = FakeGeocoder::with(&[
            ("1 A St", 47.1, -122.1, None),
            ("2 B St", 47.2, -122.2, None),
            ("3 C St", 47.3, -122.3, None),
        ]);
        let cache = GeocodeCache::new(&store, &geocoder);

        let (resolved, stats) = cache.resolve(["1 A St", "2 B St", "3 C St"]).await;

        assert_eq!(
            geocoder.calls(),
            vec![vec!["1 A St".to_string(), "2 B St".to_string(), "3 C St".to_string()]]
        );
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.geocoded, 3);
        assert_eq!(resolved.len(), 3);
        assert!(resolved.contains_key("2 B St"));

        let cached = store
            .inner
            .cached_geocodes(&["1 A St".into(), "2 B St".into(), "3 C St".into()])
            .unwrap();
        assert!(cached.contains_key("3 C St"));
        assert!(!cached.contains_key("2 B St"));
        // Write-once: the earlier entry is not replaced.
        assert_eq!(cached["1 A St"], main_st());
    }

    #[tokio::test]
    async fn no_geocoder_call_for_empty_input() {
        let store = MemoryStore::new();
        let geocoder = FakeGeocoder::default();
        let cache = GeocodeCache::new(&store, &geocoder);

        let (resolved, _) = cache.resolve(Vec::<String>::new()).await;

        assert!(resolved.is_empty());
        assert!(geocoder.calls().is_empty());
    }
}
