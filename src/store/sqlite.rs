use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::debug;

use super::LicenseStore;
use crate::error::Result;
use crate::geocode::GeocodeEntry;
use crate::record::{License, LicenseEntry, NaturalKey, StoredLicense};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS licenses (
        id                    INTEGER PRIMARY KEY,
        license_number        TEXT,
        notification_date     TEXT,
        license_type          TEXT,
        application_type      TEXT,
        contact_phone         TEXT,
        business_name         TEXT,
        current_business_name TEXT,
        new_business_name     TEXT,
        business_location     TEXT,
        applicants            TEXT,
        current_applicants    TEXT,
        new_applicants        TEXT,
        latitude              REAL,
        longitude             REAL,
        geohash               TEXT,
        zipcode               TEXT,
        formatted_address     TEXT,
        creation_date         TEXT NOT NULL,
        last_updated_date     TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_licenses_natural_key
        ON licenses(license_number, notification_date, license_type);
    CREATE INDEX IF NOT EXISTS idx_licenses_creation_date ON licenses(creation_date);
    CREATE INDEX IF NOT EXISTS idx_licenses_geohash ON licenses(geohash);

    CREATE TABLE IF NOT EXISTS geocode_cache (
        address           TEXT PRIMARY KEY,
        latitude          REAL NOT NULL,
        longitude         REAL NOT NULL,
        geohash           TEXT NOT NULL,
        zipcode           TEXT,
        formatted_address TEXT NOT NULL,
        creation_date     TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    );
";

const LICENSE_COLUMNS: &str = "id, license_number, notification_date, license_type,
    application_type, contact_phone, business_name, current_business_name,
    new_business_name, business_location, applicants, current_applicants,
    new_applicants, latitude, longitude, geohash, zipcode, formatted_address,
    creation_date, last_updated_date";

const DATE_FMT: &str = "%Y-%m-%d";

/// Embedded file store.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        debug!("Opened SQLite store at {:?}", path);
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn count_licenses(&self) -> Result<usize> {
        let n: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM licenses", [], |r| r.get(0))?;
        Ok(n)
    }
}

impl LicenseStore for SqliteStore {
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn cached_geocodes(&self, addresses: &[String]) -> Result<HashMap<String, GeocodeEntry>> {
        if addresses.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = (1..=addresses.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT address, latitude, longitude, geohash, zipcode, formatted_address
             FROM geocode_cache WHERE address IN ({})",
            placeholders
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(addresses.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    GeocodeEntry {
                        latitude: row.get(1)?,
                        longitude: row.get(2)?,
                        geohash: row.get(3)?,
                        zipcode: row.get(4)?,
                        formatted_address: row.get(5)?,
                    },
                ))
            })?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    }

    fn insert_geocode(&self, address: &str, entry: &GeocodeEntry) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO geocode_cache
             (address, latitude, longitude, geohash, zipcode, formatted_address)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                address,
                entry.latitude,
                entry.longitude,
                entry.geohash,
                entry.zipcode,
                entry.formatted_address,
            ],
        )?;
        Ok(())
    }

    fn find_license(&self, key: &NaturalKey) -> Result<Option<StoredLicense>> {
        let sql = format!(
            "SELECT {} FROM licenses
             WHERE license_number IS ?1 AND notification_date IS ?2 AND license_type IS ?3
             LIMIT 1",
            LICENSE_COLUMNS
        );
        let found = self
            .conn
            .query_row(
                &sql,
                params![
                    key.license_number,
                    key.notification_date.map(format_date),
                    key.license_type,
                ],
                read_license,
            )
            .optional()?;
        Ok(found)
    }

    fn insert_license(&self, license: &License, now: DateTime<Utc>) -> Result<i64> {
        let e = &license.entry;
        let g = license.geocode.as_ref();
        let ts = format_ts(now);
        self.conn.execute(
            "INSERT INTO licenses
             (license_number, notification_date, license_type, application_type,
              contact_phone, business_name, current_business_name, new_business_name,
              business_location, applicants, current_applicants, new_applicants,
              latitude, longitude, geohash, zipcode, formatted_address,
              creation_date, last_updated_date)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
            params![
                e.license_number,
                e.notification_date.map(format_date),
                e.license_type,
                e.application_type,
                e.contact_phone,
                e.business_name,
                e.current_business_name,
                e.new_business_name,
                e.business_location,
                e.applicants,
                e.current_applicants,
                e.new_applicants,
                g.map(|g| g.latitude),
                g.map(|g| g.longitude),
                g.map(|g| g.geohash.as_str()),
                g.and_then(|g| g.zipcode.as_deref()),
                g.map(|g| g.formatted_address.as_str()),
                ts,
                ts,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update_license(&self, id: i64, license: &License, now: DateTime<Utc>) -> Result<()> {
        let e = &license.entry;
        let g = license.geocode.as_ref();
        self.conn.execute(
            "UPDATE licenses SET
                license_number = ?2, notification_date = ?3, license_type = ?4,
                application_type = ?5, contact_phone = ?6, business_name = ?7,
                current_business_name = ?8, new_business_name = ?9,
                business_location = ?10, applicants = ?11, current_applicants = ?12,
                new_applicants = ?13, latitude = ?14, longitude = ?15, geohash = ?16,
                zipcode = ?17, formatted_address = ?18, last_updated_date = ?19
             WHERE id = ?1",
            params![
                id,
                e.license_number,
                e.notification_date.map(format_date),
                e.license_type,
                e.application_type,
                e.contact_phone,
                e.business_name,
                e.current_business_name,
                e.new_business_name,
                e.business_location,
                e.applicants,
                e.current_applicants,
                e.new_applicants,
                g.map(|g| g.latitude),
                g.map(|g| g.longitude),
                g.map(|g| g.geohash.as_str()),
                g.and_then(|g| g.zipcode.as_deref()),
                g.map(|g| g.formatted_address.as_str()),
                format_ts(now),
            ],
        )?;
        Ok(())
    }

    fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let n = self.conn.execute(
            "DELETE FROM licenses WHERE creation_date < ?1",
            params![format_ts(cutoff)],
        )?;
        Ok(n)
    }
}

// ── Row mapping ──

fn read_license(row: &Row<'_>) -> rusqlite::Result<StoredLicense> {
    let notification_date: Option<String> = row.get(2)?;
    let notification_date = notification_date
        .map(|s| NaiveDate::parse_from_str(&s, DATE_FMT).map_err(|e| conversion_err(2, e)))
        .transpose()?;

    let entry = LicenseEntry {
        license_number: row.get(1)?,
        notification_date,
        license_type: row.get(3)?,
        application_type: row.get(4)?,
        contact_phone: row.get(5)?,
        business_name: row.get(6)?,
        current_business_name: row.get(7)?,
        new_business_name: row.get(8)?,
        business_location: row.get(9)?,
        applicants: row.get(10)?,
        current_applicants: row.get(11)?,
        new_applicants: row.get(12)?,
    };

    let latitude: Option<f64> = row.get(13)?;
    let longitude: Option<f64> = row.get(14)?;
    let geohash: Option<String> = row.get(15)?;
    let geocode = match (latitude, longitude, geohash) {
        (Some(latitude), Some(longitude), Some(geohash)) => Some(GeocodeEntry {
            latitude,
            longitude,
            geohash,
            zipcode: row.get(16)?,
            formatted_address: row.get::<_, Option<String>>(17)?.unwrap_or_default(),
        }),
        _ => None,
    };

    Ok(StoredLicense {
        id: row.get(0)?,
        license: License { entry, geocode },
        creation_date: parse_ts(row, 18)?,
        last_updated_date: parse_ts(row, 19)?,
    })
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

/// Fixed-width UTC text so string comparison orders by time.
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn format_date(d: NaiveDate) -> String {
    d.format(DATE_FMT).to_string()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn store() -> SqliteStore {
        let s = SqliteStore::open_in_memory().unwrap();
        s.init_schema().unwrap();
        s
    }

    fn license(number: &str, date: Option<NaiveDate>, phone: &str) -> License {
        License {
            entry: LicenseEntry {
                license_number: Some(number.into()),
                notification_date: date,
                license_type: Some("RETAIL".into()),
                contact_phone: Some(phone.into()),
                business_location: Some("100 Main St".into()),
                ..Default::default()
            },
            geocode: None,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 1, 12, 0, 0).unwrap()
    }

    fn geo() -> GeocodeEntry {
        GeocodeEntry {
            latitude: 47.6,
            longitude: -122.3,
            geohash: "c23nb62w20st".into(),
            zipcode: Some("98101".into()),
            formatted_address: "100 Main St, Seattle, WA 98101".into(),
        }
    }

    #[test]
    fn schema_is_idempotent() {
        let s = store();
        s.init_schema().unwrap();
        assert_eq!(s.count_licenses().unwrap(), 0);
    }

    #[test]
    fn geocode_bulk_read_returns_only_hits() {
        let s = store();
        s.insert_geocode("100 Main St", &geo()).unwrap();
        let hits = s
            .cached_geocodes(&["100 Main St".to_string(), "200 Oak St".to_string()])
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits["100 Main St"], geo());
    }

    #[test]
    fn geocode_entries_are_write_once() {
        let s = store();
        s.insert_geocode("100 Main St", &geo()).unwrap();
        let mut other = geo();
        other.latitude = 0.0;
        s.insert_geocode("100 Main St", &other).unwrap();
        let hits = s.cached_geocodes(&["100 Main St".to_string()]).unwrap();
        assert_eq!(hits["100 Main St"].latitude, 47.6);
    }

    #[test]
    fn license_round_trip_with_geocode() {
        let s = store();
        let mut lic = license("1", NaiveDate::from_ymd_opt(2024, 9, 1), "555");
        lic.geocode = Some(geo());
        let id = s.insert_license(&lic, t0()).unwrap();

        let found = s.find_license(&lic.natural_key()).unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.license, lic);
        assert_eq!(found.creation_date, t0());
        assert_eq!(found.last_updated_date, t0());
    }

    #[test]
    fn update_keeps_creation_date() {
        let s = store();
        let lic = license("1", NaiveDate::from_ymd_opt(2024, 9, 1), "555");
        let id = s.insert_license(&lic, t0()).unwrap();

        let later = t0() + Duration::days(3);
        let changed = license("1", NaiveDate::from_ymd_opt(2024, 9, 1), "777");
        s.update_license(id, &changed, later).unwrap();

        let found = s.find_license(&changed.natural_key()).unwrap().unwrap();
        assert_eq!(found.license.entry.contact_phone.as_deref(), Some("777"));
        assert_eq!(found.creation_date, t0());
        assert_eq!(found.last_updated_date, later);
    }

    #[test]
    fn natural_key_is_unique() {
        let s = store();
        let lic = license("1", NaiveDate::from_ymd_opt(2024, 9, 1), "555");
        s.insert_license(&lic, t0()).unwrap();
        assert!(s.insert_license(&lic, t0()).is_err());
    }

    #[test]
    fn null_date_matches_null_date() {
        let s = store();
        let lic = license("1", None, "555");
        s.insert_license(&lic, t0()).unwrap();

        let found = s.find_license(&lic.natural_key()).unwrap();
        assert!(found.is_some());

        let dated = license("1", NaiveDate::from_ymd_opt(2024, 9, 1), "555");
        assert!(s.find_license(&dated.natural_key()).unwrap().is_none());
    }

    #[test]
    fn delete_by_creation_cutoff() {
        let s = store();
        let now = t0();
        s.insert_license(&license("old", None, "1"), now - Duration::days(200))
            .unwrap();
        s.insert_license(&license("new", None, "2"), now - Duration::days(100))
            .unwrap();

        let deleted = s.delete_created_before(now - Duration::days(180)).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(s.count_licenses().unwrap(), 1);
    }

    #[test]
    fn file_store_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("licenses.sqlite");
        let s = SqliteStore::open(&path).unwrap();
        s.init_schema().unwrap();
        assert!(path.exists());
    }
}
