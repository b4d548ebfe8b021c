use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::warn;

use crate::geocode::GeocodeEntry;

/// One extracted table row: label (without trailing colon) → cell text.
pub type RawRow = BTreeMap<String, String>;

// ── Field labels as they appear on the page ──

pub const LICENSE_NUMBER: &str = "License Number";
pub const LICENSE_TYPE: &str = "License Type";
pub const APPLICATION_TYPE: &str = "Application Type";
pub const CONTACT_PHONE: &str = "Contact Phone";
pub const BUSINESS_NAME: &str = "Business Name";
pub const CURRENT_BUSINESS_NAME: &str = "Current Business Name";
pub const NEW_BUSINESS_NAME: &str = "New Business Name";
pub const BUSINESS_LOCATION: &str = "Business Location";
pub const NEW_BUSINESS_LOCATION: &str = "New Business Location";
pub const APPLICANTS: &str = "Applicant(s)";
pub const CURRENT_APPLICANTS: &str = "Current Applicant(s)";
pub const NEW_APPLICANTS: &str = "New Applicant(s)";
pub const NOTIFICATION_DATE: &str = "Notification Date";
pub const APPROVED_DATE: &str = "Approved Date";
pub const DISCONTINUED_DATE: &str = "Discontinued Date";

/// Labels that may carry the business address, in priority order.
pub const ADDRESS_LABELS: &[&str] = &[BUSINESS_LOCATION, NEW_BUSINESS_LOCATION];

/// Labels that may carry the event date, in priority order.
pub const DATE_LABELS: &[&str] = &[NOTIFICATION_DATE, APPROVED_DATE, DISCONTINUED_DATE];

const DATE_FORMAT: &str = "%m/%d/%Y";

/// Typed view of a scraped row, with synonyms already resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LicenseEntry {
    pub license_number: Option<String>,
    pub license_type: Option<String>,
    pub application_type: Option<String>,
    pub contact_phone: Option<String>,
    pub business_name: Option<String>,
    pub current_business_name: Option<String>,
    pub new_business_name: Option<String>,
    pub business_location: Option<String>,
    pub applicants: Option<String>,
    pub current_applicants: Option<String>,
    pub new_applicants: Option<String>,
    pub notification_date: Option<NaiveDate>,
}

impl LicenseEntry {
    pub fn from_row(row: &RawRow) -> Self {
        LicenseEntry {
            license_number: field(row, LICENSE_NUMBER),
            license_type: field(row, LICENSE_TYPE),
            application_type: field(row, APPLICATION_TYPE),
            contact_phone: field(row, CONTACT_PHONE),
            business_name: field(row, BUSINESS_NAME),
            current_business_name: field(row, CURRENT_BUSINESS_NAME),
            new_business_name: field(row, NEW_BUSINESS_NAME),
            business_location: resolve_address(row).map(str::to_string),
            applicants: field(row, APPLICANTS),
            current_applicants: field(row, CURRENT_APPLICANTS),
            new_applicants: field(row, NEW_APPLICANTS),
            notification_date: resolve_notification_date(row),
        }
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            license_number: self.license_number.clone(),
            notification_date: self.notification_date,
            license_type: self.license_type.clone(),
        }
    }
}

/// Identity of a license event across scrape runs. Any component may be absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    pub license_number: Option<String>,
    pub notification_date: Option<NaiveDate>,
    pub license_type: Option<String>,
}

impl std::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.license_number.as_deref().unwrap_or("-"),
            self.notification_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".into()),
            self.license_type.as_deref().unwrap_or("-"),
        )
    }
}

/// A license ready to be written: scraped fields plus geocoding.
#[derive(Debug, Clone, PartialEq)]
pub struct License {
    pub entry: LicenseEntry,
    pub geocode: Option<GeocodeEntry>,
}

impl License {
    pub fn natural_key(&self) -> NaturalKey {
        self.entry.natural_key()
    }
}

/// A license as read back from a store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredLicense {
    pub id: i64,
    pub license: License,
    pub creation_date: DateTime<Utc>,
    pub last_updated_date: DateTime<Utc>,
}

// ── Synonym resolution ──

/// First value among `labels` that is present and non-empty.
pub fn first_non_empty<'a>(row: &'a RawRow, labels: &[&str]) -> Option<&'a str> {
    labels
        .iter()
        .filter_map(|label| row.get(*label))
        .map(|v| v.as_str())
        .find(|v| !v.trim().is_empty())
}

pub fn resolve_address(row: &RawRow) -> Option<&str> {
    first_non_empty(row, ADDRESS_LABELS)
}

/// Parse failures are logged and yield `None`; they never drop the row.
pub fn resolve_notification_date(row: &RawRow) -> Option<NaiveDate> {
    let raw = first_non_empty(row, DATE_LABELS)?;
    match parse_date(raw) {
        Ok(date) => Some(date),
        Err(e) => {
            warn!(date = raw, error = %e, "Unparseable notification date");
            None
        }
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
}

fn field(row: &RawRow, label: &str) -> Option<String> {
    first_non_empty(row, &[label]).map(str::to_string)
}

// ── Tests ──
