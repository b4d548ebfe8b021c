use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::error::Result;
use crate::store::LicenseStore;

/// Delete licenses whose creation_date is more than `retention_days` before `now`.
pub fn sweep(store: &dyn LicenseStore, retention_days: i64, now: DateTime<Utc>) -> Result<usize> {
    let cutoff = now - Duration::days(retention_days);
    let deleted = store.delete_created_before(cutoff)?;
    info!("Retention sweep: deleted {} records created before {}", deleted, cutoff);
    Ok(deleted)
}
