use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::record::{LicenseEntry, RawRow};

static ROW_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tbody[width='100%']").unwrap());
static LABEL_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td[style]").unwrap());
static VALUE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td:not([style])").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Split the page into one row per `tbody[width='100%']` container.
///
/// Styled cells are labels, unstyled cells are values; the two lists are zipped
/// by position. A container that yields no labels or no values is dropped.
pub fn parse_rows(html: &str) -> Vec<RawRow> {
    let doc = Html::parse_document(html);
    let rows: Vec<RawRow> = doc.select(&ROW_SEL).filter_map(parse_row).collect();
    debug!("Parsed {} rows from page", rows.len());
    rows
}

/// Rows parsed straight into typed entries, in page order.
pub fn parse_entries(html: &str) -> Vec<LicenseEntry> {
    parse_rows(html).iter().map(LicenseEntry::from_row).collect()
}

fn parse_row(container: ElementRef<'_>) -> Option<RawRow> {
    let labels: Vec<String> = container
        .select(&LABEL_SEL)
        .map(|td| clean_label(&cell_text(td)))
        .collect();
    let values: Vec<String> = container.select(&VALUE_SEL).map(cell_text).collect();

    if labels.is_empty() || values.is_empty() {
        return None;
    }

    Some(labels.into_iter().zip(values).collect())
}

fn cell_text(td: ElementRef<'_>) -> String {
    let text: String = td.text().collect();
    WS_RE.replace_all(text.trim(), " ").into_owned()
}

fn clean_label(text: &str) -> String {
    text.trim_end_matches(':').trim_end().to_string()
}

// ── Tests ──
