//! Structured records extracted from item pages, and their fingerprints

use crate::model::FieldChange;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Separator placed between rendered fields before hashing (ASCII unit separator)
pub const FIELD_SEPARATOR: char = '\u{1f}';

/// Tracked field names, in fingerprint order
pub const TRACKED_FIELDS: [&str; 10] = [
    "source_url",
    "name",
    "description",
    "category",
    "price_excl_tax",
    "price_incl_tax",
    "availability",
    "review_count",
    "image_url",
    "rating",
];

/// The business fields of a record
///
/// These are exactly the fields covered by the fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFields {
    /// Natural key; unique across the store
    pub source_url: String,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub price_excl_tax: f64,
    pub price_incl_tax: f64,
    pub availability: String,
    pub review_count: u32,
    pub image_url: Option<String>,
    /// Star rating 1..=5, `None` when the page carries none
    pub rating: Option<u8>,
}

impl RecordFields {
    /// Renders every tracked field as text, in [`TRACKED_FIELDS`] order
    ///
    /// Absent optional values render as the empty string and prices always
    /// carry two decimals. Both the fingerprint and the field diff work on
    /// this rendering, so they can never disagree.
    ///
    /// Prices are compared at cent precision: two prices that round to the
    /// same two-decimal text count as equal and give the same fingerprint.
    pub fn rendered(&self) -> [(&'static str, String); 10] {
        [
            (TRACKED_FIELDS[0], self.source_url.clone()),
            (TRACKED_FIELDS[1], self.name.clone()),
            (TRACKED_FIELDS[2], self.description.clone().unwrap_or_default()),
            (TRACKED_FIELDS[3], self.category.clone()),
            (TRACKED_FIELDS[4], format!("{:.2}", self.price_excl_tax)),
            (TRACKED_FIELDS[5], format!("{:.2}", self.price_incl_tax)),
            (TRACKED_FIELDS[6], self.availability.clone()),
            (TRACKED_FIELDS[7], self.review_count.to_string()),
            (TRACKED_FIELDS[8], self.image_url.clone().unwrap_or_default()),
            (
                TRACKED_FIELDS[9],
                self.rating.map(|r| r.to_string()).unwrap_or_default(),
            ),
        ]
    }

    /// SHA-256 hex digest over the rendered fields joined by [`FIELD_SEPARATOR`]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (i, (_, value)) in self.rendered().iter().enumerate() {
            if i > 0 {
                let mut buf = [0u8; 4];
                hasher.update(FIELD_SEPARATOR.encode_utf8(&mut buf).as_bytes());
            }
            hasher.update(value.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Pairwise comparison against a newer version of the same record
    ///
    /// Returns one entry per differing field, in fingerprint order.
    pub fn diff(&self, newer: &RecordFields) -> Vec<FieldChange> {
        self.rendered()
            .into_iter()
            .zip(newer.rendered())
            .filter(|((_, old), (_, new))| old != new)
            .map(|((field, old), (_, new))| FieldChange {
                field: field.to_string(),
                old,
                new,
            })
            .collect()
    }
}

/// A record as produced by the page parser and held by the store
#[derive(Debug, Clone)]
pub struct Record {
    pub fields: RecordFields,

    /// Always `fields.fingerprint()`; computed once at construction
    pub fingerprint: String,

    /// When the page was crawled
    pub crawled_at: DateTime<Utc>,

    /// Raw page HTML, kept so records can be re-extracted later
    pub raw_snapshot: Option<String>,
}

impl Record {
    pub fn new(
        fields: RecordFields,
        crawled_at: DateTime<Utc>,
        raw_snapshot: Option<String>,
    ) -> Self {
        let fingerprint = fields.fingerprint();
        Self {
            fields,
            fingerprint,
            crawled_at,
            raw_snapshot,
        }
    }

    pub fn source_url(&self) -> &str {
        &self.fields.source_url
    }
}
