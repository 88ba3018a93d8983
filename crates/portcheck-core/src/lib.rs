//! Core domain model and conversion rules for portcheck.

use std::cmp::Ordering;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "portcheck-core";

/// Header of the appended column listing a group's duplicated ports.
pub const DUPLICATE_PORTS_COLUMN: &str = "Duplicate MPT Ports";
/// Header of the appended column carrying the review flag message.
pub const CHECK_FLAG_COLUMN: &str = "Check Flag";

/// Source header names for the five fields the pipeline reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnBindings {
    pub created: String,
    pub client_group: String,
    pub nap: String,
    pub port: String,
    pub secondary_signal: String,
}

impl Default for ColumnBindings {
    fn default() -> Self {
        Self {
            created: "Created".to_string(),
            client_group: "COID".to_string(),
            nap: "NAP Number".to_string(),
            port: "MPT Port Number".to_string(),
            secondary_signal: "Secondary port# check".to_string(),
        }
    }
}

impl ColumnBindings {
    /// The bound header names in a fixed reporting order.
    pub fn required(&self) -> [&str; 5] {
        [
            self.created.as_str(),
            self.client_group.as_str(),
            self.nap.as_str(),
            self.port.as_str(),
            self.secondary_signal.as_str(),
        ]
    }
}

/// One data row of the source table. Field cells are extracted for the
/// pipeline; `cells` keeps the whole row for pass-through output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortRecord {
    /// 1-based data-row index in the source file, header excluded.
    pub line: u64,
    /// Raw `created` cell; the temporal filter parses it.
    pub created_raw: String,
    pub client_group: String,
    pub nap: String,
    pub port: String,
    /// Raw secondary-signal cell; see [`secondary_signal_is_set`].
    pub secondary_signal: String,
    /// The complete original row, in source column order.
    pub cells: Vec<String>,
}

/// Duplicate-detection scope. Ports may repeat freely across client groups
/// or across NAPs; only repetition within one (client group, NAP) pair
/// warrants review.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub client_group: String,
    pub nap: String,
}

impl GroupKey {
    pub fn of(record: &PortRecord) -> Self {
        Self {
            client_group: record.client_group.clone(),
            nap: record.nap.clone(),
        }
    }
}

/// A record that survived the temporal filter, with its parsed timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatedRecord {
    pub record: PortRecord,
    pub created: NaiveDateTime,
}

/// A consensus-selected record carrying its rendered review annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedRecord {
    pub record: PortRecord,
    pub created: NaiveDateTime,
    pub duplicate_ports_text: String,
    pub flag_message: String,
}

/// Semantic truthiness of the externally computed secondary signal.
///
/// Falsy: an absent or whitespace-only cell, `false` in any ASCII case,
/// and a literal `0`. Every other value counts as set.
pub fn secondary_signal_is_set(raw: &str) -> bool {
    let trimmed = raw.trim();
    !(trimmed.is_empty() || trimmed.eq_ignore_ascii_case("false") || trimmed == "0")
}

/// Natural port ordering. Numeric values sort ascending ahead of every
/// non-numeric value; non-numeric values compare lexically. The numeric
/// partition keeps the order total and transitive on mixed data.
pub fn compare_ports(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<u64>(), b.trim().parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Comma-joined rendering of a duplicate port set.
pub fn render_port_list(ports: &[String]) -> String {
    ports.join(", ")
}

/// The flag message naming the group and its duplicated ports.
pub fn render_flag_message(key: &GroupKey, ports_text: &str) -> String {
    format!(
        "Duplicate MPT ports for COID {}, NAP {}: {}",
        key.client_group, key.nap, ports_text
    )
}
