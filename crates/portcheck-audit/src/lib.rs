//! Audit pipeline orchestration: filtering, duplicate detection, consensus
//! selection, annotation, ordering, and run accounting.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use portcheck_adapters::load_table;
use portcheck_core::{
    compare_ports, render_flag_message, render_port_list, secondary_signal_is_set,
    AnnotatedRecord, ColumnBindings, DatedRecord, GroupKey, PortRecord,
};
use portcheck_report::{filter_metadata, ReportStore, WrittenArtifact};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "portcheck-audit";

/// File name of the browsing metadata written next to the artifact.
pub const FILTER_METADATA_NAME: &str = "filter-metadata.json";
/// File name of the per-run accounting document.
pub const SUMMARY_NAME: &str = "summary.json";

/// Accepted `created` layouts, tried in order. Date-only values read as
/// midnight. Anything else is unparseable and silently dropped.
const CREATED_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M",
];
const CREATED_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Pipeline configuration. Every key of the YAML file is optional; absent
/// keys fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub artifact_name: String,
    /// Client groups excluded from auditing (test and placeholder tenants).
    pub ignored_client_groups: Vec<String>,
    /// Records created before this day are out of audit scope.
    pub cutoff: NaiveDate,
    pub columns: ColumnBindings,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("port-assignments.csv"),
            output_dir: PathBuf::from("output"),
            artifact_name: "filtered.csv".to_string(),
            ignored_client_groups: vec![
                "ACME".to_string(),
                "SYPL".to_string(),
                "FAKE".to_string(),
            ],
            cutoff: NaiveDate::from_ymd_opt(2024, 3, 1).expect("2024-03-01 is a valid date"),
            columns: ColumnBindings::default(),
        }
    }
}

impl AuditConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// The cutoff as the first instant of its day; records at or after it
    /// are in scope.
    pub fn cutoff_instant(&self) -> NaiveDateTime {
        self.cutoff.and_time(NaiveTime::MIN)
    }
}

/// Parses a raw `created` cell. `None` marks the record for silent
/// exclusion, not for failure.
pub fn parse_created(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    for format in CREATED_DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(parsed);
        }
    }
    for format in CREATED_DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(parsed.and_time(NaiveTime::MIN));
        }
    }
    None
}

/// Removal accounting for the temporal filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalDrops {
    pub unparseable: usize,
    pub before_cutoff: usize,
}

/// Drops records belonging to ignored client groups. Returns the kept
/// records, in input order, and the removed count.
pub fn drop_ignored_clients(
    records: Vec<PortRecord>,
    ignored: &HashSet<String>,
) -> (Vec<PortRecord>, usize) {
    let before = records.len();
    let kept: Vec<PortRecord> = records
        .into_iter()
        .filter(|record| !ignored.contains(&record.client_group))
        .collect();
    let removed = before - kept.len();
    (kept, removed)
}

/// Parses `created` and drops unparseable or pre-cutoff records. Kept
/// records keep their input order; a record created exactly at the cutoff
/// instant stays in scope.
pub fn drop_out_of_range(
    records: Vec<PortRecord>,
    cutoff: NaiveDateTime,
) -> (Vec<DatedRecord>, TemporalDrops) {
    let mut drops = TemporalDrops::default();
    let mut kept = Vec::with_capacity(records.len());
    for record in records {
        match parse_created(&record.created_raw) {
            None => drops.unparseable += 1,
            Some(created) if created < cutoff => drops.before_cutoff += 1,
            Some(created) => kept.push(DatedRecord { record, created }),
        }
    }
    (kept, drops)
}

/// Per (client group, NAP), the ascending set of port values occurring on
/// two or more records that share the full (group, NAP, port) triple.
/// Ports repeated only across groups or NAPs never flag anything.
pub fn duplicate_port_map(records: &[DatedRecord]) -> BTreeMap<GroupKey, Vec<String>> {
    let mut triple_counts: HashMap<(GroupKey, String), usize> = HashMap::new();
    for dated in records {
        let key = (GroupKey::of(&dated.record), dated.record.port.clone());
        *triple_counts.entry(key).or_default() += 1;
    }

    // Each (group, port) pair appears once, so port lists hold no repeats.
    let mut map: BTreeMap<GroupKey, Vec<String>> = BTreeMap::new();
    for ((group, port), count) in triple_counts {
        if count >= 2 {
            map.entry(group).or_default().push(port);
        }
    }
    for ports in map.values_mut() {
        ports.sort_by(|a, b| compare_ports(a, b));
    }
    map
}

/// Keeps a record only when both review signals agree: its group was
/// flagged by the duplicate detector and its own secondary signal is set.
/// Input order is preserved.
pub fn select_consensus(
    records: Vec<DatedRecord>,
    duplicates: &BTreeMap<GroupKey, Vec<String>>,
) -> Vec<DatedRecord> {
    records
        .into_iter()
        .filter(|dated| {
            duplicates.contains_key(&GroupKey::of(&dated.record))
                && secondary_signal_is_set(&dated.record.secondary_signal)
        })
        .collect()
}

/// Renders the review annotations for consensus-selected records. Every
/// record of a flagged group carries the same port list and message.
pub fn annotate(
    selected: Vec<DatedRecord>,
    duplicates: &BTreeMap<GroupKey, Vec<String>>,
) -> Vec<AnnotatedRecord> {
    selected
        .into_iter()
        .filter_map(|dated| {
            let key = GroupKey::of(&dated.record);
            // Consensus selection guarantees the lookup succeeds.
            let ports = duplicates.get(&key)?;
            let duplicate_ports_text = render_port_list(ports);
            let flag_message = render_flag_message(&key, &duplicate_ports_text);
            Some(AnnotatedRecord {
                record: dated.record,
                created: dated.created,
                duplicate_ports_text,
                flag_message,
            })
        })
        .collect()
}

/// Review ordering: client group ascending, NAP ascending, port in natural
/// order, then newest first. The sort is stable, so records tied on all
/// four keys keep their pre-sort order.
pub fn sort_for_review(mut records: Vec<AnnotatedRecord>) -> Vec<AnnotatedRecord> {
    records.sort_by(|a, b| {
        a.record
            .client_group
            .cmp(&b.record.client_group)
            .then_with(|| a.record.nap.cmp(&b.record.nap))
            .then_with(|| compare_ports(&a.record.port, &b.record.port))
            .then_with(|| b.created.cmp(&a.created))
    });
    records
}

/// Per-run accounting, also serialized into the report directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub input_rows: usize,
    pub ignored_client_rows: usize,
    pub unparseable_created_rows: usize,
    pub before_cutoff_rows: usize,
    pub eligible_rows: usize,
    pub flagged_groups: usize,
    pub selected_rows: usize,
    pub artifact: WrittenArtifact,
    pub filter_metadata: String,
    pub output_dir: String,
}

/// The whole batch, load to artifact, in execution order.
#[derive(Debug, Clone)]
pub struct AuditPipeline {
    config: AuditConfig,
}

impl AuditPipeline {
    pub fn new(config: AuditConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn run(&self) -> Result<AuditRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        let table = load_table(&self.config.input, &self.config.columns)?;
        let input_rows = table.records.len();
        info!(
            %run_id,
            input = %self.config.input.display(),
            rows = input_rows,
            "loaded source table"
        );

        let ignored: HashSet<String> = self.config.ignored_client_groups.iter().cloned().collect();
        let (records, ignored_client_rows) = drop_ignored_clients(table.records, &ignored);
        info!(
            removed = ignored_client_rows,
            kept = records.len(),
            "dropped ignored client groups"
        );

        let (dated, drops) = drop_out_of_range(records, self.config.cutoff_instant());
        let eligible_rows = dated.len();
        if drops.unparseable > 0 {
            warn!(
                rows = drops.unparseable,
                "dropped records with unparseable created timestamps"
            );
        }
        info!(
            before_cutoff = drops.before_cutoff,
            kept = dated.len(),
            cutoff = %self.config.cutoff,
            "applied created cutoff"
        );

        let duplicates = duplicate_port_map(&dated);
        info!(groups = duplicates.len(), "duplicate detector flagged groups");

        let selected = select_consensus(dated, &duplicates);
        info!(rows = selected.len(), "records selected by consensus");

        let ordered = sort_for_review(annotate(selected, &duplicates));

        let store = ReportStore::new(&self.config.output_dir);
        let artifact = store.write_artifact(&self.config.artifact_name, &table.header, &ordered)?;
        let metadata = filter_metadata(&artifact, &table.header, &ordered);
        store.write_json(FILTER_METADATA_NAME, &metadata)?;

        let finished_at = Utc::now();
        let summary = AuditRunSummary {
            run_id,
            started_at,
            finished_at,
            input_rows,
            ignored_client_rows,
            unparseable_created_rows: drops.unparseable,
            before_cutoff_rows: drops.before_cutoff,
            eligible_rows,
            flagged_groups: duplicates.len(),
            selected_rows: ordered.len(),
            artifact,
            filter_metadata: FILTER_METADATA_NAME.to_string(),
            output_dir: self.config.output_dir.display().to_string(),
        };
        store.write_json(SUMMARY_NAME, &summary)?;
        info!(
            %run_id,
            artifact = %summary.artifact.path.display(),
            rows = summary.selected_rows,
            "audit run complete"
        );
        Ok(summary)
    }
}
