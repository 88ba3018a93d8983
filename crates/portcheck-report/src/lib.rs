//! Artifact persistence for portcheck: atomic CSV writes, browsing
//! metadata, and run accounting files.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use portcheck_core::{AnnotatedRecord, CHECK_FLAG_COLUMN, DUPLICATE_PORTS_COLUMN};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

pub const CRATE_NAME: &str = "portcheck-report";

/// Cap on the distinct values listed per column facet.
pub const FACET_VALUE_CAP: usize = 50;

/// Accounting for one persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrittenArtifact {
    pub name: String,
    pub path: PathBuf,
    pub sha256: String,
    pub byte_size: usize,
    pub rows: usize,
}

/// Distinct-value counts for one output column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnFacet {
    pub column: String,
    /// Count before capping; `values` may hold fewer entries.
    pub distinct_values: usize,
    pub values: BTreeMap<String, usize>,
}

/// Browsing metadata written next to the artifact, so a reviewer can see
/// per-column value distributions without opening the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterMetadata {
    pub artifact: String,
    pub rows: usize,
    pub facets: Vec<ColumnFacet>,
}

/// Directory where one run's artifacts land.
#[derive(Debug, Clone)]
pub struct ReportStore {
    root: PathBuf,
}

impl ReportStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Writes the filtered table via a temp file and atomic rename, so a
    /// failed run never leaves a partial artifact behind.
    pub fn write_artifact(
        &self,
        name: &str,
        header: &[String],
        records: &[AnnotatedRecord],
    ) -> anyhow::Result<WrittenArtifact> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating report directory {}", self.root.display()))?;

        let bytes = render_artifact(header, records)?;
        let path = self.root.join(name);
        let temp_path = self.root.join(format!(".{name}.tmp"));

        // A stale temp file from an interrupted run must not block this one.
        let _ = fs::remove_file(&temp_path);

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .with_context(|| format!("opening temp artifact file {}", temp_path.display()))?;
        file.write_all(&bytes)
            .with_context(|| format!("writing temp artifact file {}", temp_path.display()))?;
        file.flush()
            .with_context(|| format!("flushing temp artifact file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp artifact {} -> {}",
                    temp_path.display(),
                    path.display()
                )
            });
        }

        let written = WrittenArtifact {
            name: name.to_string(),
            path,
            sha256: Self::sha256_hex(&bytes),
            byte_size: bytes.len(),
            rows: records.len(),
        };
        info!(
            artifact = %written.path.display(),
            rows = written.rows,
            sha256 = %written.sha256,
            "wrote filtered artifact"
        );
        Ok(written)
    }

    /// Serializes a JSON document into the report directory.
    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating report directory {}", self.root.display()))?;
        let path = self.root.join(name);
        let bytes = serde_json::to_vec_pretty(value).with_context(|| format!("serializing {name}"))?;
        fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

/// Renders the artifact: the original header plus the two review columns,
/// one row per record in the given order. Short rows are padded to the
/// header width so the appended columns never shift left; rows wider than
/// the header keep their extra cells ahead of the annotations.
fn render_artifact(header: &[String], records: &[AnnotatedRecord]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(Vec::new());

    let mut out_header: Vec<&str> = header.iter().map(String::as_str).collect();
    out_header.push(DUPLICATE_PORTS_COLUMN);
    out_header.push(CHECK_FLAG_COLUMN);
    writer
        .write_record(&out_header)
        .context("rendering artifact header")?;

    for annotated in records {
        let mut row: Vec<&str> = annotated.record.cells.iter().map(String::as_str).collect();
        if row.len() < header.len() {
            row.resize(header.len(), "");
        }
        row.push(annotated.duplicate_ports_text.as_str());
        row.push(annotated.flag_message.as_str());
        writer.write_record(&row).context("rendering artifact row")?;
    }

    writer.into_inner().context("flushing artifact rows")
}

/// Builds per-column facets over the rows as written, review columns
/// included. `distinct_values` counts before the cap is applied.
pub fn filter_metadata(
    artifact: &WrittenArtifact,
    header: &[String],
    records: &[AnnotatedRecord],
) -> FilterMetadata {
    let mut out_header: Vec<String> = header.to_vec();
    out_header.push(DUPLICATE_PORTS_COLUMN.to_string());
    out_header.push(CHECK_FLAG_COLUMN.to_string());

    let facets = out_header
        .iter()
        .enumerate()
        .map(|(index, column)| {
            let mut values: BTreeMap<String, usize> = BTreeMap::new();
            for annotated in records {
                *values.entry(output_cell(annotated, header.len(), index)).or_default() += 1;
            }
            let distinct_values = values.len();
            let values: BTreeMap<String, usize> =
                values.into_iter().take(FACET_VALUE_CAP).collect();
            ColumnFacet {
                column: column.clone(),
                distinct_values,
                values,
            }
        })
        .collect();

    FilterMetadata {
        artifact: artifact.name.clone(),
        rows: records.len(),
        facets,
    }
}

fn output_cell(annotated: &AnnotatedRecord, header_len: usize, index: usize) -> String {
    if index < header_len {
        annotated
            .record
            .cells
            .get(index)
            .cloned()
            .unwrap_or_default()
    } else if index == header_len {
        annotated.duplicate_ports_text.clone()
    } else {
        annotated.flag_message.clone()
    }
}
