//! Source-table loading for portcheck: CSV ingestion and column binding.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use portcheck_core::{ColumnBindings, PortRecord};
use serde::Serialize;
use thiserror::Error;

pub const CRATE_NAME: &str = "portcheck-adapters";

#[derive(Debug, Error)]
pub enum LoadError {
    /// The source table cannot be located. Fatal; nothing is written.
    #[error("input table not found: {}", .path.display())]
    MissingInput { path: PathBuf },
    /// One or more bound columns are absent from the header. All missing
    /// names are reported at once.
    #[error("input table is missing required column(s): {}", .missing.join(", "))]
    MissingColumns { missing: Vec<String> },
    #[error("reading input table: {0}")]
    Io(#[from] io::Error),
    #[error("parsing input table: {0}")]
    Csv(#[from] csv::Error),
}

/// Header indices of the five bound columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedColumns {
    pub created: usize,
    pub client_group: usize,
    pub nap: usize,
    pub port: usize,
    pub secondary_signal: usize,
}

/// The loaded source table: original header, resolved bindings, and one
/// record per data row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordTable {
    pub header: Vec<String>,
    pub columns: ResolvedColumns,
    pub records: Vec<PortRecord>,
}

/// Locates every bound column in the header, collecting all misses before
/// failing so one run surfaces the whole problem.
pub fn resolve_columns(
    header: &[String],
    bindings: &ColumnBindings,
) -> Result<ResolvedColumns, LoadError> {
    let mut missing = Vec::new();
    // Placeholder 0 indices never escape: the error path discards them.
    let mut find = |name: &str| match header.iter().position(|h| h == name) {
        Some(index) => index,
        None => {
            missing.push(name.to_string());
            0
        }
    };
    let columns = ResolvedColumns {
        created: find(&bindings.created),
        client_group: find(&bindings.client_group),
        nap: find(&bindings.nap),
        port: find(&bindings.port),
        secondary_signal: find(&bindings.secondary_signal),
    };
    if !missing.is_empty() {
        return Err(LoadError::MissingColumns { missing });
    }
    Ok(columns)
}

/// Reads a CSV table from any reader. Rows shorter than a bound column
/// read as empty cells; an empty cell is an absent value.
pub fn read_table<R: io::Read>(
    reader: R,
    bindings: &ColumnBindings,
) -> Result<RecordTable, LoadError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let columns = resolve_columns(&header, bindings)?;

    let mut records = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row?;
        let cells: Vec<String> = row.iter().map(str::to_string).collect();
        records.push(PortRecord {
            line: index as u64 + 1,
            created_raw: cell_or_empty(&cells, columns.created),
            client_group: cell_or_empty(&cells, columns.client_group),
            nap: cell_or_empty(&cells, columns.nap),
            port: cell_or_empty(&cells, columns.port),
            secondary_signal: cell_or_empty(&cells, columns.secondary_signal),
            cells,
        });
    }

    Ok(RecordTable {
        header,
        columns,
        records,
    })
}

/// Loads the source table from disk, checking existence up front so a
/// missing export is reported as such rather than as an open error.
pub fn load_table(path: &Path, bindings: &ColumnBindings) -> Result<RecordTable, LoadError> {
    if !path.exists() {
        return Err(LoadError::MissingInput {
            path: path.to_path_buf(),
        });
    }
    read_table(File::open(path)?, bindings)
}

fn cell_or_empty(cells: &[String], index: usize) -> String {
    cells.get(index).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn read(text: &str) -> RecordTable {
        read_table(Cursor::new(text.as_bytes()), &ColumnBindings::default())
            .expect("table should load")
    }

    #[test]
    fn missing_input_is_its_own_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.csv");
        let err = load_table(&path, &ColumnBindings::default())
            .err()
            .expect("load should fail");
        assert!(matches!(err, LoadError::MissingInput { .. }));
        assert!(err.to_string().contains("absent.csv"));
    }

    #[test]
    fn all_missing_columns_are_reported_together() {
        let header = vec!["Created".to_string(), "COID".to_string()];
        let err = resolve_columns(&header, &ColumnBindings::default())
            .err()
            .expect("resolution should fail");
        match err {
            LoadError::MissingColumns { missing } => {
                assert_eq!(
                    missing,
                    vec!["NAP Number", "MPT Port Number", "Secondary port# check"]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn binds_columns_by_header_name_not_position() {
        let table = read(
            "COID,Notes,Created,NAP Number,Secondary port# check,MPT Port Number\n\
             NWST,\"loop, spare pair\",2024-05-14 09:30:00,NAP-0042,port# to check,100\n",
        );
        assert_eq!(table.header.len(), 6);
        assert_eq!(table.records.len(), 1);

        let record = &table.records[0];
        assert_eq!(record.line, 1);
        assert_eq!(record.client_group, "NWST");
        assert_eq!(record.created_raw, "2024-05-14 09:30:00");
        assert_eq!(record.nap, "NAP-0042");
        assert_eq!(record.port, "100");
        assert_eq!(record.secondary_signal, "port# to check");
        assert_eq!(record.cells[1], "loop, spare pair");
    }

    #[test]
    fn short_rows_read_as_empty_cells() {
        let table = read(
            "Created,COID,NAP Number,MPT Port Number,Secondary port# check\n\
             2024-05-14 09:30:00,NWST,NAP-0042\n",
        );
        let record = &table.records[0];
        assert_eq!(record.nap, "NAP-0042");
        assert_eq!(record.port, "");
        assert_eq!(record.secondary_signal, "");
        assert_eq!(record.cells.len(), 3);
    }

    #[test]
    fn custom_bindings_resolve() {
        let bindings = ColumnBindings {
            created: "Opened".to_string(),
            client_group: "Client".to_string(),
            nap: "Site".to_string(),
            port: "Port".to_string(),
            secondary_signal: "Flagged".to_string(),
        };
        let table = read_table(
            Cursor::new(b"Opened,Client,Site,Port,Flagged\n2024-04-01,GRPL,S-1,7,TRUE\n" as &[u8]),
            &bindings,
        )
        .expect("table should load");
        assert_eq!(table.records[0].client_group, "GRPL");
        assert_eq!(table.records[0].port, "7");
    }

    #[test]
    fn data_rows_are_numbered_from_one() {
        let table = read(
            "Created,COID,NAP Number,MPT Port Number,Secondary port# check\n\
             2024-05-14,A,1,10,x\n\
             2024-05-15,A,1,11,x\n",
        );
        let lines: Vec<u64> = table.records.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![1, 2]);
    }
}
