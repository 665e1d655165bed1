//! Tabular source files: discovery and reading.
//!
//! # Supported Formats
//!
//! | Extension | Reader |
//! |-----------|--------|
//! | `.xlsx`, `.xlsm`, `.xls`, `.xlsb`, `.ods` | `calamine`, first worksheet |
//! | `.csv` | `csv` |
//!
//! In every format the first row is the header. Cells that are empty after
//! trimming read as `None`.

use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use calamine::{open_workbook_auto, Data, Reader};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::error::{HarnessError, HarnessResult};

const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "xlsb", "ods"];

/// Header plus data rows of one worksheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceTable {
    pub columns: Vec<String>,
    /// One entry per data row, each as wide as `columns`.
    pub rows: Vec<Vec<Option<String>>>,
}

/// Read the first worksheet of `path`.
///
/// Any failure to open or parse the file is a
/// [`SourceRead`](HarnessError::SourceRead) error naming the file.
pub fn read_table(path: &Path) -> HarnessResult<SourceTable> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    if ext == "csv" {
        read_csv(path)
    } else if WORKBOOK_EXTENSIONS.contains(&ext.as_str()) {
        read_workbook(path)
    } else {
        Err(HarnessError::source_read(
            path,
            format!("unsupported file type '.{}'", ext),
        ))
    }
}

fn read_workbook(path: &Path) -> HarnessResult<SourceTable> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| HarnessError::source_read(path, e))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| HarnessError::source_read(path, "workbook has no worksheets"))?
        .map_err(|e| HarnessError::source_read(path, e))?;

    let mut rows = range.rows();
    let header = match rows.next() {
        Some(header) => header,
        None => return Ok(SourceTable::default()),
    };
    let columns = header_names(header.iter().map(cell_text));

    let data = rows
        .map(|row| fit_width(row.iter().map(cell_text).collect(), columns.len()))
        .collect();

    Ok(SourceTable {
        columns,
        rows: data,
    })
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        other => non_empty(other.to_string()),
    }
}

fn read_csv(path: &Path) -> HarnessResult<SourceTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| HarnessError::source_read(path, e))?;

    let header = reader
        .headers()
        .map_err(|e| HarnessError::source_read(path, e))?
        .clone();
    let columns = header_names(header.iter().map(|h| non_empty(h.to_string())));

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| HarnessError::source_read(path, e))?;
        let cells = record.iter().map(|c| non_empty(c.to_string())).collect();
        rows.push(fit_width(cells, columns.len()));
    }

    Ok(SourceTable { columns, rows })
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Header cells as column names; blank headers become `column_<n>`.
fn header_names(cells: impl Iterator<Item = Option<String>>) -> Vec<String> {
    cells
        .enumerate()
        .map(|(i, cell)| cell.unwrap_or_else(|| format!("column_{}", i + 1)))
        .collect()
}

fn fit_width(mut cells: Vec<Option<String>>, width: usize) -> Vec<Option<String>> {
    cells.resize(width, None);
    cells
}

/// Metadata key for a column header: trimmed, lowercased, spaces as `_`.
pub fn normalize_column(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Files directly inside `inbox` whose names match `include_globs`.
///
/// Newest modification time first; equal times are ordered by name. A
/// missing inbox has no files.
pub fn discover_files(inbox: &Path, include_globs: &[String]) -> HarnessResult<Vec<PathBuf>> {
    if !inbox.exists() {
        return Ok(Vec::new());
    }
    let include_set = build_globset(include_globs)?;

    let mut found: Vec<(SystemTime, String, PathBuf)> = Vec::new();
    for entry in WalkDir::new(inbox).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| HarnessError::Storage(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !include_set.is_match(&name) {
            continue;
        }
        let modified = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        found.push((modified, name, entry.into_path()));
    }

    found.sort_by(|a, b| (Reverse(a.0), &a.1).cmp(&(Reverse(b.0), &b.1)));
    Ok(found.into_iter().map(|(_, _, path)| path).collect())
}

fn build_globset(patterns: &[String]) -> HarnessResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| HarnessError::Config(format!("include glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| HarnessError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;

    fn globs() -> Vec<String> {
        vec!["*.xlsx".into(), "*.csv".into()]
    }

    #[test]
    fn csv_table_reads_header_and_blank_cells() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("incidents.csv");
        std::fs::write(
            &path,
            "Incident ID,Root Cause,Cost\nINC-1, Config error ,1200\nINC-2,,\n,,\n",
        )
        .unwrap();

        let table = read_table(&path).unwrap();
        assert_eq!(table.columns, vec!["Incident ID", "Root Cause", "Cost"]);
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[0][1].as_deref(), Some("Config error"));
        assert_eq!(table.rows[1], vec![Some("INC-2".to_string()), None, None]);
        assert!(table.rows[2].iter().all(Option::is_none));
    }

    #[test]
    fn malformed_workbook_is_a_source_read_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.xlsx");
        std::fs::write(&path, b"this is not a zip archive").unwrap();
        match read_table(&path) {
            Err(HarnessError::SourceRead { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected SourceRead, got {:?}", other),
        }
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();
        assert!(matches!(
            read_table(&path),
            Err(HarnessError::SourceRead { .. })
        ));
    }

    #[test]
    fn column_names_are_normalized() {
        assert_eq!(normalize_column(" Root Cause "), "root_cause");
        assert_eq!(normalize_column("FY Quarter Id"), "fy_quarter_id");
    }

    #[test]
    fn discovery_orders_newest_first_then_by_name() {
        let tmp = TempDir::new().unwrap();
        for (name, secs) in [
            ("a.csv", 1_700_000_000),
            ("b.XLSX", 1_700_000_500),
            ("c.csv", 1_700_000_500),
            ("notes.txt", 1_700_000_900),
        ] {
            let path = tmp.path().join(name);
            std::fs::write(&path, "x").unwrap();
            set_file_mtime(&path, FileTime::from_unix_time(secs, 0)).unwrap();
        }
        std::fs::create_dir(tmp.path().join("nested.csv")).unwrap();

        let names: Vec<String> = discover_files(tmp.path(), &globs())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["b.XLSX", "c.csv", "a.csv"]);
    }

    #[test]
    fn missing_inbox_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(discover_files(&tmp.path().join("absent"), &globs())
            .unwrap()
            .is_empty());
    }
}
