use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};
use serde::Serialize;
use tracing::debug;

use crate::error::ExtractError;
use crate::model::Record;

/// Column appended to every CSV table with the record's source page.
pub const SOURCE_PAGE_COLUMN: &str = "source_page";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteFailure {
    pub key: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteResult {
    pub inserted: usize,
    pub updated: usize,
    pub failed: Vec<WriteFailure>,
}

/// Destination for extracted records. Upserts are keyed by each record's
/// natural key, so writing the same batch twice changes nothing.
pub trait Writer {
    /// Rejected records are reported in [`WriteResult::failed`]; the rest of
    /// the batch is still written.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] when the store itself cannot be read or
    /// written.
    fn upsert(&mut self, table: &str, records: &[Record]) -> Result<WriteResult, ExtractError>;
}

fn precheck(table: &str, record: &Record) -> Result<(), WriteFailure> {
    if record.table != table {
        return Err(WriteFailure {
            key: record.key(),
            reason: format!("record belongs to table '{}'", record.table),
        });
    }
    if record.key_fields().is_empty() {
        return Err(WriteFailure {
            key: Vec::new(),
            reason: "record has no natural key".to_string(),
        });
    }
    Ok(())
}

/// Keeps records in memory, one map per table.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    tables: BTreeMap<String, BTreeMap<Vec<String>, Record>>,
}

impl MemoryWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored records of `table`, ordered by natural key.
    #[must_use]
    pub fn records(&self, table: &str) -> Vec<&Record> {
        self.tables
            .get(table)
            .map(|records| records.values().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, BTreeMap::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.values().all(BTreeMap::is_empty)
    }
}

impl Writer for MemoryWriter {
    fn upsert(&mut self, table: &str, records: &[Record]) -> Result<WriteResult, ExtractError> {
        let mut result = WriteResult::default();
        let stored = self.tables.entry(table.to_string()).or_default();

        for record in records {
            if let Err(failure) = precheck(table, record) {
                result.failed.push(failure);
                continue;
            }
            if stored.insert(record.key(), record.clone()).is_some() {
                result.updated += 1;
            } else {
                result.inserted += 1;
            }
        }
        Ok(result)
    }
}

/// Writes one `<table>.csv` per table into a directory. Each upsert reads the
/// existing file, replaces rows by natural key, appends new ones and rewrites
/// the file.
#[derive(Debug, Clone)]
pub struct CsvWriter {
    dir: PathBuf,
}

struct CsvTable {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl CsvWriter {
    /// # Errors
    ///
    /// Returns [`ExtractError::Io`] when the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ExtractError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.csv"))
    }

    fn read_table(path: &Path) -> Result<Option<CsvTable>, ExtractError> {
        if !path.exists() {
            return Ok(None);
        }

        let mut reader = ReaderBuilder::new().from_path(path)?;
        let header = reader.headers()?.iter().map(ToString::to_string).collect();
        let rows = reader
            .records()
            .map(|row| row.map(|row| row.iter().map(ToString::to_string).collect()))
            .collect::<Result<Vec<Vec<String>>, csv::Error>>()?;
        Ok(Some(CsvTable { header, rows }))
    }

    fn write_table(path: &Path, table: &CsvTable) -> Result<(), ExtractError> {
        let mut writer = WriterBuilder::new().from_path(path)?;
        writer.write_record(&table.header)?;
        for row in &table.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn header_for(record: &Record) -> Vec<String> {
    let mut header = record.fields.keys().cloned().collect::<Vec<_>>();
    header.push(SOURCE_PAGE_COLUMN.to_string());
    header
}

fn row_for(record: &Record) -> Vec<String> {
    let mut row = record
        .fields
        .values()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    row.push(record.page.to_string());
    row
}

impl Writer for CsvWriter {
    fn upsert(&mut self, table: &str, records: &[Record]) -> Result<WriteResult, ExtractError> {
        let mut result = WriteResult::default();
        let path = self.table_path(table);

        let mut stored = match Self::read_table(&path)? {
            Some(stored) => stored,
            None => match records.first() {
                Some(first) => CsvTable {
                    header: header_for(first),
                    rows: Vec::new(),
                },
                None => return Ok(result),
            },
        };

        let mut index: HashMap<Vec<String>, usize> = HashMap::new();
        for record in records {
            if let Err(failure) = precheck(table, record) {
                result.failed.push(failure);
                continue;
            }
            if header_for(record) != stored.header {
                result.failed.push(WriteFailure {
                    key: record.key(),
                    reason: format!(
                        "fields do not match the columns of {}",
                        path.display()
                    ),
                });
                continue;
            }

            if index.is_empty() {
                let positions = record
                    .key_fields()
                    .iter()
                    .filter_map(|field| stored.header.iter().position(|column| column == field))
                    .collect::<Vec<_>>();
                for (row_index, row) in stored.rows.iter().enumerate() {
                    let key = positions
                        .iter()
                        .map(|position| row.get(*position).cloned().unwrap_or_default())
                        .collect();
                    index.insert(key, row_index);
                }
            }

            let key = record.key();
            let row = row_for(record);
            if let Some(existing) = index.get(&key) {
                stored.rows[*existing] = row;
                result.updated += 1;
            } else {
                index.insert(key, stored.rows.len());
                stored.rows.push(row);
                result.inserted += 1;
            }
        }

        Self::write_table(&path, &stored)?;
        debug!(
            table,
            path = %path.display(),
            inserted = result.inserted,
            updated = result.updated,
            failed = result.failed.len(),
            "csv table written"
        );
        Ok(result)
    }
}
