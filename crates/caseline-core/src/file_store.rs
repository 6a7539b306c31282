use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::memory_store::MemoryStore;
use crate::store::{DataStore, Filter, Order, Row, Table};

/// Store persisted as one JSONL file per table. Every successful write
/// rewrites the touched table atomically.
#[derive(Debug)]
pub struct FileStore {
    pub data_dir: PathBuf,
    rows: MemoryStore,
}

impl FileStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let rows = MemoryStore::new();
        for table in Table::ALL {
            let path = table_path(&data_dir, table);
            if !path.exists() {
                fs::write(&path, "")?;
            }
            let loaded = load_jsonl(&path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            rows.seed(table, loaded);
        }

        info!(data_dir = %data_dir.display(), "opened file store");
        Ok(Self { data_dir, rows })
    }

    /// Writes `table` to disk. On failure the in-memory rows go back to
    /// `before` so a later write cannot persist this one by accident.
    fn persist(&self, table: Table, before: Vec<Row>) -> SyncResult<()> {
        let path = table_path(&self.data_dir, table);
        save_jsonl_atomic(&path, &self.rows.snapshot(table)).map_err(|err| {
            warn!(%table, error = %err, "persist failed; restoring table");
            self.rows.replace(table, before);
            SyncError::Storage(format!("failed to persist {table}: {err:#}"))
        })
    }
}

fn table_path(data_dir: &Path, table: Table) -> PathBuf {
    data_dir.join(format!("{}.jsonl", table.as_str()))
}

#[async_trait]
impl DataStore for FileStore {
    async fn select(
        &self,
        table: Table,
        filter: &Filter,
        order: Option<&Order>,
        limit: Option<usize>,
    ) -> SyncResult<Vec<Row>> {
        self.rows.select(table, filter, order, limit).await
    }

    async fn insert(&self, table: Table, row: Row) -> SyncResult<Row> {
        let before = self.rows.snapshot(table);
        let row = self.rows.insert(table, row).await?;
        self.persist(table, before)?;
        Ok(row)
    }

    async fn update(&self, table: Table, filter: &Filter, patch: Row) -> SyncResult<Row> {
        let before = self.rows.snapshot(table);
        let row = self.rows.update(table, filter, patch).await?;
        self.persist(table, before)?;
        Ok(row)
    }

    async fn delete(&self, table: Table, filter: &Filter) -> SyncResult<()> {
        let before = self.rows.snapshot(table);
        self.rows.delete(table, filter).await?;
        self.persist(table, before)
    }

    async fn count(&self, table: Table, filter: &Filter) -> SyncResult<u64> {
        self.rows.count(table, filter).await
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> anyhow::Result<Vec<Row>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let row: Row = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(row);
    }

    debug!(count = out.len(), "loaded rows from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, rows))]
fn save_jsonl_atomic(path: &Path, rows: &[Row]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = rows.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for row in rows {
        let serialized = serde_json::to_string(row)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
