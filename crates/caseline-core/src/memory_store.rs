use std::collections::{
  HashMap,
  HashSet,
  VecDeque
};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{
  debug,
  trace
};

use crate::error::{
  SyncError,
  SyncResult
};
use crate::store::{
  DataStore,
  Filter,
  Order,
  Row,
  Table
};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash,
)]
pub enum StoreOp {
  Select,
  Insert,
  Update,
  Delete,
  Count
}

/// In-process stand-in for the remote
/// store. Besides holding rows it can
/// script latency, inject failures and
/// stall tables, and it counts every
/// call so callers can assert how many
/// round-trips were issued.
#[derive(Debug, Default)]
pub struct MemoryStore {
  tables:
    Mutex<HashMap<Table, Vec<Row>>>,
  default_latency: Mutex<Duration>,
  scripted_latency: Mutex<
    HashMap<Table, VecDeque<Duration>>
  >,
  failures: Mutex<
    HashMap<
      (Table, StoreOp),
      VecDeque<SyncError>
    >
  >,
  stalled: Mutex<HashSet<Table>>,
  calls:
    Mutex<HashMap<(Table, StoreOp), u64>>
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn seed(
    &self,
    table: Table,
    rows: impl IntoIterator<Item = Row>
  ) {
    self
      .tables
      .lock()
      .entry(table)
      .or_default()
      .extend(rows);
  }

  pub fn snapshot(
    &self,
    table: Table
  ) -> Vec<Row> {
    self
      .tables
      .lock()
      .get(&table)
      .cloned()
      .unwrap_or_default()
  }

  /// Swaps in `rows` as the whole
  /// contents of `table`.
  pub fn replace(
    &self,
    table: Table,
    rows: Vec<Row>
  ) {
    self.tables.lock().insert(table, rows);
  }

  pub fn set_latency(
    &self,
    latency: Duration
  ) {
    *self.default_latency.lock() =
      latency;
  }

  /// Latency for the next call against
  /// `table`; queued values are used in
  /// call order before falling back to
  /// the default.
  pub fn push_latency(
    &self,
    table: Table,
    latency: Duration
  ) {
    self
      .scripted_latency
      .lock()
      .entry(table)
      .or_default()
      .push_back(latency);
  }

  pub fn fail_next(
    &self,
    table: Table,
    op: StoreOp,
    err: SyncError
  ) {
    self
      .failures
      .lock()
      .entry((table, op))
      .or_default()
      .push_back(err);
  }

  /// Every later call against `table`
  /// never resolves.
  pub fn stall(&self, table: Table) {
    self.stalled.lock().insert(table);
  }

  pub fn calls(
    &self,
    table: Table,
    op: StoreOp
  ) -> u64 {
    self
      .calls
      .lock()
      .get(&(table, op))
      .copied()
      .unwrap_or(0)
  }

  async fn round_trip(
    &self,
    table: Table,
    op: StoreOp
  ) -> SyncResult<()> {
    *self
      .calls
      .lock()
      .entry((table, op))
      .or_default() += 1;

    let latency = self
      .scripted_latency
      .lock()
      .get_mut(&table)
      .and_then(VecDeque::pop_front)
      .unwrap_or_else(|| {
        *self.default_latency.lock()
      });
    if !latency.is_zero() {
      tokio::time::sleep(latency).await;
    }

    let stalled =
      self.stalled.lock().contains(&table);
    if stalled {
      trace!(%table, ?op, "stalled call");
      std::future::pending::<()>().await;
    }

    let injected = self
      .failures
      .lock()
      .get_mut(&(table, op))
      .and_then(VecDeque::pop_front);
    if let Some(err) = injected {
      debug!(%table, ?op, error = %err, "injected store failure");
      return Err(err);
    }
    Ok(())
  }
}

fn require_filter(
  table: Table,
  filter: &Filter,
  verb: &str
) -> SyncResult<()> {
  if filter.is_empty() {
    return Err(SyncError::validation(
      format!(
        "refusing to {verb} every row \
         of {table}"
      )
    ));
  }
  Ok(())
}

#[async_trait]
impl DataStore for MemoryStore {
  async fn select(
    &self,
    table: Table,
    filter: &Filter,
    order: Option<&Order>,
    limit: Option<usize>
  ) -> SyncResult<Vec<Row>> {
    self
      .round_trip(table, StoreOp::Select)
      .await?;

    let mut rows: Vec<Row> = self
      .tables
      .lock()
      .get(&table)
      .map(|rows| {
        rows
          .iter()
          .filter(|row| {
            filter.matches(row)
          })
          .cloned()
          .collect()
      })
      .unwrap_or_default();

    if let Some(order) = order {
      rows.sort_by(|a, b| {
        order.compare(a, b)
      });
    }
    if let Some(limit) = limit {
      rows.truncate(limit);
    }
    Ok(rows)
  }

  async fn insert(
    &self,
    table: Table,
    row: Row
  ) -> SyncResult<Row> {
    self
      .round_trip(table, StoreOp::Insert)
      .await?;

    let id = row
      .get("id")
      .filter(|id| !id.is_null())
      .cloned()
      .ok_or_else(|| {
        SyncError::validation(format!(
          "missing identifier for insert \
           into {table}"
        ))
      })?;

    let mut tables = self.tables.lock();
    let rows =
      tables.entry(table).or_default();
    if rows
      .iter()
      .any(|r| r.get("id") == Some(&id))
    {
      return Err(SyncError::validation(
        format!(
          "duplicate identifier {id} in \
           {table}"
        )
      ));
    }
    rows.push(row.clone());
    Ok(row)
  }

  async fn update(
    &self,
    table: Table,
    filter: &Filter,
    patch: Row
  ) -> SyncResult<Row> {
    require_filter(table, filter, "update")?;
    self
      .round_trip(table, StoreOp::Update)
      .await?;

    let mut tables = self.tables.lock();
    let mut first: Option<Row> = None;
    for row in tables
      .entry(table)
      .or_default()
      .iter_mut()
      .filter(|row| filter.matches(row))
    {
      for (key, value) in &patch {
        row.insert(
          key.clone(),
          value.clone()
        );
      }
      if first.is_none() {
        first = Some(row.clone());
      }
    }

    first.ok_or_else(|| {
      SyncError::not_found(format!(
        "{table} row"
      ))
    })
  }

  async fn delete(
    &self,
    table: Table,
    filter: &Filter
  ) -> SyncResult<()> {
    require_filter(table, filter, "delete")?;
    self
      .round_trip(table, StoreOp::Delete)
      .await?;

    let mut tables = self.tables.lock();
    let rows =
      tables.entry(table).or_default();
    let before = rows.len();
    rows.retain(|row| !filter.matches(row));
    trace!(%table, removed = before - rows.len(), "deleted rows");
    Ok(())
  }

  async fn count(
    &self,
    table: Table,
    filter: &Filter
  ) -> SyncResult<u64> {
    self
      .round_trip(table, StoreOp::Count)
      .await?;

    let count = self
      .tables
      .lock()
      .get(&table)
      .map(|rows| {
        rows
          .iter()
          .filter(|row| {
            filter.matches(row)
          })
          .count()
      })
      .unwrap_or(0);
    Ok(count as u64)
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::store::object_row;

  #[tokio::test]
  async fn insert_requires_identifier() {
    let store = MemoryStore::new();
    let err = store
      .insert(
        Table::Tasks,
        object_row(json!({"title": "x"}))
      )
      .await
      .expect_err("missing id");
    assert!(matches!(
      err,
      SyncError::Validation(_)
    ));
    assert!(
      store.snapshot(Table::Tasks).is_empty()
    );
  }

  #[tokio::test]
  async fn unfiltered_delete_is_rejected() {
    let store = MemoryStore::new();
    store.seed(
      Table::Tasks,
      [object_row(json!({"id": "t1"}))]
    );
    let err = store
      .delete(Table::Tasks, &Filter::new())
      .await
      .expect_err("empty filter");
    assert!(matches!(
      err,
      SyncError::Validation(_)
    ));
    assert_eq!(
      store.snapshot(Table::Tasks).len(),
      1
    );
  }

  #[tokio::test]
  async fn injected_failure_is_consumed_once()
  {
    let store = MemoryStore::new();
    store.fail_next(
      Table::Entities,
      StoreOp::Count,
      SyncError::network("offline")
    );
    assert!(
      store
        .count(
          Table::Entities,
          &Filter::new()
        )
        .await
        .is_err()
    );
    assert_eq!(
      store
        .count(
          Table::Entities,
          &Filter::new()
        )
        .await
        .expect("second count"),
      0
    );
    assert_eq!(
      store.calls(
        Table::Entities,
        StoreOp::Count
      ),
      2
    );
  }
}
