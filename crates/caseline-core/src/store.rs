use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{
  DateTime,
  Utc
};
use serde::{
  Deserialize,
  Serialize
};
use serde_json::Value;

use crate::error::SyncResult;

pub type Row =
  serde_json::Map<String, Value>;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Table {
  Entities,
  ActivityLog,
  Tasks
}

impl Table {
  pub const ALL: [Table; 3] = [
    Table::Entities,
    Table::ActivityLog,
    Table::Tasks
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      | Table::Entities => "entities",
      | Table::ActivityLog => {
        "activity_log"
      }
      | Table::Tasks => "tasks"
    }
  }
}

impl std::fmt::Display for Table {
  fn fmt(
    &self,
    f: &mut std::fmt::Formatter<'_>
  ) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
  Eq(Value),
  Neq(Value),
  IsNull,
  NotNull,
  /// Case-insensitive substring match
  /// on a string column.
  Contains(String),
  Gte(Value),
  Lt(Value)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
  pub column: String,
  pub op:     Op
}

/// Conjunction of column conditions.
#[derive(
  Debug, Clone, Default, PartialEq,
)]
pub struct Filter {
  conditions: Vec<Condition>
}

impl Filter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn by_id(
    id: impl Serialize
  ) -> Self {
    Self::new().eq("id", id)
  }

  fn push(
    mut self,
    column: &str,
    op: Op
  ) -> Self {
    self.conditions.push(Condition {
      column: column.to_string(),
      op
    });
    self
  }

  pub fn eq(
    self,
    column: &str,
    value: impl Serialize
  ) -> Self {
    let value = to_filter_value(value);
    self.push(column, Op::Eq(value))
  }

  pub fn neq(
    self,
    column: &str,
    value: impl Serialize
  ) -> Self {
    let value = to_filter_value(value);
    self.push(column, Op::Neq(value))
  }

  pub fn is_null(
    self,
    column: &str
  ) -> Self {
    self.push(column, Op::IsNull)
  }

  pub fn not_null(
    self,
    column: &str
  ) -> Self {
    self.push(column, Op::NotNull)
  }

  pub fn contains(
    self,
    column: &str,
    needle: &str
  ) -> Self {
    self.push(
      column,
      Op::Contains(needle.to_lowercase())
    )
  }

  pub fn gte(
    self,
    column: &str,
    value: impl Serialize
  ) -> Self {
    let value = to_filter_value(value);
    self.push(column, Op::Gte(value))
  }

  pub fn lt(
    self,
    column: &str,
    value: impl Serialize
  ) -> Self {
    let value = to_filter_value(value);
    self.push(column, Op::Lt(value))
  }

  pub fn is_empty(&self) -> bool {
    self.conditions.is_empty()
  }

  pub fn conditions(
    &self
  ) -> &[Condition] {
    &self.conditions
  }

  pub fn matches(
    &self,
    row: &Row
  ) -> bool {
    self.conditions.iter().all(|cond| {
      let cell = row
        .get(&cond.column)
        .unwrap_or(&Value::Null);
      match &cond.op {
        | Op::Eq(value) => {
          compare_values(cell, value)
            == Some(Ordering::Equal)
        }
        | Op::Neq(value) => {
          compare_values(cell, value)
            != Some(Ordering::Equal)
        }
        | Op::IsNull => cell.is_null(),
        | Op::NotNull => !cell.is_null(),
        | Op::Contains(needle) => {
          cell.as_str().is_some_and(|s| {
            s.to_lowercase()
              .contains(needle.as_str())
          })
        }
        | Op::Gte(value) => matches!(
          compare_values(cell, value),
          Some(
            Ordering::Greater
              | Ordering::Equal
          )
        ),
        | Op::Lt(value) => {
          compare_values(cell, value)
            == Some(Ordering::Less)
        }
      }
    })
  }
}

/// Row view of a JSON object literal;
/// anything else is an empty row.
pub fn object_row(value: Value) -> Row {
  match value {
    | Value::Object(map) => map,
    | _ => Row::new()
  }
}

fn to_filter_value(
  value: impl Serialize
) -> Value {
  serde_json::to_value(value)
    .unwrap_or(Value::Null)
}

/// Orders JSON cells the way the remote
/// store would: numbers numerically,
/// timestamps chronologically, other
/// strings lexically. Mixed types do not
/// compare.
pub fn compare_values(
  left: &Value,
  right: &Value
) -> Option<Ordering> {
  match (left, right) {
    | (Value::Null, Value::Null) => {
      Some(Ordering::Equal)
    }
    | (Value::Bool(a), Value::Bool(b)) => {
      Some(a.cmp(b))
    }
    | (
      Value::Number(a),
      Value::Number(b)
    ) => a
      .as_f64()
      .zip(b.as_f64())
      .and_then(|(a, b)| {
        a.partial_cmp(&b)
      }),
    | (
      Value::String(a),
      Value::String(b)
    ) => {
      if let (Ok(a), Ok(b)) = (
        a.parse::<DateTime<Utc>>(),
        b.parse::<DateTime<Utc>>()
      ) {
        return Some(a.cmp(&b));
      }
      Some(a.cmp(b))
    }
    | _ => None
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum Direction {
  Asc,
  Desc
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
  keys: Vec<(String, Direction)>
}

impl Order {
  pub fn asc(column: &str) -> Self {
    Self {
      keys: vec![(
        column.to_string(),
        Direction::Asc
      )]
    }
  }

  pub fn desc(column: &str) -> Self {
    Self {
      keys: vec![(
        column.to_string(),
        Direction::Desc
      )]
    }
  }

  /// Newest first, ties broken by id.
  pub fn newest_first() -> Self {
    Self::desc("created_at")
      .then_desc("id")
  }

  pub fn then_asc(
    mut self,
    column: &str
  ) -> Self {
    self.keys.push((
      column.to_string(),
      Direction::Asc
    ));
    self
  }

  pub fn then_desc(
    mut self,
    column: &str
  ) -> Self {
    self.keys.push((
      column.to_string(),
      Direction::Desc
    ));
    self
  }

  pub fn compare(
    &self,
    a: &Row,
    b: &Row
  ) -> Ordering {
    for (column, direction) in &self.keys
    {
      let left = a
        .get(column)
        .unwrap_or(&Value::Null);
      let right = b
        .get(column)
        .unwrap_or(&Value::Null);
      let ord = match (left, right) {
        | (Value::Null, Value::Null) => {
          Ordering::Equal
        }
        | (Value::Null, _) => {
          Ordering::Greater
        }
        | (_, Value::Null) => {
          Ordering::Less
        }
        | _ => compare_values(
          left, right
        )
        .unwrap_or(Ordering::Equal)
      };
      let ord = match direction {
        | Direction::Asc => ord,
        | Direction::Desc => ord.reverse()
      };
      if ord != Ordering::Equal {
        return ord;
      }
    }
    Ordering::Equal
  }
}

/// The remote relational store as the
/// engine sees it.
#[async_trait]
pub trait DataStore: Send + Sync {
  async fn select(
    &self,
    table: Table,
    filter: &Filter,
    order: Option<&Order>,
    limit: Option<usize>
  ) -> SyncResult<Vec<Row>>;

  async fn insert(
    &self,
    table: Table,
    row: Row
  ) -> SyncResult<Row>;

  /// Applies `patch` to every matching
  /// row and returns the first one.
  async fn update(
    &self,
    table: Table,
    filter: &Filter,
    patch: Row
  ) -> SyncResult<Row>;

  async fn delete(
    &self,
    table: Table,
    filter: &Filter
  ) -> SyncResult<()>;

  async fn count(
    &self,
    table: Table,
    filter: &Filter
  ) -> SyncResult<u64>;
}
