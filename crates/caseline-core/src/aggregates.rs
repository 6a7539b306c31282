use std::sync::Arc;

use caseline_shared::TaskDto;
use chrono::NaiveDate;

use crate::error::SyncResult;
use crate::gate::{
  FetchGate,
  GateKey
};
use crate::repo;
use crate::store::DataStore;

pub const ATTENDED_TODAY: &str =
  "attended_today";
pub const OPEN_TASKS: &str = "open_tasks";

/// The expensive reads, all routed
/// through one [`FetchGate`].
#[derive(Clone)]
pub struct Aggregates {
  store: Arc<dyn DataStore>,
  gate:  FetchGate
}

impl Aggregates {
  pub fn new(
    store: Arc<dyn DataStore>,
    gate: FetchGate
  ) -> Self {
    Self { store, gate }
  }

  pub fn gate(&self) -> &FetchGate {
    &self.gate
  }

  pub fn attended_today_key() -> GateKey {
    GateKey::daily(ATTENDED_TODAY)
  }

  pub fn open_tasks_key() -> GateKey {
    GateKey::fixed(OPEN_TASKS)
  }

  /// Entities whose last attendance is
  /// today.
  pub async fn attended_today(
    &self
  ) -> SyncResult<u64> {
    let store = self.store.clone();
    self
      .gate
      .get_or_fetch(
        &Self::attended_today_key(),
        |day| count_attended(store, day)
      )
      .await
  }

  /// Bypasses the cooldown; used after
  /// attendance writes.
  pub async fn refresh_attended_today(
    &self
  ) -> SyncResult<u64> {
    let store = self.store.clone();
    self
      .gate
      .refresh(
        &Self::attended_today_key(),
        |day| count_attended(store, day)
      )
      .await
  }

  /// Last count written through for
  /// today, before any network read.
  pub fn provisional_attended_today(
    &self
  ) -> Option<u64> {
    self
      .gate
      .provisional(&Self::attended_today_key())
  }

  pub async fn open_tasks(
    &self
  ) -> SyncResult<Vec<TaskDto>> {
    let store = self.store.clone();
    self
      .gate
      .get_or_fetch(
        &Self::open_tasks_key(),
        move |_| async move {
          repo::list_open_tasks(store.as_ref())
            .await
        }
      )
      .await
  }
}

async fn count_attended(
  store: Arc<dyn DataStore>,
  day: Option<NaiveDate>
) -> SyncResult<u64> {
  match day {
    | Some(day) => {
      repo::count_attended_on(
        store.as_ref(),
        day
      )
      .await
    }
    | None => Ok(0)
  }
}
