//! One logical "current search" per list
//! view.
//!
//! Every keystroke calls
//! [`QueryController::search`]. The call
//! supersedes whatever the slot was
//! doing (debounce timer or in-flight
//! fetch) by cancelling its token, waits
//! out the settle delay, then fetches.
//! Completion handlers only apply a
//! result if their generation is still
//! the slot's current one, so a slow
//! early response can never overwrite a
//! fast later one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use caseline_shared::{
  EntityDto,
  EntitySearchArgs
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{
  debug,
  warn
};

use crate::error::{
  SyncError,
  SyncResult
};
use crate::repo;
use crate::store::DataStore;

#[async_trait]
pub trait QuerySource:
  Send + Sync + 'static
{
  type Item: Clone + Send + Sync + 'static;
  type Filters: Clone
    + Send
    + Sync
    + 'static;

  async fn fetch(
    &self,
    term: &str,
    filters: &Self::Filters
  ) -> SyncResult<Vec<Self::Item>>;
}

pub struct EntitySearch {
  store: Arc<dyn DataStore>
}

impl EntitySearch {
  pub fn new(
    store: Arc<dyn DataStore>
  ) -> Self {
    Self { store }
  }
}

#[async_trait]
impl QuerySource for EntitySearch {
  type Filters = EntitySearchArgs;
  type Item = EntityDto;

  async fn fetch(
    &self,
    term: &str,
    filters: &EntitySearchArgs
  ) -> SyncResult<Vec<EntityDto>> {
    repo::search_entities(
      self.store.as_ref(),
      term,
      filters
    )
    .await
  }
}

/// What the list view renders.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryView<T> {
  /// Term whose results are on screen.
  pub term:    String,
  pub results: Option<Vec<T>>,
  pub loading: bool,
  /// Only set while there is nothing
  /// else to show.
  pub error:   Option<SyncError>
}

impl<T> Default for QueryView<T> {
  fn default() -> Self {
    Self {
      term:    String::new(),
      results: None,
      loading: false,
      error:   None
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome<T> {
  Applied(Vec<T>),
  Superseded,
  Failed(SyncError)
}

struct Slot {
  generation: u64,
  token:      CancellationToken
}

struct Inner<Q: QuerySource> {
  source:   Q,
  debounce: Duration,
  slot:     Mutex<Slot>,
  view: watch::Sender<QueryView<Q::Item>>
}

pub struct QueryController<Q: QuerySource> {
  inner: Arc<Inner<Q>>
}

impl<Q: QuerySource> Clone
  for QueryController<Q>
{
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone()
    }
  }
}

impl<Q: QuerySource> QueryController<Q> {
  pub fn new(
    source: Q,
    debounce: Duration
  ) -> Self {
    let (view, _) =
      watch::channel(QueryView::default());
    Self {
      inner: Arc::new(Inner {
        source,
        debounce,
        slot: Mutex::new(Slot {
          generation: 0,
          token:      CancellationToken::new()
        }),
        view
      })
    }
  }

  pub fn view(&self) -> QueryView<Q::Item> {
    self.inner.view.borrow().clone()
  }

  pub fn subscribe(
    &self
  ) -> watch::Receiver<QueryView<Q::Item>>
  {
    self.inner.view.subscribe()
  }

  /// Takes over the slot: cancels what
  /// was pending and hands back the new
  /// generation with its token.
  fn claim(
    &self
  ) -> (u64, CancellationToken) {
    let mut slot = self.inner.slot.lock();
    slot.token.cancel();
    slot.generation += 1;
    slot.token = CancellationToken::new();
    (slot.generation, slot.token.clone())
  }

  #[tracing::instrument(skip_all, fields(term = %term))]
  pub async fn search(
    &self,
    term: &str,
    filters: Q::Filters
  ) -> SearchOutcome<Q::Item> {
    let term = term.trim().to_string();
    let (generation, token) = self.claim();

    self.inner.view.send_modify(|view| {
      if view.results.is_none() {
        view.loading = true;
        view.error = None;
      }
    });

    tokio::select! {
      _ = token.cancelled() => {
        debug!(generation, "superseded while settling");
        return SearchOutcome::Superseded;
      }
      _ = tokio::time::sleep(self.inner.debounce) => {}
    }

    let result = tokio::select! {
      _ = token.cancelled() => {
        debug!(generation, "superseded in flight");
        return SearchOutcome::Superseded;
      }
      result = self.inner.source.fetch(&term, &filters) => result,
    };

    let slot = self.inner.slot.lock();
    if slot.generation != generation {
      debug!(
        generation,
        current = slot.generation,
        "discarding stale response"
      );
      return SearchOutcome::Superseded;
    }

    match result {
      | Ok(items) => {
        self.inner.view.send_modify(|view| {
          view.term = term;
          view.results = Some(items.clone());
          view.loading = false;
          view.error = None;
        });
        SearchOutcome::Applied(items)
      }
      | Err(err) => {
        warn!(error = %err, "search failed; keeping prior results");
        self.inner.view.send_modify(|view| {
          view.loading = false;
          if view.results.is_none() {
            view.error = Some(err.clone());
          }
        });
        SearchOutcome::Failed(err)
      }
    }
  }

  /// Drops whatever the slot is doing,
  /// e.g. when the view goes away.
  pub fn cancel(&self) {
    let _ = self.claim();
    self.inner.view.send_modify(|view| {
      view.loading = false;
    });
  }
}
