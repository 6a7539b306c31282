use thiserror::Error;

/// Failures surfaced by the sync
/// engine.
///
/// `Clone` so a single resolved fetch
/// can be handed to every waiter that
/// was collapsed onto it.
#[derive(
  Debug, Clone, Error, PartialEq, Eq,
)]
pub enum SyncError {
  #[error("network failure: {0}")]
  Network(String),

  #[error("{0}")]
  Validation(String),

  #[error("{what} not found")]
  NotFound { what: String },

  #[error(
    "request superseded by a newer one"
  )]
  Superseded,

  #[error("cache error: {0}")]
  Cache(String),

  /// Local disk write failed; retrying
  /// will not help.
  #[error("storage error: {0}")]
  Storage(String),

  #[error("decode error: {0}")]
  Decode(String)
}

impl SyncError {
  pub fn network(
    msg: impl Into<String>
  ) -> Self {
    Self::Network(msg.into())
  }

  pub fn validation(
    msg: impl Into<String>
  ) -> Self {
    Self::Validation(msg.into())
  }

  pub fn not_found(
    what: impl Into<String>
  ) -> Self {
    Self::NotFound {
      what: what.into()
    }
  }

  /// Transient failures are recovered
  /// by rollback or by keeping stale
  /// data on screen; everything else is
  /// reported to the caller as-is.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      Self::Network(_) | Self::Superseded
    )
  }
}

impl From<serde_json::Error>
  for SyncError
{
  fn from(err: serde_json::Error) -> Self {
    Self::Decode(err.to_string())
  }
}

pub type SyncResult<T> =
  Result<T, SyncError>;
