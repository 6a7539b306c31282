pub mod aggregates;
pub mod attendance;
pub mod bootstrap;
pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod engine;
pub mod error;
pub mod file_store;
pub mod gate;
pub mod memory_store;
pub mod optimistic;
pub mod query;
pub mod reconcile;
pub mod repo;
pub mod status_updates;
pub mod store;
pub mod task;

use std::ffi::OsString;
use std::sync::Arc;

use anyhow::Context;
use caseline_shared::Identity;
use clap::Parser;
use tracing::{
  debug,
  info
};

pub use error::{
  SyncError,
  SyncResult
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let cli = cli::GlobalCli::parse_from(
    raw_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting caseline CLI"
  );

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(
    cli
      .overrides
      .iter()
      .map(|kv| {
        (kv.key.clone(), kv.value.clone())
      })
  )?;
  debug!(?cfg, "effective config");

  let tz = cfg
    .timezone()
    .context("invalid [time] timezone")?;

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let store =
    file_store::FileStore::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open store at {}",
        data_dir.display()
      )
    })?;

  let durable = cache::FileKv::open(
    &data_dir.join("cache.json")
  )?;
  let cache = cache::CacheManager::new(
    Arc::new(durable),
    Arc::new(cache::MemoryKv::new())
  );

  let engine = engine::Engine::new(
    Arc::new(store),
    cache,
    datetime::Calendar::system(tz),
    engine::EngineSettings::from(&cfg)
  );

  let identity =
    cli.user.map(|user_id| Identity {
      user_id,
      role: cli.role.into()
    });

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_time()
      .build()
      .context(
        "failed to build async runtime"
      )?;
  runtime.block_on(commands::dispatch(
    &engine,
    identity,
    cli.command
  ))?;

  info!("done");
  Ok(())
}
