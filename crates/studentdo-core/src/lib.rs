pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod derive;
pub mod error;
pub mod prefs;
pub mod render;
pub mod repository;
pub mod settings;
pub mod task;
pub mod view_state;

use std::ffi::OsString;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

pub use error::StoreError;

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting studentdo CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.todorc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  )?;

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let store = Arc::new(
    datastore::DataStore::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open datastore at \
         {}",
        data_dir.display()
      )
    })?
  );
  let settings = Arc::new(
    settings::SettingsStore::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open preferences in \
         {}",
        data_dir.display()
      )
    })?
  );

  let command = cli
    .command
    .unwrap_or(cli::Command::List);

  let runtime =
    tokio::runtime::Builder::new_multi_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async runtime"
      )?;

  runtime.block_on(async move {
    let view =
      view_state::TaskViewState::new(
        repository::TaskRepository::new(
          store
        ),
        repository::PreferencesRepository::new(
          settings
        )
      );
    commands::dispatch(
      &view, &cfg, command
    )
    .await
  })?;

  info!("done");
  Ok(())
}
