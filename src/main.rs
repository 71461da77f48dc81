mod app;
mod cache;
mod catalog;
mod config;
mod db;
mod error;
mod paging;
mod selection;
mod sync;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::cache::{ItemId, ListPurpose};
use crate::catalog::types::{Character, Issue, Volume};
use crate::selection::SortSpec;
use crate::sync::LoadType;

#[derive(Parser, Debug)]
#[command(name = "catsync")]
#[command(about = "Browse a comic catalog through an incremental local cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/catsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Manage favorites
  Favorite {
    #[command(subcommand)]
    action: FavoriteAction,
  },
  /// Set the sort order used for a kind, e.g. `sort character date_added asc`
  Sort {
    kind: EntityKind,
    field: String,
    direction: String,
  },
  /// Print a list, fetching pages as the listing reaches the end of the cache
  Browse {
    kind: EntityKind,
    /// Whole catalog instead of favorites
    #[arg(long)]
    all: bool,
    /// Number of items to print
    #[arg(short = 'n', long, default_value_t = 20)]
    count: usize,
  },
  /// Run a single sync and report the outcome
  Sync {
    kind: EntityKind,
    /// Whole catalog instead of favorites
    #[arg(long)]
    all: bool,
    mode: SyncMode,
  },
  /// Fetch one entity straight from the API
  Show { kind: EntityKind, id: ItemId },
}

#[derive(Subcommand, Debug)]
enum FavoriteAction {
  Add { kind: EntityKind, id: ItemId },
  Remove { kind: EntityKind, id: ItemId },
  List { kind: EntityKind },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum EntityKind {
  Character,
  Volume,
  Issue,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SyncMode {
  Refresh,
  Append,
}

/// Run `$body` with `$E` bound to the entity type for `$kind`.
macro_rules! with_kind {
  ($kind:expr, $E:ident => $body:expr) => {
    match $kind {
      EntityKind::Character => {
        type $E = Character;
        $body
      }
      EntityKind::Volume => {
        type $E = Volume;
        $body
      }
      EntityKind::Issue => {
        type $E = Issue;
        $body
      }
    }
  };
}

fn purpose(all: bool) -> ListPurpose {
  if all {
    ListPurpose::Catalog
  } else {
    ListPurpose::Favorites
  }
}

/// Log to a daily rolling file; stdout is reserved for command output.
fn init_logging(config: &config::Config) -> Result<WorkerGuard> {
  let dir = config.log_directory()?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&dir, "catsync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let default_filter = config.log.filter.as_deref().unwrap_or("catsync=info");
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .with_target(true)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _guard = init_logging(&config)?;

  let app = app::App::new(config)?;

  match args.command {
    Command::Favorite { action } => match action {
      FavoriteAction::Add { kind, id } => with_kind!(kind, E => app.add_favorite::<E>(id)),
      FavoriteAction::Remove { kind, id } => with_kind!(kind, E => app.remove_favorite::<E>(id)),
      FavoriteAction::List { kind } => with_kind!(kind, E => app.list_favorites::<E>()),
    },
    Command::Sort {
      kind,
      field,
      direction,
    } => {
      let sort: SortSpec = format!("{}:{}", field, direction)
        .parse()
        .map_err(|e: String| eyre!(e))?;
      with_kind!(kind, E => app.set_sort::<E>(sort))
    }
    Command::Browse { kind, all, count } => {
      with_kind!(kind, E => app.browse::<E>(purpose(all), count).await)
    }
    Command::Sync { kind, all, mode } => {
      let load_type = match mode {
        SyncMode::Refresh => LoadType::Refresh,
        SyncMode::Append => LoadType::Append,
      };
      with_kind!(kind, E => app.sync::<E>(purpose(all), load_type).await)
    }
    Command::Show { kind, id } => with_kind!(kind, E => app.show::<E>(id).await),
  }
}
