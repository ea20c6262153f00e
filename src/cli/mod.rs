//! cli
//!
//! Command-line interface layer for `vgc`.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Open the simulated pool and build the engine [`Context`]
//! - Delegate to command handlers
//! - Save the pool after commands that change it
//!
//! The CLI layer is thin: metadata only changes through the engine and the
//! archive service.

pub mod args;
pub mod commands;

pub use args::{Cli, Command};

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::{debug, warn};

use crate::archive::ArchiveError;
use crate::core::config::Config;
use crate::core::types::FormatName;
use crate::engine::{Context, EngineError};
use crate::format::FormatRegistry;
use crate::logging::{self, LogConfig};
use crate::sim::SimulatedPool;

/// Format assumed for an empty pool.
pub const DEFAULT_FORMAT: &str = "lvm2";

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> Result<()> {
    let cli = Cli::parse_args();
    logging::init(LogConfig {
        verbose: cli.verbose,
        json: cli.json_log,
    });

    let session = Session::open(&cli)?;
    commands::dispatch(cli.command, session)
}

/// The remediation hint carried by an error chain, if any.
pub fn hint_for(err: &anyhow::Error) -> Option<&'static str> {
    err.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<EngineError>() {
            e.hint()
        } else if let Some(e) = cause.downcast_ref::<ArchiveError>() {
            e.hint()
        } else {
            None
        }
    })
}

/// One command's view of the pool.
#[derive(Debug)]
pub struct Session {
    pub ctx: Context,
    pool: SimulatedPool,
    pool_path: PathBuf,
}

impl Session {
    /// Load configuration and the pool, then assemble a context.
    pub fn open(cli: &Cli) -> Result<Self> {
        let config = match &cli.config {
            Some(path) => Config::load_from(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => Config::load().context("failed to load config")?,
        };
        let pool = SimulatedPool::load_or_new(&cli.pool)
            .with_context(|| format!("failed to open pool {}", cli.pool.display()))?;

        let mut ctx = Context::from_config(config, Box::new(pool.clone()), formats_for(&pool)?)
            .context("failed to initialise")?;
        if cli.test {
            ctx.flags.test_mode = true;
        }
        match ctx.interrupt.install_sigint_handler() {
            Ok(true) => {}
            Ok(false) => debug!("SIGINT already routed elsewhere"),
            Err(e) => warn!("cannot install SIGINT handler: {}", e),
        }

        Ok(Self {
            ctx,
            pool,
            pool_path: cli.pool.clone(),
        })
    }

    /// Release locks, and save the pool if the command changed it.
    pub fn finish(mut self, changed: bool) -> Result<()> {
        self.ctx.end_command().context("failed to release locks")?;
        if changed && !self.ctx.flags.test_mode {
            self.pool
                .save(&self.pool_path)
                .with_context(|| format!("failed to save pool {}", self.pool_path.display()))?;
        }
        Ok(())
    }
}

/// One simulated format handler per format named in the pool.
fn formats_for(pool: &SimulatedPool) -> Result<FormatRegistry> {
    let mut names = pool.format_names();
    if names.is_empty() {
        names.insert(FormatName::new(DEFAULT_FORMAT)?);
    }
    let mut formats = FormatRegistry::new();
    for name in names {
        formats.register(Arc::new(pool.format(name, true)));
    }
    Ok(formats)
}
