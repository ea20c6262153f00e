//! core::interrupt
//!
//! Cooperative cancellation.
//!
//! An [`Interrupt`] is a sticky flag. Long-running loops poll it and stop
//! at the next safe point; nothing is preempted. The flag stays raised
//! until [`Interrupt::reset`], which the command layer calls between
//! top-level commands.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

use tokio::runtime;
use tokio::signal::unix::{signal, SignalKind};

static SIGINT_TARGET: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// A shareable interrupt flag.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    /// Create a lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag.
    pub fn raise(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether the flag has been raised since the last reset.
    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Lower the flag.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Route SIGINT to this flag.
    ///
    /// The signal is registered before returning and a background thread
    /// raises the flag on every delivery. Only the first flag installed in
    /// a process receives the signal; returns `false` if another flag
    /// already does.
    pub fn install_sigint_handler(&self) -> io::Result<bool> {
        if SIGINT_TARGET.set(self.flag.clone()).is_err() {
            return Ok(SIGINT_TARGET
                .get()
                .is_some_and(|target| Arc::ptr_eq(target, &self.flag)));
        }

        let runtime = runtime::Builder::new_current_thread().enable_io().build()?;
        let mut sigint = {
            let _guard = runtime.enter();
            signal(SignalKind::interrupt())?
        };
        let flag = self.flag.clone();
        thread::Builder::new()
            .name("sigint".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    while sigint.recv().await.is_some() {
                        flag.store(true, Ordering::SeqCst);
                    }
                })
            })?;
        Ok(true)
    }
}
