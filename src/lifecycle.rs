use std::{
    fmt,
    future::Future,
    sync::atomic::{AtomicU8, Ordering},
};

use log::{debug, info};
use tokio::{signal, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{subscriber, Error, EventHandler, SharedInformer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Running,
    Stopping,
}

impl Phase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Phase::Starting,
            1 => Phase::Running,
            _ => Phase::Stopping,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Starting => "starting",
            Phase::Running => "running",
            Phase::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Owns the stop token and moves the process from starting to stopping.
#[derive(Debug)]
pub struct Lifecycle {
    token: CancellationToken,
    phase: AtomicU8,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            phase: AtomicU8::new(Phase::Starting as u8),
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn the subscriber for `informer` and enter the running phase.
    ///
    /// Returns `None` without spawning anything once stop has been requested.
    pub fn launch<H>(&self, informer: SharedInformer, handler: H) -> Option<JoinHandle<()>>
    where
        H: EventHandler + 'static,
    {
        if let Err(current) = self.phase.compare_exchange(
            Phase::Starting as u8,
            Phase::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            let current = Phase::from_u8(current);
            if current == Phase::Stopping {
                debug!("not watching {}, lifecycle is {}", informer.gvr(), current);
                return None;
            }
        }
        info!("watching {}", informer.gvr());
        Some(tokio::spawn(subscriber::watch(informer, handler, self.token())))
    }

    /// Cancel the stop token. Only the first call does anything; it returns
    /// `false` when shutdown was already requested.
    pub fn stop(&self) -> bool {
        let previous = self.phase.swap(Phase::Stopping as u8, Ordering::SeqCst);
        let previous = Phase::from_u8(previous);
        if previous == Phase::Stopping {
            return false;
        }
        info!("{} -> {}", previous, Phase::Stopping);
        self.token.cancel();
        true
    }

    /// Block until `signal` resolves, then stop.
    pub async fn stop_on<F>(&self, signal: F) -> Result<(), Error>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        signal.await.map_err(Error::SignalFailed)?;
        self.stop();
        Ok(())
    }
}

/// Resolves on Ctrl-C or SIGTERM.
#[cfg(unix)]
pub async fn shutdown_signal() -> std::io::Result<()> {
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    tokio::select! {
        res = signal::ctrl_c() => res,
        _ = terminate.recv() => Ok(()),
    }
}

/// Resolves on Ctrl-C.
#[cfg(not(unix))]
pub async fn shutdown_signal() -> std::io::Result<()> {
    signal::ctrl_c().await
}
