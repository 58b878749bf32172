//! External Change Poller
//!
//! Stores without native change events (cookies, a file shared between
//! processes) are polled on a fixed interval. Each tick asks the source to
//! pull and dispatch whatever changed since the last tick.
//!
//! # Example
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let handle = spawn_external_poller(cookies, Duration::from_millis(500), shutdown_rx);
//!
//! // Later
//! let _ = shutdown_tx.send(true);
//! let polled = handle.await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use kvsync_core::SyncConfig;

use crate::storage::{CookiesStorage, ExternalSource};

/// Spawn a task polling `source` every `every` until `shutdown_rx` turns true
/// or its sender is dropped.
///
/// The task resolves to the total number of external changes it found.
pub fn spawn_external_poller(
    source: Arc<dyn ExternalSource>,
    every: Duration,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<u64> {
    tokio::spawn(external_poll_task(source, every, shutdown_rx))
}

/// Spawn the cookie poller configured by `config.cookies_check_interval`.
///
/// Returns `None` when the interval is zero, which disables polling.
pub fn spawn_cookie_poller(
    cookies: Arc<CookiesStorage>,
    config: &SyncConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> Option<JoinHandle<u64>> {
    if config.cookies_check_interval.is_zero() {
        return None;
    }
    Some(spawn_external_poller(
        cookies,
        config.cookies_check_interval,
        shutdown_rx,
    ))
}

async fn external_poll_task(
    source: Arc<dyn ExternalSource>,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> u64 {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        source = source.source_name(),
        interval_ms = every.as_millis() as u64,
        "External change poller started"
    );

    let mut found = 0u64;
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                let count = source.poll_external();
                if count > 0 {
                    tracing::debug!(
                        source = source.source_name(),
                        changes = count,
                        "Polled external changes"
                    );
                }
                found += count as u64;
            }
        }
    }

    tracing::info!(
        source = source.source_name(),
        changes = found,
        "External change poller stopped"
    );
    found
}
