//! Pool-wide sweeper
//!
//! A single background task that periodically reaps exited and
//! unresponsive workers. Deliberately separate from the heartbeat
//! emitters: emitters observe one process each, the reaper owns removal.

use std::sync::Weak;
use std::time::Duration;

use crate::pool::WorkerPool;

pub(crate) fn spawn_sweeper(
    pool: Weak<WorkerPool>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            let Some(pool) = pool.upgrade() else {
                break;
            };
            if pool.is_shutting_down() {
                break;
            }

            match pool.cleanup_terminated().await {
                Ok(0) => {}
                Ok(reaped) => {
                    tracing::info!(reaped = reaped, "sweeper reaped workers");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "sweeper pass failed");
                }
            }
        }
    })
}
