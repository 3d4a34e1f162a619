//! Periodic credential recovery, tied to process lifetime.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use grokgate_core::pool::CredentialPool;

const RECOVERY_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Spawns the hourly recovery pass. The first pass runs immediately so a
/// restart picks up credentials whose windows lapsed while the process
/// was down.
pub fn start_recovery_task(pool: Arc<CredentialPool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RECOVERY_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("credential recovery task started");
        loop {
            ticker.tick().await;
            pool.recover().await;
        }
    })
}
