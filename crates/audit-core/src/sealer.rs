//! Seal triggers and the periodic sealing timers.

use crate::config::LedgerConfig;
use crate::ledger::Ledger;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SealerState {
    Idle,
    Sealing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SealTrigger {
    /// Pool reached `seal_threshold` after a submission.
    Threshold,
    /// Fast timer: seal anything pending.
    Interval,
    /// Slow timer: seal once `forced_seal_min_pending` is reached.
    Stale,
    /// Explicit request from an operator or test.
    Manual,
}

impl SealTrigger {
    /// Smallest pool size this trigger acts on.
    pub fn min_pending(&self, config: &LedgerConfig) -> usize {
        match self {
            SealTrigger::Threshold => config.seal_threshold,
            SealTrigger::Interval | SealTrigger::Manual => 1,
            SealTrigger::Stale => config.forced_seal_min_pending.max(1),
        }
    }
}

/// Background task driving the two sealing timers.
pub struct Sealer {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl Sealer {
    /// Start the timers on the current Tokio runtime.
    pub fn spawn(ledger: Ledger) -> Self {
        let (shutdown, mut stop) = watch::channel(false);
        let config = ledger.config().clone();
        let handle = tokio::spawn(async move {
            let mut fast = interval(Duration::from_secs(config.seal_interval_secs));
            let mut slow = interval(Duration::from_secs(config.forced_seal_interval_secs));
            fast.set_missed_tick_behavior(MissedTickBehavior::Delay);
            slow.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Both intervals fire immediately on the first tick.
            fast.tick().await;
            slow.tick().await;
            info!(
                interval_secs = config.seal_interval_secs,
                forced_interval_secs = config.forced_seal_interval_secs,
                "sealer timers started"
            );

            loop {
                tokio::select! {
                    _ = fast.tick() => {
                        if !ledger.trigger_seal(SealTrigger::Interval) {
                            debug!("interval tick: nothing to seal");
                        }
                    }
                    _ = slow.tick() => {
                        if !ledger.trigger_seal(SealTrigger::Stale) {
                            debug!("stale tick: below forced minimum");
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("sealer timers stopped");
        });
        Self { handle, shutdown }
    }

    /// Stop the timers. A seal already running is left to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_minimums_follow_config() {
        let config = LedgerConfig {
            seal_threshold: 10,
            forced_seal_min_pending: 5,
            ..LedgerConfig::default()
        };
        assert_eq!(SealTrigger::Threshold.min_pending(&config), 10);
        assert_eq!(SealTrigger::Interval.min_pending(&config), 1);
        assert_eq!(SealTrigger::Stale.min_pending(&config), 5);
        assert_eq!(SealTrigger::Manual.min_pending(&config), 1);
    }
}
