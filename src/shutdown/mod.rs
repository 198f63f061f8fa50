//! Shutdown coordination.
//!
//! A termination signal stops trigger evaluation immediately; an in-flight
//! attempt is never killed, only waited on for a bounded grace period.
//! A drain that outlives the grace period is treated as uncompensated-class
//! risk and the process exits non-zero.

use crate::engine::AttemptPhase;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Engine lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShutdownPhase {
    Normal,
    Requested,
    Drained,
}

/// How the drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// No attempt in flight, or it settled within the grace period.
    Clean,
    /// The attempt was still pending when the grace period expired.
    GraceExpired,
}

/// Intercepts termination and drives the bounded drain.
pub struct ShutdownCoordinator {
    phase: watch::Sender<ShutdownPhase>,
    grace_period: Duration,
}

impl ShutdownCoordinator {
    pub fn new(grace_period: Duration) -> Self {
        let (phase, _) = watch::channel(ShutdownPhase::Normal);
        Self {
            phase,
            grace_period,
        }
    }

    /// Spawn the signal listener. The first interrupt flips the phase to
    /// `Requested`; evaluation must stop from that point on.
    pub fn listen(&self) {
        let phase = self.phase.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                phase.send_replace(ShutdownPhase::Requested);
            }
        });
    }

    /// Request shutdown programmatically (used by tests and fatal paths).
    pub fn request(&self) {
        self.phase.send_replace(ShutdownPhase::Requested);
    }

    pub fn is_requested(&self) -> bool {
        *self.phase.borrow() != ShutdownPhase::Normal
    }

    pub fn subscribe(&self) -> watch::Receiver<ShutdownPhase> {
        self.phase.subscribe()
    }

    /// Resolves once shutdown has been requested.
    pub async fn requested(&self) {
        let mut rx = self.phase.subscribe();
        // Already requested, or wait for the transition.
        let _ = rx.wait_for(|phase| *phase != ShutdownPhase::Normal).await;
    }

    /// Wait for the in-flight attempt (if any) to settle, bounded by the
    /// grace period, then mark the engine drained.
    pub async fn drain(&self, mut attempt_phase: watch::Receiver<AttemptPhase>) -> DrainOutcome {
        if !attempt_phase.borrow().is_idle() {
            let pending_id = attempt_phase.borrow().attempt_id();
            warn!(
                attempt_id = ?pending_id,
                grace_secs = self.grace_period.as_secs(),
                "Attempt in flight - waiting for it to settle"
            );

            let settled = tokio::time::timeout(
                self.grace_period,
                attempt_phase.wait_for(|phase| phase.is_idle()),
            )
            .await;

            match settled {
                Ok(Ok(_)) => {}
                Ok(Err(_)) => {
                    // The coordinator dropped its phase sender without
                    // going idle; treat like an expired grace period.
                    error!("Attempt phase channel closed while draining");
                    return DrainOutcome::GraceExpired;
                }
                Err(_) => {
                    error!(
                        "Grace period expired with an attempt still pending - \
                         manual reconciliation required"
                    );
                    return DrainOutcome::GraceExpired;
                }
            }
        }

        self.phase.send_replace(ShutdownPhase::Drained);
        info!("Engine drained");
        DrainOutcome::Clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_flips_phase() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        assert!(!coordinator.is_requested());
        coordinator.request();
        assert!(coordinator.is_requested());
    }

    #[tokio::test]
    async fn test_drain_clean_when_idle() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(50));
        let (_tx, rx) = watch::channel(AttemptPhase::Idle);

        coordinator.request();
        assert_eq!(coordinator.drain(rx).await, DrainOutcome::Clean);
        assert_eq!(*coordinator.subscribe().borrow(), ShutdownPhase::Drained);
    }

    #[tokio::test]
    async fn test_drain_waits_for_pending_attempt() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let (tx, rx) = watch::channel(AttemptPhase::LegsPending(7));

        let settle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send_replace(AttemptPhase::Idle);
            tx
        });

        coordinator.request();
        assert_eq!(coordinator.drain(rx).await, DrainOutcome::Clean);
        settle.await.unwrap();
    }

    #[tokio::test]
    async fn test_drain_reports_grace_expiry() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(30));
        let (tx, rx) = watch::channel(AttemptPhase::LegsPending(7));

        coordinator.request();
        assert_eq!(coordinator.drain(rx).await, DrainOutcome::GraceExpired);
        // The slot never went idle and the engine is not marked drained.
        assert_eq!(*coordinator.subscribe().borrow(), ShutdownPhase::Requested);
        drop(tx);
    }

    #[tokio::test]
    async fn test_requested_future_resolves() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        coordinator.request();
        // Must not hang when shutdown was already requested.
        tokio::time::timeout(Duration::from_millis(100), coordinator.requested())
            .await
            .unwrap();
    }
}
