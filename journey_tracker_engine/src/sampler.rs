//! Position acquisition. The platform location services and the durable
//! background scheduler are injected behind traits so the engine stays
//! testable and portable.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use journey_tracker_lib::position_fix::PositionFix;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::TrackerConfig;
use crate::{Result, TrackerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    /// Short interval, high accuracy. Lives and dies with the process.
    Foreground,
    /// Long interval. The cadence is registered with the OS scheduler so it
    /// survives process suspension.
    Background,
}

impl fmt::Display for SamplingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplingMode::Foreground => write!(f, "foreground"),
            SamplingMode::Background => write!(f, "background"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionScope {
    Foreground,
    Background,
}

impl fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionScope::Foreground => write!(f, "foreground"),
            PermissionScope::Background => write!(f, "background"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accuracy {
    High,
    Balanced,
}

/// Platform location services seam.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Prompt for "while in use" access. True when granted.
    async fn request_foreground_permission(&self) -> bool;

    /// Prompt for "always" access. True when granted.
    async fn request_background_permission(&self) -> bool;

    /// Acquire one fix at the requested accuracy. Fails with
    /// `ProviderUnavailable` when no fix arrives within the provider's own
    /// timeout, `PermissionDenied` when access was revoked at runtime.
    async fn current_fix(&self, accuracy: Accuracy) -> Result<PositionFix>;
}

/// Durable OS-scheduled execution seam. An in-memory timer dies when the
/// process is reclaimed, so background cadence must be owned by the OS.
#[async_trait]
pub trait BackgroundScheduler: Send + Sync {
    async fn register(&self, interval: Duration) -> Result<()>;
    async fn cancel(&self) -> Result<()>;
}

/// Runs one sampling task per active session and forwards fixes on an mpsc
/// channel. Owned by the tracking engine; never shared.
pub struct GeoSampler {
    provider: Arc<dyn LocationProvider>,
    scheduler: Arc<dyn BackgroundScheduler>,
    foreground_interval: Duration,
    background_interval: Duration,
    retry_backoff: Duration,
    running: Option<RunningSampler>,
}

struct RunningSampler {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    mode: SamplingMode,
}

impl GeoSampler {
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        scheduler: Arc<dyn BackgroundScheduler>,
        config: &TrackerConfig,
    ) -> Self {
        Self {
            provider,
            scheduler,
            foreground_interval: config.foreground_interval(),
            background_interval: config.background_interval(),
            retry_backoff: config.provider_retry_backoff(),
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Requests the permission matching the mode and spawns the sampling
    /// task. Returns the channel the task feeds.
    pub async fn start(&mut self, mode: SamplingMode) -> Result<mpsc::Receiver<PositionFix>> {
        // The engine serializes transitions, but a stale task must never
        // outlive a restart.
        self.stop().await;

        let (scope, granted) = match mode {
            SamplingMode::Foreground => (
                PermissionScope::Foreground,
                self.provider.request_foreground_permission().await,
            ),
            SamplingMode::Background => (
                PermissionScope::Background,
                self.provider.request_background_permission().await,
            ),
        };
        if !granted {
            return Err(TrackerError::PermissionDenied { scope });
        }

        let (interval, accuracy) = match mode {
            SamplingMode::Foreground => (self.foreground_interval, Accuracy::High),
            SamplingMode::Background => (self.background_interval, Accuracy::Balanced),
        };

        if mode == SamplingMode::Background {
            self.scheduler.register(interval).await?;
        }

        let (fix_tx, fix_rx) = mpsc::channel(32);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(sample_loop(
            self.provider.clone(),
            interval,
            accuracy,
            self.retry_backoff,
            fix_tx,
            stop_rx,
        ));

        self.running = Some(RunningSampler { stop_tx, handle, mode });
        tracing::debug!("Sampler started in {mode} mode, interval {interval:?}");

        Ok(fix_rx)
    }

    /// Acknowledged stop: the sampling task has exited when this returns.
    /// Safe to call when nothing is running.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.stop_tx.send(true);
        if let Err(err) = running.handle.await {
            tracing::warn!("Sampling task ended abnormally: {err}");
        }

        if running.mode == SamplingMode::Background {
            if let Err(err) = self.scheduler.cancel().await {
                tracing::warn!("Failed to cancel background schedule: {err}");
            }
        }

        tracing::debug!("Sampler stopped");
    }

    /// One-off fix outside the sampling loop.
    pub async fn current_fix(&self) -> Result<PositionFix> {
        self.provider.current_fix(Accuracy::High).await
    }
}

async fn sample_loop(
    provider: Arc<dyn LocationProvider>,
    interval: Duration,
    accuracy: Accuracy,
    backoff: Duration,
    fix_tx: mpsc::Sender<PositionFix>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {}
        }

        let fix = match provider.current_fix(accuracy).await {
            Ok(fix) => fix,
            Err(err @ (TrackerError::ProviderUnavailable(_) | TrackerError::PermissionDenied { .. })) => {
                // Transient as far as the session is concerned: back off and
                // let the next attempt retry.
                tracing::warn!("Fix acquisition failed: {err}");
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = time::sleep(backoff) => {}
                }
                continue;
            }
            Err(err) => {
                tracing::error!("Sampler giving up: {err}");
                break;
            }
        };

        if fix_tx.send(fix).await.is_err() {
            // Receiver gone: the session is shutting down.
            break;
        }
    }
}
