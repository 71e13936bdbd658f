//! The tracking session lifecycle. One journey per device: the engine owns
//! the sampler, the durable slot, the milestone latches and the fan-out,
//! and is the only component allowed to touch any of them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use journey_tracker_lib::journey_route::JourneyRoute;
use journey_tracker_lib::milestone::{MilestoneEvent, MilestoneKind};
use journey_tracker_lib::position_fix::PositionFix;
use journey_tracker_lib::progress::ProgressSnapshot;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::TrackerConfig;
use crate::fanout::{InProcessSink, PropagationFanout, TrackingUpdate, UpdateSink};
use crate::milestone::MilestoneDetector;
use crate::progress::compute_progress;
use crate::rate_limit::{DisplacementGate, IntervalGate};
use crate::sampler::{BackgroundScheduler, GeoSampler, LocationProvider, SamplingMode};
use crate::store::{PathBuffer, SessionSlot, SessionStore};
use crate::{Result, TrackerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Completed,
}

/// The public interface for journey tracking. Cheap to clone; all clones
/// share one session.
#[derive(Clone)]
pub struct TrackingEngine {
    config: TrackerConfig,
    store: SessionStore,
    fanout: PropagationFanout,
    observers: Arc<InProcessSink>,
    inner: Arc<Mutex<EngineInner>>,
}

struct EngineInner {
    state: SessionState,
    sampler: GeoSampler,
    session: Option<ActiveSession>,
}

struct ActiveSession {
    journey_id: i64,
    started_at: DateTime<Utc>,
    shared: Arc<SessionShared>,
    loop_handle: JoinHandle<()>,
}

/// State the fix-processing loop and the engine both reach for.
struct SessionShared {
    journey_id: i64,
    route: JourneyRoute,
    latest_fix: Mutex<Option<PositionFix>>,
    latest_snapshot: Mutex<Option<ProgressSnapshot>>,
    detector: Mutex<MilestoneDetector>,
    path: Mutex<Option<PathBuffer>>,
}

impl TrackingEngine {
    /// Wires the engine from its platform seams. Remote sinks are passed in
    /// so tests and offline builds can run with in-process observers only.
    pub async fn new(
        config: TrackerConfig,
        provider: Arc<dyn LocationProvider>,
        scheduler: Arc<dyn BackgroundScheduler>,
        remote_sinks: Vec<Arc<dyn UpdateSink>>,
    ) -> Result<Self> {
        config.validate()?;

        let store = SessionStore::open(&config.data_dir).await?;
        let observers = Arc::new(InProcessSink::new(64));

        let mut sinks = remote_sinks;
        sinks.push(observers.clone() as Arc<dyn UpdateSink>);
        let fanout = PropagationFanout::new(sinks);

        let sampler = GeoSampler::new(provider, scheduler, &config);

        Ok(Self {
            config,
            store,
            fanout,
            observers,
            inner: Arc::new(Mutex::new(EngineInner {
                state: SessionState::Idle,
                sampler,
                session: None,
            })),
        })
    }

    /// Idle → Active. The slot is persisted before the sampler starts, so a
    /// crash between permission grant and first fix still leaves a
    /// resumable record. Idempotent while Active: a second call returns the
    /// running journey and spawns nothing.
    pub async fn start(&self, route: JourneyRoute) -> Result<i64> {
        let mut inner = self.inner.lock().await;

        if inner.state == SessionState::Active {
            if let Some(session) = inner.session.as_ref() {
                tracing::debug!("start() while journey {} is active, returning it", session.journey_id);
                return Ok(session.journey_id);
            }
        }

        if !route.is_valid() {
            return Err(TrackerError::InvalidRoute(format!(
                "journey {} has malformed coordinates",
                route.journey_id
            )));
        }

        let slot = SessionSlot {
            journey_id: route.journey_id,
            route,
            started_at: Utc::now(),
            last_propagated_at: None,
        };
        self.store.save(&slot).await?;

        match self.activate(&mut inner, slot, SamplingMode::Foreground).await {
            Ok(journey_id) => Ok(journey_id),
            Err(err) => {
                // This start never began sampling; roll the slot back.
                if let Err(clear_err) = self.store.clear().await {
                    tracing::warn!("Failed to clear slot after failed start: {clear_err}");
                }
                Err(err)
            }
        }
    }

    /// Invoked at process start. Re-enters Active for a persisted journey
    /// without user interaction, preferring background sampling. If
    /// background permission has been revoked, degrades to foreground-only;
    /// if that is denied too, stays Idle and keeps the slot for a later
    /// attempt.
    pub async fn resume(&self) -> Result<SessionState> {
        let mut inner = self.inner.lock().await;

        if inner.state == SessionState::Active {
            return Ok(SessionState::Active);
        }

        let slot = match self.store.load().await {
            Ok(Some(slot)) => slot,
            Ok(None) => return Ok(inner.state),
            Err(err) => {
                // An unreadable slot would wedge resume forever.
                tracing::warn!("Discarding unreadable session slot: {err}");
                self.store.clear().await?;
                return Ok(inner.state);
            }
        };

        tracing::info!("Resuming tracking for journey {}", slot.journey_id);

        match self.activate(&mut inner, slot.clone(), SamplingMode::Background).await {
            Ok(_) => Ok(SessionState::Active),
            Err(TrackerError::PermissionDenied { .. }) => {
                tracing::warn!("Background permission revoked, falling back to foreground sampling");
                match self.activate(&mut inner, slot, SamplingMode::Foreground).await {
                    Ok(_) => Ok(SessionState::Active),
                    Err(TrackerError::PermissionDenied { scope }) => {
                        tracing::warn!("{scope} permission denied, tracking stays idle");
                        Ok(SessionState::Idle)
                    }
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Active → Completed. The sampler has stopped when this returns; one
    /// final propagation bypasses the interval gate so observers see a
    /// definitive last position.
    pub async fn stop(&self) -> Result<()> {
        self.finish(None).await
    }

    /// Like `stop`, but fires the delivered milestone (if not already
    /// fired) so the final propagation carries it.
    pub async fn complete(&self) -> Result<()> {
        self.finish(Some(MilestoneKind::Delivered)).await
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn active_journey_id(&self) -> Option<i64> {
        self.inner.lock().await.session.as_ref().map(|s| s.journey_id)
    }

    pub async fn latest_snapshot(&self) -> Option<ProgressSnapshot> {
        let inner = self.inner.lock().await;
        match inner.session.as_ref() {
            Some(session) => *session.shared.latest_snapshot.lock().await,
            None => None,
        }
    }

    pub async fn latest_fix(&self) -> Option<PositionFix> {
        let inner = self.inner.lock().await;
        match inner.session.as_ref() {
            Some(session) => session.shared.latest_fix.lock().await.clone(),
            None => None,
        }
    }

    /// The displacement-gated polyline accumulated so far.
    pub async fn traveled_path(&self) -> Vec<PositionFix> {
        let inner = self.inner.lock().await;
        match inner.session.as_ref() {
            Some(session) => session
                .shared
                .path
                .lock()
                .await
                .as_ref()
                .map(|path| path.fixes().to_vec())
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Same-process observer stream. Receivers may be dropped at any time.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackingUpdate> {
        self.observers.subscribe()
    }

    /// Operator-triggered milestone, e.g. "load picked up". Shares the
    /// automatic path's once-per-kind contract and propagates immediately,
    /// bypassing the interval gate.
    pub async fn fire_milestone(&self, kind: MilestoneKind) -> Result<Option<MilestoneEvent>> {
        let inner = self.inner.lock().await;
        let Some(session) = inner.session.as_ref() else {
            tracing::debug!("Milestone {kind} fired with no active session, ignoring");
            return Ok(None);
        };
        let shared = &session.shared;

        let Some(event) = shared.detector.lock().await.fire_manual(kind) else {
            return Ok(None);
        };
        tracing::info!("Milestone {kind} fired manually for journey {}", shared.journey_id);

        let latest_fix = shared.latest_fix.lock().await.clone();
        let latest_snapshot = *shared.latest_snapshot.lock().await;
        if let (Some(fix), Some(snapshot)) = (latest_fix, latest_snapshot) {
            let update = TrackingUpdate {
                journey_id: shared.journey_id,
                fix,
                snapshot,
                milestone: Some(event.clone()),
            };
            self.fanout.publish(&update).await;
        }

        Ok(Some(event))
    }

    async fn activate(
        &self,
        inner: &mut EngineInner,
        slot: SessionSlot,
        mode: SamplingMode,
    ) -> Result<i64> {
        let fix_rx = inner.sampler.start(mode).await?;

        let detector = MilestoneDetector::new(slot.journey_id, &self.config.milestones);
        let path = match PathBuffer::open(&self.config.data_dir, slot.journey_id).await {
            Ok(path) => path,
            Err(err) => {
                // Don't leave an orphaned sampling task behind.
                inner.sampler.stop().await;
                return Err(err);
            }
        };

        let shared = Arc::new(SessionShared {
            journey_id: slot.journey_id,
            route: slot.route.clone(),
            latest_fix: Mutex::new(None),
            latest_snapshot: Mutex::new(None),
            detector: Mutex::new(detector),
            path: Mutex::new(Some(path)),
        });

        let loop_handle = tokio::spawn(process_fixes(
            fix_rx,
            shared.clone(),
            self.store.clone(),
            self.fanout.clone(),
            self.config.clone(),
            slot.last_propagated_at,
        ));

        inner.state = SessionState::Active;
        inner.session = Some(ActiveSession {
            journey_id: slot.journey_id,
            started_at: slot.started_at,
            shared,
            loop_handle,
        });

        tracing::info!("Tracking session active for journey {} ({mode})", slot.journey_id);
        Ok(slot.journey_id)
    }

    async fn finish(&self, final_milestone: Option<MilestoneKind>) -> Result<()> {
        let mut inner = self.inner.lock().await;

        let Some(session) = inner.session.take() else {
            tracing::debug!("stop() with no active session");
            return Ok(());
        };

        // Acknowledged: the sampling task is gone when this returns, the fix
        // channel closes, and the processing loop drains and exits.
        inner.sampler.stop().await;
        if let Err(err) = session.loop_handle.await {
            tracing::warn!("Fix processing task ended abnormally: {err}");
        }

        let shared = session.shared;

        let final_event = match final_milestone {
            Some(kind) => shared.detector.lock().await.fire_manual(kind),
            None => None,
        };

        let latest_fix = shared.latest_fix.lock().await.clone();
        let latest_snapshot = *shared.latest_snapshot.lock().await;
        if let (Some(fix), Some(snapshot)) = (latest_fix, latest_snapshot) {
            // Forced propagation: awaited, and not subject to the interval
            // gate. Observers get a definitive last position.
            let update = TrackingUpdate {
                journey_id: shared.journey_id,
                fix,
                snapshot,
                milestone: final_event,
            };
            self.fanout.publish(&update).await;
        }

        if let Some(path) = shared.path.lock().await.take() {
            match path.finish().await {
                Ok(fixes) => tracing::debug!("Closed traveled path with {} points", fixes.len()),
                Err(err) => tracing::warn!("Failed to remove traveled path log: {err}"),
            }
        }

        self.store.clear().await?;

        inner.state = SessionState::Completed;
        let elapsed = Utc::now().signed_duration_since(session.started_at);
        tracing::info!(
            "Tracking session for journey {} completed after {}s",
            shared.journey_id,
            elapsed.num_seconds()
        );
        Ok(())
    }
}

/// Handles fixes in arrival order: derive the snapshot, run milestone
/// detection, append displacement-gated fixes to the path log, and push
/// interval-gated updates through the fan-out. Propagation is spawned so a
/// slow sink never delays the next fix.
async fn process_fixes(
    mut fix_rx: mpsc::Receiver<PositionFix>,
    shared: Arc<SessionShared>,
    store: SessionStore,
    fanout: PropagationFanout,
    config: TrackerConfig,
    mut last_propagated_at: Option<DateTime<Utc>>,
) {
    let interval_gate = IntervalGate::new(config.propagation_interval());
    let displacement_gate = DisplacementGate::new(config.min_displacement_meters);
    let mut start_fix: Option<PositionFix> = None;

    while let Some(fix) = fix_rx.recv().await {
        let start = start_fix.get_or_insert_with(|| fix.clone()).clone();

        let snapshot = compute_progress(&shared.route, &start, &fix, config.default_speed_kmh);
        let milestones = shared.detector.lock().await.observe(&snapshot);
        for event in &milestones {
            tracing::info!("Milestone {} reached for journey {}", event.kind, event.journey_id);
        }

        {
            let mut path = shared.path.lock().await;
            if let Some(path) = path.as_mut() {
                if displacement_gate.should_record(path.last(), &fix) {
                    if let Err(err) = path.append(&fix).await {
                        tracing::error!("Failed to record traveled path point: {err}");
                    }
                }
            }
        }

        *shared.latest_fix.lock().await = Some(fix.clone());
        *shared.latest_snapshot.lock().await = Some(snapshot);

        // Milestones bypass the interval gate; a one-shot event must not
        // wait for the next window.
        let now = fix.timestamp;
        if !milestones.is_empty() || interval_gate.should_propagate(last_propagated_at, now) {
            last_propagated_at = Some(now);

            let updates: Vec<TrackingUpdate> = if milestones.is_empty() {
                vec![TrackingUpdate {
                    journey_id: shared.journey_id,
                    fix: fix.clone(),
                    snapshot,
                    milestone: None,
                }]
            } else {
                milestones
                    .into_iter()
                    .map(|event| TrackingUpdate {
                        journey_id: shared.journey_id,
                        fix: fix.clone(),
                        snapshot,
                        milestone: Some(event),
                    })
                    .collect()
            };

            // Sink I/O is spawned so a slow sink never delays the next fix.
            // The slot write stays here: it must land before a concurrent
            // stop() can clear the slot.
            let fanout = fanout.clone();
            tokio::spawn(async move {
                for update in &updates {
                    fanout.publish(update).await;
                }
            });

            if let Err(err) = store.set_last_propagated(now).await {
                tracing::warn!("Failed to persist propagation timestamp: {err}");
            }
        }
    }
}
