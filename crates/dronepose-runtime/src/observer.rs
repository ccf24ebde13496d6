//! [`ObserverLoop`] – the fixed-rate pose observer.
//!
//! One Tokio task owns the whole estimator.  After a start-up warm-up it
//! subscribes to [`Topic::Sensors`] and multiplexes three inputs with
//! `tokio::select!`:
//!
//! 1. **Shutdown** – a `watch` channel flipped by Ctrl-C or end of input.
//! 2. **Samples** – each [`SensorSample`] is written into the
//!    [`EstimatorContext`] as soon as it arrives.
//! 3. **Tick** – at `loop_hz`, the [`PoseFusion`] step reads the context,
//!    the result is formatted, recorded in the frame tree and handed to
//!    every [`PoseSink`].
//!
//! Because ingestion and the tick share a task, the context needs no locks
//! and a tick always sees a consistent snapshot.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dronepose_middleware::{EventBus, JsonLinesSink, PoseSink};
//! use dronepose_runtime::observer::{ObserverConfig, ObserverLoop};
//!
//! # async fn demo() -> Result<(), dronepose_types::PoseError> {
//! let bus = EventBus::default();
//! let sinks: Vec<Arc<dyn PoseSink>> = vec![Arc::new(JsonLinesSink::new(tokio::io::stdout()))];
//! let observer = ObserverLoop::new(ObserverConfig::new(50.0), sinks)?;
//!
//! let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
//! let stats = observer.run(bus, stop_rx).await;
//! println!("published {} poses", stats.published);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dronepose_middleware::{EventBus, PoseSink, Topic};
use dronepose_perception::height::HeightSource;
use dronepose_perception::transform::TfEngine;
use dronepose_perception::{EstimatorContext, FramePair, PoseFusion, PosePublication, PositioningMode};
use dronepose_types::{Event, EventPayload, PoseError, SensorKind, SensorSample};
use futures_util::future::join_all;
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, trace, warn};

use crate::source_monitor::{HealthTransition, SourceHealth, SourceMonitor};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Delay between start-up and subscribing to sensor input.
pub const DEFAULT_WARMUP: Duration = Duration::from_secs(1);

/// A watched source with no sample for this long is reported stale.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_millis(500);

const EVENT_SOURCE: &str = "dronepose-runtime::observer";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the observer reads once at start-up.
#[derive(Debug, Clone, PartialEq)]
pub struct ObserverConfig {
    /// Fusion and publication rate in Hz.  Must be finite and positive.
    pub loop_hz: f64,
    /// Raw positioning mode; see [`PositioningMode`].
    pub positioning: i64,
    /// `true` selects the range/altitude height source, `false` ultrasonic.
    pub simulation: bool,
    pub warmup: Duration,
    pub frames: FramePair,
    pub stale_after: Duration,
}

impl ObserverConfig {
    /// GPS positioning on real hardware at `loop_hz`, other values default.
    pub fn new(loop_hz: f64) -> Self {
        Self {
            loop_hz,
            positioning: PositioningMode::Gps.as_raw(),
            simulation: false,
            warmup: DEFAULT_WARMUP,
            frames: FramePair::default(),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// Reject values the observer cannot start with.
    pub fn validate(&self) -> Result<(), PoseError> {
        self.period()?;
        if self.stale_after.is_zero() {
            return Err(PoseError::InvalidParameter {
                name: "stale_after_ms".to_string(),
                details: "must be greater than zero".to_string(),
            });
        }
        if self.frames.parent.is_empty() || self.frames.child.is_empty() {
            return Err(PoseError::InvalidParameter {
                name: "frames".to_string(),
                details: "parent and child frame names must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Tick period derived from `loop_hz`.
    ///
    /// # Errors
    ///
    /// [`PoseError::InvalidParameter`] unless `loop_hz` is finite, positive
    /// and gives a period that a [`Duration`] holds without rounding to zero.
    pub fn period(&self) -> Result<Duration, PoseError> {
        let invalid = |details: String| PoseError::InvalidParameter {
            name: "loop_hz".to_string(),
            details,
        };
        if !self.loop_hz.is_finite() || self.loop_hz <= 0.0 {
            return Err(invalid(format!("{} is not a positive frequency", self.loop_hz)));
        }
        match Duration::try_from_secs_f64(1.0 / self.loop_hz) {
            Ok(period) if !period.is_zero() => Ok(period),
            Ok(_) => Err(invalid(format!("{} Hz is too fast for a nanosecond tick", self.loop_hz))),
            Err(e) => Err(invalid(format!("{} Hz has no representable period: {e}", self.loop_hz))),
        }
    }

    /// The configured mode.  Integers outside the known range map to
    /// [`PositioningMode::None`], which publishes nothing.
    pub fn positioning_mode(&self) -> PositioningMode {
        PositioningMode::try_from(self.positioning).unwrap_or_else(|e| {
            warn!(positioning = self.positioning, error = %e, "unknown positioning mode, observer will stay silent");
            PositioningMode::None
        })
    }
}

/// Sources whose freshness matters for `mode`.
pub fn watched_sources(mode: PositioningMode, simulation: bool) -> Vec<SensorKind> {
    let mut sources = match mode {
        PositioningMode::Gps => vec![
            SensorKind::Attitude,
            SensorKind::GpsHealth,
            SensorKind::LocalPosition,
        ],
        PositioningMode::Guidance => vec![SensorKind::GuidanceMotion],
        _ => Vec::new(),
    };
    if mode.is_active() {
        sources.push(match HeightSource::for_simulation(simulation) {
            HeightSource::RangeAltitude => SensorKind::HeightAboveTakeoff,
            HeightSource::Ultrasonic => SensorKind::Ultrasonic,
        });
    }
    sources
}

// ─────────────────────────────────────────────────────────────────────────────
// Statistics
// ─────────────────────────────────────────────────────────────────────────────

/// Counters returned by [`ObserverLoop::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObserverStats {
    pub samples: u64,
    pub rejected: u64,
    pub ticks: u64,
    /// Poses that reached at least one sink.
    pub published: u64,
    pub sink_failures: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// ObserverLoop
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the estimator state, the fusion step and the output sinks.
pub struct ObserverLoop {
    config: ObserverConfig,
    period: Duration,
    context: EstimatorContext,
    fusion: PoseFusion,
    monitor: SourceMonitor,
    tf: TfEngine,
    sinks: Vec<Arc<dyn PoseSink>>,
    stats: ObserverStats,
}

impl ObserverLoop {
    /// Build the observer.
    ///
    /// # Errors
    ///
    /// Returns [`PoseError::InvalidParameter`] when `config` fails
    /// [`ObserverConfig::validate`].
    pub fn new(config: ObserverConfig, sinks: Vec<Arc<dyn PoseSink>>) -> Result<Self, PoseError> {
        config.validate()?;
        let period = config.period()?;

        let mode = config.positioning_mode();
        let fusion = PoseFusion::new(mode);

        let now = Instant::now();
        let mut monitor = SourceMonitor::new(config.stale_after);
        for source in watched_sources(mode, config.simulation) {
            monitor.watch(source, now);
        }

        Ok(Self {
            context: EstimatorContext::new(config.simulation),
            fusion,
            monitor,
            tf: TfEngine::new(),
            sinks,
            stats: ObserverStats::default(),
            config,
            period,
        })
    }

    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }

    pub fn context(&self) -> &EstimatorContext {
        &self.context
    }

    /// Frame tree holding the most recent broadcast transform.
    pub fn tf(&self) -> &TfEngine {
        &self.tf
    }

    pub fn stats(&self) -> ObserverStats {
        self.stats
    }

    /// Write one sample into the estimator state.
    ///
    /// Rejected samples leave the state untouched and do not count as
    /// fresh.
    pub fn handle_sample(&mut self, sample: &SensorSample, now: Instant) -> Result<(), PoseError> {
        self.stats.samples += 1;
        match self.context.ingest(sample) {
            Ok(()) => {
                self.monitor.record(sample.kind(), now);
                Ok(())
            }
            Err(e) => {
                self.stats.rejected += 1;
                debug!(source = %sample.kind(), error = %e, "sample rejected");
                Err(e)
            }
        }
    }

    /// Run one fusion step and format the result.
    ///
    /// Returns `None` when the positioning mode publishes nothing.  The
    /// produced transform is recorded in [`tf`](Self::tf).
    pub fn tick(&mut self, now: Instant, stamp: DateTime<Utc>) -> Option<PosePublication> {
        self.stats.ticks += 1;
        let estimate = self.fusion.tick(&self.context)?;

        let publication = PosePublication::format(&estimate, &self.config.frames, stamp)
            .with_stale_sources(self.monitor.stale_sources(now));
        self.tf.set_transform(
            &self.config.frames.parent,
            &self.config.frames.child,
            publication.transform3d(),
        );

        trace!(
            x = publication.pose.linear.x,
            y = publication.pose.linear.y,
            z = publication.pose.linear.z,
            yaw = publication.pose.angular.z,
            position_valid = publication.validity.position,
            "pose fused"
        );
        Some(publication)
    }

    /// Hand `publication` to every sink concurrently.  A failing sink is
    /// logged and does not affect the others.
    ///
    /// The pose counts as published once at least one sink accepted it.
    pub async fn publish(&mut self, publication: &PosePublication) {
        let results = join_all(self.sinks.iter().map(|sink| sink.publish(publication))).await;
        let mut delivered = false;
        for (sink, result) in self.sinks.iter().zip(results) {
            match result {
                Ok(()) => delivered = true,
                Err(e) => {
                    self.stats.sink_failures += 1;
                    warn!(sink = sink.name(), error = %e, "sink failed to publish pose");
                }
            }
        }
        if delivered {
            self.stats.published += 1;
        }
    }

    /// Report and return sources whose freshness changed.
    pub fn poll_staleness(&mut self, now: Instant, bus: &EventBus) -> Vec<HealthTransition> {
        let transitions = self.monitor.poll_transitions(now);
        for t in &transitions {
            let message = match (t.health, t.silent_for) {
                (SourceHealth::Stale, Some(silent)) => {
                    warn!(source = %t.source, silent_ms = silent.as_millis() as u64, "sensor source went stale");
                    format!("no sample for {} ms", silent.as_millis())
                }
                (SourceHealth::Stale, None) => {
                    warn!(source = %t.source, "sensor source has not delivered any sample");
                    "no sample received yet".to_string()
                }
                (SourceHealth::Fresh, _) => {
                    info!(source = %t.source, "sensor source recovered");
                    "recovered".to_string()
                }
            };
            let event = Event::new(
                EVENT_SOURCE,
                EventPayload::Diagnostic {
                    component: t.source.to_string(),
                    message,
                },
            );
            if let Err(e) = bus.publish_to(Topic::Diagnostics, event) {
                debug!(error = %e, "diagnostic not delivered");
            }
        }
        transitions
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    #[instrument(name = "observer", skip_all, fields(loop_hz = self.config.loop_hz, mode = %self.fusion.mode()))]
    pub async fn run(mut self, bus: EventBus, mut shutdown: watch::Receiver<bool>) -> ObserverStats {
        info!(
            loop_hz = self.config.loop_hz,
            simulation = self.config.simulation,
            warmup_ms = self.config.warmup.as_millis() as u64,
            "observer starting"
        );

        tokio::select! {
            _ = tokio::time::sleep(self.config.warmup) => {}
            _ = wait_for_shutdown(&mut shutdown) => {
                info!("shutdown requested during warm-up");
                return self.stats;
            }
        }

        let mut sensors = bus.subscribe_to(Topic::Sensors);
        self.monitor.restart(Instant::now());

        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("observer shutting down");
                    break;
                }

                received = sensors.recv() => match received {
                    Ok(event) => {
                        if let EventPayload::Sensor(sample) = &event.payload {
                            // Rejections are counted and logged inside.
                            let _ = self.handle_sample(sample, Instant::now());
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "observer fell behind sensor input; samples dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("sensor channel closed");
                        break;
                    }
                },

                _ = interval.tick() => {
                    let now = Instant::now();
                    self.poll_staleness(now, &bus);
                    if let Some(publication) = self.tick(now, Utc::now()) {
                        self.publish(&publication).await;
                    }
                }
            }
        }

        info!(
            samples = self.stats.samples,
            rejected = self.stats.rejected,
            ticks = self.stats.ticks,
            published = self.stats.published,
            "observer stopped"
        );
        self.stats
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // An Err means the sender was dropped, which also ends the loop.
    let _ = shutdown.wait_for(|stop| *stop).await;
}
