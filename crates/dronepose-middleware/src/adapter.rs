//! The publication sink seam.
//!
//! The observer never writes to a transport directly.  It hands every
//! [`PosePublication`] to a list of [`PoseSink`]s; each sink decides how the
//! pose record and the broadcast transform reach the outside world.
//!
//! - [`JsonLinesSink`][crate::sink::JsonLinesSink] – newline-delimited JSON
//!   on any async writer (stdout in the CLI).
//! - [`BusSink`][crate::sink::BusSink] – republishes onto the internal
//!   [`EventBus`][crate::bus::EventBus] for in-process consumers.

use async_trait::async_trait;
use dronepose_perception::PosePublication;
use dronepose_types::PoseError;

/// Every output adapter must implement this trait.
///
/// # Contract
///
/// `publish` is called once per valid tick with the formatted pose and
/// transform.  A failing sink is logged by the caller and does not stop the
/// other sinks or the estimator.
#[async_trait]
pub trait PoseSink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn publish(&self, publication: &PosePublication) -> Result<(), PoseError>;
}
