//! [`PoseSink`] implementations.

use async_trait::async_trait;
use dronepose_perception::PosePublication;
use dronepose_types::{Event, EventPayload, PoseError};
use serde_json::json;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::adapter::PoseSink;
use crate::bus::{EventBus, Topic};
use crate::ros_bridge::topics;

/// Writes each publication as two JSON lines: the pose record on
/// [`topics::CURRENT_POSE`] and the transform on [`topics::TF`].
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Give back the writer, e.g. to inspect a buffer in tests.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

/// Encode a publication as the two lines written by [`JsonLinesSink`].
pub fn encode_lines(publication: &PosePublication) -> Result<String, PoseError> {
    let pose = json!({
        "topic": topics::CURRENT_POSE,
        "stamp": publication.transform.stamp,
        "msg": publication.pose,
        "validity": publication.validity,
        "stale_sources": publication.stale_sources,
    });
    let tf = json!({
        "topic": topics::TF,
        "msg": publication.transform,
    });
    let pose = serde_json::to_string(&pose).map_err(|e| PoseError::Parsing(e.to_string()))?;
    let tf = serde_json::to_string(&tf).map_err(|e| PoseError::Parsing(e.to_string()))?;
    Ok(format!("{pose}\n{tf}\n"))
}

#[async_trait]
impl<W> PoseSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &str {
        "json-lines"
    }

    async fn publish(&self, publication: &PosePublication) -> Result<(), PoseError> {
        let lines = encode_lines(publication)?;
        let mut writer = self.writer.lock().await;
        writer
            .write_all(lines.as_bytes())
            .await
            .map_err(|e| PoseError::Sink(format!("write failed: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| PoseError::Sink(format!("flush failed: {e}")))
    }
}

/// Republishes poses on [`Topic::Pose`] and transforms on
/// [`Topic::Transforms`].
pub struct BusSink {
    bus: EventBus,
    source: String,
}

impl BusSink {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            source: "dronepose-middleware::sink/bus".to_string(),
        }
    }
}

#[async_trait]
impl PoseSink for BusSink {
    fn name(&self) -> &str {
        "bus"
    }

    async fn publish(&self, publication: &PosePublication) -> Result<(), PoseError> {
        self.bus.publish_to(
            Topic::Pose,
            Event::new(
                self.source.clone(),
                EventPayload::Pose {
                    pose: publication.pose,
                    validity: publication.validity,
                    stale_sources: publication.stale_sources.clone(),
                },
            ),
        )?;
        self.bus.publish_to(
            Topic::Transforms,
            Event::new(
                self.source.clone(),
                EventPayload::Transform(publication.transform.clone()),
            ),
        )?;
        Ok(())
    }
}
