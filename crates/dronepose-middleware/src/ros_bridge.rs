//! ROS-style ingestion bridge.
//!
//! [`RosBridge`] accepts messages shaped like the flight controller's and
//! guidance unit's ROS topics, decodes them into [`SensorSample`]s and
//! publishes them on [`Topic::Sensors`].  Lines read by
//! [`RosBridge::run_reader`] use a small JSON envelope:
//!
//! ```text
//! {"topic": "/dji_sdk/gps_health", "msg": {"data": 5}}
//! {"t": 0.02, "topic": "/dji_sdk/attitude", "msg": {"quaternion": {"x": 0, "y": 0, "z": 0, "w": 1}}}
//! ```
//!
//! `t` (seconds, optional) is only used when pacing a recorded log in real
//! time.  Stamped ROS wrappers (`{"quaternion": ...}`, `{"point": ...}`,
//! `{"data": ...}`) and their bare payloads are both accepted.

use std::time::Duration;

use dronepose_types::{
    Event, EventPayload, GuidanceMotionMsg, LaserScanMsg, PointMsg, PoseError, QuaternionMsg,
    SensorSample,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::bus::{EventBus, Topic};

/// Topic names understood by the bridge and written by the sinks.
pub mod topics {
    pub const ATTITUDE: &str = "/dji_sdk/attitude";
    pub const GPS_HEALTH: &str = "/dji_sdk/gps_health";
    pub const HEIGHT_ABOVE_TAKEOFF: &str = "/dji_sdk/height_above_takeoff";
    pub const LOCAL_POSITION: &str = "/dji_sdk/local_position";
    pub const ULTRASONIC: &str = "/guidance/ultrasonic";
    pub const GUIDANCE_MOTION: &str = "/guidance/motion";

    pub const CURRENT_POSE: &str = "/dtu_controller/current_frame_pose";
    pub const TF: &str = "/tf";
}

/// Maximum byte length of one input line.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    t: Option<f64>,
    topic: String,
    msg: Value,
}

/// Decode the payload of `topic` into a [`SensorSample`].
pub fn decode_sample(topic: &str, msg: Value) -> Result<SensorSample, PoseError> {
    Ok(match topic {
        topics::ATTITUDE => SensorSample::Attitude(field_or_bare::<QuaternionMsg>(msg, "quaternion")?),
        topics::GPS_HEALTH => SensorSample::GpsHealth(field_or_bare::<u8>(msg, "data")?),
        topics::HEIGHT_ABOVE_TAKEOFF => {
            SensorSample::HeightAboveTakeoff(field_or_bare::<f32>(msg, "data")?)
        }
        topics::LOCAL_POSITION => SensorSample::LocalPosition(field_or_bare::<PointMsg>(msg, "point")?),
        topics::ULTRASONIC => SensorSample::Ultrasonic(decode::<LaserScanMsg>(msg)?),
        topics::GUIDANCE_MOTION => SensorSample::GuidanceMotion(decode::<GuidanceMotionMsg>(msg)?),
        other => return Err(PoseError::Parsing(format!("unknown topic '{other}'"))),
    })
}

fn decode<T: DeserializeOwned>(msg: Value) -> Result<T, PoseError> {
    serde_json::from_value(msg).map_err(|e| PoseError::Parsing(e.to_string()))
}

/// Unwrap `{field: payload}` when present, otherwise decode `msg` itself.
fn field_or_bare<T: DeserializeOwned>(mut msg: Value, field: &str) -> Result<T, PoseError> {
    let inner = msg.as_object_mut().and_then(|obj| obj.remove(field));
    decode(inner.unwrap_or(msg))
}

/// Bridge between ROS-style messages and the internal [`EventBus`].
#[derive(Clone)]
pub struct RosBridge {
    bus: EventBus,
}

impl RosBridge {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    /// Publish an already decoded sample as if it arrived on `topic`.
    pub fn ingest(&self, topic: &str, sample: SensorSample) -> Result<usize, PoseError> {
        let event = Event::new(
            format!("dronepose-middleware::ros{topic}"),
            EventPayload::Sensor(sample),
        );
        self.bus.publish_to(Topic::Sensors, event)
    }

    /// Decode and publish one envelope line.
    pub fn ingest_line(&self, line: &str) -> Result<usize, PoseError> {
        let envelope = parse_envelope(line)?;
        let sample = decode_sample(&envelope.topic, envelope.msg)?;
        self.ingest(&envelope.topic, sample)
    }

    /// Read envelope lines from `reader` until end of input.
    ///
    /// Malformed lines are logged and skipped, and so are lines longer than
    /// [`MAX_LINE_BYTES`]; at most that many bytes of a line are buffered.
    /// With `realtime` set, lines carrying `t` are held back until that many
    /// seconds have passed since the first stamped line, so a recorded log
    /// replays at its original rate against the observer's tick.
    ///
    /// Returns the number of samples published.
    pub async fn run_reader<R>(&self, mut reader: R, realtime: bool) -> Result<u64, PoseError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut buf = Vec::new();
        let mut clock: Option<(Instant, f64)> = None;
        let mut published = 0u64;
        let mut line_no = 0u64;

        while let Some(read) = read_line_bounded(&mut reader, &mut buf)
            .await
            .map_err(|e| PoseError::Channel(format!("input read error: {e}")))?
        {
            line_no += 1;
            if let LineRead::Oversized(len) = read {
                warn!(line = line_no, bytes = len, limit = MAX_LINE_BYTES, "skipping oversized input line");
                continue;
            }
            let Ok(line) = std::str::from_utf8(&buf) else {
                warn!(line = line_no, "skipping input line that is not UTF-8");
                continue;
            };
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let envelope = match parse_envelope(line) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(line = line_no, error = %e, "skipping malformed input line");
                    continue;
                }
            };

            if realtime && let Some(t) = envelope.t {
                let (start, t0) = *clock.get_or_insert((Instant::now(), t));
                let due = Duration::try_from_secs_f64((t - t0).max(0.0))
                    .ok()
                    .and_then(|offset| start.checked_add(offset));
                let Some(due) = due else {
                    warn!(line = line_no, t, first_t = t0, "skipping line stamped too far after the first one");
                    continue;
                };
                tokio::time::sleep_until(due).await;
            }

            let topic = envelope.topic;
            match decode_sample(&topic, envelope.msg) {
                Ok(sample) => {
                    self.ingest(&topic, sample)?;
                    published += 1;
                }
                Err(e) => warn!(line = line_no, %topic, error = %e, "skipping undecodable message"),
            }
        }

        debug!(published, lines = line_no, "input exhausted");
        Ok(published)
    }
}

/// Outcome of [`read_line_bounded`].
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    /// The line, without its newline, is in the buffer.
    Complete,
    /// The line had this many bytes; it was consumed but not kept.
    Oversized(usize),
}

/// Read one `\n`-terminated line into `buf`, keeping at most
/// [`MAX_LINE_BYTES`].  Returns `None` at end of input.
async fn read_line_bounded<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<LineRead>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut len = 0usize;
    let mut read_any = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }
        read_any = true;
        let (content, consumed, done) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (i, i + 1, true),
            None => (available.len(), available.len(), false),
        };
        len = len.saturating_add(content);
        if len <= MAX_LINE_BYTES {
            buf.extend_from_slice(&available[..content]);
        }
        reader.consume(consumed);
        if done {
            break;
        }
    }

    Ok(match (read_any, len > MAX_LINE_BYTES) {
        (false, _) => None,
        (true, false) => Some(LineRead::Complete),
        (true, true) => {
            buf.clear();
            Some(LineRead::Oversized(len))
        }
    })
}

fn parse_envelope(line: &str) -> Result<Envelope, PoseError> {
    if line.len() > MAX_LINE_BYTES {
        return Err(PoseError::Parsing(format!(
            "line is {} bytes, exceeding the limit of {}",
            line.len(),
            MAX_LINE_BYTES
        )));
    }
    let envelope: Envelope =
        serde_json::from_str(line).map_err(|e| PoseError::Parsing(e.to_string()))?;
    if let Some(t) = envelope.t
        && !t.is_finite()
    {
        return Err(PoseError::Parsing(format!("non-finite timestamp {t}")));
    }
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_stamped_and_bare_attitude() {
        let stamped = decode_sample(
            topics::ATTITUDE,
            json!({"header": {"seq": 1}, "quaternion": {"x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0}}),
        )
        .unwrap();
        let bare = decode_sample(topics::ATTITUDE, json!({"x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0})).unwrap();
        assert_eq!(stamped, bare);
    }

    #[test]
    fn decodes_std_msgs_data_fields() {
        assert_eq!(
            decode_sample(topics::GPS_HEALTH, json!({"data": 5})).unwrap(),
            SensorSample::GpsHealth(5)
        );
        assert_eq!(
            decode_sample(topics::HEIGHT_ABOVE_TAKEOFF, json!(2.5)).unwrap(),
            SensorSample::HeightAboveTakeoff(2.5)
        );
    }

    #[test]
    fn gps_health_out_of_u8_range_is_rejected() {
        assert!(decode_sample(topics::GPS_HEALTH, json!({"data": 300})).is_err());
    }

    #[test]
    fn decodes_guidance_motion_ignoring_extra_fields() {
        let sample = decode_sample(
            topics::GUIDANCE_MOTION,
            json!({
                "q0": 1.0, "q1": 0.0, "q2": 0.0, "q3": 0.0,
                "attitude_status": 1,
                "position_in_global_x": 5.0,
                "position_in_global_y": 2.0,
                "position_in_global_z": 1.0,
                "velocity_in_global_x": 0.0
            }),
        )
        .unwrap();
        match sample {
            SensorSample::GuidanceMotion(m) => {
                assert_eq!(m.q0, 1.0);
                assert_eq!(m.position_in_global_x, 5.0);
            }
            other => panic!("unexpected sample {other:?}"),
        }
    }

    #[test]
    fn unknown_topic_is_a_parsing_error() {
        let err = decode_sample("/camera/image", json!({})).unwrap_err();
        assert!(matches!(err, PoseError::Parsing(_)));
    }

    #[tokio::test]
    async fn ingest_line_publishes_on_sensor_topic() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Sensors);
        let bridge = RosBridge::new(bus);

        let n = bridge
            .ingest_line(r#"{"topic": "/dji_sdk/local_position", "msg": {"point": {"x": 1, "y": 2, "z": 3}}}"#)
            .unwrap();
        assert_eq!(n, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.source, "dronepose-middleware::ros/dji_sdk/local_position");
        match event.payload {
            EventPayload::Sensor(SensorSample::LocalPosition(p)) => assert_eq!(p.z, 3.0),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_reader_skips_bad_lines() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Sensors);
        let bridge = RosBridge::new(bus);

        let input = concat!(
            "# recorded flight\n",
            "{\"topic\": \"/dji_sdk/gps_health\", \"msg\": {\"data\": 4}}\n",
            "not json\n",
            "\n",
            "{\"topic\": \"/nowhere\", \"msg\": {}}\n",
            "{\"topic\": \"/guidance/ultrasonic\", \"msg\": {\"ranges\": [1.2], \"intensities\": [1]}}\n",
        );
        let published = bridge.run_reader(input.as_bytes(), false).await.unwrap();
        assert_eq!(published, 2);

        assert!(matches!(
            rx.recv().await.unwrap().payload,
            EventPayload::Sensor(SensorSample::GpsHealth(4))
        ));
        assert!(matches!(
            rx.recv().await.unwrap().payload,
            EventPayload::Sensor(SensorSample::Ultrasonic(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn realtime_replay_waits_for_timestamps() {
        let bus = EventBus::default();
        let _rx = bus.subscribe_to(Topic::Sensors);
        let bridge = RosBridge::new(bus);

        let input = concat!(
            "{\"t\": 10.0, \"topic\": \"/dji_sdk/gps_health\", \"msg\": {\"data\": 4}}\n",
            "{\"t\": 12.5, \"topic\": \"/dji_sdk/gps_health\", \"msg\": {\"data\": 5}}\n",
        );
        let start = Instant::now();
        bridge.run_reader(input.as_bytes(), true).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(2_500));
    }

    #[tokio::test(start_paused = true)]
    async fn realtime_replay_skips_unreachable_timestamps() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Sensors);
        let bridge = RosBridge::new(bus);

        let input = concat!(
            "{\"t\": 0.0, \"topic\": \"/dji_sdk/gps_health\", \"msg\": {\"data\": 4}}\n",
            "{\"t\": 1e300, \"topic\": \"/dji_sdk/gps_health\", \"msg\": {\"data\": 5}}\n",
            "{\"t\": 0.5, \"topic\": \"/dji_sdk/gps_health\", \"msg\": {\"data\": 6}}\n",
        );
        let published = bridge.run_reader(input.as_bytes(), true).await.unwrap();
        assert_eq!(published, 2);

        assert!(matches!(
            rx.recv().await.unwrap().payload,
            EventPayload::Sensor(SensorSample::GpsHealth(4))
        ));
        assert!(matches!(
            rx.recv().await.unwrap().payload,
            EventPayload::Sensor(SensorSample::GpsHealth(6))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn realtime_replay_survives_opposite_extreme_timestamps() {
        let bridge = RosBridge::new(EventBus::default());
        let input = concat!(
            "{\"t\": -1e308, \"topic\": \"/dji_sdk/gps_health\", \"msg\": {\"data\": 4}}\n",
            "{\"t\": 1e308, \"topic\": \"/dji_sdk/gps_health\", \"msg\": {\"data\": 5}}\n",
        );
        assert_eq!(bridge.run_reader(input.as_bytes(), true).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn run_reader_drops_oversized_lines_without_keeping_them() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Sensors);
        let bridge = RosBridge::new(bus);

        let mut input = "x".repeat(MAX_LINE_BYTES * 3);
        input.push('\n');
        input.push_str("{\"topic\": \"/dji_sdk/gps_health\", \"msg\": {\"data\": 4}}\n");
        // A small buffer forces the long line to arrive in many chunks.
        let reader = tokio::io::BufReader::with_capacity(512, input.as_bytes());

        assert_eq!(bridge.run_reader(reader, false).await.unwrap(), 1);
        assert!(matches!(
            rx.recv().await.unwrap().payload,
            EventPayload::Sensor(SensorSample::GpsHealth(4))
        ));
    }

    #[tokio::test]
    async fn bounded_read_caps_the_buffer() {
        let mut input = "y".repeat(MAX_LINE_BYTES + 10);
        input.push_str("\nshort\nlast");
        let mut reader = tokio::io::BufReader::with_capacity(1024, input.as_bytes());
        let mut buf = Vec::new();

        let first = read_line_bounded(&mut reader, &mut buf).await.unwrap();
        assert_eq!(first, Some(LineRead::Oversized(MAX_LINE_BYTES + 10)));
        assert!(buf.is_empty());
        assert!(buf.capacity() <= 2 * MAX_LINE_BYTES);

        assert_eq!(read_line_bounded(&mut reader, &mut buf).await.unwrap(), Some(LineRead::Complete));
        assert_eq!(buf, b"short");
        assert_eq!(read_line_bounded(&mut reader, &mut buf).await.unwrap(), Some(LineRead::Complete));
        assert_eq!(buf, b"last");
        assert_eq!(read_line_bounded(&mut reader, &mut buf).await.unwrap(), None);
    }

    #[test]
    fn oversized_line_is_rejected() {
        let bridge = RosBridge::new(EventBus::default());
        let line = "x".repeat(MAX_LINE_BYTES + 1);
        assert!(matches!(bridge.ingest_line(&line), Err(PoseError::Parsing(_))));
    }
}
