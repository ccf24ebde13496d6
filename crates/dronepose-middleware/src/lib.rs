//! `dronepose-middleware` – transport plumbing around the estimator.
//!
//! Moves sensor samples in and pose publications out without knowing how a
//! pose is computed.
//!
//! # Modules
//!
//! - [`bus`] – typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`ros_bridge`] – decodes ROS-shaped JSON messages into sensor samples
//!   and publishes them on the bus.
//! - [`adapter`] – the [`PoseSink`] trait every output adapter implements.
//! - [`sink`] – JSON-lines and bus-backed sinks.

pub mod adapter;
pub mod bus;
pub mod ros_bridge;
pub mod sink;

pub use adapter::PoseSink;
pub use bus::{EventBus, Topic, TopicReceiver};
pub use ros_bridge::RosBridge;
pub use sink::{BusSink, JsonLinesSink};
