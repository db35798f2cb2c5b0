//! ---
//! pw_section: "02-messaging-ipc-data-model"
//! pw_subsection: "module"
//! pw_type: "source"
//! pw_scope: "code"
//! pw_description: "Wire model, topics, transports and the message bus."
//! pw_version: "v0.1.0"
//! pw_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Everything that crosses the boundary between the simulator, the detector
//! and external consumers: the JSON wire model, topic naming, and the bus
//! that fans messages out to transports.

pub mod archive;
pub mod bus;
pub mod transport;
pub mod types;

/// Shared result type for messaging operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Failures raised by transports and the bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Wrapper for IO errors encountered while archiving.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization or deserialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// A topic string did not match `telemetry|alerts|control/{asset_id}`.
    #[error("invalid topic '{0}'")]
    InvalidTopic(String),
    /// At least one transport rejected the message.
    #[error("message on {topic} not delivered by: {}", transports.join(", "))]
    Undelivered {
        /// Topic of the rejected message.
        topic: String,
        /// Names of the transports that failed.
        transports: Vec<&'static str>,
    },
    /// The transport can no longer accept messages.
    #[error("transport {0} is closed")]
    Closed(&'static str),
}

pub use archive::{read_archive, ArchiveRecord, JsonlArchive};
pub use bus::{BusStats, MessageBus, PublishReceipt};
pub use transport::{InMemoryTransport, Subscription, Transport};
pub use types::{
    AlertDetail, AlertEvent, AlertEvidence, ControlAction, ControlEvent, DetectionMethod,
    FaultLabel, GroundTruth, Message, Payload, Severity, SignalKind, SignalReadings,
    TelemetrySample, Topic, TopicKind, DEFAULT_ASSET_ID, DEFAULT_PLANT_ID,
};
