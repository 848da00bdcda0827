//! Error taxonomy.
//!
//! Setup errors ([`BindError`], [`ConfigError`]) abort session construction.
//! Everything that can go wrong during a tick is logged and absorbed;
//! only [`SensorError`] is reported back, to the caller of a range update.

use std::net::SocketAddr;

use thiserror::Error;

pub use fdm_bridge_shared::ProtocolError;
use fdm_bridge_shared::{MAX_CONTROLS, MAX_SERVO_CHANNELS};

/// Failure to open the flight dynamics model socket
#[derive(Debug, Error)]
pub enum BindError {
    #[error("Failed to bind with {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to set socket bound to {addr} to nonblocking mode: {source}")]
    Nonblocking {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to send a state frame
#[derive(Debug, Error)]
pub enum SendError {
    #[error("Unable to send before the transport is open")]
    NotOpen,

    #[error("Failed to send state to {peer}: {source}")]
    Io {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Invalid control, sensor or session configuration
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error(
        "control[{index}] channel [{channel}] is greater than the number of servo channels [{max}], control not applied",
        max = MAX_SERVO_CHANNELS
    )]
    ChannelOutOfRange { index: usize, channel: usize },

    #[error("too many controls, skipping [{index} >= {max}]", max = MAX_CONTROLS)]
    TooManyActuators { index: usize },

    #[error("control for joint [{joint}] needs servo_max ({max}) > servo_min ({min})")]
    InvalidServoRange { joint: String, min: f64, max: f64 },

    #[error("control for joint [{joint}] needs {what} min ({min}) <= max ({max})")]
    InvalidPidLimits {
        joint: String,
        what: &'static str,
        min: f64,
        max: f64,
    },

    #[error("control for joint [{joint}] has an unusable filter: {reason}")]
    InvalidFilter { joint: String, reason: String },

    #[error("Couldn't find specified joint [{0}]")]
    JointNotFound(String),

    #[error("range sensor on topic [{topic}] has index {index}, indices start at 1")]
    InvalidSensorIndex { topic: String, index: usize },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Failed to read configuration file: {0}")]
    Io(String),
}

/// Rejected asynchronous sensor update
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("range sensor index {index} out of range for {count} configured sensors")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("Session closed, range update dropped")]
    SessionClosed,
}

/// Anything that prevents a session from starting
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}
