#![doc = include_str!("../README.md")]

pub mod config;
pub mod control;
pub mod error;
pub mod host;
pub mod link;
pub mod logging;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use config::BridgeConfig;
pub use error::BridgeError;
pub use host::FdmHost;
pub use session::{RangeSink, Session, TickReport};

// Re-export shared wire formats
pub use fdm_bridge_shared::{self, FdmState, ServoPacket};
