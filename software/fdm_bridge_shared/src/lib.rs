#![doc = include_str!("../README.md")]

pub mod servo;
pub mod state;

pub use servo::{ProtocolError, ServoPacket};
pub use state::{FdmState, Imu};

/// Magic number identifying a 16-channel servo packet
pub const SERVO_PACKET_MAGIC: u16 = 18458;

/// Size of a servo packet on the wire
pub const SERVO_PACKET_LEN: usize = 40;

/// Number of PWM channels carried by each servo packet
pub const MAX_SERVO_CHANNELS: usize = 16;

/// Number of controls that can be mapped onto servo channels
pub const MAX_CONTROLS: usize = 255;

/// Number of `rng_N` range finder fields understood by the flight controller
pub const MAX_RANGE_SENSORS: usize = 6;

/// The UDP address on which the flight dynamics model listens by default
pub const FDM_ADDR: &str = "127.0.0.1";

/// The UDP port on which the flight dynamics model expects servo packets
pub const FDM_PORT_IN: u16 = 9002;
