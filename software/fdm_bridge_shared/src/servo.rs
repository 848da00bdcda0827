//! Servo output frame sent by the flight controller once per controller cycle.
use byte_struct::*;
pub use byte_struct::{ByteStruct, ByteStructLen};

use crate::{MAX_SERVO_CHANNELS, SERVO_PACKET_LEN, SERVO_PACKET_MAGIC};

/// Reasons for discarding an inbound datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error(
        "Incorrect protocol magic {found}, should be {expected}",
        expected = SERVO_PACKET_MAGIC
    )]
    BadMagic { found: u16 },

    #[error("Servo packet must be {expected} bytes, received {found}", expected = SERVO_PACKET_LEN)]
    BadLength { found: usize },
}

/// PWM outputs of the flight controller for one frame.
///
/// Layout is `magic | frame_rate | frame_count | pwm[16]` with no padding.
#[derive(ByteStruct, Clone, Copy, Debug, PartialEq, Eq)]
#[byte_struct_le]
pub struct ServoPacket {
    /// Always [`SERVO_PACKET_MAGIC`] for a valid packet
    pub magic: u16,

    /// Rate at which the flight controller is running, in Hz
    pub frame_rate: u16,

    /// Incremented once per controller frame
    pub frame_count: u32,

    /// Servo outputs in microseconds
    pub pwm: [u16; 16],
}

impl Default for ServoPacket {
    fn default() -> Self {
        Self {
            magic: SERVO_PACKET_MAGIC,
            frame_rate: 0,
            frame_count: 0,
            pwm: [0; MAX_SERVO_CHANNELS],
        }
    }
}

impl ServoPacket {
    pub fn new(frame_rate: u16, frame_count: u32, pwm: [u16; MAX_SERVO_CHANNELS]) -> Self {
        Self {
            magic: SERVO_PACKET_MAGIC,
            frame_rate,
            frame_count,
            pwm,
        }
    }

    /// Parse and validate a datagram.
    ///
    /// # Errors
    ///
    /// * [`ProtocolError::BadLength`] unless the datagram is exactly [`SERVO_PACKET_LEN`] bytes
    /// * [`ProtocolError::BadMagic`] if the magic number does not match
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != Self::BYTE_LEN {
            return Err(ProtocolError::BadLength { found: bytes.len() });
        }

        let packet = Self::read_bytes(bytes);
        if packet.magic != SERVO_PACKET_MAGIC {
            return Err(ProtocolError::BadMagic {
                found: packet.magic,
            });
        }

        Ok(packet)
    }

    /// Serialize to wire format
    pub fn encode(&self) -> [u8; SERVO_PACKET_LEN] {
        let mut buf = [0_u8; SERVO_PACKET_LEN];
        self.write_bytes(&mut buf);
        buf
    }

    /// The first `count` channels; the rest of the frame is ignored by the consumer.
    pub fn channels(&self, count: usize) -> &[u16] {
        &self.pwm[..count.min(MAX_SERVO_CHANNELS)]
    }
}
