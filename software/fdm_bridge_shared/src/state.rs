//! Vehicle state sent back to the flight controller after each simulation step.
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::MAX_RANGE_SENSORS;

const RANGE_KEYS: [&str; MAX_RANGE_SENSORS] =
    ["rng_1", "rng_2", "rng_3", "rng_4", "rng_5", "rng_6"];

/// Body-frame inertial measurements
#[derive(serde::Serialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct Imu {
    /// Angular velocity, rad/s
    pub gyro: [f64; 3],

    /// Linear acceleration, m/s^2
    pub accel_body: [f64; 3],
}

/// One JSON state frame.
///
/// Serializes as a single-line object with keys `timestamp`, `imu`, `position`,
/// `quaternion`, `velocity`, then one `rng_N` key per range finder reading,
/// starting at `rng_1`. Readings past the sixth are not sent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FdmState {
    /// Simulation time since start, seconds
    pub timestamp: f64,

    pub imu: Imu,

    /// Position in the NED frame, meters
    pub position: [f64; 3],

    /// Rotation from NED to body, ordered `[w, x, y, z]`
    pub quaternion: [f64; 4],

    /// Velocity in the NED frame, m/s
    pub velocity: [f64; 3],

    /// Latest range finder readings, meters
    pub ranges: Vec<f64>,
}

impl FdmState {
    /// Number of `rng_N` fields this frame will carry
    pub fn range_count(&self) -> usize {
        self.ranges.len().min(MAX_RANGE_SENSORS)
    }

    /// JSON text framed with a leading and trailing newline,
    /// which is how the flight controller delimits messages.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("\n{json}\n"))
    }
}

impl Serialize for FdmState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(5 + self.range_count()))?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        map.serialize_entry("imu", &self.imu)?;
        map.serialize_entry("position", &self.position)?;
        map.serialize_entry("quaternion", &self.quaternion)?;
        map.serialize_entry("velocity", &self.velocity)?;
        for (key, range) in RANGE_KEYS.iter().zip(self.ranges.iter()) {
            map.serialize_entry(key, range)?;
        }
        map.end()
    }
}
