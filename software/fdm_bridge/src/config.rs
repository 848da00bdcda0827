//! Session configuration, loaded from JSON.

use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use nalgebra::{Isometry3, Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::control::{ControlMode, PidGains};
use crate::error::ConfigError;
use crate::transport::{Transport, UdpTransport};

/// Deprecated spin direction of a rotor, replaced by the sign of `multiplier`
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurningDirection {
    Cw,
    Ccw,
}

impl TurningDirection {
    pub fn multiplier(self) -> f64 {
        match self {
            TurningDirection::Cw => -1.0,
            TurningDirection::Ccw => 1.0,
        }
    }
}

/// One servo channel mapped onto one joint
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    /// Servo channel, `0..16`. Defaults to the control's position in the list.
    pub channel: Option<usize>,

    #[serde(rename = "type")]
    pub mode: ControlMode,

    /// Drive the joint through a PID force loop instead of setting its state
    pub use_force: bool,

    pub joint_name: String,

    pub multiplier: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub turning_direction: Option<TurningDirection>,

    pub offset: f64,

    /// PWM width, in microseconds, that maps to 0
    pub servo_min: f64,

    /// PWM width, in microseconds, that maps to 1
    pub servo_max: f64,

    #[serde(flatten)]
    pub pid: PidGains,

    /// Divides velocity targets before they reach the PID loop
    pub rotor_velocity_slowdown_sim: f64,

    /// Low-pass filter on the measured joint state
    pub filter_joint_state: bool,
    pub frequency_cutoff: f64,
    pub sampling_rate: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            channel: None,
            mode: ControlMode::Velocity,
            use_force: true,
            joint_name: String::new(),
            multiplier: None,
            turning_direction: None,
            offset: 0.0,
            servo_min: 1000.0,
            servo_max: 2000.0,
            pid: PidGains::default(),
            rotor_velocity_slowdown_sim: 1.0,
            filter_joint_state: false,
            frequency_cutoff: 5.0,
            sampling_rate: 0.2,
        }
    }
}

impl ControlConfig {
    /// Scale applied to the normalized command.
    ///
    /// An explicit `multiplier` wins over the deprecated `turning_direction`.
    pub fn multiplier(&self) -> f64 {
        match (self.multiplier, self.turning_direction) {
            (Some(m), _) => m,
            (None, Some(dir)) => {
                warn!(
                    "joint [{}] turning_direction is deprecated, use multiplier instead",
                    self.joint_name
                );
                dir.multiplier()
            }
            (None, None) => 1.0,
        }
    }
}

/// A rigid transform written as translation and roll-pitch-yaw, in meters and radians
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
#[serde(default)]
pub struct PoseConfig {
    pub xyz: [f64; 3],
    pub rpy: [f64; 3],
}

impl PoseConfig {
    pub fn from_rpy(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self {
            xyz: [0.0; 3],
            rpy: [roll, pitch, yaw],
        }
    }

    pub fn to_isometry(&self) -> Isometry3<f64> {
        let [x, y, z] = self.xyz;
        let [roll, pitch, yaw] = self.rpy;
        Isometry3::from_parts(
            Translation3::new(x, y, z),
            UnitQuaternion::from_euler_angles(roll, pitch, yaw),
        )
    }
}

/// A range finder whose readings are forwarded as `rng_N`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RangeSensorConfig {
    /// Position of the reading in the outbound frame, starting at 1
    pub index: usize,
    pub topic: String,
}

impl RangeSensorConfig {
    /// Zero-based slot in the range cache
    pub fn slot(&self) -> Option<usize> {
        self.index.checked_sub(1)
    }
}

/// Everything needed to start a session for one model
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct BridgeConfig {
    /// Model name, used in log spans
    pub name: String,

    pub transport: Box<dyn Transport>,

    /// Consecutive steps without a servo packet before the link goes offline
    pub connection_timeout_max_count: u32,

    /// Model frame to the body frame (x forward, z down)
    pub model_xyz_to_airplane_x_forward_z_down: PoseConfig,

    /// Simulator world frame to north-east-down
    pub gazebo_xyz_to_ned: PoseConfig,

    pub controls: Vec<ControlConfig>,

    pub range_sensors: Vec<RangeSensorConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        // Current time with seconds, without characters that are invalid in file names
        let name = DateTime::<Utc>::from(SystemTime::now())
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            .replace(":", "");
        Self {
            name,
            transport: Box::new(UdpTransport::default()),
            connection_timeout_max_count: 10,
            model_xyz_to_airplane_x_forward_z_down: PoseConfig::default(),
            gazebo_xyz_to_ned: PoseConfig::from_rpy(std::f64::consts::PI, 0.0, 0.0),
            controls: Vec::new(),
            range_sensors: Vec::new(),
        }
    }
}

impl BridgeConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Checks that do not need the host: servo ranges and sensor indices
    pub fn validate(&self) -> Result<(), ConfigError> {
        for control in &self.controls {
            if !(control.servo_max > control.servo_min) {
                return Err(ConfigError::InvalidServoRange {
                    joint: control.joint_name.clone(),
                    min: control.servo_min,
                    max: control.servo_max,
                });
            }
            control.pid.validate(&control.joint_name)?;
        }

        let count = self.range_sensors.len();
        for sensor in &self.range_sensors {
            match sensor.slot() {
                Some(slot) if slot < count => {}
                _ => {
                    return Err(ConfigError::InvalidSensorIndex {
                        topic: sensor.topic.clone(),
                        index: sensor.index,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = BridgeConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg.connection_timeout_max_count, 10);
        assert!(cfg.controls.is_empty());
        assert_eq!(cfg.gazebo_xyz_to_ned.rpy[0], std::f64::consts::PI);
        assert!(!cfg.name.contains(':'));

        let control = ControlConfig::default();
        assert_eq!(control.mode, ControlMode::Velocity);
        assert!(control.use_force);
        assert_eq!((control.servo_min, control.servo_max), (1000.0, 2000.0));
        assert_eq!(control.pid.kp, 0.1);
        assert_eq!((control.pid.cmd_min, control.pid.cmd_max), (-1.0, 1.0));
        assert_eq!(control.multiplier(), 1.0);
    }

    #[test]
    fn parses_a_quadcopter() {
        let text = r#"{
            "name": "iris",
            "transport": {"type": "UdpTransport", "fdm_addr": "127.0.0.1", "fdm_port_in": 9012},
            "connection_timeout_max_count": 5,
            "controls": [
                {"channel": 0, "type": "VELOCITY", "joint_name": "rotor_0_joint",
                 "multiplier": 838, "offset": 0, "p_gain": 0.2, "cmd_max": 2.5, "cmd_min": -2.5},
                {"channel": 1, "joint_name": "rotor_1_joint", "turning_direction": "cw"},
                {"type": "EFFORT", "joint_name": "flap", "use_force": false}
            ],
            "range_sensors": [{"index": 1, "topic": "sonar_down"}]
        }"#;
        let cfg = BridgeConfig::from_json_str(text).unwrap();

        assert_eq!(cfg.name, "iris");
        assert_eq!(cfg.connection_timeout_max_count, 5);
        assert_eq!(cfg.controls.len(), 3);

        let rotor = &cfg.controls[0];
        assert_eq!(rotor.channel, Some(0));
        assert_eq!(rotor.multiplier(), 838.0);
        assert_eq!(rotor.pid.kp, 0.2);
        assert_eq!(rotor.pid.cmd_max, 2.5);
        // untouched gains keep their defaults
        assert_eq!(rotor.pid.ki, 0.0);

        assert_eq!(cfg.controls[1].multiplier(), -1.0);
        assert_eq!(cfg.controls[2].mode, ControlMode::Effort);
        assert_eq!(cfg.controls[2].channel, None);
        assert!(!cfg.controls[2].use_force);

        assert_eq!(cfg.range_sensors[0].slot(), Some(0));
    }

    #[test]
    fn serialized_config_reloads() {
        let mut cfg = BridgeConfig::default();
        cfg.controls.push(ControlConfig {
            channel: Some(3),
            joint_name: "elevator".into(),
            mode: ControlMode::Position,
            ..Default::default()
        });
        let text = cfg.to_json_string().unwrap();
        let reloaded = BridgeConfig::from_json_str(&text).unwrap();
        assert_eq!(reloaded.name, cfg.name);
        assert_eq!(reloaded.controls, cfg.controls);
    }

    #[test]
    fn rejects_invalid_values() {
        let err = BridgeConfig::from_json_str(
            r#"{"controls": [{"joint_name": "j", "servo_min": 1500, "servo_max": 1500}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidServoRange { .. }));

        let err = BridgeConfig::from_json_str(r#"{"range_sensors": [{"index": 0, "topic": "s"}]}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSensorIndex { index: 0, .. }));

        let err = BridgeConfig::from_json_str(r#"{"range_sensors": [{"index": 2, "topic": "s"}]}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSensorIndex { index: 2, .. }));

        let err = BridgeConfig::from_json_str(r#"{"controls": [{"type": "TORQUE"}]}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn pose_converts_to_isometry() {
        let pose = PoseConfig {
            xyz: [1.0, 2.0, 3.0],
            rpy: [0.0, 0.0, std::f64::consts::FRAC_PI_2],
        };
        let iso = pose.to_isometry();
        let p = iso * nalgebra::Point3::new(1.0, 0.0, 0.0);
        assert!((p.coords - nalgebra::Vector3::new(1.0, 3.0, 3.0)).norm() < 1e-12);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = BridgeConfig::load(Path::new("/nonexistent/fdm_bridge.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
