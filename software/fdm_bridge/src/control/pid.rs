//! A PID controller with a clamped integral term for anti-windup

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Gains and limits for one actuator's PID loop.
///
/// Keys are flattened into the control's configuration object.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct PidGains {
    #[serde(rename = "p_gain")]
    pub kp: f64,
    #[serde(rename = "i_gain")]
    pub ki: f64,
    #[serde(rename = "d_gain")]
    pub kd: f64,

    /// Bounds on the integral contribution `ki * integral`
    pub i_max: f64,
    pub i_min: f64,

    /// Bounds on the output
    pub cmd_max: f64,
    pub cmd_min: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 0.1,
            ki: 0.0,
            kd: 0.0,
            i_max: 0.0,
            i_min: 0.0,
            cmd_max: 1.0,
            cmd_min: -1.0,
        }
    }
}

impl PidGains {
    pub fn validate(&self, joint: &str) -> Result<(), ConfigError> {
        for (what, min, max) in [
            ("cmd", self.cmd_min, self.cmd_max),
            ("i", self.i_min, self.i_max),
        ] {
            if !(min <= max) {
                return Err(ConfigError::InvalidPidLimits {
                    joint: joint.to_owned(),
                    what,
                    min,
                    max,
                });
            }
        }
        Ok(())
    }
}

/// PID state for a single actuator
#[derive(Clone, Debug, Default)]
pub struct Pid {
    gains: PidGains,

    // Internal state
    err: f64,
    integral: f64,
    output: f64,
}

impl Pid {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            err: 0.0,
            integral: 0.0,
            output: 0.0,
        }
    }

    pub fn gains(&self) -> &PidGains {
        &self.gains
    }

    /// Step the loop with `error = measured - target` over `dt_s` seconds.
    ///
    /// A non-positive step or a non-finite error produces no output and leaves
    /// the loop state untouched.
    pub fn update(&mut self, error: f64, dt_s: f64) -> f64 {
        if !(dt_s > 0.0) || !error.is_finite() {
            return 0.0;
        }

        let g = &self.gains;
        let derivative = (error - self.err) / dt_s;
        self.err = error;
        self.integral += error * dt_s;

        // Anti-windup: clamp the integral contribution and back out the state
        let mut i_term = g.ki * self.integral;
        if i_term > g.i_max {
            i_term = g.i_max;
            if g.ki != 0.0 {
                self.integral = i_term / g.ki;
            }
        } else if i_term < g.i_min {
            i_term = g.i_min;
            if g.ki != 0.0 {
                self.integral = i_term / g.ki;
            }
        }

        let y = g.kp * error + i_term + g.kd * derivative;
        self.output = y.max(g.cmd_min).min(g.cmd_max);
        self.output
    }

    pub fn reset(&mut self) {
        self.err = 0.0;
        self.integral = 0.0;
        self.output = 0.0;
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// Most recent bounded output
    pub fn output(&self) -> f64 {
        self.output
    }
}
