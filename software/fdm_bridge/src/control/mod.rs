//! Mapping servo channels onto joint commands and applying them each step.
//!
//! Each configured control becomes an [`Actuator`] bound to one joint handle.
//! Incoming servo packets update the actuator's command; every step while the
//! link is online the command is applied to the joint directly or through a PID loop.

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use fdm_bridge_shared::{MAX_CONTROLS, MAX_SERVO_CHANNELS, ServoPacket};

use crate::config::ControlConfig;
use crate::error::ConfigError;
use crate::host::FdmHost;

mod low_pass;
mod pid;

pub use low_pass::LowPass;
pub use pid::{Pid, PidGains};

/// How an actuator's command reaches its joint
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlMode {
    /// Command is a target joint velocity
    #[default]
    Velocity,
    /// Command is a target joint position
    Position,
    /// Command is a joint force
    Effort,
}

/// Map a PWM width onto `[0, 1]` using the servo's calibrated endpoints
pub fn normalize_pwm(pwm: u16, servo_min: f64, servo_max: f64) -> f64 {
    ((f64::from(pwm) - servo_min) / (servo_max - servo_min)).clamp(0.0, 1.0)
}

/// One servo channel driving one joint
#[derive(Debug)]
pub struct Actuator<J> {
    index: usize,
    channel: usize,
    joint_name: String,
    joint: J,
    mode: ControlMode,
    use_force: bool,
    multiplier: f64,
    offset: f64,
    servo_min: f64,
    servo_max: f64,
    slowdown: f64,
    pid: Pid,
    filter: Option<LowPass>,

    command: f64,
    // Channel problems are reported once, not every frame
    reported: bool,
}

impl<J> Actuator<J> {
    /// Build the actuator at position `index` of the bank.
    ///
    /// `channel` is the resolved servo channel, which may differ from the configured
    /// one when the configuration leaves it out.
    pub fn new(
        index: usize,
        channel: usize,
        cfg: &ControlConfig,
        joint: J,
    ) -> Result<Self, ConfigError> {
        let joint_name = cfg.joint_name.clone();

        if !(cfg.servo_max > cfg.servo_min) {
            return Err(ConfigError::InvalidServoRange {
                joint: joint_name,
                min: cfg.servo_min,
                max: cfg.servo_max,
            });
        }
        cfg.pid.validate(&joint_name)?;

        let mut slowdown = cfg.rotor_velocity_slowdown_sim;
        if slowdown == 0.0 {
            warn!(
                "control for joint [{joint_name}] rotor_velocity_slowdown_sim is zero, assuming 1"
            );
            slowdown = 1.0;
        }

        let filter = if cfg.filter_joint_state {
            let lp = LowPass::new(cfg.frequency_cutoff, cfg.sampling_rate).map_err(|reason| {
                ConfigError::InvalidFilter {
                    joint: joint_name.clone(),
                    reason,
                }
            })?;
            Some(lp)
        } else {
            None
        };

        Ok(Self {
            index,
            channel,
            joint_name,
            joint,
            mode: cfg.mode,
            use_force: cfg.use_force,
            multiplier: cfg.multiplier(),
            offset: cfg.offset,
            servo_min: cfg.servo_min,
            servo_max: cfg.servo_max,
            slowdown,
            pid: Pid::new(cfg.pid),
            filter,
            command: 0.0,
            reported: false,
        })
    }

    /// PWM width for this actuator's channel
    pub fn read_pwm(&self, packet: &ServoPacket) -> Result<u16, ConfigError> {
        if self.index >= MAX_CONTROLS {
            return Err(ConfigError::TooManyActuators { index: self.index });
        }
        packet
            .pwm
            .get(self.channel)
            .copied()
            .ok_or(ConfigError::ChannelOutOfRange {
                index: self.index,
                channel: self.channel,
            })
    }

    /// Update the command from a freshly received packet.
    ///
    /// On a channel error the previous command is kept.
    pub fn map_packet(&mut self, packet: &ServoPacket) -> Result<f64, ConfigError> {
        match self.read_pwm(packet) {
            Ok(pwm) => {
                let x = normalize_pwm(pwm, self.servo_min, self.servo_max);
                self.command = self.multiplier * (x + self.offset);
                Ok(self.command)
            }
            Err(e) => {
                if !self.reported {
                    error!("{e}");
                    self.reported = true;
                }
                Err(e)
            }
        }
    }

    /// Drive the joint toward the current command over a step of `dt_s` seconds
    pub fn apply<H: FdmHost<Joint = J>>(&mut self, host: &mut H, dt_s: f64) {
        match (self.mode, self.use_force) {
            (ControlMode::Effort, _) => host.set_joint_force(&self.joint, self.command),
            (ControlMode::Velocity, true) => {
                let measured = self.measure(host.joint_velocity(&self.joint));
                let target = self.command / self.slowdown;
                let force = self.pid.update(measured - target, dt_s);
                host.set_joint_force(&self.joint, force);
            }
            (ControlMode::Position, true) => {
                let measured = self.measure(host.joint_position(&self.joint));
                let force = self.pid.update(measured - self.command, dt_s);
                host.set_joint_force(&self.joint, force);
            }
            (ControlMode::Velocity, false) => host.set_joint_velocity(&self.joint, self.command),
            (ControlMode::Position, false) => host.set_joint_position(&self.joint, self.command),
        }
    }

    fn measure(&mut self, raw: f64) -> f64 {
        match self.filter.as_mut() {
            Some(lp) => lp.update(raw),
            None => raw,
        }
    }

    /// Zero the command and forget loop history
    pub fn reset(&mut self) {
        self.command = 0.0;
        self.pid.reset();
        if let Some(lp) = self.filter.as_mut() {
            lp.reset();
        }
    }

    pub fn command(&self) -> f64 {
        self.command
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn joint_name(&self) -> &str {
        &self.joint_name
    }

    pub fn joint(&self) -> &J {
        &self.joint
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    /// Latest filtered joint measurement, if filtering is enabled
    pub fn filtered_state(&self) -> Option<f64> {
        self.filter.as_ref().map(LowPass::last_output)
    }
}

/// All actuators of one model, in configuration order
#[derive(Debug)]
pub struct ControllerBank<J> {
    actuators: Vec<Actuator<J>>,
}

impl<J> Default for ControllerBank<J> {
    fn default() -> Self {
        Self {
            actuators: Vec::new(),
        }
    }
}

impl<J> ControllerBank<J> {
    /// Resolve every control's joint and build its actuator.
    ///
    /// A control without a `channel` takes its position in the list, with a warning.
    pub fn from_config<F>(controls: &[ControlConfig], mut resolve: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<J>,
    {
        let mut actuators = Vec::with_capacity(controls.len());
        for (index, cfg) in controls.iter().enumerate() {
            let channel = match cfg.channel {
                Some(channel) => channel,
                None => {
                    warn!(
                        "control[{index}] has no channel specified, using control index {index} as channel"
                    );
                    index
                }
            };
            if channel >= MAX_SERVO_CHANNELS {
                warn!("{}", ConfigError::ChannelOutOfRange { index, channel });
            }

            let joint = resolve(&cfg.joint_name)
                .ok_or_else(|| ConfigError::JointNotFound(cfg.joint_name.clone()))?;
            actuators.push(Actuator::new(index, channel, cfg, joint)?);
        }
        Ok(Self { actuators })
    }

    /// Update commands from a packet; actuators with channel errors are skipped.
    pub fn map_packet(&mut self, packet: &ServoPacket) {
        for actuator in self.actuators.iter_mut() {
            let _ = actuator.map_packet(packet);
        }
    }

    pub fn apply<H: FdmHost<Joint = J>>(&mut self, host: &mut H, dt_s: f64) {
        for actuator in self.actuators.iter_mut() {
            actuator.apply(host, dt_s);
        }
    }

    pub fn reset(&mut self) {
        for actuator in self.actuators.iter_mut() {
            actuator.reset();
        }
    }

    pub fn commands(&self) -> Vec<f64> {
        self.actuators.iter().map(Actuator::command).collect()
    }

    pub fn actuators(&self) -> &[Actuator<J>] {
        &self.actuators
    }

    pub fn len(&self) -> usize {
        self.actuators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actuators.is_empty()
    }
}
