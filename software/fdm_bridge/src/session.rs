//! One bridge between a simulated model and a flight controller.
//!
//! The host calls [`Session::tick`] once per simulation step. Each step receives
//! the newest servo packet, updates the link state, applies actuator commands
//! and replies with the model's state.
//!
//! Link state and cached range readings are shared with sensor callbacks
//! behind one lock. Controller state sits behind a second lock that only the
//! step takes. The two are never held together or across a socket call, so a
//! host may deliver range readings from inside its joint setters.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{Span, debug, info, info_span, warn};

use fdm_bridge_shared::ServoPacket;

use crate::config::BridgeConfig;
use crate::control::ControllerBank;
use crate::error::{BridgeError, ProtocolError, SensorError};
use crate::host::FdmHost;
use crate::link::{FrameVerdict, LinkEvent, LinkState};
use crate::telemetry::{self, CoordinateTransforms};
use crate::transport::{Datagram, Transport};

/// Upper bound on stale datagrams discarded in one step
pub const MAX_DRAIN_ITERATIONS: usize = 256;

/// Cached reading of a range sensor that has not reported yet
pub const RANGE_UNSET: f64 = -1.0;

/// State shared between the step and the range callbacks
#[derive(Debug)]
struct SessionState {
    link: LinkState,
    ranges: Vec<f64>,
    closed: bool,
}

/// What happened during one step
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickReport {
    /// Simulation time since the previous applied step; nothing else happens when not positive
    pub dt_s: f64,

    /// A datagram was read this step
    pub received: bool,

    /// Older datagrams discarded in favor of the newest
    pub drained: usize,

    /// Why the newest datagram was discarded
    pub rejected: Option<ProtocolError>,

    pub duplicate: bool,
    pub came_online: bool,
    pub peer_reset: bool,

    /// Frames skipped by the flight controller since the previous packet
    pub missed_frames: u32,

    /// The link went offline this step and commands were zeroed
    pub timed_out: bool,

    /// Link status at the end of the step
    pub online: bool,

    /// Commands were applied to the joints
    pub actuated: bool,

    /// A state frame was sent
    pub sent: bool,
}

pub struct Session<J> {
    name: String,
    state: Arc<Mutex<SessionState>>,
    bank: Mutex<ControllerBank<J>>,
    transport: Mutex<Box<dyn Transport>>,
    transforms: CoordinateTransforms,
    span: Span,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<J> Session<J> {
    /// Validate the configuration, resolve every joint and open the transport.
    ///
    /// # Errors
    ///
    /// * [`BridgeError::Config`] for invalid settings or a joint `resolve` cannot find
    /// * [`BridgeError::Bind`] if the transport cannot be opened
    pub fn new<F>(config: BridgeConfig, resolve: F) -> Result<Self, BridgeError>
    where
        F: FnMut(&str) -> Option<J>,
    {
        let span = info_span!("fdm", model = %config.name);
        let _enter = span.enter();

        config.validate()?;
        let bank = ControllerBank::from_config(&config.controls, resolve)?;
        let transforms = CoordinateTransforms::from_config(&config);

        for sensor in &config.range_sensors {
            info!("Range sensor {} on topic [{}]", sensor.index, sensor.topic);
        }
        let ranges = vec![RANGE_UNSET; config.range_sensors.len()];

        let mut transport = config.transport;
        transport.open()?;

        info!(
            "Session started with {} controls, timeout after {} missed steps",
            bank.len(),
            config.connection_timeout_max_count
        );

        let state = SessionState {
            link: LinkState::new(config.connection_timeout_max_count),
            ranges,
            closed: false,
        };

        drop(_enter);
        Ok(Self {
            name: config.name,
            state: Arc::new(Mutex::new(state)),
            bank: Mutex::new(bank),
            transport: Mutex::new(transport),
            transforms,
            span,
        })
    }

    /// Advance one simulation step
    pub fn tick<H: FdmHost<Joint = J>>(&self, host: &mut H) -> TickReport {
        let _enter = self.span.enter();
        let mut report = TickReport::default();

        let sim_time = host.sim_time();
        let (timeout, last_update) = {
            let state = lock(&self.state);
            if state.closed {
                return report;
            }
            (state.link.poll_timeout(), state.link.last_update_time())
        };

        let last_update = last_update.unwrap_or(Duration::ZERO);
        report.dt_s = sim_time.as_secs_f64() - last_update.as_secs_f64();
        if report.dt_s <= 0.0 {
            return report;
        }

        let datagram = self.receive(timeout, &mut report);
        let packet = match datagram.as_ref().map(|d| ServoPacket::decode(&d.payload)) {
            Some(Ok(packet)) => Some(packet),
            Some(Err(e)) => {
                warn!("{e}");
                report.rejected = Some(e);
                None
            }
            None => None,
        };

        let accepted = {
            let mut state = lock(&self.state);
            let mut accepted = None;

            match (&datagram, packet) {
                (Some(d), Some(packet)) => match state.link.on_frame(&packet, d.time) {
                    FrameVerdict::Accepted {
                        came_online,
                        missed,
                        peer_reset,
                    } => {
                        report.came_online = came_online;
                        report.missed_frames = missed;
                        report.peer_reset = peer_reset;
                        accepted = Some(packet);
                    }
                    FrameVerdict::Duplicate => {
                        report.duplicate = true;
                        report.timed_out = state.link.on_miss() == Some(LinkEvent::Timeout);
                    }
                },
                // Malformed packets change nothing
                (Some(_), None) => {}
                (None, _) => {
                    report.timed_out = state.link.on_miss() == Some(LinkEvent::Timeout);
                }
            }

            report.online = state.link.is_online();
            state.link.mark_applied(sim_time);
            accepted
        };

        // Host setters may call back into a RangeSink, so only the bank is held here
        {
            let mut bank = lock(&self.bank);
            if report.timed_out {
                bank.reset();
            }
            if let Some(packet) = &accepted {
                bank.map_packet(packet);
            }
            if report.online {
                bank.apply(host, report.dt_s);
                report.actuated = true;
            }
        }

        if report.online {
            let ranges = lock(&self.state).ranges.clone();
            report.sent = self.send_state(host, &ranges);
        }
        report
    }

    fn receive(&self, timeout: Duration, report: &mut TickReport) -> Option<Datagram> {
        let mut transport = lock(&self.transport);
        let first = transport.recv(timeout)?;
        let (latest, drained) = transport.drain_to_latest(first, MAX_DRAIN_ITERATIONS);
        if drained > 0 {
            warn!("Drained {drained} stale servo packets");
        }
        report.received = true;
        report.drained = drained;
        Some(latest)
    }

    fn send_state<H: FdmHost>(&self, host: &H, ranges: &[f64]) -> bool {
        let state = telemetry::assemble(host, &self.transforms, ranges);
        let line = match state.to_json_line() {
            Ok(line) => line,
            Err(e) => {
                debug!("Unable to serialize state: {e}");
                return false;
            }
        };

        let mut transport = lock(&self.transport);
        let Some(peer) = transport.last_peer() else {
            return false;
        };
        match transport.send_to(line.as_bytes(), peer) {
            Ok(_) => true,
            Err(e) => {
                debug!("{e}");
                false
            }
        }
    }

    /// Handle for delivering range readings from another thread
    pub fn range_sink(&self) -> RangeSink {
        RangeSink {
            state: Arc::clone(&self.state),
        }
    }

    /// Overwrite the cached reading of range sensor `index`, counting from 0
    pub fn update_range(&self, index: usize, range: f64) -> Result<(), SensorError> {
        update_range(&self.state, index, range)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_online(&self) -> bool {
        lock(&self.state).link.is_online()
    }

    /// Current command of each actuator, in configuration order
    pub fn commands(&self) -> Vec<f64> {
        lock(&self.bank).commands()
    }

    /// Latest filtered joint measurement of each actuator that filters
    pub fn filtered_states(&self) -> Vec<Option<f64>> {
        lock(&self.bank)
            .actuators()
            .iter()
            .map(|a| a.filtered_state())
            .collect()
    }

    /// Snapshot of the link state
    pub fn link(&self) -> LinkState {
        lock(&self.state).link.clone()
    }

    pub fn ranges(&self) -> Vec<f64> {
        lock(&self.state).ranges.clone()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.transport).local_addr()
    }

    /// Stop accepting range updates, then release the transport
    pub fn shutdown(&self) {
        let _enter = self.span.enter();
        {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            state.closed = true;
        }
        lock(&self.transport).close();
        info!("Session closed");
    }
}

impl<J> Drop for Session<J> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn update_range(
    state: &Mutex<SessionState>,
    index: usize,
    range: f64,
) -> Result<(), SensorError> {
    let mut state = lock(state);
    if state.closed {
        return Err(SensorError::SessionClosed);
    }
    let count = state.ranges.len();
    let slot = state
        .ranges
        .get_mut(index)
        .ok_or(SensorError::IndexOutOfRange { index, count })?;
    *slot = range;
    Ok(())
}

/// Shared handle for range sensor callbacks.
///
/// Outlives the session safely; updates after shutdown are rejected.
#[derive(Clone, Debug)]
pub struct RangeSink {
    state: Arc<Mutex<SessionState>>,
}

impl RangeSink {
    /// Overwrite the cached reading of range sensor `index`, counting from 0
    pub fn update(&self, index: usize, range: f64) -> Result<(), SensorError> {
        update_range(&self.state, index, range)
    }
}
