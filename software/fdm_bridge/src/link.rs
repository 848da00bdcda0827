//! Connection state of the flight controller link.
//!
//! The link starts offline, comes online on the first accepted servo packet,
//! and goes back offline after too many consecutive steps without one.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use fdm_bridge_shared::ServoPacket;

/// Receive wait while online
pub const ONLINE_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Receive wait while offline
pub const OFFLINE_POLL_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LinkStatus {
    #[default]
    Offline,
    Online,
}

/// Outcome of offering a valid packet to the link
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameVerdict {
    /// Packet should be mapped onto the actuators
    Accepted {
        /// The link was offline before this packet
        came_online: bool,
        /// Frames skipped since the previous packet
        missed: u32,
        /// Frame counter went backwards, so the flight controller restarted
        peer_reset: bool,
    },
    /// Same frame counter as the previous packet while online; the caller
    /// counts it as a miss
    Duplicate,
}

/// State transitions that are not tied to a packet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// Too many consecutive misses; commands must be zeroed
    Timeout,
}

#[derive(Clone, Debug)]
pub struct LinkState {
    status: LinkStatus,
    last_frame_count: Option<u32>,
    missed_count: u32,
    timeout_threshold: u32,
    last_packet_time: Option<Instant>,
    last_update_time: Option<Duration>,
}

impl LinkState {
    pub fn new(timeout_threshold: u32) -> Self {
        Self {
            status: LinkStatus::Offline,
            last_frame_count: None,
            missed_count: 0,
            timeout_threshold,
            last_packet_time: None,
            last_update_time: None,
        }
    }

    /// Classify a decoded packet and update the frame counter.
    ///
    /// A reset peer keeps the current link state and actuator commands.
    /// A repeated counter is only a duplicate while online; offline it
    /// reconnects like any other packet.
    pub fn on_frame(&mut self, packet: &ServoPacket, now: Instant) -> FrameVerdict {
        let count = packet.frame_count;

        let mut missed = 0;
        let mut peer_reset = false;
        if let Some(last) = self.last_frame_count {
            if count == last && self.status == LinkStatus::Online {
                warn!("Duplicate input frame {count}");
                return FrameVerdict::Duplicate;
            }
            if count < last {
                info!(
                    "Flight controller reset, frame counter went from {last} to {count}"
                );
                peer_reset = true;
            } else if count > last + 1 && self.status == LinkStatus::Online {
                missed = count - last - 1;
                warn!("Missed {missed} input frames");
            }
        }

        if let Some(prev) = self.last_packet_time {
            debug!(
                "Servo packet {count} after {:?}, reported rate {} Hz",
                now.saturating_duration_since(prev),
                packet.frame_rate
            );
        }

        let came_online = self.status == LinkStatus::Offline;
        if came_online {
            info!("Connected to flight controller");
        }

        self.status = LinkStatus::Online;
        self.last_frame_count = Some(count);
        self.last_packet_time = Some(now);
        self.missed_count = 0;

        FrameVerdict::Accepted {
            came_online,
            missed,
            peer_reset,
        }
    }

    /// Count a step without a usable packet.
    ///
    /// Misses only accumulate while online. Returns [`LinkEvent::Timeout`]
    /// on the step where the count first exceeds the threshold.
    pub fn on_miss(&mut self) -> Option<LinkEvent> {
        if self.status != LinkStatus::Online {
            return None;
        }

        self.missed_count += 1;
        if self.missed_count > self.timeout_threshold {
            warn!(
                "No servo packet for {} steps, disconnected from flight controller",
                self.missed_count
            );
            self.status = LinkStatus::Offline;
            self.missed_count = 0;
            return Some(LinkEvent::Timeout);
        }
        None
    }

    /// Record the simulation time of the last applied step
    pub fn mark_applied(&mut self, sim_time: Duration) {
        self.last_update_time = Some(sim_time);
    }

    /// How long to wait for the next packet
    pub fn poll_timeout(&self) -> Duration {
        match self.status {
            LinkStatus::Online => ONLINE_POLL_TIMEOUT,
            LinkStatus::Offline => OFFLINE_POLL_TIMEOUT,
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn is_online(&self) -> bool {
        self.status == LinkStatus::Online
    }

    pub fn last_frame_count(&self) -> Option<u32> {
        self.last_frame_count
    }

    pub fn missed_count(&self) -> u32 {
        self.missed_count
    }

    pub fn timeout_threshold(&self) -> u32 {
        self.timeout_threshold
    }

    pub fn last_update_time(&self) -> Option<Duration> {
        self.last_update_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(count: u32) -> ServoPacket {
        ServoPacket::new(400, count, [1500; 16])
    }

    #[test]
    fn starts_offline_and_ignores_misses() {
        let mut link = LinkState::new(10);
        assert_eq!(link.status(), LinkStatus::Offline);
        assert_eq!(link.poll_timeout(), OFFLINE_POLL_TIMEOUT);
        for _ in 0..100 {
            assert_eq!(link.on_miss(), None);
        }
        assert_eq!(link.missed_count(), 0);
    }

    #[test]
    fn first_frame_brings_link_online() {
        let mut link = LinkState::new(10);
        let verdict = link.on_frame(&frame(1234), Instant::now());
        assert_eq!(
            verdict,
            FrameVerdict::Accepted {
                came_online: true,
                missed: 0,
                peer_reset: false
            }
        );
        assert!(link.is_online());
        assert_eq!(link.poll_timeout(), ONLINE_POLL_TIMEOUT);
        assert_eq!(link.last_frame_count(), Some(1234));
    }

    #[test]
    fn times_out_once_after_threshold() {
        let mut link = LinkState::new(10);
        link.on_frame(&frame(1), Instant::now());

        let events: Vec<Option<LinkEvent>> = (0..11).map(|_| link.on_miss()).collect();
        assert!(events[..10].iter().all(Option::is_none));
        assert_eq!(events[10], Some(LinkEvent::Timeout));
        assert_eq!(link.status(), LinkStatus::Offline);
        assert_eq!(link.missed_count(), 0);

        // No further transitions while offline
        assert_eq!(link.on_miss(), None);
    }

    #[test]
    fn frame_resets_miss_count() {
        let mut link = LinkState::new(3);
        link.on_frame(&frame(1), Instant::now());
        for _ in 0..3 {
            assert_eq!(link.on_miss(), None);
        }
        link.on_frame(&frame(2), Instant::now());
        assert_eq!(link.missed_count(), 0);
        for _ in 0..3 {
            assert_eq!(link.on_miss(), None);
        }
        assert_eq!(link.on_miss(), Some(LinkEvent::Timeout));
    }

    #[test]
    fn duplicate_then_skip() {
        let mut link = LinkState::new(10);
        let now = Instant::now();
        let verdicts: Vec<FrameVerdict> = [5, 5, 6, 8]
            .into_iter()
            .map(|c| link.on_frame(&frame(c), now))
            .collect();

        assert!(matches!(verdicts[0], FrameVerdict::Accepted { came_online: true, .. }));
        assert_eq!(verdicts[1], FrameVerdict::Duplicate);
        assert_eq!(
            verdicts[2],
            FrameVerdict::Accepted {
                came_online: false,
                missed: 0,
                peer_reset: false
            }
        );
        assert_eq!(
            verdicts[3],
            FrameVerdict::Accepted {
                came_online: false,
                missed: 1,
                peer_reset: false
            }
        );
        assert_eq!(link.last_frame_count(), Some(8));
    }

    #[test]
    fn duplicate_leaves_state_alone() {
        let mut link = LinkState::new(2);
        let now = Instant::now();
        link.on_frame(&frame(7), now);
        link.on_miss();
        assert_eq!(link.on_frame(&frame(7), now), FrameVerdict::Duplicate);
        assert_eq!(link.missed_count(), 1);
        assert_eq!(link.last_frame_count(), Some(7));
        assert!(link.is_online());
    }

    #[test]
    fn equal_counter_after_timeout_comes_back_online() {
        let mut link = LinkState::new(2);
        let now = Instant::now();
        link.on_frame(&frame(7), now);
        assert_eq!(link.on_miss(), None);
        assert_eq!(link.on_miss(), None);
        assert_eq!(link.on_miss(), Some(LinkEvent::Timeout));
        assert!(!link.is_online());

        let verdict = link.on_frame(&frame(7), now);
        assert_eq!(
            verdict,
            FrameVerdict::Accepted {
                came_online: true,
                missed: 0,
                peer_reset: false
            }
        );
        assert!(link.is_online());
        assert_eq!(link.missed_count(), 0);

        // Online again, so the next repeat is a duplicate
        assert_eq!(link.on_frame(&frame(7), now), FrameVerdict::Duplicate);
    }

    #[test]
    fn counter_going_backwards_is_a_reset() {
        let mut link = LinkState::new(10);
        let now = Instant::now();
        link.on_frame(&frame(500), now);
        let verdict = link.on_frame(&frame(3), now);
        assert_eq!(
            verdict,
            FrameVerdict::Accepted {
                came_online: false,
                missed: 0,
                peer_reset: true
            }
        );
        assert!(link.is_online());
        assert_eq!(link.last_frame_count(), Some(3));
    }

    #[test]
    fn skip_while_offline_is_not_reported() {
        let mut link = LinkState::new(0);
        let now = Instant::now();
        link.on_frame(&frame(1), now);
        assert_eq!(link.on_miss(), Some(LinkEvent::Timeout));
        let verdict = link.on_frame(&frame(50), now);
        assert_eq!(
            verdict,
            FrameVerdict::Accepted {
                came_online: true,
                missed: 0,
                peer_reset: false
            }
        );
    }
}
