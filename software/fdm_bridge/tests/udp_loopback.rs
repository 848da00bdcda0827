//! Session driven over real loopback UDP by a scripted flight controller.

use std::net::UdpSocket;
use std::time::Duration;

use nalgebra::{Isometry3, Vector3};
use serde_json::Value;

use fdm_bridge::config::ControlConfig;
use fdm_bridge::control::ControlMode;
use fdm_bridge::transport::UdpTransport;
use fdm_bridge::{BridgeConfig, FdmHost, ServoPacket, Session, TickReport};

#[derive(Default)]
struct Rig {
    time: Duration,
    velocity: [f64; 2],
}

impl FdmHost for Rig {
    type Joint = usize;

    fn sim_time(&self) -> Duration {
        self.time
    }
    fn angular_velocity(&self) -> Vector3<f64> {
        Vector3::new(0.0, 0.0, 0.5)
    }
    fn linear_acceleration(&self) -> Vector3<f64> {
        Vector3::new(0.0, 0.0, -9.81)
    }
    fn world_pose(&self) -> Isometry3<f64> {
        Isometry3::identity()
    }
    fn world_linear_velocity(&self) -> Vector3<f64> {
        Vector3::zeros()
    }
    fn joint_position(&self, _: &usize) -> f64 {
        0.0
    }
    fn joint_velocity(&self, joint: &usize) -> f64 {
        self.velocity[*joint]
    }
    fn set_joint_force(&mut self, _: &usize, _: f64) {}
    fn set_joint_velocity(&mut self, joint: &usize, velocity: f64) {
        self.velocity[*joint] = velocity;
    }
    fn set_joint_position(&mut self, _: &usize, _: f64) {}
}

fn session() -> Session<usize> {
    let config = BridgeConfig {
        name: "udp_loopback".into(),
        transport: Box::new(UdpTransport::new("127.0.0.1", 0)),
        connection_timeout_max_count: 3,
        controls: (0..2)
            .map(|i| ControlConfig {
                channel: Some(i),
                mode: ControlMode::Velocity,
                use_force: false,
                joint_name: format!("wheel_{i}"),
                multiplier: Some(10.0),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    };
    Session::new(config, |name| name.strip_prefix("wheel_")?.parse().ok()).unwrap()
}

fn autopilot() -> UdpSocket {
    let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
    sock.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
    sock
}

#[test]
fn exchanges_servo_packets_and_state() {
    let session = session();
    let fdm = session.local_addr().unwrap();
    let sock = autopilot();
    let mut rig = Rig::default();
    let mut buf = [0_u8; 2048];

    let mut pwm = [1000_u16; 16];
    pwm[0] = 1500;
    pwm[1] = 2000;
    sock.send_to(&ServoPacket::new(400, 1, pwm).encode(), fdm).unwrap();

    // Loopback delivery can lag the first poll
    let mut report = TickReport::default();
    for _ in 0..50 {
        rig.time += Duration::from_millis(2);
        report = session.tick(&mut rig);
        if report.online {
            break;
        }
    }
    assert!(report.came_online && report.sent, "{report:?}");
    assert_eq!(rig.velocity, [5.0, 10.0]);

    let (n, _) = sock.recv_from(&mut buf).unwrap();
    let text = std::str::from_utf8(&buf[..n]).unwrap();
    assert!(text.starts_with('\n') && text.ends_with('\n'));
    let state: Value = serde_json::from_str(text.trim()).unwrap();
    for key in ["timestamp", "imu", "position", "quaternion", "velocity"] {
        assert!(state.get(key).is_some(), "missing {key}");
    }
    assert_eq!(state["imu"]["gyro"], serde_json::json!([0.0, 0.0, 0.5]));
    assert!(state.get("rng_1").is_none());
}

#[test]
fn goes_offline_when_packets_stop() {
    let session = session();
    let fdm = session.local_addr().unwrap();
    let sock = autopilot();
    let mut rig = Rig::default();

    sock.send_to(&ServoPacket::new(400, 1, [2000; 16]).encode(), fdm)
        .unwrap();
    let mut online_at = None;
    for step in 0..50 {
        rig.time += Duration::from_millis(2);
        if session.tick(&mut rig).online {
            online_at = Some(step);
            break;
        }
    }
    assert!(online_at.is_some());

    let mut timeouts = 0;
    for _ in 0..10 {
        rig.time += Duration::from_millis(2);
        if session.tick(&mut rig).timed_out {
            timeouts += 1;
        }
    }
    assert_eq!(timeouts, 1);
    assert!(!session.is_online());
    assert_eq!(session.commands(), vec![0.0, 0.0]);
}

#[test]
fn rejects_garbage_without_coming_online() {
    let session = session();
    let fdm = session.local_addr().unwrap();
    let sock = autopilot();
    let mut rig = Rig::default();

    sock.send_to(b"definitely not a servo packet", fdm).unwrap();
    let mut rejected = None;
    for _ in 0..50 {
        rig.time += Duration::from_millis(2);
        let report = session.tick(&mut rig);
        if report.received {
            rejected = report.rejected;
            break;
        }
    }
    assert!(rejected.is_some());
    assert!(!session.is_online());
}
