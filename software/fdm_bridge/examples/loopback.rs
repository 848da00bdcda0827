//! Drive a toy quadcopter host against a scripted flight controller over UDP.
//!
//! The flight controller thread sends a throttle ramp and prints the altitude
//! it sees in the state replies.

use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::Duration;

use nalgebra::{Isometry3, Vector3};

use fdm_bridge::config::{ControlConfig, RangeSensorConfig};
use fdm_bridge::control::ControlMode;
use fdm_bridge::logging::init_logging;
use fdm_bridge::transport::UdpTransport;
use fdm_bridge::{BridgeConfig, FdmHost, ServoPacket, Session};

const DT: Duration = Duration::from_millis(4);

/// Point mass lifted by four rotors
#[derive(Default)]
struct Quad {
    time: Duration,
    z: f64,
    vz: f64,
    az: f64,
    rotor_speed: [f64; 4],
}

impl Quad {
    fn step(&mut self) {
        let thrust: f64 = self.rotor_speed.iter().map(|w| 2e-5 * w * w).sum();
        self.az = thrust - 9.81;
        if self.z <= 0.0 && self.az < 0.0 {
            self.az = 0.0;
            self.vz = 0.0;
        }
        let dt = DT.as_secs_f64();
        self.vz += self.az * dt;
        self.z = (self.z + self.vz * dt).max(0.0);
        self.time += DT;
    }
}

impl FdmHost for Quad {
    type Joint = usize;

    fn sim_time(&self) -> Duration {
        self.time
    }

    fn angular_velocity(&self) -> Vector3<f64> {
        Vector3::zeros()
    }

    fn linear_acceleration(&self) -> Vector3<f64> {
        Vector3::new(0.0, 0.0, self.az)
    }

    fn world_pose(&self) -> Isometry3<f64> {
        Isometry3::translation(0.0, 0.0, self.z)
    }

    fn world_linear_velocity(&self) -> Vector3<f64> {
        Vector3::new(0.0, 0.0, self.vz)
    }

    fn joint_position(&self, _joint: &usize) -> f64 {
        0.0
    }

    fn joint_velocity(&self, joint: &usize) -> f64 {
        self.rotor_speed[*joint]
    }

    fn set_joint_force(&mut self, joint: &usize, force: f64) {
        // Rotor inertia folded into the force scale
        self.rotor_speed[*joint] += force * 50.0;
    }

    fn set_joint_velocity(&mut self, joint: &usize, velocity: f64) {
        self.rotor_speed[*joint] = velocity;
    }

    fn set_joint_position(&mut self, _joint: &usize, _position: f64) {}
}

fn flight_controller(fdm: SocketAddr, frames: u32) {
    let sock = UdpSocket::bind("127.0.0.1:0").expect("bind flight controller socket");
    sock.set_read_timeout(Some(Duration::from_millis(50)))
        .expect("set read timeout");
    let mut buf = [0_u8; 2048];

    for frame in 0..frames {
        let throttle = 1000 + (frame * 2).min(700) as u16;
        let pwm = core::array::from_fn(|i| if i < 4 { throttle } else { 1000 });
        let packet = ServoPacket::new(250, frame, pwm);
        sock.send_to(&packet.encode(), fdm).expect("send servo packet");

        if let Ok((n, _)) = sock.recv_from(&mut buf) {
            let text = String::from_utf8_lossy(&buf[..n]);
            if frame % 100 == 0 {
                if let Ok(state) = serde_json::from_str::<serde_json::Value>(text.trim()) {
                    println!(
                        "frame {frame}: throttle {throttle}, down {:.3} m, rng_1 {:.3} m",
                        state["position"][2].as_f64().unwrap_or_default(),
                        state["rng_1"].as_f64().unwrap_or_default()
                    );
                }
            }
        }
        thread::sleep(DT);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let controls = (0..4)
        .map(|i| ControlConfig {
            channel: Some(i),
            mode: ControlMode::Velocity,
            joint_name: format!("rotor_{i}_joint"),
            multiplier: Some(838.0),
            ..Default::default()
        })
        .collect();

    let config = BridgeConfig {
        name: "loopback_quad".into(),
        transport: Box::new(UdpTransport::new("127.0.0.1", 0)),
        controls,
        range_sensors: vec![RangeSensorConfig {
            index: 1,
            topic: "sonar_down".into(),
        }],
        ..Default::default()
    };

    let log_path = init_logging(&std::env::temp_dir().join("fdm_bridge"), &config)?;
    println!("Logging to {}", log_path.display());

    let session = Session::new(config, |name| {
        name.strip_prefix("rotor_")
            .and_then(|s| s.strip_suffix("_joint"))
            .and_then(|i| i.parse::<usize>().ok())
    })?;
    let fdm = session.local_addr().ok_or("transport has no local address")?;

    let frames = 1000;
    let autopilot = thread::spawn(move || flight_controller(fdm, frames));

    let sonar = session.range_sink();
    let mut quad = Quad::default();
    for _ in 0..frames + 50 {
        quad.step();
        sonar.update(0, quad.z)?;
        session.tick(&mut quad);
    }

    autopilot.join().map_err(|_| "flight controller thread panicked")?;
    session.shutdown();
    Ok(())
}
