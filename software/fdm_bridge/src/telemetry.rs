//! Building the state frame sent back to the flight controller.

use nalgebra::{Isometry3, Vector3};

use fdm_bridge_shared::{FdmState, Imu};

use crate::config::BridgeConfig;
use crate::host::FdmHost;

/// Fixed frames between the simulator and the flight controller's NED convention
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoordinateTransforms {
    /// Model frame to body frame (x forward, z down)
    pub model_to_body: Isometry3<f64>,

    /// World frame to north-east-down
    pub world_to_ned: Isometry3<f64>,
}

impl Default for CoordinateTransforms {
    /// Body frame equal to the model frame, and a z-up world
    fn default() -> Self {
        Self {
            model_to_body: Isometry3::identity(),
            world_to_ned: Isometry3::rotation(Vector3::x() * std::f64::consts::PI),
        }
    }
}

impl CoordinateTransforms {
    pub fn from_config(cfg: &BridgeConfig) -> Self {
        Self {
            model_to_body: cfg.model_xyz_to_airplane_x_forward_z_down.to_isometry(),
            world_to_ned: cfg.gazebo_xyz_to_ned.to_isometry(),
        }
    }

    /// Body pose expressed in NED
    pub fn ned_pose(&self, world_pose: &Isometry3<f64>) -> Isometry3<f64> {
        self.world_to_ned.inverse() * (world_pose * self.model_to_body)
    }

    /// World velocity rotated into NED
    pub fn ned_velocity(&self, world_velocity: &Vector3<f64>) -> Vector3<f64> {
        self.world_to_ned
            .rotation
            .inverse_transform_vector(world_velocity)
    }
}

/// Sample the host and assemble one state frame
pub fn assemble<H: FdmHost>(
    host: &H,
    transforms: &CoordinateTransforms,
    ranges: &[f64],
) -> FdmState {
    let pose = transforms.ned_pose(&host.world_pose());
    let velocity = transforms.ned_velocity(&host.world_linear_velocity());
    let q = pose.rotation;

    FdmState {
        timestamp: host.sim_time().as_secs_f64(),
        imu: Imu {
            gyro: host.angular_velocity().into(),
            accel_body: host.linear_acceleration().into(),
        },
        position: pose.translation.vector.into(),
        quaternion: [q.w, q.i, q.j, q.k],
        velocity: velocity.into(),
        ranges: ranges.to_vec(),
    }
}
