//! Accessors the bridge needs from the host simulator.

use std::time::Duration;

use nalgebra::{Isometry3, Vector3};

/// Simulator state and joint actuation, as seen by the bridge.
///
/// `Joint` is a handle into the host's object graph, such as an entity id or an
/// index. The session keeps the handles it was given at construction and only ever
/// hands them back to these methods; it never owns, dereferences or destroys
/// the host objects behind them.
pub trait FdmHost {
    type Joint;

    /// Simulation time since the start of the run
    fn sim_time(&self) -> Duration;

    /// IMU angular velocity in the body frame, rad/s
    fn angular_velocity(&self) -> Vector3<f64>;

    /// IMU linear acceleration in the body frame, m/s^2
    fn linear_acceleration(&self) -> Vector3<f64>;

    /// Pose of the model in the simulator's world frame
    fn world_pose(&self) -> Isometry3<f64>;

    /// Linear velocity of the model in the simulator's world frame, m/s
    fn world_linear_velocity(&self) -> Vector3<f64>;

    fn joint_position(&self, joint: &Self::Joint) -> f64;

    fn joint_velocity(&self, joint: &Self::Joint) -> f64;

    fn set_joint_force(&mut self, joint: &Self::Joint, force: f64);

    fn set_joint_velocity(&mut self, joint: &Self::Joint, velocity: f64);

    fn set_joint_position(&mut self, joint: &Self::Joint, position: f64);
}
