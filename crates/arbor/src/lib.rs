//! arbor — articulated rigid-body dynamics.
//!
//! Umbrella crate: re-exports the math and dynamics sub-crates and provides a
//! minimal stepping loop over the forward-dynamics pass.

pub use arbor_dynamics::{
    self, BallJoint, Body, DynamicsError, FixedJoint, FreeJoint, InverseKinematicsPolicy, Joint,
    Marker, PrismaticJoint, RevoluteJoint, Shape, Skeleton,
};
pub use arbor_math::{
    self, DMat, DVec, Jacobian, Mat3, Mat6, SpatialMat, SpatialTransform, SpatialVec, Vec3, Vec6,
    GRAVITY,
};

/// Pluggable stepping scheme.
///
/// Implementations define how to advance a skeleton by one timestep.
pub trait Solver {
    /// Advance the skeleton's state by its timestep.
    fn step(&self, skeleton: &mut Skeleton);
}

/// Semi-implicit Euler: resolve forward dynamics, update velocities, then
/// let each joint integrate its own positions (rotational coordinates stay on
/// their manifold).
pub struct SemiImplicitEulerSolver;

impl Solver for SemiImplicitEulerSolver {
    fn step(&self, skeleton: &mut Skeleton) {
        let dt = skeleton.time_step();
        skeleton.compute_forward_dynamics();

        for i in 0..skeleton.num_bodies() {
            let joint = skeleton.body_mut(i).joint_mut();
            if joint.num_dofs() == 0 {
                continue;
            }
            let updated = joint.velocities() + joint.accelerations() * dt;
            joint.set_velocities(updated.as_slice());
            joint.integrate_positions(dt);
        }
    }
}

/// Main simulation driver.
pub struct Simulator {
    solver: Box<dyn Solver>,
}

impl Simulator {
    /// Create a simulator with the default semi-implicit Euler solver.
    pub fn new() -> Self {
        Self {
            solver: Box::new(SemiImplicitEulerSolver),
        }
    }

    /// Create a simulator with a custom solver.
    pub fn with_solver(solver: Box<dyn Solver>) -> Self {
        Self { solver }
    }

    /// Advance the skeleton by one timestep.
    pub fn step(&self, skeleton: &mut Skeleton) {
        self.solver.step(skeleton);
    }

    /// Run the simulation for `n` steps.
    pub fn simulate(&self, skeleton: &mut Skeleton, n: usize) {
        for _ in 0..n {
            self.step(skeleton);
        }
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}
