//! Integration tests for the arbor dynamics engine.

use approx::assert_relative_eq;
use arbor::{
    BallJoint, DVec, FreeJoint, RevoluteJoint, Simulator, Skeleton, SpatialTransform, Vec3,
    GRAVITY,
};

/// Single pendulum: revolute about Z at the origin, rod of mass 1 and length
/// 1 hanging along −Y, gravity along −Y.
fn make_pendulum() -> Skeleton {
    let mut skeleton = Skeleton::new("pendulum");
    skeleton.set_gravity(Vec3::new(0.0, -GRAVITY, 0.0));
    let index = skeleton.add_body(None, Box::new(RevoluteJoint::new(Vec3::z())), "rod");
    let body = skeleton.body_mut(index);
    body.set_mass(1.0);
    body.set_local_com(Vec3::new(0.0, -0.5, 0.0));
    body.set_moment_of_inertia(1.0 / 12.0, 1e-8, 1.0 / 12.0, 0.0, 0.0, 0.0);
    skeleton
}

/// Double pendulum with two identical links of length 1.
fn make_double_pendulum() -> Skeleton {
    let mut skeleton = Skeleton::new("double-pendulum");
    skeleton.set_gravity(Vec3::new(0.0, -GRAVITY, 0.0));

    let add_link = |skeleton: &mut Skeleton, parent: Option<usize>, name: &str| {
        let mut joint = RevoluteJoint::new(Vec3::z());
        if parent.is_some() {
            joint.set_transform_from_parent_body(SpatialTransform::from_translation(Vec3::new(
                0.0, -1.0, 0.0,
            )));
        }
        let index = skeleton.add_body(parent, Box::new(joint), name);
        let body = skeleton.body_mut(index);
        body.set_mass(1.0);
        body.set_local_com(Vec3::new(0.0, -0.5, 0.0));
        body.set_moment_of_inertia(1.0 / 12.0, 1e-8, 1.0 / 12.0, 0.0, 0.0, 0.0);
        index
    };

    let first = add_link(&mut skeleton, None, "link1");
    add_link(&mut skeleton, Some(first), "link2");
    skeleton
}

fn make_free_body(mass: f64) -> Skeleton {
    let mut skeleton = Skeleton::new("free-body");
    skeleton.set_gravity(Vec3::zeros());
    let index = skeleton.add_body(None, Box::new(FreeJoint::new()), "body");
    skeleton.body_mut(index).set_mass(mass);
    skeleton
        .body_mut(index)
        .set_moment_of_inertia(0.1, 0.1, 0.1, 0.0, 0.0, 0.0);
    skeleton
}

#[test]
fn single_pendulum_matches_closed_form() {
    let mut skeleton = make_pendulum();
    skeleton.set_positions(&DVec::from_column_slice(&[std::f64::consts::FRAC_PI_2]));
    skeleton.compute_forward_dynamics();

    // ddθ = −m·g·d·sinθ / I_joint with I_joint = I_com + m·d² = 1/3
    let expected = -(1.0 * GRAVITY * 0.5) / (1.0 / 3.0);
    let ddq = skeleton.body(0).joint().accelerations();
    assert_relative_eq!(ddq[0], expected, epsilon = 1e-6);
}

#[test]
fn hanging_pendulum_stays_at_rest() {
    let mut skeleton = make_double_pendulum();
    skeleton.compute_forward_dynamics();
    assert!(skeleton.body(0).joint().accelerations()[0].abs() < 1e-10);
    assert!(skeleton.body(1).joint().accelerations()[0].abs() < 1e-10);
}

#[test]
fn coriolis_vector_vanishes_at_rest() {
    let mut skeleton = make_double_pendulum();
    skeleton.set_positions(&DVec::from_column_slice(&[0.4, -0.7]));
    // zero velocity, zero external force
    let coriolis = skeleton.coriolis_force_vector();
    assert_relative_eq!(coriolis, DVec::zeros(2), epsilon = 1e-12);
}

#[test]
fn combined_vector_decomposes_into_coriolis_plus_gravity() {
    let mut skeleton = make_double_pendulum();
    skeleton.set_positions(&DVec::from_column_slice(&[0.9, -0.3]));
    skeleton.set_velocities(&DVec::from_column_slice(&[1.7, -2.1]));

    let combined = skeleton.combined_vector();
    let coriolis = skeleton.coriolis_force_vector();
    let gravity = skeleton.gravity_force_vector();
    assert_relative_eq!(combined, coriolis + gravity, epsilon = 1e-10);
}

#[test]
fn aba_rnea_round_trip_reproduces_torques() {
    let mut skeleton = make_double_pendulum();
    skeleton.set_positions(&DVec::from_column_slice(&[0.3, 0.2]));
    skeleton.set_velocities(&DVec::from_column_slice(&[0.1, -0.1]));
    let applied = DVec::from_column_slice(&[0.25, -0.4]);
    skeleton.set_forces(&applied);

    // Forward dynamics resolves accelerations; inverse dynamics on those
    // accelerations must hand back the applied torques.
    skeleton.compute_forward_dynamics();
    skeleton.compute_inverse_dynamics(false);
    let recovered = skeleton.forces();
    assert_relative_eq!(recovered, applied, epsilon = 1e-9);
}

#[test]
fn force_at_com_gives_pure_linear_acceleration() {
    let mut skeleton = make_free_body(2.0);
    skeleton.compute_forward_kinematics();

    let force = Vec3::new(4.0, -6.0, 2.0);
    let com = skeleton.body(0).world_com();
    skeleton.body_mut(0).add_ext_force(&force, &com, false, false);
    skeleton.compute_forward_dynamics();

    let ddq = skeleton.body(0).joint().accelerations();
    assert_relative_eq!(ddq[0], 0.0, epsilon = 1e-10);
    assert_relative_eq!(ddq[1], 0.0, epsilon = 1e-10);
    assert_relative_eq!(ddq[2], 0.0, epsilon = 1e-10);
    assert_relative_eq!(ddq[3], 2.0, epsilon = 1e-10);
    assert_relative_eq!(ddq[4], -3.0, epsilon = 1e-10);
    assert_relative_eq!(ddq[5], 1.0, epsilon = 1e-10);
}

#[test]
fn free_body_falls_at_g() {
    let mut skeleton = make_free_body(1.5);
    skeleton.set_gravity(Vec3::new(0.0, 0.0, -GRAVITY));
    skeleton.compute_forward_dynamics();

    let ddq = skeleton.body(0).joint().accelerations();
    for k in 0..5 {
        assert_relative_eq!(ddq[k], 0.0, epsilon = 1e-10);
    }
    assert_relative_eq!(ddq[5], -GRAVITY, epsilon = 1e-10);
}

#[test]
fn free_body_mass_matrix_is_its_spatial_inertia() {
    let mut skeleton = make_free_body(3.0);
    let m = skeleton.mass_matrix();
    let inertia = skeleton.body(0).spatial_inertia().data;
    for i in 0..6 {
        for j in 0..6 {
            assert_relative_eq!(m[(i, j)], inertia[(i, j)], epsilon = 1e-10);
        }
    }
}

#[test]
fn ball_joint_pendulum_is_in_equilibrium_below_pivot() {
    let mut skeleton = Skeleton::new("spherical-pendulum");
    skeleton.set_gravity(Vec3::new(0.0, 0.0, -GRAVITY));
    let index = skeleton.add_body(None, Box::new(BallJoint::new()), "bob");
    skeleton.body_mut(index).set_mass(1.0);
    skeleton
        .body_mut(index)
        .set_local_com(Vec3::new(0.0, 0.0, -0.5));
    skeleton
        .body_mut(index)
        .set_moment_of_inertia(0.02, 0.02, 0.02, 0.0, 0.0, 0.0);

    skeleton.compute_forward_dynamics();
    let ddq = skeleton.body(index).joint().accelerations();
    assert_relative_eq!(ddq.norm(), 0.0, epsilon = 1e-10);
}

#[test]
fn pendulum_energy_is_conserved_over_a_swing() {
    let mut skeleton = make_pendulum();
    skeleton.set_time_step(1e-4);
    skeleton.set_positions(&DVec::from_column_slice(&[0.5]));

    let energy = |skeleton: &mut Skeleton| {
        skeleton.compute_forward_kinematics();
        let gravity = skeleton.gravity();
        let com = skeleton.body(0).world_com();
        let potential = -skeleton.body(0).mass() * gravity.dot(&com);
        skeleton.kinetic_energy() + potential
    };

    let initial = energy(&mut skeleton);
    let simulator = Simulator::new();
    simulator.simulate(&mut skeleton, 5_000);
    let after = energy(&mut skeleton);

    assert!(
        (after - initial).abs() < 0.05,
        "energy drifted from {initial} to {after}"
    );
}
