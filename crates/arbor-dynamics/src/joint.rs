//! Joints connecting a body to its parent.
//!
//! Each joint kind (fixed, revolute, prismatic, ball, free) supplies its own
//! local pose and motion subspace; the recursion rules the dynamics passes
//! need (articulated-inertia projection, bias-force reduction, generalized
//! acceleration/velocity-change solves) are shared by every kind and operate
//! on the motion subspace alone, so a body never inspects what kind of joint
//! it owns.
//!
//! Multi-DOF joints store orientation as exponential coordinates and use the
//! body-frame twist as their velocity coordinates; their motion subspace is
//! constant in the child frame, so the local-Jacobian time derivative is zero
//! for every kind provided here. The derivative surface stays on the trait
//! for joint kinds with configuration-dependent subspaces.

use arbor_math::{DMat, DVec, Jacobian, SpatialMat, SpatialTransform, SpatialVec, Vec3, Vec6};
use nalgebra::{Rotation3, SMatrix, SVector};

/// Behavior that distinguishes one joint kind from another: how generalized
/// coordinates produce a pose, which twist directions the joint actuates, and
/// how coordinates advance in time (manifold-aware for rotations).
pub trait JointKind<const N: usize>: std::fmt::Debug + Send + Sync + 'static {
    /// Pose of the outgoing joint frame produced by the coordinates `q`.
    fn joint_pose(&self, q: &SVector<f64, N>) -> SpatialTransform;

    /// Motion subspace in the joint frame (columns are unit twists).
    fn motion_subspace(&self) -> SMatrix<f64, 6, N>;

    /// Time derivative of the motion subspace in the joint frame.
    fn motion_subspace_time_deriv(&self) -> SMatrix<f64, 6, N> {
        SMatrix::zeros()
    }

    /// Advance `q` by the velocity coordinates over `dt`.
    fn integrate_positions(&self, q: &mut SVector<f64, N>, dq: &SVector<f64, N>, dt: f64) {
        *q += dq * dt;
    }
}

/// Operations a [`crate::Body`] invokes on its joint during the recursive
/// passes, plus generalized-coordinate state and passive-element parameters.
///
/// One implementation per joint kind; bodies only ever see this interface.
pub trait Joint: std::fmt::Debug {
    // ── bookkeeping ──
    fn num_dofs(&self) -> usize;
    /// Index of this joint's first generalized coordinate in the skeleton's
    /// flattened coordinate space.
    fn index_in_skeleton(&self) -> usize;
    fn set_index_in_skeleton(&mut self, index: usize);

    // ── generalized-coordinate state ──
    fn positions(&self) -> DVec;
    fn set_positions(&mut self, q: &[f64]);
    fn velocities(&self) -> DVec;
    fn set_velocities(&mut self, dq: &[f64]);
    fn accelerations(&self) -> DVec;
    fn set_accelerations(&mut self, ddq: &[f64]);
    fn forces(&self) -> DVec;
    fn set_forces(&mut self, tau: &[f64]);
    fn velocity_changes(&self) -> DVec;
    fn constraint_impulses(&self) -> DVec;
    fn set_constraint_impulses(&mut self, impulses: &[f64]);

    // ── bounds and passive elements ──
    fn position_lower_limits(&self) -> DVec;
    fn position_upper_limits(&self) -> DVec;
    fn set_position_limits(&mut self, lower: &[f64], upper: &[f64]);
    fn velocity_lower_limits(&self) -> DVec;
    fn velocity_upper_limits(&self) -> DVec;
    fn set_velocity_limits(&mut self, lower: &[f64], upper: &[f64]);
    fn spring_stiffness(&self, index: usize) -> f64;
    fn set_spring_stiffness(&mut self, index: usize, stiffness: f64);
    fn rest_position(&self, index: usize) -> f64;
    fn set_rest_position(&mut self, index: usize, rest: f64);
    fn damping_coefficient(&self, index: usize) -> f64;
    fn set_damping_coefficient(&mut self, index: usize, damping: f64);

    // ── local geometry ──
    fn update_local_transform(&mut self);
    fn update_local_jacobian(&mut self);
    fn update_local_jacobian_time_deriv(&mut self);
    fn local_transform(&self) -> &SpatialTransform;
    fn local_jacobian(&self) -> Jacobian;
    fn local_jacobian_time_deriv(&self) -> Jacobian;

    // ── kinematic propagation hooks ──
    fn add_velocity_to(&self, velocity: &mut SpatialVec);
    fn set_partial_acceleration_to(&self, partial_acc: &mut SpatialVec, velocity: &SpatialVec);
    fn add_acceleration_to(&self, acceleration: &mut SpatialVec);
    fn add_velocity_change_to(&self, velocity_change: &mut SpatialVec);

    // ── articulated-body forward dynamics hooks ──
    fn add_child_art_inertia_to(&self, parent_art: &mut SpatialMat, child_art: &SpatialMat);
    fn add_child_art_inertia_implicit_to(
        &self,
        parent_art: &mut SpatialMat,
        child_art: &SpatialMat,
    );
    fn update_inv_proj_art_inertia(&mut self, art_inertia: &SpatialMat);
    fn update_inv_proj_art_inertia_implicit(&mut self, art_inertia: &SpatialMat, time_step: f64);
    fn add_child_bias_force_to(
        &self,
        parent_bias: &mut SpatialVec,
        child_art_implicit: &SpatialMat,
        child_bias: &SpatialVec,
        child_partial_acc: &SpatialVec,
    );
    fn add_child_bias_impulse_to(
        &self,
        parent_bias: &mut SpatialVec,
        child_art: &SpatialMat,
        child_bias: &SpatialVec,
    );
    fn update_total_force(&mut self, body_force: &SpatialVec, time_step: f64);
    fn update_total_impulse(&mut self, body_impulse: &SpatialVec);
    fn update_acceleration(&mut self, art_implicit: &SpatialMat, parent_acc: &SpatialVec);
    fn update_velocity_change(&mut self, art_inertia: &SpatialMat, parent_vel_change: &SpatialVec);
    fn update_velocity_with_velocity_change(&mut self);
    fn update_acceleration_with_velocity_change(&mut self, time_step: f64);
    fn update_force_with_impulse(&mut self, time_step: f64);
    fn clear_constraint_impulse(&mut self);

    // ── inverse-mass-matrix hooks ──
    fn add_child_bias_force_for_inv_mass_matrix(
        &self,
        parent_bias: &mut SpatialVec,
        child_art: &SpatialMat,
        child_bias: &SpatialVec,
    );
    fn add_child_bias_force_for_inv_aug_mass_matrix(
        &self,
        parent_bias: &mut SpatialVec,
        child_art_implicit: &SpatialMat,
        child_bias: &SpatialVec,
    );
    fn update_total_force_for_inv_mass_matrix(&mut self, body_force: &SpatialVec);
    fn inv_mass_matrix_segment(
        &mut self,
        out: &mut DMat,
        col: usize,
        art_inertia: &SpatialMat,
        parent_vel_change: &SpatialVec,
    );
    fn inv_aug_mass_matrix_segment(
        &mut self,
        out: &mut DMat,
        col: usize,
        art_implicit: &SpatialMat,
        parent_vel_change: &SpatialVec,
    );
    fn add_inv_mass_matrix_segment_to(&self, acc: &mut SpatialVec);

    // ── transmitted wrench ──
    fn set_wrench(&mut self, wrench: SpatialVec);
    fn wrench(&self) -> SpatialVec;

    // ── integration support ──
    fn integrate_positions(&mut self, dt: f64);
}

/// Shared joint state and recursion math, parameterized by a [`JointKind`].
#[derive(Debug, Clone)]
pub struct GenericJoint<K: JointKind<N>, const N: usize> {
    kind: K,
    /// Pose of the joint frame in the parent body's frame.
    transform_from_parent: SpatialTransform,
    /// Pose of the joint frame in the child body's frame.
    transform_from_child: SpatialTransform,
    index_in_skeleton: usize,

    positions: SVector<f64, N>,
    velocities: SVector<f64, N>,
    accelerations: SVector<f64, N>,
    forces: SVector<f64, N>,
    velocity_changes: SVector<f64, N>,
    constraint_impulses: SVector<f64, N>,
    total_force: SVector<f64, N>,
    total_impulse: SVector<f64, N>,
    inv_mass_bias_force: SVector<f64, N>,
    inv_mass_segment: SVector<f64, N>,

    spring_stiffness: SVector<f64, N>,
    rest_positions: SVector<f64, N>,
    damping: SVector<f64, N>,
    position_lower: SVector<f64, N>,
    position_upper: SVector<f64, N>,
    velocity_lower: SVector<f64, N>,
    velocity_upper: SVector<f64, N>,

    local_transform: SpatialTransform,
    jacobian: SMatrix<f64, 6, N>,
    jacobian_dot: SMatrix<f64, 6, N>,
    /// Ψ = (Sᵀ A S)⁻¹, the inverse projected articulated inertia.
    inv_proj_art_inertia: SMatrix<f64, N, N>,
    /// Ψ for the damping/stiffness-augmented articulated inertia.
    inv_proj_art_inertia_implicit: SMatrix<f64, N, N>,
    wrench: SpatialVec,
}

impl<K: JointKind<N>, const N: usize> GenericJoint<K, N> {
    fn from_kind(kind: K) -> Self {
        let mut joint = Self {
            kind,
            transform_from_parent: SpatialTransform::identity(),
            transform_from_child: SpatialTransform::identity(),
            index_in_skeleton: 0,
            positions: SVector::zeros(),
            velocities: SVector::zeros(),
            accelerations: SVector::zeros(),
            forces: SVector::zeros(),
            velocity_changes: SVector::zeros(),
            constraint_impulses: SVector::zeros(),
            total_force: SVector::zeros(),
            total_impulse: SVector::zeros(),
            inv_mass_bias_force: SVector::zeros(),
            inv_mass_segment: SVector::zeros(),
            spring_stiffness: SVector::zeros(),
            rest_positions: SVector::zeros(),
            damping: SVector::zeros(),
            position_lower: SVector::repeat(f64::NEG_INFINITY),
            position_upper: SVector::repeat(f64::INFINITY),
            velocity_lower: SVector::repeat(f64::NEG_INFINITY),
            velocity_upper: SVector::repeat(f64::INFINITY),
            local_transform: SpatialTransform::identity(),
            jacobian: SMatrix::zeros(),
            jacobian_dot: SMatrix::zeros(),
            inv_proj_art_inertia: SMatrix::zeros(),
            inv_proj_art_inertia_implicit: SMatrix::zeros(),
            wrench: SpatialVec::zero(),
        };
        joint.update_local_transform();
        joint.update_local_jacobian();
        joint
    }

    /// Pose of the joint frame in the parent body's frame.
    pub fn transform_from_parent_body(&self) -> &SpatialTransform {
        &self.transform_from_parent
    }

    pub fn set_transform_from_parent_body(&mut self, transform: SpatialTransform) {
        self.transform_from_parent = transform;
        self.update_local_transform();
        self.update_local_jacobian();
    }

    /// Pose of the joint frame in the child body's frame.
    pub fn transform_from_child_body(&self) -> &SpatialTransform {
        &self.transform_from_child
    }

    pub fn set_transform_from_child_body(&mut self, transform: SpatialTransform) {
        self.transform_from_child = transform;
        self.update_local_transform();
        self.update_local_jacobian();
    }

    #[inline]
    fn project(&self, v: &Vec6) -> SVector<f64, N> {
        self.jacobian.transpose() * v
    }
}

impl<K: JointKind<N>, const N: usize> Joint for GenericJoint<K, N> {
    fn num_dofs(&self) -> usize {
        N
    }

    fn index_in_skeleton(&self) -> usize {
        self.index_in_skeleton
    }

    fn set_index_in_skeleton(&mut self, index: usize) {
        self.index_in_skeleton = index;
    }

    fn positions(&self) -> DVec {
        DVec::from_row_slice(self.positions.as_slice())
    }

    fn set_positions(&mut self, q: &[f64]) {
        assert_eq!(q.len(), N, "position slice length must match joint DOF");
        self.positions.copy_from_slice(q);
    }

    fn velocities(&self) -> DVec {
        DVec::from_row_slice(self.velocities.as_slice())
    }

    fn set_velocities(&mut self, dq: &[f64]) {
        assert_eq!(dq.len(), N, "velocity slice length must match joint DOF");
        self.velocities.copy_from_slice(dq);
    }

    fn accelerations(&self) -> DVec {
        DVec::from_row_slice(self.accelerations.as_slice())
    }

    fn set_accelerations(&mut self, ddq: &[f64]) {
        assert_eq!(ddq.len(), N, "acceleration slice length must match joint DOF");
        self.accelerations.copy_from_slice(ddq);
    }

    fn forces(&self) -> DVec {
        DVec::from_row_slice(self.forces.as_slice())
    }

    fn set_forces(&mut self, tau: &[f64]) {
        assert_eq!(tau.len(), N, "force slice length must match joint DOF");
        self.forces.copy_from_slice(tau);
    }

    fn velocity_changes(&self) -> DVec {
        DVec::from_row_slice(self.velocity_changes.as_slice())
    }

    fn constraint_impulses(&self) -> DVec {
        DVec::from_row_slice(self.constraint_impulses.as_slice())
    }

    fn set_constraint_impulses(&mut self, impulses: &[f64]) {
        assert_eq!(impulses.len(), N, "impulse slice length must match joint DOF");
        self.constraint_impulses.copy_from_slice(impulses);
    }

    fn position_lower_limits(&self) -> DVec {
        DVec::from_row_slice(self.position_lower.as_slice())
    }

    fn position_upper_limits(&self) -> DVec {
        DVec::from_row_slice(self.position_upper.as_slice())
    }

    fn set_position_limits(&mut self, lower: &[f64], upper: &[f64]) {
        assert_eq!(lower.len(), N);
        assert_eq!(upper.len(), N);
        self.position_lower.copy_from_slice(lower);
        self.position_upper.copy_from_slice(upper);
    }

    fn velocity_lower_limits(&self) -> DVec {
        DVec::from_row_slice(self.velocity_lower.as_slice())
    }

    fn velocity_upper_limits(&self) -> DVec {
        DVec::from_row_slice(self.velocity_upper.as_slice())
    }

    fn set_velocity_limits(&mut self, lower: &[f64], upper: &[f64]) {
        assert_eq!(lower.len(), N);
        assert_eq!(upper.len(), N);
        self.velocity_lower.copy_from_slice(lower);
        self.velocity_upper.copy_from_slice(upper);
    }

    fn spring_stiffness(&self, index: usize) -> f64 {
        self.spring_stiffness[index]
    }

    fn set_spring_stiffness(&mut self, index: usize, stiffness: f64) {
        assert!(stiffness >= 0.0, "spring stiffness must be non-negative");
        self.spring_stiffness[index] = stiffness;
    }

    fn rest_position(&self, index: usize) -> f64 {
        self.rest_positions[index]
    }

    fn set_rest_position(&mut self, index: usize, rest: f64) {
        self.rest_positions[index] = rest;
    }

    fn damping_coefficient(&self, index: usize) -> f64 {
        self.damping[index]
    }

    fn set_damping_coefficient(&mut self, index: usize, damping: f64) {
        assert!(damping >= 0.0, "damping coefficient must be non-negative");
        self.damping[index] = damping;
    }

    fn update_local_transform(&mut self) {
        self.local_transform = self
            .transform_from_parent
            .compose(&self.kind.joint_pose(&self.positions))
            .compose(&self.transform_from_child.inverse());
    }

    fn update_local_jacobian(&mut self) {
        self.jacobian = self.transform_from_child.motion_matrix() * self.kind.motion_subspace();
    }

    fn update_local_jacobian_time_deriv(&mut self) {
        self.jacobian_dot =
            self.transform_from_child.motion_matrix() * self.kind.motion_subspace_time_deriv();
    }

    fn local_transform(&self) -> &SpatialTransform {
        &self.local_transform
    }

    fn local_jacobian(&self) -> Jacobian {
        Jacobian::from_fn(N, |i, j| self.jacobian[(i, j)])
    }

    fn local_jacobian_time_deriv(&self) -> Jacobian {
        Jacobian::from_fn(N, |i, j| self.jacobian_dot[(i, j)])
    }

    fn add_velocity_to(&self, velocity: &mut SpatialVec) {
        velocity.data += self.jacobian * self.velocities;
    }

    fn set_partial_acceleration_to(&self, partial_acc: &mut SpatialVec, velocity: &SpatialVec) {
        let joint_velocity = SpatialVec::from_vec6(self.jacobian * self.velocities);
        *partial_acc = velocity.cross_motion(&joint_velocity)
            + SpatialVec::from_vec6(self.jacobian_dot * self.velocities);
    }

    fn add_acceleration_to(&self, acceleration: &mut SpatialVec) {
        acceleration.data += self.jacobian * self.accelerations;
    }

    fn add_velocity_change_to(&self, velocity_change: &mut SpatialVec) {
        velocity_change.data += self.jacobian * self.velocity_changes;
    }

    fn add_child_art_inertia_to(&self, parent_art: &mut SpatialMat, child_art: &SpatialMat) {
        let ai_s = child_art.data * self.jacobian;
        let projected = child_art.data - ai_s * self.inv_proj_art_inertia * ai_s.transpose();
        parent_art.data += self.local_transform.transform_inertia(&projected);
    }

    fn add_child_art_inertia_implicit_to(
        &self,
        parent_art: &mut SpatialMat,
        child_art: &SpatialMat,
    ) {
        let ai_s = child_art.data * self.jacobian;
        let projected =
            child_art.data - ai_s * self.inv_proj_art_inertia_implicit * ai_s.transpose();
        parent_art.data += self.local_transform.transform_inertia(&projected);
    }

    fn update_inv_proj_art_inertia(&mut self, art_inertia: &SpatialMat) {
        if N == 0 {
            return;
        }
        let projected = self.jacobian.transpose() * art_inertia.data * self.jacobian;
        self.inv_proj_art_inertia = invert_projected(&projected);
    }

    fn update_inv_proj_art_inertia_implicit(&mut self, art_inertia: &SpatialMat, time_step: f64) {
        if N == 0 {
            return;
        }
        let mut projected = self.jacobian.transpose() * art_inertia.data * self.jacobian;
        projected += SMatrix::from_diagonal(&self.damping) * time_step;
        projected += SMatrix::from_diagonal(&self.spring_stiffness) * (time_step * time_step);
        self.inv_proj_art_inertia_implicit = invert_projected(&projected);
    }

    fn add_child_bias_force_to(
        &self,
        parent_bias: &mut SpatialVec,
        child_art_implicit: &SpatialMat,
        child_bias: &SpatialVec,
        child_partial_acc: &SpatialVec,
    ) {
        let coeff = self.inv_proj_art_inertia_implicit * self.total_force;
        let beta = *child_bias
            + SpatialVec::from_vec6(
                child_art_implicit.data * (child_partial_acc.data + self.jacobian * coeff),
            );
        *parent_bias += self.local_transform.apply_force(&beta);
    }

    fn add_child_bias_impulse_to(
        &self,
        parent_bias: &mut SpatialVec,
        child_art: &SpatialMat,
        child_bias: &SpatialVec,
    ) {
        let coeff = self.inv_proj_art_inertia * self.total_impulse;
        let beta =
            *child_bias + SpatialVec::from_vec6(child_art.data * (self.jacobian * coeff));
        *parent_bias += self.local_transform.apply_force(&beta);
    }

    fn update_total_force(&mut self, body_force: &SpatialVec, time_step: f64) {
        let next_positions = self.positions + self.velocities * time_step;
        let spring_force = -self
            .spring_stiffness
            .component_mul(&(next_positions - self.rest_positions));
        let damping_force = -self.damping.component_mul(&self.velocities);
        self.total_force =
            self.forces + spring_force + damping_force - self.project(&body_force.data);
    }

    fn update_total_impulse(&mut self, body_impulse: &SpatialVec) {
        self.total_impulse = self.constraint_impulses - self.project(&body_impulse.data);
    }

    fn update_acceleration(&mut self, art_implicit: &SpatialMat, parent_acc: &SpatialVec) {
        if N == 0 {
            return;
        }
        let transported = self.local_transform.inv_apply_motion(parent_acc);
        self.accelerations = self.inv_proj_art_inertia_implicit
            * (self.total_force - self.project(&(art_implicit.data * transported.data)));
    }

    fn update_velocity_change(
        &mut self,
        art_inertia: &SpatialMat,
        parent_vel_change: &SpatialVec,
    ) {
        if N == 0 {
            return;
        }
        let transported = self.local_transform.inv_apply_motion(parent_vel_change);
        self.velocity_changes = self.inv_proj_art_inertia
            * (self.total_impulse - self.project(&(art_inertia.data * transported.data)));
    }

    fn update_velocity_with_velocity_change(&mut self) {
        self.velocities += self.velocity_changes;
    }

    fn update_acceleration_with_velocity_change(&mut self, time_step: f64) {
        self.accelerations += self.velocity_changes / time_step;
    }

    fn update_force_with_impulse(&mut self, time_step: f64) {
        self.forces += self.constraint_impulses / time_step;
    }

    fn clear_constraint_impulse(&mut self) {
        self.constraint_impulses = SVector::zeros();
        self.velocity_changes = SVector::zeros();
        self.total_impulse = SVector::zeros();
    }

    fn add_child_bias_force_for_inv_mass_matrix(
        &self,
        parent_bias: &mut SpatialVec,
        child_art: &SpatialMat,
        child_bias: &SpatialVec,
    ) {
        let coeff = self.inv_proj_art_inertia * self.inv_mass_bias_force;
        let beta =
            *child_bias + SpatialVec::from_vec6(child_art.data * (self.jacobian * coeff));
        *parent_bias += self.local_transform.apply_force(&beta);
    }

    fn add_child_bias_force_for_inv_aug_mass_matrix(
        &self,
        parent_bias: &mut SpatialVec,
        child_art_implicit: &SpatialMat,
        child_bias: &SpatialVec,
    ) {
        let coeff = self.inv_proj_art_inertia_implicit * self.inv_mass_bias_force;
        let beta = *child_bias
            + SpatialVec::from_vec6(child_art_implicit.data * (self.jacobian * coeff));
        *parent_bias += self.local_transform.apply_force(&beta);
    }

    fn update_total_force_for_inv_mass_matrix(&mut self, body_force: &SpatialVec) {
        self.inv_mass_bias_force = self.forces - self.project(&body_force.data);
    }

    fn inv_mass_matrix_segment(
        &mut self,
        out: &mut DMat,
        col: usize,
        art_inertia: &SpatialMat,
        parent_vel_change: &SpatialVec,
    ) {
        if N == 0 {
            return;
        }
        let transported = self.local_transform.inv_apply_motion(parent_vel_change);
        let segment = self.inv_proj_art_inertia
            * (self.inv_mass_bias_force - self.project(&(art_inertia.data * transported.data)));
        self.inv_mass_segment = segment;
        for k in 0..N {
            out[(self.index_in_skeleton + k, col)] = segment[k];
        }
    }

    fn inv_aug_mass_matrix_segment(
        &mut self,
        out: &mut DMat,
        col: usize,
        art_implicit: &SpatialMat,
        parent_vel_change: &SpatialVec,
    ) {
        if N == 0 {
            return;
        }
        let transported = self.local_transform.inv_apply_motion(parent_vel_change);
        let segment = self.inv_proj_art_inertia_implicit
            * (self.inv_mass_bias_force - self.project(&(art_implicit.data * transported.data)));
        self.inv_mass_segment = segment;
        for k in 0..N {
            out[(self.index_in_skeleton + k, col)] = segment[k];
        }
    }

    fn add_inv_mass_matrix_segment_to(&self, acc: &mut SpatialVec) {
        acc.data += self.jacobian * self.inv_mass_segment;
    }

    fn set_wrench(&mut self, wrench: SpatialVec) {
        self.wrench = wrench;
    }

    fn wrench(&self) -> SpatialVec {
        self.wrench
    }

    fn integrate_positions(&mut self, dt: f64) {
        self.kind
            .integrate_positions(&mut self.positions, &self.velocities, dt);
    }
}

/// Invert the n×n projected articulated inertia Sᵀ·A·S. A singular
/// projection means a degenerate configuration, which is a caller error.
fn invert_projected<const N: usize>(projected: &SMatrix<f64, N, N>) -> SMatrix<f64, N, N> {
    let dynamic = DMat::from_fn(N, N, |i, j| projected[(i, j)]);
    let inverse = dynamic
        .try_inverse()
        .expect("projected articulated inertia must be invertible");
    SMatrix::from_fn(|i, j| inverse[(i, j)])
}

// ── joint kinds ──

/// Rigid attachment, no degrees of freedom.
#[derive(Debug, Clone)]
pub struct Fixed;

impl JointKind<0> for Fixed {
    fn joint_pose(&self, _q: &SVector<f64, 0>) -> SpatialTransform {
        SpatialTransform::identity()
    }

    fn motion_subspace(&self) -> SMatrix<f64, 6, 0> {
        SMatrix::zeros()
    }
}

/// Single rotational DOF about a fixed axis in the joint frame.
#[derive(Debug, Clone)]
pub struct Revolute {
    axis: Vec3,
}

impl JointKind<1> for Revolute {
    fn joint_pose(&self, q: &SVector<f64, 1>) -> SpatialTransform {
        SpatialTransform::from_rotation(*Rotation3::new(self.axis * q[0]).matrix())
    }

    fn motion_subspace(&self) -> SMatrix<f64, 6, 1> {
        SMatrix::<f64, 6, 1>::from_column_slice(&[
            self.axis.x,
            self.axis.y,
            self.axis.z,
            0.0,
            0.0,
            0.0,
        ])
    }
}

/// Single translational DOF along a fixed axis in the joint frame.
#[derive(Debug, Clone)]
pub struct Prismatic {
    axis: Vec3,
}

impl JointKind<1> for Prismatic {
    fn joint_pose(&self, q: &SVector<f64, 1>) -> SpatialTransform {
        SpatialTransform::from_translation(self.axis * q[0])
    }

    fn motion_subspace(&self) -> SMatrix<f64, 6, 1> {
        SMatrix::<f64, 6, 1>::from_column_slice(&[
            0.0,
            0.0,
            0.0,
            self.axis.x,
            self.axis.y,
            self.axis.z,
        ])
    }
}

/// Three rotational DOF. Positions are exponential coordinates; velocities
/// are the body-frame angular velocity.
#[derive(Debug, Clone)]
pub struct Ball;

impl JointKind<3> for Ball {
    fn joint_pose(&self, q: &SVector<f64, 3>) -> SpatialTransform {
        SpatialTransform::from_rotation(*Rotation3::new(Vec3::new(q[0], q[1], q[2])).matrix())
    }

    fn motion_subspace(&self) -> SMatrix<f64, 6, 3> {
        SMatrix::<f64, 6, 3>::from_fn(|i, j| if i == j { 1.0 } else { 0.0 })
    }

    fn integrate_positions(&self, q: &mut SVector<f64, 3>, dq: &SVector<f64, 3>, dt: f64) {
        let rot = Rotation3::new(Vec3::new(q[0], q[1], q[2]));
        let step = Rotation3::new(Vec3::new(dq[0], dq[1], dq[2]) * dt);
        let w = (rot * step).scaled_axis();
        q.copy_from_slice(&[w.x, w.y, w.z]);
    }
}

/// Six DOF. Positions are [rotation exponential coordinates; translation in
/// the parent joint frame]; velocities are the body-frame twist [ω; v].
#[derive(Debug, Clone)]
pub struct Free;

impl JointKind<6> for Free {
    fn joint_pose(&self, q: &SVector<f64, 6>) -> SpatialTransform {
        let rot = Rotation3::new(Vec3::new(q[0], q[1], q[2]));
        SpatialTransform::new(*rot.matrix(), Vec3::new(q[3], q[4], q[5]))
    }

    fn motion_subspace(&self) -> SMatrix<f64, 6, 6> {
        SMatrix::identity()
    }

    fn integrate_positions(&self, q: &mut SVector<f64, 6>, dq: &SVector<f64, 6>, dt: f64) {
        let rot = Rotation3::new(Vec3::new(q[0], q[1], q[2]));
        let step = Rotation3::new(Vec3::new(dq[0], dq[1], dq[2]) * dt);
        let w = (rot * step).scaled_axis();
        let p = Vec3::new(q[3], q[4], q[5]) + rot * (Vec3::new(dq[3], dq[4], dq[5]) * dt);
        q.copy_from_slice(&[w.x, w.y, w.z, p.x, p.y, p.z]);
    }
}

/// Rigid attachment joint.
pub type FixedJoint = GenericJoint<Fixed, 0>;
/// Revolute (hinge) joint.
pub type RevoluteJoint = GenericJoint<Revolute, 1>;
/// Prismatic (slider) joint.
pub type PrismaticJoint = GenericJoint<Prismatic, 1>;
/// Ball (spherical) joint.
pub type BallJoint = GenericJoint<Ball, 3>;
/// Free (floating) joint.
pub type FreeJoint = GenericJoint<Free, 6>;

impl FixedJoint {
    pub fn new() -> Self {
        GenericJoint::from_kind(Fixed)
    }
}

impl Default for FixedJoint {
    fn default() -> Self {
        Self::new()
    }
}

impl RevoluteJoint {
    /// Create a revolute joint about the given axis (normalized internally).
    pub fn new(axis: Vec3) -> Self {
        assert!(axis.norm() > 0.0, "revolute axis must be non-zero");
        GenericJoint::from_kind(Revolute {
            axis: axis.normalize(),
        })
    }

    pub fn axis(&self) -> Vec3 {
        self.kind.axis
    }
}

impl PrismaticJoint {
    /// Create a prismatic joint along the given axis (normalized internally).
    pub fn new(axis: Vec3) -> Self {
        assert!(axis.norm() > 0.0, "prismatic axis must be non-zero");
        GenericJoint::from_kind(Prismatic {
            axis: axis.normalize(),
        })
    }

    pub fn axis(&self) -> Vec3 {
        self.kind.axis
    }
}

impl BallJoint {
    pub fn new() -> Self {
        GenericJoint::from_kind(Ball)
    }
}

impl Default for BallJoint {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeJoint {
    pub fn new() -> Self {
        GenericJoint::from_kind(Free)
    }
}

impl Default for FreeJoint {
    fn default() -> Self {
        Self::new()
    }
}
