//! The tree owner: an arena of bodies driven through the recursive passes.
//!
//! Bodies are stored in insertion order, and a body can only be attached to a
//! parent that already exists, so a parent's arena index is always smaller
//! than its children's. Top-down passes are plain ascending loops handing
//! each body its parent; bottom-up passes are descending loops handing each
//! body the slice of bodies stored after it.
//!
//! No pass begins until the previous one has completed for the whole tree;
//! the skeleton is the sole caller and therefore the sole synchronization
//! point.

use crate::body::Body;
use crate::error::{DynamicsError, Result};
use crate::joint::Joint;
use arbor_math::{DMat, DVec, Jacobian, SpatialTransform, SpatialVec, Vec3};

/// Which joints an inverse-kinematics fit is allowed to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InverseKinematicsPolicy {
    /// Adjust only the target body's own joint.
    ParentJoint,
    /// Adjust every joint between the root and the target body.
    AncestorJoints,
    /// Adjust every joint in the tree.
    AllJoints,
}

/// An articulated tree of rigid bodies.
pub struct Skeleton {
    name: String,
    bodies: Vec<Body>,
    gravity: Vec3,
    time_step: f64,
    /// Whether the tree is dynamically simulated (vs. kinematically driven);
    /// gates impulse responsibility.
    mobile: bool,
    num_gen_coords: usize,
    next_body_id: u32,
}

impl Skeleton {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bodies: Vec::new(),
            gravity: Vec3::new(0.0, 0.0, -arbor_math::GRAVITY),
            time_step: 0.001,
            mobile: true,
            num_gen_coords: 0,
            next_body_id: 0,
        }
    }

    // ── configuration ──

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gravity(&self) -> Vec3 {
        self.gravity
    }

    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = gravity;
    }

    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    pub fn set_time_step(&mut self, time_step: f64) {
        assert!(time_step > 0.0, "time step must be positive");
        self.time_step = time_step;
    }

    pub fn is_mobile(&self) -> bool {
        self.mobile
    }

    pub fn set_mobile(&mut self, mobile: bool) {
        self.mobile = mobile;
    }

    // ── tree construction ──

    /// Attach a new body under `parent` (or as a root) and allocate its id
    /// and generalized-coordinate indices. Returns the body's arena index.
    pub fn add_body(
        &mut self,
        parent: Option<usize>,
        joint: Box<dyn Joint>,
        name: impl Into<String>,
    ) -> usize {
        if let Some(parent) = parent {
            assert!(parent < self.bodies.len(), "parent index out of range");
        }

        let index = self.bodies.len();
        let first_coord_index = self.num_gen_coords;
        let mut body = Body::new(name, joint);

        let parent_dependents: Vec<usize> = match parent {
            Some(parent) => self.bodies[parent].dependent_gen_coords().to_vec(),
            None => Vec::new(),
        };
        body.init(
            index,
            self.next_body_id,
            parent,
            &parent_dependents,
            first_coord_index,
        );
        self.next_body_id += 1;
        self.num_gen_coords += body.joint().num_dofs();

        if let Some(parent) = parent {
            self.bodies[parent].add_child(index);
        }
        log::debug!(
            "attached body `{}` at index {} ({} coordinates)",
            body.name(),
            index,
            body.joint().num_dofs()
        );
        self.bodies.push(body);
        index
    }

    pub fn num_bodies(&self) -> usize {
        self.bodies.len()
    }

    pub fn num_gen_coords(&self) -> usize {
        self.num_gen_coords
    }

    pub fn body(&self, index: usize) -> &Body {
        &self.bodies[index]
    }

    pub fn body_mut(&mut self, index: usize) -> &mut Body {
        &mut self.bodies[index]
    }

    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    // ── system-wide generalized state ──

    pub fn positions(&self) -> DVec {
        self.gather(|joint| joint.positions())
    }

    pub fn set_positions(&mut self, q: &DVec) {
        self.scatter(q, |joint, slice| joint.set_positions(slice));
        for body in &mut self.bodies {
            body.invalidate_jacobians();
        }
    }

    pub fn velocities(&self) -> DVec {
        self.gather(|joint| joint.velocities())
    }

    pub fn set_velocities(&mut self, dq: &DVec) {
        self.scatter(dq, |joint, slice| joint.set_velocities(slice));
    }

    pub fn accelerations(&self) -> DVec {
        self.gather(|joint| joint.accelerations())
    }

    pub fn set_accelerations(&mut self, ddq: &DVec) {
        self.scatter(ddq, |joint, slice| joint.set_accelerations(slice));
    }

    pub fn forces(&self) -> DVec {
        self.gather(|joint| joint.forces())
    }

    pub fn set_forces(&mut self, tau: &DVec) {
        self.scatter(tau, |joint, slice| joint.set_forces(slice));
    }

    fn gather(&self, read: impl Fn(&dyn Joint) -> DVec) -> DVec {
        let mut out = DVec::zeros(self.num_gen_coords);
        for body in &self.bodies {
            let dofs = body.joint().num_dofs();
            if dofs > 0 {
                out.rows_mut(body.joint().index_in_skeleton(), dofs)
                    .copy_from(&read(body.joint()));
            }
        }
        out
    }

    fn scatter(&mut self, values: &DVec, write: impl Fn(&mut dyn Joint, &[f64])) {
        assert_eq!(
            values.len(),
            self.num_gen_coords,
            "system vector length must match the coordinate count"
        );
        for body in &mut self.bodies {
            let dofs = body.joint().num_dofs();
            if dofs > 0 {
                let start = body.joint().index_in_skeleton();
                write(body.joint_mut(), &values.as_slice()[start..start + dofs]);
            }
        }
    }

    // ── pass drivers ──

    fn update_transforms(&mut self) {
        for i in 0..self.bodies.len() {
            let (head, tail) = self.bodies.split_at_mut(i);
            let body = &mut tail[0];
            let parent = body.parent_index().map(|p| &head[p]);
            body.update_transform(parent);
        }
    }

    fn update_velocities(&mut self) {
        for i in 0..self.bodies.len() {
            let (head, tail) = self.bodies.split_at_mut(i);
            let body = &mut tail[0];
            let parent = body.parent_index().map(|p| &head[p]);
            body.update_velocity(parent);
        }
    }

    fn update_partial_accelerations(&mut self) {
        for body in &mut self.bodies {
            body.update_partial_acceleration();
        }
    }

    fn update_accelerations(&mut self) {
        for i in 0..self.bodies.len() {
            let (head, tail) = self.bodies.split_at_mut(i);
            let body = &mut tail[0];
            let parent = body.parent_index().map(|p| &head[p]);
            body.update_acceleration(parent);
        }
    }

    fn update_art_inertias(&mut self) {
        let time_step = self.time_step;
        for i in (0..self.bodies.len()).rev() {
            let (head, tail) = self.bodies.split_at_mut(i + 1);
            head[i].update_art_inertia(tail, time_step);
        }
    }

    fn update_bias_forces(&mut self) {
        let gravity = self.gravity;
        let time_step = self.time_step;
        for i in (0..self.bodies.len()).rev() {
            let (head, tail) = self.bodies.split_at_mut(i + 1);
            head[i].update_bias_force(tail, &gravity, time_step);
        }
    }

    /// Full kinematic propagation (§ transform, velocity, partial
    /// acceleration, acceleration), top-down.
    pub fn compute_forward_kinematics(&mut self) {
        self.update_transforms();
        self.update_velocities();
        self.update_partial_accelerations();
        self.update_accelerations();
    }

    /// Articulated-body forward dynamics: resolves joint accelerations from
    /// the current positions, velocities, and forces.
    pub fn compute_forward_dynamics(&mut self) {
        self.update_transforms();
        self.update_velocities();
        self.update_partial_accelerations();

        self.update_art_inertias();
        self.update_bias_forces();

        for i in 0..self.bodies.len() {
            let (head, tail) = self.bodies.split_at_mut(i);
            let body = &mut tail[0];
            let parent = body.parent_index().map(|p| &head[p]);
            body.update_joint_and_body_acceleration(parent);
            body.update_transmitted_force();
        }
    }

    /// Recursive Newton-Euler inverse dynamics: computes the generalized
    /// forces that realize the current joint accelerations.
    pub fn compute_inverse_dynamics(&mut self, with_external_forces: bool) {
        self.compute_forward_kinematics();

        let gravity = self.gravity;
        for i in (0..self.bodies.len()).rev() {
            let (head, tail) = self.bodies.split_at_mut(i + 1);
            head[i].update_body_force(tail, &gravity, with_external_forces);
            head[i].update_generalized_force();
        }
    }

    // ── system-wide force vectors ──

    /// Generalized gravity-force vector (appears on the left-hand side of
    /// M·q̈ + C + g = τ).
    pub fn gravity_force_vector(&mut self) -> DVec {
        self.update_transforms();
        let gravity = self.gravity;
        let mut out = DVec::zeros(self.num_gen_coords);
        for i in (0..self.bodies.len()).rev() {
            let (head, tail) = self.bodies.split_at_mut(i + 1);
            head[i].aggregate_gravity_force(tail, &mut out, &gravity);
        }
        out
    }

    /// Combined Coriolis/centrifugal + gravity vector.
    pub fn combined_vector(&mut self) -> DVec {
        let gravity = self.gravity;
        self.combined_vector_with_gravity(&gravity)
    }

    /// Coriolis/centrifugal vector: the combined recursion with zero gravity.
    pub fn coriolis_force_vector(&mut self) -> DVec {
        self.combined_vector_with_gravity(&Vec3::zeros())
    }

    fn combined_vector_with_gravity(&mut self, gravity: &Vec3) -> DVec {
        self.update_transforms();
        self.update_velocities();
        self.update_partial_accelerations();

        for i in 0..self.bodies.len() {
            let (head, tail) = self.bodies.split_at_mut(i);
            let body = &mut tail[0];
            let parent = body.parent_index().map(|p| &head[p]);
            body.update_combined_vector(parent);
        }

        let mut out = DVec::zeros(self.num_gen_coords);
        for i in (0..self.bodies.len()).rev() {
            let (head, tail) = self.bodies.split_at_mut(i + 1);
            head[i].aggregate_combined_vector(tail, &mut out, gravity);
        }
        out
    }

    /// Generalized external-force vector from the per-body accumulators.
    pub fn external_force_vector(&mut self) -> DVec {
        self.update_transforms();
        let mut out = DVec::zeros(self.num_gen_coords);
        for i in (0..self.bodies.len()).rev() {
            let (head, tail) = self.bodies.split_at_mut(i + 1);
            head[i].aggregate_external_forces(tail, &mut out);
        }
        out
    }

    // ── mass matrix and inverse mass matrix ──

    /// Joint-space mass matrix, one unit-acceleration column at a time.
    pub fn mass_matrix(&mut self) -> DMat {
        self.assemble_mass_matrix(false)
    }

    /// Mass matrix augmented with damping/stiffness×timestep terms for
    /// implicit integration.
    pub fn aug_mass_matrix(&mut self) -> DMat {
        self.assemble_mass_matrix(true)
    }

    fn assemble_mass_matrix(&mut self, augmented: bool) -> DMat {
        self.update_transforms();
        let n = self.num_gen_coords;
        let time_step = self.time_step;
        let mut matrix = DMat::zeros(n, n);
        let saved_accelerations = self.accelerations();

        let mut seed = DVec::zeros(n);
        for col in 0..n {
            seed[col] = 1.0;
            self.set_accelerations(&seed);

            for i in 0..self.bodies.len() {
                let (head, tail) = self.bodies.split_at_mut(i);
                let body = &mut tail[0];
                let parent = body.parent_index().map(|p| &head[p]);
                body.update_mass_matrix(parent);
            }
            for i in (0..self.bodies.len()).rev() {
                let (head, tail) = self.bodies.split_at_mut(i + 1);
                if augmented {
                    head[i].aggregate_aug_mass_matrix(tail, &mut matrix, col, time_step);
                } else {
                    head[i].aggregate_mass_matrix(tail, &mut matrix, col);
                }
            }
            seed[col] = 0.0;
        }

        self.set_accelerations(&saved_accelerations);
        matrix
    }

    /// Inverse mass matrix, assembled without ever forming the mass matrix.
    pub fn inv_mass_matrix(&mut self) -> DMat {
        self.assemble_inv_mass_matrix(false)
    }

    /// Inverse of the augmented mass matrix.
    pub fn inv_aug_mass_matrix(&mut self) -> DMat {
        self.assemble_inv_mass_matrix(true)
    }

    fn assemble_inv_mass_matrix(&mut self, augmented: bool) -> DMat {
        self.update_transforms();
        self.update_art_inertias();

        let n = self.num_gen_coords;
        let mut matrix = DMat::zeros(n, n);
        let saved_forces = self.forces();

        let mut seed = DVec::zeros(n);
        for col in 0..n {
            seed[col] = 1.0;
            self.set_forces(&seed);

            for i in (0..self.bodies.len()).rev() {
                let (head, tail) = self.bodies.split_at_mut(i + 1);
                if augmented {
                    head[i].update_inv_aug_mass_matrix(tail);
                } else {
                    head[i].update_inv_mass_matrix(tail);
                }
            }
            for i in 0..self.bodies.len() {
                let (head, tail) = self.bodies.split_at_mut(i);
                let body = &mut tail[0];
                let parent = body.parent_index().map(|p| &head[p]);
                if augmented {
                    body.aggregate_inv_aug_mass_matrix(parent, &mut matrix, col);
                } else {
                    body.aggregate_inv_mass_matrix(parent, &mut matrix, col);
                }
            }
            seed[col] = 0.0;
        }

        self.set_forces(&saved_forces);
        matrix
    }

    // ── impulse-based constraint resolution ──

    /// Propagate accumulated constraint impulses into joint and body
    /// velocity changes. Requires articulated inertias from a preceding
    /// forward-dynamics pass.
    pub fn compute_impulse_forward_dynamics(&mut self) {
        if !self.mobile {
            return;
        }

        let mobile = self.mobile;
        for i in (0..self.bodies.len()).rev() {
            let (head, tail) = self.bodies.split_at_mut(i + 1);
            if head[i].is_impulse_responsible(mobile) {
                head[i].update_bias_impulse(tail);
            }
        }
        for i in 0..self.bodies.len() {
            let (head, tail) = self.bodies.split_at_mut(i);
            let body = &mut tail[0];
            let parent = body.parent_index().map(|p| &head[p]);
            body.update_joint_velocity_change(parent);
            body.update_body_imp_force_fwd_dyn();
        }
    }

    /// After the constraint solver has converged, fold the resolved velocity
    /// changes into joint velocities/accelerations/forces and body state.
    pub fn fold_constraint_impulses(&mut self) {
        let time_step = self.time_step;
        for body in &mut self.bodies {
            body.update_constrained_joint_and_body_acceleration(time_step);
            body.update_constrained_transmitted_force(time_step);
        }
    }

    pub fn clear_constraint_impulses(&mut self) {
        for body in &mut self.bodies {
            body.clear_constraint_impulse();
        }
    }

    pub fn clear_external_forces(&mut self) {
        for body in &mut self.bodies {
            body.clear_external_forces();
        }
    }

    // ── body Jacobians ──

    /// The body-frame Jacobian of `index`, recomputed if stale.
    pub fn body_jacobian(&mut self, index: usize) -> &Jacobian {
        self.ensure_body_jacobian(index);
        self.bodies[index]
            .body_jacobian()
            .expect("jacobian is valid after recomputation")
    }

    /// The body-frame Jacobian time derivative of `index`, recomputed if
    /// stale.
    pub fn body_jacobian_time_deriv(&mut self, index: usize) -> &Jacobian {
        self.ensure_body_jacobian_time_deriv(index);
        self.bodies[index]
            .body_jacobian_time_deriv()
            .expect("jacobian derivative is valid after recomputation")
    }

    fn ensure_body_jacobian(&mut self, index: usize) {
        if !self.bodies[index].is_body_jacobian_dirty() {
            return;
        }
        match self.bodies[index].parent_index() {
            Some(parent) => {
                self.ensure_body_jacobian(parent);
                let (head, tail) = self.bodies.split_at_mut(index);
                tail[0].compute_body_jacobian(head[parent].body_jacobian());
            }
            None => self.bodies[index].compute_body_jacobian(None),
        }
    }

    fn ensure_body_jacobian_time_deriv(&mut self, index: usize) {
        if !self.bodies[index].is_body_jacobian_time_deriv_dirty() {
            return;
        }
        self.ensure_body_jacobian(index);
        match self.bodies[index].parent_index() {
            Some(parent) => {
                self.ensure_body_jacobian_time_deriv(parent);
                let (head, tail) = self.bodies.split_at_mut(index);
                tail[0].compute_body_jacobian_time_deriv(head[parent].body_jacobian_time_deriv());
            }
            None => self.bodies[index].compute_body_jacobian_time_deriv(None),
        }
    }

    /// World-frame Jacobian re-expressed at a caller-supplied offset point.
    pub fn world_jacobian(&mut self, index: usize, offset: &Vec3, is_offset_local: bool) -> Jacobian {
        self.ensure_body_jacobian(index);
        let body = &self.bodies[index];
        body.offset_frame(offset, is_offset_local)
            .apply_motion_jacobian(body.body_jacobian().expect("jacobian is valid"))
    }

    /// World-frame Jacobian time derivative at an offset point. Each column
    /// picks up the ω × J_linear correction before the re-expression.
    pub fn world_jacobian_time_deriv(
        &mut self,
        index: usize,
        offset: &Vec3,
        is_offset_local: bool,
    ) -> Jacobian {
        self.ensure_body_jacobian_time_deriv(index);
        let body = &self.bodies[index];
        let jacobian = body.body_jacobian().expect("jacobian is valid");
        let mut deriv = body
            .body_jacobian_time_deriv()
            .expect("jacobian derivative is valid")
            .clone();

        let angular = body.body_velocity().angular();
        for i in 0..deriv.ncols() {
            let correction = angular.cross(&jacobian.column(i).fixed_rows::<3>(3).into_owned());
            for r in 0..3 {
                deriv[(3 + r, i)] += correction[r];
            }
        }
        body.offset_frame(offset, is_offset_local)
            .apply_motion_jacobian(&deriv)
    }

    // ── energy ──

    pub fn kinetic_energy(&self) -> f64 {
        self.bodies.iter().map(|b| b.kinetic_energy()).sum()
    }

    pub fn potential_energy(&self) -> f64 {
        let gravity = self.gravity;
        self.bodies.iter().map(|b| b.potential_energy(&gravity)).sum()
    }

    // ── inverse-kinematics fitting (thin adapters over the core) ──

    /// Fit the target body's world transform by adjusting joint coordinates
    /// under the given policy. Zero-DOF joints are a no-op.
    pub fn fit_world_transform(
        &mut self,
        body_index: usize,
        target: &SpatialTransform,
        policy: InverseKinematicsPolicy,
        clamp_to_limits: bool,
    ) -> Result<()> {
        self.check_parent_joint_policy(policy, "transform fitting")?;

        let dofs = self.bodies[body_index].joint().num_dofs();
        if dofs == 0 {
            return Ok(());
        }
        self.update_transforms();

        let parent_world = self.bodies[body_index]
            .parent_index()
            .map(|p| *self.bodies[p].world_transform());
        let lower = self.bodies[body_index].joint().position_lower_limits();
        let upper = self.bodies[body_index].joint().position_upper_limits();

        let mut best = self.bodies[body_index].joint().positions();
        let mut best_cost = self.pose_distance(body_index, parent_world.as_ref(), target, &best);

        // Shrinking-step coordinate search; the objective is the squared
        // log-map distance between the candidate and target poses.
        let mut step = 0.1;
        let mut rounds = 0;
        while step > 1e-9 && rounds < 10_000 {
            rounds += 1;
            let mut improved = false;
            for k in 0..dofs {
                for direction in [-1.0, 1.0] {
                    let mut candidate = best.clone();
                    candidate[k] += direction * step;
                    if clamp_to_limits {
                        candidate[k] = candidate[k].clamp(lower[k], upper[k]);
                    }
                    let cost =
                        self.pose_distance(body_index, parent_world.as_ref(), target, &candidate);
                    if cost + 1e-14 < best_cost {
                        best_cost = cost;
                        best = candidate;
                        improved = true;
                    }
                }
            }
            if !improved {
                step *= 0.5;
            }
        }

        self.bodies[body_index]
            .joint_mut()
            .set_positions(best.as_slice());
        self.update_transforms();
        Ok(())
    }

    fn pose_distance(
        &mut self,
        body_index: usize,
        parent_world: Option<&SpatialTransform>,
        target: &SpatialTransform,
        q: &DVec,
    ) -> f64 {
        let body = &mut self.bodies[body_index];
        body.joint_mut().set_positions(q.as_slice());
        body.joint_mut().update_local_transform();
        let world = match parent_world {
            Some(parent_world) => parent_world.compose(body.joint().local_transform()),
            None => *body.joint().local_transform(),
        };
        let error = world.inverse().compose(target).log_map();
        error.dot(&error)
    }

    /// Fit the target body's world-frame linear velocity by adjusting its
    /// joint velocities (a linear least-squares solve).
    pub fn fit_world_linear_vel(
        &mut self,
        body_index: usize,
        target_linear_vel: &Vec3,
        policy: InverseKinematicsPolicy,
        clamp_to_limits: bool,
    ) -> Result<()> {
        self.fit_world_velocity(body_index, target_linear_vel, policy, clamp_to_limits, false)
    }

    /// Fit the target body's world-frame angular velocity by adjusting its
    /// joint velocities.
    pub fn fit_world_angular_vel(
        &mut self,
        body_index: usize,
        target_angular_vel: &Vec3,
        policy: InverseKinematicsPolicy,
        clamp_to_limits: bool,
    ) -> Result<()> {
        self.fit_world_velocity(body_index, target_angular_vel, policy, clamp_to_limits, true)
    }

    fn fit_world_velocity(
        &mut self,
        body_index: usize,
        target: &Vec3,
        policy: InverseKinematicsPolicy,
        clamp_to_limits: bool,
        angular: bool,
    ) -> Result<()> {
        self.check_parent_joint_policy(policy, "velocity fitting")?;

        let dofs = self.bodies[body_index].joint().num_dofs();
        if dofs == 0 {
            return Ok(());
        }
        self.update_transforms();
        self.update_velocities();

        // World velocity is linear in the joint's velocity coordinates:
        // v_world = frame · (inherited + S·dq), so solve a 3×n least-squares
        // system for dq directly.
        let (frame, inherited, jacobian) = {
            let body = &self.bodies[body_index];
            let frame = body.offset_frame(&Vec3::zeros(), true);
            let inherited = match body.parent_index() {
                Some(parent) => body
                    .joint()
                    .local_transform()
                    .inv_apply_motion(self.bodies[parent].body_velocity()),
                None => SpatialVec::zero(),
            };
            (frame, inherited, body.joint().local_jacobian())
        };

        let base = frame.apply_motion(&inherited);
        let base_part = if angular { base.angular() } else { base.linear() };

        let mut system = DMat::zeros(3, dofs);
        for k in 0..dofs {
            let column = frame.apply_motion(&SpatialVec::from_vec6(jacobian.column(k).into_owned()));
            let part = if angular { column.angular() } else { column.linear() };
            for r in 0..3 {
                system[(r, k)] = part[r];
            }
        }

        let rhs = DVec::from_column_slice((target - base_part).as_slice());
        let svd = system.svd(true, true);
        let mut solution = svd
            .solve(&rhs, 1e-12)
            .expect("SVD solve with computed factors cannot fail");

        if clamp_to_limits {
            let lower = self.bodies[body_index].joint().velocity_lower_limits();
            let upper = self.bodies[body_index].joint().velocity_upper_limits();
            for k in 0..dofs {
                solution[k] = solution[k].clamp(lower[k], upper[k]);
            }
        }

        self.bodies[body_index]
            .joint_mut()
            .set_velocities(solution.as_slice());
        self.update_velocities();
        Ok(())
    }

    fn check_parent_joint_policy(
        &self,
        policy: InverseKinematicsPolicy,
        what: &'static str,
    ) -> Result<()> {
        match policy {
            InverseKinematicsPolicy::ParentJoint => Ok(()),
            InverseKinematicsPolicy::AncestorJoints => {
                log::warn!("ancestor-joints {what} is not implemented");
                Err(DynamicsError::NotImplemented("ancestor-joints fitting"))
            }
            InverseKinematicsPolicy::AllJoints => {
                log::warn!("all-joints {what} is not implemented");
                Err(DynamicsError::NotImplemented("all-joints fitting"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joint::{BallJoint, FixedJoint, FreeJoint, PrismaticJoint, RevoluteJoint};
    use approx::assert_relative_eq;
    use arbor_math::{SpatialTransform, Vec3, GRAVITY};

    /// Two-link pendulum: revolute joints about Z, links hanging along −Y,
    /// rod inertia about each link's own frame.
    fn double_pendulum() -> Skeleton {
        let mut skeleton = Skeleton::new("double-pendulum");
        skeleton.set_gravity(Vec3::new(0.0, -GRAVITY, 0.0));

        let link = |skeleton: &mut Skeleton, parent: Option<usize>, name: &str| {
            let mut joint = RevoluteJoint::new(Vec3::z());
            if parent.is_some() {
                joint.set_transform_from_parent_body(SpatialTransform::from_translation(
                    Vec3::new(0.0, -1.0, 0.0),
                ));
            }
            let index = skeleton.add_body(parent, Box::new(joint), name);
            let body = skeleton.body_mut(index);
            body.set_mass(1.0);
            body.set_local_com(Vec3::new(0.0, -0.5, 0.0));
            body.set_moment_of_inertia(1.0 / 12.0, 1e-8, 1.0 / 12.0, 0.0, 0.0, 0.0);
            index
        };

        let first = link(&mut skeleton, None, "link1");
        link(&mut skeleton, Some(first), "link2");
        skeleton
    }

    fn free_ball() -> Skeleton {
        let mut skeleton = Skeleton::new("ball");
        skeleton.set_gravity(Vec3::zeros());
        let index = skeleton.add_body(None, Box::new(FreeJoint::new()), "ball");
        skeleton.body_mut(index).set_mass(2.0);
        skeleton
            .body_mut(index)
            .set_moment_of_inertia(0.1, 0.1, 0.1, 0.0, 0.0, 0.0);
        skeleton
    }

    #[test]
    fn coordinate_indices_are_allocated_in_order() {
        let mut skeleton = Skeleton::new("chain");
        let root = skeleton.add_body(None, Box::new(FreeJoint::new()), "root");
        let mid = skeleton.add_body(Some(root), Box::new(RevoluteJoint::new(Vec3::z())), "mid");
        let tip = skeleton.add_body(Some(mid), Box::new(BallJoint::new()), "tip");

        assert_eq!(skeleton.num_gen_coords(), 10);
        assert_eq!(skeleton.body(root).joint().index_in_skeleton(), 0);
        assert_eq!(skeleton.body(mid).joint().index_in_skeleton(), 6);
        assert_eq!(skeleton.body(tip).joint().index_in_skeleton(), 7);
    }

    #[test]
    fn dependent_coords_extend_the_parents_set() {
        let mut skeleton = Skeleton::new("tree");
        let root = skeleton.add_body(None, Box::new(FreeJoint::new()), "root");
        let left = skeleton.add_body(Some(root), Box::new(RevoluteJoint::new(Vec3::z())), "left");
        let right =
            skeleton.add_body(Some(root), Box::new(RevoluteJoint::new(Vec3::x())), "right");

        assert_eq!(
            skeleton.body(root).dependent_gen_coords(),
            &[0, 1, 2, 3, 4, 5]
        );
        assert_eq!(
            skeleton.body(left).dependent_gen_coords(),
            &[0, 1, 2, 3, 4, 5, 6]
        );
        assert_eq!(
            skeleton.body(right).dependent_gen_coords(),
            &[0, 1, 2, 3, 4, 5, 7]
        );
        assert!(skeleton.body(right).depends_on(7));
        assert!(!skeleton.body(right).depends_on(6));
        // sibling branches stay disjoint beyond the shared ancestors
        assert!(!skeleton.body(left).depends_on(7));
    }

    #[test]
    fn ids_are_unique_and_monotonic() {
        let mut skeleton = Skeleton::new("ids");
        let a = skeleton.add_body(None, Box::new(FixedJoint::new()), "a");
        let b = skeleton.add_body(Some(a), Box::new(RevoluteJoint::new(Vec3::z())), "b");
        assert!(skeleton.body(a).id() < skeleton.body(b).id());
    }

    #[test]
    fn mass_matrix_is_symmetric_and_positive_definite() {
        let mut skeleton = double_pendulum();
        skeleton.set_positions(&DVec::from_column_slice(&[0.4, -0.9]));

        let m = skeleton.mass_matrix();
        assert_relative_eq!(m[(0, 1)], m[(1, 0)], epsilon = 1e-10);
        let eigenvalues = m.clone().symmetric_eigen().eigenvalues;
        assert!(eigenvalues.iter().all(|&e| e > 0.0), "{eigenvalues}");
    }

    #[test]
    fn mass_matrix_times_inverse_is_identity() {
        let mut skeleton = double_pendulum();
        skeleton.set_positions(&DVec::from_column_slice(&[0.7, 0.3]));

        let m = skeleton.mass_matrix();
        let inv = skeleton.inv_mass_matrix();
        let product = &m * &inv;
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(product[(i, j)], expected, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn augmented_matrices_reduce_to_plain_without_springs() {
        let mut skeleton = double_pendulum();
        skeleton.set_positions(&DVec::from_column_slice(&[0.2, -0.5]));

        let m = skeleton.mass_matrix();
        let aug = skeleton.aug_mass_matrix();
        let inv = skeleton.inv_mass_matrix();
        let inv_aug = skeleton.inv_aug_mass_matrix();
        assert_relative_eq!(m, aug, epsilon = 1e-12);
        assert_relative_eq!(inv, inv_aug, epsilon = 1e-12);
    }

    #[test]
    fn free_body_impulse_yields_momentum_change() {
        let mut skeleton = free_ball();
        skeleton.compute_forward_dynamics();

        let impulse = SpatialVec::new(Vec3::zeros(), Vec3::new(0.5, 0.0, -1.0));
        skeleton.body_mut(0).set_constraint_impulse(impulse);
        skeleton.compute_impulse_forward_dynamics();

        // ΔV = M⁻¹ · impulse = impulse / mass for a com-centered body
        let delta = skeleton.body(0).body_velocity_change();
        assert_relative_eq!(
            delta.linear(),
            Vec3::new(0.25, 0.0, -0.5),
            epsilon = 1e-10
        );
        assert_relative_eq!(delta.angular(), Vec3::zeros(), epsilon = 1e-10);
    }

    #[test]
    fn constraint_impulse_clearing_resets_joint_and_body() {
        let mut skeleton = free_ball();
        skeleton.compute_forward_dynamics();
        skeleton
            .body_mut(0)
            .set_constraint_impulse(SpatialVec::new(Vec3::x(), Vec3::y()));
        skeleton.compute_impulse_forward_dynamics();
        skeleton.clear_constraint_impulses();

        let body = skeleton.body(0);
        assert_eq!(body.constraint_impulse().data.norm(), 0.0);
        assert_eq!(body.body_velocity_change().data.norm(), 0.0);
        assert_eq!(body.bias_impulse().data.norm(), 0.0);
        assert_eq!(body.impulse_force().data.norm(), 0.0);
        assert_eq!(body.joint().constraint_impulses().norm(), 0.0);
        assert_eq!(body.joint().velocity_changes().norm(), 0.0);
    }

    #[test]
    fn jacobian_cache_goes_stale_on_configuration_change() {
        let mut skeleton = double_pendulum();
        skeleton.compute_forward_kinematics();
        let _ = skeleton.body_jacobian(1);
        assert!(!skeleton.body(1).is_body_jacobian_dirty());

        skeleton.set_positions(&DVec::from_column_slice(&[0.3, 0.0]));
        assert!(skeleton.body(1).is_body_jacobian_dirty());
        assert!(skeleton.body(0).is_body_jacobian_dirty());
    }

    #[test]
    fn body_jacobian_maps_joint_velocities_to_body_velocity() {
        let mut skeleton = double_pendulum();
        skeleton.set_positions(&DVec::from_column_slice(&[0.4, -0.2]));
        let dq = DVec::from_column_slice(&[0.9, 1.3]);
        skeleton.set_velocities(&dq);
        skeleton.compute_forward_kinematics();

        let jacobian = skeleton.body_jacobian(1).clone();
        let mapped = &jacobian * &dq;
        assert_relative_eq!(
            mapped,
            skeleton.body(1).body_velocity().data,
            epsilon = 1e-10
        );
    }

    #[test]
    fn jacobian_and_derivative_reproduce_body_acceleration() {
        // A(body) = J·q̈ + J̇·q̇ must hold for the cached Jacobians.
        let mut skeleton = double_pendulum();
        skeleton.set_positions(&DVec::from_column_slice(&[0.5, -0.8]));
        skeleton.set_velocities(&DVec::from_column_slice(&[1.1, -0.4]));
        skeleton.set_accelerations(&DVec::from_column_slice(&[0.3, 0.7]));
        skeleton.compute_forward_kinematics();

        let jacobian = skeleton.body_jacobian(1).clone();
        let deriv = skeleton.body_jacobian_time_deriv(1).clone();
        let dq = skeleton.velocities();
        let ddq = skeleton.accelerations();
        let reconstructed = &jacobian * &ddq + &deriv * &dq;
        assert_relative_eq!(
            reconstructed,
            skeleton.body(1).body_acceleration().data,
            epsilon = 1e-9
        );
    }

    #[test]
    fn world_jacobian_maps_to_world_velocity() {
        let mut skeleton = double_pendulum();
        skeleton.set_positions(&DVec::from_column_slice(&[0.6, 0.1]));
        let dq = DVec::from_column_slice(&[-0.5, 0.8]);
        skeleton.set_velocities(&dq);
        skeleton.compute_forward_kinematics();

        let offset = Vec3::new(0.0, -0.5, 0.0);
        let world_jacobian = skeleton.world_jacobian(1, &offset, true);
        let mapped = &world_jacobian * &dq;
        let expected = skeleton.body(1).world_velocity(&offset, true);
        assert_relative_eq!(mapped, expected.data, epsilon = 1e-10);
    }

    #[test]
    fn fit_world_transform_recovers_joint_angle() {
        let mut skeleton = double_pendulum();
        skeleton.set_positions(&DVec::from_column_slice(&[0.6, 0.0]));
        skeleton.compute_forward_kinematics();
        let target = *skeleton.body(0).world_transform();

        skeleton.set_positions(&DVec::zeros(2));
        skeleton
            .fit_world_transform(0, &target, InverseKinematicsPolicy::ParentJoint, false)
            .unwrap();
        let fitted = skeleton.body(0).joint().positions();
        assert_relative_eq!(fitted[0], 0.6, epsilon = 1e-5);
    }

    #[test]
    fn fit_world_transform_is_noop_for_zero_dof() {
        let mut skeleton = Skeleton::new("welded");
        skeleton.add_body(None, Box::new(FixedJoint::new()), "anchor");
        let target = SpatialTransform::from_translation(Vec3::new(1.0, 0.0, 0.0));
        skeleton
            .fit_world_transform(0, &target, InverseKinematicsPolicy::ParentJoint, false)
            .unwrap();
    }

    #[test]
    fn unimplemented_fit_policies_are_reported() {
        let mut skeleton = double_pendulum();
        let target = SpatialTransform::identity();
        let result = skeleton.fit_world_transform(
            1,
            &target,
            InverseKinematicsPolicy::AncestorJoints,
            false,
        );
        assert!(matches!(result, Err(DynamicsError::NotImplemented(_))));
        let result =
            skeleton.fit_world_linear_vel(1, &Vec3::x(), InverseKinematicsPolicy::AllJoints, false);
        assert!(matches!(result, Err(DynamicsError::NotImplemented(_))));
    }

    #[test]
    fn fit_world_linear_vel_solves_the_free_joint() {
        let mut skeleton = free_ball();
        let target = Vec3::new(1.0, -2.0, 3.0);
        skeleton
            .fit_world_linear_vel(0, &target, InverseKinematicsPolicy::ParentJoint, false)
            .unwrap();
        skeleton.compute_forward_kinematics();
        let velocity = skeleton.body(0).world_velocity(&Vec3::zeros(), true);
        assert_relative_eq!(velocity.linear(), target, epsilon = 1e-9);
    }

    #[test]
    fn prismatic_chain_mass_matrix_is_plain_mass() {
        let mut skeleton = Skeleton::new("slider");
        skeleton.set_gravity(Vec3::zeros());
        let index = skeleton.add_body(
            None,
            Box::new(PrismaticJoint::new(Vec3::x())),
            "slider",
        );
        skeleton.body_mut(index).set_mass(3.0);

        let m = skeleton.mass_matrix();
        assert_relative_eq!(m[(0, 0)], 3.0, epsilon = 1e-12);
        let inv = skeleton.inv_mass_matrix();
        assert_relative_eq!(inv[(0, 0)], 1.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn external_force_vector_matches_jacobian_projection() {
        let mut skeleton = double_pendulum();
        skeleton.set_positions(&DVec::from_column_slice(&[0.3, -0.6]));
        skeleton.compute_forward_kinematics();
        skeleton
            .body_mut(1)
            .add_ext_force(&Vec3::new(2.0, 1.0, 0.0), &Vec3::new(0.0, -0.5, 0.0), true, true);

        let via_recursion = skeleton.external_force_vector();
        let jacobian = skeleton.body_jacobian(1).clone();
        let via_jacobian =
            jacobian.transpose() * skeleton.body(1).external_force_local().data;
        assert_relative_eq!(via_recursion, via_jacobian, epsilon = 1e-10);
    }
}
