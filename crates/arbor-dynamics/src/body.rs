//! One node of the kinematic tree.
//!
//! A body owns its parent joint, its mass properties, its attached shapes and
//! markers, and the cached kinematic/dynamic state the recursive passes read
//! and write. Top-down pass steps take the already-updated parent; bottom-up
//! pass steps take the slice of bodies stored after this one in the arena
//! (the skeleton orders the arena so every child index is greater than its
//! parent's) and look their children up in it.
//!
//! Pass ordering is the caller's contract: each step assumes the previous
//! pass has completed for the whole tree and does not re-check its inputs.

use crate::joint::Joint;
use crate::shape::{Marker, Shape};
use arbor_math::{DMat, DVec, Jacobian, SpatialMat, SpatialTransform, SpatialVec, Vec3};
use std::rc::Rc;

const DEFAULT_FRICTION_COEFF: f64 = 1.0;
const DEFAULT_RESTITUTION_COEFF: f64 = 0.0;

/// Tagged cache for a derived Jacobian: recompute-on-read when stale.
#[derive(Debug, Clone)]
pub(crate) enum JacobianCache {
    Valid(Jacobian),
    Stale,
}

impl JacobianCache {
    fn get(&self) -> Option<&Jacobian> {
        match self {
            JacobianCache::Valid(jacobian) => Some(jacobian),
            JacobianCache::Stale => None,
        }
    }
}

/// One rigid body in a kinematic tree.
#[derive(Debug)]
pub struct Body {
    // identity
    id: u32,
    name: String,
    skeleton_index: usize,
    dependent_gen_coords: Vec<usize>,

    // topology
    parent: Option<usize>,
    children: Vec<usize>,
    joint: Box<dyn Joint>,

    // mass properties
    mass: f64,
    center_of_mass: Vec3,
    ixx: f64,
    iyy: f64,
    izz: f64,
    ixy: f64,
    ixz: f64,
    iyz: f64,
    /// Generalized spatial inertia, rebuilt from scratch on every
    /// mass-property change.
    inertia: SpatialMat,

    // surface properties
    friction_coeff: f64,
    restitution_coeff: f64,
    collidable: bool,
    colliding: bool,
    gravity_mode: bool,

    // attached geometry
    visual_shapes: Vec<Rc<Shape>>,
    collision_shapes: Vec<Rc<Shape>>,
    markers: Vec<Marker>,

    // cached kinematic/dynamic state (body frame unless noted)
    world_transform: SpatialTransform,
    velocity: SpatialVec,
    acceleration: SpatialVec,
    partial_acceleration: SpatialVec,
    body_force: SpatialVec,
    external_force: SpatialVec,
    gravity_force: SpatialVec,
    art_inertia: SpatialMat,
    art_inertia_implicit: SpatialMat,
    bias_force: SpatialVec,

    body_jacobian: JacobianCache,
    body_jacobian_time_deriv: JacobianCache,

    // impulse state
    velocity_change: SpatialVec,
    bias_impulse: SpatialVec,
    constraint_impulse: SpatialVec,
    impulse_force: SpatialVec,

    // per-pass scratch accumulators
    cg_dv: SpatialVec,
    cg_force: SpatialVec,
    g_force: SpatialVec,
    ext_force_agg: SpatialVec,
    m_dv: SpatialVec,
    m_force: SpatialVec,
    inv_m_bias: SpatialVec,
    inv_m_u: SpatialVec,
}

impl Body {
    pub(crate) fn new(name: impl Into<String>, joint: Box<dyn Joint>) -> Self {
        let mut body = Self {
            id: 0,
            name: name.into(),
            skeleton_index: 0,
            dependent_gen_coords: Vec::new(),
            parent: None,
            children: Vec::new(),
            joint,
            mass: 1.0,
            center_of_mass: Vec3::zeros(),
            ixx: 1.0,
            iyy: 1.0,
            izz: 1.0,
            ixy: 0.0,
            ixz: 0.0,
            iyz: 0.0,
            inertia: SpatialMat::identity(),
            friction_coeff: DEFAULT_FRICTION_COEFF,
            restitution_coeff: DEFAULT_RESTITUTION_COEFF,
            collidable: true,
            colliding: false,
            gravity_mode: true,
            visual_shapes: Vec::new(),
            collision_shapes: Vec::new(),
            markers: Vec::new(),
            world_transform: SpatialTransform::identity(),
            velocity: SpatialVec::zero(),
            acceleration: SpatialVec::zero(),
            partial_acceleration: SpatialVec::zero(),
            body_force: SpatialVec::zero(),
            external_force: SpatialVec::zero(),
            gravity_force: SpatialVec::zero(),
            art_inertia: SpatialMat::identity(),
            art_inertia_implicit: SpatialMat::identity(),
            bias_force: SpatialVec::zero(),
            body_jacobian: JacobianCache::Stale,
            body_jacobian_time_deriv: JacobianCache::Stale,
            velocity_change: SpatialVec::zero(),
            bias_impulse: SpatialVec::zero(),
            constraint_impulse: SpatialVec::zero(),
            impulse_force: SpatialVec::zero(),
            cg_dv: SpatialVec::zero(),
            cg_force: SpatialVec::zero(),
            g_force: SpatialVec::zero(),
            ext_force_agg: SpatialVec::zero(),
            m_dv: SpatialVec::zero(),
            m_force: SpatialVec::zero(),
            inv_m_bias: SpatialVec::zero(),
            inv_m_u: SpatialVec::zero(),
        };
        body.update_spatial_inertia();
        body
    }

    /// One-time initialization performed by the skeleton at insertion:
    /// assigns identity and builds the dependent-coordinate set as the
    /// parent's set extended by this joint's coordinate indices.
    pub(crate) fn init(
        &mut self,
        skeleton_index: usize,
        id: u32,
        parent: Option<usize>,
        parent_dependents: &[usize],
        first_coord_index: usize,
    ) {
        self.skeleton_index = skeleton_index;
        self.id = id;
        self.parent = parent;
        self.joint.set_index_in_skeleton(first_coord_index);

        let mut dependents = parent_dependents.to_vec();
        for k in 0..self.joint.num_dofs() {
            dependents.push(first_coord_index + k);
        }
        dependents.sort_unstable();
        debug_assert!(
            dependents.windows(2).all(|w| w[0] < w[1]),
            "duplicated dependent generalized-coordinate index"
        );
        self.dependent_gen_coords = dependents;
    }

    pub(crate) fn add_child(&mut self, child_index: usize) {
        self.children.push(child_index);
    }

    #[inline]
    fn child_in<'a>(&self, descendants: &'a [Body], child_index: usize) -> &'a Body {
        &descendants[child_index - self.skeleton_index - 1]
    }

    // ── identity & topology ──

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn skeleton_index(&self) -> usize {
        self.skeleton_index
    }

    pub fn parent_index(&self) -> Option<usize> {
        self.parent
    }

    pub fn child_indices(&self) -> &[usize] {
        &self.children
    }

    pub fn joint(&self) -> &dyn Joint {
        self.joint.as_ref()
    }

    pub fn joint_mut(&mut self) -> &mut dyn Joint {
        self.joint.as_mut()
    }

    pub fn num_dependent_gen_coords(&self) -> usize {
        self.dependent_gen_coords.len()
    }

    pub fn dependent_gen_coord(&self, array_index: usize) -> usize {
        self.dependent_gen_coords[array_index]
    }

    pub fn dependent_gen_coords(&self) -> &[usize] {
        &self.dependent_gen_coords
    }

    /// Whether this body's motion depends on the given generalized coordinate.
    pub fn depends_on(&self, gen_coord_index: usize) -> bool {
        self.dependent_gen_coords.binary_search(&gen_coord_index).is_ok()
    }

    /// Whether this body participates in impulse-based velocity corrections.
    pub fn is_impulse_responsible(&self, skeleton_is_mobile: bool) -> bool {
        skeleton_is_mobile && !self.dependent_gen_coords.is_empty()
    }

    // ── mass properties ──

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn set_mass(&mut self, mass: f64) {
        assert!(mass >= 0.0, "mass must be non-negative");
        self.mass = mass;
        self.update_spatial_inertia();
    }

    pub fn local_com(&self) -> Vec3 {
        self.center_of_mass
    }

    pub fn set_local_com(&mut self, com: Vec3) {
        self.center_of_mass = com;
        self.update_spatial_inertia();
    }

    /// Set the rotational inertia tensor about the body frame (six independent
    /// components).
    pub fn set_moment_of_inertia(
        &mut self,
        ixx: f64,
        iyy: f64,
        izz: f64,
        ixy: f64,
        ixz: f64,
        iyz: f64,
    ) {
        assert!(ixx >= 0.0 && iyy >= 0.0 && izz >= 0.0, "inertia diagonal must be non-negative");
        self.ixx = ixx;
        self.iyy = iyy;
        self.izz = izz;
        self.ixy = ixy;
        self.ixz = ixz;
        self.iyz = iyz;
        self.update_spatial_inertia();
    }

    /// The 6x6 generalized spatial inertia about the body frame origin.
    pub fn spatial_inertia(&self) -> &SpatialMat {
        &self.inertia
    }

    /// Rebuild the generalized spatial inertia from mass, center of mass, and
    /// rotational inertia:
    ///
    /// G = | I + m[c]×[c]ᵀ   m[c]× |
    ///     | m[c]×ᵀ           m·E  |
    fn update_spatial_inertia(&mut self) {
        let c = self.center_of_mass;
        let m = self.mass;

        let mr = c * m;
        let mr0r0 = mr.x * c.x;
        let mr1r1 = mr.y * c.y;
        let mr2r2 = mr.z * c.z;

        let i = &mut self.inertia.data;
        *i = arbor_math::Mat6::zeros();

        // rotational block with parallel-axis terms
        i[(0, 0)] = self.ixx + mr1r1 + mr2r2;
        i[(1, 1)] = self.iyy + mr2r2 + mr0r0;
        i[(2, 2)] = self.izz + mr0r0 + mr1r1;
        i[(0, 1)] = self.ixy - mr.x * c.y;
        i[(0, 2)] = self.ixz - mr.z * c.x;
        i[(1, 2)] = self.iyz - mr.y * c.z;
        i[(1, 0)] = i[(0, 1)];
        i[(2, 0)] = i[(0, 2)];
        i[(2, 1)] = i[(1, 2)];

        // coupling block m[c]× and its transpose
        let mcx = arbor_math::skew(&mr);
        for r in 0..3 {
            for col in 0..3 {
                i[(r, 3 + col)] = mcx[(r, col)];
                i[(3 + col, r)] = mcx[(r, col)];
            }
        }

        // translational block m·E
        i[(3, 3)] = m;
        i[(4, 4)] = m;
        i[(5, 5)] = m;
    }

    // ── surface properties ──

    pub fn friction_coeff(&self) -> f64 {
        self.friction_coeff
    }

    pub fn set_friction_coeff(&mut self, coeff: f64) {
        assert!(coeff >= 0.0, "friction coefficient must be non-negative");
        self.friction_coeff = coeff;
    }

    pub fn restitution_coeff(&self) -> f64 {
        self.restitution_coeff
    }

    pub fn set_restitution_coeff(&mut self, coeff: f64) {
        assert!(
            (0.0..=1.0).contains(&coeff),
            "restitution coefficient must be in [0, 1]"
        );
        self.restitution_coeff = coeff;
    }

    pub fn is_collidable(&self) -> bool {
        self.collidable
    }

    pub fn set_collidable(&mut self, collidable: bool) {
        self.collidable = collidable;
    }

    pub fn is_colliding(&self) -> bool {
        self.colliding
    }

    pub fn set_colliding(&mut self, colliding: bool) {
        self.colliding = colliding;
    }

    pub fn gravity_mode(&self) -> bool {
        self.gravity_mode
    }

    pub fn set_gravity_mode(&mut self, gravity_mode: bool) {
        self.gravity_mode = gravity_mode;
    }

    // ── shapes and markers ──

    pub fn add_visual_shape(&mut self, shape: Rc<Shape>) {
        self.visual_shapes.push(shape);
    }

    pub fn num_visual_shapes(&self) -> usize {
        self.visual_shapes.len()
    }

    pub fn visual_shape(&self, index: usize) -> &Rc<Shape> {
        &self.visual_shapes[index]
    }

    pub fn add_collision_shape(&mut self, shape: Rc<Shape>) {
        self.collision_shapes.push(shape);
    }

    pub fn num_collision_shapes(&self) -> usize {
        self.collision_shapes.len()
    }

    pub fn collision_shape(&self, index: usize) -> &Rc<Shape> {
        &self.collision_shapes[index]
    }

    pub fn add_marker(&mut self, marker: Marker) {
        self.markers.push(marker);
    }

    pub fn num_markers(&self) -> usize {
        self.markers.len()
    }

    pub fn marker(&self, index: usize) -> &Marker {
        &self.markers[index]
    }

    pub fn marker_world_position(&self, index: usize) -> Vec3 {
        self.world_transform.transform_point(&self.markers[index].offset)
    }

    // ── cached-state accessors ──

    pub fn world_transform(&self) -> &SpatialTransform {
        &self.world_transform
    }

    pub fn body_velocity(&self) -> &SpatialVec {
        &self.velocity
    }

    pub fn body_acceleration(&self) -> &SpatialVec {
        &self.acceleration
    }

    pub fn body_force(&self) -> &SpatialVec {
        &self.body_force
    }

    pub fn bias_force(&self) -> &SpatialVec {
        &self.bias_force
    }

    pub fn art_inertia(&self) -> &SpatialMat {
        &self.art_inertia
    }

    pub fn art_inertia_implicit(&self) -> &SpatialMat {
        &self.art_inertia_implicit
    }

    pub fn body_velocity_change(&self) -> &SpatialVec {
        &self.velocity_change
    }

    pub fn bias_impulse(&self) -> &SpatialVec {
        &self.bias_impulse
    }

    pub fn impulse_force(&self) -> &SpatialVec {
        &self.impulse_force
    }

    /// Frame used to re-express body-frame quantities at a world- or
    /// local-frame offset point.
    pub(crate) fn offset_frame(&self, offset: &Vec3, is_offset_local: bool) -> SpatialTransform {
        let mut frame = self.world_transform;
        frame.pos = if is_offset_local {
            self.world_transform.rot * -offset
        } else {
            -offset
        };
        frame
    }

    /// Spatial velocity re-expressed at an offset point.
    pub fn world_velocity(&self, offset: &Vec3, is_offset_local: bool) -> SpatialVec {
        self.offset_frame(offset, is_offset_local).apply_motion(&self.velocity)
    }

    /// Classical spatial acceleration re-expressed at an offset point.
    pub fn world_acceleration(&self, offset: &Vec3, is_offset_local: bool) -> SpatialVec {
        let classical = SpatialVec::new(
            self.acceleration.angular(),
            self.acceleration.linear()
                + self.velocity.angular().cross(&self.velocity.linear()),
        );
        self.offset_frame(offset, is_offset_local).apply_motion(&classical)
    }

    pub fn world_com(&self) -> Vec3 {
        self.world_transform.transform_point(&self.center_of_mass)
    }

    pub fn world_com_velocity(&self) -> Vec3 {
        self.world_velocity(&self.center_of_mass, true).linear()
    }

    pub fn world_com_acceleration(&self) -> Vec3 {
        self.world_acceleration(&self.center_of_mass, true).linear()
    }

    // ── kinematic propagation (root → leaves) ──

    /// Recompute the joint's local transform and Jacobian, then this body's
    /// world transform. Invalidates the body Jacobian caches.
    pub fn update_transform(&mut self, parent: Option<&Body>) {
        self.joint.update_local_transform();
        self.joint.update_local_jacobian();

        self.world_transform = match parent {
            Some(parent) => parent.world_transform.compose(self.joint.local_transform()),
            None => *self.joint.local_transform(),
        };
        debug_assert!(
            (self.world_transform.rot.determinant() - 1.0).abs() < 1e-6,
            "world transform must stay a rotation"
        );

        self.body_jacobian = JacobianCache::Stale;
        self.body_jacobian_time_deriv = JacobianCache::Stale;
    }

    /// Spatial velocity: parent velocity transported across the local
    /// transform plus the joint's contribution.
    pub fn update_velocity(&mut self, parent: Option<&Body>) {
        self.velocity = match parent {
            Some(parent) => self
                .joint
                .local_transform()
                .inv_apply_motion(&parent.velocity),
            None => SpatialVec::zero(),
        };
        self.joint.add_velocity_to(&mut self.velocity);
        debug_assert!(!self.velocity.has_nan());
    }

    /// Velocity-dependent bias acceleration, independent of joint
    /// acceleration.
    pub fn update_partial_acceleration(&mut self) {
        self.joint.update_local_jacobian_time_deriv();
        self.joint
            .set_partial_acceleration_to(&mut self.partial_acceleration, &self.velocity);
        debug_assert!(!self.partial_acceleration.has_nan());
    }

    /// Spatial acceleration from a known joint acceleration (inverse-dynamics
    /// direction).
    pub fn update_acceleration(&mut self, parent: Option<&Body>) {
        self.acceleration = match parent {
            Some(parent) => {
                self.joint
                    .local_transform()
                    .inv_apply_motion(&parent.acceleration)
                    + self.partial_acceleration
            }
            None => self.partial_acceleration,
        };
        self.joint.add_acceleration_to(&mut self.acceleration);
        debug_assert!(!self.acceleration.has_nan());
    }

    // ── articulated-body forward dynamics (passes 2 and 3) ──

    /// Articulated-body inertia: own spatial inertia plus every child's
    /// articulated inertia reduced through the child's joint.
    pub fn update_art_inertia(&mut self, descendants: &[Body], time_step: f64) {
        let mut art = self.inertia;
        let mut art_implicit = self.inertia;
        for &child_index in &self.children {
            let child = self.child_in(descendants, child_index);
            child
                .joint
                .add_child_art_inertia_to(&mut art, &child.art_inertia);
            child
                .joint
                .add_child_art_inertia_implicit_to(&mut art_implicit, &child.art_inertia_implicit);
        }
        self.art_inertia = art;
        self.art_inertia_implicit = art_implicit;
        debug_assert!(!self.art_inertia.has_nan());
        debug_assert!(!self.art_inertia_implicit.has_nan());

        self.joint.update_inv_proj_art_inertia(&self.art_inertia);
        self.joint
            .update_inv_proj_art_inertia_implicit(&self.art_inertia_implicit, time_step);
    }

    /// Bias force: gyroscopic, external, and gravity terms plus every child's
    /// bias force reduced through its joint; folds the result into the
    /// joint's total generalized force.
    pub fn update_bias_force(&mut self, descendants: &[Body], gravity: &Vec3, time_step: f64) {
        self.gravity_force = if self.gravity_mode {
            self.inertia
                .mul_vec(&self.world_transform.inv_rotate_linear(gravity))
        } else {
            SpatialVec::zero()
        };

        let momentum = self.inertia.mul_vec(&self.velocity);
        let mut bias =
            -self.velocity.cross_force(&momentum) - self.external_force - self.gravity_force;
        for &child_index in &self.children {
            let child = self.child_in(descendants, child_index);
            child.joint.add_child_bias_force_to(
                &mut bias,
                &child.art_inertia_implicit,
                &child.bias_force,
                &child.partial_acceleration,
            );
        }
        self.bias_force = bias;
        debug_assert!(!self.bias_force.has_nan());

        let projected_force =
            self.art_inertia_implicit.mul_vec(&self.partial_acceleration) + self.bias_force;
        self.joint.update_total_force(&projected_force, time_step);
    }

    /// Resolve the joint acceleration from the articulated inertia, then
    /// recompute this body's spatial acceleration with it.
    pub fn update_joint_and_body_acceleration(&mut self, parent: Option<&Body>) {
        match parent {
            Some(parent) => {
                self.joint
                    .update_acceleration(&self.art_inertia_implicit, &parent.acceleration);
                self.acceleration = self
                    .joint
                    .local_transform()
                    .inv_apply_motion(&parent.acceleration)
                    + self.partial_acceleration;
            }
            None => {
                self.joint
                    .update_acceleration(&self.art_inertia_implicit, &SpatialVec::zero());
                self.acceleration = self.partial_acceleration;
            }
        }
        self.joint.add_acceleration_to(&mut self.acceleration);
        debug_assert!(!self.acceleration.has_nan());
    }

    /// Net spatial force transmitted through the joint once the acceleration
    /// is resolved; reported to the joint as its wrench.
    pub fn update_transmitted_force(&mut self) {
        self.body_force =
            self.bias_force + self.art_inertia_implicit.mul_vec(&self.acceleration);
        self.joint.set_wrench(self.body_force);
        debug_assert!(!self.body_force.has_nan());
    }

    // ── recursive Newton-Euler inverse dynamics (leaves → root) ──

    /// Net spatial force from known accelerations plus children's net forces
    /// transported across their joints.
    pub fn update_body_force(
        &mut self,
        descendants: &[Body],
        gravity: &Vec3,
        with_external_forces: bool,
    ) {
        self.gravity_force = if self.gravity_mode {
            self.inertia
                .mul_vec(&self.world_transform.inv_rotate_linear(gravity))
        } else {
            SpatialVec::zero()
        };

        let mut force = self.inertia.mul_vec(&self.acceleration);
        if with_external_forces {
            force -= self.external_force;
        }
        force -= self.gravity_force;
        force -= self
            .velocity
            .cross_force(&self.inertia.mul_vec(&self.velocity));

        for &child_index in &self.children {
            let child = self.child_in(descendants, child_index);
            force += child
                .joint
                .local_transform()
                .apply_force(&child.body_force);
        }
        self.body_force = force;
        self.joint.set_wrench(force);
        debug_assert!(!self.body_force.has_nan());
    }

    /// Project the net force through the joint's local Jacobian to obtain the
    /// joint's generalized force.
    pub fn update_generalized_force(&mut self) {
        if self.joint.num_dofs() == 0 {
            return;
        }
        let jacobian = self.joint.local_jacobian();
        let tau = jacobian.transpose() * self.body_force.data;
        debug_assert!(tau.iter().all(|x| !x.is_nan()));
        self.joint.set_forces(tau.as_slice());
    }

    // ── system-vector aggregation (gravity, Coriolis, external) ──

    /// Gravity-force recursion: same bottom-up shape as inverse dynamics with
    /// only the gravity term, written into the joint's coordinate segment.
    pub fn aggregate_gravity_force(
        &mut self,
        descendants: &[Body],
        out: &mut DVec,
        gravity: &Vec3,
    ) {
        self.g_force = if self.gravity_mode {
            self.inertia
                .mul_vec(&self.world_transform.inv_rotate_linear(gravity))
        } else {
            SpatialVec::zero()
        };
        for &child_index in &self.children {
            let child = self.child_in(descendants, child_index);
            self.g_force += child.joint.local_transform().apply_force(&child.g_force);
        }

        let dofs = self.joint.num_dofs();
        if dofs > 0 {
            let segment = -(self.joint.local_jacobian().transpose() * self.g_force.data);
            out.rows_mut(self.joint.index_in_skeleton(), dofs)
                .copy_from(&segment);
        }
    }

    /// Top-down half of the combined Coriolis+gravity recursion: propagate
    /// the velocity-dependent acceleration term.
    pub fn update_combined_vector(&mut self, parent: Option<&Body>) {
        self.cg_dv = match parent {
            Some(parent) => {
                self.joint.local_transform().inv_apply_motion(&parent.cg_dv)
                    + self.partial_acceleration
            }
            None => self.partial_acceleration,
        };
    }

    /// Bottom-up half of the combined recursion. With a zero gravity argument
    /// this yields exactly the Coriolis/centrifugal vector.
    pub fn aggregate_combined_vector(
        &mut self,
        descendants: &[Body],
        out: &mut DVec,
        gravity: &Vec3,
    ) {
        self.gravity_force = if self.gravity_mode {
            self.inertia
                .mul_vec(&self.world_transform.inv_rotate_linear(gravity))
        } else {
            SpatialVec::zero()
        };

        let mut force = self.inertia.mul_vec(&self.cg_dv);
        force -= self.gravity_force;
        force -= self
            .velocity
            .cross_force(&self.inertia.mul_vec(&self.velocity));
        for &child_index in &self.children {
            let child = self.child_in(descendants, child_index);
            force += child.joint.local_transform().apply_force(&child.cg_force);
        }
        self.cg_force = force;

        let dofs = self.joint.num_dofs();
        if dofs > 0 {
            let segment = self.joint.local_jacobian().transpose() * self.cg_force.data;
            out.rows_mut(self.joint.index_in_skeleton(), dofs)
                .copy_from(&segment);
        }
    }

    /// Bottom-up aggregation of accumulated external forces into the
    /// generalized external-force vector.
    pub fn aggregate_external_forces(&mut self, descendants: &[Body], out: &mut DVec) {
        self.ext_force_agg = self.external_force;
        for &child_index in &self.children {
            let child = self.child_in(descendants, child_index);
            self.ext_force_agg += child
                .joint
                .local_transform()
                .apply_force(&child.ext_force_agg);
        }

        let dofs = self.joint.num_dofs();
        if dofs > 0 {
            let segment = self.joint.local_jacobian().transpose() * self.ext_force_agg.data;
            out.rows_mut(self.joint.index_in_skeleton(), dofs)
                .copy_from(&segment);
        }
    }

    // ── mass-matrix assembly ──

    /// Top-down: propagate the unit spatial acceleration seeded at one
    /// generalized coordinate.
    pub fn update_mass_matrix(&mut self, parent: Option<&Body>) {
        self.m_dv = SpatialVec::zero();
        if self.joint.num_dofs() > 0 {
            let seeded = self.joint.accelerations();
            self.m_dv.data += self.joint.local_jacobian() * seeded;
        }
        if let Some(parent) = parent {
            self.m_dv += self.joint.local_transform().inv_apply_motion(&parent.m_dv);
        }
        debug_assert!(!self.m_dv.has_nan());
    }

    /// Bottom-up: aggregate the resulting spatial forces and project through
    /// the local Jacobian to fill one mass-matrix column.
    pub fn aggregate_mass_matrix(&mut self, descendants: &[Body], out: &mut DMat, col: usize) {
        let mut force = self.inertia.mul_vec(&self.m_dv);
        for &child_index in &self.children {
            let child = self.child_in(descendants, child_index);
            force += child.joint.local_transform().apply_force(&child.m_force);
        }
        self.m_force = force;
        debug_assert!(!self.m_force.has_nan());

        let dofs = self.joint.num_dofs();
        if dofs > 0 {
            let segment = self.joint.local_jacobian().transpose() * self.m_force.data;
            let start = self.joint.index_in_skeleton();
            for k in 0..dofs {
                out[(start + k, col)] = segment[k];
            }
        }
    }

    /// Augmented variant: adds the damping and stiffness terms implicit
    /// integrators need.
    pub fn aggregate_aug_mass_matrix(
        &mut self,
        descendants: &[Body],
        out: &mut DMat,
        col: usize,
        time_step: f64,
    ) {
        let mut force = self.inertia.mul_vec(&self.m_dv);
        for &child_index in &self.children {
            let child = self.child_in(descendants, child_index);
            force += child.joint.local_transform().apply_force(&child.m_force);
        }
        self.m_force = force;

        let dofs = self.joint.num_dofs();
        if dofs > 0 {
            let segment = self.joint.local_jacobian().transpose() * self.m_force.data;
            let seeded = self.joint.accelerations();
            let start = self.joint.index_in_skeleton();
            for k in 0..dofs {
                let damping = self.joint.damping_coefficient(k);
                let stiffness = self.joint.spring_stiffness(k);
                out[(start + k, col)] = segment[k]
                    + damping * time_step * seeded[k]
                    + stiffness * time_step * time_step * seeded[k];
            }
        }
    }

    // ── inverse-mass-matrix assembly ──

    /// Bottom-up: accumulate the reduced bias quantity for one unit-force
    /// column without forming the mass matrix.
    pub fn update_inv_mass_matrix(&mut self, descendants: &[Body]) {
        let mut bias = SpatialVec::zero();
        for &child_index in &self.children {
            let child = self.child_in(descendants, child_index);
            child.joint.add_child_bias_force_for_inv_mass_matrix(
                &mut bias,
                &child.art_inertia,
                &child.inv_m_bias,
            );
        }
        self.inv_m_bias = bias;
        debug_assert!(!self.inv_m_bias.has_nan());
        self.joint.update_total_force_for_inv_mass_matrix(&bias);
    }

    /// Augmented bottom-up variant using the implicit articulated inertia.
    pub fn update_inv_aug_mass_matrix(&mut self, descendants: &[Body]) {
        let mut bias = SpatialVec::zero();
        for &child_index in &self.children {
            let child = self.child_in(descendants, child_index);
            child.joint.add_child_bias_force_for_inv_aug_mass_matrix(
                &mut bias,
                &child.art_inertia_implicit,
                &child.inv_m_bias,
            );
        }
        self.inv_m_bias = bias;
        self.joint.update_total_force_for_inv_mass_matrix(&bias);
    }

    /// Top-down: let the joint solve its small dense system and write its
    /// inverse-mass-matrix column segment, then transport the "U" quantity.
    pub fn aggregate_inv_mass_matrix(&mut self, parent: Option<&Body>, out: &mut DMat, col: usize) {
        match parent {
            Some(parent) => {
                self.joint
                    .inv_mass_matrix_segment(out, col, &self.art_inertia, &parent.inv_m_u);
                self.inv_m_u = self
                    .joint
                    .local_transform()
                    .inv_apply_motion(&parent.inv_m_u);
            }
            None => {
                self.joint.inv_mass_matrix_segment(
                    out,
                    col,
                    &self.art_inertia,
                    &SpatialVec::zero(),
                );
                self.inv_m_u = SpatialVec::zero();
            }
        }
        self.joint.add_inv_mass_matrix_segment_to(&mut self.inv_m_u);
    }

    /// Augmented top-down variant using the implicit articulated inertia.
    pub fn aggregate_inv_aug_mass_matrix(
        &mut self,
        parent: Option<&Body>,
        out: &mut DMat,
        col: usize,
    ) {
        match parent {
            Some(parent) => {
                self.joint.inv_aug_mass_matrix_segment(
                    out,
                    col,
                    &self.art_inertia_implicit,
                    &parent.inv_m_u,
                );
                self.inv_m_u = self
                    .joint
                    .local_transform()
                    .inv_apply_motion(&parent.inv_m_u);
            }
            None => {
                self.joint.inv_aug_mass_matrix_segment(
                    out,
                    col,
                    &self.art_inertia_implicit,
                    &SpatialVec::zero(),
                );
                self.inv_m_u = SpatialVec::zero();
            }
        }
        self.joint.add_inv_mass_matrix_segment_to(&mut self.inv_m_u);
    }

    // ── impulse-based constraint resolution ──

    /// Bias impulse: negated accumulated constraint impulse plus children's
    /// bias impulses reduced through their joints.
    pub fn update_bias_impulse(&mut self, descendants: &[Body]) {
        let mut bias = -self.constraint_impulse;
        for &child_index in &self.children {
            let child = self.child_in(descendants, child_index);
            child.joint.add_child_bias_impulse_to(
                &mut bias,
                &child.art_inertia,
                &child.bias_impulse,
            );
        }
        self.bias_impulse = bias;
        debug_assert!(!self.bias_impulse.has_nan());
        self.joint.update_total_impulse(&bias);
    }

    /// Joint and body velocity change, propagated exactly like velocity.
    pub fn update_joint_velocity_change(&mut self, parent: Option<&Body>) {
        match parent {
            Some(parent) => {
                self.joint
                    .update_velocity_change(&self.art_inertia, &parent.velocity_change);
                self.velocity_change = self
                    .joint
                    .local_transform()
                    .inv_apply_motion(&parent.velocity_change);
            }
            None => {
                self.joint
                    .update_velocity_change(&self.art_inertia, &SpatialVec::zero());
                self.velocity_change = SpatialVec::zero();
            }
        }
        self.joint.add_velocity_change_to(&mut self.velocity_change);
        debug_assert!(!self.velocity_change.has_nan());
    }

    /// Impulsive force resulting from the velocity change.
    pub fn update_body_imp_force_fwd_dyn(&mut self) {
        self.impulse_force = self.bias_impulse + self.art_inertia.mul_vec(&self.velocity_change);
        debug_assert!(!self.impulse_force.has_nan());
    }

    /// Fold the resolved velocity change into the joint's velocity,
    /// acceleration, and force, scaled by the timestep.
    pub fn update_constrained_joint_and_body_acceleration(&mut self, time_step: f64) {
        self.joint.update_velocity_with_velocity_change();
        self.joint.update_acceleration_with_velocity_change(time_step);
        self.joint.update_force_with_impulse(time_step);
    }

    /// Fold the velocity change and impulsive force into the body's
    /// acceleration and transmitted force.
    pub fn update_constrained_transmitted_force(&mut self, time_step: f64) {
        self.acceleration += self.velocity_change / time_step;
        self.body_force += self.impulse_force * time_step;
    }

    /// Zero every impulse accumulator on this body and its joint. Called once
    /// per step before constraints are accumulated.
    pub fn clear_constraint_impulse(&mut self) {
        self.velocity_change = SpatialVec::zero();
        self.bias_impulse = SpatialVec::zero();
        self.constraint_impulse = SpatialVec::zero();
        self.impulse_force = SpatialVec::zero();

        self.joint.clear_constraint_impulse();
        let zeros = vec![0.0; self.joint.num_dofs()];
        self.joint.set_constraint_impulses(&zeros);
    }

    // ── body Jacobian cache ──

    /// Mark both Jacobian caches stale. Called whenever this body's or an
    /// ancestor's configuration changes.
    pub(crate) fn invalidate_jacobians(&mut self) {
        self.body_jacobian = JacobianCache::Stale;
        self.body_jacobian_time_deriv = JacobianCache::Stale;
    }

    pub fn is_body_jacobian_dirty(&self) -> bool {
        self.body_jacobian.get().is_none()
    }

    pub fn is_body_jacobian_time_deriv_dirty(&self) -> bool {
        self.body_jacobian_time_deriv.get().is_none()
    }

    /// The cached body Jacobian, if valid.
    pub fn body_jacobian(&self) -> Option<&Jacobian> {
        self.body_jacobian.get()
    }

    pub fn body_jacobian_time_deriv(&self) -> Option<&Jacobian> {
        self.body_jacobian_time_deriv.get()
    }

    /// Rebuild the body Jacobian: the parent's Jacobian transported across
    /// the local transform, extended by the local joint Jacobian.
    pub(crate) fn compute_body_jacobian(&mut self, parent_jacobian: Option<&Jacobian>) {
        let num_dependent = self.dependent_gen_coords.len();
        let local_dofs = self.joint.num_dofs();
        let inherited = num_dependent - local_dofs;

        let mut jacobian = Jacobian::zeros(num_dependent);
        if let Some(parent_jacobian) = parent_jacobian {
            assert_eq!(
                parent_jacobian.ncols(),
                inherited,
                "parent jacobian must cover the inherited coordinates"
            );
            let transported = self
                .joint
                .local_transform()
                .inv_apply_motion_jacobian(parent_jacobian);
            jacobian.columns_mut(0, inherited).copy_from(&transported);
        }
        jacobian
            .columns_mut(inherited, local_dofs)
            .copy_from(&self.joint.local_jacobian());

        self.body_jacobian = JacobianCache::Valid(jacobian);
    }

    /// Rebuild the body-Jacobian time derivative; the inherited columns carry
    /// an extra spatial-cross-product correction. Requires a valid body
    /// Jacobian.
    pub(crate) fn compute_body_jacobian_time_deriv(&mut self, parent_deriv: Option<&Jacobian>) {
        let num_dependent = self.dependent_gen_coords.len();
        let local_dofs = self.joint.num_dofs();
        let inherited = num_dependent - local_dofs;

        let mut deriv = Jacobian::zeros(num_dependent);
        if let Some(parent_deriv) = parent_deriv {
            let transported = self
                .joint
                .local_transform()
                .inv_apply_motion_jacobian(parent_deriv);
            deriv.columns_mut(0, inherited).copy_from(&transported);

            let jacobian = self
                .body_jacobian
                .get()
                .expect("body jacobian must be valid before its time derivative")
                .clone();
            for i in 0..inherited {
                let column = SpatialVec::from_vec6(jacobian.column(i).into_owned());
                let correction = self.velocity.cross_motion(&column);
                let updated = deriv.column(i) - correction.data;
                deriv.set_column(i, &updated);
            }
        }
        deriv
            .columns_mut(inherited, local_dofs)
            .copy_from(&self.joint.local_jacobian_time_deriv());

        self.body_jacobian_time_deriv = JacobianCache::Valid(deriv);
    }

    // ── external loads and impulses ──

    /// Accumulate an external force applied at an offset point. Force and
    /// offset may each be given in the body's local frame or the world frame.
    pub fn add_ext_force(
        &mut self,
        force: &Vec3,
        offset: &Vec3,
        is_force_local: bool,
        is_offset_local: bool,
    ) {
        self.external_force += self.ext_force_as_spatial(force, offset, is_force_local, is_offset_local);
    }

    /// Replace the external-force accumulator with a single applied force.
    pub fn set_ext_force(
        &mut self,
        force: &Vec3,
        offset: &Vec3,
        is_force_local: bool,
        is_offset_local: bool,
    ) {
        self.external_force =
            self.ext_force_as_spatial(force, offset, is_force_local, is_offset_local);
    }

    fn ext_force_as_spatial(
        &self,
        force: &Vec3,
        offset: &Vec3,
        is_force_local: bool,
        is_offset_local: bool,
    ) -> SpatialVec {
        let mut frame = SpatialTransform::identity();
        frame.pos = if is_offset_local {
            *offset
        } else {
            self.world_transform.inv_transform_point(offset)
        };
        let local_force = if is_force_local {
            *force
        } else {
            self.world_transform.rot.transpose() * force
        };
        frame.apply_force(&SpatialVec::new(Vec3::zeros(), local_force))
    }

    pub fn add_ext_torque(&mut self, torque: &Vec3, is_local: bool) {
        let local_torque = if is_local {
            *torque
        } else {
            self.world_transform.rot.transpose() * torque
        };
        self.external_force += SpatialVec::new(local_torque, Vec3::zeros());
    }

    pub fn set_ext_torque(&mut self, torque: &Vec3, is_local: bool) {
        let local_torque = if is_local {
            *torque
        } else {
            self.world_transform.rot.transpose() * torque
        };
        let linear = self.external_force.linear();
        self.external_force = SpatialVec::new(local_torque, linear);
    }

    pub fn clear_external_forces(&mut self) {
        self.external_force = SpatialVec::zero();
    }

    pub fn external_force_local(&self) -> &SpatialVec {
        &self.external_force
    }

    pub fn external_force_global(&self) -> SpatialVec {
        self.world_transform.apply_force(&self.external_force)
    }

    /// Accumulate a constraint impulse applied at an offset point, with the
    /// same frame semantics as external forces.
    pub fn add_constraint_impulse(
        &mut self,
        impulse: &Vec3,
        offset: &Vec3,
        is_impulse_local: bool,
        is_offset_local: bool,
    ) {
        self.constraint_impulse +=
            self.ext_force_as_spatial(impulse, offset, is_impulse_local, is_offset_local);
    }

    pub fn add_constraint_impulse_spatial(&mut self, impulse: &SpatialVec) {
        debug_assert!(!impulse.has_nan());
        self.constraint_impulse += *impulse;
    }

    pub fn set_constraint_impulse(&mut self, impulse: SpatialVec) {
        debug_assert!(!impulse.has_nan());
        self.constraint_impulse = impulse;
    }

    pub fn constraint_impulse(&self) -> &SpatialVec {
        &self.constraint_impulse
    }

    // ── scalar queries ──

    pub fn kinetic_energy(&self) -> f64 {
        0.5 * self.velocity.dot(&self.inertia.mul_vec(&self.velocity))
    }

    /// Potential energy relative to the gravity direction.
    pub fn potential_energy(&self, gravity: &Vec3) -> f64 {
        -self.mass * self.world_transform.pos.dot(gravity)
    }

    pub fn linear_momentum(&self) -> Vec3 {
        self.inertia.mul_vec(&self.velocity).linear()
    }

    /// Angular momentum about an arbitrary pivot in the world frame.
    pub fn angular_momentum(&self, pivot: &Vec3) -> Vec3 {
        let frame = SpatialTransform::from_translation(*pivot);
        frame
            .inv_apply_force(&self.inertia.mul_vec(&self.velocity))
            .angular()
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::joint::FreeJoint;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn spatial_inertia_is_symmetric_for_any_valid_input(
            mass in 0.0..100.0_f64,
            cx in -5.0..5.0_f64,
            cy in -5.0..5.0_f64,
            cz in -5.0..5.0_f64,
            ixx in 0.0..10.0_f64,
            iyy in 0.0..10.0_f64,
            izz in 0.0..10.0_f64,
            ixy in -1.0..1.0_f64,
            ixz in -1.0..1.0_f64,
            iyz in -1.0..1.0_f64,
        ) {
            let mut body = Body::new("any", Box::new(FreeJoint::new()));
            body.set_mass(mass);
            body.set_local_com(Vec3::new(cx, cy, cz));
            body.set_moment_of_inertia(ixx, iyy, izz, ixy, ixz, iyz);

            let inertia = body.spatial_inertia().data;
            for i in 0..6 {
                for j in 0..6 {
                    prop_assert!((inertia[(i, j)] - inertia[(j, i)]).abs() < 1e-12,
                        "asymmetric at ({}, {})", i, j);
                }
            }
            for k in 3..6 {
                prop_assert!((inertia[(k, k)] - mass).abs() < 1e-12);
            }
            prop_assert!(inertia[(3, 4)].abs() < 1e-12);
            prop_assert!(inertia[(3, 5)].abs() < 1e-12);
            prop_assert!(inertia[(4, 5)].abs() < 1e-12);
        }
    }
}
