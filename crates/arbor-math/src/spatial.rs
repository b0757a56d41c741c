//! 6D spatial algebra following Featherstone's "Rigid Body Dynamics Algorithms".
//!
//! Convention: spatial vectors are [angular; linear] (Featherstone order).
//! A spatial motion vector (twist): [ω; v]
//! A spatial force vector (wrench): [τ; f]
//!
//! `SpatialTransform` is a rigid *pose*: the rotation and origin of a local
//! frame expressed in its parent frame. The four adjoint operators re-express
//! twists and wrenches between the two frames:
//!
//! - `apply_motion`     — Ad(T, v):     twist, local → parent
//! - `inv_apply_motion` — AdInv(T, v):  twist, parent → local
//! - `apply_force`      — dAdInv(T, f): wrench, local → parent
//! - `inv_apply_force`  — dAd(T, f):    wrench, parent → local

use crate::{skew, Jacobian, Mat3, Mat6, Vec3, Vec6};
use nalgebra as na;

/// 6D spatial vector — either a motion vector (twist) or force vector (wrench).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialVec {
    /// The underlying 6D vector [angular(3); linear(3)].
    pub data: Vec6,
}

impl SpatialVec {
    /// Create from angular and linear parts.
    #[inline]
    pub fn new(angular: Vec3, linear: Vec3) -> Self {
        Self {
            data: Vec6::new(
                angular.x, angular.y, angular.z, linear.x, linear.y, linear.z,
            ),
        }
    }

    /// Zero spatial vector.
    #[inline]
    pub fn zero() -> Self {
        Self {
            data: Vec6::zeros(),
        }
    }

    /// Wrap an existing 6D vector.
    #[inline]
    pub fn from_vec6(data: Vec6) -> Self {
        Self { data }
    }

    /// Angular (top 3) component.
    #[inline]
    pub fn angular(&self) -> Vec3 {
        Vec3::new(self.data[0], self.data[1], self.data[2])
    }

    /// Linear (bottom 3) component.
    #[inline]
    pub fn linear(&self) -> Vec3 {
        Vec3::new(self.data[3], self.data[4], self.data[5])
    }

    /// Spatial cross product for motion vectors: ad(v, w).
    /// Used in velocity propagation and partial-acceleration terms.
    pub fn cross_motion(&self, other: &SpatialVec) -> SpatialVec {
        let w = self.angular();
        let v = self.linear();
        let w2 = other.angular();
        let v2 = other.linear();
        SpatialVec::new(w.cross(&w2), w.cross(&v2) + v.cross(&w2))
    }

    /// Spatial cross product for force vectors: dad(v, f).
    /// Used in Coriolis/gyroscopic force computation.
    pub fn cross_force(&self, other: &SpatialVec) -> SpatialVec {
        let w = self.angular();
        let v = self.linear();
        let t = other.angular();
        let f = other.linear();
        SpatialVec::new(w.cross(&t) + v.cross(&f), w.cross(&f))
    }

    /// Dot product of two spatial vectors.
    #[inline]
    pub fn dot(&self, other: &SpatialVec) -> f64 {
        self.data.dot(&other.data)
    }

    /// True if any component is NaN.
    #[inline]
    pub fn has_nan(&self) -> bool {
        self.data.iter().any(|x| x.is_nan())
    }
}

impl std::ops::Add for SpatialVec {
    type Output = SpatialVec;
    #[inline]
    fn add(self, rhs: SpatialVec) -> SpatialVec {
        SpatialVec {
            data: self.data + rhs.data,
        }
    }
}

impl std::ops::AddAssign for SpatialVec {
    #[inline]
    fn add_assign(&mut self, rhs: SpatialVec) {
        self.data += rhs.data;
    }
}

impl std::ops::Sub for SpatialVec {
    type Output = SpatialVec;
    #[inline]
    fn sub(self, rhs: SpatialVec) -> SpatialVec {
        SpatialVec {
            data: self.data - rhs.data,
        }
    }
}

impl std::ops::SubAssign for SpatialVec {
    #[inline]
    fn sub_assign(&mut self, rhs: SpatialVec) {
        self.data -= rhs.data;
    }
}

impl std::ops::Mul<f64> for SpatialVec {
    type Output = SpatialVec;
    #[inline]
    fn mul(self, rhs: f64) -> SpatialVec {
        SpatialVec {
            data: self.data * rhs,
        }
    }
}

impl std::ops::Div<f64> for SpatialVec {
    type Output = SpatialVec;
    #[inline]
    fn div(self, rhs: f64) -> SpatialVec {
        SpatialVec {
            data: self.data / rhs,
        }
    }
}

impl std::ops::Neg for SpatialVec {
    type Output = SpatialVec;
    #[inline]
    fn neg(self) -> SpatialVec {
        SpatialVec { data: -self.data }
    }
}

/// 6x6 spatial matrix (articulated inertias, generalized spatial inertia).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialMat {
    pub data: Mat6,
}

impl SpatialMat {
    /// Create from a 6x6 nalgebra matrix.
    #[inline]
    pub fn from_mat6(data: Mat6) -> Self {
        Self { data }
    }

    /// Zero matrix.
    #[inline]
    pub fn zero() -> Self {
        Self {
            data: Mat6::zeros(),
        }
    }

    /// Identity matrix.
    #[inline]
    pub fn identity() -> Self {
        Self {
            data: Mat6::identity(),
        }
    }

    /// Multiply by a spatial vector.
    #[inline]
    pub fn mul_vec(&self, v: &SpatialVec) -> SpatialVec {
        SpatialVec {
            data: self.data * v.data,
        }
    }

    /// True if any entry is NaN.
    #[inline]
    pub fn has_nan(&self) -> bool {
        self.data.iter().any(|x| x.is_nan())
    }
}

impl std::ops::Add for SpatialMat {
    type Output = SpatialMat;
    #[inline]
    fn add(self, rhs: SpatialMat) -> SpatialMat {
        SpatialMat {
            data: self.data + rhs.data,
        }
    }
}

impl std::ops::AddAssign for SpatialMat {
    #[inline]
    fn add_assign(&mut self, rhs: SpatialMat) {
        self.data += rhs.data;
    }
}

impl std::ops::Sub for SpatialMat {
    type Output = SpatialMat;
    #[inline]
    fn sub(self, rhs: SpatialMat) -> SpatialMat {
        SpatialMat {
            data: self.data - rhs.data,
        }
    }
}

/// Rigid pose of a local frame in its parent frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialTransform {
    /// Rotation taking local-frame coordinates into parent-frame coordinates.
    pub rot: Mat3,
    /// Origin of the local frame expressed in the parent frame.
    pub pos: Vec3,
}

impl SpatialTransform {
    /// Create from rotation matrix and translation.
    pub fn new(rot: Mat3, pos: Vec3) -> Self {
        Self { rot, pos }
    }

    /// Identity pose.
    pub fn identity() -> Self {
        Self {
            rot: Mat3::identity(),
            pos: Vec3::zeros(),
        }
    }

    /// Pure translation.
    pub fn from_translation(pos: Vec3) -> Self {
        Self {
            rot: Mat3::identity(),
            pos,
        }
    }

    /// Pure rotation.
    pub fn from_rotation(rot: Mat3) -> Self {
        Self {
            rot,
            pos: Vec3::zeros(),
        }
    }

    /// Pure rotation about the X axis.
    pub fn rot_x(angle: f64) -> Self {
        let (s, c) = angle.sin_cos();
        Self::from_rotation(Mat3::new(1.0, 0.0, 0.0, 0.0, c, -s, 0.0, s, c))
    }

    /// Pure rotation about the Y axis.
    pub fn rot_y(angle: f64) -> Self {
        let (s, c) = angle.sin_cos();
        Self::from_rotation(Mat3::new(c, 0.0, s, 0.0, 1.0, 0.0, -s, 0.0, c))
    }

    /// Pure rotation about the Z axis.
    pub fn rot_z(angle: f64) -> Self {
        let (s, c) = angle.sin_cos();
        Self::from_rotation(Mat3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0))
    }

    /// Rotation about an arbitrary (unit) axis.
    pub fn rot_axis(axis: &na::Unit<Vec3>, angle: f64) -> Self {
        Self::from_rotation(*na::Rotation3::from_axis_angle(axis, angle).matrix())
    }

    /// Compose two poses: `self ∘ other`, where `other` is a pose relative to
    /// `self`'s frame. The result expresses `other`'s frame in `self`'s parent.
    pub fn compose(&self, other: &SpatialTransform) -> SpatialTransform {
        SpatialTransform {
            rot: self.rot * other.rot,
            pos: self.pos + self.rot * other.pos,
        }
    }

    /// Inverse pose.
    pub fn inverse(&self) -> SpatialTransform {
        let rt = self.rot.transpose();
        SpatialTransform {
            rot: rt,
            pos: -(rt * self.pos),
        }
    }

    /// Map a point from the local frame to the parent frame.
    #[inline]
    pub fn transform_point(&self, p: &Vec3) -> Vec3 {
        self.rot * p + self.pos
    }

    /// Map a point from the parent frame to the local frame.
    #[inline]
    pub fn inv_transform_point(&self, p: &Vec3) -> Vec3 {
        self.rot.transpose() * (p - self.pos)
    }

    /// Ad(T, v): re-express a twist from the local frame in the parent frame.
    pub fn apply_motion(&self, v: &SpatialVec) -> SpatialVec {
        let w = self.rot * v.angular();
        SpatialVec::new(w, self.rot * v.linear() + self.pos.cross(&w))
    }

    /// AdInv(T, v): re-express a twist from the parent frame in the local frame.
    pub fn inv_apply_motion(&self, v: &SpatialVec) -> SpatialVec {
        let rt = self.rot.transpose();
        SpatialVec::new(
            rt * v.angular(),
            rt * (v.linear() - self.pos.cross(&v.angular())),
        )
    }

    /// dAdInv(T, f): re-express a wrench from the local frame in the parent frame.
    pub fn apply_force(&self, f: &SpatialVec) -> SpatialVec {
        let lin = self.rot * f.linear();
        SpatialVec::new(self.rot * f.angular() + self.pos.cross(&lin), lin)
    }

    /// dAd(T, f): re-express a wrench from the parent frame in the local frame.
    pub fn inv_apply_force(&self, f: &SpatialVec) -> SpatialVec {
        let rt = self.rot.transpose();
        SpatialVec::new(
            rt * (f.angular() - self.pos.cross(&f.linear())),
            rt * f.linear(),
        )
    }

    /// Rotation-only inverse transform of a parent-frame 3-vector into a
    /// linear twist [0; Rᵀu]. Used to express the gravity direction in a body
    /// frame before multiplying by the spatial inertia.
    pub fn inv_rotate_linear(&self, u: &Vec3) -> SpatialVec {
        SpatialVec::new(Vec3::zeros(), self.rot.transpose() * u)
    }

    /// The 6x6 matrix of `apply_motion` (local → parent twist map).
    ///
    /// X = |  R      0 |
    ///     | [p]×R   R |
    pub fn motion_matrix(&self) -> Mat6 {
        let lower_left = skew(&self.pos) * self.rot;
        let mut m = Mat6::zeros();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rot);
        m.fixed_view_mut::<3, 3>(3, 0).copy_from(&lower_left);
        m.fixed_view_mut::<3, 3>(3, 3).copy_from(&self.rot);
        m
    }

    /// The 6x6 matrix of `inv_apply_motion` (parent → local twist map).
    ///
    /// X = |  Rᵀ       0  |
    ///     | -Rᵀ[p]×   Rᵀ |
    pub fn inv_motion_matrix(&self) -> Mat6 {
        let rt = self.rot.transpose();
        let lower_left = -rt * skew(&self.pos);
        let mut m = Mat6::zeros();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&rt);
        m.fixed_view_mut::<3, 3>(3, 0).copy_from(&lower_left);
        m.fixed_view_mut::<3, 3>(3, 3).copy_from(&rt);
        m
    }

    /// Congruence-transform a 6x6 inertia expressed in the local frame so it
    /// is expressed in the parent frame: Xᵀ I X with X the parent → local
    /// twist map. Used to fold a child's articulated inertia into its parent.
    pub fn transform_inertia(&self, inertia: &Mat6) -> Mat6 {
        let x = self.inv_motion_matrix();
        x.transpose() * inertia * x
    }

    /// Column-wise Ad(T, ·) of a Jacobian.
    pub fn apply_motion_jacobian(&self, j: &Jacobian) -> Jacobian {
        let mut out = Jacobian::zeros(j.ncols());
        for (i, col) in j.column_iter().enumerate() {
            let v = SpatialVec::from_vec6(col.into_owned());
            out.set_column(i, &self.apply_motion(&v).data);
        }
        out
    }

    /// Column-wise AdInv(T, ·) of a Jacobian.
    pub fn inv_apply_motion_jacobian(&self, j: &Jacobian) -> Jacobian {
        let mut out = Jacobian::zeros(j.ncols());
        for (i, col) in j.column_iter().enumerate() {
            let v = SpatialVec::from_vec6(col.into_owned());
            out.set_column(i, &self.inv_apply_motion(&v).data);
        }
        out
    }

    /// se(3) logarithm of the pose, as a twist [ω; V⁻¹p].
    pub fn log_map(&self) -> SpatialVec {
        let w = na::Rotation3::from_matrix_unchecked(self.rot).scaled_axis();
        let theta = w.norm();
        let wx = skew(&w);
        let v_inv = if theta < 1e-9 {
            Mat3::identity() - wx * 0.5 + wx * wx * (1.0 / 12.0)
        } else {
            let coeff =
                (1.0 - theta * theta.sin() / (2.0 * (1.0 - theta.cos()))) / (theta * theta);
            Mat3::identity() - wx * 0.5 + wx * wx * coeff
        };
        SpatialVec::new(w, v_inv * self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cross_motion_of_unit_axes() {
        let v1 = SpatialVec::new(Vec3::new(0.0, 0.0, 1.0), Vec3::zeros());
        let v2 = SpatialVec::new(Vec3::new(1.0, 0.0, 0.0), Vec3::zeros());
        let result = v1.cross_motion(&v2);
        // [0,0,1] × [1,0,0] = [0,1,0]
        assert_relative_eq!(result.angular().y, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn identity_transform_is_noop() {
        let xf = SpatialTransform::identity();
        let v = SpatialVec::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0));
        assert_relative_eq!(xf.apply_motion(&v).data, v.data, epsilon = 1e-12);
        assert_relative_eq!(xf.apply_force(&v).data, v.data, epsilon = 1e-12);
    }

    #[test]
    fn motion_transform_roundtrip() {
        let xf = SpatialTransform::rot_z(0.5).compose(&SpatialTransform::from_translation(
            Vec3::new(1.0, 2.0, 3.0),
        ));
        let v = SpatialVec::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0));
        let back = xf.inv_apply_motion(&xf.apply_motion(&v));
        assert_relative_eq!(back.data, v.data, epsilon = 1e-10);
    }

    #[test]
    fn force_transform_roundtrip() {
        let xf = SpatialTransform::rot_x(-1.2).compose(&SpatialTransform::from_translation(
            Vec3::new(0.3, -0.4, 2.0),
        ));
        let f = SpatialVec::new(Vec3::new(0.5, -1.0, 2.0), Vec3::new(-3.0, 0.1, 0.7));
        let back = xf.inv_apply_force(&xf.apply_force(&f));
        assert_relative_eq!(back.data, f.data, epsilon = 1e-10);
    }

    #[test]
    fn compose_translations() {
        let a = SpatialTransform::from_translation(Vec3::new(1.0, 0.0, 0.0));
        let b = SpatialTransform::from_translation(Vec3::new(0.0, 2.0, 0.0));
        let ab = a.compose(&b);
        assert_relative_eq!(ab.pos, Vec3::new(1.0, 2.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn point_transform_roundtrip() {
        let xf = SpatialTransform::rot_y(0.7).compose(&SpatialTransform::from_translation(
            Vec3::new(-1.0, 0.5, 2.0),
        ));
        let p = Vec3::new(0.2, -0.8, 1.5);
        let back = xf.inv_transform_point(&xf.transform_point(&p));
        assert_relative_eq!(back, p, epsilon = 1e-12);
    }

    #[test]
    fn log_map_of_pure_translation() {
        let xf = SpatialTransform::from_translation(Vec3::new(1.0, -2.0, 3.0));
        let xi = xf.log_map();
        assert_relative_eq!(xi.angular(), Vec3::zeros(), epsilon = 1e-12);
        assert_relative_eq!(xi.linear(), Vec3::new(1.0, -2.0, 3.0), epsilon = 1e-12);
    }

    #[test]
    fn log_map_of_pure_rotation() {
        let xf = SpatialTransform::rot_z(0.8);
        let xi = xf.log_map();
        assert_relative_eq!(xi.angular(), Vec3::new(0.0, 0.0, 0.8), epsilon = 1e-10);
        assert_relative_eq!(xi.linear(), Vec3::zeros(), epsilon = 1e-12);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    const EPS: f64 = 1e-9;

    fn arb_pos() -> impl Strategy<Value = Vec3> {
        (-10.0..10.0_f64, -10.0..10.0_f64, -10.0..10.0_f64)
            .prop_map(|(x, y, z)| Vec3::new(x, y, z))
    }

    fn arb_angle() -> impl Strategy<Value = f64> {
        -std::f64::consts::PI..std::f64::consts::PI
    }

    fn arb_unit_axis() -> impl Strategy<Value = na::Unit<Vec3>> {
        (-1.0..1.0_f64, -1.0..1.0_f64, -1.0..1.0_f64)
            .prop_filter("non-zero axis", |(x, y, z)| x * x + y * y + z * z > 0.01)
            .prop_map(|(x, y, z)| na::Unit::new_normalize(Vec3::new(x, y, z)))
    }

    fn arb_transform() -> impl Strategy<Value = SpatialTransform> {
        (arb_unit_axis(), arb_angle(), arb_pos()).prop_map(|(axis, angle, pos)| {
            SpatialTransform::rot_axis(&axis, angle)
                .compose(&SpatialTransform::from_translation(pos))
        })
    }

    fn arb_spatial_vec() -> impl Strategy<Value = SpatialVec> {
        (arb_pos(), arb_pos()).prop_map(|(a, l)| SpatialVec::new(a, l))
    }

    proptest! {
        #[test]
        fn compose_with_inverse_is_identity(xf in arb_transform()) {
            let result = xf.compose(&xf.inverse());
            let id = SpatialTransform::identity();
            for i in 0..3 {
                for j in 0..3 {
                    prop_assert!((result.rot[(i, j)] - id.rot[(i, j)]).abs() < EPS);
                }
                prop_assert!((result.pos[i] - id.pos[i]).abs() < EPS);
            }
        }

        #[test]
        fn compose_is_associative(
            a in arb_transform(),
            b in arb_transform(),
            c in arb_transform(),
        ) {
            let ab_c = a.compose(&b).compose(&c);
            let a_bc = a.compose(&b.compose(&c));
            for i in 0..3 {
                for j in 0..3 {
                    prop_assert!((ab_c.rot[(i, j)] - a_bc.rot[(i, j)]).abs() < EPS);
                }
                prop_assert!((ab_c.pos[i] - a_bc.pos[i]).abs() < EPS);
            }
        }

        #[test]
        fn adjoint_duality_preserves_power(
            xf in arb_transform(),
            v in arb_spatial_vec(),
            f in arb_spatial_vec(),
        ) {
            // ⟨dAdInv(T, f), Ad(T, v)⟩ = ⟨f, v⟩: re-expressing a wrench/twist
            // pair in another frame cannot change the power they produce.
            let power_local = f.dot(&v);
            let power_parent = xf.apply_force(&f).dot(&xf.apply_motion(&v));
            let scale = power_local.abs().max(1.0);
            prop_assert!((power_local - power_parent).abs() < 1e-9 * scale,
                "{} vs {}", power_local, power_parent);
        }

        #[test]
        fn inv_motion_matrix_matches_inv_apply(xf in arb_transform(), v in arb_spatial_vec()) {
            let via_method = xf.inv_apply_motion(&v);
            let via_matrix = SpatialVec::from_vec6(xf.inv_motion_matrix() * v.data);
            for i in 0..6 {
                prop_assert!((via_method.data[i] - via_matrix.data[i]).abs() < EPS);
            }
        }

        #[test]
        fn transformed_inertia_preserves_energy(
            xf in arb_transform(),
            v in arb_spatial_vec(),
            mass in 0.1..50.0_f64,
        ) {
            // vᵀ (Xᵀ I X) v in the parent frame equals (Xv)ᵀ I (Xv) locally.
            let inertia = Mat6::identity() * mass;
            let transformed = xf.transform_inertia(&inertia);
            let v_local = xf.inv_apply_motion(&v);
            let e_parent = v.data.dot(&(transformed * v.data));
            let e_local = v_local.data.dot(&(inertia * v_local.data));
            let scale = e_local.abs().max(1.0);
            prop_assert!((e_parent - e_local).abs() < 1e-9 * scale,
                "{} vs {}", e_parent, e_local);
        }
    }
}
