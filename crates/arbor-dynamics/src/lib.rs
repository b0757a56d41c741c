//! Recursive articulated rigid-body dynamics over a kinematic tree.
//!
//! A [`Skeleton`] owns an arena of [`Body`] nodes, each connected to its
//! parent by a [`Joint`]. The skeleton drives the recursive passes (kinematic
//! propagation, articulated-body forward dynamics, recursive Newton-Euler
//! inverse dynamics, mass-matrix and inverse-mass-matrix assembly, impulse
//! propagation); each body implements the per-node step of every pass.

pub mod body;
pub mod error;
pub mod joint;
pub mod shape;
pub mod skeleton;

pub use body::Body;
pub use error::{DynamicsError, Result};
pub use joint::{
    BallJoint, FixedJoint, FreeJoint, Joint, PrismaticJoint, RevoluteJoint,
};
pub use shape::{Marker, Shape};
pub use skeleton::{InverseKinematicsPolicy, Skeleton};
