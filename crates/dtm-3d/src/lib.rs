#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Geometry capabilities used by the reconstruction pipeline.
pub mod backend;

/// Point cloud construction from elevation grids.
pub mod builder;

/// Error types for the 3d module.
pub mod error;

/// I/O utilities for reading and writing meshes.
pub mod io;

/// Linear algebra utilities.
pub mod linalg;

/// Iso-surface extraction from scalar volumes.
pub mod marching_cubes;

/// Triangle mesh type and mesh hygiene operations.
pub mod mesh;

/// Normal estimation and orientation.
pub mod normals;

/// Point cloud type.
pub mod pointcloud;

/// Poisson surface reconstruction.
pub mod poisson;

/// 3D transforms algorithms.
pub mod transforms;

pub use crate::error::Geometry3dError;
