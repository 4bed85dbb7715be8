#![doc = include_str!("../README.md")]
#![deny(missing_docs)]

#[doc(inline)]
pub use dtm_image as image;

#[doc(inline)]
pub use dtm_3d as k3d;

#[doc(inline)]
pub use dtm_dnn as dnn;

#[doc(inline)]
pub use dtm_viz as viz;

/// The image to mesh and heightmap pipeline.
pub mod pipeline;
