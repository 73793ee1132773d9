//! Projective texturing: projector cameras cast images onto a shared scene,
//! occluded by per-projector depth maps.

pub mod attributes;
pub mod camera;
pub mod config;
pub mod depth;
pub mod error;
pub mod keyframe;
pub mod loader;
pub mod material;
pub mod mesh;
pub mod operator;
pub mod projection;
pub mod records;
pub mod scene;
pub mod stage;

pub use camera::{Bounds, Euler, EulerOrder, ProjectorCamera, ProjectorKind};
pub use depth::{DepthCapture, DepthMap, RasterDepthCapture};
pub use operator::{CameraMode, CameraOperator};
pub use projection::{Projection, ProjectionId, ProjectionSettings};
pub use stage::{FrameReport, Stage};
