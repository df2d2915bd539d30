//! Reelsmith Template Model
//!
//! Defines the data contracts for one compile:
//! - **Descriptor:** global toggles, ordered sections, timed audio clips,
//!   and overlays for one output video
//! - **Project:** directories, audio configuration, and overrides supplied
//!   by the caller
//! - **Result:** the final video path plus the asset manifest
//!
//! Everything here is data. Parsing is serde; the engine crate owns all
//! filesystem and subprocess work.

pub mod descriptor;
pub mod project;

pub use descriptor::*;
pub use project::*;
