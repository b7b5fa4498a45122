//! Output generation for pipeline artifacts.
//!
//! # Submodules
//!
//! - [`json`]: persists raw routed results (and reads them back for replay)
//!   and writes formatted bundles for downstream consumption

pub mod json;
