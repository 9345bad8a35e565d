//! Centralized constants for the appm worker.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod paths;
pub mod probe;
pub mod state;
pub mod thirdparty;
