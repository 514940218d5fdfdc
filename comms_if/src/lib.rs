//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the camera software.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Command side channel: lexer and dispatch table
pub mod cmd;

/// Frame and status definitions for the camera equipment
pub mod eqpt;

/// Network module
pub mod net;
