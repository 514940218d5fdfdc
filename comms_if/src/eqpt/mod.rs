//! # Equipment Interface
//!
//! This module defines the interface structures which describe the camera equipment's frames and
//! status to servers and clients.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod cam;
