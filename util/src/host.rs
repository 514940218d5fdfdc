//! Host platform utility functions

use std::path::PathBuf;

/// Environment variable pointing at the root of the camera software tree.
pub const SW_ROOT_VAR: &str = "CAM_SW_ROOT";

/// Get the software root directory.
///
/// This is the directory containing `params/` and `sessions/`. If `CAM_SW_ROOT` is not set the
/// current working directory is used.
pub fn get_sw_root() -> std::io::Result<PathBuf> {
    match std::env::var_os(SW_ROOT_VAR) {
        Some(root) => Ok(PathBuf::from(root)),
        None => std::env::current_dir(),
    }
}
