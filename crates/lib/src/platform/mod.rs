//! Host platform detection and well-known directories.

pub mod os;
pub mod paths;
