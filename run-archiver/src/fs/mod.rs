//! Filesystem helpers: walking, mount checks, capacity.

pub mod mounts;
pub mod space;
pub mod walker;

pub use mounts::MountGuard;
