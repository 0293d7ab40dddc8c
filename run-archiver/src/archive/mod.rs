//! Bundle packaging and verification.

pub mod builder;
pub mod packager;
pub mod verify;

pub use builder::{ArchiveBuilder, ArchiveBundle, ArchiveOptions};
pub use packager::{Compression, Packager, TarPackager};
pub use verify::verify_bundle;
