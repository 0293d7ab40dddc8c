//! Durable-storage transfer of finished bundles.

pub mod copier;
pub mod progress;
pub mod verifier;

pub use copier::{Copier, FsCopier};
pub use verifier::{TransferOutcome, TransferStatus, TransferVerifier};
