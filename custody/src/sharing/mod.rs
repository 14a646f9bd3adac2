//! # Threshold Secret Sharing
//!
//! Splits the master key into guardian shares and puts it back together.
//! See [`shamir`] for the scheme itself and [`sealed`] for how shares are
//! kept at rest before a guardian holds them.

pub mod sealed;
pub mod shamir;

pub use sealed::{pool_key, SealedShare};
pub use shamir::{combine, split, ShamirError, Share, SharingPolicy};
