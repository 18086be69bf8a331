//! ipod-sync - desktop library to iPod Classic/Nano synchronizer
//!
//! Mirrors a music library onto the device by reading and writing its
//! databases directly: the iTunesDB chunk codec, the device signature
//! algorithms, and a fingerprint-keyed sync pipeline that keeps the
//! filesystem, database, and mapping file consistent.

pub mod artwork;
pub mod device;
pub mod diff;
pub mod error;
pub mod fingerprint;
pub mod integrity;
pub mod itunesdb;
pub mod mapping;
pub mod metadata;
pub mod model;
pub mod playcounts;
pub mod signer;
pub mod sync;

pub use error::SyncError;
pub use sync::{CancelFlag, SyncConfig, SyncPipeline};
