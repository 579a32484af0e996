//! # fxsync testkit
//!
//! Test utilities for fxsync.
//!
//! This crate provides:
//! - Fixtures for replicas, identifiers and common streams
//! - Property-based test generators using proptest
//! - An in-memory [`FakeServer`] implementing `RopTransport`
//! - Hex test vectors for the wire formats
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fxsync_testkit::prelude::*;
//!
//! #[test]
//! fn downloads_inbox() {
//!     let fixture = InboxFixture::new();
//!     let server = FakeServer::new(fixture_replica());
//!     // ... drive a session against `server`
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod server;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::server::*;
    pub use crate::vectors::*;
}

pub use fixtures::*;
pub use generators::*;
pub use server::*;
pub use vectors::*;
