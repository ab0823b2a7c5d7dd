//! `platformer_shared`
//!
//! Types used by both client and server.
//!
//! Design goals:
//! - One wire format, defined once (`protocol`).
//! - Plain serde configs with defaults (`config`).
//! - No `unsafe`.

pub mod config;
pub mod math;
pub mod protocol;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::math::*;
    pub use crate::protocol::*;
}
