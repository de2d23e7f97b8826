//! # tunesmith-core
//!
//! Shared vocabulary for the tunesmith workspace: generation request records,
//! the websocket wire protocol, and the error taxonomy every other crate
//! reports through.

pub mod error;
pub mod manifest;
pub mod protocol;

pub use error::TuneError;
pub use manifest::{GenerationParams, GenerationRequest, TuneId, TuneSnapshot};
