//! # tunesmith-stem
//!
//! Runs generations. A [`Driver`] takes a request from the [`RequestStore`],
//! streams the engine's tokens through an [`Assembler`] into tune text,
//! normalizes the finished document and writes it to the [`ArtifactStore`].
//! Every step is announced through an [`EventPublisher`].

pub mod artifacts;
pub mod assembly;
pub mod driver;
pub mod records;

pub use artifacts::ArtifactStore;
pub use assembly::{Assembler, AssemblyState};
pub use driver::{Driver, DriverOptions, EventPublisher};
pub use records::RequestStore;
