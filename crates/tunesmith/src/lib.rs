//! # Tunesmith
//!
//! Generates folk tunes with a token-level model and streams them, token by
//! token, to any number of browsers watching over websockets. Viewers can
//! join a tune at any point and still end up with exactly its text.
//!
//! The pieces: [`service::TuneService`] accepts submissions and starts a
//! generation for each; the generation publishes to the [`hub::BroadcastHub`];
//! each websocket connection runs a [`viewer::ViewerSession`] that turns hub
//! events into deltas for its viewer.

pub mod api;
pub mod config;
pub mod hub;
pub mod service;
pub mod submission;
pub mod viewer;
pub mod ws;

pub use config::ServerConfig;
pub use hub::BroadcastHub;
pub use service::TuneService;
pub use viewer::ViewerSession;
