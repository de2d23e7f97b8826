//! # Repertoire: The Model Registry
//!
//! Knows which generation models exist and what each one can say. A model is
//! described by a TOML descriptor: its token vocabulary, the header tokens it
//! accepts for unit length (`L:`), meter (`M:`) and key (`K:`), and optionally
//! how often each unit length follows each meter in its training data.
//!
//! Descriptors compiled into the crate (`models.toml`) are always available.
//! A models directory can add more, one descriptor per `*.toml` file; a file
//! whose `id` matches a built-in replaces it.
//!
//! ```no_run
//! use tunesmith_repertoire::{HeaderKind, ModelRegistry};
//!
//! let registry = ModelRegistry::build("/var/opt/tunesmith/models");
//! let ok = registry
//!     .validate_header_token(HeaderKind::Meter, "M:4/4", "thesession_with_repeats")
//!     .unwrap_or(false);
//! println!("M:4/4 accepted: {}", ok);
//! ```

/// Descriptor types and per-model lookups.
pub mod descriptor;

/// Process-wide, lazily populated descriptor cache.
pub mod registry;

pub use descriptor::{HeaderKind, HeaderRules, ModelDescriptor};
pub use registry::ModelRegistry;
