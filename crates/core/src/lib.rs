//! # lectag Core
//!
//! Domain types, collaborator traits, and error definitions for the lectag
//! tag suggestion engine. This crate has **zero framework dependencies**: it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! External services (the embedding model, the category reasoner) are
//! defined as traits here. The prototype and engine crates only see the
//! traits, so tests drive the whole pipeline with scripted mocks.

pub mod error;
pub mod tag;
pub mod prototype;
pub mod judgment;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use tag::{Category, Document, Tag, TagCatalog, TrainingExample};
pub use prototype::{EmbeddedExample, EmbeddingVector, Prototype, PrototypeRecord, PrototypeSet};
pub use judgment::{CategoryJudgment, CategoryJudgments, Suggestion, SuggestionSource};
pub use provider::{EmbeddingProvider, ReasoningProvider};
