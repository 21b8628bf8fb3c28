//! Suggestion engine for lectag.
//!
//! Wires the prototype layer to the collaborators: builds a candidate
//! shortlist, fans reasoning out per category, merges the two signals into
//! ranked suggestions, and runs retrains in the background.
//!
//! ```text
//! Document ─embed─▶ score ─▶ shortlist ─▶ reasoning ×5 ─▶ combine ─▶ Vec<Suggestion>
//!                     ▲
//!            PrototypeStore::active()
//! ```

pub mod combiner;
pub mod reasoning;
pub mod shortlist;
pub mod tagger;
pub mod training;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use combiner::EnsembleCombiner;
pub use reasoning::{ReasoningFanOut, parse_category_output, sanitize};
pub use shortlist::{LecturerHistory, Shortlist, ShortlistSelector, keyword_hits, normalize_text};
pub use tagger::{DocumentOutcome, OutcomeReport, Tagger};
pub use training::{Trainer, TrainingHandle, TrainingStatus};
