//! Trait seams for external collaborators.
//!
//! The pipeline talks to the network, extractors, analysis backends, storage,
//! and discovery only through these traits.

pub mod extractor;
pub mod source;
pub mod stage;
pub mod store;
pub mod transport;
