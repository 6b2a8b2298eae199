//! Content extractor implementations.

pub mod text;

pub use text::TextExtractor;
