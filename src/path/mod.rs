//! C3 — the path engine: the extended JSON-Pointer grammar, deep merge, and
//! RFC-6902(+`merge`) patch application.

pub mod merge;
pub mod parse;
pub mod patch;

pub use merge::{deep_merge, merge_layers};
pub use parse::Segment;
pub use patch::apply;
