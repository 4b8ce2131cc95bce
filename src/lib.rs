//! A declarative composition and rendering engine for Kubernetes component
//! manifests: given a `ComponentTypeDefinition`, a `Component` instance, a
//! catalog of `Addon`s, optional per-environment `EnvSettings`, and a
//! platform-supplied context, [`pipeline::render`] produces the ordered
//! list of resolved resource documents.
//!
//! The crate is a pure function over its inputs — no YAML/JSON loading, no
//! cluster client, no CLI. Those are out-of-scope external collaborators;
//! this crate only consumes already-typed structures (see [`model`]) and
//! returns data.
//!
//! ## Module map
//!
//! | Component | Module |
//! |---|---|
//! | C1 Schema compiler | [`schema`] |
//! | C2 Expression evaluator | [`expr`] |
//! | C3 Path engine | [`path`] |
//! | C4 Input merger | [`context`] |
//! | C5 Template renderer | [`render`] |
//! | C6 Addon composer | [`addons`] |
//! | C7 Pipeline orchestrator | [`pipeline`] |
//!
//! [`model`] holds the shared data model; [`value`] holds the tagged value
//! type shared by C2/C3/C5; [`diag`] holds the diagnostic report type
//! threaded through every stage; [`error`] re-exports each module's error
//! enum behind one top-level [`error::Error`].

pub mod addons;
pub mod context;
pub mod diag;
pub mod error;
pub mod expr;
pub mod model;
pub mod path;
pub mod pipeline;
pub mod render;
pub mod schema;
pub mod validation;
pub mod value;

pub use error::{Error, Result};
pub use pipeline::{render, CancellationToken, EngineHandle, Pipeline, RenderOutput};
pub use render::RenderLimits;

// External re-exports: the out-of-scope parser/CLI layer consumes these
// directly when loading and validating the YAML/JSON documents this crate's
// types describe, without pulling in its own copies.
pub use kube;
pub use schemars;
