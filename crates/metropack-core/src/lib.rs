//! Core of the metropack bundler: the module graph and everything that feeds
//! or consumes it.
//!
//! The crate is organized around a small number of contracts:
//!
//! - [`resolve::Resolver`] maps a specifier + referrer to a file on disk,
//!   honoring platform variants, asset extensions and `node_modules` search
//!   paths.
//! - [`graph_builder::GraphBuilder`] drives resolution and transformation
//!   from an entry point into a [`module_graph::ModuleGraph`].
//! - [`module_id::ModuleIdFactory`] hands out the stable numeric ids that
//!   bundles and HMR payloads encode paths with.
//! - [`delta::DeltaEngine`] re-builds only what changed and computes the
//!   `{added, modified, deleted}` transition between two graphs.
//!
//! Parsing and transformation of JavaScript itself is not done here: the
//! graph builder talks to a [`transformer::Transformer`] capability and
//! treats the returned [`transformer::ModuleAst`] as an opaque handle.

pub mod asset;
pub mod code_builder;
pub mod config;
pub mod delta;
pub mod error;
pub mod graph_builder;
pub mod module;
pub mod module_graph;
pub mod module_id;
pub mod order;
pub mod resolve;
pub mod source_map;
pub mod transformer;

pub use config::{Config, Platform};
pub use error::BuildError;
pub use module::Module;
pub use module_graph::{ModuleGraph, ModuleIx};
pub use module_id::ModuleIdFactory;
