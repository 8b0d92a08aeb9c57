//! The JavaScript side of metropack: source scanning, the default
//! transformer, tree shaking and bundle serialization.
//!
//! No full parser lives here. The scanner in [`lexer`] is string-, comment-
//! and template-aware, which is exactly enough to extract dependency edges
//! and import/export structure and to splice in the module-system lowering.
//! Anything deeper (JSX, syntax lowering, minification) belongs to an
//! external [`metropack_core::transformer::Transformer`] implementation.

pub mod analyze;
pub mod lexer;
pub mod runtime;
pub mod serialize;
pub mod transform;
pub mod tree_shake;

pub use serialize::{serialize_bundle, Bundle};
pub use transform::DefaultTransformer;
