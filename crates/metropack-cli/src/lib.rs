//! Thin orchestration around the core: argument parsing and the `build` /
//! `dev` entry points.

pub mod arguments;
pub mod build;
pub mod dev;
