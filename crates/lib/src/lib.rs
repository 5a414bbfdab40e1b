//! sketchforge-lib: board-aware build engine for sketch projects
//!
//! This crate turns a sketch folder and a board name into firmware:
//! - `Fqbn`: the fully-qualified board name and its menu options
//! - `ResolvedBoard`: platform, board and menu properties merged and expanded
//! - `LibraryResolution`: the libraries a sketch pulls in, found by its includes
//! - `BuildPlan`: ordered recipe steps rendered from the platform's patterns
//! - `BuildResult`: the outcome of running a plan against the step cache
//!
//! [`compile::compile_sketch`] runs the whole pipeline.

pub mod board;
pub mod cache;
pub mod catalog;
pub mod compile;
pub mod config;
pub mod consts;
pub mod execute;
pub mod export;
pub mod fqbn;
pub mod libraries;
pub mod plan;
pub mod platform;
pub mod properties;
pub mod sketch;
pub mod util;
