//! Crate root: public surface and module map.
//!
//! This module is the single canonical entry-point for downstream users of
//! the library. It re-exports every submodule that makes up the constraint
//! compiler and folds each module's own `thiserror::Error` enum into one
//! [`errors::Error`] (`Error`/`Result` re-exported here, mirroring the way
//! `myzkp`'s crate root re-exports `stream::StreamError` rather than leaving
//! callers to import five different error types).
//!
//! ## Pipeline
//!
//! 1. [`config::load_config`] turns a YAML document into a [`config::CompiledConfig`]:
//!    an [`registry::EntityRegistry`] plus a flat [`constraints::Constraint`] list.
//! 2. [`orchestrator::run`] builds the decision grids via
//!    [`grid::VariableFactory`], compiles every constraint against a
//!    [`model::CpModel`] backend, attaches the [`score::ScoreAggregator`]'s
//!    objective, and drives the search.
//! 3. [`callback::SolutionPrinter`] turns each accepted solution into the
//!    resident x block CSV shape the CLI writes out.
//!
//! `model::reference::RefSolver` is the only `CpModel` implementation this
//! crate ships; it is an explicitly bounded backtracking solver, not a
//! general-purpose CP-SAT engine (see DESIGN.md).

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod callback;
pub mod config;
pub mod constraints;
pub mod errors;
pub mod grid;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod score;
pub mod selector;

pub use errors::{Error, Result};
