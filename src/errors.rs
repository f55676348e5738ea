//! Unified error surface for the crate.
//!
//! Each module defines its own `thiserror::Error` enum for the failures it can
//! produce; this module folds them into a single `Error` type so callers that
//! cross module boundaries (the orchestrator, the CLI) have one thing to
//! match on, grounded on `myzkp`'s own crate-root `StreamError` re-export
//! rather than every module inventing its own top-level error type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::constraints::ConstraintError;
use crate::grid::GridError;
use crate::model::ModelError;
use crate::registry::RegistryError;
use crate::selector::SelectorError;

/// Top-level error type unifying every module's failure modes.
#[derive(Debug, Error)]
pub enum Error {
    /// The YAML configuration was structurally invalid (see spec.md §7 `ConfigMalformed`).
    #[error("configuration malformed: {0}")]
    ConfigMalformed(String),

    /// Config or DSL parsing failed (spec.md §7 `YAMLParseError`).
    #[error("parse error: {0}")]
    YamlParseError(String),

    /// A referenced resident/block/rotation/group name does not exist.
    #[error(transparent)]
    NameNotFound(#[from] RegistryError),

    /// Two declared constraints cannot both hold (e.g. `cool_down` + `consecutive_count`
    /// on the same rotation).
    #[error("incompatible constraints: {0}")]
    IncompatibleConstraints(String),

    /// A constraint is unsatisfiable purely from its own parameters, detected at compile
    /// time before any search runs (e.g. `prior_count > nmax`, or `rmin > rmax`).
    #[error("infeasible at compile time: {0}")]
    InfeasibleAtCompile(String),

    /// The selector DSL failed to parse or evaluate.
    #[error(transparent)]
    Selector(#[from] SelectorError),

    /// Grid/variable-factory failure.
    #[error(transparent)]
    Grid(#[from] GridError),

    /// Constraint-compiler failure.
    #[error(transparent)]
    Constraint(#[from] ConstraintError),

    /// Solver-model failure.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Config deserialization / CSV I/O failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
