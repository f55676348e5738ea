//! Shared free-function helpers used by several constraint kinds.
//!
//! Grounded on `original_source/schedulomicon/csts.py::add_window_count_constraint`
//! and the resident-group helper `add_resident_group_constraint`. spec.md §9
//! explicitly calls for shared helpers to remain free functions rather than
//! methods on a constraint base class.

use crate::grid::MainGrid;
use crate::model::{CpModel, ModelError, Term, VarId};

/// Bind a fresh bounded integer variable to `Σ terms`, unconditionally.
/// Used by `Coverage`, `RotationCount`, and every other constraint that needs
/// an auxiliary sum variable (CP-SAT has no first-class "expression" type;
/// everything aggregates through a bound variable).
pub fn bind_sum(
    model: &mut dyn CpModel,
    terms: &[Term],
    lb: i64,
    ub: i64,
    name: &str,
) -> Result<VarId, ModelError> {
    let s = model.new_int_var(lb, ub, name)?;
    let mut full: Vec<Term> = terms.to_vec();
    full.push((s, -1));
    model.add_linear_eq(&full, 0, &[]);
    Ok(s)
}

/// For one resident, enforce that every full sliding window of `window`
/// consecutive blocks has a rotation-set occurrence count within
/// `[min, max]` (either bound optional). `history_adjustment` is subtracted
/// from both bounds up front the way `GroupCountPerResidentPerWindow`
/// folds prior history into the window bound (spec.md §4.4).
#[allow(clippy::too_many_arguments)]
pub fn add_window_count(
    model: &mut dyn CpModel,
    grid: &MainGrid,
    resident: usize,
    rotations: &[usize],
    window: usize,
    min: Option<i64>,
    max: Option<i64>,
    history_adjustment: i64,
) {
    let (_r, n_blocks, _t) = grid.dims();
    if window == 0 || window > n_blocks {
        return;
    }
    for start in 0..=(n_blocks - window) {
        let terms: Vec<Term> = (start..start + window)
            .flat_map(|b| rotations.iter().map(move |&t| (grid.var(resident, b, t), 1)))
            .collect();
        if let Some(lo) = min {
            let adjusted = lo - history_adjustment;
            if adjusted > i64::MIN {
                model.add_linear_ge(&terms, adjusted.max(0), &[]);
            }
        }
        if let Some(hi) = max {
            let adjusted = hi - history_adjustment;
            model.add_linear_le(&terms, adjusted, &[]);
        }
    }
}

/// Sum of occurrences of `rot` across `blocks[..before]` for `resident`,
/// expressed as linear terms (used by Prerequisite/IneligibleAfter to total
/// "prior blocks in this schedule" before block index `before`).
pub fn prior_terms_in_schedule(grid: &MainGrid, resident: usize, rotations: &[usize], before: usize) -> Vec<Term> {
    (0..before)
        .flat_map(|b| rotations.iter().map(move |&t| (grid.var(resident, b, t), 1)))
        .collect()
}
