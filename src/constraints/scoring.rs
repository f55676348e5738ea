//! Score-threshold constraints (spec.md §4.4): `MinIndividualScore` and
//! `MinTotalScore`. Grounded on `original_source/schedulomicon/score.py`'s
//! `score_dict_from_df` ranking tables and `csts.py`'s threshold constraints.
//! Despite the "Min" naming both bind an *upper bound* on rank-weighted cost
//! (lower rank number is better), per spec.md §9's explicit resolution.

use crate::model::{CpModel, Term};

use super::helpers::bind_sum;
use super::ConstraintError;

/// `MinIndividualScore(resident, weighted_cells, cap)`.
#[derive(Clone, Debug)]
pub struct MinIndividualScoreParams {
    /// Resident this applies to.
    pub resident: usize,
    /// `(var, weight)` pairs — typically one rank weight per `(block,
    /// rotation)` cell assigned to this resident.
    pub weighted_cells: Vec<(usize, i64)>,
    /// Upper bound on the weighted sum (a *lower* rank score is better, so
    /// this is a ceiling on "how bad" this resident's rotations may be).
    pub cap: i64,
}

/// `Σ weight_i * x[resident,...] ≤ cap`.
pub fn apply_min_individual_score(
    model: &mut dyn CpModel,
    p: &MinIndividualScoreParams,
) -> Result<(), ConstraintError> {
    let terms: Vec<Term> = p.weighted_cells.clone();
    let _ = bind_sum(model, &terms, 0, terms.iter().map(|(_, w)| *w).sum(), &format!("score[{}]", p.resident))?;
    model.add_linear_le(&terms, p.cap, &[]);
    Ok(())
}

/// `MinTotalScore(weighted_cells, cap)`: same bound across every resident's
/// weighted cells pooled together.
#[derive(Clone, Debug)]
pub struct MinTotalScoreParams {
    /// `(var, weight)` pairs across every resident/block/rotation cell in
    /// scope.
    pub weighted_cells: Vec<(usize, i64)>,
    /// Upper bound on the pooled weighted sum.
    pub cap: i64,
}

/// `Σ weight_i * x_i ≤ cap`, pooled across the whole schedule.
pub fn apply_min_total_score(model: &mut dyn CpModel, p: &MinTotalScoreParams) {
    model.add_linear_le(&p.weighted_cells, p.cap, &[]);
}
