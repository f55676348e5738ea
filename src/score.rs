//! Score Aggregator (spec.md §4.5).
//!
//! Folds per-resident rotation rankings and optional block-specific
//! overlays into the single `Vec<Term>` objective the orchestrator hands to
//! [`crate::model::CpModel::minimize`]. Grounded on
//! `original_source/schedulomicon/score.py`'s `score_dict_from_df` (broadcast
//! a resident→rotation ranking across every block, then overlay one
//! block-specific ranking table for a single designated rotation) and
//! `aggregate_score_functions`/`objective_from_score_dict` (sum weighted
//! decision variables into one linear objective).

use std::collections::HashMap;

use crate::grid::MainGrid;
use crate::model::Term;

/// Per-`(resident, rotation)` preference ranks, broadcast across every
/// block. Lower is better, mirroring the CSV rank convention
/// (`rankings_from_csv`): rank 0 means "no preference expressed".
#[derive(Clone, Debug, Default)]
pub struct RotationRankings {
    scores: HashMap<(usize, usize), i64>,
}

impl RotationRankings {
    /// Build from a `(resident, rotation) -> rank` table, e.g. the output of
    /// [`crate::config::read_rankings_csv`].
    pub fn new(scores: HashMap<(usize, usize), i64>) -> Self {
        RotationRankings { scores }
    }

    fn get(&self, r: usize, t: usize) -> i64 {
        self.scores.get(&(r, t)).copied().unwrap_or(0)
    }
}

/// A single-rotation override of [`RotationRankings`] scored per
/// `(resident, block)` instead of broadcast — the `--block-resident-ranking`
/// side channel, grounded on `score.py::accumulate_score_res_block_scores`.
#[derive(Clone, Debug)]
pub struct BlockResidentRanking {
    /// The rotation this overlay applies to.
    pub rotation: usize,
    /// `(resident, block) -> rank` table.
    pub scores: HashMap<(usize, usize), i64>,
}

/// Builds the schedule-wide objective from whichever score sources are in
/// play. Grounded on `score.py::aggregate_score_functions`: each source
/// contributes independent `Σ weight * var` terms that are summed by
/// [`crate::model::CpModel::minimize`], not folded down to one scalar here.
#[derive(Clone, Debug, Default)]
pub struct ScoreAggregator {
    rankings: Option<RotationRankings>,
    block_overlay: Option<BlockResidentRanking>,
}

impl ScoreAggregator {
    /// An aggregator with no score sources — `objective()` returns an empty
    /// term list, meaning "find any feasible schedule" rather than optimize.
    pub fn new() -> Self {
        ScoreAggregator::default()
    }

    /// Attach broadcast resident→rotation rankings.
    pub fn with_rankings(mut self, rankings: RotationRankings) -> Self {
        self.rankings = Some(rankings);
        self
    }

    /// Attach a single-rotation block-specific overlay.
    pub fn with_block_overlay(mut self, overlay: BlockResidentRanking) -> Self {
        self.block_overlay = Some(overlay);
        self
    }

    /// True when no score source was attached — the orchestrator should
    /// skip `Minimize` entirely rather than build a trivial all-zero
    /// objective (mirrors `solve.py`'s `if score_functions:` guard).
    pub fn is_empty(&self) -> bool {
        self.rankings.is_none() && self.block_overlay.is_none()
    }

    /// Build the weighted-sum objective over every `(resident, block,
    /// rotation)` cell in `main`. Skips zero-weight cells, since a rank of 0
    /// means "no preference" and contributes nothing either way.
    pub fn objective(&self, main: &MainGrid) -> Vec<Term> {
        let (n_residents, n_blocks, n_rotations) = main.dims();
        let mut terms = Vec::new();
        for r in 0..n_residents {
            for b in 0..n_blocks {
                for t in 0..n_rotations {
                    let mut weight = 0;
                    if let Some(rankings) = &self.rankings {
                        weight += rankings.get(r, t);
                    }
                    if let Some(overlay) = &self.block_overlay {
                        if overlay.rotation == t {
                            weight += overlay.scores.get(&(r, b)).copied().unwrap_or(0);
                        }
                    }
                    if weight != 0 {
                        terms.push((main.var(r, b, t), weight));
                    }
                }
            }
        }
        terms
    }

    /// Per-resident weighted-cell lists, in the same shape `objective()`
    /// sums across everyone — used by `--min-individual-rank` to cap each
    /// resident's own weighted sum independently rather than the pooled
    /// total (`score.py::min_individual_score_constraint`).
    pub fn per_resident_terms(&self, main: &MainGrid) -> Vec<Vec<Term>> {
        let (n_residents, n_blocks, n_rotations) = main.dims();
        let mut out = vec![Vec::new(); n_residents];
        for r in 0..n_residents {
            for b in 0..n_blocks {
                for t in 0..n_rotations {
                    let mut weight = 0;
                    if let Some(rankings) = &self.rankings {
                        weight += rankings.get(r, t);
                    }
                    if let Some(overlay) = &self.block_overlay {
                        if overlay.rotation == t {
                            weight += overlay.scores.get(&(r, b)).copied().unwrap_or(0);
                        }
                    }
                    if weight != 0 {
                        out[r].push((main.var(r, b, t), weight));
                    }
                }
            }
        }
        out
    }

    /// Per-resident utility breakdown for one solution: `Σ_b,t weight *
    /// value(x[r,b,t])` for every resident, used by the callback's
    /// worst/best utility reporting (`callback.py`'s
    /// `scores_df.sum(axis=1).max()`/`.min()`).
    pub fn per_resident_totals(
        &self,
        main: &MainGrid,
        value: impl Fn(crate::model::VarId) -> i64,
    ) -> Vec<i64> {
        let (n_residents, n_blocks, n_rotations) = main.dims();
        let mut totals = vec![0i64; n_residents];
        for r in 0..n_residents {
            for b in 0..n_blocks {
                for t in 0..n_rotations {
                    let mut weight = 0;
                    if let Some(rankings) = &self.rankings {
                        weight += rankings.get(r, t);
                    }
                    if let Some(overlay) = &self.block_overlay {
                        if overlay.rotation == t {
                            weight += overlay.scores.get(&(r, b)).copied().unwrap_or(0);
                        }
                    }
                    if weight != 0 {
                        totals[r] += weight * value(main.var(r, b, t));
                    }
                }
            }
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{reference::RefSolver, CpModel};
    use crate::registry::EntityRegistry;

    #[test]
    fn empty_aggregator_produces_no_terms() {
        let mut solver = RefSolver::new();
        let registry = EntityRegistry::new(vec!["R1".into()], vec!["Bl1".into()], vec!["Ro1".into()]);
        let main = crate::grid::VariableFactory::build_main(&mut solver, &registry).unwrap();
        let agg = ScoreAggregator::new();
        assert!(agg.is_empty());
        assert!(agg.objective(&main).is_empty());
    }

    #[test]
    fn rankings_broadcast_across_blocks() {
        let mut solver = RefSolver::new();
        let registry = EntityRegistry::new(
            vec!["R1".into()],
            vec!["Bl1".into(), "Bl2".into()],
            vec!["Ro1".into(), "Ro2".into()],
        );
        let main = crate::grid::VariableFactory::build_main(&mut solver, &registry).unwrap();
        let mut scores = HashMap::new();
        scores.insert((0, 1), 5);
        let agg = ScoreAggregator::new().with_rankings(RotationRankings::new(scores));
        let terms = agg.objective(&main);
        assert_eq!(terms.len(), 2);
        for (var, weight) in &terms {
            assert_eq!(*weight, 5);
            assert!(main.var(0, 0, 1) == *var || main.var(0, 1, 1) == *var);
        }
    }
}
