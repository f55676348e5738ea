//! Main-grid rotation constraints (spec.md §4.4).
//!
//! Every constraint here lowers a declarative rule into calls on
//! [`crate::model::CpModel`] against `x[r,b,t]` only. Grounded on the
//! matching classes in `original_source/schedulomicon/csts.py`
//! (`RotationCoverageConstraint`, `RotationCountConstraint`,
//! `PrerequisiteRotationConstraint`, `IneligibleAfterConstraint`,
//! `add_must_be_followed_by_constraint`, `ConsecutiveRotationCountConstraint`,
//! `AllowedRootsConstraint`, `CoolDownConstraint`,
//! `GroupCountPerResidentPerWindow`, `TimeToFirstConstraint`,
//! `ResidentGroupConstraint`/`RotationWindowConstraint`).

use crate::grid::MainGrid;
use crate::model::{CpModel, Lit, Term};

use super::helpers::{add_window_count, bind_sum, prior_terms_in_schedule};
use super::ConstraintError;

/// `Coverage(rotations, blocks?, rmin?, rmax?, allowed?)`.
#[derive(Clone, Debug)]
pub struct CoverageParams {
    /// Rotation ids counted by this coverage rule.
    pub rotations: Vec<usize>,
    /// Blocks this rule applies to (empty means "resolved to all blocks" by
    /// the caller — `apply` itself takes the already-resolved list).
    pub blocks: Vec<usize>,
    /// Lower bound on residents-on-rotation per block, if any.
    pub rmin: Option<i64>,
    /// Upper bound, if any.
    pub rmax: Option<i64>,
    /// Explicit allowed value set, if any (table constraint).
    pub allowed: Option<Vec<i64>>,
}

/// `Coverage(rotations, blocks, rmin, rmax, allowed)`: bind `S_b` to the
/// per-block resident count on `rotations` and enforce the declared bounds.
/// `rmin = rmax = 0` is legitimate and independent of I1 (spec.md §9).
pub fn apply_coverage(
    model: &mut dyn CpModel,
    grid: &MainGrid,
    p: &CoverageParams,
) -> Result<(), ConstraintError> {
    if let (Some(lo), Some(hi)) = (p.rmin, p.rmax) {
        if lo > hi {
            return Err(ConstraintError::Infeasible(format!("coverage rmin {lo} > rmax {hi}")));
        }
    }
    let (n_residents, _n_blocks, _n_rot) = grid.dims();
    for &b in &p.blocks {
        let terms: Vec<Term> = (0..n_residents)
            .flat_map(|r| p.rotations.iter().map(move |&t| (grid.var(r, b, t), 1)))
            .collect();
        let s = bind_sum(model, &terms, 0, n_residents as i64, &format!("coverage_S[{b}]"))?;
        if let Some(lo) = p.rmin {
            model.add_linear_ge(&[(s, 1)], lo, &[]);
        }
        if let Some(hi) = p.rmax {
            model.add_linear_le(&[(s, 1)], hi, &[]);
        }
        if let Some(allowed) = &p.allowed {
            let tuples = allowed.iter().map(|&v| vec![v]).collect();
            model.add_allowed_assignments(&[s], tuples)?;
        }
    }
    Ok(())
}

/// `RotationCount(rot, map: resident -> (nmin, nmax), prior_counts?)`.
#[derive(Clone, Debug)]
pub struct RotationCountParams {
    /// The rotation being counted.
    pub rotation: usize,
    /// Per-resident `(nmin, nmax)` bounds.
    pub bounds: Vec<(usize, i64, i64)>,
    /// Prior (history) counts per resident, added to the in-schedule count.
    pub prior_counts: Vec<(usize, i64)>,
}

/// `(Σ_b x[r,b,rot]) + prior[r] ∈ [nmin, nmax]`. Infeasible at compile if
/// `prior[r] > nmax`.
pub fn apply_rotation_count(
    model: &mut dyn CpModel,
    grid: &MainGrid,
    p: &RotationCountParams,
) -> Result<(), ConstraintError> {
    let (_r, n_blocks, _t) = grid.dims();
    for &(resident, nmin, nmax) in &p.bounds {
        let prior = p.prior_counts.iter().find(|(r, _)| *r == resident).map(|(_, c)| *c).unwrap_or(0);
        if prior > nmax {
            return Err(ConstraintError::Infeasible(format!(
                "resident {resident} prior count {prior} exceeds nmax {nmax} for rotation {}",
                p.rotation
            )));
        }
        let terms: Vec<Term> = (0..n_blocks).map(|b| (grid.var(resident, b, p.rotation), 1)).collect();
        model.add_linear_ge(&terms, (nmin - prior).max(0), &[]);
        model.add_linear_le(&terms, nmax - prior, &[]);
    }
    Ok(())
}

/// `RotationCountNot(rot, k)`: `Σ_b x[r,b,rot] != k` for each listed resident.
#[derive(Clone, Debug)]
pub struct RotationCountNotParams {
    /// The rotation counted.
    pub rotation: usize,
    /// Forbidden total.
    pub k: i64,
    /// Residents this applies to.
    pub residents: Vec<usize>,
}

/// See [`RotationCountNotParams`].
pub fn apply_rotation_count_not(
    model: &mut dyn CpModel,
    grid: &MainGrid,
    p: &RotationCountNotParams,
) -> Result<(), ConstraintError> {
    let (_r, n_blocks, _t) = grid.dims();
    for &resident in &p.residents {
        let terms: Vec<Term> = (0..n_blocks).map(|b| (grid.var(resident, b, p.rotation), 1)).collect();
        model.add_linear_ne(&terms, p.k, &[]);
    }
    Ok(())
}

/// `Prerequisite(rot, {group: required_count}, prior_counts)`.
#[derive(Clone, Debug)]
pub struct PrerequisiteParams {
    /// The rotation being gated.
    pub rotation: usize,
    /// One or more `(prereq rotation set, required count)` groups, all of
    /// which must be satisfied conjunctively (spec.md §9).
    pub groups: Vec<(Vec<usize>, i64)>,
    /// Residents this applies to.
    pub residents: Vec<usize>,
    /// Prior counts per `(resident, prereq rotation)`.
    pub prior_counts: Vec<((usize, usize), i64)>,
}

impl PrerequisiteParams {
    fn prior_for(&self, resident: usize, rotations: &[usize]) -> i64 {
        rotations
            .iter()
            .map(|&t| {
                self.prior_counts
                    .iter()
                    .find(|((r, rr), _)| *r == resident && *rr == t)
                    .map(|(_, c)| *c)
                    .unwrap_or(0)
            })
            .sum()
    }
}

/// `x[r,b_i,rot]=1 ⇒ P ≥ required_count` for every prereq group, conjunctively.
pub fn apply_prerequisite(
    model: &mut dyn CpModel,
    grid: &MainGrid,
    p: &PrerequisiteParams,
) -> Result<(), ConstraintError> {
    let (_r, n_blocks, _t) = grid.dims();
    for &resident in &p.residents {
        for b in 0..n_blocks {
            let enforce = [Lit::pos(grid.var(resident, b, p.rotation))];
            for (group, required) in &p.groups {
                let prior = p.prior_for(resident, group);
                let mut terms = prior_terms_in_schedule(grid, resident, group, b);
                // P >= required  <=>  Σ terms + prior >= required
                if prior >= *required {
                    continue; // always satisfied, nothing to add
                }
                terms.retain(|_| true);
                model.add_linear_ge(&terms, required - prior, &enforce);
            }
        }
    }
    Ok(())
}

/// `IneligibleAfter(rot, {group: k})`: dual of Prerequisite — at least one
/// prereq group must be unsatisfied for `rot` to be assigned.
#[derive(Clone, Debug)]
pub struct IneligibleAfterParams {
    /// The rotation being gated.
    pub rotation: usize,
    /// `(group, k)` pairs; assignment requires at least one group's prior
    /// count to be `< k`.
    pub groups: Vec<(Vec<usize>, i64)>,
    /// Residents this applies to.
    pub residents: Vec<usize>,
    /// Prior counts per `(resident, rotation)`.
    pub prior_counts: Vec<((usize, usize), i64)>,
}

impl IneligibleAfterParams {
    fn prior_for(&self, resident: usize, rotations: &[usize]) -> i64 {
        rotations
            .iter()
            .map(|&t| {
                self.prior_counts
                    .iter()
                    .find(|((r, rr), _)| *r == resident && *rr == t)
                    .map(|(_, c)| *c)
                    .unwrap_or(0)
            })
            .sum()
    }
}

/// See [`IneligibleAfterParams`].
pub fn apply_ineligible_after(
    model: &mut dyn CpModel,
    grid: &MainGrid,
    p: &IneligibleAfterParams,
) -> Result<(), ConstraintError> {
    let (_r, n_blocks, _t) = grid.dims();
    for &resident in &p.residents {
        for b in 0..n_blocks {
            let assigned = Lit::pos(grid.var(resident, b, p.rotation));
            let mut unsat_lits = Vec::new();
            for (group, k) in &p.groups {
                let prior = p.prior_for(resident, group);
                let terms = prior_terms_in_schedule(grid, resident, group, b);
                // unsat <=> Σ terms + prior < k  <=>  Σ terms <= k - prior - 1
                let unsat = model.new_bool_var(&format!("unsat[{resident},{b},{:?}]", group));
                let bound = k - prior - 1;
                model.add_linear_le(&terms, bound, &[Lit::pos(unsat)]);
                model.add_linear_ge(&terms, bound + 1, &[Lit::neg(unsat)]);
                unsat_lits.push(Lit::pos(unsat));
            }
            model.add_bool_or(&unsat_lits, &[assigned]);
        }
    }
    Ok(())
}

/// `MustBeFollowedBy(rot, allowed_next)`.
#[derive(Clone, Debug)]
pub struct MustBeFollowedByParams {
    /// The rotation that triggers the obligation.
    pub rotation: usize,
    /// Rotations allowed in the following block.
    pub allowed_next: Vec<usize>,
    /// Residents this applies to.
    pub residents: Vec<usize>,
}

/// `x[r,b_i,rot]=1 ⇒ Σ_{t∈allowed_next} x[r,b_{i+1},t] ≥ 1`, for every
/// consecutive block pair.
pub fn apply_must_be_followed_by(model: &mut dyn CpModel, grid: &MainGrid, p: &MustBeFollowedByParams) {
    let (_r, n_blocks, _t) = grid.dims();
    for &resident in &p.residents {
        for b in 0..n_blocks.saturating_sub(1) {
            let enforce = [Lit::pos(grid.var(resident, b, p.rotation))];
            let lits: Vec<Lit> = p.allowed_next.iter().map(|&t| Lit::pos(grid.var(resident, b + 1, t))).collect();
            model.add_bool_or(&lits, &enforce);
        }
    }
}

/// `ConsecutiveCount(rot, n, forbidden_roots?, allowed_roots?)`.
#[derive(Clone, Debug)]
pub struct ConsecutiveCountParams {
    /// The rotation whose runs are being constrained.
    pub rotation: usize,
    /// Required run length.
    pub n: usize,
    /// Blocks at which a run is not permitted to start.
    pub forbidden_roots: Vec<usize>,
    /// If non-empty, runs may only start at these blocks (spec.md §9: an
    /// explicit "was this supplied" check, never a truthiness check).
    pub allowed_roots: Option<Vec<usize>>,
    /// Residents this applies to.
    pub residents: Vec<usize>,
}

/// Full root-finding + run-length encoding described in spec.md §4.4,
/// including the tail-extension edge case for runs past the last legal root.
pub fn apply_consecutive_count(model: &mut dyn CpModel, grid: &MainGrid, p: &ConsecutiveCountParams) {
    let (_r, n_blocks, _t) = grid.dims();
    let n = p.n;
    if n == 0 || n > n_blocks {
        return;
    }
    for &resident in &p.residents {
        let x = |b: usize| Lit::pos(grid.var(resident, b, p.rotation));
        let mut is_root = Vec::with_capacity(n_blocks);
        for i in 0..n_blocks {
            let v = model.new_bool_var(&format!("is_root[{resident},{i}]"));
            is_root.push(v);
        }

        for i in 0..n_blocks {
            let root_lit = Lit::pos(is_root[i]);
            if i == 0 {
                // is_root[0] <=> x(0)
                model.add_implication(root_lit, x(0));
                model.add_implication(x(0), root_lit);
            } else {
                // is_root[i] <=> (!x(i-1) and x(i))
                model.add_bool_and(&[Lit::neg(grid.var(resident, i - 1, p.rotation)), x(i)], &[root_lit]);
                model.add_bool_or(
                    &[Lit::pos(grid.var(resident, i - 1, p.rotation)), Lit::neg(grid.var(resident, i, p.rotation))],
                    &[Lit::neg(root_lit)],
                );
            }
            if p.forbidden_roots.contains(&i) {
                model.add_linear_eq(&[(is_root[i], 1)], 0, &[]);
            }
            // Roots cannot start a run that would run off the end of the schedule.
            if i > n_blocks.saturating_sub(n) {
                model.add_linear_eq(&[(is_root[i], 1)], 0, &[]);
            }
        }

        if let Some(allowed) = &p.allowed_roots {
            for i in 0..n_blocks {
                if !allowed.contains(&i) {
                    model.add_linear_eq(&[(is_root[i], 1)], 0, &[]);
                }
            }
        }

        for i in 0..n_blocks {
            if i > n_blocks.saturating_sub(n) {
                continue;
            }
            let root_lit = Lit::pos(is_root[i]);
            for j in i..(i + n) {
                model.add_bool_and(&[x(j)], &[root_lit]);
            }
            let tail = i + n;
            if tail < n_blocks {
                model.add_bool_and(&[Lit::neg(grid.var(resident, tail, p.rotation))], &[root_lit]);
            } else {
                // Edge case: run extends exactly to the end of the schedule;
                // nothing more to forbid past the last block.
            }
        }

        // Tail-extension: if the last legal root position's run reaches the
        // final block still on `rot`, every following block stays on `rot`.
        if n_blocks >= n {
            let last_root = n_blocks - n;
            let last_block_of_window = last_root + n - 1;
            if last_block_of_window + 1 < n_blocks {
                for tail in (last_block_of_window + 1)..n_blocks {
                    model.add_implication(x(tail - 1), x(tail));
                }
            }
        }
    }
}

/// `AllowedRoots(rot, blocks)`: weaker form of `ConsecutiveCount` pinning
/// `is_root` directly without re-deriving the run-length encoding.
#[derive(Clone, Debug)]
pub struct AllowedRootsParams {
    /// The rotation whose roots are pinned.
    pub rotation: usize,
    /// Blocks allowed to be roots; all others are forced to non-root.
    pub blocks: Vec<usize>,
    /// Residents this applies to.
    pub residents: Vec<usize>,
}

/// See [`AllowedRootsParams`]. Computes `is_root` the same way
/// [`apply_consecutive_count`] does, then pins it.
pub fn apply_allowed_roots(model: &mut dyn CpModel, grid: &MainGrid, p: &AllowedRootsParams) {
    let (_r, n_blocks, _t) = grid.dims();
    for &resident in &p.residents {
        for i in 0..n_blocks {
            let is_root_now = if i == 0 {
                grid.var(resident, 0, p.rotation)
            } else {
                grid.var(resident, i, p.rotation)
            };
            if !p.blocks.contains(&i) {
                // Forbid a run from starting here: if i==0 just forbid x(0);
                // otherwise forbid the (!x(i-1) and x(i)) root pattern by
                // forcing "x(i-1) or !x(i)".
                if i == 0 {
                    model.add_linear_eq(&[(is_root_now, 1)], 0, &[]);
                } else {
                    model.add_bool_or(
                        &[
                            Lit::pos(grid.var(resident, i - 1, p.rotation)),
                            Lit::neg(grid.var(resident, i, p.rotation)),
                        ],
                        &[],
                    );
                }
            }
        }
    }
}

/// `CoolDown(rot, window, count, suppress_for?)`.
#[derive(Clone, Debug)]
pub struct CoolDownParams {
    /// The rotation being capped.
    pub rotation: usize,
    /// Sliding window length.
    pub window: usize,
    /// Max occurrences of `rotation` per window.
    pub count: i64,
    /// Residents excluded from this cooldown.
    pub suppress_for: Vec<usize>,
    /// Residents this applies to (already minus `suppress_for`).
    pub residents: Vec<usize>,
}

/// See [`CoolDownParams`]. Mutually exclusive with `ConsecutiveCount` on the
/// same rotation — callers must reject that pairing before calling `apply`
/// (see `crate::constraints::compile_all`).
pub fn apply_cool_down(model: &mut dyn CpModel, grid: &MainGrid, p: &CoolDownParams) {
    for &resident in &p.residents {
        if p.suppress_for.contains(&resident) {
            continue;
        }
        add_window_count(model, grid, resident, &[p.rotation], p.window, Some(0), Some(p.count), 0);
    }
}

/// `GroupCountPerResidentPerWindow(group, resident -> (nmin,nmax), window)`.
#[derive(Clone, Debug)]
pub struct GroupCountPerResidentPerWindowParams {
    /// Rotation ids forming the group.
    pub group: Vec<usize>,
    /// Per-resident `(nmin, nmax, history_adjustment)`.
    pub bounds: Vec<(usize, i64, i64, i64)>,
    /// Sliding window length.
    pub window: usize,
}

/// See [`GroupCountPerResidentPerWindowParams`].
pub fn apply_group_count_per_resident_per_window(
    model: &mut dyn CpModel,
    grid: &MainGrid,
    p: &GroupCountPerResidentPerWindowParams,
) {
    for &(resident, nmin, nmax, history) in &p.bounds {
        add_window_count(model, grid, resident, &p.group, p.window, Some(nmin), Some(nmax), history);
    }
}

/// `TimeToFirst(group, window)`.
#[derive(Clone, Debug)]
pub struct TimeToFirstParams {
    /// Rotation ids forming the group.
    pub group: Vec<usize>,
    /// Number of blocks from the start counted as "first window".
    pub window: usize,
    /// Residents this applies to.
    pub residents: Vec<usize>,
}

/// `Σ_{t∈group, b∈first window blocks} x[r,b,t] ≥ 1`. Uses `≥ 1`
/// (not `> 1`) per spec.md's explicit Open-Question resolution, a deliberate
/// deviation from `original_source/schedulomicon/csts.py::TimeToFirstConstraint`.
pub fn apply_time_to_first(model: &mut dyn CpModel, grid: &MainGrid, p: &TimeToFirstParams) {
    let (_r, n_blocks, _t) = grid.dims();
    let window = p.window.min(n_blocks);
    for &resident in &p.residents {
        let terms: Vec<Term> =
            (0..window).flat_map(|b| p.group.iter().map(move |&t| (grid.var(resident, b, t), 1))).collect();
        model.add_linear_ge(&terms, 1, &[]);
    }
}

/// `RotationWindow(resident, rot, candidate_blocks)`.
#[derive(Clone, Debug)]
pub struct RotationWindowParams {
    /// Resident this applies to.
    pub resident: usize,
    /// The rotation being required.
    pub rotation: usize,
    /// Candidate blocks, at least one of which must carry the rotation.
    pub candidate_blocks: Vec<usize>,
}

/// `Σ_{b∈candidate_blocks} x[resident,b,rot] ≥ 1`.
pub fn apply_rotation_window(model: &mut dyn CpModel, grid: &MainGrid, p: &RotationWindowParams) {
    let terms: Vec<Term> = p.candidate_blocks.iter().map(|&b| (grid.var(p.resident, b, p.rotation), 1)).collect();
    model.add_linear_ge(&terms, 1, &[]);
}

/// `PinnedRotation(resident, blocks?, rot)`.
#[derive(Clone, Debug)]
pub struct PinnedRotationParams {
    /// Resident this applies to.
    pub resident: usize,
    /// Specific blocks to pin, if any; otherwise require at least one
    /// assignment somewhere.
    pub blocks: Vec<usize>,
    /// The rotation to pin.
    pub rotation: usize,
}

/// If `blocks` is non-empty, fix `x[resident,b,rot]=1` for each; otherwise
/// require at least one block assigned to `rot`.
pub fn apply_pinned_rotation(model: &mut dyn CpModel, grid: &MainGrid, p: &PinnedRotationParams) {
    if p.blocks.is_empty() {
        let (_r, n_blocks, _t) = grid.dims();
        let terms: Vec<Term> = (0..n_blocks).map(|b| (grid.var(p.resident, b, p.rotation), 1)).collect();
        model.add_linear_ge(&terms, 1, &[]);
    } else {
        for &b in &p.blocks {
            model.add_linear_eq(&[(grid.var(p.resident, b, p.rotation), 1)], 1, &[]);
        }
    }
}

/// `BanRotationBlock(block, rotation)`.
#[derive(Clone, Debug)]
pub struct BanRotationBlockParams {
    /// The block the rotation is banned on.
    pub block: usize,
    /// The banned rotation.
    pub rotation: usize,
}

/// `x[r,block,rotation] = 0` for every resident.
pub fn apply_ban_rotation_block(model: &mut dyn CpModel, grid: &MainGrid, p: &BanRotationBlockParams) {
    let (n_residents, _b, _t) = grid.dims();
    for r in 0..n_residents {
        model.add_linear_eq(&[(grid.var(r, p.block, p.rotation), 1)], 0, &[]);
    }
}

/// `FieldSum(mask, predicate)`: also the target for the legacy
/// "TrueSomewhere" / "ProhibitedCombination" / "MarkIneligible" shims.
#[derive(Clone, Debug)]
pub struct FieldSumParams {
    /// `(resident, block, rotation)` cells included in the sum.
    pub cells: Vec<(usize, usize, usize)>,
    /// The comparison to enforce against `rhs`.
    pub predicate: Predicate,
    /// Right-hand side literal.
    pub rhs: i64,
}

/// The six comparison operators `FieldSum` can bind to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Predicate {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// `predicate(Σ_{(r,b,t)∈mask} x[r,b,t])`.
pub fn apply_field_sum(model: &mut dyn CpModel, grid: &MainGrid, p: &FieldSumParams) {
    let terms: Vec<Term> = p.cells.iter().map(|&(r, b, t)| (grid.var(r, b, t), 1)).collect();
    match p.predicate {
        Predicate::Eq => model.add_linear_eq(&terms, p.rhs, &[]),
        Predicate::Ne => model.add_linear_ne(&terms, p.rhs, &[]),
        Predicate::Le => model.add_linear_le(&terms, p.rhs, &[]),
        Predicate::Ge => model.add_linear_ge(&terms, p.rhs, &[]),
        Predicate::Lt => model.add_linear_le(&terms, p.rhs - 1, &[]),
        Predicate::Gt => model.add_linear_ge(&terms, p.rhs + 1, &[]),
    }
}
