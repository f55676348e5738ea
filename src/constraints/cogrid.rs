//! Co-grid constraints over the `backup` (`y[r,b]`) and `vacation`
//! (`v[r,w,t]`) grids (spec.md §4.4). Grounded on
//! `original_source/sched/cogrid_csts.py`.

use crate::grid::{BackupGrid, MainGrid, VacationGrid};
use crate::model::{CpModel, Lit, Term};

use super::ConstraintError;

/// `VacationMapping(week_to_blocks, rotations)`: ties the vacation co-grid
/// back to the main grid. A vacation week maps onto one or more possible
/// schedule blocks — list-valued per spec.md §9, since a week may straddle a
/// block boundary (a scalar mapping is normalized to a one-element list by
/// the config loader before this struct is built).
#[derive(Clone, Debug)]
pub struct VacationMappingParams {
    /// For each vacation week, the block indices it overlaps.
    pub week_to_blocks: Vec<Vec<usize>>,
    /// Rotation ids in scope for the vacation grid's `t` axis.
    pub rotations: Vec<usize>,
}

/// `v[r,w,t] ≤ x[r,b,t]` for every block `b` mapped by week `w` — vacation is
/// only feasible on a block the resident is actually assigned that rotation.
pub fn apply_vacation_mapping(
    model: &mut dyn CpModel,
    vacation: &VacationGrid,
    main: &MainGrid,
    p: &VacationMappingParams,
) -> Result<(), ConstraintError> {
    let (n_residents, n_weeks, _t) = vacation.dims();
    for (w, blocks) in p.week_to_blocks.iter().enumerate() {
        if blocks.is_empty() {
            return Err(ConstraintError::Infeasible(format!("vacation week {w} maps to no schedule blocks")));
        }
        if w >= n_weeks {
            continue;
        }
        for r in 0..n_residents {
            for &t in &p.rotations {
                for &b in blocks {
                    model.add_linear_le(
                        &[(vacation.var(r, w, t), 1), (main.var(r, b, t), -1)],
                        0,
                        &[],
                    );
                }
            }
        }
    }
    Ok(())
}

/// `VacationPool(rotations, max_per_week?, max_total?)`: per-pool weekly and
/// annual caps on vacation usage across the rotations in the pool.
#[derive(Clone, Debug)]
pub struct VacationPoolParams {
    /// Rotation ids belonging to this pool.
    pub rotations: Vec<usize>,
    /// Max residents on vacation from this pool in any single week.
    pub max_per_week: Option<i64>,
    /// Max residents on vacation from this pool across the whole schedule.
    pub max_total: Option<i64>,
}

/// See [`VacationPoolParams`].
pub fn apply_vacation_pool(model: &mut dyn CpModel, grid: &VacationGrid, p: &VacationPoolParams) {
    let (n_residents, n_weeks, _t) = grid.dims();
    let mut all_terms = Vec::new();
    for w in 0..n_weeks {
        let terms: Vec<Term> =
            (0..n_residents).flat_map(|r| p.rotations.iter().map(move |&t| (grid.var(r, w, t), 1))).collect();
        if let Some(max_week) = p.max_per_week {
            model.add_linear_le(&terms, max_week, &[]);
        }
        all_terms.extend(terms);
    }
    if let Some(max_total) = p.max_total {
        model.add_linear_le(&all_terms, max_total, &[]);
    }
}

/// `VacationPerResidentTotal(n_vacations_per_resident)`: total vacation
/// assignments across all weeks/rotations equals the configured count, for
/// every resident.
#[derive(Clone, Debug)]
pub struct VacationPerResidentTotalParams {
    /// Required number of vacation weeks per resident.
    pub n_vacations_per_resident: i64,
}

/// See [`VacationPerResidentTotalParams`].
pub fn apply_vacation_per_resident_total(
    model: &mut dyn CpModel,
    grid: &VacationGrid,
    p: &VacationPerResidentTotalParams,
) {
    let (n_residents, n_weeks, n_rotations) = grid.dims();
    for r in 0..n_residents {
        let terms: Vec<Term> =
            (0..n_weeks).flat_map(|w| (0..n_rotations).map(move |t| (grid.var(r, w, t), 1))).collect();
        model.add_linear_eq(&terms, p.n_vacations_per_resident, &[]);
    }
}

/// `ChosenVacation(resident, week, rotation)`: fix `v[r,w,rot] = 1`.
#[derive(Clone, Debug)]
pub struct ChosenVacationParams {
    /// Resident this applies to.
    pub resident: usize,
    /// Vacation week index.
    pub week: usize,
    /// Rotation the resident is on vacation from.
    pub rotation: usize,
}

/// See [`ChosenVacationParams`].
pub fn apply_chosen_vacation(model: &mut dyn CpModel, grid: &VacationGrid, p: &ChosenVacationParams) {
    model.add_linear_eq(&[(grid.var(p.resident, p.week, p.rotation), 1)], 1, &[]);
}

/// `VacationCooldown(resident, window, count)`: cap vacation-week
/// occurrences within any sliding window of weeks.
#[derive(Clone, Debug)]
pub struct VacationCooldownParams {
    /// Resident this applies to.
    pub resident: usize,
    /// Sliding window length, in weeks.
    pub window: usize,
    /// Max vacation weeks per window.
    pub count: i64,
}

/// See [`VacationCooldownParams`].
pub fn apply_vacation_cooldown(model: &mut dyn CpModel, grid: &VacationGrid, p: &VacationCooldownParams) {
    let (_r, n_weeks, n_rotations) = grid.dims();
    if p.window == 0 || p.window > n_weeks {
        return;
    }
    for start in 0..=(n_weeks - p.window) {
        let terms: Vec<Term> = (start..start + p.window)
            .flat_map(|w| (0..n_rotations).map(move |t| (grid.var(p.resident, w, t), 1)))
            .collect();
        model.add_linear_le(&terms, p.count, &[]);
    }
}

/// `BackupRequiredOnBlock(block, rmin, rmax)`: `Σ_r y[r,block] ∈ [rmin, rmax]`
/// (spec.md §4.4). Grounded on
/// `original_source/sched/cogrid_csts.py::BackupRequiredOnBlockBackupConstraint`.
#[derive(Clone, Debug)]
pub struct BackupRequiredOnBlockParams {
    /// The block this applies to.
    pub block: usize,
    /// Minimum residents required on backup, if any.
    pub rmin: Option<i64>,
    /// Maximum residents allowed on backup, if any.
    pub rmax: Option<i64>,
}

/// See [`BackupRequiredOnBlockParams`].
pub fn apply_backup_required_on_block(model: &mut dyn CpModel, grid: &BackupGrid, p: &BackupRequiredOnBlockParams) {
    let (n_residents, _b) = grid.dims();
    let terms: Vec<Term> = (0..n_residents).map(|r| (grid.var(r, p.block), 1)).collect();
    if let Some(lo) = p.rmin {
        model.add_linear_ge(&terms, lo, &[]);
    }
    if let Some(hi) = p.rmax {
        model.add_linear_le(&terms, hi, &[]);
    }
}

/// `RotationBackupCount(rotation, cap)`: links the backup grid to the main
/// grid — at most `cap` `(resident, block)` pairs may be simultaneously
/// assigned a rotation in the capped set *and* marked on backup, across the
/// whole schedule. `cap = 0` forbids backup from this rotation set entirely
/// (spec.md §9's explicit Open-Question resolution), which is just the
/// degenerate case of the same `≤` bound.
#[derive(Clone, Debug)]
pub struct RotationBackupCountParams {
    /// Rotation ids eligible to be backed up from.
    pub rotations: Vec<usize>,
    /// Max `(r,b)` pairs simultaneously on `rotations` and backup.
    pub cap: i64,
}

/// See [`RotationBackupCountParams`]. `main_eligible(r, b)` returns the
/// disjunction literal `Σ_{t∈rotations} x[r,b,t] ≥ 1` for `(r, b)` (supplied
/// by the caller, which already holds the main grid) — `z[r,b] = eligible ∧
/// y[r,b]` per spec.md §4.4, with the total `Σ z[r,b]` capped globally.
pub fn apply_rotation_backup_count<F>(
    model: &mut dyn CpModel,
    backup: &BackupGrid,
    p: &RotationBackupCountParams,
    mut main_eligible: F,
) where
    F: FnMut(usize, usize) -> Lit,
{
    let (n_residents, n_blocks) = backup.dims();
    let mut terms = Vec::with_capacity(n_residents * n_blocks);
    for r in 0..n_residents {
        for b in 0..n_blocks {
            let eligible = main_eligible(r, b);
            let y = Lit::pos(backup.var(r, b));
            let z = model.new_bool_var(&format!("backup_on_rot[{r},{b}]"));
            // z => (eligible and y)
            model.add_bool_and(&[eligible, y], &[Lit::pos(z)]);
            // (eligible and y) => z, so the cap can't be evaded by forcing z=0
            model.add_bool_and(&[Lit::pos(z)], &[eligible, y]);
            terms.push((z, 1));
        }
    }
    model.add_linear_le(&terms, p.cap, &[]);
    let _ = &p.rotations;
}

/// `BackupEligibleBlocks(rotation -> bool)`: a resident may only be marked
/// backup on a block where their assigned rotation is backup-eligible.
/// Grounded on `original_source/sched/cogrid_csts.py`'s
/// `BackupEligibleBlocksBackupConstraint`, keyed off each rotation's
/// `backup_eligible` group membership.
#[derive(Clone, Debug)]
pub struct BackupEligibleBlocksParams {
    /// `eligible[t]` is true when rotation `t` may be backed up from.
    pub eligible: Vec<bool>,
}

/// `x[r,b,t]=1 ⇒ y[r,b] ≤ eligible[t]`: for every ineligible rotation `t`,
/// being assigned to it forbids backup duty that block.
pub fn apply_backup_eligible_blocks(
    model: &mut dyn CpModel,
    backup: &BackupGrid,
    main: &MainGrid,
    p: &BackupEligibleBlocksParams,
) {
    let (n_residents, n_blocks, n_rotations) = main.dims();
    for r in 0..n_residents {
        for b in 0..n_blocks {
            for t in 0..n_rotations {
                if !p.eligible.get(t).copied().unwrap_or(true) {
                    model.add_implication(Lit::pos(main.var(r, b, t)), Lit::neg(backup.var(r, b)));
                }
            }
        }
    }
}

/// `BanBackupBlock(resident, block)`: `y[resident, block] = 0`.
#[derive(Clone, Debug)]
pub struct BanBackupBlockParams {
    /// Resident this applies to.
    pub resident: usize,
    /// The banned block.
    pub block: usize,
}

/// See [`BanBackupBlockParams`].
pub fn apply_ban_backup_block(model: &mut dyn CpModel, grid: &BackupGrid, p: &BanBackupBlockParams) {
    model.add_linear_eq(&[(grid.var(p.resident, p.block), 1)], 0, &[]);
}
