//! Constraint Compiler (spec.md §4.4, §9).
//!
//! A tagged-union `Constraint` enum plus a flat `apply` dispatch, rather than
//! an OOP constraint-class hierarchy — spec.md §9 explicitly recommends a
//! data-driven compiler here, and this crate's actual CP-SAT equivalent,
//! `original_source/schedulomicon/csts.py`, is itself one `Constraint`
//! subclass per kind dispatched from a flat list, which this module mirrors
//! with an enum instead of dynamic dispatch.

pub mod cogrid;
pub mod helpers;
pub mod main_grid;
pub mod scoring;

use thiserror::Error;

use crate::grid::Grids;
use crate::model::{CpModel, ModelError};

pub use cogrid::{
    BackupEligibleBlocksParams, BackupRequiredOnBlockParams, BanBackupBlockParams, ChosenVacationParams,
    RotationBackupCountParams, VacationCooldownParams, VacationMappingParams, VacationPerResidentTotalParams,
    VacationPoolParams,
};
pub use main_grid::{
    AllowedRootsParams, BanRotationBlockParams, ConsecutiveCountParams, CoolDownParams, CoverageParams,
    FieldSumParams, GroupCountPerResidentPerWindowParams, IneligibleAfterParams, MustBeFollowedByParams,
    PinnedRotationParams, Predicate, PrerequisiteParams, RotationCountNotParams, RotationCountParams,
    RotationWindowParams, TimeToFirstParams,
};
pub use scoring::{MinIndividualScoreParams, MinTotalScoreParams};

/// Failure compiling or applying a constraint.
#[derive(Debug, Error)]
pub enum ConstraintError {
    /// The constraint's own bounds are self-contradictory — it can never be
    /// satisfied regardless of the rest of the model (e.g. `rmin > rmax`,
    /// or a resident's prior history already exceeds a declared cap).
    #[error("constraint infeasible at compile time: {0}")]
    Infeasible(String),
    /// Two declared constraints cannot coexist (e.g. `CoolDown` and
    /// `ConsecutiveCount` both targeting the same rotation).
    #[error("incompatible constraints: {0}")]
    Incompatible(String),
    /// The backend rejected a variable or constraint while compiling.
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// One compiled constraint, tagged by kind. Each variant holds exactly the
/// parameters its `apply_*` function in [`main_grid`], [`scoring`], or
/// [`cogrid`] needs; [`Constraint::apply`] dispatches to the right grid.
#[derive(Clone, Debug)]
pub enum Constraint {
    /// See [`main_grid::apply_coverage`].
    Coverage(CoverageParams),
    /// See [`main_grid::apply_rotation_count`].
    RotationCount(RotationCountParams),
    /// See [`main_grid::apply_rotation_count_not`].
    RotationCountNot(RotationCountNotParams),
    /// See [`main_grid::apply_prerequisite`].
    Prerequisite(PrerequisiteParams),
    /// See [`main_grid::apply_ineligible_after`].
    IneligibleAfter(IneligibleAfterParams),
    /// See [`main_grid::apply_must_be_followed_by`].
    MustBeFollowedBy(MustBeFollowedByParams),
    /// See [`main_grid::apply_consecutive_count`].
    ConsecutiveCount(ConsecutiveCountParams),
    /// See [`main_grid::apply_allowed_roots`].
    AllowedRoots(AllowedRootsParams),
    /// See [`main_grid::apply_cool_down`].
    CoolDown(CoolDownParams),
    /// See [`main_grid::apply_group_count_per_resident_per_window`].
    GroupCountPerResidentPerWindow(GroupCountPerResidentPerWindowParams),
    /// See [`main_grid::apply_time_to_first`].
    TimeToFirst(TimeToFirstParams),
    /// See [`main_grid::apply_rotation_window`].
    RotationWindow(RotationWindowParams),
    /// See [`main_grid::apply_pinned_rotation`].
    PinnedRotation(PinnedRotationParams),
    /// See [`main_grid::apply_ban_rotation_block`].
    BanRotationBlock(BanRotationBlockParams),
    /// See [`main_grid::apply_field_sum`].
    FieldSum(FieldSumParams),
    /// See [`scoring::apply_min_individual_score`].
    MinIndividualScore(MinIndividualScoreParams),
    /// See [`scoring::apply_min_total_score`].
    MinTotalScore(MinTotalScoreParams),
    /// See [`cogrid::apply_vacation_mapping`].
    VacationMapping(VacationMappingParams),
    /// See [`cogrid::apply_vacation_pool`].
    VacationPool(VacationPoolParams),
    /// See [`cogrid::apply_vacation_per_resident_total`].
    VacationPerResidentTotal(VacationPerResidentTotalParams),
    /// See [`cogrid::apply_chosen_vacation`].
    ChosenVacation(ChosenVacationParams),
    /// See [`cogrid::apply_vacation_cooldown`].
    VacationCooldown(VacationCooldownParams),
    /// See [`cogrid::apply_backup_required_on_block`].
    BackupRequiredOnBlock(BackupRequiredOnBlockParams),
    /// See [`cogrid::apply_rotation_backup_count`]. The main-grid eligibility
    /// closure is supplied separately by the caller (`compile_all`) since it
    /// needs both grids at once.
    RotationBackupCount(RotationBackupCountParams),
    /// See [`cogrid::apply_backup_eligible_blocks`].
    BackupEligibleBlocks(BackupEligibleBlocksParams),
    /// See [`cogrid::apply_ban_backup_block`].
    BanBackupBlock(BanBackupBlockParams),
}

impl Constraint {
    /// Human-readable kind name, used by `CoolDown`/`ConsecutiveCount`
    /// incompatibility checks and diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Constraint::Coverage(_) => "Coverage",
            Constraint::RotationCount(_) => "RotationCount",
            Constraint::RotationCountNot(_) => "RotationCountNot",
            Constraint::Prerequisite(_) => "Prerequisite",
            Constraint::IneligibleAfter(_) => "IneligibleAfter",
            Constraint::MustBeFollowedBy(_) => "MustBeFollowedBy",
            Constraint::ConsecutiveCount(_) => "ConsecutiveCount",
            Constraint::AllowedRoots(_) => "AllowedRoots",
            Constraint::CoolDown(_) => "CoolDown",
            Constraint::GroupCountPerResidentPerWindow(_) => "GroupCountPerResidentPerWindow",
            Constraint::TimeToFirst(_) => "TimeToFirst",
            Constraint::RotationWindow(_) => "RotationWindow",
            Constraint::PinnedRotation(_) => "PinnedRotation",
            Constraint::BanRotationBlock(_) => "BanRotationBlock",
            Constraint::FieldSum(_) => "FieldSum",
            Constraint::MinIndividualScore(_) => "MinIndividualScore",
            Constraint::MinTotalScore(_) => "MinTotalScore",
            Constraint::VacationMapping(_) => "VacationMapping",
            Constraint::VacationPool(_) => "VacationPool",
            Constraint::VacationPerResidentTotal(_) => "VacationPerResidentTotal",
            Constraint::ChosenVacation(_) => "ChosenVacation",
            Constraint::VacationCooldown(_) => "VacationCooldown",
            Constraint::BackupRequiredOnBlock(_) => "BackupRequiredOnBlock",
            Constraint::RotationBackupCount(_) => "RotationBackupCount",
            Constraint::BackupEligibleBlocks(_) => "BackupEligibleBlocks",
            Constraint::BanBackupBlock(_) => "BanBackupBlock",
        }
    }

    /// The rotation id this constraint targets, if it targets exactly one —
    /// used only for the `CoolDown`/`ConsecutiveCount` incompatibility check.
    fn single_rotation_target(&self) -> Option<usize> {
        match self {
            Constraint::ConsecutiveCount(p) => Some(p.rotation),
            Constraint::CoolDown(p) => Some(p.rotation),
            _ => None,
        }
    }
}

/// Compile every declared constraint against `grids`, in order, validating
/// the `CoolDown`/`ConsecutiveCount` mutual-exclusion rule first (spec.md
/// §4.4 notes the two are mutually exclusive on the same rotation since a
/// cooldown cap and a fixed run length can both become unsatisfiable
/// together in ways that are easier to reject up front than to encode).
pub fn compile_all(model: &mut dyn CpModel, grids: &Grids, constraints: &[Constraint]) -> Result<(), ConstraintError> {
    check_cooldown_consecutive_conflict(constraints)?;

    let main = grids.main.as_ref();
    let backup = grids.backup.as_ref();
    let vacation = grids.vacation.as_ref();

    for c in constraints {
        match c {
            Constraint::Coverage(p) => {
                let grid = require_main(main)?;
                main_grid::apply_coverage(model, grid, p)?;
            }
            Constraint::RotationCount(p) => {
                let grid = require_main(main)?;
                main_grid::apply_rotation_count(model, grid, p)?;
            }
            Constraint::RotationCountNot(p) => {
                let grid = require_main(main)?;
                main_grid::apply_rotation_count_not(model, grid, p)?;
            }
            Constraint::Prerequisite(p) => {
                let grid = require_main(main)?;
                main_grid::apply_prerequisite(model, grid, p)?;
            }
            Constraint::IneligibleAfter(p) => {
                let grid = require_main(main)?;
                main_grid::apply_ineligible_after(model, grid, p)?;
            }
            Constraint::MustBeFollowedBy(p) => {
                let grid = require_main(main)?;
                main_grid::apply_must_be_followed_by(model, grid, p);
            }
            Constraint::ConsecutiveCount(p) => {
                let grid = require_main(main)?;
                main_grid::apply_consecutive_count(model, grid, p);
            }
            Constraint::AllowedRoots(p) => {
                let grid = require_main(main)?;
                main_grid::apply_allowed_roots(model, grid, p);
            }
            Constraint::CoolDown(p) => {
                let grid = require_main(main)?;
                main_grid::apply_cool_down(model, grid, p);
            }
            Constraint::GroupCountPerResidentPerWindow(p) => {
                let grid = require_main(main)?;
                main_grid::apply_group_count_per_resident_per_window(model, grid, p);
            }
            Constraint::TimeToFirst(p) => {
                let grid = require_main(main)?;
                main_grid::apply_time_to_first(model, grid, p);
            }
            Constraint::RotationWindow(p) => {
                let grid = require_main(main)?;
                main_grid::apply_rotation_window(model, grid, p);
            }
            Constraint::PinnedRotation(p) => {
                let grid = require_main(main)?;
                main_grid::apply_pinned_rotation(model, grid, p);
            }
            Constraint::BanRotationBlock(p) => {
                let grid = require_main(main)?;
                main_grid::apply_ban_rotation_block(model, grid, p);
            }
            Constraint::FieldSum(p) => {
                let grid = require_main(main)?;
                main_grid::apply_field_sum(model, grid, p);
            }
            Constraint::MinIndividualScore(p) => {
                scoring::apply_min_individual_score(model, p)?;
            }
            Constraint::MinTotalScore(p) => {
                scoring::apply_min_total_score(model, p);
            }
            Constraint::VacationMapping(p) => {
                let vgrid = require_vacation(vacation)?;
                let mgrid = require_main(main)?;
                cogrid::apply_vacation_mapping(model, vgrid, mgrid, p)?;
            }
            Constraint::VacationPool(p) => {
                let grid = require_vacation(vacation)?;
                cogrid::apply_vacation_pool(model, grid, p);
            }
            Constraint::VacationPerResidentTotal(p) => {
                let grid = require_vacation(vacation)?;
                cogrid::apply_vacation_per_resident_total(model, grid, p);
            }
            Constraint::ChosenVacation(p) => {
                let grid = require_vacation(vacation)?;
                cogrid::apply_chosen_vacation(model, grid, p);
            }
            Constraint::VacationCooldown(p) => {
                let grid = require_vacation(vacation)?;
                cogrid::apply_vacation_cooldown(model, grid, p);
            }
            Constraint::BackupRequiredOnBlock(p) => {
                let grid = require_backup(backup)?;
                cogrid::apply_backup_required_on_block(model, grid, p);
            }
            Constraint::RotationBackupCount(p) => {
                let bgrid = require_backup(backup)?;
                let mgrid = require_main(main)?;
                cogrid::apply_rotation_backup_count(model, bgrid, p, |r, b| {
                    let lits: Vec<_> = p.rotations.iter().map(|&t| crate::model::Lit::pos(mgrid.var(r, b, t))).collect();
                    // Fold the disjunction into one aux bool the implication can target.
                    let aux = model_new_bool(model, &format!("backup_elig[{r},{b}]"));
                    model.add_bool_or(&lits, &[crate::model::Lit::pos(aux)]);
                    for l in &lits {
                        model.add_implication(*l, crate::model::Lit::pos(aux));
                    }
                    crate::model::Lit::pos(aux)
                });
            }
            Constraint::BackupEligibleBlocks(p) => {
                let bgrid = require_backup(backup)?;
                let mgrid = require_main(main)?;
                cogrid::apply_backup_eligible_blocks(model, bgrid, mgrid, p);
            }
            Constraint::BanBackupBlock(p) => {
                let grid = require_backup(backup)?;
                cogrid::apply_ban_backup_block(model, grid, p);
            }
        }
    }
    Ok(())
}

fn model_new_bool(model: &mut dyn CpModel, name: &str) -> crate::model::VarId {
    model.new_bool_var(name)
}

fn require_main<'a>(main: Option<&'a crate::grid::MainGrid>) -> Result<&'a crate::grid::MainGrid, ConstraintError> {
    main.ok_or_else(|| ConstraintError::Incompatible("constraint targets the main grid but none was built".into()))
}

fn require_backup<'a>(
    backup: Option<&'a crate::grid::BackupGrid>,
) -> Result<&'a crate::grid::BackupGrid, ConstraintError> {
    backup.ok_or_else(|| ConstraintError::Incompatible("constraint targets the backup grid but none was built".into()))
}

fn require_vacation<'a>(
    vacation: Option<&'a crate::grid::VacationGrid>,
) -> Result<&'a crate::grid::VacationGrid, ConstraintError> {
    vacation
        .ok_or_else(|| ConstraintError::Incompatible("constraint targets the vacation grid but none was built".into()))
}

fn check_cooldown_consecutive_conflict(constraints: &[Constraint]) -> Result<(), ConstraintError> {
    use std::collections::HashSet;
    let mut cooldown_targets = HashSet::new();
    let mut consecutive_targets = HashSet::new();
    for c in constraints {
        if let Some(rot) = c.single_rotation_target() {
            match c {
                Constraint::CoolDown(_) => {
                    cooldown_targets.insert(rot);
                }
                Constraint::ConsecutiveCount(_) => {
                    consecutive_targets.insert(rot);
                }
                _ => unreachable!(),
            }
        }
    }
    if let Some(&rot) = cooldown_targets.intersection(&consecutive_targets).next() {
        return Err(ConstraintError::Incompatible(format!(
            "rotation {rot} has both CoolDown and ConsecutiveCount constraints"
        )));
    }
    Ok(())
}
