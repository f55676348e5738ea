//! End-to-end scenarios driving the whole pipeline (YAML -> grids ->
//! constraints -> search) against [`RefSolver`], one per constraint family
//! spec.md §8 calls out as a seed case. Each scenario is sized small enough
//! for the backtracking reference backend to exhaust in well under a
//! second, per `model::reference`'s own sizing note.

use std::collections::HashMap;

use rotasat::config::load_config;
use rotasat::model::reference::RefSolver;
use rotasat::model::{Control, SolveStatus};
use rotasat::orchestrator::{self, OrchestratorParams};
use rotasat::score::{BlockResidentRanking, RotationRankings, ScoreAggregator};

/// A 3x3x3 Latin square: coverage + rot_count force every resident onto
/// every rotation exactly once, across many possible block orderings. A
/// block-specific overlay on `Ro1` makes the diagonal placement (R1@Bl1,
/// R2@Bl2, R3@Bl3) strictly cheaper than every other valid ordering, so the
/// optimizer must land there. Grounded on `original_source/sched/solve.py`'s
/// `run_optimizer` (search to a proven optimum, not just any feasible leaf).
#[test]
fn latin_square_diagonal_preference_is_optimal() {
    let yaml = r#"
residents:
  R1: {}
  R2: {}
  R3: {}
blocks:
  Bl1: {}
  Bl2: {}
  Bl3: {}
rotations:
  Ro1:
    coverage: [1, 1]
    rot_count: [1, 1]
  Ro2:
    coverage: [1, 1]
    rot_count: [1, 1]
  Ro3:
    coverage: [1, 1]
    rot_count: [1, 1]
"#;
    let cfg = load_config(yaml).unwrap();
    let ro1 = cfg.registry.rotation_id("Ro1").unwrap();
    let r1 = cfg.registry.resident_id("R1").unwrap();
    let r2 = cfg.registry.resident_id("R2").unwrap();
    let r3 = cfg.registry.resident_id("R3").unwrap();
    let bl1 = cfg.registry.block_id("Bl1").unwrap();
    let bl2 = cfg.registry.block_id("Bl2").unwrap();
    let bl3 = cfg.registry.block_id("Bl3").unwrap();

    let mut diagonal = HashMap::new();
    diagonal.insert((r1, bl1), -5);
    diagonal.insert((r2, bl2), -5);
    diagonal.insert((r3, bl3), -5);
    let scores = ScoreAggregator::new().with_block_overlay(BlockResidentRanking { rotation: ro1, scores: diagonal });

    let mut solver = RefSolver::new();
    let params = OrchestratorParams::default();
    let mut last_objective = None;
    let mut last_diagonal_cells = None;
    let result = orchestrator::run(&mut solver, &cfg, &scores, None, &params, |sol| {
        let main = sol.grids.main.as_ref().unwrap();
        last_objective = Some(sol.objective_value);
        last_diagonal_cells =
            Some([(sol.value)(main.var(r1, bl1, ro1)), (sol.value)(main.var(r2, bl2, ro1)), (sol.value)(main.var(r3, bl3, ro1))]);
        Control::Continue
    })
    .unwrap();

    assert_eq!(result.status, SolveStatus::Optimal);
    assert_eq!(last_objective, Some(-15));
    assert_eq!(last_diagonal_cells, Some([1, 1, 1]));
}

/// `cool_down(Ro1, window=3, count=1)` with `Ro1` assigned exactly twice
/// forces the two occurrences at least `window` blocks apart. Grounded on
/// `original_source/schedulomicon/csts.py::CoolDownConstraint`.
#[test]
fn cool_down_spaces_out_repeated_rotation() {
    let yaml = r#"
residents:
  R1: {}
blocks:
  Bl1: {}
  Bl2: {}
  Bl3: {}
  Bl4: {}
  Bl5: {}
  Bl6: {}
rotations:
  Ro1:
    rot_count: [2, 2]
    cool_down: {window: 3, count: 1}
  Ro2: {}
  Ro3: {}
"#;
    let cfg = load_config(yaml).unwrap();
    let ro1 = cfg.registry.rotation_id("Ro1").unwrap();
    let r1 = cfg.registry.resident_id("R1").unwrap();

    let mut solver = RefSolver::new();
    let scores = ScoreAggregator::new();
    let params = OrchestratorParams::default();
    let mut ro1_blocks = Vec::new();
    let result = orchestrator::run(&mut solver, &cfg, &scores, None, &params, |sol| {
        let main = sol.grids.main.as_ref().unwrap();
        for b in 0..6 {
            if (sol.value)(main.var(r1, b, ro1)) != 0 {
                ro1_blocks.push(b);
            }
        }
        Control::Stop
    })
    .unwrap();

    assert!(matches!(result.status, SolveStatus::Optimal | SolveStatus::Feasible));
    assert_eq!(ro1_blocks.len(), 2);
    assert!(ro1_blocks[1] - ro1_blocks[0] >= 3);
}

/// `consecutive_count(Ro1, n=4, forbidden_roots={Bl1,Bl3})` combined with
/// `rot_count: [4,4]` admits exactly one feasible placement: a single run of
/// four starting at Bl2, the only block left eligible to start a run after
/// `forbidden_roots` and the end-of-schedule bound both rule out earlier/
/// later starts. Grounded on `original_source/schedulomicon/csts.py`'s
/// `ConsecutiveRotationCountConstraint`/`AllowedRootsConstraint` pairing.
#[test]
fn consecutive_count_forces_unique_run_position() {
    let yaml = r#"
residents:
  R1: {}
blocks:
  Bl1: {}
  Bl2: {}
  Bl3: {}
  Bl4: {}
  Bl5: {}
  Bl6: {}
rotations:
  Ro1:
    rot_count: [4, 4]
    consecutive_count: {count: 4, forbidden_roots: [Bl1, Bl3]}
  Ro2: {}
"#;
    let cfg = load_config(yaml).unwrap();
    let ro1 = cfg.registry.rotation_id("Ro1").unwrap();
    let ro2 = cfg.registry.rotation_id("Ro2").unwrap();
    let r1 = cfg.registry.resident_id("R1").unwrap();

    let mut solver = RefSolver::new();
    let scores = ScoreAggregator::new();
    let params = OrchestratorParams::default();
    let mut row = vec![usize::MAX; 6];
    let result = orchestrator::run(&mut solver, &cfg, &scores, None, &params, |sol| {
        let main = sol.grids.main.as_ref().unwrap();
        for b in 0..6 {
            row[b] = if (sol.value)(main.var(r1, b, ro1)) != 0 {
                ro1
            } else {
                ro2
            };
        }
        Control::Stop
    })
    .unwrap();

    assert!(matches!(result.status, SolveStatus::Optimal | SolveStatus::Feasible));
    assert_eq!(row, vec![ro2, ro1, ro1, ro1, ro1, ro2]);
}

/// `ineligible_after(Ro1, {Ro1: 1})` makes `Ro1` ineligible once a resident
/// has already had it once, so at most one `Ro1` is ever achievable; a
/// banned last block rules that block out too. Maximizing `Ro1` usage (via
/// a negative ranking weight) must land on exactly one assignment, never on
/// the banned block. Grounded on
/// `original_source/schedulomicon/csts.py::IneligibleAfterConstraint`.
#[test]
fn ineligible_after_caps_count_and_respects_ban() {
    let yaml = r#"
residents:
  R1: {}
blocks:
  Bl1: {}
  Bl2: {}
  Bl3:
    banned_rotations: [Ro1]
rotations:
  Ro1:
    ineligible_after: {Ro1: 1}
  Ro2: {}
"#;
    let cfg = load_config(yaml).unwrap();
    let ro1 = cfg.registry.rotation_id("Ro1").unwrap();
    let r1 = cfg.registry.resident_id("R1").unwrap();
    let last_block = cfg.registry.block_id("Bl3").unwrap();

    let mut rankings = HashMap::new();
    rankings.insert((r1, ro1), -10);
    let scores = ScoreAggregator::new().with_rankings(rotasat::score::RotationRankings::new(rankings));

    let mut solver = RefSolver::new();
    let params = OrchestratorParams::default();
    let mut last_objective = None;
    let mut ro1_count = 0;
    let mut ro1_on_last_block = false;
    let result = orchestrator::run(&mut solver, &cfg, &scores, None, &params, |sol| {
        let main = sol.grids.main.as_ref().unwrap();
        last_objective = Some(sol.objective_value);
        ro1_count = 0;
        ro1_on_last_block = false;
        for b in 0..3 {
            if (sol.value)(main.var(r1, b, ro1)) != 0 {
                ro1_count += 1;
                if b == last_block {
                    ro1_on_last_block = true;
                }
            }
        }
        Control::Continue
    })
    .unwrap();

    assert_eq!(result.status, SolveStatus::Optimal);
    assert_eq!(last_objective, Some(-10));
    assert_eq!(ro1_count, 1);
    assert!(!ro1_on_last_block);
}

/// `vacation.cooldown(window=2, count=1)` forbids two vacation weeks inside
/// any 2-week window, so the two weeks a resident takes (out of four) must
/// be non-adjacent. Grounded on
/// `original_source/sched/cogrid_csts.py`'s vacation cooldown and
/// `sched/callback.py::vacation_df`.
#[test]
fn vacation_cooldown_keeps_weeks_apart() {
    let yaml = r#"
residents:
  R1: {}
blocks:
  Bl1: {}
  Bl2: {}
  Bl3: {}
  Bl4: {}
rotations:
  Ro1: {}
  Ro2: {}
vacation:
  blocks:
    w0: Bl1
    w1: Bl2
    w2: Bl3
    w3: Bl4
  n_vacations_per_resident: 2
  cooldown:
    window: 2
    count: 1
"#;
    let cfg = load_config(yaml).unwrap();

    let mut solver = RefSolver::new();
    let scores = ScoreAggregator::new();
    let params = OrchestratorParams::default();
    let mut weeks = Vec::new();
    let result = orchestrator::run(&mut solver, &cfg, &scores, None, &params, |sol| {
        let report = rotasat::callback::VacationReport::from_solution(sol).expect("vacation grid present");
        weeks = report.entries.iter().map(|&(_r, w, _t)| w).collect();
        weeks.sort_unstable();
        Control::Stop
    })
    .unwrap();

    assert!(matches!(result.status, SolveStatus::Optimal | SolveStatus::Feasible));
    assert_eq!(weeks.len(), 2);
    assert!(weeks[1] - weeks[0] >= 2);
}

/// `RotationBackupCount(Ro1, cap=0)` forbids backup duty from ever
/// coinciding with a `Ro1` assignment, even though the resident is required
/// to carry backup on two of the three blocks. Grounded on
/// `original_source/sched/cogrid_csts.py::RotationBackupCountBackupConstraint`.
#[test]
fn rotation_backup_count_zero_forbids_overlap() {
    let yaml = r#"
residents:
  R1: {}
blocks:
  Bl1: {}
  Bl2: {}
  Bl3: {}
rotations:
  Ro1:
    backup_count: 0
  Ro2: {}
backup:
  coverage: 2
"#;
    let cfg = load_config(yaml).unwrap();
    let ro1 = cfg.registry.rotation_id("Ro1").unwrap();
    let r1 = cfg.registry.resident_id("R1").unwrap();

    let mut solver = RefSolver::new();
    let scores = ScoreAggregator::new();
    let params = OrchestratorParams::default();
    let mut overlaps = 0;
    let mut backup_count = 0;
    let result = orchestrator::run(&mut solver, &cfg, &scores, None, &params, |sol| {
        let main = sol.grids.main.as_ref().unwrap();
        let backup = sol.grids.backup.as_ref().unwrap();
        overlaps = 0;
        backup_count = 0;
        for b in 0..3 {
            let on_backup = (sol.value)(backup.var(r1, b)) != 0;
            if on_backup {
                backup_count += 1;
            }
            if on_backup && (sol.value)(main.var(r1, b, ro1)) != 0 {
                overlaps += 1;
            }
        }
        Control::Stop
    })
    .unwrap();

    assert!(matches!(result.status, SolveStatus::Optimal | SolveStatus::Feasible));
    assert_eq!(backup_count, 2);
    assert_eq!(overlaps, 0);
}
