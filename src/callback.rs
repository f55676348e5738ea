//! Solution Callback & Reporting (spec.md §4.7).
//!
//! Turns one accepted [`crate::orchestrator::Solution`] into the
//! resident×block CSV shape and per-resident utility summary the CLI
//! prints/writes, and decides when to stop an enumeration search. Grounded
//! on `original_source/sched/callback.py`'s `BaseSolutionPrinter` (solution
//! counting, `StopSearch` gating) and `JugScheduleSolutionPrinter`/
//! `BlockSchedulePartialSolutionPrinter` (the resident×block dataframe with
//! `+`-suffixed backup marking, and the worst/best per-resident utility
//! report).

use std::io::Write;

use tracing::info;

use crate::grid::GridRef;
use crate::model::Control;
use crate::orchestrator::Solution;
use crate::registry::EntityRegistry;
use crate::score::ScoreAggregator;

/// One solution's resident×block assignment grid, with backup duty marked.
/// Mirrors `callback.py::df_from_solution`'s dataframe shape: rows are
/// blocks, columns are residents, cells are rotation names (suffixed `+`
/// when the resident is also on backup that block).
pub struct SolutionReport {
    /// `cells[block][resident]` is the assigned rotation name, `+`-suffixed
    /// if the resident is on backup duty that block.
    pub cells: Vec<Vec<String>>,
}

impl SolutionReport {
    /// Build a report from a solution snapshot and the registry used to
    /// name residents/blocks/rotations.
    pub fn from_solution(solution: &Solution<'_>, registry: &EntityRegistry) -> Self {
        let n_residents = registry.n_residents();
        let n_blocks = registry.n_blocks();
        let n_rotations = registry.n_rotations();

        let main = match solution.grids.by_name("main") {
            Some(GridRef::Main(m)) => m,
            _ => panic!("solution reported with no main grid"),
        };
        let backup = match solution.grids.by_name("backup") {
            Some(GridRef::Backup(b)) => Some(b),
            _ => None,
        };

        let mut cells = vec![vec![String::new(); n_residents]; n_blocks];
        for b in 0..n_blocks {
            for r in 0..n_residents {
                for t in 0..n_rotations {
                    if (solution.value)(main.var(r, b, t)) != 0 {
                        let mut name = rotation_name(registry, t);
                        if let Some(bgrid) = backup {
                            if (solution.value)(bgrid.var(r, b)) != 0 {
                                name.push('+');
                            }
                        }
                        cells[b][r] = name;
                        break;
                    }
                }
            }
        }
        SolutionReport { cells }
    }

    /// Write the report as a wide CSV: header row of resident names, then
    /// one row per block, matching `io.py::write_solution`'s shape exactly.
    pub fn write_csv<W: Write>(&self, registry: &EntityRegistry, writer: W) -> Result<(), csv::Error> {
        let mut w = csv::Writer::from_writer(writer);
        let mut header = vec!["block".to_string()];
        header.extend((0..registry.n_residents()).map(|r| resident_name(registry, r)));
        w.write_record(&header)?;
        for (b, row) in self.cells.iter().enumerate() {
            let mut record = vec![block_name(registry, b)];
            record.extend(row.iter().cloned());
            w.write_record(&record)?;
        }
        w.flush()?;
        Ok(())
    }
}

/// One solution's vacation-week assignment, mirroring
/// `callback.py::vacation_df`'s `(resident, week, rotation)` rows.
pub struct VacationReport {
    /// `(resident, week, rotation)` triples currently on vacation.
    pub entries: Vec<(usize, usize, usize)>,
}

impl VacationReport {
    /// Build from a solution, if a vacation co-grid is present.
    pub fn from_solution(solution: &Solution<'_>) -> Option<Self> {
        let vacation = match solution.grids.by_name("vacation") {
            Some(GridRef::Vacation(v)) => v,
            _ => return None,
        };
        let (n_residents, n_weeks, n_rotations) = vacation.dims();
        let mut entries = Vec::new();
        for r in 0..n_residents {
            for w in 0..n_weeks {
                for t in 0..n_rotations {
                    if (solution.value)(vacation.var(r, w, t)) != 0 {
                        entries.push((r, w, t));
                    }
                }
            }
        }
        Some(VacationReport { entries })
    }

    /// Write the report as a CSV of `(resident, week, rotation)` rows,
    /// mirroring `callback.py::vacation_df`'s long-form table.
    pub fn write_csv<W: Write>(&self, registry: &EntityRegistry, writer: W) -> Result<(), csv::Error> {
        let mut w = csv::Writer::from_writer(writer);
        w.write_record(["resident", "week", "rotation"])?;
        for &(r, week, t) in &self.entries {
            w.write_record([resident_name(registry, r), week.to_string(), rotation_name(registry, t)])?;
        }
        w.flush()?;
        Ok(())
    }
}

fn resident_name(registry: &EntityRegistry, r: usize) -> String {
    registry.resident_name(r).to_string()
}

fn block_name(registry: &EntityRegistry, b: usize) -> String {
    registry.block_name(b).to_string()
}

fn rotation_name(registry: &EntityRegistry, t: usize) -> String {
    registry.rotation_name(t).to_string()
}

/// Per-solution reporting state, mirroring `BaseSolutionPrinter`'s instance
/// fields: a running solution count, the registry for naming, and the score
/// aggregator for the worst/best utility summary
/// (`JugScheduleSolutionPrinter.on_solution_callback`).
pub struct SolutionPrinter<'a> {
    registry: &'a EntityRegistry,
    scores: Option<&'a ScoreAggregator>,
    solution_count: usize,
}

impl<'a> SolutionPrinter<'a> {
    /// A printer with no score aggregator — utility reporting is skipped.
    pub fn new(registry: &'a EntityRegistry) -> Self {
        SolutionPrinter { registry, scores: None, solution_count: 0 }
    }

    /// Attach a score aggregator to enable worst/best utility reporting.
    pub fn with_scores(mut self, scores: &'a ScoreAggregator) -> Self {
        self.scores = Some(scores);
        self
    }

    /// How many solutions this printer has observed so far.
    pub fn solution_count(&self) -> usize {
        self.solution_count
    }

    /// Log one solution and build its report. Mirrors
    /// `on_solution_callback_initial`'s "Solution NN ... objective value"
    /// line plus the worst/best resident utility lines.
    pub fn on_solution(&mut self, solution: &Solution<'_>) -> (SolutionReport, Option<VacationReport>) {
        self.solution_count += 1;
        info!(
            solution = self.solution_count,
            objective_value = solution.objective_value,
            "accepted schedule solution"
        );

        let report = SolutionReport::from_solution(solution, self.registry);
        let vacation = VacationReport::from_solution(solution);

        if let Some(scores) = self.scores {
            let main = match solution.grids.by_name("main") {
                Some(GridRef::Main(m)) => m,
                _ => unreachable!("main grid always present"),
            };
            let totals = scores.per_resident_totals(main, |v| (solution.value)(v));
            if let (Some(&worst), Some(&best)) = (totals.iter().max(), totals.iter().min()) {
                info!(worst_resident_utility = worst, best_resident_utility = best, "per-resident utility spread");
            }
        }

        (report, vacation)
    }
}

/// A ready-to-use `FnMut(&Solution) -> Control` that logs, reports, and
/// requests a stop once `limit` solutions have been observed — the
/// `check_for_stop_iterating` half of `BaseSolutionPrinter`. The orchestrator
/// already enforces a hard solution cap via
/// [`crate::orchestrator::OrchestratorParams::solution_limit`]; this wrapper
/// exists for callers driving `CpModel::solve` directly without going
/// through the orchestrator.
pub fn stop_after<'a>(mut printer: SolutionPrinter<'a>, limit: Option<usize>) -> impl FnMut(&Solution<'_>) -> Control + 'a {
    move |solution| {
        let _ = printer.on_solution(solution);
        match limit {
            Some(n) if printer.solution_count() >= n => Control::Stop,
            _ => Control::Continue,
        }
    }
}
