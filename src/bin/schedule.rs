//! CLI driver for the rotation-schedule constraint compiler.
//!
//! Loads a YAML config plus optional CSV side-channels, compiles the model,
//! runs it to a solution (or exhausts the search), and writes the schedule
//! (and optional vacation table) as CSV. Hand-rolled flag parsing in the
//! `bin/prover.rs` idiom — no `clap` — since the flag set is small and fixed.
//! Grounded on `original_source/solver.py::parse_args`/`main` for the flag
//! set and control flow, adapted to this crate's own constraint/grid/score
//! types rather than the OR-tools objects `solver.py` builds directly.

use std::collections::HashMap;
use std::env;
use std::fs;

use rotasat::callback::{SolutionPrinter, SolutionReport, VacationReport};
use rotasat::config::{
    load_config, read_block_resident_ranking_csv, read_coverage_csv, read_rankings_csv, read_rotation_pins_csv,
};
use rotasat::constraints::Constraint;
use rotasat::model::reference::RefSolver;
use rotasat::model::{Control, SolveStatus};
use rotasat::orchestrator::{self, Hint, OrchestratorParams};
use rotasat::registry::EntityRegistry;
use rotasat::score::{BlockResidentRanking, RotationRankings, ScoreAggregator};

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

/// Like [`parse_flag`] but for flags that take two positional values, e.g.
/// `--block-resident-ranking <rotation> <path>`.
fn parse_flag2(args: &[String], key: &str) -> Option<(String, String)> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            let first = it.next()?.clone();
            let second = it.next()?.clone();
            return Some((first, second));
        }
    }
    None
}

/// `--score-list`: a long-form CSV (`resident,rotation,weight`) folded into
/// the same `(resident, rotation) -> weight` currency as `--rankings`,
/// summed with it rather than kept as a separate per-grid objective the way
/// `original_source/solver.py`'s repeatable `--score-list GRID FILE` does —
/// this crate's objective is defined only over the main grid (spec.md §4.5),
/// so a grid-qualified score payload has nothing else to target. Recorded
/// as a resolved Open Question in DESIGN.md.
fn read_score_list_csv(path: &str, registry: &EntityRegistry) -> anyhow::Result<HashMap<(usize, usize), i64>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| anyhow::anyhow!("read score-list {path}: {e}"))?;
    let mut out = HashMap::new();
    for record in reader.records() {
        let record = record.map_err(|e| anyhow::anyhow!("score-list {path}: {e}"))?;
        let resident = record
            .get(0)
            .ok_or_else(|| anyhow::anyhow!("score-list {path}: row missing resident column"))?;
        let rotation = record
            .get(1)
            .ok_or_else(|| anyhow::anyhow!("score-list {path}: row missing rotation column"))?;
        let weight: i64 = record
            .get(2)
            .ok_or_else(|| anyhow::anyhow!("score-list {path}: row missing weight column"))?
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("score-list {path}: non-integer weight"))?;
        let r = registry.resident_id(resident)?;
        let t = registry.rotation_id(rotation)?;
        *out.entry((r, t)).or_insert(0) += weight;
    }
    Ok(out)
}

/// `--hint`: a CSV in this crate's own solution-output shape (`block` as the
/// index column, resident names as the remaining columns, a `+`-suffixed
/// rotation name marking backup duty), matching
/// `original_source/solver.py`'s `pd.read_csv(args.hint, ...).replace(r'\+',
/// '', regex=True)` load of a prior solution to seed the search.
fn read_hint_csv(path: &str, registry: &EntityRegistry) -> anyhow::Result<Hint> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| anyhow::anyhow!("read hint {path}: {e}"))?;
    let headers = reader.headers().map_err(|e| anyhow::anyhow!("hint {path}: {e}"))?.clone();
    let resident_names: Vec<String> = headers.iter().skip(1).map(|s| s.to_string()).collect();
    let mut residents = Vec::with_capacity(resident_names.len());
    for name in &resident_names {
        residents.push(registry.resident_id(name)?);
    }

    let mut main = HashMap::new();
    let mut backup = HashMap::new();
    for record in reader.records() {
        let record = record.map_err(|e| anyhow::anyhow!("hint {path}: {e}"))?;
        let block_name = record
            .get(0)
            .ok_or_else(|| anyhow::anyhow!("hint {path}: row missing block column"))?;
        let block = registry.block_id(block_name)?;
        for (i, cell) in record.iter().skip(1).enumerate() {
            let cell = cell.trim();
            if cell.is_empty() {
                continue;
            }
            let is_backup = cell.ends_with('+');
            let rotation_name = cell.trim_end_matches('+');
            let rotation = registry.rotation_id(rotation_name)?;
            let resident = residents[i];
            main.insert(vec![resident, block, rotation], 1);
            if is_backup {
                backup.insert(vec![resident, block], 1);
            }
        }
    }

    let mut grids = HashMap::new();
    grids.insert("main".to_string(), main);
    if !backup.is_empty() {
        grids.insert("backup".to_string(), backup);
    }
    Ok(Hint { grids })
}

/// `--dump-model`: a diagnostic summary of the compiled registry and
/// constraint list, written immediately before search starts. Grounded on
/// `original_source/schedulomicon/solve.py::solve` building `grids` as an
/// inspectable dict before handing it to the solver; this crate exposes a
/// JSON summary rather than the full grid/constraint structures (those
/// aren't `Serialize`), which is enough to audit what a config compiled to
/// without running search.
fn dump_model_json(registry: &EntityRegistry, constraints: &[Constraint]) -> serde_json::Value {
    let resident_names: Vec<&str> = (0..registry.n_residents()).map(|i| registry.resident_name(i)).collect();
    let block_names: Vec<&str> = (0..registry.n_blocks()).map(|i| registry.block_name(i)).collect();
    let rotation_names: Vec<&str> = (0..registry.n_rotations()).map(|i| registry.rotation_name(i)).collect();
    let kinds: Vec<&str> = constraints.iter().map(|c| c.kind_name()).collect();
    serde_json::json!({
        "residents": resident_names,
        "blocks": block_names,
        "rotations": rotation_names,
        "constraint_count": constraints.len(),
        "constraint_kinds": kinds,
    })
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    let config_path = parse_flag(&args, "--config").ok_or_else(|| anyhow::anyhow!("--config is required"))?;
    let results_path = parse_flag(&args, "--results").ok_or_else(|| anyhow::anyhow!("--results is required"))?;

    let yaml_text =
        fs::read_to_string(&config_path).map_err(|e| anyhow::anyhow!("read config {config_path}: {e}"))?;
    let mut cfg = load_config(&yaml_text).map_err(|e| anyhow::anyhow!("{e}"))?;

    eprintln!("Residents: {}", cfg.registry.n_residents());
    eprintln!("Blocks: {}", cfg.registry.n_blocks());
    eprintln!("Rotations: {}", cfg.registry.n_rotations());

    if let Some(path) = parse_flag(&args, "--coverage-min") {
        let extra = read_coverage_csv(&path, &cfg.registry, true).map_err(|e| anyhow::anyhow!("{e}"))?;
        cfg.constraints.extend(extra);
    }
    if let Some(path) = parse_flag(&args, "--coverage-max") {
        let extra = read_coverage_csv(&path, &cfg.registry, false).map_err(|e| anyhow::anyhow!("{e}"))?;
        cfg.constraints.extend(extra);
    }
    if let Some(path) = parse_flag(&args, "--rotation-pins") {
        let extra = read_rotation_pins_csv(&path, &cfg.registry).map_err(|e| anyhow::anyhow!("{e}"))?;
        cfg.constraints.extend(extra);
    }

    let mut rankings_map: HashMap<(usize, usize), i64> = HashMap::new();
    if let Some(path) = parse_flag(&args, "--rankings") {
        let loaded = read_rankings_csv(&path, &cfg.registry).map_err(|e| anyhow::anyhow!("{e}"))?;
        for (k, v) in loaded {
            *rankings_map.entry(k).or_insert(0) += v;
        }
    }
    if let Some(path) = parse_flag(&args, "--score-list") {
        let loaded = read_score_list_csv(&path, &cfg.registry)?;
        for (k, v) in loaded {
            *rankings_map.entry(k).or_insert(0) += v;
        }
    }

    let mut scores = ScoreAggregator::new();
    if !rankings_map.is_empty() {
        scores = scores.with_rankings(RotationRankings::new(rankings_map));
    }
    if let Some((rotation, path)) = parse_flag2(&args, "--block-resident-ranking") {
        let (rotation_id, table) =
            read_block_resident_ranking_csv(&path, &cfg.registry, &rotation).map_err(|e| anyhow::anyhow!("{e}"))?;
        scores = scores.with_block_overlay(BlockResidentRanking { rotation: rotation_id, scores: table });
    }

    let hint = match parse_flag(&args, "--hint") {
        Some(path) => Some(read_hint_csv(&path, &cfg.registry)?),
        None => None,
    };

    if let Some(path) = parse_flag(&args, "--dump-model") {
        let summary = dump_model_json(&cfg.registry, &cfg.constraints);
        let text = serde_json::to_string_pretty(&summary)?;
        fs::write(&path, text).map_err(|e| anyhow::anyhow!("write dump-model {path}: {e}"))?;
        eprintln!("Model summary written to {path}");
    }

    let num_search_workers: u32 = parse_flag(&args, "-p")
        .or_else(|| env::var("N_THREADS").ok())
        .and_then(|s| s.parse().ok())
        .unwrap_or(1);
    let solution_limit: Option<usize> = parse_flag(&args, "-n").and_then(|s| s.parse().ok());
    let min_individual_rank_cap: Option<i64> =
        parse_flag(&args, "--min-individual-rank").and_then(|s| s.parse().ok());

    let params = OrchestratorParams {
        num_search_workers,
        max_time_in_seconds: None,
        enumerate_all_solutions: solution_limit.is_some(),
        solution_limit,
        min_individual_rank_cap,
    };

    eprintln!("Starting search with {num_search_workers} worker(s)...");

    let mut solver = RefSolver::new();
    let mut printer = SolutionPrinter::new(&cfg.registry).with_scores(&scores);
    let mut last_report: Option<(SolutionReport, Option<VacationReport>)> = None;

    let result = orchestrator::run(&mut solver, &cfg, &scores, hint.as_ref(), &params, |solution| {
        last_report = Some(printer.on_solution(solution));
        Control::Continue
    })
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    eprintln!("status: {:?}", result.status);
    eprintln!("solutions found: {}", result.solution_count);
    eprintln!("wall time: {:.3}s", result.runtime.as_secs_f64());

    match result.status {
        SolveStatus::Optimal | SolveStatus::Feasible => {
            let (report, vacation) = last_report.expect("a solution was found");
            let out =
                fs::File::create(&results_path).map_err(|e| anyhow::anyhow!("create {results_path}: {e}"))?;
            report.write_csv(&cfg.registry, out).map_err(|e| anyhow::anyhow!("write {results_path}: {e}"))?;
            eprintln!("Best solution at {results_path}");

            if let Some(vacation_path) = parse_flag(&args, "--vacation") {
                match vacation {
                    Some(v) => {
                        let out = fs::File::create(&vacation_path)
                            .map_err(|e| anyhow::anyhow!("create {vacation_path}: {e}"))?;
                        v.write_csv(&cfg.registry, out).map_err(|e| anyhow::anyhow!("write {vacation_path}: {e}"))?;
                        eprintln!("Vacation solution at {vacation_path}");
                    }
                    None => return Err(anyhow::anyhow!("--vacation given but no vacation cogrid was built")),
                }
            }
            Ok(())
        }
        SolveStatus::Infeasible | SolveStatus::Unknown | SolveStatus::ModelInvalid => {
            eprintln!("No solution found.");
            std::process::exit(2);
        }
    }
}
