//! Config/Input plumbing (SPEC_FULL.md §2/§6.1/§10 — ambient stack).
//!
//! Turns the declarative YAML document into an [`EntityRegistry`] plus a flat
//! [`Constraint`] list, and turns the CSV side-channels (coverage bounds,
//! rotation pins, rankings, block-resident rankings) into the same currency.
//! Grounded on `original_source/schedulomicon/io.py`
//! (`process_config`/`generate_*_constraints`/`*_from_csv`) and `util.py`
//! (`resolve_group`, `accumulate_prior_counts`); every shape below mirrors a
//! YAML key the Python loader reads, and every simplification is recorded
//! as an Open Question in DESIGN.md rather than silently guessed.
//!
//! `serde_yaml::Mapping` (not `HashMap`) backs every top-level entity table
//! here specifically so that iteration order matches declaration order in
//! the YAML document — residents/blocks/rotations become axis indices in
//! that order, and nothing about a `HashMap` would guarantee it.

use std::collections::HashMap;

use serde::Deserialize;
use serde_yaml::Value;
use thiserror::Error;

use crate::constraints::{
    AllowedRootsParams, BackupEligibleBlocksParams, BackupRequiredOnBlockParams, BanBackupBlockParams,
    BanRotationBlockParams, ChosenVacationParams, ConsecutiveCountParams, Constraint, CoolDownParams, CoverageParams,
    FieldSumParams, GroupCountPerResidentPerWindowParams, IneligibleAfterParams, MustBeFollowedByParams,
    PinnedRotationParams, Predicate, PrerequisiteParams, RotationBackupCountParams, RotationCountNotParams,
    RotationCountParams, TimeToFirstParams, VacationCooldownParams, VacationMappingParams,
    VacationPerResidentTotalParams, VacationPoolParams,
};
use crate::registry::{Axis, EntityRegistry, RegistryError};
use crate::selector::{self, SelectorError};

/// Failure loading or parsing configuration/CSV input.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The YAML document was structurally invalid for this schema (spec.md
    /// §7's `ConfigMalformed`) — e.g. backup parameters declared without the
    /// top-level `backup` directive, or a malformed constraint shape.
    #[error("configuration malformed: {0}")]
    Malformed(String),
    /// The YAML text itself failed to parse.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// A CSV side-channel failed to parse.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// A name referenced in config/CSV does not resolve.
    #[error(transparent)]
    Name(#[from] RegistryError),
    /// A selector expression in config failed to parse or evaluate.
    #[error(transparent)]
    Selector(#[from] SelectorError),
    /// Reading a side-channel file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Backup grid setup resolved from the top-level `backup` directive.
#[derive(Clone, Debug, Default)]
pub struct BackupSetup {
    /// Whether the backup co-grid is requested at all.
    pub enabled: bool,
    /// Default per-resident backup block count, used when a resident has no
    /// override.
    pub default_count: i64,
    /// Per-resident overrides of the default count.
    pub counts: HashMap<usize, i64>,
}

/// Vacation co-grid setup resolved from the top-level `vacation` directive.
#[derive(Clone, Debug)]
pub struct VacationSetup {
    /// Number of vacation weeks declared.
    pub n_weeks: usize,
    /// For each week, the schedule block indices it overlaps (spec.md §9:
    /// always list-valued; a scalar YAML value is normalized here).
    pub week_to_blocks: Vec<Vec<usize>>,
}

/// Everything a compile needs after loading: the registry, grid-build
/// parameters, and the flat constraint list, all already resolved to
/// indices.
pub struct CompiledConfig {
    /// Resolved entity registry (residents/blocks/rotations/groups).
    pub registry: EntityRegistry,
    /// Backup co-grid setup, if requested.
    pub backup: Option<BackupSetup>,
    /// Vacation co-grid setup, if requested.
    pub vacation: Option<VacationSetup>,
    /// Required per-resident vacation-week count, if a vacation co-grid is
    /// requested.
    pub n_vacations_per_resident: i64,
    /// Every constraint declared by the config, in declaration order.
    pub constraints: Vec<Constraint>,
    /// Per-`(resident, rotation)` ranking scores read from the config's own
    /// per-resident ranking data, if any was supplied this way (most
    /// rankings arrive via `--rankings`, see [`read_rankings_csv`]).
    pub prior_counts: HashMap<(usize, usize), i64>,
}

#[derive(Deserialize)]
struct RawTop {
    residents: serde_yaml::Mapping,
    blocks: serde_yaml::Mapping,
    rotations: serde_yaml::Mapping,
    #[serde(default)]
    vacation: Option<Value>,
    #[serde(default)]
    backup: Value,
    #[serde(default)]
    group_constraints: Vec<serde_yaml::Mapping>,
}

fn ordered_names(map: &serde_yaml::Mapping) -> Vec<String> {
    map.keys().filter_map(|k| k.as_str().map(|s| s.to_string())).collect()
}

fn entity_params(map: &serde_yaml::Mapping, name: &str) -> Option<serde_yaml::Mapping> {
    map.get(&Value::String(name.to_string())).and_then(|v| v.as_mapping().cloned())
}

fn string_list(m: &serde_yaml::Mapping, key: &str) -> Vec<String> {
    m.get(&Value::String(key.to_string()))
        .and_then(|v| v.as_sequence())
        .map(|seq| seq.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
        .unwrap_or_default()
}

fn two_i64(v: &Value) -> Option<(Option<i64>, Option<i64>)> {
    if let Some(seq) = v.as_sequence() {
        if seq.len() == 2 {
            let lo = seq[0].as_i64();
            let hi = seq[1].as_i64();
            return Some((lo, hi));
        }
    }
    if let Some(m) = v.as_mapping() {
        let lo = m.get(&Value::String("min".into())).and_then(Value::as_i64);
        let hi = m.get(&Value::String("max".into())).and_then(Value::as_i64);
        return Some((lo, hi));
    }
    None
}

/// Load a YAML configuration document into a [`CompiledConfig`].
pub fn load_config(yaml_text: &str) -> Result<CompiledConfig, ConfigError> {
    let raw: RawTop = serde_yaml::from_str(yaml_text)?;

    let resident_names = ordered_names(&raw.residents);
    let block_names = ordered_names(&raw.blocks);
    let rotation_names = ordered_names(&raw.rotations);

    let mut registry = EntityRegistry::new(resident_names.clone(), block_names.clone(), rotation_names.clone());

    define_groups(&mut registry, &raw.residents, &resident_names, Axis::Resident)?;
    define_groups(&mut registry, &raw.blocks, &block_names, Axis::Block)?;
    define_groups(&mut registry, &raw.rotations, &rotation_names, Axis::Rotation)?;

    let n_residents = registry.n_residents();
    let n_blocks = registry.n_blocks();
    let n_rotations = registry.n_rotations();

    let prior_counts = accumulate_history(&registry, &raw.residents, &resident_names)?;

    let mut constraints = Vec::new();
    constraints.extend(rotation_constraints(&registry, &raw.rotations, &rotation_names, &prior_counts)?);
    constraints.extend(block_constraints(&registry, &raw.blocks, &block_names)?);
    constraints.extend(resident_constraints(&registry, &raw.residents, &resident_names)?);
    constraints.extend(group_constraints(&registry, &raw.group_constraints)?);

    let backup = backup_setup(&registry, &raw, &mut constraints)?;

    let (vacation, n_vacations_per_resident) = vacation_setup(&registry, &raw.vacation, &mut constraints)?;

    let _ = (n_residents, n_blocks, n_rotations);
    Ok(CompiledConfig { registry, backup, vacation, n_vacations_per_resident, constraints, prior_counts })
}

fn define_groups(
    registry: &mut EntityRegistry,
    map: &serde_yaml::Mapping,
    names: &[String],
    axis: Axis,
) -> Result<(), ConfigError> {
    let mut seen: HashMap<String, Vec<bool>> = HashMap::new();
    for (i, name) in names.iter().enumerate() {
        let Some(params) = entity_params(map, name) else { continue };
        for g in string_list(&params, "groups") {
            let bits = seen.entry(g).or_insert_with(|| vec![false; names.len()]);
            bits[i] = true;
        }
    }
    for (g, bits) in seen {
        registry.define_group(&g, axis, bits);
    }
    Ok(())
}

/// `accumulate_prior_counts`: fold each resident's `history` list of
/// rotation names into a `(resident, rotation) -> count` table.
fn accumulate_history(
    registry: &EntityRegistry,
    residents: &serde_yaml::Mapping,
    resident_names: &[String],
) -> Result<HashMap<(usize, usize), i64>, ConfigError> {
    let mut out = HashMap::new();
    for (ri, name) in resident_names.iter().enumerate() {
        let Some(params) = entity_params(residents, name) else { continue };
        for rot in string_list(&params, "history") {
            let ti = registry.rotation_id(&rot)?;
            *out.entry((ri, ti)).or_insert(0) += 1;
        }
    }
    Ok(out)
}

fn history_for_rotation(history: &HashMap<(usize, usize), i64>, rotation: usize, n_residents: usize) -> Vec<(usize, i64)> {
    (0..n_residents).filter_map(|r| history.get(&(r, rotation)).map(|&c| (r, c))).collect()
}

fn all_residents(n: usize) -> Vec<usize> {
    (0..n).collect()
}

/// Resolve a rotation-or-group name to the rotation ids it denotes (`a
/// single rotation if it names one directly, or the group's members
/// otherwise — mirrors `util.py::resolve_group`'s use alongside direct
/// rotation-name membership checks in `io.py::generate_rotation_constraints`
/// (`must_be_followed_by`)).
fn resolve_rotation_or_group(registry: &EntityRegistry, name: &str) -> Result<Vec<usize>, ConfigError> {
    if let Ok(id) = registry.rotation_id(name) {
        return Ok(vec![id]);
    }
    let mask = registry.resolve(name)?;
    let (_r, _b, t) = (registry.n_residents(), registry.n_blocks(), registry.n_rotations());
    let mut ids: Vec<usize> = (0..t).filter(|&tt| mask.get(0, 0, tt)).collect();
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}

/// Parse a `{group_or_rotation: count}` mapping (or a bare list, each
/// implicitly requiring a count of 1) into `(rotation ids, count)` groups,
/// the shared shape `prerequisite`/`ineligible_after` both use.
fn parse_group_count_map(registry: &EntityRegistry, v: &Value) -> Result<Vec<(Vec<usize>, i64)>, ConfigError> {
    let mut out = Vec::new();
    if let Some(m) = v.as_mapping() {
        for (k, ct) in m {
            let name = k.as_str().ok_or_else(|| ConfigError::Malformed("non-string group key".into()))?;
            let count = ct.as_i64().ok_or_else(|| ConfigError::Malformed(format!("non-integer count for {name}")))?;
            out.push((resolve_rotation_or_group(registry, name)?, count));
        }
    } else if let Some(seq) = v.as_sequence() {
        for item in seq {
            let name = item.as_str().ok_or_else(|| ConfigError::Malformed("non-string group entry".into()))?;
            out.push((resolve_rotation_or_group(registry, name)?, 1));
        }
    } else {
        return Err(ConfigError::Malformed("expected a mapping or list of group names".into()));
    }
    Ok(out)
}

fn rotation_constraints(
    registry: &EntityRegistry,
    rotations: &serde_yaml::Mapping,
    rotation_names: &[String],
    history: &HashMap<(usize, usize), i64>,
) -> Result<Vec<Constraint>, ConfigError> {
    let n_residents = registry.n_residents();
    let n_blocks = registry.n_blocks();
    let mut out = Vec::new();

    for (ti, name) in rotation_names.iter().enumerate() {
        let Some(params) = entity_params(rotations, name) else { continue };

        if let Some(coverage) = params.get(&Value::String("coverage".into())) {
            out.push(Constraint::Coverage(parse_coverage(coverage, ti, n_blocks)?));
        }

        if let Some(v) = params.get(&Value::String("rot_count".into())) {
            out.push(Constraint::RotationCount(parse_rotation_count(registry, v, ti, &HashMap::new())?));
        }
        if let Some(v) = params.get(&Value::String("rot_count_including_history".into())) {
            out.push(Constraint::RotationCount(parse_rotation_count(registry, v, ti, history)?));
        }
        if let Some(v) = params.get(&Value::String("not_rot_count".into())) {
            let k = v.as_i64().ok_or_else(|| ConfigError::Malformed(format!("not_rot_count on {name} must be an integer")))?;
            out.push(Constraint::RotationCountNot(RotationCountNotParams {
                rotation: ti,
                k,
                residents: all_residents(n_residents),
            }));
        }
        if let Some(v) = params.get(&Value::String("prerequisite".into())) {
            let groups = parse_group_count_map(registry, v)?;
            let prior_counts = flatten_history(history);
            out.push(Constraint::Prerequisite(PrerequisiteParams {
                rotation: ti,
                groups,
                residents: all_residents(n_residents),
                prior_counts,
            }));
        }
        if let Some(v) = params.get(&Value::String("ineligible_after".into())) {
            let groups = parse_group_count_map(registry, v)?;
            let prior_counts = flatten_history(history);
            out.push(Constraint::IneligibleAfter(IneligibleAfterParams {
                rotation: ti,
                groups,
                residents: all_residents(n_residents),
                prior_counts,
            }));
        }
        if let Some(v) = params.get(&Value::String("must_be_followed_by".into())) {
            let names = v
                .as_sequence()
                .ok_or_else(|| ConfigError::Malformed(format!("must_be_followed_by on {name} must be a list")))?;
            let mut allowed_next = Vec::new();
            for item in names {
                let n = item.as_str().ok_or_else(|| ConfigError::Malformed("non-string must_be_followed_by entry".into()))?;
                allowed_next.extend(resolve_rotation_or_group(registry, n)?);
            }
            out.push(Constraint::MustBeFollowedBy(MustBeFollowedByParams {
                rotation: ti,
                allowed_next,
                residents: all_residents(n_residents),
            }));
        }
        if params.get(&Value::String("always_paired".into())).and_then(Value::as_bool).unwrap_or(false) {
            out.push(Constraint::ConsecutiveCount(ConsecutiveCountParams {
                rotation: ti,
                n: 2,
                forbidden_roots: Vec::new(),
                allowed_roots: None,
                residents: all_residents(n_residents),
            }));
        }
        if let Some(v) = params.get(&Value::String("consecutive_count".into())) {
            out.push(Constraint::ConsecutiveCount(parse_consecutive_count(registry, v, ti)?));
        }
        if let Some(v) = params.get(&Value::String("allowed_roots".into())) {
            let block_names = v
                .as_sequence()
                .ok_or_else(|| ConfigError::Malformed(format!("allowed_roots on {name} must be a list")))?;
            let mut blocks = Vec::new();
            for b in block_names {
                let bn = b.as_str().ok_or_else(|| ConfigError::Malformed("non-string allowed_roots entry".into()))?;
                blocks.push(registry.block_id(bn)?);
            }
            out.push(Constraint::AllowedRoots(AllowedRootsParams { rotation: ti, blocks, residents: all_residents(n_residents) }));
        }
        if let Some(v) = params.get(&Value::String("cool_down".into())) {
            out.push(Constraint::CoolDown(parse_cool_down(registry, v, ti)?));
        }

        out.extend(field_sum_constraints(registry, &params, name)?);
    }
    Ok(out)
}

fn flatten_history(history: &HashMap<(usize, usize), i64>) -> Vec<((usize, usize), i64)> {
    history.iter().map(|(&k, &v)| (k, v)).collect()
}

fn parse_coverage(v: &Value, rotation: usize, n_blocks: usize) -> Result<CoverageParams, ConfigError> {
    let blocks: Vec<usize> = (0..n_blocks).collect();
    if let Some(m) = v.as_mapping() {
        if let Some(allowed_v) = m.get(&Value::String("allowed_values".into())) {
            let allowed = allowed_v
                .as_sequence()
                .ok_or_else(|| ConfigError::Malformed("coverage.allowed_values must be a list".into()))?
                .iter()
                .map(|x| x.as_i64().ok_or_else(|| ConfigError::Malformed("non-integer in allowed_values".into())))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(CoverageParams { rotations: vec![rotation], blocks, rmin: None, rmax: None, allowed: Some(allowed) });
        }
    }
    let (rmin, rmax) = two_i64(v).ok_or_else(|| ConfigError::Malformed("coverage must be [rmin, rmax] or {allowed_values}".into()))?;
    Ok(CoverageParams { rotations: vec![rotation], blocks, rmin, rmax, allowed: None })
}

fn parse_rotation_count(
    registry: &EntityRegistry,
    v: &Value,
    rotation: usize,
    history: &HashMap<(usize, usize), i64>,
) -> Result<RotationCountParams, ConfigError> {
    let n_residents = registry.n_residents();
    let mut bounds = Vec::new();
    if let Some(m) = v.as_mapping() {
        for (k, spec) in m {
            let name = k.as_str().ok_or_else(|| ConfigError::Malformed("non-string rot_count resident key".into()))?;
            let rid = registry.resident_id(name)?;
            let (lo, hi) = if let Some(scalar) = spec.as_i64() {
                (scalar, scalar)
            } else {
                let (lo, hi) = two_i64(spec).ok_or_else(|| ConfigError::Malformed(format!("bad rot_count spec for {name}")))?;
                (lo.unwrap_or(0), hi.unwrap_or(i64::MAX))
            };
            bounds.push((rid, lo, hi));
        }
    } else {
        let (lo, hi) = if let Some(scalar) = v.as_i64() {
            (scalar, scalar)
        } else {
            let (lo, hi) = two_i64(v).ok_or_else(|| ConfigError::Malformed("bad rot_count spec".into()))?;
            (lo.unwrap_or(0), hi.unwrap_or(i64::MAX))
        };
        for rid in 0..n_residents {
            bounds.push((rid, lo, hi));
        }
    }
    Ok(RotationCountParams { rotation, bounds, prior_counts: history_for_rotation(history, rotation, n_residents) })
}

fn parse_consecutive_count(registry: &EntityRegistry, v: &Value, rotation: usize) -> Result<ConsecutiveCountParams, ConfigError> {
    let m = v.as_mapping().ok_or_else(|| ConfigError::Malformed("consecutive_count must be a mapping".into()))?;
    let n = m
        .get(&Value::String("count".into()))
        .and_then(Value::as_u64)
        .ok_or_else(|| ConfigError::Malformed("consecutive_count.count is required".into()))? as usize;
    let mut forbidden_roots = Vec::new();
    if let Some(seq) = m.get(&Value::String("forbidden_roots".into())).and_then(Value::as_sequence) {
        for b in seq {
            let bn = b.as_str().ok_or_else(|| ConfigError::Malformed("non-string forbidden_roots entry".into()))?;
            forbidden_roots.push(registry.block_id(bn)?);
        }
    }
    let allowed_roots = if let Some(seq) = m.get(&Value::String("allowed_roots".into())).and_then(Value::as_sequence) {
        let mut v = Vec::new();
        for b in seq {
            let bn = b.as_str().ok_or_else(|| ConfigError::Malformed("non-string allowed_roots entry".into()))?;
            v.push(registry.block_id(bn)?);
        }
        Some(v)
    } else {
        None
    };
    Ok(ConsecutiveCountParams {
        rotation,
        n,
        forbidden_roots,
        allowed_roots,
        residents: all_residents(registry.n_residents()),
    })
}

fn parse_cool_down(registry: &EntityRegistry, v: &Value, rotation: usize) -> Result<CoolDownParams, ConfigError> {
    let m = v.as_mapping().ok_or_else(|| ConfigError::Malformed("cool_down must be a mapping".into()))?;
    let window = m
        .get(&Value::String("window".into()))
        .and_then(Value::as_u64)
        .ok_or_else(|| ConfigError::Malformed("cool_down.window is required".into()))? as usize;
    let count = m
        .get(&Value::String("count".into()))
        .and_then(Value::as_i64)
        .ok_or_else(|| ConfigError::Malformed("cool_down.count is required".into()))?;
    let mut suppress_for = Vec::new();
    if let Some(seq) = m.get(&Value::String("suppress_for".into())).and_then(Value::as_sequence) {
        for r in seq {
            let rn = r.as_str().ok_or_else(|| ConfigError::Malformed("non-string suppress_for entry".into()))?;
            suppress_for.push(registry.resident_id(rn)?);
        }
    }
    let residents: Vec<usize> = all_residents(registry.n_residents()).into_iter().filter(|r| !suppress_for.contains(r)).collect();
    Ok(CoolDownParams { rotation, window, count, suppress_for, residents })
}

fn block_constraints(
    registry: &EntityRegistry,
    blocks: &serde_yaml::Mapping,
    block_names: &[String],
) -> Result<Vec<Constraint>, ConfigError> {
    let mut out = Vec::new();
    for (bi, name) in block_names.iter().enumerate() {
        let Some(params) = entity_params(blocks, name) else { continue };
        if let Some(v) = params.get(&Value::String("banned_rotations".into())) {
            let seq = v.as_sequence().ok_or_else(|| ConfigError::Malformed(format!("banned_rotations on {name} must be a list")))?;
            for r in seq {
                let rn = r.as_str().ok_or_else(|| ConfigError::Malformed("non-string banned_rotations entry".into()))?;
                out.push(Constraint::BanRotationBlock(BanRotationBlockParams { block: bi, rotation: registry.rotation_id(rn)? }));
            }
        }
        out.extend(field_sum_constraints(registry, &params, name)?);
    }
    Ok(out)
}

fn resident_constraints(
    registry: &EntityRegistry,
    residents: &serde_yaml::Mapping,
    resident_names: &[String],
) -> Result<Vec<Constraint>, ConfigError> {
    let mut out = Vec::new();
    for (ri, name) in resident_names.iter().enumerate() {
        let Some(params) = entity_params(residents, name) else { continue };

        if let Some(seq) = params.get(&Value::String("true_somewhere".into())).and_then(Value::as_sequence) {
            for sel in seq {
                let sel_str = sel.as_str().ok_or_else(|| ConfigError::Malformed("non-string true_somewhere entry".into()))?;
                let mask = selector::mask(&format!("{name} and ({sel_str})"), registry)?;
                out.push(Constraint::FieldSum(FieldSumParams { cells: mask.iter_true().collect(), predicate: Predicate::Ge, rhs: 1 }));
            }
        }

        if let Some(seq) = params.get(&Value::String("no_backup".into())).and_then(Value::as_sequence) {
            for b in seq {
                let bn = b.as_str().ok_or_else(|| ConfigError::Malformed("non-string no_backup entry".into()))?;
                out.push(Constraint::BanBackupBlock(BanBackupBlockParams { resident: ri, block: registry.block_id(bn)? }));
            }
        }

        if let Some(seq) = params.get(&Value::String("chosen-vacation".into())).and_then(Value::as_sequence) {
            for entry in seq {
                let s = entry.as_str().ok_or_else(|| ConfigError::Malformed("non-string chosen-vacation entry".into()))?;
                let (week_str, rot_name) = s
                    .split_once(':')
                    .ok_or_else(|| ConfigError::Malformed(format!("chosen-vacation entry `{s}` must be `week:rotation`")))?;
                let week: usize = week_str
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::Malformed(format!("chosen-vacation week `{week_str}` is not an integer")))?;
                out.push(Constraint::ChosenVacation(ChosenVacationParams {
                    resident: ri,
                    week,
                    rotation: registry.rotation_id(rot_name.trim())?,
                }));
            }
        }

        out.extend(field_sum_constraints(registry, &params, name)?);
    }
    Ok(out)
}

/// `sum <op> N: [selector, ...]` dynamic keys on any of residents/blocks/
/// rotations, grounded on `io.py::parse_field_sum_constraint`.
fn field_sum_constraints(registry: &EntityRegistry, params: &serde_yaml::Mapping, scope: &str) -> Result<Vec<Constraint>, ConfigError> {
    let mut out = Vec::new();
    for (k, v) in params {
        let Some(key) = k.as_str() else { continue };
        let Some(rest) = key.strip_prefix("sum") else { continue };
        let (predicate, rhs) = parse_sum_predicate(rest)
            .ok_or_else(|| ConfigError::Malformed(format!("could not parse sum predicate `{key}` on {scope}")))?;
        let selectors = v.as_sequence().ok_or_else(|| ConfigError::Malformed(format!("`{key}` on {scope} must be a list")))?;
        for sel in selectors {
            let sel_str = sel.as_str().ok_or_else(|| ConfigError::Malformed("non-string sum selector entry".into()))?;
            let mask = selector::mask(&format!("{scope} and ({sel_str})"), registry)?;
            out.push(Constraint::FieldSum(FieldSumParams { cells: mask.iter_true().collect(), predicate, rhs }));
        }
    }
    Ok(out)
}

fn parse_sum_predicate(rest: &str) -> Option<(Predicate, i64)> {
    let rest = rest.trim();
    let (op, num) = if let Some(n) = rest.strip_prefix(">=") {
        (Predicate::Ge, n)
    } else if let Some(n) = rest.strip_prefix("<=") {
        (Predicate::Le, n)
    } else if let Some(n) = rest.strip_prefix("==") {
        (Predicate::Eq, n)
    } else if let Some(n) = rest.strip_prefix("!=") {
        (Predicate::Ne, n)
    } else if let Some(n) = rest.strip_prefix('>') {
        (Predicate::Gt, n)
    } else if let Some(n) = rest.strip_prefix('<') {
        (Predicate::Lt, n)
    } else {
        return None;
    };
    num.trim().parse::<i64>().ok().map(|n| (op, n))
}

fn group_constraints(registry: &EntityRegistry, raw: &[serde_yaml::Mapping]) -> Result<Vec<Constraint>, ConfigError> {
    let mut out = Vec::new();
    let n_residents = registry.n_residents();
    let n_blocks = registry.n_blocks();
    for cst in raw {
        let kind = cst
            .get(&Value::String("kind".into()))
            .and_then(Value::as_str)
            .ok_or_else(|| ConfigError::Malformed("every group_constraints entry requires `kind`".to_string()))?;
        let group_name = cst.get(&Value::String("group".into())).and_then(Value::as_str);

        match kind {
            "all_group_count_per_resident" | "window_group_count_per_resident" => {
                let group_name = group_name.ok_or_else(|| ConfigError::Malformed(format!("{kind} requires `group`")))?;
                let group = resolve_rotation_or_group(registry, group_name)?;
                let window = cst.get(&Value::String("window".into())).and_then(Value::as_u64).unwrap_or(n_blocks as u64) as usize;
                let (lo, hi) = cst
                    .get(&Value::String("count".into()))
                    .and_then(two_i64)
                    .ok_or_else(|| ConfigError::Malformed(format!("{kind} requires `count: [min, max]`")))?;
                let bounds = (0..n_residents).map(|r| (r, lo.unwrap_or(0), hi.unwrap_or(i64::MAX), 0)).collect();
                out.push(Constraint::GroupCountPerResidentPerWindow(GroupCountPerResidentPerWindowParams { group, bounds, window }));
            }
            "group_coverage_constraint" => {
                let group_name = group_name.ok_or_else(|| ConfigError::Malformed("group_coverage_constraint requires `group`".to_string()))?;
                let rotations = resolve_rotation_or_group(registry, group_name)?;
                let blocks: Vec<usize> = if let Some(seq) = cst.get(&Value::String("blocks".into())).and_then(Value::as_sequence) {
                    seq.iter().filter_map(Value::as_str).map(|b| registry.block_id(b)).collect::<Result<_, _>>()?
                } else {
                    (0..n_blocks).collect()
                };
                let rmin = cst.get(&Value::String("min".into())).and_then(Value::as_i64);
                let rmax = cst.get(&Value::String("max".into())).and_then(Value::as_i64);
                let (rmin, rmax) = if let Some((lo, hi)) = cst.get(&Value::String("count".into())).and_then(two_i64) {
                    (lo, hi)
                } else {
                    (rmin, rmax)
                };
                let allowed = cst.get(&Value::String("allowed_coverage".into())).and_then(Value::as_sequence).map(|seq| {
                    seq.iter().filter_map(Value::as_i64).collect::<Vec<_>>()
                });
                out.push(Constraint::Coverage(CoverageParams { rotations, blocks, rmin, rmax, allowed }));
            }
            "time_to_first" => {
                let group_name = group_name.ok_or_else(|| ConfigError::Malformed("time_to_first requires `group`".to_string()))?;
                let group = resolve_rotation_or_group(registry, group_name)?;
                let window = cst
                    .get(&Value::String("window_size".into()))
                    .and_then(Value::as_u64)
                    .ok_or_else(|| ConfigError::Malformed("time_to_first requires `window_size`".to_string()))? as usize;
                out.push(Constraint::TimeToFirst(TimeToFirstParams { group, window, residents: all_residents(n_residents) }));
            }
            other => return Err(ConfigError::Malformed(format!("unknown group_constraints kind `{other}`"))),
        }
    }
    Ok(out)
}

/// Resolve the top-level `backup` directive: `true`/`false`, or
/// `{coverage: K}` / `{coverage: {resident: K}}`. Grounded on
/// `io.py::backup_is_active` and `generate_backup_constraints`'s gating
/// check (backup-shaped constraints without the directive is a
/// `ConfigMalformed`).
fn backup_setup(registry: &EntityRegistry, raw: &RawTop, constraints: &mut Vec<Constraint>) -> Result<Option<BackupSetup>, ConfigError> {
    let (enabled, default_count, counts) = match &raw.backup {
        Value::Bool(b) => (*b, 0, HashMap::new()),
        Value::Mapping(m) => {
            let mut default_count = 0i64;
            let mut counts = HashMap::new();
            if let Some(cov) = m.get(&Value::String("coverage".into())) {
                if let Some(scalar) = cov.as_i64() {
                    default_count = scalar;
                } else if let Some(per_resident) = cov.as_mapping() {
                    for (k, v) in per_resident {
                        let name = k.as_str().ok_or_else(|| ConfigError::Malformed("non-string backup.coverage key".into()))?;
                        let count = v.as_i64().ok_or_else(|| ConfigError::Malformed(format!("non-integer backup.coverage for {name}")))?;
                        counts.insert(registry.resident_id(name)?, count);
                    }
                }
            }
            (true, default_count, counts)
        }
        Value::Null => (false, 0, HashMap::new()),
        _ => return Err(ConfigError::Malformed("`backup` must be a bool or a mapping".into())),
    };

    let mut backup_related = Vec::new();

    for (bi, name) in ordered_names(&raw.blocks).iter().enumerate() {
        let Some(params) = entity_params(&raw.blocks, name) else { continue };
        if let Some(v) = params.get(&Value::String("backup_required".into())) {
            let (rmin, rmax) = two_i64(v).ok_or_else(|| ConfigError::Malformed(format!("backup_required on {name} must be [min, max]")))?;
            backup_related.push(Constraint::BackupRequiredOnBlock(BackupRequiredOnBlockParams { block: bi, rmin, rmax }));
        }
    }

    let rotation_names = ordered_names(&raw.rotations);
    for (ti, name) in rotation_names.iter().enumerate() {
        let Some(params) = entity_params(&raw.rotations, name) else { continue };
        if let Some(v) = params.get(&Value::String("backup_count".into())) {
            let cap = v.as_i64().ok_or_else(|| ConfigError::Malformed(format!("backup_count on {name} must be an integer")))?;
            backup_related.push(Constraint::RotationBackupCount(RotationBackupCountParams { rotations: vec![ti], cap }));
        }
    }

    let mut any_no_backup = false;
    for name in ordered_names(&raw.residents) {
        let Some(params) = entity_params(&raw.residents, &name) else { continue };
        if params.get(&Value::String("no_backup".into())).and_then(Value::as_sequence).is_some_and(|s| !s.is_empty()) {
            any_no_backup = true;
        }
    }

    if (!backup_related.is_empty() || any_no_backup) && !enabled {
        return Err(ConfigError::Malformed(
            "the top-level `backup` directive is false or absent, but backup parameters were declared on rotations/blocks/residents"
                .to_string(),
        ));
    }

    if enabled {
        let mut eligible = vec![true; rotation_names.len()];
        let mut any_declared = false;
        for (ti, name) in rotation_names.iter().enumerate() {
            if let Some(params) = entity_params(&raw.rotations, name) {
                let groups = string_list(&params, "groups");
                if !groups.is_empty() {
                    any_declared = true;
                    eligible[ti] = groups.iter().any(|g| g == "backup_eligible");
                }
            }
        }
        if any_declared {
            constraints.push(Constraint::BackupEligibleBlocks(BackupEligibleBlocksParams { eligible }));
        }
    }

    constraints.append(&mut backup_related);

    Ok(if enabled { Some(BackupSetup { enabled, default_count, counts }) } else { None })
}

/// Resolve the top-level `vacation` directive:
/// `{pools: {name: {rotations, max_per_week?, max_total?}}, blocks: {week:
/// block | [block, ...]}, n_vacations_per_resident, cooldown: {window,
/// count}}`. Grounded on `solve.py`'s `cogrids['vacation']` handling and
/// `io.py::generate_vacation_constraints`.
fn vacation_setup(
    registry: &EntityRegistry,
    raw: &Option<Value>,
    constraints: &mut Vec<Constraint>,
) -> Result<(Option<VacationSetup>, i64), ConfigError> {
    let Some(v) = raw else { return Ok((None, 0)) };
    let m = v.as_mapping().ok_or_else(|| ConfigError::Malformed("`vacation` must be a mapping".into()))?;

    let blocks_map = m
        .get(&Value::String("blocks".into()))
        .and_then(Value::as_mapping)
        .ok_or_else(|| ConfigError::Malformed("vacation.blocks is required".to_string()))?;

    let mut week_to_blocks = Vec::with_capacity(blocks_map.len());
    for (_week, v) in blocks_map {
        let names: Vec<&str> = if let Some(s) = v.as_str() {
            vec![s]
        } else if let Some(seq) = v.as_sequence() {
            seq.iter().filter_map(Value::as_str).collect()
        } else {
            return Err(ConfigError::Malformed("vacation.blocks entries must be a block name or list of names".into()));
        };
        let mut ids = Vec::with_capacity(names.len());
        for n in names {
            ids.push(registry.block_id(n)?);
        }
        week_to_blocks.push(ids);
    }
    let n_weeks = week_to_blocks.len();

    constraints.push(Constraint::VacationMapping(VacationMappingParams {
        week_to_blocks: week_to_blocks.clone(),
        rotations: (0..registry.n_rotations()).collect(),
    }));

    if let Some(pools) = m.get(&Value::String("pools".into())).and_then(Value::as_mapping) {
        for (_pool_name, pool_v) in pools {
            let pool = pool_v.as_mapping().ok_or_else(|| ConfigError::Malformed("vacation pool entries must be mappings".into()))?;
            let rot_names = pool
                .get(&Value::String("rotations".into()))
                .and_then(Value::as_sequence)
                .ok_or_else(|| ConfigError::Malformed("vacation pool requires `rotations`".to_string()))?;
            let mut rotations = Vec::new();
            for r in rot_names {
                let rn = r.as_str().ok_or_else(|| ConfigError::Malformed("non-string vacation pool rotation entry".into()))?;
                rotations.extend(resolve_rotation_or_group(registry, rn)?);
            }
            let max_per_week = pool.get(&Value::String("max_per_week".into())).and_then(Value::as_i64);
            let max_total = pool.get(&Value::String("max_total".into())).and_then(Value::as_i64);
            constraints.push(Constraint::VacationPool(VacationPoolParams { rotations, max_per_week, max_total }));
        }
    }

    let n_vacations_per_resident = m.get(&Value::String("n_vacations_per_resident".into())).and_then(Value::as_i64).unwrap_or(0);
    if n_vacations_per_resident > 0 {
        constraints.push(Constraint::VacationPerResidentTotal(VacationPerResidentTotalParams { n_vacations_per_resident }));
    }

    if let Some(cd) = m.get(&Value::String("cooldown".into())).and_then(Value::as_mapping) {
        let window = cd
            .get(&Value::String("window".into()))
            .and_then(Value::as_u64)
            .ok_or_else(|| ConfigError::Malformed("vacation.cooldown.window is required".to_string()))? as usize;
        let count = cd
            .get(&Value::String("count".into()))
            .and_then(Value::as_i64)
            .ok_or_else(|| ConfigError::Malformed("vacation.cooldown.count is required".to_string()))?;
        for resident in 0..registry.n_residents() {
            constraints.push(Constraint::VacationCooldown(VacationCooldownParams { resident, window, count }));
        }
    }

    Ok((Some(VacationSetup { n_weeks, week_to_blocks }), n_vacations_per_resident))
}

/// `coverage_constraints_from_csv`: a wide CSV (blocks as columns, rotations
/// as the index) of per-cell coverage bounds, `rmin_or_rmax` selecting which
/// bound each cell sets (matching the CLI's separate `--coverage-min` /
/// `--coverage-max` flags).
pub fn read_coverage_csv(path: &str, registry: &EntityRegistry, is_min: bool) -> Result<Vec<Constraint>, ConfigError> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let block_names: Vec<String> = headers.iter().skip(1).map(|s| s.to_string()).collect();
    let mut blocks = Vec::with_capacity(block_names.len());
    for b in &block_names {
        blocks.push(registry.block_id(b)?);
    }

    let mut out = Vec::new();
    for record in reader.records() {
        let record = record?;
        let rotation_name = record.get(0).ok_or_else(|| ConfigError::Malformed("coverage CSV row missing rotation name".into()))?;
        let rotation = registry.rotation_id(rotation_name)?;
        for (i, cell) in record.iter().skip(1).enumerate() {
            let cell = cell.trim();
            if cell.is_empty() {
                continue;
            }
            let value: i64 = cell.parse().map_err(|_| ConfigError::Malformed(format!("non-integer coverage cell `{cell}`")))?;
            let (rmin, rmax) = if is_min { (Some(value), None) } else { (None, Some(value)) };
            out.push(Constraint::Coverage(CoverageParams { rotations: vec![rotation], blocks: vec![blocks[i]], rmin, rmax, allowed: None }));
        }
    }
    Ok(out)
}

/// `--rotation-pins`: wide CSV (residents as columns, blocks as the index);
/// a non-empty cell pins that resident to that rotation on that block.
pub fn read_rotation_pins_csv(path: &str, registry: &EntityRegistry) -> Result<Vec<Constraint>, ConfigError> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let resident_names: Vec<String> = headers.iter().skip(1).map(|s| s.to_string()).collect();
    let mut residents = Vec::with_capacity(resident_names.len());
    for r in &resident_names {
        residents.push(registry.resident_id(r)?);
    }

    let mut out = Vec::new();
    for record in reader.records() {
        let record = record?;
        let block_name = record.get(0).ok_or_else(|| ConfigError::Malformed("rotation-pins CSV row missing block name".into()))?;
        let block = registry.block_id(block_name)?;
        for (i, cell) in record.iter().skip(1).enumerate() {
            let cell = cell.trim().trim_end_matches('+');
            if cell.is_empty() {
                continue;
            }
            let rotation = registry.rotation_id(cell)?;
            out.push(Constraint::PinnedRotation(PinnedRotationParams { resident: residents[i], blocks: vec![block], rotation }));
        }
    }
    Ok(out)
}

/// `rankings_from_csv`: wide CSV, residents as rows (index column), rotation
/// names as columns, cell is a preference rank folded flatly across every
/// block (`score.py::accumulate_score_res_rot_scores`).
pub fn read_rankings_csv(path: &str, registry: &EntityRegistry) -> Result<HashMap<(usize, usize), i64>, ConfigError> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let rotation_names: Vec<String> = headers.iter().skip(1).map(|s| s.to_string()).collect();
    let mut rotations = Vec::with_capacity(rotation_names.len());
    for r in &rotation_names {
        rotations.push(registry.rotation_id(r)?);
    }

    let mut out = HashMap::new();
    for record in reader.records() {
        let record = record?;
        let resident_name = record.get(0).ok_or_else(|| ConfigError::Malformed("rankings CSV row missing resident name".into()))?;
        let resident = registry.resident_id(resident_name)?;
        for (i, cell) in record.iter().skip(1).enumerate() {
            let cell = cell.trim();
            let value: i64 = if cell.is_empty() { 0 } else { cell.parse().unwrap_or(0) };
            out.insert((resident, rotations[i]), value);
        }
    }
    Ok(out)
}

/// `--block-resident-ranking`: like [`read_rankings_csv`] but the columns
/// are blocks rather than rotations, and every score applies only to the
/// single rotation named by `rotation`
/// (`score.py::accumulate_score_res_block_scores`).
pub fn read_block_resident_ranking_csv(
    path: &str,
    registry: &EntityRegistry,
    rotation: &str,
) -> Result<(usize, HashMap<(usize, usize), i64>), ConfigError> {
    let rotation_id = registry.rotation_id(rotation)?;
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let block_names: Vec<String> = headers.iter().skip(1).map(|s| s.to_string()).collect();
    let mut blocks = Vec::with_capacity(block_names.len());
    for b in &block_names {
        blocks.push(registry.block_id(b)?);
    }

    let mut out = HashMap::new();
    for record in reader.records() {
        let record = record?;
        let resident_name = record.get(0).ok_or_else(|| ConfigError::Malformed("block-resident-ranking CSV row missing resident name".into()))?;
        let resident = registry.resident_id(resident_name)?;
        for (i, cell) in record.iter().skip(1).enumerate() {
            let cell = cell.trim();
            let value: i64 = if cell.is_empty() { 0 } else { cell.parse().unwrap_or(0) };
            out.insert((resident, blocks[i]), value);
        }
    }
    Ok((rotation_id, out))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_YAML: &str = r#"
residents:
  R1: {}
  R2: {}
blocks:
  Bl1: {}
  Bl2: {}
rotations:
  Ro1:
    coverage: [1, 1]
  Ro2:
    coverage: [1, 1]
"#;

    #[test]
    fn loads_minimal_config() {
        let cfg = load_config(MINIMAL_YAML).unwrap();
        assert_eq!(cfg.registry.n_residents(), 2);
        assert_eq!(cfg.registry.n_blocks(), 2);
        assert_eq!(cfg.registry.n_rotations(), 2);
        assert_eq!(cfg.constraints.len(), 2);
        assert!(cfg.backup.is_none());
        assert!(cfg.vacation.is_none());
    }

    #[test]
    fn rejects_backup_params_without_directive() {
        let yaml = r#"
residents:
  R1: {}
blocks:
  Bl1:
    backup_required: [1, 1]
rotations:
  Ro1: {}
"#;
        let err = load_config(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)));
    }

    #[test]
    fn history_feeds_rotation_count() {
        let yaml = r#"
residents:
  R1:
    history: [Ro1, Ro1]
blocks:
  Bl1: {}
rotations:
  Ro1:
    rot_count_including_history: [0, 2]
"#;
        let cfg = load_config(yaml).unwrap();
        let Constraint::RotationCount(p) = &cfg.constraints[0] else { panic!("expected RotationCount") };
        assert_eq!(p.prior_counts, vec![(0, 2)]);
    }
}
