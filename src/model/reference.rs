//! A small, explicitly bounded reference `CpModel` backend.
//!
//! This is not a general-purpose CP-SAT engine — `spec.md`'s Non-goals rule
//! that out — it is a backtracking search with interval-bounds pruning,
//! sized to resolve the concrete scenarios in `tests/scenarios.rs` in
//! well under a second. A production deployment would implement `CpModel`
//! against a real solver (e.g. OR-Tools bindings) without touching
//! `crate::constraints`.

use std::time::Instant;

use super::{Assignment, Control, Lit, ModelError, SolveParams, SolveStatus, Term, VarId};
use crate::model::CpModel;

#[derive(Clone, Debug)]
enum Cst {
    Eq { terms: Vec<Term>, rhs: i64, enforce: Vec<Lit> },
    Le { terms: Vec<Term>, rhs: i64, enforce: Vec<Lit> },
    Ge { terms: Vec<Term>, rhs: i64, enforce: Vec<Lit> },
    Ne { terms: Vec<Term>, rhs: i64, enforce: Vec<Lit> },
    BoolAnd { lits: Vec<Lit>, enforce: Vec<Lit> },
    BoolOr { lits: Vec<Lit>, enforce: Vec<Lit> },
    Implication { a: Lit, b: Lit },
    Allowed { vars: Vec<VarId>, tuples: Vec<Vec<i64>> },
}

/// The backtracking reference solver.
#[derive(Default)]
pub struct RefSolver {
    bounds: Vec<(i64, i64)>,
    names: Vec<String>,
    constraints: Vec<Cst>,
    objective: Option<Vec<Term>>,
    hints: Vec<(VarId, i64)>,
}

impl RefSolver {
    /// Create an empty model.
    pub fn new() -> Self {
        RefSolver::default()
    }

    fn lit_value(lit: Lit, assignment: &[Option<i64>]) -> Option<bool> {
        assignment[lit.var].map(|v| {
            let truth = v != 0;
            if lit.negated {
                !truth
            } else {
                truth
            }
        })
    }

    /// Min/max achievable value of `terms` given the current partial assignment.
    fn term_bounds(&self, terms: &[Term], assignment: &[Option<i64>]) -> (i64, i64) {
        let mut lo = 0i64;
        let mut hi = 0i64;
        for &(v, c) in terms {
            let (vlo, vhi) = match assignment[v] {
                Some(x) => (x, x),
                None => self.bounds[v],
            };
            if c >= 0 {
                lo += c * vlo;
                hi += c * vhi;
            } else {
                lo += c * vhi;
                hi += c * vlo;
            }
        }
        (lo, hi)
    }

    fn enforce_state(enforce: &[Lit], assignment: &[Option<i64>]) -> Option<bool> {
        let mut all_known = true;
        for &lit in enforce {
            match Self::lit_value(lit, assignment) {
                Some(false) => return Some(false),
                Some(true) => {}
                None => all_known = false,
            }
        }
        if all_known {
            Some(true)
        } else {
            None
        }
    }

    /// `None` = not yet decidable, `Some(true)` = consistent so far, `Some(false)` = violated.
    ///
    /// For every reified variant, a still-unassigned enforce literal means the
    /// completion that sets it false is a vacuous pass — the body must not be
    /// evaluated (and therefore must not prune) until the enforce literal is
    /// known true. Only `enforce_state == Some(true)` may reach the body; both
    /// `Some(false)` (vacuous) and `None` (undecided) short-circuit without
    /// looking at the terms.
    fn check(&self, c: &Cst, assignment: &[Option<i64>]) -> Option<bool> {
        match c {
            Cst::Eq { terms, rhs, enforce } => {
                match Self::enforce_state(enforce, assignment) {
                    Some(false) => return Some(true),
                    None => return None,
                    Some(true) => {}
                }
                let (lo, hi) = self.term_bounds(terms, assignment);
                if *rhs < lo || *rhs > hi {
                    return Some(false);
                }
                if lo == hi {
                    Some(lo == *rhs)
                } else {
                    None
                }
            }
            Cst::Le { terms, rhs, enforce } => {
                match Self::enforce_state(enforce, assignment) {
                    Some(false) => return Some(true),
                    None => return None,
                    Some(true) => {}
                }
                let (lo, _hi) = self.term_bounds(terms, assignment);
                if lo > *rhs {
                    Some(false)
                } else {
                    None
                }
            }
            Cst::Ge { terms, rhs, enforce } => {
                match Self::enforce_state(enforce, assignment) {
                    Some(false) => return Some(true),
                    None => return None,
                    Some(true) => {}
                }
                let (_lo, hi) = self.term_bounds(terms, assignment);
                if hi < *rhs {
                    Some(false)
                } else {
                    None
                }
            }
            Cst::Ne { terms, rhs, enforce } => {
                match Self::enforce_state(enforce, assignment) {
                    Some(false) => return Some(true),
                    None => return None,
                    Some(true) => {}
                }
                let (lo, hi) = self.term_bounds(terms, assignment);
                if lo == hi {
                    Some(lo != *rhs)
                } else {
                    None
                }
            }
            Cst::BoolAnd { lits, enforce } => {
                match Self::enforce_state(enforce, assignment) {
                    Some(false) => return Some(true),
                    None => return None,
                    Some(true) => {}
                }
                let mut all_true = true;
                for &l in lits {
                    match Self::lit_value(l, assignment) {
                        Some(false) => return Some(false),
                        Some(true) => {}
                        None => all_true = false,
                    }
                }
                if all_true {
                    Some(true)
                } else {
                    None
                }
            }
            Cst::BoolOr { lits, enforce } => {
                match Self::enforce_state(enforce, assignment) {
                    Some(false) => return Some(true),
                    None => return None,
                    Some(true) => {}
                }
                let mut any_unknown = false;
                for &l in lits {
                    match Self::lit_value(l, assignment) {
                        Some(true) => return Some(true),
                        Some(false) => {}
                        None => any_unknown = true,
                    }
                }
                if any_unknown {
                    None
                } else {
                    Some(false)
                }
            }
            Cst::Implication { a, b } => match (Self::lit_value(*a, assignment), Self::lit_value(*b, assignment)) {
                (Some(true), Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                (Some(false), _) => Some(true),
                _ => None,
            },
            Cst::Allowed { vars, tuples } => {
                if vars.iter().all(|&v| assignment[v].is_some()) {
                    let row: Vec<i64> = vars.iter().map(|&v| assignment[v].unwrap()).collect();
                    Some(tuples.iter().any(|t| t == &row))
                } else {
                    None
                }
            }
        }
    }

    fn all_consistent(&self, assignment: &[Option<i64>]) -> bool {
        self.constraints
            .iter()
            .all(|c| self.check(c, assignment) != Some(false))
    }

    fn objective_of(&self, assignment: &[i64]) -> i64 {
        match &self.objective {
            None => 0,
            Some(terms) => terms.iter().map(|&(v, c)| c * assignment[v]).sum(),
        }
    }
}

struct Solution<'a> {
    values: &'a [i64],
    objective: i64,
}

impl<'a> Assignment for Solution<'a> {
    fn value(&self, var: VarId) -> i64 {
        self.values[var]
    }
    fn objective_value(&self) -> i64 {
        self.objective
    }
}

struct SearchCtx<'a> {
    params: &'a SolveParams,
    started: Instant,
    best_objective: Option<i64>,
    found_any: bool,
    stopped: bool,
}

impl RefSolver {
    fn time_exceeded(&self, ctx: &SearchCtx) -> bool {
        match ctx.params.max_time_in_seconds {
            Some(limit) => ctx.started.elapsed().as_secs_f64() > limit,
            None => false,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn search(
        &self,
        idx: usize,
        assignment: &mut Vec<Option<i64>>,
        ctx: &mut SearchCtx,
        callback: &mut dyn FnMut(&dyn Assignment) -> Control,
    ) {
        if ctx.stopped || self.time_exceeded(ctx) {
            ctx.stopped = true;
            return;
        }
        if idx == self.bounds.len() {
            if !self.all_consistent(assignment) {
                return;
            }
            let values: Vec<i64> = assignment.iter().map(|v| v.unwrap()).collect();
            let obj = self.objective_of(&values);
            let report = if self.objective.is_none() || ctx.params.enumerate_all_solutions {
                true
            } else {
                ctx.best_objective.map(|b| obj < b).unwrap_or(true)
            };
            if report {
                ctx.found_any = true;
                if self.objective.is_some() {
                    ctx.best_objective = Some(obj);
                }
                let sol = Solution { values: &values, objective: obj };
                if callback(&sol) == Control::Stop {
                    ctx.stopped = true;
                }
            }
            return;
        }
        let (lo, hi) = self.bounds[idx];
        let mut v = lo;
        while v <= hi {
            if ctx.stopped {
                return;
            }
            assignment[idx] = Some(v);
            if self.all_consistent(assignment) {
                self.search(idx + 1, assignment, ctx, callback);
            }
            assignment[idx] = None;
            v += 1;
        }
    }
}

impl CpModel for RefSolver {
    fn new_bool_var(&mut self, name: &str) -> VarId {
        self.bounds.push((0, 1));
        self.names.push(name.to_string());
        self.bounds.len() - 1
    }

    fn new_int_var(&mut self, lb: i64, ub: i64, name: &str) -> Result<VarId, ModelError> {
        if lb > ub {
            return Err(ModelError::BadBounds(lb, ub));
        }
        self.bounds.push((lb, ub));
        self.names.push(name.to_string());
        Ok(self.bounds.len() - 1)
    }

    fn add_linear_eq(&mut self, terms: &[Term], rhs: i64, enforce: &[Lit]) {
        self.constraints.push(Cst::Eq { terms: terms.to_vec(), rhs, enforce: enforce.to_vec() });
    }

    fn add_linear_le(&mut self, terms: &[Term], rhs: i64, enforce: &[Lit]) {
        self.constraints.push(Cst::Le { terms: terms.to_vec(), rhs, enforce: enforce.to_vec() });
    }

    fn add_linear_ge(&mut self, terms: &[Term], rhs: i64, enforce: &[Lit]) {
        self.constraints.push(Cst::Ge { terms: terms.to_vec(), rhs, enforce: enforce.to_vec() });
    }

    fn add_linear_ne(&mut self, terms: &[Term], rhs: i64, enforce: &[Lit]) {
        self.constraints.push(Cst::Ne { terms: terms.to_vec(), rhs, enforce: enforce.to_vec() });
    }

    fn add_bool_and(&mut self, lits: &[Lit], enforce: &[Lit]) {
        self.constraints.push(Cst::BoolAnd { lits: lits.to_vec(), enforce: enforce.to_vec() });
    }

    fn add_bool_or(&mut self, lits: &[Lit], enforce: &[Lit]) {
        self.constraints.push(Cst::BoolOr { lits: lits.to_vec(), enforce: enforce.to_vec() });
    }

    fn add_implication(&mut self, a: Lit, b: Lit) {
        self.constraints.push(Cst::Implication { a, b });
    }

    fn add_allowed_assignments(
        &mut self,
        vars: &[VarId],
        tuples: Vec<Vec<i64>>,
    ) -> Result<(), ModelError> {
        if let Some(bad) = tuples.iter().find(|t| t.len() != vars.len()) {
            return Err(ModelError::BadTupleArity(bad.len(), vars.len()));
        }
        self.constraints.push(Cst::Allowed { vars: vars.to_vec(), tuples });
        Ok(())
    }

    fn add_hint(&mut self, var: VarId, value: i64) {
        self.hints.push((var, value));
    }

    fn minimize(&mut self, terms: Vec<Term>) {
        self.objective = Some(terms);
    }

    fn solve(
        &mut self,
        params: &SolveParams,
        callback: &mut dyn FnMut(&dyn Assignment) -> Control,
    ) -> SolveStatus {
        let mut assignment: Vec<Option<i64>> = vec![None; self.bounds.len()];
        // Seed the search order with hinted values by reordering each
        // variable's try-order is out of scope for this reference backend;
        // hints are accepted (AddHint contract honored) but do not change
        // the outcome of a complete search.
        let mut ctx = SearchCtx {
            params,
            started: Instant::now(),
            best_objective: None,
            found_any: false,
            stopped: false,
        };
        self.search(0, &mut assignment, &mut ctx, callback);

        if ctx.found_any {
            if ctx.stopped && self.time_exceeded(&ctx) {
                SolveStatus::Feasible
            } else if self.objective.is_some() && !ctx.stopped {
                SolveStatus::Optimal
            } else {
                SolveStatus::Feasible
            }
        } else if ctx.stopped && self.time_exceeded(&ctx) {
            SolveStatus::Unknown
        } else {
            SolveStatus::Infeasible
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_of_three() {
        let mut m = RefSolver::new();
        let vars: Vec<VarId> = (0..3).map(|i| m.new_bool_var(&format!("x{i}"))).collect();
        let terms: Vec<Term> = vars.iter().map(|&v| (v, 1)).collect();
        m.add_linear_eq(&terms, 1, &[]);
        let mut solutions = 0;
        let params = SolveParams { enumerate_all_solutions: true, ..Default::default() };
        let status = m.solve(&params, &mut |sol| {
            let ones: i64 = vars.iter().map(|&v| sol.value(v)).sum();
            assert_eq!(ones, 1);
            solutions += 1;
            Control::Continue
        });
        assert_eq!(status, SolveStatus::Feasible);
        assert_eq!(solutions, 3);
    }

    #[test]
    fn minimize_picks_lowest() {
        let mut m = RefSolver::new();
        let a = m.new_int_var(0, 5, "a").unwrap();
        let b = m.new_int_var(0, 5, "b").unwrap();
        m.add_linear_eq(&[(a, 1), (b, 1)], 5, &[]);
        m.minimize(vec![(a, 1)]);
        let mut best = i64::MAX;
        let status = m.solve(&SolveParams::default(), &mut |sol| {
            best = sol.objective_value();
            Control::Continue
        });
        assert_eq!(status, SolveStatus::Optimal);
        assert_eq!(best, 0);
    }
}
