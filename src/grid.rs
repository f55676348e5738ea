//! Grid & Variable Factory (spec.md §4.3).
//!
//! Instantiates the main grid `x[r,b,t]` and the optional `backup`/`vacation`
//! co-grids, emitting the structural invariants I1-I3 directly at
//! construction time. Grounded on `original_source/sched/model.py`
//! (`generate_model`, `generate_vacation`, `generate_backup`).

use std::collections::HashMap;

use thiserror::Error;

use crate::model::{CpModel, Lit, ModelError, VarId};
use crate::registry::EntityRegistry;

/// Failure building grids/variables.
#[derive(Debug, Error)]
pub enum GridError {
    /// The backend rejected a variable or constraint while building a grid.
    #[error(transparent)]
    Model(#[from] ModelError),
    /// A co-grid was requested with a parameter that makes no sense
    /// (e.g. backup count `K` larger than the number of blocks).
    #[error("invalid co-grid configuration: {0}")]
    BadConfig(String),
}

/// The main decision grid: `x[r,b,t]`.
#[derive(Clone, Debug)]
pub struct MainGrid {
    n_residents: usize,
    n_blocks: usize,
    n_rotations: usize,
    vars: Vec<VarId>,
}

impl MainGrid {
    #[inline]
    fn index(&self, r: usize, b: usize, t: usize) -> usize {
        (r * self.n_blocks + b) * self.n_rotations + t
    }

    /// The boolean decision variable for `(r, b, t)`.
    pub fn var(&self, r: usize, b: usize, t: usize) -> VarId {
        self.vars[self.index(r, b, t)]
    }

    /// Number of residents/blocks/rotations this grid was built over.
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.n_residents, self.n_blocks, self.n_rotations)
    }
}

/// The backup co-grid: `y[r,b]`.
#[derive(Clone, Debug)]
pub struct BackupGrid {
    n_residents: usize,
    n_blocks: usize,
    vars: Vec<VarId>,
}

impl BackupGrid {
    /// The boolean decision variable for `(r, b)`.
    pub fn var(&self, r: usize, b: usize) -> VarId {
        self.vars[r * self.n_blocks + b]
    }

    /// Number of residents/blocks.
    pub fn dims(&self) -> (usize, usize) {
        (self.n_residents, self.n_blocks)
    }
}

/// The vacation co-grid: `v[r,w,t]`.
#[derive(Clone, Debug)]
pub struct VacationGrid {
    n_residents: usize,
    n_weeks: usize,
    n_rotations: usize,
    vars: Vec<VarId>,
}

impl VacationGrid {
    #[inline]
    fn index(&self, r: usize, w: usize, t: usize) -> usize {
        (r * self.n_weeks + w) * self.n_rotations + t
    }

    /// The boolean decision variable for `(r, w, t)`.
    pub fn var(&self, r: usize, w: usize, t: usize) -> VarId {
        self.vars[self.index(r, w, t)]
    }

    /// Number of residents/weeks/rotations.
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.n_residents, self.n_weeks, self.n_rotations)
    }
}

/// Bundle of every grid built for one compile, keyed by name as spec.md §4.3
/// describes (`"main"`, `"backup"`, `"vacation"`).
#[derive(Clone, Debug, Default)]
pub struct Grids {
    /// The always-present main grid.
    pub main: Option<MainGrid>,
    /// The optional backup co-grid.
    pub backup: Option<BackupGrid>,
    /// The optional vacation co-grid.
    pub vacation: Option<VacationGrid>,
}

impl Grids {
    /// Named lookup used by hint normalization (spec.md §9): `"main"`,
    /// `"backup"`, `"vacation"`.
    pub fn by_name(&self, name: &str) -> Option<GridRef<'_>> {
        match name {
            "main" => self.main.as_ref().map(GridRef::Main),
            "backup" => self.backup.as_ref().map(GridRef::Backup),
            "vacation" => self.vacation.as_ref().map(GridRef::Vacation),
            _ => None,
        }
    }
}

/// A named reference to one of the grids in [`Grids`].
pub enum GridRef<'a> {
    /// The main grid.
    Main(&'a MainGrid),
    /// The backup co-grid.
    Backup(&'a BackupGrid),
    /// The vacation co-grid.
    Vacation(&'a VacationGrid),
}

/// Builds the main grid plus any requested co-grids and emits I1-I3.
pub struct VariableFactory;

impl VariableFactory {
    /// Build the main grid over `registry`'s axes and enforce I1: exactly
    /// one rotation per `(resident, block)`.
    pub fn build_main(model: &mut dyn CpModel, registry: &EntityRegistry) -> Result<MainGrid, GridError> {
        let (r, b, t) = (registry.n_residents(), registry.n_blocks(), registry.n_rotations());
        let mut vars = Vec::with_capacity(r * b * t);
        for rr in 0..r {
            for bb in 0..b {
                for tt in 0..t {
                    vars.push(model.new_bool_var(&format!("x[{rr},{bb},{tt}]")));
                }
            }
        }
        let grid = MainGrid { n_residents: r, n_blocks: b, n_rotations: t, vars };
        for rr in 0..r {
            for bb in 0..b {
                let terms: Vec<_> = (0..t).map(|tt| (grid.var(rr, bb, tt), 1)).collect();
                model.add_linear_eq(&terms, 1, &[]);
            }
        }
        Ok(grid)
    }

    /// Build the backup co-grid and enforce I2: `Σ_b y[r,b] = counts[r]`.
    pub fn build_backup(
        model: &mut dyn CpModel,
        registry: &EntityRegistry,
        counts: &HashMap<usize, i64>,
        default_count: i64,
    ) -> Result<BackupGrid, GridError> {
        let (r, b) = (registry.n_residents(), registry.n_blocks());
        let mut vars = Vec::with_capacity(r * b);
        for rr in 0..r {
            for bb in 0..b {
                vars.push(model.new_bool_var(&format!("y[{rr},{bb}]")));
            }
        }
        let grid = BackupGrid { n_residents: r, n_blocks: b, vars };
        for rr in 0..r {
            let k = counts.get(&rr).copied().unwrap_or(default_count);
            if k < 0 || k as usize > b {
                return Err(GridError::BadConfig(format!(
                    "backup count {k} for resident {rr} out of range [0, {b}]"
                )));
            }
            let terms: Vec<_> = (0..b).map(|bb| (grid.var(rr, bb), 1)).collect();
            model.add_linear_eq(&terms, k, &[]);
        }
        Ok(grid)
    }

    /// Build the vacation co-grid and enforce I3: `Σ_t v[r,w,t] <= 1`.
    pub fn build_vacation(
        model: &mut dyn CpModel,
        n_residents: usize,
        n_weeks: usize,
        n_rotations: usize,
    ) -> Result<VacationGrid, GridError> {
        let mut vars = Vec::with_capacity(n_residents * n_weeks * n_rotations);
        for rr in 0..n_residents {
            for ww in 0..n_weeks {
                for tt in 0..n_rotations {
                    vars.push(model.new_bool_var(&format!("v[{rr},{ww},{tt}]")));
                }
            }
        }
        let grid = VacationGrid { n_residents, n_weeks, n_rotations, vars };
        for rr in 0..n_residents {
            for ww in 0..n_weeks {
                let terms: Vec<_> = (0..n_rotations).map(|tt| (grid.var(rr, ww, tt), 1)).collect();
                model.add_linear_le(&terms, 1, &[]);
            }
        }
        Ok(grid)
    }
}

/// Build a positive literal for the main-grid cell `(r,b,t)`; used throughout
/// `crate::constraints` so constraint code never touches raw `VarId`s.
pub fn main_lit(grid: &MainGrid, r: usize, b: usize, t: usize) -> Lit {
    Lit::pos(grid.var(r, b, t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{reference::RefSolver, Control, SolveParams};

    #[test]
    fn main_grid_enforces_i1() {
        let mut solver = RefSolver::new();
        let registry = EntityRegistry::new(
            vec!["R1".into()],
            vec!["Bl1".into()],
            vec!["Ro1".into(), "Ro2".into()],
        );
        let grid = VariableFactory::build_main(&mut solver, &registry).unwrap();
        let mut count = 0;
        let params = SolveParams { enumerate_all_solutions: true, ..Default::default() };
        solver.solve(&params, &mut |sol| {
            let total: i64 = (0..2).map(|t| sol.value(grid.var(0, 0, t))).sum();
            assert_eq!(total, 1);
            count += 1;
            Control::Continue
        });
        assert_eq!(count, 2);
    }
}
