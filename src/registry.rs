//! Entity Registry & Group Array Store (spec.md §4.1).
//!
//! Resolves resident/block/rotation/group names to stable indices and holds,
//! for every name, a 3-D boolean mask over `(resident, block, rotation)` that
//! selector expressions combine elementwise. Grounded on
//! `original_source/schedulomicon/util.py::resolve_group` (linear-scan lookup,
//! `NameNotFound` on miss) and `original_source/sched/io.py::get_group_array`
//! (the `np.dstack` broadcast this module's `Mask3` reproduces densely).

use std::collections::HashMap;

use thiserror::Error;

/// Which axis a name belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    /// The resident axis.
    Resident,
    /// The block axis.
    Block,
    /// The rotation axis.
    Rotation,
}

/// Failure resolving a name against the registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// `name` was not found on `axis` (or as a group, when `axis` is `None`).
    #[error("name not found: `{name}` (axis: {axis:?})")]
    NameNotFound {
        /// The offending token.
        name: String,
        /// Which namespace was searched, if the search was axis-scoped.
        axis: Option<Axis>,
    },
}

/// A dense 3-D boolean mask over `(resident, block, rotation)`.
///
/// `spec.md` §9 notes that a systems-language implementation may represent a
/// mask densely or as a lazy expression tree; this crate picks the dense
/// representation (a flat `Vec<bool>` with row-major strides) since the
/// scheduling horizons this crate targets are small enough that density is
/// not a memory concern, and a dense mask makes the selector evaluator's
/// `and`/`or`/`not` trivial elementwise loops.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mask3 {
    n_residents: usize,
    n_blocks: usize,
    n_rotations: usize,
    bits: Vec<bool>,
}

impl Mask3 {
    fn stride(&self) -> (usize, usize) {
        (self.n_blocks * self.n_rotations, self.n_rotations)
    }

    /// A mask with every cell `false`.
    pub fn empty(n_residents: usize, n_blocks: usize, n_rotations: usize) -> Self {
        Mask3 { n_residents, n_blocks, n_rotations, bits: vec![false; n_residents * n_blocks * n_rotations] }
    }

    /// Index of `(r, b, t)` into the flat backing store.
    #[inline]
    pub fn index(&self, r: usize, b: usize, t: usize) -> usize {
        let (sr, sb) = self.stride();
        r * sr + b * sb + t
    }

    /// Read the bit at `(r, b, t)`.
    #[inline]
    pub fn get(&self, r: usize, b: usize, t: usize) -> bool {
        self.bits[self.index(r, b, t)]
    }

    /// Set the bit at `(r, b, t)`.
    #[inline]
    pub fn set(&mut self, r: usize, b: usize, t: usize, v: bool) {
        let i = self.index(r, b, t);
        self.bits[i] = v;
    }

    /// Elementwise `and`.
    pub fn and(&self, other: &Mask3) -> Mask3 {
        let mut out = self.clone();
        for (a, b) in out.bits.iter_mut().zip(other.bits.iter()) {
            *a = *a && *b;
        }
        out
    }

    /// Elementwise `or`.
    pub fn or(&self, other: &Mask3) -> Mask3 {
        let mut out = self.clone();
        for (a, b) in out.bits.iter_mut().zip(other.bits.iter()) {
            *a = *a || *b;
        }
        out
    }

    /// Elementwise `not`.
    pub fn not(&self) -> Mask3 {
        let mut out = self.clone();
        for a in out.bits.iter_mut() {
            *a = !*a;
        }
        out
    }

    /// Iterate every `(r, b, t)` cell currently set.
    pub fn iter_true(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        let (sr, sb) = self.stride();
        self.bits.iter().enumerate().filter(|(_, v)| **v).map(move |(i, _)| {
            let r = i / sr;
            let rem = i % sr;
            let b = rem / sb;
            let t = rem % sb;
            (r, b, t)
        })
    }
}

/// Resolves names to indices and holds every named group's broadcast mask.
#[derive(Clone, Debug, Default)]
pub struct EntityRegistry {
    residents: Vec<String>,
    blocks: Vec<String>,
    rotations: Vec<String>,
    resident_idx: HashMap<String, usize>,
    block_idx: HashMap<String, usize>,
    rotation_idx: HashMap<String, usize>,
    /// Named groups, keyed by name, with a bitmap over the group's own axis.
    groups: HashMap<String, (Axis, Vec<bool>)>,
}

impl EntityRegistry {
    /// Build a registry from the declared axis names (in schedule order).
    pub fn new(residents: Vec<String>, blocks: Vec<String>, rotations: Vec<String>) -> Self {
        let resident_idx = residents.iter().cloned().enumerate().map(|(i, n)| (n, i)).collect();
        let block_idx = blocks.iter().cloned().enumerate().map(|(i, n)| (n, i)).collect();
        let rotation_idx = rotations.iter().cloned().enumerate().map(|(i, n)| (n, i)).collect();
        EntityRegistry {
            residents,
            blocks,
            rotations,
            resident_idx,
            block_idx,
            rotation_idx,
            groups: HashMap::new(),
        }
    }

    /// Number of residents.
    pub fn n_residents(&self) -> usize {
        self.residents.len()
    }
    /// Number of blocks.
    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }
    /// Number of rotations.
    pub fn n_rotations(&self) -> usize {
        self.rotations.len()
    }

    /// Resident id for `name`.
    pub fn resident_id(&self, name: &str) -> Result<usize, RegistryError> {
        self.resident_idx.get(name).copied().ok_or_else(|| RegistryError::NameNotFound {
            name: name.to_string(),
            axis: Some(Axis::Resident),
        })
    }

    /// Block id for `name`.
    pub fn block_id(&self, name: &str) -> Result<usize, RegistryError> {
        self.block_idx.get(name).copied().ok_or_else(|| RegistryError::NameNotFound {
            name: name.to_string(),
            axis: Some(Axis::Block),
        })
    }

    /// Rotation id for `name`.
    pub fn rotation_id(&self, name: &str) -> Result<usize, RegistryError> {
        self.rotation_idx.get(name).copied().ok_or_else(|| RegistryError::NameNotFound {
            name: name.to_string(),
            axis: Some(Axis::Rotation),
        })
    }

    /// Name of resident `id`, for reporting (spec.md §6.2's CSV output is
    /// named by resident/block/rotation, not by index).
    pub fn resident_name(&self, id: usize) -> &str {
        &self.residents[id]
    }

    /// Name of block `id`.
    pub fn block_name(&self, id: usize) -> &str {
        &self.blocks[id]
    }

    /// Name of rotation `id`.
    pub fn rotation_name(&self, id: usize) -> &str {
        &self.rotations[id]
    }

    /// Register a named group of residents/blocks/rotations (membership
    /// bitmap over that single axis).
    pub fn define_group(&mut self, name: &str, axis: Axis, members: Vec<bool>) {
        self.groups.insert(name.to_string(), (axis, members));
    }

    /// Resolve a `Block NUM` positional atom (1-based) to its broadcast
    /// 3-D mask, addressing the block by schedule position rather than name.
    pub fn resolve_block_position(&self, position: u32) -> Result<Mask3, RegistryError> {
        let idx = position.checked_sub(1).map(|v| v as usize);
        let (r, b, t) = (self.n_residents(), self.n_blocks(), self.n_rotations());
        match idx {
            Some(id) if id < b => {
                let mut m = Mask3::empty(r, b, t);
                for rr in 0..r {
                    for tt in 0..t {
                        m.set(rr, id, tt, true);
                    }
                }
                Ok(m)
            }
            _ => Err(RegistryError::NameNotFound {
                name: format!("Block {position}"),
                axis: Some(Axis::Block),
            }),
        }
    }

    /// Resolve `name` to its broadcast 3-D mask: a resident match selects the
    /// whole `[resident, :, :]` slab, a block match `[:, block, :]`, a
    /// rotation match `[:, :, rotation]`, and a group match broadcasts its
    /// axis bitmap across the other two axes (spec.md §4.1).
    pub fn resolve(&self, name: &str) -> Result<Mask3, RegistryError> {
        let (r, b, t) = (self.n_residents(), self.n_blocks(), self.n_rotations());

        if let Ok(id) = self.resident_id(name) {
            let mut m = Mask3::empty(r, b, t);
            for bb in 0..b {
                for tt in 0..t {
                    m.set(id, bb, tt, true);
                }
            }
            return Ok(m);
        }
        if let Ok(id) = self.block_id(name) {
            let mut m = Mask3::empty(r, b, t);
            for rr in 0..r {
                for tt in 0..t {
                    m.set(rr, id, tt, true);
                }
            }
            return Ok(m);
        }
        if let Ok(id) = self.rotation_id(name) {
            let mut m = Mask3::empty(r, b, t);
            for rr in 0..r {
                for bb in 0..b {
                    m.set(rr, bb, id, true);
                }
            }
            return Ok(m);
        }
        if let Some((axis, members)) = self.groups.get(name) {
            let mut m = Mask3::empty(r, b, t);
            match axis {
                Axis::Resident => {
                    for rr in 0..r {
                        if members.get(rr).copied().unwrap_or(false) {
                            for bb in 0..b {
                                for tt in 0..t {
                                    m.set(rr, bb, tt, true);
                                }
                            }
                        }
                    }
                }
                Axis::Block => {
                    for bb in 0..b {
                        if members.get(bb).copied().unwrap_or(false) {
                            for rr in 0..r {
                                for tt in 0..t {
                                    m.set(rr, bb, tt, true);
                                }
                            }
                        }
                    }
                }
                Axis::Rotation => {
                    for tt in 0..t {
                        if members.get(tt).copied().unwrap_or(false) {
                            for rr in 0..r {
                                for bb in 0..b {
                                    m.set(rr, bb, tt, true);
                                }
                            }
                        }
                    }
                }
            }
            return Ok(m);
        }

        Err(RegistryError::NameNotFound { name: name.to_string(), axis: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_registry() -> EntityRegistry {
        EntityRegistry::new(
            vec!["R1".into(), "R2".into()],
            vec!["Bl1".into(), "Bl2".into()],
            vec!["Ro1".into(), "Ro2".into()],
        )
    }

    #[test]
    fn single_entity_slabs() {
        let reg = sample_registry();
        let m = reg.resolve("R1").unwrap();
        assert!(m.get(0, 0, 0));
        assert!(m.get(0, 1, 1));
        assert!(!m.get(1, 0, 0));
    }

    #[test]
    fn group_broadcast() {
        let mut reg = sample_registry();
        reg.define_group("evens", Axis::Rotation, vec![true, false]);
        let m = reg.resolve("evens").unwrap();
        assert!(m.get(0, 0, 0));
        assert!(m.get(1, 1, 0));
        assert!(!m.get(0, 0, 1));
    }

    #[test]
    fn unknown_name_errors() {
        let reg = sample_registry();
        assert!(matches!(reg.resolve("nope"), Err(RegistryError::NameNotFound { .. })));
    }
}
