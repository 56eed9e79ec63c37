//! Dense bit set over variable handles.
//!
//! Dataflow passes (liveness, spilling, SSA construction) manipulate sets of
//! variables constantly; a word-packed bit set keyed by `VarId` keeps those
//! operations cheap and iterates in a deterministic ascending order.

use super::VarId;

#[derive(Debug, Clone, Default)]
pub struct VarSet {
    words: Vec<u64>,
}

impl VarSet {
    pub fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Empty set with room for `capacity` variables.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64)],
        }
    }

    fn ensure(&mut self, index: usize) {
        let word = index / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
    }

    /// Insert `var`, returning true if it was not present.
    pub fn insert(&mut self, var: VarId) -> bool {
        let index = var.index();
        self.ensure(index);
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        let fresh = *word & mask == 0;
        *word |= mask;
        fresh
    }

    /// Remove `var`, returning true if it was present.
    pub fn remove(&mut self, var: VarId) -> bool {
        let index = var.index();
        match self.words.get_mut(index / 64) {
            Some(word) => {
                let mask = 1u64 << (index % 64);
                let present = *word & mask != 0;
                *word &= !mask;
                present
            }
            None => false,
        }
    }

    pub fn contains(&self, var: VarId) -> bool {
        let index = var.index();
        self.words
            .get(index / 64)
            .is_some_and(|word| word & (1u64 << (index % 64)) != 0)
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// Add every member of `other`. Returns true if the set grew.
    pub fn union_with(&mut self, other: &VarSet) -> bool {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        let mut changed = false;
        for (mine, theirs) in self.words.iter_mut().zip(&other.words) {
            let merged = *mine | *theirs;
            changed |= merged != *mine;
            *mine = merged;
        }
        changed
    }

    /// Keep only members also in `other`.
    pub fn intersect_with(&mut self, other: &VarSet) {
        for (i, mine) in self.words.iter_mut().enumerate() {
            *mine &= other.words.get(i).copied().unwrap_or(0);
        }
    }

    /// Remove every member of `other`.
    pub fn subtract(&mut self, other: &VarSet) {
        for (mine, theirs) in self.words.iter_mut().zip(&other.words) {
            *mine &= !*theirs;
        }
    }

    pub fn is_subset(&self, other: &VarSet) -> bool {
        self.words
            .iter()
            .enumerate()
            .all(|(i, &w)| w & !other.words.get(i).copied().unwrap_or(0) == 0)
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = VarId> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(VarId::new(i * 64 + bit))
            })
        })
    }
}

// Trailing zero words are not significant.
impl PartialEq for VarSet {
    fn eq(&self, other: &Self) -> bool {
        let len = self.words.len().max(other.words.len());
        (0..len).all(|i| {
            self.words.get(i).copied().unwrap_or(0) == other.words.get(i).copied().unwrap_or(0)
        })
    }
}

impl Eq for VarSet {}

impl FromIterator<VarId> for VarSet {
    fn from_iter<I: IntoIterator<Item = VarId>>(iter: I) -> Self {
        let mut set = VarSet::new();
        for var in iter {
            set.insert(var);
        }
        set
    }
}

impl Extend<VarId> for VarSet {
    fn extend<I: IntoIterator<Item = VarId>>(&mut self, iter: I) {
        for var in iter {
            self.insert(var);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(i: usize) -> VarId {
        VarId::new(i)
    }

    #[test]
    fn test_insert_remove_contains() {
        let mut set = VarSet::new();
        assert!(set.insert(v(3)));
        assert!(!set.insert(v(3)));
        assert!(set.insert(v(130)));
        assert!(set.contains(v(130)));
        assert!(!set.contains(v(129)));
        assert_eq!(set.len(), 2);
        assert!(set.remove(v(3)));
        assert!(!set.remove(v(3)));
        assert!(!set.remove(v(1000)));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![v(130)]);
    }

    #[test]
    fn test_set_algebra() {
        let a: VarSet = [v(1), v(2), v(70)].into_iter().collect();
        let b: VarSet = [v(2), v(3)].into_iter().collect();

        let mut union = a.clone();
        assert!(union.union_with(&b));
        assert!(!union.union_with(&b));
        assert_eq!(union.iter().collect::<Vec<_>>(), vec![v(1), v(2), v(3), v(70)]);

        let mut inter = a.clone();
        inter.intersect_with(&b);
        assert_eq!(inter.iter().collect::<Vec<_>>(), vec![v(2)]);

        let mut diff = a.clone();
        diff.subtract(&b);
        assert_eq!(diff.iter().collect::<Vec<_>>(), vec![v(1), v(70)]);

        assert!(inter.is_subset(&a));
        assert!(!a.is_subset(&b));
    }

    #[test]
    fn test_equality_ignores_capacity() {
        let mut a = VarSet::with_capacity(512);
        let b: VarSet = [v(5)].into_iter().collect();
        a.insert(v(5));
        assert_eq!(a, b);
    }
}
