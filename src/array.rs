//! Flat containers for octants.
//!
//! The engine stores linear octrees as sorted arrays of octants and uses a
//! hash set and a FIFO queue as temporary accumulators that are folded back
//! into arrays. Searches return indices into the array instead of interior
//! pointers, so tags can be updated through indexed writes after re-sorting.

use std::collections::{HashSet, VecDeque};

use crate::octant::Octant;

/// A flat sequence of octants, sorted and unique after [OctantArray::sort]
/// and [OctantArray::uniquify].
#[derive(Clone, Debug, Default)]
pub struct OctantArray {
    octs: Vec<Octant>,
}

impl OctantArray {
    /// Create an empty array.
    pub fn new() -> Self {
        Self { octs: Vec::new() }
    }

    /// Wrap an existing vector of octants.
    pub fn from_vec(octs: Vec<Octant>) -> Self {
        Self { octs }
    }

    /// Number of stored octants.
    pub fn len(&self) -> usize {
        self.octs.len()
    }

    /// True if no octants are stored.
    pub fn is_empty(&self) -> bool {
        self.octs.is_empty()
    }

    /// Borrow the underlying slice.
    pub fn as_slice(&self) -> &[Octant] {
        &self.octs
    }

    /// Read the octant at `index`.
    pub fn get(&self, index: usize) -> &Octant {
        &self.octs[index]
    }

    /// Mutable access to the octant at `index`.
    pub fn get_mut(&mut self, index: usize) -> &mut Octant {
        &mut self.octs[index]
    }

    /// Iterate over the stored octants.
    pub fn iter(&self) -> std::slice::Iter<'_, Octant> {
        self.octs.iter()
    }

    /// Append an octant. The array has to be re-sorted before searching.
    pub fn push(&mut self, oct: Octant) {
        self.octs.push(oct);
    }

    /// Sort into Morton order. The sort is not stable; octants that are
    /// equal up to their tag may be reordered.
    pub fn sort(&mut self) {
        self.octs.sort_unstable();
    }

    /// Remove duplicates with equal `(x, y, z, level)`, keeping the first
    /// representative of each run. Requires the array to be sorted.
    pub fn uniquify(&mut self) {
        self.octs.dedup();
    }

    /// Binary search for an octant equal to `q`.
    ///
    /// With `use_nodes` the comparison projects out the level, which is the
    /// mode used for node arrays (unique by position by construction).
    /// Returns the index of the stored octant, or `None`.
    pub fn contains(&self, q: &Octant, use_nodes: bool) -> Option<usize> {
        let result = if use_nodes {
            self.octs.binary_search_by(|probe| probe.cmp_position(q))
        } else {
            self.octs.binary_search_by(|probe| probe.cmp(q))
        };
        result.ok()
    }

    /// Find the stored octant whose cube contains `oct`, assuming the
    /// array is sorted and its cubes are pairwise disjoint.
    ///
    /// The candidate is the last stored octant not greater than `oct`:
    /// descendants follow their ancestor in Morton order, and no disjoint
    /// octant can sit between an ancestor and its descendant.
    pub fn find_enclosing(&self, oct: &Octant) -> Option<usize> {
        let ip = self.octs.partition_point(|e| e <= oct);
        if ip == 0 {
            return None;
        }
        let candidate = ip - 1;
        if self.octs[candidate].contains(oct) {
            Some(candidate)
        } else {
            None
        }
    }

    /// Consume the array and return the underlying vector.
    pub fn into_vec(self) -> Vec<Octant> {
        self.octs
    }
}

impl<'a> IntoIterator for &'a OctantArray {
    type Item = &'a Octant;
    type IntoIter = std::slice::Iter<'a, Octant>;

    fn into_iter(self) -> Self::IntoIter {
        self.octs.iter()
    }
}

/// An unordered accumulator with set semantics on `(x, y, z, level)`.
#[derive(Clone, Debug, Default)]
pub struct OctantHash {
    set: HashSet<Octant>,
}

impl OctantHash {
    /// Create an empty hash.
    pub fn new() -> Self {
        Self {
            set: HashSet::new(),
        }
    }

    /// Insert an octant. Returns true if it was not present before.
    pub fn add(&mut self, oct: Octant) -> bool {
        self.set.insert(oct)
    }

    /// True if an equal octant (tag ignored) is present.
    pub fn contains(&self, oct: &Octant) -> bool {
        self.set.contains(oct)
    }

    /// Number of distinct octants.
    pub fn len(&self) -> usize {
        self.set.len()
    }

    /// True if the hash is empty.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Iterate over the stored octants in unspecified order.
    pub fn iter(&self) -> std::collections::hash_set::Iter<'_, Octant> {
        self.set.iter()
    }

    /// Drain the hash into a sorted unique [OctantArray].
    pub fn into_array(self) -> OctantArray {
        let mut array = OctantArray::from_vec(self.set.into_iter().collect());
        array.sort();
        array
    }
}

/// A FIFO worklist of octants used during balancing.
#[derive(Clone, Debug, Default)]
pub struct OctantQueue {
    queue: VecDeque<Octant>,
}

impl OctantQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Append an octant at the back.
    pub fn push(&mut self, oct: Octant) {
        self.queue.push_back(oct);
    }

    /// Remove and return the front octant.
    pub fn pop(&mut self) -> Option<Octant> {
        self.queue.pop_front()
    }

    /// True if no work is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constants::MAX_LEVEL;
    use rand::Rng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn random_octants(n: usize, seed: u64) -> Vec<Octant> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let level = rng.gen_range(1..6);
                let h = 1 << (MAX_LEVEL - level);
                Octant::new(
                    h * rng.gen_range(0..(1 << level)),
                    h * rng.gen_range(0..(1 << level)),
                    h * rng.gen_range(0..(1 << level)),
                    level,
                )
            })
            .collect()
    }

    #[test]
    fn test_sort_uniquify_commutes() {
        // Duplicate the input so uniquify has work to do.
        let mut octs = random_octants(100, 3);
        let copy = octs.clone();
        octs.extend(copy);

        let mut a = OctantArray::from_vec(octs.clone());
        a.sort();
        a.uniquify();

        let mut hash = OctantHash::new();
        for oct in octs {
            hash.add(oct);
        }
        let b = hash.into_array();

        assert_eq!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn test_contains_by_position_and_level() {
        let mut array = OctantArray::from_vec(random_octants(50, 4));
        array.sort();
        array.uniquify();

        for index in 0..array.len() {
            let q = *array.get(index);
            assert_eq!(array.contains(&q, false), Some(index));
        }

        // A node-mode search ignores the level.
        let mut nodes = OctantArray::new();
        nodes.push(Octant::new(0, 0, 0, 0));
        nodes.push(Octant::new(1 << (MAX_LEVEL - 1), 0, 0, 0));
        nodes.sort();
        let mut probe = Octant::new(1 << (MAX_LEVEL - 1), 0, 0, 5);
        probe.tag = 17;
        let found = nodes.contains(&probe, true).unwrap();
        assert_eq!(nodes.get(found).x, 1 << (MAX_LEVEL - 1));
        assert_eq!(nodes.contains(&probe, false), None);
    }

    #[test]
    fn test_queue_is_fifo() {
        let mut queue = OctantQueue::new();
        let a = Octant::new(0, 0, 0, 0);
        let b = Octant::new(0, 0, 0, 1);
        queue.push(a);
        queue.push(b);
        assert_eq!(queue.pop(), Some(a));
        assert_eq!(queue.pop(), Some(b));
        assert!(queue.pop().is_none());
    }
}
