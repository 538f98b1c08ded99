//! A linear octree over a single macro block.
//!
//! The octree is stored as the sorted array of its leaves. All algorithms
//! operate on that flat representation: refinement and coarsening rebuild
//! the array through a hash accumulator, the 2:1 balance ripples
//! parent-level requests through a worklist, and lookups are binary
//! searches along the Morton order.

use log::warn;
use rand::Rng;

use crate::array::{OctantArray, OctantHash, OctantQueue};
use crate::constants::{HMAX, MAX_LEVEL, NSIBLINGS};
use crate::octant::Octant;

/// The 26 unit directions of the octant neighborhood, restricted to faces
/// and edges unless corner balancing is requested.
pub(crate) fn neighbor_directions(balance_corners: bool) -> impl Iterator<Item = [i32; 3]> {
    (0..27).filter_map(move |index| {
        let d = [index % 3 - 1, index / 3 % 3 - 1, index / 9 - 1];
        let nonzero = d.iter().filter(|&&c| c != 0).count();
        if nonzero == 0 || (nonzero == 3 && !balance_corners) {
            None
        } else {
            Some(d)
        }
    })
}

/// Drain the worklist, inserting the parent-level neighbor requests that
/// enforce the 2:1 condition. Neighbor cubes outside `[0, HMAX)^3` are
/// handed to `external`; the forest routes them into adjacent blocks while
/// the single-tree balance drops them.
pub(crate) fn ripple<F: FnMut(Octant)>(
    hash: &mut OctantHash,
    queue: &mut OctantQueue,
    balance_corners: bool,
    mut external: F,
) {
    while let Some(o) = queue.pop() {
        // Octants at levels 0 and 1 cannot force any neighbor refinement.
        if o.level <= 1 {
            continue;
        }
        let h = o.h();
        for d in neighbor_directions(balance_corners) {
            let n = Octant {
                x: o.x + d[0] * h,
                y: o.y + d[1] * h,
                z: o.z + d[2] * h,
                level: o.level,
                tag: 0,
            };
            if n.is_inside_domain() {
                let req = n.parent();
                if hash.add(req) {
                    queue.push(req);
                }
            } else {
                external(n);
            }
        }
    }
}

/// Expand every entry to its full sibling family, then keep the finest
/// cover: any entry strictly containing a deeper entry is removed.
pub(crate) fn complete_and_linearize(hash: OctantHash) -> OctantArray {
    let mut full = OctantHash::new();
    for &o in hash.iter() {
        if o.level == 0 {
            full.add(o);
            continue;
        }
        for k in 0..NSIBLINGS {
            full.add(o.sibling(k));
        }
    }

    let sorted = full.into_array();
    let mut result: Vec<Octant> = Vec::with_capacity(sorted.len());
    for &o in sorted.iter() {
        // Ancestors precede their descendants in Morton order, so an entry
        // made redundant by `o` can only sit at the back of the result.
        while let Some(last) = result.last() {
            if last.contains(&o) {
                result.pop();
            } else {
                break;
            }
        }
        result.push(o);
    }
    OctantArray::from_vec(result)
}

/// A linear octree: the sorted unique leaf set of one macro block, plus an
/// optional array of finite-element node positions derived from it.
#[derive(Clone, Debug)]
pub struct Octree {
    elements: OctantArray,
    nodes: Option<OctantArray>,
    order: usize,
    num_dep_nodes: usize,
}

impl Octree {
    /// Create a uniformly refined octree covering the block.
    pub fn uniform(refine_level: i32) -> Self {
        let level = refine_level.clamp(0, MAX_LEVEL);
        if level != refine_level {
            warn!("clamped refinement level {} to {}", refine_level, level);
        }

        let h = 1 << (MAX_LEVEL - level);
        let nx = 1i64 << level;
        let mut elements = Vec::with_capacity((nx * nx * nx) as usize);
        for z in (0..HMAX).step_by(h as usize) {
            for y in (0..HMAX).step_by(h as usize) {
                for x in (0..HMAX).step_by(h as usize) {
                    elements.push(Octant::new(x, y, z, level));
                }
            }
        }
        Self::from_elements(OctantArray::from_vec(elements))
    }

    /// Create an octree from `nrand` random octants, for testing.
    ///
    /// The result generally covers the block only after [Octree::balance].
    pub fn random<R: Rng + ?Sized>(
        nrand: usize,
        min_level: i32,
        max_level: i32,
        rng: &mut R,
    ) -> Self {
        let min_level = min_level.clamp(0, MAX_LEVEL);
        let max_level = max_level.clamp(min_level, MAX_LEVEL);

        let mut elements = Vec::with_capacity(nrand);
        for _ in 0..nrand {
            let level = rng.gen_range(min_level..=max_level);
            let h = 1 << (MAX_LEVEL - level);
            elements.push(Octant::new(
                h * rng.gen_range(0..(1 << level)),
                h * rng.gen_range(0..(1 << level)),
                h * rng.gen_range(0..(1 << level)),
                level,
            ));
        }
        Self::from_elements(OctantArray::from_vec(elements))
    }

    /// Create an octree from a given element array.
    pub fn from_elements(mut elements: OctantArray) -> Self {
        elements.sort();
        elements.uniquify();
        Self {
            elements,
            nodes: None,
            order: 2,
            num_dep_nodes: 0,
        }
    }

    /// The sorted unique element array.
    pub fn elements(&self) -> &OctantArray {
        &self.elements
    }

    /// Replace the element array, invalidating the cached nodes.
    pub(crate) fn set_elements(&mut self, elements: OctantArray) {
        self.elements = elements;
        self.invalidate_nodes();
    }

    /// The node array, if [Octree::create_nodes] has been called.
    pub fn nodes(&self) -> Option<&OctantArray> {
        self.nodes.as_ref()
    }

    pub(crate) fn nodes_mut(&mut self) -> Option<&mut OctantArray> {
        self.nodes.as_mut()
    }

    /// The polynomial order of the node lattice.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of elements (leaves).
    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    /// Number of nodes, zero before [Octree::create_nodes].
    pub fn num_nodes(&self) -> usize {
        self.nodes.as_ref().map_or(0, |n| n.len())
    }

    /// Number of nodes labelled dependent by the forest.
    pub fn num_dep_nodes(&self) -> usize {
        self.num_dep_nodes
    }

    pub(crate) fn set_num_dep_nodes(&mut self, count: usize) {
        self.num_dep_nodes = count;
    }

    pub(crate) fn invalidate_nodes(&mut self) {
        self.nodes = None;
        self.num_dep_nodes = 0;
    }

    /// Refine or coarsen elements according to the per-element flags.
    ///
    /// Positive flags split the element, negative flags replace it by its
    /// parent, zero keeps it. Levels are clamped to
    /// `[min_level, max_level]`. Families are completed by adding all
    /// siblings of each canonical representative, so the result is again a
    /// linear octree. Cached nodes are destroyed.
    pub fn refine(&mut self, refinement: &[i32], min_level: i32, max_level: i32) {
        debug_assert_eq!(refinement.len(), self.num_elements());

        let min_level = min_level.max(0);
        let max_level = max_level.min(MAX_LEVEL);
        let min_level = min_level.min(max_level);

        self.invalidate_nodes();

        let mut hash = OctantHash::new();
        for (&e, &flag) in self.elements.iter().zip(refinement.iter()) {
            if flag == 0 {
                // The 0-sibling is the canonical representative of the
                // retained family.
                hash.add(e.sibling(0));
            } else if flag < 0 {
                if e.level > min_level {
                    let mut q = e.sibling(0);
                    q.level -= 1;
                    hash.add(q);
                } else {
                    hash.add(e);
                }
            } else if e.level < max_level {
                // The element octant one level deeper is its own 0-child.
                let mut q = e;
                q.level += 1;
                hash.add(q);
            } else {
                hash.add(e);
            }
        }

        // Expand each representative into the full sibling family.
        let snapshot: Vec<Octant> = hash.iter().copied().collect();
        for o in snapshot {
            for k in 0..NSIBLINGS {
                let s = o.sibling(k);
                if s.is_inside_domain() {
                    hash.add(s);
                }
            }
        }

        self.elements = hash.into_array();
    }

    /// Return a new octree one level coarser wherever a complete sibling
    /// family is present in the element array.
    pub fn coarsen(&self) -> Octree {
        let elems = self.elements.as_slice();
        let offset = NSIBLINGS - 1;

        let mut result = Vec::with_capacity(elems.len());
        let mut i = 0;
        while i < elems.len() {
            let e = elems[i];
            if e.level > 0
                && e.child_id() == 0
                && i + offset < elems.len()
                && elems[i + offset].child_id() == offset
                && elems[i + offset].sibling(0) == e
            {
                // A full family: the eight children of one parent are
                // consecutive in Morton order.
                result.push(e.parent());
                i += NSIBLINGS;
            } else {
                result.push(e);
                i += 1;
            }
        }
        Octree::from_elements(OctantArray::from_vec(result))
    }

    /// Find the element whose cube contains `oct`, if any.
    pub fn find_enclosing(&self, oct: &Octant) -> Option<usize> {
        self.elements.find_enclosing(oct)
    }

    /// The half-open range of element indices whose cubes touch `oct`.
    pub fn find_enclosing_range(&self, oct: &Octant) -> (usize, usize) {
        let mut low = 0;
        let mut high = self.num_elements();

        let first = oct.first_descendant(MAX_LEVEL);
        if let Some(index) = self.find_enclosing(&first) {
            low = index;
        }

        let h = oct.h();
        let last = Octant::new(oct.x + h - 1, oct.y + h - 1, oct.z + h - 1, MAX_LEVEL);
        if let Some(index) = self.find_enclosing(&last) {
            high = index + 1;
        }

        (low, high)
    }

    /// Enforce the 2:1 condition between all face and edge neighbors, and
    /// between corner neighbors if `balance_corners` is set.
    ///
    /// Requests that leave the block are dropped; the forest-level balance
    /// routes them into the adjacent blocks instead.
    pub fn balance(&mut self, balance_corners: bool) {
        let mut hash = OctantHash::new();
        let mut queue = OctantQueue::new();
        for &e in self.elements.iter() {
            if hash.add(e) {
                queue.push(e);
            }
        }
        ripple(&mut hash, &mut queue, balance_corners, |_| {});
        self.elements = complete_and_linearize(hash);
        self.invalidate_nodes();
    }

    /// Create the tensor-product node candidates of every element.
    ///
    /// Order 2 places nodes on the element corners, order 3 adds the
    /// midpoints at half the element step. Candidates carry `level = 0`
    /// and the positive sentinel `tag = 1`; the forest numbering replaces
    /// both. The array is unique by position.
    pub fn create_nodes(&mut self, order: usize) {
        let clamped = order.clamp(2, 3);
        if clamped != order {
            warn!("clamped mesh order {} to {}", order, clamped);
        }
        self.order = clamped;
        let order = clamped;

        let mut all = Vec::with_capacity(order * order * order * self.num_elements());
        for e in self.elements.iter() {
            debug_assert!(order == 2 || e.level < MAX_LEVEL);
            let step = if order == 2 { e.h() } else { e.h() / 2 };
            for kk in 0..order as i32 {
                for jj in 0..order as i32 {
                    for ii in 0..order as i32 {
                        let mut n =
                            Octant::new(e.x + ii * step, e.y + jj * step, e.z + kk * step, 0);
                        n.tag = 1;
                        all.push(n);
                    }
                }
            }
        }

        let mut nodes = OctantArray::from_vec(all);
        nodes.sort();
        nodes.uniquify();
        self.nodes = Some(nodes);
        self.num_dep_nodes = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::Rng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// True if the closed cubes of the two octants intersect.
    fn touches(a: &Octant, b: &Octant) -> bool {
        let (ha, hb) = (a.h(), b.h());
        a.x <= b.x + hb
            && b.x <= a.x + ha
            && a.y <= b.y + hb
            && b.y <= a.y + ha
            && a.z <= b.z + hb
            && b.z <= a.z + ha
    }

    /// Assert the element array is a disjoint cover of the whole block.
    fn assert_is_partition(tree: &Octree) {
        let mut volume: u128 = 0;
        for e in tree.elements().iter() {
            let h = e.h() as u128;
            volume += h * h * h;
        }
        let hmax = HMAX as u128;
        assert_eq!(volume, hmax * hmax * hmax);

        for pair in tree.elements().as_slice().windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(!pair[0].contains(&pair[1]));
        }
    }

    #[test]
    fn test_uniform_counts() {
        for level in 0..4 {
            let tree = Octree::uniform(level);
            assert_eq!(tree.num_elements(), 1usize << (3 * level));
            assert_is_partition(&tree);
        }
    }

    #[test]
    fn test_refine_is_idempotent_at_the_clamp() {
        let tree = Octree::uniform(2);
        let mut refined = tree.clone();
        let flags = vec![1; tree.num_elements()];
        refined.refine(&flags, 0, 2);
        assert_eq!(refined.elements().as_slice(), tree.elements().as_slice());
    }

    #[test]
    fn test_refine_coarsen_round_trip() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut tree = Octree::random(50, 0, 5, &mut rng);
        tree.balance(true);
        assert_is_partition(&tree);

        let mut refined = tree.clone();
        let flags = vec![1; tree.num_elements()];
        refined.refine(&flags, 0, MAX_LEVEL);
        assert_eq!(refined.num_elements(), 8 * tree.num_elements());

        let coarse = refined.coarsen();
        assert_eq!(coarse.elements().as_slice(), tree.elements().as_slice());
    }

    #[test]
    fn test_balance_two_to_one_and_fixed_point() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut tree = Octree::random(50, 0, 5, &mut rng);
        tree.balance(true);
        assert_is_partition(&tree);

        let elems = tree.elements().as_slice();
        for a in elems {
            for b in elems {
                if touches(a, b) {
                    assert!((a.level - b.level).abs() <= 1);
                }
            }
        }

        let once = tree.elements().clone();
        tree.balance(true);
        assert_eq!(tree.elements().as_slice(), once.as_slice());
    }

    #[test]
    fn test_find_enclosing() {
        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let mut tree = Octree::random(30, 0, 5, &mut rng);
        tree.balance(false);

        for _ in 0..500 {
            let p = Octant::new(
                rng.gen_range(0..HMAX),
                rng.gen_range(0..HMAX),
                rng.gen_range(0..HMAX),
                MAX_LEVEL,
            );
            let index = tree.find_enclosing(&p).unwrap();
            assert!(tree.elements().get(index).contains(&p));
        }

        // The root octant spans every element.
        let root = Octant::new(0, 0, 0, 0);
        if tree.num_elements() > 1 {
            assert_eq!(tree.find_enclosing(&root), None);
        }
        assert_eq!(tree.find_enclosing_range(&root), (0, tree.num_elements()));
    }

    #[test]
    fn test_node_counts() {
        for level in 1..3 {
            let mut tree = Octree::uniform(level);
            tree.create_nodes(2);
            let n = (1usize << level) + 1;
            assert_eq!(tree.num_nodes(), n * n * n);

            tree.create_nodes(3);
            let n = (1usize << (level + 1)) + 1;
            assert_eq!(tree.num_nodes(), n * n * n);
        }
    }
}
