//! Octant keys and their Morton arithmetic.
//!
//! An [Octant] is the key type of the whole engine. It describes the
//! axis-aligned cube `[x, x + h) x [y, y + h) x [z, z + h)` with
//! `h = 1 << (MAX_LEVEL - level)`, where the coordinates are integers on the
//! grid of the deepest refinement level. Octants are totally ordered along
//! the Morton space-filling curve obtained by interleaving the coordinate
//! bits (x least significant), with the level breaking ties so that an
//! ancestor sorts before the descendants sharing its origin.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use mpi::traits::Equivalence;

use crate::constants::{HMAX, MAX_LEVEL};

/// An octant of a linear octree.
///
/// The `tag` is a payload slot that carries a global node number, a
/// dependent-node encoding or a source block index depending on context.
/// It does not take part in comparisons or hashing.
#[derive(Copy, Clone, Debug, Default, Equivalence)]
pub struct Octant {
    /// Morton x coordinate, a multiple of the octant's own side length.
    pub x: i32,
    /// Morton y coordinate.
    pub y: i32,
    /// Morton z coordinate.
    pub z: i32,
    /// Refinement depth in `[0, MAX_LEVEL]`.
    pub level: i32,
    /// Context-dependent payload.
    pub tag: i32,
}

/// True if the most significant set bit of `b` is strictly above that of `a`.
#[inline]
fn less_msb(a: u32, b: u32) -> bool {
    a < b && a < (a ^ b)
}

impl Octant {
    /// Create a new octant with a zero tag.
    pub fn new(x: i32, y: i32, z: i32, level: i32) -> Self {
        debug_assert!((0..=MAX_LEVEL).contains(&level));
        Self {
            x,
            y,
            z,
            level,
            tag: 0,
        }
    }

    /// The side length of the octant.
    #[inline]
    pub fn h(&self) -> i32 {
        1 << (MAX_LEVEL - self.level)
    }

    /// True if the octant cube lies inside the unit block `[0, HMAX)^3`.
    #[inline]
    pub fn is_inside_domain(&self) -> bool {
        let h = self.h();
        self.x >= 0
            && self.y >= 0
            && self.z >= 0
            && self.x + h <= HMAX
            && self.y + h <= HMAX
            && self.z + h <= HMAX
    }

    /// The child index of this octant within its parent, in `0..8`.
    ///
    /// Bit 0 is the x offset, bit 1 the y offset, bit 2 the z offset. The
    /// root octant reports child id 0.
    pub fn child_id(&self) -> usize {
        let h = self.h();
        let mut id = 0;
        if self.x & h != 0 {
            id |= 1;
        }
        if self.y & h != 0 {
            id |= 2;
        }
        if self.z & h != 0 {
            id |= 4;
        }
        id
    }

    /// The `k`-th sibling sharing this octant's parent.
    ///
    /// Octants at level 0 have no siblings and are returned unchanged.
    pub fn sibling(&self, k: usize) -> Self {
        debug_assert!(k < 8);
        if self.level == 0 {
            return *self;
        }
        let h = self.h();
        // Coordinates of the 0-sibling, then add the offset encoded in k.
        let x = (self.x & !h) + if k & 1 != 0 { h } else { 0 };
        let y = (self.y & !h) + if k & 2 != 0 { h } else { 0 };
        let z = (self.z & !h) + if k & 4 != 0 { h } else { 0 };
        Self {
            x,
            y,
            z,
            level: self.level,
            tag: self.tag,
        }
    }

    /// The parent octant. Undefined at level 0 (debug asserted).
    pub fn parent(&self) -> Self {
        debug_assert!(self.level > 0);
        let h2 = 1 << (MAX_LEVEL - self.level + 1);
        Self {
            x: self.x & !(h2 - 1),
            y: self.y & !(h2 - 1),
            z: self.z & !(h2 - 1),
            level: self.level - 1,
            tag: self.tag,
        }
    }

    /// The `k`-th child, one level deeper.
    pub fn child(&self, k: usize) -> Self {
        debug_assert!(self.level < MAX_LEVEL);
        let hc = self.h() >> 1;
        Self {
            x: self.x + if k & 1 != 0 { hc } else { 0 },
            y: self.y + if k & 2 != 0 { hc } else { 0 },
            z: self.z + if k & 4 != 0 { hc } else { 0 },
            level: self.level + 1,
            tag: self.tag,
        }
    }

    /// The first (Morton smallest) descendant at depth `level`.
    pub fn first_descendant(&self, level: i32) -> Self {
        debug_assert!(level >= self.level);
        Self {
            x: self.x,
            y: self.y,
            z: self.z,
            level,
            tag: self.tag,
        }
    }

    /// The last (Morton largest) descendant at depth `level`.
    pub fn last_descendant(&self, level: i32) -> Self {
        debug_assert!(level >= self.level);
        let offset = self.h() - (1 << (MAX_LEVEL - level));
        Self {
            x: self.x + offset,
            y: self.y + offset,
            z: self.z + offset,
            level,
            tag: self.tag,
        }
    }

    /// True if the cube of `other` is contained in the cube of `self`.
    pub fn contains(&self, other: &Octant) -> bool {
        if self.level > other.level {
            return false;
        }
        let h = self.h();
        let ho = other.h();
        self.x <= other.x
            && other.x + ho <= self.x + h
            && self.y <= other.y
            && other.y + ho <= self.y + h
            && self.z <= other.z
            && other.z + ho <= self.z + h
    }

    /// Compare positions along the Morton curve, ignoring the level.
    ///
    /// The deciding axis is the one whose coordinates differ in the highest
    /// interleaved bit. Since z occupies the most significant bit of each
    /// interleaved triple, ties between axes resolve towards z.
    pub fn cmp_position(&self, other: &Octant) -> Ordering {
        let xd = (self.x ^ other.x) as u32;
        let yd = (self.y ^ other.y) as u32;
        let zd = (self.z ^ other.z) as u32;

        let (mut dom, mut a, mut b) = (zd, self.z, other.z);
        if less_msb(dom, yd) {
            dom = yd;
            a = self.y;
            b = other.y;
        }
        if less_msb(dom, xd) {
            a = self.x;
            b = other.x;
        }
        a.cmp(&b)
    }
}

impl PartialEq for Octant {
    fn eq(&self, other: &Self) -> bool {
        self.x == other.x && self.y == other.y && self.z == other.z && self.level == other.level
    }
}

impl Eq for Octant {}

impl PartialOrd for Octant {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Octant {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_position(other)
            .then_with(|| self.level.cmp(&other.level))
    }
}

impl Hash for Octant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.x.hash(state);
        self.y.hash(state);
        self.z.hash(state);
        self.level.hash(state);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::Rng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Reference Morton comparison via explicit 96 bit interleaving.
    fn interleave(o: &Octant) -> u128 {
        let mut key: u128 = 0;
        for bit in 0..32 {
            key |= (((o.x as u32 >> bit) & 1) as u128) << (3 * bit);
            key |= (((o.y as u32 >> bit) & 1) as u128) << (3 * bit + 1);
            key |= (((o.z as u32 >> bit) & 1) as u128) << (3 * bit + 2);
        }
        key
    }

    fn random_octant(rng: &mut ChaCha8Rng) -> Octant {
        let level = rng.gen_range(0..=MAX_LEVEL);
        let h = 1 << (MAX_LEVEL - level);
        Octant::new(
            h * rng.gen_range(0..(1 << level)),
            h * rng.gen_range(0..(1 << level)),
            h * rng.gen_range(0..(1 << level)),
            level,
        )
    }

    #[test]
    fn test_order_matches_interleaved_reference() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        for _ in 0..1000 {
            let a = random_octant(&mut rng);
            let b = random_octant(&mut rng);
            let expected = interleave(&a)
                .cmp(&interleave(&b))
                .then(a.level.cmp(&b.level));
            assert_eq!(a.cmp(&b), expected);
        }
    }

    #[test]
    fn test_children_are_contiguous_and_ascending() {
        let o = Octant::new(0, HMAX / 2, 0, 1);
        let children: Vec<Octant> = (0..8).map(|k| o.child(k)).collect();
        for pair in children.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        for (k, child) in children.iter().enumerate() {
            assert_eq!(child.child_id(), k);
            assert!(o.contains(child));
        }
    }

    #[test]
    fn test_sibling_parent_duality() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..200 {
            let o = random_octant(&mut rng);
            if o.level == 0 {
                continue;
            }
            for k in 0..8 {
                assert_eq!(o.sibling(k).parent(), o.parent());
            }
            assert_eq!(o.sibling(o.child_id()), o);
        }
    }

    #[test]
    fn test_descendant_range_brackets_descendants() {
        let o = Octant::new(HMAX / 2, 0, HMAX / 2, 1);
        let first = o.first_descendant(MAX_LEVEL);
        let last = o.last_descendant(MAX_LEVEL);
        assert!(first <= last);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        for _ in 0..200 {
            let h = o.h();
            let p = Octant::new(
                o.x + rng.gen_range(0..h),
                o.y + rng.gen_range(0..h),
                o.z + rng.gen_range(0..h),
                MAX_LEVEL,
            );
            assert!(first <= p && p <= last);
        }
    }

    #[test]
    fn test_root_sibling_is_identity() {
        let root = Octant::new(0, 0, 0, 0);
        assert_eq!(root.sibling(5), root);
        assert_eq!(root.child_id(), 0);
    }
}
