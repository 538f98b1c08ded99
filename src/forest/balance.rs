//! Propagation of 2:1 balance requests across block interfaces.
//!
//! Every block runs the single-tree ripple; neighbor cubes that leave the
//! block are carried through the crossed face, edge or vertex into the
//! frames of the adjacent blocks and enqueued there. Requests addressed to
//! blocks on other ranks are returned to the communication layer.

use crate::array::{OctantHash, OctantQueue};
use crate::constants::HMAX;
use crate::error::ForestError;
use crate::octant::Octant;
use crate::octree::{complete_and_linearize, ripple};
use crate::topology::{
    octant_at_corner, transform_edge_octant, transform_face_octant, BlockTopology,
};

use super::ForestState;

/// Per-block request accumulator and worklist during a forest balance.
pub(crate) type BalanceSlots = Vec<Option<(OctantHash, OctantQueue)>>;

/// Route a neighbor cube that left its block into the adjacent blocks.
///
/// The cube keeps its level; the receiving side masks it to the parent
/// grid. Crossing a boundary entity with no other side drops the request.
fn route_external(
    topo: &BlockTopology,
    block: usize,
    n: &Octant,
    out: &mut Vec<(usize, Octant)>,
) {
    let h = n.h();
    // Out-of-range status and side per axis.
    let status = |c: i32| -> Option<usize> {
        if c < 0 {
            Some(0)
        } else if c + h > HMAX {
            Some(1)
        } else {
            None
        }
    };
    let sx = status(n.x);
    let sy = status(n.y);
    let sz = status(n.z);

    match (sx, sy, sz) {
        (Some(side), None, None) | (None, Some(side), None) | (None, None, Some(side)) => {
            // Crossing a single block face.
            let axis = if sx.is_some() {
                0
            } else if sy.is_some() {
                1
            } else {
                2
            };
            let local_face = 2 * axis + side;
            let face = topo.face_at(block, local_face);
            let src = topo.face_side(block, local_face);
            for dst in &face.sides {
                if dst.block == src.block && dst.local_face == src.local_face {
                    continue;
                }
                out.push((dst.block, transform_face_octant(src, dst, n, h)));
            }
        }
        (None, Some(s1), Some(s2)) | (Some(s1), None, Some(s2)) | (Some(s1), Some(s2), None) => {
            // Crossing a block edge: the in-range axis is the edge axis.
            let local_edge = if sx.is_none() {
                s1 | s2 << 1
            } else if sy.is_none() {
                4 + (s1 | s2 << 1)
            } else {
                8 + (s1 | s2 << 1)
            };
            let edge = topo.edge_at(block, local_edge);
            let src = topo.edge_side(block, local_edge);
            for dst in &edge.sides {
                if dst.block == src.block && dst.local_edge == src.local_edge {
                    continue;
                }
                out.push((dst.block, transform_edge_octant(src, dst, n, h)));
            }
        }
        (Some(s1), Some(s2), Some(s3)) => {
            // Crossing a block vertex.
            let corner = s1 | s2 << 1 | s3 << 2;
            let vertex = topo.vertex_at(block, corner);
            for dst in &vertex.sides {
                if dst.block == block && dst.corner == corner {
                    continue;
                }
                out.push((dst.block, octant_at_corner(dst.corner, h, n.level)));
            }
        }
        (None, None, None) => unreachable!("octant did not leave the block"),
    }
}

impl ForestState {
    /// Seed the per-block balance state with the current elements.
    pub(crate) fn seed_balance(&self) -> Result<BalanceSlots, ForestError> {
        let mut slots: BalanceSlots = vec![None; self.octrees.len()];
        for &block in &self.owned {
            let tree = self.tree(block)?;
            let mut hash = OctantHash::new();
            let mut queue = OctantQueue::new();
            for &e in tree.elements().iter() {
                if hash.add(e) {
                    queue.push(e);
                }
            }
            slots[block] = Some((hash, queue));
        }
        Ok(slots)
    }

    /// Apply pending requests and ripple every owned block to quiescence,
    /// bouncing requests between local blocks until none are left. Returns
    /// the requests addressed to blocks on other ranks.
    pub(crate) fn balance_round(
        &self,
        slots: &mut BalanceSlots,
        balance_corners: bool,
        pending: Vec<(usize, Octant)>,
    ) -> Vec<(usize, Octant)> {
        let topo = self.topo.as_ref().unwrap();

        let mut inbox = pending;
        let mut remote = Vec::new();
        loop {
            for (block, cell) in inbox.drain(..) {
                debug_assert_eq!(self.owners[block], self.rank);
                let (hash, queue) = slots[block].as_mut().unwrap();
                if cell.level >= 1 {
                    let request = cell.parent();
                    if hash.add(request) {
                        queue.push(request);
                    }
                }
            }

            let mut outbox: Vec<(usize, Octant)> = Vec::new();
            for &block in &self.owned {
                let (hash, queue) = slots[block].as_mut().unwrap();
                ripple(hash, queue, balance_corners, |n| {
                    route_external(topo, block, &n, &mut outbox);
                });
            }

            for (block, cell) in outbox {
                if self.owners[block] == self.rank {
                    inbox.push((block, cell));
                } else {
                    remote.push((block, cell));
                }
            }
            if inbox.is_empty() {
                break;
            }
        }
        remote
    }

    /// Replace the elements of every owned tree with the completed and
    /// linearized cover accumulated during balancing.
    pub(crate) fn finalize_balance(&mut self, slots: BalanceSlots) {
        for (block, slot) in slots.into_iter().enumerate() {
            if let Some((hash, queue)) = slot {
                debug_assert!(queue.is_empty());
                let elements = complete_and_linearize(hash);
                self.octrees[block]
                    .as_mut()
                    .unwrap()
                    .set_elements(elements);
            }
        }
        self.clear_numbering();
    }

    /// Serial convenience: the complete balance on a single rank.
    #[cfg(test)]
    pub(crate) fn balance_serial(&mut self, balance_corners: bool) -> Result<(), ForestError> {
        assert_eq!(self.size, 1);
        let mut slots = self.seed_balance()?;
        let remote = self.balance_round(&mut slots, balance_corners, Vec::new());
        assert!(remote.is_empty());
        self.finalize_balance(slots);
        Ok(())
    }
}
