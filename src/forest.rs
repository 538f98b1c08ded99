//! A parallel forest of octrees over the macro-block complex.
//!
//! The forest owns one linear octree per macro block of the input
//! connectivity, distributed over the ranks of a communicator. The
//! communication-free per-rank algorithms live on [ForestState] so they can
//! be exercised serially; the [Forest] methods wrap them with the
//! collective exchanges.

mod balance;
mod interp;
mod nodes;

use itertools::Itertools;
use log::info;
use mpi::traits::CommunicatorCollectives;
use rand::Rng;

use crate::array::OctantArray;
use crate::error::ForestError;
use crate::octant::Octant;
use crate::octree::Octree;
use crate::tools::{global_sum, redistribute};
use crate::topology::BlockTopology;

/// The per-rank state of a forest: topology, trees and numbering data.
#[derive(Clone, Debug)]
pub(crate) struct ForestState {
    pub(crate) topo: Option<BlockTopology>,
    /// One octree slot per block; only owned slots are populated.
    pub(crate) octrees: Vec<Option<Octree>>,
    /// Owning rank of each block.
    pub(crate) owners: Vec<usize>,
    /// The blocks owned by this rank, ascending.
    pub(crate) owned: Vec<usize>,
    pub(crate) order: usize,
    pub(crate) rank: usize,
    pub(crate) size: usize,
    /// Owned-node ranges per rank, `size + 1` entries once numbered.
    pub(crate) node_range: Vec<i32>,
    pub(crate) dep_ptr: Vec<i32>,
    pub(crate) dep_conn: Vec<i32>,
    pub(crate) dep_weights: Vec<f64>,
}

impl ForestState {
    pub(crate) fn new(rank: usize, size: usize) -> Self {
        Self {
            topo: None,
            octrees: Vec::new(),
            owners: Vec::new(),
            owned: Vec::new(),
            order: 2,
            rank,
            size,
            node_range: Vec::new(),
            dep_ptr: Vec::new(),
            dep_conn: Vec::new(),
            dep_weights: Vec::new(),
        }
    }

    pub(crate) fn topo(&self) -> Result<&BlockTopology, ForestError> {
        self.topo
            .as_ref()
            .ok_or(ForestError::MissingPrerequisite("set_connectivity"))
    }

    pub(crate) fn tree(&self, block: usize) -> Result<&Octree, ForestError> {
        self.octrees[block]
            .as_ref()
            .ok_or(ForestError::MissingPrerequisite("create_trees"))
    }

    pub(crate) fn set_connectivity(
        &mut self,
        num_nodes: usize,
        conn: &[i32],
        partition: bool,
    ) -> Result<(), ForestError> {
        let topo = BlockTopology::from_connectivity(num_nodes, conn)?;
        let num_blocks = topo.num_blocks();

        self.owners = if partition {
            partition_owners(&topo, self.size)
        } else {
            (0..num_blocks).map(|b| b * self.size / num_blocks).collect()
        };
        self.owned = (0..num_blocks)
            .filter(|&b| self.owners[b] == self.rank)
            .collect();
        self.octrees = vec![None; num_blocks];
        self.topo = Some(topo);
        self.clear_numbering();
        Ok(())
    }

    pub(crate) fn clear_numbering(&mut self) {
        self.node_range.clear();
        self.dep_ptr.clear();
        self.dep_conn.clear();
        self.dep_weights.clear();
    }

    pub(crate) fn install_trees<F: FnMut(usize) -> Octree>(
        &mut self,
        mut make: F,
    ) -> Result<(), ForestError> {
        self.topo()?;
        for &block in &self.owned.clone() {
            self.octrees[block] = Some(make(block));
        }
        self.clear_numbering();
        Ok(())
    }

    /// The number of dependent nodes in the rank-local dependent table.
    pub(crate) fn num_dep_nodes(&self) -> usize {
        self.dep_ptr.len().saturating_sub(1)
    }

    /// Per-block element counts; zero for blocks owned elsewhere.
    pub(crate) fn local_block_weights(&self) -> Vec<usize> {
        let num_blocks = self.octrees.len();
        let mut weights = vec![0usize; num_blocks];
        for &block in &self.owned {
            if let Some(tree) = &self.octrees[block] {
                weights[block] = tree.num_elements();
            }
        }
        weights
    }

    /// A state one level coarser, with the same topology and ownership.
    pub(crate) fn coarsened(&self) -> Result<ForestState, ForestError> {
        let mut coarse = ForestState::new(self.rank, self.size);
        coarse.topo = self.topo.clone();
        coarse.owners = self.owners.clone();
        coarse.owned = self.owned.clone();
        coarse.octrees = vec![None; self.octrees.len()];
        for &block in &self.owned {
            coarse.octrees[block] = Some(self.tree(block)?.coarsen());
        }
        Ok(coarse)
    }

    /// Install the new ownership map and the octrees received during a
    /// repartition. `incoming` octants carry their block in the tag.
    pub(crate) fn apply_repartition(&mut self, new_owners: Vec<usize>, incoming: &[Octant]) {
        for (block, slot) in self.octrees.iter_mut().enumerate() {
            if new_owners[block] != self.rank {
                *slot = None;
            } else if let Some(tree) = slot {
                tree.invalidate_nodes();
            }
        }

        for (block, group) in &incoming.iter().chunk_by(|o| o.tag as usize) {
            let elements = group
                .map(|&o| Octant::new(o.x, o.y, o.z, o.level))
                .collect_vec();
            self.octrees[block] = Some(Octree::from_elements(OctantArray::from_vec(elements)));
        }

        self.owned = (0..new_owners.len())
            .filter(|&b| new_owners[b] == self.rank)
            .collect();
        self.owners = new_owners;
        self.clear_numbering();
    }
}

/// Assign blocks to ranks in contiguous chunks of equal element weight
/// along the block-id (Morton concatenation) order. Blocks are atomic: the
/// rank whose chunk contains the block's weight midpoint takes it.
pub(crate) fn sfc_owners(weights: &[usize], size: usize) -> Vec<usize> {
    let total: usize = weights.iter().sum();
    if total == 0 || size <= 1 {
        return vec![0; weights.len()];
    }

    let mut owners = Vec::with_capacity(weights.len());
    let mut prefix = 0usize;
    for &w in weights {
        let midpoint = 2 * prefix + w;
        let owner = (midpoint * size / (2 * total)).min(size - 1);
        owners.push(owner);
        prefix += w;
    }
    owners
}

/// Grow contiguous parts of the face-adjacency graph, one per rank, for
/// the optional partitioning mode of `set_connectivity`.
pub(crate) fn partition_owners(topo: &BlockTopology, size: usize) -> Vec<usize> {
    let num_blocks = topo.num_blocks();
    let target = num_blocks.div_ceil(size);

    let mut owners = vec![usize::MAX; num_blocks];
    let mut next_rank = 0;
    let mut frontier: Vec<usize> = Vec::new();
    let mut assigned_in_part = 0;

    for seed in 0..num_blocks {
        if owners[seed] != usize::MAX {
            continue;
        }
        frontier.push(seed);
        while let Some(block) = frontier.pop() {
            if owners[block] != usize::MAX {
                continue;
            }
            owners[block] = next_rank;
            assigned_in_part += 1;
            if assigned_in_part == target {
                next_rank = (next_rank + 1).min(size - 1);
                assigned_in_part = 0;
                frontier.clear();
                break;
            }
            for local_face in 0..6 {
                for side in &topo.face_at(block, local_face).sides {
                    if owners[side.block] == usize::MAX {
                        frontier.push(side.block);
                    }
                }
            }
        }
    }
    owners
}

/// A forest of octrees, one per macro block, coupled across the shared
/// faces, edges and vertices of the block complex.
pub struct Forest<'c, C: CommunicatorCollectives> {
    comm: &'c C,
    state: ForestState,
}

impl<'c, C: CommunicatorCollectives> Forest<'c, C> {
    /// Create an empty forest on the given communicator.
    pub fn new(comm: &'c C) -> Self {
        Self {
            comm,
            state: ForestState::new(comm.rank() as usize, comm.size() as usize),
        }
    }

    /// The communicator the forest lives on.
    pub fn comm(&self) -> &C {
        self.comm
    }

    /// Set the macro-block connectivity: `conn` holds eight 0-based node
    /// ids per hex block in tensor-product corner order. With `partition`
    /// the blocks are distributed by growing connected parts of the
    /// face-adjacency graph instead of contiguous id chunks.
    pub fn set_connectivity(
        &mut self,
        num_nodes: usize,
        conn: &[i32],
        partition: bool,
    ) -> Result<(), ForestError> {
        self.state.set_connectivity(num_nodes, conn, partition)?;
        info!(
            "forest connectivity: {} blocks, {} faces, {} edges, {} nodes",
            self.state.topo()?.num_blocks(),
            self.state.topo()?.num_faces(),
            self.state.topo()?.num_edges(),
            self.state.topo()?.num_nodes(),
        );
        Ok(())
    }

    /// The derived macro complex, once the connectivity is set.
    pub fn topology(&self) -> Option<&BlockTopology> {
        self.state.topo.as_ref()
    }

    /// The owning rank of every block.
    pub fn block_owners(&self) -> &[usize] {
        &self.state.owners
    }

    /// The blocks owned by this rank, ascending.
    pub fn owned_blocks(&self) -> &[usize] {
        &self.state.owned
    }

    /// The octree of a block, if it is populated on this rank.
    pub fn octree(&self, block: usize) -> Option<&Octree> {
        self.state.octrees.get(block).and_then(|t| t.as_ref())
    }

    /// Create a uniformly refined octree on every owned block.
    pub fn create_trees(&mut self, refine_level: i32) -> Result<(), ForestError> {
        self.state
            .install_trees(|_| Octree::uniform(refine_level))
    }

    /// Create octrees with a per-block uniform refinement level.
    pub fn create_trees_refined(&mut self, levels: &[i32]) -> Result<(), ForestError> {
        self.state.install_trees(|block| Octree::uniform(levels[block]))
    }

    /// Create randomized octrees on every owned block, for testing.
    pub fn create_random_trees<R: Rng + ?Sized>(
        &mut self,
        nrand: usize,
        min_level: i32,
        max_level: i32,
        rng: &mut R,
    ) -> Result<(), ForestError> {
        self.state
            .install_trees(|_| Octree::random(nrand, min_level, max_level, rng))
    }

    /// Redistribute the blocks over the ranks so that every rank owns a
    /// contiguous chunk of roughly equal element weight along the global
    /// Morton order. Cached nodes are invalidated.
    pub fn repartition(&mut self) -> Result<(), ForestError> {
        self.state.topo()?;
        let local = self.state.local_block_weights();

        let mut weights = vec![0usize; local.len()];
        self.comm
            .all_reduce_into(&local[..], &mut weights[..], mpi::collective::SystemOperation::sum());

        let new_owners = sfc_owners(&weights, self.state.size);

        // Stream the octants of migrating blocks to their new owner, the
        // source block in the tag.
        let mut outgoing: Vec<(usize, Octant)> = Vec::new();
        for &block in &self.state.owned {
            let dest = new_owners[block];
            if dest == self.state.rank {
                continue;
            }
            let tree = self.state.tree(block)?;
            for &e in tree.elements().iter() {
                let mut oct = e;
                oct.tag = block as i32;
                outgoing.push((dest, oct));
            }
        }
        outgoing.sort_by_key(|&(dest, oct)| (dest, oct.tag));

        let mut counts = vec![0i32; self.state.size];
        for &(dest, _) in &outgoing {
            counts[dest] += 1;
        }
        let sendbuf = outgoing.iter().map(|&(_, oct)| oct).collect_vec();
        let incoming = redistribute(&sendbuf, &counts, self.comm);

        info!(
            "repartition: sending {} elements, receiving {}",
            sendbuf.len(),
            incoming.len()
        );
        self.state.apply_repartition(new_owners, &incoming);
        Ok(())
    }

    /// Enforce the 2:1 condition between all elements that share a face or
    /// edge, across block interfaces and ranks. With `balance_corners` the
    /// condition extends to corner neighbors.
    pub fn balance(&mut self, balance_corners: bool) -> Result<(), ForestError> {
        let mut per_block = self.state.seed_balance()?;
        let mut pending: Vec<(usize, Octant)> = Vec::new();

        loop {
            let remote = self
                .state
                .balance_round(&mut per_block, balance_corners, std::mem::take(&mut pending));

            if self.state.size == 1 {
                debug_assert!(remote.is_empty());
                break;
            }

            // Exchange the cross-rank requests, the target block riding in
            // the octant tag, and stop once no rank has traffic in flight.
            let total = global_sum(remote.len(), self.comm);
            if total == 0 {
                break;
            }

            let mut tagged = remote
                .into_iter()
                .map(|(block, mut oct)| {
                    oct.tag = block as i32;
                    (self.state.owners[block], oct)
                })
                .collect_vec();
            tagged.sort_by_key(|&(dest, _)| dest);

            let mut counts = vec![0i32; self.state.size];
            for &(dest, _) in &tagged {
                counts[dest] += 1;
            }
            let sendbuf = tagged.iter().map(|&(_, oct)| oct).collect_vec();
            let received = redistribute(&sendbuf, &counts, self.comm);

            pending = received
                .into_iter()
                .map(|oct| (oct.tag as usize, oct))
                .collect_vec();
        }

        self.state.finalize_balance(per_block);
        Ok(())
    }

    /// Build the node arrays and the mesh-wide numbering: dependent nodes
    /// are detected and parameterized, independent nodes receive global
    /// ids contiguous per owning rank.
    pub fn create_nodes(&mut self, order: usize) -> Result<(), ForestError> {
        nodes::create_nodes(self, order)
    }

    /// The element-to-node connectivity of the owned elements: `order^3`
    /// entries per element. Non-negative entries are global independent
    /// node ids, negative entries encode dependent node `d` as `-(d + 1)`.
    pub fn create_mesh_conn(&self) -> Result<(Vec<i32>, usize), ForestError> {
        self.state.mesh_conn()
    }

    /// The owned-node ranges: rank `r` owns ids in
    /// `[range[r], range[r + 1])`.
    pub fn get_owned_node_range(&self) -> Result<&[i32], ForestError> {
        if self.state.node_range.is_empty() {
            return Err(ForestError::MissingPrerequisite("create_nodes"));
        }
        Ok(&self.state.node_range)
    }

    /// The dependent-node table in compressed-row form: the parents of
    /// dependent node `d` are `dep_conn[dep_ptr[d]..dep_ptr[d + 1]]` with
    /// matching weights.
    pub fn get_dep_node_conn(&self) -> Result<(&[i32], &[i32], &[f64]), ForestError> {
        if self.state.node_range.is_empty() {
            return Err(ForestError::MissingPrerequisite("create_nodes"));
        }
        Ok((
            &self.state.dep_ptr,
            &self.state.dep_conn,
            &self.state.dep_weights,
        ))
    }

    /// Number of rank-local dependent nodes.
    pub fn num_dep_nodes(&self) -> usize {
        self.state.num_dep_nodes()
    }

    /// Derive a forest one level coarser, with the same topology and block
    /// ownership. The coarse forest has no nodes until `create_nodes`.
    pub fn coarsen(&self) -> Result<Forest<'c, C>, ForestError> {
        Ok(Forest {
            comm: self.comm,
            state: self.state.coarsened()?,
        })
    }

    /// Build the prolongation operator from `coarse` onto this (finer)
    /// forest, in compressed-row form over global independent node ids.
    /// Row `r` belongs to the owned fine node `range[rank] + r`.
    pub fn create_interpolation(
        &self,
        coarse: &Forest<'c, C>,
    ) -> Result<(Vec<i32>, Vec<i32>, Vec<f64>), ForestError> {
        self.state.interpolation_rows(&coarse.state)
    }

    /// Build the restriction operator onto `coarse` as the normalized
    /// 3x3x3 stencil transpose. Row `r` belongs to the owned coarse node
    /// `range[rank] + r`.
    pub fn create_restriction(
        &self,
        coarse: &Forest<'c, C>,
    ) -> Result<(Vec<i32>, Vec<i32>, Vec<f64>), ForestError> {
        self.state.restriction_rows(&coarse.state)
    }

    pub(crate) fn state(&self) -> &ForestState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut ForestState {
        &mut self.state
    }
}

impl ForestState {
    /// The connectivity readout backing [Forest::create_mesh_conn].
    pub(crate) fn mesh_conn(&self) -> Result<(Vec<i32>, usize), ForestError> {
        if self.node_range.is_empty() {
            return Err(ForestError::MissingPrerequisite("create_nodes"));
        }
        let order = self.order;

        let mut conn = Vec::new();
        let mut num_elements = 0;
        for &block in &self.owned {
            let tree = self.tree(block)?;
            let nodes = tree
                .nodes()
                .ok_or(ForestError::MissingPrerequisite("create_nodes"))?;
            for e in tree.elements().iter() {
                let step = if order == 2 { e.h() } else { e.h() / 2 };
                for kk in 0..order as i32 {
                    for jj in 0..order as i32 {
                        for ii in 0..order as i32 {
                            let p = Octant::new(
                                e.x + ii * step,
                                e.y + jj * step,
                                e.z + kk * step,
                                0,
                            );
                            let index = nodes
                                .contains(&p, true)
                                .ok_or(ForestError::InterfaceMismatch)?;
                            conn.push(nodes.get(index).tag);
                        }
                    }
                }
                num_elements += 1;
            }
        }
        Ok((conn, num_elements))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constants::{HMAX, MAX_LEVEL};
    use crate::fixtures;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// A single-rank forest state over the given macro mesh, with a
    /// uniform octree of the requested level on each block.
    fn serial_state(npts: usize, conn: &[i32], levels: &[i32]) -> ForestState {
        let mut state = ForestState::new(0, 1);
        state.set_connectivity(npts, conn, false).unwrap();
        for &block in &state.owned.clone() {
            state.octrees[block] = Some(Octree::uniform(levels[block]));
        }
        state
    }

    /// Collect every assigned global id and check the numbering is a
    /// permutation of `0..count`.
    fn assert_ids_are_permutation(state: &ForestState) {
        let count = state.node_range[1] as usize;
        let mut seen = vec![false; count];
        let topo = state.topo().unwrap();
        for &block in &state.owned {
            let nodes = state.tree(block).unwrap().nodes().unwrap();
            for p in nodes.iter() {
                if p.tag >= 0 && topo.canonical_position(block, p).0 == block {
                    assert!(!seen[p.tag as usize], "id {} assigned twice", p.tag);
                    seen[p.tag as usize] = true;
                }
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_box_uniform_node_count() {
        // The recorded golden for the box mesh at level 1, order 2: every
        // node is a block center, face center, edge midpoint or macro
        // vertex, giving 7 + 24 + 32 + 16 positions.
        let (npts, conn, _) = fixtures::box_mesh();
        let mut state = serial_state(npts, &conn, &[1; 7]);
        state.balance_serial(true).unwrap();
        state.create_nodes_serial(2).unwrap();

        assert_eq!(state.node_range, vec![0, 79]);
        assert_eq!(state.num_dep_nodes(), 0);
        assert_ids_are_permutation(&state);

        // Order 3 doubles the lattice: 27 per block interior, 9 per face,
        // 3 per edge.
        state.create_nodes_serial(3).unwrap();
        assert_eq!(state.node_range, vec![0, 7 * 27 + 24 * 9 + 32 * 3 + 16]);
        assert_eq!(state.num_dep_nodes(), 0);
    }

    #[test]
    fn test_box_mesh_conn_is_consistent() {
        let (npts, conn, _) = fixtures::box_mesh();
        let mut state = serial_state(npts, &conn, &[1; 7]);
        state.balance_serial(true).unwrap();
        state.create_nodes_serial(2).unwrap();

        let (mesh_conn, num_elements) = state.mesh_conn().unwrap();
        assert_eq!(num_elements, 7 * 8);
        assert_eq!(mesh_conn.len(), 8 * num_elements);
        assert!(mesh_conn.iter().all(|&id| id >= 0 && id < 79));
    }

    #[test]
    fn test_interface_balance_propagates() {
        // One block refined to level 3 against a level 1 neighbor: after
        // balancing, the neighbor carries level 2 elements on the shared
        // face (at x = 0 of block 1).
        let (npts, conn, _) = fixtures::two_block_mesh();
        let mut state = serial_state(npts, &conn, &[3, 1]);
        state.balance_serial(true).unwrap();

        let coarse_tree = state.tree(1).unwrap();
        let interface: Vec<_> = coarse_tree
            .elements()
            .iter()
            .filter(|e| e.x == 0)
            .collect();
        assert!(!interface.is_empty());
        assert!(interface.iter().all(|e| e.level == 2));

        // The refined side is untouched.
        assert_eq!(state.tree(0).unwrap().num_elements(), 8 * 8 * 8);
    }

    #[test]
    fn test_dependent_nodes_on_interface() {
        let (npts, conn, _) = fixtures::two_block_mesh();
        let mut state = serial_state(npts, &conn, &[3, 1]);
        state.balance_serial(true).unwrap();
        state.create_nodes_serial(2).unwrap();

        assert!(state.num_dep_nodes() > 0);
        assert_ids_are_permutation(&state);

        // Order-2 hanging nodes average a coarse edge (two halves) or a
        // coarse face (four quarters), and every row sums to one.
        for d in 0..state.num_dep_nodes() {
            let lo = state.dep_ptr[d] as usize;
            let hi = state.dep_ptr[d + 1] as usize;
            let row = &state.dep_weights[lo..hi];
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-12);
            match row.len() {
                2 => assert!(row.iter().all(|&w| (w - 0.5).abs() < 1e-12)),
                4 => assert!(row.iter().all(|&w| (w - 0.25).abs() < 1e-12)),
                n => panic!("unexpected dependent row length {}", n),
            }
            // Parents are independent global ids.
            assert!(state.dep_conn[lo..hi].iter().all(|&id| id >= 0));
        }

        // The dependent encoding appears in the element connectivity.
        let (mesh_conn, _) = state.mesh_conn().unwrap();
        assert!(mesh_conn.iter().any(|&id| id < 0));
        assert!(mesh_conn
            .iter()
            .all(|&id| id < state.node_range[1] && -id - 1 < state.num_dep_nodes() as i32));
    }

    #[test]
    fn test_quadratic_dependent_weights() {
        let (npts, conn, _) = fixtures::two_block_mesh();
        let mut state = serial_state(npts, &conn, &[2, 1]);
        state.balance_serial(true).unwrap();
        state.create_nodes_serial(3).unwrap();

        assert!(state.num_dep_nodes() > 0);
        for d in 0..state.num_dep_nodes() {
            let lo = state.dep_ptr[d] as usize;
            let hi = state.dep_ptr[d + 1] as usize;
            let sum: f64 = state.dep_weights[lo..hi].iter().sum();
            assert!((sum - 1.0).abs() < 1e-12);
        }
        // Edge-hanging quadratic nodes carry the 3/8, 3/4, -1/8 stencil.
        let has_quadratic_row = (0..state.num_dep_nodes()).any(|d| {
            let lo = state.dep_ptr[d] as usize;
            let hi = state.dep_ptr[d + 1] as usize;
            let mut row: Vec<f64> = state.dep_weights[lo..hi].to_vec();
            row.sort_by(|a, b| a.partial_cmp(b).unwrap());
            row.len() == 3
                && (row[0] + 0.125).abs() < 1e-12
                && (row[1] - 0.375).abs() < 1e-12
                && (row[2] - 0.75).abs() < 1e-12
        });
        assert!(has_quadratic_row);
    }

    #[test]
    fn test_interpolation_partition_of_unity() {
        // Applying the prolongation to the constant-one coarse vector must
        // reproduce the constant-one fine vector: every row sums to 1.
        let (npts, conn, _) = fixtures::two_block_mesh();
        let mut rng = ChaCha8Rng::seed_from_u64(23);

        let mut fine = ForestState::new(0, 1);
        fine.set_connectivity(npts, &conn, false).unwrap();
        for &block in &fine.owned.clone() {
            fine.octrees[block] = Some(Octree::random(40, 1, 4, &mut rng));
        }
        fine.balance_serial(true).unwrap();
        fine.create_nodes_serial(2).unwrap();

        let mut coarse = fine.coarsened().unwrap();
        coarse.balance_serial(false).unwrap();
        coarse.create_nodes_serial(2).unwrap();

        let (ptr, conn, weights) = fine.interpolation_rows(&coarse).unwrap();
        assert_eq!(ptr.len() as i32 - 1, fine.node_range[1]);
        for r in 0..ptr.len() - 1 {
            let row = &weights[ptr[r] as usize..ptr[r + 1] as usize];
            assert!(!row.is_empty());
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-12, "row {} sums to {}", r, sum);
        }
        // Columns are independent coarse ids.
        assert!(conn.iter().all(|&id| id >= 0 && id < coarse.node_range[1]));
    }

    #[test]
    fn test_restriction_rows_are_normalized() {
        let (npts, conn, _) = fixtures::two_block_mesh();
        let mut fine = serial_state(npts, &conn, &[3, 1]);
        fine.balance_serial(true).unwrap();
        fine.create_nodes_serial(2).unwrap();

        let mut coarse = fine.coarsened().unwrap();
        coarse.balance_serial(false).unwrap();
        coarse.create_nodes_serial(2).unwrap();

        let (ptr, conn, weights) = fine.restriction_rows(&coarse).unwrap();
        assert_eq!(ptr.len() as i32 - 1, coarse.node_range[1]);
        for r in 0..ptr.len() - 1 {
            let row = &weights[ptr[r] as usize..ptr[r + 1] as usize];
            assert!(!row.is_empty());
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-12);
        }
        assert!(conn.iter().all(|&id| id >= 0 && id < fine.node_range[1]));
    }

    #[test]
    fn test_balance_is_idempotent_across_blocks() {
        let (npts, conn, _) = fixtures::box_mesh();
        let mut rng = ChaCha8Rng::seed_from_u64(29);

        let mut state = ForestState::new(0, 1);
        state.set_connectivity(npts, &conn, false).unwrap();
        for &block in &state.owned.clone() {
            state.octrees[block] = Some(Octree::random(30, 0, 5, &mut rng));
        }
        state.balance_serial(true).unwrap();

        let snapshot: Vec<Vec<Octant>> = (0..7)
            .map(|b| state.tree(b).unwrap().elements().as_slice().to_vec())
            .collect();
        state.balance_serial(true).unwrap();
        for (b, old) in snapshot.iter().enumerate() {
            assert_eq!(state.tree(b).unwrap().elements().as_slice(), &old[..]);
        }
    }

    #[test]
    fn test_repartition_weights_conserve_elements() {
        // The pure chunking core of S6: ownership moves, the multiset of
        // per-block weights does not.
        let weights = vec![512, 8, 8, 8, 64, 8, 8];
        let before: usize = weights.iter().sum();
        for size in 1..5 {
            let owners = sfc_owners(&weights, size);
            let after: usize = (0..size)
                .map(|r| {
                    weights
                        .iter()
                        .zip(owners.iter())
                        .filter(|&(_, &o)| o == r)
                        .map(|(&w, _)| w)
                        .sum::<usize>()
                })
                .sum();
            assert_eq!(before, after);
        }
    }

    #[test]
    fn test_two_to_one_across_the_interface() {
        // Check the balance contract across the shared face itself: map
        // each fine boundary element into the neighbor frame and compare
        // levels with the enclosing neighbor element.
        let (npts, conn, _) = fixtures::two_block_mesh();
        let mut state = serial_state(npts, &conn, &[3, 1]);
        state.balance_serial(true).unwrap();

        let topo = state.topo().unwrap().clone();
        let src = topo.face_side(0, 1);
        let dst = topo.face_side(1, 0);
        let fine = state.tree(0).unwrap();
        let coarse = state.tree(1).unwrap();

        for e in fine.elements().iter() {
            if e.x + e.h() != HMAX {
                continue;
            }
            let mapped = crate::topology::transform_face_octant(src, dst, e, e.h());
            let probe = mapped.first_descendant(MAX_LEVEL);
            let index = coarse.find_enclosing(&probe).unwrap();
            let neighbor = coarse.elements().get(index);
            assert!((neighbor.level - e.level).abs() <= 1);
        }
    }

    #[test]
    fn test_sfc_owners_are_contiguous_and_conserving() {
        let weights = vec![8, 1, 1, 64, 8, 8, 1, 1];
        for size in 1..5 {
            let owners = sfc_owners(&weights, size);
            assert_eq!(owners.len(), weights.len());
            // Contiguous, monotone chunks.
            for pair in owners.windows(2) {
                assert!(pair[0] <= pair[1]);
            }
            assert!(owners.iter().all(|&r| r < size));
        }

        // The heavy block dominates: with two ranks it must split the rest
        // around it.
        let owners = sfc_owners(&weights, 2);
        assert_eq!(owners[3], 0);
        assert_eq!(owners[7], 1);
    }

    #[test]
    fn test_default_owner_distribution() {
        let conn: Vec<i32> = (0..8).collect();
        let mut state = ForestState::new(0, 1);
        state.set_connectivity(8, &conn, false).unwrap();
        assert_eq!(state.owned, vec![0]);
    }
}
