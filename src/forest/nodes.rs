//! Mesh-wide node numbering and dependent-node detection.
//!
//! After every owned tree has its node candidates, the forest classifies
//! each node position:
//!
//! - a node is *dependent* if some element incident to it does not carry
//!   the position on its own tensor lattice. That happens exactly at 2:1
//!   interfaces, where the coarse side misses the fine side's face and
//!   edge nodes. Dependent nodes are parameterized by the lattice nodes of
//!   the coarsest such host element, with tensor-product linear (order 2)
//!   or quadratic (order 3) shape-function weights.
//! - every other node is *independent*. The side with the smallest
//!   (block, local entity) pair owns each shared position and numbers it;
//!   all other holders look the id up, locally or through a query
//!   exchange.
//!
//! Incident elements across block interfaces are found in ghost layers:
//! for every shared face and edge, the neighbor's interface elements are
//! mirrored to the holder, kept in the neighbor's own frame so that probes
//! are transformed instead of elements.

use std::collections::HashMap;

use log::info;
use mpi::traits::{CommunicatorCollectives, Equivalence};

use crate::array::OctantArray;
use crate::constants::{HMAX, MAX_LEVEL, NEDGES, NFACES};
use crate::error::ForestError;
use crate::octant::Octant;
use crate::tools::{exclusive_prefix_sum, gather_to_all, global_all, redistribute,
    redistribute_with_counts};
use crate::topology::{
    classify_position, edge_coord, face_coords, octant_from_edge, octant_from_face,
    transform_edge_octant, transform_face_octant, EntityRef,
};

use super::{Forest, ForestState};

/// Interface element layers of adjacent blocks, kept in the adjacent
/// block's own frame.
#[derive(Default)]
pub(crate) struct Ghosts {
    /// (block, local face) -> the elements of the other side touching the
    /// shared face.
    faces: HashMap<(usize, usize), OctantArray>,
    /// (block, local edge) -> for each other side (by its index in the
    /// edge side list), its elements touching the shared edge.
    edges: HashMap<(usize, usize), Vec<(usize, OctantArray)>>,
}

/// Wire format of one mirrored interface element.
#[derive(Copy, Clone, Default, Equivalence)]
pub(crate) struct GhostElement {
    /// The receiving block.
    block: i32,
    /// Local face `0..6` or `6 +` local edge of the receiving block.
    entity: i32,
    /// Index of the sending side in the entity's side list.
    src_side: i32,
    /// The element in the sending block's frame.
    oct: Octant,
}

/// A dependent-node candidate: a node of an owned block together with its
/// parent positions (in the same block's frame) and weights.
pub(crate) struct DepCandidate {
    pub block: usize,
    pub node_index: usize,
    pub parents: Vec<(Octant, f64)>,
}

/// An unresolved id lookup at a remote owner.
pub(crate) struct PendingQuery {
    pub dest_rank: usize,
    pub owner_block: usize,
    pub pos: Octant,
    pub src_block: usize,
    pub src_index: usize,
}

/// True if `p` lies on the tensor node lattice of element `e`.
fn on_lattice(e: &Octant, p: &Octant, order: usize) -> bool {
    let step = if order == 2 { e.h() } else { e.h() / 2 };
    (p.x - e.x) % step == 0 && (p.y - e.y) % step == 0 && (p.z - e.z) % step == 0
}

/// The nonzero 1d shape-function values of the host lattice at offset `t`
/// from the element origin, as (node offset, weight) pairs.
fn axis_weights(order: usize, t: i32, h: i32) -> Vec<(i32, f64)> {
    let u = t as f64 / h as f64;
    let values: Vec<(i32, f64)> = if order == 2 {
        vec![(0, 1.0 - u), (h, u)]
    } else {
        vec![
            (0, 2.0 * (u - 0.5) * (u - 1.0)),
            (h / 2, -4.0 * u * (u - 1.0)),
            (h, 2.0 * u * (u - 0.5)),
        ]
    };
    values.into_iter().filter(|&(_, w)| w.abs() > 1e-14).collect()
}

/// The parents of `p` on the lattice of host element `e`, in the host's
/// frame. The weights are the tensor products of the per-axis values and
/// sum to one.
fn host_parents(e: &Octant, p: &Octant, order: usize) -> Vec<(Octant, f64)> {
    let h = e.h();
    let wx = axis_weights(order, p.x - e.x, h);
    let wy = axis_weights(order, p.y - e.y, h);
    let wz = axis_weights(order, p.z - e.z, h);

    let mut parents = Vec::with_capacity(wx.len() * wy.len() * wz.len());
    for &(oz, vz) in &wz {
        for &(oy, vy) in &wy {
            for &(ox, vx) in &wx {
                parents.push((Octant::new(e.x + ox, e.y + oy, e.z + oz, 0), vx * vy * vz));
            }
        }
    }
    parents
}

impl ForestState {
    /// The elements of `block` touching its local face.
    fn face_layer(&self, block: usize, local_face: usize) -> Result<Vec<Octant>, ForestError> {
        let tree = self.tree(block)?;
        let axis = local_face / 2;
        let high = local_face % 2 == 1;
        Ok(tree
            .elements()
            .iter()
            .filter(|e| {
                let c = match axis {
                    0 => e.x,
                    1 => e.y,
                    _ => e.z,
                };
                if high {
                    c + e.h() == HMAX
                } else {
                    c == 0
                }
            })
            .copied()
            .collect())
    }

    /// The elements of `block` touching its local edge.
    fn edge_layer(&self, block: usize, local_edge: usize) -> Result<Vec<Octant>, ForestError> {
        let tree = self.tree(block)?;
        let group = local_edge % 4;
        let fixed = |e: &Octant, c: i32, high: bool| {
            if high {
                c + e.h() == HMAX
            } else {
                c == 0
            }
        };
        Ok(tree
            .elements()
            .iter()
            .filter(|e| match local_edge / 4 {
                0 => fixed(e, e.y, group & 1 != 0) && fixed(e, e.z, group & 2 != 0),
                1 => fixed(e, e.x, group & 1 != 0) && fixed(e, e.z, group & 2 != 0),
                _ => fixed(e, e.x, group & 1 != 0) && fixed(e, e.y, group & 2 != 0),
            })
            .copied()
            .collect())
    }

    /// Mirror interface element layers between adjacent blocks. Layers for
    /// locally owned neighbors are installed directly; layers for remote
    /// neighbors are returned for the exchange.
    pub(crate) fn build_ghosts(
        &self,
    ) -> Result<(Ghosts, Vec<(usize, GhostElement)>), ForestError> {
        let topo = self.topo()?;
        let mut ghosts = Ghosts::default();
        let mut exports: Vec<(usize, GhostElement)> = Vec::new();

        for &block in &self.owned {
            for local_face in 0..NFACES {
                let face = topo.face_at(block, local_face);
                if face.sides.len() < 2 {
                    continue;
                }
                let layer = self.face_layer(block, local_face)?;
                for dst in &face.sides {
                    if dst.block == block && dst.local_face == local_face {
                        continue;
                    }
                    if self.owners[dst.block] == self.rank {
                        let mut array = OctantArray::from_vec(layer.clone());
                        array.sort();
                        ghosts.faces.insert((dst.block, dst.local_face), array);
                    } else {
                        let src_side = face
                            .sides
                            .iter()
                            .position(|s| s.block == block && s.local_face == local_face)
                            .unwrap();
                        for &oct in &layer {
                            exports.push((
                                self.owners[dst.block],
                                GhostElement {
                                    block: dst.block as i32,
                                    entity: dst.local_face as i32,
                                    src_side: src_side as i32,
                                    oct,
                                },
                            ));
                        }
                    }
                }
            }

            for local_edge in 0..NEDGES {
                let edge = topo.edge_at(block, local_edge);
                if edge.sides.len() < 2 {
                    continue;
                }
                let layer = self.edge_layer(block, local_edge)?;
                let src_side = edge
                    .sides
                    .iter()
                    .position(|s| s.block == block && s.local_edge == local_edge)
                    .unwrap();
                for dst in &edge.sides {
                    if dst.block == block && dst.local_edge == local_edge {
                        continue;
                    }
                    if self.owners[dst.block] == self.rank {
                        let mut array = OctantArray::from_vec(layer.clone());
                        array.sort();
                        ghosts
                            .edges
                            .entry((dst.block, dst.local_edge))
                            .or_default()
                            .push((src_side, array));
                    } else {
                        for &oct in &layer {
                            exports.push((
                                self.owners[dst.block],
                                GhostElement {
                                    block: dst.block as i32,
                                    entity: (NFACES + dst.local_edge) as i32,
                                    src_side: src_side as i32,
                                    oct,
                                },
                            ));
                        }
                    }
                }
            }
        }
        Ok((ghosts, exports))
    }

    /// Install ghost layers received from other ranks.
    pub(crate) fn apply_ghost_imports(&self, ghosts: &mut Ghosts, imports: &[GhostElement]) {
        let mut face_groups: HashMap<(usize, usize), Vec<Octant>> = HashMap::new();
        let mut edge_groups: HashMap<(usize, usize, usize), Vec<Octant>> = HashMap::new();

        for g in imports {
            let block = g.block as usize;
            if (g.entity as usize) < NFACES {
                face_groups
                    .entry((block, g.entity as usize))
                    .or_default()
                    .push(g.oct);
            } else {
                edge_groups
                    .entry((block, g.entity as usize - NFACES, g.src_side as usize))
                    .or_default()
                    .push(g.oct);
            }
        }

        for ((block, local_face), octs) in face_groups {
            let mut array = OctantArray::from_vec(octs);
            array.sort();
            ghosts.faces.insert((block, local_face), array);
        }
        for ((block, local_edge, src_side), octs) in edge_groups {
            let mut array = OctantArray::from_vec(octs);
            array.sort();
            ghosts
                .edges
                .entry((block, local_edge))
                .or_default()
                .push((src_side, array));
        }
    }

    /// Create the node arrays of every owned tree and stamp each node with
    /// the finest adjacent element level (plus one for order 3, whose
    /// lattice lives on the half step). The interpolation stencil reads
    /// this level.
    pub(crate) fn create_node_arrays(&mut self, order: usize) -> Result<(), ForestError> {
        self.order = order.clamp(2, 3);
        let order = self.order;

        for &block in &self.owned.clone() {
            let tree = self.octrees[block]
                .as_mut()
                .ok_or(ForestError::MissingPrerequisite("create_trees"))?;
            tree.create_nodes(order);

            for i in 0..tree.num_elements() {
                let e = *tree.elements().get(i);
                let level = e.level + if order == 3 { 1 } else { 0 };
                let step = if order == 2 { e.h() } else { e.h() / 2 };
                for kk in 0..order as i32 {
                    for jj in 0..order as i32 {
                        for ii in 0..order as i32 {
                            let p =
                                Octant::new(e.x + ii * step, e.y + jj * step, e.z + kk * step, 0);
                            let index = tree.nodes().unwrap().contains(&p, true).unwrap();
                            let node = tree.nodes_mut().unwrap().get_mut(index);
                            if node.level < level {
                                node.level = level;
                            }
                        }
                    }
                }
            }
        }
        self.clear_numbering();
        Ok(())
    }

    /// Find the dependent nodes of every owned block: probe all elements
    /// incident to each node position, within the block and across its
    /// interfaces, and keep the coarsest host whose lattice misses the
    /// position.
    pub(crate) fn detect_dependents(
        &self,
        ghosts: &Ghosts,
    ) -> Result<Vec<DepCandidate>, ForestError> {
        self.topo()?;
        let order = self.order;
        let mut candidates = Vec::new();

        for &block in &self.owned {
            let tree = self.tree(block)?;
            let nodes = tree
                .nodes()
                .ok_or(ForestError::MissingPrerequisite("create_nodes"))?;

            for (node_index, p) in nodes.iter().enumerate() {
                // The coarsest incident element missing `p` on its
                // lattice, with parents carried into this block's frame.
                let mut host: Option<(i32, Vec<(Octant, f64)>)> = None;

                // Elements of this block incident to `p`.
                for delta in 0..8 {
                    let probe = Octant {
                        x: p.x - (delta & 1),
                        y: p.y - ((delta >> 1) & 1),
                        z: p.z - ((delta >> 2) & 1),
                        level: MAX_LEVEL,
                        tag: 0,
                    };
                    if !probe.is_inside_domain() {
                        continue;
                    }
                    if let Some(ei) = tree.find_enclosing(&probe) {
                        let e = tree.elements().get(ei);
                        if !on_lattice(e, p, order)
                            && host.as_ref().map_or(true, |&(l, _)| e.level < l)
                        {
                            host = Some((e.level, host_parents(e, p, order)));
                        }
                    }
                }

                // Elements of adjacent blocks incident to `p`.
                match classify_position(p) {
                    EntityRef::Interior | EntityRef::Vertex(_) => {
                        // Block corners always sit on every incident
                        // lattice; interior nodes have no other side.
                    }
                    EntityRef::Face(local_face) => {
                        self.probe_face(block, local_face, p, ghosts, &mut host)?;
                    }
                    EntityRef::Edge(local_edge) => {
                        self.probe_edge(block, local_edge, p, ghosts, &mut host)?;
                    }
                }

                if let Some((_, parents)) = host {
                    debug_assert!(
                        (parents.iter().map(|&(_, w)| w).sum::<f64>() - 1.0).abs() < 1e-12
                    );
                    candidates.push(DepCandidate {
                        block,
                        node_index,
                        parents,
                    });
                }
            }
        }
        Ok(candidates)
    }

    /// Probe the elements behind the shared face under `p`.
    fn probe_face(
        &self,
        block: usize,
        local_face: usize,
        p: &Octant,
        ghosts: &Ghosts,
        host: &mut Option<(i32, Vec<(Octant, f64)>)>,
    ) -> Result<(), ForestError> {
        let topo = self.topo()?;
        let face = topo.face_at(block, local_face);
        if face.sides.len() < 2 {
            return Ok(());
        }
        let src = topo.face_side(block, local_face);
        let dst = face
            .sides
            .iter()
            .find(|s| !(s.block == block && s.local_face == local_face))
            .unwrap();
        let layer = ghosts
            .faces
            .get(&(block, local_face))
            .ok_or(ForestError::InterfaceMismatch)?;

        let pp = transform_face_octant(src, dst, p, 0);
        let (u, v) = face_coords(dst.local_face, &pp);
        let normal = if dst.local_face % 2 == 0 { 0 } else { HMAX - 1 };

        for du in 0..2 {
            for dv in 0..2 {
                let (uu, vv) = (u - du, v - dv);
                if uu < 0 || uu >= HMAX || vv < 0 || vv >= HMAX {
                    continue;
                }
                let probe = octant_from_face(dst.local_face, uu, vv, normal, MAX_LEVEL);
                if let Some(ei) = layer.find_enclosing(&probe) {
                    let e = layer.get(ei);
                    if !on_lattice(e, &pp, self.order)
                        && host.as_ref().map_or(true, |&(l, _)| e.level < l)
                    {
                        let parents = host_parents(e, &pp, self.order)
                            .into_iter()
                            .map(|(pos, w)| (transform_face_octant(dst, src, &pos, 0), w))
                            .collect();
                        *host = Some((e.level, parents));
                    }
                }
            }
        }
        Ok(())
    }

    /// Probe the elements of every block around the shared edge under `p`.
    fn probe_edge(
        &self,
        block: usize,
        local_edge: usize,
        p: &Octant,
        ghosts: &Ghosts,
        host: &mut Option<(i32, Vec<(Octant, f64)>)>,
    ) -> Result<(), ForestError> {
        let topo = self.topo()?;
        let edge = topo.edge_at(block, local_edge);
        if edge.sides.len() < 2 {
            return Ok(());
        }
        let src = topo.edge_side(block, local_edge);
        let Some(layers) = ghosts.edges.get(&(block, local_edge)) else {
            return Err(ForestError::InterfaceMismatch);
        };

        for &(side_index, ref layer) in layers {
            let dst = &edge.sides[side_index];
            let pp = transform_edge_octant(src, dst, p, 0);
            let t = edge_coord(dst.local_edge, &pp);

            for dt in 0..2 {
                let tt = t - dt;
                if tt < 0 || tt >= HMAX {
                    continue;
                }
                let probe = octant_from_edge(dst.local_edge, tt, 1, MAX_LEVEL);
                if let Some(ei) = layer.find_enclosing(&probe) {
                    let e = layer.get(ei);
                    if !on_lattice(e, &pp, self.order)
                        && host.as_ref().map_or(true, |&(l, _)| e.level < l)
                    {
                        let parents = host_parents(e, &pp, self.order)
                            .into_iter()
                            .map(|(pos, w)| (transform_edge_octant(dst, src, &pos, 0), w))
                            .collect();
                        *host = Some((e.level, parents));
                    }
                }
            }
        }
        Ok(())
    }

    /// Tag the dependent nodes with `-(d + 1)`. Candidates describing the
    /// same physical position (through their canonical frame) share one
    /// dependent index; the parent row of the first detection wins.
    pub(crate) fn assign_dep_indices(
        &mut self,
        candidates: Vec<DepCandidate>,
    ) -> Vec<Vec<(usize, Octant, f64)>> {
        let Self { topo, octrees, .. } = self;
        let topo = topo.as_ref().unwrap();

        let mut index: HashMap<(usize, (i32, i32, i32)), usize> = HashMap::new();
        let mut rows: Vec<Vec<(usize, Octant, f64)>> = Vec::new();

        for cand in candidates {
            let tree = octrees[cand.block].as_mut().unwrap();
            let p = *tree.nodes().unwrap().get(cand.node_index);
            let (owner_block, cp) = topo.canonical_position(cand.block, &p);
            let key = (owner_block, (cp.x, cp.y, cp.z));

            let d = *index.entry(key).or_insert_with(|| {
                rows.push(
                    cand.parents
                        .iter()
                        .map(|&(pos, w)| (cand.block, pos, w))
                        .collect(),
                );
                rows.len() - 1
            });
            tree.nodes_mut().unwrap().get_mut(cand.node_index).tag = -(d as i32 + 1);
        }
        rows
    }

    /// Count the independent nodes this rank numbers: canonical positions
    /// whose owning side is the holding block itself.
    pub(crate) fn count_owned_independent(&self) -> Result<usize, ForestError> {
        let topo = self.topo()?;
        let mut count = 0;
        for &block in &self.owned {
            let nodes = self.tree(block)?.nodes().unwrap();
            for p in nodes.iter() {
                if p.tag >= 0 && topo.canonical_position(block, p).0 == block {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// Assign global ids `offset..` to the canonical independent nodes, in
    /// block then Morton order.
    pub(crate) fn assign_owned_ids(&mut self, offset: i32) {
        let Self { topo, octrees, owned, .. } = self;
        let topo = topo.as_ref().unwrap();

        let mut next = offset;
        for &block in owned.iter() {
            let tree = octrees[block].as_mut().unwrap();
            let len = tree.nodes().unwrap().len();
            for i in 0..len {
                let p = *tree.nodes().unwrap().get(i);
                if p.tag >= 0 && topo.canonical_position(block, &p).0 == block {
                    tree.nodes_mut().unwrap().get_mut(i).tag = next;
                    next += 1;
                }
            }
        }
    }

    /// Resolve the ids of independent copies whose owner block lives on
    /// this rank, and collect queries for remote owners.
    pub(crate) fn resolve_local_copies(&mut self) -> Result<Vec<PendingQuery>, ForestError> {
        let topo = self.topo()?;
        let mut queries = Vec::new();
        let mut updates: Vec<(usize, usize, i32)> = Vec::new();

        for &block in &self.owned {
            let nodes = self.tree(block)?.nodes().unwrap();
            for (i, p) in nodes.iter().enumerate() {
                if p.tag < 0 {
                    continue;
                }
                let (owner_block, cp) = topo.canonical_position(block, p);
                if owner_block == block {
                    continue;
                }
                if self.owners[owner_block] == self.rank {
                    let owner_nodes = self.tree(owner_block)?.nodes().unwrap();
                    let oi = owner_nodes
                        .contains(&cp, true)
                        .ok_or(ForestError::InterfaceMismatch)?;
                    let tag = owner_nodes.get(oi).tag;
                    if tag < 0 {
                        return Err(ForestError::InterfaceMismatch);
                    }
                    updates.push((block, i, tag));
                } else {
                    queries.push(PendingQuery {
                        dest_rank: self.owners[owner_block],
                        owner_block,
                        pos: cp,
                        src_block: block,
                        src_index: i,
                    });
                }
            }
        }

        for (block, i, tag) in updates {
            self.octrees[block]
                .as_mut()
                .unwrap()
                .nodes_mut()
                .unwrap()
                .get_mut(i)
                .tag = tag;
        }
        Ok(queries)
    }

    /// Answer an id query for a position owned by one of this rank's
    /// blocks.
    pub(crate) fn answer_query(&self, owner_block: usize, pos: &Octant) -> Result<i32, ForestError> {
        let nodes = self.tree(owner_block)?.nodes().unwrap();
        let index = nodes
            .contains(pos, true)
            .ok_or(ForestError::InterfaceMismatch)?;
        let tag = nodes.get(index).tag;
        if tag < 0 {
            return Err(ForestError::InterfaceMismatch);
        }
        Ok(tag)
    }

    /// Translate the dependent parent positions into global ids, expanding
    /// parents that are themselves dependent, and build the compressed-row
    /// dependent table.
    pub(crate) fn build_dep_table(
        &mut self,
        rows: Vec<Vec<(usize, Octant, f64)>>,
    ) -> Result<(), ForestError> {
        // Raw rows may reference other dependent nodes by their negative
        // encoding; those are expanded below.
        let mut raw: Vec<Vec<(i32, f64)>> = Vec::with_capacity(rows.len());
        for row in rows {
            let mut tagged = Vec::with_capacity(row.len());
            for (block, pos, w) in row {
                let nodes = self.tree(block)?.nodes().unwrap();
                let index = nodes
                    .contains(&pos, true)
                    .ok_or(ForestError::InterfaceMismatch)?;
                tagged.push((nodes.get(index).tag, w));
            }
            raw.push(tagged);
        }

        fn expand(raw: &[Vec<(i32, f64)>], d: usize, scale: f64, out: &mut Vec<(i32, f64)>, depth: usize) {
            debug_assert!(depth < 32, "dependent-node chain too deep");
            for &(tag, w) in &raw[d] {
                if tag >= 0 {
                    out.push((tag, scale * w));
                } else {
                    expand(raw, (-tag - 1) as usize, scale * w, out, depth + 1);
                }
            }
        }

        self.dep_ptr = vec![0i32];
        self.dep_conn.clear();
        self.dep_weights.clear();
        for d in 0..raw.len() {
            let mut row = Vec::new();
            expand(&raw, d, 1.0, &mut row, 0);
            row.sort_by_key(|&(id, _)| id);

            let mut coalesced: Vec<(i32, f64)> = Vec::with_capacity(row.len());
            for (id, w) in row {
                match coalesced.last_mut() {
                    Some(last) if last.0 == id => last.1 += w,
                    _ => coalesced.push((id, w)),
                }
            }

            for (id, w) in coalesced {
                self.dep_conn.push(id);
                self.dep_weights.push(w);
            }
            self.dep_ptr.push(self.dep_conn.len() as i32);
        }
        Ok(())
    }

    /// Record the per-tree dependent counts.
    pub(crate) fn stamp_dep_counts(&mut self) {
        for &block in &self.owned.clone() {
            let tree = self.octrees[block].as_mut().unwrap();
            let count = tree
                .nodes()
                .map_or(0, |n| n.iter().filter(|p| p.tag < 0).count());
            tree.set_num_dep_nodes(count);
        }
    }

    /// The complete numbering pipeline on a single rank.
    pub(crate) fn create_nodes_serial(&mut self, order: usize) -> Result<(), ForestError> {
        debug_assert_eq!(self.size, 1);
        let (ghosts, exports) = self.build_ghosts()?;
        debug_assert!(exports.is_empty());

        self.create_node_arrays(order)?;
        let candidates = self.detect_dependents(&ghosts)?;
        let rows = self.assign_dep_indices(candidates);
        let count = self.count_owned_independent()?;
        self.assign_owned_ids(0);
        let queries = self.resolve_local_copies()?;
        debug_assert!(queries.is_empty());

        self.node_range = vec![0, count as i32];
        self.build_dep_table(rows)?;
        self.stamp_dep_counts();
        Ok(())
    }
}

/// Synchronize a fallible phase across ranks so that all ranks agree on
/// success before entering the next collective.
fn sync_status<C: CommunicatorCollectives>(
    result: Result<(), ForestError>,
    comm: &C,
) -> Result<(), ForestError> {
    let ok = result.is_ok();
    if global_all(ok, comm) {
        Ok(())
    } else {
        result.and(Err(ForestError::InterfaceMismatch))
    }
}

/// The distributed numbering pipeline behind [Forest::create_nodes].
pub(super) fn create_nodes<C: CommunicatorCollectives>(
    forest: &mut Forest<'_, C>,
    order: usize,
) -> Result<(), ForestError> {
    if forest.state().size == 1 {
        return forest.state_mut().create_nodes_serial(order);
    }
    let comm = forest.comm;

    // Mirror the interface layers of remote neighbors.
    let (mut ghosts, mut exports) = forest.state().build_ghosts()?;
    exports.sort_by_key(|&(dest, _)| dest);
    let mut counts = vec![0i32; forest.state().size];
    for &(dest, _) in &exports {
        counts[dest] += 1;
    }
    let sendbuf: Vec<GhostElement> = exports.iter().map(|&(_, g)| g).collect();
    let imports = redistribute(&sendbuf, &counts, comm);
    forest.state().apply_ghost_imports(&mut ghosts, &imports);

    // Local node creation, dependent detection and canonical numbering.
    forest.state_mut().create_node_arrays(order)?;
    let rows = match forest.state().detect_dependents(&ghosts) {
        Ok(candidates) => {
            sync_status(Ok(()), comm)?;
            forest.state_mut().assign_dep_indices(candidates)
        }
        Err(err) => {
            sync_status(Err(err), comm)?;
            unreachable!()
        }
    };

    let count = forest.state().count_owned_independent()?;
    let offset = exclusive_prefix_sum(count, comm);
    forest.state_mut().assign_owned_ids(offset as i32);

    let counts_per_rank = gather_to_all(&[count as i32], comm);
    let mut range = Vec::with_capacity(counts_per_rank.len() + 1);
    range.push(0);
    for c in counts_per_rank {
        range.push(range.last().unwrap() + c);
    }

    // Resolve copies: local lookups first, then a query/reply exchange
    // with the remote owners.
    let queries = match forest.state_mut().resolve_local_copies() {
        Ok(queries) => {
            sync_status(Ok(()), comm)?;
            queries
        }
        Err(err) => {
            sync_status(Err(err), comm)?;
            unreachable!()
        }
    };

    let mut sorted = queries;
    sorted.sort_by_key(|q| q.dest_rank);
    let mut counts = vec![0i32; forest.state().size];
    for q in &sorted {
        counts[q.dest_rank] += 1;
    }
    let sendbuf: Vec<Octant> = sorted
        .iter()
        .map(|q| {
            let mut oct = q.pos;
            oct.tag = q.owner_block as i32;
            oct
        })
        .collect();
    let (received, recv_counts) = redistribute_with_counts(&sendbuf, &counts, comm);

    let mut answers = Vec::with_capacity(received.len());
    let mut answer_status = Ok(());
    for q in &received {
        match forest.state().answer_query(q.tag as usize, q) {
            Ok(tag) => answers.push(tag),
            Err(err) => {
                answer_status = Err(err);
                answers.push(0);
            }
        }
    }
    sync_status(answer_status, comm)?;

    let replies = redistribute(&answers, &recv_counts, comm);
    // Replies arrive grouped by owner rank in rank order, matching the
    // order the queries were sent in.
    let state = forest.state_mut();
    for (q, &tag) in sorted.iter().zip(replies.iter()) {
        state.octrees[q.src_block]
            .as_mut()
            .unwrap()
            .nodes_mut()
            .unwrap()
            .get_mut(q.src_index)
            .tag = tag;
    }

    state.node_range = range;
    let table = state.build_dep_table(rows);
    sync_status(table, comm)?;
    state.stamp_dep_counts();

    info!(
        "create_nodes: {} owned nodes, {} dependent nodes on rank {}",
        count,
        forest.state().num_dep_nodes(),
        forest.state().rank
    );
    Ok(())
}
