//! The topological complex of macro blocks.
//!
//! The forest couples one octree per hexahedral macro block. This module
//! derives the shared faces, edges and vertices of the blocks from the
//! element-to-node connectivity of the macro mesh, assigns canonical
//! orientations, and provides the coordinate transforms that carry octants
//! and node positions between the local frames of adjacent blocks.
//!
//! The corner numbering of a block is the tensor-product order: corner `k`
//! has offsets `(k & 1, (k >> 1) & 1, (k >> 2) & 1)` along x, y, z.

use std::collections::HashMap;

use crate::constants::{HMAX, NEDGES, NFACES, NVERTS};
use crate::error::ForestError;
use crate::octant::Octant;

/// Corner nodes of each local face, ordered by the in-face tensor
/// coordinates `(u, v)` with corner `c = u + 2 v`. Faces 0/1 are the x
/// faces (u along y, v along z), 2/3 the y faces (u along x, v along z),
/// 4/5 the z faces (u along x, v along y).
pub(crate) const FACE_CORNERS: [[usize; 4]; NFACES] = [
    [0, 2, 4, 6],
    [1, 3, 5, 7],
    [0, 1, 4, 5],
    [2, 3, 6, 7],
    [0, 1, 2, 3],
    [4, 5, 6, 7],
];

/// End nodes of each local edge. Edges 0..4 run along x, 4..8 along y,
/// 8..12 along z; the two low bits of the index within its group give the
/// sides of the two fixed axes in axis order.
pub(crate) const EDGE_NODES: [[usize; 2]; NEDGES] = [
    [0, 1],
    [2, 3],
    [4, 5],
    [6, 7],
    [0, 2],
    [1, 3],
    [4, 6],
    [5, 7],
    [0, 4],
    [1, 5],
    [2, 6],
    [3, 7],
];

/// One block incident to a shared face.
#[derive(Clone, Debug)]
pub struct FaceSide {
    /// The incident block.
    pub block: usize,
    /// The local face index within the block, in `0..6`.
    pub local_face: usize,
    /// The macro node ids of the face corners in the block's local
    /// in-face order.
    pub corners: [i32; 4],
}

/// A unique face of the macro complex.
#[derive(Clone, Debug)]
pub struct Face {
    /// The incident blocks; one for boundary faces, two for interior ones.
    pub sides: Vec<FaceSide>,
    /// Boundary tag in `[0, 8)` for boundary faces, -1 otherwise.
    pub face_id: i32,
}

/// One block incident to a shared edge.
#[derive(Clone, Debug)]
pub struct EdgeSide {
    /// The incident block.
    pub block: usize,
    /// The local edge index within the block, in `0..12`.
    pub local_edge: usize,
    /// The macro node ids of the edge ends in local axis order.
    pub nodes: [i32; 2],
}

/// A unique edge of the macro complex. Any number of blocks may wrap
/// around an edge.
#[derive(Clone, Debug)]
pub struct Edge {
    /// All incident (block, local edge) pairs.
    pub sides: Vec<EdgeSide>,
}

/// One block incident to a macro vertex.
#[derive(Clone, Debug)]
pub struct VertexSide {
    /// The incident block.
    pub block: usize,
    /// The local corner index within the block, in `0..8`.
    pub corner: usize,
}

/// A unique vertex of the macro complex.
#[derive(Clone, Debug)]
pub struct Vertex {
    /// The macro node id.
    pub node: i32,
    /// All incident (block, corner) pairs.
    pub sides: Vec<VertexSide>,
}

/// The boundary entity of a block that a position lies on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum EntityRef {
    Interior,
    Face(usize),
    Edge(usize),
    Vertex(usize),
}

/// The derived face/edge/vertex complex of the macro blocks.
#[derive(Clone, Debug)]
pub struct BlockTopology {
    num_nodes: usize,
    conn: Vec<i32>,
    faces: Vec<Face>,
    edges: Vec<Edge>,
    verts: Vec<Vertex>,
    block_faces: Vec<usize>,
    block_edges: Vec<usize>,
    block_verts: Vec<usize>,
}

impl BlockTopology {
    /// Derive the complex from the hex element-to-node connectivity.
    ///
    /// `conn` holds eight 0-based node ids per block in tensor-product
    /// order. Fails if a node id is out of range or more than two blocks
    /// share a face.
    pub fn from_connectivity(num_nodes: usize, conn: &[i32]) -> Result<Self, ForestError> {
        if conn.len() % NVERTS != 0 {
            return Err(ForestError::Topology(format!(
                "connectivity length {} is not a multiple of 8",
                conn.len()
            )));
        }
        let num_blocks = conn.len() / NVERTS;
        for &node in conn {
            if node < 0 || node as usize >= num_nodes {
                return Err(ForestError::Topology(format!(
                    "node id {} outside [0, {})",
                    node, num_nodes
                )));
            }
        }

        // Unique faces, keyed by the sorted corner ids. The orientation of
        // each incident block is kept separately on the side entry.
        let mut faces: Vec<Face> = Vec::new();
        let mut face_index: HashMap<[i32; 4], usize> = HashMap::new();
        let mut block_faces = vec![0usize; NFACES * num_blocks];

        for block in 0..num_blocks {
            let corners = &conn[NVERTS * block..NVERTS * (block + 1)];
            for (local_face, face_corners) in FACE_CORNERS.iter().enumerate() {
                let ids = [
                    corners[face_corners[0]],
                    corners[face_corners[1]],
                    corners[face_corners[2]],
                    corners[face_corners[3]],
                ];
                let mut key = ids;
                key.sort_unstable();

                let index = *face_index.entry(key).or_insert_with(|| {
                    faces.push(Face {
                        sides: Vec::new(),
                        face_id: -1,
                    });
                    faces.len() - 1
                });
                faces[index].sides.push(FaceSide {
                    block,
                    local_face,
                    corners: ids,
                });
                block_faces[NFACES * block + local_face] = index;
            }
        }

        for face in &faces {
            if face.sides.len() > 2 {
                return Err(ForestError::Topology(format!(
                    "{} blocks share the face with corners {:?}",
                    face.sides.len(),
                    face.sides[0].corners
                )));
            }
        }

        // Boundary faces receive a cyclic tag for boundary-condition
        // bookkeeping, in discovery order.
        let mut next_face_id = 0;
        for face in faces.iter_mut() {
            if face.sides.len() == 1 {
                face.face_id = next_face_id;
                next_face_id = (next_face_id + 1) % 8;
            }
        }

        // Unique edges, keyed by the sorted end node ids.
        let mut edges: Vec<Edge> = Vec::new();
        let mut edge_index: HashMap<[i32; 2], usize> = HashMap::new();
        let mut block_edges = vec![0usize; NEDGES * num_blocks];

        for block in 0..num_blocks {
            let corners = &conn[NVERTS * block..NVERTS * (block + 1)];
            for (local_edge, edge_nodes) in EDGE_NODES.iter().enumerate() {
                let ids = [corners[edge_nodes[0]], corners[edge_nodes[1]]];
                let mut key = ids;
                key.sort_unstable();

                let index = *edge_index.entry(key).or_insert_with(|| {
                    edges.push(Edge { sides: Vec::new() });
                    edges.len() - 1
                });
                edges[index].sides.push(EdgeSide {
                    block,
                    local_edge,
                    nodes: ids,
                });
                block_edges[NEDGES * block + local_edge] = index;
            }
        }

        // Unique vertices, keyed by the node id itself.
        let mut verts: Vec<Vertex> = Vec::new();
        let mut vert_index: HashMap<i32, usize> = HashMap::new();
        let mut block_verts = vec![0usize; NVERTS * num_blocks];

        for block in 0..num_blocks {
            let corners = &conn[NVERTS * block..NVERTS * (block + 1)];
            for (corner, &node) in corners.iter().enumerate() {
                let index = *vert_index.entry(node).or_insert_with(|| {
                    verts.push(Vertex {
                        node,
                        sides: Vec::new(),
                    });
                    verts.len() - 1
                });
                verts[index].sides.push(VertexSide { block, corner });
                block_verts[NVERTS * block + corner] = index;
            }
        }

        Ok(Self {
            num_nodes,
            conn: conn.to_vec(),
            faces,
            edges,
            verts,
            block_faces,
            block_edges,
            block_verts,
        })
    }

    /// Number of macro blocks.
    pub fn num_blocks(&self) -> usize {
        self.conn.len() / NVERTS
    }

    /// Number of unique faces.
    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    /// Number of unique edges.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Number of macro nodes.
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// The raw element-to-node connectivity.
    pub fn conn(&self) -> &[i32] {
        &self.conn
    }

    /// The unique face index of each of the six faces of each block.
    pub fn block_faces(&self) -> &[usize] {
        &self.block_faces
    }

    /// The boundary tag of each block-face slot, -1 for interior faces.
    pub fn block_face_ids(&self) -> Vec<i32> {
        self.block_faces
            .iter()
            .map(|&f| self.faces[f].face_id)
            .collect()
    }

    /// The face at a block-face slot.
    pub(crate) fn face_at(&self, block: usize, local_face: usize) -> &Face {
        &self.faces[self.block_faces[NFACES * block + local_face]]
    }

    /// The edge at a block-edge slot.
    pub(crate) fn edge_at(&self, block: usize, local_edge: usize) -> &Edge {
        &self.edges[self.block_edges[NEDGES * block + local_edge]]
    }

    /// The vertex at a block-corner slot.
    pub(crate) fn vertex_at(&self, block: usize, corner: usize) -> &Vertex {
        &self.verts[self.block_verts[NVERTS * block + corner]]
    }

    /// The side entry of `block`/`local_face` on its face.
    pub(crate) fn face_side(&self, block: usize, local_face: usize) -> &FaceSide {
        self.face_at(block, local_face)
            .sides
            .iter()
            .find(|s| s.block == block && s.local_face == local_face)
            .unwrap()
    }

    /// The side entry of `block`/`local_edge` on its edge.
    pub(crate) fn edge_side(&self, block: usize, local_edge: usize) -> &EdgeSide {
        self.edge_at(block, local_edge)
            .sides
            .iter()
            .find(|s| s.block == block && s.local_edge == local_edge)
            .unwrap()
    }

    /// Map a boundary position of `block` into the frame of the owning
    /// side of the entity it lies on. The owner of an entity is its side
    /// with the smallest (block, local index) pair; interior positions own
    /// themselves.
    pub(crate) fn canonical_position(&self, block: usize, p: &Octant) -> (usize, Octant) {
        match classify_position(p) {
            EntityRef::Interior => (block, *p),
            EntityRef::Face(lf) => {
                let face = self.face_at(block, lf);
                let owner = face
                    .sides
                    .iter()
                    .min_by_key(|s| (s.block, s.local_face))
                    .unwrap();
                let src = self.face_side(block, lf);
                if owner.block == src.block && owner.local_face == src.local_face {
                    (block, *p)
                } else {
                    (owner.block, transform_face_octant(src, owner, p, 0))
                }
            }
            EntityRef::Edge(le) => {
                let edge = self.edge_at(block, le);
                let owner = edge
                    .sides
                    .iter()
                    .min_by_key(|s| (s.block, s.local_edge))
                    .unwrap();
                let src = self.edge_side(block, le);
                if owner.block == src.block && owner.local_edge == src.local_edge {
                    (block, *p)
                } else {
                    (owner.block, transform_edge_octant(src, owner, p, 0))
                }
            }
            EntityRef::Vertex(corner) => {
                let vertex = self.vertex_at(block, corner);
                let owner = vertex
                    .sides
                    .iter()
                    .min_by_key(|s| (s.block, s.corner))
                    .unwrap();
                (owner.block, octant_at_corner(owner.corner, 0, p.level))
            }
        }
    }
}

/// Mapping of in-face coordinates between the frames of two sides of the
/// same face: one of the eight symmetries of the square.
#[derive(Copy, Clone, Debug)]
pub(crate) struct FaceMap {
    swap: bool,
    reverse_u: bool,
    reverse_v: bool,
}

impl FaceMap {
    /// Derive the transform taking `src` in-face coordinates to `dst`
    /// in-face coordinates by matching the shared corner ids.
    pub(crate) fn between(src: &FaceSide, dst: &FaceSide) -> Self {
        let pos = |id: i32| dst.corners.iter().position(|&c| c == id).unwrap();
        let j0 = pos(src.corners[0]);
        let j1 = pos(src.corners[1]);
        Self {
            // Walking along src u either walks dst u (bit 0 changes) or
            // dst v (bit 1 changes).
            swap: (j0 ^ j1) == 2,
            reverse_u: j0 & 1 == 1,
            reverse_v: j0 & 2 == 2,
        }
    }

    /// Map in-face coordinates. `extent` is the octant side length for
    /// cells and 0 for point positions.
    pub(crate) fn map(&self, u: i32, v: i32, extent: i32) -> (i32, i32) {
        let (a, b) = if self.swap { (v, u) } else { (u, v) };
        let up = if self.reverse_u { HMAX - extent - a } else { a };
        let vp = if self.reverse_v { HMAX - extent - b } else { b };
        (up, vp)
    }
}

/// The in-face coordinates of an octant relative to a local face.
pub(crate) fn face_coords(local_face: usize, o: &Octant) -> (i32, i32) {
    match local_face / 2 {
        0 => (o.y, o.z),
        1 => (o.x, o.z),
        _ => (o.x, o.y),
    }
}

/// Assemble an octant adjacent to (or on) a local face from in-face
/// coordinates and a normal coordinate.
pub(crate) fn octant_from_face(
    local_face: usize,
    u: i32,
    v: i32,
    normal: i32,
    level: i32,
) -> Octant {
    match local_face / 2 {
        0 => Octant::new(normal, u, v, level),
        1 => Octant::new(u, normal, v, level),
        _ => Octant::new(u, v, normal, level),
    }
}

/// Carry an octant touching the face of `src` into the frame of `dst`.
///
/// The octant lands adjacent to (extent > 0) or on (extent = 0) the
/// matching face of the destination block.
pub(crate) fn transform_face_octant(
    src: &FaceSide,
    dst: &FaceSide,
    o: &Octant,
    extent: i32,
) -> Octant {
    let (u, v) = face_coords(src.local_face, o);
    let (up, vp) = FaceMap::between(src, dst).map(u, v, extent);
    let normal = if dst.local_face % 2 == 0 {
        0
    } else {
        HMAX - extent
    };
    octant_from_face(dst.local_face, up, vp, normal, o.level)
}

/// The along-edge coordinate of an octant relative to a local edge.
pub(crate) fn edge_coord(local_edge: usize, o: &Octant) -> i32 {
    match local_edge / 4 {
        0 => o.x,
        1 => o.y,
        _ => o.z,
    }
}

/// Assemble an octant adjacent to (or on) a local edge from the along-edge
/// coordinate.
pub(crate) fn octant_from_edge(local_edge: usize, t: i32, extent: i32, level: i32) -> Octant {
    let group = local_edge % 4;
    let lo = if group & 1 != 0 { HMAX - extent } else { 0 };
    let hi = if group & 2 != 0 { HMAX - extent } else { 0 };
    match local_edge / 4 {
        0 => Octant::new(t, lo, hi, level),
        1 => Octant::new(lo, t, hi, level),
        _ => Octant::new(lo, hi, t, level),
    }
}

/// Carry an octant touching the edge of `src` into the frame of `dst`.
pub(crate) fn transform_edge_octant(
    src: &EdgeSide,
    dst: &EdgeSide,
    o: &Octant,
    extent: i32,
) -> Octant {
    let t = edge_coord(src.local_edge, o);
    // The side node lists follow the local axis direction, so the two
    // parameterizations agree iff the t = 0 ends name the same macro node.
    let src_forward = src.nodes[0] == dst.nodes[0];
    let tp = if src_forward { t } else { HMAX - extent - t };
    octant_from_edge(dst.local_edge, tp, extent, o.level)
}

/// The octant of side `extent` in the corner of a block.
pub(crate) fn octant_at_corner(corner: usize, extent: i32, level: i32) -> Octant {
    let c = |bit: usize| {
        if corner & bit != 0 {
            HMAX - extent
        } else {
            0
        }
    };
    Octant::new(c(1), c(2), c(4), level)
}

/// Which boundary entity of the block frame a position lies on.
pub(crate) fn classify_position(p: &Octant) -> EntityRef {
    let on = |c: i32| c == 0 || c == HMAX;
    let side = |c: i32| (c == HMAX) as usize;
    let bx = on(p.x);
    let by = on(p.y);
    let bz = on(p.z);

    match (bx, by, bz) {
        (false, false, false) => EntityRef::Interior,
        (true, false, false) => EntityRef::Face(side(p.x)),
        (false, true, false) => EntityRef::Face(2 + side(p.y)),
        (false, false, true) => EntityRef::Face(4 + side(p.z)),
        (false, true, true) => EntityRef::Edge(side(p.y) | side(p.z) << 1),
        (true, false, true) => EntityRef::Edge(4 + (side(p.x) | side(p.z) << 1)),
        (true, true, false) => EntityRef::Edge(8 + (side(p.x) | side(p.y) << 1)),
        (true, true, true) => EntityRef::Vertex(side(p.x) | side(p.y) << 1 | side(p.z) << 2),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_single_block_complex() {
        let conn: Vec<i32> = (0..8).collect();
        let topo = BlockTopology::from_connectivity(8, &conn).unwrap();
        assert_eq!(topo.num_blocks(), 1);
        assert_eq!(topo.num_faces(), 6);
        assert_eq!(topo.num_edges(), 12);
        assert_eq!(topo.num_nodes(), 8);
        // Every face is a boundary face and receives a tag.
        assert!(topo.block_face_ids().iter().all(|&id| id >= 0));
    }

    #[test]
    fn test_box_complex_counts() {
        let (npts, conn, _) = fixtures::box_mesh();
        let topo = BlockTopology::from_connectivity(npts, &conn).unwrap();
        assert_eq!(topo.num_blocks(), 7);
        assert_eq!(topo.num_faces(), 24);
        assert_eq!(topo.num_edges(), 32);
        assert_eq!(topo.num_nodes(), 16);

        // 6 interior faces around the center block, 6 between the shell
        // blocks and the center, 12 between shell blocks, 6 on the hull.
        let boundary = topo
            .block_face_ids()
            .iter()
            .filter(|&&id| id >= 0)
            .count();
        assert_eq!(boundary, 6);
    }

    #[test]
    fn test_nonmanifold_face_is_rejected() {
        // Three blocks stacked on the same four nodes.
        let conn: Vec<i32> = vec![
            0, 1, 2, 3, 4, 5, 6, 7, //
            4, 5, 6, 7, 8, 9, 10, 11, //
            4, 5, 6, 7, 12, 13, 14, 15,
        ];
        let result = BlockTopology::from_connectivity(16, &conn);
        assert!(matches!(result, Err(ForestError::Topology(_))));
    }

    #[test]
    fn test_face_transform_round_trip() {
        let (npts, conn, _) = fixtures::box_mesh();
        let topo = BlockTopology::from_connectivity(npts, &conn).unwrap();

        for face in &topo.faces {
            if face.sides.len() != 2 {
                continue;
            }
            let (a, b) = (&face.sides[0], &face.sides[1]);
            for &(u, v) in &[(0, 0), (HMAX, 0), (HMAX / 4, HMAX / 2), (HMAX, HMAX)] {
                let normal = if a.local_face % 2 == 0 { 0 } else { HMAX };
                let p = octant_from_face(a.local_face, u, v, normal, 0);
                let q = transform_face_octant(a, b, &p, 0);
                let back = transform_face_octant(b, a, &q, 0);
                assert_eq!(back, p);
            }
        }
    }

    #[test]
    fn test_face_transform_matches_corner_ids() {
        // Mapping a corner of the shared face must land on the position of
        // the same macro node in the destination frame.
        let (npts, conn, _) = fixtures::box_mesh();
        let topo = BlockTopology::from_connectivity(npts, &conn).unwrap();

        for face in &topo.faces {
            if face.sides.len() != 2 {
                continue;
            }
            let (a, b) = (&face.sides[0], &face.sides[1]);
            for c in 0..4 {
                let (u, v) = ((c & 1) as i32 * HMAX, (c >> 1) as i32 * HMAX);
                let normal = if a.local_face % 2 == 0 { 0 } else { HMAX };
                let p = octant_from_face(a.local_face, u, v, normal, 0);
                let q = transform_face_octant(a, b, &p, 0);

                // Recover the destination corner from the coordinates.
                let (qu, qv) = face_coords(b.local_face, &q);
                let dst_corner = (qu == HMAX) as usize + 2 * (qv == HMAX) as usize;
                assert_eq!(b.corners[dst_corner], a.corners[c]);
            }
        }
    }

    #[test]
    fn test_classify_position() {
        let h = HMAX / 2;
        assert_eq!(
            classify_position(&Octant::new(h, h, h, 1)),
            EntityRef::Interior
        );
        assert_eq!(
            classify_position(&Octant::new(0, h, h, 1)),
            EntityRef::Face(0)
        );
        assert_eq!(
            classify_position(&Octant::new(h, HMAX, h, 1)),
            EntityRef::Face(3)
        );
        assert_eq!(
            classify_position(&Octant::new(h, 0, HMAX, 1)),
            EntityRef::Edge(2)
        );
        assert_eq!(
            classify_position(&Octant::new(HMAX, HMAX, HMAX, 1)),
            EntityRef::Vertex(7)
        );
    }
}
