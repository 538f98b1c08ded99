//! Inter-forest transfer operators.
//!
//! The prolongation maps a coarse forest (built by [super::Forest::coarsen])
//! onto the fine forest it came from. Fine nodes that exist in the coarse
//! lattice copy their coarse value; the rest sit at an edge midpoint, face
//! center or cell center of the coarse mesh and average the surrounding
//! coarse corners. Coarse parents that are themselves dependent are
//! expanded through the coarse dependent table, so the emitted rows only
//! reference independent ids.

use crate::constants::{HMAX, MAX_LEVEL};
use crate::error::ForestError;
use crate::octant::Octant;

use super::ForestState;

/// Append `(id, w)` to the row, expanding a dependent encoding through the
/// given dependent table.
fn push_expanded(
    row: &mut Vec<(i32, f64)>,
    tag: i32,
    w: f64,
    dep_ptr: &[i32],
    dep_conn: &[i32],
    dep_weights: &[f64],
) {
    if tag >= 0 {
        row.push((tag, w));
        return;
    }
    let d = (-tag - 1) as usize;
    for j in dep_ptr[d] as usize..dep_ptr[d + 1] as usize {
        row.push((dep_conn[j], w * dep_weights[j]));
    }
}

/// Sort a row by column id and sum duplicate entries.
fn coalesce(mut row: Vec<(i32, f64)>) -> Vec<(i32, f64)> {
    row.sort_by_key(|&(id, _)| id);
    let mut out: Vec<(i32, f64)> = Vec::with_capacity(row.len());
    for (id, w) in row {
        match out.last_mut() {
            Some(last) if last.0 == id => last.1 += w,
            _ => out.push((id, w)),
        }
    }
    out
}

impl ForestState {
    /// The prolongation rows of the owned fine nodes, in owned-id order.
    pub(crate) fn interpolation_rows(
        &self,
        coarse: &ForestState,
    ) -> Result<(Vec<i32>, Vec<i32>, Vec<f64>), ForestError> {
        if self.node_range.is_empty() || coarse.node_range.is_empty() {
            return Err(ForestError::MissingPrerequisite("create_nodes"));
        }
        let topo = self.topo()?;

        let mut ptr = vec![0i32];
        let mut conn = Vec::new();
        let mut weights = Vec::new();

        for &block in &self.owned {
            let fine_nodes = self
                .tree(block)?
                .nodes()
                .ok_or(ForestError::MissingPrerequisite("create_nodes"))?;
            let coarse_nodes = coarse
                .tree(block)?
                .nodes()
                .ok_or(ForestError::MissingPrerequisite("create_nodes"))?;

            for p in fine_nodes.iter() {
                if p.tag < 0 || topo.canonical_position(block, p).0 != block {
                    continue;
                }

                let mut row: Vec<(i32, f64)> = Vec::new();
                let add = |row: &mut Vec<(i32, f64)>, tag: i32, w: f64| {
                    push_expanded(
                        row,
                        tag,
                        w,
                        &coarse.dep_ptr,
                        &coarse.dep_conn,
                        &coarse.dep_weights,
                    );
                };

                if let Some(ci) = coarse_nodes.contains(p, true) {
                    add(&mut row, coarse_nodes.get(ci).tag, 1.0);
                } else {
                    // The node sits strictly inside a coarse cell; its
                    // child id relative to the stamped fine level selects
                    // the stencil.
                    let id = p.child_id();
                    let h = p.h();
                    let base = p.sibling(0);
                    debug_assert!(id != 0);

                    let lookup = |row: &mut Vec<(i32, f64)>,
                                  n: &Octant,
                                  w: f64|
                     -> Result<(), ForestError> {
                        let index = coarse_nodes
                            .contains(n, true)
                            .ok_or(ForestError::InterfaceMismatch)?;
                        add(row, coarse_nodes.get(index).tag, w);
                        Ok(())
                    };

                    match id {
                        1 | 2 | 4 => {
                            // Midpoint of a coarse edge.
                            lookup(&mut row, &base, 0.5)?;
                            let mut n = base;
                            match id {
                                1 => n.x += 2 * h,
                                2 => n.y += 2 * h,
                                _ => n.z += 2 * h,
                            }
                            lookup(&mut row, &n, 0.5)?;
                        }
                        3 | 5 | 6 => {
                            // Center of a coarse face.
                            let (ie, je) = match id {
                                3 => ([1, 0, 0], [0, 1, 0]),
                                5 => ([1, 0, 0], [0, 0, 1]),
                                _ => ([0, 1, 0], [0, 0, 1]),
                            };
                            for jj in 0..2 {
                                for ii in 0..2 {
                                    let n = Octant::new(
                                        base.x + 2 * h * (ii * ie[0] + jj * je[0]),
                                        base.y + 2 * h * (ii * ie[1] + jj * je[1]),
                                        base.z + 2 * h * (ii * ie[2] + jj * je[2]),
                                        base.level,
                                    );
                                    lookup(&mut row, &n, 0.25)?;
                                }
                            }
                        }
                        _ => {
                            // Center of a coarse cell.
                            for kk in 0..2 {
                                for jj in 0..2 {
                                    for ii in 0..2 {
                                        let n = Octant::new(
                                            base.x + 2 * h * ii,
                                            base.y + 2 * h * jj,
                                            base.z + 2 * h * kk,
                                            base.level,
                                        );
                                        lookup(&mut row, &n, 0.125)?;
                                    }
                                }
                            }
                        }
                    }
                }

                for (id, w) in coalesce(row) {
                    conn.push(id);
                    weights.push(w);
                }
                ptr.push(conn.len() as i32);
            }
        }
        Ok((ptr, conn, weights))
    }

    /// The restriction rows of the owned coarse nodes: the normalized
    /// 3x3x3 full-weighting stencil over the fine nodes.
    pub(crate) fn restriction_rows(
        &self,
        coarse: &ForestState,
    ) -> Result<(Vec<i32>, Vec<i32>, Vec<f64>), ForestError> {
        if self.node_range.is_empty() || coarse.node_range.is_empty() {
            return Err(ForestError::MissingPrerequisite("create_nodes"));
        }
        let topo = self.topo()?;
        const WVALS: [f64; 3] = [0.5, 1.0, 0.5];

        let mut ptr = vec![0i32];
        let mut conn = Vec::new();
        let mut weights = Vec::new();

        for &block in &self.owned {
            let fine_nodes = self
                .tree(block)?
                .nodes()
                .ok_or(ForestError::MissingPrerequisite("create_nodes"))?;
            let coarse_nodes = coarse
                .tree(block)?
                .nodes()
                .ok_or(ForestError::MissingPrerequisite("create_nodes"))?;

            for c in coarse_nodes.iter() {
                if c.tag < 0 || topo.canonical_position(block, c).0 != block {
                    continue;
                }

                // The coarse position always exists on the finer lattice;
                // its stamped level sets the stencil spacing.
                let fi = fine_nodes
                    .contains(c, true)
                    .ok_or(ForestError::InterfaceMismatch)?;
                let h = 1 << (MAX_LEVEL - fine_nodes.get(fi).level);

                let mut row: Vec<(i32, f64)> = Vec::new();
                let mut wsum = 0.0;

                for kk in 0..3i32 {
                    for jj in 0..3i32 {
                        for ii in 0..3i32 {
                            let n = Octant::new(
                                c.x + h * (ii - 1),
                                c.y + h * (jj - 1),
                                c.z + h * (kk - 1),
                                0,
                            );
                            if n.x < 0
                                || n.x > HMAX
                                || n.y < 0
                                || n.y > HMAX
                                || n.z < 0
                                || n.z > HMAX
                            {
                                continue;
                            }
                            if let Some(ti) = fine_nodes.contains(&n, true) {
                                let wk = WVALS[ii as usize] * WVALS[jj as usize]
                                    * WVALS[kk as usize];
                                wsum += wk;
                                push_expanded(
                                    &mut row,
                                    fine_nodes.get(ti).tag,
                                    wk,
                                    &self.dep_ptr,
                                    &self.dep_conn,
                                    &self.dep_weights,
                                );
                            }
                        }
                    }
                }

                for (id, w) in coalesce(row) {
                    conn.push(id);
                    weights.push(w / wsum);
                }
                ptr.push(conn.len() as i32);
            }
        }
        Ok((ptr, conn, weights))
    }
}
