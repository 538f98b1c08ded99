//! Geometry of the macro blocks.
//!
//! The engine itself is purely combinatorial; physical coordinates enter
//! only when a caller maps node octants through the trilinear shape of
//! their macro block, or when the input mesh is checked for inverted
//! blocks. Both live here.

use mpi::traits::Equivalence;

use crate::constants::{HMAX, NVERTS};
use crate::octant::Octant;

/// A point in physical space.
#[derive(Clone, Copy, Debug, Default, Equivalence)]
pub struct Point {
    /// Cartesian coordinates.
    pub coords: [f64; 3],
}

impl Point {
    /// Create a new point.
    pub fn new(coords: [f64; 3]) -> Self {
        Self { coords }
    }
}

/// The trilinear shape functions on the unit cube at `(u, v, w)`, in
/// tensor-product corner order.
fn shape_functions(u: f64, v: f64, w: f64) -> [f64; NVERTS] {
    let mut values = [0.0; NVERTS];
    for (k, value) in values.iter_mut().enumerate() {
        let a = if k & 1 != 0 { u } else { 1.0 - u };
        let b = if k & 2 != 0 { v } else { 1.0 - v };
        let c = if k & 4 != 0 { w } else { 1.0 - w };
        *value = a * b * c;
    }
    values
}

/// Map a node octant of `block` to physical coordinates through the
/// trilinear interpolation of the block's corner locations.
///
/// `conn` is the macro element-to-node connectivity and `xpts` the flat
/// coordinate array of the macro nodes.
pub fn block_location(conn: &[i32], xpts: &[f64], block: usize, oct: &Octant) -> Point {
    let points: &[[f64; 3]] = bytemuck::cast_slice(xpts);
    let corners = &conn[NVERTS * block..NVERTS * (block + 1)];

    let hmax = HMAX as f64;
    let n = shape_functions(
        oct.x as f64 / hmax,
        oct.y as f64 / hmax,
        oct.z as f64 / hmax,
    );

    let mut coords = [0.0; 3];
    for (k, &node) in corners.iter().enumerate() {
        let p = points[node as usize];
        coords[0] += n[k] * p[0];
        coords[1] += n[k] * p[1];
        coords[2] += n[k] * p[2];
    }
    Point::new(coords)
}

/// The volume of a macro block by 2x2x2 Gauss quadrature of the trilinear
/// Jacobian determinant. Negative values indicate an inverted block.
pub fn block_volume(conn: &[i32], xpts: &[f64], block: usize) -> f64 {
    let points: &[[f64; 3]] = bytemuck::cast_slice(xpts);
    let corners = &conn[NVERTS * block..NVERTS * (block + 1)];

    let gauss = 1.0 / 3f64.sqrt();
    let mut volume = 0.0;

    for kk in 0..2 {
        for jj in 0..2 {
            for ii in 0..2 {
                let u = 0.5 + (ii as f64 - 0.5) * gauss;
                let v = 0.5 + (jj as f64 - 0.5) * gauss;
                let w = 0.5 + (kk as f64 - 0.5) * gauss;

                // Derivatives of the trilinear shape functions.
                let mut xd = [0.0f64; 9];
                for (k, &node) in corners.iter().enumerate() {
                    let a = if k & 1 != 0 { u } else { 1.0 - u };
                    let b = if k & 2 != 0 { v } else { 1.0 - v };
                    let c = if k & 4 != 0 { w } else { 1.0 - w };
                    let da = if k & 1 != 0 { 1.0 } else { -1.0 };
                    let db = if k & 2 != 0 { 1.0 } else { -1.0 };
                    let dc = if k & 4 != 0 { 1.0 } else { -1.0 };

                    let p = points[node as usize];
                    for axis in 0..3 {
                        xd[3 * axis] += p[axis] * da * b * c;
                        xd[3 * axis + 1] += p[axis] * a * db * c;
                        xd[3 * axis + 2] += p[axis] * a * b * dc;
                    }
                }

                volume += 0.125
                    * (xd[0] * (xd[4] * xd[8] - xd[5] * xd[7])
                        - xd[1] * (xd[3] * xd[8] - xd[5] * xd[6])
                        + xd[2] * (xd[3] * xd[7] - xd[4] * xd[6]));
            }
        }
    }

    volume
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constants::MAX_LEVEL;
    use crate::fixtures;

    #[test]
    fn test_unit_cube_volume_and_corners() {
        let (_, conn, xpts) = fixtures::two_block_mesh();
        assert!((block_volume(&conn, &xpts, 0) - 1.0).abs() < 1e-12);
        assert!((block_volume(&conn, &xpts, 1) - 1.0).abs() < 1e-12);

        // Block corners map to the macro node coordinates.
        for corner in 0..NVERTS {
            let oct = Octant::new(
                if corner & 1 != 0 { HMAX } else { 0 },
                if corner & 2 != 0 { HMAX } else { 0 },
                if corner & 4 != 0 { HMAX } else { 0 },
                MAX_LEVEL,
            );
            let p = block_location(&conn, &xpts, 1, &oct);
            let node = conn[NVERTS + corner] as usize;
            for axis in 0..3 {
                assert!((p.coords[axis] - xpts[3 * node + axis]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_box_blocks_have_positive_volume() {
        let (_, conn, xpts) = fixtures::box_mesh();
        for block in 0..7 {
            assert!(block_volume(&conn, &xpts, block) > 0.0);
        }
    }
}
