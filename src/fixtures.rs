//! Reference macro meshes used by the demo drivers and the test suite.
//!
//! Each fixture returns `(num_nodes, element-to-node connectivity, node
//! coordinates)`. The connectivity lists eight 0-based node ids per hex
//! block in tensor-product corner order.

/// A cube-in-cube mesh: a center block surrounded by six frustum-shaped
/// shell blocks, 16 nodes in total.
pub fn box_mesh() -> (usize, Vec<i32>, Vec<f64>) {
    let xpts = vec![
        -0.5, -0.5, -0.5, //
        0.5, -0.5, -0.5, //
        -0.5, 0.5, -0.5, //
        0.5, 0.5, -0.5, //
        -0.5, -0.5, 0.5, //
        0.5, -0.5, 0.5, //
        -0.5, 0.5, 0.5, //
        0.5, 0.5, 0.5, //
        -1.0, -1.0, -1.0, //
        -1.0, -1.0, 1.0, //
        1.0, -1.0, -1.0, //
        1.0, -1.0, 1.0, //
        -1.0, 1.0, -1.0, //
        -1.0, 1.0, 1.0, //
        1.0, 1.0, -1.0, //
        1.0, 1.0, 1.0,
    ];

    let conn = vec![
        0, 1, 2, 3, 4, 5, 6, 7, //
        8, 10, 0, 1, 9, 11, 4, 5, //
        5, 11, 1, 10, 7, 15, 3, 14, //
        7, 15, 3, 14, 6, 13, 2, 12, //
        9, 13, 4, 6, 8, 12, 0, 2, //
        10, 14, 8, 12, 1, 3, 0, 2, //
        4, 5, 6, 7, 9, 11, 13, 15,
    ];

    (16, conn, xpts)
}

/// A flat connector bracket meshed with 15 blocks and 52 nodes.
pub fn connector_mesh() -> (usize, Vec<i32>, Vec<f64>) {
    let xpts = vec![
        -0.375, -0.375, -0.125, //
        0.375, -0.375, -0.125, //
        -0.125, -0.125, -0.125, //
        0.125, -0.125, -0.125, //
        -0.125, 0.125, -0.125, //
        0.125, 0.125, -0.125, //
        -0.075, 0.25, -0.125, //
        0.075, 0.25, -0.125, //
        -0.375, 0.375, -0.125, //
        0.375, 0.375, -0.125, //
        -0.25, 0.475, -0.125, //
        0.25, 0.475, -0.125, //
        -0.25, 1.475, -0.125, //
        0.25, 1.475, -0.125, //
        -0.45, 1.675, -0.125, //
        0.45, 1.675, -0.125, //
        -0.3125, 1.875, -0.125, //
        0.3125, 1.875, -0.125, //
        -0.175, 1.825, -0.125, //
        0.175, 1.825, -0.125, //
        -0.45, 2.425, -0.125, //
        0.45, 2.425, -0.125, //
        -0.3125, 2.425, -0.125, //
        0.3125, 2.425, -0.125, //
        -0.175, 2.425, -0.125, //
        0.175, 2.425, -0.125, //
        -0.375, -0.375, 0.125, //
        0.375, -0.375, 0.125, //
        -0.125, -0.125, 0.125, //
        0.125, -0.125, 0.125, //
        -0.125, 0.125, 0.125, //
        0.125, 0.125, 0.125, //
        -0.075, 0.25, 0.125, //
        0.075, 0.25, 0.125, //
        -0.375, 0.375, 0.125, //
        0.375, 0.375, 0.125, //
        -0.25, 0.475, 0.125, //
        0.25, 0.475, 0.125, //
        -0.25, 1.475, 0.125, //
        0.25, 1.475, 0.125, //
        -0.45, 1.675, 0.125, //
        0.45, 1.675, 0.125, //
        -0.3125, 1.875, 0.125, //
        0.3125, 1.875, 0.125, //
        -0.175, 1.825, 0.125, //
        0.175, 1.825, 0.125, //
        -0.45, 2.425, 0.125, //
        0.45, 2.425, 0.125, //
        -0.3125, 2.425, 0.125, //
        0.3125, 2.425, 0.125, //
        -0.175, 2.425, 0.125, //
        0.175, 2.425, 0.125,
    ];

    let conn = vec![
        0, 1, 2, 3, 26, 27, 28, 29, //
        0, 2, 8, 4, 26, 28, 34, 30, //
        3, 1, 5, 9, 29, 27, 31, 35, //
        4, 5, 6, 7, 30, 31, 32, 33, //
        6, 7, 10, 11, 32, 33, 36, 37, //
        8, 4, 10, 6, 34, 30, 36, 32, //
        7, 5, 11, 9, 33, 31, 37, 35, //
        10, 11, 12, 13, 36, 37, 38, 39, //
        12, 13, 18, 19, 38, 39, 44, 45, //
        14, 12, 16, 18, 40, 38, 42, 44, //
        13, 15, 19, 17, 39, 41, 45, 43, //
        14, 16, 20, 22, 40, 42, 46, 48, //
        16, 18, 22, 24, 42, 44, 48, 50, //
        19, 17, 25, 23, 45, 43, 51, 49, //
        17, 15, 23, 21, 43, 41, 49, 47,
    ];

    (52, conn, xpts)
}

/// Two unit blocks sharing one face, with matching frames.
pub fn two_block_mesh() -> (usize, Vec<i32>, Vec<f64>) {
    let xpts = vec![
        0.0, 0.0, 0.0, //
        1.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, //
        1.0, 1.0, 0.0, //
        0.0, 0.0, 1.0, //
        1.0, 0.0, 1.0, //
        0.0, 1.0, 1.0, //
        1.0, 1.0, 1.0, //
        2.0, 0.0, 0.0, //
        2.0, 1.0, 0.0, //
        2.0, 0.0, 1.0, //
        2.0, 1.0, 1.0,
    ];

    let conn = vec![
        0, 1, 2, 3, 4, 5, 6, 7, //
        1, 8, 3, 9, 5, 10, 7, 11,
    ];

    (12, conn, xpts)
}
