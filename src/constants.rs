//! Compile-time constants for the octant coordinate system.

/// The maximum refinement depth of any octree in the forest.
///
/// Coordinates of octants are integers in `[0, HMAX)` with `HMAX = 1 << MAX_LEVEL`,
/// so 30 levels leave headroom in a signed 32 bit integer.
pub const MAX_LEVEL: i32 = 30;

/// The side length of the root octant.
pub const HMAX: i32 = 1 << MAX_LEVEL;

/// Number of children of a non-leaf octant.
pub const NSIBLINGS: usize = 8;

/// Number of faces of an octant or a macro block.
pub const NFACES: usize = 6;

/// Number of edges of an octant or a macro block.
pub const NEDGES: usize = 12;

/// Number of vertices of an octant or a macro block.
pub const NVERTS: usize = 8;
