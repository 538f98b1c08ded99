//! A parallel, adaptive octree forest for hexahedral finite-element meshes.
//!
//! This library provides the geometric backbone of a finite-element
//! framework on unstructured hexahedral domains: a [Forest] of linear
//! octrees, one per macro block of the input connectivity, distributed
//! over the ranks of an MPI communicator.
//!
//! Each octree is the sorted leaf set of an adaptive octree, indexed by an
//! [Octant] key that orders the leaves along the Morton space-filling
//! curve. On a single tree the library supports adaptive refinement and
//! coarsening, 2:1 balancing and enclosing-octant searches. The forest
//! layer glues the trees through the shared faces, edges and vertices of
//! the macro blocks: it propagates balance requests across interfaces,
//! repartitions the blocks by weighted Morton order, numbers the
//! finite-element nodes mesh-wide with hanging-node resolution, and builds
//! the inter-level interpolation operators used by multigrid solvers.
//!
//! ## Using the library
//!
//! ```no_run
//! use hexforest::{fixtures, Forest};
//! use mpi::traits::Communicator;
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//!
//! let universe = mpi::initialize().unwrap();
//! let comm = universe.world();
//! let mut rng = ChaCha8Rng::seed_from_u64(comm.rank() as u64);
//!
//! let (npts, conn, _xpts) = fixtures::box_mesh();
//! let mut forest = Forest::new(&comm);
//! forest.set_connectivity(npts, &conn, false).unwrap();
//! forest.create_random_trees(50, 0, 5, &mut rng).unwrap();
//!
//! forest.balance(true).unwrap();
//! forest.create_nodes(2).unwrap();
//!
//! let (conn, num_elements) = forest.create_mesh_conn().unwrap();
//! assert_eq!(conn.len(), 8 * num_elements);
//! ```
//!
//! The 2:1 balance and the hash-based linear octree algorithms follow the
//! bottom-up construction of Sundar et al.,
//! *[Bottom-Up Construction and 2:1 Balance Refinement of Linear Octrees in
//! Parallel](https://epubs.siam.org/doi/10.1137/070681727)*.
#![cfg_attr(feature = "strict", deny(warnings), deny(unused_crate_dependencies))]
#![warn(missing_docs)]

pub mod array;
pub mod constants;
pub mod error;
pub mod fixtures;
pub mod forest;
pub mod geometry;
pub mod octant;
pub mod octree;
pub mod tools;
pub mod topology;

pub use crate::array::{OctantArray, OctantHash, OctantQueue};
pub use crate::error::ForestError;
pub use crate::forest::Forest;
pub use crate::octant::Octant;
pub use crate::octree::Octree;
pub use crate::topology::BlockTopology;
