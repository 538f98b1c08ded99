//! Balance a randomized single-block forest and verify the result.
//!
//! Every rank owning the block runs the balance; the checks assert the
//! 2:1 property and that a second balance is a fixed point.
//!
//! Usage: `mpirun -n <p> random_balance`

use hexforest::{Forest, Octant};
use mpi::traits::Communicator;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn touches(a: &Octant, b: &Octant) -> bool {
    let (ha, hb) = (a.h(), b.h());
    a.x <= b.x + hb
        && b.x <= a.x + ha
        && a.y <= b.y + hb
        && b.y <= a.y + ha
        && a.z <= b.z + hb
        && b.z <= a.z + ha
}

fn main() {
    env_logger::init();

    let universe = mpi::initialize().unwrap();
    let comm = universe.world();
    let rank = comm.rank();

    let mut rng = ChaCha8Rng::seed_from_u64(rank as u64);

    let conn: Vec<i32> = (0..8).collect();
    let mut forest = Forest::new(&comm);
    forest.set_connectivity(8, &conn, false).unwrap();
    forest.create_random_trees(50, 0, 5, &mut rng).unwrap();

    forest.balance(true).unwrap();

    if let Some(tree) = forest.octree(0) {
        let elems = tree.elements().as_slice().to_vec();

        for a in &elems {
            for b in &elems {
                if touches(a, b) {
                    assert!((a.level - b.level).abs() <= 1);
                }
            }
        }

        let before = elems;
        let mut check = forest;
        check.balance(true).unwrap();
        let after = check.octree(0).unwrap().elements().as_slice();
        assert_eq!(before.as_slice(), after);

        println!("[{}] balanced tree with {} elements", rank, after.len());
    } else {
        println!("[{}] block owned elsewhere", rank);
        let mut check = forest;
        check.balance(true).unwrap();
    }
}
