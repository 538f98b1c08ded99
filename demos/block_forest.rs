//! Multilevel forest driver on the built-in macro meshes.
//!
//! Mirrors the workflow of a multigrid setup: build a forest, balance it,
//! number the nodes, extract the element connectivity and the dependent
//! table, then coarsen and repeat, building the interpolation between
//! consecutive levels.
//!
//! Usage: `mpirun -n <p> block_forest [box|connector] [partition] [order=N]`

use hexforest::{fixtures, geometry, Forest};
use log::warn;
use mpi::traits::Communicator;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const NUM_LEVELS: usize = 5;

fn main() {
    env_logger::init();

    let universe = mpi::initialize().unwrap();
    let comm = universe.world();
    let rank = comm.rank();

    let mut partition = false;
    let mut order = 2;
    let (mut npts, mut conn, mut xpts) = fixtures::box_mesh();

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "box" => (npts, conn, xpts) = fixtures::box_mesh(),
            "connector" => (npts, conn, xpts) = fixtures::connector_mesh(),
            "partition" => partition = true,
            other => {
                if let Some(value) = other.strip_prefix("order=") {
                    order = value.parse::<usize>().unwrap_or(2).clamp(2, 3);
                } else {
                    eprintln!("unknown argument: {}", other);
                }
            }
        }
    }

    let mut rng = ChaCha8Rng::seed_from_u64(rank as u64);

    let mut forest = Forest::new(&comm);
    forest.set_connectivity(npts, &conn, partition).unwrap();
    forest.create_random_trees(50, 0, 5, &mut rng).unwrap();

    if rank == 0 {
        let topo = forest.topology().unwrap();
        for block in 0..topo.num_blocks() {
            let volume = geometry::block_volume(&conn, &xpts, block);
            if volume < 0.0 {
                warn!("negative volume in block {}", block);
            }
        }

        let mut face_id_count = [0usize; 8];
        for &id in topo.block_face_ids().iter() {
            if id >= 0 {
                face_id_count[id as usize] += 1;
            }
        }

        println!("nblocks = {}", topo.num_blocks());
        println!("nfaces = {}", topo.num_faces());
        println!("nedges = {}", topo.num_edges());
        println!("nnodes = {}", topo.num_nodes());
        for (id, count) in face_id_count.iter().enumerate() {
            println!("face_id_count[{}] = {}", id, count);
        }
    }

    println!("[{}] Repartition", rank);
    forest.repartition().unwrap();

    let mut levels: Vec<Forest<_>> = vec![forest];
    for level in 0..NUM_LEVELS {
        println!("[{}] Balance", rank);
        let t_balance = mpi::time();
        levels[level].balance(level == 0).unwrap();
        let t_balance = mpi::time() - t_balance;

        println!("[{}] Create nodes", rank);
        let t_nodes = mpi::time();
        levels[level].create_nodes(order).unwrap();
        let t_nodes = mpi::time() - t_nodes;

        let t_mesh = mpi::time();
        let (mesh_conn, num_elements) = levels[level].create_mesh_conn().unwrap();
        let t_mesh = mpi::time() - t_mesh;

        let range = levels[level].get_owned_node_range().unwrap();
        let num_nodes = range[rank as usize + 1] - range[rank as usize];

        let (dep_ptr, _dep_conn, dep_weights) = levels[level].get_dep_node_conn().unwrap();
        let num_dep_nodes = dep_ptr.len() - 1;
        debug_assert_eq!(dep_weights.len(), *dep_ptr.last().unwrap() as usize);

        println!(
            "[{}] level {}: {} elements, {} owned nodes, {} dependent nodes",
            rank,
            level,
            num_elements,
            num_nodes,
            num_dep_nodes
        );
        debug_assert_eq!(
            mesh_conn.len(),
            order * order * order * num_elements
        );

        if level > 0 {
            let (ptr, conn, weights) = levels[level - 1]
                .create_interpolation(&levels[level])
                .unwrap();
            println!(
                "[{}] interpolation {} -> {}: {} rows, {} entries",
                rank,
                level,
                level - 1,
                ptr.len() - 1,
                weights.len()
            );
            debug_assert_eq!(conn.len(), weights.len());
        }

        if rank == 0 {
            println!("balance:  {:15.5} s", t_balance);
            println!("nodes:    {:15.5} s", t_nodes);
            println!("mesh:     {:15.5} s", t_mesh);
        }

        // Evaluate the physical node locations of the owned trees, the
        // way an assembler would set its coordinate vector.
        for &block in levels[level].owned_blocks() {
            let tree = levels[level].octree(block).unwrap();
            if let Some(nodes) = tree.nodes() {
                let mut checksum = 0.0;
                for node in nodes.iter() {
                    let p = geometry::block_location(&conn, &xpts, block, node);
                    checksum += p.coords[0] + p.coords[1] + p.coords[2];
                }
                log::debug!("[{}] block {} coordinate checksum {}", rank, block, checksum);
            }
        }

        if level + 1 < NUM_LEVELS {
            let coarse = levels[level].coarsen().unwrap();
            levels.push(coarse);
        }
    }
}
