//! Collective communication helpers.
//!
//! Thin wrappers around the variable-count MPI collectives used by the
//! forest: gathering small arrays to every rank, all-to-all redistribution
//! of octant streams, and global prefix sums for the space-filling-curve
//! partition.

use mpi::collective::SystemOperation;
use mpi::datatype::{Partition, PartitionMut};
use mpi::traits::{CommunicatorCollectives, Equivalence};

/// Compute displacements from per-rank counts: `[3, 4, 5] -> [0, 3, 7]`.
pub fn displacements(counts: &[i32]) -> Vec<i32> {
    counts
        .iter()
        .scan(0, |acc, &count| {
            let offset = *acc;
            *acc += count;
            Some(offset)
        })
        .collect()
}

/// Gather the local array of every rank into one array on all ranks,
/// concatenated in rank order.
pub fn gather_to_all<T, C>(arr: &[T], comm: &C) -> Vec<T>
where
    T: Equivalence + Default + Clone,
    C: CommunicatorCollectives,
{
    let size = comm.size() as usize;

    let local_len = arr.len() as i32;
    let mut counts = vec![0i32; size];
    comm.all_gather_into(&local_len, &mut counts[..]);

    let total = counts.iter().sum::<i32>() as usize;
    let mut recv = vec![T::default(); total];
    let displs = displacements(&counts);
    let mut partition = PartitionMut::new(&mut recv[..], counts, &displs[..]);
    comm.all_gather_varcount_into(arr, &mut partition);

    recv
}

/// Exchange variable-count data between all ranks. `counts[r]` elements of
/// `arr`, in rank order, are sent to rank `r`; the received elements are
/// returned concatenated in rank order.
pub fn redistribute<T, C>(arr: &[T], counts: &[i32], comm: &C) -> Vec<T>
where
    T: Equivalence + Default + Clone,
    C: CommunicatorCollectives,
{
    redistribute_with_counts(arr, counts, comm).0
}

/// Like [redistribute], additionally returning how many elements were
/// received from each rank, e.g. to route replies back to the senders.
pub fn redistribute_with_counts<T, C>(arr: &[T], counts: &[i32], comm: &C) -> (Vec<T>, Vec<i32>)
where
    T: Equivalence + Default + Clone,
    C: CommunicatorCollectives,
{
    let size = comm.size() as usize;
    debug_assert_eq!(counts.len(), size);
    debug_assert_eq!(counts.iter().sum::<i32>() as usize, arr.len());

    let mut recv_counts = vec![0i32; size];
    comm.all_to_all_into(counts, &mut recv_counts[..]);

    let send_displs = displacements(counts);
    let send_partition = Partition::new(arr, counts.to_vec(), &send_displs[..]);

    let total = recv_counts.iter().sum::<i32>() as usize;
    let mut recv = vec![T::default(); total];
    let recv_displs = displacements(&recv_counts);
    let mut recv_partition =
        PartitionMut::new(&mut recv[..], recv_counts.clone(), &recv_displs[..]);

    comm.all_to_all_varcount_into(&send_partition, &mut recv_partition);

    (recv, recv_counts)
}

/// The sum of `value` over the ranks before this one (0 on rank 0).
pub fn exclusive_prefix_sum<C: CommunicatorCollectives>(value: usize, comm: &C) -> usize {
    let mut offset = 0usize;
    comm.exclusive_scan_into(&value, &mut offset, SystemOperation::sum());
    if comm.rank() == 0 {
        // MPI leaves the exscan result undefined on the first rank.
        offset = 0;
    }
    offset
}

/// The sum of `value` over all ranks.
pub fn global_sum<C: CommunicatorCollectives>(value: usize, comm: &C) -> usize {
    let mut total = 0usize;
    comm.all_reduce_into(&value, &mut total, SystemOperation::sum());
    total
}

/// True on every rank iff `value` is true on every rank.
pub fn global_all<C: CommunicatorCollectives>(value: bool, comm: &C) -> bool {
    let mut result = false;
    comm.all_reduce_into(&value, &mut result, SystemOperation::logical_and());
    result
}

#[cfg(test)]
mod test {
    use super::displacements;

    #[test]
    fn test_displacements() {
        assert_eq!(displacements(&[3, 4, 5]), vec![0, 3, 7]);
        assert_eq!(displacements(&[]), Vec::<i32>::new());
        assert_eq!(displacements(&[0, 2, 0, 1]), vec![0, 0, 2, 2]);
    }
}
