//! K-means clustering, both as a single-process reference and distributed
//! over a ring of workers.
//!
//! ## Distributed algorithm
//!
//! Centroids are partitioned across workers, worker `w` owns the centroids
//! whose id satisfies `id % world_size == w` (see [`shard`]). Points are
//! loaded as one shard per worker and never move. Every iteration:
//!
//! 1. **Assign**: `world_size` times, compare every local point with every
//!    centroid this worker currently holds and remember the closest one,
//!    then rotate the centroids. After the last rotate every worker holds
//!    its own centroids again and has seen all of them.
//! 2. **Accumulate**: zero the centroids and their point counts, then
//!    `world_size` times add every local point to the held centroid it is
//!    assigned to, bump that centroid's count and rotate both tables. Each
//!    centroid passes every worker once, picking up every worker's
//!    contribution.
//! 3. **Average**: divide each centroid sum by its count.
//!
//! A centroid nobody was assigned to has a count of zero. What happens then
//! is decided by the [`EmptyClusterPolicy`].
use crate::communicator::Communicator;
use crate::error::HarpError;
use crate::network::Transport;
use crate::table::{Depth, Partition, PartitionId, Table, TableId};
use crate::worker::WorkerContext;
use log::debug;
use std::collections::HashMap;

/// The table id of the points, which are never rotated
pub const POINTS_TABLE: TableId = 0;
/// The table id of the centroids
pub const CENTROIDS_TABLE: TableId = 1;
/// The table id of the per-centroid point counts
pub const COUNTS_TABLE: TableId = 2;

/// What to do with a centroid that no point was assigned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyClusterPolicy {
    /// Keep the centroid where it was
    #[default]
    Retain,
    /// Fail with `HarpError::EmptyGroup`
    Fail,
}

/// The closest centroid seen so far for every point: `(distance, centroid)`
type Assignment = HashMap<PartitionId, (f64, PartitionId)>;

/// Euclidean distance between two points of the same dimension
pub fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Runs `iterations` rounds of k-means over all `points` in this process,
/// updating `centroids` in place.
pub fn kmeans_serial(
    centroids: &mut Table<f64>,
    points: &Table<f64>,
    iterations: usize,
    policy: EmptyClusterPolicy,
) -> Result<(), HarpError> {
    let mut counts = counts_for(centroids)?;
    for _ in 0..iterations {
        let mut assignment = Assignment::new();
        assign(points, centroids, &mut assignment);
        let previous = centroids.deep_copy();
        centroids.reset(0.0);
        counts.reset(0);
        accumulate(points, centroids, &mut counts, &assignment)?;
        average(centroids, &counts, &previous, policy)?;
    }
    Ok(())
}

/// Runs `iterations` rounds of k-means across the group of `comm`. Every
/// worker passes its own shard of `points` and the `centroids` it owns (see
/// [`shard`]); on return `centroids` holds the updated values of
/// those same centroids.
///
/// Every worker of the group must call this with the same `iterations`.
pub async fn kmeans_distributed<Tr: Transport>(
    comm: &mut Communicator<Tr>,
    centroids: &mut Table<f64>,
    points: &Table<f64>,
    iterations: usize,
    policy: EmptyClusterPolicy,
) -> Result<(), HarpError> {
    let steps = comm.world_size();
    let mut counts = counts_for(centroids)?;
    for it in 0..iterations {
        let mut assignment =
            Assignment::with_capacity(points.partition_count());
        for _ in 0..steps {
            assign(points, centroids, &mut assignment);
            comm.rotate(centroids).await?;
        }

        let previous = centroids.deep_copy();
        centroids.reset(0.0);
        counts.reset(0);
        for _ in 0..steps {
            accumulate(points, centroids, &mut counts, &assignment)?;
            comm.rotate(centroids).await?;
            comm.rotate(&mut counts).await?;
        }

        average(centroids, &counts, &previous, policy)?;
        debug!(
            "Worker {} finished iteration {} of {}",
            comm.worker_id(),
            it + 1,
            iterations
        );
    }
    Ok(())
}

/// Keeps the partitions of `all` that the worker described by `ctx` owns,
/// those whose id satisfies `id % world_size == worker_id`, and drops the
/// rest.
pub fn shard(
    all: Table<f64>,
    ctx: WorkerContext,
) -> Result<Table<f64>, HarpError> {
    let table_id = all.table_id();
    let mine = all.destroy(Depth::Shallow).into_iter().filter(|p| {
        p.id() as usize % ctx.world_size() == ctx.worker_id()
    });
    Table::from_partitions(table_id, mine)
}

/// One count partition (a single `u64`) per centroid, with matching ids
fn counts_for(centroids: &Table<f64>) -> Result<Table<u64>, HarpError> {
    Table::from_partitions(
        COUNTS_TABLE,
        centroids.ids().into_iter().map(|id| Partition::new(id, vec![0])),
    )
}

/// Whether `(d, id)` is a better assignment than `best`. Ties go to the
/// lower centroid id, so the result does not depend on the order in which
/// centroids are seen.
fn closer(d: f64, id: PartitionId, best: (f64, PartitionId)) -> bool {
    d < best.0 || (d == best.0 && id < best.1)
}

fn assign(
    points: &Table<f64>,
    centroids: &Table<f64>,
    assignment: &mut Assignment,
) {
    for (cid, c) in centroids.partitions() {
        for (pid, p) in points.partitions() {
            let d = distance(p.data(), c.data());
            assignment
                .entry(*pid)
                .and_modify(|best| {
                    if closer(d, *cid, *best) {
                        *best = (d, *cid);
                    }
                })
                .or_insert((d, *cid));
        }
    }
}

fn accumulate(
    points: &Table<f64>,
    centroids: &mut Table<f64>,
    counts: &mut Table<u64>,
    assignment: &Assignment,
) -> Result<(), HarpError> {
    for (cid, c) in centroids.partitions_mut() {
        let count = counts.partition_mut(*cid).ok_or(
            HarpError::PartitionNotFound {
                table_id: COUNTS_TABLE,
                partition_id: *cid,
            },
        )?;
        for (pid, p) in points.partitions() {
            if assignment.get(pid).map(|best| best.1) != Some(*cid) {
                continue;
            }
            count.data_mut()[0] += 1;
            for (sum, v) in c.data_mut().iter_mut().zip(p.data()) {
                *sum += v;
            }
        }
    }
    Ok(())
}

fn average(
    centroids: &mut Table<f64>,
    counts: &Table<u64>,
    previous: &Table<f64>,
    policy: EmptyClusterPolicy,
) -> Result<(), HarpError> {
    for (cid, c) in centroids.partitions_mut() {
        let count = counts
            .partition(*cid)
            .map(|p| p.data()[0])
            .ok_or(HarpError::PartitionNotFound {
                table_id: COUNTS_TABLE,
                partition_id: *cid,
            })?;
        if count > 0 {
            for v in c.data_mut() {
                *v /= count as f64;
            }
            continue;
        }
        match policy {
            EmptyClusterPolicy::Retain => {
                let old = previous.partition(*cid).ok_or(
                    HarpError::PartitionNotFound {
                        table_id: previous.table_id(),
                        partition_id: *cid,
                    },
                )?;
                c.data_mut().copy_from_slice(old.data());
            }
            EmptyClusterPolicy::Fail => return Err(HarpError::EmptyGroup(*cid)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(table_id: TableId, rows: &[[f64; 2]]) -> Table<f64> {
        Table::from_partitions(
            table_id,
            rows.iter()
                .enumerate()
                .map(|(i, r)| Partition::new(i as PartitionId, r.to_vec())),
        )
        .unwrap()
    }

    #[test]
    fn test_distance() {
        assert_eq!(distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
        assert_eq!(distance(&[1.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_serial_two_clusters() {
        let points = table(
            POINTS_TABLE,
            &[[0.0, 0.0], [0.0, 2.0], [10.0, 10.0], [10.0, 12.0]],
        );
        let mut centroids = table(CENTROIDS_TABLE, &[[1.0, 1.0], [9.0, 9.0]]);
        kmeans_serial(&mut centroids, &points, 3, EmptyClusterPolicy::Retain)
            .unwrap();
        assert_eq!(centroids.partition(0).unwrap().data(), &[0.0, 1.0]);
        assert_eq!(centroids.partition(1).unwrap().data(), &[10.0, 11.0]);
    }

    #[test]
    fn test_empty_cluster_retained() {
        let points = table(POINTS_TABLE, &[[0.0, 0.0], [2.0, 0.0]]);
        let mut centroids =
            table(CENTROIDS_TABLE, &[[1.0, 0.0], [100.0, 100.0]]);
        kmeans_serial(&mut centroids, &points, 2, EmptyClusterPolicy::Retain)
            .unwrap();
        assert_eq!(centroids.partition(0).unwrap().data(), &[1.0, 0.0]);
        assert_eq!(centroids.partition(1).unwrap().data(), &[100.0, 100.0]);
    }

    #[test]
    fn test_empty_cluster_fails() {
        let points = table(POINTS_TABLE, &[[0.0, 0.0]]);
        let mut centroids = table(CENTROIDS_TABLE, &[[0.0, 0.0], [5.0, 5.0]]);
        let res =
            kmeans_serial(&mut centroids, &points, 1, EmptyClusterPolicy::Fail);
        assert!(matches!(res, Err(HarpError::EmptyGroup(1))));
    }

    #[test]
    fn test_ties_go_to_lower_id() {
        let points = table(POINTS_TABLE, &[[0.0, 0.0]]);
        let centroids = table(CENTROIDS_TABLE, &[[1.0, 0.0], [-1.0, 0.0]]);
        let mut assignment = Assignment::new();
        assign(&points, &centroids, &mut assignment);
        assert_eq!(assignment[&0].1, 0);
    }

    #[test]
    fn test_shard() {
        let all = table(
            CENTROIDS_TABLE,
            &[[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [3.0, 3.0], [4.0, 4.0]],
        );
        let ctx = WorkerContext::new(1, 2).unwrap();
        let mine = shard(all, ctx).unwrap();
        assert_eq!(mine.table_id(), CENTROIDS_TABLE);
        assert_eq!(mine.ids(), vec![1, 3]);
    }
}
