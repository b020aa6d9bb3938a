use harp::error::HarpError;
use harp::kmeans::{self, EmptyClusterPolicy, CENTROIDS_TABLE, POINTS_TABLE};
use harp::network::Server;
use harp::table::{Depth, Partition, PartitionId, Table, TableId};
use harp::worker::{run_local, Worker, WorkerConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn table(table_id: TableId, rows: &[[f64; 2]]) -> Table<f64> {
    Table::from_partitions(
        table_id,
        rows.iter()
            .enumerate()
            .map(|(i, r)| Partition::new(i as PartitionId, r.to_vec())),
    )
    .unwrap()
}

fn points() -> Table<f64> {
    table(
        POINTS_TABLE,
        &[
            [1.0, 1.0],
            [1.5, 2.0],
            [3.0, 4.0],
            [5.0, 7.0],
            [3.5, 5.0],
            [4.5, 5.0],
            [3.5, 4.5],
            [9.0, 9.0],
            [8.0, 10.0],
        ],
    )
}

fn centroids() -> Table<f64> {
    table(CENTROIDS_TABLE, &[[1.0, 1.0], [5.0, 7.0], [9.0, 9.0]])
}

#[tokio::test]
async fn test_distributed_kmeans_matches_serial() {
    let mut expected = centroids();
    let policy = EmptyClusterPolicy::Retain;
    kmeans::kmeans_serial(&mut expected, &points(), 5, policy).unwrap();

    let results = run_local(WorkerConfig::new(3), |ctx, mut comm| async move {
        let points = kmeans::shard(points(), ctx)?;
        let mut centroids = kmeans::shard(centroids(), ctx)?;
        assert_eq!(points.partition_count(), 3);
        assert_eq!(centroids.ids(), vec![ctx.worker_id() as PartitionId]);
        kmeans::kmeans_distributed(
            &mut comm,
            &mut centroids,
            &points,
            5,
            EmptyClusterPolicy::Retain,
        )
        .await?;
        Ok(centroids.destroy(Depth::Shallow))
    })
    .await
    .unwrap();

    let mut seen = 0;
    for result in results {
        for c in result.unwrap() {
            let reference = expected.partition(c.id()).unwrap();
            assert_eq!(c.size(), reference.size());
            for (got, want) in c.data().iter().zip(reference.data()) {
                assert!(
                    (got - want).abs() < 1e-6,
                    "centroid {}: {:?} != {:?}",
                    c.id(),
                    c.data(),
                    reference.data()
                );
            }
            seen += 1;
        }
    }
    assert_eq!(seen, 3);
}

#[tokio::test]
async fn test_skipped_rotate_is_detected() {
    let run = run_local(WorkerConfig::new(3), |ctx, mut comm| async move {
        let mut t = Table::from_partitions(
            1,
            vec![Partition::new(ctx.worker_id() as PartitionId, vec![0u8])],
        )?;
        comm.rotate(&mut t).await?;
        if ctx.worker_id() != 2 {
            comm.rotate(&mut t).await?;
        }
        comm.barrier().await
    });
    let results = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("a skipped rotate must not hang the group")
        .unwrap();

    assert!(
        matches!(
            results[0],
            Err(HarpError::CollectiveMismatch { peer: 2, .. })
        ),
        "worker 0 got {:?}",
        results[0]
    );
    for (id, result) in results.iter().enumerate() {
        assert!(result.is_err(), "worker {} should have failed", id);
    }
}

#[tokio::test]
async fn test_barrier_is_a_rendezvous() {
    for world_size in 1..=5 {
        let arrived = Arc::new(AtomicUsize::new(0));
        let counter = arrived.clone();
        let results = run_local(
            WorkerConfig::new(world_size),
            move |_, mut comm| async move {
                for round in 1..=3 {
                    counter.fetch_add(1, Ordering::SeqCst);
                    comm.barrier().await?;
                    // nobody can be in the next round before we leave this one
                    let seen = counter.load(Ordering::SeqCst);
                    assert!(seen >= round * world_size);
                    assert!(seen <= (round + 1) * world_size);
                    comm.barrier().await?;
                }
                Ok(())
            },
        )
        .await
        .unwrap();
        for result in results {
            result.unwrap();
        }
        assert_eq!(arrived.load(Ordering::SeqCst), 3 * world_size);
    }
}

#[tokio::test]
async fn test_rotate_over_tcp() {
    let world_size = 3;
    let mut server = Server::new("127.0.0.1:0", world_size).await.unwrap();
    let server_addr = server.address.to_string();
    let registration =
        tokio::spawn(async move { server.accept_new_connections().await });

    let mut handles = Vec::new();
    for _ in 0..world_size {
        let config = WorkerConfig {
            server_addr: server_addr.clone(),
            ..WorkerConfig::new(world_size)
        }
        .with_timeout(Duration::from_secs(10));
        handles.push(tokio::spawn(async move {
            let worker = Worker::init(config).await?;
            worker
                .start(|ctx, mut comm| async move {
                    let me = ctx.worker_id() as PartitionId;
                    let mut t = Table::from_partitions(
                        7,
                        vec![Partition::new(me, vec![me as u64; 4])],
                    )?;
                    comm.barrier().await?;
                    comm.rotate(&mut t).await?;
                    let from = ctx.predecessor() as PartitionId;
                    assert_eq!(t.ids(), vec![from]);
                    assert_eq!(
                        t.partition(from).unwrap().data(),
                        &[from as u64; 4]
                    );
                    for _ in 1..ctx.world_size() {
                        comm.rotate(&mut t).await?;
                    }
                    comm.barrier().await?;
                    Ok((me, t.ids()))
                })
                .await
        }));
    }

    for handle in handles {
        let result: Result<(PartitionId, Vec<PartitionId>), HarpError> =
            handle.await.unwrap();
        let (me, ids) = result.unwrap();
        assert_eq!(ids, vec![me]);
    }
    registration.await.unwrap().unwrap();
}
