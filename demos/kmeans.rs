use clap::Parser;
use harp::communicator::Communicator;
use harp::error::HarpError;
use harp::kmeans::{self, EmptyClusterPolicy, CENTROIDS_TABLE, POINTS_TABLE};
use harp::loader;
use harp::network::Transport;
use harp::table::{Partition, PartitionId, Table, TableId};
use harp::worker::{run_local, Worker, WorkerConfig, WorkerContext, WorkerId};
use log::{info, Level};
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// This example clusters randomly generated points with k-means, first on
/// worker 0 alone as a reference and then across the whole group.
///
/// Run it either as one process per worker next to a `harp-server`, or with
/// `--local` to run every worker of the group in this process.
#[derive(Parser, Clone, Debug)]
#[command(version = "1.0")]
struct Opts {
    /// The IP:Port of the registration server
    #[arg(short = 's', long = "server_addr", default_value = "127.0.0.1:9000")]
    server_addr: String,
    /// The IP:Port this worker listens on for its peers
    #[arg(short = 'm', long = "my_addr", default_value = "127.0.0.1:0")]
    my_addr: String,
    /// The number of workers in the group
    #[arg(short = 'n', long = "num_workers", default_value = "3")]
    num_workers: usize,
    /// Run every worker of the group in this process
    #[arg(short = 'l', long = "local")]
    local: bool,
    /// The directory holding one `points.<worker id>.csv` per worker and
    /// `centroids.csv`. Missing files are generated.
    #[arg(short = 'd', long = "data_dir", default_value = "kmeans_data")]
    data_dir: PathBuf,
    /// The number of k-means iterations
    #[arg(short = 'i', long = "iterations", default_value = "10")]
    iterations: usize,
    /// The dimension of every point
    #[arg(short = 'v', long = "vector_size", default_value = "2")]
    vector_size: usize,
    /// The number of points to generate, split evenly across the workers
    #[arg(short = 'p', long = "num_points", default_value = "10000")]
    num_points: usize,
    /// The number of centroids to generate
    #[arg(short = 'k', long = "num_centroids", default_value = "10")]
    num_centroids: usize,
    /// Seconds to wait on a peer during a collective before giving up
    #[arg(short = 't', long = "timeout")]
    timeout: Option<u64>,
    /// Fail instead of keeping a centroid that no point was assigned to
    #[arg(long = "fail_on_empty")]
    fail_on_empty: bool,
}

impl Opts {
    fn points_file(&self, worker_id: WorkerId) -> PathBuf {
        self.data_dir.join(format!("points.{}.csv", worker_id))
    }

    fn all_points_files(&self) -> Vec<PathBuf> {
        (0..self.num_workers).map(|w| self.points_file(w)).collect()
    }

    fn centroids_file(&self) -> PathBuf {
        self.data_dir.join("centroids.csv")
    }

    fn policy(&self) -> EmptyClusterPolicy {
        if self.fail_on_empty {
            EmptyClusterPolicy::Fail
        } else {
            EmptyClusterPolicy::Retain
        }
    }
}

/// Writes `count` random vectors of `vector_size` values to `path`
fn generate(
    path: &Path,
    table_id: TableId,
    count: usize,
    vector_size: usize,
) -> Result<(), HarpError> {
    let mut rng = rand::thread_rng();
    let table = Table::from_partitions(
        table_id,
        (0..count).map(|id| {
            let values =
                (0..vector_size).map(|_| rng.gen_range(0.0..1000.0)).collect();
            Partition::new(id as PartitionId, values)
        }),
    )?;
    loader::save_table(path, &table)?;
    info!("Generated {} vectors into {}", count, path.display());
    Ok(())
}

fn ensure_data(opts: &Opts) -> Result<(), HarpError> {
    fs::create_dir_all(&opts.data_dir)?;
    let n = opts.num_workers;
    for w in 0..n {
        let path = opts.points_file(w);
        if !path.exists() {
            // the first `num_points % n` shards get one point more
            let extra = usize::from(w < opts.num_points % n);
            let count = opts.num_points / n + extra;
            generate(&path, POINTS_TABLE, count, opts.vector_size)?;
        }
    }
    if !opts.centroids_file().exists() {
        generate(
            &opts.centroids_file(),
            CENTROIDS_TABLE,
            opts.num_centroids,
            opts.vector_size,
        )?;
    }
    Ok(())
}

async fn cluster<Tr: Transport>(
    ctx: WorkerContext,
    mut comm: Communicator<Tr>,
    opts: Opts,
) -> Result<(), HarpError> {
    if ctx.worker_id() == 0 {
        ensure_data(&opts)?;
    }
    // nobody reads the data before worker 0 has written it
    comm.barrier().await?;

    let centroids: Table<f64> = loader::load_table(
        opts.centroids_file(),
        CENTROIDS_TABLE,
        opts.vector_size,
        0,
    )?;

    if ctx.worker_id() == 0 {
        let all_points: Table<f64> = loader::load_shards(
            opts.all_points_files(),
            POINTS_TABLE,
            opts.vector_size,
        )?;
        info!("Serial k-means over {} points", all_points.partition_count());
        let mut reference = centroids.deep_copy();
        let start = Instant::now();
        kmeans::kmeans_serial(
            &mut reference,
            &all_points,
            opts.iterations,
            opts.policy(),
        )?;
        info!("Serial k-means took {:?}", start.elapsed());
        for id in reference.ids() {
            if let Some(c) = reference.partition(id) {
                info!("Serial centroid {}: {:?}", id, c.data());
            }
        }
    }

    let points: Table<f64> = loader::load_table(
        opts.points_file(ctx.worker_id()),
        POINTS_TABLE,
        opts.vector_size,
        0,
    )?;
    let mut centroids = kmeans::shard(centroids, ctx)?;
    info!(
        "Worker {} holds {} points and {} centroids",
        ctx.worker_id(),
        points.partition_count(),
        centroids.partition_count()
    );

    comm.barrier().await?;
    let start = Instant::now();
    kmeans::kmeans_distributed(
        &mut comm,
        &mut centroids,
        &points,
        opts.iterations,
        opts.policy(),
    )
    .await?;
    info!(
        "Worker {} finished distributed k-means in {:?}",
        ctx.worker_id(),
        start.elapsed()
    );
    for id in centroids.ids() {
        if let Some(c) = centroids.partition(id) {
            info!("Distributed centroid {}: {:?}", id, c.data());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), HarpError> {
    let opts = Opts::parse();
    simple_logger::init_with_level(Level::Info).unwrap();
    let config = WorkerConfig {
        world_size: opts.num_workers,
        collective_timeout: opts.timeout.map(Duration::from_secs),
        server_addr: opts.server_addr.clone(),
        my_addr: opts.my_addr.clone(),
    };

    if opts.local {
        let results =
            run_local(config, move |ctx, comm| cluster(ctx, comm, opts))
                .await?;
        for result in results {
            result?;
        }
    } else {
        let worker = Worker::init(config).await?;
        worker.start(move |ctx, comm| cluster(ctx, comm, opts)).await?;
    }
    Ok(())
}
