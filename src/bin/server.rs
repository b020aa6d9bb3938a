use clap::Parser;
use harp::error::HarpError;
use harp::network::Server;
use log::Level;

/// The registration server of a `harp` group. Assigns worker ids in the
/// order workers connect and exits once the whole group has registered.
#[derive(Parser)]
#[command(version = "1.0")]
struct Opts {
    /// The IP:Port to listen on for workers
    #[arg(short = 'a', long = "address", default_value = "127.0.0.1:9000")]
    address: String,
    /// The number of workers in the group
    #[arg(short = 'n', long = "num_workers", default_value = "3")]
    num_workers: usize,
}

#[tokio::main]
async fn main() -> Result<(), HarpError> {
    let opts = Opts::parse();
    simple_logger::init_with_level(Level::Info).unwrap();
    let mut s = Server::new(&opts.address, opts.num_workers).await?;
    s.accept_new_connections().await?;
    Ok(())
}
