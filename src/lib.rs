//! # harp
//!
//! A framework for iterative, data-parallel distributed algorithms. Data is
//! split into [`Partition`]s held in [`Table`]s, each worker of a fixed
//! group computes on the tables it owns, and whole tables move between
//! workers with two collectives over a logical ring: [`barrier`] and
//! [`rotate`].
//!
//! A `harp` program is a function handed to a [`Worker`], which runs it
//! exactly once with the worker's [`WorkerContext`] and a
//! [`Communicator`]. Groups can live in one process (see [`run_local`]) or
//! span processes connected over TCP, bootstrapped by a registration
//! [`Server`].
//!
//! The [`kmeans`] module is the shipped example algorithm.
//!
//! [`Partition`]: table/struct.Partition.html
//! [`Table`]: table/struct.Table.html
//! [`barrier`]: communicator/struct.Communicator.html#method.barrier
//! [`rotate`]: communicator/struct.Communicator.html#method.rotate
//! [`Worker`]: worker/struct.Worker.html
//! [`WorkerContext`]: worker/struct.WorkerContext.html
//! [`Communicator`]: communicator/struct.Communicator.html
//! [`run_local`]: worker/fn.run_local.html
//! [`Server`]: network/struct.Server.html
//! [`kmeans`]: kmeans/index.html
pub mod communicator;
pub mod error;
pub mod kmeans;
pub mod loader;
pub mod network;
pub mod table;
pub mod worker;
