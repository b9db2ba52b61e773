//! In-memory users API that scales across local worker processes.
//!
//! `user_cluster serve` runs the API in one process. `user_cluster cluster`
//! starts a primary that spawns one worker process per CPU, forwards each
//! HTTP request to the next worker in turn, and keeps the workers' stores
//! converged by relaying every mutation as a full snapshot.
//!
//! - [`model`] and [`error`] define records, events and the error taxonomy.
//! - [`store`] and [`service`] hold the CRUD rules; [`replica`] wraps them in
//!   a task that owns the data.
//! - [`worker`] exposes a replica over HTTP and speaks the replication
//!   protocol from [`message`] over stdin/stdout.
//! - [`outbox`] delivers protocol messages without ever blocking the sender.
//! - [`dispatch`], [`replication`] and [`primary`] make up the primary.
//! - [`cli`] parses the command line.

pub mod cli;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod model;
pub mod outbox;
pub mod primary;
pub mod replica;
pub mod replication;
pub mod service;
pub mod store;
pub mod worker;
