//! Worker runtime: the HTTP surface of one replica.
//!
//! In cluster mode a worker is a child process of the primary. It serves
//! the users API on a private port, reports every mutation on stdout and
//! replaces its store with each snapshot the primary writes to its stdin.

use std::{
    future::Future,
    io,
    net::{Ipv4Addr, SocketAddr},
};

use anyhow::{bail, Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tokio::{
    io::{AsyncBufRead, BufReader},
    net::TcpListener,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{
    cli::WorkerArgs,
    error::ApiError,
    message::{read_message, PrimaryToWorker, WorkerToPrimary},
    model::{MutationEvent, User},
    outbox::{Delivery, Outbox, OUTBOX_CAPACITY},
    replica::{Replica, ReplicaHandle},
    service::{Discard, MutationSink, UserService},
};

impl MutationSink for Outbox<WorkerToPrimary> {
    fn emit(&mut self, event: MutationEvent) {
        // Drops are logged by the outbox; the client response does not wait on them.
        let _ = self.offer(WorkerToPrimary::Mutation(event));
    }
}

/// Routes for `/api/users` and `/api/users/:id`. Any other path is
/// [`ApiError::InvalidEndpoint`]. Only GET, POST, PUT and DELETE are served;
/// HEAD is rejected explicitly because `get` would answer it otherwise.
pub fn router(replica: ReplicaHandle) -> Router {
    Router::new()
        .route(
            "/api/users",
            get(list_users)
                .post(create_user)
                .put(missing_id)
                .delete(missing_id)
                .head(invalid_method)
                .fallback(invalid_method),
        )
        // `/api/users/` is the item path with an empty id.
        .route(
            "/api/users/",
            get(missing_id)
                .put(missing_id)
                .delete(missing_id)
                .post(invalid_endpoint)
                .head(invalid_method)
                .fallback(invalid_method),
        )
        .route(
            "/api/users/:id",
            get(get_user)
                .put(update_user)
                .delete(delete_user)
                .post(invalid_endpoint)
                .head(invalid_method)
                .fallback(invalid_method),
        )
        .fallback(invalid_endpoint)
        .layer(TraceLayer::new_for_http())
        .with_state(replica)
}

async fn list_users(State(replica): State<ReplicaHandle>) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(replica.list().await?))
}

async fn create_user(
    State(replica): State<ReplicaHandle>,
    body: Bytes,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = replica.create(body).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(
    State(replica): State<ReplicaHandle>,
    Path(id): Path<String>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(replica.get(id).await?))
}

async fn update_user(
    State(replica): State<ReplicaHandle>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<User>, ApiError> {
    Ok(Json(replica.update(id, body).await?))
}

async fn delete_user(
    State(replica): State<ReplicaHandle>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    replica.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn missing_id() -> ApiError {
    ApiError::InvalidIdentifier
}

async fn invalid_method() -> ApiError {
    ApiError::InvalidMethod
}

async fn invalid_endpoint() -> ApiError {
    ApiError::InvalidEndpoint
}

/// Runs one cluster worker until the primary closes its stdin.
pub async fn run(args: WorkerArgs) -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, args.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("worker {} failed to bind {addr}", args.index))?;
    let port = listener.local_addr()?.port();

    let outbox = Outbox::spawn(tokio::io::stdout(), OUTBOX_CAPACITY, "primary");
    let replica = Replica::spawn(UserService::new(outbox.clone()));

    if outbox.offer(WorkerToPrimary::Ready {
        index: args.index,
        port,
    }) != Delivery::Queued
    {
        bail!("worker {} could not announce itself to the primary", args.index);
    }
    info!(index = args.index, %addr, "worker listening");

    let follower = follow_primary(BufReader::new(tokio::io::stdin()), replica.clone());
    axum::serve(listener, router(replica))
        .with_graceful_shutdown(follower)
        .await
        .context("worker server failed")?;

    info!(index = args.index, "worker stopped");
    Ok(())
}

/// Applies every snapshot read from `reader` to the replica. Resolves when
/// the stream ends or fails, which is the worker's cue to shut down.
pub async fn follow_primary<R>(mut reader: R, replica: ReplicaHandle)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match read_message::<_, PrimaryToWorker>(&mut reader).await {
            Ok(Some(PrimaryToWorker::Snapshot { users })) => {
                debug!(records = users.len(), "received snapshot");
                if replica.replace_all(users).await.is_err() {
                    warn!("replica is gone, no longer following the primary");
                    return;
                }
            }
            Ok(None) => {
                info!("primary closed the replication stream");
                return;
            }
            Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                warn!(error = ?err, "skipping undecodable replication message");
            }
            Err(err) => {
                warn!(error = ?err, "replication stream failed");
                return;
            }
        }
    }
}

/// Serves the API from a single process with no replication.
pub async fn serve_standalone<F>(listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let replica = Replica::spawn(UserService::new(Discard));
    info!(addr = %listener.local_addr()?, "serving users api");
    axum::serve(listener, router(replica))
        .with_graceful_shutdown(shutdown)
        .await
        .context("server failed")?;
    Ok(())
}
