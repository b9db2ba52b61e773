//! Round-robin reverse proxy in front of the worker pool.

use std::{
    net::SocketAddr,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Request, State},
    response::Response,
    Router,
};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::ApiError;

/// Cursor over a pool whose size is fixed at construction.
#[derive(Debug)]
pub struct RoundRobin {
    size: usize,
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new(size: NonZeroUsize) -> Self {
        Self {
            size: size.get(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the current position and advances to `(cursor + 1) % size`.
    pub fn next(&self) -> usize {
        let size = self.size;
        match self
            .cursor
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cursor| {
                Some((cursor + 1) % size)
            }) {
            Ok(previous) | Err(previous) => previous,
        }
    }
}

#[derive(Debug)]
pub struct Dispatcher {
    targets: Vec<SocketAddr>,
    cursor: RoundRobin,
}

impl Dispatcher {
    pub fn new(targets: Vec<SocketAddr>) -> Result<Self> {
        let size = NonZeroUsize::new(targets.len()).context("dispatcher needs at least one worker")?;
        Ok(Self {
            targets,
            cursor: RoundRobin::new(size),
        })
    }

    pub fn targets(&self) -> &[SocketAddr] {
        &self.targets
    }

    pub fn next_target(&self) -> SocketAddr {
        self.targets[self.cursor.next()]
    }

    /// Proxies one request to the next worker and hands back its response
    /// untouched. The cursor advances whether or not the worker answers.
    pub async fn forward(&self, request: Request) -> Result<Response, ApiError> {
        let target = self.next_target();
        debug!(%target, method = %request.method(), uri = %request.uri(), "dispatching");

        match send_upstream(target, request).await {
            Ok(response) => Ok(response.map(Body::new)),
            Err(err) => {
                warn!(%target, error = ?err, "dispatch failed");
                Err(ApiError::Dispatch(target))
            }
        }
    }
}

async fn send_upstream(target: SocketAddr, request: Request) -> Result<hyper::Response<Incoming>> {
    let stream = TcpStream::connect(target)
        .await
        .context("failed to connect to worker")?;
    let (mut sender, connection) = hyper::client::conn::http1::handshake::<_, Body>(TokioIo::new(stream))
        .await
        .context("http handshake with worker failed")?;

    tokio::spawn(async move {
        if let Err(err) = connection.await {
            debug!(%target, error = ?err, "upstream connection closed with error");
        }
    });

    sender
        .send_request(request)
        .await
        .context("worker did not answer")
}

/// Every path and method goes to [`Dispatcher::forward`].
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new().fallback(proxy).with_state(dispatcher)
}

async fn proxy(
    State(dispatcher): State<Arc<Dispatcher>>,
    request: Request,
) -> Result<Response, ApiError> {
    dispatcher.forward(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_visits_every_slot_in_order() {
        let cursor = RoundRobin::new(NonZeroUsize::new(3).unwrap());
        let visited: Vec<usize> = (0..7).map(|_| cursor.next()).collect();
        assert_eq!(visited, [0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn single_worker_pool_always_picks_it() {
        let cursor = RoundRobin::new(NonZeroUsize::new(1).unwrap());
        assert!((0..4).all(|_| cursor.next() == 0));
    }

    #[test]
    fn dispatcher_rejects_an_empty_pool() {
        assert!(Dispatcher::new(Vec::new()).is_err());
    }

    #[test]
    fn targets_rotate() {
        let targets: Vec<SocketAddr> = vec![
            "127.0.0.1:4001".parse().unwrap(),
            "127.0.0.1:4002".parse().unwrap(),
        ];
        let dispatcher = Dispatcher::new(targets.clone()).unwrap();
        let picked: Vec<SocketAddr> = (0..4).map(|_| dispatcher.next_target()).collect();
        assert_eq!(picked, [targets[0], targets[1], targets[0], targets[1]]);
    }
}
