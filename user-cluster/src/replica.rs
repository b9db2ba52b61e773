//! The task that owns a process's user data.
//!
//! One [`Replica`] task holds the [`UserStore`] and the [`UserService`]
//! operating on it. Everything else (HTTP handlers, the replication reader)
//! talks to it through a cloneable [`ReplicaHandle`], so requests and
//! snapshot replacements are applied one at a time without a lock.

use axum::body::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::{
    error::ApiError,
    model::User,
    service::{MutationSink, UserService},
    store::UserStore,
};

const REQUEST_QUEUE: usize = 256;

enum ReplicaRequest {
    List {
        respond_to: oneshot::Sender<Vec<User>>,
    },
    Get {
        id: String,
        respond_to: oneshot::Sender<Result<User, ApiError>>,
    },
    Create {
        payload: Bytes,
        respond_to: oneshot::Sender<Result<User, ApiError>>,
    },
    Update {
        id: String,
        payload: Bytes,
        respond_to: oneshot::Sender<Result<User, ApiError>>,
    },
    Delete {
        id: String,
        respond_to: oneshot::Sender<Result<(), ApiError>>,
    },
    ReplaceAll {
        users: Vec<User>,
        respond_to: oneshot::Sender<()>,
    },
}

#[derive(Clone)]
pub struct ReplicaHandle {
    request_tx: mpsc::Sender<ReplicaRequest>,
}

impl ReplicaHandle {
    pub async fn list(&self) -> Result<Vec<User>, ApiError> {
        self.call(|respond_to| ReplicaRequest::List { respond_to })
            .await
    }

    pub async fn get(&self, id: String) -> Result<User, ApiError> {
        self.call(|respond_to| ReplicaRequest::Get { id, respond_to })
            .await?
    }

    pub async fn create(&self, payload: Bytes) -> Result<User, ApiError> {
        self.call(|respond_to| ReplicaRequest::Create {
            payload,
            respond_to,
        })
        .await?
    }

    pub async fn update(&self, id: String, payload: Bytes) -> Result<User, ApiError> {
        self.call(|respond_to| ReplicaRequest::Update {
            id,
            payload,
            respond_to,
        })
        .await?
    }

    pub async fn delete(&self, id: String) -> Result<(), ApiError> {
        self.call(|respond_to| ReplicaRequest::Delete { id, respond_to })
            .await?
    }

    /// Replaces the local collection with a snapshot from the primary.
    pub async fn replace_all(&self, users: Vec<User>) -> Result<(), ApiError> {
        self.call(|respond_to| ReplicaRequest::ReplaceAll { users, respond_to })
            .await
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> ReplicaRequest,
    ) -> Result<T, ApiError> {
        let (respond_to, response) = oneshot::channel();
        self.request_tx
            .send(request(respond_to))
            .await
            .map_err(|_| ApiError::Unavailable)?;
        response.await.map_err(|_| ApiError::Unavailable)
    }
}

pub struct Replica<S> {
    store: UserStore,
    service: UserService<S>,
    request_rx: mpsc::Receiver<ReplicaRequest>,
}

impl<S> Replica<S>
where
    S: MutationSink + Send + 'static,
{
    /// Starts the owning task with an empty store and returns its handle.
    /// The task stops once every handle has been dropped.
    pub fn spawn(service: UserService<S>) -> ReplicaHandle {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE);
        let replica = Replica {
            store: UserStore::new(),
            service,
            request_rx,
        };
        tokio::spawn(replica.run());
        ReplicaHandle { request_tx }
    }

    async fn run(mut self) {
        while let Some(request) = self.request_rx.recv().await {
            self.handle(request);
        }
        debug!("replica stopped: no handles left");
    }

    fn handle(&mut self, request: ReplicaRequest) {
        // A dropped receiver means the HTTP client went away; nothing to do.
        match request {
            ReplicaRequest::List { respond_to } => {
                let _ = respond_to.send(self.service.list(&self.store));
            }
            ReplicaRequest::Get { id, respond_to } => {
                let _ = respond_to.send(self.service.get(&self.store, &id));
            }
            ReplicaRequest::Create {
                payload,
                respond_to,
            } => {
                let _ = respond_to.send(self.service.create(&mut self.store, &payload));
            }
            ReplicaRequest::Update {
                id,
                payload,
                respond_to,
            } => {
                let _ = respond_to.send(self.service.update(&mut self.store, &id, &payload));
            }
            ReplicaRequest::Delete { id, respond_to } => {
                let _ = respond_to.send(self.service.delete(&mut self.store, &id));
            }
            ReplicaRequest::ReplaceAll { users, respond_to } => {
                debug!(records = users.len(), "replacing local replica");
                self.store.replace_all(users);
                let _ = respond_to.send(());
            }
        }
    }
}
