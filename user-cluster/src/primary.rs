//! The primary process: public listener, worker pool and replication hub.

use std::{
    future::Future,
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use sysinfo::System;
use tokio::{
    io::{AsyncBufRead, BufReader},
    net::TcpListener,
    process::{Child, Command},
    sync::mpsc,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    cli::ClusterArgs,
    dispatch::{self, Dispatcher},
    message::{read_message, PrimaryToWorker, WorkerToPrimary},
    model::MutationEvent,
    outbox::{Outbox, OUTBOX_CAPACITY},
    replication::ReplicationHub,
};

/// How long a freshly spawned worker gets to bind its port and say so.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

const EVENT_QUEUE: usize = 1024;
const WORKER_EXIT_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub host: IpAddr,
    /// Public port. Worker `i` listens on `port + i`.
    pub port: u16,
    pub workers: NonZeroUsize,
    /// Executable started for each worker with the `worker` subcommand.
    pub program: PathBuf,
    pub ready_timeout: Duration,
}

impl ClusterConfig {
    pub fn from_args(args: &ClusterArgs) -> Result<Self> {
        let program = std::env::current_exe().context("failed to locate the current executable")?;
        Ok(Self {
            host: args.listen.host,
            port: args.listen.port,
            workers: args.workers.unwrap_or_else(available_processing_units),
            program,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        })
    }
}

/// Logical CPUs on this host, never less than one.
pub fn available_processing_units() -> NonZeroUsize {
    let mut system = System::new();
    system.refresh_cpu();
    NonZeroUsize::new(system.cpus().len()).unwrap_or(NonZeroUsize::MIN)
}

/// Port of worker `index` (1-based) above `base`.
pub fn worker_port(base: u16, index: usize) -> Result<u16> {
    u16::try_from(index)
        .ok()
        .and_then(|offset| base.checked_add(offset))
        .with_context(|| format!("no port left for worker {index} above {base}"))
}

struct WorkerProcess {
    index: usize,
    addr: SocketAddr,
    child: Child,
    outbox: Outbox<PrimaryToWorker>,
}

pub struct Primary {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    hub: ReplicationHub,
    events: mpsc::Receiver<MutationEvent>,
    workers: Vec<(usize, Child)>,
}

impl Primary {
    /// Binds the public listener, then starts the workers one by one and
    /// waits for each to report ready.
    pub async fn launch(config: ClusterConfig) -> Result<Self> {
        let listener = TcpListener::bind((config.host, config.port))
            .await
            .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?;
        let base = listener.local_addr()?.port();

        let (events_tx, events) = mpsc::channel(EVENT_QUEUE);
        let mut targets = Vec::with_capacity(config.workers.get());
        let mut outboxes = Vec::with_capacity(config.workers.get());
        let mut workers = Vec::with_capacity(config.workers.get());

        for index in 1..=config.workers.get() {
            let port = worker_port(base, index)?;
            let worker = spawn_worker(
                &config.program,
                index,
                port,
                events_tx.clone(),
                config.ready_timeout,
            )
            .await?;

            targets.push(worker.addr);
            outboxes.push(worker.outbox);
            workers.push((worker.index, worker.child));
        }

        Ok(Self {
            listener,
            dispatcher: Arc::new(Dispatcher::new(targets)?),
            hub: ReplicationHub::new(outboxes),
            events,
            workers,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn worker_addrs(&self) -> &[SocketAddr] {
        self.dispatcher.targets()
    }

    /// Serves the dispatcher and runs the replication hub until `shutdown`
    /// resolves, then stops the workers.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Primary {
            listener,
            dispatcher,
            hub,
            events,
            workers,
        } = self;

        info!(
            addr = %listener.local_addr()?,
            workers = dispatcher.targets().len(),
            "primary listening"
        );

        let hub_task = tokio::spawn(hub.run(events));
        let served = axum::serve(listener, dispatch::router(dispatcher))
            .with_graceful_shutdown(shutdown)
            .await
            .context("dispatch server failed");

        info!("primary shutting down");
        // Dropping the hub closes every worker's stdin, which stops it.
        hub_task.abort();
        let _ = hub_task.await;
        stop_workers(workers).await;

        served
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn spawn_worker(
    program: &Path,
    index: usize,
    port: u16,
    events: mpsc::Sender<MutationEvent>,
    ready_timeout: Duration,
) -> Result<WorkerProcess> {
    let mut child = Command::new(program)
        .arg("worker")
        .arg("--port")
        .arg(port.to_string())
        .arg("--index")
        .arg(index.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn worker {index}"))?;

    let stdin = child.stdin.take().context("worker stdin was not captured")?;
    let stdout = child.stdout.take().context("worker stdout was not captured")?;
    let mut reader = BufReader::new(stdout);

    let ready = timeout(ready_timeout, read_message::<_, WorkerToPrimary>(&mut reader))
        .await
        .with_context(|| format!("worker {index} did not report ready in time"))?
        .with_context(|| format!("failed to read ready from worker {index}"))?;

    let addr = match ready {
        Some(WorkerToPrimary::Ready {
            index: reported,
            port,
        }) if reported == index => SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        Some(other) => bail!("worker {index} sent {other:?} instead of ready"),
        None => bail!("worker {index} exited before reporting ready"),
    };
    info!(index, %addr, pid = ?child.id(), "worker ready");

    tokio::spawn(forward_mutations(index, reader, events));

    Ok(WorkerProcess {
        index,
        addr,
        child,
        outbox: Outbox::spawn(stdin, OUTBOX_CAPACITY, format!("worker-{index}")),
    })
}

/// Feeds one worker's mutation reports into the hub queue until the worker
/// closes its stdout.
async fn forward_mutations<R>(index: usize, mut reader: R, events: mpsc::Sender<MutationEvent>)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match read_message::<_, WorkerToPrimary>(&mut reader).await {
            Ok(Some(WorkerToPrimary::Mutation(event))) => {
                if events.send(event).await.is_err() {
                    debug!(index, "replication hub stopped");
                    return;
                }
            }
            Ok(Some(WorkerToPrimary::Ready { .. })) => {
                warn!(index, "ignoring repeated ready from worker");
            }
            Ok(None) => {
                warn!(index, "worker exited");
                return;
            }
            Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                warn!(index, error = ?err, "skipping undecodable worker message");
            }
            Err(err) => {
                warn!(index, error = ?err, "lost contact with worker");
                return;
            }
        }
    }
}

async fn stop_workers(workers: Vec<(usize, Child)>) {
    for (index, mut child) in workers {
        match timeout(WORKER_EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => debug!(index, %status, "worker stopped"),
            Ok(Err(err)) => warn!(index, error = ?err, "failed to wait for worker"),
            Err(_) => {
                warn!(index, "worker did not stop in time, killing it");
                if let Err(err) = child.kill().await {
                    warn!(index, error = ?err, "failed to kill worker");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{UserDraft, UserId};

    #[test]
    fn worker_ports_sit_above_the_base() {
        assert_eq!(worker_port(4000, 1).unwrap(), 4001);
        assert_eq!(worker_port(4000, 8).unwrap(), 4008);
        assert!(worker_port(u16::MAX - 1, 2).is_err());
    }

    #[test]
    fn there_is_always_a_processing_unit() {
        assert!(available_processing_units().get() >= 1);
    }

    #[tokio::test]
    async fn forwards_mutations_until_eof() {
        let user = UserDraft {
            username: "A".into(),
            age: 22.into(),
            hobbies: vec![],
        }
        .into_user(UserId::new_v4());

        let mut wire = Vec::new();
        for message in [
            WorkerToPrimary::Mutation(MutationEvent::created(user.clone())),
            WorkerToPrimary::Ready { index: 1, port: 4001 },
            WorkerToPrimary::Mutation(MutationEvent::deleted(user.clone())),
        ] {
            wire.extend(serde_json::to_vec(&message).unwrap());
            wire.push(b'\n');
        }

        let (tx, mut rx) = mpsc::channel(8);
        forward_mutations(1, BufReader::new(&wire[..]), tx).await;

        assert_eq!(rx.recv().await, Some(MutationEvent::created(user.clone())));
        assert_eq!(rx.recv().await, Some(MutationEvent::deleted(user)));
        assert_eq!(rx.recv().await, None);
    }
}
