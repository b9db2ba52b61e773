//! Fire-and-forget delivery of protocol messages.
//!
//! An [`Outbox`] is a bounded queue drained by a background task that
//! writes each message to a pipe. Offering never waits: when the queue is
//! full or the pipe is gone the message is dropped and the caller gets a
//! [`Delivery::Dropped`] saying why. There is no acknowledgment and no retry.

use std::sync::Arc;

use serde::Serialize;
use tokio::{io::AsyncWrite, sync::mpsc};
use tracing::{debug, warn};

use crate::message::write_message;

/// Default queue depth for one peer.
pub const OUTBOX_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The peer is not keeping up; this message is lost.
    QueueFull,
    /// The pipe failed or was closed; every later message is lost too.
    Disconnected,
}

pub struct Outbox<T> {
    tx: mpsc::Sender<T>,
    peer: Arc<str>,
}

impl<T> Clone for Outbox<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            peer: Arc::clone(&self.peer),
        }
    }
}

impl<T> Outbox<T>
where
    T: Serialize + Send + Sync + 'static,
{
    /// Starts the delivery task. Must be called inside a Tokio runtime.
    pub fn spawn<W>(writer: W, capacity: usize, peer: impl Into<Arc<str>>) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity);
        let peer = peer.into();
        tokio::spawn(deliver(writer, rx, Arc::clone(&peer)));
        Self { tx, peer }
    }

    pub fn offer(&self, message: T) -> Delivery {
        match self.tx.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(peer = %self.peer, "outbox full, dropping message");
                Delivery::Dropped(DropReason::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(peer = %self.peer, "outbox disconnected, dropping message");
                Delivery::Dropped(DropReason::Disconnected)
            }
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

async fn deliver<W, T>(mut writer: W, mut rx: mpsc::Receiver<T>, peer: Arc<str>)
where
    W: AsyncWrite + Unpin,
    T: Serialize + Sync,
{
    while let Some(message) = rx.recv().await {
        if let Err(err) = write_message(&mut writer, &message).await {
            warn!(%peer, error = ?err, "delivery failed, closing outbox");
            break;
        }
    }
    // Dropping `rx` here turns every later offer into `Disconnected`.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{read_message, PrimaryToWorker};
    use std::time::Duration;
    use tokio::{io::BufReader, time::timeout};

    #[tokio::test]
    async fn delivers_in_order() {
        let (writer, reader) = tokio::io::duplex(4096);
        let mut reader = BufReader::new(reader);
        let outbox = Outbox::spawn(writer, 8, "test");

        assert_eq!(
            outbox.offer(PrimaryToWorker::Snapshot { users: vec![] }),
            Delivery::Queued
        );
        assert_eq!(
            outbox.offer(PrimaryToWorker::Snapshot { users: vec![] }),
            Delivery::Queued
        );

        for _ in 0..2 {
            let message = timeout(
                Duration::from_secs(1),
                read_message::<_, PrimaryToWorker>(&mut reader),
            )
            .await
            .expect("timely delivery")
            .expect("read");
            assert_eq!(message, Some(PrimaryToWorker::Snapshot { users: vec![] }));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn offers_from_other_tasks_arrive() {
        let (writer, reader) = tokio::io::duplex(4096);
        let mut reader = BufReader::new(reader);
        let outbox = Outbox::spawn(writer, 8, "shared");

        let sender = outbox.clone();
        tokio::spawn(async move { sender.offer(PrimaryToWorker::Snapshot { users: vec![] }) })
            .await
            .expect("offering task");

        let message = timeout(
            Duration::from_secs(1),
            read_message::<_, PrimaryToWorker>(&mut reader),
        )
        .await
        .expect("timely delivery")
        .expect("read");
        assert_eq!(message, Some(PrimaryToWorker::Snapshot { users: vec![] }));
    }

    #[tokio::test]
    async fn broken_pipe_turns_into_disconnected() {
        let (writer, reader) = tokio::io::duplex(64);
        drop(reader);
        let outbox = Outbox::spawn(writer, 8, "gone");

        outbox.offer(PrimaryToWorker::Snapshot { users: vec![] });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while outbox.is_connected() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "delivery task should stop after a failed write"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(
            outbox.offer(PrimaryToWorker::Snapshot { users: vec![] }),
            Delivery::Dropped(DropReason::Disconnected)
        );
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_waiting() {
        // Nobody reads the pipe, so the delivery task stalls once the
        // duplex buffer is full and the queue fills up behind it.
        let (writer, _reader) = tokio::io::duplex(1);
        let outbox = Outbox::spawn(writer, 1, "slow");

        let mut dropped = false;
        for _ in 0..16 {
            if outbox.offer(PrimaryToWorker::Snapshot { users: vec![] })
                == Delivery::Dropped(DropReason::QueueFull)
            {
                dropped = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(dropped);
    }
}
