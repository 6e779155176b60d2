//! Async facade over the blocking bus API.
//!
//! A subscription runs the poll loop on tokio's blocking pool and forwards
//! each message through a bounded channel. Publishing opens a handle,
//! broadcasts and closes it, also on the blocking pool.

use std::future::Future;
use std::io;
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{BusError, Result};
use crate::flags::{IoFlags, OpenFlags};
use crate::handle::BusHandle;
use crate::poll_loop::Flow;

/// Messages buffered between the listener thread and the async consumer.
const SUBSCRIPTION_BUFFER: usize = 64;

/// A live registration on a bus.
///
/// Dropping the subscription (or calling [`Subscription::finish`]) ends the
/// loop at the next broadcast it receives. Until then the listener stays
/// registered and the blocking thread stays parked, which also holds up
/// runtime shutdown.
#[derive(Debug)]
pub struct Subscription {
    path: PathBuf,
    receiver: mpsc::Receiver<Vec<u8>>,
    task: JoinHandle<Result<()>>,
}

impl Subscription {
    /// Next message, or `None` once the listener loop has ended.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Stop consuming; the returned future resolves once the listener loop
    /// has deregistered, which happens at the next broadcast.
    pub fn finish(self) -> impl Future<Output = Result<()>> {
        let Subscription { receiver, task, .. } = self;
        drop(receiver);
        join(task)
    }
}

/// Subscribe to the bus at `name`.
///
/// Resolves once the listener is registered: every broadcast issued after
/// this returns is delivered to the subscription.
pub async fn subscribe(name: impl Into<PathBuf>, flags: IoFlags) -> Result<Subscription> {
    let path = name.into();
    let (ready_tx, ready_rx) = oneshot::channel();
    let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);

    let task = {
        let path = path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut handle = BusHandle::connect(&path, open_flags(OpenFlags::RDONLY, flags))?;
            let mut ready_tx = Some(ready_tx);
            handle.read(flags, |message| match message {
                None => {
                    if let Some(ready) = ready_tx.take() {
                        let _ = ready.send(());
                    }
                    Ok::<_, BusError>(Flow::Continue)
                }
                Some(bytes) => match sender.blocking_send(bytes.to_vec()) {
                    Ok(()) => Ok(Flow::Continue),
                    Err(_) => {
                        debug!(bus = %path.display(), "Subscriber gone, stopping");
                        Ok(Flow::Stop)
                    }
                },
            })
        })
    };

    if ready_rx.await.is_err() {
        // The loop ended before registering; surface its error.
        join(task).await?;
        return Err(BusError::NotListening);
    }

    info!(bus = %path.display(), "Subscribed");
    Ok(Subscription {
        path,
        receiver,
        task,
    })
}

/// Broadcast `message` on the bus at `name`.
pub async fn publish(
    name: impl Into<PathBuf>,
    message: impl Into<Vec<u8>>,
    flags: IoFlags,
) -> Result<()> {
    let path = name.into();
    let message = message.into();
    join(tokio::task::spawn_blocking(move || {
        let mut handle = BusHandle::connect(&path, open_flags(OpenFlags::WRONLY, flags))?;
        handle.write(&message, flags)
    }))
    .await
}

fn open_flags(access: OpenFlags, flags: IoFlags) -> OpenFlags {
    if flags.contains(IoFlags::INTR) {
        access | OpenFlags::INTR
    } else {
        access
    }
}

async fn join(task: JoinHandle<Result<()>>) -> Result<()> {
    task.await
        .map_err(|e| BusError::Io(io::Error::other(e)))?
}
