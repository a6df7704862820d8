//! Blocking-to-async bridge onto a single-threaded scheduler.
//!
//! The scheduler is a dedicated OS thread running a current-thread tokio
//! runtime inside a [`LocalSet`]. A context object `C` is built on that
//! thread and never leaves it, so it may hold `Rc`/`RefCell` state. Worker
//! threads reach it only through [`BridgeHandle::invoke`], which posts a job
//! and blocks until the job's future completes.

use crate::errors::BridgeError;
use futures::future::{FutureExt, LocalBoxFuture};
use std::any::Any;
use std::future::Future;
use std::io;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::LocalSet;

type Job<C> = Box<dyn FnOnce(Rc<C>) -> LocalBoxFuture<'static, ()> + Send>;

enum Message<C> {
    Job(Job<C>),
    Shutdown,
}

/// Cloneable, thread-safe submission handle.
pub struct BridgeHandle<C> {
    tx: mpsc::UnboundedSender<Message<C>>,
    scheduler: ThreadId,
}

impl<C> Clone for BridgeHandle<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            scheduler: self.scheduler,
        }
    }
}

impl<C: 'static> BridgeHandle<C> {
    /// Run `job` on the scheduler and block the calling thread until it
    /// finishes.
    ///
    /// Each job runs as its own local task, so a job that is waiting does
    /// not hold up the others. Must not be called from inside an async
    /// runtime.
    pub fn invoke<F, Fut, R>(&self, job: F) -> Result<R, BridgeError>
    where
        F: FnOnce(Rc<C>) -> Fut + Send + 'static,
        Fut: Future<Output = R> + 'static,
        R: Send + 'static,
    {
        if thread::current().id() == self.scheduler {
            return Err(BridgeError::Reentrant);
        }

        let (done_tx, done_rx) = oneshot::channel();
        let job: Job<C> = Box::new(move |context: Rc<C>| {
            async move {
                let outcome = AssertUnwindSafe(async move { job(context).await })
                    .catch_unwind()
                    .await
                    .map_err(|payload| BridgeError::Panicked(panic_message(payload)));
                // The caller may have given up; nothing to report then.
                let _ = done_tx.send(outcome);
            }
            .boxed_local()
        });

        self.tx
            .send(Message::Job(job))
            .map_err(|_| BridgeError::Closed)?;

        done_rx.blocking_recv().map_err(|_| BridgeError::Cancelled)?
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Owner of the scheduler thread. Dropping it shuts the scheduler down.
pub struct AsyncBridge<C> {
    handle: BridgeHandle<C>,
    thread: Option<JoinHandle<()>>,
}

impl<C: 'static> AsyncBridge<C> {
    /// Start the scheduler thread and build its context with `init`.
    ///
    /// `init` runs inside the `LocalSet`, so it may call
    /// `tokio::task::spawn_local`. Returns once the context exists.
    pub fn spawn<I>(name: &str, init: I) -> io::Result<Self>
    where
        I: FnOnce() -> Rc<C> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message<C>>();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<io::Result<()>>(1);

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let local = LocalSet::new();
                local.block_on(&runtime, async move {
                    let context = init();
                    let _ = ready_tx.send(Ok(()));

                    while let Some(message) = rx.recv().await {
                        match message {
                            Message::Job(job) => {
                                tokio::task::spawn_local(job(Rc::clone(&context)));
                            }
                            Message::Shutdown => break,
                        }
                    }
                    log::debug!("scheduler loop finished");
                });
                // Dropping the LocalSet cancels unfinished jobs; their callers
                // observe BridgeError::Cancelled.
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "scheduler thread exited during startup",
                ));
            }
        }

        let scheduler = thread.thread().id();
        log::debug!("scheduler thread '{}' started", name);

        Ok(Self {
            handle: BridgeHandle { tx, scheduler },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> BridgeHandle<C> {
        self.handle.clone()
    }

    /// Shorthand for `self.handle().invoke(job)`.
    pub fn invoke<F, Fut, R>(&self, job: F) -> Result<R, BridgeError>
    where
        F: FnOnce(Rc<C>) -> Fut + Send + 'static,
        Fut: Future<Output = R> + 'static,
        R: Send + 'static,
    {
        self.handle.invoke(job)
    }

    /// Stop accepting work and join the scheduler thread.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        let _ = self.handle.tx.send(Message::Shutdown);
        if thread::current().id() == self.handle.scheduler {
            return;
        }
        if thread.join().is_err() {
            log::warn!("scheduler thread panicked during shutdown");
        }
    }
}

impl<C> Drop for AsyncBridge<C> {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.handle.tx.send(Message::Shutdown);
            if thread::current().id() != self.handle.scheduler {
                let _ = thread.join();
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
