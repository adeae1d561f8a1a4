//! Control plane: one queue of commands, one consumer.
//!
//! Event sources hold a [`CommandSender`]; a ticker task feeds `Tick`
//! commands into the same queue. The loop dispatches each command through
//! [`Engine::handle`] and keeps going when one fails.

use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, field, info, info_span, warn};

use super::Engine;
use crate::error::{Error, Result};
use crate::event::{Command, CommandOutcome};
use crate::telemetry::metrics;

/// A queued command and, for request/reply callers, where to send the result.
#[derive(Debug)]
pub struct Envelope {
    pub command: Command,
    pub reply: Option<oneshot::Sender<Result<CommandOutcome>>>,
}

/// Producer handle into the control plane.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Envelope>,
}

impl CommandSender {
    /// Enqueue and forget.
    pub async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(Envelope {
                command,
                reply: None,
            })
            .await
            .map_err(|_| Error::Other("control plane is not running".to_string()))
    }

    /// Enqueue and wait for the engine's answer.
    pub async fn request(&self, command: Command) -> Result<CommandOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                command,
                reply: Some(reply),
            })
            .await
            .map_err(|_| Error::Other("control plane is not running".to_string()))?;
        rx.await
            .map_err(|_| Error::Other("control plane dropped the request".to_string()))?
    }
}

pub struct ControlPlane {
    engine: Arc<Engine>,
    rx: mpsc::Receiver<Envelope>,
    tx: mpsc::Sender<Envelope>,
    shutdown: CancellationToken,
    ticker: bool,
}

impl ControlPlane {
    pub fn new(engine: Arc<Engine>) -> Self {
        let (tx, rx) = mpsc::channel(engine.config().command_buffer.max(1));
        Self {
            engine,
            rx,
            tx,
            shutdown: CancellationToken::new(),
            ticker: true,
        }
    }

    /// Run without the internal ticker; ticks then only come from senders.
    pub fn without_ticker(mut self) -> Self {
        self.ticker = false;
        self
    }

    pub fn sender(&self) -> CommandSender {
        CommandSender {
            tx: self.tx.clone(),
        }
    }

    /// Token that stops the loop (and any bulk flip in flight) when cancelled.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run the loop until shutdown.
    pub async fn run(self) -> Result<()> {
        let Self {
            engine,
            mut rx,
            tx,
            shutdown,
            ticker,
        } = self;

        let ticker = ticker.then(|| {
            let sender = CommandSender { tx: tx.clone() };
            tokio::spawn(run_ticker(
                Arc::clone(&engine),
                sender,
                shutdown.child_token(),
            ))
        });
        drop(tx);

        info!(
            tick_interval_secs = engine.config().tick_interval_secs,
            "control plane started"
        );
        loop {
            let envelope = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("control plane shutting down");
                    break;
                }
                envelope = rx.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => {
                        info!("all command senders dropped, stopping");
                        break;
                    }
                },
            };
            dispatch(&engine, envelope, &shutdown).await;
        }

        if let Some(ticker) = ticker {
            ticker.abort();
        }
        Ok(())
    }
}

async fn dispatch(engine: &Engine, envelope: Envelope, shutdown: &CancellationToken) {
    let Envelope { command, reply } = envelope;
    let name = command.name();
    let span = info_span!("rotation.command", command = name, work_item = field::Empty);
    if let Some(work_item) = command.work_item() {
        span.record("work_item", field::display(work_item));
    }
    let started = Instant::now();
    let result = engine.handle(command, shutdown).instrument(span).await;
    metrics::operation_duration_ms().record(
        started.elapsed().as_secs_f64() * 1000.0,
        &[KeyValue::new("operation", name)],
    );
    match &result {
        Ok(outcome) => debug!(command = name, ?outcome, "command handled"),
        Err(e) if e.is_transient() => warn!(command = name, error = %e, "command failed, transient"),
        Err(e) => error!(command = name, error = %e, "command failed"),
    }
    if let Some(reply) = reply
        && reply.send(result).is_err()
    {
        debug!(command = name, "requester went away before the reply");
    }
}

async fn run_ticker(engine: Arc<Engine>, sender: CommandSender, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(engine.config().tick_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {}
        }
        let now = engine.clock().now();
        if let Err(e) = sender.send(Command::Tick { now: Some(now) }).await {
            warn!(error = %e, "ticker stopping");
            return;
        }
    }
}
