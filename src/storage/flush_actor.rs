use std::io;
use std::sync::Arc;
use std::time::Duration;

use actix::fut::ready;
use actix::{
    Actor, ActorContext, ActorFuture, ActorFutureExt, AsyncContext, Context, Handler, Message,
    ResponseActFuture, WrapFuture,
};

use crate::dumper::{DumpError, Dumper};
use crate::storage::memory::MetricStore;

#[derive(Debug)]
pub enum FlushOutcome {
    Saved { metrics: usize },
    /// The previous flush was still running.
    Skipped,
    Failed(DumpError),
}

/// Background flush loop of the periodic persistence mode.
///
/// Saves run on the blocking pool so the actor keeps receiving ticks; at most
/// one save is in flight and ticks arriving meanwhile are dropped. A failed
/// save only gets logged, the next tick starts over from the current store.
pub struct FlushActor {
    store: Arc<MetricStore>,
    dumper: Arc<dyn Dumper>,
    interval: Duration,
    flushing: bool,
}

impl FlushActor {
    pub fn new(store: Arc<MetricStore>, dumper: Arc<dyn Dumper>, interval: Duration) -> Self {
        Self {
            store,
            dumper,
            interval,
            flushing: false,
        }
    }

    fn begin_flush(&mut self) -> Option<impl ActorFuture<Self, Output = FlushOutcome>> {
        if self.flushing {
            log::warn!("Previous flush still running, skipping");
            return None;
        }
        self.flushing = true;

        let snapshot = self.store.snapshot();
        let metrics = snapshot.len();
        let dumper = self.dumper.clone();
        let flush = tokio::task::spawn_blocking(move || dumper.save_data(&snapshot))
            .into_actor(self)
            .map(move |joined, act, _ctx| {
                act.flushing = false;
                let outcome = match joined {
                    Ok(Ok(())) => FlushOutcome::Saved { metrics },
                    Ok(Err(err)) => FlushOutcome::Failed(err),
                    Err(err) => FlushOutcome::Failed(DumpError::Io(io::Error::new(
                        io::ErrorKind::Other,
                        err,
                    ))),
                };
                match &outcome {
                    FlushOutcome::Saved { metrics } => log::debug!("Flushed {metrics} metrics"),
                    FlushOutcome::Failed(err) => log::error!("Error flushing metrics - {err}"),
                    FlushOutcome::Skipped => {}
                }
                outcome
            });
        Some(flush)
    }
}

impl Actor for FlushActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        log::debug!("FlushActor started, flushing every {:?}", self.interval);
        ctx.run_interval(self.interval, |act, ctx| {
            if let Some(flush) = act.begin_flush() {
                ctx.spawn(flush.map(|_outcome, _act, _ctx| ()));
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        log::debug!("FlushActor stopped");
    }
}

/// Flushes outside the timer, subject to the same single-flight rule.
#[derive(Message)]
#[rtype(result = "FlushOutcome")]
pub struct FlushNow;

impl Handler<FlushNow> for FlushActor {
    type Result = ResponseActFuture<Self, FlushOutcome>;

    fn handle(&mut self, _msg: FlushNow, _ctx: &mut Self::Context) -> Self::Result {
        match self.begin_flush() {
            Some(flush) => Box::pin(flush),
            None => Box::pin(ready(FlushOutcome::Skipped)),
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct StopFlushing;

impl Handler<StopFlushing> for FlushActor {
    type Result = ();

    fn handle(&mut self, _msg: StopFlushing, ctx: &mut Self::Context) -> Self::Result {
        ctx.stop();
    }
}
