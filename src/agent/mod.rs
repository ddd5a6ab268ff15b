//! Agent orchestration: wires the pipeline stages together and supervises
//! their workers.
//!
//! Stages communicate only through FIFO queues. Shutdown is cooperative:
//! the trace reader stops first so no new input enters, then each consumer
//! drains its queue to end-of-stream.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunk;
use crate::config::Config;
use crate::exec::ShellRunner;
use crate::merge::sweep::StatusSweeper;
use crate::merge::MergeEngine;
use crate::parse;
use crate::probe::ProbeScheduler;
use crate::publish::{ChangeSink, LogSink};
use crate::stats::PipelineStats;
use crate::store::{DeviceStore, MemoryStore};

/// Agent owns the pipeline: trace reader, chunk assembler, parser, merge
/// engine, status sweeper, probe scheduler, and the stats reporter.
pub struct Agent {
    cfg: Config,
    store: Arc<MemoryStore>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Agent {
    /// Creates a new Agent over an in-memory device store.
    pub fn new(cfg: Config) -> Result<Self> {
        cfg.validate().context("validating configuration")?;

        Ok(Self {
            cfg,
            store: Arc::new(MemoryStore::new()),
            stats: Arc::new(PipelineStats::new()),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }

    /// Token cancelled when the agent is stopping (externally via `stop`,
    /// or internally on a fatal scheduler error).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start all workers, consuming the trace from `input`.
    pub async fn start<I>(&mut self, input: I) -> Result<()>
    where
        I: AsyncRead + Send + Unpin + 'static,
    {
        let (line_tx, mut line_rx) =
            mpsc::channel::<String>(self.cfg.pipeline.line_queue_capacity);
        let (chunk_tx, mut chunk_rx) =
            mpsc::channel::<chunk::MessageChunk>(self.cfg.pipeline.chunk_queue_capacity);
        let (parsed_tx, mut parsed_rx) =
            mpsc::channel::<parse::ParsedAttributes>(self.cfg.pipeline.chunk_queue_capacity);
        let (delta_tx, mut delta_rx) = mpsc::unbounded_channel();

        let store: Arc<dyn DeviceStore> = self.store.clone();
        let sink: Arc<dyn ChangeSink> = Arc::new(LogSink);

        // 1. Trace reader: the only stage that reacts to cancellation
        //    directly, so downstream consumers drain to end-of-stream.
        {
            let cancel = self.cancel.clone();
            let stats = Arc::clone(&self.stats);
            self.tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(input).lines();
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!("trace reader stopped");
                            return;
                        }
                        result = lines.next_line() => match result {
                            Ok(Some(line)) => {
                                stats.record_line();
                                if line_tx.send(line).await.is_err() {
                                    return;
                                }
                            }
                            Ok(None) => {
                                info!("trace source closed, treating as end of stream");
                                return;
                            }
                            Err(e) => {
                                warn!(error = %e, "trace source read error, treating as end of stream");
                                return;
                            }
                        }
                    }
                }
            }));
        }

        // 2. Chunk assembler.
        {
            let stats = Arc::clone(&self.stats);
            self.tasks.push(tokio::spawn(async move {
                chunk::run(&mut line_rx, &chunk_tx, &stats).await;
            }));
        }

        // 3. Attribute parser.
        {
            let stats = Arc::clone(&self.stats);
            self.tasks.push(tokio::spawn(async move {
                parse::run(&mut chunk_rx, &parsed_tx, &stats).await;
            }));
        }

        // 4. Merge engine.
        {
            let engine = MergeEngine::new(
                Arc::clone(&store),
                delta_tx.clone(),
                Arc::clone(&sink),
                Arc::clone(&self.stats),
            );
            self.tasks.push(tokio::spawn(async move {
                engine.run(&mut parsed_rx).await;
            }));
        }

        // 5. Status sweeper (startup reconciliation, then periodic).
        {
            let sweeper = StatusSweeper::new(
                Arc::clone(&store),
                self.cfg.merge.clone(),
                delta_tx,
                Arc::clone(&sink),
            );
            let cancel = self.cancel.child_token();
            self.tasks.push(tokio::spawn(async move {
                sweeper.run(cancel).await;
            }));
        }

        // 6. Probe scheduler: enqueue loop, drain loop, re-ping sweep.
        {
            let scheduler = Arc::new(ProbeScheduler::new(
                self.cfg.probe.clone(),
                self.cfg.adapter.clone(),
                ShellRunner,
                Arc::clone(&store),
                Arc::clone(&self.stats),
                self.cancel.clone(),
            ));

            let enqueue = Arc::clone(&scheduler);
            self.tasks.push(tokio::spawn(async move {
                enqueue.run_enqueue_loop(&mut delta_rx).await;
            }));

            let drain = Arc::clone(&scheduler);
            let cancel = self.cancel.child_token();
            self.tasks.push(tokio::spawn(async move {
                drain.run_drain_loop(cancel).await;
            }));

            let reping = Arc::clone(&scheduler);
            let cancel = self.cancel.child_token();
            self.tasks.push(tokio::spawn(async move {
                reping.run_reping_sweep(cancel).await;
            }));
        }

        // 7. Periodic stats reporter.
        self.spawn_stats_reporter();

        info!(adapter = %self.cfg.adapter, "agent fully started");

        Ok(())
    }

    /// Gracefully stop all workers, draining in-flight queue contents.
    pub async fn stop(&mut self) {
        self.cancel.cancel();

        for task in self.tasks.drain(..) {
            let _ = task.await;
        }

        let remaining = self.stats.snapshot();
        if !remaining.is_empty() {
            info!(counts = ?remaining, "pipeline drained");
        }
        info!(devices = self.store.len(), "agent stopped");
    }

    fn spawn_stats_reporter(&mut self) {
        let cancel = self.cancel.child_token();
        let stats = Arc::clone(&self.stats);
        let interval = self.cfg.pipeline.stats_interval;

        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let snapshot = stats.snapshot();
                        if !snapshot.is_empty() {
                            info!(counts = ?snapshot, "pipeline stats");
                        }
                    }
                }
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// End of trace input must not stop the agent; sweeps and probes keep
    /// running until an explicit stop.
    #[tokio::test]
    async fn test_agent_survives_end_of_stream() {
        let mut cfg = Config::default();
        // Keep the drain loop from shelling out during the test window.
        cfg.probe.idle_delay = Duration::from_secs(3600);
        cfg.probe.discovery_command = Some("true".to_string());

        let trace = b"" as &[u8];
        let mut agent = Agent::new(cfg).expect("valid config");
        agent.start(trace).await.expect("agent starts");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!agent.cancel_token().is_cancelled());

        agent.stop().await;
    }
}
