//! Active-probe scheduling.
//!
//! Device-change notifications enqueue info/liveness probes against
//! per-(address, command-class) rate limits; a single drain worker owns the
//! radio, fully emptying the info queue before each liveness ping and
//! running a passive discovery pass when both queues are idle.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ProbeConfig;
use crate::device::{DeviceDelta, Status, Transport};
use crate::exec::{is_expected_failure, CommandOutput, CommandRunner};
use crate::stats::PipelineStats;
use crate::store::DeviceStore;

/// Address-type assumptions tried in order when an LE info probe fails.
const LEINFO_ADDRESS_TYPES: &[&str] = &["--random", "--static", ""];

/// Active probe commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeCommand {
    Info,
    LeInfo,
    L2Ping,
}

impl ProbeCommand {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::LeInfo => "leinfo",
            Self::L2Ping => "l2ping",
        }
    }

    /// The rate-limit class this command shares with its siblings.
    pub const fn class(self) -> QueueClass {
        match self {
            Self::Info | Self::LeInfo => QueueClass::InfoScan,
            Self::L2Ping => QueueClass::Ping,
        }
    }
}

/// Rate-limit class for a probe command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueClass {
    InfoScan,
    Ping,
}

/// One queued probe, consumed exactly once by the drain worker.
#[derive(Debug, Clone)]
pub struct ProbeQueueEntry {
    pub command: ProbeCommand,
    pub address: String,
    pub enqueued_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeOutcome {
    Success,
    ExpectedFailure,
    Failure,
}

#[derive(Default)]
struct Queues {
    info: Mutex<VecDeque<ProbeQueueEntry>>,
    ping: Mutex<VecDeque<ProbeQueueEntry>>,
}

pub struct ProbeScheduler<R> {
    cfg: ProbeConfig,
    adapter: String,
    runner: R,
    store: Arc<dyn DeviceStore>,
    stats: Arc<PipelineStats>,
    queues: Queues,
    /// Last-enqueue timestamps per (address, command class), shared between
    /// the change-event path and the periodic re-ping sweep.
    dispatch: DashMap<(String, QueueClass), i64>,
    /// Cancelled when hardware commands can no longer be spawned at all.
    shutdown: CancellationToken,
}

impl<R: CommandRunner> ProbeScheduler<R> {
    pub fn new(
        cfg: ProbeConfig,
        adapter: String,
        runner: R,
        store: Arc<dyn DeviceStore>,
        stats: Arc<PipelineStats>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            adapter,
            runner,
            store,
            stats,
            queues: Queues::default(),
            dispatch: DashMap::new(),
            shutdown,
        }
    }

    /// Enqueue worker: consumes device deltas until the channel closes.
    pub async fn run_enqueue_loop(&self, rx: &mut mpsc::UnboundedReceiver<DeviceDelta>) {
        while let Some(delta) = rx.recv().await {
            if delta.status != Status::Online {
                continue;
            }
            let command = match delta.transport {
                Transport::Classic => ProbeCommand::Info,
                Transport::Le => ProbeCommand::LeInfo,
            };
            self.try_enqueue(command, &delta.address);
        }
        debug!("delta stream ended, probe enqueue loop stopping");
    }

    /// Drain worker: owns the radio exclusively. Empties the info queue,
    /// takes one liveness ping, and repeats; a passive discovery pass runs
    /// only when both queues are idle.
    pub async fn run_drain_loop(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() || self.shutdown.is_cancelled() {
                break;
            }

            if self.drain_cycle().await {
                continue;
            }

            self.discovery_pass().await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.cfg.idle_delay) => {}
            }
        }

        info!(
            info_depth = self.queues.info.lock().len(),
            ping_depth = self.queues.ping.lock().len(),
            "probe drain loop stopped",
        );
    }

    /// Periodic sweep enqueueing liveness pings for online classic devices,
    /// so a live device does not expire purely because it went quiet.
    pub async fn run_reping_sweep(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.cfg.l2ping_sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("re-ping sweep stopped");
                    return;
                }
                _ = ticker.tick() => {
                    for device in self.store.select(Transport::Classic, Status::Online) {
                        self.try_enqueue(ProbeCommand::L2Ping, &device.address);
                    }
                }
            }
        }
    }

    /// Enqueue a probe unless its (address, class) pair was enqueued within
    /// the class's scan interval. Returns whether the entry was accepted.
    pub fn try_enqueue(&self, command: ProbeCommand, address: &str) -> bool {
        self.try_enqueue_at(command, address, Utc::now().timestamp())
    }

    fn try_enqueue_at(&self, command: ProbeCommand, address: &str, now: i64) -> bool {
        let class = command.class();
        let interval = match class {
            QueueClass::InfoScan => self.cfg.info_scan_interval,
            QueueClass::Ping => self.cfg.l2ping_interval,
        };

        let key = (address.to_string(), class);
        if let Some(last) = self.dispatch.get(&key) {
            if now - *last < interval.as_secs() as i64 {
                debug!(
                    address,
                    command = command.as_str(),
                    "probe within scan interval, dropped",
                );
                return false;
            }
        }
        self.dispatch.insert(key, now);

        let entry = ProbeQueueEntry {
            command,
            address: address.to_string(),
            enqueued_at: now,
        };
        match class {
            QueueClass::InfoScan => self.queues.info.lock().push_back(entry),
            QueueClass::Ping => self.queues.ping.lock().push_back(entry),
        }
        debug!(address, command = command.as_str(), "probe enqueued");
        true
    }

    /// One drain cycle. Returns false when both queues were empty.
    async fn drain_cycle(&self) -> bool {
        let mut worked = false;

        while let Some(entry) = pop(&self.queues.info) {
            if self.shutdown.is_cancelled() {
                return true;
            }
            worked = true;
            match entry.command {
                ProbeCommand::Info => self.dispatch_info(&entry).await,
                ProbeCommand::LeInfo => self.dispatch_leinfo(&entry).await,
                ProbeCommand::L2Ping => unreachable!("l2ping has its own queue"),
            }
        }

        if let Some(entry) = pop(&self.queues.ping) {
            worked = true;
            self.dispatch_l2ping(&entry).await;
        }

        worked
    }

    async fn dispatch_info(&self, entry: &ProbeQueueEntry) {
        self.reset_adapter().await;
        let command = format!("hcitool -i {} info {}", self.adapter, entry.address);
        self.execute_probe(&command).await;
    }

    /// LE info probes retry through a ladder of address-type assumptions,
    /// each attempt preceded by an adapter reset. An unexpected failure
    /// abandons the probe for this cycle.
    async fn dispatch_leinfo(&self, entry: &ProbeQueueEntry) {
        for flag in LEINFO_ADDRESS_TYPES {
            self.reset_adapter().await;
            let command = if flag.is_empty() {
                format!("hcitool -i {} leinfo {}", self.adapter, entry.address)
            } else {
                format!("hcitool -i {} leinfo {} {}", self.adapter, flag, entry.address)
            };
            match self.execute_probe(&command).await {
                ProbeOutcome::Success => return,
                ProbeOutcome::ExpectedFailure => continue,
                ProbeOutcome::Failure => return,
            }
        }
        debug!(address = %entry.address, "leinfo exhausted address-type fallbacks");
    }

    async fn dispatch_l2ping(&self, entry: &ProbeQueueEntry) {
        self.reset_adapter().await;
        let command = format!("l2ping -i {} -c 3 {}", self.adapter, entry.address);
        self.execute_probe(&command).await;
    }

    /// Passive discovery pass, run when the probe queues are idle.
    async fn discovery_pass(&self) {
        self.reset_adapter().await;
        let command = match &self.cfg.discovery_command {
            Some(cmd) => cmd.clone(),
            None => format!("btmgmt --index {} find -l", self.adapter),
        };
        match self.runner.run(&command, self.cfg.discovery_timeout).await {
            Ok(output) if !output.success() && !output.timed_out => {
                debug!(command = %command, status = ?output.status, "discovery pass ended with failure");
            }
            Ok(_) => {}
            Err(e) => self.fatal(e),
        }
    }

    async fn reset_adapter(&self) {
        let command = format!("hciconfig {} reset", self.adapter);
        match self.runner.run(&command, self.cfg.command_timeout).await {
            Ok(output) => {
                if !output.success() {
                    warn!(status = ?output.status, stderr = %output.stderr.trim(), "adapter reset failed");
                }
            }
            Err(e) => self.fatal(e),
        }
    }

    async fn execute_probe(&self, command: &str) -> ProbeOutcome {
        self.stats.record_probe();

        let output = match self.runner.run(command, self.cfg.command_timeout).await {
            Ok(output) => output,
            Err(e) => {
                self.fatal(e);
                return ProbeOutcome::Failure;
            }
        };

        let outcome = classify(&output);
        match outcome {
            ProbeOutcome::Success => {
                debug!(command, "probe completed");
                if !output.stderr.trim().is_empty() {
                    debug!(command, stderr = %output.stderr.trim(), "probe stderr");
                }
            }
            ProbeOutcome::ExpectedFailure => {
                self.stats.record_probe_failure();
                debug!(command, "probe failed (expected negative outcome)");
            }
            ProbeOutcome::Failure => {
                self.stats.record_probe_failure();
                warn!(
                    command,
                    status = ?output.status,
                    stderr = %output.stderr.trim(),
                    "probe failed",
                );
            }
        }
        outcome
    }

    /// A command that cannot be spawned at all means the host is out of
    /// resources; continued operation cannot be trusted.
    fn fatal(&self, error: anyhow::Error) {
        error!(error = %error, "cannot spawn hardware commands, shutting down");
        self.shutdown.cancel();
    }
}

fn pop(queue: &Mutex<VecDeque<ProbeQueueEntry>>) -> Option<ProbeQueueEntry> {
    queue.lock().pop_front()
}

/// Timeouts count as expected failures: unreachable devices routinely let
/// probes hang until the deadline.
fn classify(output: &CommandOutput) -> ProbeOutcome {
    if output.success() {
        return ProbeOutcome::Success;
    }
    if output.timed_out
        || is_expected_failure(&output.stderr)
        || is_expected_failure(&output.stdout)
    {
        return ProbeOutcome::ExpectedFailure;
    }
    ProbeOutcome::Failure
}
