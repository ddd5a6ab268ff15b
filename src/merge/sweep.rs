//! Periodic status reconciliation.
//!
//! Devices never expire inline during merge; a scheduled task flips silent
//! devices offline against per-transport timeouts evaluated on `last_seen`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::MergeConfig;
use crate::device::{DeviceDelta, DeviceState, Status, Transport};
use crate::publish::ChangeSink;
use crate::store::DeviceStore;

pub struct StatusSweeper {
    store: Arc<dyn DeviceStore>,
    cfg: MergeConfig,
    delta_tx: mpsc::UnboundedSender<DeviceDelta>,
    sink: Arc<dyn ChangeSink>,
}

impl StatusSweeper {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        cfg: MergeConfig,
        delta_tx: mpsc::UnboundedSender<DeviceDelta>,
        sink: Arc<dyn ChangeSink>,
    ) -> Self {
        Self {
            store,
            cfg,
            delta_tx,
            sink,
        }
    }

    /// Reconciliation worker: one startup pass (including the no-mode
    /// anomaly rule), then periodic sweeps until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let swept = self.reconcile_startup(Utc::now().timestamp());
        if !swept.is_empty() {
            info!(count = swept.len(), "startup reconciliation expired stale devices");
        }
        self.publish(swept);

        let mut ticker = tokio::time::interval(self.cfg.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("status sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let swept = self.sweep(Utc::now().timestamp());
                    self.publish(swept);
                }
            }
        }
    }

    /// One periodic sweep: expire online devices silent past their
    /// transport's timeout. Returns the records flipped offline.
    pub fn sweep(&self, now: i64) -> Vec<(DeviceState, DeviceDelta)> {
        let mut swept = Vec::new();
        self.expire(Transport::Classic, self.cfg.classic_timeout, now, &mut swept);
        self.expire(Transport::Le, self.cfg.le_timeout, now, &mut swept);
        swept
    }

    /// Startup pass: the regular sweep plus the anomaly rule for records
    /// carrying neither transport flag, swept with the classic timeout.
    pub fn reconcile_startup(&self, now: i64) -> Vec<(DeviceState, DeviceDelta)> {
        let mut swept = self.sweep(now);

        let timeout = self.cfg.classic_timeout.as_secs() as i64;
        for mut device in self.store.all() {
            if device.status == Status::Online
                && !device.classic_mode
                && !device.le_mode
                && now - device.last_seen > timeout
            {
                device.status = Status::Offline;
                self.store.update(&device);
                let delta = offline_delta(&device, Transport::Classic);
                swept.push((device, delta));
            }
        }

        swept
    }

    fn expire(
        &self,
        transport: Transport,
        timeout: Duration,
        now: i64,
        swept: &mut Vec<(DeviceState, DeviceDelta)>,
    ) {
        let timeout = timeout.as_secs() as i64;
        for mut device in self.store.select(transport, Status::Online) {
            if now - device.last_seen > timeout {
                debug!(
                    address = %device.address,
                    silent_secs = now - device.last_seen,
                    "device silent past timeout, marking offline",
                );
                device.status = Status::Offline;
                self.store.update(&device);
                let delta = offline_delta(&device, transport);
                swept.push((device, delta));
            }
        }
    }

    fn publish(&self, swept: Vec<(DeviceState, DeviceDelta)>) {
        for (device, delta) in swept {
            self.sink.publish(&device, &delta);
            let _ = self.delta_tx.send(delta);
        }
    }
}

fn offline_delta(device: &DeviceState, transport: Transport) -> DeviceDelta {
    DeviceDelta {
        address: device.address.clone(),
        transport,
        status: Status::Offline,
        last_seen: device.last_seen,
        changed: vec!["status"],
    }
}
