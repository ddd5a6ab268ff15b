use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free pipeline throughput counters.
///
/// `snapshot()` atomically reads and resets all counters, making it
/// suitable for periodic reporting without contention.
pub struct PipelineStats {
    lines: AtomicU64,
    chunks: AtomicU64,
    chunks_dropped: AtomicU64,
    parsed: AtomicU64,
    deltas: AtomicU64,
    probes: AtomicU64,
    probe_failures: AtomicU64,
}

impl PipelineStats {
    /// Create a new zeroed PipelineStats.
    pub fn new() -> Self {
        Self {
            lines: AtomicU64::new(0),
            chunks: AtomicU64::new(0),
            chunks_dropped: AtomicU64::new(0),
            parsed: AtomicU64::new(0),
            deltas: AtomicU64::new(0),
            probes: AtomicU64::new(0),
            probe_failures: AtomicU64::new(0),
        }
    }

    pub fn record_line(&self) {
        self.lines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk(&self) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk_dropped(&self) {
        self.chunks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parsed(&self) {
        self.parsed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delta(&self) {
        self.deltas.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_probe(&self) {
        self.probes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_probe_failure(&self) {
        self.probe_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Atomically read and reset all counters, returning only non-zero entries.
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        let mut result = Vec::new();

        for (name, counter) in [
            ("lines", &self.lines),
            ("chunks", &self.chunks),
            ("chunks_dropped", &self.chunks_dropped),
            ("parsed", &self.parsed),
            ("deltas", &self.deltas),
            ("probes", &self.probes),
            ("probe_failures", &self.probe_failures),
        ] {
            let v = counter.swap(0, Ordering::Relaxed);
            if v > 0 {
                result.push((name, v));
            }
        }

        result
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}
