//! raft-observe: vendor-neutral observability ABI for the consensus core.
//!
//! The consensus core itself is pure and never touches a meter. Callers that
//! apply outcomes (the machine and driver in `raft-core`) report through these
//! traits; backends live elsewhere. [`MemoryMeter`] keeps everything in
//! memory for tests and debugging tools.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

pub trait Counter: Send + Sync {
    fn inc(&self, v: u64);
}
pub trait Gauge: Send + Sync {
    fn set(&self, v: i64);
}

pub trait Meter: Send + Sync + 'static {
    fn counter(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter>;
    fn gauge(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge>;
    fn emit(&self, evt: VizEvent);
}

/// A do-nothing meter for tests and users who don't care about telemetry.
#[derive(Clone, Default)]
pub struct NoopMeter;
struct NoopC;
impl Counter for NoopC {
    fn inc(&self, _v: u64) {}
}
struct NoopG;
impl Gauge for NoopG {
    fn set(&self, _v: i64) {}
}
impl Meter for NoopMeter {
    fn counter(
        &self,
        _n: &'static str,
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter> {
        Box::new(NoopC)
    }
    fn gauge(
        &self,
        _n: &'static str,
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge> {
        Box::new(NoopG)
    }
    fn emit(&self, _e: VizEvent) {}
}

/// Meter that records counters, gauges and Raft events in memory.
///
/// Clones share the same storage.
#[derive(Clone, Default)]
pub struct MemoryMeter {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    counters: Mutex<BTreeMap<&'static str, u64>>,
    gauges: Mutex<BTreeMap<&'static str, i64>>,
    events: Mutex<Vec<RaftEvt>>,
}

struct MemoryCounter {
    name: &'static str,
    inner: Arc<MemoryInner>,
}
impl Counter for MemoryCounter {
    fn inc(&self, v: u64) {
        *self.inner.counters.lock().entry(self.name).or_insert(0) += v;
    }
}

struct MemoryGauge {
    name: &'static str,
    inner: Arc<MemoryInner>,
}
impl Gauge for MemoryGauge {
    fn set(&self, v: i64) {
        self.inner.gauges.lock().insert(self.name, v);
    }
}

impl MemoryMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total of a counter (labels are not distinguished).
    pub fn counter_value(&self, name: &str) -> u64 {
        self.inner.counters.lock().get(name).copied().unwrap_or(0)
    }

    pub fn gauge_value(&self, name: &str) -> Option<i64> {
        self.inner.gauges.lock().get(name).copied()
    }

    /// Kinds of every Raft event so far, in emission order.
    pub fn raft_kinds(&self) -> Vec<RaftKind> {
        self.inner
            .events
            .lock()
            .iter()
            .map(|evt| evt.kind.clone())
            .collect()
    }

    pub fn raft_events(&self) -> Vec<RaftEvt> {
        self.inner.events.lock().clone()
    }
}

impl Meter for MemoryMeter {
    fn counter(
        &self,
        name: &'static str,
        _labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter> {
        Box::new(MemoryCounter {
            name,
            inner: self.inner.clone(),
        })
    }
    fn gauge(
        &self,
        name: &'static str,
        _labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge> {
        Box::new(MemoryGauge {
            name,
            inner: self.inner.clone(),
        })
    }
    fn emit(&self, evt: VizEvent) {
        match evt {
            VizEvent::Raft(evt) => self.inner.events.lock().push(evt),
        }
    }
}

/// Typed events for live visualization (log payloads never included).
#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum VizEvent {
    Raft(RaftEvt),
}

#[derive(Clone, Debug)]
pub struct RaftEvt {
    pub shard: u32,
    pub term: i64,
    pub kind: RaftKind,
}
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RaftKind {
    ElectionStarted { node: u32 },
    PreElectionStarted { node: u32 },
    LeaderElected { node: u32 },
    StepDown { node: u32 },
    CommitAdvanced { index: i64 },
    SnapshotRequired { node: u32 },
}

/// Macros (simple versions). Can be feature-gated if desired.
#[macro_export]
macro_rules! obs_count {
    ($m:expr, $name:expr, $labels:expr, $v:expr) => {{
        $m.counter($name, $labels).inc($v as u64);
    }};
}
#[macro_export]
macro_rules! obs_gauge {
    ($m:expr, $name:expr, $labels:expr, $v:expr) => {{
        $m.gauge($name, $labels).set($v as i64);
    }};
}
