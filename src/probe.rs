//! Process-wide record of which test last fired each probe.
//!
//! Instrumented code reports probe ids through [`InvokeReceiver`]. The test
//! runner marks the running test on its own thread with [`enter_test`], so
//! tests executing in parallel attribute hits to themselves only.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::unit::UnitName;

const SHARDS: usize = 16;

/// Probe identifier: `(unit_tag << 32) | local_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProbeId(u64);

impl ProbeId {
    #[inline]
    #[must_use]
    pub const fn new(unit_tag: u32, local: u32) -> Self {
        Self(((unit_tag as u64) << 32) | local as u64)
    }

    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn unit_tag(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    #[must_use]
    pub const fn local(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    fn shard(self) -> usize {
        (self.local() as usize ^ self.unit_tag() as usize) % SHARDS
    }
}

impl fmt::Display for ProbeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}:{}", self.unit_tag(), self.local())
    }
}

/// Stable 32-bit tag for a unit (FNV-1a over the qualified name).
pub fn unit_tag(unit: &UnitName) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in unit.as_str().bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Sink for probe hits raised by instrumented code.
pub trait InvokeReceiver: Send + Sync {
    fn report(&self, probe: ProbeId);
}

impl<R: InvokeReceiver + ?Sized> InvokeReceiver for Arc<R> {
    fn report(&self, probe: ProbeId) {
        (**self).report(probe)
    }
}

thread_local! {
    static CURRENT_TEST: RefCell<Option<Arc<str>>> = const { RefCell::new(None) };
}

/// Marks `name` as the test running on this thread until the scope drops.
#[must_use = "the test context ends when the scope is dropped"]
pub fn enter_test(name: &str) -> TestScope {
    let previous = CURRENT_TEST.with(|current| current.replace(Some(Arc::from(name))));
    TestScope { previous }
}

pub fn current_test() -> Option<Arc<str>> {
    CURRENT_TEST.with(|current| current.borrow().clone())
}

/// Restores the enclosing test context on drop.
#[derive(Debug)]
pub struct TestScope {
    previous: Option<Arc<str>>,
}

impl Drop for TestScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_TEST.with(|current| *current.borrow_mut() = previous);
    }
}

/// Shared probe table. Create one per process, share it by `Arc`, and call
/// [`ProbeStore::reset`] between runs while no instrumented code executes.
#[derive(Debug)]
pub struct ProbeStore {
    shards: Vec<Mutex<HashMap<ProbeId, Arc<str>>>>,
    unattributed: AtomicU64,
}

impl ProbeStore {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            unattributed: AtomicU64::new(0),
        }
    }

    fn shard(&self, probe: ProbeId) -> &Mutex<HashMap<ProbeId, Arc<str>>> {
        &self.shards[probe.shard()]
    }

    pub fn last_test(&self, probe: ProbeId) -> Option<Arc<str>> {
        self.shard(probe).lock().get(&probe).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<ProbeId, Arc<str>> {
        let mut all = BTreeMap::new();
        for shard in &self.shards {
            let guard = shard.lock();
            all.extend(guard.iter().map(|(probe, test)| (*probe, Arc::clone(test))));
        }
        all
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hits that arrived while no test was active on the reporting thread.
    pub fn unattributed(&self) -> u64 {
        self.unattributed.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
        self.unattributed.store(0, Ordering::Relaxed);
        tracing::debug!("probe store reset");
    }
}

impl Default for ProbeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InvokeReceiver for ProbeStore {
    fn report(&self, probe: ProbeId) {
        match current_test() {
            Some(test) => {
                self.shard(probe).lock().insert(probe, test);
            }
            None => {
                self.unattributed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
