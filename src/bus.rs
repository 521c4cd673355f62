use crate::subsystems::{SubsystemId, SUBSYSTEM_COUNT};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// One health sample from one subsystem. Immutable once recorded; a newer
/// sample supersedes it on the bus, it is never mutated in place.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricSample {
    pub subsystem: SubsystemId,
    /// Monotonic milliseconds since coordinator start.
    pub timestamp_ms: u64,
    pub temperature_c: f32,
    pub cpu_percent: u8,
    pub memory_percent: u8,
    pub latency_ms: f32,
    pub fault: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    current: Option<MetricSample>,
    /// Set by the scheduler when the subsystem's slice is abandoned; cleared
    /// by the next successful publish.
    stale: bool,
}

/// Read view of one bus slot, taken as part of a [`BusSnapshot`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SlotSnapshot {
    pub sample: Option<MetricSample>,
    pub stale: bool,
}

/// Consistent copy of the whole bus for one control cycle.
///
/// Each sample is copied whole under its slot lock, so a snapshot never
/// contains a torn sample. Cross-subsystem ordering is irrelevant.
#[derive(Debug, Clone, Copy)]
pub struct BusSnapshot {
    entries: [SlotSnapshot; SUBSYSTEM_COUNT],
    pub taken_at_ms: u64,
}

impl BusSnapshot {
    pub fn slot(&self, id: SubsystemId) -> &SlotSnapshot {
        &self.entries[id.index()]
    }

    pub fn sample(&self, id: SubsystemId) -> Option<&MetricSample> {
        self.entries[id.index()].sample.as_ref()
    }

    /// Milliseconds since the subsystem's last published sample, or `None`
    /// if it has never published.
    pub fn age_ms(&self, id: SubsystemId) -> Option<u64> {
        self.sample(id)
            .map(|s| self.taken_at_ms.saturating_sub(s.timestamp_ms))
    }

    /// A slot is usable evidence only if it holds a sample, is not marked
    /// stale, and is no older than `bound_ms`.
    pub fn is_fresh(&self, id: SubsystemId, bound_ms: u64) -> bool {
        let slot = self.slot(id);
        match slot.sample {
            Some(_) if !slot.stale => self.age_ms(id).map_or(false, |age| age <= bound_ms),
            _ => false,
        }
    }

    pub fn samples(&self) -> impl Iterator<Item = &MetricSample> {
        self.entries.iter().filter_map(|e| e.sample.as_ref())
    }
}

/// Shared store of the latest health sample per subsystem.
///
/// One lock per slot: a reporter publishing for one subsystem never blocks a
/// reporter for another, and readers only hold a lock for the copy.
#[derive(Debug, Default)]
pub struct SampleBus {
    slots: [RwLock<Slot>; SUBSYSTEM_COUNT],
}

impl SampleBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace the current sample for the sample's subsystem.
    ///
    /// Samples that are not newer than the current one are dropped, keeping
    /// each slot timestamp-ordered even if a delayed reporter thread lands
    /// an old poll result late.
    pub fn publish(&self, sample: MetricSample) {
        let mut slot = self.slots[sample.subsystem.index()]
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(current) = slot.current {
            if sample.timestamp_ms < current.timestamp_ms {
                return;
            }
        }
        slot.current = Some(sample);
        slot.stale = false;
    }

    /// Mark the subsystem's current sample as stale without discarding it.
    /// Stale samples are excluded from governor/interlock evidence and count
    /// toward watchdog accounting.
    pub fn mark_stale(&self, id: SubsystemId) {
        let mut slot = self.slots[id.index()]
            .write()
            .unwrap_or_else(|e| e.into_inner());
        slot.stale = true;
    }

    pub fn snapshot(&self, now_ms: u64) -> BusSnapshot {
        let mut entries = [SlotSnapshot {
            sample: None,
            stale: false,
        }; SUBSYSTEM_COUNT];
        for (i, lock) in self.slots.iter().enumerate() {
            let slot = lock.read().unwrap_or_else(|e| e.into_inner());
            entries[i] = SlotSnapshot {
                sample: slot.current,
                stale: slot.stale,
            };
        }
        BusSnapshot {
            entries,
            taken_at_ms: now_ms,
        }
    }
}
