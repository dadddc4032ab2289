//! Index pointers and the duplicate-collapsing pointer partition.

use super::partition::{EnvelopedValue, Partition};
use geocluster_types::Envelope;
use log::debug;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_SLOTS: usize = 64;
pub const DEFAULT_FILL_RATIO: f64 = 0.85;

/// An envelope plus the position of the value it describes in some backing list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pointer {
    pub envelope: Envelope,
    pub index: usize,
}

impl Pointer {
    pub fn new(envelope: Envelope, index: usize) -> Self {
        Self { envelope, index }
    }
}

impl EnvelopedValue for Pointer {
    fn envelope(&self) -> Envelope {
        self.envelope
    }
}

/// Many pointers sharing one identical envelope, stored in a single slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerGroup {
    pub envelope: Envelope,
    pub indexes: Vec<usize>,
}

impl PointerGroup {
    pub fn pointers(&self) -> impl Iterator<Item = Pointer> + '_ {
        self.indexes
            .iter()
            .map(move |&index| Pointer::new(self.envelope, index))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Single(Pointer),
    Group(PointerGroup),
}

impl Slot {
    fn envelope(&self) -> Envelope {
        match self {
            Slot::Single(ptr) => ptr.envelope,
            Slot::Group(group) => group.envelope,
        }
    }
}

/// Slot-bounded partition of [`Pointer`]s that collapses identical envelopes.
///
/// Once every slot is used, an incoming *point* pointer triggers a compaction
/// that merges all slots with bit-identical envelopes into [`PointerGroup`]s.
/// The insert is accepted only if the compacted partition stays under its fill
/// ratio (when headroom is requested) and under its slot limit. Non-point
/// pointers are rejected outright once the slots are full.
#[derive(Debug, Clone)]
pub struct PointerPartition {
    bounds: Envelope,
    slots: Vec<Slot>,
    max_slots: usize,
    fill_ratio: f64,
    count: usize,
}

impl PointerPartition {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_SLOTS, DEFAULT_FILL_RATIO)
    }

    pub fn with_limits(max_slots: usize, fill_ratio: f64) -> Self {
        Self {
            bounds: Envelope::empty(),
            slots: Vec::new(),
            max_slots,
            fill_ratio,
            count: 0,
        }
    }

    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_grouped(&self) -> bool {
        self.slots.iter().any(|s| matches!(s, Slot::Group(_)))
    }

    fn push(&mut self, value: &Pointer) {
        self.bounds.expand_to_include(&value.envelope);
        self.slots.push(Slot::Single(*value));
        self.count += 1;
    }

    /// Merge slots sharing an identical envelope; first-seen order is kept.
    fn compact(&mut self) {
        let mut positions: FxHashMap<[u64; 4], usize> = FxHashMap::default();
        let mut compacted: Vec<Slot> = Vec::with_capacity(self.slots.len());

        for slot in self.slots.drain(..) {
            let key = slot.envelope().key();
            match positions.get(&key) {
                Some(&pos) => {
                    let indexes = match slot {
                        Slot::Single(ptr) => vec![ptr.index],
                        Slot::Group(group) => group.indexes,
                    };
                    let promoted = match &compacted[pos] {
                        Slot::Single(first) => Some(*first),
                        Slot::Group(_) => None,
                    };
                    if let Some(first) = promoted {
                        compacted[pos] = Slot::Group(PointerGroup {
                            envelope: first.envelope,
                            indexes: vec![first.index],
                        });
                    }
                    if let Slot::Group(group) = &mut compacted[pos] {
                        group.indexes.extend(indexes);
                    }
                }
                None => {
                    positions.insert(key, compacted.len());
                    compacted.push(slot);
                }
            }
        }
        self.slots = compacted;
    }

    /// Split the slots into plain pointers and groups, the persisted layout.
    pub fn to_persisted(&self) -> PersistedPointerPartition {
        let mut pointers = Vec::new();
        let mut groups = Vec::new();
        for slot in &self.slots {
            match slot {
                Slot::Single(ptr) => pointers.push(*ptr),
                Slot::Group(group) => groups.push(group.clone()),
            }
        }
        PersistedPointerPartition {
            bounds: self.bounds,
            count: self.count,
            pointers,
            groups,
        }
    }

    pub fn from_persisted(persisted: PersistedPointerPartition) -> Self {
        let mut slots: Vec<Slot> = persisted.groups.into_iter().map(Slot::Group).collect();
        slots.extend(persisted.pointers.into_iter().map(Slot::Single));
        Self {
            bounds: persisted.bounds,
            max_slots: DEFAULT_MAX_SLOTS.max(slots.len()),
            slots,
            fill_ratio: DEFAULT_FILL_RATIO,
            count: persisted.count,
        }
    }
}

impl Default for PointerPartition {
    fn default() -> Self {
        Self::new()
    }
}

impl Partition for PointerPartition {
    type Value = Pointer;

    fn size(&self) -> usize {
        self.count
    }

    fn bounds(&self) -> Envelope {
        self.bounds
    }

    fn values(&self) -> Box<dyn Iterator<Item = Pointer> + '_> {
        Box::new(self.slots.iter().flat_map(|slot| -> Box<dyn Iterator<Item = Pointer> + '_> {
            match slot {
                Slot::Single(ptr) => Box::new(std::iter::once(*ptr)),
                Slot::Group(group) => Box::new(group.pointers()),
            }
        }))
    }

    fn add(&mut self, value: &Pointer, reserve_for_speed: bool) -> bool {
        if self.slots.len() < self.max_slots {
            self.push(value);
            return true;
        }

        if value.envelope.area() > 0.0 {
            return false;
        }

        let before = self.slots.len();
        self.compact();
        let fill = self.slots.len() as f64 / self.max_slots as f64;
        debug!(
            "compact partition: {} -> {} ({:.2})",
            before,
            self.slots.len(),
            fill
        );

        if (reserve_for_speed && fill > self.fill_ratio) || self.slots.len() > self.max_slots {
            return false;
        }

        self.push(value);
        true
    }

    fn expand(&mut self) -> bool {
        debug!(
            "pointer partition slots expanded: {} -> {}",
            self.max_slots,
            self.max_slots * 2
        );
        self.max_slots *= 2;
        true
    }
}

/// Serialized form of a [`PointerPartition`]: bounds, pointer count, then the
/// plain pointers and the groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedPointerPartition {
    pub bounds: Envelope,
    pub count: usize,
    pub pointers: Vec<Pointer>,
    pub groups: Vec<PointerGroup>,
}
