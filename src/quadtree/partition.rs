//! Per-leaf storage strategies.

use geocluster_types::Envelope;

/// Anything the quadtree can index: a value with a bounding envelope in the
/// reference projection.
pub trait EnvelopedValue {
    fn envelope(&self) -> Envelope;
}

/// Bounded container of values owned by exactly one leaf.
///
/// A partition rejects an insert (returns `false` from [`Partition::add`])
/// when it is full; the tree reacts by splitting the leaf.
pub trait Partition {
    type Value: EnvelopedValue + Clone;

    /// Number of values stored, counting each collapsed duplicate.
    fn size(&self) -> usize;

    /// Union of the envelopes of all stored values.
    fn bounds(&self) -> Envelope;

    fn values(&self) -> Box<dyn Iterator<Item = Self::Value> + '_>;

    /// Stored values whose envelope intersects `key`.
    fn intersects(&self, key: &Envelope) -> Vec<Self::Value> {
        self.values()
            .filter(|v| v.envelope().intersects(key))
            .collect()
    }

    /// Try to store `value`.
    ///
    /// `reserve_for_speed` asks the partition to keep headroom instead of
    /// filling up completely; redistribution during a split passes `false`.
    fn add(&mut self, value: &Self::Value, reserve_for_speed: bool) -> bool;

    /// Strategy-specific capacity increase, offered before a value is
    /// declared too big. Returns `false` when the partition cannot grow.
    fn expand(&mut self) -> bool {
        false
    }
}

/// Count-bounded partition used for build-time bucketing.
#[derive(Debug, Clone)]
pub struct SimplePartition<T> {
    values: Vec<T>,
    bounds: Envelope,
    max_count: usize,
}

impl<T> SimplePartition<T> {
    pub fn new(max_count: usize) -> Self {
        Self {
            values: Vec::new(),
            bounds: Envelope::empty(),
            max_count,
        }
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    pub fn as_slice(&self) -> &[T] {
        &self.values
    }
}

impl<T: EnvelopedValue + Clone> Partition for SimplePartition<T> {
    type Value = T;

    fn size(&self) -> usize {
        self.values.len()
    }

    fn bounds(&self) -> Envelope {
        self.bounds
    }

    fn values(&self) -> Box<dyn Iterator<Item = T> + '_> {
        Box::new(self.values.iter().cloned())
    }

    fn add(&mut self, value: &T, _reserve_for_speed: bool) -> bool {
        if self.values.len() + 1 > self.max_count {
            return false;
        }
        self.bounds.expand_to_include(&value.envelope());
        self.values.push(value.clone());
        true
    }
}

/// Partition holding at most one value.
///
/// Used where every tile maps to exactly one entry, such as the directory of
/// a stored dataset.
#[derive(Debug, Clone)]
pub struct SinglePartition<T> {
    value: Option<T>,
}

impl<T> SinglePartition<T> {
    pub fn empty() -> Self {
        Self { value: None }
    }

    pub fn of(value: T) -> Self {
        Self { value: Some(value) }
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }
}

impl<T> Default for SinglePartition<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: EnvelopedValue + Clone> Partition for SinglePartition<T> {
    type Value = T;

    fn size(&self) -> usize {
        usize::from(self.value.is_some())
    }

    fn bounds(&self) -> Envelope {
        self.value
            .as_ref()
            .map(EnvelopedValue::envelope)
            .unwrap_or_default()
    }

    fn values(&self) -> Box<dyn Iterator<Item = T> + '_> {
        Box::new(self.value.iter().cloned())
    }

    fn add(&mut self, value: &T, _reserve_for_speed: bool) -> bool {
        if self.value.is_some() {
            return false;
        }
        self.value = Some(value.clone());
        true
    }
}

/// A value-less marker carrying only an envelope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Void;

impl EnvelopedValue for Void {
    fn envelope(&self) -> Envelope {
        Envelope::empty()
    }
}

/// Partition that stores nothing but reports fixed data bounds.
///
/// A tree of void partitions answers "which of these tiles does an envelope
/// touch" without holding any values.
#[derive(Debug, Clone, Copy)]
pub struct VoidPartition {
    bounds: Envelope,
}

impl VoidPartition {
    pub fn new() -> Self {
        Self {
            bounds: Envelope::empty(),
        }
    }

    pub fn with_bounds(bounds: Envelope) -> Self {
        Self { bounds }
    }
}

impl Default for VoidPartition {
    fn default() -> Self {
        Self::new()
    }
}

impl Partition for VoidPartition {
    type Value = Void;

    fn size(&self) -> usize {
        0
    }

    fn bounds(&self) -> Envelope {
        self.bounds
    }

    fn values(&self) -> Box<dyn Iterator<Item = Void> + '_> {
        Box::new(std::iter::empty())
    }

    fn add(&mut self, _value: &Void, _reserve_for_speed: bool) -> bool {
        false
    }
}
