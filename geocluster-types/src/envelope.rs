use geo::{Coord, Rect};
use serde::{Deserialize, Serialize};

/// An axis-aligned minimum bounding rectangle.
///
/// Unlike [`geo::Rect`], an envelope has an explicit *empty* state (no extent
/// at all), which is what the union of zero envelopes evaluates to. An empty
/// envelope intersects and contains nothing.
///
/// # Examples
///
/// ```
/// use geocluster_types::Envelope;
///
/// let mut bounds = Envelope::empty();
/// assert!(bounds.is_empty());
///
/// bounds.expand_to_include(&Envelope::from_point(1.0, 2.0));
/// bounds.expand_to_include(&Envelope::from_point(3.0, -1.0));
/// assert_eq!(bounds, Envelope::new(1.0, -1.0, 3.0, 2.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    /// Create an envelope from two corners. The corners are normalized so that
    /// `min_* <= max_*`.
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    /// The empty envelope.
    pub const fn empty() -> Self {
        Self {
            min_x: 0.0,
            min_y: 0.0,
            max_x: -1.0,
            max_y: -1.0,
        }
    }

    /// A degenerate envelope covering a single point.
    pub fn from_point(x: f64, y: f64) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    pub fn from_rect(rect: &Rect<f64>) -> Self {
        let min = rect.min();
        let max = rect.max();
        Self::new(min.x, min.y, max.x, max.y)
    }

    /// Convert into a [`geo::Rect`]. Returns `None` for the empty envelope.
    pub fn to_rect(&self) -> Option<Rect<f64>> {
        if self.is_empty() {
            None
        } else {
            Some(Rect::new(
                Coord {
                    x: self.min_x,
                    y: self.min_y,
                },
                Coord {
                    x: self.max_x,
                    y: self.max_y,
                },
            ))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.max_x < self.min_x || self.max_y < self.min_y
    }

    pub fn width(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.max_x - self.min_x
        }
    }

    pub fn height(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.max_y - self.min_y
        }
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Centre of the envelope, or `None` when it is empty.
    pub fn centre(&self) -> Option<Coord<f64>> {
        if self.is_empty() {
            None
        } else {
            Some(Coord {
                x: (self.min_x + self.max_x) / 2.0,
                y: (self.min_y + self.max_y) / 2.0,
            })
        }
    }

    /// Closed intersection test: envelopes sharing only an edge or a corner intersect.
    pub fn intersects(&self, other: &Envelope) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        !(other.min_x > self.max_x
            || other.max_x < self.min_x
            || other.min_y > self.max_y
            || other.max_y < self.min_y)
    }

    /// True if the interiors overlap, i.e. the intersection has a positive area.
    pub fn overlaps_interior(&self, other: &Envelope) -> bool {
        self.intersection(other).area() > 0.0
    }

    /// Closed containment: `other` may touch the boundary of `self`.
    pub fn contains(&self, other: &Envelope) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        other.min_x >= self.min_x
            && other.max_x <= self.max_x
            && other.min_y >= self.min_y
            && other.max_y <= self.max_y
    }

    pub fn contains_coord(&self, coord: &Coord<f64>) -> bool {
        !self.is_empty()
            && coord.x >= self.min_x
            && coord.x <= self.max_x
            && coord.y >= self.min_y
            && coord.y <= self.max_y
    }

    /// Intersection of two envelopes; empty when they are disjoint.
    pub fn intersection(&self, other: &Envelope) -> Envelope {
        if !self.intersects(other) {
            return Envelope::empty();
        }
        Envelope {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        }
    }

    /// Grow this envelope so that it also covers `other`.
    pub fn expand_to_include(&mut self, other: &Envelope) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = *other;
            return;
        }
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    pub fn union(&self, other: &Envelope) -> Envelope {
        let mut merged = *self;
        merged.expand_to_include(other);
        merged
    }

    /// A copy of this envelope grown by `distance` on every side.
    pub fn expanded_by(&self, distance: f64) -> Envelope {
        if self.is_empty() {
            return *self;
        }
        Envelope::new(
            self.min_x - distance,
            self.min_y - distance,
            self.max_x + distance,
            self.max_y + distance,
        )
    }

    /// Bit-exact identity of the envelope, usable as a hash key.
    ///
    /// Two envelopes with the same key are identical, which is what duplicate
    /// collapsing groups on. All empty envelopes share one key.
    pub fn key(&self) -> [u64; 4] {
        if self.is_empty() {
            return [u64::MAX; 4];
        }
        [
            self.min_x.to_bits(),
            self.min_y.to_bits(),
            self.max_x.to_bits(),
            self.max_y.to_bits(),
        ]
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Rect<f64>> for Envelope {
    fn from(rect: Rect<f64>) -> Self {
        Envelope::from_rect(&rect)
    }
}
