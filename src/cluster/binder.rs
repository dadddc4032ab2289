//! Binding envelopes to the quad-keys of a known tile set.

use super::owns_point;
use crate::error::Result;
use crate::quadtree::{QuadTree, QuadTreeBuilder, SpatialRelation, VoidPartition};
use crate::tile;
use geocluster_types::Envelope;
use log::debug;
use smallvec::{SmallVec, smallvec};

/// Latitude beyond which an envelope is not bindable.
const BINDABLE_LATITUDE: f64 = 85.0;

pub type QuadKeys = SmallVec<[String; 4]>;

/// Maps reference-projection envelopes to the tiles of a fixed quad-key set.
///
/// The tile set is held in a fixed-range quadtree of [`VoidPartition`]s whose
/// data bounds are the tile bounds, so binding costs one tree descent. Tiles
/// missing from the set are filled with empty leaves that never match.
pub struct QuadKeyBinder {
    tree: QuadTree<VoidPartition>,
    quad_keys: Vec<String>,
    bind_outliers: bool,
    bind_owner: bool,
}

impl QuadKeyBinder {
    /// The reserved outliers key is ignored.
    pub fn new<I, S>(quad_keys: I, bind_outliers: bool, bind_owner: bool) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys: Vec<String> = quad_keys
            .into_iter()
            .map(|k| k.as_ref().to_string())
            .filter(|k| !tile::is_outliers(k))
            .collect();
        keys.sort_unstable();
        keys.dedup();

        let mut builder = QuadTreeBuilder::new(|_: &str| VoidPartition::new()).fixed(true);
        for key in &keys {
            builder.add(key, VoidPartition::with_bounds(tile::bounds_of(key)?))?;
        }
        Ok(Self {
            tree: builder.build()?,
            quad_keys: keys,
            bind_outliers,
            bind_owner,
        })
    }

    pub fn quad_keys(&self) -> &[String] {
        &self.quad_keys
    }

    /// Quad-keys for `envelope`.
    ///
    /// Every known tile intersecting the envelope, or in owner mode only the
    /// tile owning its centre. With no known tile, outlier binding derives
    /// keys next to the known set; otherwise the result is empty.
    pub fn bind(&self, envelope: &Envelope) -> QuadKeys {
        if !is_bindable(envelope) {
            debug!("invalid input for quad-key binding: input={:?}", envelope);
            return QuadKeys::new();
        }

        let leaves = self
            .tree
            .query_leaf_nodes(SpatialRelation::Intersects, envelope);
        let keys: QuadKeys = if self.bind_owner {
            envelope
                .centre()
                .and_then(|centre| {
                    leaves
                        .iter()
                        .find(|leaf| owns_point(leaf.tile_bounds(), centre))
                        .map(|leaf| smallvec![leaf.quad_key().to_string()])
                })
                .unwrap_or_default()
        } else {
            leaves.iter().map(|leaf| leaf.quad_key().to_string()).collect()
        };

        if keys.is_empty() && self.bind_outliers {
            return self.outlier_keys(envelope);
        }
        keys
    }

    /// Keys for an envelope that matches no known tile, disjoint from every
    /// known tile.
    ///
    /// The smallest containing tile is trimmed to one digit past its longest
    /// common prefix with the known keys. A tile that is still an ancestor of
    /// known keys is replaced by those of its children the envelope touches.
    fn outlier_keys(&self, envelope: &Envelope) -> QuadKeys {
        let target = match (self.bind_owner, envelope.centre()) {
            (true, Some(centre)) => Envelope::from_point(centre.x, centre.y),
            _ => *envelope,
        };
        let quad_key = tile::smallest_tile_containing(&target);
        let prefix_len = self.common_prefix_len(&quad_key);

        let keys: QuadKeys = if quad_key.len() > prefix_len {
            smallvec![quad_key[..=prefix_len].to_string()]
        } else {
            self.refine(&quad_key, &target)
        };
        debug!(
            "outlier: root={}, data={}, qkeys={:?}",
            self.tree.root_key(),
            quad_key,
            keys
        );
        keys
    }

    fn refine(&self, quad_key: &str, envelope: &Envelope) -> QuadKeys {
        let mut keys = QuadKeys::new();
        let mut pending = vec![quad_key.to_string()];
        while let Some(key) = pending.pop() {
            if !self.is_ancestor(&key) || key.len() >= tile::MAX_LEVEL {
                keys.push(key);
                continue;
            }
            for child in tile::child_keys(&key).into_iter().rev() {
                let touches = tile::bounds_of(&child)
                    .map(|bounds| bounds.overlaps_interior(envelope) || bounds.contains(envelope))
                    .unwrap_or(false);
                if touches {
                    pending.push(child);
                }
            }
        }
        keys
    }

    /// True if `quad_key` is a prefix of some known key.
    fn is_ancestor(&self, quad_key: &str) -> bool {
        let pos = self.quad_keys.partition_point(|k| k.as_str() < quad_key);
        self.quad_keys
            .get(pos)
            .is_some_and(|k| k.starts_with(quad_key))
    }

    /// Longest common prefix of `quad_key` with any known key.
    fn common_prefix_len(&self, quad_key: &str) -> usize {
        let pos = self.quad_keys.partition_point(|k| k.as_str() < quad_key);
        let before = pos
            .checked_sub(1)
            .and_then(|p| self.quad_keys.get(p))
            .map(|k| tile::common_prefix_len(k, quad_key));
        let after = self
            .quad_keys
            .get(pos)
            .map(|k| tile::common_prefix_len(k, quad_key));
        before.max(after).unwrap_or(0)
    }
}

fn is_bindable(envelope: &Envelope) -> bool {
    !envelope.is_empty()
        && envelope.max_y <= BINDABLE_LATITUDE
        && envelope.min_y >= -BINDABLE_LATITUDE
        && envelope.max_x <= tile::MAX_LONGITUDE
        && envelope.min_x >= tile::MIN_LONGITUDE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_in(quad_key: &str, fx: f64, fy: f64) -> Envelope {
        let b = tile::bounds_of(quad_key).unwrap();
        Envelope::from_point(b.min_x + b.width() * fx, b.min_y + b.height() * fy)
    }

    #[test]
    fn test_binds_intersecting_tiles() {
        let binder = QuadKeyBinder::new(["0", "1", "2", "3", "outliers"], false, false).unwrap();
        assert_eq!(binder.quad_keys().len(), 4);

        let crossing = Envelope::new(-10.0, 10.0, 10.0, 20.0);
        let keys = binder.bind(&crossing);
        assert_eq!(keys.as_slice(), ["0".to_string(), "1".to_string()]);
    }

    #[test]
    fn test_owner_mode_binds_centre_tile() {
        let binder = QuadKeyBinder::new(["0", "1", "2", "3"], false, true).unwrap();
        let crossing = Envelope::new(-10.0, 10.0, 4.0, 20.0);
        assert_eq!(binder.bind(&crossing).as_slice(), ["0".to_string()]);
    }

    #[test]
    fn test_rejects_out_of_domain_input() {
        let binder = QuadKeyBinder::new(["0", "1"], true, false).unwrap();
        assert!(binder.bind(&Envelope::from_point(10.0, 86.0)).is_empty());
        assert!(binder.bind(&Envelope::empty()).is_empty());
    }

    #[test]
    fn test_unbound_without_outliers() {
        let binder = QuadKeyBinder::new(["00", "01"], false, false).unwrap();
        assert!(binder.bind(&point_in("03", 0.5, 0.5)).is_empty());
    }

    #[test]
    fn test_outlier_key_is_trimmed() {
        let binder = QuadKeyBinder::new(["0000", "0001"], true, false).unwrap();
        let keys = binder.bind(&point_in("0123", 0.4, 0.4));
        // shares "0" with the known keys, so it is cut to two digits
        assert_eq!(keys.as_slice(), ["01".to_string()]);
    }

    #[test]
    fn test_outlier_keys_avoid_known_tiles() {
        let binder = QuadKeyBinder::new(["0000"], true, false).unwrap();
        // inside "00" but away from "0000"
        let b = tile::bounds_of("00").unwrap();
        let env = Envelope::new(
            b.min_x + b.width() * 0.3,
            b.min_y + b.height() * 0.1,
            b.min_x + b.width() * 0.7,
            b.min_y + b.height() * 0.4,
        );
        let keys = binder.bind(&env);
        assert!(!keys.is_empty());
        for key in &keys {
            assert!(!tile::tiles_overlap(key, "0000"), "{key} overlaps 0000");
            assert!(tile::bounds_of(key).unwrap().intersects(&env));
        }
    }
}
