// signature.rs - Archetype identity
//
// A signature is the sorted set of component and tag markers an entity
// carries. Entities with equal signatures share one archetype.

use crate::ecs::MarkerId;

/// Sorted, deduplicated set of marker ids.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Signature {
    markers: Box<[MarkerId]>,
}

impl Signature {
    /// Build a signature from markers in any order.
    ///
    /// The input will be sorted and deduplicated.
    pub fn from_markers(mut markers: Vec<MarkerId>) -> Self {
        markers.sort_unstable();
        markers.dedup();
        Self {
            markers: markers.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn markers(&self) -> &[MarkerId] {
        &self.markers
    }

    #[inline]
    pub fn contains(&self, marker: MarkerId) -> bool {
        self.markers.binary_search(&marker).is_ok()
    }

    /// True when every marker of `required` is present. `required` must be sorted.
    pub fn contains_all(&self, required: &[MarkerId]) -> bool {
        let mut mine = self.markers.iter();
        'outer: for wanted in required {
            for have in mine.by_ref() {
                if have == wanted {
                    continue 'outer;
                }
                if have > wanted {
                    return false;
                }
            }
            return false;
        }
        true
    }

    /// True when no marker of `excluded` is present.
    pub fn contains_none(&self, excluded: &[MarkerId]) -> bool {
        excluded.iter().all(|&marker| !self.contains(marker))
    }

    pub fn with(&self, marker: MarkerId) -> Self {
        let mut markers = self.markers.to_vec();
        if let Err(pos) = markers.binary_search(&marker) {
            markers.insert(pos, marker);
        }
        Self {
            markers: markers.into_boxed_slice(),
        }
    }

    pub fn without(&self, marker: MarkerId) -> Self {
        let markers: Vec<MarkerId> = self.markers.iter().copied().filter(|&m| m != marker).collect();
        Self {
            markers: markers.into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}
