//! Position remapping between element lists.
//!
//! An index map records, for each element of one list, where that element
//! sits in another list. The binder uses index maps to turn an expression's
//! parameter list into tuple positions, and compiled rules use them to find
//! action arguments in an activation's tuple.

use std::fmt;

/// For each source element, its position in the target list (if present).
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct IndexMap {
    map: Vec<Option<usize>>,
}

impl IndexMap {
    /// Builds the map of `elements` into `target`.
    ///
    /// Entry `i` is the position of `elements[i]` in `target`, or `None`
    /// when it does not occur there. The first occurrence wins.
    #[must_use]
    pub fn create<T: PartialEq>(elements: &[T], target: &[T]) -> Self {
        let map = elements
            .iter()
            .map(|e| target.iter().position(|t| t == e))
            .collect();
        Self { map }
    }

    /// Builds a map directly from positions.
    #[must_use]
    pub fn from_positions(map: Vec<Option<usize>>) -> Self {
        Self { map }
    }

    /// Chains two maps: `second` maps sources into an intermediate list,
    /// `first` maps that list onward. `result[i] = first[second[i]]`.
    #[must_use]
    pub fn compose(first: &Self, second: &Self) -> Self {
        let map = second
            .map
            .iter()
            .map(|slot| slot.and_then(|i| first.get(i)))
            .collect();
        Self { map }
    }

    /// Target position of source element `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<usize> {
        self.map.get(index).copied().flatten()
    }

    /// Number of source elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the map has no source elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns true if at least one element is mapped.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.map.iter().any(Option::is_some)
    }

    /// Index of the first unmapped element, if any.
    #[must_use]
    pub fn first_unmapped(&self) -> Option<usize> {
        self.map.iter().position(Option::is_none)
    }

    /// All entries in source order.
    pub fn iter(&self) -> impl Iterator<Item = Option<usize>> + '_ {
        self.map.iter().copied()
    }
}

impl fmt::Debug for IndexMap {
    #[allow(clippy::cast_possible_wrap)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.map.iter().map(|slot| match slot {
                Some(i) => *i as isize,
                None => -1,
            }))
            .finish()
    }
}
