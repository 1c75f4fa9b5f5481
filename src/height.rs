//! Sparse height index used to keep loops from overlapping.
//!
//! Heights are recorded per needle, per side of the needle and per carrier
//! lane. Writes only ever raise a value; the index is a one-dimensional
//! horizon along the needle axis, not a collision detector.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

/// Which part of a needle's column a height belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Orientation {
    /// The carrier lane directly above the needle.
    Corridor,
    /// The carrier lane in the gap left of the needle.
    LeftOf,
    /// The carrier lane in the gap right of the needle.
    RightOf,
    /// The loop head on the front bed.
    FrontBed,
    /// The loop head on the back bed.
    BackBed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HeightKey {
    pub needle: i32,
    pub orientation: Orientation,
    pub lane: usize,
}

impl HeightKey {
    /// Builds a key. The gap left of `n` is the gap right of `n - 1`, so
    /// [`Orientation::LeftOf`] keys are stored as `RightOf` their neighbour.
    /// The leftmost needle has no gap to its left and shares its own right gap.
    pub fn new(needle: i32, orientation: Orientation, lane: usize) -> Self {
        match orientation {
            Orientation::LeftOf => Self {
                needle: needle.saturating_sub(1),
                orientation: Orientation::RightOf,
                lane,
            },
            _ => Self {
                needle,
                orientation,
                lane,
            },
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct HeightIndex {
    heights: BTreeMap<HeightKey, f32>,
}

impl HeightIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: HeightKey) -> Option<f32> {
        self.heights.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.heights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heights.is_empty()
    }

    /// Records `height` at `key` unless something higher is already there.
    pub fn raise(&mut self, key: HeightKey, height: f32) {
        let slot = self.heights.entry(key).or_insert(height);
        if height > *slot {
            *slot = height;
        }
    }

    /// Highest recorded value over `needles` for one orientation and lane.
    pub fn range_max(&self, needles: Range<i32>, orientation: Orientation, lane: usize) -> Option<f32> {
        if needles.is_empty() {
            return None;
        }
        let first = HeightKey::new(needles.start, orientation, lane);
        let last = HeightKey::new(needles.end - 1, orientation, lane);
        self.heights
            .range(first..=last)
            .filter(|(key, _)| key.orientation == first.orientation && key.lane == lane)
            .map(|(_, &height)| height)
            .reduce(f32::max)
    }

    /// Raises every key over `needles` to at least `height`.
    pub fn raise_range(&mut self, needles: Range<i32>, orientation: Orientation, lane: usize, height: f32) {
        for n in needles {
            self.raise(HeightKey::new(n, orientation, lane), height);
        }
    }

    /// Height that clears the carrier gaps between needles `lo` and `hi`.
    ///
    /// Returns `floor` untouched when no recorded gap reaches it, otherwise
    /// the highest recorded gap plus `epsilon`.
    pub fn clear_span(&self, floor: f32, lo: i32, hi: i32, lane: usize, epsilon: f32) -> f32 {
        lift(floor, self.range_max(lo..hi, Orientation::RightOf, lane), epsilon)
    }

    /// Height that clears the corridor of every lane in `lanes` at `needle`.
    pub fn clear_lanes(
        &self,
        floor: f32,
        needle: i32,
        lanes: impl IntoIterator<Item = usize>,
        epsilon: f32,
    ) -> f32 {
        let highest = lanes
            .into_iter()
            .filter_map(|lane| self.get(HeightKey::new(needle, Orientation::Corridor, lane)))
            .reduce(f32::max);
        lift(floor, highest, epsilon)
    }
}

fn lift(floor: f32, highest: Option<f32>, epsilon: f32) -> f32 {
    match highest {
        Some(max) if max >= floor => max + epsilon,
        _ => floor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn left_of_is_the_right_gap_of_the_previous_needle() {
        let mut index = HeightIndex::new();
        index.raise(HeightKey::new(4, Orientation::LeftOf, 0), 2.0);
        assert_eq!(index.get(HeightKey::new(3, Orientation::RightOf, 0)), Some(2.0));
    }

    #[test]
    fn raise_never_lowers() {
        let mut index = HeightIndex::new();
        let key = HeightKey::new(0, Orientation::Corridor, 1);
        index.raise(key, 3.0);
        index.raise(key, 1.0);
        assert_eq!(index.get(key), Some(3.0));
        index.raise(key, 4.5);
        assert_eq!(index.get(key), Some(4.5));
    }

    #[test]
    fn range_queries_cover_half_open_ranges() {
        let mut index = HeightIndex::new();
        index.raise_range(0..3, Orientation::RightOf, 0, 1.0);
        index.raise(HeightKey::new(1, Orientation::RightOf, 0), 2.0);
        assert_eq!(index.range_max(0..3, Orientation::RightOf, 0), Some(2.0));
        assert_eq!(index.range_max(3..6, Orientation::RightOf, 0), None);
        assert_eq!(index.range_max(0..3, Orientation::RightOf, 1), None);
    }

    #[test]
    fn range_max_skips_other_orientations_and_lanes() {
        let mut index = HeightIndex::new();
        index.raise(HeightKey::new(2, Orientation::RightOf, 0), 3.0);
        index.raise(HeightKey::new(2, Orientation::Corridor, 0), 9.0);
        index.raise(HeightKey::new(2, Orientation::FrontBed, 0), 9.0);
        index.raise(HeightKey::new(2, Orientation::RightOf, 1), 9.0);
        assert_eq!(index.range_max(3..4, Orientation::LeftOf, 0), Some(3.0));
        assert_eq!(index.range_max(0..5, Orientation::RightOf, 0), Some(3.0));
        assert_eq!(index.range_max(2..2, Orientation::RightOf, 0), None);
        assert_eq!(index.range_max(i32::MIN..i32::MIN + 1, Orientation::LeftOf, 0), None);
    }

    #[test]
    fn clear_span_adds_epsilon_only_on_conflict() {
        let mut index = HeightIndex::new();
        assert_eq!(index.clear_span(1.0, 0, 4, 0, 0.1), 1.0);
        index.raise_range(1..3, Orientation::RightOf, 0, 2.0);
        let lifted = index.clear_span(1.0, 0, 4, 0, 0.1);
        assert!((lifted - 2.1).abs() < 1e-6);
        assert_eq!(index.clear_span(3.0, 0, 4, 0, 0.1), 3.0);
    }

    #[test]
    fn clear_lanes_checks_other_carriers_at_one_needle() {
        let mut index = HeightIndex::new();
        index.raise(HeightKey::new(5, Orientation::Corridor, 2), 1.5);
        assert_eq!(index.clear_lanes(0.5, 5, [0, 1], 0.1), 0.5);
        let lifted = index.clear_lanes(0.5, 5, [1, 2], 0.1);
        assert!((lifted - 1.6).abs() < 1e-6);
    }
}
