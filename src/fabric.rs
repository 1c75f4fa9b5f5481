//! Stateful stitch synthesis.
//!
//! [`Fabric`] owns the yarn path store, the height index and the record of
//! which loops currently sit on which needle. Knits, tucks, transfers and
//! drops go through it; it picks start heights, stretches each carrier's
//! previous loop toward the new one and keeps the height index current.

use crate::carrier::CarrierLane;
use crate::error::Warning;
use crate::height::{HeightIndex, HeightKey, Orientation};
use crate::interpreter::KnitConfig;
use crate::needle::{Bed, BedNeedle, Direction, Side};
use crate::stitch::{
    KNIT_HEAD, LOOP_TOP, StitchSpec, TRANSFER_HEAD, box_start_x, lane_offset, stitch_box,
};
use crate::yarn::{Loop, LoopLocation, YarnStore};
use glam::Vec3;
use log::debug;
use std::collections::BTreeMap;
use std::ops::Bound;

/// A row of a carrier's path holding loops that currently sit on a needle.
///
/// A needle can hold loops from several rows at once, for example after a
/// transfer onto an occupied needle or a tuck in a later row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveLoop {
    pub carrier: usize,
    pub row: usize,
}

pub struct Fabric {
    config: KnitConfig,
    heights: HeightIndex,
    store: YarnStore,
    /// Every row with loops on each occupied needle, oldest first.
    active: BTreeMap<Bed, BTreeMap<i32, Vec<ActiveLoop>>>,
}

impl Fabric {
    pub fn new(config: KnitConfig) -> Self {
        Self {
            config,
            heights: HeightIndex::new(),
            store: YarnStore::new(),
            active: BTreeMap::new(),
        }
    }

    pub fn heights(&self) -> &HeightIndex {
        &self.heights
    }

    pub fn store(&self) -> &YarnStore {
        &self.store
    }

    pub fn into_parts(self) -> (YarnStore, HeightIndex) {
        (self.store, self.heights)
    }

    /// Rows holding loops on `at`. Empty when the needle is unoccupied.
    pub fn active(&self, at: BedNeedle) -> &[ActiveLoop] {
        self.active
            .get(&at.bed)
            .and_then(|bed| bed.get(&at.needle))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Loops currently held by a needle, across every row holding it.
    pub fn loops_at(&self, at: BedNeedle) -> Vec<&Loop> {
        self.active(at)
            .iter()
            .filter_map(|held| self.store.row(held.carrier, held.row)?.slot(at))
            .flatten()
            .collect()
    }

    /// Makes `held` the only row on `at`.
    fn set_active(&mut self, at: BedNeedle, held: ActiveLoop) {
        self.active.entry(at.bed).or_default().insert(at.needle, vec![held]);
    }

    /// Adds `held` to the rows on `at`.
    fn add_active(&mut self, at: BedNeedle, held: ActiveLoop) {
        let rows = self.active.entry(at.bed).or_default().entry(at.needle).or_default();
        if !rows.contains(&held) {
            rows.push(held);
        }
    }

    fn clear_active(&mut self, at: BedNeedle) -> Vec<ActiveLoop> {
        let Some(bed) = self.active.get_mut(&at.bed) else {
            return Vec::new();
        };
        let cleared = bed.remove(&at.needle).unwrap_or_default();
        if bed.is_empty() {
            self.active.remove(&at.bed);
        }
        cleared
    }

    /// Base height of the topmost loop held by `at`.
    fn min_height(&self, at: BedNeedle) -> Option<f32> {
        let top = self
            .loops_at(at)
            .into_iter()
            .filter_map(|l| l.points.get(LOOP_TOP).map(|p| p.y))
            .reduce(f32::max)?;
        Some(top - self.config.box_height / 6.0 - self.config.box_spacing)
    }

    /// Height of the nearest occupied needles on either side of `at`.
    fn neighbor_height(&self, at: BedNeedle) -> f32 {
        let Some(bed) = self.active.get(&at.bed) else {
            return 0.0;
        };
        let left = bed
            .range(..at.needle)
            .rev()
            .find_map(|(&n, _)| self.min_height(BedNeedle::new(at.bed, n)));
        let right = bed
            .range((Bound::Excluded(at.needle), Bound::Unbounded))
            .find_map(|(&n, _)| self.min_height(BedNeedle::new(at.bed, n)));
        [left, right].into_iter().flatten().fold(0.0, f32::max)
    }

    fn next_row(&self, carrier: usize, direction: Direction, at: BedNeedle, knit: bool) -> usize {
        let Some(path) = self.store.path(carrier) else {
            return 0;
        };
        let Some(current) = path.rows.len().checked_sub(1) else {
            return 0;
        };
        let row = &path.rows[current];
        if row.direction != direction || (knit && row.holds(at)) {
            current + 1
        } else {
            current
        }
    }

    /// Raises `height` over the lanes a yarn crosses between `at`'s bed and
    /// its own lane: higher lanes from the front, lower lanes from the back.
    fn clear_crossed_lanes(&self, height: f32, at: BedNeedle, lane: CarrierLane) -> f32 {
        let crossed = match at.bed.side() {
            Side::Front => lane.index + 1..lane.count,
            Side::Back => 0..lane.index,
        };
        self.heights
            .clear_lanes(height, at.needle, crossed, self.config.epsilon)
    }

    /// Pulls the corridor tail of the carrier's previous loop over to the
    /// start of a stitch at `at`, lifted clear of everything in between.
    /// Returns the height the yarn arrives at.
    fn stretch_previous(&mut self, lane: CarrierLane, direction: Direction, at: BedNeedle) -> Option<f32> {
        let previous = self.store.path(lane.index)?.last?;
        let tail_height = self
            .store
            .row(lane.index, previous.row)?
            .slot(previous.at)?
            .last()?
            .points
            .last()?
            .y;

        let lo = at.needle.min(previous.at.needle);
        let hi = at.needle.max(previous.at.needle);
        let mut height = self
            .heights
            .clear_span(tail_height, lo, hi, lane.index, self.config.epsilon);
        height = self.clear_crossed_lanes(height, at, lane);
        height = self.clear_crossed_lanes(height, previous.at, lane);

        let end_x = box_start_x(&self.config, direction, at.needle)
            + lane_offset(&self.config, direction, lane);
        let stitch = self.store.path_mut(lane.index).last_loop_mut()?;
        let n = stitch.points.len();
        if n >= 3 {
            stitch.points[n - 1].x = end_x;
            for point in &mut stitch.points[n - 3..] {
                point.y = height;
            }
        }
        self.heights
            .raise_range(lo..hi, Orientation::RightOf, lane.index, height);
        Some(height)
    }

    fn place(
        &mut self,
        direction: Direction,
        at: BedNeedle,
        lane: CarrierLane,
        height: f32,
        head_height: Option<f32>,
        knit: bool,
    ) -> LoopLocation {
        let row = self.next_row(lane.index, direction, at, knit);
        let carrier_height = match self.stretch_previous(lane, direction, at) {
            Some(h) => h,
            None => self.clear_crossed_lanes(height, at, lane),
        };

        let spec = StitchSpec {
            direction,
            bed: at.bed,
            needle: at.needle,
            lane,
            height,
            carrier_height,
        };
        let mut points = stitch_box(&self.config, &spec);
        if let Some(head) = head_height {
            // Neighbours stand higher: lift the head so the way back to the
            // lane does not cut through them.
            let lifted = stitch_box(&self.config, &StitchSpec { height: head, ..spec });
            points[KNIT_HEAD].copy_from_slice(&lifted[KNIT_HEAD]);
        }
        let top = points[LOOP_TOP].y;

        let stitch = Loop {
            points,
            carrier: lane.index,
            direction,
        };
        let target = self.store.open_row(lane.index, row, direction);
        if knit {
            target.replace(at, stitch);
        } else {
            target.extend(at, [stitch]);
        }
        let location = LoopLocation { row, at };
        self.store.path_mut(lane.index).last = Some(location);
        let held = ActiveLoop {
            carrier: lane.index,
            row,
        };
        if knit {
            // The new loop is pulled through the old ones, which leave the needle.
            self.set_active(at, held);
        } else {
            self.add_active(at, held);
        }

        let bed_orientation = match at.bed.side() {
            Side::Front => Orientation::FrontBed,
            Side::Back => Orientation::BackBed,
        };
        self.heights.raise(
            HeightKey::new(at.needle, Orientation::Corridor, lane.index),
            carrier_height,
        );
        self.heights
            .raise(HeightKey::new(at.needle, bed_orientation, lane.index), top);
        location
    }

    /// Knits a new loop at `at`, replacing what the slot of its row held.
    pub fn knit(&mut self, direction: Direction, at: BedNeedle, lane: CarrierLane) -> LoopLocation {
        let top = self.neighbor_height(at);
        let bottom = self
            .min_height(at)
            .map(|h| h + self.config.box_spacing)
            .unwrap_or(top);
        let head = (top > bottom).then_some(top);
        self.place(direction, at, lane, bottom, head, true)
    }

    /// Tucks a loop at `at`; tucks on one needle accumulate.
    pub fn tuck(&mut self, direction: Direction, at: BedNeedle, lane: CarrierLane) -> LoopLocation {
        let height = self
            .min_height(at)
            .unwrap_or_else(|| self.neighbor_height(at));
        self.place(direction, at, lane, height, None, false)
    }

    /// Moves every loop held by `from` onto `to`.
    ///
    /// The loops keep their rows and join whatever `to` already holds; their
    /// heads are redrawn at the destination. Nothing changes when `from`
    /// holds no loops.
    pub fn transfer(&mut self, from: BedNeedle, to: BedNeedle, lane_count: usize) -> Result<(), Warning> {
        let Some(from_height) = self.min_height(from) else {
            return Err(Warning::EmptyTransfer(from));
        };
        let height = self.min_height(to).unwrap_or(from_height);
        let sink = Vec3::Y * self.config.epsilon;

        for held in self.clear_active(from) {
            let Some(mut loops) = self
                .store
                .row_mut(held.carrier, held.row)
                .and_then(|row| row.take(from))
            else {
                continue;
            };
            let Some(first) = loops.first() else {
                continue;
            };
            debug!(
                "moving {} loop(s) of lane {} row {} from {from} to {to}",
                loops.len(),
                held.carrier,
                held.row
            );
            let direction = first.direction;
            let target = stitch_box(
                &self.config,
                &StitchSpec {
                    direction,
                    bed: to.bed,
                    needle: to.needle,
                    lane: CarrierLane {
                        index: first.carrier,
                        count: lane_count,
                    },
                    height,
                    carrier_height: height,
                },
            );
            for stitch in &mut loops {
                for i in TRANSFER_HEAD {
                    if let Some(point) = stitch.points.get_mut(i) {
                        *point = target[i] - sink;
                    }
                }
            }

            self.store
                .open_row(held.carrier, held.row, direction)
                .extend(to, loops);
            self.add_active(to, held);

            let path = self.store.path_mut(held.carrier);
            if let Some(last) = path.last.as_mut()
                && last.row == held.row
                && last.at == from
            {
                last.at = to;
            }
        }
        Ok(())
    }

    /// Lets the loops on `at` go. They stay in the yarn path.
    pub fn drop_loops(&mut self, at: BedNeedle) -> Result<(), Warning> {
        let released = self.clear_active(at);
        if released.is_empty() {
            return Err(Warning::EmptyDrop(at));
        }
        debug!("dropped {at} ({} row(s))", released.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LANE: CarrierLane = CarrierLane { index: 0, count: 1 };

    fn fabric() -> Fabric {
        Fabric::new(KnitConfig::default())
    }

    #[test]
    fn tucks_on_one_needle_accumulate() {
        let mut f = fabric();
        f.tuck(Direction::Right, BedNeedle::front(0), LANE);
        f.tuck(Direction::Right, BedNeedle::front(0), LANE);
        assert_eq!(f.loops_at(BedNeedle::front(0)).len(), 2);
        assert_eq!(f.active(BedNeedle::front(0)).len(), 1);
        assert_eq!(f.store().path(0).unwrap().rows.len(), 1);
    }

    #[test]
    fn knitting_an_occupied_needle_stacks_in_a_new_row() {
        let mut f = fabric();
        let first = f.knit(Direction::Right, BedNeedle::front(0), LANE);
        let second = f.knit(Direction::Right, BedNeedle::front(0), LANE);
        assert_eq!((first.row, second.row), (0, 1));
        let base = |loc: LoopLocation| f.store().row(0, loc.row).unwrap().front(0).unwrap()[0].points[1].y;
        let spacing = KnitConfig::default().box_spacing;
        assert!((base(second) - base(first) - spacing).abs() < 1e-6);
    }

    #[test]
    fn reversing_direction_starts_a_new_row() {
        let mut f = fabric();
        f.tuck(Direction::Right, BedNeedle::front(0), LANE);
        f.tuck(Direction::Right, BedNeedle::front(1), LANE);
        let loc = f.knit(Direction::Left, BedNeedle::front(1), LANE);
        assert_eq!(loc.row, 1);
    }

    #[test]
    fn previous_tail_is_pulled_to_the_next_stitch() {
        let config = KnitConfig::default();
        let mut f = fabric();
        f.knit(Direction::Right, BedNeedle::front(0), LANE);
        f.knit(Direction::Right, BedNeedle::front(3), LANE);
        let first = &f.store().row(0, 0).unwrap().front(0).unwrap()[0];
        let expected = box_start_x(&config, Direction::Right, 3);
        assert!((first.points.last().unwrap().x - expected).abs() < 1e-6);
    }

    #[test]
    fn tail_clears_a_higher_span() {
        let mut f = fabric();
        f.knit(Direction::Right, BedNeedle::front(0), LANE);
        f.heights.raise(HeightKey::new(1, Orientation::RightOf, 0), 2.0);
        f.knit(Direction::Right, BedNeedle::front(3), LANE);
        let first = &f.store().row(0, 0).unwrap().front(0).unwrap()[0];
        assert!((first.points.last().unwrap().y - 2.1).abs() < 1e-6);
        let gap = f.heights().get(HeightKey::new(1, Orientation::RightOf, 0)).unwrap();
        assert!((gap - 2.1).abs() < 1e-6);
    }

    #[test]
    fn front_stitches_clear_higher_lanes() {
        let mut f = fabric();
        let lane = CarrierLane { index: 0, count: 2 };
        f.heights.raise(HeightKey::new(4, Orientation::Corridor, 1), 1.0);
        f.tuck(Direction::Right, BedNeedle::front(4), lane);
        let stitch = f.loops_at(BedNeedle::front(4))[0];
        assert!((stitch.points[0].y - 1.1).abs() < 1e-6);
    }

    #[test]
    fn transfer_moves_ownership_and_back() {
        let mut f = fabric();
        f.knit(Direction::Right, BedNeedle::front(0), LANE);
        f.transfer(BedNeedle::front(0), BedNeedle::back(0), 1).unwrap();
        assert!(f.loops_at(BedNeedle::front(0)).is_empty());
        assert_eq!(f.loops_at(BedNeedle::back(0)).len(), 1);
        f.transfer(BedNeedle::back(0), BedNeedle::front(0), 1).unwrap();
        let row = f.store().row(0, 0).unwrap();
        assert!(row.back(0).is_none());
        assert!(f.active(BedNeedle::back(0)).is_empty());
        assert_eq!(row.front(0).map(<[Loop]>::len), Some(1));
    }

    #[test]
    fn transfer_onto_an_occupied_needle_keeps_both_rows() {
        let mut f = fabric();
        f.knit(Direction::Right, BedNeedle::front(0), LANE);
        f.knit(Direction::Left, BedNeedle::back(0), LANE);
        f.transfer(BedNeedle::front(0), BedNeedle::back(0), 1).unwrap();
        assert!(f.loops_at(BedNeedle::front(0)).is_empty());
        assert_eq!(f.loops_at(BedNeedle::back(0)).len(), 2);
        assert_eq!(
            f.active(BedNeedle::back(0)),
            &[ActiveLoop { carrier: 0, row: 1 }, ActiveLoop { carrier: 0, row: 0 }]
        );

        f.transfer(BedNeedle::back(0), BedNeedle::front(0), 1).unwrap();
        assert!(f.loops_at(BedNeedle::back(0)).is_empty());
        assert_eq!(f.loops_at(BedNeedle::front(0)).len(), 2);
        for row in 0..2 {
            let row = f.store().row(0, row).unwrap();
            assert!(row.back(0).is_none(), "nothing left behind on the back bed");
            assert_eq!(row.front(0).map(<[Loop]>::len), Some(1));
        }

        f.drop_loops(BedNeedle::front(0)).unwrap();
        assert!(f.active(BedNeedle::front(0)).is_empty());
        assert_eq!(f.store().loop_count(), 2);
    }

    #[test]
    fn transferred_heads_sink_below_the_destination_box() {
        let config = KnitConfig::default();
        let mut f = fabric();
        f.knit(Direction::Right, BedNeedle::front(0), LANE);
        let height = f.min_height(BedNeedle::front(0)).unwrap();
        f.transfer(BedNeedle::front(0), BedNeedle::back(0), 1).unwrap();

        let target = stitch_box(
            &config,
            &StitchSpec {
                direction: Direction::Right,
                bed: Bed::Back,
                needle: 0,
                lane: LANE,
                height,
                carrier_height: height,
            },
        );
        let moved = f.loops_at(BedNeedle::back(0))[0];
        for i in TRANSFER_HEAD {
            let expected = target[i] - Vec3::Y * config.epsilon;
            assert!(
                moved.points[i].abs_diff_eq(expected, 1e-5),
                "point {i}: {} vs {expected}",
                moved.points[i]
            );
        }
        assert_eq!(moved.points[1].z, config.front_bed_depth, "legs stay where they were knitted");
    }

    #[test]
    fn knit_head_rises_to_taller_neighbours() {
        let config = KnitConfig::default();
        let mut f = fabric();
        f.knit(Direction::Right, BedNeedle::front(1), LANE);
        for _ in 0..3 {
            f.knit(Direction::Right, BedNeedle::front(0), LANE);
        }
        let neighbour = f.min_height(BedNeedle::front(0)).unwrap();
        let base = f.min_height(BedNeedle::front(1)).unwrap() + config.box_spacing;
        assert!(neighbour > base);

        let loc = f.knit(Direction::Right, BedNeedle::front(1), LANE);
        let stitch = &f.store().row(0, loc.row).unwrap().front(1).unwrap()[0];
        assert!((stitch.points[1].y - base).abs() < 1e-5, "legs start at the stacked base");

        let lifted = stitch_box(
            &config,
            &StitchSpec {
                direction: Direction::Right,
                bed: Bed::Front,
                needle: 1,
                lane: LANE,
                height: neighbour,
                carrier_height: 0.0,
            },
        );
        for i in KNIT_HEAD {
            assert!(
                stitch.points[i].abs_diff_eq(lifted[i], 1e-5),
                "point {i}: {} vs {}",
                stitch.points[i],
                lifted[i]
            );
        }
    }

    #[test]
    fn transfer_from_an_empty_needle_changes_nothing() {
        let mut f = fabric();
        f.knit(Direction::Right, BedNeedle::front(1), LANE);
        let before = f.store().clone();
        assert_eq!(
            f.transfer(BedNeedle::front(0), BedNeedle::back(0), 1),
            Err(Warning::EmptyTransfer(BedNeedle::front(0)))
        );
        assert_eq!(f.store(), &before);
    }

    #[test]
    fn drop_releases_the_needle_but_keeps_the_yarn() {
        let mut f = fabric();
        f.knit(Direction::Right, BedNeedle::front(2), LANE);
        f.drop_loops(BedNeedle::front(2)).unwrap();
        assert!(f.loops_at(BedNeedle::front(2)).is_empty());
        assert_eq!(f.store().loop_count(), 1);
        assert_eq!(
            f.drop_loops(BedNeedle::front(2)),
            Err(Warning::EmptyDrop(BedNeedle::front(2)))
        );
    }
}
