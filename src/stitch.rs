//! Fixed-topology loop outline for a single stitch.
//!
//! Every stitch is drawn as the same 18-point "box": down from the carrier
//! lane onto the bed plane, a zig-zag loop head, and back out to the lane
//! toward the next needle. Heights are chosen by the caller
//! ([`crate::fabric::Fabric`]); this module only lays the points out.

use crate::carrier::CarrierLane;
use crate::interpreter::KnitConfig;
use crate::needle::{Bed, Direction};
use glam::Vec3;
use std::ops::RangeInclusive;

/// Number of control points in every loop.
pub const LOOP_POINTS: usize = 18;
/// Index of the first point at the top of the loop head.
pub const LOOP_TOP: usize = 6;
/// Points from this index on lie in the carrier corridor.
pub const CORRIDOR_START: usize = 16;
/// Head points lifted when neighbouring loops stand higher than a knit.
pub const KNIT_HEAD: RangeInclusive<usize> = 4..=11;
/// Head points rewritten when a loop is transferred.
pub const TRANSFER_HEAD: RangeInclusive<usize> = 5..=10;

/// Everything needed to lay out one stitch box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StitchSpec {
    pub direction: Direction,
    pub bed: Bed,
    pub needle: i32,
    pub lane: CarrierLane,
    /// Base height of the loop.
    pub height: f32,
    /// Height at which the yarn arrives from the carrier lane.
    pub carrier_height: f32,
}

/// X coordinate where a box at `needle` starts for a sweep in `direction`.
pub fn box_start_x(config: &KnitConfig, direction: Direction, needle: i32) -> f32 {
    let x = needle as f32 * config.pitch();
    match direction {
        Direction::Left => x,
        Direction::Right | Direction::None => x - config.box_width,
    }
}

/// Per-lane horizontal offset of the bed-to-lane drop.
pub fn lane_offset(config: &KnitConfig, direction: Direction, lane: CarrierLane) -> f32 {
    let padding = match direction {
        Direction::Left => -config.padding,
        Direction::Right | Direction::None => config.padding,
    };
    padding / lane.count.max(1) as f32 * lane.index as f32
}

/// Lays out the control points of one loop.
pub fn stitch_box(config: &KnitConfig, spec: &StitchSpec) -> Vec<Vec3> {
    let leftward = spec.direction == Direction::Left;
    let width = config.box_width - config.padding * 2.0;
    let dx = if leftward { -width / 5.0 } else { width / 5.0 };
    let dy = config.box_height / 3.0;
    let dz = if spec.bed.is_back() {
        -config.box_depth / 2.0
    } else {
        config.box_depth / 2.0
    };
    let padding = if leftward { -config.padding } else { config.padding };

    let lane_depth = config.lane_depth(spec.lane);
    let start = box_start_x(config, spec.direction, spec.needle);
    let sub_pad = lane_offset(config, spec.direction, spec.lane);
    let bed_x1 = start + padding;
    let bed_x2 = start + padding + 5.0 * dx + padding - sub_pad;
    let next_start = if leftward {
        start - config.pitch()
    } else {
        start + config.pitch()
    };

    let mut points = Vec::with_capacity(LOOP_POINTS);
    let mut x = start + sub_pad;
    let mut y = spec.height;
    let mut z = config.bed_depth(spec.bed);

    points.push(Vec3::new(x, spec.carrier_height, z));
    points.push(Vec3::new(x, y, z));

    x = bed_x1;
    points.push(Vec3::new(x, y, z));

    // Loop head: up one leg, across the crown, down the other leg.
    x += 2.0 * dx;
    z -= dz;
    points.push(Vec3::new(x, y, z));

    y += dy;
    z += 2.0 * dz;
    points.push(Vec3::new(x, y, z));

    x -= dx;
    points.push(Vec3::new(x, y, z));

    y += dy;
    points.push(Vec3::new(x, y, z));

    x += dx;
    z -= 2.0 * dz;
    points.push(Vec3::new(x, y, z));

    x += dx;
    points.push(Vec3::new(x, y, z));

    x += dx;
    z += 2.0 * dz;
    points.push(Vec3::new(x, y, z));

    y -= dy;
    points.push(Vec3::new(x, y, z));

    x -= dx;
    points.push(Vec3::new(x, y, z));

    y -= dy;
    z -= 2.0 * dz;
    points.push(Vec3::new(x, y, z));

    x += 2.0 * dx;
    z += dz;
    points.push(Vec3::new(x, y, z));

    x = bed_x2;
    points.push(Vec3::new(x, y, z));
    points.push(Vec3::new(x, y, z));

    // Back out to the carrier lane.
    y = spec.height;
    z = lane_depth;
    points.push(Vec3::new(x, y, z));

    x = next_start;
    points.push(Vec3::new(x, y, z));

    points
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(direction: Direction, bed: Bed) -> StitchSpec {
        StitchSpec {
            direction,
            bed,
            needle: 2,
            lane: CarrierLane { index: 0, count: 1 },
            height: 0.0,
            carrier_height: 0.0,
        }
    }

    #[test]
    fn every_box_has_the_same_topology() {
        let config = KnitConfig::default();
        for bed in [Bed::Front, Bed::Back, Bed::FrontSlider, Bed::BackSlider] {
            for dir in [Direction::Left, Direction::Right] {
                assert_eq!(stitch_box(&config, &spec(dir, bed)).len(), LOOP_POINTS);
            }
        }
    }

    #[test]
    fn head_sits_on_the_bed_plane_and_tail_in_the_lane() {
        let config = KnitConfig::default();
        let front = stitch_box(&config, &spec(Direction::Right, Bed::Front));
        assert_eq!(front[1].z, config.front_bed_depth);
        assert_eq!(front[CORRIDOR_START].z, config.carrier_depth);
        let back = stitch_box(&config, &spec(Direction::Right, Bed::Back));
        assert_eq!(back[1].z, config.back_bed_depth);
        let slider = stitch_box(&config, &spec(Direction::Right, Bed::BackSlider));
        assert_eq!(slider[1].z, config.back_slider_depth);
    }

    #[test]
    fn loop_top_is_two_thirds_of_the_box_above_the_base() {
        let config = KnitConfig::default();
        let mut s = spec(Direction::Left, Bed::Front);
        s.height = 1.5;
        let points = stitch_box(&config, &s);
        assert!((points[LOOP_TOP].y - (1.5 + 2.0 / 3.0)).abs() < 1e-6);
    }

    #[test]
    fn direction_decides_where_the_box_leaves_for() {
        let config = KnitConfig::default();
        let right = stitch_box(&config, &spec(Direction::Right, Bed::Front));
        let left = stitch_box(&config, &spec(Direction::Left, Bed::Front));
        assert!(right[LOOP_POINTS - 1].x > right[0].x);
        assert!(left[LOOP_POINTS - 1].x < left[0].x);
        assert!((right[LOOP_POINTS - 1].x - right[0].x - config.pitch()).abs() < 1e-6);
    }

    #[test]
    fn first_point_arrives_at_the_carrier_height() {
        let config = KnitConfig::default();
        let mut s = spec(Direction::Right, Bed::Front);
        s.carrier_height = 0.7;
        let points = stitch_box(&config, &s);
        assert_eq!(points[0].y, 0.7);
        assert_eq!(points[1].y, 0.0);
    }
}
