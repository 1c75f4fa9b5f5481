//! Needle addressing and carriage directions.

use crate::error::{KnitoutError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Which bed of the machine a needle belongs to.
///
/// The variant order is the serialization order at a single needle: front
/// bed first, then its sliders, then the back sliders and the back bed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Bed {
    Front,
    FrontSlider,
    BackSlider,
    Back,
}

/// Front or back, ignoring sliders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Side {
    Front,
    Back,
}

impl Bed {
    pub fn side(self) -> Side {
        match self {
            Bed::Front | Bed::FrontSlider => Side::Front,
            Bed::Back | Bed::BackSlider => Side::Back,
        }
    }

    pub fn is_front(self) -> bool {
        self.side() == Side::Front
    }

    pub fn is_back(self) -> bool {
        self.side() == Side::Back
    }

    pub fn is_slider(self) -> bool {
        matches!(self, Bed::FrontSlider | Bed::BackSlider)
    }

    /// True for the needle beds proper (the ones with hooks).
    pub fn is_hook(self) -> bool {
        !self.is_slider()
    }

    fn prefix(self) -> &'static str {
        match self {
            Bed::Front => "f",
            Bed::FrontSlider => "fs",
            Bed::BackSlider => "bs",
            Bed::Back => "b",
        }
    }
}

/// Direction of a carriage sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// `-`: decreasing needle index.
    Left,
    /// `+`: increasing needle index.
    Right,
    /// Directionless operations (drop, xfer).
    None,
}

impl Direction {
    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "+" => Ok(Direction::Right),
            "-" => Ok(Direction::Left),
            other => Err(KnitoutError::InvalidDirection(other.to_string())),
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
            Direction::None => Direction::None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Left => f.write_str("-"),
            Direction::Right => f.write_str("+"),
            Direction::None => Ok(()),
        }
    }
}

/// A needle on a particular bed, e.g. `f12`, `bs-3`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BedNeedle {
    pub bed: Bed,
    pub needle: i32,
}

fn needle_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(f|b|fs|bs)(-?\d+)$").expect("needle regex must compile"))
}

impl BedNeedle {
    pub fn new(bed: Bed, needle: i32) -> Self {
        Self { bed, needle }
    }

    pub fn front(needle: i32) -> Self {
        Self::new(Bed::Front, needle)
    }

    pub fn back(needle: i32) -> Self {
        Self::new(Bed::Back, needle)
    }

    /// Machine slot of this needle under `racking`.
    ///
    /// Front needles sit in their own slot; back needles are shifted by
    /// `floor(racking)`. Fails when the shifted slot leaves the `i32` range.
    pub fn slot(&self, racking: f64) -> Result<i32> {
        match self.bed.side() {
            Side::Front => Ok(self.needle),
            Side::Back => i64::from(self.needle)
                .checked_add(racking.floor() as i64)
                .and_then(|slot| i32::try_from(slot).ok())
                .ok_or(KnitoutError::SlotOutOfRange {
                    needle: *self,
                    racking,
                }),
        }
    }

    /// [`BedNeedle::slot`] in floating point, which cannot overflow.
    pub fn slot_position(&self, racking: f64) -> f64 {
        match self.bed.side() {
            Side::Front => f64::from(self.needle),
            Side::Back => f64::from(self.needle) + racking.floor(),
        }
    }
}

impl FromStr for BedNeedle {
    type Err = KnitoutError;

    fn from_str(s: &str) -> Result<Self> {
        let caps = needle_re()
            .captures(s)
            .ok_or_else(|| KnitoutError::InvalidNeedle(s.to_string()))?;
        let bed = match &caps[1] {
            "f" => Bed::Front,
            "b" => Bed::Back,
            "fs" => Bed::FrontSlider,
            _ => Bed::BackSlider,
        };
        let needle = caps[2]
            .parse()
            .map_err(|_| KnitoutError::InvalidNeedle(s.to_string()))?;
        Ok(Self { bed, needle })
    }
}

impl fmt::Display for BedNeedle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.bed.prefix(), self.needle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_bed_prefix() {
        assert_eq!("f0".parse::<BedNeedle>().unwrap(), BedNeedle::front(0));
        assert_eq!("b-4".parse::<BedNeedle>().unwrap(), BedNeedle::back(-4));
        assert_eq!(
            "fs7".parse::<BedNeedle>().unwrap(),
            BedNeedle::new(Bed::FrontSlider, 7)
        );
        assert_eq!(
            "bs12".parse::<BedNeedle>().unwrap(),
            BedNeedle::new(Bed::BackSlider, 12)
        );
    }

    #[test]
    fn rejects_malformed_needles() {
        for bad in ["x3", "f", "f1.5", "F2", "f 2", "sf1", "b+3"] {
            assert!(
                matches!(bad.parse::<BedNeedle>(), Err(KnitoutError::InvalidNeedle(_))),
                "{bad} should not parse"
            );
        }
    }

    #[test]
    fn display_round_trips_the_knitout_spelling() {
        assert_eq!(BedNeedle::new(Bed::BackSlider, -2).to_string(), "bs-2");
    }

    #[test]
    fn back_slots_shift_by_floor_of_racking() {
        assert_eq!(BedNeedle::front(5).slot(1.25).unwrap(), 5);
        assert_eq!(BedNeedle::back(5).slot(1.25).unwrap(), 6);
        assert_eq!(BedNeedle::back(5).slot(-0.75).unwrap(), 4);
        assert_eq!(BedNeedle::new(Bed::BackSlider, 2).slot(2.0).unwrap(), 4);
        assert_eq!(BedNeedle::back(5).slot_position(-0.75), 4.0);
    }

    #[test]
    fn slots_past_the_needle_range_are_rejected() {
        assert!(matches!(
            BedNeedle::back(i32::MAX).slot(1.0),
            Err(KnitoutError::SlotOutOfRange { .. })
        ));
        assert!(matches!(
            BedNeedle::back(i32::MIN).slot(-0.75),
            Err(KnitoutError::SlotOutOfRange { .. })
        ));
        assert_eq!(BedNeedle::front(i32::MAX).slot(1.0).unwrap(), i32::MAX);
        assert_eq!(BedNeedle::back(i32::MAX).slot(-1.0).unwrap(), i32::MAX - 1);
    }

    #[test]
    fn slider_and_side_queries() {
        assert!(Bed::FrontSlider.is_front());
        assert!(Bed::FrontSlider.is_slider());
        assert!(Bed::Back.is_hook());
        assert!(Bed::BackSlider.is_back());
    }
}
