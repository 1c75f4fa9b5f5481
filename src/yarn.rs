//! The yarn path store and its serialization to coordinate records.
//!
//! Loops are stored per carrier, per row, per bed needle. A row is one
//! continuous sweep of one carrier; it starts over when the carrier turns
//! around or knits again on a needle the current row already holds.

use crate::needle::{Bed, BedNeedle, Direction};
use crate::stitch::CORRIDOR_START;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};

/// One stitch worth of yarn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Loop {
    pub points: Vec<Vec3>,
    /// Lane index of the carrier that made the loop.
    pub carrier: usize,
    /// Sweep direction the loop was made in.
    pub direction: Direction,
}

/// Loops made by one carrier during one sweep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct YarnRow {
    pub direction: Direction,
    /// Absent needles are unoccupied; present ones hold at least one loop.
    beds: BTreeMap<Bed, BTreeMap<i32, Vec<Loop>>>,
}

impl YarnRow {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            beds: BTreeMap::new(),
        }
    }

    pub fn slot(&self, at: BedNeedle) -> Option<&[Loop]> {
        self.beds
            .get(&at.bed)
            .and_then(|bed| bed.get(&at.needle))
            .map(Vec::as_slice)
    }

    pub fn slot_mut(&mut self, at: BedNeedle) -> Option<&mut Vec<Loop>> {
        self.beds.get_mut(&at.bed).and_then(|bed| bed.get_mut(&at.needle))
    }

    pub fn front(&self, needle: i32) -> Option<&[Loop]> {
        self.slot(BedNeedle::front(needle))
    }

    pub fn back(&self, needle: i32) -> Option<&[Loop]> {
        self.slot(BedNeedle::back(needle))
    }

    pub fn holds(&self, at: BedNeedle) -> bool {
        self.slot(at).is_some()
    }

    /// Replaces whatever the needle held with a single loop.
    pub fn replace(&mut self, at: BedNeedle, stitch: Loop) {
        self.beds.entry(at.bed).or_default().insert(at.needle, vec![stitch]);
    }

    /// Adds loops on top of whatever the needle holds.
    pub fn extend(&mut self, at: BedNeedle, loops: impl IntoIterator<Item = Loop>) {
        let slot = self.beds.entry(at.bed).or_default().entry(at.needle).or_default();
        slot.extend(loops);
        if slot.is_empty() {
            self.take(at);
        }
    }

    /// Removes and returns the needle's loops, leaving it unoccupied.
    pub fn take(&mut self, at: BedNeedle) -> Option<Vec<Loop>> {
        let bed = self.beds.get_mut(&at.bed)?;
        let loops = bed.remove(&at.needle);
        if bed.is_empty() {
            self.beds.remove(&at.bed);
        }
        loops
    }

    pub fn loop_count(&self) -> usize {
        self.beds.values().flat_map(|bed| bed.values()).map(Vec::len).sum()
    }

    /// Occupied needles in traversal order.
    ///
    /// Needles run ascending for rightward rows and descending for leftward
    /// ones. At a single needle the front bed always comes before the back.
    pub fn traversal(&self) -> Vec<(BedNeedle, &[Loop])> {
        let mut slots: Vec<(BedNeedle, &[Loop])> = self
            .beds
            .iter()
            .flat_map(|(&bed, needles)| {
                needles
                    .iter()
                    .map(move |(&needle, loops)| (BedNeedle::new(bed, needle), loops.as_slice()))
            })
            .collect();
        let leftward = self.direction == Direction::Left;
        slots.sort_by(|(a, _), (b, _)| {
            let by_needle = if leftward {
                b.needle.cmp(&a.needle)
            } else {
                a.needle.cmp(&b.needle)
            };
            by_needle.then(a.bed.cmp(&b.bed))
        });
        slots
    }
}

/// Where a particular loop lives in a carrier's path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopLocation {
    pub row: usize,
    pub at: BedNeedle,
}

/// Everything one carrier has knitted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct YarnPath {
    pub rows: Vec<YarnRow>,
    /// The loop most recently made by this carrier, whose corridor tail is
    /// stretched toward the next stitch.
    pub last: Option<LoopLocation>,
}

impl YarnPath {
    /// Last loop in the slot holding this carrier's most recent stitch.
    pub fn last_loop_mut(&mut self) -> Option<&mut Loop> {
        let location = self.last?;
        self.rows
            .get_mut(location.row)?
            .slot_mut(location.at)?
            .last_mut()
    }
}

/// Per-carrier yarn paths, keyed by lane index.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct YarnStore {
    paths: BTreeMap<usize, YarnPath>,
}

impl YarnStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(&self, carrier: usize) -> Option<&YarnPath> {
        self.paths.get(&carrier)
    }

    pub fn path_mut(&mut self, carrier: usize) -> &mut YarnPath {
        self.paths.entry(carrier).or_default()
    }

    pub fn paths(&self) -> impl Iterator<Item = (usize, &YarnPath)> {
        self.paths.iter().map(|(&c, p)| (c, p))
    }

    pub fn row(&self, carrier: usize, row: usize) -> Option<&YarnRow> {
        self.paths.get(&carrier)?.rows.get(row)
    }

    pub fn row_mut(&mut self, carrier: usize, row: usize) -> Option<&mut YarnRow> {
        self.paths.get_mut(&carrier)?.rows.get_mut(row)
    }

    /// Returns row `row` of `carrier`, opening it with `direction` if it is
    /// the next row to be started.
    pub fn open_row(&mut self, carrier: usize, row: usize, direction: Direction) -> &mut YarnRow {
        let path = self.path_mut(carrier);
        while path.rows.len() <= row {
            path.rows.push(YarnRow::new(direction));
        }
        &mut path.rows[row]
    }

    pub fn loop_count(&self) -> usize {
        self.paths
            .values()
            .flat_map(|p| p.rows.iter())
            .map(YarnRow::loop_count)
            .sum()
    }

    /// Flattens the store into the ordered record stream for a writer.
    pub fn records(&self) -> Vec<Record> {
        let mut records = Vec::new();
        for (&carrier, path) in &self.paths {
            let mut announced = false;
            for row in &path.rows {
                for (_, loops) in row.traversal() {
                    for stitch in loops {
                        if !announced {
                            records.push(Record::Material { carrier });
                            announced = true;
                        }
                        records.extend(stitch.points.iter().enumerate().map(|(i, &position)| {
                            Record::Point {
                                position,
                                corridor: i >= CORRIDOR_START,
                            }
                        }));
                    }
                }
            }
        }
        records
    }
}

/// One line of the coordinate stream.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Record {
    /// Switches the material for every following point.
    Material { carrier: usize },
    Point { position: Vec3, corridor: bool },
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Material { carrier } => write!(f, "usemtl mtl{carrier}"),
            Record::Point { position, corridor } => {
                if *corridor {
                    f.write_str("c ")?;
                }
                write!(f, "{} {} {}", position.x, position.y, position.z)
            }
        }
    }
}

/// Writes one record per line.
pub fn write_records<W: Write>(records: &[Record], out: &mut W) -> io::Result<()> {
    for record in records {
        writeln!(out, "{record}")?;
    }
    out.flush()
}
