//! Carrier bookkeeping: the declared carrier list, the active set, pending
//! "in" markers and the yarn-inserting hook.

use crate::error::{KnitoutError, Result, Warning, carrier_list};
use crate::needle::{BedNeedle, Direction};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a carrier group was brought in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InKind {
    In,
    InHook,
}

/// The `in`/`inhook` that activated a carrier, waiting for its first stitch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingIn {
    pub kind: InKind,
    /// The whole group named by the instruction, in instruction order.
    pub carriers: Vec<String>,
}

/// Where a carrier last stitched (or was kicked to).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LastStitch {
    pub needle: BedNeedle,
    pub direction: Direction,
    /// Slots of clearance the parked carrier needs from a passing carriage.
    pub min_stopping_distance: i32,
}

impl LastStitch {
    /// Position the carrier is parked at, in slot units.
    ///
    /// A carrier that moved right comes to rest half a slot past its needle,
    /// one that moved left half a slot before it.
    pub fn parked_slot(&self, racking: f64) -> f64 {
        let slot = self.needle.slot_position(racking);
        match self.direction {
            Direction::Right => slot + 0.5,
            Direction::Left => slot - 0.5,
            Direction::None => slot,
        }
    }
}

/// An active carrier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Carrier {
    pub name: String,
    pub last: Option<LastStitch>,
    pub pending_in: Option<PendingIn>,
}

impl Carrier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last: None,
            pending_in: None,
        }
    }
}

/// A carrier's lane in the corridor between the beds.
///
/// Lanes are numbered by declaration order; `count` is the number of
/// declared carriers, which sets the lane spacing. The interpreter declares
/// every carrier before the first instruction runs, so `count` is fixed for a
/// whole program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CarrierLane {
    pub index: usize,
    pub count: usize,
}

/// The single yarn-inserting hook. Holds at most one carrier group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HookState {
    held: Option<Vec<String>>,
}

impl HookState {
    pub fn held(&self) -> Option<&[String]> {
        self.held.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_none()
    }

    /// Puts `carriers` on the hook; fails if it already holds a group.
    pub fn hold(&mut self, carriers: &[String]) -> Result<()> {
        if let Some(held) = &self.held {
            return Err(KnitoutError::HookBusy {
                requested: carrier_list(carriers),
                held: carrier_list(held),
            });
        }
        self.held = Some(carriers.to_vec());
        Ok(())
    }

    /// Releases the hook; `carriers` must name exactly the held group.
    pub fn release(&mut self, carriers: &[String]) -> Result<()> {
        match &self.held {
            None => Err(KnitoutError::HookEmpty {
                requested: carrier_list(carriers),
            }),
            Some(held) if held.as_slice() != carriers => Err(KnitoutError::HookMismatch {
                requested: carrier_list(carriers),
                held: carrier_list(held),
            }),
            Some(_) => {
                self.held = None;
                Ok(())
            }
        }
    }
}

/// Declared carriers plus the currently active ones.
#[derive(Clone, Debug, Default)]
pub struct CarrierTable {
    declared: Vec<String>,
    from_header: bool,
    active: HashMap<String, Carrier>,
}

impl CarrierTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a `;;Carriers:` header. Only the first header counts.
    ///
    /// Carriers already declared by an earlier `in` keep their lane and are
    /// appended after the header's list.
    pub fn declare_header(&mut self, names: &[String]) -> Option<Warning> {
        if self.from_header {
            return Some(Warning::RepeatedCarrierHeader);
        }
        let mut declared = names.to_vec();
        for name in self.declared.drain(..) {
            if !declared.contains(&name) {
                declared.push(name);
            }
        }
        self.declared = declared;
        self.from_header = true;
        None
    }

    /// Returns the lane index of `name`, declaring it when no header did.
    pub fn declare(&mut self, name: &str) -> Result<usize> {
        if let Some(index) = self.declared.iter().position(|c| c == name) {
            return Ok(index);
        }
        if self.from_header {
            return Err(KnitoutError::UndeclaredCarrier(name.to_string()));
        }
        self.declared.push(name.to_string());
        Ok(self.declared.len() - 1)
    }

    pub fn declared(&self) -> &[String] {
        &self.declared
    }

    pub fn lane(&self, name: &str) -> Option<CarrierLane> {
        let index = self.declared.iter().position(|c| c == name)?;
        Some(CarrierLane {
            index,
            count: self.declared.len(),
        })
    }

    /// Activates a carrier group, marking every member as pending.
    pub fn bring_in(&mut self, kind: InKind, names: &[String]) -> Result<()> {
        for name in names {
            if self.active.contains_key(name) {
                return Err(KnitoutError::AlreadyActive(name.clone()));
            }
        }
        for name in names {
            self.declare(name)?;
        }
        let pending = PendingIn {
            kind,
            carriers: names.to_vec(),
        };
        for name in names {
            let mut carrier = Carrier::new(name.as_str());
            carrier.pending_in = Some(pending.clone());
            self.active.insert(name.clone(), carrier);
        }
        Ok(())
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Carrier> {
        self.active.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Carrier> {
        self.active.get_mut(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Carrier> {
        self.active.remove(name)
    }

    /// Active carriers ordered by lane.
    pub fn active(&self) -> Vec<&Carrier> {
        let mut carriers: Vec<&Carrier> = self.active.values().collect();
        carriers.sort_by_key(|c| {
            self.declared
                .iter()
                .position(|d| d == &c.name)
                .unwrap_or(usize::MAX)
        });
        carriers
    }
}
