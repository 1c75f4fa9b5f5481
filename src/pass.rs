//! Machine passes: aggregation of single-needle operations into carriage
//! sweeps, and kick passes that move parked carriers out of the way.

use crate::carrier::{CarrierTable, LastStitch};
use crate::error::{KnitoutError, Result};
use crate::needle::{BedNeedle, Direction};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassType {
    KnitTuck,
    AMiss,
    Split,
    SplitViaSliders,
    Xfer,
    XferToSliders,
    XferFromSliders,
}

impl PassType {
    /// Plain transfers never carry yarn.
    pub fn is_transfer(self) -> bool {
        matches!(
            self,
            PassType::Xfer | PassType::XferToSliders | PassType::XferFromSliders
        )
    }
}

/// What happens at one slot of a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotOp {
    /// A miss only if nothing else happens at the slot.
    SoftMiss,
    MissFront,
    MissBack,
    TuckFront,
    TuckBack,
    KnitFront,
    KnitBack,
    XferToBack,
    XferToFront,
    SplitToBack,
    SplitToFront,
}

impl SlotOp {
    /// Machine operation code.
    pub fn code(self) -> u16 {
        match self {
            SlotOp::SoftMiss => 16,
            SlotOp::MissFront => 216,
            SlotOp::MissBack => 217,
            SlotOp::TuckFront => 11,
            SlotOp::TuckBack => 12,
            SlotOp::KnitFront => 51,
            SlotOp::KnitBack => 52,
            SlotOp::XferToBack => 20,
            SlotOp::XferToFront => 30,
            SlotOp::SplitToBack => 101,
            SlotOp::SplitToFront => 102,
        }
    }

    /// Combined operation doing `a` then `b`, if one exists.
    pub fn merge(a: SlotOp, b: SlotOp) -> Option<SlotOp> {
        match (a, b) {
            (SlotOp::SoftMiss, other) | (other, SlotOp::SoftMiss) => Some(other),
            _ => None,
        }
    }
}

impl TryFrom<u16> for SlotOp {
    type Error = KnitoutError;

    fn try_from(code: u16) -> Result<Self> {
        Ok(match code {
            16 => SlotOp::SoftMiss,
            216 => SlotOp::MissFront,
            217 => SlotOp::MissBack,
            11 => SlotOp::TuckFront,
            12 => SlotOp::TuckBack,
            51 => SlotOp::KnitFront,
            52 => SlotOp::KnitBack,
            20 => SlotOp::XferToBack,
            30 => SlotOp::XferToFront,
            101 => SlotOp::SplitToBack,
            102 => SlotOp::SplitToFront,
            other => return Err(KnitoutError::UnknownSlotCode(other)),
        })
    }
}

/// Yarn hook action attached to a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HookAction {
    /// Bring yarn in with the hook before the pass (needs a gripper in).
    In,
    /// Let the hook go after the pass.
    Release,
    /// Take yarn out with the hook after the pass (needs a gripper out).
    Out,
}

/// Yarn gripper action attached to a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GripperAction {
    In,
    Out,
}

/// One carriage sweep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pass {
    pub pass_type: PassType,
    pub slots: BTreeMap<i32, SlotOp>,
    pub racking: f64,
    pub stitch: u32,
    pub direction: Direction,
    pub carriers: Vec<String>,
    pub hook: Option<HookAction>,
    pub gripper: Option<GripperAction>,
    /// Inserted only to move a carrier out of the way.
    pub kick: bool,
}

impl Pass {
    /// A pass doing `op` at a single `slot`.
    pub fn single(
        pass_type: PassType,
        slot: i32,
        op: SlotOp,
        racking: f64,
        stitch: u32,
        direction: Direction,
        carriers: Vec<String>,
    ) -> Self {
        Self {
            pass_type,
            slots: BTreeMap::from([(slot, op)]),
            racking,
            stitch,
            direction,
            carriers,
            hook: None,
            gripper: None,
            kick: false,
        }
    }

    /// Checks the structural invariants every pass must satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.pass_type.is_transfer() && !self.carriers.is_empty() {
            return Err(KnitoutError::InvalidPass(format!(
                "{:?} pass cannot carry yarn",
                self.pass_type
            )));
        }
        if self.pass_type == PassType::KnitTuck
            && (self.hook.is_some() || self.gripper.is_some())
            && self.carriers.is_empty()
        {
            return Err(KnitoutError::InvalidPass(
                "hook or gripper action on a pass without carriers".into(),
            ));
        }
        if self.hook == Some(HookAction::In) && self.gripper != Some(GripperAction::In) {
            return Err(KnitoutError::InvalidPass("hook in without gripper in".into()));
        }
        if self.hook == Some(HookAction::Out) && self.gripper != Some(GripperAction::Out) {
            return Err(KnitoutError::InvalidPass("hook out without gripper out".into()));
        }
        Ok(())
    }

    fn brings_in(&self) -> bool {
        self.hook == Some(HookAction::In) || self.gripper == Some(GripperAction::In)
    }

    /// A pass that takes yarn out or releases the hook ends its sweep.
    fn is_closed(&self) -> bool {
        matches!(self.hook, Some(HookAction::Release | HookAction::Out))
            || self.gripper == Some(GripperAction::Out)
    }

    /// The single slot the pass works on, for single-needle passes.
    pub fn only_slot(&self) -> Option<i32> {
        match self.slots.len() {
            1 => self.slots.keys().next().copied(),
            _ => None,
        }
    }

    /// Folds `other` into this pass if a single sweep can do both.
    pub fn absorb(&mut self, other: &Pass) -> bool {
        if self.is_closed()
            || other.brings_in()
            || self.kick != other.kick
            || self.pass_type != other.pass_type
            || self.racking != other.racking
            || self.stitch != other.stitch
            || self.direction != other.direction
            || self.carriers != other.carriers
        {
            return false;
        }
        if (other.hook.is_some() && self.hook.is_some())
            || (other.gripper.is_some() && self.gripper.is_some())
        {
            return false;
        }

        let mut slots = self.slots.clone();
        for (&slot, &op) in &other.slots {
            let low = slots.keys().next().copied();
            let high = slots.keys().next_back().copied();
            let in_order = match self.direction {
                Direction::Right => high.is_none_or(|h| slot >= h),
                Direction::Left => low.is_none_or(|l| slot <= l),
                Direction::None => true,
            };
            if !in_order {
                return false;
            }
            match slots.get(&slot) {
                None => {
                    slots.insert(slot, op);
                }
                Some(&existing) => match SlotOp::merge(existing, op) {
                    Some(merged) => {
                        slots.insert(slot, merged);
                    }
                    None => return false,
                },
            }
        }

        self.slots = slots;
        self.hook = self.hook.or(other.hook);
        self.gripper = self.gripper.or(other.gripper);
        true
    }
}

enum Work {
    /// Kicks for this pass still have to be worked out.
    Unresolved(Pass),
    /// Everything in the way has been moved; emit the pass.
    Ready(Pass),
}

/// Collects passes, merging where possible and inserting kicks.
#[derive(Clone, Debug, Default)]
pub struct PassScheduler {
    passes: Vec<Pass>,
    open: Option<Pass>,
}

impl PassScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closed passes so far, not counting the one still open.
    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    pub fn open(&self) -> Option<&Pass> {
        self.open.as_ref()
    }

    /// Closes the open pass and returns every pass in order.
    pub fn finish(mut self) -> Vec<Pass> {
        self.passes.extend(self.open.take());
        self.passes
    }

    /// Folds `pass` into the open pass, or closes that one and opens `pass`.
    pub fn merge_or_append(&mut self, pass: Pass) {
        if let Some(open) = self.open.as_mut()
            && open.absorb(&pass)
        {
            debug!("merged slot(s) {:?} into open pass", pass.slots.keys().collect::<Vec<_>>());
            return;
        }
        if let Some(closed) = self.open.replace(pass) {
            self.passes.push(closed);
        }
    }

    /// Schedules `pass`, first kicking every other carrier parked where the
    /// carriage is about to land. Returns the number of kicks inserted.
    ///
    /// Kicks are resolved from an explicit work stack; each carrier is
    /// kicked at most once per request, so resolution always terminates.
    pub fn submit(&mut self, pass: Pass, carriers: &mut CarrierTable, racking: f64) -> Result<usize> {
        pass.validate()?;
        let mut settled: BTreeSet<String> = pass.carriers.iter().cloned().collect();
        let mut work = vec![Work::Unresolved(pass)];
        let mut kicks = 0;

        while let Some(item) = work.pop() {
            match item {
                Work::Unresolved(pass) => {
                    let blockers = blockers(&pass, carriers, racking, &settled);
                    work.push(Work::Ready(pass.clone()));
                    for (name, kick) in blockers.into_iter().rev() {
                        settled.insert(name);
                        work.push(Work::Unresolved(kick));
                    }
                }
                Work::Ready(pass) => {
                    if pass.kick {
                        kicks += 1;
                        park_kicked(&pass, carriers);
                    }
                    self.merge_or_append(pass);
                }
            }
        }
        Ok(kicks)
    }

    /// Marks the open pass as the one taking `names` out.
    pub fn annotate_out(&mut self, names: &[String], hook: bool) {
        let Some(open) = self.open.as_mut() else {
            return;
        };
        if open.carriers != names || open.gripper.is_some() || (hook && open.hook.is_some()) {
            debug!("no open pass to carry the out of [{}]", names.join(" "));
            return;
        }
        open.gripper = Some(GripperAction::Out);
        if hook {
            open.hook = Some(HookAction::Out);
        }
    }

    /// Marks the open pass as the one after which the hook lets go.
    pub fn annotate_release(&mut self) {
        match self.open.as_mut() {
            Some(open) if open.hook.is_none() && !open.carriers.is_empty() => {
                open.hook = Some(HookAction::Release);
            }
            _ => debug!("releasehook not attached to any pass"),
        }
    }
}

/// Carriers parked in the landing zone of `pass`, each with the kick that
/// moves it clear.
fn blockers(
    pass: &Pass,
    carriers: &CarrierTable,
    racking: f64,
    settled: &BTreeSet<String>,
) -> Vec<(String, Pass)> {
    let Some(slot) = pass.only_slot() else {
        return Vec::new();
    };
    if pass.carriers.is_empty() || pass.direction == Direction::None {
        return Vec::new();
    }
    let s = slot as f64;
    carriers
        .active()
        .into_iter()
        .filter(|c| !settled.contains(&c.name))
        .filter_map(|c| {
            let last = c.last?;
            let parked = last.parked_slot(racking);
            let reach = last.min_stopping_distance as f64;
            let in_the_way = match pass.direction {
                Direction::Right => parked > s && parked <= s + reach,
                Direction::Left => parked < s && parked >= s - reach,
                Direction::None => false,
            };
            in_the_way.then(|| {
                debug!(
                    "kicking carrier {} (parked at {parked}) clear of slot {slot}",
                    c.name
                );
                let mut kick = Pass::single(
                    PassType::KnitTuck,
                    slot,
                    SlotOp::MissFront,
                    pass.racking,
                    pass.stitch,
                    pass.direction.opposite(),
                    vec![c.name.clone()],
                );
                kick.kick = true;
                (c.name.clone(), kick)
            })
        })
        .collect()
}

fn park_kicked(kick: &Pass, carriers: &mut CarrierTable) {
    let Some(slot) = kick.only_slot() else {
        return;
    };
    for name in &kick.carriers {
        if let Some(carrier) = carriers.get_mut(name)
            && let Some(last) = carrier.last.as_mut()
        {
            *last = LastStitch {
                needle: BedNeedle::front(slot),
                direction: kick.direction,
                min_stopping_distance: last.min_stopping_distance,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::InKind;

    fn knit(slot: i32, direction: Direction, carriers: &[&str]) -> Pass {
        Pass::single(
            PassType::KnitTuck,
            slot,
            SlotOp::KnitFront,
            0.0,
            5,
            direction,
            carriers.iter().map(|c| c.to_string()).collect(),
        )
    }

    fn park(table: &mut CarrierTable, name: &str, needle: i32, direction: Direction) {
        table.bring_in(InKind::In, &[name.to_string()]).unwrap();
        table.get_mut(name).unwrap().last = Some(LastStitch {
            needle: BedNeedle::front(needle),
            direction,
            min_stopping_distance: 2,
        });
    }

    #[test]
    fn slot_codes_round_trip_and_reject_unknown() {
        assert_eq!(SlotOp::try_from(216).unwrap(), SlotOp::MissFront);
        assert_eq!(SlotOp::try_from(SlotOp::SplitToFront.code()).unwrap(), SlotOp::SplitToFront);
        assert!(matches!(
            SlotOp::try_from(99),
            Err(KnitoutError::UnknownSlotCode(99))
        ));
    }

    #[test]
    fn soft_miss_merges_with_anything() {
        assert_eq!(SlotOp::merge(SlotOp::SoftMiss, SlotOp::KnitBack), Some(SlotOp::KnitBack));
        assert_eq!(SlotOp::merge(SlotOp::TuckFront, SlotOp::SoftMiss), Some(SlotOp::TuckFront));
        assert_eq!(SlotOp::merge(SlotOp::TuckFront, SlotOp::KnitFront), None);
    }

    #[test]
    fn passes_merge_only_in_sweep_order() {
        let mut scheduler = PassScheduler::new();
        scheduler.merge_or_append(knit(1, Direction::Right, &["1"]));
        scheduler.merge_or_append(knit(2, Direction::Right, &["1"]));
        scheduler.merge_or_append(knit(1, Direction::Right, &["1"]));
        let passes = scheduler.finish();
        assert_eq!(passes.len(), 2);
        assert_eq!(passes[0].slots.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn mismatched_carriers_or_direction_open_a_new_pass() {
        let mut scheduler = PassScheduler::new();
        scheduler.merge_or_append(knit(1, Direction::Right, &["1"]));
        scheduler.merge_or_append(knit(2, Direction::Right, &["2"]));
        scheduler.merge_or_append(knit(1, Direction::Left, &["2"]));
        assert_eq!(scheduler.finish().len(), 3);
    }

    #[test]
    fn in_annotation_stays_on_the_first_pass() {
        let mut first = knit(0, Direction::Right, &["1"]);
        first.gripper = Some(GripperAction::In);
        let mut second = knit(1, Direction::Right, &["1"]);
        assert!(first.absorb(&second));
        second.gripper = Some(GripperAction::In);
        assert!(!first.absorb(&second));
    }

    #[test]
    fn out_annotation_closes_the_pass() {
        let mut open = knit(0, Direction::Right, &["1"]);
        let mut last = knit(1, Direction::Right, &["1"]);
        last.gripper = Some(GripperAction::Out);
        assert!(open.absorb(&last));
        assert!(!open.absorb(&knit(2, Direction::Right, &["1"])));
    }

    #[test]
    fn transfer_passes_may_not_carry_yarn() {
        let pass = Pass::single(
            PassType::Xfer,
            0,
            SlotOp::XferToBack,
            0.0,
            5,
            Direction::None,
            vec!["1".into()],
        );
        assert!(matches!(pass.validate(), Err(KnitoutError::InvalidPass(_))));
    }

    #[test]
    fn knit_tuck_with_gripper_needs_carriers() {
        let mut pass = knit(0, Direction::None, &[]);
        pass.gripper = Some(GripperAction::In);
        assert!(pass.validate().is_err());
    }

    #[test]
    fn carrier_in_the_landing_zone_is_kicked_once() {
        let mut table = CarrierTable::new();
        park(&mut table, "A", 4, Direction::Right);
        park(&mut table, "B", 6, Direction::Left);
        let mut scheduler = PassScheduler::new();
        let kicks = scheduler
            .submit(knit(5, Direction::Left, &["B"]), &mut table, 0.0)
            .unwrap();
        assert_eq!(kicks, 1);
        let passes = scheduler.finish();
        assert_eq!(passes.len(), 2);
        assert!(passes[0].kick);
        assert_eq!(passes[0].carriers, vec!["A".to_string()]);
        assert_eq!(passes[0].direction, Direction::Right);
        let a = table.get("A").unwrap().last.unwrap();
        assert_eq!(a.parked_slot(0.0), 5.5);
    }

    #[test]
    fn carriers_out_of_reach_are_left_alone() {
        let mut table = CarrierTable::new();
        park(&mut table, "A", 1, Direction::Right);
        park(&mut table, "B", 6, Direction::Left);
        let mut scheduler = PassScheduler::new();
        let kicks = scheduler
            .submit(knit(5, Direction::Left, &["B"]), &mut table, 0.0)
            .unwrap();
        assert_eq!(kicks, 0);
        assert_eq!(scheduler.finish().len(), 1);
    }

    #[test]
    fn kicks_cascade_without_looping() {
        let mut table = CarrierTable::new();
        park(&mut table, "A", 4, Direction::Right);
        park(&mut table, "C", 6, Direction::Left);
        park(&mut table, "B", 9, Direction::Left);
        let mut scheduler = PassScheduler::new();
        let kicks = scheduler
            .submit(knit(5, Direction::Left, &["B"]), &mut table, 0.0)
            .unwrap();
        // A's kick would land on C, so C goes left first, then A goes right.
        assert_eq!(kicks, 2);
        let passes = scheduler.finish();
        assert_eq!(passes.len(), 3);
        assert_eq!(passes[0].carriers, vec!["C".to_string()]);
        assert_eq!(passes[1].carriers, vec!["A".to_string()]);
        assert!(!passes[2].kick);
    }
}
