//! Interpreter that turns a knitout program into a [`KnitOutput`].
//!
//! The entry point is [`KnitoutInterpreter`]. Configure it with a
//! [`KnitConfig`] and call [`KnitoutInterpreter::build_fabric`] with the
//! program text. Each line is parsed into an [`Instruction`] and executed
//! against a [`Session`], which owns all machine state for the run.

use crate::carrier::{CarrierLane, CarrierTable, HookState, InKind, LastStitch};
use crate::error::{KnitoutError, LineWarning, Result, Warning, carrier_list};
use crate::fabric::Fabric;
use crate::height::HeightIndex;
use crate::needle::{Bed, BedNeedle, Direction};
use crate::pass::{GripperAction, HookAction, Pass, PassScheduler, PassType, SlotOp};
use crate::yarn::{Record, YarnStore};
use log::{trace, warn};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Geometry and machine constants for interpretation.
#[derive(Clone, Debug)]
pub struct KnitConfig {
    /// Width of one stitch box along the needle axis.
    pub box_width: f32,
    /// Height of one stitch box.
    pub box_height: f32,
    /// Depth of the loop head zig-zag.
    pub box_depth: f32,
    /// Gap between neighbouring boxes, and the rise of a stacked knit.
    pub box_spacing: f32,
    /// Extra lift applied whenever a height conflict is found.
    pub epsilon: f32,
    /// Space between a box edge and the yarn's drop to the bed.
    pub padding: f32,
    /// Depth (z) of the front needle bed plane.
    pub front_bed_depth: f32,
    /// Depth of the back needle bed plane.
    pub back_bed_depth: f32,
    /// Depth of the front sliders, just inside the front bed.
    pub front_slider_depth: f32,
    /// Depth of the back sliders, just inside the back bed.
    pub back_slider_depth: f32,
    /// Depth of the first carrier lane; later lanes step toward the front sliders.
    pub carrier_depth: f32,
    /// Machine stitch setting recorded on every pass.
    pub stitch_number: u32,
    /// Slots of clearance a parked carrier needs from a passing carriage.
    pub min_stopping_distance: i32,
    /// Highest knitout version understood without a warning.
    pub max_version: u32,
}

impl Default for KnitConfig {
    fn default() -> Self {
        let box_width = 1.0;
        let box_height = 1.0;
        Self {
            box_width,
            box_height,
            box_depth: 0.1,
            box_spacing: box_height / 2.0,
            epsilon: 0.1,
            padding: box_width / 10.0,
            front_bed_depth: 1.0,
            back_bed_depth: -1.0,
            front_slider_depth: 0.5,
            back_slider_depth: -0.5,
            carrier_depth: -0.4,
            stitch_number: 5,
            min_stopping_distance: 2,
            max_version: 2,
        }
    }
}

impl KnitConfig {
    /// Distance between neighbouring needles.
    pub fn pitch(&self) -> f32 {
        self.box_width + self.box_spacing
    }

    pub fn bed_depth(&self, bed: Bed) -> f32 {
        match bed {
            Bed::Front => self.front_bed_depth,
            Bed::Back => self.back_bed_depth,
            Bed::FrontSlider => self.front_slider_depth,
            Bed::BackSlider => self.back_slider_depth,
        }
    }

    pub fn lane_depth(&self, lane: CarrierLane) -> f32 {
        let spacing = (self.front_slider_depth - self.carrier_depth) / lane.count.max(1) as f32;
        self.carrier_depth + spacing * lane.index as f32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StitchOp {
    Knit,
    Tuck,
    Miss,
}

/// One parsed knitout line.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    In {
        kind: InKind,
        carriers: Vec<String>,
    },
    ReleaseHook {
        carriers: Vec<String>,
    },
    Out {
        hook: bool,
        carriers: Vec<String>,
    },
    /// `knit`, `tuck`, `miss` and their aliases `drop` and `amiss`.
    Stitch {
        op: StitchOp,
        direction: Direction,
        needle: BedNeedle,
        carriers: Vec<String>,
    },
    /// `split` and its alias `xfer`.
    Split {
        direction: Direction,
        from: BedNeedle,
        to: BedNeedle,
        carriers: Vec<String>,
    },
    Rack(f64),
    Pause,
    Extension(String),
    Unsupported(String),
}

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^;!knitout-(\d+)$").expect("version regex must compile"))
}

fn racking_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[+-]?\d*\.?\d+$").expect("racking regex must compile"))
}

const CARRIER_HEADER: &str = ";;Carriers:";

/// Carrier names declared by a `;;Carriers:` header line, if it is one.
fn carrier_header(line: &str) -> Option<Vec<String>> {
    let start = line.find(CARRIER_HEADER)? + CARRIER_HEADER.len();
    Some(line[start..].split_whitespace().map(str::to_string).collect())
}

/// Parses a racking value: an integer or an integer plus a quarter.
pub fn parse_racking(token: &str) -> Result<f64> {
    if !racking_re().is_match(token) {
        return Err(KnitoutError::InvalidRacking(token.to_string()));
    }
    let racking: f64 = token
        .parse()
        .map_err(|_| KnitoutError::InvalidRacking(token.to_string()))?;
    let frac = racking - racking.floor();
    if frac != 0.0 && frac != 0.25 {
        return Err(KnitoutError::FractionalRacking(racking));
    }
    Ok(racking)
}

impl Instruction {
    /// Parses a line whose comment has already been stripped.
    /// Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut tokens = line.split_whitespace();
        let Some(op) = tokens.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = tokens.collect();
        let arg = |i: usize, what: &'static str| {
            args.get(i).copied().ok_or_else(|| KnitoutError::MissingArgument {
                op: op.to_string(),
                what,
            })
        };
        let names = |from: usize| -> Vec<String> {
            args.iter().skip(from).map(|s| s.to_string()).collect()
        };
        // Operations without yarn are directionless.
        let directed = |direction: Direction, carriers: &[String]| {
            if carriers.is_empty() {
                Direction::None
            } else {
                direction
            }
        };

        let instruction = match op {
            "in" | "inhook" => Instruction::In {
                kind: if op == "in" { InKind::In } else { InKind::InHook },
                carriers: names(0),
            },
            "releasehook" => Instruction::ReleaseHook { carriers: names(0) },
            "out" | "outhook" => Instruction::Out {
                hook: op == "outhook",
                carriers: names(0),
            },
            "knit" | "tuck" | "miss" => {
                let direction = Direction::parse(arg(0, "direction")?)?;
                let needle = arg(1, "needle")?.parse()?;
                let carriers = names(2);
                Instruction::Stitch {
                    op: match op {
                        "knit" => StitchOp::Knit,
                        "tuck" => StitchOp::Tuck,
                        _ => StitchOp::Miss,
                    },
                    direction: directed(direction, &carriers),
                    needle,
                    carriers,
                }
            }
            "drop" | "amiss" => {
                let needle = arg(0, "needle")?.parse()?;
                let carriers = names(1);
                Instruction::Stitch {
                    op: if op == "drop" { StitchOp::Knit } else { StitchOp::Tuck },
                    direction: directed(Direction::Right, &carriers),
                    needle,
                    carriers,
                }
            }
            "split" | "xfer" => {
                let (direction, first) = if op == "split" {
                    (Direction::parse(arg(0, "direction")?)?, 1)
                } else {
                    (Direction::Right, 0)
                };
                let from = arg(first, "from needle")?.parse()?;
                let to = arg(first + 1, "to needle")?.parse()?;
                let carriers = names(first + 2);
                Instruction::Split {
                    direction: directed(direction, &carriers),
                    from,
                    to,
                    carriers,
                }
            }
            "rack" => {
                if args.len() != 1 {
                    return Err(KnitoutError::InvalidRacking(args.join(" ")));
                }
                Instruction::Rack(parse_racking(args[0])?)
            }
            "pause" => Instruction::Pause,
            ext if ext.starts_with("x-") => Instruction::Extension(ext.to_string()),
            other => Instruction::Unsupported(other.to_string()),
        };
        Ok(Some(instruction))
    }
}

/// All machine state for one run.
pub struct Session {
    config: KnitConfig,
    carriers: CarrierTable,
    hook: HookState,
    racking: f64,
    stitch: u32,
    fabric: Fabric,
    scheduler: PassScheduler,
    kicks: usize,
}

impl Session {
    pub fn new(config: KnitConfig) -> Self {
        Self {
            stitch: config.stitch_number,
            fabric: Fabric::new(config.clone()),
            config,
            carriers: CarrierTable::new(),
            hook: HookState::default(),
            racking: 0.0,
            scheduler: PassScheduler::new(),
            kicks: 0,
        }
    }

    pub fn carriers(&self) -> &CarrierTable {
        &self.carriers
    }

    pub fn hook(&self) -> &HookState {
        &self.hook
    }

    pub fn racking(&self) -> f64 {
        self.racking
    }

    pub fn fabric(&self) -> &Fabric {
        &self.fabric
    }

    pub fn scheduler(&self) -> &PassScheduler {
        &self.scheduler
    }

    /// Runs one instruction. `Ok(Some(_))` means it was skipped or only
    /// partly applied; errors abort the run.
    pub fn execute(&mut self, instruction: Instruction) -> Result<Option<Warning>> {
        match instruction {
            Instruction::In { kind, carriers } => self.bring_in(kind, carriers).map(|_| None),
            Instruction::ReleaseHook { carriers } => self.release_hook(&carriers).map(|_| None),
            Instruction::Out { hook, carriers } => self.bring_out(hook, &carriers).map(|_| None),
            Instruction::Stitch {
                op,
                direction,
                needle,
                carriers,
            } => self.stitch(op, direction, needle, carriers),
            Instruction::Split {
                direction,
                from,
                to,
                carriers,
            } => self.split(direction, from, to, carriers),
            Instruction::Rack(racking) => {
                self.racking = racking;
                Ok(None)
            }
            Instruction::Pause => Ok(None),
            Instruction::Extension(op) => Ok(Some(Warning::ExtensionOperation(op))),
            Instruction::Unsupported(op) => Ok(Some(Warning::UnsupportedOperation(op))),
        }
    }

    fn bring_in(&mut self, kind: InKind, carriers: Vec<String>) -> Result<()> {
        if carriers.is_empty() {
            let op = match kind {
                InKind::In => "in",
                InKind::InHook => "inhook",
            };
            return Err(KnitoutError::NoCarriers(op.into()));
        }
        self.carriers.bring_in(kind, &carriers)?;
        if kind == InKind::InHook {
            self.hook.hold(&carriers)?;
        }
        Ok(())
    }

    fn release_hook(&mut self, carriers: &[String]) -> Result<()> {
        self.hook.release(carriers)?;
        self.scheduler.annotate_release();
        Ok(())
    }

    fn bring_out(&mut self, hook: bool, carriers: &[String]) -> Result<()> {
        if carriers.is_empty() {
            let op = if hook { "outhook" } else { "out" };
            return Err(KnitoutError::NoCarriers(op.into()));
        }
        for name in carriers {
            let carrier = self
                .carriers
                .get(name)
                .ok_or_else(|| KnitoutError::InactiveCarrier(name.clone()))?;
            if carrier.last.is_none() {
                return Err(KnitoutError::NeverStitched(name.clone()));
            }
        }
        if hook && let Some(held) = self.hook.held() {
            return Err(KnitoutError::HookBusy {
                requested: carrier_list(carriers),
                held: carrier_list(held),
            });
        }
        self.scheduler.annotate_out(carriers, hook);
        for name in carriers {
            self.carriers.remove(name);
        }
        Ok(())
    }

    /// Consumes pending `in` markers on the first use of a carrier group and
    /// annotates the pass accordingly.
    fn handle_in(&mut self, carriers: &[String], pass: &mut Pass) -> Result<()> {
        for name in carriers {
            if !self.carriers.is_active(name) {
                return Err(KnitoutError::InactiveCarrier(name.clone()));
            }
        }
        let mut pending = None;
        for name in carriers {
            if let Some(p) = self.carriers.get_mut(name).and_then(|c| c.pending_in.take()) {
                pending = Some(p);
            }
        }
        if let Some(pending) = pending {
            if pending.carriers != carriers {
                return Err(KnitoutError::FirstUseMismatch {
                    used: carrier_list(carriers),
                    pending: carrier_list(&pending.carriers),
                });
            }
            pass.gripper = Some(GripperAction::In);
            if pending.kind == InKind::InHook {
                pass.hook = Some(HookAction::In);
            }
        }
        Ok(())
    }

    fn lane(&self, name: &str) -> Result<CarrierLane> {
        self.carriers
            .lane(name)
            .ok_or_else(|| KnitoutError::InactiveCarrier(name.to_string()))
    }

    fn set_last(&mut self, carriers: &[String], direction: Direction, needle: BedNeedle) {
        for name in carriers {
            if let Some(carrier) = self.carriers.get_mut(name) {
                carrier.last = Some(LastStitch {
                    needle,
                    direction,
                    min_stopping_distance: self.config.min_stopping_distance,
                });
            }
        }
    }

    fn submit(&mut self, pass: Pass) -> Result<()> {
        self.kicks += self
            .scheduler
            .submit(pass, &mut self.carriers, self.racking)?;
        Ok(())
    }

    fn stitch(
        &mut self,
        op: StitchOp,
        direction: Direction,
        needle: BedNeedle,
        carriers: Vec<String>,
    ) -> Result<Option<Warning>> {
        if needle.bed.is_slider() {
            return Err(KnitoutError::StitchOnSlider(needle));
        }
        let front = needle.bed.is_front();
        let slot = needle.slot(self.racking)?;

        if carriers.is_empty() {
            let (pass_type, slot_op) = match op {
                StitchOp::Miss => return Err(KnitoutError::MissWithoutCarriers),
                StitchOp::Knit => {
                    if let Err(warning) = self.fabric.drop_loops(needle) {
                        return Ok(Some(warning));
                    }
                    let release = if front { SlotOp::KnitFront } else { SlotOp::KnitBack };
                    (PassType::KnitTuck, release)
                }
                StitchOp::Tuck => {
                    let amiss = if front { SlotOp::TuckFront } else { SlotOp::TuckBack };
                    (PassType::AMiss, amiss)
                }
            };
            let pass = Pass::single(
                pass_type,
                slot,
                slot_op,
                self.racking,
                self.stitch,
                Direction::None,
                carriers,
            );
            self.submit(pass)?;
            return Ok(None);
        }

        let slot_op = match (op, front) {
            (StitchOp::Knit, true) => SlotOp::KnitFront,
            (StitchOp::Knit, false) => SlotOp::KnitBack,
            (StitchOp::Tuck, true) => SlotOp::TuckFront,
            (StitchOp::Tuck, false) => SlotOp::TuckBack,
            (StitchOp::Miss, true) => SlotOp::MissFront,
            (StitchOp::Miss, false) => SlotOp::MissBack,
        };
        let mut pass = Pass::single(
            PassType::KnitTuck,
            slot,
            slot_op,
            self.racking,
            self.stitch,
            direction,
            carriers.clone(),
        );
        self.handle_in(&carriers, &mut pass)?;

        let lane = self.lane(&carriers[0])?;
        match op {
            StitchOp::Knit => {
                self.fabric.knit(direction, needle, lane);
            }
            StitchOp::Tuck => {
                self.fabric.tuck(direction, needle, lane);
            }
            StitchOp::Miss => {}
        }
        self.set_last(&carriers, direction, needle);
        self.submit(pass)?;
        Ok(None)
    }

    fn split(
        &mut self,
        direction: Direction,
        from: BedNeedle,
        to: BedNeedle,
        carriers: Vec<String>,
    ) -> Result<Option<Warning>> {
        let transfer_op = if from.bed.is_front() {
            SlotOp::XferToBack
        } else {
            SlotOp::XferToFront
        };
        let split_op = if from.bed.is_front() {
            SlotOp::SplitToBack
        } else {
            SlotOp::SplitToFront
        };
        let (pass_type, slot_op) = match (from.bed.is_slider(), to.bed.is_slider(), carriers.is_empty()) {
            (true, true, _) => return Err(KnitoutError::SliderToSlider { from, to }),
            (true, false, false) => return Err(KnitoutError::SplitFromSlider(from)),
            (true, false, true) => (PassType::XferFromSliders, transfer_op),
            (false, true, true) => (PassType::XferToSliders, transfer_op),
            (false, true, false) => (PassType::SplitViaSliders, split_op),
            (false, false, true) => (PassType::Xfer, transfer_op),
            (false, false, false) => (PassType::Split, split_op),
        };
        if from.bed.side() == to.bed.side() {
            return Err(KnitoutError::SameSideTransfer { from, to });
        }
        let slot = from.slot(self.racking)?;
        if slot != to.slot(self.racking)? {
            return Err(KnitoutError::Misaligned {
                from,
                to,
                racking: self.racking,
            });
        }

        let mut pass = Pass::single(
            pass_type,
            slot,
            slot_op,
            self.racking,
            self.stitch,
            direction,
            carriers.clone(),
        );

        if carriers.is_empty() {
            let lanes = self.carriers.declared().len();
            if let Err(warning) = self.fabric.transfer(from, to, lanes) {
                return Ok(Some(warning));
            }
            self.submit(pass)?;
            return Ok(None);
        }

        self.handle_in(&carriers, &mut pass)?;
        let lane = self.lane(&carriers[0])?;
        let warning = self.fabric.transfer(from, to, lane.count).err();
        self.fabric.knit(direction, from, lane);
        self.set_last(&carriers, direction, from);
        self.submit(pass)?;
        Ok(warning)
    }

    /// Closes the open pass and hands over everything that was built.
    pub fn finish(self, warnings: Vec<LineWarning>) -> KnitOutput {
        let carriers = self.carriers.declared().to_vec();
        let passes = self.scheduler.finish();
        let (yarn, heights) = self.fabric.into_parts();
        KnitOutput {
            carriers,
            yarn,
            passes,
            heights,
            warnings,
            kicks: self.kicks,
        }
    }
}

/// Everything produced by a run.
#[derive(Clone, Debug, Serialize)]
pub struct KnitOutput {
    /// Declared carriers in lane order.
    pub carriers: Vec<String>,
    pub yarn: YarnStore,
    pub passes: Vec<Pass>,
    pub kicks: usize,
    #[serde(skip)]
    pub heights: HeightIndex,
    #[serde(skip)]
    pub warnings: Vec<LineWarning>,
}

impl KnitOutput {
    /// The ordered coordinate stream for a writer.
    pub fn records(&self) -> Vec<Record> {
        self.yarn.records()
    }
}

/// Interprets knitout programs.
pub struct KnitoutInterpreter {
    config: KnitConfig,
}

impl KnitoutInterpreter {
    pub fn new(config: KnitConfig) -> Self {
        Self { config }
    }

    /// Interprets the whole program in `source`.
    ///
    /// The first line must be the `;!knitout-N` magic string. A
    /// `;;Carriers:` comment declares the carrier lanes; any other comment
    /// text after `;` is ignored. Unsupported operations and transfers from
    /// empty needles are logged, recorded in [`KnitOutput::warnings`] and
    /// skipped; every other problem aborts with an error naming the line.
    pub fn build_fabric(&self, source: &str) -> Result<KnitOutput> {
        let mut warnings = Vec::new();
        let first = source.lines().next().unwrap_or_default().trim_end();
        let caps = version_re()
            .captures(first)
            .ok_or_else(|| KnitoutError::MissingMagic.at_line(1))?;
        let version: u32 = caps[1].parse().unwrap_or(u32::MAX);
        if version > self.config.max_version {
            note(
                &mut warnings,
                1,
                Warning::NewerVersion(version, self.config.max_version),
            );
        }

        let mut session = Session::new(self.config.clone());
        if !source.lines().any(|raw| carrier_header(raw).is_some()) {
            for name in first_use_order(source) {
                session.carriers.declare(&name)?;
            }
        }
        for (idx, raw) in source.lines().enumerate() {
            let line = idx + 1;
            let code = match raw.find(';') {
                Some(i) => {
                    if let Some(names) = carrier_header(raw)
                        && let Some(warning) = session.carriers.declare_header(&names)
                    {
                        note(&mut warnings, line, warning);
                    }
                    &raw[..i]
                }
                None => raw,
            };
            let Some(instruction) = Instruction::parse(code).map_err(|e| e.at_line(line))? else {
                continue;
            };
            trace!("line {line}: {instruction:?}");
            if let Some(warning) = session.execute(instruction).map_err(|e| e.at_line(line))? {
                note(&mut warnings, line, warning);
            }
        }
        Ok(session.finish(warnings))
    }
}

/// Carrier names in order of their first `in` or `inhook`.
///
/// Without a `;;Carriers:` header these fix the lanes before the first
/// stitch, so lane depths never shift mid-run. Unparsable lines are skipped
/// here and reported by the main pass.
fn first_use_order(source: &str) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    for raw in source.lines() {
        let code = raw.split(';').next().unwrap_or_default();
        if let Ok(Some(Instruction::In { carriers, .. })) = Instruction::parse(code) {
            for name in carriers {
                if !order.contains(&name) {
                    order.push(name);
                }
            }
        }
    }
    order
}

fn note(warnings: &mut Vec<LineWarning>, line: usize, warning: Warning) {
    warn!("line {line}: {warning}");
    warnings.push(LineWarning { line, warning });
}
