//! Fatal errors and recoverable warnings raised while interpreting knitout.
//!
//! A [`KnitoutError`] aborts the whole run. A [`Warning`] means the offending
//! instruction was skipped (or only partly applied) and interpretation goes on.

use crate::needle::BedNeedle;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, KnitoutError>;

/// Everything that stops a knitout run.
#[derive(Debug, Error)]
pub enum KnitoutError {
    // --- Malformed input ---
    #[error("file does not start with the knitout magic string ';!knitout-N'")]
    MissingMagic,

    #[error("invalid needle specification '{0}'")]
    InvalidNeedle(String),

    #[error("invalid direction '{0}', expected '+' or '-'")]
    InvalidDirection(String),

    #[error("'{op}' is missing its {what}")]
    MissingArgument { op: String, what: &'static str },

    #[error("racking must be a number, got '{0}'")]
    InvalidRacking(String),

    #[error("racking must be an integer or an integer+0.25, got {0}")]
    FractionalRacking(f64),

    // --- Illegal machine state transitions ---
    #[error("'{0}' needs at least one carrier")]
    NoCarriers(String),

    #[error("can't bring in an already active carrier '{0}'")]
    AlreadyActive(String),

    #[error("carrier '{0}' is not active")]
    InactiveCarrier(String),

    #[error("can't bring out carrier '{0}', it hasn't stitched yet")]
    NeverStitched(String),

    #[error("carrier '{0}' is not declared by the ;;Carriers: header")]
    UndeclaredCarrier(String),

    #[error("can't releasehook on [{requested}], the hook is empty")]
    HookEmpty { requested: String },

    #[error("can't releasehook on [{requested}], the hook holds [{held}]")]
    HookMismatch { requested: String, held: String },

    #[error("can't use the hook for [{requested}], it is holding [{held}]")]
    HookBusy { requested: String, held: String },

    #[error("first use of carriers [{used}] doesn't match the pending in of [{pending}]")]
    FirstUseMismatch { used: String, pending: String },

    #[error("needles '{from}' and '{to}' are not aligned at racking {racking}")]
    Misaligned {
        from: BedNeedle,
        to: BedNeedle,
        racking: f64,
    },

    #[error("needle '{needle}' has no machine slot at racking {racking}")]
    SlotOutOfRange { needle: BedNeedle, racking: f64 },

    #[error("cannot move loops from slider '{from}' to slider '{to}'")]
    SliderToSlider { from: BedNeedle, to: BedNeedle },

    #[error("cannot transfer between '{from}' and '{to}' on the same bed side")]
    SameSideTransfer { from: BedNeedle, to: BedNeedle },

    #[error("cannot split from slider '{0}'")]
    SplitFromSlider(BedNeedle),

    #[error("cannot stitch on slider needle '{0}'")]
    StitchOnSlider(BedNeedle),

    #[error("it makes no sense to miss with no carriers")]
    MissWithoutCarriers,

    // --- Internal consistency ---
    #[error("invalid pass: {0}")]
    InvalidPass(String),

    #[error("unknown slot operation code {0}")]
    UnknownSlotCode(u16),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: Box<KnitoutError>,
    },
}

impl KnitoutError {
    /// Attaches a 1-based input line number.
    pub fn at_line(self, line: usize) -> Self {
        match self {
            Self::Line { .. } => self,
            other => Self::Line {
                line,
                source: Box::new(other),
            },
        }
    }

    /// The error without its line wrapper.
    pub fn root(&self) -> &KnitoutError {
        match self {
            Self::Line { source, .. } => source.root(),
            other => other,
        }
    }
}

/// A recoverable problem: the instruction is skipped and the run continues.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum Warning {
    #[error("unsupported operation '{0}', ignored")]
    UnsupportedOperation(String),

    #[error("unsupported extension operation '{0}', ignored")]
    ExtensionOperation(String),

    #[error("file is version {0}, but only versions up to {1} are understood")]
    NewerVersion(u32, u32),

    #[error("transfer from '{0}' which holds no loops, ignored")]
    EmptyTransfer(BedNeedle),

    #[error("drop on '{0}' which holds no loops, ignored")]
    EmptyDrop(BedNeedle),

    #[error("carrier header repeated, keeping the first declaration")]
    RepeatedCarrierHeader,
}

/// A warning tagged with the 1-based line it was raised on.
#[derive(Clone, Debug, PartialEq)]
pub struct LineWarning {
    pub line: usize,
    pub warning: Warning,
}

/// Joins carrier names for error messages.
pub(crate) fn carrier_list(names: &[String]) -> String {
    names.join(" ")
}
