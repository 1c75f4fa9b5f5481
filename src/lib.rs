//! # knitout-yarn
//!
//! An interpreter for [knitout](https://textiles-lab.github.io/knitout/knitout.html)
//! programs that simulates a V-bed knitting machine and produces a 3D yarn
//! path for every carrier.
//!
//! Each stitch becomes a fixed 18-point loop outline. Loops are stacked by a
//! height index so that new yarn clears what is already on the needles, and
//! transfers move existing loops between beds. Alongside the geometry the
//! interpreter groups operations into machine passes, inserting kick passes
//! where a parked carrier is in the carriage's way.
//!
//! ```no_run
//! use knitout_yarn::{KnitConfig, KnitoutInterpreter, write_records};
//!
//! let source = ";!knitout-2\nin 1\nknit + f0 1\nknit + f1 1\n";
//! let output = KnitoutInterpreter::new(KnitConfig::default()).build_fabric(source)?;
//! write_records(&output.records(), &mut std::io::stdout())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod carrier;
pub mod error;
pub mod fabric;
pub mod height;
pub mod interpreter;
pub mod needle;
pub mod pass;
pub mod stitch;
pub mod yarn;

pub use carrier::*;
pub use error::*;
pub use fabric::*;
pub use height::*;
pub use interpreter::*;
pub use needle::*;
pub use pass::*;
pub use stitch::*;
pub use yarn::*;
