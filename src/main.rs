use anyhow::Context;
use clap::{Parser, ValueEnum};
use knitout_yarn::{KnitConfig, KnitoutInterpreter, write_records};
use log::info;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum Format {
    /// One point per line, `usemtl` between carriers
    #[default]
    Text,
    /// Carriers, yarn paths and passes as JSON
    Json,
}

#[derive(Parser)]
#[command(name = "knitout-yarn")]
#[command(about = "Interpret a knitout file into 3D yarn paths", long_about = None)]
struct Cli {
    /// Knitout program to interpret
    input: PathBuf,

    /// Where to write the result
    output: PathBuf,

    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let source = fs::read_to_string(&cli.input)
        .with_context(|| format!("reading {}", cli.input.display()))?;
    let output = KnitoutInterpreter::new(KnitConfig::default())
        .build_fabric(&source)
        .with_context(|| format!("interpreting {}", cli.input.display()))?;
    info!(
        "{} loops from {} carrier(s) in {} passes ({} kicks, {} warnings)",
        output.yarn.loop_count(),
        output.carriers.len(),
        output.passes.len(),
        output.kicks,
        output.warnings.len()
    );

    let file = File::create(&cli.output)
        .with_context(|| format!("creating {}", cli.output.display()))?;
    let mut out = BufWriter::new(file);
    match cli.format {
        Format::Text => write_records(&output.records(), &mut out)?,
        Format::Json => {
            serde_json::to_writer_pretty(&mut out, &output)?;
            writeln!(out)?;
            out.flush()?;
        }
    }
    info!("wrote {}", cli.output.display());
    Ok(())
}
