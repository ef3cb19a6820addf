//! miditone - render, inspect and rewrite Standard MIDI Files.
//!
//! # Usage
//!
//! ```bash
//! miditone render song.mid song.wav               # Render with the default patch
//! miditone render song.mid song.wav -c patch.json # Render with a custom patch
//! miditone dump song.mid                          # Print the parsed document as JSON
//! miditone rewrite in.mid out.mid                 # Parse and re-serialize
//! miditone config patch.json                      # Write the default configuration
//! ```
//!
//! Set `RUST_LOG=debug` for parser and graph diagnostics.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use miditone::audio::{render_seconds_to_wav, render_to_wav};
use miditone::{EngineConfig, MidiDocument};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "miditone")]
#[command(about = "MIDI file codec and FM synthesizer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a MIDI file to a 16-bit mono WAV file
    Render {
        /// Input MIDI file
        input: PathBuf,

        /// Output WAV file
        output: PathBuf,

        /// Engine configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Length to render in seconds (default: whole song plus tail)
        #[arg(short, long)]
        seconds: Option<f64>,
    },

    /// Print a MIDI file as JSON
    Dump {
        /// Input MIDI file
        input: PathBuf,
    },

    /// Parse a MIDI file and write it back out
    Rewrite {
        /// Input MIDI file
        input: PathBuf,

        /// Output MIDI file
        output: PathBuf,
    },

    /// Write the default engine configuration
    Config {
        /// Output JSON file
        output: PathBuf,
    },
}

fn read_document(path: &Path) -> Result<MidiDocument> {
    MidiDocument::read_file(path)
        .with_context(|| format!("Failed to read MIDI file: {}", path.display()))
}

/// Main entry point.
fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Render {
            input,
            output,
            config,
            seconds,
        } => {
            let document = read_document(&input)?;
            let config = match config {
                Some(path) => EngineConfig::load(path)?,
                None => EngineConfig::default(),
            };

            let mut reported = 0;
            let progress = |fraction: f32| {
                let percent = (fraction * 100.0) as u32;
                if percent >= reported + 10 || percent == 100 {
                    reported = percent;
                    eprint!("\rRendering... {:3}%", percent);
                }
            };
            match seconds {
                Some(seconds) => {
                    render_seconds_to_wav(&document, &config, seconds, &output, Some(progress))?
                }
                None => render_to_wav(&document, &config, &output, Some(progress))?,
            }
            eprintln!();
            println!("Wrote {}", output.display());
        }
        Commands::Dump { input } => {
            let document = read_document(&input)?;
            println!("{}", document.to_json()?);
        }
        Commands::Rewrite { input, output } => {
            let document = read_document(&input)?;
            document
                .write_file(&output)
                .with_context(|| format!("Failed to write MIDI file: {}", output.display()))?;
            println!("Wrote {}", output.display());
        }
        Commands::Config { output } => {
            EngineConfig::default().save(&output)?;
            println!("Wrote {}", output.display());
        }
    }

    Ok(())
}
