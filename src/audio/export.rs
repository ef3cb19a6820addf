//! Offline rendering.
//!
//! Builds the standard patch around a MIDI document and pulls blocks from
//! it, either into memory or into a 16-bit mono WAV file.

use super::graph::Graph;
use super::processors::{LowPass, Mixer};
use super::sequencer::Sequencer;
use super::synth::FmSynth;
use crate::config::EngineConfig;
use crate::midi::MidiDocument;
use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::Path;

/// Full scale of a rendered sample. Kept just below `i16::MAX` so clamped
/// peaks never wrap.
const SAMPLE_SCALE: f32 = 0x7FFD as f32;

/// Wires `notes -> synth -> lowpass -> mixer` and designates the mixer as
/// the output. Components are evaluated in that order.
///
/// # Arguments
///
/// * `document` - The MIDI document to play
/// * `config` - Stream format and component settings
pub fn build_graph(document: MidiDocument, config: &EngineConfig) -> Graph {
    let mut graph = Graph::new(config.sample_rate, config.block_size);

    let notes = graph.register("notes", Sequencer::new(document));
    let synth = graph.register(
        "synth",
        FmSynth::with_oscillators(config.synth.volume, config.synth.oscillators),
    );
    let lowpass = graph.register("lowpass", LowPass::new(config.lowness));
    let mixer = graph.register("mixer", Mixer::with_volume(config.mixer_volume));

    graph.connect(notes, synth);
    graph.connect(synth, lowpass);
    graph.connect(lowpass, mixer);
    graph.designate(mixer);
    graph
}

/// Renders whole blocks until at least `seconds` of audio exist.
///
/// The result length is a multiple of the block size.
///
/// # Errors
///
/// Returns error if the configuration is invalid
pub fn render_samples(
    document: MidiDocument,
    config: &EngineConfig,
    seconds: f64,
) -> Result<Vec<f32>> {
    config.validate().context("Invalid engine configuration")?;

    let mut graph = build_graph(document, config);
    let wanted = (seconds.max(0.0) * f64::from(config.sample_rate)).ceil() as usize;

    let mut samples = Vec::with_capacity(wanted + config.block_size);
    while samples.len() < wanted {
        samples.extend_from_slice(graph.evaluate());
    }
    Ok(samples)
}

/// Renders a document to a WAV file.
///
/// Plays the document to its last event plus `config.tail_seconds`.
///
/// # Arguments
///
/// * `document` - The document to render
/// * `config` - Engine configuration
/// * `output_path` - Path for the output WAV file
/// * `progress_callback` - Optional callback for progress updates (0.0 to 1.0)
///
/// # Errors
///
/// Returns error if:
/// - The configuration is invalid
/// - Output file cannot be created or written
pub fn render_to_wav<P, F>(
    document: &MidiDocument,
    config: &EngineConfig,
    output_path: P,
    progress_callback: Option<F>,
) -> Result<()>
where
    P: AsRef<Path>,
    F: FnMut(f32),
{
    let seconds = document.duration_seconds() + config.tail_seconds;
    render_seconds_to_wav(document, config, seconds, output_path, progress_callback)
}

/// Renders exactly `seconds` of a document to a 16-bit mono WAV file.
///
/// # Errors
///
/// Returns error if the configuration is invalid or the file cannot be
/// written
pub fn render_seconds_to_wav<P, F>(
    document: &MidiDocument,
    config: &EngineConfig,
    seconds: f64,
    output_path: P,
    mut progress_callback: Option<F>,
) -> Result<()>
where
    P: AsRef<Path>,
    F: FnMut(f32),
{
    config.validate().context("Invalid engine configuration")?;

    let total_samples = (seconds.max(0.0) * f64::from(config.sample_rate)) as usize;
    tracing::info!(
        "Rendering {:.2}s ({} samples at {} Hz) to {}",
        seconds,
        total_samples,
        config.sample_rate,
        output_path.as_ref().display()
    );

    let spec = WavSpec {
        channels: 1,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(output_path.as_ref(), spec).with_context(|| {
        format!(
            "Failed to create output WAV file: {}",
            output_path.as_ref().display()
        )
    })?;

    let mut graph = build_graph(document.clone(), config);
    let mut written = 0usize;
    while written < total_samples {
        let block = graph.evaluate();
        let count = block.len().min(total_samples - written);
        for &sample in &block[..count] {
            writer.write_sample((sample * SAMPLE_SCALE) as i16)?;
        }
        written += count;

        if let Some(ref mut callback) = progress_callback {
            callback(written as f32 / total_samples as f32);
        }
    }

    writer.finalize().context("Failed to finalize WAV file")?;
    tracing::info!("Wrote {} samples", written);
    Ok(())
}
