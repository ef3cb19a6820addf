//! Pull-based signal graph.
//!
//! Components produce one fixed-size block of mono samples per evaluation.
//! A [`Graph`] owns them, wires producers to consumers and evaluates them in
//! an explicit order. It provides:
//! - A MIDI [`Sequencer`] that schedules notes with sample accuracy
//! - An FM synthesizer with ADSR envelopes
//! - Noise, rising tone and arpeggiator sources
//! - Low-pass filter and mixer processors
//! - Offline rendering to sample vectors and WAV files

pub mod component;
pub mod export;
pub mod graph;
pub mod processors;
pub mod sequencer;
pub mod sources;
pub mod synth;

pub use component::{BlockContext, Command, Component, Handle, NoteSink, NoteTrigger, Port};
pub use export::{build_graph, render_samples, render_seconds_to_wav, render_to_wav};
pub use graph::Graph;
pub use processors::{LowPass, Mixer};
pub use sequencer::Sequencer;
pub use sources::{arpeggio, triangle, Noise, Noter, RisingTone};
pub use synth::{FmSynth, Oscillator, Stage, OSCILLATORS};

/// Sample rate of the default configuration.
pub const DEFAULT_SAMPLE_RATE: u32 = 22050;

/// Block size of the default configuration.
pub const DEFAULT_BLOCK_SIZE: usize = 1024;
