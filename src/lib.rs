//! miditone - Standard MIDI File codec and a small pull-based audio engine.
//!
//! This library provides the format 1 MIDI reader/writer, the signal graph
//! with its sequencer, FM synthesizer and effects, and offline rendering.

pub mod audio;
pub mod config;
pub mod midi;

// Re-export commonly used types
pub use audio::{Command, Component, FmSynth, Graph, Handle, Sequencer};
pub use config::EngineConfig;
pub use midi::{EventKind, MidiDocument, MidiEvent, ParseError, Track, WriteError};
