//! Standard MIDI File codec.
//!
//! This module provides the in-memory document model (events, tracks and
//! documents) together with a bit-exact parser and serializer for format 1
//! (multi-track) MIDI files.

mod document;
mod error;
mod event;
mod midi_export;
mod midi_import;
mod track;

pub use document::MidiDocument;
pub use error::{MidiFileError, ParseError, WriteError};
pub use event::{EventKind, MidiEvent};
pub use midi_export::serialize;
pub use midi_import::parse;
pub use track::Track;

/// Invariable part of the file header.
pub(crate) const HEADER_TITLE: &[u8; 4] = b"MThd";

/// Invariable part of every track header.
pub(crate) const TRACK_TITLE: &[u8; 4] = b"MTrk";

/// Size of the whole file header chunk, including title and length.
pub(crate) const HEADER_SIZE: usize = 14;

/// Size of a track header (title + length).
pub(crate) const TRACK_HEADER_SIZE: usize = 8;

/// The only file format this codec reads and writes.
pub(crate) const FORMAT_MULTI_TRACK: u16 = 1;

/// Largest value a 4-byte delta time can hold.
pub const MAX_DELTA: u32 = 0x0FFF_FFFF;

/// Meta event status byte.
pub(crate) const META: u8 = 0xFF;

/// Meta event types understood by the codec.
pub(crate) const META_TEXT: u8 = 0x01;
pub(crate) const META_END_OF_TRACK: u8 = 0x2F;
pub(crate) const META_TEMPO: u8 = 0x51;
pub(crate) const META_TIME_SIGNATURE: u8 = 0x58;
pub(crate) const META_KEY_SIGNATURE: u8 = 0x59;

/// Tempo assumed before the first tempo event: one second per quarter note.
pub const DEFAULT_US_PER_QUARTER: u32 = 1_000_000;

/// Standard MIDI note names for display purposes.
/// Maps MIDI note number (0-127) to note name within an octave.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Converts a MIDI note number to a human-readable note name with octave.
///
/// # Examples
///
/// ```
/// use miditone::midi::note_to_name;
///
/// assert_eq!(note_to_name(60), "C4");
/// ```
pub fn note_to_name(note: u8) -> String {
    let octave = (note / 12) as i8 - 1; // MIDI octave convention
    let note_index = (note % 12) as usize;
    format!("{}{}", NOTE_NAMES[note_index], octave)
}

/// Converts a MIDI note number to a frequency in Hz.
///
/// Equal temperament, with note 69 (A4) tuned to 440 Hz.
pub fn note_to_frequency(note: u8) -> f32 {
    440.0 * 2f32.powf((f32::from(note) - 69.0) / 12.0)
}

/// Converts a tick count to seconds at a fixed tempo.
///
/// # Arguments
///
/// * `ticks` - Number of ticks
/// * `ticks_per_quarter` - Resolution of the document
/// * `us_per_quarter` - Tempo in microseconds per quarter note
pub fn ticks_to_seconds(ticks: u64, ticks_per_quarter: u16, us_per_quarter: u32) -> f64 {
    if ticks_per_quarter == 0 {
        return 0.0;
    }
    ticks as f64 / f64::from(ticks_per_quarter) * f64::from(us_per_quarter) / 1e6
}
