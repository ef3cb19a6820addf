//! In-memory MIDI document.
//!
//! A document is the resolution of the file plus its tracks. By convention
//! track 0 carries tempo, time and key signature events and tracks 1..N carry
//! the notes and program changes of one voice each.

use super::error::{MidiFileError, ParseError, WriteError};
use super::track::Track;
use super::{midi_export, midi_import, ticks_to_seconds, EventKind, DEFAULT_US_PER_QUARTER};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A parsed or hand-built format 1 MIDI file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiDocument {
    /// Ticks per quarter note, from the file header. Never zero in a
    /// document that came from [`MidiDocument::parse`].
    pub ticks_per_quarter: u16,

    /// All tracks in file order.
    pub tracks: Vec<Track>,
}

impl MidiDocument {
    /// Creates a document with no tracks.
    pub fn new(ticks_per_quarter: u16) -> Self {
        Self {
            ticks_per_quarter,
            tracks: Vec::new(),
        }
    }

    /// Parses the bytes of a MIDI file.
    ///
    /// # Errors
    ///
    /// Returns the first structural violation found; no partial document
    /// is produced.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        midi_import::parse(bytes)
    }

    /// Encodes the document as the bytes of a MIDI file.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be represented on the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WriteError> {
        midi_export::serialize(self)
    }

    /// Reads and parses a MIDI file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Self, MidiFileError> {
        let bytes = fs::read(path)?;
        Ok(Self::parse(&bytes)?)
    }

    /// Serializes the document and writes it to a file.
    ///
    /// Nothing is written if serialization fails.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or file writing fails
    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<(), MidiFileError> {
        let bytes = self.to_bytes()?;
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Returns the document as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Returns the first tempo of track 0 in microseconds per quarter note.
    pub fn tempo(&self) -> Option<u32> {
        self.tracks
            .first()?
            .events()
            .iter()
            .find_map(|e| match e.kind {
                EventKind::Tempo { us_per_quarter } => Some(us_per_quarter),
                _ => None,
            })
    }

    /// Returns the tick at which the last event of any track ends.
    pub fn end_tick(&self) -> u32 {
        self.tracks.iter().map(Track::end_tick).max().unwrap_or(0)
    }

    /// Returns the playing time of the document in seconds.
    ///
    /// Follows the tempo changes of track 0. Before the first tempo event
    /// the default of one second per quarter note applies.
    pub fn duration_seconds(&self) -> f64 {
        let end = self.end_tick();
        let mut changes: Vec<(u32, u32)> = self
            .tracks
            .first()
            .map(|track| {
                track
                    .events()
                    .iter()
                    .filter_map(|e| match e.kind {
                        EventKind::Tempo { us_per_quarter } if e.tick < end => {
                            Some((e.tick, us_per_quarter))
                        }
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        changes.sort_by_key(|&(tick, _)| tick);

        let mut seconds = 0.0;
        let mut last_tick = 0u32;
        let mut us_per_quarter = DEFAULT_US_PER_QUARTER;
        for (tick, tempo) in changes {
            seconds += ticks_to_seconds(
                u64::from(tick - last_tick),
                self.ticks_per_quarter,
                us_per_quarter,
            );
            last_tick = tick;
            us_per_quarter = tempo;
        }
        seconds
            + ticks_to_seconds(
                u64::from(end - last_tick),
                self.ticks_per_quarter,
                us_per_quarter,
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::MidiEvent;

    fn two_track_document() -> MidiDocument {
        let mut doc = MidiDocument::new(480);
        let mut conductor = Track::new();
        conductor.push(MidiEvent::tempo(0, 500_000));
        conductor.push(MidiEvent::tempo(960, 250_000));
        let mut voice = Track::new();
        voice.push(MidiEvent::note(0, 0, 60, 100, 1920));
        doc.tracks.push(conductor);
        doc.tracks.push(voice);
        doc
    }

    #[test]
    fn test_tempo() {
        assert_eq!(two_track_document().tempo(), Some(500_000));
        assert_eq!(MidiDocument::new(480).tempo(), None);
    }

    #[test]
    fn test_duration_follows_tempo_map() {
        let doc = two_track_document();
        assert_eq!(doc.end_tick(), 1920);
        // 2 quarters at 0.5s + 2 quarters at 0.25s
        assert!((doc.duration_seconds() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_duration_without_tempo_uses_default() {
        let mut doc = MidiDocument::new(96);
        doc.tracks.push(Track::new());
        doc.tracks
            .push(Track::from_events(vec![MidiEvent::note(0, 0, 60, 90, 192)]));
        assert!((doc.duration_seconds() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.mid");
        let doc = two_track_document();
        doc.write_file(&path).unwrap();

        let loaded = MidiDocument::read_file(&path).unwrap();
        assert_eq!(loaded.ticks_per_quarter, 480);
        assert_eq!(loaded.tracks.len(), 2);
        assert_eq!(loaded.tracks[1].notes().count(), 1);
    }

    #[test]
    fn test_read_missing_file() {
        let err = MidiDocument::read_file("/nonexistent/song.mid").unwrap_err();
        assert!(matches!(err, MidiFileError::Io(_)));
    }

    #[test]
    fn test_json_dump() {
        let json = two_track_document().to_json().unwrap();
        assert!(json.contains("\"ticks_per_quarter\": 480"));
        assert!(json.contains("Tempo"));
    }
}
