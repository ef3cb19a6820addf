//! MIDI track representation.
//!
//! A track is an ordered list of events. The end-of-track marker is not
//! stored; the codec checks it on read and appends it on write.

use super::event::{EventKind, MidiEvent};
use serde::{Deserialize, Serialize};

/// An ordered sequence of MIDI events.
///
/// Events read from a file are already in tick order. Tracks built in code
/// may be pushed out of order; the writer sorts before encoding deltas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    events: Vec<MidiEvent>,
}

impl Track {
    /// Creates an empty track.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a track from a list of events, keeping their order.
    pub fn from_events(events: Vec<MidiEvent>) -> Self {
        Self { events }
    }

    /// Appends an event.
    pub fn push(&mut self, event: MidiEvent) {
        self.events.push(event);
    }

    /// Returns the events in order.
    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    /// Returns the number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if the track has no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Sorts events by tick. Stable, so events at the same tick keep their
    /// relative order.
    pub fn sort(&mut self) {
        self.events.sort_by_key(|e| e.tick);
    }

    /// Removes every event for which `keep` returns false.
    pub fn retain(&mut self, keep: impl FnMut(&MidiEvent) -> bool) {
        self.events.retain(keep);
    }

    /// Returns the tick at which the last event ends.
    pub fn end_tick(&self) -> u32 {
        self.events.iter().map(MidiEvent::end_tick).max().unwrap_or(0)
    }

    /// Returns an iterator over the note events only.
    pub fn notes(&self) -> impl Iterator<Item = &MidiEvent> {
        self.events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Note { .. }))
    }
}
