//! MIDI event representation.
//!
//! An event is an absolute tick plus one of the message kinds the codec
//! understands. Note events represent a whole note-on/note-off pair with a
//! duration, so a track never holds unmatched note-offs.

use serde::{Deserialize, Serialize};

/// Frequency of MIDI note 0 (C-1) in Hz.
const NOTE_ZERO_FREQUENCY: f32 = 8.175_799;

/// The payload of a [`MidiEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Set tempo meta event.
    Tempo {
        /// Microseconds per quarter note (24 bits on the wire).
        us_per_quarter: u32,
    },

    /// Time signature meta event.
    TimeSignature {
        numerator: u8,
        /// Note value of one beat. Always a power of two; the wire format
        /// stores its base-2 logarithm.
        denominator: u32,
    },

    /// Key signature meta event.
    KeySignature {
        /// Number of sharps, negative for flats.
        sharps: i8,
        minor: bool,
    },

    /// A note-on/note-off pair.
    Note {
        /// MIDI channel (0-15).
        channel: u8,
        /// Ticks between note-on and note-off.
        duration: u32,
        /// MIDI note number (0-127). 60 = Middle C (C4).
        note: u8,
        /// How hard the note is hit.
        velocity_down: u8,
        /// How suddenly the note is released.
        velocity_up: u8,
    },

    /// Program change (instrument selection).
    Voice { channel: u8, program: u8 },

    /// Text meta event. At most 255 bytes.
    Text(Vec<u8>),
}

/// A single event at an absolute position in a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiEvent {
    /// Absolute time in ticks from the start of the track.
    pub tick: u32,

    /// What happens at that time.
    pub kind: EventKind,
}

impl MidiEvent {
    /// Creates an event of the given kind at `tick`.
    pub fn new(tick: u32, kind: EventKind) -> Self {
        Self { tick, kind }
    }

    /// Creates a tempo event.
    pub fn tempo(tick: u32, us_per_quarter: u32) -> Self {
        Self::new(tick, EventKind::Tempo { us_per_quarter })
    }

    /// Creates a note event.
    ///
    /// # Arguments
    ///
    /// * `tick` - Start position in ticks
    /// * `channel` - MIDI channel (clamped to 0-15)
    /// * `note` - MIDI note number (clamped to 0-127)
    /// * `velocity` - Attack velocity (clamped to 0-127)
    /// * `duration` - Duration in ticks
    ///
    /// # Examples
    ///
    /// ```
    /// use miditone::midi::MidiEvent;
    ///
    /// // Concert A, one quarter note at 480 ticks per quarter
    /// let event = MidiEvent::note(0, 0, 69, 100, 480);
    /// assert_eq!(event.end_tick(), 480);
    /// ```
    pub fn note(tick: u32, channel: u8, note: u8, velocity: u8, duration: u32) -> Self {
        Self::new(
            tick,
            EventKind::Note {
                channel: channel.min(15),
                duration,
                note: note.min(127),
                velocity_down: velocity.min(127),
                velocity_up: 0,
            },
        )
    }

    /// Returns true for tempo events.
    pub fn is_tempo(&self) -> bool {
        matches!(self.kind, EventKind::Tempo { .. })
    }

    /// Returns the tick at which the event ends (start + duration for notes).
    pub fn end_tick(&self) -> u32 {
        match self.kind {
            EventKind::Note { duration, .. } => self.tick.saturating_add(duration),
            _ => self.tick,
        }
    }

    /// For key signature events, returns the pitch class (0-11, C = 0) of
    /// the key's root.
    ///
    /// Each sharp moves the major root up a fifth; the relative minor sits
    /// nine semitones above its major.
    pub fn key_root(&self) -> Option<u8> {
        match self.kind {
            EventKind::KeySignature { sharps, minor } => {
                let offset = if minor { 9 } else { 0 };
                Some((i32::from(sharps) * 7 + offset).rem_euclid(12) as u8)
            }
            _ => None,
        }
    }

    /// For key signature events, returns the frequency of the lowest MIDI
    /// note that is the root of the key.
    pub fn key_root_frequency(&self) -> Option<f32> {
        self.key_root()
            .map(|root| NOTE_ZERO_FREQUENCY * 2f32.powf(f32::from(root) / 12.0))
    }

    /// For time signature events, returns the number of ticks in one bar.
    ///
    /// # Arguments
    ///
    /// * `ticks_per_quarter` - Resolution of the document
    pub fn ticks_per_bar(&self, ticks_per_quarter: u16) -> Option<u32> {
        match self.kind {
            EventKind::TimeSignature {
                numerator,
                denominator,
            } if denominator > 0 => {
                let ticks = u64::from(ticks_per_quarter) * 4 * u64::from(numerator)
                    / u64::from(denominator);
                Some(ticks.min(u64::from(u32::MAX)) as u32)
            }
            _ => None,
        }
    }
}
