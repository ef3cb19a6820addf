//! Error types for the Standard MIDI File codec.

use thiserror::Error;

/// Structural problems found while parsing a MIDI file.
///
/// Parsing never recovers partially: any of these means no document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Missing or malformed `MThd` chunk.
    #[error("bad file header")]
    BadFileHeader,
    /// A chunk after the header is not a well-formed `MTrk` chunk.
    #[error("bad track header at byte {offset}")]
    BadTrackHeader { offset: usize },
    /// A track chunk, or an event inside it, runs past the available bytes.
    #[error("track {track} is shorter than its declared or required size")]
    TrackSizeMismatch { track: usize },
    /// A delta time used more than 4 bytes.
    #[error("delta time in track {track} is longer than 4 bytes")]
    DeltaOverflow { track: usize },
    /// A status byte whose high nibble is not a known message type.
    #[error("unknown status byte 0x{status:02X} in track {track}")]
    UnknownStatusNibble { track: usize, status: u8 },
    /// A track does not end with the end-of-track meta event.
    #[error("track {track} does not end with an end-of-track event")]
    MissingEndOfTrack { track: usize },
    /// The header's track count disagrees with the chunks present.
    #[error("header declares {declared} tracks but {found} were found")]
    TrackCountMismatch { declared: u16, found: usize },
    /// Only format 1 (multi-track) files are supported.
    #[error("unsupported MIDI format type {0}")]
    UnsupportedFormatType(u16),
    /// The header's division field is zero.
    #[error("ticks per quarter note is zero")]
    ZeroTicksPerQuarter,
}

/// Values in a document that cannot be represented on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("ticks per quarter note is zero")]
    ZeroTicksPerQuarter,
    /// A delta time needs more than 28 bits.
    #[error("delta time {0} does not fit in 4 bytes")]
    DeltaOverflow(u64),
    #[error("{0} tracks do not fit in a MIDI header")]
    TooManyTracks(usize),
    /// Text meta events carry a single length byte.
    #[error("text of {0} bytes is longer than 255")]
    TextTooLong(usize),
    #[error("tempo {0} does not fit in 24 bits")]
    TempoOutOfRange(u32),
    /// A note-on with velocity 0 is read back as a note-off.
    #[error("note {note} at tick {tick} has attack velocity 0")]
    ZeroVelocity { tick: u32, note: u8 },
    /// A channel, note, velocity or program number outside its wire range.
    #[error("{field} {value} at tick {tick} is out of range")]
    ValueOutOfRange {
        field: &'static str,
        value: u32,
        tick: u32,
    },
    #[error("time signature denominator {0} is not a power of two")]
    BadDenominator(u32),
}

/// Errors from reading or writing MIDI files on disk.
#[derive(Debug, Error)]
pub enum MidiFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("MIDI parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("MIDI write error: {0}")]
    Write(#[from] WriteError),
}
