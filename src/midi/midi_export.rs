//! Standard MIDI File (SMF) serialization.
//!
//! Writes a [`MidiDocument`] as a format 1 (multi-track) file.
//!
//! # Format Details
//!
//! - Note events are split back into note-on/note-off pairs
//! - Events are sorted by tick before delta times are derived; at equal
//!   ticks a note-off goes ahead of a note-on so notes pair up on reading
//! - Values that do not fit their wire field are rejected, never masked
//! - A track whose first event is not at tick 0 starts with an empty text
//!   event, since some players drop a track's first delta time
//! - Every track ends with an end-of-track event one tick after its last event

use super::error::WriteError;
use super::{
    EventKind, MidiDocument, Track, FORMAT_MULTI_TRACK, HEADER_TITLE, MAX_DELTA, META,
    META_END_OF_TRACK, META_KEY_SIGNATURE, META_TEMPO, META_TEXT, META_TIME_SIGNATURE,
    TRACK_TITLE,
};

/// Empty text event at delta 0.
const LEADING_TEXT: [u8; 4] = [0x00, META, META_TEXT, 0x00];

/// End of track at delta 1, the way Sibelius writes it.
const END_OF_TRACK: [u8; 4] = [0x01, META, META_END_OF_TRACK, 0x00];

/// Largest tempo a tempo meta event can carry.
const MAX_TEMPO: u32 = 0x00FF_FFFF;

/// Writes a variable-length quantity (VLQ) used for delta times in MIDI.
///
/// VLQ encodes values using 7 bits per byte, with the MSB indicating
/// whether more bytes follow (1 = more bytes, 0 = last byte).
///
/// # Arguments
///
/// * `value` - The value to encode (max 0x0FFFFFFF for MIDI)
/// * `buffer` - Output buffer to write to
///
/// # Errors
///
/// Returns [`WriteError::DeltaOverflow`] if the value needs a fifth byte.
fn write_vlq(value: u64, buffer: &mut Vec<u8>) -> Result<(), WriteError> {
    if value > u64::from(MAX_DELTA) {
        return Err(WriteError::DeltaOverflow(value));
    }

    let mut temp = value;
    let mut bytes = Vec::with_capacity(4);
    loop {
        bytes.push((temp & 0x7F) as u8);
        temp >>= 7;
        if temp == 0 {
            break;
        }
    }

    // Write bytes in reverse order with continuation bits
    for (i, &byte) in bytes.iter().rev().enumerate() {
        if i < bytes.len() - 1 {
            buffer.push(byte | 0x80);
        } else {
            buffer.push(byte);
        }
    }
    Ok(())
}

/// Wire-level messages, after notes have been split.
enum WireEvent<'a> {
    NoteOn {
        channel: u8,
        note: u8,
        velocity: u8,
    },
    NoteOff {
        channel: u8,
        note: u8,
        velocity: u8,
    },
    ProgramChange {
        channel: u8,
        program: u8,
    },
    SetTempo {
        us_per_quarter: u32,
    },
    TimeSignature {
        numerator: u8,
        power: u8,
    },
    KeySignature {
        sharps: i8,
        minor: bool,
    },
    Text(&'a [u8]),
}

/// Order of events sharing a tick. A note that ends at a tick releases
/// before a note that starts there, so the reader pairs them correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    Release,
    Other,
    /// Off of a zero-length note, which must follow its own on.
    ZeroLengthRelease,
}

/// A wire event at an absolute tick.
struct TimedEvent<'a> {
    tick: u64,
    rank: Rank,
    event: WireEvent<'a>,
}

impl<'a> TimedEvent<'a> {
    fn new(tick: u64, event: WireEvent<'a>) -> Self {
        Self {
            tick,
            rank: Rank::Other,
            event,
        }
    }
}

/// Checks that a channel message field fits its wire width.
fn check_range(field: &'static str, value: u8, max: u8, tick: u32) -> Result<u8, WriteError> {
    if value > max {
        return Err(WriteError::ValueOutOfRange {
            field,
            value: u32::from(value),
            tick,
        });
    }
    Ok(value)
}

/// Writes a single event to the buffer (without delta time). Field ranges
/// are checked when the event is collected.
fn write_event(event: &WireEvent<'_>, buffer: &mut Vec<u8>) {
    match *event {
        WireEvent::NoteOn {
            channel,
            note,
            velocity,
        } => {
            buffer.extend_from_slice(&[0x90 | channel, note, velocity]);
        }
        WireEvent::NoteOff {
            channel,
            note,
            velocity,
        } => {
            buffer.extend_from_slice(&[0x80 | channel, note, velocity]);
        }
        WireEvent::ProgramChange { channel, program } => {
            buffer.extend_from_slice(&[0xC0 | channel, program]);
        }
        WireEvent::SetTempo { us_per_quarter } => {
            // FF 51 03 tt tt tt
            let [_, a, b, c] = us_per_quarter.to_be_bytes();
            buffer.extend_from_slice(&[META, META_TEMPO, 0x03, a, b, c]);
        }
        WireEvent::TimeSignature { numerator, power } => {
            // FF 58 04 nn dd cc bb
            // dd = log2(denominator), cc = 24 clocks per click,
            // bb = 8 32nd notes per quarter
            buffer.extend_from_slice(&[META, META_TIME_SIGNATURE, 0x04, numerator, power, 24, 8]);
        }
        WireEvent::KeySignature { sharps, minor } => {
            // FF 59 02 sf mi
            buffer.extend_from_slice(&[
                META,
                META_KEY_SIGNATURE,
                0x02,
                sharps as u8,
                u8::from(minor),
            ]);
        }
        WireEvent::Text(text) => {
            // Length is checked when the event is collected
            buffer.extend_from_slice(&[META, META_TEXT, text.len() as u8]);
            buffer.extend_from_slice(text);
        }
    }
}

/// Converts a track into timed wire events, splitting notes.
fn collect_events(track: &Track) -> Result<Vec<TimedEvent<'_>>, WriteError> {
    let mut events = Vec::with_capacity(track.len() * 2);

    for event in track.events() {
        let tick = u64::from(event.tick);
        match event.kind {
            EventKind::Note {
                channel,
                duration,
                note,
                velocity_down,
                velocity_up,
            } => {
                let channel = check_range("channel", channel, 0x0F, event.tick)?;
                let note = check_range("note", note, 0x7F, event.tick)?;
                let velocity_up = check_range("release velocity", velocity_up, 0x7F, event.tick)?;
                if velocity_down == 0 {
                    return Err(WriteError::ZeroVelocity {
                        tick: event.tick,
                        note,
                    });
                }
                let velocity_down =
                    check_range("attack velocity", velocity_down, 0x7F, event.tick)?;

                events.push(TimedEvent::new(
                    tick,
                    WireEvent::NoteOn {
                        channel,
                        note,
                        velocity: velocity_down,
                    },
                ));
                events.push(TimedEvent {
                    tick: tick + u64::from(duration),
                    rank: if duration == 0 {
                        Rank::ZeroLengthRelease
                    } else {
                        Rank::Release
                    },
                    event: WireEvent::NoteOff {
                        channel,
                        note,
                        velocity: velocity_up,
                    },
                });
            }
            EventKind::Voice { channel, program } => events.push(TimedEvent::new(
                tick,
                WireEvent::ProgramChange {
                    channel: check_range("channel", channel, 0x0F, event.tick)?,
                    program: check_range("program", program, 0x7F, event.tick)?,
                },
            )),
            EventKind::Tempo { us_per_quarter } => {
                if us_per_quarter > MAX_TEMPO {
                    return Err(WriteError::TempoOutOfRange(us_per_quarter));
                }
                events.push(TimedEvent::new(tick, WireEvent::SetTempo { us_per_quarter }));
            }
            EventKind::TimeSignature {
                numerator,
                denominator,
            } => {
                if !denominator.is_power_of_two() {
                    return Err(WriteError::BadDenominator(denominator));
                }
                events.push(TimedEvent::new(
                    tick,
                    WireEvent::TimeSignature {
                        numerator,
                        power: denominator.ilog2() as u8,
                    },
                ));
            }
            EventKind::KeySignature { sharps, minor } => events.push(TimedEvent::new(
                tick,
                WireEvent::KeySignature { sharps, minor },
            )),
            EventKind::Text(ref text) => {
                if text.len() > u8::MAX as usize {
                    return Err(WriteError::TextTooLong(text.len()));
                }
                events.push(TimedEvent::new(tick, WireEvent::Text(text)));
            }
        }
    }

    // Stable, so events of equal tick and rank keep their listed order
    events.sort_by_key(|e| (e.tick, e.rank));
    Ok(events)
}

/// Builds the body of a track chunk, including the end-of-track event.
fn build_track_data(track: &Track) -> Result<Vec<u8>, WriteError> {
    let events = collect_events(track)?;
    let mut buffer = Vec::with_capacity(events.len() * 4 + 8);

    if events.first().map_or(true, |e| e.tick != 0) {
        buffer.extend_from_slice(&LEADING_TEXT);
    }

    let mut last_tick = 0u64;
    for timed_event in &events {
        write_vlq(timed_event.tick - last_tick, &mut buffer)?;
        write_event(&timed_event.event, &mut buffer);
        last_tick = timed_event.tick;
    }

    buffer.extend_from_slice(&END_OF_TRACK);
    Ok(buffer)
}

/// Appends a track chunk to the output.
fn write_track_chunk(output: &mut Vec<u8>, track_data: &[u8]) {
    output.extend_from_slice(TRACK_TITLE);
    output.extend_from_slice(&(track_data.len() as u32).to_be_bytes());
    output.extend_from_slice(track_data);
}

/// Serializes a document as the bytes of a format 1 MIDI file.
///
/// # Errors
///
/// Returns error if ticks per quarter is zero, or any value does not fit
/// its field on the wire.
pub fn serialize(document: &MidiDocument) -> Result<Vec<u8>, WriteError> {
    if document.ticks_per_quarter == 0 {
        return Err(WriteError::ZeroTicksPerQuarter);
    }
    let track_count = u16::try_from(document.tracks.len())
        .map_err(|_| WriteError::TooManyTracks(document.tracks.len()))?;

    let mut output = Vec::new();
    output.extend_from_slice(HEADER_TITLE);
    output.extend_from_slice(&6u32.to_be_bytes()); // Header length (always 6)
    output.extend_from_slice(&FORMAT_MULTI_TRACK.to_be_bytes());
    output.extend_from_slice(&track_count.to_be_bytes());
    output.extend_from_slice(&document.ticks_per_quarter.to_be_bytes());

    for track in &document.tracks {
        let track_data = build_track_data(track)?;
        write_track_chunk(&mut output, &track_data);
    }

    tracing::debug!(
        "Serialized MIDI file: {} tracks, {} bytes",
        track_count,
        output.len()
    );

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::{parse, MidiEvent};

    fn vlq(value: u64) -> Result<Vec<u8>, WriteError> {
        let mut buffer = Vec::new();
        write_vlq(value, &mut buffer)?;
        Ok(buffer)
    }

    /// Drops the empty text events the writer inserts.
    fn semantic_events(track: &Track) -> Vec<MidiEvent> {
        track
            .events()
            .iter()
            .filter(|e| e.kind != EventKind::Text(Vec::new()))
            .cloned()
            .collect()
    }

    fn sample_document() -> MidiDocument {
        let mut doc = MidiDocument::new(480);
        doc.tracks.push(Track::from_events(vec![
            MidiEvent::tempo(0, 500_000),
            MidiEvent::new(
                0,
                EventKind::TimeSignature {
                    numerator: 3,
                    denominator: 4,
                },
            ),
            MidiEvent::new(
                0,
                EventKind::KeySignature {
                    sharps: -2,
                    minor: false,
                },
            ),
            MidiEvent::tempo(1920, 600_000),
        ]));
        doc.tracks.push(Track::from_events(vec![
            MidiEvent::new(
                240,
                EventKind::Voice {
                    channel: 3,
                    program: 41,
                },
            ),
            MidiEvent::new(240, EventKind::Text(b"melody".to_vec())),
            MidiEvent::new(
                240,
                EventKind::Note {
                    channel: 3,
                    duration: 480,
                    note: 67,
                    velocity_down: 100,
                    velocity_up: 64,
                },
            ),
            MidiEvent::note(720, 3, 69, 90, 240),
            MidiEvent::note(960, 3, 67, 80, 200_000),
        ]));
        doc
    }

    #[test]
    fn test_vlq_encoding() {
        assert_eq!(vlq(0).unwrap(), vec![0x00]);
        assert_eq!(vlq(127).unwrap(), vec![0x7F]);
        assert_eq!(vlq(128).unwrap(), vec![0x81, 0x00]);
        assert_eq!(vlq(0x3FFF).unwrap(), vec![0xFF, 0x7F]);
        assert_eq!(vlq(0x4000).unwrap(), vec![0x81, 0x80, 0x00]);
    }

    #[test]
    fn test_vlq_boundary() {
        assert_eq!(vlq(0x0FFF_FFFF).unwrap(), vec![0xFF, 0xFF, 0xFF, 0x7F]);
        assert_eq!(
            vlq(0x1000_0000).unwrap_err(),
            WriteError::DeltaOverflow(0x1000_0000)
        );
    }

    #[test]
    fn test_round_trip() {
        let doc = sample_document();
        let bytes = serialize(&doc).unwrap();
        let parsed = parse(&bytes).unwrap();

        assert_eq!(parsed.ticks_per_quarter, 480);
        assert_eq!(parsed.tracks.len(), 2);
        for (original, decoded) in doc.tracks.iter().zip(&parsed.tracks) {
            assert_eq!(semantic_events(original), semantic_events(decoded));
        }
    }

    #[test]
    fn test_out_of_order_events_are_sorted() {
        let mut doc = MidiDocument::new(96);
        doc.tracks.push(Track::from_events(vec![
            MidiEvent::note(192, 0, 64, 100, 96),
            MidiEvent::note(0, 0, 60, 100, 96),
        ]));
        let parsed = parse(&serialize(&doc).unwrap()).unwrap();
        let ticks: Vec<u32> = parsed.tracks[0].events().iter().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![0, 192]);
    }

    #[test]
    fn test_leading_text_event() {
        let mut doc = MidiDocument::new(96);
        doc.tracks
            .push(Track::from_events(vec![MidiEvent::note(10, 0, 60, 100, 5)]));
        doc.tracks
            .push(Track::from_events(vec![MidiEvent::note(0, 0, 60, 100, 5)]));
        doc.tracks.push(Track::new());
        let bytes = serialize(&doc).unwrap();

        // Header + chunk header, then the body of track 0
        let track0 = &bytes[22..];
        assert_eq!(&track0[..4], &LEADING_TEXT);
        assert_eq!(track0[4], 10); // delta of the note-on

        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.tracks[0].events()[0].kind, EventKind::Text(vec![]));
        assert_eq!(parsed.tracks[1].len(), 1);
        assert_eq!(parsed.tracks[2].events(), &[MidiEvent::new(0, EventKind::Text(vec![]))]);
    }

    #[test]
    fn test_chunk_length_and_end_marker() {
        let mut doc = MidiDocument::new(96);
        doc.tracks
            .push(Track::from_events(vec![MidiEvent::note(0, 2, 60, 100, 96)]));
        let bytes = serialize(&doc).unwrap();

        let declared = u32::from_be_bytes([bytes[18], bytes[19], bytes[20], bytes[21]]) as usize;
        assert_eq!(declared, bytes.len() - 22);
        assert_eq!(
            &bytes[22..],
            &[0x00, 0x92, 60, 100, 0x60, 0x82, 60, 0, 0x01, 0xFF, 0x2F, 0x00]
        );
    }

    #[test]
    fn test_header() {
        let mut doc = MidiDocument::new(0x01E0);
        doc.tracks.push(Track::new());
        let bytes = serialize(&doc).unwrap();
        assert_eq!(
            &bytes[..14],
            &[b'M', b'T', b'h', b'd', 0, 0, 0, 6, 0, 1, 0, 1, 0x01, 0xE0]
        );
    }

    #[test]
    fn test_write_errors() {
        assert_eq!(
            serialize(&MidiDocument::new(0)).unwrap_err(),
            WriteError::ZeroTicksPerQuarter
        );

        let mut doc = MidiDocument::new(96);
        doc.tracks.push(Track::from_events(vec![MidiEvent::note(
            0,
            0,
            60,
            100,
            0x1000_0000,
        )]));
        assert_eq!(
            serialize(&doc).unwrap_err(),
            WriteError::DeltaOverflow(0x1000_0000)
        );

        let mut doc = MidiDocument::new(96);
        doc.tracks.push(Track::from_events(vec![MidiEvent::new(
            0,
            EventKind::Text(vec![b'a'; 256]),
        )]));
        assert_eq!(serialize(&doc).unwrap_err(), WriteError::TextTooLong(256));

        let mut doc = MidiDocument::new(96);
        doc.tracks
            .push(Track::from_events(vec![MidiEvent::tempo(0, 0x0100_0000)]));
        assert_eq!(
            serialize(&doc).unwrap_err(),
            WriteError::TempoOutOfRange(0x0100_0000)
        );
    }

    #[test]
    fn test_back_to_back_notes_listed_out_of_order() {
        let mut doc = MidiDocument::new(480);
        doc.tracks.push(Track::from_events(vec![
            MidiEvent::note(480, 0, 60, 100, 480),
            MidiEvent::note(0, 0, 60, 100, 480),
        ]));
        let parsed = parse(&serialize(&doc).unwrap()).unwrap();

        let spans: Vec<(u32, u32)> = parsed.tracks[0]
            .events()
            .iter()
            .filter_map(|e| match e.kind {
                EventKind::Note { duration, .. } => Some((e.tick, duration)),
                _ => None,
            })
            .collect();
        assert_eq!(spans, vec![(0, 480), (480, 480)]);
    }

    #[test]
    fn test_zero_length_note_survives() {
        let mut doc = MidiDocument::new(96);
        doc.tracks.push(Track::from_events(vec![
            MidiEvent::note(0, 0, 60, 100, 0),
            MidiEvent::note(0, 0, 62, 100, 96),
        ]));
        let parsed = parse(&serialize(&doc).unwrap()).unwrap();
        assert_eq!(semantic_events(&parsed.tracks[0]), semantic_events(&doc.tracks[0]));
    }

    #[test]
    fn test_zero_attack_velocity_is_rejected() {
        let mut doc = MidiDocument::new(96);
        doc.tracks
            .push(Track::from_events(vec![MidiEvent::note(24, 0, 60, 0, 96)]));
        assert_eq!(
            serialize(&doc).unwrap_err(),
            WriteError::ZeroVelocity { tick: 24, note: 60 }
        );
    }

    #[test]
    fn test_out_of_range_fields_are_rejected() {
        let note = |channel, note, velocity_up| {
            MidiEvent::new(
                0,
                EventKind::Note {
                    channel,
                    duration: 10,
                    note,
                    velocity_down: 100,
                    velocity_up,
                },
            )
        };
        let cases = vec![
            (note(16, 60, 0), "channel", 16),
            (note(0, 128, 0), "note", 128),
            (note(0, 60, 200), "release velocity", 200),
            (
                MidiEvent::new(
                    0,
                    EventKind::Voice {
                        channel: 0,
                        program: 130,
                    },
                ),
                "program",
                130,
            ),
        ];
        for (event, field, value) in cases {
            let mut doc = MidiDocument::new(96);
            doc.tracks.push(Track::from_events(vec![event]));
            assert_eq!(
                serialize(&doc).unwrap_err(),
                WriteError::ValueOutOfRange {
                    field,
                    value,
                    tick: 0
                }
            );
        }

        let mut doc = MidiDocument::new(96);
        doc.tracks.push(Track::from_events(vec![MidiEvent::new(
            0,
            EventKind::TimeSignature {
                numerator: 6,
                denominator: 6,
            },
        )]));
        assert_eq!(serialize(&doc).unwrap_err(), WriteError::BadDenominator(6));
    }

    #[test]
    fn test_readable_by_midly() {
        let bytes = serialize(&sample_document()).unwrap();
        let smf = midly::Smf::parse(&bytes).unwrap();

        assert_eq!(smf.header.format, midly::Format::Parallel);
        assert!(matches!(
            smf.header.timing,
            midly::Timing::Metrical(tpq) if tpq.as_int() == 480
        ));
        assert_eq!(smf.tracks.len(), 2);

        let note_ons = smf.tracks[1]
            .iter()
            .filter(|e| {
                matches!(
                    e.kind,
                    midly::TrackEventKind::Midi {
                        message: midly::MidiMessage::NoteOn { .. },
                        ..
                    }
                )
            })
            .count();
        assert_eq!(note_ons, 3);
        for track in &smf.tracks {
            assert!(matches!(
                track.last().map(|e| &e.kind),
                Some(midly::TrackEventKind::Meta(midly::MetaMessage::EndOfTrack))
            ));
        }
    }
}
