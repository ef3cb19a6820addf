//! Standard MIDI File (SMF) parsing.
//!
//! Reads format 1 (multi-track) files into a [`MidiDocument`].
//!
//! # Decoding rules
//!
//! - Delta times are big-endian base-128 integers of at most 4 bytes
//! - Running status is honoured for channel messages
//! - Note-on/note-off pairs become a single note event with a duration
//! - Program changes become voice events
//! - Tempo, time signature, key signature and text meta events are kept
//! - Other channel messages, system messages and meta events are skipped
//!
//! Any structural violation aborts the whole parse.

use super::error::ParseError;
use super::{
    note_to_name, EventKind, MidiDocument, MidiEvent, Track, FORMAT_MULTI_TRACK, HEADER_SIZE,
    HEADER_TITLE, META, META_END_OF_TRACK, META_KEY_SIGNATURE, META_TEMPO, META_TEXT,
    META_TIME_SIGNATURE, TRACK_HEADER_SIZE, TRACK_TITLE,
};
use std::collections::HashMap;

/// A lone byte some readers leave after the last chunk (EOF stored as 0xFF).
const END_SENTINEL: u8 = 0xFF;

/// Most recent note-off seen per (channel, note), scanning backwards.
/// Value is (tick, release velocity).
type PendingOffs = HashMap<(u8, u8), (u32, u8)>;

/// One undecoded event from a track chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RawEvent<'a> {
    delta: u32,
    /// Status byte, filled in from running status when omitted.
    status: u8,
    /// Data bytes. For meta events: type, length, payload.
    data: &'a [u8],
}

impl RawEvent<'_> {
    fn kind(&self) -> u8 {
        self.status >> 4
    }

    fn channel(&self) -> u8 {
        self.status & 0x0F
    }

    fn is_end_of_track(&self) -> bool {
        self.status == META && self.data == [META_END_OF_TRACK, 0]
    }
}

/// Cursor over the bytes of one track chunk.
struct TrackReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    track: usize,
}

impl<'a> TrackReader<'a> {
    fn new(bytes: &'a [u8], track: usize) -> Self {
        Self {
            bytes,
            pos: 0,
            track,
        }
    }

    fn is_done(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Result<u8, ParseError> {
        self.bytes
            .get(self.pos)
            .copied()
            .ok_or(ParseError::TrackSizeMismatch { track: self.track })
    }

    fn byte(&mut self) -> Result<u8, ParseError> {
        let byte = self.peek()?;
        self.pos += 1;
        Ok(byte)
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], ParseError> {
        let end = self.pos + count;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(ParseError::TrackSizeMismatch { track: self.track })?;
        self.pos = end;
        Ok(slice)
    }

    /// Reads a delta time. Each byte carries 7 bits, most significant first;
    /// the top bit is set on every byte but the last.
    fn delta(&mut self) -> Result<u32, ParseError> {
        let mut value = 0u32;
        for _ in 0..4 {
            let byte = self.byte()?;
            value = (value << 7) | u32::from(byte & 0x7F);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ParseError::DeltaOverflow { track: self.track })
    }

    /// Reads one event, using `running` when the status byte is omitted.
    fn event(&mut self, running: &mut u8) -> Result<RawEvent<'a>, ParseError> {
        let delta = self.delta()?;

        let status = if self.peek()? & 0x80 == 0 {
            *running
        } else {
            self.byte()?
        };

        let data: &'a [u8] = match status >> 4 {
            0x8 | 0x9 | 0xA | 0xB | 0xE => {
                *running = status;
                self.take(2)?
            }
            0xC | 0xD => {
                *running = status;
                self.take(1)?
            }
            0xF if status == META => {
                let start = self.pos;
                let length = self.take(2)?[1];
                self.take(length as usize)?;
                &self.bytes[start..self.pos]
            }
            // Other system messages are the status byte alone
            0xF => &[],
            _ => {
                return Err(ParseError::UnknownStatusNibble {
                    track: self.track,
                    status,
                })
            }
        };

        Ok(RawEvent {
            delta,
            status,
            data,
        })
    }
}

/// Parses the bytes of a MIDI file into a document.
///
/// # Errors
///
/// Returns the first [`ParseError`] encountered.
///
/// # Examples
///
/// ```
/// use miditone::midi::{parse, ParseError};
///
/// assert_eq!(parse(b"RIFF").unwrap_err(), ParseError::BadFileHeader);
/// ```
pub fn parse(bytes: &[u8]) -> Result<MidiDocument, ParseError> {
    if bytes.len() < HEADER_SIZE || &bytes[0..4] != HEADER_TITLE {
        return Err(ParseError::BadFileHeader);
    }
    if read_u32(&bytes[4..8]) != (HEADER_SIZE - 8) as u32 {
        return Err(ParseError::BadFileHeader);
    }

    let format = read_u16(&bytes[8..10]);
    let declared_tracks = read_u16(&bytes[10..12]);
    let ticks_per_quarter = read_u16(&bytes[12..14]);

    if format != FORMAT_MULTI_TRACK {
        return Err(ParseError::UnsupportedFormatType(format));
    }
    if ticks_per_quarter == 0 {
        return Err(ParseError::ZeroTicksPerQuarter);
    }

    let chunks = split_chunks(bytes)?;
    if chunks.len() != declared_tracks as usize {
        return Err(ParseError::TrackCountMismatch {
            declared: declared_tracks,
            found: chunks.len(),
        });
    }

    let tracks = chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| parse_track(chunk, index))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::debug!(
        "Parsed MIDI file: {} tracks, {} ticks per quarter, {} events",
        tracks.len(),
        ticks_per_quarter,
        tracks.iter().map(Track::len).sum::<usize>()
    );

    Ok(MidiDocument {
        ticks_per_quarter,
        tracks,
    })
}

/// Splits the bytes after the file header into track chunk bodies.
fn split_chunks(bytes: &[u8]) -> Result<Vec<&[u8]>, ParseError> {
    let mut chunks = Vec::new();
    let mut pos = HEADER_SIZE;

    while bytes.len() - pos >= TRACK_HEADER_SIZE {
        if &bytes[pos..pos + 4] != TRACK_TITLE {
            return Err(ParseError::BadTrackHeader { offset: pos });
        }
        let size = read_u32(&bytes[pos + 4..pos + 8]) as usize;
        let start = pos + TRACK_HEADER_SIZE;
        let body = start
            .checked_add(size)
            .and_then(|end| bytes.get(start..end))
            .ok_or(ParseError::TrackSizeMismatch {
                track: chunks.len(),
            })?;
        chunks.push(body);
        pos = start + size;
    }

    match &bytes[pos..] {
        [] | [END_SENTINEL] => Ok(chunks),
        _ => Err(ParseError::BadTrackHeader { offset: pos }),
    }
}

/// Splits a track chunk into raw events and checks the end-of-track marker.
fn read_events(chunk: &[u8], track: usize) -> Result<Vec<RawEvent<'_>>, ParseError> {
    let mut reader = TrackReader::new(chunk, track);
    let mut running = 0u8;
    let mut events = Vec::new();

    while !reader.is_done() {
        events.push(reader.event(&mut running)?);
    }

    match events.last() {
        Some(last) if last.is_end_of_track() => Ok(events),
        _ => Err(ParseError::MissingEndOfTrack { track }),
    }
}

/// Decodes one track chunk body into a track.
fn parse_track(chunk: &[u8], track: usize) -> Result<Track, ParseError> {
    let raw = read_events(chunk, track)?;

    let mut ticks = Vec::with_capacity(raw.len());
    let mut current_tick = 0u32;
    for event in &raw {
        current_tick = current_tick.saturating_add(event.delta);
        ticks.push(current_tick);
    }

    // Walk backwards so each note-on sees the nearest later note-off
    let mut offs = PendingOffs::new();
    let mut events = Vec::with_capacity(raw.len());
    for (event, &tick) in raw.iter().zip(&ticks).rev() {
        match event.kind() {
            0x8 => {
                offs.insert((event.channel(), event.data[0]), (tick, event.data[1]));
            }
            0x9 if event.data[1] == 0 => {
                offs.insert((event.channel(), event.data[0]), (tick, 0));
            }
            0x9 => {
                let key = (event.channel(), event.data[0]);
                let (off_tick, velocity_up) = match offs.get(&key) {
                    Some(&off) => off,
                    None => {
                        tracing::warn!(
                            "Track {}: note {} at tick {} has no note-off, holding to track end",
                            track,
                            note_to_name(event.data[0]),
                            tick
                        );
                        (current_tick, 0)
                    }
                };
                events.push(MidiEvent::new(
                    tick,
                    EventKind::Note {
                        channel: event.channel(),
                        duration: off_tick - tick,
                        note: event.data[0],
                        velocity_down: event.data[1],
                        velocity_up,
                    },
                ));
            }
            0xC => events.push(MidiEvent::new(
                tick,
                EventKind::Voice {
                    channel: event.channel(),
                    program: event.data[0],
                },
            )),
            0xF if event.status == META => {
                if let Some(kind) = decode_meta(event.data, track) {
                    events.push(MidiEvent::new(tick, kind));
                }
            }
            _ => {} // Controllers, pressure, pitch bend, system messages
        }
    }
    events.reverse();

    Ok(Track::from_events(events))
}

/// Decodes the meta events the document keeps. `data` is type, length,
/// payload.
fn decode_meta(data: &[u8], track: usize) -> Option<EventKind> {
    let meta_type = data[0];
    let payload = &data[2..];

    let kind = match (meta_type, payload) {
        (META_TEMPO, [a, b, c, ..]) => EventKind::Tempo {
            us_per_quarter: u32::from_be_bytes([0, *a, *b, *c]),
        },
        (META_TIME_SIGNATURE, [numerator, power, ..]) => EventKind::TimeSignature {
            numerator: *numerator,
            denominator: 1u32.checked_shl(u32::from(*power))?,
        },
        (META_KEY_SIGNATURE, [sharps, minor, ..]) => EventKind::KeySignature {
            sharps: *sharps as i8,
            minor: *minor != 0,
        },
        (META_TEXT, text) => EventKind::Text(text.to_vec()),
        (META_TEMPO | META_TIME_SIGNATURE | META_KEY_SIGNATURE, _) => {
            tracing::warn!(
                "Track {}: meta event 0x{:02X} has a short payload, skipping",
                track,
                meta_type
            );
            return None;
        }
        _ => return None,
    };
    Some(kind)
}

fn read_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
