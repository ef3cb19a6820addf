//! Sequencer: plays the notes of a MIDI document into note sinks.
//!
//! Track 0 drives the tempo. Every other track is bound, in order, to one
//! connected note sink: track 1 to the first sink, track 2 to the second and
//! so on. Each block the sequencer advances its tick clock by
//! `block_size * ticks_per_sample` and schedules every note that starts
//! before the new clock value, with its position inside the block. A tempo
//! change inside a block applies from its own tick, so the remainder of the
//! block covers ticks at the new rate.

use super::component::{BlockContext, Component, Handle, NoteTrigger, Port};
use crate::midi::{
    note_to_frequency, note_to_name, EventKind, MidiDocument, MidiFileError,
    DEFAULT_US_PER_QUARTER,
};
use std::path::Path;

/// Note controller driven by a [`MidiDocument`].
pub struct Sequencer {
    /// The document being played, with track 0 reduced to tempo events.
    document: MidiDocument,
    /// Index of the next undelivered event, per track.
    places: Vec<usize>,
    /// Tick reached by the end of the last evaluated block.
    tick: f64,
    /// Ticks elapsed per output sample at the current tempo.
    ticks_per_sample: f64,
    /// Output sample rate.
    sample_rate: u32,
    /// Samples per block.
    block_size: usize,
    /// Note sinks, one per voice track.
    sinks: Vec<Handle>,
}

impl Sequencer {
    /// Creates a sequencer for a document.
    ///
    /// Tracks are stable-sorted by tick and everything but tempo events is
    /// dropped from track 0.
    pub fn new(mut document: MidiDocument) -> Self {
        for track in &mut document.tracks {
            track.sort();
        }
        if let Some(conductor) = document.tracks.first_mut() {
            conductor.retain(|e| e.is_tempo());
        }

        let places = vec![0; document.tracks.len()];
        let ticks_per_sample = Self::rate(document.ticks_per_quarter, 1, DEFAULT_US_PER_QUARTER);
        Self {
            document,
            places,
            tick: 0.0,
            ticks_per_sample,
            sample_rate: 1,
            block_size: 0,
            sinks: Vec::new(),
        }
    }

    /// Reads a MIDI file and creates a sequencer for it.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, MidiFileError> {
        Ok(Self::new(MidiDocument::read_file(path)?))
    }

    /// Returns the document being played.
    pub fn document(&self) -> &MidiDocument {
        &self.document
    }

    /// Returns the tick clock.
    pub fn tick(&self) -> f64 {
        self.tick
    }

    /// Returns the number of ticks per output sample at the current tempo.
    pub fn ticks_per_sample(&self) -> f64 {
        self.ticks_per_sample
    }

    /// Returns true once every event of every track has been passed.
    pub fn is_finished(&self) -> bool {
        self.document
            .tracks
            .iter()
            .zip(&self.places)
            .all(|(track, &place)| place >= track.len())
    }

    fn rate(ticks_per_quarter: u16, sample_rate: u32, us_per_quarter: u32) -> f64 {
        f64::from(ticks_per_quarter) / f64::from(sample_rate) / (f64::from(us_per_quarter) / 1e6)
    }

    /// Switches to a new tempo. A zero tempo is ignored.
    fn apply_tempo(&mut self, us_per_quarter: u32) {
        if us_per_quarter == 0 {
            tracing::warn!("Ignoring zero tempo at tick {:.1}", self.tick);
            return;
        }
        self.ticks_per_sample = Self::rate(
            self.document.ticks_per_quarter,
            self.sample_rate,
            us_per_quarter,
        );
    }

    /// Delivers every voice-track note starting before `destination`.
    ///
    /// `segment` is the tick and in-block sample position where the current
    /// tempo took effect, so offsets stay exact across tempo changes.
    fn play_to(&mut self, ctx: &mut BlockContext<'_>, destination: f64, segment: (f64, f64)) {
        let last_offset = self.block_size.saturating_sub(1) as f64;
        let (segment_tick, segment_sample) = segment;

        for (slot, &sink) in self.sinks.iter().enumerate() {
            let index = slot + 1;
            let Some(track) = self.document.tracks.get(index) else {
                break;
            };
            let events = track.events();
            let place = &mut self.places[index];

            while let Some(event) = events.get(*place) {
                if f64::from(event.tick) >= destination {
                    break;
                }
                if let EventKind::Note {
                    note,
                    duration,
                    velocity_down,
                    ..
                } = event.kind
                {
                    let offset = (segment_sample
                        + (f64::from(event.tick) - segment_tick) / self.ticks_per_sample)
                        .clamp(0.0, last_offset);
                    tracing::trace!(
                        "Track {}: {} at tick {}, sample {}",
                        index,
                        note_to_name(note),
                        event.tick,
                        offset as u32
                    );
                    ctx.send_note(
                        sink,
                        NoteTrigger {
                            frequency: note_to_frequency(note),
                            duration: (f64::from(duration) / self.ticks_per_sample) as u32,
                            volume: f32::from(velocity_down) / 127.0,
                            offset: offset as u32,
                        },
                    );
                }
                *place += 1;
            }
        }
    }
}

impl Component for Sequencer {
    fn initialize(&mut self, sample_rate: u32, block_size: usize) {
        self.sample_rate = sample_rate.max(1);
        self.block_size = block_size;
        self.tick = 0.0;
        self.places.iter_mut().for_each(|p| *p = 0);
        self.ticks_per_sample = Self::rate(
            self.document.ticks_per_quarter,
            self.sample_rate,
            DEFAULT_US_PER_QUARTER,
        );

        // Tempo events at tick 0 apply before the first block
        let leading: Vec<u32> = self
            .document
            .tracks
            .first()
            .map(|conductor| {
                conductor
                    .events()
                    .iter()
                    .take_while(|e| e.tick == 0)
                    .filter_map(|e| match e.kind {
                        EventKind::Tempo { us_per_quarter } => Some(us_per_quarter),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        for us_per_quarter in &leading {
            self.apply_tempo(*us_per_quarter);
        }
        if let Some(place) = self.places.first_mut() {
            *place = leading.len();
        }

        tracing::debug!(
            "Sequencer ready: {} tracks, {:.6} ticks per sample",
            self.document.tracks.len(),
            self.ticks_per_sample
        );
    }

    fn add_output(&mut self, output: Port) {
        if output.accepts_notes {
            self.sinks.push(output.handle);
        } else {
            tracing::debug!(
                "Sequencer output {} takes no notes, not bound to a track",
                output.handle.index()
            );
        }
    }

    fn evaluate(&mut self, ctx: &mut BlockContext<'_>) {
        ctx.output().fill(0.0);
        let block_samples = ctx.block_size() as f64;
        let mut segment = (self.tick, 0.0);
        let mut destination = self.tick + block_samples * self.ticks_per_sample;

        loop {
            let next_tempo = self
                .document
                .tracks
                .first()
                .and_then(|conductor| conductor.events().get(self.places[0]))
                .filter(|e| f64::from(e.tick) < destination)
                .map(|e| (e.tick, e.kind.clone()));

            match next_tempo {
                Some((tick, kind)) => {
                    let tick = f64::from(tick);
                    self.play_to(ctx, tick, segment);

                    // The rest of the block runs at the new tempo
                    let (segment_tick, segment_sample) = segment;
                    segment = (
                        tick,
                        segment_sample + (tick - segment_tick) / self.ticks_per_sample,
                    );
                    if let EventKind::Tempo { us_per_quarter } = kind {
                        self.apply_tempo(us_per_quarter);
                    }
                    destination =
                        tick + (block_samples - segment.1).max(0.0) * self.ticks_per_sample;
                    self.places[0] += 1;
                }
                None => {
                    self.play_to(ctx, destination, segment);
                    break;
                }
            }
        }

        self.tick = destination;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::component::NoteSink;
    use crate::audio::graph::Graph;
    use crate::audio::synth::FmSynth;
    use crate::midi::{MidiEvent, Track};
    use std::sync::{Arc, Mutex};

    /// Records every note it receives.
    struct Recorder {
        received: Arc<Mutex<Vec<NoteTrigger>>>,
    }

    impl NoteSink for Recorder {
        fn note(&mut self, trigger: NoteTrigger) {
            self.received.lock().unwrap().push(trigger);
        }
    }

    impl Component for Recorder {
        fn evaluate(&mut self, ctx: &mut BlockContext<'_>) {
            ctx.output().fill(0.0);
        }

        fn note_sink(&mut self) -> Option<&mut dyn NoteSink> {
            Some(self)
        }
    }

    fn a440_document() -> MidiDocument {
        let mut doc = MidiDocument::new(480);
        doc.tracks
            .push(Track::from_events(vec![MidiEvent::tempo(0, 500_000)]));
        doc.tracks
            .push(Track::from_events(vec![MidiEvent::note(0, 0, 69, 100, 480)]));
        doc
    }

    fn recording_graph(doc: MidiDocument) -> (Graph, Arc<Mutex<Vec<NoteTrigger>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let mut graph = Graph::new(22050, 1024);
        let notes = graph.register("notes", Sequencer::new(doc));
        let recorder = graph.register(
            "recorder",
            Recorder {
                received: Arc::clone(&received),
            },
        );
        graph.connect(notes, recorder);
        (graph, received)
    }

    #[test]
    fn test_a440_triggers_in_first_block() {
        let (mut graph, received) = recording_graph(a440_document());
        graph.evaluate();

        let notes = received.lock().unwrap();
        assert_eq!(notes.len(), 1);
        let note = notes[0];
        assert!((note.frequency - 440.0).abs() < 1e-3);
        assert!((note.volume - 100.0 / 127.0).abs() < 1e-6);
        assert_eq!(note.offset, 0);
        // 480 ticks at 120 BPM is half a second
        assert!((i64::from(note.duration) - 11025).abs() <= 1);
    }

    #[test]
    fn test_track_zero_keeps_only_tempo() {
        let mut doc = a440_document();
        doc.tracks[0].push(MidiEvent::new(
            0,
            EventKind::TimeSignature {
                numerator: 3,
                denominator: 4,
            },
        ));
        doc.tracks[0].push(MidiEvent::new(5, EventKind::Text(b"x".to_vec())));
        let sequencer = Sequencer::new(doc);
        assert_eq!(sequencer.document().tracks[0].len(), 1);
        assert!(sequencer.document().tracks[0].events()[0].is_tempo());
    }

    #[test]
    fn test_default_tempo_is_one_second_per_quarter() {
        let mut doc = MidiDocument::new(441);
        doc.tracks.push(Track::new());
        let mut sequencer = Sequencer::new(doc);
        sequencer.initialize(44100, 64);
        assert!((sequencer.ticks_per_sample() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_offset_within_block() {
        let mut doc = a440_document();
        // One block of 1024 samples spans 1024 * 480 / 11025 ~= 44.6 ticks
        doc.tracks[1] = Track::from_events(vec![
            MidiEvent::note(10, 0, 60, 127, 10),
            MidiEvent::note(100, 0, 62, 127, 10),
        ]);
        let (mut graph, received) = recording_graph(doc);

        graph.evaluate();
        {
            let notes = received.lock().unwrap();
            assert_eq!(notes.len(), 1);
            // 10 ticks at 480 / 11025 ticks per sample
            assert!((i64::from(notes[0].offset) - 229).abs() <= 1);
        }

        graph.evaluate();
        assert_eq!(received.lock().unwrap().len(), 1);
        graph.evaluate();
        let notes = received.lock().unwrap();
        assert_eq!(notes.len(), 2);
        assert!(notes[1].offset < 1024);
    }

    #[test]
    fn test_tempo_change_mid_document() {
        let mut doc = a440_document();
        doc.tracks[0].push(MidiEvent::tempo(20, 250_000));
        doc.tracks[1] = Track::from_events(vec![MidiEvent::note(200, 0, 60, 100, 480)]);
        let received = Arc::new(Mutex::new(Vec::new()));
        let mut graph = Graph::new(22050, 1024);
        let notes = graph.register("notes", Sequencer::new(doc));
        let recorder = graph.register(
            "recorder",
            Recorder {
                received: Arc::clone(&received),
            },
        );
        graph.connect(notes, recorder);

        for _ in 0..8 {
            graph.evaluate();
        }
        let notes = received.lock().unwrap();
        assert_eq!(notes.len(), 1);
        // 480 ticks at 240 BPM is a quarter second
        assert!((i64::from(notes[0].duration) - 5512).abs() <= 1);
    }

    #[test]
    fn test_offset_after_tempo_change_in_same_block() {
        let mut doc = MidiDocument::new(480);
        doc.tracks
            .push(Track::from_events(vec![MidiEvent::tempo(10, 250_000)]));
        doc.tracks.push(Track::from_events(vec![
            MidiEvent::note(20, 0, 60, 100, 480),
            MidiEvent::note(50, 0, 62, 100, 480),
        ]));
        let (mut graph, received) = recording_graph(doc);
        graph.evaluate();

        let notes = received.lock().unwrap();
        assert_eq!(notes.len(), 2);
        // 10 ticks at one second per quarter, then 10 ticks at a quarter second
        // per quarter: 459.4 + 114.8 samples
        assert!((i64::from(notes[0].offset) - 574).abs() <= 1);
        // 459.4 + 40 ticks at 480 / 5512.5 ticks per sample
        assert!((i64::from(notes[1].offset) - 918).abs() <= 1);
    }

    #[test]
    fn test_block_after_tempo_change_spans_new_rate() {
        let mut doc = MidiDocument::new(480);
        doc.tracks
            .push(Track::from_events(vec![MidiEvent::tempo(10, 250_000)]));
        doc.tracks.push(Track::new());
        let mut sequencer = Sequencer::new(doc);
        sequencer.initialize(22050, 1024);

        let mut output = vec![0.0; 1024];
        let buffers: Vec<Vec<f32>> = Vec::new();
        let mut outbox = Vec::new();
        let mut ctx = BlockContext::new(&buffers, &mut output, &mut outbox);
        sequencer.evaluate(&mut ctx);

        let fast = 480.0 / 5512.5;
        let expected = 10.0 + (1024.0 - 10.0 * 22050.0 / 480.0) * fast;
        assert!((sequencer.tick() - expected).abs() < 1e-6);
        assert!((sequencer.ticks_per_sample() - fast).abs() < 1e-12);
    }

    #[test]
    fn test_tracks_map_to_sinks_in_order() {
        let mut doc = a440_document();
        doc.tracks
            .push(Track::from_events(vec![MidiEvent::note(0, 1, 81, 127, 480)]));

        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        let mut graph = Graph::new(22050, 1024);
        let notes = graph.register("notes", Sequencer::new(doc));
        let a = graph.register("a", Recorder { received: Arc::clone(&first) });
        let b = graph.register("b", Recorder { received: Arc::clone(&second) });
        graph.connect(notes, a);
        graph.connect(notes, b);
        graph.evaluate();

        assert!((first.lock().unwrap()[0].frequency - 440.0).abs() < 1e-3);
        assert!((second.lock().unwrap()[0].frequency - 880.0).abs() < 1e-2);
    }

    #[test]
    fn test_finishes_after_last_event() {
        let mut sequencer = Sequencer::new(a440_document());
        sequencer.initialize(22050, 1024);
        sequencer.add_output(Port {
            handle: Handle(1),
            accepts_notes: true,
        });
        assert!(!sequencer.is_finished());

        let mut output = vec![0.0; 1024];
        let buffers: Vec<Vec<f32>> = Vec::new();
        let mut outbox = Vec::new();
        let mut ctx = BlockContext::new(&buffers, &mut output, &mut outbox);
        sequencer.evaluate(&mut ctx);

        assert!(sequencer.is_finished());
        assert!(sequencer.tick() > 40.0);
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].0, Handle(1));
    }

    #[test]
    fn test_drives_synth_end_to_end() {
        let mut graph = Graph::new(22050, 1024);
        let notes = graph.register("notes", Sequencer::new(a440_document()));
        let synth = graph.register("synth", FmSynth::default());
        graph.connect(notes, synth);
        graph.designate(synth);

        let block = graph.evaluate();
        assert!(block.iter().any(|s| s.abs() > 1e-4));
    }
}
