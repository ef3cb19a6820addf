//! Four-operator FM synthesizer with per-operator ADSR envelopes.
//!
//! Every note runs one envelope runner per oscillator slot. Slots modulate each
//! other through the phase of the waveform, using the other slots' output
//! from the previous sample, so any routing (feedback included) is legal.
//! Only slots marked `audible` reach the output.

use super::component::{BlockContext, Command, Component, NoteSink, NoteTrigger};
use super::DEFAULT_SAMPLE_RATE;
use serde::{Deserialize, Serialize};

/// Number of oscillator slots per synthesizer.
pub const OSCILLATORS: usize = 4;

/// Static settings of one oscillator slot.
///
/// Envelope rates are amplitude changes per sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Oscillator {
    /// Frequency relative to the note frequency.
    pub frequency_multiplier: f32,
    /// Output scale.
    pub amplitude: f32,
    /// Attack rate.
    pub attack: f32,
    /// Decay rate.
    pub decay: f32,
    /// Sustain level.
    pub sustain: f32,
    /// Release rate.
    pub release: f32,
    /// Phase modulation weight of every slot's previous output.
    pub inputs: [f32; OSCILLATORS],
    /// Whether the slot is mixed into the output.
    pub audible: bool,
}

impl Default for Oscillator {
    fn default() -> Self {
        Self {
            frequency_multiplier: 1.0,
            amplitude: 1.0,
            attack: 0.0,
            decay: 0.0,
            sustain: 0.0,
            release: 0.0,
            inputs: [0.0; OSCILLATORS],
            audible: false,
        }
    }
}

/// A soft electric piano: one carrier and one modulator an octave up.
pub fn default_patch() -> [Oscillator; OSCILLATORS] {
    let mut patch = [Oscillator::default(); OSCILLATORS];
    patch[0] = Oscillator {
        amplitude: 0.5,
        attack: 0.01,
        decay: 0.0002,
        sustain: 0.4,
        release: 0.0005,
        audible: true,
        ..Oscillator::default()
    };
    patch[1] = Oscillator {
        frequency_multiplier: 2.0,
        amplitude: 0.3,
        attack: 0.02,
        decay: 0.0005,
        sustain: 0.1,
        release: 0.0005,
        ..Oscillator::default()
    };
    patch[0].inputs[1] = 0.5;
    patch
}

/// Envelope stage. Stages only ever advance in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Per-note state of one oscillator slot.
#[derive(Debug, Clone, Copy)]
struct Runner {
    stage: Stage,
    phase: f32,
    step: f32,
    amplitude: f32,
    output: f32,
}

impl Runner {
    fn new(step: f32) -> Self {
        Self {
            stage: Stage::Attack,
            phase: 0.0,
            step,
            amplitude: 0.0,
            output: 0.0,
        }
    }

    /// Advances the envelope by one sample.
    fn envelope(&mut self, oscillator: &Oscillator) {
        match self.stage {
            Stage::Attack => {
                self.amplitude += oscillator.attack;
                if self.amplitude >= 1.0 {
                    self.amplitude = 1.0;
                    self.stage = Stage::Decay;
                }
            }
            Stage::Decay => {
                self.amplitude -= oscillator.decay;
                if self.amplitude <= oscillator.sustain {
                    self.amplitude = oscillator.sustain;
                    self.stage = Stage::Sustain;
                }
            }
            Stage::Sustain => {}
            Stage::Release => {
                self.amplitude -= oscillator.release;
                if self.amplitude < 0.0 {
                    self.amplitude = 0.0;
                }
            }
        }
    }

    fn is_silent(&self) -> bool {
        self.stage == Stage::Release && self.amplitude <= 0.0
    }
}

/// A sounding note.
#[derive(Debug, Clone)]
struct ActiveNote {
    /// Samples since the note started; negative while waiting for its offset.
    age: i64,
    /// Samples until release.
    duration: u32,
    volume: f32,
    runners: [Runner; OSCILLATORS],
}

impl ActiveNote {
    /// Produces one sample. Returns the sample and whether the note is
    /// still alive.
    fn step(&mut self, oscillators: &[Oscillator; OSCILLATORS]) -> (f32, bool) {
        if self.age < 0 {
            self.age += 1;
            return (0.0, true);
        }
        if self.age == i64::from(self.duration) {
            for runner in &mut self.runners {
                runner.stage = Stage::Release;
            }
        }

        let previous = self.runners.map(|r| r.output);
        let mut sample = 0.0;
        let mut alive = false;

        for (runner, oscillator) in self.runners.iter_mut().zip(oscillators) {
            runner.phase += runner.step;
            runner.envelope(oscillator);
            if oscillator.audible && !runner.is_silent() {
                alive = true;
            }

            let modulation: f32 = previous
                .iter()
                .zip(&oscillator.inputs)
                .map(|(output, weight)| output * weight)
                .sum();
            runner.output = wave(runner.phase + modulation) * runner.amplitude * oscillator.amplitude;
            runner.phase -= runner.phase.floor();

            if oscillator.audible {
                sample += runner.output * self.volume;
            }
        }

        self.age += 1;
        (sample, alive)
    }
}

/// Smooth odd cubic with unit peak, one period per unit of phase.
fn wave(phase: f32) -> f32 {
    let p = phase - phase.floor();
    p * (p - 0.5) * (p - 1.0) * 20.784
}

/// FM synthesizer component. Receives notes through its [`NoteSink`].
pub struct FmSynth {
    oscillators: [Oscillator; OSCILLATORS],
    notes: Vec<ActiveNote>,
    volume: f32,
    target_volume: f32,
    sample_rate: u32,
}

impl FmSynth {
    /// Creates a synthesizer whose slots are all silent.
    pub fn new(volume: f32) -> Self {
        Self::with_oscillators(volume, [Oscillator::default(); OSCILLATORS])
    }

    /// Creates a synthesizer from a full patch.
    pub fn with_oscillators(volume: f32, oscillators: [Oscillator; OSCILLATORS]) -> Self {
        Self {
            oscillators,
            notes: Vec::new(),
            volume,
            target_volume: volume,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }

    /// Replaces the settings of one slot, keeping its modulation inputs and
    /// output flag.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below [`OSCILLATORS`].
    #[allow(clippy::too_many_arguments)]
    pub fn set_oscillator(
        &mut self,
        index: usize,
        frequency_multiplier: f32,
        amplitude: f32,
        attack: f32,
        decay: f32,
        sustain: f32,
        release: f32,
    ) {
        let oscillator = &mut self.oscillators[index];
        oscillator.frequency_multiplier = frequency_multiplier;
        oscillator.amplitude = amplitude;
        oscillator.attack = attack;
        oscillator.decay = decay;
        oscillator.sustain = sustain;
        oscillator.release = release;
    }

    /// Makes slot `from` modulate slot `to` with weight `amount`.
    ///
    /// # Panics
    ///
    /// Panics if either index is not below [`OSCILLATORS`].
    pub fn connect_oscillators(&mut self, from: usize, to: usize, amount: f32) {
        self.oscillators[to].inputs[from] = amount;
    }

    /// Mixes slot `index` into the output.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below [`OSCILLATORS`].
    pub fn connect_to_output(&mut self, index: usize) {
        self.oscillators[index].audible = true;
    }

    /// Returns the patch.
    pub fn oscillators(&self) -> &[Oscillator; OSCILLATORS] {
        &self.oscillators
    }

    /// Returns the number of notes still sounding or waiting to start.
    pub fn active_notes(&self) -> usize {
        self.notes.len()
    }

    /// Returns the envelope stage and amplitude of one slot of an active note.
    pub fn envelope(&self, note: usize, slot: usize) -> Option<(Stage, f32)> {
        let runner = self.notes.get(note)?.runners.get(slot)?;
        Some((runner.stage, runner.amplitude))
    }

    /// Returns the current, smoothed master volume.
    pub fn volume(&self) -> f32 {
        self.volume
    }
}

impl Default for FmSynth {
    fn default() -> Self {
        Self::with_oscillators(1.0, default_patch())
    }
}

impl NoteSink for FmSynth {
    fn note(&mut self, trigger: NoteTrigger) {
        let rate = self.sample_rate as f32;
        let runners = self
            .oscillators
            .map(|o| Runner::new(trigger.frequency / rate * o.frequency_multiplier));
        self.notes.push(ActiveNote {
            age: -i64::from(trigger.offset),
            duration: trigger.duration,
            volume: trigger.volume,
            runners,
        });
    }
}

impl Component for FmSynth {
    fn initialize(&mut self, sample_rate: u32, _block_size: usize) {
        self.sample_rate = sample_rate.max(1);
    }

    fn evaluate(&mut self, ctx: &mut BlockContext<'_>) {
        self.volume = (31.0 * self.volume + self.target_volume) / 32.0;
        let volume = self.volume;
        let oscillators = &self.oscillators;
        let notes = &mut self.notes;

        for sample in ctx.output().iter_mut() {
            let mut mix = 0.0;
            notes.retain_mut(|note| {
                let (value, alive) = note.step(oscillators);
                mix += value;
                alive
            });
            *sample = mix * volume;
        }
    }

    fn perform(&mut self, command: Command) -> bool {
        match command {
            Command::Volume(volume) => self.target_volume = volume,
            Command::SetVolume(volume) => {
                self.volume = volume;
                self.target_volume = volume;
            }
            Command::Note(trigger) => self.note(trigger),
            _ => return false,
        }
        true
    }

    fn note_sink(&mut self) -> Option<&mut dyn NoteSink> {
        Some(self)
    }
}
