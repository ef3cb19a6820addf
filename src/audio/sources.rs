//! Stand-alone sound sources: LFSR noise, a rising alarm tone and a
//! stepped arpeggiator for short sound effects.

use super::component::{BlockContext, Command, Component};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Triangle wave over one unit of phase, peaking at +1 at 0.25 and -1 at 0.75.
pub fn triangle(phase: f32) -> f32 {
    if phase < 0.25 {
        4.0 * phase
    } else if phase < 0.75 {
        2.0 - 4.0 * phase
    } else {
        4.0 * phase - 4.0
    }
}

/// Converts (frequency in Hz, length in seconds) steps into the
/// (phase increment, length in samples) steps a [`Noter`] plays.
///
/// # Examples
///
/// ```
/// use miditone::audio::arpeggio;
///
/// assert_eq!(arpeggio(&[(441.0, 0.5)], 22050), vec![(0.02, 11025)]);
/// ```
pub fn arpeggio(steps: &[(f32, f32)], sample_rate: u32) -> Vec<(f32, u32)> {
    let rate = sample_rate as f32;
    steps
        .iter()
        .map(|&(frequency, seconds)| (frequency / rate, (rate * seconds) as u32))
        .collect()
}

/// White-ish noise from a 16-bit linear-feedback shift register.
pub struct Noise {
    state: u16,
    seed: u16,
    volume: f32,
    target_volume: f32,
    /// Blocks of smoothing applied to volume changes.
    decay_length: u32,
}

impl Noise {
    /// Creates a silent noise source with the default seed.
    pub fn new(decay_length: u32) -> Self {
        Self::with_seed(decay_length, 1)
    }

    /// Creates a silent noise source with an explicit register seed.
    /// A zero seed would lock the register and is replaced by 1.
    pub fn with_seed(decay_length: u32, seed: u16) -> Self {
        let seed = seed.max(1);
        Self {
            state: seed,
            seed,
            volume: 0.0,
            target_volume: 0.0,
            decay_length,
        }
    }

    /// Returns the current, smoothed volume.
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Advances the register by one bit (taps 15, 13, 12 and 10).
    fn next_state(&mut self) -> u16 {
        let s = self.state;
        let bit = ((s >> 15) ^ (s >> 13) ^ (s >> 12) ^ (s >> 10)) & 1;
        self.state = (s << 1) | bit;
        self.state
    }
}

impl Component for Noise {
    fn initialize(&mut self, _sample_rate: u32, _block_size: usize) {
        self.state = self.seed;
    }

    fn evaluate(&mut self, ctx: &mut BlockContext<'_>) {
        let decay = self.decay_length as f32;
        self.volume = (self.volume * decay + self.target_volume) / (decay + 1.0);

        for sample in ctx.output().iter_mut() {
            let state = self.next_state();
            *sample = self.volume * (2.0 * f32::from(state) / f32::from(u16::MAX) - 1.0);
        }
    }

    fn perform(&mut self, command: Command) -> bool {
        match command {
            Command::Volume(volume) => self.target_volume = volume,
            Command::SetVolume(volume) => self.volume = volume,
            _ => return false,
        }
        true
    }
}

/// One-shot alarm: a sawtooth whose pitch keeps climbing while it fades in
/// for a tenth of a second and then fades out.
pub struct RisingTone {
    sample_rate: u32,
    frequency: f32,
    max_volume: f32,
    volume: f32,
    phase: f32,
    /// Samples since the last trigger.
    age: u64,
}

impl RisingTone {
    /// Pitch climb in Hz per second.
    const SWEEP: f32 = 120.0;

    /// Creates an idle tone.
    pub fn new() -> Self {
        Self {
            sample_rate: super::DEFAULT_SAMPLE_RATE,
            frequency: 0.0,
            max_volume: 0.0,
            volume: 0.0,
            phase: 0.0,
            age: 2 * u64::from(super::DEFAULT_SAMPLE_RATE),
        }
    }

    /// Returns the current envelope volume.
    pub fn volume(&self) -> f32 {
        self.volume
    }
}

impl Default for RisingTone {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for RisingTone {
    fn initialize(&mut self, sample_rate: u32, _block_size: usize) {
        self.sample_rate = sample_rate.max(1);
        self.phase = 0.0;
        self.volume = 0.0;
        self.age = 2 * u64::from(self.sample_rate);
    }

    fn evaluate(&mut self, ctx: &mut BlockContext<'_>) {
        let rate = self.sample_rate as f32;
        let fade_in = u64::from(self.sample_rate / 10);

        for sample in ctx.output().iter_mut() {
            if self.age < fade_in {
                self.volume += self.max_volume * 10.0 / rate;
            } else if self.volume <= 0.0 {
                self.volume = 0.0;
            } else {
                self.volume -= self.max_volume * 3.0 / rate;
            }
            self.phase += self.frequency / rate;
            self.phase -= self.phase.floor();
            self.frequency += Self::SWEEP / rate;
            self.age = self.age.saturating_add(1);
            *sample = self.volume * (self.phase - 0.5) / 2.0;
        }
    }

    fn perform(&mut self, command: Command) -> bool {
        match command {
            Command::Play { frequency, volume } => {
                self.frequency = frequency;
                self.max_volume = volume;
                self.volume = 0.0;
                self.age = 0;
                true
            }
            _ => false,
        }
    }
}

/// Sound-effect arpeggiator.
///
/// Holds several note sets, each a list of (phase increment, length in
/// samples) steps. Every trigger picks one set at random and plays its steps
/// as a triangle wave, fading out once the last step has finished.
pub struct Noter {
    sets: Vec<Vec<(f32, u32)>>,
    rng: StdRng,
    set: usize,
    step: usize,
    /// Samples spent in the current step.
    elapsed: u32,
    done: bool,
    phase: f32,
    volume: f32,
    target_volume: f32,
}

impl Noter {
    /// Creates an arpeggiator. `seed` makes the choice of note sets
    /// reproducible.
    pub fn new(sets: Vec<Vec<(f32, u32)>>, seed: u64) -> Self {
        if sets.iter().any(Vec::is_empty) {
            tracing::warn!("Noter created with an empty note set");
        }
        Self {
            sets,
            rng: StdRng::seed_from_u64(seed),
            set: 0,
            step: 0,
            elapsed: 0,
            done: true,
            phase: 0.0,
            volume: 0.0,
            target_volume: 0.0,
        }
    }

    /// Returns the index of the note set chosen by the last trigger.
    pub fn current_set(&self) -> usize {
        self.set
    }

    /// Returns true once the last step of the current set has been played.
    pub fn is_done(&self) -> bool {
        self.done
    }
}

impl Component for Noter {
    fn evaluate(&mut self, ctx: &mut BlockContext<'_>) {
        let Some(steps) = self.sets.get(self.set).filter(|s| !s.is_empty()) else {
            ctx.output().fill(0.0);
            return;
        };

        for sample in ctx.output().iter_mut() {
            if self.done {
                self.target_volume = 0.0;
            }
            *sample = self.volume * triangle(self.phase);

            let (increment, length) = steps[self.step];
            self.phase += increment;
            self.phase -= self.phase.trunc();
            self.elapsed += 1;
            if self.elapsed > length {
                self.elapsed = 0;
                if self.step + 1 < steps.len() {
                    self.step += 1;
                } else {
                    self.done = true;
                }
            }

            self.volume = (8.0 * self.volume + self.target_volume) / 9.0;
        }
    }

    fn perform(&mut self, command: Command) -> bool {
        match command {
            Command::Trigger { volume } => {
                self.elapsed = 0;
                self.step = 0;
                self.done = false;
                self.target_volume = volume;
                if !self.sets.is_empty() {
                    self.set = self.rng.gen_range(0..self.sets.len());
                }
                true
            }
            _ => false,
        }
    }
}
