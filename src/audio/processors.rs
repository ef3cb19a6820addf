//! Processors: components that transform the blocks of other components.

use super::component::{BlockContext, Command, Component, Handle};

/// Single-pole low-pass filter: `y[n] = (1 - lowness) * x[n] + lowness * y[n-1]`.
///
/// Filters the last connected input.
pub struct LowPass {
    lowness: f32,
    source: Option<Handle>,
    current: f32,
}

impl LowPass {
    /// Creates a filter. `lowness` in [0, 1); higher values filter harder.
    pub fn new(lowness: f32) -> Self {
        Self {
            lowness,
            source: None,
            current: 0.0,
        }
    }

    pub fn lowness(&self) -> f32 {
        self.lowness
    }
}

impl Component for LowPass {
    fn initialize(&mut self, _sample_rate: u32, _block_size: usize) {
        self.current = 0.0;
    }

    fn add_input(&mut self, input: Handle) {
        if let Some(previous) = self.source.replace(input) {
            tracing::warn!(
                "Low-pass input {} replaced by {}",
                previous.index(),
                input.index()
            );
        }
    }

    fn evaluate(&mut self, ctx: &mut BlockContext<'_>) {
        let (inputs, output) = ctx.io();
        let input = self.source.map(|h| inputs.get(h)).unwrap_or_default();

        for (i, sample) in output.iter_mut().enumerate() {
            let x = input.get(i).copied().unwrap_or(0.0);
            self.current = (1.0 - self.lowness) * x + self.lowness * self.current;
            *sample = self.current;
        }
    }
}

/// Sums its inputs, scales the sum and hard-clips it to [-1, 1].
pub struct Mixer {
    volume: f32,
    inputs: Vec<Handle>,
}

impl Mixer {
    /// Creates a mixer with unit volume.
    pub fn new() -> Self {
        Self::with_volume(1.0)
    }

    /// Creates a mixer with the given volume.
    pub fn with_volume(volume: f32) -> Self {
        Self {
            volume,
            inputs: Vec::new(),
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for Mixer {
    fn add_input(&mut self, input: Handle) {
        self.inputs.push(input);
    }

    fn evaluate(&mut self, ctx: &mut BlockContext<'_>) {
        let (inputs, output) = ctx.io();
        output.fill(0.0);

        for &handle in &self.inputs {
            for (sample, x) in output.iter_mut().zip(inputs.get(handle)) {
                *sample += x * self.volume;
            }
        }
        for sample in output.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }

    fn perform(&mut self, command: Command) -> bool {
        match command {
            Command::Volume(volume) | Command::SetVolume(volume) => {
                self.volume = volume;
                true
            }
            _ => false,
        }
    }
}
