//! The unit of audio computation and its control surface.
//!
//! A [`Component`] produces one block of samples per call to
//! [`Component::evaluate`]. Components never own references to each other:
//! the [`Graph`](super::graph::Graph) hands each one a [`BlockContext`] that
//! exposes the other components' latest blocks by [`Handle`], its own output
//! block, and an outbox for note events.

/// Stable index of a component registered in a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub(crate) usize);

impl Handle {
    /// Returns the raw index (for logs and debugging).
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A note scheduled for a synthesizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteTrigger {
    /// Pitch in Hz.
    pub frequency: f32,
    /// Length in samples before the note is released.
    pub duration: u32,
    /// Note volume in [0, 1].
    pub volume: f32,
    /// Samples into the next evaluated block at which the note starts.
    pub offset: u32,
}

/// Receiver of scheduled notes.
pub trait NoteSink {
    /// Queues a note. It sounds from `trigger.offset` samples into the
    /// receiver's next block.
    fn note(&mut self, trigger: NoteTrigger);
}

/// Out-of-band control messages.
///
/// Commands take effect no later than the start of the receiver's next
/// block. Components ignore commands they do not understand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Sets the volume target that the current volume approaches smoothly.
    Volume(f32),
    /// Sets the current volume immediately, without smoothing.
    SetVolume(f32),
    /// Starts a one-shot sound at a frequency and peak volume.
    Play { frequency: f32, volume: f32 },
    /// Restarts a pre-set sound at the given volume.
    Trigger { volume: f32 },
    /// Schedules a note directly on a note sink.
    Note(NoteTrigger),
}

/// A connection from a producer to one of its consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Port {
    /// The consumer.
    pub handle: Handle,
    /// Whether the consumer exposes a [`NoteSink`].
    pub accepts_notes: bool,
}

/// Read-only view of every component's latest block.
#[derive(Clone, Copy)]
pub struct Inputs<'a> {
    buffers: &'a [Vec<f32>],
}

impl<'a> Inputs<'a> {
    /// Returns the latest block of `handle`.
    ///
    /// A component reading its own handle gets an empty slice; a producer
    /// evaluated later in the block order yields its previous block.
    pub fn get(&self, handle: Handle) -> &'a [f32] {
        self.buffers
            .get(handle.0)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Everything a component may touch while evaluating one block.
pub struct BlockContext<'a> {
    inputs: Inputs<'a>,
    output: &'a mut [f32],
    outbox: &'a mut Vec<(Handle, NoteTrigger)>,
}

impl<'a> BlockContext<'a> {
    /// Creates a context over the graph's buffers.
    ///
    /// # Arguments
    ///
    /// * `buffers` - Latest block of every component, indexed by handle
    /// * `output` - The evaluating component's output block
    /// * `outbox` - Collects notes to deliver once evaluation finishes
    pub fn new(
        buffers: &'a [Vec<f32>],
        output: &'a mut [f32],
        outbox: &'a mut Vec<(Handle, NoteTrigger)>,
    ) -> Self {
        Self {
            inputs: Inputs { buffers },
            output,
            outbox,
        }
    }

    /// Number of samples in the block.
    pub fn block_size(&self) -> usize {
        self.output.len()
    }

    /// Returns the latest block of another component.
    pub fn input(&self, handle: Handle) -> &'a [f32] {
        self.inputs.get(handle)
    }

    /// Returns the output block to overwrite.
    pub fn output(&mut self) -> &mut [f32] {
        &mut *self.output
    }

    /// Splits the context so inputs can be read while the output is written.
    pub fn io(&mut self) -> (Inputs<'a>, &mut [f32]) {
        (self.inputs, &mut *self.output)
    }

    /// Sends a note to the component behind `to`. Delivered right after the
    /// current component finishes its block.
    pub fn send_note(&mut self, to: Handle, trigger: NoteTrigger) {
        self.outbox.push((to, trigger));
    }
}

/// A node of the signal graph.
///
/// Only [`evaluate`](Component::evaluate) is mandatory; the wiring hooks and
/// the command handler default to no-ops.
pub trait Component: Send {
    /// Called once when the component is registered.
    fn initialize(&mut self, _sample_rate: u32, _block_size: usize) {}

    /// Called when `input` is connected as a producer for this component.
    fn add_input(&mut self, _input: Handle) {}

    /// Called when this component is connected as a producer for `output`.
    fn add_output(&mut self, _output: Port) {}

    /// Advances the component by exactly one block, overwriting
    /// `ctx.output()`.
    fn evaluate(&mut self, ctx: &mut BlockContext<'_>);

    /// Handles a control command. Returns false if the command was ignored.
    fn perform(&mut self, _command: Command) -> bool {
        false
    }

    /// Returns the component's note receiver, if it has one.
    fn note_sink(&mut self) -> Option<&mut dyn NoteSink> {
        None
    }
}
