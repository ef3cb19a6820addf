//! Graph runtime: owns named components and evaluates them block by block.
//!
//! Components live in an arena and are addressed by [`Handle`]. Output
//! blocks are owned by the graph, one per component, and only the component
//! itself writes to its block. Evaluation follows an explicit order list;
//! the runtime does no dependency sorting of its own.

use super::component::{BlockContext, Command, Component, Handle, NoteTrigger, Port};
use std::collections::HashMap;

/// A set of wired components driven one block at a time.
pub struct Graph {
    /// Sample rate handed to every component on registration.
    sample_rate: u32,
    /// Samples per block.
    block_size: usize,
    /// Components, indexed by handle.
    components: Vec<Box<dyn Component>>,
    /// Titles, indexed by handle.
    titles: Vec<String>,
    /// Latest output block of every component, indexed by handle.
    buffers: Vec<Vec<f32>>,
    /// Title lookup.
    names: HashMap<String, Handle>,
    /// Evaluation order.
    order: Vec<Handle>,
    /// Component whose block [`Graph::evaluate`] returns.
    output: Option<Handle>,
    /// Notes sent during the current component's block.
    outbox: Vec<(Handle, NoteTrigger)>,
    /// Returned when no output is designated.
    silence: Vec<f32>,
}

impl Graph {
    /// Creates an empty graph.
    ///
    /// # Arguments
    ///
    /// * `sample_rate` - Samples per second
    /// * `block_size` - Samples produced by each call to [`Graph::evaluate`]
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        Self {
            sample_rate,
            block_size,
            components: Vec::new(),
            titles: Vec::new(),
            buffers: Vec::new(),
            names: HashMap::new(),
            order: Vec::new(),
            output: None,
            outbox: Vec::new(),
            silence: vec![0.0; block_size],
        }
    }

    /// Returns the sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the number of samples per block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns the number of registered components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Returns true if no component is registered.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Adds a component under `name`, initializes it and appends it to the
    /// evaluation order.
    ///
    /// Registering a second component under an existing name makes the name
    /// refer to the new one; the old component keeps running.
    pub fn register<C: Component + 'static>(
        &mut self,
        name: impl Into<String>,
        mut component: C,
    ) -> Handle {
        let name = name.into();
        let handle = Handle(self.components.len());

        component.initialize(self.sample_rate, self.block_size);
        self.components.push(Box::new(component));
        self.buffers.push(vec![0.0; self.block_size]);
        self.titles.push(name.clone());
        self.order.push(handle);

        if let Some(previous) = self.names.insert(name, handle) {
            tracing::warn!(
                "Component '{}' re-registered, replacing handle {}",
                self.titles[handle.0],
                previous.0
            );
        }
        tracing::debug!(
            "Registered component '{}' as {}",
            self.titles[handle.0],
            handle.0
        );
        handle
    }

    /// Returns the handle registered under `name`.
    pub fn handle(&self, name: &str) -> Option<Handle> {
        self.names.get(name).copied()
    }

    /// Returns the handle registered under `name`.
    ///
    /// # Panics
    ///
    /// Panics if nothing is registered under `name`. Use [`Graph::handle`]
    /// when the name is not known to exist.
    pub fn lookup(&self, name: &str) -> Handle {
        match self.handle(name) {
            Some(handle) => handle,
            None => panic!("no component registered as '{}'", name),
        }
    }

    /// Returns the title a component was registered under.
    pub fn title(&self, handle: Handle) -> &str {
        &self.titles[handle.0]
    }

    /// Connects `producer` to `consumer`: the producer learns about its new
    /// output and the consumer about its new input.
    ///
    /// # Panics
    ///
    /// Panics if either handle does not belong to this graph.
    pub fn connect(&mut self, producer: Handle, consumer: Handle) {
        let accepts_notes = self.components[consumer.0].note_sink().is_some();
        self.components[producer.0].add_output(Port {
            handle: consumer,
            accepts_notes,
        });
        self.components[consumer.0].add_input(producer);
        tracing::debug!(
            "Connected '{}' -> '{}'",
            self.titles[producer.0],
            self.titles[consumer.0]
        );
    }

    /// Chooses the component whose block [`Graph::evaluate`] returns.
    pub fn designate(&mut self, output: Handle) {
        assert!(output.0 < self.components.len(), "unknown output handle");
        self.output = Some(output);
    }

    /// Returns the evaluation order.
    pub fn order(&self) -> &[Handle] {
        &self.order
    }

    /// Replaces the evaluation order. Components left out are not evaluated.
    pub fn set_order(&mut self, order: Vec<Handle>) {
        assert!(
            order.iter().all(|h| h.0 < self.components.len()),
            "evaluation order names an unknown handle"
        );
        self.order = order;
    }

    /// Sends a control command to a component.
    ///
    /// Returns false if the component ignored it.
    pub fn perform(&mut self, handle: Handle, command: Command) -> bool {
        self.components[handle.0].perform(command)
    }

    /// Returns the latest block produced by a component.
    pub fn samples(&self, handle: Handle) -> &[f32] {
        &self.buffers[handle.0]
    }

    /// Evaluates every component once, in order, and returns the designated
    /// output block (silence if none is designated).
    ///
    /// The returned block is valid until the next call.
    pub fn evaluate(&mut self) -> &[f32] {
        for index in 0..self.order.len() {
            let handle = self.order[index];

            // The block is moved out so the component can write it while
            // reading everyone else's.
            let mut output = std::mem::take(&mut self.buffers[handle.0]);
            {
                let mut ctx = BlockContext::new(&self.buffers, &mut output, &mut self.outbox);
                self.components[handle.0].evaluate(&mut ctx);
            }
            self.buffers[handle.0] = output;

            self.deliver_notes();
        }

        match self.output {
            Some(handle) => &self.buffers[handle.0],
            None => &self.silence,
        }
    }

    /// Hands queued notes to their receivers.
    fn deliver_notes(&mut self) {
        for (target, trigger) in self.outbox.drain(..) {
            match self.components.get_mut(target.0).and_then(|c| c.note_sink()) {
                Some(sink) => sink.note(trigger),
                None => tracing::warn!(
                    "Dropped note for component {} without a note sink",
                    target.0
                ),
            }
        }
    }
}
