//! The pipe arena: connection management and pull-based block scheduling.
//!
//! [`Rack`] owns every pipe in a patch. Connections are validated up front
//! (capacity, duplicates, cycles) so a failed [`connect`](Rack::connect)
//! never leaves a half-registered link, and the pull protocol can recurse
//! through the graph without a cycle break.
//!
//! # Pull scheduling
//!
//! [`pull`](Rack::pull) is the only evaluation entry point. A sink pulls a
//! block from its source; the source memoizes on the block time so its
//! [`Unit::process`] runs at most once per block no matter how many sinks
//! pull it. Two execution paths exist:
//!
//! - **in place** (one sink, at most one source): the downstream output
//!   buffer is lent upward for the duration of the call and processed
//!   directly, so a linear chain runs through a single buffer with no
//!   copying.
//! - **cached** (fan-in or fan-out): the pipe keeps one cache buffer per
//!   `max(sources, sinks)` slot, pulls each source into its slot, processes
//!   the cache in place, and copies the requested slot out to each sink
//!   that still wants it.
//!
//! Demand flows the other way: before a pipe processes, it asks its sinks
//! whether any of them needs output this block, short-circuiting on the
//! first yes. The per-time answer is cached, and a scan interrupted by
//! mutual recursion resumes at the sink where it left off.

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, vec, vec::Vec};

use core::any::Any;
use core::mem;

use crate::buffer::Buffer;
use crate::pipe::{PipeId, Unit};

/// Block time that can never match a real callback timestamp, so a fresh
/// pipe always processes on its first pull.
const NEVER: i64 = i64::MIN;

/// Errors raised by patch mutations and indexed accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchError {
    /// The pipe id does not name a live pipe in this rack.
    PipeNotFound(PipeId),
    /// The source pipe's sink list is at capacity.
    SinkFull(PipeId),
    /// The sink pipe's source list is at capacity.
    SourceFull(PipeId),
    /// The two pipes are already connected.
    Duplicate(PipeId, PipeId),
    /// The connection would make the graph cyclic.
    CycleDetected,
    /// An indexed source/sink access was out of range.
    IndexOutOfRange(usize),
}

impl core::fmt::Display for PatchError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::PipeNotFound(id) => write!(f, "{id} not found"),
            Self::SinkFull(id) => write!(f, "sink list of {id} is full"),
            Self::SourceFull(id) => write!(f, "source list of {id} is full"),
            Self::Duplicate(a, b) => write!(f, "{a} and {b} are already connected"),
            Self::CycleDetected => write!(f, "connection would create a cycle"),
            Self::IndexOutOfRange(idx) => write!(f, "index {idx} out of range"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PatchError {}

struct Node {
    unit: Box<dyn Unit>,
    sources: Vec<PipeId>,
    sinks: Vec<PipeId>,
    source_capacity: usize,
    sink_capacity: usize,
    /// Cache buffers for the fan-in/fan-out path. Empty while the pipe
    /// runs in place.
    cache: Vec<Buffer>,
    /// Block time of the most recent process/skip decision.
    last_time: i64,
    /// Memoized "is output required" answer for `req_time`.
    req_time: i64,
    req_cache: bool,
    /// Resume position for a demand scan interrupted by mutual recursion.
    scan_idx: usize,
}

impl Node {
    fn new(unit: Box<dyn Unit>) -> Self {
        let source_capacity = unit.source_capacity();
        let sink_capacity = unit.sink_capacity();
        Self {
            unit,
            sources: Vec::with_capacity(source_capacity.min(8)),
            sinks: Vec::with_capacity(sink_capacity.min(8)),
            source_capacity,
            sink_capacity,
            cache: Vec::new(),
            last_time: NEVER,
            req_time: NEVER,
            req_cache: false,
            scan_idx: 0,
        }
    }
}

/// Arena of pipes with connection management and the pull scheduler.
pub struct Rack {
    nodes: Vec<Option<Node>>,
}

impl Default for Rack {
    fn default() -> Self {
        Self::new()
    }
}

impl Rack {
    /// Creates an empty rack.
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Adds a pipe and returns its id. Capacities are read from the unit
    /// once, here, and fixed for the pipe's lifetime.
    pub fn add(&mut self, unit: Box<dyn Unit>) -> PipeId {
        let id = PipeId(self.nodes.len() as u32);
        self.nodes.push(Some(Node::new(unit)));
        id
    }

    /// Removes a pipe, unregistering every connection it participates in
    /// from both sides first.
    pub fn remove(&mut self, pipe: PipeId) -> Result<(), PatchError> {
        let node = self.node(pipe).ok_or(PatchError::PipeNotFound(pipe))?;
        let sources: Vec<PipeId> = node.sources.clone();
        let sinks: Vec<PipeId> = node.sinks.clone();
        for source in sources {
            self.disconnect(source, pipe);
        }
        for sink in sinks {
            self.disconnect(pipe, sink);
        }
        self.nodes[pipe.0 as usize] = None;
        Ok(())
    }

    /// Returns the number of live pipes.
    pub fn pipe_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Returns true when the id names a live pipe.
    pub fn contains(&self, pipe: PipeId) -> bool {
        self.node(pipe).is_some()
    }

    // --- Connections ---

    /// Connects `from` (source) to `to` (sink).
    ///
    /// Validation happens before any registration, so on error neither
    /// side's list has changed. Check order mirrors the registration
    /// order: the source's sink slot first, then the sink's source slot,
    /// then acyclicity.
    pub fn connect(&mut self, from: PipeId, to: PipeId) -> Result<(), PatchError> {
        let from_node = self.node(from).ok_or(PatchError::PipeNotFound(from))?;
        let to_node = self.node(to).ok_or(PatchError::PipeNotFound(to))?;

        if from_node.sinks.len() >= from_node.sink_capacity {
            return Err(PatchError::SinkFull(from));
        }
        if from_node.sinks.contains(&to) {
            return Err(PatchError::Duplicate(from, to));
        }
        if to_node.sources.len() >= to_node.source_capacity {
            return Err(PatchError::SourceFull(to));
        }
        if to_node.sources.contains(&from) {
            return Err(PatchError::Duplicate(from, to));
        }
        // The pull protocol has no cycle break, so reject at patch time:
        // from -> to closes a loop iff `to` already reaches `from`.
        if self.can_reach(to, from) {
            return Err(PatchError::CycleDetected);
        }

        if let Some(node) = self.node_mut(from) {
            node.sinks.push(to);
        }
        if let Some(node) = self.node_mut(to) {
            node.sources.push(from);
        }
        Ok(())
    }

    /// Disconnects `from` and `to`, unregistering both directions.
    /// Removing a link that does not exist is a silent no-op on whichever
    /// side has no record of it.
    pub fn disconnect(&mut self, from: PipeId, to: PipeId) {
        if let Some(node) = self.node_mut(from) {
            if let Some(pos) = node.sinks.iter().position(|s| *s == to) {
                node.sinks.remove(pos);
            }
        }
        if let Some(node) = self.node_mut(to) {
            if let Some(pos) = node.sources.iter().position(|s| *s == from) {
                node.sources.remove(pos);
            }
        }
    }

    /// Registers `pipe` as its own sink without validation. Boundary
    /// output pipes use this so the pull protocol sees exactly one sink
    /// (themselves) and takes the in-place path; the self-link is hidden
    /// from external sink book-keeping.
    pub(crate) fn register_self_sink(&mut self, pipe: PipeId) {
        if let Some(node) = self.node_mut(pipe) {
            if !node.sinks.contains(&pipe) {
                node.sinks.push(pipe);
            }
        }
    }

    // --- Accessors ---

    /// Number of connected sources.
    pub fn source_count(&self, pipe: PipeId) -> Result<usize, PatchError> {
        self.node(pipe)
            .map(|n| n.sources.len())
            .ok_or(PatchError::PipeNotFound(pipe))
    }

    /// Source capacity fixed at add time.
    pub fn source_capacity(&self, pipe: PipeId) -> Result<usize, PatchError> {
        self.node(pipe)
            .map(|n| n.source_capacity)
            .ok_or(PatchError::PipeNotFound(pipe))
    }

    /// The source connected at `index`.
    pub fn source_at(&self, pipe: PipeId, index: usize) -> Result<PipeId, PatchError> {
        let node = self.node(pipe).ok_or(PatchError::PipeNotFound(pipe))?;
        node.sources
            .get(index)
            .copied()
            .ok_or(PatchError::IndexOutOfRange(index))
    }

    /// Number of connected sinks. Self-registered boundary links are not
    /// counted.
    pub fn sink_count(&self, pipe: PipeId) -> Result<usize, PatchError> {
        self.node(pipe)
            .map(|n| n.sinks.iter().filter(|s| **s != pipe).count())
            .ok_or(PatchError::PipeNotFound(pipe))
    }

    /// Sink capacity as visible to external book-keeping: the capacity
    /// fixed at add time minus any self-registered boundary link.
    pub fn sink_capacity(&self, pipe: PipeId) -> Result<usize, PatchError> {
        self.node(pipe)
            .map(|n| {
                let hidden = n.sinks.iter().filter(|s| **s == pipe).count();
                n.sink_capacity - hidden
            })
            .ok_or(PatchError::PipeNotFound(pipe))
    }

    /// The sink connected at `index`, skipping self-registered links.
    pub fn sink_at(&self, pipe: PipeId, index: usize) -> Result<PipeId, PatchError> {
        let node = self.node(pipe).ok_or(PatchError::PipeNotFound(pipe))?;
        node.sinks
            .iter()
            .filter(|s| **s != pipe)
            .nth(index)
            .copied()
            .ok_or(PatchError::IndexOutOfRange(index))
    }

    /// Typed access to a pipe's unit.
    pub fn unit<U: Unit>(&self, pipe: PipeId) -> Option<&U> {
        let node = self.node(pipe)?;
        let unit: &dyn Any = node.unit.as_ref();
        unit.downcast_ref::<U>()
    }

    /// Typed mutable access to a pipe's unit.
    pub fn unit_mut<U: Unit>(&mut self, pipe: PipeId) -> Option<&mut U> {
        let node = self.node_mut(pipe)?;
        let unit: &mut dyn Any = node.unit.as_mut();
        unit.downcast_mut::<U>()
    }

    // --- Block evaluation ---

    /// Pulls one block from `pipe` into `output` on behalf of `sink`.
    ///
    /// If `sink` is not a registered sink of `pipe` the call returns
    /// without touching anything. The first pull at a new block time runs
    /// the pipe's process (or skip) exactly once; later pulls at the same
    /// time only deliver the cached result.
    pub fn pull(&mut self, pipe: PipeId, sink: PipeId, output: &mut Buffer, time: i64) {
        let Some(node) = self.node(pipe) else {
            return;
        };
        let Some(sink_index) = node.sinks.iter().position(|s| *s == sink) else {
            return;
        };
        let in_place = node.sinks.len() == 1 && node.sources.len() < 2;

        if node.last_time != time {
            let required = self.process_required(pipe, time);
            if let Some(node) = self.node_mut(pipe) {
                node.last_time = time;
            }
            if in_place {
                self.process_in_place(pipe, output, required, time);
            } else {
                self.process_cached(pipe, output, required, time);
            }
        }

        if !in_place && self.output_required_by(sink, time) {
            if let Some(node) = self.node_mut(pipe) {
                let Node { unit, cache, .. } = node;
                unit.write_output(cache, output, sink_index);
            }
        }
    }

    /// Single-sink fast path: the downstream output buffer doubles as this
    /// pipe's work buffer, lent upward for the duration of the call.
    fn process_in_place(&mut self, pipe: PipeId, output: &mut Buffer, required: bool, time: i64) {
        let Some(node) = self.node_mut(pipe) else {
            return;
        };
        // Drop buffers left over from a previous cached-mode block.
        node.cache.clear();

        match node.sources.first().copied() {
            None => output.clear(),
            Some(source) => self.pull(source, pipe, output, time),
        }

        if let Some(node) = self.node_mut(pipe) {
            if required {
                node.unit.process(core::slice::from_mut(output));
            } else {
                node.unit.skip(output.size());
            }
        }
    }

    /// Fan-in/fan-out path: one cache slot per `max(sources, sinks)`,
    /// sources pulled into their slots, the rest zeroed.
    fn process_cached(&mut self, pipe: PipeId, output: &mut Buffer, required: bool, time: i64) {
        let Some(node) = self.node_mut(pipe) else {
            return;
        };
        let source_count = node.sources.len();
        let slots = source_count.max(node.sinks.len());
        let mut cache = mem::take(&mut node.cache);
        cache.truncate(slots);

        for i in 0..slots {
            if i < cache.len() {
                if !output.is_compatible(&cache[i]) {
                    cache[i] = output.like();
                }
            } else {
                cache.push(output.like());
            }
            if i < source_count {
                let source = match self.node(pipe) {
                    Some(node) => node.sources[i],
                    None => break,
                };
                self.pull(source, pipe, &mut cache[i], time);
            } else {
                cache[i].clear();
            }
        }

        if let Some(node) = self.node_mut(pipe) {
            if required {
                node.unit.process(&mut cache);
            } else {
                node.unit.skip(output.size());
            }
            node.cache = cache;
        }
    }

    /// Does any sink need this pipe's output at `time`?
    fn process_required(&mut self, pipe: PipeId, time: i64) -> bool {
        let Some(node) = self.node(pipe) else {
            return false;
        };
        if node.sinks.len() == 1 {
            self.simple_output_check(pipe, time)
        } else {
            self.multiple_output_check(pipe, time)
        }
    }

    /// One sink: ask it once per block time and memoize the answer.
    fn simple_output_check(&mut self, pipe: PipeId, time: i64) -> bool {
        let Some(node) = self.node(pipe) else {
            return false;
        };
        if node.req_time != time {
            let sink = node.sinks[0];
            if let Some(node) = self.node_mut(pipe) {
                node.req_time = time;
            }
            let value = self.output_required_by(sink, time);
            if let Some(node) = self.node_mut(pipe) {
                node.req_cache = value;
            }
            value
        } else {
            node.req_cache
        }
    }

    /// Several sinks: scan in order, short-circuit on the first yes. The
    /// scan index survives mutual recursion so a re-entered query keeps
    /// polling the remaining sinks for the same time; it resets when a new
    /// time arrives or a positive answer is found.
    fn multiple_output_check(&mut self, pipe: PipeId, time: i64) -> bool {
        let Some(node) = self.node(pipe) else {
            return false;
        };

        if node.req_time != time {
            if let Some(node) = self.node_mut(pipe) {
                node.req_time = time;
                node.req_cache = false;
                node.scan_idx = 0;
            }
            loop {
                let sink = match self.node(pipe) {
                    Some(node) if node.scan_idx < node.sinks.len() => node.sinks[node.scan_idx],
                    _ => break,
                };
                if let Some(node) = self.node_mut(pipe) {
                    node.scan_idx += 1;
                }
                if self.output_required_by(sink, time) {
                    if let Some(node) = self.node_mut(pipe) {
                        node.req_cache = true;
                    }
                    break;
                }
            }
            if let Some(node) = self.node_mut(pipe) {
                node.scan_idx = 0;
                node.req_cache
            } else {
                false
            }
        } else if node.scan_idx > 0 {
            // Re-entered mid-scan: poll the sinks not yet asked this block.
            loop {
                let sink = match self.node(pipe) {
                    Some(node) if node.scan_idx < node.sinks.len() => node.sinks[node.scan_idx],
                    _ => break,
                };
                if let Some(node) = self.node_mut(pipe) {
                    node.scan_idx += 1;
                }
                if self.output_required_by(sink, time) {
                    if let Some(node) = self.node_mut(pipe) {
                        node.scan_idx = 0;
                        node.req_cache = true;
                    }
                    return true;
                }
            }
            if let Some(node) = self.node_mut(pipe) {
                node.scan_idx = 0;
            }
            false
        } else {
            node.req_cache
        }
    }

    /// Does `sink` require output from its source at `time`?
    fn output_required_by(&mut self, sink: PipeId, time: i64) -> bool {
        let Some(node) = self.node(sink) else {
            return false;
        };
        if let Some(forced) = node.unit.output_gate() {
            return forced;
        }
        let base = self.process_required(sink, time);
        match self.node_mut(sink) {
            Some(node) => node.unit.input_required(base),
            None => base,
        }
    }

    // --- Internals ---

    #[inline]
    fn node(&self, pipe: PipeId) -> Option<&Node> {
        self.nodes.get(pipe.0 as usize).and_then(|n| n.as_ref())
    }

    #[inline]
    fn node_mut(&mut self, pipe: PipeId) -> Option<&mut Node> {
        self.nodes.get_mut(pipe.0 as usize).and_then(|n| n.as_mut())
    }

    /// Depth-first reachability along sink edges. Used for the connect-time
    /// cycle check.
    fn can_reach(&self, start: PipeId, target: PipeId) -> bool {
        if start == target {
            return true;
        }
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            let idx = current.0 as usize;
            if visited[idx] {
                continue;
            }
            visited[idx] = true;
            if let Some(node) = self.node(current) {
                for &sink in &node.sinks {
                    if sink == target {
                        return true;
                    }
                    stack.push(sink);
                }
            }
        }
        false
    }
}
