//! Signal graph.
//!
//! A graph is a set of nodes joined by connections. Nodes with several
//! incoming connections sum their sources. The graph is built and validated
//! on the control thread, then moved to the audio thread where `process`
//! runs without allocating.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet, VecDeque};

use smallvec::SmallVec;

use loopstack_comms::GainStage;
use loopstack_core::{CHANNELS, ChannelCount, Frames, Sample, SampleRate};
use loopstack_module::{AudioBuffer, ProcessingModule};

use crate::chain::ModuleChain;
use crate::config::{EngineConfig, GraphConfig};
use crate::dsp::{HighPass, SmoothedGain, StereoBuffer, stereo_buffer};
use crate::error::GraphError;

pub type NodeId = usize;

/// Shape of the live input stream feeding the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSpec {
    pub channels: ChannelCount,
    pub sample_rate: SampleRate,
}

/// What a node does with its summed input
pub enum NodeKind {
    /// Live input stream (source)
    LiveInput,
    /// Loop playback voice (source)
    LoopInput,
    /// Smoothed gain stage
    Gain(SmoothedGain),
    HighPass(HighPass),
    /// A processing module; bypassed or failing modules pass audio through
    Module(Box<dyn ProcessingModule>),
    /// Capture point for recording and metering; passes audio through
    Tap,
    /// Final output (sink)
    Output,
}

impl NodeKind {
    fn is_source(&self) -> bool {
        matches!(self, Self::LiveInput | Self::LoopInput)
    }
}

/// A node in the signal graph
pub struct GraphNode {
    id: NodeId,
    label: String,
    kind: NodeKind,
}

impl GraphNode {
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }
}

/// Connection between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection {
    pub from: NodeId,
    pub to: NodeId,
}

/// The signal processing graph
pub struct SignalGraph {
    nodes: Vec<GraphNode>,
    connections: HashSet<Connection>,

    sample_rate: SampleRate,
    block_size: Frames,

    // Per-node summed input and output, block_size frames each
    input_buffers: Vec<StereoBuffer>,
    output_buffers: Vec<StereoBuffer>,
    silence: StereoBuffer,

    // Computed by finalize() so process() never allocates
    incoming: Vec<SmallVec<[NodeId; 4]>>,
    processing_order: Vec<NodeId>,
    finalized: bool,

    gain_stages: SmallVec<[(GainStage, NodeId); 4]>,
    tap: Option<NodeId>,
    output: Option<NodeId>,
}

impl SignalGraph {
    /// Create an empty graph for the given sample rate and maximum block size
    pub fn new(sample_rate: SampleRate, block_size: Frames) -> Self {
        Self {
            nodes: Vec::new(),
            connections: HashSet::new(),
            sample_rate,
            block_size,
            input_buffers: Vec::new(),
            output_buffers: Vec::new(),
            silence: stereo_buffer(block_size),
            incoming: Vec::new(),
            processing_order: Vec::new(),
            finalized: false,
            gain_stages: SmallVec::new(),
            tap: None,
            output: None,
        }
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    pub fn block_size(&self) -> Frames {
        self.block_size
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn connections(&self) -> &HashSet<Connection> {
        &self.connections
    }

    /// Node IDs in the order `process` visits them; empty until finalized.
    pub fn processing_order(&self) -> &[NodeId] {
        &self.processing_order
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Add a node. Modules are initialized here and must be stereo.
    pub fn add_node(
        &mut self,
        label: impl Into<String>,
        mut kind: NodeKind,
    ) -> Result<NodeId, GraphError> {
        if let NodeKind::Module(module) = &mut kind {
            check_module(module.as_ref())?;
            module.initialize(self.sample_rate, self.block_size)?;
        }

        let id = self.nodes.len();
        match kind {
            NodeKind::Tap if self.tap.is_none() => self.tap = Some(id),
            NodeKind::Output if self.output.is_none() => self.output = Some(id),
            _ => {}
        }

        let label = label.into();
        tracing::debug!("Added node {} ({})", id, label);
        self.nodes.push(GraphNode { id, label, kind });
        self.input_buffers.push(stereo_buffer(self.block_size));
        self.output_buffers.push(stereo_buffer(self.block_size));
        self.finalized = false;
        Ok(id)
    }

    /// Connect two nodes
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        if from >= self.nodes.len() {
            return Err(GraphError::UnknownNode(from));
        }
        if to >= self.nodes.len() {
            return Err(GraphError::UnknownNode(to));
        }

        if self.connections.insert(Connection { from, to }) {
            tracing::debug!("Connected {} -> {}", from, to);
            self.finalized = false;
        }
        Ok(())
    }

    /// Disconnect two nodes
    pub fn disconnect(&mut self, from: NodeId, to: NodeId) -> bool {
        let removed = self.connections.remove(&Connection { from, to });
        if removed {
            tracing::debug!("Disconnected {} -> {}", from, to);
            self.finalized = false;
        }
        removed
    }

    /// Remove every connection, keeping the nodes.
    pub fn clear_connections(&mut self) {
        self.connections.clear();
        self.finalized = false;
    }

    /// Name a gain node as a live-adjustable stage.
    pub fn set_gain_stage(&mut self, stage: GainStage, id: NodeId) -> Result<(), GraphError> {
        match self.nodes.get(id) {
            Some(GraphNode {
                kind: NodeKind::Gain(_),
                ..
            }) => {
                self.gain_stages.retain(|(s, _)| *s != stage);
                self.gain_stages.push((stage, id));
                Ok(())
            }
            _ => Err(GraphError::UnknownNode(id)),
        }
    }

    /// Retarget a named gain stage. Returns false if the graph has no such stage.
    pub fn set_gain(&mut self, stage: GainStage, target: f32) -> bool {
        let Some(&(_, id)) = self.gain_stages.iter().find(|(s, _)| *s == stage) else {
            return false;
        };
        match &mut self.nodes[id].kind {
            NodeKind::Gain(gain) => {
                gain.set_target(target);
                true
            }
            _ => false,
        }
    }

    /// Current target of a named gain stage
    pub fn gain_target(&self, stage: GainStage) -> Option<f32> {
        let &(_, id) = self.gain_stages.iter().find(|(s, _)| *s == stage)?;
        match &self.nodes[id].kind {
            NodeKind::Gain(gain) => Some(gain.target()),
            _ => None,
        }
    }

    /// Validate the graph and precompute processing order.
    ///
    /// Fails if the graph has a cycle, has no output, or contains a node that
    /// is not on a path from a source to the output.
    pub fn finalize(&mut self) -> Result<(), GraphError> {
        let output = self.output.ok_or(GraphError::MissingOutput)?;

        let order = self.topological_sort().map_err(|remaining| {
            GraphError::Cycle(
                remaining
                    .iter()
                    .map(|&id| self.nodes[id].label.clone())
                    .collect(),
            )
        })?;

        let count = self.nodes.len();
        let mut forward: Vec<Vec<NodeId>> = vec![Vec::new(); count];
        let mut backward: Vec<Vec<NodeId>> = vec![Vec::new(); count];
        for conn in &self.connections {
            forward[conn.from].push(conn.to);
            backward[conn.to].push(conn.from);
        }

        let sources: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.kind.is_source())
            .map(|n| n.id)
            .collect();
        let fed = reachable(&sources, &forward);
        let drained = reachable(&[output], &backward);

        if let Some(node) = self.nodes.iter().find(|n| !fed[n.id] || !drained[n.id]) {
            return Err(GraphError::Orphaned(node.label.clone()));
        }

        self.incoming = backward
            .into_iter()
            .map(|mut sources| {
                sources.sort_unstable();
                sources.into_iter().collect()
            })
            .collect();
        self.processing_order = order;
        self.finalized = true;

        tracing::debug!("Graph processing order: {:?}", self.processing_order);
        Ok(())
    }

    /// Perform topological sort using Kahn's algorithm
    ///
    /// Returns Ok(order) if graph is acyclic, `Err(remaining_nodes)` if cycles exist.
    fn topological_sort(&self) -> Result<Vec<NodeId>, Vec<NodeId>> {
        let count = self.nodes.len();
        let mut in_degree = vec![0_usize; count];
        let mut adjacency: Vec<Vec<NodeId>> = vec![Vec::new(); count];
        for conn in &self.connections {
            in_degree[conn.to] += 1;
            adjacency[conn.from].push(conn.to);
        }

        // Min-heap keeps the order deterministic
        let mut queue: BinaryHeap<Reverse<NodeId>> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(id, _)| Reverse(id))
            .collect();

        let mut result = Vec::with_capacity(count);
        while let Some(Reverse(node_id)) = queue.pop() {
            result.push(node_id);
            for &to_id in &adjacency[node_id] {
                in_degree[to_id] -= 1;
                if in_degree[to_id] == 0 {
                    queue.push(Reverse(to_id));
                }
            }
        }

        if result.len() == count {
            Ok(result)
        } else {
            let processed: HashSet<NodeId> = result.into_iter().collect();
            Err((0..count).filter(|id| !processed.contains(id)).collect())
        }
    }

    /// Render one block.
    ///
    /// `live` feeds `LiveInput` nodes and `looped` feeds `LoopInput` nodes.
    /// `frames` is clamped to the block size. Does nothing until finalized.
    pub fn process(
        &mut self,
        live: [&[Sample]; CHANNELS],
        looped: [&[Sample]; CHANNELS],
        frames: Frames,
    ) {
        if !self.finalized {
            return;
        }
        let frames = frames.min(self.block_size);

        let Self {
            nodes,
            input_buffers,
            output_buffers,
            incoming,
            processing_order,
            ..
        } = self;

        for &id in processing_order.iter() {
            match nodes[id].kind {
                NodeKind::LiveInput => {
                    copy_block(&mut output_buffers[id], live, frames);
                    continue;
                }
                NodeKind::LoopInput => {
                    copy_block(&mut output_buffers[id], looped, frames);
                    continue;
                }
                _ => {}
            }

            // Sum sources into this node's input
            let input = &mut input_buffers[id];
            for channel in input.iter_mut() {
                channel[..frames].fill(0.0);
            }
            for &source_id in &incoming[id] {
                let source = &output_buffers[source_id];
                for (input_ch, source_ch) in input.iter_mut().zip(source.iter()) {
                    for (d, &s) in input_ch[..frames].iter_mut().zip(&source_ch[..frames]) {
                        *d += s;
                    }
                }
            }

            let input = &input_buffers[id];
            let output = &mut output_buffers[id];
            match &mut nodes[id].kind {
                NodeKind::LiveInput | NodeKind::LoopInput => {}
                NodeKind::Tap | NodeKind::Output => copy_stereo(input, output, frames),
                NodeKind::Gain(gain) => gain.process(input, output, frames),
                NodeKind::HighPass(filter) => filter.process(input, output, frames),
                NodeKind::Module(module) => run_module(module.as_mut(), input, output, frames),
            }
        }
    }

    /// Output of the last `process` call
    pub fn output(&self, frames: Frames) -> [&[Sample]; CHANNELS] {
        self.node_output(self.output, frames)
    }

    /// Signal at the capture tap during the last `process` call
    pub fn tap(&self, frames: Frames) -> [&[Sample]; CHANNELS] {
        self.node_output(self.tap, frames)
    }

    fn node_output(&self, id: Option<NodeId>, frames: Frames) -> [&[Sample]; CHANNELS] {
        let frames = frames.min(self.block_size);
        let buffer = match id {
            Some(id) if self.finalized => &self.output_buffers[id],
            _ => &self.silence,
        };
        [&buffer[0][..frames], &buffer[1][..frames]]
    }
}

/// Check that a module can be placed in the chain.
pub fn check_module(module: &dyn ProcessingModule) -> Result<(), GraphError> {
    let inputs = module.input_channels();
    let outputs = module.output_channels();
    if inputs != CHANNELS || outputs != CHANNELS {
        return Err(GraphError::UnsupportedModule {
            name: module.info().name.clone(),
            inputs,
            outputs,
        });
    }
    Ok(())
}

fn reachable(start: &[NodeId], edges: &[Vec<NodeId>]) -> Vec<bool> {
    let mut seen = vec![false; edges.len()];
    let mut queue: VecDeque<NodeId> = start.iter().copied().collect();
    for &id in start {
        seen[id] = true;
    }
    while let Some(id) = queue.pop_front() {
        for &next in &edges[id] {
            if !seen[next] {
                seen[next] = true;
                queue.push_back(next);
            }
        }
    }
    seen
}

fn copy_block(dst: &mut StereoBuffer, src: [&[Sample]; CHANNELS], frames: Frames) {
    for (dst_ch, src_ch) in dst.iter_mut().zip(src) {
        let n = frames.min(src_ch.len());
        dst_ch[..n].copy_from_slice(&src_ch[..n]);
        dst_ch[n..frames].fill(0.0);
    }
}

fn copy_stereo(input: &StereoBuffer, output: &mut StereoBuffer, frames: Frames) {
    for (o, i) in output.iter_mut().zip(input.iter()) {
        o[..frames].copy_from_slice(&i[..frames]);
    }
}

fn run_module(
    module: &mut dyn ProcessingModule,
    input: &StereoBuffer,
    output: &mut StereoBuffer,
    frames: Frames,
) {
    if module.is_bypassed() {
        copy_stereo(input, output, frames);
        return;
    }

    let [in_l, in_r] = input;
    let [out_l, out_r] = output;
    let inputs: [&[Sample]; CHANNELS] = [&in_l[..frames], &in_r[..frames]];
    let mut outputs: [&mut [Sample]; CHANNELS] = [&mut out_l[..frames], &mut out_r[..frames]];
    let mut audio = AudioBuffer {
        inputs: &inputs,
        outputs: &mut outputs,
        frames,
    };
    if module.process(&mut audio).is_err() {
        audio.pass_through();
    }
}

/// Node IDs of the standard looper routing
struct Routing {
    live: NodeId,
    looped: NodeId,
    trim: NodeId,
    high_pass: Option<NodeId>,
    modules: Vec<NodeId>,
    tap: NodeId,
    monitor: NodeId,
    loop_mix: NodeId,
    master: NodeId,
    output: NodeId,
}

/// Build the looper graph for an input stream and routing state.
///
/// ```text
/// live -> trim -> [high-pass] -> [modules...] -> tap -> monitor -> master -> out
/// loop -> loop mix ----------------------------------------------^
/// ```
///
/// The high-pass exists only when the processing mode has a corner and the
/// modules only when low-latency mode is off. The result is validated.
pub fn build_graph(
    input: &InputSpec,
    config: &GraphConfig,
    chain: &ModuleChain,
    settings: &EngineConfig,
) -> Result<SignalGraph, GraphError> {
    if input.channels == 0 {
        return Err(GraphError::UnsupportedInput(
            "input stream has no channels".to_string(),
        ));
    }
    if input.sample_rate != settings.sample_rate {
        return Err(GraphError::SampleRateMismatch {
            expected: settings.sample_rate,
            actual: input.sample_rate,
        });
    }

    let sample_rate = settings.sample_rate;
    let smoothing = settings.gain_smoothing_ms;
    let mode = settings.modes.get(config.processing_mode);
    let gain = |value: f32| NodeKind::Gain(SmoothedGain::new(value, smoothing, sample_rate));

    let mut graph = SignalGraph::new(sample_rate, settings.block_size);

    let live = graph.add_node("live input", NodeKind::LiveInput)?;
    let looped = graph.add_node("loop playback", NodeKind::LoopInput)?;
    let trim = graph.add_node("input trim", gain(mode.trim))?;
    let high_pass = match mode.high_pass_hz {
        Some(hz) => Some(graph.add_node(
            "high-pass",
            NodeKind::HighPass(HighPass::new(hz, sample_rate)),
        )?),
        None => None,
    };

    let mut modules = Vec::new();
    if !config.low_latency {
        for prototype in chain.iter() {
            let label = prototype.info().name.clone();
            modules.push(graph.add_node(label, NodeKind::Module(prototype.instantiate()))?);
        }
    }

    let tap = graph.add_node("capture tap", NodeKind::Tap)?;
    let monitor = graph.add_node(
        "monitor",
        gain(if config.monitor_enabled { 1.0 } else { 0.0 }),
    )?;
    let loop_mix = graph.add_node("loop mix", gain(settings.loop_mix_level))?;
    let master = graph.add_node("master", gain(config.master_volume.clamp(0.0, 1.0)))?;
    let output = graph.add_node("output", NodeKind::Output)?;

    let routing = Routing {
        live,
        looped,
        trim,
        high_pass,
        modules,
        tap,
        monitor,
        loop_mix,
        master,
        output,
    };
    wire(&mut graph, &routing)?;

    graph.set_gain_stage(GainStage::InputTrim, routing.trim)?;
    graph.set_gain_stage(GainStage::Monitor, routing.monitor)?;
    graph.set_gain_stage(GainStage::LoopMix, routing.loop_mix)?;
    graph.set_gain_stage(GainStage::Master, routing.master)?;

    tracing::debug!(
        "Built graph: mode={}, low_latency={}, {} nodes",
        config.processing_mode,
        config.low_latency,
        graph.node_count()
    );
    Ok(graph)
}

/// Connect the routing from scratch. Calling it twice yields the same graph.
fn wire(graph: &mut SignalGraph, routing: &Routing) -> Result<(), GraphError> {
    graph.clear_connections();

    let mut previous = routing.live;
    let chain = std::iter::once(routing.trim)
        .chain(routing.high_pass)
        .chain(routing.modules.iter().copied())
        .chain([routing.tap, routing.monitor, routing.master, routing.output]);
    for id in chain {
        graph.connect(previous, id)?;
        previous = id;
    }

    graph.connect(routing.looped, routing.loop_mix)?;
    graph.connect(routing.loop_mix, routing.master)?;

    graph.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::create_builtin;
    use crate::config::ProcessingMode;
    use approx::assert_relative_eq;
    use loopstack_module::{ModuleControls, ModuleError, ModuleInfo};
    use std::sync::Arc;

    /// Module that always fails to process
    struct Broken {
        controls: Arc<ModuleControls>,
        info: ModuleInfo,
    }

    impl Broken {
        fn new() -> Self {
            Self {
                controls: ModuleControls::new(Vec::new()),
                info: ModuleInfo {
                    name: "Broken".to_string(),
                    vendor: "test".to_string(),
                    version: "0".to_string(),
                    unique_id: "test.broken".to_string(),
                },
            }
        }
    }

    impl ProcessingModule for Broken {
        fn info(&self) -> &ModuleInfo {
            &self.info
        }
        fn controls(&self) -> &Arc<ModuleControls> {
            &self.controls
        }
        fn instantiate(&self) -> Box<dyn ProcessingModule> {
            Box::new(Self::new())
        }
        fn initialize(&mut self, _: SampleRate, _: Frames) -> Result<(), ModuleError> {
            Ok(())
        }
        fn process(&mut self, audio: &mut AudioBuffer) -> Result<(), ModuleError> {
            for out in audio.outputs.iter_mut() {
                out.fill(9.0);
            }
            Err(ModuleError::ProcessingFailed("always".to_string()))
        }
    }

    /// Mono-only module
    struct MonoOnly(Broken);

    impl ProcessingModule for MonoOnly {
        fn info(&self) -> &ModuleInfo {
            self.0.info()
        }
        fn controls(&self) -> &Arc<ModuleControls> {
            self.0.controls()
        }
        fn instantiate(&self) -> Box<dyn ProcessingModule> {
            Box::new(Self(Broken::new()))
        }
        fn initialize(&mut self, _: SampleRate, _: Frames) -> Result<(), ModuleError> {
            Ok(())
        }
        fn process(&mut self, _: &mut AudioBuffer) -> Result<(), ModuleError> {
            Ok(())
        }
        fn input_channels(&self) -> ChannelCount {
            1
        }
    }

    fn settings() -> EngineConfig {
        EngineConfig {
            block_size: 64,
            gain_smoothing_ms: 0.0,
            ..EngineConfig::default()
        }
    }

    fn raw_config() -> GraphConfig {
        GraphConfig {
            low_latency: false,
            processing_mode: ProcessingMode::Raw,
            monitor_enabled: true,
            master_volume: 1.0,
            active_track: 0,
        }
    }

    fn stereo_input() -> InputSpec {
        InputSpec {
            channels: 2,
            sample_rate: 48000,
        }
    }

    fn render(graph: &mut SignalGraph, live: f32, looped: f32, frames: usize) -> [Vec<f32>; 2] {
        let live_buf = vec![live; frames];
        let loop_buf = vec![looped; frames];
        graph.process([&live_buf, &live_buf], [&loop_buf, &loop_buf], frames);
        let [l, r] = graph.output(frames);
        [l.to_vec(), r.to_vec()]
    }

    #[test]
    fn test_empty_graph_needs_output() {
        let mut graph = SignalGraph::new(48000, 64);
        assert!(matches!(graph.finalize(), Err(GraphError::MissingOutput)));
        assert_eq!(graph.output(4)[0], &[0.0; 4]);
    }

    #[test]
    fn test_connect_unknown_node() {
        let mut graph = SignalGraph::new(48000, 64);
        let input = graph.add_node("in", NodeKind::LiveInput).unwrap();
        assert!(matches!(
            graph.connect(input, 7),
            Err(GraphError::UnknownNode(7))
        ));
    }

    #[test]
    fn test_topological_order() {
        let mut graph = SignalGraph::new(48000, 64);
        let out = graph.add_node("out", NodeKind::Output).unwrap();
        let tap = graph.add_node("tap", NodeKind::Tap).unwrap();
        let input = graph.add_node("in", NodeKind::LiveInput).unwrap();

        graph.connect(input, tap).unwrap();
        graph.connect(tap, out).unwrap();
        graph.finalize().unwrap();

        assert_eq!(graph.processing_order(), &[input, tap, out]);
    }

    #[test]
    fn test_cycle_rejected() {
        let mut graph = SignalGraph::new(48000, 64);
        let input = graph.add_node("in", NodeKind::LiveInput).unwrap();
        let a = graph.add_node("a", NodeKind::Tap).unwrap();
        let b = graph
            .add_node("b", NodeKind::Gain(SmoothedGain::new(1.0, 0.0, 48000)))
            .unwrap();
        let out = graph.add_node("out", NodeKind::Output).unwrap();

        graph.connect(input, a).unwrap();
        graph.connect(a, b).unwrap();
        graph.connect(b, a).unwrap();
        graph.connect(b, out).unwrap();

        match graph.finalize() {
            Err(GraphError::Cycle(nodes)) => {
                assert!(nodes.contains(&"a".to_string()));
                assert!(nodes.contains(&"b".to_string()));
            }
            _ => panic!("expected cycle error"),
        }
    }

    #[test]
    fn test_orphan_rejected() {
        let mut graph = SignalGraph::new(48000, 64);
        let input = graph.add_node("in", NodeKind::LiveInput).unwrap();
        let out = graph.add_node("out", NodeKind::Output).unwrap();
        graph.add_node("dangling", NodeKind::Tap).unwrap();
        graph.connect(input, out).unwrap();

        assert!(matches!(
            graph.finalize(),
            Err(GraphError::Orphaned(label)) if label == "dangling"
        ));
    }

    #[test]
    fn test_summing_inputs() {
        let mut graph = SignalGraph::new(48000, 64);
        let live = graph.add_node("live", NodeKind::LiveInput).unwrap();
        let looped = graph.add_node("loop", NodeKind::LoopInput).unwrap();
        let out = graph.add_node("out", NodeKind::Output).unwrap();
        graph.connect(live, out).unwrap();
        graph.connect(looped, out).unwrap();
        graph.finalize().unwrap();

        let [l, r] = render(&mut graph, 0.25, 0.5, 8);
        assert_eq!(l, vec![0.75; 8]);
        assert_eq!(r, vec![0.75; 8]);
    }

    #[test]
    fn test_disconnect_invalidates() {
        let mut graph = SignalGraph::new(48000, 64);
        let live = graph.add_node("live", NodeKind::LiveInput).unwrap();
        let out = graph.add_node("out", NodeKind::Output).unwrap();
        graph.connect(live, out).unwrap();
        graph.finalize().unwrap();
        assert!(graph.is_finalized());

        assert!(graph.disconnect(live, out));
        assert!(!graph.disconnect(live, out));
        assert!(!graph.is_finalized());
    }

    #[test]
    fn test_raw_path_passes_input() {
        let mut graph = build_graph(
            &stereo_input(),
            &raw_config(),
            &ModuleChain::new(),
            &settings(),
        )
        .unwrap();

        let [l, _] = render(&mut graph, 0.5, 0.0, 16);
        assert_eq!(l, vec![0.5; 16]);
        assert_eq!(graph.tap(16)[0], &[0.5; 16]);
    }

    #[test]
    fn test_monitor_off_still_taps_and_plays_loop() {
        let config = GraphConfig {
            monitor_enabled: false,
            ..raw_config()
        };
        let mut graph =
            build_graph(&stereo_input(), &config, &ModuleChain::new(), &settings()).unwrap();

        let [l, _] = render(&mut graph, 0.5, 0.25, 16);
        assert_eq!(l, vec![0.25; 16]);
        assert_eq!(graph.tap(16)[1], &[0.5; 16]);
    }

    #[test]
    fn test_master_volume_scales_everything() {
        let config = GraphConfig {
            master_volume: 0.5,
            ..raw_config()
        };
        let mut graph =
            build_graph(&stereo_input(), &config, &ModuleChain::new(), &settings()).unwrap();

        let [l, _] = render(&mut graph, 0.5, 0.25, 4);
        assert_eq!(l, vec![0.375; 4]);
    }

    #[test]
    fn test_low_latency_skips_modules() {
        let mut chain = ModuleChain::new();
        let drive = create_builtin("drive").unwrap();
        drive.set_parameter(0, 2.0).unwrap();
        chain.push(drive);

        let mut processed =
            build_graph(&stereo_input(), &raw_config(), &chain, &settings()).unwrap();
        let [l, _] = render(&mut processed, 0.25, 0.0, 4);
        assert_eq!(l, vec![0.5; 4]);

        let direct = GraphConfig {
            low_latency: true,
            ..raw_config()
        };
        let mut bypassed = build_graph(&stereo_input(), &direct, &chain, &settings()).unwrap();
        let [l, _] = render(&mut bypassed, 0.25, 0.0, 4);
        assert_eq!(l, vec![0.25; 4]);
        assert_eq!(bypassed.node_count(), processed.node_count() - 1);
    }

    #[test]
    fn test_bypassed_module_passes_through() {
        let mut chain = ModuleChain::new();
        let drive = create_builtin("drive").unwrap();
        drive.set_parameter(0, 3.0).unwrap();
        drive.set_bypass(true);
        chain.push(drive);

        let mut graph = build_graph(&stereo_input(), &raw_config(), &chain, &settings()).unwrap();
        let [l, _] = render(&mut graph, 0.25, 0.0, 4);
        assert_eq!(l, vec![0.25; 4]);
    }

    #[test]
    fn test_failing_module_passes_through() {
        let mut chain = ModuleChain::new();
        chain.push(Box::new(Broken::new()));

        let mut graph = build_graph(&stereo_input(), &raw_config(), &chain, &settings()).unwrap();
        let [l, r] = render(&mut graph, 0.25, 0.0, 4);
        assert_eq!(l, vec![0.25; 4]);
        assert_eq!(r, vec![0.25; 4]);
    }

    #[test]
    fn test_non_stereo_module_rejected() {
        let mut chain = ModuleChain::new();
        chain.push(Box::new(MonoOnly(Broken::new())));

        assert!(matches!(
            build_graph(&stereo_input(), &raw_config(), &chain, &settings()),
            Err(GraphError::UnsupportedModule { inputs: 1, .. })
        ));
    }

    #[test]
    fn test_input_validation() {
        let config = raw_config();
        let chain = ModuleChain::new();
        let silent = InputSpec {
            channels: 0,
            sample_rate: 48000,
        };
        assert!(matches!(
            build_graph(&silent, &config, &chain, &settings()),
            Err(GraphError::UnsupportedInput(_))
        ));

        let wrong_rate = InputSpec {
            channels: 1,
            sample_rate: 44100,
        };
        assert!(matches!(
            build_graph(&wrong_rate, &config, &chain, &settings()),
            Err(GraphError::SampleRateMismatch {
                expected: 48000,
                actual: 44100
            })
        ));
    }

    #[test]
    fn test_processing_modes() {
        let chain = ModuleChain::new();
        let guitar = GraphConfig {
            processing_mode: ProcessingMode::Guitar,
            ..raw_config()
        };
        let mut graph = build_graph(&stereo_input(), &guitar, &chain, &settings()).unwrap();
        assert_relative_eq!(graph.gain_target(GainStage::InputTrim).unwrap(), 2.6);

        // First frame of a step passes the high-pass nearly unchanged
        let [l, _] = render(&mut graph, 0.1, 0.0, 4);
        assert!(l[0] > 0.25 && l[0] <= 0.26);

        let raw = build_graph(&stereo_input(), &raw_config(), &chain, &settings()).unwrap();
        assert_eq!(raw.node_count(), graph.node_count() - 1);
    }

    #[test]
    fn test_set_gain_stage() {
        let mut graph = build_graph(
            &stereo_input(),
            &raw_config(),
            &ModuleChain::new(),
            &settings(),
        )
        .unwrap();

        assert!(graph.set_gain(GainStage::Monitor, 0.0));
        let [l, _] = render(&mut graph, 0.5, 0.0, 4);
        assert_eq!(l, vec![0.0; 4]);
        assert_eq!(graph.gain_target(GainStage::Monitor), Some(0.0));
    }

    #[test]
    fn test_rewiring_is_idempotent() {
        let mut graph = build_graph(
            &stereo_input(),
            &raw_config(),
            &ModuleChain::new(),
            &settings(),
        )
        .unwrap();
        let connections = graph.connections().clone();
        let order = graph.processing_order().to_vec();

        let routing = Routing {
            live: 0,
            looped: 1,
            trim: 2,
            high_pass: None,
            modules: Vec::new(),
            tap: 3,
            monitor: 4,
            loop_mix: 5,
            master: 6,
            output: 7,
        };
        wire(&mut graph, &routing).unwrap();
        wire(&mut graph, &routing).unwrap();

        assert_eq!(graph.connections(), &connections);
        assert_eq!(graph.processing_order(), order.as_slice());
    }

    #[test]
    fn test_short_block_is_clamped() {
        let mut graph = build_graph(
            &stereo_input(),
            &raw_config(),
            &ModuleChain::new(),
            &settings(),
        )
        .unwrap();
        let live = vec![0.1; 200];
        graph.process([&live, &live], [&[], &[]], 200);
        assert_eq!(graph.output(200)[0].len(), 64);
    }
}
