//! Compute pass graph.
//!
//! Passes are added in submission order. Each declares the passes it must run
//! after, the buffers it touches, whether it is enabled this frame, and the
//! dispatches it records. A pass can only name passes added before it as
//! predecessors, so insertion order is always a valid execution order.
//!
//! On execution, disabled passes are skipped and a barrier is recorded in
//! front of any pass touching a buffer written by an earlier pass since the
//! last barrier, unless the pass opted out with
//! [`PassBuilder::no_transition`]. Passes that need barriers between their own
//! dispatches put them in their [`DispatchParams`].

use crate::{
    pass::{BufferId, DispatchGroups, DispatchParams, DispatchStep, Kernel, PushConstants, ResourceUsage},
    util::typedefs::{FastHashSet, SsoString},
};

/// Handle to a pass added to a [`PassGraph`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PassHandle {
    idx: usize,
}

/// Records the work of the passes into a backend.
pub trait PassExecutor {
    /// Makes every previous write visible to every following read.
    fn barrier(&mut self);
    fn clear(&mut self, buffer: BufferId);
    fn dispatch(&mut self, kernel: &Kernel, groups: &DispatchGroups, push_constants: Option<&PushConstants>);
}

/// Called around every executed pass, for profiling.
pub trait PassTimer {
    fn begin(&mut self, label: &str);
    fn end(&mut self, label: &str);
}

/// What happened during [`PassGraph::execute`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GraphStats {
    pub executed: Vec<SsoString>,
    pub skipped: Vec<SsoString>,
    /// Barriers inserted between passes.
    pub pass_barriers: usize,
    /// Barriers requested by the passes themselves.
    pub inner_barriers: usize,
    pub dispatches: usize,
}

struct PassNode {
    label: SsoString,
    predecessors: Vec<PassHandle>,
    resources: Vec<(BufferId, ResourceUsage)>,
    enabled: bool,
    no_transition: bool,
    params: DispatchParams,
}

#[derive(Default)]
pub struct PassGraph {
    nodes: Vec<PassNode>,
}

impl PassGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pass(&mut self, label: impl Into<SsoString>) -> PassBuilder<'_> {
        PassBuilder {
            graph: self,
            node: PassNode {
                label: label.into(),
                predecessors: Vec::new(),
                resources: Vec::new(),
                enabled: true,
                no_transition: false,
                params: DispatchParams::new(),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn label(&self, handle: PassHandle) -> &str {
        &self.nodes[handle.idx].label
    }

    pub fn predecessors(&self, handle: PassHandle) -> &[PassHandle] {
        &self.nodes[handle.idx].predecessors
    }

    pub fn is_enabled(&self, handle: PassHandle) -> bool {
        self.nodes[handle.idx].enabled
    }

    pub fn params(&self, handle: PassHandle) -> &DispatchParams {
        &self.nodes[handle.idx].params
    }

    pub fn find(&self, label: &str) -> Option<PassHandle> {
        self.nodes
            .iter()
            .position(|node| node.label == label)
            .map(|idx| PassHandle { idx })
    }

    pub fn execute(&self, executor: &mut dyn PassExecutor, mut timer: Option<&mut dyn PassTimer>) -> GraphStats {
        profiling::scope!("PassGraph::execute");

        let mut stats = GraphStats::default();
        // Buffers written since the last barrier.
        let mut unsynchronized = FastHashSet::<BufferId>::default();

        for (idx, node) in self.nodes.iter().enumerate() {
            debug_assert!(node.predecessors.iter().all(|pred| pred.idx < idx));

            if !node.enabled {
                log::trace!("Skipping pass {}", node.label);
                stats.skipped.push(node.label.clone());
                continue;
            }

            profiling::scope!("Execute Pass");
            log::trace!("Executing pass {}", node.label);

            if !node.no_transition && node.resources.iter().any(|(buffer, _)| unsynchronized.contains(buffer)) {
                executor.barrier();
                unsynchronized.clear();
                stats.pass_barriers += 1;
            }

            if let Some(timer) = timer.as_deref_mut() {
                timer.begin(&node.label);
            }

            for step in &node.params.steps {
                match step {
                    DispatchStep::Dispatch {
                        kernel,
                        groups,
                        push_constants,
                    } => {
                        executor.dispatch(kernel, groups, push_constants.as_ref());
                        stats.dispatches += 1;
                    }
                    DispatchStep::Barrier => {
                        executor.barrier();
                        unsynchronized.clear();
                        stats.inner_barriers += 1;
                    }
                    DispatchStep::Clear(buffer) => executor.clear(*buffer),
                }
            }

            if let Some(timer) = timer.as_deref_mut() {
                timer.end(&node.label);
            }

            unsynchronized.extend(
                node.resources
                    .iter()
                    .filter(|(_, usage)| usage.writes())
                    .map(|&(buffer, _)| buffer),
            );
            stats.executed.push(node.label.clone());
        }

        stats
    }
}

/// Builder for a graph pass.
///
/// Calling build will add the pass to the graph.
pub struct PassBuilder<'a> {
    graph: &'a mut PassGraph,
    node: PassNode,
}

impl<'a> PassBuilder<'a> {
    /// The pass records after `handle`.
    pub fn after(&mut self, handle: PassHandle) -> &mut Self {
        self.node.predecessors.push(handle);
        self
    }

    /// Declares a buffer usage on top of those of the pass' kernels.
    pub fn add_buffer(&mut self, buffer: BufferId, usage: ResourceUsage) -> &mut Self {
        self.node.resources.push((buffer, usage));
        self
    }

    pub fn read(&mut self, buffer: BufferId) -> &mut Self {
        self.add_buffer(buffer, ResourceUsage::Input)
    }

    pub fn write(&mut self, buffer: BufferId) -> &mut Self {
        self.add_buffer(buffer, ResourceUsage::Output)
    }

    pub fn read_write(&mut self, buffer: BufferId) -> &mut Self {
        self.add_buffer(buffer, ResourceUsage::InputOutput)
    }

    /// The pass synchronizes with the previous passes itself.
    pub fn no_transition(&mut self) -> &mut Self {
        self.node.no_transition = true;
        self
    }

    pub fn enabled(&mut self, enabled: bool) -> &mut Self {
        self.node.enabled = enabled;
        self
    }

    /// Sets the recorded dispatches, declaring the buffers their kernels bind.
    pub fn params(&mut self, params: DispatchParams) -> &mut Self {
        self.node.resources.extend(params.resources());
        self.node.params = params;
        self
    }

    pub fn build(self) -> PassHandle {
        let idx = self.graph.nodes.len();
        self.graph.nodes.push(self.node);
        PassHandle { idx }
    }
}

#[cfg(test)]
mod tests {
    use lightgrid_types::LightType;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        log: Vec<String>,
    }

    impl PassExecutor for Recorder {
        fn barrier(&mut self) {
            self.log.push("barrier".into());
        }

        fn clear(&mut self, buffer: BufferId) {
            self.log.push(format!("clear {buffer:?}"));
        }

        fn dispatch(&mut self, kernel: &Kernel, _groups: &DispatchGroups, _push_constants: Option<&PushConstants>) {
            self.log.push(kernel.name().into());
        }
    }

    impl PassTimer for Recorder {
        fn begin(&mut self, label: &str) {
            self.log.push(format!("begin {label}"));
        }

        fn end(&mut self, label: &str) {
            self.log.push(format!("end {label}"));
        }
    }

    fn single(kernel: Kernel) -> DispatchParams {
        let mut params = DispatchParams::new();
        params.dispatch(kernel, DispatchGroups::linear(1), None);
        params
    }

    #[test]
    fn barriers_follow_writes() {
        let mut graph = PassGraph::new();

        let mut pass = graph.add_pass("clusters");
        pass.params(single(Kernel::ClustersAabb));
        let clusters = pass.build();

        let mut pass = graph.add_pass("lights");
        pass.params(single(Kernel::LightsAabb));
        let lights = pass.build();

        let mut pass = graph.add_pass("disabled");
        pass.after(lights).enabled(false).params(single(Kernel::ReduceLightsAabbFirst));
        let disabled = pass.build();

        let mut pass = graph.add_pass("reduce");
        pass.after(lights).after(disabled).params(single(Kernel::ReduceLightsAabbFirst));
        let reduce = pass.build();

        let mut executor = Recorder::default();
        let mut timer = Recorder::default();
        let stats = graph.execute(&mut executor, Some(&mut timer));

        // Lights does not touch what clusters wrote, reduce reads what lights wrote.
        assert_eq!(
            executor.log,
            ["clusters_aabb", "lights_aabb", "barrier", "reduce_lights_aabb_first"]
        );
        assert_eq!(stats.pass_barriers, 1);
        assert_eq!(stats.skipped, ["disabled"]);
        assert_eq!(stats.executed, ["clusters", "lights", "reduce"]);
        assert_eq!(timer.log.first().map(String::as_str), Some("begin clusters"));
        assert_eq!(timer.log.len(), 6);
        assert_eq!(graph.predecessors(reduce), &[lights, disabled]);
        assert_eq!(graph.find("clusters"), Some(clusters));
    }

    #[test]
    fn inner_barriers_synchronize() {
        let mut graph = PassGraph::new();

        let mut params = DispatchParams::new();
        params.clear(BufferId::LightCounters);
        params.dispatch(
            Kernel::BvhTop {
                light_type: LightType::Point,
            },
            DispatchGroups::linear(1),
            Some(PushConstants::one(2)),
        );
        params.barrier();
        params.dispatch(
            Kernel::BvhTop {
                light_type: LightType::Point,
            },
            DispatchGroups::linear(1),
            Some(PushConstants::one(1)),
        );
        let mut pass = graph.add_pass("bvh");
        pass.params(params);
        pass.build();

        let mut pass = graph.add_pass("unrelated");
        pass.params(single(Kernel::ClustersAabb));
        pass.build();

        let mut executor = Recorder::default();
        let stats = graph.execute(&mut executor, None);
        assert_eq!(
            executor.log,
            ["clear LightCounters", "bvh_top", "barrier", "bvh_top", "clusters_aabb"]
        );
        assert_eq!(stats.inner_barriers, 1);
        assert_eq!(stats.pass_barriers, 0);
        assert_eq!(stats.dispatches, 3);
    }

    #[test]
    fn no_transition_skips_barrier() {
        let mut graph = PassGraph::new();

        let mut pass = graph.add_pass("counters");
        pass.write(BufferId::LightCounters);
        pass.build();

        let mut params = DispatchParams::new();
        params.barrier();
        params.dispatch(Kernel::ClustersAabb, DispatchGroups::linear(1), None);
        let mut pass = graph.add_pass("self synchronized");
        pass.read(BufferId::LightCounters).no_transition().params(params);
        pass.build();

        let mut executor = Recorder::default();
        let stats = graph.execute(&mut executor, None);
        assert_eq!(executor.log, ["barrier", "clusters_aabb"]);
        assert_eq!(stats.pass_barriers, 0);
        assert_eq!(stats.inner_barriers, 1);
    }
}
