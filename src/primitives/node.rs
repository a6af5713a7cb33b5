use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::signal::{SignalSource, SignalTarget};
use crate::types::{PrimitiveDescriptor, Value};

/// Behavior of one primitive kind. Implementations hold their validated
/// configuration and internal state; the surrounding [`PrimitiveNode`] owns
/// the ports and the depender count.
pub trait Primitive: Send + Sync + fmt::Debug {
    fn descriptor(&self) -> PrimitiveDescriptor;

    /// Handles one inbound signal. Outbound fan-out goes through
    /// `node.output()` / `node.negative()`.
    fn trigger(&self, node: &PrimitiveNode, param: Value, ctx: &Value);

    /// Configuration equality for the sharing detector. `other` is guaranteed
    /// to have the same registered type name.
    fn same_config(&self, other: &dyn Primitive) -> bool;

    fn as_any(&self) -> &dyn Any;

    /// Whether the primitive accepts inbound signals. Self-driven primitives
    /// (timers) return false.
    fn targetable(&self) -> bool {
        true
    }

    /// Synchronous value read for `Checker`. `None` means not checkable.
    fn check(&self, _key: &Value) -> Option<i64> {
        None
    }

    /// Primitives this one keeps alive beyond its signal edges (a Checker's
    /// check target). The compiler and remover maintain the depender counts.
    fn dependees(&self) -> Vec<Arc<PrimitiveNode>> {
        Vec::new()
    }

    /// An outbound source left the all-paused state. Default: resume the
    /// in-graph edges feeding this primitive.
    fn on_first_target_activated(&self, node: &PrimitiveNode) {
        node.resume_inbound();
    }

    /// Every outbound edge is paused. Default: propagate the back-pressure
    /// upstream by pausing this primitive's own in-graph inbound edges.
    fn on_all_targets_paused(&self, node: &PrimitiveNode) {
        node.pause_inbound();
    }

    /// Releases resources when the node leaves the graph.
    fn on_removed(&self, _node: &PrimitiveNode) {}
}

/// A live node of the dataflow graph: one behavior plus its inbound port, its
/// primary and negative outbound ports, and the count of consumers keeping it
/// alive (outbound edges plus Checker references).
pub struct PrimitiveNode {
    type_name: String,
    behavior: Box<dyn Primitive>,
    receiver: SignalTarget,
    output: Arc<SignalSource>,
    negative: Arc<SignalSource>,
    dependers: AtomicUsize,
    self_ref: Weak<PrimitiveNode>,
}

impl PrimitiveNode {
    pub fn new(type_name: impl Into<String>, behavior: Box<dyn Primitive>) -> Arc<Self> {
        let type_name = type_name.into();
        Arc::new_cyclic(|weak| Self {
            type_name,
            behavior,
            receiver: SignalTarget::new(),
            output: SignalSource::owned(weak.clone()),
            negative: SignalSource::owned(weak.clone()),
            dependers: AtomicUsize::new(0),
            self_ref: weak.clone(),
        })
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn behavior(&self) -> &dyn Primitive {
        self.behavior.as_ref()
    }

    pub fn receiver(&self) -> &SignalTarget {
        &self.receiver
    }

    pub fn output(&self) -> &Arc<SignalSource> {
        &self.output
    }

    pub fn negative(&self) -> &Arc<SignalSource> {
        &self.negative
    }

    pub fn dependers(&self) -> usize {
        self.dependers.load(Ordering::SeqCst)
    }

    pub(crate) fn add_depender(&self) {
        self.dependers.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn remove_depender(&self) {
        self.dependers.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn weak_self(&self) -> Weak<PrimitiveNode> {
        self.self_ref.clone()
    }

    /// Inbound trigger entry point, dispatched synchronously on the calling
    /// thread.
    pub fn trigger(&self, param: Value, ctx: &Value) {
        if !self.behavior.targetable() {
            debug!(
                primitive = %self.type_name,
                "dropping signal sent to a self-driven primitive"
            );
            return;
        }
        self.behavior.trigger(self, param, ctx);
    }

    pub fn pause_inbound(&self) {
        self.receiver.pause_all(self);
    }

    pub fn resume_inbound(&self) {
        self.receiver.resume_all(self);
    }

    fn outbound_idle(&self) -> bool {
        let targets = self.output.target_count() + self.negative.target_count();
        targets > 0
            && self.output.active_target_count() == 0
            && self.negative.active_target_count() == 0
    }

    /// Called by an owned source on its 0→1 active-edge transition.
    pub(crate) fn source_activated(&self) {
        self.behavior.on_first_target_activated(self);
    }

    /// Called by an owned source when its last active edge paused or left.
    /// The behavior is only notified once every outbound port is idle.
    pub(crate) fn source_paused(&self) {
        if self.outbound_idle() {
            self.behavior.on_all_targets_paused(self);
        }
    }
}

impl fmt::Debug for PrimitiveNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimitiveNode")
            .field("type", &self.type_name)
            .field("dependers", &self.dependers())
            .finish_non_exhaustive()
    }
}
