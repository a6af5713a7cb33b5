use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

use crate::primitives::PrimitiveNode;
use crate::signal::ParamTemplate;
use crate::types::Value;

/// Outbound port: an ordered list of `(target, parameter template, paused)`
/// edges. Owned either by a primitive (primary or negative output) or by the
/// engine dispatcher (one detached source per event name).
///
/// The owner is notified on two transitions: `first-target-activated` when the
/// active (non-paused) edge count leaves zero, and `all-targets-paused` when
/// it returns to zero. `TimerSource` uses these to start and stop its timer.
pub struct SignalSource {
    owner: Option<Weak<PrimitiveNode>>,
    edges: Mutex<Vec<Edge>>,
}

struct Edge {
    target: Arc<PrimitiveNode>,
    template: ParamTemplate,
    paused: bool,
}

impl SignalSource {
    /// A source with no owning primitive (engine dispatcher entry).
    pub fn detached() -> Arc<Self> {
        Arc::new(Self {
            owner: None,
            edges: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn owned(owner: Weak<PrimitiveNode>) -> Arc<Self> {
        Arc::new(Self {
            owner: Some(owner),
            edges: Mutex::new(Vec::new()),
        })
    }

    /// The primitive owning this source, if any and still alive.
    pub fn owner(&self) -> Option<Arc<PrimitiveNode>> {
        self.owner.as_ref().and_then(Weak::upgrade)
    }

    pub fn target_count(&self) -> usize {
        self.edges.lock().len()
    }

    pub fn active_target_count(&self) -> usize {
        self.edges.lock().iter().filter(|e| !e.paused).count()
    }

    /// Appends an edge and reciprocally records this source on the target's
    /// inbound port. Each edge keeps the owning primitive alive: the owner's
    /// depender count grows with it.
    pub fn connect(self: &Arc<Self>, target: &Arc<PrimitiveNode>, template: ParamTemplate) {
        let activated = {
            let mut edges = self.edges.lock();
            let was_active = edges.iter().any(|e| !e.paused);
            edges.push(Edge {
                target: Arc::clone(target),
                template,
                paused: false,
            });
            !was_active
        };
        target.receiver().connected_from(Arc::clone(self));
        if let Some(owner) = self.owner() {
            owner.add_depender();
            if activated {
                owner.source_activated();
            }
        }
    }

    /// Removes every edge to `target`; returns how many were removed.
    pub fn disconnect(self: &Arc<Self>, target: &PrimitiveNode) -> usize {
        let (removed, drained) = {
            let mut edges = self.edges.lock();
            let was_active = edges.iter().any(|e| !e.paused);
            let before = edges.len();
            edges.retain(|e| !std::ptr::eq(Arc::as_ptr(&e.target), target as *const _));
            let still_active = edges.iter().any(|e| !e.paused);
            (before - edges.len(), was_active && !still_active)
        };
        for _ in 0..removed {
            target.receiver().disconnected_from(self);
        }
        if let Some(owner) = self.owner() {
            for _ in 0..removed {
                owner.remove_depender();
            }
            if drained {
                owner.source_paused();
            }
        }
        removed
    }

    /// Fires every active edge in insertion order. The parameter template is
    /// evaluated against `ctx` per edge; an evaluation failure skips that edge
    /// only.
    pub fn trigger(&self, ctx: &Value) {
        let snapshot: Vec<(Arc<PrimitiveNode>, ParamTemplate)> = self
            .edges
            .lock()
            .iter()
            .filter(|e| !e.paused)
            .map(|e| (Arc::clone(&e.target), e.template.clone()))
            .collect();
        for (target, template) in snapshot {
            match template.evaluate(ctx) {
                Ok(param) => target.trigger(param, ctx),
                Err(err) => warn!(
                    primitive = target.type_name(),
                    %err,
                    "signal parameter evaluation failed, skipping target"
                ),
            }
        }
    }

    /// Suppresses future triggers on every edge to `target`.
    pub fn pause(&self, target: &PrimitiveNode) {
        let drained = {
            let mut edges = self.edges.lock();
            let was_active = edges.iter().any(|e| !e.paused);
            for e in edges.iter_mut() {
                if std::ptr::eq(Arc::as_ptr(&e.target), target as *const _) {
                    e.paused = true;
                }
            }
            let still_active = edges.iter().any(|e| !e.paused);
            was_active && !still_active
        };
        if drained {
            if let Some(owner) = self.owner() {
                owner.source_paused();
            }
        }
    }

    /// Reverts `pause` on every edge to `target`. Idempotent.
    pub fn resume(&self, target: &PrimitiveNode) {
        let activated = {
            let mut edges = self.edges.lock();
            let was_active = edges.iter().any(|e| !e.paused);
            for e in edges.iter_mut() {
                if std::ptr::eq(Arc::as_ptr(&e.target), target as *const _) {
                    e.paused = false;
                }
            }
            let now_active = edges.iter().any(|e| !e.paused);
            !was_active && now_active
        };
        if activated {
            if let Some(owner) = self.owner() {
                owner.source_activated();
            }
        }
    }

    /// Current targets, one entry per edge, in insertion order.
    pub fn targets(&self) -> Vec<Arc<PrimitiveNode>> {
        self.edges
            .lock()
            .iter()
            .map(|e| Arc::clone(&e.target))
            .collect()
    }

    /// How many edges to `target` carry exactly `template`. Used by the
    /// sharing detector.
    pub(crate) fn matching_edge_count(
        &self,
        target: &PrimitiveNode,
        template: &ParamTemplate,
    ) -> usize {
        self.edges
            .lock()
            .iter()
            .filter(|e| {
                std::ptr::eq(Arc::as_ptr(&e.target), target as *const _) && e.template == *template
            })
            .count()
    }
}

/// Inbound port of a primitive: the trigger entry point plus the list of
/// connected sources, kept for reverse traversal during rule deletion and for
/// edge pause/resume.
pub struct SignalTarget {
    connected: Mutex<Vec<Arc<SignalSource>>>,
}

impl SignalTarget {
    pub(crate) fn new() -> Self {
        Self {
            connected: Mutex::new(Vec::new()),
        }
    }

    pub fn connected_from(&self, source: Arc<SignalSource>) {
        self.connected.lock().push(source);
    }

    /// Drops one recorded connection to `source` (one call per removed edge).
    pub fn disconnected_from(&self, source: &SignalSource) {
        let mut connected = self.connected.lock();
        if let Some(pos) = connected
            .iter()
            .position(|s| std::ptr::eq(Arc::as_ptr(s), source as *const _))
        {
            connected.remove(pos);
        }
    }

    /// Connected sources, one entry per inbound edge.
    pub fn sources(&self) -> Vec<Arc<SignalSource>> {
        self.connected.lock().clone()
    }

    pub fn edge_count(&self) -> usize {
        self.connected.lock().len()
    }

    /// Back-pressure: suspend the in-graph edges feeding `node`. Dispatcher
    /// edges are left alone so external events (resets in particular) still
    /// get through.
    pub(crate) fn pause_all(&self, node: &PrimitiveNode) {
        for source in self.sources() {
            if source.owner.is_some() {
                source.pause(node);
            }
        }
    }

    pub(crate) fn resume_all(&self, node: &PrimitiveNode) {
        for source in self.sources() {
            if source.owner.is_some() {
                source.resume(node);
            }
        }
    }
}
