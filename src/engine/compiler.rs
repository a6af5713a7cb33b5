use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::engine::registry::FactoryContext;
use crate::engine::{remover, EngineInner, EngineState};
use crate::primitives::{Primitive, PrimitiveNode};
use crate::signal::{ParamTemplate, SignalSource};
use crate::types::{
    ConnectionDescription, EngineError, RuleDescription, ALL_EVENTS, SYNTHETIC_SOURCE,
};

const EVENT_GENERATOR_TYPE: &str = "EventGenerator";
const CHECKER_TYPE: &str = "Checker";

enum FromRef {
    Event(String),
    Primitive(usize),
}

struct InboundPlan {
    from: FromRef,
    negative: bool,
    template: ParamTemplate,
}

struct RulePlan {
    /// Primitive indices in topological order.
    order: Vec<usize>,
    /// Planned inbound edges per primitive index.
    inbound: Vec<Vec<InboundPlan>>,
    /// Derived event produced by the rule's generator.
    event_name: String,
    generator: usize,
}

/// Validates, plans and wires one rule into the live graph. On any failure
/// the partially created primitives and dispatchers are rolled back and the
/// engine state is untouched. Runs under the engine write lock.
pub(crate) fn install_rule(
    inner: &Arc<EngineInner>,
    state: &mut EngineState,
    desc: &RuleDescription,
) -> Result<(), EngineError> {
    let plan = plan_rule(inner, state, desc)?;
    let mut created_nodes = Vec::new();
    let mut created_dispatchers = Vec::new();
    let mut created_all_events = false;
    match wire_rule(
        inner,
        state,
        desc,
        &plan,
        &mut created_nodes,
        &mut created_dispatchers,
        &mut created_all_events,
    ) {
        Ok(()) => {
            debug!(
                rule = %desc.rule_name,
                event = %plan.event_name,
                created = created_nodes.len(),
                "rule installed"
            );
            Ok(())
        }
        Err(err) => {
            rollback(state, &created_nodes, &created_dispatchers, created_all_events);
            Err(err)
        }
    }
}

fn plan_rule(
    inner: &EngineInner,
    state: &EngineState,
    desc: &RuleDescription,
) -> Result<RulePlan, EngineError> {
    desc.validate()?;
    if state.rule_to_event.contains_key(&desc.rule_name) {
        return Err(EngineError::Validation(format!(
            "rule '{}' is already loaded",
            desc.rule_name
        )));
    }

    let mut name_to_index = HashMap::new();
    for (i, p) in desc.primitives.iter().enumerate() {
        name_to_index.insert(p.name.as_str(), i);
    }

    let mut generator = None;
    for (i, p) in desc.primitives.iter().enumerate() {
        if !inner.registry.contains(&p.type_name) {
            return Err(EngineError::UnknownPrimitiveType(p.type_name.clone()));
        }
        if p.type_name == EVENT_GENERATOR_TYPE {
            if generator.is_some() {
                return Err(EngineError::Validation(format!(
                    "rule '{}' defines more than one EventGenerator",
                    desc.rule_name
                )));
            }
            generator = Some(i);
        }
    }
    let generator = generator.ok_or_else(|| {
        EngineError::Validation(format!("rule '{}' has no EventGenerator", desc.rule_name))
    })?;

    let event_name = desc.primitives[generator]
        .parameters
        .get("NewEventName")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| {
            EngineError::Validation(format!(
                "rule '{}': EventGenerator needs a NewEventName",
                desc.rule_name
            ))
        })?
        .to_string();
    if event_name.is_empty() || event_name == ALL_EVENTS {
        return Err(EngineError::Validation(format!(
            "rule '{}': derived event name '{}' is reserved",
            desc.rule_name, event_name
        )));
    }
    if state.event_generators.contains_key(&event_name) {
        return Err(EngineError::Validation(format!(
            "derived event '{event_name}' is already produced by another rule"
        )));
    }
    if !desc.primitives[generator].connect_to.is_empty() {
        return Err(EngineError::Validation(format!(
            "rule '{}': EventGenerator emits no signal to connect",
            desc.rule_name
        )));
    }

    // planned inbound edges, with every macro compiled up front
    let compile = |conn: &ConnectionDescription| -> Result<ParamTemplate, EngineError> {
        match &conn.signal_parameter {
            None => Ok(ParamTemplate::null()),
            Some(raw) => ParamTemplate::compile(raw, &inner.meta),
        }
    };
    let n = desc.primitives.len();
    let mut inbound: Vec<Vec<InboundPlan>> = (0..n).map(|_| Vec::new()).collect();
    for se in &desc.source_events {
        for (target, conn) in &se.connect_to {
            let i = name_to_index[target.as_str()];
            ensure_targetable(inner, desc, i)?;
            inbound[i].push(InboundPlan {
                from: FromRef::Event(se.event_name.clone()),
                negative: false,
                template: compile(conn)?,
            });
        }
    }
    for (u, p) in desc.primitives.iter().enumerate() {
        for (target, conn) in &p.connect_to {
            let i = name_to_index[target.as_str()];
            ensure_targetable(inner, desc, i)?;
            inbound[i].push(InboundPlan {
                from: FromRef::Primitive(u),
                negative: conn.trigger_on_negative,
                template: compile(conn)?,
            });
        }
    }
    for (i, p) in desc.primitives.iter().enumerate() {
        if inner.registry.is_self_driven(&p.type_name) {
            // uniform wiring through the reserved source, which never fires
            inbound[i].push(InboundPlan {
                from: FromRef::Event(SYNTHETIC_SOURCE.to_string()),
                negative: false,
                template: ParamTemplate::null(),
            });
        } else if inbound[i].is_empty() {
            return Err(EngineError::Validation(format!(
                "rule '{}': primitive '{}' has no inbound connection",
                desc.rule_name, p.name
            )));
        }
    }

    // topological order; a Checker settles after its check target
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut indegree = vec![0usize; n];
    for (u, p) in desc.primitives.iter().enumerate() {
        for target in p.connect_to.keys() {
            let v = name_to_index[target.as_str()];
            adjacency[u].push(v);
            indegree[v] += 1;
        }
    }
    for (i, p) in desc.primitives.iter().enumerate() {
        if p.type_name == CHECKER_TYPE {
            let target = p
                .parameters
                .get("CheckTarget")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| {
                    EngineError::Validation(format!(
                        "rule '{}': Checker '{}' needs a CheckTarget",
                        desc.rule_name, p.name
                    ))
                })?;
            let t = *name_to_index.get(target).ok_or_else(|| {
                EngineError::Validation(format!(
                    "rule '{}': Checker CheckTarget '{}' is not defined",
                    desc.rule_name, target
                ))
            })?;
            if t == i {
                return Err(EngineError::Validation(format!(
                    "rule '{}': Checker '{}' cannot check itself",
                    desc.rule_name, p.name
                )));
            }
            adjacency[t].push(i);
            indegree[i] += 1;
        }
    }
    let mut ready: VecDeque<usize> = (0..n).filter(|i| indegree[*i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(u) = ready.pop_front() {
        order.push(u);
        for &v in &adjacency[u] {
            indegree[v] -= 1;
            if indegree[v] == 0 {
                ready.push_back(v);
            }
        }
    }
    if order.len() != n {
        return Err(EngineError::Compile(format!(
            "rule '{}' contains a cycle",
            desc.rule_name
        )));
    }

    Ok(RulePlan {
        order,
        inbound,
        event_name,
        generator,
    })
}

fn ensure_targetable(
    inner: &EngineInner,
    desc: &RuleDescription,
    index: usize,
) -> Result<(), EngineError> {
    let p = &desc.primitives[index];
    if inner.registry.is_self_driven(&p.type_name) {
        return Err(EngineError::Validation(format!(
            "rule '{}': '{}' is self-driven and accepts no inbound connection",
            desc.rule_name, p.name
        )));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn wire_rule(
    inner: &Arc<EngineInner>,
    state: &mut EngineState,
    desc: &RuleDescription,
    plan: &RulePlan,
    created_nodes: &mut Vec<Arc<PrimitiveNode>>,
    created_dispatchers: &mut Vec<String>,
    created_all_events: &mut bool,
) -> Result<(), EngineError> {
    let mut settled: HashMap<String, Arc<PrimitiveNode>> = HashMap::new();

    for &i in &plan.order {
        let p = &desc.primitives[i];

        let mut sources: Vec<(Arc<SignalSource>, ParamTemplate)> =
            Vec::with_capacity(plan.inbound[i].len());
        for ib in &plan.inbound[i] {
            let source = match &ib.from {
                FromRef::Event(name) if name == ALL_EVENTS => {
                    let dispatcher = state.all_events.get_or_insert_with(|| {
                        *created_all_events = true;
                        SignalSource::detached()
                    });
                    Arc::clone(dispatcher)
                }
                FromRef::Event(name) => {
                    let dispatcher = state.dispatchers.entry(name.clone()).or_insert_with(|| {
                        created_dispatchers.push(name.clone());
                        SignalSource::detached()
                    });
                    Arc::clone(dispatcher)
                }
                FromRef::Primitive(u) => {
                    let sender = &settled[&desc.primitives[*u].name];
                    if ib.negative {
                        Arc::clone(sender.negative())
                    } else {
                        Arc::clone(sender.output())
                    }
                }
            };
            sources.push((source, ib.template.clone()));
        }

        let behavior = {
            let ctx = FactoryContext {
                meta: &inner.meta,
                settled: &settled,
                engine: Arc::downgrade(inner),
            };
            inner
                .registry
                .build(&p.type_name, &ctx, JsonValue::Object(p.parameters.clone()))?
        };

        if p.type_name != EVENT_GENERATOR_TYPE {
            if let Some(existing) = find_shared(&p.type_name, behavior.as_ref(), &sources) {
                debug!(
                    rule = %desc.rule_name,
                    primitive = %p.name,
                    "reusing an identical live primitive"
                );
                settled.insert(p.name.clone(), existing);
                continue;
            }
        }

        let node = PrimitiveNode::new(p.type_name.clone(), behavior);
        for dependee in node.behavior().dependees() {
            dependee.add_depender();
        }
        for (source, template) in &sources {
            source.connect(&node, template.clone());
        }
        state.live_primitives += 1;
        created_nodes.push(Arc::clone(&node));
        settled.insert(p.name.clone(), node);
    }

    let generator = Arc::clone(&settled[&desc.primitives[plan.generator].name]);
    state
        .event_generators
        .insert(plan.event_name.clone(), generator);
    state
        .rule_to_event
        .insert(desc.rule_name.clone(), plan.event_name.clone());
    Ok(())
}

/// Two primitives are identical, hence shareable, iff they have the same
/// type, equal configuration, and the same inbound sources with value-equal
/// per-edge templates. Candidates are scanned among the current targets of
/// the first planned inbound source; topological settling guarantees every
/// potential twin is live by then.
fn find_shared(
    type_name: &str,
    candidate: &dyn Primitive,
    sources: &[(Arc<SignalSource>, ParamTemplate)],
) -> Option<Arc<PrimitiveNode>> {
    let (first_source, _) = sources.first()?;
    'candidates: for existing in first_source.targets() {
        if existing.type_name() != type_name
            || !existing.behavior().same_config(candidate)
            || existing.receiver().edge_count() != sources.len()
        {
            continue;
        }
        for (source, template) in sources {
            let planned = sources
                .iter()
                .filter(|(s, t)| Arc::ptr_eq(s, source) && t == template)
                .count();
            if source.matching_edge_count(&existing, template) != planned {
                continue 'candidates;
            }
        }
        return Some(existing);
    }
    None
}

fn rollback(
    state: &mut EngineState,
    created_nodes: &[Arc<PrimitiveNode>],
    created_dispatchers: &[String],
    created_all_events: bool,
) {
    for node in created_nodes.iter().rev() {
        for source in node.receiver().sources() {
            source.disconnect(node);
        }
        for dependee in node.behavior().dependees() {
            dependee.remove_depender();
        }
        node.behavior().on_removed(node);
        state.live_primitives -= 1;
    }
    for name in created_dispatchers {
        if state
            .dispatchers
            .get(name)
            .map_or(false, |d| d.target_count() == 0)
        {
            state.dispatchers.remove(name);
        }
    }
    if created_all_events
        && state
            .all_events
            .as_ref()
            .map_or(false, |d| d.target_count() == 0)
    {
        state.all_events = None;
    }
    remover::cleanup_dispatchers(state);
}
