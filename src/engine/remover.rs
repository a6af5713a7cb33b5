use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::engine::EngineState;
use crate::primitives::PrimitiveNode;
use crate::types::EngineError;

/// Removes a rule from the live graph. Runs under the engine write lock.
///
/// The candidate set is computed by reverse reachability from the rule's
/// `EventGenerator`, counting how many edges reached each primitive through
/// this rule. A primitive whose depender count exceeds that involve count is
/// still needed by another rule and survives, together with everything
/// upstream of it. If another rule consumes this rule's derived event, the
/// whole deletion is deferred until that consumer disappears.
///
/// Unknown rule names report `RuleNotFound`; the public facade swallows it
/// to keep `delete_rule` idempotent.
pub(crate) fn delete_rule_locked(
    state: &mut EngineState,
    rule_name: &str,
) -> Result<(), EngineError> {
    let Some(event_name) = state.rule_to_event.get(rule_name).cloned() else {
        return Err(EngineError::RuleNotFound(rule_name.to_string()));
    };

    // actors on the derived event go first, deferred or not
    state.actors.remove(&event_name);

    if state
        .dispatchers
        .get(&event_name)
        .map_or(false, |d| d.target_count() > 0)
    {
        if state.pending_deletes.insert(rule_name.to_string()) {
            debug!(
                rule = rule_name,
                event = %event_name,
                "deletion deferred, derived event still consumed"
            );
        }
        return Ok(());
    }

    let Some(generator) = state.event_generators.get(&event_name).cloned() else {
        state.rule_to_event.remove(rule_name);
        state.pending_deletes.remove(rule_name);
        return Ok(());
    };

    // reverse BFS, one arrival per edge
    let mut involve: HashMap<*const PrimitiveNode, usize> = HashMap::new();
    let mut nodes: HashMap<*const PrimitiveNode, Arc<PrimitiveNode>> = HashMap::new();
    let mut queue: VecDeque<Arc<PrimitiveNode>> = VecDeque::new();
    involve.insert(Arc::as_ptr(&generator), 1);
    nodes.insert(Arc::as_ptr(&generator), Arc::clone(&generator));
    queue.push_back(generator);
    while let Some(node) = queue.pop_front() {
        for feeder in feeders_of(&node) {
            let key = Arc::as_ptr(&feeder);
            let count = involve.entry(key).or_insert(0);
            *count += 1;
            if *count == 1 {
                nodes.insert(key, Arc::clone(&feeder));
                queue.push_back(feeder);
            }
        }
    }

    let mut non_deletable: HashSet<*const PrimitiveNode> = HashSet::new();
    let mut work: VecDeque<*const PrimitiveNode> = VecDeque::new();
    for (key, count) in &involve {
        if *count < nodes[key].dependers() && non_deletable.insert(*key) {
            work.push_back(*key);
        }
    }
    while let Some(key) = work.pop_front() {
        let node = Arc::clone(&nodes[&key]);
        for feeder in feeders_of(&node) {
            let feeder_key = Arc::as_ptr(&feeder);
            if nodes.contains_key(&feeder_key) && non_deletable.insert(feeder_key) {
                work.push_back(feeder_key);
            }
        }
    }

    let mut removed = 0usize;
    for (key, node) in &nodes {
        if non_deletable.contains(key) {
            continue;
        }
        for source in node.receiver().sources() {
            source.disconnect(node);
        }
        for dependee in node.behavior().dependees() {
            dependee.remove_depender();
        }
        node.behavior().on_removed(node);
        state.live_primitives -= 1;
        removed += 1;
    }
    debug!(rule = rule_name, removed, kept = nodes.len() - removed, "rule removed");

    state.event_generators.remove(&event_name);
    state.rule_to_event.remove(rule_name);
    state.pending_deletes.remove(rule_name);

    cleanup_dispatchers(state);
    Ok(())
}

fn feeders_of(node: &Arc<PrimitiveNode>) -> Vec<Arc<PrimitiveNode>> {
    let mut feeders: Vec<Arc<PrimitiveNode>> = node
        .receiver()
        .sources()
        .iter()
        .filter_map(|source| source.owner())
        .collect();
    feeders.extend(node.behavior().dependees());
    feeders
}

/// Drops dispatcher entries that lost their last target and have no actors.
/// A drained dispatcher may be the derived event of a rule whose deletion was
/// deferred; finishing that rule can drain further dispatchers, recursively.
pub(crate) fn cleanup_dispatchers(state: &mut EngineState) {
    if state
        .all_events
        .as_ref()
        .map_or(false, |d| d.target_count() == 0)
    {
        state.all_events = None;
    }

    let drained: Vec<String> = state
        .dispatchers
        .iter()
        .filter(|(name, dispatcher)| {
            dispatcher.target_count() == 0
                && state.actors.get(*name).map_or(true, |a| a.is_empty())
        })
        .map(|(name, _)| name.clone())
        .collect();
    if drained.is_empty() {
        return;
    }
    for name in &drained {
        state.dispatchers.remove(name);
    }

    let finished: Vec<String> = state
        .pending_deletes
        .iter()
        .filter(|rule| {
            state
                .rule_to_event
                .get(*rule)
                .is_some_and(|event| drained.contains(event))
        })
        .cloned()
        .collect();
    for rule in finished {
        debug!(rule = %rule, "completing deferred rule deletion");
        // pending rules are still in the tables, this cannot miss
        let _ = delete_rule_locked(state, &rule);
    }
}
