//! C7: the pure [`plan`] function — given a hook set, produce a total invocation order
//! honouring required-hook dependencies and priority, grouped into foreground/background
//! buckets.

use std::cmp::Reverse;
use std::collections::HashMap;

use indexmap::IndexMap;
use priority_queue::PriorityQueue;

use crate::error::PlannerError;
use crate::hook::HookKey;

/// The planner-relevant facts about one attached hook.
#[derive(Clone)]
pub struct PlannerHookMeta {
    pub required: Vec<HookKey>,
    pub invoke_priority: i32,
    pub invoke_in_background: bool,
}

/// `invocationIndex`/`invocationTarget` for every hook in the input set.
#[derive(Default, Debug)]
pub struct PlanOutput {
    pub invocation_index: HashMap<HookKey, u32>,
    pub invocation_target: HashMap<HookKey, u32>,
}

/// Computes the total invocation order and foreground/background bucket assignment for
/// `hooks`. Pure: does not touch operator or worker state.
pub fn plan(hooks: &IndexMap<HookKey, PlannerHookMeta>) -> Result<PlanOutput, PlannerError> {
    for (key, meta) in hooks {
        for required in &meta.required {
            if !hooks.contains_key(required) {
                return Err(PlannerError::UnknownRequiredHook {
                    dependent: key.clone(),
                    required: required.clone(),
                });
            }
        }
    }

    let order = topological_order(hooks)?;

    let invocation_index = order
        .iter()
        .enumerate()
        .map(|(idx, key)| (key.clone(), idx as u32))
        .collect();

    let invocation_target = assign_targets(hooks, &order);

    Ok(PlanOutput {
        invocation_index,
        invocation_target,
    })
}

/// Kahn's algorithm whose ready-set is ordered by `(invoke_priority, insertion_sequence)`
/// ascending, so priority is only a tie-break among hooks that are simultaneously ready.
fn topological_order(
    hooks: &IndexMap<HookKey, PlannerHookMeta>,
) -> Result<Vec<HookKey>, PlannerError> {
    let mut indegree: HashMap<HookKey, u32> = HashMap::new();
    let mut dependents_of: HashMap<HookKey, Vec<HookKey>> = HashMap::new();
    for (key, meta) in hooks {
        indegree.insert(key.clone(), meta.required.len() as u32);
        for required in &meta.required {
            dependents_of.entry(required.clone()).or_default().push(key.clone());
        }
    }

    let mut ready: PriorityQueue<HookKey, Reverse<(i32, u32)>> = PriorityQueue::new();
    for (idx, (key, meta)) in hooks.iter().enumerate() {
        if meta.required.is_empty() {
            ready.push(key.clone(), Reverse((meta.invoke_priority, idx as u32)));
        }
    }

    let mut order = Vec::with_capacity(hooks.len());
    while let Some((key, _)) = ready.pop() {
        if let Some(deps) = dependents_of.get(&key) {
            for dependent in deps {
                let remaining = indegree.get_mut(dependent).expect("tracked above");
                *remaining -= 1;
                if *remaining == 0 {
                    let dependent_idx = hooks.get_index_of(dependent).expect("present");
                    let dependent_meta = hooks.get(dependent).expect("present");
                    ready.push(
                        dependent.clone(),
                        Reverse((dependent_meta.invoke_priority, dependent_idx as u32)),
                    );
                }
            }
        }
        order.push(key);
    }

    if order.len() != hooks.len() {
        let stuck = hooks
            .keys()
            .find(|k| !order.contains(k))
            .cloned()
            .expect("order is a strict subset");
        return Err(PlannerError::Cycle(stuck));
    }

    Ok(order)
}

/// Foreground hooks get target `0`. Background hooks start a fresh bucket the first time
/// they're reached; a foreground hook then forces `0` onto every required hook
/// (promotion, unconditional), while a background hook propagates its own bucket onto
/// every required hook that isn't already foreground. The propagation pass walks `order`
/// in *reverse* (dependents before dependencies): since `order` is topological, every
/// dependent of a hook has already had its own target resolved by the time that hook is
/// reached, so a single pass correctly threads a bucket down an arbitrarily deep
/// background chain instead of settling only on the immediate requirement.
fn assign_targets(
    hooks: &IndexMap<HookKey, PlannerHookMeta>,
    order: &[HookKey],
) -> HashMap<HookKey, u32> {
    let mut target: HashMap<HookKey, u32> = HashMap::new();
    let mut next_bucket = 1u32;

    for key in order {
        let meta = hooks.get(key).expect("present");
        if !meta.invoke_in_background {
            target.insert(key.clone(), 0);
        } else if !target.contains_key(key) {
            target.insert(key.clone(), next_bucket);
            next_bucket += 1;
        }
    }

    for key in order.iter().rev() {
        let meta = hooks.get(key).expect("present");
        let this_target = *target.get(key).expect("assigned above");
        for required in &meta.required {
            if this_target == 0 {
                target.insert(required.clone(), 0);
            } else {
                let current = *target.get(required).expect("assigned above");
                if current != 0 {
                    target.insert(required.clone(), this_target);
                }
            }
        }
    }

    target
}

#[cfg(test)]
mod test {
    use super::*;

    fn meta(required: &[&str], priority: i32, background: bool) -> PlannerHookMeta {
        PlannerHookMeta {
            required: required.iter().map(|s| HookKey::new(*s)).collect(),
            invoke_priority: priority,
            invoke_in_background: background,
        }
    }

    /// Three foreground hooks with mixed priority: A(priority 10), B(priority 0),
    /// C(priority 5, requires A). Expected order: B, A, C.
    #[test]
    fn s3_priority_and_dependency_ordering() {
        let mut hooks = IndexMap::new();
        hooks.insert(HookKey::new("a"), meta(&[], 10, false));
        hooks.insert(HookKey::new("b"), meta(&[], 0, false));
        hooks.insert(HookKey::new("c"), meta(&["a"], 5, false));

        let output = plan(&hooks).unwrap();
        let mut by_index: Vec<(u32, &str)> = output
            .invocation_index
            .iter()
            .map(|(k, idx)| (*idx, k.0.as_str()))
            .collect();
        by_index.sort();
        let order: Vec<&str> = by_index.into_iter().map(|(_, k)| k).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn required_hook_always_precedes_dependent_regardless_of_priority() {
        let mut hooks = IndexMap::new();
        hooks.insert(HookKey::new("dependent"), meta(&["base"], -100, false));
        hooks.insert(HookKey::new("base"), meta(&[], 100, false));

        let output = plan(&hooks).unwrap();
        assert!(
            output.invocation_index[&HookKey::new("base")]
                < output.invocation_index[&HookKey::new("dependent")]
        );
    }

    #[test]
    fn cycle_is_rejected() {
        let mut hooks = IndexMap::new();
        hooks.insert(HookKey::new("a"), meta(&["b"], 0, false));
        hooks.insert(HookKey::new("b"), meta(&["a"], 0, false));

        assert!(matches!(plan(&hooks), Err(PlannerError::Cycle(_))));
    }

    #[test]
    fn unknown_required_hook_is_rejected() {
        let mut hooks = IndexMap::new();
        hooks.insert(HookKey::new("a"), meta(&["ghost"], 0, false));

        assert!(matches!(
            plan(&hooks),
            Err(PlannerError::UnknownRequiredHook { .. })
        ));
    }

    #[test]
    fn background_hook_gets_its_own_self_contained_bucket() {
        let mut hooks = IndexMap::new();
        hooks.insert(HookKey::new("solo"), meta(&[], 0, true));

        let output = plan(&hooks).unwrap();
        assert_ne!(output.invocation_target[&HookKey::new("solo")], 0);
    }

    #[test]
    fn background_hook_required_by_foreground_is_promoted() {
        let mut hooks = IndexMap::new();
        hooks.insert(HookKey::new("fg"), meta(&["bg"], 0, false));
        hooks.insert(HookKey::new("bg"), meta(&[], 0, true));

        let output = plan(&hooks).unwrap();
        assert_eq!(output.invocation_target[&HookKey::new("fg")], 0);
        assert_eq!(output.invocation_target[&HookKey::new("bg")], 0);
    }

    #[test]
    fn background_bucket_propagates_to_its_background_dependency() {
        let mut hooks = IndexMap::new();
        hooks.insert(HookKey::new("top"), meta(&["base"], 0, true));
        hooks.insert(HookKey::new("base"), meta(&[], 0, true));

        let output = plan(&hooks).unwrap();
        let top_bucket = output.invocation_target[&HookKey::new("top")];
        let base_bucket = output.invocation_target[&HookKey::new("base")];
        assert_ne!(top_bucket, 0);
        assert_eq!(top_bucket, base_bucket);
    }

    #[test]
    fn background_bucket_propagates_through_a_three_level_chain() {
        let mut hooks = IndexMap::new();
        hooks.insert(HookKey::new("c"), meta(&["b"], 0, true));
        hooks.insert(HookKey::new("b"), meta(&["a"], 0, true));
        hooks.insert(HookKey::new("a"), meta(&[], 0, true));

        let output = plan(&hooks).unwrap();
        let bucket_a = output.invocation_target[&HookKey::new("a")];
        let bucket_b = output.invocation_target[&HookKey::new("b")];
        let bucket_c = output.invocation_target[&HookKey::new("c")];
        assert_ne!(bucket_a, 0);
        assert_eq!(bucket_a, bucket_b);
        assert_eq!(bucket_b, bucket_c);
    }

    #[test]
    fn priority_ties_break_on_insertion_order() {
        let mut hooks = IndexMap::new();
        hooks.insert(HookKey::new("first"), meta(&[], 0, false));
        hooks.insert(HookKey::new("second"), meta(&[], 0, false));

        let output = plan(&hooks).unwrap();
        assert!(
            output.invocation_index[&HookKey::new("first")]
                < output.invocation_index[&HookKey::new("second")]
        );
    }
}
