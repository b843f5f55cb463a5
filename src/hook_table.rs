//! Attach/detach bookkeeping shared by the operator's local-hook and global-hook tables
//! attach/detach protocol, dependents tracking, and orphan auto-detach.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::error::TrainingError;
use crate::hook::{Hook, HookKey, HookTarget};
use crate::planner::{self, PlannerHookMeta};
use crate::time_step::{TimeScale, TimeStep};

/// Whether a [`HookTable`] tracks liveness per-worker (local hooks) or once globally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookScope {
    Local,
    Global,
}

/// Everything about an attached hook except the per-worker/per-scope liveness, which is
/// tracked separately because its shape differs between [`HookScope::Local`] and
/// [`HookScope::Global`].
pub struct AttachedHook {
    pub key: HookKey,
    pub time_step_template: TimeStep,
    pub invoke_priority: i32,
    pub invoke_in_background: bool,
    pub required_registry_keys: Vec<String>,
    pub default_target: HookTarget,
    pub action: std::sync::Arc<dyn crate::hook::HookAction>,
    pub parameter_registry: std::sync::Arc<std::sync::Mutex<crate::registry::Registry>>,
    pub required: Vec<HookKey>,
    pub dependents: HashSet<HookKey>,
    /// `true` only when this hook was attached by a direct, top-level attach call
    /// rather than pulled in solely as someone else's dependency.
    pub user_attached: bool,
}

/// Planner output: total invocation order and foreground/background bucket per hook.
#[derive(Default, Clone)]
pub struct InvocationPlan {
    pub index: std::collections::HashMap<HookKey, u32>,
    pub target: std::collections::HashMap<HookKey, u32>,
}

/// The hook-set bookkeeping owned by an `Operator`: one instance for local hooks, one
/// for global hooks.
pub struct HookTable {
    scope: HookScope,
    worker_count: usize,
    nodes: IndexMap<HookKey, AttachedHook>,
    by_scale: std::collections::HashMap<TimeScale, Vec<HookKey>>,
    alive_local: std::collections::HashMap<HookKey, Vec<bool>>,
    alive_global: std::collections::HashMap<HookKey, bool>,
    plan: InvocationPlan,
}

impl HookTable {
    pub fn new(scope: HookScope, worker_count: usize) -> Self {
        Self {
            scope,
            worker_count,
            nodes: IndexMap::new(),
            by_scale: std::collections::HashMap::new(),
            alive_local: std::collections::HashMap::new(),
            alive_global: std::collections::HashMap::new(),
            plan: InvocationPlan::default(),
        }
    }

    pub fn scope(&self) -> HookScope {
        self.scope
    }

    pub fn contains(&self, key: &HookKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn get(&self, key: &HookKey) -> Option<&AttachedHook> {
        self.nodes.get(key)
    }

    pub fn hooks_for_scale(&self, scale: TimeScale) -> &[HookKey] {
        self.by_scale.get(&scale).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn invocation_index(&self, key: &HookKey) -> Option<u32> {
        self.plan.index.get(key).copied()
    }

    pub fn invocation_target(&self, key: &HookKey) -> Option<u32> {
        self.plan.target.get(key).copied()
    }

    pub fn all_keys_in_order(&self) -> Vec<HookKey> {
        let mut keys: Vec<HookKey> = self.nodes.keys().cloned().collect();
        keys.sort_by_key(|k| self.plan.index.get(k).copied().unwrap_or(u32::MAX));
        keys
    }

    /// Attaches `hook`, recursively attaching any of its required hooks that aren't
    /// already present. Returns `Ok(false)` without mutating
    /// anything when `hook.key` (the user-defined equivalence) is already attached.
    pub fn attach(&mut self, hook: Hook) -> Result<bool, TrainingError> {
        let mut in_progress = HashSet::new();
        let attached = self.attach_inner(hook, true, &mut in_progress)?;
        if attached {
            self.rebuild_plan()?;
        }
        Ok(attached)
    }

    fn attach_inner(
        &mut self,
        hook: Hook,
        user_attached: bool,
        in_progress: &mut HashSet<HookKey>,
    ) -> Result<bool, TrainingError> {
        if self.nodes.contains_key(&hook.key) {
            return Ok(false);
        }
        if !in_progress.insert(hook.key.clone()) {
            return Err(crate::error::PlannerError::Cycle(hook.key).into());
        }

        let Hook {
            key,
            time_step,
            required_hooks,
            invoke_priority,
            invoke_in_background,
            required_registry_keys,
            default_target,
            action,
            parameter_registry,
        } = hook;

        let mut required_keys = Vec::with_capacity(required_hooks.len());
        for required in required_hooks {
            let required_key = required.key.clone();
            if !self.nodes.contains_key(&required_key) {
                self.attach_inner(required, false, in_progress)?;
            }
            if let Some(node) = self.nodes.get_mut(&required_key) {
                node.dependents.insert(key.clone());
            }
            required_keys.push(required_key);
        }

        self.by_scale
            .entry(time_step.scale())
            .or_default()
            .push(key.clone());

        match self.scope {
            HookScope::Local => {
                self.alive_local
                    .insert(key.clone(), vec![true; self.worker_count]);
            }
            HookScope::Global => {
                self.alive_global.insert(key.clone(), true);
            }
        }

        self.nodes.insert(
            key.clone(),
            AttachedHook {
                key: key.clone(),
                time_step_template: time_step,
                invoke_priority,
                invoke_in_background,
                required_registry_keys,
                default_target,
                action,
                parameter_registry,
                required: required_keys,
                dependents: HashSet::new(),
                user_attached,
            },
        );

        in_progress.remove(&key);
        Ok(true)
    }

    /// Detaches `key`. Refuses if the hook still has dependents. When a
    /// required hook becomes orphaned (no more dependents, and it was never directly
    /// attached by the caller) it is detached too.
    pub fn detach(&mut self, key: &HookKey) -> Result<bool, TrainingError> {
        let removed = self.detach_inner(key)?;
        if removed {
            self.rebuild_plan()?;
        }
        Ok(removed)
    }

    fn detach_inner(&mut self, key: &HookKey) -> Result<bool, TrainingError> {
        let Some(node) = self.nodes.get(key) else {
            return Ok(false);
        };
        if !node.dependents.is_empty() {
            return Err(TrainingError::DependencyViolation(format!(
                "hook {key} still has dependents"
            )));
        }

        let node = self.nodes.shift_remove(key).expect("checked above");
        if let Some(hooks) = self.by_scale.get_mut(&node.time_step_template.scale()) {
            hooks.retain(|k| k != key);
        }
        self.alive_local.remove(key);
        self.alive_global.remove(key);

        for required_key in &node.required {
            if let Some(required_node) = self.nodes.get_mut(required_key) {
                required_node.dependents.remove(key);
                if required_node.dependents.is_empty() && !required_node.user_attached {
                    self.detach_inner(required_key)?;
                }
            }
        }
        Ok(true)
    }

    fn rebuild_plan(&mut self) -> Result<(), TrainingError> {
        let mut meta = IndexMap::new();
        for (key, node) in self.nodes.iter() {
            meta.insert(
                key.clone(),
                PlannerHookMeta {
                    required: node.required.clone(),
                    invoke_priority: node.invoke_priority,
                    invoke_in_background: node.invoke_in_background,
                },
            );
        }
        let output = planner::plan(&meta)?;
        self.plan = InvocationPlan {
            index: output.invocation_index,
            target: output.invocation_target,
        };
        Ok(())
    }

    // -- liveness and dead-hook collection ------------------------------------------

    /// Marks `key` dead for `worker_index` (local scope only). Returns `true` once the
    /// hook is dead on every worker — the caller is then responsible for detaching it.
    pub fn mark_local_dead(&mut self, key: &HookKey, worker_index: usize) -> bool {
        let Some(flags) = self.alive_local.get_mut(key) else {
            return false;
        };
        if worker_index < flags.len() {
            flags[worker_index] = false;
        }
        flags.iter().all(|alive| !alive)
    }

    pub fn mark_global_dead(&mut self, key: &HookKey) {
        self.alive_global.insert(key.clone(), false);
    }

    pub fn is_global_alive(&self, key: &HookKey) -> bool {
        self.alive_global.get(key).copied().unwrap_or(false)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn resize_workers(&mut self, worker_count: usize) {
        self.worker_count = worker_count;
        for flags in self.alive_local.values_mut() {
            flags.resize(worker_count, true);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::{Registry, RegistryResolver};
    use crate::time_step::TimeScale;

    fn noop_hook(key: &str, priority: i32) -> Hook {
        Hook::new(
            key,
            TimeStep::every(TimeScale::Iteration, 1),
            |_: &Registry, _: &RegistryResolver<'_>| {},
        )
        .priority(priority)
    }

    #[test]
    fn dedup_via_required_hook_shared_by_key() {
        let mut table = HookTable::new(HookScope::Local, 1);
        let r = noop_hook("r", 0);
        let h1 = noop_hook("h1", 0).requires(r);
        let r_again = noop_hook("r", 0);
        let h2 = noop_hook("h2", 0).requires(r_again);

        assert!(table.attach(h1).unwrap());
        assert!(table.attach(h2).unwrap());
        assert_eq!(table.nodes.len(), 3);
        assert_eq!(table.get(&HookKey::new("r")).unwrap().dependents.len(), 2);
    }

    #[test]
    fn detaching_with_dependents_is_rejected() {
        let mut table = HookTable::new(HookScope::Local, 1);
        let r = noop_hook("r", 0);
        let h1 = noop_hook("h1", 0).requires(r);
        table.attach(h1).unwrap();

        assert!(table.detach(&HookKey::new("r")).is_err());
    }

    #[test]
    fn orphaned_required_hook_auto_detaches() {
        let mut table = HookTable::new(HookScope::Local, 1);
        let r1 = noop_hook("r", 0);
        let h1 = noop_hook("h1", 0).requires(r1);
        let r2 = noop_hook("r", 0);
        let h2 = noop_hook("h2", 0).requires(r2);
        table.attach(h1).unwrap();
        table.attach(h2).unwrap();

        assert!(table.detach(&HookKey::new("h1")).unwrap());
        assert!(table.contains(&HookKey::new("r")));

        assert!(table.detach(&HookKey::new("h2")).unwrap());
        assert!(!table.contains(&HookKey::new("r")));
    }

    #[test]
    fn reattaching_same_key_is_a_no_op() {
        let mut table = HookTable::new(HookScope::Local, 1);
        assert!(table.attach(noop_hook("h", 0)).unwrap());
        assert!(!table.attach(noop_hook("h", 0)).unwrap());
        assert_eq!(table.nodes.len(), 1);
    }

    #[test]
    fn local_dead_marking_is_per_worker() {
        let mut table = HookTable::new(HookScope::Local, 2);
        table.attach(noop_hook("h", 0)).unwrap();
        let key = HookKey::new("h");
        assert!(!table.mark_local_dead(&key, 0));
        assert!(table.mark_local_dead(&key, 1));
    }
}
