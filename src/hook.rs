//! C2: [`Hook`] — a user-supplied callback bound to a [`TimeStep`].

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::registry::{Registry, RegistryResolver};
use crate::time_step::TimeStep;

/// Where a hook is, by default, meant to be attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookTarget {
    Local,
    Global,
}

/// The user-defined equivalence key used to dedup hook attachments: two attach calls
/// using the same key are treated as attaching the same logical hook.
///
/// Embedders pick this key when constructing a [`Hook`]; two attach calls using the same
/// key are treated as attaching the same logical hook.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookKey(pub(crate) String);

impl HookKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for HookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for HookKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The callback body of a [`Hook`]. Must be pure with respect to operator state except
/// via registry writes.
pub trait HookAction: Send + Sync {
    fn invoke(&self, registry: &Registry, resolver: &RegistryResolver<'_>);
}

impl<F> HookAction for F
where
    F: Fn(&Registry, &RegistryResolver<'_>) + Send + Sync,
{
    fn invoke(&self, registry: &Registry, resolver: &RegistryResolver<'_>) {
        (self)(registry, resolver)
    }
}

/// A user-supplied callback bound to a [`TimeStep`], with a required-hooks set,
/// invocation priority, a foreground/background flag, and the registry keys it needs
/// when invoked in the background.
pub struct Hook {
    pub key: HookKey,
    pub time_step: TimeStep,
    /// Hooks this hook transitively depends on, by full definition rather than just key —
    /// an unattached required hook is attached recursively using this definition.
    /// Already-attached keys are deduped by
    /// [`HookTable::attach`](crate::hook_table::HookTable::attach).
    pub required_hooks: Vec<Hook>,
    pub invoke_priority: i32,
    pub invoke_in_background: bool,
    /// Registry keys (direct or resolver glob patterns) a background invocation needs
    /// in its snapshot.
    pub required_registry_keys: Vec<String>,
    pub default_target: HookTarget,
    pub action: Arc<dyn HookAction>,
    /// Private, durable storage owned by this hook, independent of the transient
    /// per-event registry passed to `action.invoke`. The Commands pattern shares one
    /// instance between a command's local and global hook copies to track completions.
    pub parameter_registry: Arc<Mutex<Registry>>,
}

impl Hook {
    pub fn new(
        key: impl Into<String>,
        time_step: TimeStep,
        action: impl HookAction + 'static,
    ) -> Self {
        Self {
            key: HookKey::new(key),
            time_step,
            required_hooks: Vec::new(),
            invoke_priority: 0,
            invoke_in_background: false,
            required_registry_keys: Vec::new(),
            default_target: HookTarget::Local,
            action: Arc::new(action),
            parameter_registry: Arc::new(Mutex::new(Registry::new())),
        }
    }

    pub fn requires(mut self, required: Hook) -> Self {
        self.required_hooks.push(required);
        self
    }

    pub fn priority(mut self, invoke_priority: i32) -> Self {
        self.invoke_priority = invoke_priority;
        self
    }

    pub fn in_background(mut self, keys: impl IntoIterator<Item = String>) -> Self {
        self.invoke_in_background = true;
        self.required_registry_keys = keys.into_iter().collect();
        self
    }

    pub fn default_target(mut self, target: HookTarget) -> Self {
        self.default_target = target;
        self
    }

    /// Overrides this hook's private registry, e.g. to share one instance between two
    /// attachments of the same logical hook (see the Commands pattern in
    /// [`crate::operator::Operator::invoke_command`]).
    pub fn parameter_registry(mut self, parameter_registry: Arc<Mutex<Registry>>) -> Self {
        self.parameter_registry = parameter_registry;
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::time_step::TimeScale;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn builder_sets_fields() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let loss_hook = Hook::new(
            "loss",
            TimeStep::every(TimeScale::Iteration, 1),
            |_: &Registry, _: &RegistryResolver<'_>| {},
        );
        let hook = Hook::new(
            "acc",
            TimeStep::every(TimeScale::Iteration, 1),
            move |_: &Registry, _: &RegistryResolver<'_>| {
                calls2.fetch_add(1, Ordering::SeqCst);
            },
        )
        .requires(loss_hook)
        .priority(5)
        .default_target(HookTarget::Global);

        assert_eq!(hook.key, HookKey::new("acc"));
        assert_eq!(hook.required_hooks.len(), 1);
        assert_eq!(hook.required_hooks[0].key, HookKey::new("loss"));
        assert_eq!(hook.invoke_priority, 5);
        assert_eq!(hook.default_target, HookTarget::Global);

        let registry = Registry::new();
        let resolver = RegistryResolver::new(&registry);
        hook.action.invoke(&registry, &resolver);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
