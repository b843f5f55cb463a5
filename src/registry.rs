//! C3: [`Registry`] and glob-style resolution — the sole data channel into hooks.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::RegistryError;

/// Type-erased, `Send + Sync` value stored under a registry key.
pub type SharedAny = Arc<dyn Any + Send + Sync>;

/// A value held by a [`Registry`] entry.
#[derive(Clone)]
pub enum Value {
    I64(i64),
    F64(f64),
    Bool(bool),
    Str(String),
    /// A nested registry, e.g. the `shared` child or a network's `layers` namespace.
    Child(Arc<Registry>),
    /// Escape hatch for collaborator handles (`Arc<dyn Network>`, etc.) that don't fit
    /// the scalar variants above.
    Any(SharedAny),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_child(&self) -> Option<&Arc<Registry>> {
        match self {
            Value::Child(r) => Some(r),
            _ => None,
        }
    }

    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        match self {
            Value::Any(any) => any.clone().downcast::<T>().ok(),
            _ => None,
        }
    }
}

/// Hierarchical string-keyed mapping: ordered, optionally parented, and tagged.
///
/// Child lookups fall through to a parent registry when a key isn't found locally.
/// Each registry carries a set of tags consulted by resolver queries (e.g. the `shared`
/// tag on the child registry exposed under the `shared` standard key).
#[derive(Clone, Default)]
pub struct Registry {
    entries: IndexMap<String, Value>,
    tags: HashSet<String>,
    parent: Option<Arc<Registry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(parent: Arc<Registry>) -> Self {
        Self {
            entries: IndexMap::new(),
            tags: HashSet::new(),
            parent: Some(parent),
        }
    }

    pub fn tag(&mut self, tag: impl Into<String>) -> &mut Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.entries.insert(key.into(), value);
        self
    }

    pub fn set_any<T: Send + Sync + 'static>(&mut self, key: impl Into<String>, value: T) -> &mut Self {
        self.set(key, Value::Any(Arc::new(value)))
    }

    pub fn set_child(&mut self, key: impl Into<String>, child: Arc<Registry>) -> &mut Self {
        self.set(key, Value::Child(child))
    }

    /// Looks up `key`, falling through to the parent chain if absent locally. Returns
    /// an owned value since a parent-chain hit can't be returned as a borrow of `self`.
    pub fn get_owned(&self, key: &str) -> Option<Value> {
        if let Some(v) = self.entries.get(key) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.get_owned(key))
    }

    pub fn require_i64(&self, key: &str) -> Result<i64, RegistryError> {
        self.get_owned(key)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| RegistryError::MissingKey(key.to_string()))
    }

    pub fn get_any<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.get_owned(key).and_then(|v| v.downcast::<T>())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn parent(&self) -> Option<&Arc<Registry>> {
        self.parent.as_ref()
    }

    /// Resolves a glob pattern of the form `a.b.*.c` against this registry and its
    /// descendants (via [`Value::Child`] entries), returning every matching full dotted
    /// key path. `*` matches exactly one path segment.
    pub fn resolve(&self, pattern: &str) -> Result<Vec<String>, RegistryError> {
        let segments: Vec<&str> = pattern.split('.').collect();
        if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return Err(RegistryError::MalformedPattern(pattern.to_string()));
        }
        let mut out = Vec::new();
        self.resolve_into(&segments, String::new(), &mut out);
        Ok(out)
    }

    fn resolve_into(&self, segments: &[&str], prefix: String, out: &mut Vec<String>) {
        let (head, rest) = (segments[0], &segments[1..]);
        let mut matched_here = false;
        for (key, value) in self.entries.iter() {
            if head != "*" && head != key {
                continue;
            }
            matched_here = true;
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            if rest.is_empty() {
                out.push(path);
            } else if let Value::Child(child) = value {
                child.resolve_into(rest, path, out);
            }
        }
        // Fall through to the parent only when nothing in this registry's own
        // namespace matched the leading segment at all.
        if !matched_here {
            if let Some(parent) = &self.parent {
                parent.resolve_into(segments, prefix, out);
            }
        }
    }

    /// Collects the owned values for every key matched by [`Registry::resolve`].
    pub fn resolve_values(&self, pattern: &str) -> Result<Vec<(String, Value)>, RegistryError> {
        let keys = self.resolve(pattern)?;
        Ok(keys
            .into_iter()
            .filter_map(|k| {
                let v = self.get_owned(&k)?;
                Some((k, v))
            })
            .collect())
    }

    /// Builds a snapshot registry containing only the keys named directly in
    /// `direct_keys` plus everything matched by any glob pattern in `patterns`. Used to
    /// give background hooks a point-in-time view isolated from concurrent writers.
    pub fn snapshot(&self, direct_keys: &[String], patterns: &[String]) -> Registry {
        let mut snap = Registry::new();
        for key in direct_keys {
            if let Some(v) = self.get_owned(key) {
                snap.set(key.clone(), v);
            }
        }
        for pattern in patterns {
            if let Ok(resolved) = self.resolve_values(pattern) {
                for (k, v) in resolved {
                    snap.set(k, v);
                }
            }
        }
        snap
    }
}

/// A thin, stateless façade over a root [`Registry`] for resolver-style lookups. Kept as
/// a distinct type even though `Registry`
/// itself implements the resolution logic, so call sites that only need to resolve (and
/// not mutate) can be typed against the narrower surface.
pub struct RegistryResolver<'a> {
    root: &'a Registry,
}

impl<'a> RegistryResolver<'a> {
    pub fn new(root: &'a Registry) -> Self {
        Self { root }
    }

    pub fn resolve(&self, pattern: &str) -> Result<Vec<String>, RegistryError> {
        self.root.resolve(pattern)
    }

    pub fn resolve_values(&self, pattern: &str) -> Result<Vec<(String, Value)>, RegistryError> {
        self.root.resolve_values(pattern)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn layers_registry() -> Registry {
        let mut layer0 = Registry::new();
        layer0.set("weight", Value::F64(1.0));
        layer0.set("bias", Value::F64(0.1));

        let mut layer1 = Registry::new();
        layer1.set("weight", Value::F64(2.0));
        layer1.set("bias", Value::F64(0.2));

        let mut layers = Registry::new();
        layers.set_child("0", Arc::new(layer0));
        layers.set_child("1", Arc::new(layer1));

        let mut root = Registry::new();
        root.set_child("layers", Arc::new(layers));
        root
    }

    #[test]
    fn glob_resolves_across_nested_children() {
        let root = layers_registry();
        let mut keys = root.resolve("layers.*.*").unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "layers.0.bias",
                "layers.0.weight",
                "layers.1.bias",
                "layers.1.weight",
            ]
        );
    }

    #[test]
    fn literal_segment_narrows_the_match() {
        let root = layers_registry();
        let keys = root.resolve("layers.0.weight").unwrap();
        assert_eq!(keys, vec!["layers.0.weight"]);
    }

    #[test]
    fn parent_fall_through_when_local_namespace_empty() {
        let mut parent = Registry::new();
        parent.set("epoch", Value::I64(3));
        let child = Registry::with_parent(Arc::new(parent));

        assert_eq!(child.get_owned("epoch").unwrap().as_i64(), Some(3));
        assert_eq!(child.resolve("epoch").unwrap(), vec!["epoch"]);
    }

    #[test]
    fn local_entry_shadows_parent() {
        let mut parent = Registry::new();
        parent.set("epoch", Value::I64(3));
        let mut child = Registry::with_parent(Arc::new(parent));
        child.set("epoch", Value::I64(99));

        assert_eq!(child.get_owned("epoch").unwrap().as_i64(), Some(99));
    }

    #[test]
    fn snapshot_contains_only_requested_keys() {
        let root = layers_registry();
        let snap = root.snapshot(&[], &["layers.*.weight".to_string()]);
        let mut keys: Vec<&str> = snap.keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["layers.0.weight", "layers.1.weight"]);
    }

    #[test]
    fn malformed_pattern_is_rejected() {
        let root = Registry::new();
        assert!(root.resolve("a..b").is_err());
    }

    #[test]
    fn tagged_registry_reports_its_tag() {
        let mut shared = Registry::new();
        shared.tag("shared");
        assert!(shared.has_tag("shared"));
        assert!(!shared.has_tag("other"));
    }
}
