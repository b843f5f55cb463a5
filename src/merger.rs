//! C4: [`NetworkMerger`] — reduces N worker network replicas into one global network


use crate::collaborators::{ComputationHandler, Network};
use crate::registry::Value;

/// Contract: `merge` updates `target` in place so that for every parameter matched by
/// the merger's key pattern, `target.param = reduce({source.param})`. Parameters not
/// matched by the pattern are left untouched.
pub trait NetworkMerger: Send + Sync {
    fn merge(
        &self,
        target: &mut dyn Network,
        sources: &[Box<dyn Network>],
        handler: &dyn ComputationHandler,
    );
}

/// Default reduction: arithmetic mean across corresponding tensors, over the resolver
/// glob `pattern` (default `layers.*.*`).
pub struct MeanNetworkMerger {
    pattern: String,
}

impl MeanNetworkMerger {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }
}

impl Default for MeanNetworkMerger {
    fn default() -> Self {
        Self::new("layers.*.*")
    }
}

impl NetworkMerger for MeanNetworkMerger {
    fn merge(
        &self,
        target: &mut dyn Network,
        sources: &[Box<dyn Network>],
        _handler: &dyn ComputationHandler,
    ) {
        if sources.is_empty() {
            return;
        }
        let keys = match target.registry().resolve(&self.pattern) {
            Ok(keys) => keys,
            Err(_) => return,
        };

        for key in keys {
            let mut sum = 0.0;
            let mut count = 0usize;
            for source in sources {
                if let Some(value) = source.registry().get_owned(&key).and_then(|v| v.as_f64()) {
                    sum += value;
                    count += 1;
                }
            }
            if count == 0 {
                continue;
            }
            set_nested_f64(target, &key, sum / count as f64);
        }
    }
}

/// Writes `value` to the dotted path `key` inside `target`'s registry, descending into
/// `Value::Child` entries one segment at a time.
fn set_nested_f64(target: &mut dyn Network, key: &str, value: f64) {
    let segments: Vec<&str> = key.split('.').collect();
    set_nested_f64_in(target.registry_mut(), &segments, value);
}

fn set_nested_f64_in(registry: &mut crate::registry::Registry, segments: &[&str], value: f64) {
    match segments {
        [] => {}
        [last] => {
            registry.set(last.to_string(), Value::F64(value));
        }
        [head, rest @ ..] => {
            if let Some(child) = registry.get_owned(head).and_then(|v| v.as_child().cloned()) {
                let mut child = (*child).clone();
                set_nested_f64_in(&mut child, rest, value);
                registry.set_child(head.to_string(), std::sync::Arc::new(child));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::collaborators::mock::{MockComputationHandler, MockNetwork};

    #[test]
    fn averages_matched_parameters_across_sources() {
        let merger = MeanNetworkMerger::default();
        let handler = MockComputationHandler;
        let mut target = MockNetwork::new([("w".to_string(), 0.0)]);
        let sources: Vec<Box<dyn Network>> = vec![
            Box::new(MockNetwork::new([("w".to_string(), 2.0)])),
            Box::new(MockNetwork::new([("w".to_string(), 4.0)])),
        ];

        merger.merge(&mut target, &sources, &handler);
        assert_eq!(target.param("w"), Some(3.0));
    }

    #[test]
    fn unmatched_parameters_are_left_untouched() {
        let merger = MeanNetworkMerger::new("layers.missing");
        let handler = MockComputationHandler;
        let mut target = MockNetwork::new([("w".to_string(), 7.0)]);
        let sources: Vec<Box<dyn Network>> =
            vec![Box::new(MockNetwork::new([("w".to_string(), 99.0)]))];

        merger.merge(&mut target, &sources, &handler);
        assert_eq!(target.param("w"), Some(7.0));
    }

    #[test]
    fn empty_sources_is_a_no_op() {
        let merger = MeanNetworkMerger::default();
        let handler = MockComputationHandler;
        let mut target = MockNetwork::new([("w".to_string(), 1.0)]);

        merger.merge(&mut target, &[], &handler);
        assert_eq!(target.param("w"), Some(1.0));
    }
}
