//! The collaborator traits this core consumes but does not own (tensor backend, trainer,
//! data iterator, optimiser, network), plus the in-crate mocks used by the integration
//! test suite.

use std::sync::Arc;

use crate::registry::Registry;

/// Opaque shape/dtype description of one tensor. Concrete layout is a backend concern;
/// this core only ever moves `NdArrayHandle`s around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    F32,
    F64,
}

/// A backend-owned tensor handle. Mocks use `f64` scalars; a real backend would wrap a
/// device pointer or similar here.
pub type NdArrayHandle = Arc<dyn std::any::Any + Send + Sync>;

/// One epoch's worth of named input/output tensors yielded by a [`DataIterator`].
pub type DataBlock = std::collections::HashMap<String, NdArrayHandle>;

/// The tensor backend. Consumed, never owned: this core brackets sessions around it and
/// asks it to move data, but never inspects tensor contents itself.
pub trait ComputationHandler: Send + Sync {
    fn data_type(&self) -> DataType;
    fn create(&self, shape: &[usize]) -> NdArrayHandle;
    fn fill(&self, src: &NdArrayHandle, dst: &NdArrayHandle);
    fn fill_scalar(&self, scalar: f64, dst: &NdArrayHandle);
    fn add(&self, a: &NdArrayHandle, b: &NdArrayHandle, out: &NdArrayHandle);
    fn subtract(&self, a: &NdArrayHandle, b: &NdArrayHandle, out: &NdArrayHandle);
    fn multiply(&self, a: &NdArrayHandle, b: &NdArrayHandle, out: &NdArrayHandle);
    fn divide(&self, a: &NdArrayHandle, b: &NdArrayHandle, out: &NdArrayHandle);
    fn size_bytes(&self, arrays: &[NdArrayHandle]) -> i64;
    fn is_interchangeable(&self, other: &dyn ComputationHandler) -> bool;
    /// Whether `array`, native to this handler, can be converted for use by `other`.
    fn can_convert(&self, array: &NdArrayHandle, other: &dyn ComputationHandler) -> bool;
    /// Converts `array` into a tensor usable by `other`. Only called after `can_convert`
    /// has returned `true` for the same pair.
    fn convert(&self, array: &NdArrayHandle, other: &dyn ComputationHandler) -> NdArrayHandle;
    /// Hint that intermediate buffers for the upcoming iteration may be pooled
    /// aggressively. A no-op is always a correct implementation.
    fn begin_session(&self) {}
    fn end_session(&self) {}
}

/// One epoch's lazy, finite sequence of data blocks, pulled one block at a time.
pub trait DataIterator: Send + Sync {
    /// Returns the next block of this epoch, or `None` once the epoch is exhausted.
    fn next(&mut self, handler: &dyn ComputationHandler) -> Option<DataBlock>;
    fn reset_epoch(&mut self);
    fn shallow_copy(&self) -> Box<dyn DataIterator>;
    fn registry(&self) -> &Registry;
}

pub trait Optimiser: Send + Sync {
    fn shallow_copy(&self) -> Box<dyn Optimiser>;
    fn registry(&self) -> &Registry;
    /// Escape hatch for collaborators (tests, mocks) that need to recover a concrete
    /// type from the trait object.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// An opaque network replica. Must support `deep_copy` and expose its parameter tensors
/// through `registry()` under `layers.*.*` for the [`NetworkMerger`](crate::merger::NetworkMerger).
pub trait Network: Send + Sync {
    fn deep_copy(&self) -> Box<dyn Network>;
    fn registry(&self) -> &Registry;
    fn registry_mut(&mut self) -> &mut Registry;
}

/// Drives one training iteration against a `Network`/`Optimiser` pair. Owns the
/// worker-ready iterator/optimiser templates a fresh worker is built from.
pub trait Trainer: Send + Sync {
    /// A fresh, worker-ready data iterator instance, independent of any other call's.
    fn training_data_iterator(&self) -> Box<dyn DataIterator>;
    /// A fresh, worker-ready optimiser instance, independent of any other call's.
    fn optimiser(&self) -> Box<dyn Optimiser>;
    fn provide_external_input_data(&self, net: &mut dyn Network, block: &DataBlock);
    fn run_training_iteration(
        &self,
        net: &mut dyn Network,
        optimiser: &mut dyn Optimiser,
        registry: &Registry,
        handler: &dyn ComputationHandler,
    );
    fn provide_external_output_data(&self, net: &mut dyn Network, block: &DataBlock);
    fn registry(&self) -> &Registry;
}

// -- in-crate mocks, only compiled under the `testing` feature or test cfg --

#[cfg(any(test, feature = "testing"))]
pub mod mock {
    use super::*;
    use crate::registry::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Stores named `f64` parameters directly in its registry under `layers.<name>`, so
    /// the default [`crate::merger::NetworkMerger`] pattern `layers.*.*` finds them with
    /// no adapter code.
    pub struct MockNetwork {
        registry: Registry,
    }

    impl MockNetwork {
        pub fn new(params: impl IntoIterator<Item = (String, f64)>) -> Self {
            let mut layers = Registry::new();
            for (name, value) in params {
                layers.set(name, Value::F64(value));
            }
            let mut registry = Registry::new();
            registry.set_child("layers", Arc::new(layers));
            Self { registry }
        }

        pub fn param(&self, name: &str) -> Option<f64> {
            self.registry
                .get_owned("layers")
                .and_then(|v| v.as_child().cloned())
                .and_then(|layers| layers.get_owned(name))
                .and_then(|v| v.as_f64())
        }
    }

    impl Network for MockNetwork {
        fn deep_copy(&self) -> Box<dyn Network> {
            Box::new(MockNetwork {
                registry: self.registry.clone(),
            })
        }

        fn registry(&self) -> &Registry {
            &self.registry
        }

        fn registry_mut(&mut self) -> &mut Registry {
            &mut self.registry
        }
    }

    /// A no-op session bracket; `create` returns a boxed `f64` scalar.
    pub struct MockComputationHandler;

    impl ComputationHandler for MockComputationHandler {
        fn data_type(&self) -> DataType {
            DataType::F64
        }

        fn create(&self, _shape: &[usize]) -> NdArrayHandle {
            Arc::new(0.0_f64)
        }

        fn fill(&self, src: &NdArrayHandle, _dst: &NdArrayHandle) {
            let _ = src;
        }

        fn fill_scalar(&self, _scalar: f64, _dst: &NdArrayHandle) {}

        fn add(&self, _a: &NdArrayHandle, _b: &NdArrayHandle, _out: &NdArrayHandle) {}
        fn subtract(&self, _a: &NdArrayHandle, _b: &NdArrayHandle, _out: &NdArrayHandle) {}
        fn multiply(&self, _a: &NdArrayHandle, _b: &NdArrayHandle, _out: &NdArrayHandle) {}
        fn divide(&self, _a: &NdArrayHandle, _b: &NdArrayHandle, _out: &NdArrayHandle) {}

        fn size_bytes(&self, arrays: &[NdArrayHandle]) -> i64 {
            (arrays.len() * std::mem::size_of::<f64>()) as i64
        }

        fn is_interchangeable(&self, _other: &dyn ComputationHandler) -> bool {
            true
        }

        fn can_convert(&self, _array: &NdArrayHandle, _other: &dyn ComputationHandler) -> bool {
            true
        }

        fn convert(&self, array: &NdArrayHandle, _other: &dyn ComputationHandler) -> NdArrayHandle {
            array.clone()
        }
    }

    /// Yields `blocks_per_epoch` empty blocks, then exhausts; `reset_epoch` re-arms it.
    pub struct MockDataIterator {
        blocks_per_epoch: usize,
        remaining: usize,
        registry: Registry,
    }

    impl MockDataIterator {
        pub fn new(blocks_per_epoch: usize) -> Self {
            Self {
                blocks_per_epoch,
                remaining: blocks_per_epoch,
                registry: Registry::new(),
            }
        }
    }

    impl DataIterator for MockDataIterator {
        fn next(&mut self, _handler: &dyn ComputationHandler) -> Option<DataBlock> {
            if self.remaining == 0 {
                return None;
            }
            self.remaining -= 1;
            Some(DataBlock::new())
        }

        fn reset_epoch(&mut self) {
            self.remaining = self.blocks_per_epoch;
        }

        fn shallow_copy(&self) -> Box<dyn DataIterator> {
            Box::new(MockDataIterator::new(self.blocks_per_epoch))
        }

        fn registry(&self) -> &Registry {
            &self.registry
        }
    }

    /// Bumps a `step_count` counter each iteration; no real optimisation happens.
    pub struct MockOptimiser {
        step_count: Arc<AtomicUsize>,
        registry: Registry,
    }

    impl MockOptimiser {
        pub fn new() -> Self {
            Self {
                step_count: Arc::new(AtomicUsize::new(0)),
                registry: Registry::new(),
            }
        }

        pub fn step_count(&self) -> usize {
            self.step_count.load(Ordering::SeqCst)
        }
    }

    impl Default for MockOptimiser {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Optimiser for MockOptimiser {
        fn shallow_copy(&self) -> Box<dyn Optimiser> {
            Box::new(MockOptimiser {
                step_count: self.step_count.clone(),
                registry: self.registry.clone(),
            })
        }

        fn registry(&self) -> &Registry {
            &self.registry
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    /// Increments the optimiser's step counter once per iteration and otherwise moves no
    /// data, so the iteration-monotonicity and merge-completeness invariants can be
    /// asserted precisely without a real tensor pipeline. Owns the iterator/optimiser
    /// templates each worker is built from, per the `Trainer` contract.
    pub struct MockTrainer {
        registry: Registry,
        iterator_template: Box<dyn DataIterator>,
        optimiser_template: Box<dyn Optimiser>,
    }

    impl MockTrainer {
        pub fn new(iterator_template: Box<dyn DataIterator>, optimiser_template: Box<dyn Optimiser>) -> Self {
            Self {
                registry: Registry::new(),
                iterator_template,
                optimiser_template,
            }
        }
    }

    impl Trainer for MockTrainer {
        fn training_data_iterator(&self) -> Box<dyn DataIterator> {
            self.iterator_template.shallow_copy()
        }

        fn optimiser(&self) -> Box<dyn Optimiser> {
            self.optimiser_template.shallow_copy()
        }

        fn provide_external_input_data(&self, _net: &mut dyn Network, _block: &DataBlock) {}

        fn run_training_iteration(
            &self,
            _net: &mut dyn Network,
            optimiser: &mut dyn Optimiser,
            _registry: &Registry,
            _handler: &dyn ComputationHandler,
        ) {
            if let Some(mock) = optimiser.as_any_mut().downcast_mut::<MockOptimiser>() {
                mock.step_count.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn provide_external_output_data(&self, _net: &mut dyn Network, _block: &DataBlock) {}

        fn registry(&self) -> &Registry {
            &self.registry
        }
    }

}
