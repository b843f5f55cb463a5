use std::sync::{Arc, Mutex};

use training_core::collaborators::mock::{MockComputationHandler, MockDataIterator, MockNetwork, MockOptimiser, MockTrainer};
use training_core::collaborators::{ComputationHandler, Network};
use training_core::{MeanNetworkMerger, NetworkMerger, Operator, OperatorConfig};

/// Wraps [`MeanNetworkMerger`] and records the replica count of every `merge` call, so
/// scenario tests can assert on merge-completeness without reaching into operator
/// internals.
pub struct CountingMerger {
    inner: MeanNetworkMerger,
    pub calls: Arc<Mutex<Vec<usize>>>,
}

impl CountingMerger {
    pub fn new() -> (Self, Arc<Mutex<Vec<usize>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                inner: MeanNetworkMerger::default(),
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl NetworkMerger for CountingMerger {
    fn merge(&self, target: &mut dyn Network, sources: &[Box<dyn Network>], handler: &dyn ComputationHandler) {
        self.calls.lock().unwrap().push(sources.len());
        self.inner.merge(target, sources, handler);
    }
}

/// Builds an `Operator` wired with the in-crate mocks, a `CountingMerger`, and a single
/// `w` parameter, returning it alongside the merge-call log.
pub fn new_operator(worker_count: usize, blocks_per_epoch: usize) -> (Operator, Arc<Mutex<Vec<usize>>>) {
    let (merger, calls) = CountingMerger::new();
    let op = Operator::with_merger(
        Arc::new(MockComputationHandler),
        Arc::new(MockTrainer::new(Box::new(MockDataIterator::new(blocks_per_epoch)), Box::new(MockOptimiser::new()))),
        Box::new(merger),
        Box::new(MockNetwork::new([("w".to_string(), 0.0)])),
        OperatorConfig::new(worker_count),
    )
    .unwrap();
    (op, calls)
}

/// Spins until `condition` holds or `attempts * 10ms` elapses, returning whether it held.
pub fn wait_until(mut condition: impl FnMut() -> bool, attempts: usize) -> bool {
    for _ in 0..attempts {
        if condition() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    condition()
}
