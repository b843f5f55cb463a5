//! C5: the worker thread loop — each worker drives its own replica of the network and
//! optimiser against its own data iterator, independently of every other worker.
//!
//! Split in two for ownership reasons: [`WorkerLocal`] is the thread-owned mutable
//! state, touched only by the thread that owns it; [`WorkerControl`] is the lightweight
//! handle [`crate::operator::Operator`] keeps to steer that thread (mirroring the
//! runtime's own split between the state it hands to worker closures and the join
//! handles it keeps for itself).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_utils::sync::{Parker, Unparker};
use indexmap::IndexMap;

use crate::collaborators::{ComputationHandler, DataIterator, Network, Optimiser};
use crate::config::WorkerThreadPriority;
use crate::error::TrainingError;
use crate::hook::HookKey;
use crate::operator::Shared;
use crate::time_step::{TimeScale, TimeStep};

/// A worker's lifecycle state. Transitions are driven entirely by its owning
/// `Operator`; the worker thread only ever reads this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// Spawned but never started.
    None,
    Running,
    Paused,
    Stopped,
}

/// Thread-owned state: the worker's private replica of the network and optimiser, its
/// data iterator, and its own view of epoch/iteration progress and hook timers.
struct WorkerLocal {
    network: Option<Box<dyn Network>>,
    optimiser: Box<dyn Optimiser>,
    iterator: Box<dyn DataIterator>,
    local_epoch_number: u64,
    local_iteration_number: u64,
    local_hook_time_steps: IndexMap<HookKey, TimeStep>,
}

/// The handle an `Operator` keeps for a running worker thread: enough to change its
/// state and wake it, plus the join handle to collect it on shutdown.
pub(crate) struct WorkerControl {
    pub(crate) state: Arc<Mutex<ExecutionState>>,
    pub(crate) unparker: Unparker,
    pub(crate) run_once: Arc<AtomicBool>,
    pub(crate) join_handle: Option<JoinHandle<()>>,
}

/// Spawns a worker thread and returns the operator-side handle for it. The thread
/// starts parked in [`ExecutionState::None`] until the operator signals it to run.
pub(crate) fn spawn(
    index: usize,
    shared: Arc<Shared>,
    handler: Arc<dyn ComputationHandler>,
    iterator: Box<dyn DataIterator>,
    optimiser: Box<dyn Optimiser>,
    priority: WorkerThreadPriority,
) -> WorkerControl {
    let state = Arc::new(Mutex::new(ExecutionState::None));
    let run_once = Arc::new(AtomicBool::new(false));
    let parker = Parker::new();
    let unparker = parker.unparker().clone();

    let thread_state = state.clone();
    let thread_run_once = run_once.clone();

    let join_handle = std::thread::Builder::new()
        .name(format!("training-core-worker-{index}"))
        .spawn(move || {
            let _ = priority; // platform thread priority is a best-effort hint only.
            let mut local = WorkerLocal {
                network: None,
                optimiser,
                iterator,
                local_epoch_number: 0,
                local_iteration_number: 0,
                local_hook_time_steps: IndexMap::new(),
            };
            run_loop(index, &shared, handler.as_ref(), &thread_state, &thread_run_once, &parker, &mut local);
        })
        .expect("failed to spawn worker thread");

    WorkerControl {
        state,
        unparker,
        run_once,
        join_handle: Some(join_handle),
    }
}

fn run_loop(
    index: usize,
    shared: &Shared,
    handler: &dyn ComputationHandler,
    state: &Mutex<ExecutionState>,
    run_once: &AtomicBool,
    parker: &Parker,
    local: &mut WorkerLocal,
) {
    loop {
        let current = *state.lock().expect("worker state lock poisoned");
        match current {
            ExecutionState::Stopped => break,
            ExecutionState::None | ExecutionState::Paused => parker.park(),
            ExecutionState::Running => {
                if let Err(err) = do_work(index, shared, handler, local) {
                    log::error!("worker {index} failed: {err}");
                    *state.lock().expect("worker state lock poisoned") = ExecutionState::Paused;
                    continue;
                }
                if run_once.swap(false, Ordering::SeqCst) {
                    *state.lock().expect("worker state lock poisoned") = ExecutionState::Paused;
                }
            }
        }
    }
}

/// One unit of work: pull the next data block (rolling the epoch over and firing the
/// `Epoch` event if the iterator is exhausted), pull progress, run one training
/// iteration, fire the `Iteration` event, then push progress.
fn do_work(
    index: usize,
    shared: &Shared,
    handler: &dyn ComputationHandler,
    local: &mut WorkerLocal,
) -> Result<(), TrainingError> {
    let block = match local.iterator.next(handler) {
        Some(block) => block,
        None => {
            local.iterator.reset_epoch();
            local.local_epoch_number += 1;
            local.local_iteration_number = 0;
            fire_local_event(index, shared, local, TimeScale::Epoch);
            local.iterator.next(handler).ok_or_else(|| TrainingError::WorkerInitialisationFailure {
                worker_index: index,
                reason: "data iterator yielded no blocks immediately after reset_epoch".to_string(),
            })?
        }
    };

    shared.pull_progress(local.local_iteration_number, &mut local.network);

    if shared.use_sessions {
        handler.begin_session();
    }
    {
        let network_box = local.network.as_mut().expect("pull_progress always populates network");
        let network: &mut dyn Network = &mut **network_box;
        shared.trainer.provide_external_input_data(network, &block);
        shared
            .trainer
            .run_training_iteration(network, local.optimiser.as_mut(), local.iterator.registry(), handler);
        shared.trainer.provide_external_output_data(network, &block);
    }
    if shared.use_sessions {
        handler.end_session();
    }

    local.local_iteration_number += 1;
    fire_local_event(index, shared, local, TimeScale::Iteration);

    let network_ref: &dyn Network = &**local.network.as_ref().expect("populated above");
    shared.push_progress(index, local.local_epoch_number, local.local_iteration_number, network_ref)
}

fn fire_local_event(index: usize, shared: &Shared, local: &mut WorkerLocal, scale: TimeScale) {
    shared.fire_local(
        index,
        scale,
        &mut local.local_hook_time_steps,
        local.network.as_deref(),
        &*local.optimiser,
        &*local.iterator,
        local.local_epoch_number,
        local.local_iteration_number,
    );
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::collaborators::mock::{MockComputationHandler, MockDataIterator, MockNetwork, MockOptimiser, MockTrainer};
    use crate::config::OperatorConfig;
    use crate::operator::Operator;
    use std::time::Duration;

    fn new_operator(worker_count: usize, blocks_per_epoch: usize) -> Operator {
        Operator::new(
            Arc::new(MockComputationHandler),
            Arc::new(MockTrainer::new(Box::new(MockDataIterator::new(blocks_per_epoch)), Box::new(MockOptimiser::new()))),
            Box::new(MockNetwork::new([("w".to_string(), 0.0)])),
            OperatorConfig::new(worker_count),
        )
        .unwrap()
    }

    #[test]
    fn start_once_runs_exactly_one_iteration_then_pauses() {
        let op = new_operator(1, 10);
        op.start_once().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(op.state(), ExecutionState::Paused);
        assert_eq!(op.highest_iteration_number(), 1);
    }

    #[test]
    fn start_runs_until_stopped() {
        let op = new_operator(1, 1_000_000);
        op.start().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        op.signal_stop().unwrap();
        assert!(op.highest_iteration_number() > 0);
    }

    #[test]
    fn pause_then_resume_continues_progress() {
        let op = new_operator(1, 1_000_000);
        op.start().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        op.signal_pause().unwrap();
        let paused_at = op.highest_iteration_number();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(op.highest_iteration_number(), paused_at, "no progress while paused");

        op.signal_resume().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        op.signal_stop().unwrap();
        assert!(op.highest_iteration_number() >= paused_at);
    }

    #[test]
    fn multiple_workers_agree_on_epoch_merges() {
        let op = new_operator(4, 2);
        op.start().unwrap();
        std::thread::sleep(Duration::from_millis(80));
        op.signal_stop().unwrap();
        assert!(op.epoch_number() >= 1);
    }
}
