//! [`Operator`] — owns the global network, the workers, and the hook system, and
//! orchestrates pull/merge/push of worker replicas.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use indexmap::IndexMap;

use crate::collaborators::{ComputationHandler, DataIterator, Network, Optimiser, Trainer};
use crate::config::OperatorConfig;
use crate::error::TrainingError;
use crate::hook::{Hook, HookAction, HookKey};
use crate::hook_table::{HookScope, HookTable};
use crate::merger::NetworkMerger;
use crate::registry::{Registry, RegistryResolver, Value};
use crate::time_step::{TickOutcome, TimeScale, TimeStep};
use crate::worker::{self, ExecutionState, WorkerControl};

pub(crate) type BackgroundJob = Box<dyn FnOnce() + Send>;

/// State shared between the `Operator` and every worker thread — the fields workers must
/// read or mutate through, as opposed to the operator-only lifecycle bookkeeping kept on
/// [`Operator`] itself.
pub(crate) struct Shared {
    pub(crate) handler: Arc<dyn ComputationHandler>,
    pub(crate) trainer: Arc<dyn Trainer>,
    merger: Box<dyn NetworkMerger>,
    global_network: Mutex<Box<dyn Network>>,
    pub(crate) worker_count: usize,
    pub(crate) use_sessions: bool,
    epoch_number: Mutex<u64>,
    highest_iteration_number: Mutex<u64>,
    pushed_epoch_networks: Mutex<HashMap<u64, Vec<Option<Box<dyn Network>>>>>,
    pushed_iteration_numbers: Mutex<HashMap<u64, Vec<Option<u64>>>>,
    pub(crate) local_hooks: Mutex<HookTable>,
    global_hooks: Mutex<HookTable>,
    global_hook_time_steps: Mutex<IndexMap<HookKey, TimeStep>>,
    root_registry: Mutex<Registry>,
    /// The child registry exposed under the standard `shared` key every event, tagged
    /// `shared` in every hook event. Commands persist their completion counters here
    /// since it outlives any single event's transient registry.
    shared_registry: Mutex<Registry>,
    background_sender: mpsc::Sender<BackgroundJob>,
    start_instant: Mutex<Option<Instant>>,
    accumulated_millis: Mutex<u64>,
}

/// Context passed to [`build_event_registry`]; grouped into a struct since most fields
/// are optional and differ between local (per-worker) and global event firings.
struct EventContext<'a> {
    network: Option<&'a dyn Network>,
    optimiser: Option<&'a dyn Optimiser>,
    iterator: Option<&'a dyn DataIterator>,
    trainer: Option<&'a Arc<dyn Trainer>>,
    epoch: u64,
    iteration: u64,
    runtime_millis: u64,
}

/// Populates the standard registry keys for one hook event: `epoch`,
/// `iteration`, `runtime_millis`, `shared`, plus whichever of `network`/`optimiser`/
/// `iterator`/`trainer` apply to this firing (global events have no single worker-local
/// optimiser or iterator, so those two are omitted there).
fn build_event_registry(parent: &Registry, shared_registry: &Registry, ctx: EventContext<'_>) -> Registry {
    let mut registry = Registry::with_parent(Arc::new(parent.clone()));
    registry.set("epoch", Value::I64(ctx.epoch as i64));
    registry.set("iteration", Value::I64(ctx.iteration as i64));
    registry.set("runtime_millis", Value::I64(ctx.runtime_millis as i64));

    let mut shared = shared_registry.clone();
    shared.tag("shared");
    registry.set_child("shared", Arc::new(shared));

    if let Some(network) = ctx.network {
        registry.set_any("network", network.deep_copy());
    }
    if let Some(optimiser) = ctx.optimiser {
        registry.set_any("optimiser", optimiser.shallow_copy());
    }
    if let Some(iterator) = ctx.iterator {
        registry.set_any("iterator", iterator.shallow_copy());
    }
    if let Some(trainer) = ctx.trainer {
        registry.set_any("trainer", trainer.clone());
    }
    registry
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Invokes `key`'s action under `catch_unwind` so a panicking hook can't bring down the
/// worker thread, logging any panic instead.
fn invoke_action(key: &HookKey, action: &dyn HookAction, registry: &Registry) {
    let resolver = RegistryResolver::new(registry);
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        action.invoke(registry, &resolver);
    }));
    if let Err(payload) = result {
        let message = panic_message(payload.as_ref());
        log::error!("hook {key} panicked: {message}");
    }
}

/// Builds the registry snapshot a background bucket sees: the union of its hooks'
/// declared `required_registry_keys`, split into direct keys and resolver patterns
/// — gives background hooks a point-in-time snapshot isolated from concurrent writers.
fn build_background_snapshot(hook_table: &HookTable, bucket: &[HookKey], registry: &Registry) -> Registry {
    let mut direct = Vec::new();
    let mut patterns = Vec::new();
    for key in bucket {
        if let Some(node) = hook_table.get(key) {
            for required_key in &node.required_registry_keys {
                if required_key.contains('*') {
                    patterns.push(required_key.clone());
                } else {
                    direct.push(required_key.clone());
                }
            }
        }
    }
    registry.snapshot(&direct, &patterns)
}

/// The "time-scale event ejection" helper shared by local (worker) and global
/// (operator) paths: ticks every hook attached to `scale`, collects the
/// ones that fire, sorts by invocation index, invokes foreground hooks synchronously
/// and dispatches each background bucket to the background pool with a registry
/// snapshot. `worker_index` is `Some` for a local firing, `None` for a global one —
/// threaded through to [`HookTable::mark_local_dead`] / [`HookTable::mark_global_dead`].
pub(crate) fn fire_event(
    hook_table: &mut HookTable,
    time_steps: &mut IndexMap<HookKey, TimeStep>,
    scale: TimeScale,
    registry: &Registry,
    worker_index: Option<usize>,
    background_sender: &mpsc::Sender<BackgroundJob>,
) -> Vec<HookKey> {
    let candidates = hook_table.hooks_for_scale(scale).to_vec();
    let mut fired = Vec::new();

    for key in &candidates {
        let Some(node) = hook_table.get(key) else {
            continue;
        };
        let step = time_steps
            .entry(key.clone())
            .or_insert_with(|| node.time_step_template.deep_copy());
        if step.tick() == TickOutcome::Fired {
            fired.push(key.clone());
        }
        if step.is_dead() {
            let fully_dead = match worker_index {
                Some(idx) => hook_table.mark_local_dead(key, idx),
                None => {
                    hook_table.mark_global_dead(key);
                    true
                }
            };
            if fully_dead {
                let _ = hook_table.detach(key);
            }
        }
    }

    fired.sort_by_key(|key| hook_table.invocation_index(key).unwrap_or(u32::MAX));

    let mut foreground = Vec::new();
    let mut background_buckets: HashMap<u32, Vec<HookKey>> = HashMap::new();
    for key in &fired {
        match hook_table.invocation_target(key).unwrap_or(0) {
            0 => foreground.push(key.clone()),
            bucket => background_buckets.entry(bucket).or_default().push(key.clone()),
        }
    }

    for key in &foreground {
        if let Some(node) = hook_table.get(key) {
            invoke_action(key, node.action.as_ref(), registry);
        }
    }

    for bucket in background_buckets.into_values() {
        let snapshot = build_background_snapshot(hook_table, &bucket, registry);
        let actions: Vec<(HookKey, Arc<dyn HookAction>)> = bucket
            .iter()
            .filter_map(|key| hook_table.get(key).map(|node| (key.clone(), node.action.clone())))
            .collect();
        let _ = background_sender.send(Box::new(move || {
            for (key, action) in &actions {
                invoke_action(key, action.as_ref(), &snapshot);
            }
        }));
    }

    fired
}

impl Shared {
    /// Copies the global network into the worker's local replica when a pull is due.
    pub(crate) fn pull_progress(&self, local_iteration_number: u64, local_network: &mut Option<Box<dyn Network>>) {
        let needs_pull = (local_iteration_number == 0 && self.worker_count > 1) || local_network.is_none();
        if needs_pull {
            let global = self.global_network.lock().expect("global network lock poisoned");
            *local_network = Some(global.deep_copy());
        }
    }

    pub(crate) fn running_time_millis(&self) -> u64 {
        let accumulated = *self.accumulated_millis.lock().expect("stopwatch lock poisoned");
        let running = self
            .start_instant
            .lock()
            .expect("stopwatch lock poisoned")
            .map(|started| started.elapsed().as_millis() as u64)
            .unwrap_or(0);
        accumulated + running
    }

    pub(crate) fn mark_started(&self) {
        *self.start_instant.lock().expect("stopwatch lock poisoned") = Some(Instant::now());
    }

    /// Folds the time since the last `mark_started` into the accumulated total and
    /// stops the clock, so `running_time_millis` holds steady while paused.
    pub(crate) fn mark_paused(&self) {
        let mut accumulated = self.accumulated_millis.lock().expect("stopwatch lock poisoned");
        if let Some(started) = self.start_instant.lock().expect("stopwatch lock poisoned").take() {
            *accumulated += started.elapsed().as_millis() as u64;
        }
    }

    pub(crate) fn reset_stopwatch(&self) {
        *self.accumulated_millis.lock().expect("stopwatch lock poisoned") = 0;
        *self.start_instant.lock().expect("stopwatch lock poisoned") = None;
    }

    /// Records an epoch-boundary replica push (merging once
    /// every worker has pushed) and an iteration push (firing the global `Iteration`
    /// event once every worker reaches the same local iteration).
    pub(crate) fn push_progress(
        &self,
        worker_index: usize,
        local_epoch_number: u64,
        local_iteration_number: u64,
        local_network: &dyn Network,
    ) -> Result<(), TrainingError> {
        let crossed_epoch_boundary = {
            let epoch_number = self.epoch_number.lock().expect("epoch lock poisoned");
            local_epoch_number > *epoch_number && local_iteration_number == 1
        };

        if crossed_epoch_boundary {
            let replicas = {
                let mut pushed = self.pushed_epoch_networks.lock().expect("pushed-epoch lock poisoned");
                let slot = pushed
                    .entry(local_epoch_number)
                    .or_insert_with(|| (0..self.worker_count).map(|_| None).collect());
                let free_index = slot.iter().position(Option::is_none).ok_or(TrainingError::MergerMismatch {
                    epoch: local_epoch_number,
                    worker_count: self.worker_count,
                })?;
                slot[free_index] = Some(local_network.deep_copy());
                if slot.iter().all(Option::is_some) {
                    let full = pushed.remove(&local_epoch_number).expect("just inserted");
                    Some(full.into_iter().map(|s| s.expect("checked all-some")).collect::<Vec<_>>())
                } else {
                    None
                }
            };

            if let Some(replicas) = replicas {
                {
                    let mut global = self.global_network.lock().expect("global network lock poisoned");
                    self.merger.merge(&mut **global, &replicas, self.handler.as_ref());
                }
                let new_epoch_number = {
                    let mut epoch_number = self.epoch_number.lock().expect("epoch lock poisoned");
                    *epoch_number += 1;
                    *epoch_number
                };
                self.fire_global(
                    TimeScale::Epoch,
                    new_epoch_number,
                    *self.highest_iteration_number.lock().expect("iteration lock poisoned"),
                );
            }
        }

        let crossed_iteration = {
            let mut pushed_iters = self.pushed_iteration_numbers.lock().expect("pushed-iteration lock poisoned");
            let slot = pushed_iters
                .entry(local_epoch_number)
                .or_insert_with(|| (0..self.worker_count).map(|_| None).collect());
            slot[worker_index] = Some(local_iteration_number);
            slot.iter().all(|s| *s == Some(local_iteration_number))
        };

        if crossed_iteration {
            {
                let mut highest = self.highest_iteration_number.lock().expect("iteration lock poisoned");
                *highest = local_iteration_number;
            }
            self.fire_global(
                TimeScale::Iteration,
                *self.epoch_number.lock().expect("epoch lock poisoned"),
                local_iteration_number,
            );
        }

        Ok(())
    }

    pub(crate) fn fire_local(
        &self,
        worker_index: usize,
        scale: TimeScale,
        time_steps: &mut IndexMap<HookKey, TimeStep>,
        network: Option<&dyn Network>,
        optimiser: &dyn Optimiser,
        iterator: &dyn DataIterator,
        epoch: u64,
        iteration: u64,
    ) -> Vec<HookKey> {
        let mut local_hooks = self.local_hooks.lock().expect("local hooks lock poisoned");
        let parent = self.root_registry.lock().expect("root registry lock poisoned");
        let shared_registry = self.shared_registry.lock().expect("shared registry lock poisoned");
        let event_registry = build_event_registry(
            &parent,
            &shared_registry,
            EventContext {
                network,
                optimiser: Some(optimiser),
                iterator: Some(iterator),
                trainer: Some(&self.trainer),
                epoch,
                iteration,
                runtime_millis: self.running_time_millis(),
            },
        );
        drop(parent);
        drop(shared_registry);
        fire_event(
            &mut local_hooks,
            time_steps,
            scale,
            &event_registry,
            Some(worker_index),
            &self.background_sender,
        )
    }

    pub(crate) fn fire_global(&self, scale: TimeScale, epoch: u64, iteration: u64) -> Vec<HookKey> {
        let mut global_hooks = self.global_hooks.lock().expect("global hooks lock poisoned");
        let mut time_steps = self.global_hook_time_steps.lock().expect("global time-step lock poisoned");
        let parent = self.root_registry.lock().expect("root registry lock poisoned");
        let shared_registry = self.shared_registry.lock().expect("shared registry lock poisoned");
        let network_copy = self.global_network.lock().expect("global network lock poisoned").deep_copy();
        let event_registry = build_event_registry(
            &parent,
            &shared_registry,
            EventContext {
                network: Some(&*network_copy),
                optimiser: None,
                iterator: None,
                trainer: Some(&self.trainer),
                epoch,
                iteration,
                runtime_millis: self.running_time_millis(),
            },
        );
        drop(parent);
        drop(shared_registry);
        fire_event(
            &mut global_hooks,
            &mut time_steps,
            scale,
            &event_registry,
            None,
            &self.background_sender,
        )
    }
}

fn spawn_background_pool(receiver: mpsc::Receiver<BackgroundJob>, size: usize) {
    let receiver = Arc::new(Mutex::new(receiver));
    for worker in 0..size {
        let receiver = receiver.clone();
        std::thread::Builder::new()
            .name(format!("training-core-background-{worker}"))
            .spawn(move || loop {
                let job = {
                    let rx = receiver.lock().expect("background pool lock poisoned");
                    rx.recv()
                };
                match job {
                    Ok(job) => job(),
                    Err(_) => break,
                }
            })
            .expect("failed to spawn background pool thread");
    }
}

/// The orchestrator owning the global network, the workers, and the hook system.
pub struct Operator {
    shared: Arc<Shared>,
    workers: Vec<WorkerControl>,
    state: Mutex<ExecutionState>,
    state_changed: Condvar,
    config: OperatorConfig,
}

impl Operator {
    /// Builds an `Operator` whose merger is [`crate::merger::MeanNetworkMerger`] over
    /// `config.merger_pattern`. Use [`Operator::with_merger`] to supply a different
    /// reduction strategy.
    pub fn new(
        handler: Arc<dyn ComputationHandler>,
        trainer: Arc<dyn Trainer>,
        global_network: Box<dyn Network>,
        config: OperatorConfig,
    ) -> Result<Self, TrainingError> {
        let merger = Box::new(crate::merger::MeanNetworkMerger::new(config.merger_pattern.clone()));
        Self::with_merger(handler, trainer, merger, global_network, config)
    }

    /// Builds an `Operator` with a caller-supplied [`NetworkMerger`], for reduction
    /// strategies other than the pattern-driven mean.
    pub fn with_merger(
        handler: Arc<dyn ComputationHandler>,
        trainer: Arc<dyn Trainer>,
        merger: Box<dyn NetworkMerger>,
        global_network: Box<dyn Network>,
        config: OperatorConfig,
    ) -> Result<Self, TrainingError> {
        config.validate()?;

        let (background_sender, background_receiver) = mpsc::channel();
        spawn_background_pool(background_receiver, config.background_pool_size);

        let shared = Arc::new(Shared {
            handler: handler.clone(),
            trainer,
            merger,
            global_network: Mutex::new(global_network),
            worker_count: config.worker_count,
            use_sessions: config.use_sessions,
            epoch_number: Mutex::new(0),
            highest_iteration_number: Mutex::new(0),
            pushed_epoch_networks: Mutex::new(HashMap::new()),
            pushed_iteration_numbers: Mutex::new(HashMap::new()),
            local_hooks: Mutex::new(HookTable::new(HookScope::Local, config.worker_count)),
            global_hooks: Mutex::new(HookTable::new(HookScope::Global, 1)),
            global_hook_time_steps: Mutex::new(IndexMap::new()),
            root_registry: Mutex::new(Registry::new()),
            shared_registry: Mutex::new(Registry::new()),
            background_sender,
            start_instant: Mutex::new(None),
            accumulated_millis: Mutex::new(0),
        });

        let mut workers = Vec::with_capacity(config.worker_count);
        for index in 0..config.worker_count {
            let iterator = shared.trainer.training_data_iterator();
            let optimiser = shared.trainer.optimiser();
            workers.push(worker::spawn(
                index,
                shared.clone(),
                handler.clone(),
                iterator,
                optimiser,
                config.worker_thread_priority,
            ));
        }

        Ok(Self {
            shared,
            workers,
            state: Mutex::new(ExecutionState::None),
            state_changed: Condvar::new(),
            config,
        })
    }

    fn transition(&self, action: &'static str, from: &[ExecutionState], to: ExecutionState) -> Result<ExecutionState, TrainingError> {
        let mut state = self.state.lock().expect("operator state lock poisoned");
        if !from.contains(&state) {
            log::warn!("invalid lifecycle transition: {action} while in state {state:?}");
            return Err(TrainingError::InvalidLifecycleTransition { action, state: *state });
        }
        let previous = *state;
        *state = to;
        self.state_changed.notify_all();
        Ok(previous)
    }

    fn broadcast_worker_state(&self, state: ExecutionState) {
        for worker in &self.workers {
            *worker.state.lock().expect("worker state lock poisoned") = state;
            worker.unparker.unpark();
        }
    }

    pub fn start(&self) -> Result<(), TrainingError> {
        self.transition("start", &[ExecutionState::None, ExecutionState::Stopped], ExecutionState::Running)?;
        self.shared.mark_started();
        self.broadcast_worker_state(ExecutionState::Running);
        self.shared.fire_global(TimeScale::Start, self.epoch_number(), self.highest_iteration_number());
        Ok(())
    }

    /// Each worker performs exactly one unit of work before the operator settles back
    /// into `Paused`, regardless of which state it started from.
    pub fn start_once(&self) -> Result<(), TrainingError> {
        self.transition(
            "start_once",
            &[ExecutionState::None, ExecutionState::Stopped, ExecutionState::Paused],
            ExecutionState::Running,
        )?;
        for worker in &self.workers {
            worker.run_once.store(true, Ordering::SeqCst);
        }
        self.shared.mark_started();
        self.broadcast_worker_state(ExecutionState::Running);
        self.shared.fire_global(TimeScale::Start, self.epoch_number(), self.highest_iteration_number());
        Ok(())
    }

    pub fn signal_pause(&self) -> Result<(), TrainingError> {
        self.transition("signal_pause", &[ExecutionState::Running], ExecutionState::Paused)?;
        self.broadcast_worker_state(ExecutionState::Paused);
        self.shared.mark_paused();
        self.shared.fire_global(TimeScale::Pause, self.epoch_number(), self.highest_iteration_number());
        Ok(())
    }

    pub fn signal_resume(&self) -> Result<(), TrainingError> {
        self.transition("signal_resume", &[ExecutionState::Paused], ExecutionState::Running)?;
        self.shared.mark_started();
        self.broadcast_worker_state(ExecutionState::Running);
        self.shared.fire_global(TimeScale::Resume, self.epoch_number(), self.highest_iteration_number());
        Ok(())
    }

    pub fn signal_stop(&self) -> Result<(), TrainingError> {
        self.transition("signal_stop", &[ExecutionState::Running, ExecutionState::Paused], ExecutionState::Stopped)?;
        self.broadcast_worker_state(ExecutionState::Stopped);
        self.shared.mark_paused();
        self.shared.fire_global(TimeScale::Stop, self.epoch_number(), self.highest_iteration_number());
        Ok(())
    }

    /// Resets counters after a stop so the operator can be started again from scratch.
    pub fn signal_reset(&self) -> Result<(), TrainingError> {
        self.transition("signal_reset", &[ExecutionState::Stopped], ExecutionState::None)?;
        *self.shared.epoch_number.lock().expect("epoch lock poisoned") = 0;
        *self.shared.highest_iteration_number.lock().expect("iteration lock poisoned") = 0;
        self.shared.pushed_epoch_networks.lock().expect("pushed-epoch lock poisoned").clear();
        self.shared.pushed_iteration_numbers.lock().expect("pushed-iteration lock poisoned").clear();
        self.shared.reset_stopwatch();
        self.shared.fire_global(TimeScale::Reset, 0, 0);
        Ok(())
    }

    pub fn wait_for_state_changed(&self) {
        let state = self.state.lock().expect("operator state lock poisoned");
        let _ = self.state_changed.wait(state).expect("condvar wait poisoned");
    }

    pub fn attach_local_hook(&self, hook: Hook) -> Result<bool, TrainingError> {
        self.shared.local_hooks.lock().expect("local hooks lock poisoned").attach(hook)
    }

    pub fn detach_local_hook(&self, key: &HookKey) -> Result<bool, TrainingError> {
        self.shared.local_hooks.lock().expect("local hooks lock poisoned").detach(key)
    }

    pub fn attach_global_hook(&self, hook: Hook) -> Result<bool, TrainingError> {
        self.shared.global_hooks.lock().expect("global hooks lock poisoned").attach(hook)
    }

    pub fn detach_global_hook(&self, key: &HookKey) -> Result<bool, TrainingError> {
        self.shared.global_hooks.lock().expect("global hooks lock poisoned").detach(key)
    }

    /// "Commands": attaches a paired local+global one-shot hook that each invoke
    /// `action`. Every worker fires the local copy once and the operator fires the global
    /// copy once; a shared counter kept in the pair's `parameter_registry` tracks
    /// completions, reaching `worker_count + 1` in the ordinary case, at which point
    /// `on_finish` runs from a synthetic one-shot global hook. Uses a strict
    /// `completions > worker_count` check and logs a warning whenever it fires.
    pub fn invoke_command(
        &self,
        name: impl Into<String>,
        action: impl Fn() + Send + Sync + 'static,
        on_finish: impl Fn() + Send + Sync + 'static,
    ) -> Result<(), TrainingError> {
        let name = name.into();
        let worker_count = self.shared.worker_count;
        let parameter_registry = Arc::new(Mutex::new(Registry::new()));
        let action: Arc<dyn Fn() + Send + Sync> = Arc::new(action);
        let on_finish: Arc<dyn Fn() + Send + Sync> = Arc::new(on_finish);
        let shared = self.shared.clone();
        let local_key = format!("__command_local_{name}");
        let global_key = format!("__command_global_{name}");
        let body_parameter_registry = parameter_registry.clone();

        // Captures only `Clone` state, so this closure is itself `Clone` and can back
        // both the local and the global copy of the hook.
        let body = move |_: &Registry, _: &RegistryResolver<'_>| {
            action();
            let completions = {
                let mut params = body_parameter_registry.lock().expect("command parameter registry lock poisoned");
                let next = params.get_owned("completions").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
                params.set("completions", Value::I64(next));
                next
            };
            if completions as usize > worker_count {
                log::warn!("command {name} completion count {completions} exceeded worker_count {worker_count}");
                attach_one_shot_finish(&shared, &name, on_finish.clone());
            }
        };

        let one_shot = TimeStep::new(TimeScale::Iteration, 1, 1).expect("interval 1, live_time 1 always valid");
        let local_hook = Hook::new(local_key, one_shot.deep_copy(), body.clone()).parameter_registry(parameter_registry.clone());
        let global_hook = Hook::new(global_key, one_shot, body).parameter_registry(parameter_registry);

        self.attach_local_hook(local_hook)?;
        self.attach_global_hook(global_hook)?;
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.shared.worker_count
    }

    pub fn epoch_number(&self) -> u64 {
        *self.shared.epoch_number.lock().expect("epoch lock poisoned")
    }

    pub fn highest_iteration_number(&self) -> u64 {
        *self.shared.highest_iteration_number.lock().expect("iteration lock poisoned")
    }

    pub fn state(&self) -> ExecutionState {
        *self.state.lock().expect("operator state lock poisoned")
    }

    pub fn running_time_millis(&self) -> u64 {
        self.shared.running_time_millis()
    }

    pub fn registry(&self) -> Registry {
        self.shared.root_registry.lock().expect("root registry lock poisoned").clone()
    }

    pub fn network(&self) -> Box<dyn Network> {
        self.shared.global_network.lock().expect("global network lock poisoned").deep_copy()
    }

    pub fn trainer(&self) -> Arc<dyn Trainer> {
        self.shared.trainer.clone()
    }

    pub fn network_merger(&self) -> &dyn NetworkMerger {
        self.shared.merger.as_ref()
    }

    pub fn use_sessions(&self) -> bool {
        self.shared.use_sessions
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }
}

impl Drop for Operator {
    fn drop(&mut self) {
        self.broadcast_worker_state(ExecutionState::Stopped);
        for worker in &mut self.workers {
            if let Some(handle) = worker.join_handle.take() {
                let _ = handle.join();
            }
        }
    }
}

fn attach_one_shot_finish(shared: &Arc<Shared>, name: &str, on_finish: Arc<dyn Fn() + Send + Sync>) {
    let key = format!("__command_finish_{name}");
    let time_step = TimeStep::new(TimeScale::Iteration, 1, 1).expect("interval 1, live_time 1 always valid");
    let hook = Hook::new(key, time_step, move |_: &Registry, _: &RegistryResolver<'_>| {
        on_finish();
    });
    let _ = shared.global_hooks.lock().expect("global hooks lock poisoned").attach(hook);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::collaborators::mock::{MockComputationHandler, MockDataIterator, MockNetwork, MockOptimiser, MockTrainer};

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
    fn fresh_operator_starts_in_none_state() {
        let op = new_operator(1, 3);
        assert_eq!(op.state(), ExecutionState::None);
    }

    #[test]
    fn double_start_is_rejected() {
        let op = new_operator(1, 3);
        op.start().unwrap();
        assert!(op.start().is_err());
        op.signal_stop().unwrap();
    }

    #[test]
    fn pause_before_start_is_rejected() {
        let op = new_operator(1, 3);
        assert!(op.signal_pause().is_err());
    }

    #[test]
    fn default_constructor_merges_over_config_merger_pattern() {
        let op = Operator::new(
            Arc::new(MockComputationHandler),
            Arc::new(MockTrainer::new(Box::new(MockDataIterator::new(1)), Box::new(MockOptimiser::new()))),
            Box::new(MockNetwork::new([("w".to_string(), 0.0)])),
            OperatorConfig::new(2).merger_pattern("layers.w"),
        )
        .unwrap();

        op.shared
            .push_progress(0, 1, 1, &MockNetwork::new([("w".to_string(), 2.0)]))
            .unwrap();
        op.shared
            .push_progress(1, 1, 1, &MockNetwork::new([("w".to_string(), 4.0)]))
            .unwrap();

        let global = op.shared.global_network.lock().unwrap();
        assert_eq!(global.param("w"), Some(3.0));
    }

    #[test]
    fn zero_workers_is_rejected_at_construction() {
        let result = Operator::new(
            Arc::new(MockComputationHandler),
            Arc::new(MockTrainer::new(Box::new(MockDataIterator::new(1)), Box::new(MockOptimiser::new()))),
            Box::new(MockNetwork::new([])),
            OperatorConfig::new(0),
        );
        assert!(result.is_err());
    }
}
