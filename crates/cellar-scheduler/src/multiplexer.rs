//! Event multiplexer: matches bus events against jobs and starts tasks.
//!
//! ## Architecture
//! ```text
//! tree.changes / meta.changes ─┐
//! timer.events ────────────────┼─► Multiplexer ─► TaskHandle + root runnables
//! job.config.events ───────────┘        │                   │
//!                                       │ jobs, dispatchers  ▼
//!                                       │              main queue
//!                                       └──── router ◄──────┘
//!                                               │
//!                                               ▼
//!                                  Dispatcher (one per job) ─► workers
//! ```
//! Task updates flow from every [`TaskHandle`] to the task-state writer.

use cellar_core::config::SchedulerConfig;
use cellar_core::{Clients, JobTriggerEvent, NodeChangeEvent, Result, Subscription};
use cellar_jobs::{
    ActionMessage, Job, JobChangeEvent, JobService, ListJobsRequest, Task, TaskStatus,
    TriggerEvent,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::actions::{ActionEnv, ActionRegistry};
use crate::dispatcher::{Dispatcher, DispatcherStats};
use crate::runnable::{Runnable, Runtime};
use crate::task::TaskHandle;
use crate::writer;

#[derive(Default)]
struct State {
    jobs: HashMap<String, Arc<Job>>,
    dispatchers: HashMap<String, Dispatcher>,
}

pub struct Multiplexer {
    state: RwLock<State>,
    runtime: Arc<Runtime>,
    updates: mpsc::UnboundedSender<Task>,
    default_concurrency: u32,
}

impl Multiplexer {
    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn jobs(&self) -> &Arc<JobService> {
        &self.runtime.env.jobs
    }

    /// Job currently known under `job_id`.
    pub fn job(&self, job_id: &str) -> Option<Arc<Job>> {
        self.read().jobs.get(job_id).cloned()
    }

    pub fn job_count(&self) -> usize {
        self.read().jobs.len()
    }

    pub fn dispatcher_stats(&self, job_id: &str) -> Option<DispatcherStats> {
        self.read().dispatchers.get(job_id).map(Dispatcher::stats)
    }

    // ─── Job changes ──────────────────────────────────────────

    pub fn handle_job_change(&self, event: JobChangeEvent) {
        if let Some(job_id) = event.job_removed {
            let mut state = self.write();
            state.jobs.remove(&job_id);
            if let Some(dispatcher) = state.dispatchers.remove(&job_id) {
                dispatcher.stop();
            }
            tracing::info!("🗑️ Job {job_id} unloaded");
            return;
        }
        let Some(job) = event.job_updated else {
            return;
        };
        let job = Arc::new(job.without_tasks());
        let mut state = self.write();
        if let Some(old) = state.dispatchers.remove(&job.id) {
            old.stop();
            let workers = job.concurrency(self.default_concurrency);
            let replacement = Dispatcher::start(&job.id, workers, self.runtime.clone());
            state.dispatchers.insert(job.id.clone(), replacement);
        }
        tracing::info!("🔄 Job {} loaded: '{}'", job.id, job.label);
        state.jobs.insert(job.id.clone(), job);
    }

    // ─── Triggers ─────────────────────────────────────────────

    pub async fn handle_timer(&self, event: JobTriggerEvent) {
        let job = match self.job(&event.job_id) {
            Some(job) => job,
            None => match self.jobs().get_job(&event.job_id, TaskStatus::Unknown).await {
                Ok(job) => {
                    let job = Arc::new(job);
                    self.write().jobs.insert(job.id.clone(), job.clone());
                    job
                }
                Err(e) => {
                    tracing::warn!("⚠️ Trigger for unknown job {}: {e}", event.job_id);
                    return;
                }
            },
        };
        if job.inactive && !event.run_now {
            tracing::debug!("⏸️ Job {} inactive, scheduled trigger ignored", job.id);
            return;
        }
        self.launch(job, TriggerEvent::Timer(event)).await;
    }

    pub async fn handle_node_change(&self, event: NodeChangeEvent) {
        let name = event.event_name();
        let matching: Vec<Arc<Job>> = self
            .read()
            .jobs
            .values()
            .filter(|j| !j.inactive && j.subscribes_to(&name))
            .cloned()
            .collect();
        for job in matching {
            self.launch(job, TriggerEvent::NodeChange(event.clone())).await;
        }
    }

    /// Create a task of `job` for `event` and queue its root runnables.
    /// A task none of whose root actions applies is persisted as finished.
    pub async fn launch(&self, job: Arc<Job>, event: TriggerEvent) -> Arc<TaskHandle> {
        let task = TaskHandle::new(job.clone(), self.updates.clone());
        let root = ActionMessage::from_event(event);
        let rt = &self.runtime;

        let mut runnables = Vec::new();
        let mut failed = false;
        for action in &job.actions {
            match action
                .expand(&rt.env.clients, root.clone(), rt.selection_buffer)
                .await
            {
                Ok(inputs) => runnables.extend(
                    inputs
                        .into_iter()
                        .map(|input| Runnable::new(action.clone(), task.clone(), input)),
                ),
                Err(e) => {
                    task.fail(&format!("select for {}: {e}", action.id));
                    failed = true;
                }
            }
        }
        if runnables.is_empty() {
            if !failed {
                tracing::debug!("⏭️ Job {}: no root action applies, task {} finished", job.id, task.id());
                task.set_status(TaskStatus::Finished, "nothing to run");
            }
            return task;
        }

        for _ in &runnables {
            task.add_ref();
        }
        task.flush();
        tracing::info!("🚀 Task {} started for job '{}' ({})", task.id(), job.label, job.id);
        for runnable in runnables {
            if let Err(mpsc::error::SendError(r)) = rt.main_queue.send(runnable) {
                r.task.interrupt("scheduler stopped");
                r.task.release();
            }
        }
        task
    }

    // ─── Routing ──────────────────────────────────────────────

    /// Hand `runnable` to its job's dispatcher, creating it on first use.
    pub fn route(&self, runnable: Runnable) {
        let job_id = runnable.job_id().to_string();
        let mut state = self.write();
        let Some(job) = state.jobs.get(&job_id).cloned() else {
            drop(state);
            tracing::warn!("⚠️ Job {job_id} is gone, interrupting task {}", runnable.task.id());
            runnable.task.interrupt("job removed");
            runnable.task.release();
            return;
        };
        let dispatcher = state.dispatchers.entry(job_id).or_insert_with(|| {
            Dispatcher::start(&job.id, job.concurrency(self.default_concurrency), self.runtime.clone())
        });
        if let Err(runnable) = dispatcher.dispatch(runnable) {
            drop(state);
            runnable.task.interrupt("dispatcher stopped");
            runnable.task.release();
        }
    }

    fn stop_dispatchers(&self) {
        let mut state = self.write();
        for (_, dispatcher) in state.dispatchers.drain() {
            dispatcher.stop();
        }
    }
}

/// Running scheduler: the multiplexer and its background loops.
pub struct SchedulerHandle {
    multiplexer: Arc<Multiplexer>,
    loops: Vec<JoinHandle<()>>,
    writer: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn multiplexer(&self) -> &Arc<Multiplexer> {
        &self.multiplexer
    }

    /// Stop listening and routing. Dispatchers drain their queues; the task
    /// writer keeps persisting until the last task handle is gone.
    pub fn shutdown(self) {
        for handle in &self.loops {
            handle.abort();
        }
        self.multiplexer.stop_dispatchers();
        drop(self.writer);
        tracing::info!("👋 Scheduler stopped");
    }
}

/// Start the scheduler: subscribe to the bus, load every job, spawn the
/// router and the task-state writer.
pub async fn start(
    config: &SchedulerConfig,
    jobs: Arc<JobService>,
    clients: Clients,
    registry: Arc<ActionRegistry>,
) -> Result<SchedulerHandle> {
    let broker = jobs.broker().clone();
    let tree_changes = broker.tree_changes.subscribe();
    let meta_changes = broker.meta_changes.subscribe();
    let timer_events = broker.timer_events.subscribe();
    let job_config = broker.job_config.subscribe();

    let (main_tx, mut main_rx) = mpsc::unbounded_channel::<Runnable>();
    let (updates_tx, updates_rx) = mpsc::unbounded_channel::<Task>();
    let writer = writer::spawn(jobs.clone(), updates_rx, config.task_update_buffer);

    let runtime = Arc::new(Runtime {
        registry,
        env: ActionEnv {
            clients,
            jobs: jobs.clone(),
        },
        main_queue: main_tx,
        selection_buffer: config.selection_buffer,
        action_timeout: (config.action_timeout_secs > 0)
            .then(|| Duration::from_secs(config.action_timeout_secs)),
    });
    let multiplexer = Arc::new(Multiplexer {
        state: RwLock::new(State::default()),
        runtime,
        updates: updates_tx,
        default_concurrency: config.default_max_concurrency,
    });

    let loaded: Vec<Job> = jobs.list_jobs(ListJobsRequest::default()).await?.collect().await;
    {
        let mut state = multiplexer.write();
        for job in loaded {
            state.jobs.insert(job.id.clone(), Arc::new(job));
        }
    }
    tracing::info!("📅 Scheduler started with {} jobs", multiplexer.job_count());

    let mut loops = Vec::new();
    loops.push(spawn_node_listener(multiplexer.clone(), tree_changes));
    loops.push(spawn_node_listener(multiplexer.clone(), meta_changes));

    let mux = multiplexer.clone();
    let mut timers = timer_events;
    loops.push(tokio::spawn(async move {
        while let Some(event) = timers.next().await {
            mux.handle_timer(event).await;
        }
    }));

    let mux = multiplexer.clone();
    let mut changes = job_config;
    loops.push(tokio::spawn(async move {
        while let Some(event) = changes.next().await {
            mux.handle_job_change(event);
        }
    }));

    let mux = multiplexer.clone();
    loops.push(tokio::spawn(async move {
        while let Some(runnable) = main_rx.recv().await {
            tracing::debug!("📨 Routing {runnable:?}");
            mux.route(runnable);
        }
    }));

    Ok(SchedulerHandle {
        multiplexer,
        loops,
        writer,
    })
}

fn spawn_node_listener(
    mux: Arc<Multiplexer>,
    mut events: Subscription<NodeChangeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            mux.handle_node_change(event).await;
        }
        tracing::debug!("{} listener stopped", events.topic());
    })
}
