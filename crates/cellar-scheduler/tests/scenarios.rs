//! End-to-end scheduler behaviour against an in-memory store and tree.

use async_trait::async_trait;
use cellar_core::config::SchedulerConfig;
use cellar_core::{
    CellarError, Clients, JobTriggerEvent, MemoryTree, MemoryUsers, Node, NodeChangeEvent, Result,
};
use cellar_jobs::{
    Action, ActionMessage, ActionOutput, Broker, Job, JobService, JobStore, NodeMatch, NodesFilter,
    NodesSelector, Query, SourceFilter, SourceMatch, Task, TaskStatus,
};
use cellar_scheduler::{ActionEnv, ActionRegistry, ConcreteAction, RunContext, SchedulerHandle};
use futures::StreamExt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[derive(Clone)]
enum Behaviour {
    Succeed,
    Ignore,
    Fail,
    Panic,
    Record(Arc<Mutex<Vec<ActionMessage>>>),
    Sleep(u64, Arc<Gauge>),
}

struct TestAction {
    name: &'static str,
    behaviour: Behaviour,
}

#[async_trait]
impl ConcreteAction for TestAction {
    fn name(&self) -> &str {
        self.name
    }

    fn init(&mut self, _env: &ActionEnv, _job: &Job, _action: &Action) -> Result<()> {
        Ok(())
    }

    async fn run(&self, _ctx: &RunContext, input: &ActionMessage) -> Result<ActionMessage> {
        match &self.behaviour {
            Behaviour::Succeed => {}
            Behaviour::Ignore => return Ok(input.clone().with_ignore()),
            Behaviour::Fail => return Err(CellarError::internal("always fails")),
            Behaviour::Panic => panic!("kaboom"),
            Behaviour::Record(seen) => seen.lock().unwrap().push(input.clone()),
            Behaviour::Sleep(ms, gauge) => {
                let now = gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
                gauge.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                gauge.current.fetch_sub(1, Ordering::SeqCst);
            }
        }
        Ok(input.clone().with_output(ActionOutput::success()))
    }
}

struct Harness {
    jobs: Arc<JobService>,
    scheduler: SchedulerHandle,
    seen: Arc<Mutex<Vec<ActionMessage>>>,
    gauge: Arc<Gauge>,
}

fn register(registry: &mut ActionRegistry, name: &'static str, behaviour: Behaviour) {
    registry.register(name, move || {
        Box::new(TestAction {
            name,
            behaviour: behaviour.clone(),
        })
    });
}

impl Harness {
    async fn start(tree: MemoryTree) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let gauge = Arc::new(Gauge::default());

        let mut registry = ActionRegistry::new();
        register(&mut registry, "noop", Behaviour::Succeed);
        register(&mut registry, "ignore", Behaviour::Ignore);
        register(&mut registry, "fail", Behaviour::Fail);
        register(&mut registry, "panic", Behaviour::Panic);
        register(&mut registry, "record", Behaviour::Record(seen.clone()));
        register(&mut registry, "sleep-200ms", Behaviour::Sleep(200, gauge.clone()));
        register(&mut registry, "sleep-500ms", Behaviour::Sleep(500, gauge.clone()));

        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let jobs = Arc::new(JobService::new(store, Arc::new(Broker::new(256))));
        let clients = Clients::new(Arc::new(tree), Arc::new(MemoryUsers::new()));
        let scheduler = cellar_scheduler::start(
            &SchedulerConfig::default(),
            jobs.clone(),
            clients,
            Arc::new(registry),
        )
        .await
        .unwrap();

        Self {
            jobs,
            scheduler,
            seen,
            gauge,
        }
    }

    fn broker(&self) -> &Broker {
        self.jobs.broker()
    }

    /// Save `job` and wait until the scheduler knows this version of it.
    async fn put_job(&self, job: Job) {
        let expected = job.without_tasks();
        self.jobs.put_job(job).await.unwrap();
        let mux = self.scheduler.multiplexer().clone();
        eventually("job loaded", || {
            let mux = mux.clone();
            let expected = expected.clone();
            async move { mux.job(&expected.id).is_some_and(|j| *j == expected) }
        })
        .await;
    }

    fn run_now(&self, job_id: &str) {
        self.broker().timer_events.publish(JobTriggerEvent::run_now(job_id));
    }

    async fn tasks(&self, job_id: &str) -> Vec<Task> {
        self.jobs
            .list_tasks(job_id, TaskStatus::Any)
            .await
            .unwrap()
            .collect()
            .await
    }

    /// Wait until `count` tasks of `job_id` have ended with no pending action.
    async fn ended(&self, job_id: &str, count: usize) -> Vec<Task> {
        let deadline = Instant::now() + Duration::from_secs(15);
        loop {
            let tasks = self.tasks(job_id).await;
            let done: Vec<Task> = tasks
                .into_iter()
                .filter(|t| t.status.is_terminal() && t.rc == 0)
                .collect();
            if done.len() >= count {
                return done;
            }
            assert!(Instant::now() < deadline, "timed out waiting for {count} tasks of {job_id}");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(15);
    while !check().await {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_auto_start_round_trip() {
    let h = Harness::start(MemoryTree::new()).await;
    let mut job = Job::new("auto", "Auto").with_action(Action::new("noop"));
    job.auto_start = true;
    h.jobs.put_job(job).await.unwrap();

    let done = h.ended("auto", 1).await;
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].status, TaskStatus::Finished);
    assert_eq!(done[0].rc, 0);
    assert_eq!(done[0].action_logs.len(), 1);
    assert!(done[0].start_time > 0 && done[0].end_time >= done[0].start_time);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_node_change_fan_out() {
    let h = Harness::start(MemoryTree::with_nodes([Node::leaf("/a", 1)])).await;
    let job = Job::new("j1", "Fan out").with_event("NODE_CHANGE:0").with_action(
        Action::new("record").with_nodes_selector(NodesSelector::paths(&["/a", "/b", "/c"])),
    );
    h.put_job(job).await;

    h.broker()
        .tree_changes
        .publish(NodeChangeEvent::created(Node::from_path("/a")));
    let done = h.ended("j1", 1).await;
    assert_eq!(done[0].status, TaskStatus::Finished);

    let seen = h.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);
    let mut paths: Vec<String> = seen
        .iter()
        .map(|m| {
            assert_eq!(m.nodes.len(), 1);
            m.nodes[0].path.clone()
        })
        .collect();
    paths.sort();
    assert_eq!(paths, vec!["/a", "/b", "/c"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_selector_and_filter_compose() {
    let tree = MemoryTree::with_nodes([Node::leaf("/a", 100), Node::leaf("/b", 10)]);
    let h = Harness::start(tree).await;
    let job = Job::new("sf", "Big files").with_action(
        Action::new("record")
            .with_nodes_selector(NodesSelector::paths(&["/a", "/b"]))
            .with_nodes_filter(NodesFilter::new(Query::single(NodeMatch::min_size(50)))),
    );
    h.put_job(job).await;
    h.run_now("sf");
    h.ended("sf", 1).await;

    let seen = h.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].nodes, vec![Node::leaf("/a", 100)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_cap() {
    let h = Harness::start(MemoryTree::new()).await;
    let job = Job::new("cap", "Capped")
        .with_max_concurrency(2)
        .with_action(Action::new("sleep-200ms"));
    h.put_job(job).await;

    let started = Instant::now();
    for _ in 0..10 {
        h.run_now("cap");
    }
    let done = h.ended("cap", 10).await;
    assert_eq!(done.len(), 10);
    assert!(done.iter().all(|t| t.status == TaskStatus::Finished));
    assert_eq!(h.gauge.peak.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() >= Duration::from_millis(1000));

    let stats = h.scheduler.multiplexer().dispatcher_stats("cap").unwrap();
    assert_eq!(stats.workers, 2);
    assert!(stats.peak_busy <= 2);
    assert_eq!(stats.dispatched, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_isolation() {
    let h = Harness::start(MemoryTree::new()).await;
    let mut succeed = Action::new("noop");
    succeed.label = "C".into();
    let job = Job::new("iso", "Isolation").with_action(
        Action::new("noop")
            .chain(Action::new("fail"))
            .chain(succeed),
    );
    h.put_job(job).await;
    h.run_now("iso");

    let done = h.ended("iso", 1).await;
    let task = &done[0];
    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(task.action_logs.len(), 3);

    let c = task
        .action_logs
        .iter()
        .find(|l| l.action.label == "C")
        .expect("log of C");
    assert!(c.output.last_output().unwrap().success);

    let b = task
        .action_logs
        .iter()
        .find(|l| l.action.id == "fail")
        .expect("log of B");
    let failure = b.output.last_output().unwrap();
    assert!(!failure.success);
    assert!(failure.error_string.contains("always fails"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_job_replacement() {
    let h = Harness::start(MemoryTree::new()).await;
    let job = Job::new("r", "Replace")
        .with_max_concurrency(1)
        .with_action(Action::new("sleep-500ms"));
    h.put_job(job.clone()).await;
    h.run_now("r");

    let gauge = h.gauge.clone();
    eventually("first task running", || {
        let gauge = gauge.clone();
        async move { gauge.current.load(Ordering::SeqCst) == 1 }
    })
    .await;
    assert_eq!(h.scheduler.multiplexer().dispatcher_stats("r").unwrap().workers, 1);

    h.put_job(job.with_max_concurrency(5)).await;
    assert_eq!(h.scheduler.multiplexer().dispatcher_stats("r").unwrap().workers, 5);

    let first = h.ended("r", 1).await;
    assert_eq!(first[0].status, TaskStatus::Finished);

    h.gauge.peak.store(0, Ordering::SeqCst);
    for _ in 0..5 {
        h.run_now("r");
    }
    let done = h.ended("r", 6).await;
    assert!(done.iter().all(|t| t.status == TaskStatus::Finished));
    assert_eq!(h.gauge.peak.load(Ordering::SeqCst), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panic_recovered_and_worker_survives() {
    let h = Harness::start(MemoryTree::new()).await;
    let job = Job::new("p", "Panics")
        .with_max_concurrency(1)
        .with_action(Action::new("panic"))
        .with_action(Action::new("record"));
    h.put_job(job).await;
    h.run_now("p");

    let done = h.ended("p", 1).await;
    assert_eq!(done[0].status, TaskStatus::Error);
    assert!(done[0].status_message.contains("kaboom"));
    assert_eq!(h.seen.lock().unwrap().len(), 1);

    let log = done[0]
        .action_logs
        .iter()
        .find(|l| l.action.id == "panic")
        .expect("log of the panicking action");
    let failure = log.output.last_output().unwrap();
    assert!(!failure.success);
    assert!(failure.error_string.contains("kaboom"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_worker_runs_chains() {
    let h = Harness::start(MemoryTree::new()).await;
    let job = Job::new("one", "Single worker")
        .with_max_concurrency(1)
        .with_action(
            Action::new("noop")
                .chain(Action::new("noop").chain(Action::new("record")))
                .chain(Action::new("record")),
        );
    h.put_job(job).await;
    h.run_now("one");

    let done = h.ended("one", 1).await;
    assert_eq!(done[0].status, TaskStatus::Finished);
    assert_eq!(done[0].action_logs.len(), 4);
    let seen = h.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|m| !m.output_chain.is_empty()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_inactive_job_runs_only_on_demand() {
    let h = Harness::start(MemoryTree::new()).await;
    let mut job = Job::new("idle", "Inactive")
        .with_event("NODE_CHANGE:0")
        .with_action(Action::new("noop"));
    job.inactive = true;
    h.put_job(job).await;

    h.broker()
        .tree_changes
        .publish(NodeChangeEvent::created(Node::from_path("/x")));
    h.broker().timer_events.publish(JobTriggerEvent::scheduled(
        "idle",
        serde_json::json!({"every": "1m"}),
    ));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h.tasks("idle").await.is_empty());

    h.run_now("idle");
    let done = h.ended("idle", 1).await;
    assert_eq!(done[0].status, TaskStatus::Finished);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_action_fails_task() {
    let h = Harness::start(MemoryTree::new()).await;
    h.put_job(Job::new("u", "Unknown").with_action(Action::new("does.not.exist")))
        .await;
    h.run_now("u");
    let done = h.ended("u", 1).await;
    assert_eq!(done[0].status, TaskStatus::Error);
    let log = &done[0].action_logs[0];
    assert!(!log.output.last_output().unwrap().success);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_removed_job_is_unloaded() {
    let h = Harness::start(MemoryTree::new()).await;
    h.put_job(Job::new("gone", "Gone").with_action(Action::new("noop")))
        .await;
    h.jobs.delete_job("gone").await.unwrap();

    let mux = h.scheduler.multiplexer().clone();
    eventually("job unloaded", || {
        let mux = mux.clone();
        async move { mux.job("gone").is_none() }
    })
    .await;
    assert!(mux.dispatcher_stats("gone").is_none());

    h.scheduler.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_empty_selection_still_finishes_task() {
    let h = Harness::start(MemoryTree::with_nodes([Node::leaf("/a.txt", 1)])).await;
    let job = Job::new("none", "Nothing selected").with_action(
        Action::new("record")
            .with_nodes_selector(NodesSelector::query(Query::single(NodeMatch::extension("mp4"))).collect()),
    );
    h.put_job(job).await;
    h.run_now("none");

    let done = h.ended("none", 1).await;
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].status, TaskStatus::Finished);
    assert_eq!(done[0].rc, 0);
    assert!(done[0].action_logs.is_empty());
    assert!(h.seen.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ignored_output_keeps_chain_running() {
    let h = Harness::start(MemoryTree::new()).await;
    h.put_job(Job::new("ign", "Ignored").with_action(Action::new("ignore").chain(Action::new("record"))))
        .await;
    h.run_now("ign");

    let done = h.ended("ign", 1).await;
    assert_eq!(done[0].status, TaskStatus::Finished);
    assert_eq!(done[0].action_logs.len(), 2);
    let first = done[0]
        .action_logs
        .iter()
        .find(|l| l.action.id == "ignore")
        .expect("log of the ignoring action");
    assert!(first.output.last_output().unwrap().ignored);

    let seen = h.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].last_output().unwrap().ignored);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_chained_selector_error_fails_task() {
    let h = Harness::start(MemoryTree::new()).await;
    let job = Job::new("badsel", "Bad selector").with_action(
        Action::new("noop").chain(Action::new("record").with_nodes_selector(NodesSelector::default())),
    );
    h.put_job(job).await;
    h.run_now("badsel");

    let done = h.ended("badsel", 1).await;
    assert_eq!(done[0].status, TaskStatus::Error);
    assert!(done[0].status_message.contains("select for record"));
    assert_eq!(done[0].action_logs.len(), 1);
    assert!(h.seen.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_meta_change_starts_task() {
    let h = Harness::start(MemoryTree::new()).await;
    h.put_job(
        Job::new("meta", "Metadata")
            .with_event("NODE_CHANGE:0")
            .with_action(Action::new("record")),
    )
    .await;

    h.broker()
        .meta_changes
        .publish(NodeChangeEvent::created(Node::from_path("/tagged.jpg")));
    let done = h.ended("meta", 1).await;
    assert_eq!(done[0].status, TaskStatus::Finished);
    let seen = h.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].nodes[0].path, "/tagged.jpg");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_source_filter_skips_branch() {
    let h = Harness::start(MemoryTree::new()).await;
    let curl_only = SourceFilter::new(Query::single(SourceMatch {
        user_agent: "curl*".into(),
        ..Default::default()
    }));
    let job = Job::new("src", "Source filtered")
        .with_event("NODE_CHANGE:0")
        .with_action(Action::new("record").with_source_filter(curl_only))
        .with_action(Action::new("noop"));
    h.put_job(job).await;

    h.broker().tree_changes.publish(
        NodeChangeEvent::created(Node::from_path("/upload.txt"))
            .with_metadata(cellar_core::events::metadata::USER_AGENT, "firefox/120"),
    );
    let done = h.ended("src", 1).await;
    assert_eq!(done[0].status, TaskStatus::Finished);
    assert_eq!(done[0].action_logs.len(), 1);
    assert_eq!(done[0].action_logs[0].action.id, "noop");
    assert!(h.seen.lock().unwrap().is_empty());
}
