mod common;

use async_trait::async_trait;
use common::*;
use pipeline_runner::engine::{CancellationToken, GateError, Run, SkipReason, StageRecord};
use pipeline_runner::report::{ReportError, ReportSink};
use pipeline_runner::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const LONG: Duration = Duration::from_secs(30);

/// Async action that sleeps, logging start and end
struct SleepAction {
    name: &'static str,
    duration: Duration,
    log: CallLog,
    token: Arc<Mutex<Option<CancellationToken>>>,
}

impl SleepAction {
    fn stage(name: &'static str, duration: Duration, log: &CallLog) -> Stage {
        Stage::new(
            name,
            Arc::new(SleepAction {
                name,
                duration,
                log: log.clone(),
                token: Arc::default(),
            }),
        )
    }
}

#[async_trait]
impl StageAction for SleepAction {
    async fn run(&self, ctx: &mut StageContext) -> Result<ActionStatus, StageError> {
        *self.token.lock().unwrap() = Some(ctx.cancellation().clone());
        self.log.push(format!("{}:start", self.name));
        tokio::time::sleep(self.duration).await;
        self.log.push(format!("{}:end", self.name));
        Ok(ActionStatus::Success)
    }
}

fn checkout_build_deploy(log: &CallLog, build: fn() -> Result<ActionStatus, StageError>) -> Pipeline {
    let checkout_log = log.clone();
    let deploy_log = log.clone();

    Pipeline::new("java-service")
        .stage(Stage::from_fn("Checkout", move |ctx| {
            checkout_log.push("Checkout");
            ctx.env_mut().set("commitId", "abc123");
            Ok(ActionStatus::Success)
        }))
        .stage(recording_stage("Build", log, build))
        .stage(
            Stage::from_fn("Deploy", move |_| {
                deploy_log.push("Deploy");
                Ok(ActionStatus::Success)
            })
            .when(Gate::branch("main")),
        )
}

#[tokio::test]
async fn test_build_failure_halts_before_deploy() {
    let log = CallLog::new();
    let runner = PipelineRunner::new(checkout_build_deploy(&log, fail), options(LONG));

    let run = runner.execute(trigger("main")).await.unwrap();

    assert_eq!(
        run.stage_outcomes(),
        vec![
            StageOutcome::Success,
            StageOutcome::Failure,
            StageOutcome::Skipped(SkipReason::PriorFailure),
        ]
    );
    assert_eq!(run.outcome, Some(Outcome::Failure));
    assert_eq!(run.state, RunState::Failed);
    assert!(!log.contains("Deploy"));
    assert_eq!(run.environment.get("commitId"), Some("abc123"));
    assert_eq!(run.stage("Build").unwrap().error.as_deref(), Some("boom"));
}

#[tokio::test]
async fn test_closed_gate_on_dev_branch() {
    let log = CallLog::new();
    let runner = PipelineRunner::new(checkout_build_deploy(&log, succeed), options(LONG));

    let run = runner.execute(trigger("dev")).await.unwrap();

    assert_eq!(
        run.stage_outcomes(),
        vec![
            StageOutcome::Success,
            StageOutcome::Success,
            StageOutcome::Skipped(SkipReason::GateClosed),
        ]
    );
    assert_eq!(run.state, RunState::Succeeded);
    assert_eq!(log.entries(), vec!["Checkout", "Build"]);

    assert!(run.stage("Build").unwrap().started_at.is_some());
    assert!(run.stage("Deploy").unwrap().started_at.is_none());
}

#[tokio::test]
async fn test_aggregate_is_most_severe_outcome() {
    let log = CallLog::new();
    let pipeline = Pipeline::new("agg")
        .stage(recording_stage("A", &log, succeed))
        .stage(recording_stage("B", &log, unstable))
        .stage(recording_stage("C", &log, fail).when(Gate::branch("release/*")))
        .stage(recording_stage("D", &log, succeed));

    let run = PipelineRunner::new(pipeline, options(LONG))
        .execute(trigger("main"))
        .await
        .unwrap();

    assert_eq!(run.outcome, Some(Outcome::Unstable));
    assert_eq!(run.state, RunState::Unstable);
    assert_eq!(log.entries(), vec!["A", "B", "D"]);
}

#[tokio::test]
async fn test_hooks_run_exactly_once_after_failure() {
    let log = CallLog::new();
    let pipeline = Pipeline::new("hooks")
        .stage(
            recording_stage("A", &log, succeed)
                .post(PostCondition::Success, recording_hook(&log, "A:success"))
                .post(PostCondition::Failure, recording_hook(&log, "A:failure"))
                .post(PostCondition::Always, recording_hook(&log, "A:always")),
        )
        .stage(
            recording_stage("B", &log, fail)
                .post(PostCondition::Failure, recording_hook(&log, "B:failure"))
                .post(PostCondition::Always, recording_hook(&log, "B:always")),
        )
        .stage(
            recording_stage("C", &log, succeed)
                .post(PostCondition::Always, recording_hook(&log, "C:always")),
        )
        .post(PostCondition::Failure, recording_hook(&log, "run:failure"))
        .post(PostCondition::Success, recording_hook(&log, "run:success"))
        .post(PostCondition::Always, recording_hook(&log, "run:always"));

    let run = PipelineRunner::new(pipeline, options(LONG))
        .execute(trigger("main"))
        .await
        .unwrap();

    assert_eq!(
        log.entries(),
        vec![
            "A",
            "A:success",
            "A:always",
            "B",
            "B:failure",
            "B:always",
            "run:failure",
            "run:always",
        ]
    );
    assert!(run.stage("C").unwrap().hooks.is_empty());
    assert_eq!(run.post.len(), 2);
}

#[tokio::test]
async fn test_hook_failure_does_not_change_outcome() {
    let log = CallLog::new();
    let broken = action_fn(|_| Err(StageError::ActionFailed("notify failed".to_string())));
    let panicking = action_fn(|_| panic!("hook exploded"));

    let pipeline = Pipeline::new("hooks")
        .stage(
            recording_stage("Build", &log, succeed)
                .post(PostCondition::Always, broken)
                .post(PostCondition::Always, recording_hook(&log, "after")),
        )
        .post(PostCondition::Always, panicking);

    let run = PipelineRunner::new(pipeline, options(LONG))
        .execute(trigger("main"))
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Succeeded);
    let hooks = &run.stage("Build").unwrap().hooks;
    assert!(!hooks[0].succeeded);
    assert_eq!(hooks[0].error.as_deref(), Some("notify failed"));
    assert!(hooks[1].succeeded);
    assert!(log.contains("after"));
    assert!(run.post[0].error.as_deref().unwrap().contains("hook exploded"));
}

#[tokio::test]
async fn test_skipped_stage_leaves_environment_untouched() {
    let log = CallLog::new();
    let seen = Arc::new(Mutex::new(None));
    let seen_in_stage = seen.clone();

    let pipeline = Pipeline::new("env")
        .stage(
            Stage::from_fn("Skipped", |ctx| {
                ctx.env_mut().set("SKIPPED_RAN", "yes");
                Ok(ActionStatus::Success)
            })
            .when(Gate::branch("release/*")),
        )
        .stage(
            Stage::from_fn("Next", move |ctx| {
                *seen_in_stage.lock().unwrap() = Some(ctx.env().contains("SKIPPED_RAN"));
                Ok(ActionStatus::Success)
            })
            .when(Gate::predicate(|env| Ok(!env.contains("SKIPPED_RAN")))),
        )
        .stage(recording_stage("Last", &log, succeed));

    let run = PipelineRunner::new(pipeline, options(LONG))
        .execute(trigger("main"))
        .await
        .unwrap();

    assert_eq!(
        run.stage_outcomes(),
        vec![
            StageOutcome::Skipped(SkipReason::GateClosed),
            StageOutcome::Success,
            StageOutcome::Success,
        ]
    );
    assert_eq!(*seen.lock().unwrap(), Some(false));
    assert!(!run.environment.contains("SKIPPED_RAN"));
}

#[tokio::test]
async fn test_environment_mutations_flow_forward_only() {
    let observed = CallLog::new();
    let first = observed.clone();
    let second = observed.clone();

    let pipeline = Pipeline::new("env")
        .stage(Stage::from_fn("Build", move |ctx| {
            first.push(format!("build sees {:?}", ctx.env().get("IMAGE_TAG")));
            ctx.env_mut().set("IMAGE_TAG", "orders:1");
            Ok(ActionStatus::Success)
        }))
        .stage(
            Stage::from_fn("Push", move |ctx| {
                second.push(format!("push sees {:?}", ctx.env().get("IMAGE_TAG")));
                ctx.env_mut().set("IMAGE_TAG", "orders:2");
                Ok(ActionStatus::Success)
            })
            .when(Gate::expression("${{ env.IMAGE_TAG }} == 'orders:1'")),
        );

    let run = PipelineRunner::new(pipeline, options(LONG))
        .execute(trigger("main"))
        .await
        .unwrap();

    assert_eq!(
        observed.entries(),
        vec!["build sees None", "push sees Some(\"orders:1\")"]
    );
    assert_eq!(run.environment.get("IMAGE_TAG"), Some("orders:2"));
}

#[tokio::test]
async fn test_deadline_aborts_running_stage() {
    let log = CallLog::new();
    let token = Arc::new(Mutex::new(None));
    let build = Stage::new(
        "Build",
        Arc::new(SleepAction {
            name: "Build",
            duration: Duration::from_secs(10),
            log: log.clone(),
            token: token.clone(),
        }),
    )
    .post(PostCondition::Aborted, recording_hook(&log, "Build:aborted"))
    .post(PostCondition::Always, recording_hook(&log, "Build:always"));

    let pipeline = Pipeline::new("slow")
        .stage(build)
        .stage(recording_stage("Deploy", &log, succeed))
        .post(PostCondition::Aborted, recording_hook(&log, "run:aborted"));

    let started = std::time::Instant::now();
    let run = PipelineRunner::new(pipeline, options(Duration::from_millis(100)))
        .execute(trigger("main"))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(run.state, RunState::Aborted);
    assert_eq!(
        run.stage_outcomes(),
        vec![
            StageOutcome::Aborted,
            StageOutcome::Skipped(SkipReason::PriorAbort),
        ]
    );
    assert_eq!(
        log.entries(),
        vec!["Build:start", "Build:aborted", "Build:always", "run:aborted"]
    );

    let token = token.lock().unwrap().clone().unwrap();
    assert!(token.is_cancelled());
    assert!(token.reason().unwrap().contains("deadline"));
}

#[tokio::test]
async fn test_blocking_action_past_deadline_is_aborted() {
    let log = CallLog::new();
    let pipeline = Pipeline::new("blocking")
        .stage(Stage::from_fn("Build", |_| {
            std::thread::sleep(Duration::from_millis(250));
            Ok(ActionStatus::Success)
        }))
        .stage(recording_stage("Deploy", &log, succeed));

    let run = PipelineRunner::new(pipeline, options(Duration::from_millis(50)))
        .execute(trigger("main"))
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Aborted);
    assert_eq!(run.stages[0].outcome, StageOutcome::Aborted);
    assert!(!log.contains("Deploy"));
}

#[tokio::test]
async fn test_elapsed_deadline_aborts_without_running_action() {
    let log = CallLog::new();
    let pipeline = Pipeline::new("expired").stage(
        recording_stage("Build", &log, succeed)
            .post(PostCondition::Aborted, recording_hook(&log, "Build:aborted")),
    );

    let run = PipelineRunner::new(pipeline, options(Duration::ZERO))
        .execute(trigger("main"))
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Aborted);
    assert_eq!(log.entries(), vec!["Build:aborted"]);
}

#[tokio::test]
async fn test_panicking_stage_is_failure() {
    let log = CallLog::new();
    let pipeline = Pipeline::new("panic")
        .stage(Stage::from_fn("Build", |_| panic!("compiler crashed")))
        .stage(recording_stage("Test", &log, succeed));

    let run = PipelineRunner::new(pipeline, options(LONG))
        .execute(trigger("main"))
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Failed);
    let error = run.stages[0].error.as_deref().unwrap();
    assert!(error.contains("compiler crashed"));
    assert!(!log.contains("Test"));
}

#[tokio::test]
async fn test_gate_error_is_hard_failure() {
    let log = CallLog::new();
    let pipeline = Pipeline::new("gates")
        .stage(
            recording_stage("Deploy", &log, succeed)
                .when(Gate::predicate(|_| {
                    Err(GateError::MissingKey("DEPLOY_TARGET".to_string()))
                }))
                .post(PostCondition::Failure, recording_hook(&log, "Deploy:failure")),
        )
        .stage(recording_stage("Notify", &log, succeed));

    let run = PipelineRunner::new(pipeline, options(LONG))
        .execute(trigger("main"))
        .await
        .unwrap();

    assert_eq!(
        run.stage_outcomes(),
        vec![
            StageOutcome::Failure,
            StageOutcome::Skipped(SkipReason::PriorFailure),
        ]
    );
    assert_eq!(log.entries(), vec!["Deploy:failure"]);
    assert!(run.stages[0]
        .error
        .as_deref()
        .unwrap()
        .contains("DEPLOY_TARGET"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_triggers_are_queued() {
    let log = CallLog::new();
    let pipeline = Pipeline::new("serial").stage(SleepAction::stage(
        "Build",
        Duration::from_millis(200),
        &log,
    ));
    let runner = Arc::new(PipelineRunner::new(pipeline, options(LONG)));

    let first = tokio::spawn({
        let runner = runner.clone();
        async move { runner.execute(trigger("main")).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = tokio::spawn({
        let runner = runner.clone();
        async move { runner.execute(trigger("main")).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runner.queued(), 1);

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_eq!(first.number, 1);
    assert_eq!(second.number, 2);
    assert!(second.started_at.unwrap() >= first.finished_at.unwrap());
    assert_eq!(
        log.entries(),
        vec!["Build:start", "Build:end", "Build:start", "Build:end"]
    );
    assert_eq!(runner.queued(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abandoned_queued_trigger_leaves_queue() {
    let log = CallLog::new();
    let pipeline = Pipeline::new("serial").stage(SleepAction::stage(
        "Build",
        Duration::from_millis(300),
        &log,
    ));
    let runner = Arc::new(PipelineRunner::new(pipeline, options(LONG)));

    let first = tokio::spawn({
        let runner = runner.clone();
        async move { runner.execute(trigger("main")).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let waited = tokio::time::timeout(
        Duration::from_millis(50),
        runner.execute(trigger("main")),
    )
    .await;
    assert_err!(waited);
    assert_eq!(runner.queued(), 0);

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.state, RunState::Succeeded);
    assert_eq!(runner.history().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_allow_concurrent_runs_overlap() {
    let log = CallLog::new();
    let pipeline = Pipeline::new("parallel").stage(SleepAction::stage(
        "Build",
        Duration::from_millis(200),
        &log,
    ));
    let mut opts = options(LONG);
    opts.allow_concurrent = true;
    let runner = Arc::new(PipelineRunner::new(pipeline, opts));

    let (a, b) = tokio::join!(runner.execute(trigger("main")), runner.execute(trigger("dev")));
    assert_ok!(a);
    assert_ok!(b);

    let entries = log.entries();
    assert_eq!(&entries[..2], &["Build:start", "Build:start"]);
}

#[tokio::test]
async fn test_history_is_bounded() {
    let log = CallLog::new();
    let pipeline = Pipeline::new("history").stage(recording_stage("Build", &log, succeed));
    let mut opts = options(LONG);
    opts.max_history_runs = 2;
    let runner = PipelineRunner::new(pipeline, opts);

    for _ in 0..3 {
        assert_ok!(runner.execute(trigger("main")).await);
    }

    let numbers: Vec<u64> = runner.history().await.iter().map(|r| r.number).collect();
    assert_eq!(numbers, vec![2, 3]);
    assert_eq!(runner.last_run().await.map(|r| r.number), Some(3));
}

#[tokio::test]
async fn test_empty_stage_list_is_rejected() {
    let runner = PipelineRunner::new(Pipeline::new("empty"), options(LONG));
    assert_err!(runner.execute(trigger("main")).await);
    assert!(runner.history().await.is_empty());
}

#[derive(Default)]
struct MemorySink {
    stages: Mutex<Vec<String>>,
    runs: Mutex<Vec<RunState>>,
}

#[async_trait]
impl ReportSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn stage_completed(&self, _run_id: &str, record: &StageRecord) {
        self.stages
            .lock()
            .unwrap()
            .push(format!("{}={}", record.name, record.outcome));
    }

    async fn run_completed(&self, run: &Run) -> Result<(), ReportError> {
        self.runs.lock().unwrap().push(run.state);
        Ok(())
    }
}

struct BrokenSink;

#[async_trait]
impl ReportSink for BrokenSink {
    fn name(&self) -> &str {
        "broken"
    }

    async fn run_completed(&self, _run: &Run) -> Result<(), ReportError> {
        Err(ReportError::Io(std::io::Error::other("disk full")))
    }
}

#[tokio::test]
async fn test_report_sinks_receive_records() {
    let log = CallLog::new();
    let sink = Arc::new(MemorySink::default());
    let pipeline = Pipeline::new("reports")
        .stage(recording_stage("Build", &log, succeed))
        .stage(recording_stage("Test", &log, unstable));

    let run = PipelineRunner::new(pipeline, options(LONG))
        .with_sink(Arc::new(BrokenSink))
        .with_sink(sink.clone())
        .execute(trigger("main"))
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Unstable);
    assert_eq!(
        *sink.stages.lock().unwrap(),
        vec!["Build=SUCCESS".to_string(), "Test=UNSTABLE".to_string()]
    );
    assert_eq!(*sink.runs.lock().unwrap(), vec![RunState::Unstable]);
}

#[tokio::test]
async fn test_free_execute() {
    let log = CallLog::new();
    let run = pipeline_runner::execute(
        vec![recording_stage("Build", &log, succeed)],
        options(LONG),
        trigger("main"),
    )
    .await
    .unwrap();

    assert!(run.is_terminal());
    assert_eq!(run.state, RunState::Succeeded);
}
