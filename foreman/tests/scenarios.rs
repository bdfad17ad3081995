//! End-to-end tick scenarios against a real git repository.
//!
//! Agents are never started: `FakeRuntime` records provisioning and reports
//! every session alive unless told otherwise.

use chrono::{TimeDelta, Utc};
use serde_json::json;

use foreman::admission::can_spawn_worker;
use foreman::core::admission::{Admission, Denial};
use foreman::core::readiness::find_ready;
use foreman::core::types::{AgentRole, AgentStatus, Event, EventKind, MessageKind, TaskStatus};
use foreman::inbox::process_inbox;
use foreman::io::config::ForemanConfig;
use foreman::io::task_store::NewTask;
use foreman::io::vcs::{GitVcs, VersionControl};
use foreman::liveness::{check_liveness, check_stalls};
use foreman::merge::drain_merge_queue;
use foreman::project::FOREMAN_INBOX;
use foreman::scheduler::Scheduler;
use foreman::shutdown::ShutdownFlag;
use foreman::test_support::{FakeRuntime, TestProject, commit_in};
use foreman::tick::TickEvents;

fn kinds_for(events: &[Event], task: &str) -> Vec<EventKind> {
    events
        .iter()
        .filter(|event| event.task.as_deref() == Some(task))
        .map(|event| event.kind)
        .collect()
}

/// A: one tick assigns a dependency-free task and records the event pair.
#[test]
fn tick_assigns_ready_task_to_new_worker() {
    let tp = TestProject::new().expect("project");
    let task = tp
        .project()
        .tasks
        .create(NewTask::titled("add greeting"))
        .expect("create");
    let scheduler = Scheduler::new(tp.project().clone(), FakeRuntime::new(), tp.vcs());

    let report = scheduler.tick().expect("tick");
    assert_eq!(report.assign.assigned, vec![task.id.clone()]);

    let task = tp.project().tasks.get(&task.id).expect("get");
    assert_eq!(task.status, TaskStatus::Assigned);
    let agent_id = task.assigned_to.clone().expect("assigned agent");
    assert!(!agent_id.is_empty());
    assert_eq!(task.branch.as_deref(), Some("foreman/task-0001"));

    let agent = tp.project().agents.get(&agent_id).expect("agent");
    assert_eq!(agent.role, AgentRole::Worker);
    assert_eq!(agent.status, AgentStatus::Active);
    assert!(agent.worktree.as_deref().expect("worktree").is_dir());
    assert!(tp.vcs().branch_exists("foreman/task-0001").expect("branch"));

    let events = tp.project().events.read_all().expect("events");
    let kinds = kinds_for(&events, &task.id);
    assert!(kinds.contains(&EventKind::TaskAssigned), "{kinds:?}");
    assert!(kinds.contains(&EventKind::AgentSpawned), "{kinds:?}");

    let calls = scheduler.runtime().provisioned();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].task_id.as_deref(), Some(task.id.as_str()));
    assert!(calls[0].brief_path.is_file());
}

#[test]
fn provisioning_failure_leaves_task_open_and_cleans_up() {
    let tp = TestProject::new().expect("project");
    let task = tp
        .project()
        .tasks
        .create(NewTask::titled("doomed"))
        .expect("create");
    let runtime = FakeRuntime::new();
    runtime.fail_provisioning(true);
    let scheduler = Scheduler::new(tp.project().clone(), runtime, tp.vcs());

    let report = scheduler.tick().expect("tick");
    assert!(report.assign.assigned.is_empty());
    assert_eq!(report.assign.skipped, 1);

    let task = tp.project().tasks.get(&task.id).expect("get");
    assert_eq!(task.status, TaskStatus::Open);
    assert!(tp.project().agents.list().expect("agents").is_empty());
    assert!(!tp.vcs().branch_exists("foreman/task-0001").expect("branch"));
    assert!(!tp.project().paths.worktree("worker-1").exists());
}

/// B: a `task_done` message completes the task and queues exactly one merge.
#[test]
fn task_done_message_queues_branch_for_merge() {
    let tp = TestProject::new().expect("project");
    let task = tp
        .project()
        .tasks
        .create(NewTask::titled("write docs"))
        .expect("create");
    let scheduler = Scheduler::new(tp.project().clone(), FakeRuntime::new(), tp.vcs());
    scheduler.tick().expect("assign tick");
    let assigned = tp.project().tasks.get(&task.id).expect("get");
    let agent_id = assigned.assigned_to.clone().expect("agent");
    let branch = assigned.branch.clone().expect("branch");

    tp.project()
        .messages
        .send(
            MessageKind::TaskDone,
            &agent_id,
            FOREMAN_INBOX,
            Some(&task.id),
            json!({ "result": "docs written" }),
        )
        .expect("send");

    let config = tp.config().expect("config");
    let vcs = tp.vcs();
    let shutdown = ShutdownFlag::new();
    let ctx = tp.context(&config, scheduler.runtime(), &vcs, &shutdown);
    let mut events = TickEvents::new();
    let report = process_inbox(&ctx, &mut events).expect("inbox");
    assert_eq!(report.handled, 1);

    let done = tp.project().tasks.get(&task.id).expect("get");
    assert_eq!(done.status, TaskStatus::Done);
    assert_eq!(done.result.as_deref(), Some("docs written"));

    let queue = tp.project().queue.list().expect("queue");
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].task_id, task.id);
    assert_eq!(queue[0].branch, branch);

    let agent = tp.project().agents.get(&agent_id).expect("agent");
    assert_eq!(agent.status, AgentStatus::Idle);
    assert!(tp.project().messages.list_pending(FOREMAN_INBOX).expect("inbox").is_empty());
    assert_eq!(kinds_for(events.as_slice(), &task.id), vec![EventKind::TaskDone]);
}

/// C: two branches editing the same file; one merges, the other conflicts,
/// and the trunk checkout is left clean.
#[test]
fn conflicting_branches_merge_once_and_conflict_once() {
    let tp = TestProject::new().expect("project");
    let first = tp
        .project()
        .tasks
        .create(NewTask::titled("first"))
        .expect("create");
    let second = tp
        .project()
        .tasks
        .create(NewTask::titled("second"))
        .expect("create");
    let scheduler = Scheduler::new(tp.project().clone(), FakeRuntime::new(), tp.vcs());
    assert_eq!(scheduler.tick().expect("tick").assign.assigned.len(), 2);

    for (task, contents) in [(&first, "first version\n"), (&second, "second version\n")] {
        let task = tp.project().tasks.get(&task.id).expect("get");
        let agent_id = task.assigned_to.clone().expect("agent");
        let agent = tp.project().agents.get(&agent_id).expect("agent");
        commit_in(agent.worktree.as_deref().expect("worktree"), "shared.txt", contents)
            .expect("commit");
        tp.project()
            .messages
            .send(MessageKind::TaskDone, &agent_id, FOREMAN_INBOX, Some(&task.id), json!({}))
            .expect("send");
    }

    let report = scheduler.tick().expect("tick");
    assert_eq!(report.inbox.handled, 2);
    assert_eq!(report.merge.merged, 1);
    assert_eq!(report.merge.conflicts, 1);

    let events = tp.project().events.read_all().expect("events");
    let count = |kind: EventKind| events.iter().filter(|e| e.kind == kind).count();
    assert_eq!(count(EventKind::MergeSucceeded), 1);
    assert_eq!(count(EventKind::MergeConflict), 1);
    assert!(kinds_for(&events, &first.id).contains(&EventKind::MergeSucceeded));
    assert!(kinds_for(&events, &second.id).contains(&EventKind::MergeConflict));

    let vcs = tp.vcs();
    assert!(vcs.is_clean(tp.root()).expect("clean"));
    assert_eq!(vcs.current_branch(tp.root()).expect("branch"), "main");
    assert_eq!(tp.read_trunk_file("shared.txt").expect("show"), "first version");
    assert!(tp.project().queue.list().expect("queue").is_empty());

    // The first worker is finished and released; a resolver took the conflict.
    let first_owner = tp
        .project()
        .tasks
        .get(&first.id)
        .expect("get")
        .assigned_to
        .expect("owner");
    assert_eq!(
        tp.project().agents.get(&first_owner).expect("agent").status,
        AgentStatus::Dead
    );
    let resolvers: Vec<_> = tp
        .project()
        .agents
        .list()
        .expect("agents")
        .into_iter()
        .filter(|agent| agent.role == AgentRole::Resolver)
        .collect();
    assert_eq!(resolvers.len(), 1);
    assert_eq!(resolvers[0].task_id.as_deref(), Some(second.id.as_str()));
}

/// D: eleven minutes without a heartbeat (process alive) is past the dead
/// timeout; the worker is retired and its task is ready again.
#[test]
fn stale_worker_is_retired_and_task_reclaimed() {
    let tp = TestProject::new().expect("project");
    let task = tp
        .project()
        .tasks
        .create(NewTask::titled("slow"))
        .expect("create");
    let scheduler = Scheduler::new(tp.project().clone(), FakeRuntime::new(), tp.vcs());
    scheduler.tick().expect("tick");

    let agent_id = tp
        .project()
        .tasks
        .get(&task.id)
        .expect("get")
        .assigned_to
        .expect("agent");
    let mut agent = tp.project().agents.get(&agent_id).expect("agent");
    agent.heartbeat_at = Some(Utc::now() - TimeDelta::minutes(11));
    tp.project().agents.save(&agent).expect("save");

    let config = tp.config().expect("config");
    let vcs = tp.vcs();
    let shutdown = ShutdownFlag::new();
    let ctx = tp.context(&config, scheduler.runtime(), &vcs, &shutdown);
    let mut events = TickEvents::new();
    let report = check_liveness(&ctx, &mut events).expect("liveness");
    assert_eq!(report.retired, 1);

    let agent = tp.project().agents.get(&agent_id).expect("agent");
    assert_eq!(agent.status, AgentStatus::Dead);
    let reclaimed = tp.project().tasks.get(&task.id).expect("get");
    assert_eq!(reclaimed.status, TaskStatus::Open);
    assert_eq!(reclaimed.assigned_to, None);
    assert_eq!(reclaimed.branch, None);

    let tasks = tp.project().tasks.list().expect("list");
    let ready: Vec<&str> = find_ready(&tasks).iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ready, vec![task.id.as_str()]);

    let kinds = kinds_for(events.as_slice(), &task.id);
    assert!(kinds.contains(&EventKind::AgentDied), "{kinds:?}");
    assert!(kinds.contains(&EventKind::TaskReclaimed), "{kinds:?}");
    assert!(!agent.worktree.as_deref().expect("worktree").exists());
    assert_eq!(scheduler.runtime().terminated(), vec![format!("fake-{agent_id}")]);
}

#[test]
fn warning_then_critical_then_recovery() {
    let tp = TestProject::new().expect("project");
    let scheduler = Scheduler::new(tp.project().clone(), FakeRuntime::new(), tp.vcs());
    tp.add_agent("worker-1", AgentRole::Worker).expect("agent");
    let config = tp.config().expect("config");
    let vcs = tp.vcs();
    let shutdown = ShutdownFlag::new();

    let run = |stale_mins: i64| {
        let mut agent = tp.project().agents.get("worker-1").expect("agent");
        agent.heartbeat_at = Some(Utc::now() - TimeDelta::minutes(stale_mins));
        tp.project().agents.save(&agent).expect("save");
        let ctx = tp.context(&config, scheduler.runtime(), &vcs, &shutdown);
        let mut events = TickEvents::new();
        check_liveness(&ctx, &mut events).expect("liveness")
    };

    assert_eq!(run(6).warned, 1);
    assert!(tp.project().paths.nudge("worker-1").is_file());
    // Already warned: no repeat.
    assert_eq!(run(6).warned, 0);

    assert_eq!(run(9).critical, 1);
    let liaison_inbox = tp.project().messages.list_pending("liaison").expect("inbox");
    assert_eq!(liaison_inbox.len(), 1);
    assert_eq!(liaison_inbox[0].kind, MessageKind::Help);

    assert_eq!(run(0).recovered, 1);
    assert!(!tp.project().paths.nudge("worker-1").exists());
}

#[test]
fn dead_process_is_retired_without_escalation() {
    let tp = TestProject::new().expect("project");
    let runtime = FakeRuntime::new();
    let mut agent = tp.add_agent("worker-1", AgentRole::Worker).expect("agent");
    agent.pid = Some(4242);
    tp.project().agents.save(&agent).expect("save");
    runtime.kill(4242);

    let config = tp.config().expect("config");
    let vcs = tp.vcs();
    let shutdown = ShutdownFlag::new();
    let ctx = tp.context(&config, &runtime, &vcs, &shutdown);
    let mut events = TickEvents::new();
    let report = check_liveness(&ctx, &mut events).expect("liveness");
    assert_eq!(report.retired, 1);
    assert_eq!(report.warned, 0);
    assert_eq!(
        tp.project().agents.get("worker-1").expect("agent").status,
        AgentStatus::Dead
    );
}

/// E: spend at the ceiling blocks spawning and is reported exactly once.
#[test]
fn budget_ceiling_denies_spawn_and_reports_once() {
    let tp = TestProject::new().expect("project");
    let mut config = ForemanConfig::default();
    config.limits.budget_ceiling = 5.0;
    tp.write_config(&config).expect("config");
    for _ in 0..6 {
        tp.project()
            .events
            .append(&Event::new(EventKind::Usage).data(json!({ "cost": 1.0 })))
            .expect("append");
    }
    tp.project()
        .tasks
        .create(NewTask::titled("expensive"))
        .expect("create");

    let Admission::Denied(denial) =
        can_spawn_worker(tp.project(), &config.limits()).expect("admission")
    else {
        panic!("expected denial");
    };
    assert!(matches!(denial, Denial::Budget { .. }));
    assert!(denial.to_string().contains("budget"));

    let scheduler = Scheduler::new(tp.project().clone(), FakeRuntime::new(), tp.vcs());
    let first = scheduler.tick().expect("tick");
    assert!(matches!(first.assign.denial, Some(Denial::Budget { .. })));
    assert!(first.constraints.budget_exceeded);
    let second = scheduler.tick().expect("tick");
    assert!(!second.constraints.budget_exceeded);

    let reported = tp
        .project()
        .events
        .read_all()
        .expect("events")
        .iter()
        .filter(|event| event.kind == EventKind::BudgetExceeded)
        .count();
    assert_eq!(reported, 1);
    assert!(scheduler.runtime().provisioned().is_empty());
}

#[test]
fn merge_queue_drains_in_arrival_order() {
    let tp = TestProject::new().expect("project");
    let mut ids = Vec::new();
    for name in ["alpha", "beta", "gamma"] {
        let task = tp
            .project()
            .tasks
            .create(NewTask::titled(name))
            .expect("create");
        let branch = format!("feature/{name}");
        tp.commit_on_branch(&branch, &format!("{name}.txt"), name)
            .expect("commit");
        tp.project()
            .queue
            .enqueue(&task.id, &branch, "worker-9")
            .expect("enqueue");
        ids.push(task.id);
    }

    let config = tp.config().expect("config");
    let runtime = FakeRuntime::new();
    let vcs = tp.vcs();
    let shutdown = ShutdownFlag::new();
    let ctx = tp.context(&config, &runtime, &vcs, &shutdown);
    let mut events = TickEvents::new();
    let report = drain_merge_queue(&ctx, &mut events).expect("drain");
    assert_eq!(report.merged, 3);

    let started: Vec<&str> = events
        .as_slice()
        .iter()
        .filter(|event| event.kind == EventKind::MergeStarted)
        .filter_map(|event| event.task.as_deref())
        .collect();
    assert_eq!(started, ids.iter().map(String::as_str).collect::<Vec<_>>());
    assert!(tp.project().queue.list().expect("queue").is_empty());

    let results = tp.project().messages.list_pending("worker-9").expect("inbox");
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|m| m.kind == MessageKind::MergeResult
        && m.payload_str("status") == Some("merged")));
}

#[test]
fn shutdown_request_leaves_entries_queued() {
    let tp = TestProject::new().expect("project");
    for name in ["one", "two"] {
        let branch = format!("feature/{name}");
        tp.commit_on_branch(&branch, &format!("{name}.txt"), name)
            .expect("commit");
        tp.project()
            .queue
            .enqueue(&format!("task-{name}"), &branch, "worker-9")
            .expect("enqueue");
    }

    let config = tp.config().expect("config");
    let runtime = FakeRuntime::new();
    let vcs = tp.vcs();
    let shutdown = ShutdownFlag::new();
    shutdown.request();
    let ctx = tp.context(&config, &runtime, &vcs, &shutdown);
    let mut events = TickEvents::new();
    let report = drain_merge_queue(&ctx, &mut events).expect("drain");
    assert_eq!(report.merged, 0);
    assert_eq!(report.deferred, 2);
    assert_eq!(tp.project().queue.depth().expect("depth"), 2);
}

#[test]
fn missing_branch_fails_entry_without_retry() {
    let tp = TestProject::new().expect("project");
    tp.project()
        .queue
        .enqueue("task-0001", "feature/never-pushed", "worker-9")
        .expect("enqueue");

    let config = tp.config().expect("config");
    let runtime = FakeRuntime::new();
    let vcs = tp.vcs();
    let shutdown = ShutdownFlag::new();
    let ctx = tp.context(&config, &runtime, &vcs, &shutdown);
    let mut events = TickEvents::new();
    let report = drain_merge_queue(&ctx, &mut events).expect("drain");

    assert_eq!(report.failed, 1);
    assert!(tp.project().queue.list().expect("queue").is_empty());
    assert!(events.as_slice().iter().any(|e| e.kind == EventKind::MergeFailed));
    assert!(vcs.is_clean(tp.root()).expect("clean"));
    let results = tp.project().messages.list_pending("worker-9").expect("inbox");
    assert_eq!(results[0].payload_str("status"), Some("failed"));
}

#[test]
fn help_request_is_forwarded_to_liaison() {
    let tp = TestProject::new().expect("project");
    tp.project()
        .messages
        .send(
            MessageKind::Help,
            "worker-3",
            FOREMAN_INBOX,
            Some("task-0001"),
            json!({ "reason": "tests need a database" }),
        )
        .expect("send");

    let scheduler = Scheduler::new(tp.project().clone(), FakeRuntime::new(), tp.vcs());
    assert_eq!(scheduler.tick().expect("tick").inbox.handled, 1);

    let forwarded = tp.project().messages.list_pending("liaison").expect("inbox");
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].from, "worker-3");
    assert_eq!(forwarded[0].payload_str("reason"), Some("tests need a database"));
    assert_eq!(
        tp.project().messages.list_archived(FOREMAN_INBOX).expect("archive").len(),
        1
    );
}

/// Assign one task and return `(task id, worker id)`.
fn assigned_worker(tp: &TestProject, scheduler: &Scheduler<FakeRuntime, GitVcs>) -> (String, String) {
    let task = tp
        .project()
        .tasks
        .create(NewTask::titled("busy work"))
        .expect("create");
    scheduler.tick().expect("tick");
    let agent_id = tp
        .project()
        .tasks
        .get(&task.id)
        .expect("get")
        .assigned_to
        .expect("agent");
    (task.id, agent_id)
}

#[test]
fn retired_worker_with_deleted_task_still_releases_everything() {
    let tp = TestProject::new().expect("project");
    let scheduler = Scheduler::new(tp.project().clone(), FakeRuntime::new(), tp.vcs());
    let (task_id, agent_id) = assigned_worker(&tp, &scheduler);

    // An operator removed the task while the worker still held it.
    std::fs::remove_file(tp.project().paths.tasks_dir.join(format!("{task_id}.json")))
        .expect("remove task");
    let mut agent = tp.project().agents.get(&agent_id).expect("agent");
    agent.heartbeat_at = Some(Utc::now() - TimeDelta::minutes(11));
    tp.project().agents.save(&agent).expect("save");

    let config = tp.config().expect("config");
    let vcs = tp.vcs();
    let shutdown = ShutdownFlag::new();
    let ctx = tp.context(&config, scheduler.runtime(), &vcs, &shutdown);
    let mut events = TickEvents::new();
    let report = check_liveness(&ctx, &mut events).expect("liveness");
    assert_eq!(report.retired, 1);

    let agent = tp.project().agents.get(&agent_id).expect("agent");
    assert_eq!(agent.status, AgentStatus::Dead);
    assert_eq!(scheduler.runtime().terminated(), vec![format!("fake-{agent_id}")]);
    assert!(!agent.worktree.as_deref().expect("worktree").exists());
    assert!(!vcs.branch_exists("foreman/task-0001").expect("branch"));
    assert!(events.as_slice().iter().any(|e| e.kind == EventKind::AgentDied));
    assert!(!events.as_slice().iter().any(|e| e.kind == EventKind::TaskReclaimed));

    // Dead agents are not revisited.
    let again = check_liveness(&ctx, &mut events).expect("liveness");
    assert_eq!(again.retired, 0);
    assert_eq!(scheduler.runtime().terminated().len(), 1);
}

#[test]
fn stalled_worker_is_reported_once_per_window() {
    let tp = TestProject::new().expect("project");
    let scheduler = Scheduler::new(tp.project().clone(), FakeRuntime::new(), tp.vcs());
    let (_task_id, agent_id) = assigned_worker(&tp, &scheduler);

    let config = tp.config().expect("config");
    let vcs = tp.vcs();
    let shutdown = ShutdownFlag::new();
    let stalls_at = |minutes: i64| {
        let mut ctx = tp.context(&config, scheduler.runtime(), &vcs, &shutdown);
        ctx.now = Utc::now() + TimeDelta::minutes(minutes);
        let mut events = TickEvents::new();
        let stalled = check_stalls(&ctx, &mut events).expect("stalls");
        (stalled, events)
    };

    // Fresh worktree, nothing to report yet.
    assert_eq!(stalls_at(0).0, 0);

    let (stalled, events) = stalls_at(31);
    assert_eq!(stalled, 1);
    assert!(
        events
            .as_slice()
            .iter()
            .any(|e| e.kind == EventKind::AgentStalled && e.agent.as_deref() == Some(agent_id.as_str()))
    );
    let inbox = tp.project().messages.list_pending("liaison").expect("inbox");
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, MessageKind::Help);
    assert!(inbox[0].payload_str("reason").is_some_and(|r| r.contains("not committed")));

    // Throttled within the same window.
    assert_eq!(stalls_at(31).0, 0);
    assert_eq!(tp.project().messages.list_pending("liaison").expect("inbox").len(), 1);

    // Advisory only.
    let agent = tp.project().agents.get(&agent_id).expect("agent");
    assert_eq!(agent.status, AgentStatus::Active);

    assert_eq!(stalls_at(62).0, 1);
    assert_eq!(tp.project().messages.list_pending("liaison").expect("inbox").len(), 2);
}

#[test]
fn task_failed_message_idles_worker_and_keeps_branch() {
    let tp = TestProject::new().expect("project");
    let scheduler = Scheduler::new(tp.project().clone(), FakeRuntime::new(), tp.vcs());
    let (task_id, agent_id) = assigned_worker(&tp, &scheduler);
    tp.project()
        .messages
        .send(
            MessageKind::TaskFailed,
            &agent_id,
            FOREMAN_INBOX,
            Some(&task_id),
            json!({ "reason": "cannot reproduce" }),
        )
        .expect("send");

    assert_eq!(scheduler.tick().expect("tick").inbox.handled, 1);

    let task = tp.project().tasks.get(&task_id).expect("get");
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.result.as_deref(), Some("cannot reproduce"));

    let agent = tp.project().agents.get(&agent_id).expect("agent");
    assert_eq!(agent.status, AgentStatus::Idle);
    assert_eq!(scheduler.runtime().terminated(), vec![format!("fake-{agent_id}")]);
    assert!(!agent.worktree.as_deref().expect("worktree").exists());
    assert!(tp.vcs().branch_exists("foreman/task-0001").expect("branch"));
    assert!(tp.project().queue.list().expect("queue").is_empty());

    let events = tp.project().events.read_all().expect("events");
    assert!(kinds_for(&events, &task_id).contains(&EventKind::TaskFailed));
    assert_eq!(
        tp.project().messages.list_archived(FOREMAN_INBOX).expect("archive").len(),
        1
    );
}

#[test]
fn checkpoint_message_updates_task_and_agent() {
    let tp = TestProject::new().expect("project");
    let scheduler = Scheduler::new(tp.project().clone(), FakeRuntime::new(), tp.vcs());
    let (task_id, agent_id) = assigned_worker(&tp, &scheduler);
    tp.project()
        .messages
        .send(
            MessageKind::Checkpoint,
            &agent_id,
            FOREMAN_INBOX,
            Some(&task_id),
            json!({ "note": "parser done, wiring CLI" }),
        )
        .expect("send");

    assert_eq!(scheduler.tick().expect("tick").inbox.handled, 1);

    let task = tp.project().tasks.get(&task_id).expect("get");
    assert_eq!(task.status, TaskStatus::Assigned);
    assert_eq!(task.checkpoint.as_deref(), Some("parser done, wiring CLI"));

    let agent = tp.project().agents.get(&agent_id).expect("agent");
    assert_eq!(agent.status, AgentStatus::Active);
    assert_eq!(agent.last_progress.as_deref(), Some("parser done, wiring CLI"));
    assert!(agent.heartbeat_at.is_some());
}
