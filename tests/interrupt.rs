// tests/interrupt.rs

//! Interrupting a single in-flight run kills that run only; the task's
//! supervision stays up and restarts it per policy.

mod common;

use std::time::Duration;

use stackup::status::Reason;

#[tokio::test]
async fn interrupted_service_run_restarts_with_backoff() {
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("counter");

    let doc = format!(
        r#"
apiVersion: kit/v1
kind: Tasks
metadata:
  name: interruptible
spec:
  tasks:
    svc:
      sh: echo run >> {counter}; sleep 600
      restartPolicy: Always
"#,
        counter = counter.display()
    );

    let (ctx, supervisor) = common::stack(&doc, &["svc"], false);
    let handle = tokio::spawn(supervisor.run());

    let running = common::wait_for(Duration::from_secs(10), || {
        matches!(ctx.statuses.get("svc"), Some(rec) if rec.reason == Reason::Running)
    })
    .await;
    assert!(running, "svc never started");
    assert_eq!(runs(&counter), 1);

    assert!(ctx.interrupt_run("svc"), "run must be registered");
    assert!(!ctx.interrupt_run("ghost"));

    // The aborted run counts as a failure: backoff grows, then a fresh run.
    let restarted = common::wait_for(Duration::from_secs(15), || runs(&counter) == 2).await;
    assert!(restarted, "svc was not restarted after the interrupt");

    let backoff = ctx.statuses.get("svc").unwrap().backoff;
    assert!(
        backoff.duration >= Duration::from_secs(2),
        "interrupt must have bumped the backoff, got {:?}",
        backoff.duration
    );

    ctx.root.cancel();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("shutdown timed out")
        .unwrap()
        .expect("always-restart tasks never fail the run");
}

fn runs(counter: &std::path::Path) -> usize {
    std::fs::read_to_string(counter)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}
