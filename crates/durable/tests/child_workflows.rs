//! Parent/child coordination

mod common;

use replayflow_durable::prelude::*;
use serde_json::{json, Value};

use common::Engine;

struct Double;

#[async_trait]
impl Workflow for Double {
    const TYPE: &'static str = "double";
    type Input = i64;
    type Output = i64;
    type State = ();

    async fn execute(_ctx: &mut WorkflowContext<()>, n: i64) -> Result<i64, Halt> {
        if n < 0 {
            return Err(Halt::fail("negative input"));
        }
        Ok(n * 2)
    }
}

/// Waits for a child workflow inline
struct Quadruple;

#[async_trait]
impl Workflow for Quadruple {
    const TYPE: &'static str = "quadruple";
    type Input = i64;
    type Output = String;
    type State = ();

    async fn execute(ctx: &mut WorkflowContext<()>, n: i64) -> Result<String, Halt> {
        let doubled = match ctx.child::<Double>(n).await? {
            Ok(doubled) => doubled,
            Err(err) => return Ok(format!("child failed: {}", err.message)),
        };
        let quadrupled = ctx.child::<Double>(doubled).await??;
        Ok(quadrupled.to_string())
    }
}

#[derive(Default)]
struct GreeterState {
    name: Option<String>,
}

/// Waits to be told who to greet
struct Greeter;

#[async_trait]
impl Workflow for Greeter {
    const TYPE: &'static str = "greeter";
    type Input = ();
    type Output = String;
    type State = GreeterState;

    async fn execute(ctx: &mut WorkflowContext<GreeterState>, _input: ()) -> Result<String, Halt> {
        ctx.await_condition(|s| s.name.is_some()).await?;
        let name = ctx.state().name.clone().unwrap_or_default();
        Ok(format!("hello {name}"))
    }

    fn on_signal(state: &mut GreeterState, signal: &WorkflowSignal) {
        if signal.name == "name" {
            state.name = signal.payload_as().ok();
        }
    }
}

/// Spawns a greeter, signals it through the handle and joins it
struct Introducer;

#[async_trait]
impl Workflow for Introducer {
    const TYPE: &'static str = "introducer";
    type Input = String;
    type Output = String;
    type State = ();

    async fn execute(ctx: &mut WorkflowContext<()>, name: String) -> Result<String, Halt> {
        let handle = ctx.spawn_child::<Greeter>(()).await?;

        let before = (ctx.index(), ctx.now(), ctx.workflow_id());
        handle
            .signal(ctx, WorkflowSignal::new("name", json!(name)))
            .await?;
        let after = (ctx.index(), ctx.now(), ctx.workflow_id());

        if before != after {
            return Err(Halt::fail("signaling a child disturbed the parent context"));
        }

        let greeting = handle.join(ctx).await??;
        Ok(greeting)
    }
}

fn engine() -> Engine {
    Engine::new(|executor| {
        executor.register::<Double>();
        executor.register::<Quadruple>();
        executor.register::<Greeter>();
        executor.register::<Introducer>();
    })
}

#[test_log::test(tokio::test)]
async fn test_child_outcome_is_logged_on_parent_step() {
    let engine = engine();

    let id = engine
        .executor
        .start::<Quadruple>(5, StartOptions::default())
        .await
        .unwrap();
    engine.drain().await;

    assert_eq!(engine.status(id).await, WorkflowStatus::Completed);
    assert_eq!(engine.executor.output(id).await.unwrap(), Some(json!("20")));
    assert_eq!(engine.log_kinds(id).await, vec!["child:double", "child:double"]);

    let children = engine.store.list_children(id).await.unwrap();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0].parent_index, 0);
    assert_eq!(children[1].parent_index, 1);

    for child in &children {
        let instance = engine
            .store
            .get_workflow(child.child_workflow_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.status, WorkflowStatus::Completed);

        let parent = engine
            .store
            .find_parent(child.child_workflow_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parent.parent_workflow_id, id);
    }
}

#[test_log::test(tokio::test)]
async fn test_child_failure_reaches_parent() {
    let engine = engine();

    let id = engine
        .executor
        .start::<Quadruple>(-1, StartOptions::default())
        .await
        .unwrap();
    engine.drain().await;

    assert_eq!(engine.status(id).await, WorkflowStatus::Completed);
    assert_eq!(
        engine.executor.output(id).await.unwrap(),
        Some(json!("child failed: negative input"))
    );

    let children = engine.store.list_children(id).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(
        engine.status(children[0].child_workflow_id).await,
        WorkflowStatus::Failed
    );
}

#[test_log::test(tokio::test)]
async fn test_missing_child_outcome_is_repaired_on_replay() {
    let engine = engine();

    let id = engine
        .executor
        .start::<Quadruple>(3, StartOptions::default())
        .await
        .unwrap();

    // run the parent once so it spawns the first child
    let parent_run = engine.queue.receive("default", 1).await.unwrap();
    let disposition = engine.executor.handle(&parent_run[0]).await;
    disposition
        .apply(engine.queue.as_ref(), parent_run[0].id)
        .await
        .unwrap();

    let child_id = engine.store.list_children(id).await.unwrap()[0].child_workflow_id;
    assert_eq!(engine.status(child_id).await, WorkflowStatus::Pending);

    // the child finishes on a worker that dies before notifying the parent
    let child_run = engine.queue.receive("default", 1).await.unwrap();
    engine.queue.ack(child_run[0].id).await.unwrap();
    engine.store.set_output(child_id, json!(6)).await.unwrap();
    engine
        .store
        .transition_status(child_id, WorkflowStatus::Running)
        .await
        .unwrap();
    engine
        .store
        .transition_status(child_id, WorkflowStatus::Completed)
        .await
        .unwrap();
    assert!(engine.store.get_log(id, 0).await.unwrap().is_none());

    engine.executor.signal(id, WorkflowSignal::named("poke")).await.unwrap();
    engine.drain().await;

    assert_eq!(engine.status(id).await, WorkflowStatus::Completed);
    assert_eq!(engine.executor.output(id).await.unwrap(), Some(json!("12")));
    assert_eq!(engine.store.list_children(id).await.unwrap().len(), 2);
}

#[test_log::test(tokio::test)]
async fn test_child_handle_signal_leaves_parent_context_untouched() {
    let engine = engine();

    let id = engine
        .executor
        .start::<Introducer>("ada".to_string(), StartOptions::default())
        .await
        .unwrap();
    engine.drain().await;

    assert_eq!(engine.status(id).await, WorkflowStatus::Completed);
    assert_eq!(
        engine.executor.output(id).await.unwrap(),
        Some(Value::from("hello ada"))
    );
    assert_eq!(engine.log_kinds(id).await, vec!["spawn:greeter", "join:greeter"]);

    // replays of the parent did not resend the signal
    let child_id = engine.store.list_children(id).await.unwrap()[0].child_workflow_id;
    let signals = engine.store.load_signals(child_id, None).await.unwrap();
    assert_eq!(signals.len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_children_inherit_routing() {
    let engine = engine();

    let id = engine
        .executor
        .start::<Quadruple>(1, StartOptions::default().on_queue("math"))
        .await
        .unwrap();
    engine.drain_queue("math").await;

    assert_eq!(engine.status(id).await, WorkflowStatus::Completed);
    for child in engine.store.list_children(id).await.unwrap() {
        let instance = engine
            .store
            .get_workflow(child.child_workflow_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.routing.queue_name(), "math");
    }
}
