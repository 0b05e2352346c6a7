//! Saga compensation modes

mod common;

use replayflow_durable::persistence::StepOutcome;
use replayflow_durable::prelude::*;
use serde_json::{json, Value};

use common::Engine;

struct Book;

#[async_trait]
impl Activity for Book {
    const TYPE: &'static str = "book";
    type Input = String;
    type Output = String;

    async fn execute(&self, _ctx: &ActivityContext, trip: String) -> Result<String, ActivityError> {
        Ok(format!("booking-{trip}"))
    }
}

/// Cancels a booking; bookings of "broken" trips cannot be undone
struct Undo;

#[async_trait]
impl Activity for Undo {
    const TYPE: &'static str = "undo";
    type Input = String;
    type Output = String;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        booking: String,
    ) -> Result<String, ActivityError> {
        if booking.contains("broken") {
            return Err(ActivityError::non_retryable(format!("cannot undo {booking}")));
        }
        Ok(format!("undone {booking}"))
    }
}

/// Books every trip, then backs all of them out
struct TripBooking;

#[async_trait]
impl Workflow for TripBooking {
    const TYPE: &'static str = "trip_booking";
    type Input = (String, Vec<String>);
    type Output = Vec<String>;
    type State = ();

    async fn execute(
        ctx: &mut WorkflowContext<()>,
        input: (String, Vec<String>),
    ) -> Result<Vec<String>, Halt> {
        let (mode, trips) = input;
        let mut saga = match mode.as_str() {
            "parallel" => Saga::new().parallel(),
            "continue" => Saga::new().continue_with_error(),
            _ => Saga::new(),
        };

        for trip in trips {
            let booking = ctx.activity::<Book>(trip).await??;
            saga.add_activity::<Undo>(&booking)?;
        }

        let failures = saga.compensate(ctx).await?;
        Ok(failures.into_iter().map(|err| err.message).collect())
    }
}

fn engine() -> Engine {
    Engine::new(|executor| {
        executor.register::<TripBooking>();
        executor.register_activity(Book);
        executor.register_activity(Undo);
    })
}

async fn run(engine: &Engine, mode: &str, trips: &[&str]) -> uuid::Uuid {
    let trips = trips.iter().map(|t| t.to_string()).collect();
    let id = engine
        .executor
        .start::<TripBooking>((mode.to_string(), trips), StartOptions::default())
        .await
        .unwrap();
    engine.drain().await;
    id
}

async fn compensation_outcomes(engine: &Engine, id: uuid::Uuid) -> Vec<StepOutcome> {
    engine
        .store
        .load_logs(id)
        .await
        .unwrap()
        .into_iter()
        .filter(|entry| entry.kind == "activity:undo")
        .map(|entry| entry.outcome)
        .collect()
}

#[test_log::test(tokio::test)]
async fn test_sequential_compensation_runs_newest_first() {
    let engine = engine();
    let id = run(&engine, "sequential", &["a", "b", "c"]).await;

    assert_eq!(engine.status(id).await, WorkflowStatus::Completed);
    assert_eq!(engine.executor.output(id).await.unwrap(), Some(json!([])));

    let undone: Vec<Value> = compensation_outcomes(&engine, id)
        .await
        .into_iter()
        .map(|outcome| outcome.into_result().unwrap())
        .collect();
    assert_eq!(
        undone,
        vec![
            json!("undone booking-c"),
            json!("undone booking-b"),
            json!("undone booking-a"),
        ]
    );
}

#[test_log::test(tokio::test)]
async fn test_sequential_compensation_stops_at_first_failure() {
    let engine = engine();
    let id = run(&engine, "sequential", &["a", "broken-b", "c"]).await;

    assert_eq!(engine.status(id).await, WorkflowStatus::Failed);

    // c was undone, broken-b failed, a was never attempted
    let outcomes = compensation_outcomes(&engine, id).await;
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0], StepOutcome::Completed(json!("undone booking-c")));
    assert!(matches!(outcomes[1], StepOutcome::Failed(_)));

    let exceptions = engine.executor.exceptions(id).await.unwrap();
    assert_eq!(exceptions[0].error.message, "cannot undo booking-broken-b");
}

#[test_log::test(tokio::test)]
async fn test_continue_with_error_runs_remaining_compensations() {
    let engine = engine();
    let id = run(&engine, "continue", &["a", "broken-b", "c"]).await;

    assert_eq!(engine.status(id).await, WorkflowStatus::Completed);
    assert_eq!(
        engine.executor.output(id).await.unwrap(),
        Some(json!(["cannot undo booking-broken-b"]))
    );

    let outcomes = compensation_outcomes(&engine, id).await;
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[2], StepOutcome::Completed(json!("undone booking-a")));
}

#[test_log::test(tokio::test)]
async fn test_parallel_compensation_fans_out_and_collects_failures() {
    let engine = engine();
    let id = run(&engine, "parallel", &["a", "broken-b", "c"]).await;

    assert_eq!(engine.status(id).await, WorkflowStatus::Completed);
    assert_eq!(
        engine.executor.output(id).await.unwrap(),
        Some(json!(["cannot undo booking-broken-b"]))
    );

    // one consecutive step per compensation, in registration order
    let logs = engine.store.load_logs(id).await.unwrap();
    let undo_steps: Vec<u64> = logs
        .iter()
        .filter(|entry| entry.kind == "activity:undo")
        .map(|entry| entry.index)
        .collect();
    assert_eq!(undo_steps, vec![3, 4, 5]);

    assert_eq!(logs[3].value(), Some(&json!("undone booking-a")));
    assert!(matches!(logs[4].outcome, StepOutcome::Failed(_)));
    assert_eq!(logs[5].value(), Some(&json!("undone booking-c")));
}
