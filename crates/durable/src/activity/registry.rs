//! Activity registry keyed by activity type

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use super::{Activity, ActivityContext, ActivityError};

/// Type-erased activity entry point: JSON in, JSON out
pub type ActivityHandler = Arc<
    dyn Fn(ActivityContext, Value) -> BoxFuture<'static, Result<Value, ActivityError>>
        + Send
        + Sync,
>;

/// Registry of activity handlers
#[derive(Default)]
pub struct ActivityRegistry {
    handlers: HashMap<String, ActivityHandler>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an activity instance under [`Activity::TYPE`]
    ///
    /// Registering the same type twice replaces the earlier handler.
    pub fn register<A: Activity>(&mut self, activity: A) {
        let activity = Arc::new(activity);
        let handler: ActivityHandler = Arc::new(move |ctx: ActivityContext, input: Value| {
            let activity = Arc::clone(&activity);
            async move {
                let input: A::Input = serde_json::from_value(input)?;
                let output = activity.execute(&ctx, input).await?;
                Ok::<Value, ActivityError>(serde_json::to_value(output)?)
            }
            .boxed()
        });

        self.handlers.insert(A::TYPE.to_string(), handler);
    }

    pub fn get(&self, activity_type: &str) -> Option<ActivityHandler> {
        self.handlers.get(activity_type).cloned()
    }

    pub fn contains(&self, activity_type: &str) -> bool {
        self.handlers.contains_key(activity_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn activity_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for ActivityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityRegistry")
            .field("activity_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
