//! Routing provider port.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::DomainResult;
use crate::domain::models::RoutingPlan;

/// A routing heuristic: given a task and the available drivers,
/// produce an advisory plan. The core may override any part of it,
/// and degrades to a single-driver default when the provider errors.
#[async_trait]
pub trait RoutingProvider: Send + Sync {
    async fn plan(
        &self,
        task: &str,
        available_drivers: &[String],
        context: &Value,
    ) -> DomainResult<RoutingPlan>;
}
