//! Routing plan domain model.
//!
//! The routing heuristic is an external collaborator; the core treats
//! its output as advisory defaults that the caller may override.

use serde::{Deserialize, Serialize};

/// Coarse classification of what a task is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskIntent {
    Code,
    Research,
    Analysis,
    Creative,
    Terminal,
    General,
}

impl TaskIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Research => "research",
            Self::Analysis => "analysis",
            Self::Creative => "creative",
            Self::Terminal => "terminal",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for TaskIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Advisory plan returned by a routing provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingPlan {
    pub intent: TaskIntent,
    /// Estimated task complexity in [0, 1].
    pub complexity: f64,
    pub requires_multiple: bool,
    /// Preferred drivers, most preferred first.
    pub recommended_agents: Vec<String>,
    pub parallel: bool,
    pub estimated_tokens: u64,
}

impl RoutingPlan {
    /// The safe fallback when the routing provider errors: a single run
    /// on the given driver.
    pub fn single(driver: impl Into<String>) -> Self {
        Self {
            intent: TaskIntent::General,
            complexity: 0.5,
            requires_multiple: false,
            recommended_agents: vec![driver.into()],
            parallel: false,
            estimated_tokens: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_fallback_plan() {
        let plan = RoutingPlan::single("mock");
        assert!(!plan.requires_multiple);
        assert_eq!(plan.recommended_agents, vec!["mock".to_string()]);
    }
}
