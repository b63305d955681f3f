//! Governance Engine: policy evaluation over `{allow, review, deny}` with
//! reasons. Policies are data, not code, so they can themselves be distributed as
//! `config`-type `LogicUpdate`s through the Hub.

use std::cmp::Reverse;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Allow,
    Review,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum Condition {
    Equals { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    GreaterThan { field: String, value: f64 },
    LessThan { field: String, value: f64 },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
}

impl Condition {
    pub fn evaluate(&self, context: &Value) -> bool {
        match self {
            Condition::Equals { field, value } => context.get(field) == Some(value),
            Condition::In { field, values } => context
                .get(field)
                .map_or(false, |v| values.contains(v)),
            Condition::GreaterThan { field, value } => context
                .get(field)
                .and_then(|v| v.as_f64())
                .map_or(false, |v| v > *value),
            Condition::LessThan { field, value } => context
                .get(field)
                .and_then(|v| v.as_f64())
                .map_or(false, |v| v < *value),
            Condition::All { conditions } => conditions.iter().all(|c| c.evaluate(context)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.evaluate(context)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    pub resource_pattern: String,
    pub action_pattern: String,
    pub decision: PolicyDecision,
    pub conditions: Vec<Condition>,
    pub priority: i32,
    pub description: String,
}

impl Policy {
    fn matches(&self, action: &str, resource: &str, context: &Value) -> bool {
        crate::mesh::pattern_matches(&self.action_pattern, action)
            && crate::mesh::pattern_matches(&self.resource_pattern, resource)
            && self.conditions.iter().all(|c| c.evaluate(context))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub decision: PolicyDecision,
    pub policy_id: String,
    pub reason: String,
    pub conditions: Vec<String>,
}

pub struct GovernanceEngine {
    policies: arc_swap::ArcSwap<Vec<Policy>>,
}

mod arc_swap {
    //! Minimal single-writer/many-reader swap cell. Policies reload rarely and always through
    //! the Hub, so a small hand-rolled `RwLock` wrapper beats pulling in a dedicated
    //! atomic-swap crate for this one narrow use.
    use std::sync::RwLock;

    pub struct ArcSwap<T> {
        inner: RwLock<std::sync::Arc<T>>,
    }

    impl<T> ArcSwap<T> {
        pub fn new(value: T) -> Self {
            Self {
                inner: RwLock::new(std::sync::Arc::new(value)),
            }
        }

        pub fn load(&self) -> std::sync::Arc<T> {
            self.inner.read().unwrap().clone()
        }

        pub fn store(&self, value: T) {
            *self.inner.write().unwrap() = std::sync::Arc::new(value);
        }
    }
}

impl GovernanceEngine {
    pub fn new(policies: Vec<Policy>) -> Self {
        Self {
            policies: arc_swap::ArcSwap::new(policies),
        }
    }

    pub fn reload(&self, policies: Vec<Policy>) {
        self.policies.store(policies);
    }

    pub fn policies(&self) -> Vec<Policy> {
        self.policies.load().as_ref().clone()
    }

    /// Evaluates in priority order (highest first): a `deny` short-circuits immediately; a
    /// `review` is remembered but evaluation continues in case a higher-priority `deny`
    /// also matches; falling through with no match is a safe-escalation `review`, never a
    /// silent allow.
    pub fn check(&self, action: &str, resource: &str, context: &Value) -> Decision {
        let policies = self.policies.load();
        let mut sorted: Vec<&Policy> = policies.iter().collect();
        sorted.sort_by_key(|p| Reverse(p.priority));

        let mut pending_review: Option<&Policy> = None;
        for policy in sorted {
            if !policy.matches(action, resource, context) {
                continue;
            }
            match policy.decision {
                PolicyDecision::Deny => {
                    return Decision {
                        decision: PolicyDecision::Deny,
                        policy_id: policy.name.clone(),
                        reason: policy.description.clone(),
                        conditions: vec![],
                    };
                }
                PolicyDecision::Review if pending_review.is_none() => {
                    pending_review = Some(policy);
                }
                PolicyDecision::Allow if pending_review.is_none() => {
                    return Decision {
                        decision: PolicyDecision::Allow,
                        policy_id: policy.name.clone(),
                        reason: policy.description.clone(),
                        conditions: vec![],
                    };
                }
                _ => {}
            }
        }

        if let Some(policy) = pending_review {
            return Decision {
                decision: PolicyDecision::Review,
                policy_id: policy.name.clone(),
                reason: policy.description.clone(),
                conditions: vec![],
            };
        }

        Decision {
            decision: PolicyDecision::Review,
            policy_id: "__no_matching_policy".to_string(),
            reason: "no policy matched this action/resource; safe escalation".to_string(),
            conditions: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn allow_alice_knowledge() -> Policy {
        Policy {
            name: "allow_alice_knowledge".into(),
            resource_pattern: "knowledge".into(),
            action_pattern: "fetch_memory".into(),
            decision: PolicyDecision::Allow,
            conditions: vec![Condition::Equals {
                field: "user".into(),
                value: json!("alice"),
            }],
            priority: 10,
            description: "alice may read knowledge".into(),
        }
    }

    #[test]
    fn missing_policy_defaults_to_review() {
        let engine = GovernanceEngine::new(vec![]);
        let decision = engine.check("fetch_memory", "knowledge", &json!({"user": "bob"}));
        assert_eq!(decision.decision, PolicyDecision::Review);
    }

    #[test]
    fn matching_allow_policy_wins() {
        let engine = GovernanceEngine::new(vec![allow_alice_knowledge()]);
        let decision = engine.check("fetch_memory", "knowledge", &json!({"user": "alice"}));
        assert_eq!(decision.decision, PolicyDecision::Allow);
    }

    #[test]
    fn deny_outranks_lower_priority_allow() {
        let mut deny = allow_alice_knowledge();
        deny.name = "deny_alice_knowledge".into();
        deny.decision = PolicyDecision::Deny;
        deny.priority = 20;
        let engine = GovernanceEngine::new(vec![allow_alice_knowledge(), deny]);
        let decision = engine.check("fetch_memory", "knowledge", &json!({"user": "alice"}));
        assert_eq!(decision.decision, PolicyDecision::Deny);
    }
}
