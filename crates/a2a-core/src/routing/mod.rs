//! Routing Engine (§4.3): evaluates a priority-ordered rule list against a
//! task's attributes and emits `(worker_type, decision, trace_id)`, writing
//! an append-only audit row regardless of outcome.
//!
//! The condition grammar is four clause shapes (`default`, `key = value`,
//! `key >= value`, `task_code starts with "..."`). That's small enough that
//! a hand-rolled match-on-tokens parser is more idiomatic than pulling in a
//! parser-combinator crate for a grammar this bespoke.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use a2a_db::models::RoutingRule;
use a2a_db::queries::routing_audit;
use a2a_db::queries::routing_rules;

/// The subset of a task's attributes the Routing Engine reads.
#[derive(Debug, Clone)]
pub struct TaskAttrs {
    pub task_code: String,
    pub area: String,
    pub owner_role: String,
    pub priority: i32,
}

/// A parsed routing condition.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Condition {
    Default,
    AreaEquals(String),
    OwnerRoleEquals(String),
    PriorityAtLeast(i32),
    TaskCodeStartsWith(String),
    /// A condition string that doesn't match any known shape. Never
    /// matches -- this keeps a malformed rule inert rather than crashing
    /// routing for every task.
    Unrecognized,
}

fn parse_condition(condition: &str) -> Condition {
    let condition = condition.trim();
    if condition == "default" {
        return Condition::Default;
    }
    if let Some(rest) = condition.strip_prefix("task_code starts with") {
        let rest = rest.trim();
        if let Some(prefix) = rest.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
            return Condition::TaskCodeStartsWith(prefix.to_string());
        }
        return Condition::Unrecognized;
    }
    if let Some((key, value)) = condition.split_once(">=") {
        let key = key.trim();
        let value = value.trim();
        if key == "priority" {
            if let Ok(n) = value.parse::<i32>() {
                return Condition::PriorityAtLeast(n);
            }
        }
        return Condition::Unrecognized;
    }
    if let Some((key, value)) = condition.split_once('=') {
        let key = key.trim();
        let value = value.trim();
        return match key {
            "area" => Condition::AreaEquals(value.to_string()),
            "owner_role" => Condition::OwnerRoleEquals(value.to_string()),
            _ => Condition::Unrecognized,
        };
    }
    Condition::Unrecognized
}

fn matches(condition: &Condition, attrs: &TaskAttrs) -> bool {
    match condition {
        Condition::Default => true,
        Condition::AreaEquals(v) => &attrs.area == v,
        Condition::OwnerRoleEquals(v) => &attrs.owner_role == v,
        Condition::PriorityAtLeast(v) => attrs.priority >= *v,
        Condition::TaskCodeStartsWith(prefix) => attrs.task_code.starts_with(prefix.as_str()),
        Condition::Unrecognized => false,
    }
}

/// Outcome of a `decide` call.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub worker_type: String,
    pub decision: String,
    pub trace_id: Uuid,
}

const FALLBACK_WORKER: &str = "Other";

/// Evaluate every routing rule (highest `priority` first) against `attrs`,
/// returning the first match. Always writes one Routing Audit row,
/// regardless of outcome.
pub async fn decide(pool: &PgPool, attrs: &TaskAttrs) -> Result<RoutingDecision> {
    let trace_id = Uuid::new_v4();
    let rules = routing_rules::list_by_priority(pool).await?;

    let (worker_type, decision) = evaluate(&rules, attrs);

    let input = serde_json::json!({
        "task_code": attrs.task_code,
        "area": attrs.area,
        "owner_role": attrs.owner_role,
        "priority": attrs.priority,
    });
    let output = serde_json::json!({ "worker_type": worker_type, "decision": decision });
    routing_audit::append(pool, trace_id, &decision, &input, &output).await?;

    Ok(RoutingDecision {
        worker_type,
        decision,
        trace_id,
    })
}

/// The pure evaluation step, separated from the audit write so it can be
/// unit-tested without a database.
fn evaluate(rules: &[RoutingRule], attrs: &TaskAttrs) -> (String, String) {
    for rule in rules {
        let condition = parse_condition(&rule.condition);
        if matches(&condition, attrs) {
            return (
                rule.target_worker.clone(),
                format!("Matched by {}: {}", rule.rule_id, rule.condition),
            );
        }
    }
    (FALLBACK_WORKER.to_string(), "Matched by default rule".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rule(rule_id: &str, condition: &str, target_worker: &str, priority: i32) -> RoutingRule {
        RoutingRule {
            rule_id: rule_id.to_string(),
            condition: condition.to_string(),
            target_worker: target_worker.to_string(),
            priority,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn default_rules() -> Vec<RoutingRule> {
        vec![
            rule("R1", "area = ci/exchange", "Trae", 100),
            rule("R2", "owner_role = SRE Engineer", "Cursor", 90),
            rule("R3", "priority >= 2", "Trae", 80),
            rule("R4", "area = ci/controlplane", "Trae", 70),
            rule("R5", "task_code starts with \"ATA-\"", "Trae", 60),
            rule("R6", "default", "Other", 10),
        ]
    }

    fn attrs(task_code: &str, area: &str, owner_role: &str, priority: i32) -> TaskAttrs {
        TaskAttrs {
            task_code: task_code.to_string(),
            area: area.to_string(),
            owner_role: owner_role.to_string(),
            priority,
        }
    }

    #[test]
    fn area_rule_wins_over_default() {
        let rules = default_rules();
        let (worker, decision) = evaluate(&rules, &attrs("T1", "ci/exchange", "anyone", 0));
        assert_eq!(worker, "Trae");
        assert_eq!(decision, "Matched by R1: area = ci/exchange");
    }

    #[test]
    fn owner_role_rule_matches() {
        let rules = default_rules();
        let (worker, _) = evaluate(&rules, &attrs("T1", "other", "SRE Engineer", 0));
        assert_eq!(worker, "Cursor");
    }

    #[test]
    fn priority_threshold_matches() {
        let rules = default_rules();
        let (worker, _) = evaluate(&rules, &attrs("T1", "other", "anyone", 2));
        assert_eq!(worker, "Trae");
    }

    #[test]
    fn task_code_prefix_matches() {
        let rules = default_rules();
        let (worker, _) = evaluate(&rules, &attrs("ATA-42", "other", "anyone", 0));
        assert_eq!(worker, "Trae");
    }

    #[test]
    fn falls_through_to_default_rule() {
        let rules = default_rules();
        let (worker, decision) = evaluate(&rules, &attrs("T1", "other", "anyone", 0));
        assert_eq!(worker, "Other");
        assert_eq!(decision, "Matched by R6: default");
    }

    #[test]
    fn first_priority_match_wins_when_several_apply() {
        // area=ci/exchange (prio 100) and priority>=2 (prio 80) both match;
        // R1 must win since rules are evaluated highest-priority first.
        let rules = default_rules();
        let (worker, decision) = evaluate(&rules, &attrs("T1", "ci/exchange", "anyone", 3));
        assert_eq!(worker, "Trae");
        assert!(decision.starts_with("Matched by R1"));
    }

    #[test]
    fn unrecognized_condition_never_matches() {
        assert!(!matches(&Condition::Unrecognized, &attrs("T1", "a", "b", 0)));
    }

    #[test]
    fn fallback_worker_when_no_rules_at_all() {
        let (worker, decision) = evaluate(&[], &attrs("T1", "a", "b", 0));
        assert_eq!(worker, FALLBACK_WORKER);
        assert_eq!(decision, "Matched by default rule");
    }
}
