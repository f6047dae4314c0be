//! Quality gates - pass/warn/block checks over stage metrics

use crate::core::error::PipelineError;
use crate::core::stage::{MetricValue, StageResult, StageStatus};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What a failing gate does to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateAction {
    /// Cancel everything downstream of the bound stages and fail the run
    Block,
    /// Record the violation and keep going
    Warn,
}

/// Result of evaluating one gate for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "outcome", content = "reason")]
pub enum GateOutcome {
    Pass,
    Warn(String),
    Block(String),
    /// A bound stage was skipped; the gate vacuously passes. Skips are a
    /// deliberate operator override, not a failure, so this must not be
    /// folded into Block.
    Skipped,
}

impl GateOutcome {
    pub fn is_block(&self) -> bool {
        matches!(self, GateOutcome::Block(_))
    }
}

/// Comparison operator in a gate predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparison {
    fn holds_f64(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparison::Eq => lhs == rhs,
            Comparison::Ne => lhs != rhs,
            Comparison::Gt => lhs > rhs,
            Comparison::Ge => lhs >= rhs,
            Comparison::Lt => lhs < rhs,
            Comparison::Le => lhs <= rhs,
        }
    }
}

/// One parsed condition, e.g. `coverage >= 80` or `tests_passed == true`.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub metric: String,
    pub comparison: Comparison,
    pub expected: MetricValue,
}

impl Predicate {
    /// Parse a predicate expression of the form `<metric> <op> <value>`.
    pub fn parse(expr: &str) -> Result<Self, PipelineError> {
        let re = Regex::new(r"^\s*([A-Za-z_][\w.]*)\s*(==|!=|>=|<=|>|<)\s*(\S+)\s*$")
            .expect("predicate regex is valid");

        let caps = re.captures(expr).ok_or_else(|| {
            PipelineError::config(format!("invalid gate predicate: '{}'", expr))
        })?;

        let comparison = match &caps[2] {
            "==" => Comparison::Eq,
            "!=" => Comparison::Ne,
            ">" => Comparison::Gt,
            ">=" => Comparison::Ge,
            "<" => Comparison::Lt,
            "<=" => Comparison::Le,
            _ => unreachable!(),
        };

        let raw = &caps[3];
        let expected = if let Ok(n) = raw.parse::<f64>() {
            MetricValue::Number(n)
        } else if let Ok(b) = raw.parse::<bool>() {
            MetricValue::Bool(b)
        } else {
            MetricValue::Text(raw.to_string())
        };

        // Ordering comparisons only make sense for numbers
        if !matches!(expected, MetricValue::Number(_))
            && !matches!(comparison, Comparison::Eq | Comparison::Ne)
        {
            return Err(PipelineError::config(format!(
                "predicate '{}' uses an ordering comparison on a non-numeric value",
                expr
            )));
        }

        Ok(Predicate {
            metric: caps[1].to_string(),
            comparison,
            expected,
        })
    }

    /// Evaluate against a metric map. A missing metric fails the
    /// predicate: a gate that cannot see its metric must not pass.
    pub fn holds(&self, metrics: &HashMap<String, MetricValue>) -> bool {
        let Some(actual) = metrics.get(&self.metric) else {
            return false;
        };

        match (&self.expected, actual) {
            (MetricValue::Number(e), MetricValue::Number(a)) => self.comparison.holds_f64(*a, *e),
            (MetricValue::Bool(e), MetricValue::Bool(a)) => match self.comparison {
                Comparison::Eq => a == e,
                Comparison::Ne => a != e,
                _ => false,
            },
            (MetricValue::Text(e), MetricValue::Text(a)) => match self.comparison {
                Comparison::Eq => a == e,
                Comparison::Ne => a != e,
                _ => false,
            },
            _ => false,
        }
    }
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self.comparison {
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
        };
        write!(f, "{} {} {}", self.metric, op, self.expected)
    }
}

/// A quality gate bound to one or more upstream stages.
///
/// Evaluated exactly once per run, after every bound stage is terminal
/// and before any dependent of those stages is marked ready.
#[derive(Debug, Clone)]
pub struct QualityGate {
    pub id: String,

    /// Stage names whose results this gate inspects
    pub stages: Vec<String>,

    pub predicates: Vec<Predicate>,

    pub action: GateAction,

    /// Whether a violation of this gate also vetoes artifact promotion.
    /// Defaults follow the action: Block gates veto, Warn gates do not.
    pub blocks_promotion: bool,
}

impl QualityGate {
    /// Evaluate the gate over recorded results for its bound stages.
    ///
    /// Predicates see the union of all bound stages' metrics; on a name
    /// collision the later-declared stage wins.
    pub fn evaluate(&self, results: &HashMap<String, StageResult>) -> GateOutcome {
        let mut merged: HashMap<String, MetricValue> = HashMap::new();

        for stage_name in &self.stages {
            let Some(result) = results.get(stage_name) else {
                // No result means the stage was cancelled before
                // recording; treat like a failed predicate source.
                return self.violation(format!("no result recorded for stage '{}'", stage_name));
            };

            match result.status {
                StageStatus::Skipped => return GateOutcome::Skipped,
                StageStatus::Cancelled => {
                    return self.violation(format!("bound stage '{}' was cancelled", stage_name))
                }
                StageStatus::Success | StageStatus::Failure => {
                    merged.extend(result.metrics.clone());
                }
            }
        }

        for predicate in &self.predicates {
            if !predicate.holds(&merged) {
                let actual = merged
                    .get(&predicate.metric)
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "<missing>".to_string());
                return self.violation(format!(
                    "'{}' violated (actual: {})",
                    predicate, actual
                ));
            }
        }

        GateOutcome::Pass
    }

    fn violation(&self, reason: String) -> GateOutcome {
        match self.action {
            GateAction::Block => GateOutcome::Block(reason),
            GateAction::Warn => GateOutcome::Warn(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(action: GateAction, exprs: &[&str]) -> QualityGate {
        QualityGate {
            id: "g".to_string(),
            stages: vec!["tests".to_string()],
            predicates: exprs.iter().map(|e| Predicate::parse(e).unwrap()).collect(),
            action,
            blocks_promotion: action == GateAction::Block,
        }
    }

    fn results_with(metrics: &[(&str, MetricValue)]) -> HashMap<String, StageResult> {
        let mut result = StageResult::success();
        for (k, v) in metrics {
            result.metrics.insert(k.to_string(), v.clone());
        }
        HashMap::from([("tests".to_string(), result)])
    }

    #[test]
    fn test_parse_predicate_forms() {
        let p = Predicate::parse("coverage >= 80").unwrap();
        assert_eq!(p.metric, "coverage");
        assert_eq!(p.comparison, Comparison::Ge);
        assert_eq!(p.expected, MetricValue::Number(80.0));

        let p = Predicate::parse("tests_passed == true").unwrap();
        assert_eq!(p.expected, MetricValue::Bool(true));

        assert!(Predicate::parse("coverage is high").is_err());
        assert!(Predicate::parse("label > abc").is_err());
    }

    #[test]
    fn test_gate_passes() {
        let g = gate(GateAction::Block, &["coverage >= 80", "critical_vulns == 0"]);
        let results = results_with(&[
            ("coverage", MetricValue::Number(91.0)),
            ("critical_vulns", MetricValue::Number(0.0)),
        ]);
        assert_eq!(g.evaluate(&results), GateOutcome::Pass);
    }

    #[test]
    fn test_gate_blocks_on_violation() {
        let g = gate(GateAction::Block, &["coverage >= 80"]);
        let results = results_with(&[("coverage", MetricValue::Number(61.5))]);
        assert!(g.evaluate(&results).is_block());
    }

    #[test]
    fn test_warn_gate_warns() {
        let g = gate(GateAction::Warn, &["coverage >= 80"]);
        let results = results_with(&[("coverage", MetricValue::Number(10.0))]);
        assert!(matches!(g.evaluate(&results), GateOutcome::Warn(_)));
    }

    #[test]
    fn test_missing_metric_fails_predicate() {
        let g = gate(GateAction::Block, &["coverage >= 80"]);
        let results = results_with(&[]);
        assert!(g.evaluate(&results).is_block());
    }

    #[test]
    fn test_skipped_stage_skips_gate() {
        let g = gate(GateAction::Block, &["coverage >= 80"]);
        let results = HashMap::from([("tests".to_string(), StageResult::skipped("skip_tests"))]);
        assert_eq!(g.evaluate(&results), GateOutcome::Skipped);
    }
}
