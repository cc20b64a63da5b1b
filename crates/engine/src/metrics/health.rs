//! Threshold-based health scoring

use serde::{Deserialize, Serialize};

use super::aggregator::MetricsSnapshot;

/// Overall health verdict, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Warning,
    Critical,
}

impl std::fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
        })
    }
}

/// Health verdict derived from one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthLevel,
    /// 0-100
    pub score: u32,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

struct Threshold {
    limit: f64,
    deduction: u32,
    issue: &'static str,
    recommendation: &'static str,
}

/// One axis of the health check. `reading` returns `None` when the axis does
/// not apply to the snapshot.
struct HealthRule {
    reading: fn(&MetricsSnapshot) -> Option<f64>,
    warning: Threshold,
    critical: Threshold,
}

const RULES: &[HealthRule] = &[
    HealthRule {
        reading: |s| Some(s.avg_response_time_ms),
        warning: Threshold {
            limit: 100.0,
            deduction: 20,
            issue: "High response time (>100ms)",
            recommendation: "Monitor database performance and consider caching",
        },
        critical: Threshold {
            limit: 500.0,
            deduction: 40,
            issue: "Very high response time (>500ms)",
            recommendation: "Consider scaling up the service or optimizing database queries",
        },
    },
    HealthRule {
        reading: |s| Some(s.queue_depth as f64),
        warning: Threshold {
            limit: 100.0,
            deduction: 15,
            issue: "High queue depth (>100)",
            recommendation: "Monitor task processing speed",
        },
        critical: Threshold {
            limit: 500.0,
            deduction: 30,
            issue: "Very high queue depth (>500)",
            recommendation: "Increase inbox worker count or check for processing bottlenecks",
        },
    },
    HealthRule {
        reading: MetricsSnapshot::error_rate,
        warning: Threshold {
            limit: 1.0,
            deduction: 10,
            issue: "Elevated error rate (>1%)",
            recommendation: "Monitor error logs for patterns",
        },
        critical: Threshold {
            limit: 5.0,
            deduction: 35,
            issue: "High error rate (>5%)",
            recommendation: "Investigate application errors and system issues",
        },
    },
    HealthRule {
        reading: |s| Some(s.memory_usage_mb),
        warning: Threshold {
            limit: 512.0,
            deduction: 10,
            issue: "High memory usage (>512MB)",
            recommendation: "Monitor memory usage trends",
        },
        critical: Threshold {
            limit: 1024.0,
            deduction: 25,
            issue: "Very high memory usage (>1GB)",
            recommendation: "Check for memory leaks and consider scaling",
        },
    },
    HealthRule {
        reading: |s| Some(s.worker_count as f64),
        warning: Threshold {
            limit: 1000.0,
            deduction: 10,
            issue: "High concurrent task count (>1000)",
            recommendation: "Monitor runtime task usage",
        },
        critical: Threshold {
            limit: 5000.0,
            deduction: 20,
            issue: "Very high concurrent task count (>5000)",
            recommendation: "Check for leaked or stuck tasks",
        },
    },
];

/// Derives a [`HealthStatus`] from a [`MetricsSnapshot`]
///
/// Starts at 100 and `healthy`; every breached axis deducts its penalty and
/// raises the level. The level never drops back and the score stops at 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthScorer;

impl HealthScorer {
    pub fn evaluate(snapshot: &MetricsSnapshot) -> HealthStatus {
        let mut status = HealthStatus {
            status: HealthLevel::Healthy,
            score: 100,
            issues: vec![],
            recommendations: vec![],
        };

        for rule in RULES {
            let Some(value) = (rule.reading)(snapshot) else {
                continue;
            };

            let (level, threshold) = if value > rule.critical.limit {
                (HealthLevel::Critical, &rule.critical)
            } else if value > rule.warning.limit {
                (HealthLevel::Warning, &rule.warning)
            } else {
                continue;
            };

            status.status = status.status.max(level);
            status.score = status.score.saturating_sub(threshold.deduction);
            status.issues.push(threshold.issue.to_string());
            status
                .recommendations
                .push(threshold.recommendation.to_string());
        }

        status
    }
}

impl MetricsSnapshot {
    /// Shorthand for [`HealthScorer::evaluate`]
    pub fn health(&self) -> HealthStatus {
        HealthScorer::evaluate(self)
    }
}
