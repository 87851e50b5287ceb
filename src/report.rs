use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;

use crate::marts::round2;
use crate::models::{
    AlertTypeSummary, EngagementRecord, SessionTypeSummary, StagedAlert, StagedSession,
    StagedUser,
};

const STEP_BINS: usize = 30;

/// Source tables the dashboard reads.
#[derive(Debug, Clone, Default)]
pub struct DashboardData {
    pub users: Vec<StagedUser>,
    pub engagement: Vec<EngagementRecord>,
    pub sessions: Vec<StagedSession>,
    pub alerts: Vec<StagedAlert>,
}

impl DashboardData {
    /// Restricts every table to users with the given chronic condition.
    pub fn for_condition(&self, condition: &str) -> DashboardData {
        let users: Vec<StagedUser> = self
            .users
            .iter()
            .filter(|user| user.chronic_condition == condition)
            .cloned()
            .collect();
        let ids: HashSet<&str> = users.iter().map(|user| user.user_id.as_str()).collect();

        DashboardData {
            engagement: self
                .engagement
                .iter()
                .filter(|row| ids.contains(row.user_id.as_str()))
                .cloned()
                .collect(),
            sessions: self
                .sessions
                .iter()
                .filter(|row| ids.contains(row.user_id.as_str()))
                .cloned()
                .collect(),
            alerts: self
                .alerts
                .iter()
                .filter(|row| ids.contains(row.user_id.as_str()))
                .cloned()
                .collect(),
            users,
        }
    }

    pub fn conditions(&self) -> Vec<String> {
        let mut conditions: Vec<String> = self
            .users
            .iter()
            .map(|user| user.chronic_condition.clone())
            .collect();
        conditions.sort();
        conditions.dedup();
        conditions
    }
}

pub fn summarize_sessions(sessions: &[StagedSession]) -> Vec<SessionTypeSummary> {
    let mut map: BTreeMap<&str, (usize, Vec<f64>, Vec<f64>)> = BTreeMap::new();

    for session in sessions {
        let entry = map.entry(session.session_type.as_str()).or_default();
        entry.0 += 1;
        entry.1.extend(session.outcome_score);
        entry.2.extend(session.nps_score);
    }

    map.into_iter()
        .map(|(session_type, (count, outcomes, nps))| SessionTypeSummary {
            session_type: session_type.to_string(),
            count,
            avg_outcome_score: mean(&outcomes),
            avg_nps_score: mean(&nps),
        })
        .collect()
}

pub fn summarize_alerts(alerts: &[StagedAlert]) -> Vec<AlertTypeSummary> {
    let mut map: BTreeMap<&str, (usize, usize)> = BTreeMap::new();

    for alert in alerts {
        let entry = map.entry(alert.alert_type.as_str()).or_insert((0, 0));
        entry.0 += 1;
        if alert.resolved {
            entry.1 += 1;
        }
    }

    map.into_iter()
        .map(|(alert_type, (total, resolved))| AlertTypeSummary {
            alert_type: alert_type.to_string(),
            total_alerts: total,
            resolution_rate: resolved as f64 / total as f64,
        })
        .collect()
}

/// Equal-width bins over `[min, max]`; the last bin is closed on the right.
pub fn histogram(values: &[f64], bins: usize) -> Vec<(f64, f64, usize)> {
    if values.is_empty() || bins == 0 {
        return Vec::new();
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let width = if max > min { (max - min) / bins as f64 } else { 1.0 };

    let mut counts = vec![0usize; bins];
    for value in values {
        let index = (((value - min) / width) as usize).min(bins - 1);
        counts[index] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(index, count)| {
            let lower = min + index as f64 * width;
            (lower, lower + width, count)
        })
        .collect()
}

pub fn build_dashboard(condition: Option<&str>, data: &DashboardData) -> String {
    let filtered;
    let data = match condition {
        Some(condition) => {
            filtered = data.for_condition(condition);
            &filtered
        }
        None => data,
    };

    let mut output = String::new();
    let condition_label = condition.unwrap_or("all conditions");

    let _ = writeln!(output, "# ChronicCare Analytics Dashboard");
    let _ = writeln!(output, "Filtered to {condition_label}");
    let _ = writeln!(output);
    let _ = writeln!(output, "## Engagement Overview");

    if data.engagement.is_empty() {
        let _ = writeln!(output, "No engagement records for this selection.");
    } else {
        let rows = data.engagement.len() as f64;
        let avg_steps = data.engagement.iter().map(|row| row.avg_steps).sum::<f64>() / rows;
        let risk = data
            .engagement
            .iter()
            .map(|row| f64::from(row.dropout_risk))
            .sum::<f64>()
            / rows;
        let _ = writeln!(output, "- Active users: {}", data.engagement.len());
        let _ = writeln!(output, "- Avg steps: {}", avg_steps.trunc() as i64);
        let _ = writeln!(output, "- Dropout risk: {:.1}%", risk * 100.0);

        let steps: Vec<f64> = data.engagement.iter().map(|row| row.avg_steps).collect();
        let _ = writeln!(output);
        let _ = writeln!(output, "## Average Daily Steps");
        for (lower, upper, count) in histogram(&steps, STEP_BINS) {
            if count > 0 {
                let _ = writeln!(output, "- {lower:.0}-{upper:.0}: {count}");
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Session Outcomes");

    let sessions = summarize_sessions(&data.sessions);
    if sessions.is_empty() {
        let _ = writeln!(output, "No sessions recorded for this selection.");
    } else {
        for summary in &sessions {
            let _ = writeln!(
                output,
                "- {}: {} sessions (avg outcome {}, avg NPS {})",
                summary.session_type,
                summary.count,
                format_score(summary.avg_outcome_score),
                format_score(summary.avg_nps_score)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Alert Resolution");

    let alerts = summarize_alerts(&data.alerts);
    if alerts.is_empty() {
        let _ = writeln!(output, "No alerts recorded for this selection.");
    } else {
        for summary in &alerts {
            let _ = writeln!(
                output,
                "- {}: {} alerts, {:.0}% resolved",
                summary.alert_type,
                summary.total_alerts,
                summary.resolution_rate * 100.0
            );
        }
    }

    output
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| round2(values.iter().sum::<f64>() / values.len() as f64))
}

fn format_score(score: Option<f64>) -> String {
    score.map_or_else(|| "n/a".to_string(), |value| format!("{value:.2}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample() -> DashboardData {
        let day = NaiveDate::from_ymd_opt(2024, 4, 2).unwrap();
        let user = |id: &str, condition: &str| StagedUser {
            user_id: id.to_string(),
            gender: "female".to_string(),
            chronic_condition: condition.to_string(),
            age: 40,
            signup_date: day,
        };
        let engagement = |id: &str, steps: f64, risk: u8| EngagementRecord {
            user_id: id.to_string(),
            age: 40.0,
            active_days: 12.0,
            avg_steps: steps,
            dropout_risk: risk,
        };
        let session = |id: &str, kind: &str, outcome: f64| StagedSession {
            session_id: format!("{id}-{kind}"),
            user_id: id.to_string(),
            coach_id: "c1".to_string(),
            session_date: day,
            session_type: kind.to_string(),
            outcome_score: Some(outcome),
            nps_score: None,
        };
        let alert = |id: &str, kind: &str, resolved: bool| StagedAlert {
            alert_id: format!("{id}-{kind}"),
            user_id: id.to_string(),
            alert_date: day,
            alert_type: kind.to_string(),
            resolved,
        };

        DashboardData {
            users: vec![user("u1", "Diabetes"), user("u2", "Hypertension")],
            engagement: vec![engagement("u1", 4000.0, 1), engagement("u2", 9001.0, 0)],
            sessions: vec![
                session("u1", "nutrition", 6.0),
                session("u2", "nutrition", 9.0),
                session("u2", "fitness", 7.0),
            ],
            alerts: vec![
                alert("u1", "glucose_spike", true),
                alert("u1", "glucose_spike", false),
                alert("u2", "bp_high", true),
            ],
        }
    }

    #[test]
    fn dashboard_covers_all_sections() {
        let report = build_dashboard(None, &sample());
        assert!(report.contains("Filtered to all conditions"));
        assert!(report.contains("- Active users: 2"));
        assert!(report.contains("- Avg steps: 6500"));
        assert!(report.contains("- Dropout risk: 50.0%"));
        assert!(report.contains("- nutrition: 2 sessions (avg outcome 7.50, avg NPS n/a)"));
        assert!(report.contains("- glucose_spike: 2 alerts, 50% resolved"));
    }

    #[test]
    fn condition_filter_applies_to_every_table() {
        let report = build_dashboard(Some("Hypertension"), &sample());
        assert!(report.contains("- Active users: 1"));
        assert!(report.contains("- fitness: 1 sessions"));
        assert!(!report.contains("glucose_spike"));
    }

    #[test]
    fn unknown_condition_renders_empty_sections() {
        let report = build_dashboard(Some("Asthma"), &sample());
        assert!(report.contains("No engagement records for this selection."));
        assert!(report.contains("No sessions recorded for this selection."));
        assert!(report.contains("No alerts recorded for this selection."));
    }

    #[test]
    fn alert_rows_follow_alert_type_order() {
        let report = build_dashboard(None, &sample());
        let bp = report.find("- bp_high:").unwrap();
        let glucose = report.find("- glucose_spike:").unwrap();
        assert!(bp < glucose);
    }

    #[test]
    fn steps_histogram_covers_every_value() {
        let bins = histogram(&[1000.0, 1500.0, 4000.0, 4000.0], 3);
        assert_eq!(bins.len(), 3);
        assert_eq!(bins[0], (1000.0, 2000.0, 2));
        assert_eq!(bins[1].2, 0);
        assert_eq!(bins[2], (3000.0, 4000.0, 2));
        assert!(histogram(&[], 30).is_empty());
        assert_eq!(histogram(&[7.0, 7.0], 30)[0].2, 2);
    }

    #[test]
    fn dashboard_lists_step_distribution() {
        let report = build_dashboard(None, &sample());
        assert!(report.contains("## Average Daily Steps"));
        assert!(report.contains("- 4000-4167: 1"));
        assert!(report.contains(": 1\n"));
    }

    #[test]
    fn conditions_are_sorted_and_unique() {
        assert_eq!(sample().conditions(), vec!["Diabetes", "Hypertension"]);
    }
}
