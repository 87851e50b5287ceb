use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};

use crate::models::{AlertFact, DimUser, SessionFact, StagedAlert, StagedSession, StagedUser};

pub const AGE_GROUPS: [&str; 4] = ["Under 18", "18-34", "35-49", "50+"];

pub fn age_group(age: i32) -> &'static str {
    match age {
        i32::MIN..=17 => AGE_GROUPS[0],
        18..=34 => AGE_GROUPS[1],
        35..=49 => AGE_GROUPS[2],
        _ => AGE_GROUPS[3],
    }
}

pub fn build_dim_users(users: &[StagedUser]) -> Vec<DimUser> {
    let mut rows: Vec<DimUser> = users
        .iter()
        .map(|user| DimUser {
            user_id: user.user_id.clone(),
            gender: user.gender.clone(),
            chronic_condition: user.chronic_condition.clone(),
            age: user.age,
            age_group: age_group(user.age).to_string(),
            signup_date: user.signup_date,
        })
        .collect();
    rows.sort_by(|a, b| a.user_id.cmp(&b.user_id));
    rows
}

/// Running mean that skips nulls.
#[derive(Default)]
struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    fn push(&mut self, value: Option<f64>) {
        if let Some(value) = value {
            self.sum += value;
            self.count += 1;
        }
    }

    fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| round2(self.sum / self.count as f64))
    }
}

#[derive(Default)]
struct SessionAccumulator {
    total: i64,
    outcome: Mean,
    nps: Mean,
}

pub fn build_fct_sessions(sessions: &[StagedSession]) -> Vec<SessionFact> {
    let mut groups: BTreeMap<&str, SessionAccumulator> = BTreeMap::new();

    for session in sessions {
        let entry = groups.entry(session.user_id.as_str()).or_default();
        entry.total += 1;
        entry.outcome.push(session.outcome_score);
        entry.nps.push(session.nps_score);
    }

    groups
        .into_iter()
        .map(|(user_id, acc)| SessionFact {
            user_id: user_id.to_string(),
            total_sessions: acc.total,
            avg_outcome_score: acc.outcome.value(),
            avg_nps_score: acc.nps.value(),
        })
        .collect()
}

/// Incremental refresh of `fct_sessions`.
///
/// Only sessions dated on or after `as_of - window_days` are aggregated. Each
/// resulting row replaces the existing row for that user; rows for users with no
/// session in the window are carried over untouched.
pub fn refresh_fct_sessions(
    existing: &[SessionFact],
    sessions: &[StagedSession],
    as_of: NaiveDate,
    window_days: i64,
) -> Vec<SessionFact> {
    let cutoff = window_start(as_of, window_days);
    let recent: Vec<StagedSession> = sessions
        .iter()
        .filter(|session| session.session_date >= cutoff)
        .cloned()
        .collect();

    let mut merged: BTreeMap<String, SessionFact> = existing
        .iter()
        .map(|fact| (fact.user_id.clone(), fact.clone()))
        .collect();
    for fact in build_fct_sessions(&recent) {
        merged.insert(fact.user_id.clone(), fact);
    }
    merged.into_values().collect()
}

pub fn window_start(as_of: NaiveDate, window_days: i64) -> NaiveDate {
    as_of - Duration::days(window_days.max(0))
}

pub fn build_fct_alerts(alerts: &[StagedAlert]) -> Vec<AlertFact> {
    let mut groups: BTreeMap<(&str, &str), (i64, i64)> = BTreeMap::new();

    for alert in alerts {
        let entry = groups
            .entry((alert.user_id.as_str(), alert.alert_type.as_str()))
            .or_insert((0, 0));
        entry.0 += 1;
        if alert.resolved {
            entry.1 += 1;
        }
    }

    groups
        .into_iter()
        .map(|((user_id, alert_type), (total, resolved))| AlertFact {
            user_id: user_id.to_string(),
            alert_type: alert_type.to_string(),
            total_alerts: total,
            resolved_alerts: resolved,
            resolution_rate: round2(resolved as f64 / total as f64),
        })
        .collect()
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
