use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Raw `users.csv` row. Every field is kept as text until staging casts it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawUser {
    pub user_id: String,
    pub gender: String,
    pub condition: String,
    pub age: String,
    pub signup_date: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawSession {
    pub session_id: String,
    pub user_id: String,
    pub coach_id: String,
    pub session_date: String,
    pub session_type: String,
    pub outcome_score: String,
    pub nps_score: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawAlert {
    pub alert_id: String,
    pub user_id: String,
    pub alert_date: String,
    pub alert_type: String,
    pub resolved: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngagementRecord {
    pub user_id: String,
    pub age: f64,
    pub active_days: f64,
    pub avg_steps: f64,
    pub dropout_risk: u8,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StagedUser {
    pub user_id: String,
    pub gender: String,
    pub chronic_condition: String,
    pub age: i32,
    pub signup_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StagedSession {
    pub session_id: String,
    pub user_id: String,
    pub coach_id: String,
    pub session_date: NaiveDate,
    pub session_type: String,
    pub outcome_score: Option<f64>,
    pub nps_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StagedAlert {
    pub alert_id: String,
    pub user_id: String,
    pub alert_date: NaiveDate,
    pub alert_type: String,
    pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DimUser {
    pub user_id: String,
    pub gender: String,
    pub chronic_condition: String,
    pub age: i32,
    pub age_group: String,
    pub signup_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SessionFact {
    pub user_id: String,
    pub total_sessions: i64,
    pub avg_outcome_score: Option<f64>,
    pub avg_nps_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AlertFact {
    pub user_id: String,
    pub alert_type: String,
    pub total_alerts: i64,
    pub resolved_alerts: i64,
    pub resolution_rate: f64,
}

#[derive(Debug, Clone)]
pub struct SessionTypeSummary {
    pub session_type: String,
    pub count: usize,
    pub avg_outcome_score: Option<f64>,
    pub avg_nps_score: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct AlertTypeSummary {
    pub alert_type: String,
    pub total_alerts: usize,
    pub resolution_rate: f64,
}
