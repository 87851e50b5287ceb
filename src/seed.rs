use std::path::Path;

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::models::{EngagementRecord, RawAlert, RawSession, RawUser};
use crate::warehouse::write_rows;

const CONDITIONS: [&str; 4] = ["Diabetes", "Hypertension", "COPD", "Heart Disease"];
const GENDERS: [&str; 3] = ["Female", "Male", "Other"];
const SESSION_TYPES: [&str; 4] = ["nutrition", "fitness", "medication_review", "mental_health"];
const ALERT_TYPES: [&str; 4] = ["glucose_spike", "bp_high", "missed_medication", "inactivity"];

#[derive(Debug, Clone, Default)]
pub struct SampleData {
    pub users: Vec<RawUser>,
    pub sessions: Vec<RawSession>,
    pub alerts: Vec<RawAlert>,
    pub engagement: Vec<EngagementRecord>,
}

/// Generates `user_count` users with sessions and alerts dated up to `end`.
pub fn generate(user_count: usize, seed: u64, end: NaiveDate) -> SampleData {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = SampleData::default();

    for index in 0..user_count {
        let user_id = format!("U{:04}", index + 1);
        let age: i32 = rng.random_range(12..=85);
        let signup = end - Duration::days(rng.random_range(30..=720));

        data.users.push(RawUser {
            user_id: user_id.clone(),
            gender: GENDERS[rng.random_range(0..GENDERS.len())].to_string(),
            condition: CONDITIONS[rng.random_range(0..CONDITIONS.len())].to_string(),
            age: age.to_string(),
            signup_date: signup.format("%Y-%m-%d").to_string(),
        });

        let active_days = rng.random_range(0..=30) as f64;
        let avg_steps = (2000.0 + active_days * 250.0 + rng.random_range(-1500.0..1500.0)).max(0.0);
        let dropout_risk = u8::from(active_days < 10.0 || rng.random_bool(0.1));
        data.engagement.push(EngagementRecord {
            user_id: user_id.clone(),
            age: f64::from(age),
            active_days,
            avg_steps: avg_steps.round(),
            dropout_risk,
        });

        let span = (end - signup).num_days().max(1);
        for _ in 0..rng.random_range(1..=6) {
            let session_date = end - Duration::days(rng.random_range(0..span));
            // Roughly one in twenty sessions has no recorded NPS.
            let nps = if rng.random_bool(0.05) {
                String::new()
            } else {
                rng.random_range(0..=10).to_string()
            };
            data.sessions.push(RawSession {
                session_id: format!("S{:05}", data.sessions.len() + 1),
                user_id: user_id.clone(),
                coach_id: format!("C{:02}", rng.random_range(1..=12)),
                session_date: session_date.format("%Y-%m-%d").to_string(),
                session_type: SESSION_TYPES[rng.random_range(0..SESSION_TYPES.len())].to_string(),
                outcome_score: rng.random_range(1..=10).to_string(),
                nps_score: nps,
            });
        }

        for _ in 0..rng.random_range(0..=4) {
            let alert_date = end - Duration::days(rng.random_range(0..span));
            data.alerts.push(RawAlert {
                alert_id: format!("A{:05}", data.alerts.len() + 1),
                user_id: user_id.clone(),
                alert_date: alert_date.format("%Y-%m-%d").to_string(),
                alert_type: ALERT_TYPES[rng.random_range(0..ALERT_TYPES.len())].to_string(),
                resolved: rng.random_bool(0.7).to_string(),
            });
        }
    }

    data
}

pub fn write_sample(data: &SampleData, config: &PipelineConfig) -> Result<()> {
    write_rows(&config.users_csv(), &data.users)?;
    write_rows(&config.sessions_csv(), &data.sessions)?;
    write_rows(&config.alerts_csv(), &data.alerts)?;
    write_rows(&config.engagement_csv(), &data.engagement)?;
    tracing::info!(
        dir = %config.data_dir.display(),
        users = data.users.len(),
        sessions = data.sessions.len(),
        alerts = data.alerts.len(),
        "sample data written"
    );
    Ok(())
}

pub fn sample_exists(data_dir: &Path) -> bool {
    data_dir.join("users.csv").is_file()
}
