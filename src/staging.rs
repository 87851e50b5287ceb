use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{Result, TransformError};
use crate::models::{RawAlert, RawSession, RawUser, StagedAlert, StagedSession, StagedUser};

pub const USER_COLUMNS: [&str; 5] = ["user_id", "gender", "condition", "age", "signup_date"];
pub const SESSION_COLUMNS: [&str; 7] = [
    "session_id",
    "user_id",
    "coach_id",
    "session_date",
    "session_type",
    "outcome_score",
    "nps_score",
];
pub const ALERT_COLUMNS: [&str; 5] = ["alert_id", "user_id", "alert_date", "alert_type", "resolved"];

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

pub fn stage_users(raw: &[RawUser]) -> Result<Vec<StagedUser>> {
    raw.iter()
        .enumerate()
        .map(|(index, row)| {
            let cast = Cast::new("users", index);
            Ok(StagedUser {
                user_id: row.user_id.trim().to_string(),
                gender: row.gender.trim().to_lowercase(),
                chronic_condition: row.condition.trim().to_string(),
                age: cast.integer("age", &row.age)?,
                signup_date: cast.date("signup_date", &row.signup_date)?,
            })
        })
        .collect()
}

pub fn stage_sessions(raw: &[RawSession]) -> Result<Vec<StagedSession>> {
    raw.iter()
        .enumerate()
        .map(|(index, row)| {
            let cast = Cast::new("sessions", index);
            Ok(StagedSession {
                session_id: row.session_id.trim().to_string(),
                user_id: row.user_id.trim().to_string(),
                coach_id: row.coach_id.trim().to_string(),
                session_date: cast.date("session_date", &row.session_date)?,
                session_type: row.session_type.trim().to_string(),
                outcome_score: cast.optional_number("outcome_score", &row.outcome_score)?,
                nps_score: cast.optional_number("nps_score", &row.nps_score)?,
            })
        })
        .collect()
}

pub fn stage_alerts(raw: &[RawAlert]) -> Result<Vec<StagedAlert>> {
    raw.iter()
        .enumerate()
        .map(|(index, row)| {
            let cast = Cast::new("alerts", index);
            Ok(StagedAlert {
                alert_id: row.alert_id.trim().to_string(),
                user_id: row.user_id.trim().to_string(),
                alert_date: cast.date("alert_date", &row.alert_date)?,
                alert_type: row.alert_type.trim().to_string(),
                resolved: cast.boolean("resolved", &row.resolved)?,
            })
        })
        .collect()
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }

    // Timestamps keep their date part.
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S"))
        .map(|timestamp| timestamp.date())
        .ok()
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Some(true),
        "false" | "f" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// Row context for cast failures.
struct Cast {
    table: &'static str,
    row: usize,
}

impl Cast {
    fn new(table: &'static str, index: usize) -> Self {
        Self {
            table,
            row: index + 1,
        }
    }

    fn fail(&self, column: &'static str, value: &str, target: &'static str) -> TransformError {
        TransformError::BadCast {
            table: self.table.to_string(),
            row: self.row,
            column,
            value: value.to_string(),
            target,
        }
    }

    fn integer(&self, column: &'static str, value: &str) -> Result<i32> {
        let trimmed = value.trim();
        trimmed
            .parse::<i32>()
            .or_else(|_| {
                // "42.0" style exports from spreadsheets
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|number| number.fract() == 0.0)
                    .filter(|number| (i32::MIN as f64..=i32::MAX as f64).contains(number))
                    .map(|number| number as i32)
                    .ok_or(())
            })
            .map_err(|_| self.fail(column, value, "integer"))
    }

    fn optional_number(&self, column: &'static str, value: &str) -> Result<Option<f64>> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        trimmed
            .parse::<f64>()
            .ok()
            .filter(|number| number.is_finite())
            .map(Some)
            .ok_or_else(|| self.fail(column, value, "number"))
    }

    fn date(&self, column: &'static str, value: &str) -> Result<NaiveDate> {
        parse_date(value).ok_or_else(|| self.fail(column, value, "date"))
    }

    fn boolean(&self, column: &'static str, value: &str) -> Result<bool> {
        parse_bool(value).ok_or_else(|| self.fail(column, value, "boolean"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_user(id: &str, gender: &str, age: &str, signup: &str) -> RawUser {
        RawUser {
            user_id: id.to_string(),
            gender: gender.to_string(),
            condition: " Diabetes ".to_string(),
            age: age.to_string(),
            signup_date: signup.to_string(),
        }
    }

    fn raw_session(outcome: &str, nps: &str) -> RawSession {
        RawSession {
            session_id: "s1".to_string(),
            user_id: "u1".to_string(),
            coach_id: "c7".to_string(),
            session_date: "2024-03-05".to_string(),
            session_type: "nutrition".to_string(),
            outcome_score: outcome.to_string(),
            nps_score: nps.to_string(),
        }
    }

    #[test]
    fn users_are_normalized() {
        let staged = stage_users(&[
            raw_user("u1", "Female", "41", "2023-06-01"),
            raw_user(" u2 ", " MALE", "67.0", "2023/07/15"),
        ])
        .unwrap();

        assert_eq!(staged[0].gender, "female");
        assert_eq!(staged[0].chronic_condition, "Diabetes");
        assert_eq!(staged[0].signup_date, NaiveDate::from_ymd_opt(2023, 6, 1).unwrap());
        assert_eq!(staged[1].user_id, "u2");
        assert_eq!(staged[1].gender, "male");
        assert_eq!(staged[1].age, 67);
        assert_eq!(staged[1].signup_date, NaiveDate::from_ymd_opt(2023, 7, 15).unwrap());
        for user in &staged {
            assert_eq!(user.gender, user.gender.to_lowercase());
        }
    }

    #[test]
    fn bad_date_reports_row_and_column() {
        let err = stage_users(&[
            raw_user("u1", "F", "30", "2023-01-01"),
            raw_user("u2", "F", "30", "2023-02-30"),
        ])
        .unwrap_err();

        match err {
            TransformError::BadCast {
                table, row, column, ..
            } => {
                assert_eq!(table, "users");
                assert_eq!(row, 2);
                assert_eq!(column, "signup_date");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn bad_age_is_rejected() {
        let err = stage_users(&[raw_user("u1", "F", "forty", "2023-01-01")]).unwrap_err();
        assert!(matches!(err, TransformError::BadCast { column: "age", .. }));
    }

    #[test]
    fn out_of_range_age_is_rejected() {
        for age in ["3000000000", "3000000000.0", "-2147483649"] {
            let err = stage_users(&[raw_user("u1", "F", age, "2023-01-01")]).unwrap_err();
            assert!(matches!(err, TransformError::BadCast { column: "age", .. }));
        }
        let staged = stage_users(&[raw_user("u1", "F", "2147483647.0", "2023-01-01")]).unwrap();
        assert_eq!(staged[0].age, i32::MAX);
    }

    #[test]
    fn empty_scores_become_null() {
        let staged = stage_sessions(&[raw_session("", " 9 ")]).unwrap();
        assert_eq!(staged[0].outcome_score, None);
        assert_eq!(staged[0].nps_score, Some(9.0));
    }

    #[test]
    fn non_numeric_score_fails() {
        let err = stage_sessions(&[raw_session("great", "9")]).unwrap_err();
        assert!(matches!(err, TransformError::BadCast { column: "outcome_score", .. }));
    }

    #[test]
    fn resolved_flag_is_coerced() {
        let alerts: Vec<RawAlert> = ["True", "0", "yes", "F"]
            .iter()
            .enumerate()
            .map(|(i, flag)| RawAlert {
                alert_id: format!("a{i}"),
                user_id: "u1".to_string(),
                alert_date: "2024-03-05T10:15:00".to_string(),
                alert_type: "glucose_spike".to_string(),
                resolved: flag.to_string(),
            })
            .collect();

        let staged = stage_alerts(&alerts).unwrap();
        let flags: Vec<bool> = staged.iter().map(|alert| alert.resolved).collect();
        assert_eq!(flags, vec![true, false, true, false]);
        assert_eq!(staged[0].alert_date, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
    }

    #[test]
    fn staging_is_deterministic() {
        let raw = vec![raw_user("u1", "Other", "17", "2022-12-31")];
        assert_eq!(stage_users(&raw).unwrap(), stage_users(&raw).unwrap());
    }
}
