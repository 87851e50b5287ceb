use sqlx::{PgPool, Postgres, Transaction};

use crate::models::{AlertFact, DimUser, SessionFact};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Mart tables to materialize in Postgres.
pub struct MartTables<'a> {
    pub dim_users: &'a [DimUser],
    pub fct_sessions: &'a [SessionFact],
    pub fct_alerts: &'a [AlertFact],
}

/// Replaces the mart tables in one transaction. Incremental runs upsert
/// `fct_sessions` by user instead of truncating it.
pub async fn publish_marts(
    pool: &PgPool,
    marts: &MartTables<'_>,
    incremental: bool,
) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("TRUNCATE chroniccare.dim_users, chroniccare.fct_alerts")
        .execute(&mut *tx)
        .await?;
    if !incremental {
        sqlx::query("TRUNCATE chroniccare.fct_sessions")
            .execute(&mut *tx)
            .await?;
    }

    insert_dim_users(&mut tx, marts.dim_users).await?;
    upsert_fct_sessions(&mut tx, marts.fct_sessions).await?;
    insert_fct_alerts(&mut tx, marts.fct_alerts).await?;

    tx.commit().await?;
    Ok(())
}

async fn insert_dim_users(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[DimUser],
) -> anyhow::Result<()> {
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO chroniccare.dim_users
            (user_id, gender, chronic_condition, age, age_group, signup_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&row.user_id)
        .bind(&row.gender)
        .bind(&row.chronic_condition)
        .bind(row.age)
        .bind(&row.age_group)
        .bind(row.signup_date)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn upsert_fct_sessions(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[SessionFact],
) -> anyhow::Result<()> {
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO chroniccare.fct_sessions
            (user_id, total_sessions, avg_outcome_score, avg_nps_score)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE
            SET total_sessions = EXCLUDED.total_sessions,
                avg_outcome_score = EXCLUDED.avg_outcome_score,
                avg_nps_score = EXCLUDED.avg_nps_score
            "#,
        )
        .bind(&row.user_id)
        .bind(row.total_sessions)
        .bind(row.avg_outcome_score)
        .bind(row.avg_nps_score)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

async fn insert_fct_alerts(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[AlertFact],
) -> anyhow::Result<()> {
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO chroniccare.fct_alerts
            (user_id, alert_type, total_alerts, resolved_alerts, resolution_rate)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&row.user_id)
        .bind(&row.alert_type)
        .bind(row.total_alerts)
        .bind(row.resolved_alerts)
        .bind(row.resolution_rate)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}
