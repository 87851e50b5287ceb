use std::fmt;
use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;

use crate::config::PipelineConfig;
use crate::db;
use crate::marts;
use crate::models::{
    AlertFact, DimUser, EngagementRecord, RawAlert, RawSession, RawUser, SessionFact,
    StagedAlert, StagedSession, StagedUser,
};
use crate::staging::{self, ALERT_COLUMNS, SESSION_COLUMNS, USER_COLUMNS};
use crate::train::{self, ENGAGEMENT_COLUMNS};
use crate::warehouse::{read_source, Table, Warehouse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Stage,
    Marts,
    Publish,
    Train,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Stage => "stage",
            Step::Marts => "marts",
            Step::Publish => "publish",
            Step::Train => "train",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub incremental: bool,
    /// Reference date for the incremental window.
    pub as_of: NaiveDate,
    pub skip_training: bool,
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: Step,
    pub outputs: Vec<PathBuf>,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub steps: Vec<StepReport>,
}

pub struct Pipeline {
    config: PipelineConfig,
    warehouse: Warehouse,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let warehouse = Warehouse::new(&config.warehouse_dir);
        Self { config, warehouse }
    }

    #[cfg(test)]
    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    /// Steps in execution order for the given options.
    pub fn plan(&self, options: &RunOptions) -> Vec<Step> {
        let mut steps = vec![Step::Stage, Step::Marts];
        if self.config.database_url.is_some() {
            steps.push(Step::Publish);
        }
        if !options.skip_training {
            steps.push(Step::Train);
        }
        steps
    }

    pub async fn run(&self, options: &RunOptions) -> anyhow::Result<RunSummary> {
        let mut summary = RunSummary::default();

        for step in self.plan(options) {
            tracing::info!(%step, incremental = options.incremental, "step started");
            let report = self
                .run_step(step, options)
                .await
                .with_context(|| format!("pipeline step `{step}` failed"))?;
            tracing::info!(%step, detail = %report.detail, "step finished");
            summary.steps.push(report);
        }

        Ok(summary)
    }

    async fn run_step(&self, step: Step, options: &RunOptions) -> anyhow::Result<StepReport> {
        match step {
            Step::Stage => self.stage(),
            Step::Marts => self.build_marts(options),
            Step::Publish => self.publish(options).await,
            Step::Train => self.train(),
        }
    }

    fn stage(&self) -> anyhow::Result<StepReport> {
        let raw_users: Vec<RawUser> =
            read_source(&self.config.users_csv(), "users", &USER_COLUMNS)?;
        let raw_sessions: Vec<RawSession> =
            read_source(&self.config.sessions_csv(), "sessions", &SESSION_COLUMNS)?;
        let raw_alerts: Vec<RawAlert> =
            read_source(&self.config.alerts_csv(), "alerts", &ALERT_COLUMNS)?;

        let users = staging::stage_users(&raw_users)?;
        let sessions = staging::stage_sessions(&raw_sessions)?;
        let alerts = staging::stage_alerts(&raw_alerts)?;

        let outputs = vec![
            self.warehouse.write(Table::StgUsers, &users)?,
            self.warehouse.write(Table::StgSessions, &sessions)?,
            self.warehouse.write(Table::StgAlerts, &alerts)?,
        ];

        Ok(StepReport {
            step: Step::Stage,
            outputs,
            detail: format!(
                "{} users, {} sessions, {} alerts staged",
                users.len(),
                sessions.len(),
                alerts.len()
            ),
        })
    }

    fn build_marts(&self, options: &RunOptions) -> anyhow::Result<StepReport> {
        if let Some(missing) = Table::STAGING
            .into_iter()
            .find(|table| !self.warehouse.exists(*table))
        {
            anyhow::bail!("staging table `{}` is missing; run staging first", missing.name());
        }

        let users: Vec<StagedUser> = self.warehouse.read(Table::StgUsers)?;
        let sessions: Vec<StagedSession> = self.warehouse.read(Table::StgSessions)?;
        let alerts: Vec<StagedAlert> = self.warehouse.read(Table::StgAlerts)?;

        let dim_users = marts::build_dim_users(&users);
        let fct_alerts = marts::build_fct_alerts(&alerts);
        let fct_sessions = if options.incremental {
            let existing: Vec<SessionFact> = if self.warehouse.exists(Table::FctSessions) {
                self.warehouse.read(Table::FctSessions)?
            } else {
                tracing::warn!(
                    "no existing fct_sessions; incremental run only covers the trailing window"
                );
                Vec::new()
            };
            marts::refresh_fct_sessions(
                &existing,
                &sessions,
                options.as_of,
                self.config.incremental_window_days,
            )
        } else {
            marts::build_fct_sessions(&sessions)
        };

        let outputs = vec![
            self.warehouse.write(Table::DimUsers, &dim_users)?,
            self.warehouse.write(Table::FctSessions, &fct_sessions)?,
            self.warehouse.write(Table::FctAlerts, &fct_alerts)?,
        ];

        Ok(StepReport {
            step: Step::Marts,
            outputs,
            detail: format!(
                "{} dim_users, {} fct_sessions, {} fct_alerts rows",
                dim_users.len(),
                fct_sessions.len(),
                fct_alerts.len()
            ),
        })
    }

    async fn publish(&self, options: &RunOptions) -> anyhow::Result<StepReport> {
        let database_url = self
            .config
            .database_url
            .as_deref()
            .context("database_url must be set to publish marts")?;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("failed to connect to Postgres")?;

        let dim_users: Vec<DimUser> = self.warehouse.read(Table::DimUsers)?;
        let fct_sessions: Vec<SessionFact> = self.warehouse.read(Table::FctSessions)?;
        let fct_alerts: Vec<AlertFact> = self.warehouse.read(Table::FctAlerts)?;

        db::init_db(&pool).await?;
        db::publish_marts(
            &pool,
            &db::MartTables {
                dim_users: &dim_users,
                fct_sessions: &fct_sessions,
                fct_alerts: &fct_alerts,
            },
            options.incremental,
        )
        .await?;

        Ok(StepReport {
            step: Step::Publish,
            outputs: Vec::new(),
            detail: format!(
                "{} published to chroniccare schema",
                Table::MARTS.map(Table::name).join(", ")
            ),
        })
    }

    fn train(&self) -> anyhow::Result<StepReport> {
        let records: Vec<EngagementRecord> = read_source(
            &self.config.engagement_csv(),
            "engagement",
            &ENGAGEMENT_COLUMNS,
        )?;

        let outcome = train::train_model(&records, &self.config.training)?;
        let model_path = self.config.model_path();
        let runs_dir = self.config.runs_dir();
        train::save_outcome(&outcome, &model_path, &runs_dir)
            .with_context(|| format!("failed to save model to {}", model_path.display()))?;

        Ok(StepReport {
            step: Step::Train,
            outputs: vec![
                model_path,
                runs_dir.join(format!("{}.json", outcome.run.run_id)),
            ],
            detail: match outcome.loss_history.first() {
                Some(initial) => format!(
                    "loss {initial:.4} -> final_loss {:.4}",
                    outcome.run.final_loss
                ),
                None => "no epochs run".to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed;
    use std::fs;
    use std::io::Write;

    fn config_in(dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            data_dir: dir.join("data"),
            warehouse_dir: dir.join("warehouse"),
            artifacts_dir: dir.join("artifacts"),
            database_url: None,
            ..PipelineConfig::default()
        }
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
    }

    fn full_run() -> RunOptions {
        RunOptions {
            incremental: false,
            as_of: as_of(),
            skip_training: false,
        }
    }

    fn seeded(dir: &std::path::Path) -> PipelineConfig {
        let config = config_in(dir);
        seed::write_sample(&seed::generate(30, 5, as_of()), &config).unwrap();
        config
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn full_run_produces_every_table_and_model() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(seeded(dir.path()));

        let summary = block_on(pipeline.run(&full_run())).unwrap();
        let steps: Vec<Step> = summary.steps.iter().map(|report| report.step).collect();
        assert_eq!(steps, vec![Step::Stage, Step::Marts, Step::Train]);

        for table in Table::STAGING.into_iter().chain(Table::MARTS) {
            assert!(pipeline.warehouse().exists(table), "{} missing", table.name());
        }
        assert!(dir.path().join("artifacts/engagement_model.json").is_file());

        let users: Vec<DimUser> = pipeline.warehouse().read(Table::DimUsers).unwrap();
        assert_eq!(users.len(), 30);
        assert!(users
            .iter()
            .all(|user| marts::AGE_GROUPS.contains(&user.age_group.as_str())));
    }

    #[test]
    fn rerunning_full_sequence_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(seeded(dir.path()));
        let options = RunOptions {
            skip_training: true,
            ..full_run()
        };

        block_on(pipeline.run(&options)).unwrap();
        let first: Vec<String> = Table::MARTS
            .iter()
            .map(|table| fs::read_to_string(pipeline.warehouse().path(*table)).unwrap())
            .collect();

        block_on(pipeline.run(&options)).unwrap();
        let second: Vec<String> = Table::MARTS
            .iter()
            .map(|table| fs::read_to_string(pipeline.warehouse().path(*table)).unwrap())
            .collect();

        assert_eq!(first, second);
    }

    #[test]
    fn incremental_run_replaces_only_recent_users() {
        let dir = tempfile::tempdir().unwrap();
        let config = seeded(dir.path());
        let sessions_csv = config.sessions_csv();
        let pipeline = Pipeline::new(config);
        let options = RunOptions {
            skip_training: true,
            ..full_run()
        };
        block_on(pipeline.run(&options)).unwrap();
        let before: Vec<SessionFact> = pipeline.warehouse().read(Table::FctSessions).unwrap();

        let mut file = fs::OpenOptions::new().append(true).open(&sessions_csv).unwrap();
        writeln!(file, "S99999,U0001,C01,{},nutrition,9,4", as_of().format("%Y-%m-%d")).unwrap();
        drop(file);

        let incremental = RunOptions {
            incremental: true,
            ..options
        };
        block_on(pipeline.run(&incremental)).unwrap();
        let after: Vec<SessionFact> = pipeline.warehouse().read(Table::FctSessions).unwrap();

        let sessions: Vec<StagedSession> = pipeline.warehouse().read(Table::StgSessions).unwrap();
        let cutoff = marts::window_start(as_of(), 1);
        let recent: Vec<StagedSession> = sessions
            .into_iter()
            .filter(|session| session.session_date >= cutoff)
            .collect();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].user_id, "U0001");

        let expected = marts::build_fct_sessions(&recent);
        assert_eq!(before.len(), after.len());
        for (old, new) in before.iter().zip(&after) {
            assert_eq!(old.user_id, new.user_id);
            if new.user_id == "U0001" {
                assert_eq!(new, &expected[0]);
                assert_eq!(new.total_sessions, 1);
                assert_eq!(new.avg_outcome_score, Some(9.0));
                assert_eq!(new.avg_nps_score, Some(4.0));
            } else {
                assert_eq!(old, new);
            }
        }
    }

    #[test]
    fn bad_source_aborts_before_marts() {
        let dir = tempfile::tempdir().unwrap();
        let config = seeded(dir.path());
        fs::write(
            config.users_csv(),
            "user_id,gender,condition,age,signup_date\nU0001,F,COPD,old,2024-01-01\n",
        )
        .unwrap();
        let pipeline = Pipeline::new(config);

        let err = block_on(pipeline.run(&full_run())).unwrap_err();
        assert!(format!("{err:#}").contains("pipeline step `stage` failed"));
        assert!(!pipeline.warehouse().exists(Table::DimUsers));
        assert!(!dir.path().join("artifacts").exists());
    }

    #[test]
    fn marts_require_staged_tables() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(seeded(dir.path()));

        let err = pipeline.build_marts(&full_run()).unwrap_err();
        assert!(err.to_string().contains("staging table `stg_users` is missing"));
    }

    #[test]
    fn train_step_reports_loss_progress() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(seeded(dir.path()));

        let report = pipeline.train().unwrap();
        assert!(report.detail.starts_with("loss "));
        assert!(report.detail.contains("-> final_loss "));
        assert_eq!(report.outputs.len(), 2);
    }

    #[test]
    fn plan_includes_publish_only_with_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        assert_eq!(
            Pipeline::new(config.clone()).plan(&full_run()),
            vec![Step::Stage, Step::Marts, Step::Train]
        );

        config.database_url = Some("postgres://localhost/chroniccare".to_string());
        let options = RunOptions {
            skip_training: true,
            ..full_run()
        };
        assert_eq!(
            Pipeline::new(config).plan(&options),
            vec![Step::Stage, Step::Marts, Step::Publish]
        );
    }
}
