use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "chroniccare.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding the raw CSV sources.
    pub data_dir: PathBuf,
    /// Root of the staging and marts tables.
    pub warehouse_dir: PathBuf,
    /// Model and run-record output.
    pub artifacts_dir: PathBuf,
    /// Postgres URL; marts are only published when set.
    pub database_url: Option<String>,
    pub incremental_window_days: i64,
    pub training: TrainingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            warehouse_dir: PathBuf::from("warehouse"),
            artifacts_dir: PathBuf::from("artifacts"),
            database_url: None,
            incremental_window_days: 1,
            training: TrainingConfig::default(),
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            learning_rate: 0.01,
            test_fraction: 0.2,
            seed: 42,
        }
    }
}

impl PipelineConfig {
    /// Layers defaults, the TOML file, `CHRONICCARE_*` variables and finally
    /// `DATABASE_URL`.
    pub fn load(path: Option<&Path>) -> Result<Self, Box<figment::Error>> {
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        Figment::from(Serialized::defaults(PipelineConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("CHRONICCARE_").split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database_url".into()))
            .extract()
            .map_err(Box::new)
    }

    pub fn users_csv(&self) -> PathBuf {
        self.data_dir.join("users.csv")
    }

    pub fn sessions_csv(&self) -> PathBuf {
        self.data_dir.join("clinical_sessions.csv")
    }

    pub fn alerts_csv(&self) -> PathBuf {
        self.data_dir.join("ai_alerts.csv")
    }

    pub fn engagement_csv(&self) -> PathBuf {
        self.data_dir.join("ml_engagement_training_data.csv")
    }

    pub fn model_path(&self) -> PathBuf {
        self.artifacts_dir.join("engagement_model.json")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.artifacts_dir.join("runs")
    }
}
