use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::TrainingConfig;
use crate::models::EngagementRecord;

pub const FEATURES: [&str; 3] = ["age", "active_days", "avg_steps"];
pub const ENGAGEMENT_COLUMNS: [&str; 5] = ["user_id", "age", "active_days", "avg_steps", "dropout_risk"];

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("no training rows left after holding out {test_rows} test rows")]
    EmptyTrainingSet { test_rows: usize },

    #[error("dropout_risk must be 0 or 1, got {value} for user {user_id}")]
    InvalidLabel { user_id: String, value: u8 },

    #[error("test fraction must be in [0, 1), got {0}")]
    InvalidTestFraction(f64),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngagementModel {
    pub features: Vec<String>,
    pub weights: Vec<f64>,
    pub bias: f64,
    pub feature_means: Vec<f64>,
    pub feature_stds: Vec<f64>,
}

impl EngagementModel {
    pub fn predict_proba(&self, record: &EngagementRecord) -> f64 {
        let raw = [record.age, record.active_days, record.avg_steps];
        let z = raw
            .iter()
            .zip(&self.weights)
            .zip(self.feature_means.iter().zip(&self.feature_stds))
            .map(|((value, weight), (mean, std))| weight * (value - mean) / std)
            .sum::<f64>()
            + self.bias;
        sigmoid(z)
    }

    pub fn predict(&self, record: &EngagementRecord) -> u8 {
        u8::from(self.predict_proba(record) >= 0.5)
    }
}

/// Metrics logged for one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub epochs: usize,
    pub learning_rate: f64,
    pub train_rows: usize,
    pub test_rows: usize,
    pub final_loss: f64,
    pub test_accuracy: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model: EngagementModel,
    pub run: RunRecord,
    pub loss_history: Vec<f64>,
}

pub fn train_model(
    records: &[EngagementRecord],
    config: &TrainingConfig,
) -> Result<TrainingOutcome, TrainError> {
    if !(0.0..1.0).contains(&config.test_fraction) {
        return Err(TrainError::InvalidTestFraction(config.test_fraction));
    }
    if let Some(bad) = records.iter().find(|record| record.dropout_risk > 1) {
        return Err(TrainError::InvalidLabel {
            user_id: bad.user_id.clone(),
            value: bad.dropout_risk,
        });
    }

    let started_at = Utc::now();
    let (train, test) = split(records, config.test_fraction, config.seed);
    if train.is_empty() {
        return Err(TrainError::EmptyTrainingSet {
            test_rows: test.len(),
        });
    }

    let (x_raw, y) = to_arrays(&train)?;
    let means = x_raw
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(FEATURES.len()));
    let stds = x_raw
        .std_axis(Axis(0), 0.0)
        .mapv(|std| if std > f64::EPSILON { std } else { 1.0 });
    let x = (&x_raw - &means) / &stds;

    let n_samples = x.nrows() as f64;
    let mut weights = Array1::<f64>::zeros(FEATURES.len());
    let mut bias = 0.0;
    let mut loss_history = Vec::with_capacity(config.epochs);

    for _ in 0..config.epochs {
        let predictions = (x.dot(&weights) + bias).mapv(sigmoid);
        loss_history.push(log_loss(&y, &predictions));

        let errors = &predictions - &y;
        let dw = x.t().dot(&errors) / n_samples;
        let db = errors.sum() / n_samples;

        weights.scaled_add(-config.learning_rate, &dw);
        bias -= config.learning_rate * db;
    }

    let model = EngagementModel {
        features: FEATURES.iter().map(|name| name.to_string()).collect(),
        weights: weights.to_vec(),
        bias,
        feature_means: means.to_vec(),
        feature_stds: stds.to_vec(),
    };

    let test_accuracy = (!test.is_empty()).then(|| {
        let correct = test
            .iter()
            .filter(|record| model.predict(record) == record.dropout_risk)
            .count();
        correct as f64 / test.len() as f64
    });

    let final_loss = loss_history.last().copied().unwrap_or(f64::NAN);
    tracing::info!(
        epochs = config.epochs,
        train_rows = train.len(),
        test_rows = test.len(),
        final_loss,
        "model trained"
    );

    Ok(TrainingOutcome {
        run: RunRecord {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            epochs: config.epochs,
            learning_rate: config.learning_rate,
            train_rows: train.len(),
            test_rows: test.len(),
            final_loss,
            test_accuracy,
        },
        model,
        loss_history,
    })
}

/// Writes the model file and appends the run record under `runs_dir`.
pub fn save_outcome(
    outcome: &TrainingOutcome,
    model_path: &Path,
    runs_dir: &Path,
) -> anyhow::Result<()> {
    if let Some(parent) = model_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::create_dir_all(runs_dir)?;

    serde_json::to_writer_pretty(BufWriter::new(File::create(model_path)?), &outcome.model)?;
    let run_path = runs_dir.join(format!("{}.json", outcome.run.run_id));
    serde_json::to_writer_pretty(BufWriter::new(File::create(&run_path)?), &outcome.run)?;
    Ok(())
}

fn split(
    records: &[EngagementRecord],
    test_fraction: f64,
    seed: u64,
) -> (Vec<EngagementRecord>, Vec<EngagementRecord>) {
    let mut shuffled = records.to_vec();
    shuffled.shuffle(&mut StdRng::seed_from_u64(seed));
    let test_rows = (records.len() as f64 * test_fraction).round() as usize;
    let train = shuffled.split_off(test_rows.min(shuffled.len()));
    (train, shuffled)
}

fn to_arrays(records: &[EngagementRecord]) -> Result<(Array2<f64>, Array1<f64>), TrainError> {
    let flat: Vec<f64> = records
        .iter()
        .flat_map(|record| [record.age, record.active_days, record.avg_steps])
        .collect();
    let x = Array2::from_shape_vec((records.len(), FEATURES.len()), flat)?;
    let y = records
        .iter()
        .map(|record| f64::from(record.dropout_risk))
        .collect();
    Ok((x, y))
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let exp_z = z.exp();
        exp_z / (1.0 + exp_z)
    }
}

fn log_loss(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    let eps = 1e-15;
    let n = y_true.len() as f64;
    -y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(&y, &p)| {
            let p = p.clamp(eps, 1.0 - eps);
            y * p.ln() + (1.0 - y) * (1.0 - p).ln()
        })
        .sum::<f64>()
        / n
}
