use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::TrainError;
use crate::models::Hyperparameters;
use crate::services::model_catalog::lora_target_modules;

/// Progress report emitted by a trainer while it works. Crosses from the
/// blocking training thread to the async side over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub job_id: String,
    pub progress: f64,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct TrainRequest {
    pub job_id: String,
    pub model_name: String,
    pub dataset_path: PathBuf,
    pub output_dir: PathBuf,
    pub hyperparameters: Hyperparameters,
}

#[derive(Debug, Clone)]
pub struct TrainMetrics {
    pub final_loss: f64,
    pub total_steps: u64,
    pub num_samples: u64,
}

impl TrainMetrics {
    /// Training configuration and results, as persisted into the job's meta
    /// bag. The executor merges `model_path` in on top.
    pub fn into_meta(self, request: &TrainRequest) -> serde_json::Value {
        json!({
            "model_name": request.model_name,
            "dataset_path": request.dataset_path.to_string_lossy(),
            "learning_rate": request.hyperparameters.learning_rate,
            "num_epochs": request.hyperparameters.num_epochs,
            "batch_size": request.hyperparameters.batch_size,
            "max_length": request.hyperparameters.max_length,
            "final_loss": self.final_loss,
            "total_steps": self.total_steps,
            "num_samples": self.num_samples,
        })
    }
}

/// External collaborator performing the actual LoRA fine-tuning. The
/// platform only depends on this seam; swapping in a real PEFT-backed
/// implementation does not touch the job orchestration.
#[async_trait]
pub trait Trainer: Send + Sync {
    async fn train(
        &self,
        request: TrainRequest,
        progress: mpsc::UnboundedSender<ProgressUpdate>,
    ) -> Result<TrainMetrics, TrainError>;
}

/// Local trainer driving a staged adapter-producing run on a blocking
/// thread. Stands in for a transformers/PEFT backend; produces the same
/// artifact layout (adapter config + metadata sidecar).
pub struct LocalTrainer {
    step_delay: Duration,
}

impl LocalTrainer {
    pub fn new() -> Self {
        Self {
            step_delay: Duration::from_millis(250),
        }
    }

    /// Tests shrink the per-stage delay to keep runs fast.
    pub fn with_step_delay(step_delay: Duration) -> Self {
        Self { step_delay }
    }
}

impl Default for LocalTrainer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Trainer for LocalTrainer {
    async fn train(
        &self,
        request: TrainRequest,
        progress: mpsc::UnboundedSender<ProgressUpdate>,
    ) -> Result<TrainMetrics, TrainError> {
        if !request.dataset_path.exists() {
            return Err(TrainError::Dataset(format!(
                "Dataset file {} not found",
                request.dataset_path.display()
            )));
        }

        let step_delay = self.step_delay;
        let result = tokio::task::spawn_blocking(move || run_training(request, progress, step_delay))
            .await
            .map_err(|e| TrainError::Execution(format!("Training thread panicked: {e}")))?;

        result
    }
}

fn run_training(
    request: TrainRequest,
    progress: mpsc::UnboundedSender<ProgressUpdate>,
    step_delay: Duration,
) -> Result<TrainMetrics, TrainError> {
    let report = |pct: f64, message: String| {
        let _ = progress.send(ProgressUpdate {
            job_id: request.job_id.clone(),
            progress: pct,
            message,
        });
    };

    report(10.0, "Loading dataset...".to_string());
    let num_samples = count_samples(&request.dataset_path)?;
    if num_samples == 0 {
        return Err(TrainError::Dataset(format!(
            "Dataset {} contains no training samples",
            request.dataset_path.display()
        )));
    }
    std::thread::sleep(step_delay);

    report(30.0, format!("Loading base model {}...", request.model_name));
    std::thread::sleep(step_delay);

    report(50.0, "Preparing LoRA adapters...".to_string());
    let target = lora_target_modules(&request.model_name);
    std::thread::sleep(step_delay);

    let hp = &request.hyperparameters;
    let steps_per_epoch = num_samples.div_ceil(hp.batch_size as u64).max(1);
    let mut loss = 2.5_f64;

    for epoch in 0..hp.num_epochs {
        let pct = 50.0 + (epoch as f64 / hp.num_epochs as f64) * 40.0;
        report(
            pct,
            format!("Training epoch {}/{}...", epoch + 1, hp.num_epochs),
        );
        loss *= 0.82;
        std::thread::sleep(step_delay);
    }

    report(95.0, "Saving model...".to_string());

    std::fs::create_dir_all(&request.output_dir)?;

    let adapter_config = json!({
        "base_model_name_or_path": request.model_name,
        "peft_type": "LORA",
        "task_type": "CAUSAL_LM",
        "r": target.default_rank,
        "lora_alpha": target.default_alpha,
        "lora_dropout": 0.1,
        "target_modules": target.modules,
    });
    std::fs::write(
        request.output_dir.join("adapter_config.json"),
        serde_json::to_vec_pretty(&adapter_config)
            .map_err(|e| TrainError::Execution(e.to_string()))?,
    )?;

    let metrics = TrainMetrics {
        final_loss: (loss * 1000.0).round() / 1000.0,
        total_steps: steps_per_epoch * hp.num_epochs as u64,
        num_samples,
    };

    let metadata = json!({
        "model_name": request.model_name,
        "dataset_path": request.dataset_path.to_string_lossy(),
        "learning_rate": hp.learning_rate,
        "num_epochs": hp.num_epochs,
        "batch_size": hp.batch_size,
        "max_length": hp.max_length,
        "final_loss": metrics.final_loss,
        "total_steps": metrics.total_steps,
    });
    std::fs::write(
        request.output_dir.join("training_metadata.json"),
        serde_json::to_vec_pretty(&metadata).map_err(|e| TrainError::Execution(e.to_string()))?,
    )?;

    Ok(metrics)
}

/// Count usable training samples: non-empty lines for line-oriented formats,
/// array length for JSON arrays.
fn count_samples(path: &std::path::Path) -> Result<u64, TrainError> {
    let content = std::fs::read_to_string(path)?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        let value: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| TrainError::Dataset(format!("Invalid JSON dataset: {e}")))?;
        return match value {
            serde_json::Value::Array(items) => Ok(items.len() as u64),
            _ => Err(TrainError::Dataset(
                "JSON dataset must be an array of samples".to_string(),
            )),
        };
    }

    let mut count = content.lines().filter(|line| !line.trim().is_empty()).count() as u64;
    // CSV: the first line is a header, not a sample
    if path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
    {
        count = count.saturating_sub(1);
    }

    Ok(count)
}
