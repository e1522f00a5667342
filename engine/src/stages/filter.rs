//! Filter stage
//!
//! Gathers the learner outputs of a job, scores every successful model on
//! the fusion split and forwards the models cheaper than the majority-class
//! baseline to the fuser as one batch.

use chrono::Utc;
use tracing::{info, info_span, warn, Instrument};

use ccube_sdk::errors::WorkerError;
use ccube_sdk::messages::{FilterOutput, LearnerOutput, ModelArtifact};
use ccube_sdk::task::{FilterTask, TaskError};

use super::StageContext;
use crate::config::settings::PredictSettings;
use crate::db::StageEvent;
use crate::model_executor::ModelExecutor;
use crate::policy::{FilterPolicy, LabelledDataset, MajorityCostThresholdFilter};
use crate::queue::{consume_json, publish_json, QueueNames, TaskQueue};

pub struct FilterStage {
    settings: PredictSettings,
}

impl FilterStage {
    pub fn new(settings: PredictSettings) -> Self {
        Self { settings }
    }

    /// Consumes one filter task plus its learner outputs and publishes the
    /// surviving models
    pub async fn run<Q: TaskQueue>(
        &self,
        context: &StageContext<Q>,
        job: &str,
    ) -> Result<FilterOutput, WorkerError> {
        let span = info_span!("stage", stage = "filter", job = %job);
        self.execute(context, job).instrument(span).await
    }

    async fn execute<Q: TaskQueue>(
        &self,
        context: &StageContext<Q>,
        job: &str,
    ) -> Result<FilterOutput, WorkerError> {
        let queues = QueueNames::for_job(job);
        let queue = context.queue();
        queue.create_queue(&queues.filter_tasks).await?;
        queue.create_queue(&queues.learner_outputs).await?;
        queue.create_queue(&queues.filter_outputs).await?;

        let started = Utc::now();
        let (tasks, task_tokens) =
            consume_json::<_, FilterTask>(queue, &queues.filter_tasks, 1).await?;
        let Some(task) = tasks.into_iter().next() else {
            return Err(WorkerError::Queue(format!(
                "no task delivered from {}",
                queues.filter_tasks
            )));
        };
        let selection = &task.selection;
        context
            .record(selection.random_seed, StageEvent::FilterStart, started)
            .await?;

        let positive = selection.positive_class().map_err(TaskError::from)?;
        let fusion_file = context.dataset().fusion_split(selection).await?;
        let fusion_labels = context.dataset().fusion_labels(selection).await?;

        info!(
            "Waiting for {} learner output(s)",
            task.learner_outputs_number
        );
        let (outputs, output_tokens) = consume_json::<_, LearnerOutput>(
            queue,
            &queues.learner_outputs,
            task.learner_outputs_number,
        )
        .await?;

        let artifacts = successful_artifacts(outputs);
        let parameters = task.predict_parameters.clone().unwrap_or_default();
        let executors = artifacts
            .iter()
            .map(|artifact| {
                ModelExecutor::new(
                    artifact.files.clone(),
                    self.settings.clone(),
                    context.environment().clone(),
                    parameters.clone(),
                    selection.class_attribute_type,
                )
            })
            .collect();

        let policy = MajorityCostThresholdFilter::new(
            executors,
            LabelledDataset::new(fusion_file.path(), fusion_labels),
            positive,
            task.threshold,
        );
        let selected = policy.filter().await?;

        let output = FilterOutput(
            artifacts
                .into_iter()
                .zip(selected)
                .filter_map(|(artifact, keep)| keep.then_some(artifact))
                .collect(),
        );
        info!(
            "{} of {} learner output(s) kept",
            output.len(),
            task.learner_outputs_number
        );

        publish_json(queue, &queues.filter_outputs, std::slice::from_ref(&output)).await?;
        queue
            .acknowledge_messages(&queues.filter_tasks, &task_tokens)
            .await?;
        queue
            .acknowledge_messages(&queues.learner_outputs, &output_tokens)
            .await?;
        queue.close().await?;

        context
            .record(selection.random_seed, StageEvent::FilterFinish, Utc::now())
            .await?;

        Ok(output)
    }
}

/// Artifacts of the learners that succeeded, in consumption order
fn successful_artifacts(outputs: Vec<LearnerOutput>) -> Vec<ModelArtifact> {
    let total = outputs.len();
    let artifacts: Vec<ModelArtifact> = outputs
        .into_iter()
        .filter(|output| output.success)
        .filter_map(|output| output.files)
        .map(|files| ModelArtifact { files })
        .collect();

    if artifacts.len() < total {
        warn!(
            "Skipping {} failed learner output(s)",
            total - artifacts.len()
        );
    }
    artifacts
}
