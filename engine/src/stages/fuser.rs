//! Fuser stage
//!
//! Takes the filtered models of a job, combines them by hard voting on the
//! test split and publishes the ensemble's metrics.

use chrono::Utc;
use tracing::{info, info_span, Instrument};

use ccube_sdk::errors::WorkerError;
use ccube_sdk::messages::{FilterOutput, FuserOutput};
use ccube_sdk::task::{FuserTask, TaskError};

use super::{persistence, StageContext};
use crate::config::settings::PredictSettings;
use crate::db::StageEvent;
use crate::model_executor::ModelExecutor;
use crate::policy::{FuserPolicy, LabelledDataset, VotingFuser};
use crate::queue::{consume_json, publish_json, QueueNames, TaskQueue};

pub struct FuserStage {
    settings: PredictSettings,
}

impl FuserStage {
    pub fn new(settings: PredictSettings) -> Self {
        Self { settings }
    }

    /// Consumes one fuser task plus one filter output and publishes the
    /// ensemble metrics
    pub async fn run<Q: TaskQueue>(
        &self,
        context: &StageContext<Q>,
        job: &str,
    ) -> Result<FuserOutput, WorkerError> {
        let span = info_span!("stage", stage = "fuser", job = %job);
        self.execute(context, job).instrument(span).await
    }

    async fn execute<Q: TaskQueue>(
        &self,
        context: &StageContext<Q>,
        job: &str,
    ) -> Result<FuserOutput, WorkerError> {
        let queues = QueueNames::for_job(job);
        let queue = context.queue();
        queue.create_queue(&queues.fuser_tasks).await?;
        queue.create_queue(&queues.filter_outputs).await?;
        queue.create_queue(&queues.fuser_outputs).await?;

        let started = Utc::now();
        let (tasks, task_tokens) =
            consume_json::<_, FuserTask>(queue, &queues.fuser_tasks, 1).await?;
        let Some(task) = tasks.into_iter().next() else {
            return Err(WorkerError::Queue(format!(
                "no task delivered from {}",
                queues.fuser_tasks
            )));
        };
        let selection = &task.selection;
        context
            .record(selection.random_seed, StageEvent::FuserStart, started)
            .await?;

        let positive = selection.positive_class().map_err(TaskError::from)?;
        let dataset = context.dataset();
        let fusion_file = dataset.fusion_split(selection).await?;
        let fusion_labels = dataset.fusion_labels(selection).await?;
        let test_file = dataset.test_split(selection).await?;
        let test_labels = dataset.test_labels(selection).await?;

        let (batches, batch_tokens) =
            consume_json::<_, FilterOutput>(queue, &queues.filter_outputs, 1).await?;
        let models = batches.into_iter().next().unwrap_or_default();
        info!("Fusing {} model(s)", models.len());

        let parameters = task.predict_parameters.clone().unwrap_or_default();
        let executors = models
            .iter()
            .map(|model| {
                ModelExecutor::new(
                    model.files.clone(),
                    self.settings.clone(),
                    context.environment().clone(),
                    parameters.clone(),
                    selection.class_attribute_type,
                )
            })
            .collect();

        let policy = VotingFuser::new(
            executors,
            LabelledDataset::new(fusion_file.path(), fusion_labels),
            LabelledDataset::new(test_file.path(), test_labels),
            positive,
        );
        let metrics = policy.fuse().await?;

        if let Some(journal) = context.journal() {
            journal
                .metrics()
                .record(context.host(), job, selection.random_seed, &metrics)
                .await
                .map_err(persistence)?;
        }

        let output = FuserOutput {
            job_name: task.job_name.clone(),
            random_seed: selection.random_seed,
            models: models.len(),
            metrics,
        };

        publish_json(queue, &queues.fuser_outputs, std::slice::from_ref(&output)).await?;
        queue
            .acknowledge_messages(&queues.fuser_tasks, &task_tokens)
            .await?;
        queue
            .acknowledge_messages(&queues.filter_outputs, &batch_tokens)
            .await?;
        queue.close().await?;

        context
            .record(selection.random_seed, StageEvent::FuserFinish, Utc::now())
            .await?;

        Ok(output)
    }
}
