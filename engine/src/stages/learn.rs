//! Learn stage
//!
//! Trains one model per invocation: the learner executable gets a training
//! sample and its parameters, and whatever it leaves in the configured output
//! files is packed and published as a learner output.

use chrono::Utc;
use tracing::{info, info_span, warn, Instrument};

use ccube_sdk::errors::WorkerError;
use ccube_sdk::messages::LearnerOutput;
use ccube_sdk::task::LearnTask;

use super::StageContext;
use crate::artifact::ArtifactCodec;
use crate::config::settings::{
    LearnSettings, LEARN_DATASET_FILE, LEARN_DURATION_MINUTES, LEARN_DURATION_SECONDS,
    LEARN_PARAMETERS_PROPERTIES_FILE,
};
use crate::db::StageEvent;
use crate::process::{Environment, ProcessRunner};
use crate::properties::write_properties;
use crate::queue::{consume_json, publish_json, QueueNames, TaskQueue};

pub struct LearnStage {
    settings: LearnSettings,
}

impl LearnStage {
    pub fn new(settings: LearnSettings) -> Self {
        Self { settings }
    }

    /// Consumes one learn task and publishes one learner output
    pub async fn run<Q: TaskQueue>(
        &self,
        context: &StageContext<Q>,
        job: &str,
    ) -> Result<LearnerOutput, WorkerError> {
        let span = info_span!("stage", stage = "learn", job = %job);
        self.execute(context, job).instrument(span).await
    }

    async fn execute<Q: TaskQueue>(
        &self,
        context: &StageContext<Q>,
        job: &str,
    ) -> Result<LearnerOutput, WorkerError> {
        let queues = QueueNames::for_job(job);
        let queue = context.queue();
        queue.create_queue(&queues.learner_tasks).await?;
        queue.create_queue(&queues.learner_outputs).await?;

        let started = Utc::now();
        let (tasks, tokens) =
            consume_json::<_, LearnTask>(queue, &queues.learner_tasks, 1).await?;
        let Some(task) = tasks.into_iter().next() else {
            return Err(WorkerError::Queue(format!(
                "no task delivered from {}",
                queues.learner_tasks
            )));
        };
        info!(
            "Learning task {} on {} for {}s",
            task.task_number, task.selection.dataset_name, task.duration
        );
        context
            .record(task.selection.random_seed, StageEvent::LearnerStart, started)
            .await?;

        let dataset = context.dataset().training_sample(&task).await?;
        let properties = write_properties(&task.learn_parameters)?;

        let mut environment = context.environment().clone();
        environment.extend(learn_variables(&task).iter());
        environment.set(LEARN_DATASET_FILE, dataset.path().to_string_lossy());
        environment.extend(task.learn_parameters.to_strings());
        environment.set(
            LEARN_PARAMETERS_PROPERTIES_FILE,
            properties.path().to_string_lossy(),
        );

        let runner = ProcessRunner::new(
            self.settings.command.clone(),
            self.settings.working_directory.clone(),
            environment,
        );
        runner.echo();
        let result = runner.run().await?;

        let output = if result.success() {
            LearnerOutput::succeeded(ArtifactCodec::encode(&self.settings.output_files[..])?)
        } else {
            warn!("Learner exited with code {}", result.exit_code);
            LearnerOutput::failed()
        };

        publish_json(queue, &queues.learner_outputs, std::slice::from_ref(&output)).await?;
        queue
            .acknowledge_messages(&queues.learner_tasks, &tokens)
            .await?;
        queue.close().await?;

        context
            .record(
                task.selection.random_seed,
                StageEvent::LearnerFinish,
                Utc::now(),
            )
            .await?;

        info!("Learner output published, success: {}", output.success);
        Ok(output)
    }
}

/// Duration variables: the budget in seconds and in whole minutes
fn learn_variables(task: &LearnTask) -> Environment {
    Environment::new()
        .with(LEARN_DURATION_SECONDS, task.duration.to_string())
        .with(LEARN_DURATION_MINUTES, (task.duration / 60).to_string())
}
