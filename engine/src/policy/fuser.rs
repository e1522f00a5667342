//! Majority-vote model fusion

use async_trait::async_trait;
use tracing::{info, warn};

use ccube_sdk::types::{ClassValue, Metrics};

use super::{evaluate, most_common, BinaryClasses, LabelledDataset, PolicyError};
use crate::model_executor::Predictor;

/// Combines the selected models and evaluates the combination
#[async_trait]
pub trait FuserPolicy {
    async fn fuse(&self) -> Result<Metrics, PolicyError>;
}

/// Hard-voting ensemble evaluated on the test split.
///
/// Every model is run once on the test dataset and its predictions are then
/// treated as fixed. Each row takes the label with the most votes; on a tie
/// the label voted by the lowest-index model among the tied ones wins.
pub struct VotingFuser<P> {
    models: Vec<P>,
    training: LabelledDataset,
    test: LabelledDataset,
    positive: ClassValue,
}

impl<P: Predictor> VotingFuser<P> {
    pub fn new(
        models: Vec<P>,
        training: LabelledDataset,
        test: LabelledDataset,
        positive: ClassValue,
    ) -> Self {
        Self {
            models,
            training,
            test,
            positive,
        }
    }

    fn check_training_classes(&self, classes: &BinaryClasses) {
        match BinaryClasses::from_labels(&self.training.labels, &self.positive) {
            Ok(training) if training == *classes => {}
            Ok(training) => warn!(
                "Fusion split negative class {} differs from test split {}",
                training.negative, classes.negative
            ),
            Err(e) => warn!("Fusion split labels: {}", e),
        }
    }
}

#[async_trait]
impl<P: Predictor> FuserPolicy for VotingFuser<P> {
    async fn fuse(&self) -> Result<Metrics, PolicyError> {
        if self.models.is_empty() {
            return Err(PolicyError::NoModels);
        }

        let actual = &self.test.labels;
        let classes = BinaryClasses::from_labels(actual, &self.positive)?;
        self.check_training_classes(&classes);

        let mut predictions = Vec::with_capacity(self.models.len());
        for (index, model) in self.models.iter().enumerate() {
            let predicted = model
                .predict(&self.test.file)
                .await
                .map_err(|source| PolicyError::Executor {
                    model: index,
                    source,
                })?;

            if predicted.len() != actual.len() {
                return Err(PolicyError::LengthMismatch {
                    model: index,
                    expected: actual.len(),
                    actual: predicted.len(),
                });
            }
            predictions.push(predicted);
        }

        let ensemble = hard_vote(&predictions);
        let metrics = evaluate(actual, &ensemble, &classes);
        info!(
            "Ensemble of {} models: accuracy {:.4}, f-measure {:.4}, mcc {:.4}",
            self.models.len(),
            metrics.accuracy,
            metrics.f_measure,
            metrics.mcc
        );
        Ok(metrics)
    }
}

/// Row-wise plurality over equally long prediction vectors
pub fn hard_vote(predictions: &[Vec<ClassValue>]) -> Vec<ClassValue> {
    let rows = predictions.first().map_or(0, Vec::len);

    (0..rows)
        .filter_map(|row| {
            let votes: Vec<ClassValue> = predictions
                .iter()
                .filter_map(|model| model.get(row).cloned())
                .collect();
            most_common(&votes).cloned()
        })
        .collect()
}
