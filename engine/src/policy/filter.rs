//! Cost-threshold model filter

use async_trait::async_trait;
use tracing::{debug, info};

use ccube_sdk::types::ClassValue;

use super::{most_common, BinaryClasses, ConfusionMatrix, LabelledDataset, PolicyError};
use crate::model_executor::Predictor;

/// Decides which models move on to fusion
#[async_trait]
pub trait FilterPolicy {
    /// One entry per model, in input order; `true` keeps the model
    async fn filter(&self) -> Result<Vec<bool>, PolicyError>;
}

/// Keeps the models that misclassify more cheaply than always answering the
/// majority class.
///
/// The cost of a predictor is `w * FN_rate + (1 - w) * FP_rate` where the
/// rates are normalised by the number of positive and negative rows of the
/// ground truth. A model must be strictly cheaper than the baseline to be kept.
pub struct MajorityCostThresholdFilter<P> {
    models: Vec<P>,
    training: LabelledDataset,
    positive: ClassValue,
    false_negative_weight: f64,
}

impl<P: Predictor> MajorityCostThresholdFilter<P> {
    pub fn new(
        models: Vec<P>,
        training: LabelledDataset,
        positive: ClassValue,
        false_negative_weight: f64,
    ) -> Self {
        Self {
            models,
            training,
            positive,
            false_negative_weight,
        }
    }

    fn cost(&self, predicted: &[ClassValue], classes: &BinaryClasses) -> f64 {
        let actual = &self.training.labels;
        let matrix = ConfusionMatrix::compute(actual, predicted, classes.order());

        let positives = actual.iter().filter(|v| **v == classes.positive).count();
        let negatives = actual.iter().filter(|v| **v == classes.negative).count();

        let false_negative_rate = rate(matrix.false_negatives, positives);
        let false_positive_rate = rate(matrix.false_positives, negatives);

        self.false_negative_weight * false_negative_rate
            + (1.0 - self.false_negative_weight) * false_positive_rate
    }
}

#[async_trait]
impl<P: Predictor> FilterPolicy for MajorityCostThresholdFilter<P> {
    async fn filter(&self) -> Result<Vec<bool>, PolicyError> {
        if self.models.is_empty() {
            return Err(PolicyError::NoModels);
        }

        let actual = &self.training.labels;
        let classes = BinaryClasses::from_labels(actual, &self.positive)?;

        let majority = most_common(actual).ok_or(PolicyError::ClassCount(0))?;
        let baseline = vec![majority.clone(); actual.len()];
        let baseline_cost = self.cost(&baseline, &classes);
        info!(
            "Majority class {} baseline cost {:.6}",
            majority, baseline_cost
        );

        let mut selected = Vec::with_capacity(self.models.len());
        for (index, model) in self.models.iter().enumerate() {
            let predicted = model
                .predict(&self.training.file)
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

            let cost = self.cost(&predicted, &classes);
            let keep = cost < baseline_cost;
            debug!("Model {} cost {:.6}, kept: {}", index, cost, keep);
            selected.push(keep);
        }

        info!(
            "Kept {} of {} models",
            selected.iter().filter(|keep| **keep).count(),
            selected.len()
        );
        Ok(selected)
    }
}

fn rate(count: u64, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::testing::{labels, FixedPredictor};

    fn training() -> LabelledDataset {
        LabelledDataset::new("/dev/null", labels(&[0, 0, 0, 1, 1]))
    }

    #[tokio::test]
    async fn test_keeps_cheaper_model_only() {
        let models = vec![
            FixedPredictor::new(&[0, 0, 0, 1, 1]),
            FixedPredictor::new(&[1, 1, 1, 0, 0]),
        ];
        let filter = MajorityCostThresholdFilter::new(models, training(), ClassValue::Integer(1), 0.5);

        assert_eq!(filter.filter().await.unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_tie_with_baseline_discarded() {
        let models = vec![FixedPredictor::new(&[0, 0, 0, 0, 0])];
        let filter = MajorityCostThresholdFilter::new(models, training(), ClassValue::Integer(1), 0.5);

        assert_eq!(filter.filter().await.unwrap(), vec![false]);
    }

    #[tokio::test]
    async fn test_weight_shifts_selection() {
        // One missed positive out of two, no false positives
        let models = vec![FixedPredictor::new(&[0, 0, 0, 1, 0])];

        // baseline cost is w * 1.0, the model's is w * 0.5
        let filter =
            MajorityCostThresholdFilter::new(models, training(), ClassValue::Integer(1), 0.9);
        assert_eq!(filter.filter().await.unwrap(), vec![true]);

        // with no weight on false negatives both costs are zero
        let models = vec![FixedPredictor::new(&[0, 0, 0, 1, 0])];
        let filter =
            MajorityCostThresholdFilter::new(models, training(), ClassValue::Integer(1), 0.0);
        assert_eq!(filter.filter().await.unwrap(), vec![false]);
    }

    #[tokio::test]
    async fn test_empty_model_set_rejected() {
        let filter = MajorityCostThresholdFilter::<FixedPredictor>::new(
            Vec::new(),
            training(),
            ClassValue::Integer(1),
            0.5,
        );
        assert!(matches!(filter.filter().await, Err(PolicyError::NoModels)));
    }

    #[tokio::test]
    async fn test_three_classes_rejected() {
        let models = vec![FixedPredictor::new(&[0, 1, 2])];
        let filter = MajorityCostThresholdFilter::new(
            models,
            LabelledDataset::new("/dev/null", labels(&[0, 1, 2])),
            ClassValue::Integer(1),
            0.5,
        );
        assert!(matches!(
            filter.filter().await,
            Err(PolicyError::ClassCount(3))
        ));
    }

    #[tokio::test]
    async fn test_short_prediction_vector_rejected() {
        let models = vec![FixedPredictor::new(&[0, 0])];
        let filter = MajorityCostThresholdFilter::new(models, training(), ClassValue::Integer(1), 0.5);
        assert!(matches!(
            filter.filter().await,
            Err(PolicyError::LengthMismatch {
                model: 0,
                expected: 5,
                actual: 2
            })
        ));
    }
}
