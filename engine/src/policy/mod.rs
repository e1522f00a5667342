//! Model selection and combination policies
//!
//! Both policies work on binary classification outputs. Class order is always
//! `[negative, positive]`, which fixes what counts as a true/false
//! positive/negative. The negative class is whichever other value the ground
//! truth contains; ground truth with anything but exactly two classes is
//! rejected.
//!
//! Policies receive their predictors by injection, so the same code path runs
//! real `ModelExecutor`s in a stage and fixed prediction vectors in tests.

pub mod filter;
pub mod fuser;

pub use filter::{FilterPolicy, MajorityCostThresholdFilter};
pub use fuser::{FuserPolicy, VotingFuser};

use std::path::PathBuf;
use thiserror::Error;

use ccube_sdk::errors::WorkerError;
use ccube_sdk::types::{ClassValue, Metrics};

use crate::model_executor::ExecutorError;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("no models to evaluate")]
    NoModels,

    #[error("expected exactly two class values in the ground truth, found {0}")]
    ClassCount(usize),

    #[error("positive class '{0}' does not occur in the ground truth")]
    MissingPositiveClass(ClassValue),

    #[error("model {model} predicted {actual} labels for {expected} rows")]
    LengthMismatch {
        model: usize,
        expected: usize,
        actual: usize,
    },

    #[error("model {model} failed: {source}")]
    Executor {
        model: usize,
        #[source]
        source: ExecutorError,
    },
}

impl From<PolicyError> for WorkerError {
    fn from(e: PolicyError) -> Self {
        match e {
            PolicyError::Executor { source, .. } => source.into(),
            other => WorkerError::Policy(other.to_string()),
        }
    }
}

/// A dataset file with its ground truth, row aligned
#[derive(Debug, Clone)]
pub struct LabelledDataset {
    pub file: PathBuf,
    pub labels: Vec<ClassValue>,
}

impl LabelledDataset {
    pub fn new(file: impl Into<PathBuf>, labels: Vec<ClassValue>) -> Self {
        Self {
            file: file.into(),
            labels,
        }
    }
}

/// The two class values of a binary problem
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryClasses {
    pub negative: ClassValue,
    pub positive: ClassValue,
}

impl BinaryClasses {
    /// Derives the negative class from the ground truth.
    pub fn from_labels(labels: &[ClassValue], positive: &ClassValue) -> Result<Self, PolicyError> {
        let distinct = distinct_in_order(labels);
        if distinct.len() != 2 {
            return Err(PolicyError::ClassCount(distinct.len()));
        }
        if !distinct.contains(&positive) {
            return Err(PolicyError::MissingPositiveClass(positive.clone()));
        }

        let negative = distinct
            .into_iter()
            .find(|value| *value != positive)
            .cloned()
            .ok_or(PolicyError::ClassCount(1))?;

        Ok(Self {
            negative,
            positive: positive.clone(),
        })
    }

    pub fn order(&self) -> [&ClassValue; 2] {
        [&self.negative, &self.positive]
    }
}

/// Confusion matrix counts under a `[negative, positive]` class order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub true_positives: u64,
    pub false_positives: u64,
    pub true_negatives: u64,
    pub false_negatives: u64,
}

impl ConfusionMatrix {
    /// Counts row-aligned pairs. Rows where either value is outside `order`
    /// are not counted.
    pub fn compute(actual: &[ClassValue], predicted: &[ClassValue], order: [&ClassValue; 2]) -> Self {
        let [negative, positive] = order;
        let mut matrix = Self::default();

        for (a, p) in actual.iter().zip(predicted) {
            match (a == positive, a == negative, p == positive, p == negative) {
                (true, _, true, _) => matrix.true_positives += 1,
                (true, _, _, true) => matrix.false_negatives += 1,
                (_, true, true, _) => matrix.false_positives += 1,
                (_, true, _, true) => matrix.true_negatives += 1,
                _ => {}
            }
        }
        matrix
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    pub fn f_measure(&self) -> f64 {
        ratio(
            2 * self.true_positives,
            2 * self.true_positives + self.false_positives + self.false_negatives,
        )
    }

    /// Matthews correlation coefficient, 0 when any marginal is empty
    pub fn mcc(&self) -> f64 {
        let tp = self.true_positives as f64;
        let fp = self.false_positives as f64;
        let tn = self.true_negatives as f64;
        let fn_ = self.false_negatives as f64;

        let denominator = ((tp + fp) * (tp + fn_) * (tn + fp) * (tn + fn_)).sqrt();
        if denominator == 0.0 {
            0.0
        } else {
            (tp * tn - fp * fn_) / denominator
        }
    }
}

/// Evaluates predictions against ground truth
pub fn evaluate(actual: &[ClassValue], predicted: &[ClassValue], classes: &BinaryClasses) -> Metrics {
    let matrix = ConfusionMatrix::compute(actual, predicted, classes.order());
    let matches = actual
        .iter()
        .zip(predicted)
        .filter(|(a, p)| a == p)
        .count();

    Metrics {
        accuracy: ratio(matches as u64, actual.len() as u64),
        precision: matrix.precision(),
        recall: matrix.recall(),
        f_measure: matrix.f_measure(),
        mcc: matrix.mcc(),
        true_positives: matrix.true_positives,
        false_positives: matrix.false_positives,
        true_negatives: matrix.true_negatives,
        false_negatives: matrix.false_negatives,
    }
}

/// Distinct values in order of first appearance
fn distinct_in_order(values: &[ClassValue]) -> Vec<&ClassValue> {
    let mut distinct: Vec<&ClassValue> = Vec::new();
    for value in values {
        if !distinct.contains(&value) {
            distinct.push(value);
        }
    }
    distinct
}

/// Most frequent value, the earliest seen winning ties
fn most_common(values: &[ClassValue]) -> Option<&ClassValue> {
    let mut counts: Vec<(&ClassValue, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }

    let mut best: Option<(&ClassValue, usize)> = None;
    for (value, count) in counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ccube_sdk::types::ClassValue;

    use crate::model_executor::{ExecutorError, Predictor};

    /// Returns the same predictions for any dataset
    pub struct FixedPredictor {
        pub predictions: Vec<ClassValue>,
        pub calls: AtomicUsize,
    }

    impl FixedPredictor {
        pub fn new(predictions: &[i64]) -> Self {
            Self {
                predictions: predictions.iter().map(|v| ClassValue::Integer(*v)).collect(),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Predictor for FixedPredictor {
        async fn predict(&self, _dataset: &Path) -> Result<Vec<ClassValue>, ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.predictions.clone())
        }
    }

    pub fn labels(values: &[i64]) -> Vec<ClassValue> {
        values.iter().map(|v| ClassValue::Integer(*v)).collect()
    }
}
