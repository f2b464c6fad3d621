//! Per-feature attribution values for the classifier.
//!
//! Attributions are estimated by walking random feature orderings from a
//! background row to the explained row, crediting each feature with the change
//! in model output when it is switched in. Every walk telescopes to
//! `f(x) - f(z)`, so averaging over the whole background gives attributions
//! that sum exactly to `f(x) - base_value`.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::debug;

use crate::config::Number;
use crate::error::ExplainError;
use crate::model::Classifier;

/// Attribution matrix for one output class over a set of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Attributions {
    pub base_value: Number,
    /// One row of per-feature values for each explained row.
    pub values: Vec<Vec<Number>>,
}

impl Attributions {
    /// Attributions for the complementary class (p0 = 1 - p1).
    pub fn complement(&self) -> Self {
        Self {
            base_value: 1.0 - self.base_value,
            values: self
                .values
                .iter()
                .map(|row| row.iter().map(|v| -v).collect())
                .collect(),
        }
    }

    pub fn row(&self, index: usize) -> Option<&[Number]> {
        self.values.get(index).map(Vec::as_slice)
    }

    pub fn column(&self, feature: usize) -> Vec<Number> {
        self.values.iter().map(|row| row[feature]).collect()
    }
}

pub struct Explainer<'a> {
    model: &'a Classifier,
    background: Vec<Vec<Number>>,
    base_value: Number,
    passes: usize,
    seed: u64,
}

impl<'a> Explainer<'a> {
    pub fn new(
        model: &'a Classifier,
        background: Vec<Vec<Number>>,
        passes: usize,
        seed: u64,
    ) -> Result<Self, ExplainError> {
        if background.is_empty() {
            return Err(ExplainError::EmptyBackground);
        }
        let base_value = background
            .iter()
            .map(|row| f64::from(model.probability(row)))
            .sum::<f64>()
            / background.len() as f64;
        Ok(Self {
            model,
            background,
            base_value: base_value as Number,
            passes: passes.max(1),
            seed,
        })
    }

    pub fn base_value(&self) -> Number {
        self.base_value
    }

    /// Class-1 attributions for every row, computed in parallel.
    pub fn explain(&self, rows: &[Vec<Number>]) -> Result<Attributions, ExplainError> {
        if rows.is_empty() {
            return Err(ExplainError::EmptyEvaluation);
        }
        let values = rows
            .par_iter()
            .enumerate()
            .map(|(i, row)| self.explain_row(row, self.seed.wrapping_add(i as u64)))
            .collect();
        debug!(rows = rows.len(), base_value = self.base_value, "Computed attributions");
        Ok(Attributions {
            base_value: self.base_value,
            values,
        })
    }

    fn explain_row(&self, x: &[Number], seed: u64) -> Vec<Number> {
        let width = x.len();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..width).collect();
        let mut totals = vec![0.0f64; width];
        let mut current = Vec::with_capacity(width);

        for z in &self.background {
            for _ in 0..self.passes {
                order.shuffle(&mut rng);
                current.clear();
                current.extend_from_slice(z);
                let mut previous = self.model.probability(&current);
                for &feature in &order {
                    current[feature] = x[feature];
                    let next = self.model.probability(&current);
                    totals[feature] += f64::from(next - previous);
                    previous = next;
                }
            }
        }

        let samples = (self.background.len() * self.passes) as f64;
        totals.iter().map(|t| (t / samples) as Number).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::features::FEATURE_COUNT;
    use crate::model::{Activation, DenseLayer};

    pub(crate) fn tiny_network() -> Classifier {
        let hidden: Vec<Vec<Number>> = (0..4)
            .map(|u| {
                (0..FEATURE_COUNT)
                    .map(|j| ((u * 7 + j * 3) % 11) as Number * 0.02 - 0.1)
                    .collect()
            })
            .collect();
        Classifier {
            standardization: None,
            layers: vec![
                DenseLayer {
                    weights: hidden,
                    bias: vec![0.1, -0.2, 0.05, 0.0],
                    activation: Activation::Tanh,
                },
                DenseLayer {
                    weights: vec![vec![1.2, -0.7, 0.9, 0.4]],
                    bias: vec![-0.1],
                    activation: Activation::Sigmoid,
                },
            ],
        }
    }

    fn rows(n: usize, offset: Number) -> Vec<Vec<Number>> {
        (0..n)
            .map(|i| {
                (0..FEATURE_COUNT)
                    .map(|j| ((i * 13 + j * 5) % 9) as Number * 0.5 + offset)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn attributions_sum_to_output_minus_base() {
        let model = tiny_network();
        let explainer = Explainer::new(&model, rows(8, 0.0), 2, 42).unwrap();
        let data = rows(5, 1.0);
        let attributions = explainer.explain(&data).unwrap();
        for (row, values) in data.iter().zip(&attributions.values) {
            let total: Number = values.iter().sum();
            let expected = model.probability(row) - attributions.base_value;
            assert!((total - expected).abs() < 1e-4, "{total} vs {expected}");
        }
    }

    #[test]
    fn unused_features_get_zero_credit() {
        let mut model = tiny_network();
        for row in &mut model.layers[0].weights {
            row[3] = 0.0;
        }
        let explainer = Explainer::new(&model, rows(6, 0.0), 1, 7).unwrap();
        let attributions = explainer.explain(&rows(3, 2.0)).unwrap();
        assert!(attributions.column(3).iter().all(|v| v.abs() < 1e-7));
    }

    #[test]
    fn results_are_deterministic() {
        let model = tiny_network();
        let a = Explainer::new(&model, rows(6, 0.0), 1, 42)
            .unwrap()
            .explain(&rows(4, 1.0))
            .unwrap();
        let b = Explainer::new(&model, rows(6, 0.0), 1, 42)
            .unwrap()
            .explain(&rows(4, 1.0))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn complement_flips_sign_and_base() {
        let model = tiny_network();
        let explainer = Explainer::new(&model, rows(4, 0.0), 1, 1).unwrap();
        let class1 = explainer.explain(&rows(2, 1.0)).unwrap();
        let class0 = class1.complement();
        assert!((class0.base_value + class1.base_value - 1.0).abs() < 1e-6);
        assert_eq!(class0.values[1][2], -class1.values[1][2]);
    }

    #[test]
    fn empty_inputs_are_errors() {
        let model = tiny_network();
        assert!(matches!(
            Explainer::new(&model, Vec::new(), 1, 0),
            Err(ExplainError::EmptyBackground)
        ));
        let explainer = Explainer::new(&model, rows(2, 0.0), 1, 0).unwrap();
        assert!(matches!(
            explainer.explain(&[]),
            Err(ExplainError::EmptyEvaluation)
        ));
    }
}
