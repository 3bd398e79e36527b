//! The pluggable model-fitting capability: [Fitter] produces an opaque [Model] from labelled
//! feature vectors, and models are compared on a weighted coefficient of determination over a
//! held-out sample.

use anyhow::bail;
use linregress::fit_low_level_regression_model;

/// One labelled observation: a normalized feature vector, the observed finishing position and
/// the weight of the race it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingPair {
    pub input: Vec<f64>,
    pub observed: f64,
    pub weight: f64,
}

pub trait Model: Send + Sync {
    fn predict(&self, input: &[f64]) -> f64;
}

pub trait Fitter: Send + Sync {
    fn name(&self) -> &'static str;

    fn fit(&self, pairs: &[TrainingPair]) -> anyhow::Result<Box<dyn Model>>;

    /// Goodness of fit on a held-out sample: the weighted coefficient of determination
    /// (1 − SSR/SST about the weighted mean). Degenerate zero-variance samples score 1 on an
    /// exact fit and 0 otherwise.
    fn score(&self, model: &dyn Model, pairs: &[TrainingPair]) -> f64 {
        let weight_sum: f64 = pairs.iter().map(|pair| pair.weight).sum();
        if weight_sum == 0.0 {
            return 0.0;
        }
        let mean: f64 = pairs
            .iter()
            .map(|pair| pair.weight * pair.observed)
            .sum::<f64>()
            / weight_sum;
        let (mut sum_sq_residual, mut sum_sq_total) = (0.0, 0.0);
        for pair in pairs {
            let predicted = model.predict(&pair.input);
            sum_sq_residual += pair.weight * (pair.observed - predicted).powi(2);
            sum_sq_total += pair.weight * (pair.observed - mean).powi(2);
        }
        if sum_sq_total == 0.0 {
            return if sum_sq_residual == 0.0 { 1.0 } else { 0.0 };
        }
        1.0 - sum_sq_residual / sum_sq_total
    }
}

/// Least-squares fitter over the raw feature slots, optionally augmented with squared terms.
/// Weights are applied by scaling each observation row by √w, including the intercept column.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearFitter {
    quadratic: bool,
}
impl LinearFitter {
    pub fn linear() -> Self {
        Self { quadratic: false }
    }

    pub fn with_squares() -> Self {
        Self { quadratic: true }
    }
}
impl Fitter for LinearFitter {
    fn name(&self) -> &'static str {
        if self.quadratic {
            "least-squares+squares"
        } else {
            "least-squares"
        }
    }

    fn fit(&self, pairs: &[TrainingPair]) -> anyhow::Result<Box<dyn Model>> {
        let Some(first) = pairs.first() else {
            bail!("no training pairs");
        };
        let features = first.input.len();
        let regressors = regressor_count(features, self.quadratic);
        if pairs.len() <= regressors {
            bail!(
                "{} training pairs cannot determine {regressors} regressors",
                pairs.len()
            );
        }

        // Row layout per linregress's low-level API: response first, then one column per
        // regressor, the intercept column written out explicitly.
        let cols = 1 + regressors;
        let mut data = Vec::with_capacity(pairs.len() * cols);
        for pair in pairs {
            debug_assert_eq!(features, pair.input.len());
            let scale = pair.weight.sqrt();
            data.push(pair.observed * scale);
            data.push(scale);
            for &value in &pair.input {
                data.push(value * scale);
            }
            if self.quadratic {
                for &value in &pair.input {
                    data.push(value * value * scale);
                }
            }
        }

        let fitted = fit_low_level_regression_model(&data, pairs.len(), cols)?;
        Ok(Box::new(LinearModel {
            coefficients: fitted.parameters().to_vec(),
            quadratic: self.quadratic,
        }))
    }
}

fn regressor_count(features: usize, quadratic: bool) -> usize {
    1 + features * if quadratic { 2 } else { 1 }
}

struct LinearModel {
    coefficients: Vec<f64>,
    quadratic: bool,
}
impl Model for LinearModel {
    fn predict(&self, input: &[f64]) -> f64 {
        debug_assert_eq!(
            regressor_count(input.len(), self.quadratic),
            self.coefficients.len()
        );
        let mut sum = self.coefficients[0];
        for (index, &value) in input.iter().enumerate() {
            sum += self.coefficients[1 + index] * value;
        }
        if self.quadratic {
            let offset = 1 + input.len();
            for (index, &value) in input.iter().enumerate() {
                sum += self.coefficients[offset + index] * value * value;
            }
        }
        sum
    }
}

/// The candidate configurations evaluated per segment; the cache keeps whichever scores best on
/// the held-out sample.
pub fn default_fitters() -> Vec<Box<dyn Fitter>> {
    vec![
        Box::new(LinearFitter::linear()),
        Box::new(LinearFitter::with_squares()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_float_eq::*;

    fn pairs_on_line(inputs: &[(f64, f64)]) -> Vec<TrainingPair> {
        // y = 1 + 2a - 3b
        inputs
            .iter()
            .map(|&(a, b)| TrainingPair {
                input: vec![a, b],
                observed: 1.0 + 2.0 * a - 3.0 * b,
                weight: 1.0,
            })
            .collect()
    }

    #[test]
    fn recovers_linear_coefficients() {
        let pairs = pairs_on_line(&[
            (0.0, 0.1),
            (0.4, 0.9),
            (0.5, 0.2),
            (0.8, 0.8),
            (1.0, 0.3),
            (0.2, 0.6),
        ]);
        let fitter = LinearFitter::linear();
        let model = fitter.fit(&pairs).unwrap();
        assert_float_absolute_eq!(1.0, model.predict(&[0.0, 0.0]), 1e-9);
        assert_float_absolute_eq!(3.0, model.predict(&[1.0, 0.0]), 1e-9);
        assert_float_absolute_eq!(0.0, model.predict(&[1.0, 1.0]), 1e-9);
        assert_float_absolute_eq!(1.0, fitter.score(model.as_ref(), &pairs), 1e-9);
    }

    #[test]
    fn weighted_fit_favours_heavy_observations() {
        // Two contradictory clusters; the heavier one should dominate the fitted line.
        let mut pairs = vec![];
        for x in [0.0, 0.5, 1.0] {
            pairs.push(TrainingPair {
                input: vec![x],
                observed: 2.0 * x,
                weight: 100.0,
            });
            pairs.push(TrainingPair {
                input: vec![x],
                observed: -2.0 * x,
                weight: 0.01,
            });
        }
        let model = LinearFitter::linear().fit(&pairs).unwrap();
        assert!(model.predict(&[1.0]) > 1.9, "{}", model.predict(&[1.0]));
    }

    #[test]
    fn squares_candidate_fits_a_parabola() {
        let pairs: Vec<_> = [0.0, 0.2, 0.4, 0.6, 0.8, 1.0, 1.2, 1.4]
            .iter()
            .map(|&x| TrainingPair {
                input: vec![x],
                observed: 4.0 * x * x - x + 2.0,
                weight: 1.0,
            })
            .collect();
        let fitter = LinearFitter::with_squares();
        let model = fitter.fit(&pairs).unwrap();
        assert_float_absolute_eq!(2.0, model.predict(&[0.0]), 1e-8);
        assert_float_absolute_eq!(5.0, model.predict(&[1.0]), 1e-8);
        assert_float_absolute_eq!(1.0, fitter.score(model.as_ref(), &pairs), 1e-9);
    }

    #[test]
    fn underdetermined_sample_is_rejected() {
        let pairs = pairs_on_line(&[(0.0, 0.1), (0.4, 0.9)]);
        assert!(LinearFitter::linear().fit(&pairs).is_err());
        assert!(LinearFitter::linear().fit(&[]).is_err());
    }

    #[test]
    fn score_of_constant_sample() {
        struct Exact;
        impl Model for Exact {
            fn predict(&self, _: &[f64]) -> f64 {
                3.0
            }
        }
        let pairs = vec![
            TrainingPair {
                input: vec![0.0],
                observed: 3.0,
                weight: 1.0,
            },
            TrainingPair {
                input: vec![1.0],
                observed: 3.0,
                weight: 1.0,
            },
        ];
        assert_eq!(1.0, LinearFitter::linear().score(&Exact, &pairs));
    }
}
