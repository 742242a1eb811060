//! Observation likelihoods as functions of the latent cellular frequency.

use statrs::function::factorial::ln_binomial;

use crate::data::DataPoint;
use crate::errors::Error;
use crate::math::logaddexp;

/// Probability of one feature's observations as a function of the cellular
/// frequency `phi`.
///
/// Implementations must be pure: deterministic, side-effect free, and
/// defined for every `phi` in [0, 1]. The sampler only ever evaluates this
/// in log space, so swapping in another likelihood family is a matter of
/// implementing this trait.
pub trait Likelihood {
    /// Natural log of the observation probability at `phi`.
    fn log_likelihood(&self, phi: f64) -> f64;
}

/// Binomial genotype-mixture likelihood.
///
/// The variant count `a` out of depth `d` is Binomial with a success
/// probability mixing the reference and variant populations: for the state
/// pair `(i, j)` the per-read success probability is
/// `(1 - phi) * mu_r[i] + phi * mu_v[j]`, weighted by the normalized
/// product of `delta_r[i]` and `delta_v[j]`. At `phi = 0` the value depends
/// only on the reference branch, at `phi = 1` only on the variant branch.
#[derive(Debug, Clone)]
pub struct BinomialLikelihood {
    a: u64,
    d: u64,
    /// Flattened `(mu_r[i], mu_v[j], ln weight)` over state pairs with
    /// non-zero weight.
    states: Vec<(f64, f64, f64)>,
    ln_coeff: f64,
}

impl BinomialLikelihood {
    /// Build the likelihood for one data point.
    ///
    /// Fails when either delta vector carries no mass, since the state
    /// mixture could not be normalized.
    pub fn new(data: &DataPoint) -> Result<Self, Error> {
        let delta_r_total: f64 = data.delta_r().iter().sum();
        if !(delta_r_total > 0.0) {
            return Err(Error::Model {
                msg: "reference state weights delta_r sum to zero".to_string(),
            });
        }
        let delta_v_total: f64 = data.delta_v().iter().sum();
        if !(delta_v_total > 0.0) {
            return Err(Error::Model {
                msg: "variant state weights delta_v sum to zero".to_string(),
            });
        }

        let mut states = Vec::with_capacity(data.mu_r().len() * data.mu_v().len());
        for (&mu_r, &delta_r) in data.mu_r().iter().zip(data.delta_r()) {
            for (&mu_v, &delta_v) in data.mu_v().iter().zip(data.delta_v()) {
                let ln_weight =
                    (delta_r / delta_r_total).ln() + (delta_v / delta_v_total).ln();
                if ln_weight.is_finite() {
                    states.push((mu_r, mu_v, ln_weight));
                }
            }
        }

        Ok(Self {
            a: data.a(),
            d: data.d(),
            states,
            ln_coeff: ln_binomial(data.d(), data.a()),
        })
    }
}

impl Likelihood for BinomialLikelihood {
    fn log_likelihood(&self, phi: f64) -> f64 {
        let mixture = self
            .states
            .iter()
            .fold(f64::NEG_INFINITY, |acc, &(mu_r, mu_v, ln_weight)| {
                let p = (1.0 - phi) * mu_r + phi * mu_v;
                logaddexp(acc, ln_weight + ln_success(self.a, self.d, p))
            });
        self.ln_coeff + mixture
    }
}

/// `a ln(p) + (d - a) ln(1 - p)` with the `0 ln 0 = 0` convention at the
/// boundaries.
fn ln_success(a: u64, d: u64, p: f64) -> f64 {
    let p = p.clamp(0.0, 1.0);
    let successes = if a == 0 { 0.0 } else { a as f64 * p.ln() };
    let failures = if a == d {
        0.0
    } else {
        (d - a) as f64 * (1.0 - p).ln()
    };
    successes + failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn point(
        a: u64,
        d: u64,
        mu_r: &[f64],
        mu_v: &[f64],
        delta_r: &[f64],
        delta_v: &[f64],
    ) -> DataPoint {
        DataPoint::new(
            a,
            d,
            mu_r.to_vec(),
            mu_v.to_vec(),
            delta_r.to_vec(),
            delta_v.to_vec(),
        )
        .unwrap()
    }

    #[test]
    fn single_state_matches_binomial() {
        let lk = BinomialLikelihood::new(&point(5, 10, &[0.001], &[0.5], &[1.0], &[1.0])).unwrap();
        // At phi = 1 the success probability is exactly mu_v = 0.5.
        let expected = ln_binomial(10, 5) + 10.0 * 0.5f64.ln();
        assert_relative_eq!(lk.log_likelihood(1.0), expected, max_relative = 1e-12);
    }

    #[test]
    fn boundaries_use_only_one_branch() {
        let base = point(3, 8, &[0.01], &[0.7], &[1.0], &[1.0]);
        let other_variant = point(3, 8, &[0.01], &[0.2], &[1.0], &[1.0]);
        let other_reference = point(3, 8, &[0.3], &[0.7], &[1.0], &[1.0]);

        let lk = BinomialLikelihood::new(&base).unwrap();
        let lk_variant = BinomialLikelihood::new(&other_variant).unwrap();
        let lk_reference = BinomialLikelihood::new(&other_reference).unwrap();

        // phi = 0 ignores the variant branch, phi = 1 the reference branch.
        assert_eq!(lk.log_likelihood(0.0), lk_variant.log_likelihood(0.0));
        assert_eq!(lk.log_likelihood(1.0), lk_reference.log_likelihood(1.0));
        assert_ne!(lk.log_likelihood(0.5), lk_variant.log_likelihood(0.5));
    }

    #[test]
    fn finite_over_the_unit_interval() {
        let lk = BinomialLikelihood::new(&point(
            4,
            12,
            &[0.001, 0.5],
            &[0.5, 0.999],
            &[1.0, 2.0],
            &[3.0, 1.0],
        ))
        .unwrap();
        for step in 0..=100 {
            let phi = f64::from(step) / 100.0;
            let value = lk.log_likelihood(phi);
            assert!(value.is_finite(), "log likelihood at {phi} was {value}");
            assert!(value <= 0.0, "probability above one at {phi}");
        }
    }

    #[test]
    fn zero_weights_are_degenerate() {
        let data = point(5, 10, &[0.001], &[0.5], &[0.0], &[1.0]);
        let err = BinomialLikelihood::new(&data).unwrap_err();
        assert!(matches!(err, Error::Model { .. }), "{err}");
    }

    #[test]
    fn zero_weight_states_are_dropped() {
        let weighted = point(5, 10, &[0.001, 0.9], &[0.5], &[1.0, 0.0], &[1.0]);
        let plain = point(5, 10, &[0.001], &[0.5], &[1.0], &[1.0]);
        let lk_weighted = BinomialLikelihood::new(&weighted).unwrap();
        let lk_plain = BinomialLikelihood::new(&plain).unwrap();
        assert_relative_eq!(
            lk_weighted.log_likelihood(0.3),
            lk_plain.log_likelihood(0.3),
            max_relative = 1e-12
        );
    }
}
