// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Exponential smoothing of the fraction of ECN-marked bytes

/// The default smoothing gain given to new samples
pub const DEFAULT_GAIN: f64 = 1.0 / 16.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Estimator {
    alpha: f64,
    gain: f64,
}

impl Default for Estimator {
    #[inline]
    fn default() -> Self {
        Self::new(0.0, DEFAULT_GAIN)
    }
}

impl Estimator {
    /// Creates an estimator starting at `alpha` with gain `g`.
    ///
    /// Both values are clamped into their valid ranges, alpha to `[0, 1]` and g to `(0, 1]`.
    #[inline]
    pub fn new(alpha: f64, gain: f64) -> Self {
        let gain = if gain.is_finite() && gain > 0.0 {
            gain.min(1.0)
        } else {
            DEFAULT_GAIN
        };

        Self {
            alpha: clamp_unit(alpha),
            gain,
        }
    }

    #[inline]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    #[inline]
    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// Folds a new marked ratio into the estimate
    ///
    /// `alpha = (1 - g) * alpha + g * ratio`
    #[inline]
    pub fn update(&mut self, ratio: f64) -> f64 {
        let ratio = clamp_unit(ratio);
        self.alpha = clamp_unit((1.0 - self.gain) * self.alpha + self.gain * ratio);
        self.alpha
    }

    #[inline]
    pub fn reset(&mut self, alpha: f64) {
        self.alpha = clamp_unit(alpha);
    }
}

#[inline]
fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolero::check;

    #[test]
    fn converges_towards_ratio() {
        let mut estimator = Estimator::new(0.0, 0.5);
        assert_eq!(estimator.update(1.0), 0.5);
        assert_eq!(estimator.update(1.0), 0.75);
        assert_eq!(estimator.update(0.0), 0.375);
    }

    #[test]
    fn default_gain() {
        let mut estimator = Estimator::new(1.0, DEFAULT_GAIN);
        estimator.update(0.0);
        assert!((estimator.alpha() - 15.0 / 16.0).abs() < 1e-12);
    }

    #[test]
    fn invalid_inputs_are_clamped() {
        let estimator = Estimator::new(3.0, -1.0);
        assert_eq!(estimator.alpha(), 1.0);
        assert_eq!(estimator.gain(), DEFAULT_GAIN);

        let mut estimator = Estimator::new(0.5, 0.5);
        estimator.update(f64::NAN);
        assert_eq!(estimator.alpha(), 0.25);
    }

    #[test]
    fn alpha_is_bounded() {
        check!()
            .with_type::<(f64, f64, Vec<f64>)>()
            .for_each(|(initial, gain, ratios)| {
                let mut estimator = Estimator::new(*initial, *gain);
                assert!((0.0..=1.0).contains(&estimator.alpha()));
                assert!(estimator.gain() > 0.0 && estimator.gain() <= 1.0);

                for ratio in ratios {
                    let alpha = estimator.update(*ratio);
                    assert!((0.0..=1.0).contains(&alpha), "alpha {alpha} out of range");
                }
            });
    }
}
