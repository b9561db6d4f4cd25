use fastrand::Rng;
use ndarray::{Array2, Zip};

use crate::error::{Error, Result};

pub const DEFAULT_KEEP_PROBABILITY: f64 = 0.5;

/// Which units of a hidden layer survived one dropout forward pass.
/// `true` means kept. Must be handed to the backward call paired with that forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct DropoutMask {
    keep: Array2<bool>,
}

impl DropoutMask {
    /// Draws a fresh mask, each unit kept with probability `keep_probability`
    pub(crate) fn generate(shape: (usize, usize), keep_probability: f64, rng: &mut Rng) -> Self {
        let keep = Array2::from_shape_fn(shape, |_| rng.f64() < keep_probability);
        Self { keep }
    }

    pub fn from_array(keep: Array2<bool>) -> Self {
        Self { keep }
    }

    pub fn as_array(&self) -> &Array2<bool> {
        &self.keep
    }

    pub fn dim(&self) -> (usize, usize) {
        self.keep.dim()
    }

    pub fn kept(&self) -> usize {
        self.keep.iter().filter(|&&k| k).count()
    }

    /// Zeros dropped units and divides survivors by `keep_probability` (inverted dropout)
    pub(crate) fn apply(&self, values: &mut Array2<f64>, keep_probability: f64) -> Result<()> {
        if values.dim() != self.keep.dim() {
            return Err(Error::shape("dropout mask", values.dim(), self.keep.dim()));
        }
        Zip::from(values).and(&self.keep).for_each(|v, &keep| {
            *v = if keep { *v / keep_probability } else { 0. };
        });
        Ok(())
    }
}

pub(crate) fn check_keep_probability(keep_probability: f64) -> Result<()> {
    if keep_probability > 0. && keep_probability <= 1. {
        Ok(())
    } else {
        Err(Error::parameter(
            "keep_probability",
            format!("{keep_probability} is not in (0,1]"),
        ))
    }
}
