use std::fmt::Display;

use fastrand::Rng;
use ndarray::Array2;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Initialization {
    ///`2 * N(0,1) / sqrt(fan_in)`, for layers feeding a ReLU.
    /// The factor 2 compensates for ReLU zeroing about half its inputs
    He,
    ///`N(0,1) / sqrt(fan_in)`, for the layer feeding softmax
    Xavier,
    Fixed(f64),
}

pub fn calc_initialization(typ: Initialization, fan_in: usize, rng: &mut Rng) -> f64 {
    match typ {
        Initialization::He => 2. * standard_normal(rng) / (fan_in as f64).sqrt(),
        Initialization::Xavier => standard_normal(rng) / (fan_in as f64).sqrt(),
        Initialization::Fixed(val) => val,
    }
}

/// Matrix of shape `(fan_in, fan_out)` filled according to `typ`
pub fn init_matrix(
    typ: Initialization,
    fan_in: usize,
    fan_out: usize,
    rng: &mut Rng,
) -> Array2<f64> {
    Array2::from_shape_fn((fan_in, fan_out), |_| calc_initialization(typ, fan_in, rng))
}

/// Box-Muller transform over two uniform draws
pub fn standard_normal(rng: &mut Rng) -> f64 {
    //f64() is in [0,1), flip it so ln never sees 0
    let u1 = 1. - rng.f64();
    let u2 = rng.f64();
    (-2. * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

impl Display for Initialization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Initialization::He => write!(f, "He"),
            Initialization::Xavier => write!(f, "Xavier"),
            Initialization::Fixed(val) => write!(f, "Fixed({val})"),
        }
    }
}
