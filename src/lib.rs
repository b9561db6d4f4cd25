//! Three layer feed-forward classifier for 28x28 grayscale digits, trained from scratch.
//!
//! `inputs -> relu -> relu -> softmax`, no biases, plain mini-batch SGD with
//! inverted dropout on the first hidden layer and an 80/20 holdout redrawn every epoch.
//!
//! All randomness comes from a [`fastrand::Rng`] passed in by the caller,
//! so a seed reproduces a run exactly.
//!
//!```rust
//!   use digitnet::prelude::*;
//!   use ndarray::Array2;
//!
//!   let mut rng = fastrand::Rng::with_seed(1);
//!   let mut nn = Network::new(4, 16, 16, 2, &mut rng).unwrap();
//!
//!   let features = Array2::from_shape_fn((25, 4), |(r, c)| ((r + c) % 2) as f64);
//!   let labels = (0..25).map(|r| r % 2).collect::<Vec<_>>();
//!
//!   nn.train(&features, &labels, &TrainConfig::new(4, 3), &mut rng).unwrap();
//!   //5 batches and one validation per epoch
//!   assert_eq!(nn.history().len(), 18);
//!```
pub mod activation;
pub mod dropout;
pub mod error;
pub mod history;
pub mod initialization;
pub mod loss;
pub mod nn;
pub mod trainer;


pub mod prelude {
    pub use crate::activation::{relu, relu_prime, softmax, stable_softmax};
    pub use crate::dropout::{DropoutMask, DEFAULT_KEEP_PROBABILITY};
    pub use crate::error::{Error, Result};
    pub use crate::history::{History, Record};
    pub use crate::initialization::Initialization;
    pub use crate::loss::{
        accuracy, cross_entropy_loss, max_index, one_hot_cross_entropy, to_one_hot,
    };
    pub use crate::nn::{
        DropoutPropagation, Gradients, Network, Propagation, Weights, DEFAULT_LEARNING_RATE,
    };
    pub use crate::trainer::{EpochPlan, Remainder, TrainConfig, Trainer};
}
