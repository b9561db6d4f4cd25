use std::fmt::Display;

use fastrand::Rng;
use ndarray::Array2;

use crate::activation::{relu, relu_prime, stable_softmax};
use crate::dropout::{check_keep_probability, DropoutMask};
use crate::error::{Error, Result};
use crate::history::History;
use crate::initialization::{init_matrix, Initialization};
use crate::loss::{cross_entropy_prime_with_softmax, max_index};
use crate::trainer::{TrainConfig, Trainer};

pub const DEFAULT_LEARNING_RATE: f64 = 0.0085;

/// The three dense matrices, each shaped `(fan_in, fan_out)`
#[derive(Debug, Clone, PartialEq)]
pub struct Weights {
    pub w1: Array2<f64>,
    pub w2: Array2<f64>,
    pub w3: Array2<f64>,
}

/// Result of a forward pass.
/// Carries the hidden activations the matching backward pass needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Propagation {
    /// softmax probabilities `(batch, outputs)`
    pub output: Array2<f64>,
    /// first hidden layer after ReLU (and dropout, if any)
    pub activation1: Array2<f64>,
    pub activation2: Array2<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropoutPropagation {
    pub propagation: Propagation,
    pub mask: DropoutMask,
}

/// dLoss/dW for each matrix, same shapes as [`Weights`]
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients {
    pub w1: Array2<f64>,
    pub w2: Array2<f64>,
    pub w3: Array2<f64>,
}

#[derive(Debug)]
pub struct Network {
    weights: Weights,
    history: History,
}

impl Network {
    /// Network with `inputs -> hidden1 -> hidden2 -> outputs` units.
    /// Hidden layers use ReLU, the output softmax. No biases.
    ///```rust
    ///    use digitnet::prelude::*;
    ///    let mut rng = fastrand::Rng::with_seed(1);
    ///    let nn = Network::new(784, 512, 512, 10, &mut rng).unwrap();
    ///    assert_eq!(nn.shape(), [784, 512, 512, 10]);
    ///```
    pub fn new(
        inputs: usize,
        hidden1: usize,
        hidden2: usize,
        outputs: usize,
        rng: &mut Rng,
    ) -> Result<Self> {
        for (name, size) in [
            ("inputs", inputs),
            ("hidden1", hidden1),
            ("hidden2", hidden2),
            ("outputs", outputs),
        ] {
            if size == 0 {
                return Err(Error::parameter(name, "layer width must be positive"));
            }
        }

        let weights = Weights {
            w1: init_matrix(Initialization::He, inputs, hidden1, rng),
            w2: init_matrix(Initialization::He, hidden1, hidden2, rng),
            w3: init_matrix(Initialization::Xavier, hidden2, outputs, rng),
        };
        Ok(Self {
            weights,
            history: History::default(),
        })
    }

    /// Builds from known matrices, checking that they chain
    pub fn from_weights(w1: Array2<f64>, w2: Array2<f64>, w3: Array2<f64>) -> Result<Self> {
        let weights = Weights { w1, w2, w3 };
        if weights.w1.ncols() != weights.w2.nrows() {
            return Err(Error::shape("w1 -> w2", weights.w1.dim(), weights.w2.dim()));
        }
        if weights.w2.ncols() != weights.w3.nrows() {
            return Err(Error::shape("w2 -> w3", weights.w2.dim(), weights.w3.dim()));
        }
        if [&weights.w1, &weights.w2, &weights.w3]
            .iter()
            .any(|w| w.is_empty())
        {
            return Err(Error::parameter("weights", "layer width must be positive"));
        }
        Ok(Self {
            weights,
            history: History::default(),
        })
    }

    /// Redraws all weights with the construction schemes
    pub fn reset_weights(&mut self, rng: &mut Rng) {
        let [inputs, hidden1, hidden2, outputs] = self.shape();
        self.weights.w1 = init_matrix(Initialization::He, inputs, hidden1, rng);
        self.weights.w2 = init_matrix(Initialization::He, hidden1, hidden2, rng);
        self.weights.w3 = init_matrix(Initialization::Xavier, hidden2, outputs, rng);
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    /// `[inputs, hidden1, hidden2, outputs]`
    pub fn shape(&self) -> [usize; 4] {
        [
            self.weights.w1.nrows(),
            self.weights.w2.nrows(),
            self.weights.w3.nrows(),
            self.weights.w3.ncols(),
        ]
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub(crate) fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    /// Forward pass without dropout
    pub fn forward(&self, x: &Array2<f64>) -> Result<Propagation> {
        self.check_input(x)?;
        let activation1 = relu(&x.dot(&self.weights.w1));
        Ok(self.forward_from_hidden1(activation1))
    }

    /// Forward pass with inverted dropout on the first hidden layer.
    /// The returned mask has to be passed to [`Network::backward_with_dropout`].
    pub fn forward_with_dropout(
        &self,
        x: &Array2<f64>,
        keep_probability: f64,
        rng: &mut Rng,
    ) -> Result<DropoutPropagation> {
        self.check_input(x)?;
        check_keep_probability(keep_probability)?;

        let mut activation1 = relu(&x.dot(&self.weights.w1));
        let mask = DropoutMask::generate(activation1.dim(), keep_probability, rng);
        mask.apply(&mut activation1, keep_probability)?;

        Ok(DropoutPropagation {
            propagation: self.forward_from_hidden1(activation1),
            mask,
        })
    }

    fn forward_from_hidden1(&self, activation1: Array2<f64>) -> Propagation {
        let activation2 = relu(&activation1.dot(&self.weights.w2));
        let output = stable_softmax(&activation2.dot(&self.weights.w3));
        Propagation {
            output,
            activation1,
            activation2,
        }
    }

    /// Probabilities only
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        Ok(self.forward(x)?.output)
    }

    /// Most likely class of each row
    pub fn classify(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        let output = self.predict(x)?;
        Ok(output.rows().into_iter().map(max_index).collect())
    }

    /// Calculates the gradients of the averaged cross entropy for all three layers
    pub fn gradients(
        &self,
        x: &Array2<f64>,
        one_hot: &Array2<f64>,
        propagation: &Propagation,
    ) -> Result<Gradients> {
        self.internal_gradients(x, one_hot, propagation, None)
    }

    /// As [`Network::gradients`], routing the first hidden layer's error through
    /// the same mask and scaling the forward pass used
    pub fn gradients_with_dropout(
        &self,
        x: &Array2<f64>,
        one_hot: &Array2<f64>,
        propagation: &Propagation,
        mask: &DropoutMask,
        keep_probability: f64,
    ) -> Result<Gradients> {
        check_keep_probability(keep_probability)?;
        self.internal_gradients(x, one_hot, propagation, Some((mask, keep_probability)))
    }

    /// One SGD step on the batch `x` whose forward pass produced `propagation`
    pub fn backward(
        &mut self,
        x: &Array2<f64>,
        one_hot: &Array2<f64>,
        propagation: &Propagation,
        learning_rate: f64,
    ) -> Result<()> {
        check_learning_rate(learning_rate)?;
        let gradients = self.gradients(x, one_hot, propagation)?;
        self.apply_gradients(&gradients, learning_rate);
        Ok(())
    }

    /// One SGD step after [`Network::forward_with_dropout`]
    pub fn backward_with_dropout(
        &mut self,
        x: &Array2<f64>,
        one_hot: &Array2<f64>,
        propagation: &Propagation,
        mask: &DropoutMask,
        keep_probability: f64,
        learning_rate: f64,
    ) -> Result<()> {
        check_learning_rate(learning_rate)?;
        let gradients =
            self.gradients_with_dropout(x, one_hot, propagation, mask, keep_probability)?;
        self.apply_gradients(&gradients, learning_rate);
        Ok(())
    }

    fn internal_gradients(
        &self,
        x: &Array2<f64>,
        one_hot: &Array2<f64>,
        propagation: &Propagation,
        dropout: Option<(&DropoutMask, f64)>,
    ) -> Result<Gradients> {
        self.check_backward(x, one_hot, propagation)?;
        let w = &self.weights;
        let batch = x.nrows() as f64;

        //softmax + cross entropy: dE/dz = q - p, averaged over the batch
        let output_delta = cross_entropy_prime_with_softmax(one_hot, &propagation.output)? / batch;

        let hidden2_error = output_delta.dot(&w.w3.t());
        let hidden2_delta = hidden2_error * relu_prime(&propagation.activation2);

        let mut hidden1_error = hidden2_delta.dot(&w.w2.t());
        if let Some((mask, keep_probability)) = dropout {
            //only units that were alive in the forward pass get any error
            mask.apply(&mut hidden1_error, keep_probability)?;
        }
        let hidden1_delta = hidden1_error * relu_prime(&propagation.activation1);

        Ok(Gradients {
            w3: propagation.activation2.t().dot(&output_delta),
            w2: propagation.activation1.t().dot(&hidden2_delta),
            w1: x.t().dot(&hidden1_delta),
        })
    }

    ///Apply gradients to network
    pub(crate) fn apply_gradients(&mut self, gradients: &Gradients, learning_rate: f64) {
        self.weights.w3.scaled_add(-learning_rate, &gradients.w3);
        self.weights.w2.scaled_add(-learning_rate, &gradients.w2);
        self.weights.w1.scaled_add(-learning_rate, &gradients.w1);
    }

    /// Runs `config.epochs()` epochs of mini-batch training, recording into [`Network::history`].
    /// All arguments are validated before the first weight update.
    pub fn train(
        &mut self,
        features: &Array2<f64>,
        labels: &[usize],
        config: &TrainConfig,
        rng: &mut Rng,
    ) -> Result<()> {
        let trainer = Trainer::new(self, features, labels, config.clone())?;
        for epoch in 0..config.epochs() {
            trainer.run_epoch(epoch, self, rng)?;
        }
        Ok(())
    }

    fn check_input(&self, x: &Array2<f64>) -> Result<()> {
        if x.ncols() != self.weights.w1.nrows() {
            return Err(Error::shape("input -> w1", x.dim(), self.weights.w1.dim()));
        }
        if x.nrows() == 0 {
            return Err(Error::parameter("x", "empty batch"));
        }
        Ok(())
    }

    fn check_backward(
        &self,
        x: &Array2<f64>,
        one_hot: &Array2<f64>,
        propagation: &Propagation,
    ) -> Result<()> {
        self.check_input(x)?;
        let [_, hidden1, hidden2, outputs] = self.shape();
        let batch = x.nrows();
        let expected = [
            ("labels", one_hot.dim(), (batch, outputs)),
            ("output", propagation.output.dim(), (batch, outputs)),
            ("activation1", propagation.activation1.dim(), (batch, hidden1)),
            ("activation2", propagation.activation2.dim(), (batch, hidden2)),
        ];
        for (context, actual, wanted) in expected {
            if actual != wanted {
                return Err(Error::shape(context, actual, wanted));
            }
        }
        Ok(())
    }
}

pub(crate) fn check_learning_rate(learning_rate: f64) -> Result<()> {
    if learning_rate.is_finite() && learning_rate > 0. {
        Ok(())
    } else {
        Err(Error::parameter(
            "learning_rate",
            format!("{learning_rate} must be positive and finite"),
        ))
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = self.shape();
        write!(
            f,
            "Network {} (relu, relu, softmax) records:{}",
            shape
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("-"),
            self.history.len()
        )
    }
}
