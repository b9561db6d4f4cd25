use fastrand::Rng;
use log::{debug, info, trace};
use ndarray::{Array2, Axis};

use crate::dropout::{check_keep_probability, DEFAULT_KEEP_PROBABILITY};
use crate::error::{Error, Result};
use crate::history::Record;
use crate::loss::{accuracy, cross_entropy_loss, to_one_hot};
use crate::nn::{check_learning_rate, Network, DEFAULT_LEARNING_RATE};

/// Share of rows used for training each epoch, the rest is held out for validation
pub const DEFAULT_TRAINING_FRACTION: f64 = 0.8;

/// What to do when the training rows don't divide evenly into batches
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Remainder {
    /// Fail with [`Error::InvalidBatching`] before training starts
    #[default]
    Reject,
    /// Skip the trailing rows of each epoch's permutation
    Drop,
}

/// Hyperparameters for [`Network::train`]
///```rust
///   use digitnet::prelude::*;
///   let config = TrainConfig::new(32, 5)
///       .with_learning_rate(0.01)
///       .with_keep_probability(0.8)
///       .with_remainder(Remainder::Drop);
///   assert!(config.validate().is_ok());
///```
#[derive(Clone, Debug, PartialEq)]
pub struct TrainConfig {
    batch_size: usize,
    epochs: usize,
    learning_rate: f64,
    keep_probability: f64,
    training_fraction: f64,
    remainder: Remainder,
}

impl TrainConfig {
    pub fn new(batch_size: usize, epochs: usize) -> Self {
        Self {
            batch_size,
            epochs,
            learning_rate: DEFAULT_LEARNING_RATE,
            keep_probability: DEFAULT_KEEP_PROBABILITY,
            training_fraction: DEFAULT_TRAINING_FRACTION,
            remainder: Remainder::Reject,
        }
    }

    pub fn with_learning_rate(mut self, rate: f64) -> Self {
        self.learning_rate = rate;
        self
    }

    /// Probability that a first hidden layer unit survives dropout, in (0,1].
    /// 1 disables dropout.
    pub fn with_keep_probability(mut self, keep_probability: f64) -> Self {
        self.keep_probability = keep_probability;
        self
    }

    pub fn with_training_fraction(mut self, fraction: f64) -> Self {
        self.training_fraction = fraction;
        self
    }

    pub fn with_remainder(mut self, remainder: Remainder) -> Self {
        self.remainder = remainder;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn epochs(&self) -> usize {
        self.epochs
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn keep_probability(&self) -> f64 {
        self.keep_probability
    }

    pub fn training_fraction(&self) -> f64 {
        self.training_fraction
    }

    pub fn remainder(&self) -> Remainder {
        self.remainder
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::parameter("batch_size", "must be positive"));
        }
        if self.epochs == 0 {
            return Err(Error::parameter("epochs", "must be positive"));
        }
        check_learning_rate(self.learning_rate)?;
        check_keep_probability(self.keep_probability)?;
        if !(self.training_fraction > 0. && self.training_fraction < 1.) {
            return Err(Error::parameter(
                "training_fraction",
                format!("{} is not in (0,1)", self.training_fraction),
            ));
        }
        Ok(())
    }
}

/// Row indices for one epoch: the holdout split and the mini-batches
#[derive(Debug, Clone)]
pub struct EpochPlan {
    index: usize,
    batches: Vec<Vec<usize>>,
    validation: Vec<usize>,
    next: usize,
}

impl EpochPlan {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Batches not yet trained on
    pub fn remaining(&self) -> usize {
        self.batches.len() - self.next
    }

    pub fn is_finished(&self) -> bool {
        self.remaining() == 0
    }

    pub fn batches(&self) -> &[Vec<usize>] {
        &self.batches
    }

    pub fn validation(&self) -> &[usize] {
        &self.validation
    }
}

/// Drives mini-batch training of a [`Network`] one step at a time.
/// All inputs are checked in [`Trainer::new`], so a step can only fail on numerical problems.
///```rust
///   use digitnet::prelude::*;
///   use ndarray::Array2;
///   let mut rng = fastrand::Rng::with_seed(1);
///   let mut nn = Network::new(3, 8, 8, 2, &mut rng).unwrap();
///   let features = Array2::from_shape_fn((10, 3), |(r, c)| ((r + c) % 2) as f64);
///   let labels = (0..10).map(|r| r % 2).collect::<Vec<_>>();
///
///   let trainer = Trainer::new(&nn, &features, &labels, TrainConfig::new(4, 1)).unwrap();
///   let mut plan = trainer.plan_epoch(0, &mut rng);
///   //stop after the first batch
///   trainer.step(&mut plan, &mut nn, &mut rng).unwrap();
///   assert_eq!(nn.history().len(), 1);
///   assert_eq!(plan.remaining(), 1);
///```
pub struct Trainer<'a> {
    features: &'a Array2<f64>,
    labels: Array2<f64>,
    config: TrainConfig,
    train_size: usize,
    batch_count: usize,
}

impl<'a> Trainer<'a> {
    pub fn new(
        network: &Network,
        features: &'a Array2<f64>,
        labels: &[usize],
        config: TrainConfig,
    ) -> Result<Self> {
        config.validate()?;

        let w1 = network.weights().w1.dim();
        if features.ncols() != w1.0 {
            return Err(Error::shape("features -> w1", features.dim(), w1));
        }
        if features.nrows() != labels.len() {
            return Err(Error::shape("labels", features.dim(), (labels.len(), 1)));
        }

        //encoded once, so the width comes from the largest label overall
        let one_hot = to_one_hot(labels)?;
        let outputs = network.shape()[3];
        if one_hot.ncols() != outputs {
            return Err(Error::shape(
                "labels -> outputs",
                one_hot.dim(),
                (labels.len(), outputs),
            ));
        }

        let rows = features.nrows();
        let train_size = (rows as f64 * config.training_fraction).round() as usize;
        if train_size == 0 || train_size >= rows {
            return Err(Error::parameter(
                "training_fraction",
                format!(
                    "{} of {rows} rows leaves an empty training or validation set",
                    config.training_fraction
                ),
            ));
        }

        let batch_size = config.batch_size;
        let invalid = Error::InvalidBatching {
            train_size,
            batch_size,
        };
        if config.remainder == Remainder::Reject && train_size % batch_size != 0 {
            return Err(invalid);
        }
        let batch_count = train_size / batch_size;
        if batch_count == 0 {
            return Err(invalid);
        }

        Ok(Self {
            features,
            labels: one_hot,
            config,
            train_size,
            batch_count,
        })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn batches_per_epoch(&self) -> usize {
        self.batch_count
    }

    pub fn train_size(&self) -> usize {
        self.train_size
    }

    pub fn validation_size(&self) -> usize {
        self.features.nrows() - self.train_size
    }

    /// The labels as encoded for training
    pub fn one_hot(&self) -> &Array2<f64> {
        &self.labels
    }

    /// Shuffles the rows, holds out the validation share and cuts the rest into batches
    pub fn plan_epoch(&self, index: usize, rng: &mut Rng) -> EpochPlan {
        let mut indices = (0..self.features.nrows()).collect::<Vec<_>>();
        rng.shuffle(&mut indices);
        let validation = indices.split_off(self.train_size);
        let batches = indices
            .chunks_exact(self.config.batch_size)
            .map(<[usize]>::to_vec)
            .collect::<Vec<_>>();

        trace!(
            "epoch {index}: {} batches of {}, {} validation rows",
            batches.len(),
            self.config.batch_size,
            validation.len()
        );

        EpochPlan {
            index,
            batches,
            validation,
            next: 0,
        }
    }

    /// Trains on the next batch of `plan`: dropout forward, score, record, dropout backward.
    /// Returns `None` once every batch of the plan has been used.
    pub fn step(
        &self,
        plan: &mut EpochPlan,
        network: &mut Network,
        rng: &mut Rng,
    ) -> Result<Option<Record>> {
        let Some(batch) = plan.batches.get(plan.next) else {
            return Ok(None);
        };
        let x = self.features.select(Axis(0), batch);
        let y = self.labels.select(Axis(0), batch);

        let keep_probability = self.config.keep_probability;
        let dropped = network.forward_with_dropout(&x, keep_probability, rng)?;
        let output = &dropped.propagation.output;

        let record = Record {
            epoch: plan.index as f64 + plan.next as f64 / plan.batches.len() as f64,
            loss: cross_entropy_loss(&y, output)?,
            accuracy: accuracy(output, &y)?,
        };
        debug!("{record}");
        network.history_mut().push(record);

        network.backward_with_dropout(
            &x,
            &y,
            &dropped.propagation,
            &dropped.mask,
            keep_probability,
            self.config.learning_rate,
        )?;
        plan.next += 1;
        Ok(Some(record))
    }

    /// Scores the held out rows without dropout and records the result at `epoch + 1`
    pub fn validate(&self, plan: &EpochPlan, network: &mut Network) -> Result<Record> {
        let x = self.features.select(Axis(0), &plan.validation);
        let y = self.labels.select(Axis(0), &plan.validation);

        let output = network.forward(&x)?.output;
        let record = Record {
            epoch: (plan.index + 1) as f64,
            loss: cross_entropy_loss(&y, &output)?,
            accuracy: accuracy(&output, &y)?,
        };
        info!("validation {record}");
        network.history_mut().push(record);
        Ok(record)
    }

    /// Every batch of a fresh plan followed by validation
    pub fn run_epoch(&self, index: usize, network: &mut Network, rng: &mut Rng) -> Result<Record> {
        info!("epoch {index}");
        let mut plan = self.plan_epoch(index, rng);
        while self.step(&mut plan, network, rng)?.is_some() {}
        self.validate(&plan, network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 25 rows of 3 features, two classes split on the first feature
    fn dataset() -> (Array2<f64>, Vec<usize>) {
        let features = Array2::from_shape_fn((25, 3), |(r, c)| match c {
            0 => (r % 2) as f64,
            1 => r as f64 / 25.,
            _ => ((r * 7) % 5) as f64 / 5.,
        });
        let labels = (0..25).map(|r| r % 2).collect();
        (features, labels)
    }

    fn network(seed: u64) -> Network {
        Network::new(3, 8, 6, 2, &mut Rng::with_seed(seed)).unwrap()
    }

    #[test]
    fn five_batches_six_records_per_epoch() {
        let (features, labels) = dataset();
        let mut nn = network(1);
        let mut rng = Rng::with_seed(2);
        let config = TrainConfig::new(4, 2);

        let trainer = Trainer::new(&nn, &features, &labels, config.clone()).unwrap();
        assert_eq!(trainer.train_size(), 20);
        assert_eq!(trainer.validation_size(), 5);
        assert_eq!(trainer.batches_per_epoch(), 5);

        nn.train(&features, &labels, &config, &mut rng).unwrap();
        assert_eq!(nn.history().len(), 12);
        let epochs = nn.history().epochs();
        let expected = [0., 0.2, 0.4, 0.6, 0.8, 1., 1., 1.2, 1.4, 1.6, 1.8, 2.];
        for (e, x) in epochs.iter().zip(expected) {
            assert!((e - x).abs() < 1e-12, "{epochs:?}");
        }
        for r in nn.history().records() {
            assert!(r.loss >= 0.);
            assert!((0. ..=1.).contains(&r.accuracy));
        }
    }

    #[test]
    fn plan_partitions_rows() {
        let (features, labels) = dataset();
        let nn = network(1);
        let trainer = Trainer::new(&nn, &features, &labels, TrainConfig::new(4, 1)).unwrap();
        let plan = trainer.plan_epoch(3, &mut Rng::with_seed(5));

        assert_eq!(plan.index(), 3);
        assert_eq!(plan.batch_count(), 5);
        assert!(plan.batches().iter().all(|b| b.len() == 4));
        assert_eq!(plan.validation().len(), 5);

        let mut all = plan
            .batches()
            .iter()
            .flatten()
            .chain(plan.validation())
            .copied()
            .collect::<Vec<_>>();
        all.sort_unstable();
        assert_eq!(all, (0..25).collect::<Vec<_>>());

        //holdout is redrawn per epoch
        let other = trainer.plan_epoch(4, &mut Rng::with_seed(6));
        assert_ne!(plan.validation(), other.validation());
    }

    #[test]
    fn uneven_batches_rejected_before_training() {
        let (features, labels) = dataset();
        let mut nn = network(1);
        let before = nn.weights().clone();
        let err = nn
            .train(&features, &labels, &TrainConfig::new(3, 1), &mut Rng::with_seed(1))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidBatching {
                train_size: 20,
                batch_size: 3
            }
        ));
        assert_eq!(nn.weights(), &before);
        assert!(nn.history().is_empty());

        //batch larger than the training set, even when dropping the remainder
        let config = TrainConfig::new(21, 1).with_remainder(Remainder::Drop);
        assert!(matches!(
            Trainer::new(&nn, &features, &labels, config),
            Err(Error::InvalidBatching { .. })
        ));
    }

    #[test]
    fn remainder_dropped() {
        let (features, labels) = dataset();
        let mut nn = network(1);
        let config = TrainConfig::new(3, 1).with_remainder(Remainder::Drop);
        let trainer = Trainer::new(&nn, &features, &labels, config).unwrap();
        assert_eq!(trainer.batches_per_epoch(), 6);

        let mut rng = Rng::with_seed(3);
        let plan = trainer.plan_epoch(0, &mut rng);
        assert_eq!(plan.batches().iter().flatten().count(), 18);
        assert_eq!(plan.validation().len(), 5);

        trainer.run_epoch(0, &mut nn, &mut rng).unwrap();
        assert_eq!(nn.history().len(), 7);
    }

    #[test]
    fn invalid_arguments() {
        let (features, labels) = dataset();
        let nn = network(1);
        let new = |config: TrainConfig| Trainer::new(&nn, &features, &labels, config).err();

        for config in [
            TrainConfig::new(0, 1),
            TrainConfig::new(4, 0),
            TrainConfig::new(4, 1).with_learning_rate(0.),
            TrainConfig::new(4, 1).with_keep_probability(0.),
            TrainConfig::new(4, 1).with_training_fraction(1.),
            TrainConfig::new(4, 1).with_training_fraction(0.01),
        ] {
            assert!(
                matches!(new(config.clone()), Some(Error::InvalidParameter { .. })),
                "{config:?}"
            );
        }

        let short = &labels[..24];
        assert!(matches!(
            Trainer::new(&nn, &features, short, TrainConfig::new(4, 1)),
            Err(Error::ShapeMismatch { .. })
        ));

        let wide = Array2::zeros((25, 4));
        assert!(matches!(
            Trainer::new(&nn, &wide, &labels, TrainConfig::new(4, 1)),
            Err(Error::ShapeMismatch { .. })
        ));

        //three classes for a two output network
        let mut three = labels.clone();
        three[0] = 2;
        assert!(matches!(
            Trainer::new(&nn, &features, &three, TrainConfig::new(4, 1)),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn interruptible() {
        let (features, labels) = dataset();
        let mut nn = network(1);
        let mut rng = Rng::with_seed(4);
        let trainer = Trainer::new(&nn, &features, &labels, TrainConfig::new(4, 1)).unwrap();
        let mut plan = trainer.plan_epoch(0, &mut rng);

        let first = trainer.step(&mut plan, &mut nn, &mut rng).unwrap().unwrap();
        let second = trainer.step(&mut plan, &mut nn, &mut rng).unwrap().unwrap();
        assert_eq!(first.epoch, 0.);
        assert!((second.epoch - 0.2).abs() < 1e-12);
        assert_eq!(plan.remaining(), 3);
        assert_eq!(nn.history().len(), 2);

        while trainer.step(&mut plan, &mut nn, &mut rng).unwrap().is_some() {}
        assert!(plan.is_finished());
        assert!(trainer.step(&mut plan, &mut nn, &mut rng).unwrap().is_none());

        let validation = trainer.validate(&plan, &mut nn).unwrap();
        assert_eq!(validation.epoch, 1.);
        assert_eq!(nn.history().len(), 6);
        assert_eq!(nn.history().last(), Some(&validation));
    }

    #[test]
    fn seeded_runs_repeat() {
        let (features, labels) = dataset();
        let config = TrainConfig::new(4, 3);
        let run = || {
            let mut nn = network(7);
            nn.train(&features, &labels, &config, &mut Rng::with_seed(8))
                .unwrap();
            nn
        };
        let a = run();
        let b = run();
        assert_eq!(a.weights(), b.weights());
        assert_eq!(a.history(), b.history());
    }

    #[test]
    fn one_hot_encoded_once() {
        let (features, labels) = dataset();
        let nn = network(1);
        let trainer = Trainer::new(&nn, &features, &labels, TrainConfig::new(4, 1)).unwrap();
        assert_eq!(trainer.one_hot().dim(), (25, 2));
        assert_eq!(trainer.one_hot()[[1, 1]], 1.);
    }
}
