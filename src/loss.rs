use ndarray::{Array1, Array2, ArrayView1, Axis};

use crate::activation::stable_softmax;
use crate::error::{Error, Result};

/// Probabilities below this are raised to it before taking a logarithm
pub const PROBABILITY_FLOOR: f64 = 1e-12;

/// Encodes integer labels as rows with a single 1.
/// Width is `max(labels) + 1`.
pub fn to_one_hot(labels: &[usize]) -> Result<Array2<f64>> {
    let classes = labels
        .iter()
        .max()
        .map(|m| m + 1)
        .ok_or_else(|| Error::parameter("labels", "no labels to encode"))?;
    let mut one_hot = Array2::zeros((labels.len(), classes));
    for (row, &label) in labels.iter().enumerate() {
        one_hot[[row, label]] = 1.;
    }
    Ok(one_hot)
}

/// Index of the first maximum value
pub fn max_index(row: ArrayView1<f64>) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}

/// Loss of each example: `-sum(t * ln(q))` over the classes
pub fn one_hot_cross_entropy(one_hot: &Array2<f64>, predictions: &Array2<f64>) -> Result<Array1<f64>> {
    check_same_shape("cross entropy", one_hot, predictions)?;
    if let Some(((row, column), &value)) = predictions
        .indexed_iter()
        .find(|(_, v)| !v.is_finite() || **v < 0.)
    {
        return Err(Error::InvalidProbability { value, row, column });
    }

    let logs = predictions.mapv(|q| q.max(PROBABILITY_FLOOR).ln());
    Ok(-(one_hot * &logs).sum_axis(Axis(1)))
}

/// Mean of [`one_hot_cross_entropy`] over the batch
pub fn cross_entropy_loss(one_hot: &Array2<f64>, predictions: &Array2<f64>) -> Result<f64> {
    one_hot_cross_entropy(one_hot, predictions)?
        .mean()
        .ok_or_else(|| Error::parameter("predictions", "empty batch"))
}

/// Gradient of cross entropy wrt the logits when the output layer is softmax.
/// The softmax Jacobian and the log derivative cancel down to `q - p`.
pub fn cross_entropy_prime_with_softmax(
    one_hot: &Array2<f64>,
    predictions: &Array2<f64>,
) -> Result<Array2<f64>> {
    check_same_shape("cross entropy gradient", one_hot, predictions)?;
    Ok(predictions - one_hot)
}

/// Fraction of rows where the predicted class equals the labelled class
pub fn accuracy(predictions: &Array2<f64>, one_hot: &Array2<f64>) -> Result<f64> {
    check_same_shape("accuracy", predictions, one_hot)?;
    let total = predictions.nrows();
    let correct = predictions
        .rows()
        .into_iter()
        .zip(one_hot.rows())
        .filter(|(p, t)| max_index(p.view()) == max_index(t.view()))
        .count();
    Ok(correct as f64 / total as f64)
}

/// Mean cross entropy computed straight from logits and integer labels
pub fn cross_entropy_from_logits(logits: &Array2<f64>, labels: &[usize]) -> Result<f64> {
    check_labels(logits, labels)?;
    let probabilities = stable_softmax(logits);
    let total: f64 = labels
        .iter()
        .enumerate()
        .map(|(row, &label)| -probabilities[[row, label]].max(PROBABILITY_FLOOR).ln())
        .sum();
    Ok(total / labels.len() as f64)
}

/// Batch-averaged gradient of [`cross_entropy_from_logits`] wrt the logits
pub fn delta_cross_entropy_from_logits(logits: &Array2<f64>, labels: &[usize]) -> Result<Array2<f64>> {
    check_labels(logits, labels)?;
    let mut grad = stable_softmax(logits);
    for (row, &label) in labels.iter().enumerate() {
        grad[[row, label]] -= 1.;
    }
    Ok(grad / labels.len() as f64)
}

fn check_same_shape(context: &'static str, a: &Array2<f64>, b: &Array2<f64>) -> Result<()> {
    if a.dim() != b.dim() {
        return Err(Error::shape(context, a.dim(), b.dim()));
    }
    if a.nrows() == 0 {
        return Err(Error::parameter("batch", format!("empty batch in {context}")));
    }
    Ok(())
}

fn check_labels(logits: &Array2<f64>, labels: &[usize]) -> Result<()> {
    if logits.nrows() != labels.len() {
        return Err(Error::shape("labels", logits.dim(), (labels.len(), 1)));
    }
    if labels.is_empty() {
        return Err(Error::parameter("labels", "empty batch"));
    }
    if let Some(&label) = labels.iter().find(|&&l| l >= logits.ncols()) {
        return Err(Error::parameter(
            "labels",
            format!("label {label} outside {} classes", logits.ncols()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use ndarray::arr2;

    use super::*;
    use crate::activation::stable_softmax;

    fn logits() -> Array2<f64> {
        arr2(&[
            [-0.13916012, -0.15914156, -0.03611553, -0.06629650],
            [-0.25373585, 0.39812677, -0.24083797, -0.17328009],
            [-0.12787567, 0.14076882, -0.36499643, -0.32951989],
            [0.24145116, -0.01344613, 0.25512426, -0.31819186],
            [-0.02645782, 0.56205276, 0.05822283, -0.19174236],
            [0.11615288, -0.20608460, 0.05785365, -0.24800982],
        ])
    }

    #[test]
    fn one_hot_rows() {
        let labels = [0, 1, 2, 1, 2, 0];
        let one_hot = to_one_hot(&labels).unwrap();
        assert_eq!(one_hot.dim(), (6, 3));
        for (row, &label) in one_hot.rows().into_iter().zip(&labels) {
            assert_eq!(row.sum(), 1.);
            assert_eq!(max_index(row), label);
        }
        assert!(to_one_hot(&[]).is_err());
    }

    #[test]
    fn one_hot_width_from_max_label() {
        //missing classes still get a column
        let one_hot = to_one_hot(&[3, 1]).unwrap();
        assert_eq!(one_hot, arr2(&[[0., 0., 0., 1.], [0., 1., 0., 0.]]));
    }

    #[test]
    fn max_index_first_on_tie() {
        let a = arr2(&[[0.2, 0.4, 0.4], [0.9, 0.05, 0.05]]);
        assert_eq!(max_index(a.row(0)), 1);
        assert_eq!(max_index(a.row(1)), 0);
    }

    #[test]
    fn accuracy_all_or_nothing() {
        let labels = to_one_hot(&[0, 1, 2]).unwrap();
        let good = arr2(&[[0.8, 0.1, 0.1], [0.2, 0.7, 0.1], [0.3, 0.3, 0.4]]);
        let bad = arr2(&[[0.1, 0.8, 0.1], [0.2, 0.1, 0.7], [0.4, 0.3, 0.3]]);
        assert_eq!(accuracy(&good, &labels).unwrap(), 1.0);
        assert_eq!(accuracy(&bad, &labels).unwrap(), 0.0);

        let half = arr2(&[[0.8, 0.1, 0.1], [0.8, 0.1, 0.1]]);
        let labels = to_one_hot(&[0, 2]).unwrap();
        assert_eq!(accuracy(&half, &labels).unwrap(), 0.5);
    }

    #[test]
    fn accuracy_shape_mismatch() {
        let labels = to_one_hot(&[0, 1]).unwrap();
        let preds = Array2::zeros((3, 2));
        assert!(matches!(
            accuracy(&preds, &labels),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn cross_entropy_non_negative() {
        let labels = to_one_hot(&[3, 1, 2, 1, 2, 0]).unwrap();
        let preds = stable_softmax(&logits());
        let per_example = one_hot_cross_entropy(&labels, &preds).unwrap();
        assert_eq!(per_example.len(), 6);
        assert!(per_example.iter().all(|&l| l >= 0.));
        assert!(cross_entropy_loss(&labels, &preds).unwrap() > 0.);
    }

    #[test]
    fn cross_entropy_tends_to_zero() {
        let labels = to_one_hot(&[0, 1]).unwrap();
        let mut last = f64::INFINITY;
        for eps in [1e-1, 1e-3, 1e-6, 1e-9] {
            let preds = arr2(&[[1. - eps, eps], [eps, 1. - eps]]);
            let loss = cross_entropy_loss(&labels, &preds).unwrap();
            assert!(loss >= 0. && loss < last);
            last = loss;
        }
        assert!(last < 1e-8);
        let exact = arr2(&[[1., 0.], [0., 1.]]);
        assert_eq!(cross_entropy_loss(&labels, &exact).unwrap(), 0.);
    }

    #[test]
    fn cross_entropy_guards_log() {
        let labels = to_one_hot(&[0]).unwrap();
        //zero probability on the true class is clamped, not infinite
        let loss = cross_entropy_loss(&labels, &arr2(&[[0., 1.]])).unwrap();
        assert!((loss + PROBABILITY_FLOOR.ln()).abs() < 1e-9);

        let err = cross_entropy_loss(&labels, &arr2(&[[f64::NAN, 1.]])).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidProbability { row: 0, column: 0, .. }
        ));
        assert!(cross_entropy_loss(&labels, &arr2(&[[-0.1, 1.1]])).is_err());
    }

    #[test]
    fn index_and_one_hot_paths_agree() {
        let labels = [3, 1, 2, 1, 2, 0];
        let one_hot = to_one_hot(&labels).unwrap();
        let preds = stable_softmax(&logits());

        let a = cross_entropy_from_logits(&logits(), &labels).unwrap();
        let b = cross_entropy_loss(&one_hot, &preds).unwrap();
        assert!((a - b).abs() < 1e-12);

        //the index form divides by m, the one-hot form does not
        let delta = delta_cross_entropy_from_logits(&logits(), &labels).unwrap();
        let prime = cross_entropy_prime_with_softmax(&one_hot, &preds).unwrap();
        for (d, p) in delta.iter().zip(prime.iter()) {
            assert!((d * 6. - p).abs() < 1e-12);
        }
    }

    #[test]
    fn labels_out_of_range() {
        assert!(cross_entropy_from_logits(&logits(), &[0, 1, 2, 3, 4, 0]).is_err());
        assert!(delta_cross_entropy_from_logits(&logits(), &[0, 1]).is_err());
    }
}
