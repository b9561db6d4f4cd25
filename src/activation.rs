use ndarray::Array2;

/// Rectified linear unit: `max(0, x)` element-wise
pub fn relu(x: &Array2<f64>) -> Array2<f64> {
    x.mapv(|v| v.max(0.))
}

/// Derivative of [`relu`]: 1 where `x > 0`, 0 elsewhere.
/// Works on either the pre-activation or the activated value since both share the sign.
pub fn relu_prime(x: &Array2<f64>) -> Array2<f64> {
    x.mapv(|v| if v > 0. { 1. } else { 0. })
}

/// Plain softmax per row.
/// Overflows to NaN for large inputs, use [`stable_softmax`] for anything real.
pub fn softmax(x: &Array2<f64>) -> Array2<f64> {
    let mut out = x.mapv(f64::exp);
    for mut row in out.rows_mut() {
        let sum = row.sum();
        row /= sum;
    }
    out
}

/// Softmax per row after subtracting the row maximum, so the largest exponent is `exp(0)`
pub fn stable_softmax(x: &Array2<f64>) -> Array2<f64> {
    let mut out = x.clone();
    for mut row in out.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row /= sum;
    }
    out
}
