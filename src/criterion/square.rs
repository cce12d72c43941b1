//! Square loss for regression targets.

/// First and second derivative of the squared error at a prediction.
#[inline]
pub fn gradients(yhat: f64, target: f64) -> (f64, f64) {
    (yhat - target, 1.0)
}

/// The squared error of a single sample.
#[inline]
pub fn squared_error(yhat: f64, target: f64) -> f64 {
    let diff = yhat - target;
    diff * diff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gradients() {
        let (g, h) = gradients(3.0, 1.0);
        assert_eq!(g, 2.0);
        assert_eq!(h, 1.0);
    }

    #[test]
    fn test_squared_error() {
        assert_eq!(squared_error(3.0, 1.0), 4.0);
    }
}
