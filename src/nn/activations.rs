//! Activation functions used by the recurrent gates.

use crate::tensor::Scalar;

/// Elementwise nonlinearity.
///
/// The LSTM uses two of these: the *gate* activation for the input, forget and
/// output gates, and the layer activation for the candidate and the cell output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Activation {
    /// `f(x) = 1 / (1 + exp(-x))`
    Sigmoid,
    /// `f(x) = clamp(0.2 * x + 0.5, 0, 1)`
    HardSigmoid,
    /// `f(x) = tanh(x)`
    Tanh,
    /// `f(x) = x / (1 + |x|)`
    Softsign,
    /// `f(x) = max(0, x)`
    ReLU,
    /// `f(x) = x`
    Identity,
}

impl Activation {
    /// Applies the activation to a single pre-activation value.
    pub fn apply<T: Scalar>(self, x: T) -> T {
        match self {
            Activation::Sigmoid => T::one() / (T::one() + (-x).exp()),
            Activation::HardSigmoid => {
                let y = constant::<T>(0.2) * x + constant::<T>(0.5);
                y.max(T::zero()).min(T::one())
            }
            Activation::Tanh => x.tanh(),
            Activation::Softsign => x / (T::one() + x.abs()),
            Activation::ReLU => x.max(T::zero()),
            Activation::Identity => x,
        }
    }

    /// Derivative with respect to the pre-activation `x`.
    pub fn derivative<T: Scalar>(self, x: T) -> T {
        match self {
            Activation::Sigmoid => {
                let s = Activation::Sigmoid.apply(x);
                s * (T::one() - s)
            }
            Activation::HardSigmoid => {
                let bound = constant::<T>(2.5);
                if x > -bound && x < bound {
                    constant(0.2)
                } else {
                    T::zero()
                }
            }
            Activation::Tanh => {
                let t = x.tanh();
                T::one() - t * t
            }
            Activation::Softsign => {
                let d = T::one() + x.abs();
                T::one() / (d * d)
            }
            Activation::ReLU => {
                if x > T::zero() {
                    T::one()
                } else {
                    T::zero()
                }
            }
            Activation::Identity => T::one(),
        }
    }
}

fn constant<T: Scalar>(v: f64) -> T {
    T::from_f64(v).unwrap_or_else(T::zero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const ALL: [Activation; 6] = [
        Activation::Sigmoid,
        Activation::HardSigmoid,
        Activation::Tanh,
        Activation::Softsign,
        Activation::ReLU,
        Activation::Identity,
    ];

    #[test]
    fn test_known_values() {
        assert_relative_eq!(Activation::Sigmoid.apply(0.0f64), 0.5);
        assert_relative_eq!(Activation::HardSigmoid.apply(10.0f64), 1.0);
        assert_relative_eq!(Activation::HardSigmoid.apply(-10.0f64), 0.0);
        assert_relative_eq!(Activation::Tanh.apply(0.5f64), 0.5f64.tanh());
        assert_relative_eq!(Activation::Softsign.apply(1.0f64), 0.5);
        assert_relative_eq!(Activation::ReLU.apply(-3.0f64), 0.0);
        assert_relative_eq!(Activation::Identity.apply(-3.0f64), -3.0);
    }

    #[test]
    fn test_derivatives_match_finite_differences() {
        let h = 1e-6;
        for act in ALL {
            // stay away from the kinks of relu and hard sigmoid
            for &x in &[-1.7f64, -0.3, 0.4, 1.9] {
                let numeric = (act.apply(x + h) - act.apply(x - h)) / (2.0 * h);
                assert_relative_eq!(act.derivative(x), numeric, epsilon = 1e-6);
            }
        }
    }
}
