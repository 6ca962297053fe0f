use crate::traits::{Scalar, VectorField};
use serde::{Deserialize, Serialize};

/// Index of ψ within a state slice.
pub const PSI: usize = 0;
/// Index of θ within a state slice.
pub const THETA: usize = 1;

/// Coupling amplitudes of the two driving waves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Couplings {
    pub v: f64,
    pub vb: f64,
}

impl Couplings {
    pub fn new(v: f64, vb: f64) -> Self {
        Self { v, vb }
    }
}

/// A point of the (ψ, θ) phase plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub psi: f64,
    pub theta: f64,
}

impl State {
    pub fn new(psi: f64, theta: f64) -> Self {
        Self { psi, theta }
    }

    pub fn to_array(self) -> [f64; 2] {
        [self.psi, self.theta]
    }
}

/// An action-angle pair driven by two resonant waves:
///
///   dψ/dz = 3V·sin(3θ − 2z) + 2·Vb·sin(2θ − z)
///   dθ/dz = 1 / (1 + 4ψ⁴)
///
/// dθ/dz lies in (0, 1] for all real ψ, so θ advances monotonically in z.
/// With both couplings zero the action ψ is an exact constant of motion.
#[derive(Debug, Clone, Copy)]
pub struct TwoWaveSystem {
    pub couplings: Couplings,
}

impl TwoWaveSystem {
    pub fn new(couplings: Couplings) -> Self {
        Self { couplings }
    }
}

impl<T: Scalar> VectorField<T> for TwoWaveSystem {
    fn dimension(&self) -> usize {
        2
    }

    fn eval(&self, z: T, y: &[T], dydz: &mut [T]) {
        let one = T::one();
        let two = T::from_f64(2.0).unwrap();
        let three = T::from_f64(3.0).unwrap();
        let four = T::from_f64(4.0).unwrap();
        let v = T::from_f64(self.couplings.v).unwrap();
        let vb = T::from_f64(self.couplings.vb).unwrap();

        let psi = y[PSI];
        let theta = y[THETA];

        dydz[PSI] = three * v * (three * theta - two * z).sin()
            + two * vb * (two * theta - z).sin();
        dydz[THETA] = one / (one + four * psi.powi(4));
    }
}

#[cfg(test)]
mod tests {
    use super::{Couplings, State, TwoWaveSystem, PSI, THETA};
    use crate::traits::VectorField;

    #[test]
    fn zero_couplings_freeze_the_action() {
        let system = TwoWaveSystem::new(Couplings::new(0.0, 0.0));
        let mut dydz = [0.0; 2];
        for &(psi, theta, z) in &[(0.2, 0.0, 0.0), (1.2, 3.7, 541.2), (-0.4, 1.0, 2.0)] {
            system.eval(z, &[psi, theta], &mut dydz);
            assert_eq!(dydz[PSI], 0.0);
        }
    }

    #[test]
    fn angle_rate_stays_in_unit_interval() {
        let system = TwoWaveSystem::new(Couplings::new(1e-2, 1e-3));
        let mut dydz = [0.0; 2];
        for i in 0..100 {
            let psi = -5.0 + 0.1 * i as f64;
            system.eval(17.3, &[psi, 0.9], &mut dydz);
            assert!(dydz[THETA] > 0.0 && dydz[THETA] <= 1.0);
        }
        // Maximum rate is attained at psi = 0.
        system.eval(0.0, &[0.0, 0.0], &mut dydz);
        assert_eq!(dydz[THETA], 1.0);
    }

    #[test]
    fn drive_terms_match_the_closed_form() {
        let system = TwoWaveSystem::new(Couplings::new(0.5, 0.25));
        let (psi, theta, z) = (0.3_f64, 1.1_f64, 4.0_f64);
        let mut dydz = [0.0; 2];
        system.eval(z, &[psi, theta], &mut dydz);

        let expected_psi =
            3.0 * 0.5 * (3.0 * theta - 2.0 * z).sin() + 2.0 * 0.25 * (2.0 * theta - z).sin();
        let expected_theta = 1.0 / (1.0 + 4.0 * psi.powi(4));
        assert!((dydz[PSI] - expected_psi).abs() < 1e-15);
        assert!((dydz[THETA] - expected_theta).abs() < 1e-15);
    }

    #[test]
    fn state_round_trips_through_array_form() {
        let state = State::new(0.45, 2.5);
        assert_eq!(state.to_array(), [0.45, 2.5]);
    }
}
