//! Closed-form and matrix R1rho expressions for two-state exchange.
//!
//! All functions evaluate a single irradiation point. Angular frequencies are in
//! rad/s, rates in 1/s.

use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};

use crate::linalg::{expm, largest_real_eigenvalue};

/// Relative B1 deviations sampled when averaging over field inhomogeneity.
const SD_WEIGHTS: [f64; 11] = [
    0.022, 0.0444, 0.0777, 0.1159, 0.1473, 0.1596, 0.1473, 0.1159, 0.0777, 0.0444, 0.0216,
];

/// Fractional standard deviation of B1 across the sample.
const SD_SPREAD: f64 = 0.2;

/// Exchange and relaxation parameters of the two-state model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExchangePars {
    pub kex: f64,
    pub pb: f64,
    pub r1a: f64,
    pub r1b: f64,
    pub r2a: f64,
    pub r2b: f64,
}

impl ExchangePars {
    pub fn pa(&self) -> f64 {
        1.0 - self.pb
    }

    /// Same relaxation rates with exchange switched off.
    pub fn without_exchange(&self) -> Self {
        Self {
            kex: 0.0,
            pb: 0.0,
            ..*self
        }
    }
}

/// Spin-lock geometry at one point: B1 strength and the offsets of both states.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Irradiation {
    pub omega_b1: f64,
    pub delta_a: f64,
    pub delta_b: f64,
}

impl Irradiation {
    /// Converts an irradiation offset and the state shifts (ppm) plus B1 (Hz) to rad/s.
    pub fn new(offset: f64, b1: f64, delta_a0: f64, delta_b0: f64, field: f64) -> Self {
        Self {
            omega_b1: b1 * 2.0 * PI,
            delta_a: (delta_a0 - offset) * field * 2.0 * PI,
            delta_b: (delta_b0 - offset) * field * 2.0 * PI,
        }
    }

    /// Population weighted average offset.
    pub fn omega_bar(&self, pb: f64) -> f64 {
        (1.0 - pb) * self.delta_a + pb * self.delta_b
    }

    fn scaled_b1(&self, factor: f64) -> Self {
        Self {
            omega_b1: self.omega_b1 * factor,
            ..*self
        }
    }
}

/// Effective field and tilt angle of the spin-lock frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TiltedFrame {
    pub we: f64,
    pub sin2t: f64,
    pub cos2t: f64,
}

impl TiltedFrame {
    pub fn new(omega_b1: f64, omega_bar: f64) -> Self {
        let we = (omega_b1 * omega_b1 + omega_bar * omega_bar).sqrt();
        let sin2t = (omega_b1 / we) * (omega_b1 / we);
        let cos2t = (omega_bar / we) * (omega_bar / we);
        Self { we, sin2t, cos2t }
    }
}

/// Trott-Palmer perturbation expression.
pub fn r1rho_perturbation(irr: &Irradiation, p: &ExchangePars) -> f64 {
    let w = irr.omega_b1;
    let (da, db) = (irr.delta_a, irr.delta_b);
    let k1 = p.pb * p.kex;
    let km1 = p.pa() * p.kex;
    let dr = (p.r2b - p.r2a).abs();
    let dw = db - da;
    let we_a2 = w * w + da * da;
    let we_b2 = w * w + db * db;
    let sin2t = TiltedFrame::new(w, da).sin2t;
    let x = (dw * dw + dr * dr) * km1 + dr * (we_a2 + km1 * km1);
    let y = km1 * (we_b2 + (km1 + dr) * (km1 + dr)) + dr * w * w;
    // no exchange contribution without a forward rate
    let rex = if k1 == 0.0 || y == 0.0 { 0.0 } else { k1 * x / y };
    (1.0 - sin2t) * p.r1a + sin2t * p.r2a + sin2t * rex
}

/// Relaxation in the tilted frame of the ground state without exchange.
pub fn r1rho_perturbation_noex(omega_b1: f64, delta_a: f64, r1a: f64, r2a: f64) -> f64 {
    let sin2t = TiltedFrame::new(omega_b1, delta_a).sin2t;
    (1.0 - sin2t) * r1a + sin2t * r2a
}

/// Second-order Laguerre expansion; assumes equal relaxation rates in both states.
pub fn r1rho_laguerre(irr: &Irradiation, p: &ExchangePars) -> f64 {
    let (pa, pb, kex) = (p.pa(), p.pb, p.kex);
    let w = irr.omega_b1;
    let (da, db) = (irr.delta_a, irr.delta_b);
    let r1_bar = pa * p.r1a + pb * p.r1b;
    let r2_bar = pa * p.r2a + pb * p.r2b;
    let dw = db - da;
    let frame = TiltedFrame::new(w, irr.omega_bar(pb));
    let we2 = frame.we * frame.we;
    let we_a2 = w * w + da * da;
    let we_b2 = w * w + db * db;
    let x = pa * pb * dw * dw * frame.sin2t;
    let y = we_a2 * we_b2 / we2 + kex * kex;
    let z = x
        * (1.0
            + 2.0 * kex * kex * (pa * we_a2 + pb * we_b2) / (we_a2 * we_b2 + we2 * kex * kex));
    let rex = kex * x / (y - z);
    (1.0 - frame.sin2t) * r1_bar + frame.sin2t * r2_bar + rex
}

/// First-order Baldwin-Kay expression allowing different R2 in both states.
pub fn r1rho_baldwin_kay(irr: &Irradiation, p: &ExchangePars) -> f64 {
    let (pa, pb, kex) = (p.pa(), p.pb, p.kex);
    let w = irr.omega_b1;
    let (da, db) = (irr.delta_a, irr.delta_b);
    let dr = p.r2b - p.r2a;
    let dw = db - da;
    let omega_bar = irr.omega_bar(pb);
    let frame = TiltedFrame::new(w, omega_bar);
    let sin2t = frame.sin2t;
    let cos2t = 1.0 - sin2t;
    let tan2t = sin2t / cos2t;
    let we2 = frame.we * frame.we;
    let we_a2 = w * w + da * da;
    let we_b2 = w * w + db * db;

    let f1p = pa * pb * dw * dw;
    let f2p = kex * kex + w * w + da * da * db * db / (omega_bar * omega_bar);
    let dp = kex * kex + we_a2 * we_b2 / we2;
    let f1 = pb * (we_a2 + kex * kex + dr * pa * kex);
    let f2 = 2.0 * kex + w * w / kex + dr * pa;
    let f3 = 3.0 * pb * kex
        + (2.0 * pa * kex + w * w / kex + dr + dr * pb * pb * kex * kex / we_a2) * (we_a2 / (w * w));
    let denom = dp + dr * f3 * sin2t;
    let c1 = (f2p + (f1p + dr * (f3 - f2)) * tan2t) / denom;
    let c2 = (dp / sin2t - f2p / tan2t - f1p + dr * f2) / denom;
    let rex = (f1p * kex + dr * f1) / denom;
    c1 * p.r1a * cos2t + sin2t * (c2 * p.r2a + rex)
}

/// Six dimensional Bloch-McConnell matrix for (Ax, Ay, Az, Bx, By, Bz).
pub fn rate_matrix(irr: &Irradiation, p: &ExchangePars) -> DMatrix<f64> {
    let k1 = p.pb * p.kex;
    let km1 = p.pa() * p.kex;
    let w = irr.omega_b1;
    let (da, db) = (irr.delta_a, irr.delta_b);
    let mut z = DMatrix::<f64>::zeros(6, 6);
    for i in 0..3 {
        z[(i, i)] = -k1;
        z[(i, i + 3)] = km1;
        z[(i + 3, i)] = k1;
        z[(i + 3, i + 3)] = -km1;
    }
    z[(0, 0)] -= p.r2a;
    z[(1, 1)] -= p.r2a;
    z[(2, 2)] -= p.r1a;
    z[(0, 1)] = -da;
    z[(1, 0)] = da;
    z[(1, 2)] = -w;
    z[(2, 1)] = w;

    z[(3, 3)] -= p.r2b;
    z[(4, 4)] -= p.r2b;
    z[(5, 5)] -= p.r1b;
    z[(3, 4)] = -db;
    z[(4, 3)] = db;
    z[(4, 5)] = -w;
    z[(5, 4)] = w;
    z
}

/// Decay rate from the slowest real eigenvalue of the rate matrix.
///
/// # Returns
/// * `f64` - The rate, or NaN when no real eigenvalue is found
pub fn r1rho_exact(irr: &Irradiation, p: &ExchangePars) -> f64 {
    largest_real_eigenvalue(&rate_matrix(irr, p)).map_or(f64::NAN, f64::abs)
}

/// Decay rate from integrating the ground-state spin-locked magnetization over `delay`.
///
/// # Returns
/// * `f64` - The rate, or NaN when the propagator cannot be computed
pub fn r1rho_exact0(irr: &Irradiation, p: &ExchangePars, delay: f64) -> f64 {
    let theta = irr.omega_b1.atan2(irr.delta_a);
    let (sin_a, cos_a) = theta.sin_cos();
    let mut m0 = DVector::<f64>::zeros(6);
    let mut m1 = DVector::<f64>::zeros(6);
    m0[0] = p.pa() * sin_a;
    m0[2] = p.pa() * cos_a;
    m1[0] = sin_a;
    m1[2] = cos_a;

    let Some(propagator) = expm(&(rate_matrix(irr, p) * delay)) else {
        return f64::NAN;
    };
    let mag = m1.dot(&(propagator * &m0));
    let mag0 = m1.dot(&m0);
    -(mag / mag0).ln() / delay
}

/// CEST intensity from the tilted-frame projection and a decay rate.
pub fn cest_signal(omega_b1: f64, omega_bar: f64, tex: f64, r1rho: f64) -> f64 {
    TiltedFrame::new(omega_b1, omega_bar).cos2t * (-tex * r1rho).exp()
}

/// CEST intensity averaged over a Gaussian distribution of B1 amplitudes.
pub fn cest_b1_averaged(irr: &Irradiation, p: &ExchangePars, tex: f64) -> f64 {
    let total = SD_WEIGHTS.iter().sum::<f64>();
    let step = 4.0 * SD_SPREAD / (SD_WEIGHTS.len() - 1) as f64;
    let omega_bar = irr.omega_bar(p.pb);
    SD_WEIGHTS
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let scaled = irr.scaled_b1(1.0 + (-2.0 * SD_SPREAD + i as f64 * step));
            let r1rho = r1rho_perturbation(&scaled, p);
            w / total * cest_signal(scaled.omega_b1, omega_bar, tex, r1rho)
        })
        .sum()
}

/// Integrated CEST intensity from the thermalized seven dimensional Bloch-McConnell matrix.
///
/// # Returns
/// * `f64` - Remaining ground-state Z magnetization, or NaN when the propagator fails
pub fn cest_exact0(irr: &Irradiation, p: &ExchangePars, tex: f64) -> f64 {
    let pb = p.pb;
    let k1 = pb * p.kex;
    let km1 = (1.0 - pb) * p.kex;
    let w = irr.omega_b1;
    let (da, db) = (irr.delta_a, irr.delta_b);

    let mut z = DMatrix::<f64>::zeros(7, 7);
    for i in 1..4 {
        z[(i, i)] = -k1;
        z[(i, i + 3)] = km1;
        z[(i + 3, i)] = k1;
        z[(i + 3, i + 3)] = -km1;
    }
    z[(1, 1)] -= p.r2a;
    z[(2, 2)] -= p.r2a;
    z[(3, 3)] -= p.r1a;
    z[(1, 2)] = -da;
    z[(2, 1)] = da;
    z[(2, 3)] = -w;
    z[(3, 2)] = w;
    z[(3, 0)] = 2.0 * p.r1a * (1.0 - pb);

    z[(4, 4)] -= p.r2b;
    z[(5, 5)] -= p.r2b;
    z[(6, 6)] -= p.r1b;
    z[(4, 5)] = -db;
    z[(5, 4)] = db;
    z[(5, 6)] = -w;
    z[(6, 5)] = w;
    z[(6, 0)] = 2.0 * p.r1b * pb;

    let Some(at) = expm(&(z * tex)) else {
        return f64::NAN;
    };
    let m0 = [0.5, 1.0 - pb, pb];
    let m1 = [0.5, -(1.0 - pb), -pb];
    let row = [at[(3, 0)], at[(3, 3)], at[(3, 6)]];
    let project = |m: &[f64; 3]| row.iter().zip(m).map(|(a, b)| a * b).sum::<f64>();
    (project(&m0) - project(&m1)) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pars() -> ExchangePars {
        ExchangePars {
            kex: 150.0,
            pb: 0.08,
            r1a: 2.4,
            r1b: 2.4,
            r2a: 16.0,
            r2b: 16.0,
        }
    }

    #[test]
    fn test_tilted_frame_is_normalized() {
        let frame = TiltedFrame::new(300.0, 400.0);
        assert_relative_eq!(frame.we, 500.0);
        assert_relative_eq!(frame.sin2t + frame.cos2t, 1.0, epsilon = 1e-15);
    }

    #[test]
    fn test_on_resonance_without_exchange_is_r2() {
        let irr = Irradiation::new(1.0, 200.0, 1.0, 1.0, 150.0);
        let p = pars().without_exchange();
        assert_relative_eq!(r1rho_perturbation(&irr, &p), p.r2a, epsilon = 1e-12);
        assert_relative_eq!(r1rho_exact(&irr, &p), p.r2a, epsilon = 1e-8);
    }

    #[test]
    fn test_exact_agrees_with_laguerre_in_fast_exchange() {
        // ARRANGE: kex well above dw, equal relaxation rates
        let irr = Irradiation::new(0.0, 1000.0, 0.5, 0.9, 150.0);
        let p = ExchangePars {
            kex: 5000.0,
            ..pars()
        };

        // ACT
        let exact = r1rho_exact(&irr, &p);
        let laguerre = r1rho_laguerre(&irr, &p);

        // ASSERT
        assert_relative_eq!(exact, laguerre, max_relative = 1e-3);
    }

    #[test]
    fn test_integrated_and_eigenvalue_r1rho_agree() {
        let irr = Irradiation::new(0.0, 1500.0, 0.3, 1.5, 150.0);
        let p = pars();
        let integrated = r1rho_exact0(&irr, &p, 0.5);
        let eigen = r1rho_exact(&irr, &p);
        assert_relative_eq!(integrated, eigen, max_relative = 0.02);
    }

    #[test]
    fn test_cest_exact_without_exchange_matches_noex() {
        let p = ExchangePars {
            kex: 0.0,
            pb: 0.0,
            r1a: 1.5,
            r1b: 1.5,
            r2a: 20.0,
            r2b: 20.0,
        };
        // exactly on resonance the transverse remainder has not decayed after 0.3 s
        for offset in [-8.0, -2.0, -0.2, 0.4, 3.0] {
            let irr = Irradiation::new(offset, 25.0, 0.0, 2.0, 150.0);
            let exact = cest_exact0(&irr, &p, 0.3);
            let r1rho = r1rho_perturbation_noex(irr.omega_b1, irr.delta_a, p.r1a, p.r2a);
            let noex = cest_signal(irr.omega_b1, irr.delta_a, 0.3, r1rho);
            assert_relative_eq!(exact, noex, epsilon = 5e-3);
        }
    }

    #[test]
    fn test_b1_averaging_weights_sum_to_one() {
        // with no exchange and a far offset the signal is insensitive to B1
        let irr = Irradiation::new(-30.0, 10.0, 0.0, 0.0, 150.0);
        let p = pars().without_exchange();
        let averaged = cest_b1_averaged(&irr, &p, 0.3);
        let single = cest_signal(
            irr.omega_b1,
            irr.omega_bar(p.pb),
            0.3,
            r1rho_perturbation(&irr, &p),
        );
        assert_relative_eq!(averaged, single, max_relative = 1e-4);
    }

    #[test]
    fn test_perturbation_is_finite_for_equal_rates_without_exchange() {
        let p = ExchangePars {
            kex: 0.0,
            pb: 0.0,
            r1a: 2.0,
            r1b: 2.0,
            r2a: 15.0,
            r2b: 15.0,
        };
        let irr = Irradiation::new(0.5, 100.0, 1.0, 1.0, 150.0);
        let value = r1rho_perturbation(&irr, &p);
        assert!(value.is_finite());
        assert_relative_eq!(
            value,
            r1rho_perturbation_noex(irr.omega_b1, irr.delta_a, p.r1a, p.r2a),
            epsilon = 1e-12
        );
    }
}
