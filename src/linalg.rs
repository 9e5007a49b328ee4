//! Small dense linear algebra helpers for the Bloch-McConnell rate matrices.

use nalgebra::DMatrix;

/// Order of the diagonal Padé approximant used by [`expm`].
const PADE_ORDER: usize = 6;

/// Largest number of squarings accepted before the input is considered degenerate.
const MAX_SQUARINGS: i32 = 64;

/// Matrix exponential by scaling and squaring with a diagonal Padé approximant.
///
/// The matrix is scaled by `2^-s` until its infinity norm is at most 0.5, the
/// degree-6 Padé approximant is evaluated, and the result is squared `s` times.
///
/// # Arguments
/// * `a` - Square matrix to exponentiate
///
/// # Returns
/// * `Option<DMatrix>` - `exp(a)`, or `None` when the input is not finite or the
///   denominator of the approximant is singular
pub fn expm(a: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    if !a.is_square() {
        return None;
    }
    if a.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let norm = a
        .row_iter()
        .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0, f64::max);
    let squarings = if norm > 0.5 {
        (norm / 0.5).log2().ceil() as i32
    } else {
        0
    };
    if squarings > MAX_SQUARINGS {
        return None;
    }

    let x = a.scale(2f64.powi(-squarings));
    let identity = DMatrix::<f64>::identity(a.nrows(), a.ncols());

    let mut c = 1.0;
    let mut power = identity.clone();
    let mut numer = identity.clone();
    let mut denom = identity;
    for k in 1..=PADE_ORDER {
        c *= (PADE_ORDER - k + 1) as f64 / (k * (2 * PADE_ORDER - k + 1)) as f64;
        power = &x * &power;
        numer += &power * c;
        if k % 2 == 0 {
            denom += &power * c;
        } else {
            denom -= &power * c;
        }
    }

    let mut result = denom.lu().solve(&numer)?;
    for _ in 0..squarings {
        result = &result * &result;
    }

    if result.iter().all(|v| v.is_finite()) {
        Some(result)
    } else {
        None
    }
}

/// Largest eigenvalue with zero imaginary part.
///
/// # Returns
/// * `Option<f64>` - The eigenvalue, or `None` when the decomposition does not
///   converge or no eigenvalue is real
pub fn largest_real_eigenvalue(a: &DMatrix<f64>) -> Option<f64> {
    if !a.is_square() {
        return None;
    }
    if a.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let schur = a.clone_owned().try_schur(1.0e-14, 10_000)?;
    schur
        .complex_eigenvalues()
        .iter()
        .filter(|z| z.im.abs() <= 1.0e-9 * z.re.abs().max(1.0))
        .map(|z| z.re)
        .reduce(f64::max)
}
