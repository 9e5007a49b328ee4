use serde::{Deserialize, Serialize};

/// Calculates the residual sum of squares (RSS).
///
/// RSS = Σ(y_calc - y_obs)²
///
/// # Arguments
/// * `residuals` - Differences between calculated and observed values
///
/// # Returns
/// * `f64` - Residual sum of squares
pub fn residual_sum_of_squares(residuals: &[f64]) -> f64 {
    residuals.iter().map(|r| r * r).sum()
}

/// Calculates the root mean squared residual (RMS), in the units of the data.
///
/// RMS = √(RSS/n)
///
/// # Arguments
/// * `residuals` - Differences between calculated and observed values
///
/// # Returns
/// * `f64` - Root mean squared residual
pub fn root_mean_squared_error(residuals: &[f64]) -> f64 {
    (residual_sum_of_squares(residuals) / residuals.len() as f64).sqrt()
}

/// Calculates the Akaike Information Criterion (AIC). Lower values indicate
/// better models.
///
/// AIC = 2k + n * ln(RSS)
/// where:
/// - n is the number of data points
/// - k is the number of fitted parameters
///
/// # Arguments
/// * `rss` - Residual sum of squares
/// * `num_samples` - Number of data points
/// * `num_parameters` - Number of fitted parameters
///
/// # Returns
/// * `f64` - AIC value
pub fn akaike_information_criterion(rss: f64, num_samples: usize, num_parameters: usize) -> f64 {
    2.0 * num_parameters as f64 + num_samples as f64 * rss.ln()
}

/// Calculates the small sample corrected AIC.
///
/// AICc = AIC + 2k(k+1)/(n-k-1)
///
/// The correction is evaluated in floating point. With `n <= k + 1` the
/// correction is undefined and NaN is returned.
///
/// # Arguments
/// * `rss` - Residual sum of squares
/// * `num_samples` - Number of data points
/// * `num_parameters` - Number of fitted parameters
///
/// # Returns
/// * `f64` - AICc value
pub fn corrected_akaike_information_criterion(
    rss: f64,
    num_samples: usize,
    num_parameters: usize,
) -> f64 {
    if num_samples <= num_parameters + 1 {
        return f64::NAN;
    }
    let n = num_samples as f64;
    let k = num_parameters as f64;
    akaike_information_criterion(rss, num_samples, num_parameters) + 2.0 * k * (k + 1.0) / (n - k - 1.0)
}

/// Calculates the reduced chi-square of error weighted residuals.
///
/// χ²_red = Σ((y_calc - y_obs)/err)² / (n - k)
///
/// # Arguments
/// * `residuals` - Differences between calculated and observed values
/// * `errors` - Measurement error of each point
/// * `num_parameters` - Number of fitted parameters
///
/// # Returns
/// * `f64` - Reduced chi-square, NaN without degrees of freedom
pub fn reduced_chi_square(residuals: &[f64], errors: &[f64], num_parameters: usize) -> f64 {
    if residuals.len() <= num_parameters {
        return f64::NAN;
    }
    let chi_sq = residuals
        .iter()
        .zip(errors)
        .map(|(r, e)| (r / e).powi(2))
        .sum::<f64>();
    chi_sq / (residuals.len() - num_parameters) as f64
}

/// Goodness of fit summary of one parameter vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitQuality {
    pub n_points: usize,
    pub n_params: usize,
    pub rss: f64,
    pub rms: f64,
    pub aic: f64,
    pub aicc: f64,
    pub reduced_chi_sq: f64,
}

impl FitQuality {
    /// Computes every statistic from residuals and point errors.
    pub fn new(residuals: &[f64], errors: &[f64], num_parameters: usize) -> Self {
        let n = residuals.len();
        let rss = residual_sum_of_squares(residuals);
        Self {
            n_points: n,
            n_params: num_parameters,
            rss,
            rms: root_mean_squared_error(residuals),
            aic: akaike_information_criterion(rss, n, num_parameters),
            aicc: corrected_akaike_information_criterion(rss, n, num_parameters),
            reduced_chi_sq: reduced_chi_square(residuals, errors, num_parameters),
        }
    }
}
