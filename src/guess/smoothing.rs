//! Cubic Savitzky-Golay smoothing used before peak detection.

/// Convolution weights for a cubic (order 3) Savitzky-Golay filter, with their normalization.
fn coefficients(size: usize) -> Option<(&'static [f64], f64)> {
    match size {
        5 => Some((&[-3.0, 12.0, 17.0, 12.0, -3.0], 35.0)),
        7 => Some((&[-2.0, 3.0, 6.0, 7.0, 6.0, 3.0, -2.0], 21.0)),
        9 => Some((
            &[-21.0, 14.0, 39.0, 54.0, 59.0, 54.0, 39.0, 14.0, -21.0],
            231.0,
        )),
        11 => Some((
            &[
                -36.0, 9.0, 44.0, 69.0, 84.0, 89.0, 84.0, 69.0, 44.0, 9.0, -36.0,
            ],
            429.0,
        )),
        _ => None,
    }
}

/// Window size used for a curve with `n` points, or `None` when the curve is too short.
pub fn window_for(n: usize) -> Option<usize> {
    match n {
        0..=19 => None,
        20..=29 => Some(5),
        30..=39 => Some(7),
        40..=49 => Some(9),
        _ => Some(11),
    }
}

/// Applies a running cubic Savitzky-Golay filter.
///
/// Points closer than half a window to either end reuse the nearest edge value.
///
/// # Arguments
/// * `values` - Values to smooth
/// * `size` - Window size, one of 5, 7, 9 or 11
///
/// # Returns
/// * `Option<Vec<f64>>` - Smoothed values, or `None` for an unsupported window size
pub fn savitzky_golay(values: &[f64], size: usize) -> Option<Vec<f64>> {
    let (weights, norm) = coefficients(size)?;
    if values.is_empty() {
        return Some(Vec::new());
    }
    let half = (size / 2) as isize;
    let last = values.len() as isize - 1;
    let smoothed = (0..values.len() as isize)
        .map(|i| {
            weights
                .iter()
                .enumerate()
                .map(|(k, w)| {
                    let j = (i + k as isize - half).clamp(0, last) as usize;
                    w * values[j]
                })
                .sum::<f64>()
                / norm
        })
        .collect();
    Some(smoothed)
}
