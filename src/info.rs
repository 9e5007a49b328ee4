//! Human-readable tables of fit results.
//!
//! Implements `Display` for [`FitResult`] and provides [`comparison_table`]
//! for ranking several equations fitted to the same data.

use std::fmt::{self, Display};

use itertools::Itertools;
use tabled::{builder::Builder, settings::Style};

use crate::equations::EquationModel;
use crate::fitting::{CurveFit, FitResult};

/// Types that can be rendered as rows of a table.
trait TableRecord {
    /// Column headers of the table
    fn columns() -> Vec<String>;

    /// Values of one row, in column order
    fn to_record(&self) -> Vec<String>;
}

impl Display for FitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = Builder::default();
        builder.push_record(vec![format!(
            "{} ({}): RMS {:.4e}  AICc {:.3}  rChiSq {:.3}  exchange {}",
            self.equation_name(),
            self.equation.experiment(),
            self.quality.rms,
            self.quality.aicc,
            self.quality.reduced_chi_sq,
            if self.exchange_valid { "valid" } else { "not valid" }
        )]);
        builder.push_record(vec![to_table(&self.curve_fits)]);

        let mut table = builder.build();
        table.with(Style::sharp());
        write!(f, "{}", table)
    }
}

/// Converts a collection of TableRecord implementors to a formatted table string
fn to_table<T: TableRecord>(records: &[T]) -> String {
    let mut builder = Builder::default();
    builder.push_record(T::columns());
    for record in records {
        builder.push_record(record.to_record());
    }

    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}

impl TableRecord for CurveFit {
    fn columns() -> Vec<String> {
        vec![
            "Residue".to_string(),
            "State".to_string(),
            "Parameters".to_string(),
        ]
    }

    fn to_record(&self) -> Vec<String> {
        let pars = self
            .pars
            .iter()
            .map(|p| format!("{} = {:.4} ± {:.4}", p.name, p.value, p.error))
            .join("\n");
        vec![self.residue.to_string(), self.state.clone(), pars]
    }
}

impl TableRecord for FitResult {
    fn columns() -> Vec<String> {
        ["Equation", "Params", "RMS", "AIC", "AICc", "rChiSq", "Exchange"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn to_record(&self) -> Vec<String> {
        vec![
            self.equation_name().to_string(),
            self.quality.n_params.to_string(),
            format!("{:.4e}", self.quality.rms),
            format!("{:.3}", self.quality.aic),
            format!("{:.3}", self.quality.aicc),
            format!("{:.3}", self.quality.reduced_chi_sq),
            self.exchange_valid.to_string(),
        ]
    }
}

/// Table of several fits, one row per equation, in the given order.
pub fn comparison_table(results: &[FitResult]) -> String {
    to_table(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FitOptions;
    use crate::data::{Dataset, Experiment};
    use crate::fitting::Fitter;

    fn noex_fit() -> FitResult {
        let nus = [50.0, 100.0, 200.0, 400.0, 600.0, 800.0];
        let data = Dataset::from_arrays(
            Experiment::Cpmg,
            nus.iter().map(|n| vec![*n]).collect(),
            vec![10.1, 9.9, 10.0, 10.2, 9.8, 10.0],
            vec![0.1; nus.len()],
            vec![60.8; nus.len()],
            vec![0; nus.len()],
            None,
        )
        .unwrap();
        let options = FitOptions {
            calc_error: false,
            ..FitOptions::default()
        };
        Fitter::new(options).unwrap().fit(&data, "NOEX", None).unwrap()
    }

    #[test]
    fn test_display_names_equation_and_experiment() {
        let rendered = noex_fit().to_string();
        assert!(rendered.contains("NOEX (cpmg)"), "{}", rendered);
        assert!(rendered.contains("not valid"));
        assert!(rendered.contains("R2"));
    }

    #[test]
    fn test_comparison_table_has_one_row_per_fit() {
        let table = comparison_table(&[noex_fit(), noex_fit()]);
        assert_eq!(table.matches("NOEX").count(), 2);
        assert!(table.contains("AICc"));
    }
}
