//! Scenario tests for the fit pipeline.
//!
//! Covers recovery of known CPMG and decay parameters, the flat no-exchange
//! curve, guess and bound consistency across the registry, bootstrap dispersion
//! and a CEST reference dataset measured at three B1 fields.

#[cfg(test)]
mod test_fitting {
    use std::path::PathBuf;

    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rdisp::{
        config::{FitOptions, FitOptionsBuilder},
        data::{Dataset, Experiment},
        equations::{Equation, EquationModel},
        fitting::Fitter,
        guess::{cest_peak_guess, PeakMode},
    };

    const NUS: [f64; 12] = [
        25.0, 50.0, 75.0, 100.0, 150.0, 200.0, 300.0, 400.0, 500.0, 600.0, 800.0, 1000.0,
    ];
    const FIELDS: [f64; 2] = [60.8, 81.1];

    /// Fast exchange dispersion at two fields from Kex, R2 per field and dPPMmin.
    fn cpmg_fast(kex: f64, r2: [f64; 2], dppm_min: f64) -> Dataset {
        let equation = Equation::from_name(Experiment::Cpmg, "CPMGFAST").unwrap();
        let states = vec![vec![0, 0, 0, 0], vec![0, 1, 0, 0]];
        let map = equation.make_map(&states, &[1, 2, 1, 1]).unwrap();
        let pars = [kex, r2[0], r2[1], dppm_min];

        let (mut x, mut y, mut fields, mut ids) = (Vec::new(), Vec::new(), Vec::new(), Vec::new());
        for (id, field) in FIELDS.iter().enumerate() {
            let row = map.row(id).unwrap();
            for nu in NUS {
                x.push(vec![nu]);
                y.push(equation.evaluate(&pars, row, &[nu], *field));
                fields.push(*field);
                ids.push(id);
            }
        }
        let n = y.len();
        Dataset::from_arrays(Experiment::Cpmg, x, y, vec![0.2; n], fields, ids, Some(states)).unwrap()
    }

    /// Flat R2 = 12 profile with fixed pseudo noise of about 0.1.
    fn noisy_flat() -> Dataset {
        let noise = [
            0.08, -0.12, 0.03, 0.15, -0.07, -0.02, 0.11, -0.14, 0.05, -0.09, 0.01, 0.1,
        ];
        let n = NUS.len();
        Dataset::from_arrays(
            Experiment::Cpmg,
            NUS.iter().map(|nu| vec![*nu]).collect(),
            noise.iter().map(|d| 12.0 + d).collect(),
            vec![0.1; n],
            vec![60.8; n],
            vec![0; n],
            None,
        )
        .unwrap()
    }

    fn cest_reference() -> Dataset {
        let path = PathBuf::from("tests/data/cest_three_b1.json");
        let content = std::fs::read_to_string(&path).expect("Failed to read fixture");
        serde_json::from_str(&content).expect("Failed to parse fixture")
    }

    #[test]
    fn test_cpmg_fast_recovers_parameters() {
        // ARRANGE
        let data = cpmg_fast(800.0, [12.0, 14.0], 0.5);
        let options = FitOptionsBuilder::default()
            .calc_error(false)
            .build()
            .unwrap();
        let fitter = Fitter::new(options).unwrap();

        // ACT
        let result = fitter.fit(&data, "CPMGFAST", None).unwrap();

        // ASSERT
        assert_eq!(result.params.len(), 4);
        assert_relative_eq!(result.params[0], 800.0, max_relative = 0.05);
        assert_relative_eq!(result.params[1], 12.0, max_relative = 0.02);
        assert_relative_eq!(result.params[2], 14.0, max_relative = 0.02);
        assert_relative_eq!(result.params[3], 0.5, max_relative = 0.05);
        assert!(result.rms() < 0.05, "rms {}", result.rms());
        assert_eq!(result.curve_fits.len(), 2);
        assert_eq!(result.curve_fits[1].state, "1:0:0");
    }

    #[test]
    fn test_noex_curve_is_flat() {
        // ARRANGE
        let equation = Equation::from_name(Experiment::Cpmg, "NOEX").unwrap();

        // ACT
        let values = [5.0, 50.0, 333.0, 1000.0, 2000.0]
            .iter()
            .map(|nu| equation.evaluate(&[10.0], &[0], &[*nu], 60.8))
            .collect::<Vec<_>>();

        // ASSERT
        for value in values {
            assert_eq!(value, 10.0);
        }
    }

    #[test]
    fn test_fitted_noex_plot_is_flat() {
        let options = FitOptions {
            calc_error: false,
            ..FitOptions::default()
        };
        let result = Fitter::new(options)
            .unwrap()
            .fit(&noisy_flat(), "NOEX", None)
            .unwrap();
        let plot = &result.curve_fits[0].plot;
        let samples = plot.sample(20);

        assert_eq!(samples.len(), 20);
        for (_, y) in samples {
            assert_relative_eq!(y, result.params[0], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_guesses_lie_within_bounds() {
        let options = FitOptions::default();
        for data in [cpmg_fast(800.0, [12.0, 14.0], 0.5), cest_reference()] {
            for name in Equation::names(data.experiment()) {
                let equation = Equation::from_name(data.experiment(), name).unwrap();
                if equation.n_covariates() != data.n_covariates() {
                    continue;
                }
                let map = equation
                    .make_map(data.states(), &data.state_count())
                    .unwrap();

                let guesses = equation
                    .guess(&data, &map, &options)
                    .unwrap_or_else(|| panic!("{} has no guess", name));
                let bounds = equation
                    .boundaries(&guesses, &data, &map, &options)
                    .unwrap_or_else(|| panic!("{} has no bounds", name));

                assert_eq!(guesses.len(), map.n_params(), "{}", name);
                for (i, g) in guesses.iter().enumerate() {
                    assert!(
                        bounds.lower[i] <= *g && *g <= bounds.upper[i],
                        "{} slot {}: {} outside [{}, {}]",
                        name,
                        i,
                        g,
                        bounds.lower[i],
                        bounds.upper[i]
                    );
                }
            }
        }
    }

    #[test]
    fn test_peak_guess_is_idempotent_on_reference_curves() {
        let data = cest_reference();
        for id in 0..data.n_curves() {
            let curve = data.curve(id);
            let x = curve.iter().map(|p| p.x[0]).collect::<Vec<_>>();
            let y = curve.iter().map(|p| p.y).collect::<Vec<_>>();

            let first = cest_peak_guess(&x, &y, curve[0].field, PeakMode::Cest);
            let second = cest_peak_guess(&x, &y, curve[0].field, PeakMode::Cest);

            assert!(!first.is_empty());
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_bootstrap_dispersion_settles_with_sample_count() {
        // ARRANGE
        let data = noisy_flat();
        let sd_at = |samples: usize| {
            let options = FitOptionsBuilder::default()
                .sample_size(samples)
                .seed(11)
                .build()
                .unwrap();
            Fitter::new(options)
                .unwrap()
                .fit(&data, "NOEX", None)
                .unwrap()
                .errors[0]
        };

        // ACT
        let small = sd_at(50);
        let large = sd_at(1000);

        // ASSERT
        assert!(small > 0.0 && large > 0.0);
        assert!(large <= 1.5 * small, "sd {} at 1000 vs {} at 50", large, small);
    }

    #[test]
    fn test_decay_with_offset_recovers_rate() {
        // ARRANGE
        let delays = [0.0, 0.02, 0.05, 0.1, 0.15, 0.2, 0.3, 0.4, 0.6, 0.8, 1.0, 1.5];
        let equation = Equation::from_name(Experiment::Exp, "EXPABC").unwrap();
        let n = delays.len();
        let data = Dataset::from_arrays(
            Experiment::Exp,
            delays.iter().map(|t| vec![*t]).collect(),
            delays
                .iter()
                .map(|t| equation.evaluate(&[100.0, 3.0, 5.0], &[0, 1, 2], &[*t], 0.0))
                .collect(),
            vec![1.0; n],
            vec![0.0; n],
            vec![0; n],
            None,
        )
        .unwrap();
        let options = FitOptionsBuilder::default()
            .calc_error(false)
            .build()
            .unwrap();

        // ACT
        let result = Fitter::new(options).unwrap().fit(&data, "EXPABC", None).unwrap();

        // ASSERT
        assert_eq!(result.params.len(), 3);
        assert_relative_eq!(result.params[0], 100.0, max_relative = 0.01);
        assert_relative_eq!(result.params[1], 3.0, max_relative = 0.01);
        assert_relative_eq!(result.params[2], 5.0, epsilon = 0.5);
        assert!(!result.exchange_valid);
    }

    #[test]
    fn test_cest_reference_fit() {
        // ARRANGE
        let data = cest_reference();
        let options = FitOptionsBuilder::default()
            .weight_fit(false)
            .non_parametric_bootstrap(false)
            .sample_size(50)
            .build()
            .unwrap();
        let fitter = Fitter::new(options).unwrap();
        // Kex, Pb, deltaA0, deltaB0, R1, R2A, R2B with the shifts in ppm at 60.8 MHz
        let guesses = vec![180.795, 0.103, 5.757, -2.467, 2.383, 11.569, 88.052];

        // ACT
        let result = fitter.fit(&data, "TROTT_PALMER", Some(guesses)).unwrap();

        // ASSERT
        let kex = result.params[0];
        let kex_error = result.errors[0];
        assert_eq!(data.n_curves(), 3);
        assert_eq!(result.params.len(), 7);
        assert_relative_eq!(result.rms(), 0.0128, epsilon = 4e-4);
        assert!(kex_error > 0.0);
        assert!(
            (kex - 159.405).abs() < 4.0 * kex_error,
            "kex {} ± {}",
            kex,
            kex_error
        );
        assert_relative_eq!(result.params[2], 7.08, epsilon = 0.05);
        assert_relative_eq!(result.params[3], -3.26, epsilon = 0.05);
        assert_eq!(result.sim_pars["fit"].len(), 50);
    }

    #[test]
    fn test_cest_reference_fit_from_detected_peaks() {
        let data = cest_reference();
        let options = FitOptionsBuilder::default()
            .weight_fit(false)
            .calc_error(false)
            .build()
            .unwrap();

        let result = Fitter::new(options)
            .unwrap()
            .fit(&data, "TROTT_PALMER", None)
            .unwrap();

        assert_eq!(result.params.len(), 7);
        assert!(result.rms() < 0.03, "rms {}", result.rms());
    }
}
