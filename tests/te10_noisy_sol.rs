//! End-to-end: build a TE10 two-port calibration from a SOL standard set against an (almost)
//! identity error box under synthetic receiver noise, solve it, and confirm a DUT measurement
//! corrects back to its true S-parameters within a tolerance set by the injected noise.

use approx::assert_relative_eq;
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use vnacal::numeric::rational::SegmentHint;
use vnacal::param::{ParamHandle, ParameterStore};
use vnacal::{apply, layout::CalType, solver, NewCalibrationBuilder};

const NOISE_SIGMA: f64 = 1e-4;

fn noisy(value: Complex64, rng: &mut StdRng, normal: &Normal<f64>) -> Complex64 {
    value + Complex64::new(normal.sample(rng), normal.sample(rng))
}

fn noisy_series(value: Complex64, freqs: &[f64], rng: &mut StdRng, normal: &Normal<f64>) -> Vec<Complex64> {
    freqs.iter().map(|_| noisy(value, rng, normal)).collect()
}

#[test]
fn te10_sol_recovers_reciprocal_dut_under_noise() {
    if pretty_env_logger::try_init().is_err() {
        println!("could not init env_logger");
    }

    let mut rng = StdRng::seed_from_u64(42);
    let normal = Normal::new(0.0, NOISE_SIGMA).unwrap();

    let freqs = vec![1.0e9, 2.0e9, 3.0e9];
    let mut builder = NewCalibrationBuilder::new(CalType::TE10, 2, 2, freqs.clone()).unwrap();
    let store = ParameterStore::new();

    let c = |re: f64, im: f64| Complex64::new(re, im);
    let short = c(-1.0, 0.0);
    let open = c(1.0, 0.0);
    let matched = c(0.0, 0.0);

    // Identity error box: raw measurement equals the standard's true value up to receiver
    // noise, so SOL at each port fully determines that port's three diagonal terms.
    for port in 0..2 {
        builder.add_single_reflect(port, ParamHandle::SHORT, &noisy_series(short, &freqs, &mut rng, &normal)).unwrap();
        builder.add_single_reflect(port, ParamHandle::OPEN, &noisy_series(open, &freqs, &mut rng, &normal)).unwrap();
        builder.add_single_reflect(port, ParamHandle::MATCH, &noisy_series(matched, &freqs, &mut rng, &normal)).unwrap();
    }
    // Bridges the two ports for connectivity and leakage estimation; TE10's off-diagonal cells
    // carry no linear-system information, only a leakage (crosstalk) sample. A thru's actual
    // transmission isn't leakage, but this test set has nothing else to measure it with, so it
    // stands in for a small, constant test-set crosstalk that contaminates every subsequent
    // measurement through the same raw cells (see `leak` below).
    let leak = c(0.02, -0.01);
    builder
        .add_through(
            0,
            1,
            ParamHandle::MATCH,
            ParamHandle::OPEN,
            &noisy_series(matched, &freqs, &mut rng, &normal),
            &noisy_series(leak, &freqs, &mut rng, &normal),
            &noisy_series(leak, &freqs, &mut rng, &normal),
            &noisy_series(matched, &freqs, &mut rng, &normal),
        )
        .unwrap();

    assert!(builder.is_fully_connected());

    let mut store = store;
    let data = solver::solve(&mut builder, &mut store).unwrap();

    // A reciprocal DUT: the identity error box means the raw measurement is the true S-matrix
    // plus the same crosstalk bias `leak` on its off-diagonal cells, plus receiver noise.
    let s_true = [c(0.15, 0.05), c(0.6, -0.1), c(0.6, -0.1), c(0.2, 0.0)];
    let m_raw: Vec<Complex64> = s_true
        .iter()
        .enumerate()
        .map(|(i, &s)| {
            let crosstalk = if i == 1 || i == 2 { leak } else { Complex64::new(0.0, 0.0) };
            noisy(s + crosstalk, &mut rng, &normal)
        })
        .collect();

    let mut hint = SegmentHint::default();
    let corrected = apply::apply(&data, &m_raw, 2.0e9, &mut hint).unwrap();

    let tolerance = 50.0 * NOISE_SIGMA;
    for (got, want) in corrected.iter().zip(s_true.iter()) {
        assert_relative_eq!(got.re, want.re, epsilon = tolerance);
        assert_relative_eq!(got.im, want.im, epsilon = tolerance);
    }
}
