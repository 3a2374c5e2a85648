//! End-to-end scenarios S1-S6.

use ndarray::{Array1, Array2};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use voxreml::design::{ContrastMatrix, DesignMatrix};
use voxreml::glt;
use voxreml::grid::Rcoll;
use voxreml::ljungbox;
use voxreml::objective::search;
use voxreml::pseudotime::PseudoTime;
use voxreml::reml_setup::ReMlSetup;
use voxreml::solver::solve;
use voxreml::SolverConfig;

fn intercept_design(n: usize) -> DesignMatrix {
    let mut x = Array2::<f64>::zeros((n, 1));
    x.column_mut(0).fill(1.0);
    DesignMatrix::new(x, None).unwrap()
}

/// S1. Degenerate OLS: constant y, fixed (0,0).
#[test]
fn s1_degenerate_ols() {
    let n = 10;
    let design = intercept_design(n);
    let tau = PseudoTime::from_raw((0..n as i64).collect());
    let cfg = SolverConfig::new().with_fixed_ab(0.0, 0.0).unwrap();
    let y = Array1::from(vec![2.0; n]);

    let mut grid = Rcoll::new(&cfg);
    let search_result = search(&mut grid, &design, &tau, &y, &cfg).unwrap();
    assert_eq!((search_result.a, search_result.b), (0.0, 0.0));

    let setup = ReMlSetup::build(&design, &tau, 0.0, 0.0, &cfg).unwrap();
    let solution = solve(&design, &setup, &y, &search_result.objective).unwrap();

    assert!((solution.beta[0] - 2.0).abs() < 1e-9);
    for i in 0..n {
        assert!((solution.fitted[i] - y[i]).abs() < 1e-9);
        assert!(solution.residual[i].abs() < 1e-9);
    }
    assert!(solution.sigma_hat.abs() < 1e-9);
    assert!(search_result.objective.ytpy.abs() < 1e-9);

    let lag = ljungbox::max_lag(design.m(), tau.shortest_run_len());
    let lb = ljungbox::evaluate(&solution.whitened_residual, &tau, lag);
    assert!(lb.statistic.abs() < 1e-9);
}

/// S2. Pure AR(1) recovery from a fixed-seed synthetic series.
#[test]
fn s2_pure_ar1_recovery() {
    let n = 64;
    let mut x = Array2::<f64>::zeros((n, 2));
    x.column_mut(0).fill(1.0);
    for i in 0..n {
        x[[i, 1]] = (i as f64 - 31.5) / 32.0;
    }
    let design = DesignMatrix::new(x, None).unwrap();
    let tau = PseudoTime::from_raw((0..n as i64).collect());

    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let innov: Array1<f64> = Array1::random_using(n, StandardNormal, &mut rng);
    let phi = 0.7;
    let mut y = Array1::<f64>::zeros(n);
    y[0] = innov[0];
    for t in 1..n {
        y[t] = phi * y[t - 1] + innov[t];
    }

    let cfg = SolverConfig::new()
        .with_a_range(0.0, 0.8)
        .unwrap()
        .with_b_range(-0.8, 0.8)
        .unwrap();
    let mut grid = Rcoll::new(&cfg);
    let search_result = search(&mut grid, &design, &tau, &y, &cfg).unwrap();

    assert!(
        (search_result.a - phi).abs() <= 0.2,
        "a* = {} too far from {phi}",
        search_result.a
    );
    assert!(
        search_result.b.abs() <= 0.2,
        "b* = {} expected near 0",
        search_result.b
    );
}

/// S3. Censoring bumps the pseudo-time lag, which changes R[3,4] relative
/// to the uncensored case.
#[test]
fn s3_censoring_changes_correlation_lag() {
    use voxreml::corr::build_correlation;

    let mut g: Vec<usize> = vec![0, 1, 2, 3, 5, 6, 7, 8];
    g.extend(10..20);
    let tau_censored = PseudoTime::build(&g, 20, &[0]).unwrap();
    assert_eq!(tau_censored.lag(3, 4), 2);

    let tau_uncensored = PseudoTime::from_raw((0..g.len() as i64).collect());
    assert_eq!(tau_uncensored.lag(3, 4), 1);

    let cfg = SolverConfig::new().with_corr_cutoff(1e-6).unwrap();
    let r_censored = build_correlation(0.5, 0.1, &tau_censored, &cfg).unwrap();
    let r_uncensored = build_correlation(0.5, 0.1, &tau_uncensored, &cfg).unwrap();

    assert_ne!(r_censored.get(3, 4), r_uncensored.get(3, 4));
}

/// S3b. The driver's censoring pipeline: a voxel's extracted n_full-length
/// series is reduced to the retained rows before solving, and fitted
/// output is expanded back to n_full with the original data preserved at
/// censored positions.
#[test]
fn s3b_driver_censoring_pipeline_round_trips() {
    use voxreml::driver::{SliceBuilderFn, VoxelDriver};
    use voxreml::output::MemorySink;
    use std::sync::Mutex;

    let n_full = 20;
    let mut g: Vec<usize> = vec![0, 1, 2, 3, 5, 6, 7, 8];
    g.extend(10..20);

    let y_full_values: Vec<f64> = (0..n_full).map(|i| 1.0 + 0.1 * i as f64).collect();
    let cfg = SolverConfig::new().with_fixed_ab(0.0, 0.0).unwrap();
    let extract = {
        let values = y_full_values.clone();
        move |_v: usize| Array1::from(values.clone())
    };
    let slice_of = |_v: usize| 0usize;
    let g_for_builder = g.clone();
    let builders: Vec<Box<SliceBuilderFn>> = vec![Box::new(move || {
        let mut x = Array2::<f64>::zeros((g_for_builder.len(), 1));
        x.column_mut(0).fill(1.0);
        let design = DesignMatrix::new(x, None).unwrap();
        let tau = PseudoTime::build(&g_for_builder, n_full, &[0]).unwrap();
        Ok((design, tau, g_for_builder.clone(), n_full))
    })];

    let driver = VoxelDriver::new(cfg, vec![], &extract, &slice_of, None, builders);
    let sink = Mutex::new(MemorySink::new());
    driver.run(&[0], &sink).unwrap();

    let sink = sink.into_inner().unwrap();
    let fitted = &sink.series("fitted").unwrap()[0].1;
    let residual = &sink.series("residual").unwrap()[0].1;
    assert_eq!(fitted.len(), n_full);
    // Rows 4 and 9 were censored: fitted keeps the original extracted
    // value there, residual is exactly zero.
    for &censored in &[4usize, 9usize] {
        assert_eq!(fitted[censored], y_full_values[censored]);
        assert_eq!(residual[censored], 0.0);
    }
    // A retained row satisfies fitted + residual = y, same as any GLS fit.
    assert!((fitted[0] + residual[0] - y_full_values[0]).abs() < 1e-9);
}

/// S4. Rank-deficient design with de-singularize permission: one column is
/// masked, and a GLT referencing only that column loses one DOF.
#[test]
fn s4_rank_deficient_with_permission() {
    let n = 10;
    let mut x = Array2::<f64>::zeros((n, 3));
    x.column_mut(0).fill(1.0);
    for i in 0..n {
        x[[i, 1]] = i as f64;
        x[[i, 2]] = i as f64; // duplicate of column 1
    }
    let design = DesignMatrix::new(x, None).unwrap();
    let tau = PseudoTime::from_raw((0..n as i64).collect());
    let cfg = SolverConfig::new()
        .with_de_singularize(true)
        .with_fixed_ab(0.0, 0.0)
        .unwrap();
    let y = Array1::from((0..n).map(|i| 1.0 + i as f64).collect::<Vec<_>>());

    let mut grid = Rcoll::new(&cfg);
    let search_result = search(&mut grid, &design, &tau, &y, &cfg).unwrap();
    let setup = ReMlSetup::build(&design, &tau, 0.0, 0.0, &cfg).unwrap();
    assert_eq!(setup.unidentifiable.len(), 1);
    assert_eq!(setup.m_eff(), 2);

    let solution = solve(&design, &setup, &y, &search_result.objective).unwrap();

    // A two-row contrast: row 0 tests the identified slope column alone,
    // row 1 tests the masked duplicate column alone.
    let g = Array2::from_shape_vec((2, 3), vec![0.0, 1.0, 0.0, 0.0, 0.0, 1.0]).unwrap();
    let contrast = ContrastMatrix::new(g, "slope-then-masked-only", 3).unwrap();
    let result = glt::evaluate(&contrast, &setup, &solution).unwrap();

    // Row 0 survives (references the identified column); row 1 references
    // only the masked column and is dropped: nominal rank 2 drops to 1.
    assert_eq!(result.rows_tested, 1);
    assert_eq!(result.dof_num, 1);
}

/// S5. GLT against a known sinusoidal signal: large t-statistic, high R^2,
/// and beta close to the true amplitude.
#[test]
fn s5_glt_sinusoidal_signal() {
    let n = 40;
    let mut x = Array2::<f64>::zeros((n, 4));
    for i in 0..n {
        let t = i as f64;
        x[[i, 0]] = 1.0;
        x[[i, 1]] = (t - 19.5) / 20.0;
        x[[i, 2]] = (2.0 * std::f64::consts::PI * t / n as f64).sin();
        x[[i, 3]] = (2.0 * std::f64::consts::PI * t / n as f64).cos();
    }
    let design = DesignMatrix::new(x.clone(), None).unwrap();
    let tau = PseudoTime::from_raw((0..n as i64).collect());
    let cfg = SolverConfig::new().with_fixed_ab(0.0, 0.0).unwrap();

    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let noise: Array1<f64> = Array1::random_using(n, StandardNormal, &mut rng) * 0.05;
    let sin_col = x.column(2).to_owned();
    let y = &sin_col * 1.5 + &noise;

    let mut grid = Rcoll::new(&cfg);
    let search_result = search(&mut grid, &design, &tau, &y, &cfg).unwrap();
    let setup = ReMlSetup::build(&design, &tau, 0.0, 0.0, &cfg).unwrap();
    let solution = solve(&design, &setup, &y, &search_result.objective).unwrap();

    assert!((solution.beta[2] - 1.5).abs() < 0.1);

    let g = Array2::from_shape_vec((1, 4), vec![0.0, 0.0, 1.0, 0.0]).unwrap();
    let contrast = ContrastMatrix::new(g, "sin", 4).unwrap();
    let result = glt::evaluate(&contrast, &setup, &solution).unwrap();

    assert!(result.t_stat.unwrap() > 5.0);
    assert!(result.r_squared > 0.8 && result.r_squared <= 1.0);
}

/// S6. Ljung-Box on i.i.d. Gaussian noise: statistic is finite, non-negative,
/// and its p-value is a valid probability.
#[test]
fn s6_ljung_box_on_white_noise() {
    let n = 200;
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let e: Array1<f64> = Array1::random_using(n, StandardNormal, &mut rng);
    let tau = PseudoTime::from_raw((0..n as i64).collect());
    let lag = ljungbox::max_lag(1, tau.shortest_run_len());

    let result = ljungbox::evaluate(&e, &tau, lag);
    assert!(result.statistic.is_finite());
    assert!(result.statistic >= 0.0);
    assert!(result.p_value >= 0.0 && result.p_value <= 1.0);
    assert_eq!(result.lags, lag);
}
