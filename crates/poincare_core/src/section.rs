use crate::solver::{integrate_sampled, SolveSettings};
use crate::system::{State, PSI, THETA};
use crate::traits::VectorField;
use anyhow::{bail, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// End of the default integration span in z.
pub const DEFAULT_SPAN: f64 = 80_000.0;

/// Span and tolerances for building one section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SectionSettings {
    /// Trajectories run over [0, z_end), sampled at every multiple of 2π.
    pub z_end: f64,
    pub solve: SolveSettings,
}

impl Default for SectionSettings {
    fn default() -> Self {
        Self {
            z_end: DEFAULT_SPAN,
            solve: SolveSettings::default(),
        }
    }
}

/// The stroboscopic sampling grid: every multiple of 2π in [0, z_end).
pub fn stroboscopic_grid(z_end: f64) -> Vec<f64> {
    let count = (z_end / TAU).ceil() as usize;
    (0..count).map(|k| k as f64 * TAU).collect()
}

/// All section points for one configuration: two parallel sequences in
/// initial-condition order, within-trajectory order preserved, θ wrapped
/// into [0, 2π).
#[derive(Debug, Clone, Default)]
pub struct SectionCloud {
    pub theta: Vec<f64>,
    pub psi: Vec<f64>,
}

impl SectionCloud {
    pub fn len(&self) -> usize {
        self.theta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.theta.is_empty()
    }
}

fn wrap_angle(theta: f64) -> f64 {
    let wrapped = theta.rem_euclid(TAU);
    // rem_euclid can round up to the modulus itself for tiny negatives.
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

/// Integrates every initial condition through `field` over the
/// stroboscopic grid and concatenates the samples into a `SectionCloud`.
///
/// Trajectories are computed in parallel and merged in input order. A
/// trajectory whose integration collapses is logged and dropped; the
/// build only errors when no trajectory survives (or the inputs are
/// invalid).
pub fn build_section<F>(
    field: &F,
    initial: &[State],
    settings: &SectionSettings,
) -> Result<SectionCloud>
where
    F: VectorField<f64> + Sync,
{
    if initial.is_empty() {
        bail!("At least one initial condition is required.");
    }
    if settings.z_end <= 0.0 {
        bail!("Span end must be positive.");
    }

    let grid = stroboscopic_grid(settings.z_end);
    let solutions: Vec<_> = initial
        .par_iter()
        .map(|state| integrate_sampled(field, &state.to_array(), 0.0, &grid, &settings.solve))
        .collect::<Result<_>>()?;

    let mut cloud = SectionCloud {
        theta: Vec::with_capacity(initial.len() * grid.len()),
        psi: Vec::with_capacity(initial.len() * grid.len()),
    };
    let mut dropped = 0usize;
    for (state, solution) in initial.iter().zip(&solutions) {
        if let Some(failure) = solution.failure {
            log::warn!(
                "dropping trajectory from ψ = {:.4}, θ = {:.4}: {} ({} of {} samples obtained)",
                state.psi,
                state.theta,
                failure.error,
                solution.samples(),
                grid.len()
            );
            dropped += 1;
            continue;
        }
        cloud.psi.extend(solution.component(PSI));
        cloud.theta.extend(solution.component(THETA).map(wrap_angle));
    }

    if dropped == initial.len() {
        bail!("All {} trajectories failed to integrate.", dropped);
    }
    Ok(cloud)
}

#[cfg(test)]
mod tests {
    use super::{build_section, stroboscopic_grid, wrap_angle, SectionSettings};
    use crate::system::{Couplings, State, TwoWaveSystem};
    use crate::traits::VectorField;
    use std::f64::consts::TAU;

    fn short_settings(z_end: f64) -> SectionSettings {
        SectionSettings {
            z_end,
            ..SectionSettings::default()
        }
    }

    #[test]
    fn grid_covers_the_default_span() {
        let grid = stroboscopic_grid(super::DEFAULT_SPAN);
        assert_eq!(grid.len(), (super::DEFAULT_SPAN / TAU) as usize + 1);
        assert_eq!(grid.len(), 12_733);
        assert_eq!(grid[0], 0.0);
        assert!((grid[1] - TAU).abs() < 1e-12);
        assert!(*grid.last().unwrap() < super::DEFAULT_SPAN);
    }

    #[test]
    fn grid_excludes_an_exact_endpoint() {
        let grid = stroboscopic_grid(2.0 * TAU);
        assert_eq!(grid.len(), 2);
    }

    #[test]
    fn wrap_angle_lands_in_the_half_open_interval() {
        for &theta in &[0.0, 1.0, TAU, TAU + 0.5, 100.0 * TAU + 3.0, -0.5, -1e-18] {
            let wrapped = wrap_angle(theta);
            assert!((0.0..TAU).contains(&wrapped), "wrap({theta}) = {wrapped}");
        }
    }

    #[test]
    fn uncoupled_section_keeps_the_action_constant() {
        let field = TwoWaveSystem::new(Couplings::new(0.0, 0.0));
        let initial = [State::new(0.2, 0.0), State::new(0.7, 0.0)];
        let settings = short_settings(200.0 * TAU);
        let cloud = build_section(&field, &initial, &settings).expect("section should build");

        let per_trajectory = stroboscopic_grid(settings.z_end).len();
        assert_eq!(cloud.len(), 2 * per_trajectory);
        for &psi in &cloud.psi[..per_trajectory] {
            assert!((psi - 0.2).abs() < 1e-12);
        }
        for &psi in &cloud.psi[per_trajectory..] {
            assert!((psi - 0.7).abs() < 1e-12);
        }
        for &theta in &cloud.theta {
            assert!((0.0..TAU).contains(&theta));
        }
    }

    #[test]
    fn concatenation_preserves_initial_condition_order() {
        // Distinct constant actions tag each trajectory's block.
        let field = TwoWaveSystem::new(Couplings::new(0.0, 0.0));
        let initial: Vec<_> = (0..5).map(|i| State::new(0.2 + 0.1 * i as f64, 0.0)).collect();
        let settings = short_settings(20.0 * TAU);
        let cloud = build_section(&field, &initial, &settings).expect("section should build");

        let per_trajectory = stroboscopic_grid(settings.z_end).len();
        for (i, state) in initial.iter().enumerate() {
            let block = &cloud.psi[i * per_trajectory..(i + 1) * per_trajectory];
            for &psi in block {
                assert!((psi - state.psi).abs() < 1e-12);
            }
        }
    }

    /// Diverges once the action passes 1: the failing trajectory must be
    /// dropped while the others survive.
    struct PartialBlowup;

    impl VectorField<f64> for PartialBlowup {
        fn dimension(&self) -> usize {
            2
        }

        fn eval(&self, _z: f64, y: &[f64], dydz: &mut [f64]) {
            dydz[0] = if y[0] > 1.0 { y[0] * y[0] } else { 0.0 };
            dydz[1] = 1.0;
        }
    }

    #[test]
    fn failed_trajectories_are_dropped_not_fatal() {
        let initial = [State::new(0.5, 0.0), State::new(1.5, 0.0)];
        let settings = short_settings(50.0 * TAU);
        let cloud =
            build_section(&PartialBlowup, &initial, &settings).expect("one trajectory survives");
        let per_trajectory = stroboscopic_grid(settings.z_end).len();
        assert_eq!(cloud.len(), per_trajectory);
        assert!(cloud.psi.iter().all(|&psi| (psi - 0.5).abs() < 1e-12));
    }

    #[test]
    fn empty_initial_conditions_are_rejected() {
        let field = TwoWaveSystem::new(Couplings::new(0.0, 0.0));
        let result = build_section(&field, &[], &SectionSettings::default());
        let message = format!("{}", result.expect_err("expected error"));
        assert!(message.contains("initial condition"));
    }
}
