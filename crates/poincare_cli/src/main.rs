mod render;

use anyhow::{Context, Result};
use log::{error, info, warn};
use poincare_core::density::GaussianKde;
use poincare_core::section::{build_section, SectionSettings};
use poincare_core::system::{Couplings, State, TwoWaveSystem};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

// The fixed sweep: one section plot per (V, Vb) pair.
const V_VALUES: [f64; 10] = [0.0, 1e-4, 1e-3, 1e-2, 1e-4, 1e-3, 1e-2, 0.0, 1e-2, 1e-3];
const VB_VALUES: [f64; 10] = [0.0, 1e-4, 1e-3, 1e-2, 1e-3, 1e-2, 1e-4, 1e-4, 0.0, 0.0];

/// 21 launch points: ψ from 0.2 to 1.2 in steps of 0.05, all at θ = 0.
fn initial_conditions() -> Vec<State> {
    (0..21)
        .map(|i| State::new(0.2 + 0.05 * i as f64, 0.0))
        .collect()
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let out_dir = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let initial = initial_conditions();
    let settings = SectionSettings::default();

    let mut written = 0usize;
    for (index, (&v, &vb)) in V_VALUES.iter().zip(VB_VALUES.iter()).enumerate() {
        let couplings = Couplings::new(v, vb);
        match run_configuration(index, couplings, &initial, &settings, &out_dir) {
            Ok(path) => {
                info!("configuration {}: wrote {}", index + 1, path.display());
                written += 1;
            }
            Err(err) => {
                // One bad configuration must not sink the sweep.
                error!(
                    "configuration {} (V = {v}, Vb = {vb}) skipped: {err:#}",
                    index + 1
                );
            }
        }
    }

    if written == 0 {
        error!("no section plots were produced");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run_configuration(
    index: usize,
    couplings: Couplings,
    initial: &[State],
    settings: &SectionSettings,
    out_dir: &Path,
) -> Result<PathBuf> {
    info!(
        "configuration {}: V = {}, Vb = {}",
        index + 1,
        couplings.v,
        couplings.vb
    );
    let field = TwoWaveSystem::new(couplings);
    let cloud = build_section(&field, initial, settings)?;
    info!("configuration {}: {} section points", index + 1, cloud.len());

    let density = match GaussianKde::fit(&cloud.theta, &cloud.psi, None) {
        Ok(kde) => Some(kde.self_density()),
        Err(err) => {
            warn!(
                "configuration {}: density coloring disabled: {err}",
                index + 1
            );
            None
        }
    };

    let path = out_dir.join(format!("poincare_plot_{}.png", index + 1));
    render::scatter(&path, &cloud, density.as_deref(), couplings)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::{initial_conditions, VB_VALUES, V_VALUES};

    #[test]
    fn sweep_tables_are_parallel() {
        assert_eq!(V_VALUES.len(), VB_VALUES.len());
    }

    #[test]
    fn launch_grid_spans_the_action_range() {
        let initial = initial_conditions();
        assert_eq!(initial.len(), 21);
        assert_eq!(initial[0].psi, 0.2);
        assert!((initial[20].psi - 1.2).abs() < 1e-12);
        assert!(initial.iter().all(|state| state.theta == 0.0));
    }
}
