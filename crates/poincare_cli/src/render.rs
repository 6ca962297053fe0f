use anyhow::{anyhow, Result};
use plotters::prelude::*;
use poincare_core::section::SectionCloud;
use poincare_core::system::Couplings;
use std::f64::consts::TAU;
use std::path::Path;

const WIDTH: u32 = 1000;
const HEIGHT: u32 = 800;
const COLORBAR_WIDTH: u32 = 100;
const COLORBAR_SEGMENTS: i32 = 128;
const PSI_RANGE: (f64, f64) = (0.2, 1.0);

/// Scatter plot of the section cloud colored by density, with fixed axis
/// ranges θ ∈ [0, 2π], ψ ∈ [0.2, 1] and a colorbar. A missing density
/// field falls back to uniform coloring.
pub fn scatter(
    path: &Path,
    cloud: &SectionCloud,
    density: Option<&[f64]>,
    couplings: Couplings,
) -> Result<()> {
    let root = BitMapBackend::new(path, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&WHITE)
        .map_err(|e| anyhow!("failed to clear drawing area: {e}"))?;
    let (plot_area, bar_area) = root.split_horizontally(WIDTH - COLORBAR_WIDTH);

    let (scaled, range) = normalize(density, cloud.len());

    let mut chart = ChartBuilder::on(&plot_area)
        .caption(
            format!(
                "Poincare surface of section, V1 = {}, V2 = {}",
                couplings.v, couplings.vb
            ),
            ("sans-serif", 28),
        )
        .margin(12)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..TAU, PSI_RANGE.0..PSI_RANGE.1)
        .map_err(|e| anyhow!("failed to build chart: {e}"))?;

    chart
        .configure_mesh()
        .x_desc("θ (rad)")
        .y_desc("ψ")
        .light_line_style(RGBColor(225, 225, 225))
        .draw()
        .map_err(|e| anyhow!("failed to draw axes: {e}"))?;

    chart
        .draw_series(
            cloud
                .theta
                .iter()
                .zip(&cloud.psi)
                .zip(&scaled)
                .map(|((&theta, &psi), &t)| {
                    Circle::new((theta, psi), 1, palette(t).filled())
                }),
        )
        .map_err(|e| anyhow!("failed to draw points: {e}"))?;

    draw_colorbar(&bar_area, range)?;

    root.present()
        .map_err(|e| anyhow!("failed to write image: {e}"))?;
    Ok(())
}

/// Maps densities onto [0, 1]; a missing or flat field becomes uniform
/// mid-scale. Returns the raw (min, max) for the colorbar labels.
fn normalize(density: Option<&[f64]>, len: usize) -> (Vec<f64>, Option<(f64, f64)>) {
    let Some(values) = density else {
        return (vec![0.5; len], None);
    };
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(max > min) {
        return (vec![0.5; len], None);
    }
    let span = max - min;
    let scaled = values.iter().map(|&d| (d - min) / span).collect();
    (scaled, Some((min, max)))
}

/// Hue sweep from violet (low) to red (high), full saturation.
fn palette(t: f64) -> HSLColor {
    HSLColor(0.83 * (1.0 - t.clamp(0.0, 1.0)), 1.0, 0.5)
}

fn draw_colorbar(
    area: &DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>,
    range: Option<(f64, f64)>,
) -> Result<()> {
    let (_, height) = area.dim_in_pixel();
    let top = 80i32;
    let bottom = height as i32 - 80;
    let left = 18i32;
    let right = 42i32;

    area.draw(&Text::new(
        "Density",
        (left - 8, top - 30),
        ("sans-serif", 18),
    ))
    .map_err(|e| anyhow!("failed to label colorbar: {e}"))?;

    for seg in 0..COLORBAR_SEGMENTS {
        let t0 = seg as f64 / COLORBAR_SEGMENTS as f64;
        let t1 = (seg + 1) as f64 / COLORBAR_SEGMENTS as f64;
        // Highest density at the top of the bar.
        let y0 = bottom - ((t1 * (bottom - top) as f64) as i32);
        let y1 = bottom - ((t0 * (bottom - top) as f64) as i32);
        area.draw(&Rectangle::new(
            [(left, y0), (right, y1)],
            palette(t0).filled(),
        ))
        .map_err(|e| anyhow!("failed to draw colorbar: {e}"))?;
    }
    area.draw(&Rectangle::new([(left, top), (right, bottom)], BLACK))
        .map_err(|e| anyhow!("failed to frame colorbar: {e}"))?;

    if let Some((min, max)) = range {
        area.draw(&Text::new(
            format!("{max:.2e}"),
            (left - 8, top - 14),
            ("sans-serif", 13),
        ))
        .map_err(|e| anyhow!("failed to label colorbar: {e}"))?;
        area.draw(&Text::new(
            format!("{min:.2e}"),
            (left - 8, bottom + 6),
            ("sans-serif", 13),
        ))
        .map_err(|e| anyhow!("failed to label colorbar: {e}"))?;
    }
    Ok(())
}
