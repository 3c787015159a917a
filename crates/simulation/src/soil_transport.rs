//! Vertical one-dimensional convection-dispersion of nitrate.
//!
//! Atmospheric deposition enters the top layer, the crop's per-layer uptake
//! acts as a sink, and nitrate is advected between layers with the water
//! fluxes the moisture module produced. The explicit scheme subdivides the
//! day into internal steps small enough to stay stable.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::climate::SimClock;
use crate::crop::ActiveCrop;
use crate::params::{EnvironmentParameters, SiteParameters, SoilTransportParams};
use crate::soil_column::SoilColumn;
use crate::{config, DailyStep};

/// Upper bound on internal substeps per day; beyond this the scheme accepts
/// the residual error instead of spinning.
const MAX_SUBSTEPS: usize = 240;

#[derive(Resource, Debug, Clone, Default, Serialize, Deserialize)]
pub struct SoilTransportState {
    /// N leached through the leaching-depth layer today [kg N ha-1].
    pub leaching_at_boundary: f64,
    /// Cumulative leaching [kg N ha-1].
    pub sum_leaching: f64,
    /// Deposition added today [kg N ha-1].
    pub n_deposition_today: f64,
    /// Mass clamped away by the non-negativity guard, cumulative
    /// [kg N ha-1].
    pub mass_balance_error: f64,
    /// Internal substeps used on the last day.
    pub substeps_last_day: usize,
}

impl SoilTransportState {
    /// Daily share of the annual atmospheric N deposition into the top
    /// layer's nitrate pool.
    fn deposition_step(&mut self, column: &mut SoilColumn, site: &SiteParameters) {
        let Some(top) = column.layers.first_mut() else {
            return;
        };
        let daily_kg_ha = site.n_deposition / 365.0;
        top.no3 += config::kg_ha_to_kg_m3(daily_kg_ha, top.thickness);
        self.n_deposition_today = daily_kg_ha;
    }

    /// Apply the crop's per-layer N uptake as a nitrate sink, leaving the
    /// configured minimum behind.
    fn uptake_step(
        &mut self,
        column: &mut SoilColumn,
        params: &SoilTransportParams,
        uptake_per_layer: &[f64],
    ) {
        let mut total = 0.0; // [kg N m-2]
        for (i, layer) in column.layers.iter_mut().enumerate() {
            let requested = uptake_per_layer.get(i).copied().unwrap_or(0.0);
            if requested <= 0.0 {
                continue;
            }
            let requested_kg_m3 = requested / layer.thickness;
            let available = (layer.no3 - params.minimum_available_n).max(0.0);
            let taken = requested_kg_m3.min(available);
            layer.no3 -= taken;
            total += taken * layer.thickness;
        }
        column.daily_crop_n_uptake = total;
    }

    /// Explicit convection-dispersion over the day with a CFL-safe internal
    /// timestep.
    fn transport_step(
        &mut self,
        column: &mut SoilColumn,
        params: &SoilTransportParams,
        leaching_layer: usize,
    ) {
        let n = column.number_of_layers();
        if n == 0 {
            return;
        }
        let dz = column.layer_thickness();

        // Face velocities from the water fluxes [m d-1], positive downward.
        // Face i sits at the upper boundary of layer i; face n is the lower
        // boundary of the column.
        let mut velocity = vec![0.0; n + 1];
        let mut dispersion = vec![0.0; n + 1];
        for i in 0..n {
            let layer = &column.layers[i];
            let moisture = layer.moisture.max(0.01);
            velocity[i] = layer.water_flux / 1000.0 / moisture;
            // Millington-Quirk tortuosity for the molecular part.
            let effective_diffusion = params.diffusion_coefficient_standard
                * moisture.powf(10.0 / 3.0)
                / layer.saturation().powi(2);
            dispersion[i] = params.dispersion_length * velocity[i].abs() + effective_diffusion;
        }
        velocity[n] = velocity[n - 1];
        dispersion[n] = dispersion[n - 1];

        // Stability bound of the explicit scheme.
        let mut rate_max: f64 = 0.0;
        for i in 0..=n {
            rate_max = rate_max.max(velocity[i].abs() / dz + 2.0 * dispersion[i] / (dz * dz));
        }
        let substeps = ((rate_max * 1.5).ceil() as usize).clamp(1, MAX_SUBSTEPS);
        let dt = 1.0 / substeps as f64;
        self.substeps_last_day = substeps;

        self.leaching_at_boundary = 0.0;
        let leaching_face = (leaching_layer + 1).min(n);

        let mut concentration = vec![0.0; n];
        for _ in 0..substeps {
            for (i, layer) in column.layers.iter().enumerate() {
                concentration[i] = layer.no3 / layer.moisture.max(0.01);
            }

            // Mass flux through every interior and the bottom face
            // [kg N m-2 d-1].
            let mut face_flux = vec![0.0; n + 1];
            for i in 1..=n {
                let upwind = if velocity[i] >= 0.0 {
                    concentration[i - 1]
                } else if i < n {
                    concentration[i]
                } else {
                    concentration[n - 1]
                };
                let convective = velocity[i] * upwind;
                let dispersive = if i < n {
                    -dispersion[i] * (concentration[i] - concentration[i - 1]) / dz
                } else {
                    0.0
                };
                face_flux[i] = convective + dispersive;
            }

            for i in 0..n {
                let delta = (face_flux[i] - face_flux[i + 1]) / dz * dt;
                let layer = &mut column.layers[i];
                layer.no3 += delta;
                if layer.no3 < 0.0 {
                    // Accept a small mass balance error rather than a
                    // negative pool.
                    self.mass_balance_error +=
                        -layer.no3 * layer.thickness * config::M2_PER_HA;
                    layer.no3 = 0.0;
                }
            }

            self.leaching_at_boundary +=
                face_flux[leaching_face].max(0.0) * dt * config::M2_PER_HA;
        }

        self.sum_leaching += self.leaching_at_boundary;
    }
}

pub fn update_soil_transport(
    clock: Res<SimClock>,
    site: Res<SiteParameters>,
    env: Res<EnvironmentParameters>,
    params: Res<SoilTransportParams>,
    crop: Res<ActiveCrop>,
    mut column: ResMut<SoilColumn>,
    mut state: ResMut<SoilTransportState>,
) {
    if !clock.active || column.number_of_layers() == 0 {
        return;
    }

    state.deposition_step(&mut column, &site);

    let uptake = crop
        .crop
        .as_ref()
        .map(|c| c.n_uptake_from_layer.clone())
        .unwrap_or_default();
    state.uptake_step(&mut column, &params, &uptake);

    let leaching_layer =
        ((env.leaching_depth / env.layer_thickness + 0.5).floor() as usize).saturating_sub(1);
    state.transport_step(&mut column, &params, leaching_layer);
}

pub struct SoilTransportPlugin;

impl Plugin for SoilTransportPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<SoilTransportState>()
            .add_systems(
                FixedUpdate,
                update_soil_transport.in_set(DailyStep::Transport),
            );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SoilParameters;

    fn column() -> SoilColumn {
        SoilColumn::from_profile(
            &vec![SoilParameters::default(); 20],
            &EnvironmentParameters::default(),
        )
    }

    fn total_no3_kg_ha(column: &SoilColumn) -> f64 {
        column
            .layers
            .iter()
            .map(|l| l.no3 * l.thickness * config::M2_PER_HA)
            .sum()
    }

    #[test]
    fn test_deposition_reaches_top_layer() {
        let mut col = column();
        let mut state = SoilTransportState::default();
        let site = SiteParameters::default();
        let before = col.layers[0].no3;

        state.deposition_step(&mut col, &site);

        let expected = config::kg_ha_to_kg_m3(site.n_deposition / 365.0, 0.1);
        assert!((col.layers[0].no3 - before - expected).abs() < 1e-12);
        assert!((state.n_deposition_today - site.n_deposition / 365.0).abs() < 1e-12);
    }

    #[test]
    fn test_uptake_sink_respects_minimum() {
        let mut col = column();
        let mut state = SoilTransportState::default();
        let params = SoilTransportParams::default();
        col.layers[0].no3 = 0.02;

        // Demand twice what the layer can give.
        let mut uptake = vec![0.0; 20];
        uptake[0] = 0.02 * 0.1 * 2.0;
        state.uptake_step(&mut col, &params, &uptake);

        assert!((col.layers[0].no3 - params.minimum_available_n).abs() < 1e-12);
        assert!(col.daily_crop_n_uptake > 0.0);
    }

    #[test]
    fn test_uptake_totals_match_removed_mass() {
        let mut col = column();
        let mut state = SoilTransportState::default();
        let params = SoilTransportParams::default();
        for layer in col.layers.iter_mut().take(5) {
            layer.no3 = 0.05;
        }
        let before = total_no3_kg_ha(&col);

        let uptake = vec![1e-4; 5];
        state.uptake_step(&mut col, &params, &uptake);

        let removed = before - total_no3_kg_ha(&col);
        assert!((removed - col.daily_crop_n_uptake * config::M2_PER_HA).abs() < 1e-9);
    }

    #[test]
    fn test_transport_conserves_mass_without_flux() {
        let mut col = column();
        let mut state = SoilTransportState::default();
        let params = SoilTransportParams::default();
        for layer in &mut col.layers {
            layer.no3 = 0.03;
            layer.water_flux = 0.0;
        }
        let before = total_no3_kg_ha(&col);

        state.transport_step(&mut col, &params, 15);

        let after = total_no3_kg_ha(&col);
        // Pure diffusion between equal concentrations: nothing moves.
        assert!((before - after).abs() < 1e-6);
        assert!(state.leaching_at_boundary.abs() < 1e-9);
    }

    #[test]
    fn test_downward_flux_leaches_nitrate() {
        let mut col = column();
        let mut state = SoilTransportState::default();
        let params = SoilTransportParams::default();
        for layer in &mut col.layers {
            layer.no3 = 0.03;
            layer.water_flux = 8.0;
        }
        let before = total_no3_kg_ha(&col);

        state.transport_step(&mut col, &params, 15);

        assert!(state.leaching_at_boundary > 0.0);
        // Column lost mass through the bottom.
        assert!(total_no3_kg_ha(&col) < before);
        for layer in &col.layers {
            assert!(layer.no3 >= 0.0);
        }
    }

    #[test]
    fn test_concentration_gradient_disperses_downward() {
        let mut col = column();
        let mut state = SoilTransportState::default();
        let params = SoilTransportParams::default();
        col.layers[0].no3 = 0.1;
        for layer in &mut col.layers {
            layer.water_flux = 0.0;
        }

        state.transport_step(&mut col, &params, 15);

        assert!(col.layers[0].no3 < 0.1);
        assert!(col.layers[1].no3 > 1e-4);
    }

    #[test]
    fn test_extreme_flux_stays_stable() {
        let mut col = column();
        let mut state = SoilTransportState::default();
        let params = SoilTransportParams::default();
        for layer in &mut col.layers {
            layer.no3 = 0.05;
            layer.water_flux = 120.0;
        }

        state.transport_step(&mut col, &params, 15);

        assert!(state.substeps_last_day > 1);
        for layer in &col.layers {
            assert!(layer.no3.is_finite());
            assert!(layer.no3 >= 0.0);
        }
    }
}
