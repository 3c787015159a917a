//! Daily implicit heat conduction through the soil column.
//!
//! The real layers are extended by a virtual ground node and a fixed bottom
//! node held at the annual mean air temperature. Each day the tridiagonal
//! system is rebuilt from the current moisture and bulk density and solved
//! with a symmetric LDL' factorisation.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::climate::{CurrentWeather, SimClock};
use crate::crop::ActiveCrop;
use crate::frost::FrostState;
use crate::params::SoilTemperatureParams;
use crate::snow::SnowState;
use crate::soil_column::SoilColumn;
use crate::DailyStep;

/// Floor of the global radiation forcing in the surface temperature
/// estimate; prevents the damping term from collapsing in deep winter.
const MIN_GLOBRAD: f64 = 8.33;

#[derive(Resource, Debug, Clone, Default, Serialize, Deserialize)]
pub struct SoilTemperatureState {
    initialized: bool,
    /// Node temperatures, real layers first, then ground and bottom [°C].
    node_temperature: Vec<f64>,
    /// Node thicknesses [m].
    node_thickness: Vec<f64>,
    /// Node volumes [m3] and inverse spacing terms [m-1].
    v: Vec<f64>,
    b: Vec<f64>,
    volume_matrix_old: Vec<f64>,
    /// Per-node heat conductivity [J m-1 d-1 K-1].
    pub heat_conductivity: Vec<f64>,
    /// Soil surface temperature [°C].
    pub surface_temperature: f64,
}

impl SoilTemperatureState {
    /// Number of virtual nodes (real layers + ground + bottom).
    fn node_count(&self) -> usize {
        self.node_temperature.len()
    }

    pub fn temperature(&self, layer: usize) -> f64 {
        self.node_temperature.get(layer).copied().unwrap_or(0.0)
    }

    pub fn heat_conductivity(&self, layer: usize) -> f64 {
        self.heat_conductivity.get(layer).copied().unwrap_or(0.0)
    }

    fn initialize(&mut self, column: &SoilColumn, params: &SoilTemperatureParams) {
        let real = column.number_of_layers();
        let nodes = real + 2;
        let ground = nodes - 2;
        let bottom = nodes - 1;

        self.node_temperature = vec![0.0; nodes];
        self.node_thickness = vec![0.0; nodes];
        self.v = vec![0.0; nodes];
        self.b = vec![0.0; nodes];
        self.volume_matrix_old = vec![0.0; nodes];
        self.heat_conductivity = vec![0.0; nodes];

        // Linear initial profile between the surface and the base
        // temperature at depth.
        for i in 0..real {
            let f = i as f64 / real as f64;
            self.node_temperature[i] =
                (1.0 - f) * params.initial_surface_temperature + f * params.base_temperature;
            self.node_thickness[i] = column.layers[i].thickness;
        }
        self.node_thickness[ground] = 2.0 * self.node_thickness[ground - 1];
        self.node_thickness[bottom] = 1.0;
        self.node_temperature[ground] =
            (self.node_temperature[ground - 1] + params.base_temperature) * 0.5;
        self.node_temperature[bottom] = params.base_temperature;

        self.v[0] = self.node_thickness[0];
        self.b[0] = 2.0 / self.node_thickness[0];
        let mut h0 = self.node_thickness[0];
        for i in 1..nodes {
            let h1 = self.node_thickness[i];
            self.b[i] = 2.0 / (h1 + h0);
            self.v[i] = h1 * params.n_tau;
            h0 = h1;
        }

        self.surface_temperature = params.initial_surface_temperature;
        self.initialized = true;
    }

    /// Heat conductivity after Neusypina from bulk density and moisture,
    /// scaled to [J m-1 d-1 K-1].
    fn conductivity(bulk_density: f64, moisture: f64, time_step: f64) -> f64 {
        let bd = bulk_density / 1000.0;
        ((3.0 * bd - 1.7) * 0.001)
            / (1.0 + (11.5 - 5.0 * bd) * (-50.0 * (moisture / bd).powf(1.5)).exp())
            * 86_400.0
            * time_step
            * 100.0
            * 4.184
    }

    /// Volumetric heat capacity from the DAISY composition rule
    /// [J m-3 K-1].
    fn heat_capacity(
        params: &SoilTemperatureParams,
        saturation: f64,
        moisture: f64,
        organic_matter_volumetric: f64,
    ) -> f64 {
        let som = organic_matter_volumetric;
        moisture * params.density_water * params.specific_heat_capacity_water
            + (saturation - moisture) * params.density_air * params.specific_heat_capacity_air
            + som * params.density_humus * params.specific_heat_capacity_humus
            + (1.0 - saturation - som)
                * params.quartz_raw_density
                * params.specific_heat_capacity_quartz
    }

    /// Williams-style surface temperature with crop shading, freezing
    /// damping and snow override.
    fn surface_temperature_step(
        &mut self,
        params: &SoilTemperatureParams,
        tmin: f64,
        tmax: f64,
        globrad: f64,
        soil_coverage: f64,
        snow_depth: f64,
        temperature_under_snow: f64,
    ) -> f64 {
        let shading = 0.1
            + (soil_coverage * params.damping_factor
                + (1.0 - soil_coverage) * (1.0 - params.damping_factor));

        let globrad = globrad.max(MIN_GLOBRAD);
        let previous = self.surface_temperature;

        let mut surface = (1.0 - shading)
            * (tmin + (tmax - tmin) * (0.03 * globrad).sqrt())
            + shading * previous;

        // Heat loss to freezing water damps sub-zero surface temperatures.
        if surface < 0.0 {
            surface *= 0.5;
        }
        if snow_depth > 0.0 {
            surface = temperature_under_snow;
        }

        self.surface_temperature = surface;
        surface
    }

    /// Rebuild the system matrices from the current column state and run one
    /// day of conduction.
    fn conduct(
        &mut self,
        column: &mut SoilColumn,
        params: &SoilTemperatureParams,
        surface_temperature: f64,
    ) {
        let real = column.number_of_layers();
        let nodes = self.node_count();
        let ground = nodes - 2;
        let bottom = nodes - 1;

        let mut heat_capacity = vec![0.0; nodes];
        for i in 0..real {
            let layer = &column.layers[i];
            let bulk_density = layer.bulk_density();
            let moisture = if layer.moisture > 0.0 {
                layer.moisture
            } else {
                params.soil_moisture_const
            };
            self.heat_conductivity[i] =
                Self::conductivity(bulk_density, moisture, 1.0);
            // Organic matter mass fraction converted to a volume fraction.
            let som_volumetric = layer.soil_organic_matter() * bulk_density / params.density_humus;
            heat_capacity[i] =
                Self::heat_capacity(params, layer.saturation(), moisture, som_volumetric);
        }
        self.heat_conductivity[ground] = self.heat_conductivity[ground - 1];
        self.heat_conductivity[bottom] = self.heat_conductivity[ground];
        heat_capacity[ground] = heat_capacity[ground - 1];
        heat_capacity[bottom] = heat_capacity[ground];

        let mut conductivity_mean = vec![0.0; nodes];
        conductivity_mean[0] = self.heat_conductivity[0];
        for i in 1..nodes {
            let t0 = self.node_thickness[i - 1];
            let t1 = self.node_thickness[i];
            conductivity_mean[i] = (t0 * self.heat_conductivity[i - 1]
                + t1 * self.heat_conductivity[i])
                / (t0 + t1);
        }

        let mut volume_matrix = vec![0.0; nodes];
        let mut secondary = vec![0.0; nodes + 1];
        for i in 0..nodes {
            volume_matrix[i] = self.v[i] * heat_capacity[i];
            secondary[i] = -self.b[i] * conductivity_mean[i];
        }
        secondary[bottom + 1] = 0.0;

        if !self.volume_matrix_old.iter().any(|&v| v != 0.0) {
            self.volume_matrix_old.copy_from_slice(&volume_matrix);
        }

        let mut primary = vec![0.0; nodes];
        for i in 0..nodes {
            primary[i] = volume_matrix[i] - secondary[i] - secondary[i + 1];
        }

        // Right-hand side with the surface heat flow entering node 0.
        let heat_flow = surface_temperature * self.b[0] * conductivity_mean[0];
        let mut solution = vec![0.0; nodes];
        for i in 0..nodes {
            solution[i] = (self.volume_matrix_old[i]
                + (volume_matrix[i] - self.volume_matrix_old[i]) / self.node_thickness[i])
                * self.node_temperature[i];
        }
        solution[0] += heat_flow;

        // LDL' decomposition of the symmetric tridiagonal system.
        let mut diagonal = vec![0.0; nodes];
        let mut lower = vec![0.0; nodes];
        diagonal[0] = primary[0];
        for i in 1..nodes {
            lower[i] = secondary[i] / diagonal[i - 1];
            diagonal[i] = primary[i] - lower[i] * secondary[i];
        }
        for i in 1..nodes {
            solution[i] -= lower[i] * solution[i - 1];
        }
        solution[bottom] /= diagonal[bottom];
        for j in (0..bottom).rev() {
            solution[j] = solution[j] / diagonal[j] - lower[j + 1] * solution[j + 1];
        }

        self.node_temperature.copy_from_slice(&solution);
        self.volume_matrix_old.copy_from_slice(&volume_matrix);

        for i in 0..real {
            column.layers[i].temperature = self.node_temperature[i];
        }
        column.surface_temperature = self.surface_temperature;
    }

    /// Mean temperature of the topmost layers covering `depth` [m].
    pub fn avg_top_soil_temperature(&self, column: &SoilColumn, depth: f64) -> f64 {
        let mut sum = 0.0;
        let mut accumulated = 0.0;
        let mut count = 0usize;
        for layer in &column.layers {
            count += 1;
            sum += layer.temperature;
            accumulated += layer.thickness;
            if accumulated >= depth {
                break;
            }
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }
}

pub fn update_soil_temperature(
    clock: Res<SimClock>,
    weather: Res<CurrentWeather>,
    params: Res<SoilTemperatureParams>,
    crop: Res<ActiveCrop>,
    snow: Res<SnowState>,
    frost: Res<FrostState>,
    mut column: ResMut<SoilColumn>,
    mut state: ResMut<SoilTemperatureState>,
) {
    if !clock.active || column.number_of_layers() == 0 {
        return;
    }
    if !state.initialized {
        state.initialize(&column, &params);
    }

    let record = weather.rec();
    let soil_coverage = crop.crop.as_ref().map(|c| c.soil_coverage).unwrap_or(0.0);

    let surface = state.surface_temperature_step(
        &params,
        record.tmin,
        record.tmax,
        record.globrad,
        soil_coverage,
        snow.depth,
        frost.temperature_under_snow,
    );
    state.conduct(&mut column, &params, surface);
}

pub struct SoilTemperaturePlugin;

impl Plugin for SoilTemperaturePlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<SoilTemperatureState>()
            .add_systems(
                FixedUpdate,
                update_soil_temperature.in_set(DailyStep::Temperature),
            );
    }
}
