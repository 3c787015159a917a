//! Daily water budget of the column: snow, frost, infiltration, percolation,
//! evapotranspiration partitioning and capillary rise.
//!
//! The substeps run in a fixed order; each works on the moisture state the
//! previous one left behind. Layer scratch vectors carry one extra entry
//! mirroring the bottom layer so the percolation loops can hand water over
//! the lower boundary.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::climate::{CurrentWeather, SimClock};
use crate::crop::ActiveCrop;
use crate::diagnostics::DiagnosticsSink;
use crate::evapotranspiration::{reference_evapotranspiration, Et0Inputs};
use crate::frost::FrostState;
use crate::params::{CropModuleParams, EnvironmentParameters, SiteParameters, SoilMoistureParams};
use crate::snow::SnowState;
use crate::soil_column::SoilColumn;
use crate::{config, DailyStep};

/// Daily potential evapotranspiration ceiling [mm].
const MAX_POTENTIAL_ET: f64 = 6.5;

/// Kc of open water for evaporation from surface storage.
const OPEN_WATER_KC: f64 = 1.1;

/// Capillary rise is only computed while the water table is within this
/// distance of the root zone [m].
const MAX_CAPILLARY_RISE_DISTANCE: f64 = 2.70;

#[derive(Resource, Debug, Clone, Default, Serialize, Deserialize)]
pub struct SoilMoistureState {
    // Per-layer scratch, one extra entry mirroring the bottom layer.
    moisture: Vec<f64>,
    field_capacity: Vec<f64>,
    pore_volume: Vec<f64>,
    permanent_wilting_point: Vec<f64>,
    layer_thickness: Vec<f64>,
    lambda: Vec<f64>,
    percolation_rate: Vec<f64>,
    gravitational_water: Vec<f64>,
    water_flux: Vec<f64>,
    evaporation: Vec<f64>,
    transpiration: Vec<f64>,

    surface_water_storage: f64,

    /// Daily outputs.
    pub infiltration: f64,
    pub surface_runoff: f64,
    pub sum_surface_runoff: f64,
    pub groundwater_table: usize,
    pub groundwater_added: f64,
    pub capillary_rise: f64,
    pub reference_evapotranspiration: f64,
    pub actual_evaporation: f64,
    pub actual_transpiration: f64,
    pub actual_evapotranspiration: f64,
    pub evaporated_from_surface: f64,
    pub evaporated_from_intercept: f64,
    pub flux_at_lower_boundary: f64,
    pub kc_factor: f64,
    /// Residual of the surface water balance check [mm].
    pub water_balance_residual: f64,
}

impl SoilMoistureState {
    fn load(&mut self, column: &SoilColumn) {
        let n = column.number_of_layers();
        let extended = n + 1;
        self.moisture = vec![0.0; extended];
        self.field_capacity = vec![0.0; extended];
        self.pore_volume = vec![0.0; extended];
        self.permanent_wilting_point = vec![0.0; extended];
        self.layer_thickness = vec![0.01; extended];
        self.lambda = vec![0.0; extended];
        self.percolation_rate = vec![0.0; extended];
        self.gravitational_water = vec![0.0; extended];
        self.water_flux = vec![0.0; extended];
        self.evaporation = vec![0.0; extended];
        self.transpiration = vec![0.0; extended];

        for (i, layer) in column.layers.iter().enumerate() {
            self.moisture[i] = layer.moisture;
            self.field_capacity[i] = layer.field_capacity();
            self.pore_volume[i] = layer.saturation();
            self.permanent_wilting_point[i] = layer.permanent_wilting_point();
            self.layer_thickness[i] = layer.thickness;
            self.lambda[i] = layer.lambda();
        }
        // The extra entry mirrors the bottom layer.
        let last = n - 1;
        self.moisture[n] = self.moisture[last];
        self.field_capacity[n] = self.field_capacity[last];
        self.pore_volume[n] = self.pore_volume[last];
        self.permanent_wilting_point[n] = self.permanent_wilting_point[last];
        self.layer_thickness[n] = self.layer_thickness[last];
        self.lambda[n] = self.lambda[last];

        self.surface_water_storage = column.surface_water_storage;
    }

    fn store(&self, column: &mut SoilColumn) {
        for (i, layer) in column.layers.iter_mut().enumerate() {
            layer.moisture = self.moisture[i];
            layer.water_flux = self.water_flux[i];
        }
        column.surface_water_storage = self.surface_water_storage;
        column.flux_at_lower_boundary = self.flux_at_lower_boundary;
        column.groundwater_table = self.groundwater_table;
    }

    /// First saturated layer from the bottom up, clamped by the externally
    /// prescribed groundwater depth.
    fn detect_groundwater_table(&mut self, n: usize, groundwater_depth: f64) {
        let mut table = n + 2;
        let mut helper = n as isize - 1;
        for i in (0..n).rev() {
            if self.moisture[i] >= self.pore_volume[i] - 1e-12 && helper == i as isize {
                helper -= 1;
                table = i;
            }
        }

        let prescribed = (groundwater_depth / self.layer_thickness[0].max(1e-9)) as usize;
        if table > prescribed || table >= n + 2 {
            table = prescribed;
        }
        self.groundwater_table = table;
    }

    // -------------------------------------------------------------------------
    // Infiltration and surface runoff
    // -------------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn infiltration_step(
        &mut self,
        params: &SoilMoistureParams,
        site: &SiteParameters,
        frost: &FrostState,
        water_to_infiltrate: f64,
        soil_coverage: f64,
        groundwater_table: usize,
    ) {
        self.infiltration = 0.0;
        self.surface_runoff = 0.0;
        self.capillary_rise = 0.0;
        self.groundwater_added = 0.0;

        let surface_storage_old = self.surface_water_storage;
        self.surface_water_storage += water_to_infiltrate;

        let deficit = (self.pore_volume[0] - self.moisture[0]) / self.pore_volume[0];
        let reduced_conductivity =
            params.saturated_hydraulic_conductivity * frost.hydraulic_conductivity_redux;

        if reduced_conductivity > 0.0 {
            let potential = reduced_conductivity * 0.2 * deficit * deficit;
            let mut infiltration = self.surface_water_storage.min(potential);
            // Air-filled pore space of the top layer caps what can enter.
            infiltration = infiltration
                .min((self.pore_volume[0] - self.moisture[0]) * 1000.0 * self.layer_thickness[0]);
            self.infiltration = infiltration.max(0.0);
        }

        if self.infiltration > 0.0 {
            self.surface_water_storage -= self.infiltration;
        }

        // Ponding above the roughness-dependent threshold runs off, driven
        // by slope and slowed by roughness and vegetation cover.
        if self.surface_water_storage > 10.0 * params.surface_roughness / (site.slope + 0.001) {
            let runoff_factor = 0.02 + params.surface_roughness / 4.0 + soil_coverage / 15.0;
            if site.slope < 0.0 || site.slope > 1.0 {
                warn!("slope {} out of range, no runoff computed", site.slope);
            } else if site.slope == 0.0 {
                // flat ground holds its water
            } else if site.slope > runoff_factor {
                self.surface_runoff += self.surface_water_storage;
            } else {
                self.surface_runoff +=
                    (site.slope * runoff_factor) / (runoff_factor * runoff_factor)
                        * self.surface_water_storage;
            }
            self.surface_water_storage -= self.surface_runoff;
        }

        self.moisture[0] += self.infiltration / 1000.0 / self.layer_thickness[0];
        self.water_flux[0] = self.infiltration;

        if self.moisture[0] > self.field_capacity[0] {
            self.gravitational_water[0] =
                (self.moisture[0] - self.field_capacity[0]) * 1000.0 * self.layer_thickness[0];
            let lambda_reduced = self.lambda[0] * frost.lambda_redux(0);
            let percolation_factor = 1.0 + lambda_reduced * self.gravitational_water[0];
            self.percolation_rate[0] = (self.gravitational_water[0]
                * self.gravitational_water[0]
                * lambda_reduced)
                / percolation_factor;
            if self.percolation_rate[0] > params.max_percolation_rate {
                self.percolation_rate[0] = params.max_percolation_rate;
            }
            self.gravitational_water[0] =
                (self.gravitational_water[0] - self.percolation_rate[0]).max(0.0);
            self.moisture[0] = self.field_capacity[0]
                + self.gravitational_water[0] / 1000.0 / self.layer_thickness[0];

            // No percolation through a groundwater table at or just below
            // the surface.
            if groundwater_table <= 1 {
                self.percolation_rate[0] = 0.0;
            }
            if groundwater_table == 0 {
                self.percolation_rate[0] = 0.0;
                if self.moisture[0] > self.pore_volume[0] {
                    self.surface_runoff += (self.moisture[0] - self.pore_volume[0])
                        * 1000.0
                        * self.layer_thickness[0];
                    self.moisture[0] = self.pore_volume[0];
                }
            }
        } else {
            self.percolation_rate[0] = 0.0;
            self.gravitational_water[0] = 0.0;
        }

        self.water_balance_residual = (surface_storage_old + water_to_infiltrate)
            - (self.surface_runoff + self.infiltration + self.surface_water_storage);

        self.water_flux[1] = self.percolation_rate[0];
        self.sum_surface_runoff += self.surface_runoff;
    }

    // -------------------------------------------------------------------------
    // Percolation
    // -------------------------------------------------------------------------

    fn percolation_without_groundwater(
        &mut self,
        params: &SoilMoistureParams,
        frost: &FrostState,
        leaching_layer: usize,
    ) {
        let extended = self.moisture.len();
        for i in 0..extended - 1 {
            self.moisture[i + 1] += self.percolation_rate[i] / 1000.0 / self.layer_thickness[i];

            if self.moisture[i + 1] > self.field_capacity[i + 1] {
                self.gravitational_water[i + 1] = (self.moisture[i + 1]
                    - self.field_capacity[i + 1])
                    * 1000.0
                    * self.layer_thickness[0];
                let lambda_reduced = self.lambda[i + 1] * frost.lambda_redux(i + 1);
                let percolation_factor = 1.0 + lambda_reduced * self.gravitational_water[i + 1];
                self.percolation_rate[i + 1] = (self.gravitational_water[i + 1]
                    * self.gravitational_water[i + 1]
                    * lambda_reduced)
                    / percolation_factor;
                if self.percolation_rate[i + 1] > params.max_percolation_rate {
                    self.percolation_rate[i + 1] = params.max_percolation_rate;
                }
                self.gravitational_water[i + 1] =
                    (self.gravitational_water[i + 1] - self.percolation_rate[i + 1]).max(0.0);
                self.moisture[i + 1] = self.field_capacity[i + 1]
                    + self.gravitational_water[i + 1] / 1000.0 / self.layer_thickness[i + 1];
            } else {
                self.percolation_rate[i + 1] = 0.0;
                self.gravitational_water[i + 1] = 0.0;
            }

            self.water_flux[i + 1] = self.percolation_rate[i];
            self.groundwater_added = self.percolation_rate[i + 1];
        }

        self.flux_at_lower_boundary = if leaching_layer > 0 && leaching_layer < extended - 1 {
            self.water_flux[leaching_layer]
        } else {
            self.water_flux[extended - 2]
        };
    }

    /// Push water that exceeded pore volume back up through the profile.
    fn backwater_replenishment(&mut self) {
        let extended = self.moisture.len();
        let mut start = extended - 1;
        let mut backwater_table = extended - 1;
        for i in 0..extended - 1 {
            if self.moisture[i] > self.pore_volume[i] {
                start = i;
                backwater_table = i;
            }
        }
        if backwater_table == 0 {
            return;
        }

        let mut added = 0.0;
        for i in (0..=start).rev() {
            self.moisture[i] += added / 1000.0 / self.layer_thickness[i];
            if i > 0 {
                self.water_flux[i - 1] -= added;
            }
            if self.moisture[i] > self.pore_volume[i] {
                added = (self.moisture[i] - self.pore_volume[i]) * 1000.0 * self.layer_thickness[i];
                self.moisture[i] = self.pore_volume[i];
                backwater_table = backwater_table.saturating_sub(1);
                if i == 0 && backwater_table == 0 {
                    self.surface_water_storage += added;
                    added = 0.0;
                }
            } else {
                added = 0.0;
            }
        }
    }

    fn percolation_with_groundwater(
        &mut self,
        params: &SoilMoistureParams,
        frost: &FrostState,
        groundwater_depth: f64,
        leaching_layer: usize,
    ) {
        let extended = self.moisture.len();
        let table = self.groundwater_table as isize;
        self.groundwater_added = 0.0;

        // Water table at the surface: the whole profile sits in groundwater
        // and drains at the discharge rate.
        if table == 0 {
            self.percolation_rate[0] = params.groundwater_discharge;
        }

        for i in 0..extended - 1 {
            let idx = i as isize;

            if idx < table - 1 {
                // Well above the groundwater table: ordinary percolation.
                self.moisture[i + 1] += self.percolation_rate[i] / 1000.0 / self.layer_thickness[i];
                self.water_flux[i + 1] = self.percolation_rate[i];

                if self.moisture[i + 1] > self.field_capacity[i + 1] {
                    self.gravitational_water[i + 1] = (self.moisture[i + 1]
                        - self.field_capacity[i + 1])
                        * 1000.0
                        * self.layer_thickness[i + 1];
                    let lambda_reduced = self.lambda[i + 1] * frost.lambda_redux(i + 1);
                    let percolation_factor = 1.0 + lambda_reduced * self.gravitational_water[i + 1];
                    self.percolation_rate[i + 1] = (self.gravitational_water[i + 1]
                        * self.gravitational_water[i + 1]
                        * lambda_reduced)
                        / percolation_factor;
                    self.gravitational_water[i + 1] =
                        (self.gravitational_water[i + 1] - self.percolation_rate[i + 1]).max(0.0);
                    self.moisture[i + 1] = self.field_capacity[i + 1]
                        + self.gravitational_water[i + 1] / 1000.0 / self.layer_thickness[i + 1];

                    if self.moisture[i + 1] > self.pore_volume[i + 1] {
                        self.gravitational_water[i + 1] = (self.moisture[i + 1]
                            - self.pore_volume[i + 1])
                            * 1000.0
                            * self.layer_thickness[i + 1];
                        self.moisture[i + 1] = self.pore_volume[i + 1];
                        self.percolation_rate[i + 1] += self.gravitational_water[i + 1];
                    }
                } else {
                    self.percolation_rate[i + 1] = 0.0;
                    self.gravitational_water[i + 1] = 0.0;
                }
            }

            if idx == table - 1 {
                // Layer directly above the water table: percolation becomes
                // groundwater discharge.
                let prescribed_table =
                    (groundwater_depth / self.layer_thickness[i].max(1e-9)) as isize;
                if table >= prescribed_table {
                    self.moisture[i + 1] +=
                        self.percolation_rate[i] / 1000.0 / self.layer_thickness[i];
                    self.percolation_rate[i + 1] = params.groundwater_discharge;
                    self.water_flux[i + 1] = self.percolation_rate[i];
                } else {
                    self.moisture[i + 1] += (self.percolation_rate[i]
                        - params.groundwater_discharge)
                        / 1000.0
                        / self.layer_thickness[i];
                    self.percolation_rate[i + 1] = params.groundwater_discharge;
                    self.water_flux[i + 1] = params.groundwater_discharge;
                }

                if self.moisture[i + 1] >= self.pore_volume[i + 1] {
                    self.groundwater_added = ((self.moisture[i + 1] - self.pore_volume[i + 1])
                        * 1000.0
                        * self.layer_thickness[i + 1])
                        .max(0.0);
                    self.moisture[i + 1] = self.pore_volume[i + 1];
                }
            }

            if idx > table - 1 {
                // Inside the groundwater body.
                self.moisture[i + 1] = self.pore_volume[i + 1];
                let prescribed_table =
                    (groundwater_depth / self.layer_thickness[i].max(1e-9)) as isize;
                if table >= prescribed_table {
                    self.percolation_rate[i + 1] = self.percolation_rate[i];
                    self.water_flux[i] = self.percolation_rate[i + 1];
                } else {
                    self.percolation_rate[i + 1] = params.groundwater_discharge;
                    self.water_flux[i] = params.groundwater_discharge;
                }
            }
        }

        self.flux_at_lower_boundary = self.water_flux[leaching_layer.min(extended - 1)];
    }

    /// Distribute surplus water above the water table upwards.
    fn groundwater_replenishment(&mut self, params: &SoilMoistureParams, leaching_layer: usize) {
        let extended = self.moisture.len();
        let start = self.groundwater_table.min(extended - 2);

        let mut added = self.groundwater_added;
        for i in (0..=start).rev() {
            self.moisture[i] += added / 1000.0 / self.layer_thickness[(i + 1).min(extended - 1)];

            if i == start {
                self.percolation_rate[i] = params.groundwater_discharge;
            } else {
                self.percolation_rate[i] -= added;
                self.water_flux[i + 1] = self.percolation_rate[i];
            }

            if self.moisture[i] > self.pore_volume[i] {
                added = (self.moisture[i] - self.pore_volume[i])
                    * 1000.0
                    * self.layer_thickness[(i + 1).min(extended - 1)];
                self.moisture[i] = self.pore_volume[i];
                self.groundwater_table = self.groundwater_table.saturating_sub(1);
                if i == 0 && self.groundwater_table == 0 {
                    self.surface_water_storage += added;
                    added = 0.0;
                }
            } else {
                added = 0.0;
            }
        }

        self.flux_at_lower_boundary = if leaching_layer + 1 > self.groundwater_table {
            if self.groundwater_table == 0 {
                0.0
            } else {
                self.water_flux[self.groundwater_table - 1]
            }
        } else {
            self.water_flux[leaching_layer]
        };
    }

    // -------------------------------------------------------------------------
    // Evapotranspiration
    // -------------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn evapotranspiration_step(
        &mut self,
        params: &SoilMoistureParams,
        site: &SiteParameters,
        env: &EnvironmentParameters,
        crop_params: &CropModuleParams,
        crop: &mut ActiveCrop,
        snow_depth: f64,
        record: &crate::climate::ClimateRecord,
    ) {
        let n = self.moisture.len() - 1;

        let (crop_stage, soil_coverage) = crop
            .crop
            .as_ref()
            .map(|c| (c.developmental_stage, c.soil_coverage))
            .unwrap_or((0, 0.0));

        self.evaporated_from_intercept = 0.0;
        let mut potential_et;
        if crop_stage > 0 {
            let c = crop.crop.as_ref().unwrap();
            self.reference_evapotranspiration =
                record.et0.unwrap_or(c.reference_evapotranspiration);
            // The crop module already applied its Kc and evaporated from the
            // interception storage.
            potential_et = c.remaining_evapotranspiration;
            self.evaporated_from_intercept = c.evaporated_from_intercept;
            self.kc_factor = c.kc_factor;
        } else {
            self.kc_factor = params.kc_factor;
            self.reference_evapotranspiration = record.et0.unwrap_or_else(|| {
                reference_evapotranspiration(&Et0Inputs {
                    height_nn: site.height_nn,
                    tmax: record.tmax,
                    tmin: record.tmin,
                    tmean: record.tavg,
                    relhumid: record.relhumid,
                    wind_speed: record.wind,
                    wind_speed_height: env.wind_speed_height,
                    globrad: record.globrad,
                    julian_day: record.julian_day,
                    latitude: site.latitude,
                    reference_albedo: crop_params.reference_albedo,
                })
            });
            potential_et = self.reference_evapotranspiration * self.kc_factor;
        }

        self.actual_evaporation = 0.0;
        self.actual_transpiration = 0.0;
        self.evaporated_from_surface = 0.0;
        self.evaporation.fill(0.0);
        self.transpiration.fill(0.0);

        potential_et = potential_et.min(MAX_POTENTIAL_ET);

        let mut evaporation_from_surface = false;
        if potential_et > 0.0 {
            if self.surface_water_storage > 0.0 {
                evaporation_from_surface = true;
                // Open water evaporates with its own Kc.
                potential_et *= OPEN_WATER_KC / self.kc_factor;

                if snow_depth > 0.0 {
                    self.evaporated_from_surface = 0.0;
                } else if self.surface_water_storage < potential_et {
                    potential_et -= self.surface_water_storage;
                    self.evaporated_from_surface = self.surface_water_storage;
                    self.surface_water_storage = 0.0;
                } else {
                    self.surface_water_storage -= potential_et;
                    self.evaporated_from_surface = potential_et;
                    potential_et = 0.0;
                }
                potential_et *= self.kc_factor / OPEN_WATER_KC;
            }

            if potential_et > 0.0 {
                for i in 0..n {
                    let reducer_1 = moisture_evaporation_reducer(
                        self.moisture[i],
                        self.permanent_wilting_point[i],
                        self.field_capacity[i],
                    );
                    let reducer_2 = if i as f64 >= params.maximum_evaporation_impact_depth {
                        0.0
                    } else {
                        deprivation_factor(
                            i + 1,
                            params.maximum_evaporation_impact_depth,
                            params.evaporation_zeta,
                            self.layer_thickness[i],
                        )
                    };
                    let reducer_3 = if i > 0 && self.moisture[i] < self.moisture[i - 1] {
                        // A drier layer under a wetter one barely evaporates.
                        0.1
                    } else {
                        1.0
                    };
                    let reducer = reducer_1 * reducer_2 * reducer_3;

                    if crop_stage > 0 {
                        if (0.0..1.0).contains(&soil_coverage) {
                            self.evaporation[i] = (1.0 - soil_coverage) * reducer * potential_et;
                        } else {
                            self.evaporation[i] = 0.0;
                        }
                        if snow_depth > 0.0 {
                            self.evaporation[i] = 0.0;
                        }

                        self.transpiration[i] = crop
                            .crop
                            .as_ref()
                            .map(|c| c.transpiration_per_layer.get(i).copied().unwrap_or(0.0))
                            .unwrap_or(0.0);
                        // Cap transpiration when surface evaporation already
                        // claimed part of the day's demand.
                        if evaporation_from_surface {
                            self.transpiration[i] = soil_coverage * reducer * potential_et;
                        }
                    } else {
                        self.evaporation[i] = if snow_depth > 0.0 {
                            0.0
                        } else {
                            potential_et * reducer
                        };
                        self.transpiration[i] = 0.0;
                    }

                    let et = self.evaporation[i] + self.transpiration[i];
                    self.moisture[i] -= et / 1000.0 / self.layer_thickness[i];
                    if self.moisture[i] < 0.01 {
                        self.moisture[i] = 0.01;
                    }
                    self.actual_transpiration += self.transpiration[i];
                    self.actual_evaporation += self.evaporation[i];
                }
            }
        }

        self.actual_evapotranspiration = self.actual_transpiration
            + self.actual_evaporation
            + self.evaporated_from_intercept
            + self.evaporated_from_surface;

        if let Some(c) = crop.crop.as_mut() {
            c.accumulated_evapotranspiration += self.actual_evapotranspiration;
            c.accumulated_transpiration += self.actual_transpiration;
        }
    }

    // -------------------------------------------------------------------------
    // Capillary rise
    // -------------------------------------------------------------------------

    fn capillary_rise_step(&mut self, column: &SoilColumn, rooting_depth_layers: usize) {
        let n = self.moisture.len() - 1;
        let distance_layers = (self.groundwater_table as isize - rooting_depth_layers as isize)
            .max(1) as usize;

        if distance_layers as f64 * self.layer_thickness[0] > MAX_CAPILLARY_RISE_DISTANCE {
            return;
        }

        let mut rise_rate = 0.01_f64;
        let start = self.groundwater_table.min(n.saturating_sub(1));
        for i in (0..=start).rev() {
            let capillary_water = self.field_capacity[i] - self.permanent_wilting_point[i];
            let available_water = (self.moisture[i] - self.permanent_wilting_point[i]).max(0.0);

            let class_rate = column.layers[i]
                .params
                .texture
                .capillary_rise_rate(distance_layers);
            if class_rate < rise_rate {
                rise_rate = class_rate;
            }

            if available_water < 0.7 * capillary_water {
                self.moisture[i] += rise_rate;
                self.capillary_rise = rise_rate;
                for j in (i..=start).rev() {
                    self.water_flux[j] -= rise_rate;
                }
                break;
            }
        }
    }
}

/// HERMES evaporation reduction from the layer's relative evaporable water.
pub fn moisture_evaporation_reducer(moisture: f64, pwp: f64, field_capacity: f64) -> f64 {
    let floor = 0.33 * pwp;
    let moisture = moisture.max(floor);
    let relative = ((moisture - floor) / (field_capacity - floor)).min(1.0);

    if relative > 0.33 {
        1.0 - 0.1 * (1.0 - relative) / (1.0 - 0.33)
    } else if relative > 0.22 {
        0.9 - 0.625 * (0.33 - relative) / (0.33 - 0.22)
    } else if relative > 0.2 {
        0.275 - 0.225 * (0.22 - relative) / (0.22 - 0.2)
    } else {
        0.05 - 0.05 * (0.2 - relative) / 0.2
    }
}

/// Depth weight distributing potential evaporation over the profile.
/// `layer_no` is 1-based; `zeta` shapes the decay, zero giving a linear
/// profile.
pub fn deprivation_factor(
    layer_no: usize,
    deprivation_depth: f64,
    zeta: f64,
    layer_thickness: f64,
) -> f64 {
    let layer_no = layer_no as f64;
    let thickness_factor = deprivation_depth / (layer_thickness * 10.0);

    if zeta.abs() < 0.0003 {
        2.0 / thickness_factor
            - (2.0 * layer_no - 1.0) / (thickness_factor * thickness_factor)
    } else {
        let c2 = ((thickness_factor + zeta * layer_no)
            / (thickness_factor + zeta * (layer_no - 1.0)))
            .ln();
        let c3 = zeta / (thickness_factor * (zeta + 1.0));
        (c2 - c3) / ((zeta + 1.0).ln() - zeta / (zeta + 1.0))
    }
}

#[allow(clippy::too_many_arguments)]
pub fn update_soil_moisture(
    clock: Res<SimClock>,
    weather: Res<CurrentWeather>,
    site: Res<SiteParameters>,
    env: Res<EnvironmentParameters>,
    params: Res<SoilMoistureParams>,
    crop_params: Res<CropModuleParams>,
    mut crop: ResMut<ActiveCrop>,
    mut column: ResMut<SoilColumn>,
    mut snow: ResMut<SnowState>,
    mut frost: ResMut<FrostState>,
    mut state: ResMut<SoilMoistureState>,
    mut sink: ResMut<DiagnosticsSink>,
) {
    if !clock.active || column.number_of_layers() == 0 {
        return;
    }
    let record = weather.rec().clone();

    state.load(&column);

    // Net precipitation: the crop withholds interception once emerged.
    let (net_precipitation, soil_coverage, rooting_depth_layers) = match crop.crop.as_ref() {
        Some(c) if c.developmental_stage > 0 => (
            c.net_precipitation,
            c.soil_coverage,
            c.rooting_depth_layers,
        ),
        Some(c) => (record.precip, c.soil_coverage, 0),
        None => (record.precip, 0.0, 0),
    };

    let n = column.number_of_layers();
    state.detect_groundwater_table(n, weather.groundwater_depth);

    snow.step(&params, record.tavg, net_precipitation);
    let water_to_infiltrate = snow.water_to_infiltrate;
    frost.step(&mut column, &params, record.tavg, snow.depth);

    let groundwater_table = state.groundwater_table;
    state.infiltration_step(
        &params,
        &site,
        &frost,
        water_to_infiltrate,
        soil_coverage,
        groundwater_table,
    );

    if state.water_balance_residual.abs() > config::WATER_BALANCE_TOLERANCE_MM {
        sink.flag(
            clock.day,
            format!(
                "surface water balance residual {:.4} mm",
                state.water_balance_residual
            ),
        );
    }

    let leaching_layer =
        ((env.leaching_depth / env.layer_thickness + 0.5).floor() as usize).saturating_sub(1);

    if weather.groundwater_depth <= 10.0 {
        state.percolation_with_groundwater(
            &params,
            &frost,
            weather.groundwater_depth.max(0.0),
            leaching_layer,
        );
        state.groundwater_replenishment(&params, leaching_layer);
    } else {
        state.percolation_without_groundwater(&params, &frost, leaching_layer);
        state.backwater_replenishment();
    }

    state.evapotranspiration_step(
        &params,
        &site,
        &env,
        &crop_params,
        &mut crop,
        snow.depth,
        &record,
    );

    state.capillary_rise_step(&column, rooting_depth_layers);

    state.store(&mut column);
    column.snow_depth = snow.depth;
}

pub struct SoilMoisturePlugin;

impl Plugin for SoilMoisturePlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<SoilMoistureState>()
            .init_resource::<SnowState>()
            .init_resource::<FrostState>()
            .add_systems(FixedUpdate, update_soil_moisture.in_set(DailyStep::Moisture));
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

    #[test]
    fn test_moisture_evaporation_reducer_shape() {
        // Wet soil evaporates freely, dry soil hardly at all.
        let wet = moisture_evaporation_reducer(0.33, 0.12, 0.33);
        let moist = moisture_evaporation_reducer(0.20, 0.12, 0.33);
        let dry = moisture_evaporation_reducer(0.05, 0.12, 0.33);
        assert!((wet - 1.0).abs() < 1e-9);
        assert!(moist < wet && moist > dry);
        assert!(dry >= 0.0 && dry < 0.1);
    }

    #[test]
    fn test_deprivation_factors_sum_to_one() {
        // Weights over the impacted layers form a partition of the potential
        // evaporation.
        let sum: f64 = (1..=5)
            .map(|layer| deprivation_factor(layer, 5.0, 40.0, 0.1))
            .sum();
        assert!((sum - 1.0).abs() < 0.02, "sum = {sum}");

        let linear_sum: f64 = (1..=5)
            .map(|layer| deprivation_factor(layer, 5.0, 0.0, 0.1))
            .sum();
        assert!((linear_sum - 1.0).abs() < 0.02, "sum = {linear_sum}");
    }

    #[test]
    fn test_deprivation_decays_with_depth() {
        let top = deprivation_factor(1, 5.0, 40.0, 0.1);
        let deep = deprivation_factor(5, 5.0, 40.0, 0.1);
        assert!(top > deep);
    }

    fn state_for(column: &SoilColumn) -> SoilMoistureState {
        let mut state = SoilMoistureState::default();
        state.load(column);
        state
    }

    #[test]
    fn test_infiltration_of_heavy_rain_on_dry_soil() {
        let mut col = column();
        for layer in &mut col.layers {
            layer.moisture = layer.permanent_wilting_point();
        }
        let params = SoilMoistureParams::default();
        let site = SiteParameters::default();
        let frost = FrostState::new(col.number_of_layers(), params.hydraulic_conductivity_redux);
        let mut state = state_for(&col);
        state.detect_groundwater_table(col.number_of_layers(), 18.0);

        state.infiltration_step(&params, &site, &frost, 50.0, 0.0, state.groundwater_table);

        // Potential infiltration: K_sat * redux * 0.2 * deficit^2.
        let deficit = (0.45 - 0.12) / 0.45;
        let potential = 8640.0 * 0.1 * 0.2 * deficit * deficit;
        let expected = 50.0_f64.min(potential).min((0.45 - 0.12) * 1000.0 * 0.1);
        assert!((state.infiltration - expected).abs() < 1e-9);
        assert!(state.water_balance_residual.abs() < 1e-9);
    }

    #[test]
    fn test_frozen_top_layer_blocks_infiltration() {
        let col = column();
        let params = SoilMoistureParams::default();
        let site = SiteParameters::default();
        let mut frost = FrostState::new(col.number_of_layers(), params.hydraulic_conductivity_redux);
        frost.hydraulic_conductivity_redux = 0.0;
        let mut state = state_for(&col);
        state.detect_groundwater_table(col.number_of_layers(), 18.0);

        state.infiltration_step(&params, &site, &frost, 10.0, 0.0, state.groundwater_table);
        assert_eq!(state.infiltration, 0.0);
        assert!(state.surface_water_storage > 0.0);
    }

    #[test]
    fn test_percolation_moves_excess_water_down() {
        let mut col = column();
        col.layers[0].moisture = col.layers[0].saturation();
        let params = SoilMoistureParams::default();
        let site = SiteParameters::default();
        let frost = FrostState::new(col.number_of_layers(), params.hydraulic_conductivity_redux);
        let mut state = state_for(&col);
        state.detect_groundwater_table(col.number_of_layers(), 18.0);

        state.infiltration_step(&params, &site, &frost, 0.0, 0.0, state.groundwater_table);
        assert!(state.percolation_rate[0] > 0.0);

        let below_before = state.moisture[1];
        state.percolation_without_groundwater(&params, &frost, 15);
        assert!(state.moisture[1] > below_before);
        // Top layer drained back towards field capacity.
        assert!(state.moisture[0] <= col.layers[0].saturation());
    }

    #[test]
    fn test_shallow_groundwater_saturates_profile_below_table() {
        let col = column();
        let params = SoilMoistureParams::default();
        let site = SiteParameters::default();
        let frost = FrostState::new(col.number_of_layers(), params.hydraulic_conductivity_redux);
        let mut state = state_for(&col);

        // Water table prescribed at 1.0 m (layer 10).
        state.detect_groundwater_table(col.number_of_layers(), 1.0);
        assert_eq!(state.groundwater_table, 10);

        state.infiltration_step(&params, &site, &frost, 0.0, 0.0, state.groundwater_table);
        state.percolation_with_groundwater(&params, &frost, 1.0, 15);

        for i in 11..col.number_of_layers() {
            assert!(
                (state.moisture[i] - state.pore_volume[i]).abs() < 1e-9,
                "layer {i} not saturated"
            );
        }
    }

    #[test]
    fn test_surface_groundwater_saturates_everything() {
        let col = column();
        let params = SoilMoistureParams::default();
        let frost = FrostState::new(col.number_of_layers(), params.hydraulic_conductivity_redux);
        let mut state = state_for(&col);

        state.detect_groundwater_table(col.number_of_layers(), 0.0);
        assert_eq!(state.groundwater_table, 0);

        state.percolation_with_groundwater(&params, &frost, 0.0, 15);

        for i in 1..col.number_of_layers() {
            assert!(
                (state.moisture[i] - state.pore_volume[i]).abs() < 1e-9,
                "layer {i} not saturated"
            );
        }
        // The column drains into the groundwater body at the discharge rate.
        let n = col.number_of_layers();
        assert!((state.percolation_rate[n] - params.groundwater_discharge).abs() < 1e-9);
    }

    #[test]
    fn test_evaporation_dries_top_soil() {
        let col = column();
        let params = SoilMoistureParams::default();
        let site = SiteParameters::default();
        let env = EnvironmentParameters::default();
        let crop_params = CropModuleParams::default();
        let mut crop = ActiveCrop::default();
        let mut state = state_for(&col);

        let record = crate::climate::test_support::day(172);
        state.evapotranspiration_step(
            &params,
            &site,
            &env,
            &crop_params,
            &mut crop,
            0.0,
            &record,
        );

        assert!(state.reference_evapotranspiration > 0.0);
        assert!(state.actual_evaporation > 0.0);
        assert_eq!(state.actual_transpiration, 0.0);
        assert!(state.moisture[0] < col.layers[0].moisture);
    }

    #[test]
    fn test_climate_et0_takes_precedence() {
        let col = column();
        let params = SoilMoistureParams::default();
        let site = SiteParameters::default();
        let env = EnvironmentParameters::default();
        let crop_params = CropModuleParams::default();
        let mut crop = ActiveCrop::default();
        let mut state = state_for(&col);

        let mut record = crate::climate::test_support::day(172);
        record.et0 = Some(3.21);
        state.evapotranspiration_step(
            &params,
            &site,
            &env,
            &crop_params,
            &mut crop,
            0.0,
            &record,
        );
        assert!((state.reference_evapotranspiration - 3.21).abs() < 1e-12);
    }

    #[test]
    fn test_no_soil_evaporation_under_snow() {
        let col = column();
        let params = SoilMoistureParams::default();
        let site = SiteParameters::default();
        let env = EnvironmentParameters::default();
        let crop_params = CropModuleParams::default();
        let mut crop = ActiveCrop::default();
        let mut state = state_for(&col);

        let record = crate::climate::test_support::day(20);
        state.evapotranspiration_step(
            &params,
            &site,
            &env,
            &crop_params,
            &mut crop,
            50.0,
            &record,
        );
        assert_eq!(state.actual_evaporation, 0.0);
    }

    #[test]
    fn test_surface_water_evaporates_first() {
        let mut col = column();
        col.surface_water_storage = 2.0;
        let params = SoilMoistureParams::default();
        let site = SiteParameters::default();
        let env = EnvironmentParameters::default();
        let crop_params = CropModuleParams::default();
        let mut crop = ActiveCrop::default();
        let mut state = state_for(&col);

        let record = crate::climate::test_support::day(172);
        state.evapotranspiration_step(
            &params,
            &site,
            &env,
            &crop_params,
            &mut crop,
            0.0,
            &record,
        );
        assert!(state.evaporated_from_surface > 0.0);
        assert!(state.surface_water_storage < 2.0);
    }

    #[test]
    fn test_capillary_rise_fills_dry_layer_above_water_table() {
        let mut col = column();
        // Water table at 1.0 m; layer 9 dry.
        for layer in col.layers.iter_mut().take(10) {
            layer.moisture = layer.permanent_wilting_point() + 0.005;
        }
        let mut state = state_for(&col);
        state.groundwater_table = 10;

        let before = state.moisture[9];
        state.capillary_rise_step(&col, 0);
        // Nearest dry layer above the table gains the rise.
        assert!(state.moisture[9] > before);
        assert!(state.capillary_rise > 0.0);
        assert!(state.water_flux[9] < 0.0);
    }

    #[test]
    fn test_no_capillary_rise_from_deep_water_table() {
        let mut col = column();
        for layer in col.layers.iter_mut() {
            layer.moisture = layer.permanent_wilting_point() + 0.005;
        }
        let mut state = state_for(&col);
        // Water table 3 m below the root zone, beyond the tabulated reach.
        state.groundwater_table = 30;

        state.capillary_rise_step(&col, 0);
        assert_eq!(state.capillary_rise, 0.0);
    }

    #[test]
    fn test_backwater_rises_to_surface() {
        let col = column();
        let mut state = state_for(&col);
        // Middle of the profile oversaturated.
        state.moisture[5] = state.pore_volume[5] + 0.10;
        state.backwater_replenishment();
        assert!(state.moisture[5] <= state.pore_volume[5] + 1e-12);
        // Excess moved upward.
        assert!(state.moisture[4] > col.layers[4].moisture);
    }
}
