//! Daily development and mass balance of the planted crop.
//!
//! The developmental stage index drives every stage-indexed table: Kc, leaf
//! area, partitioning, senescence and stress thresholds. The step writes the
//! crop's per-layer transpiration demand and N uptake request into the crop
//! state, where the moisture and transport systems pick them up on the next
//! day.

use bevy::prelude::*;

use crate::climate::{CurrentWeather, SimClock};
use crate::crop::{ActiveCrop, CropState, Organ, ORGAN_COUNT};
use crate::evapotranspiration::{
    radiation_geometry, reference_evapotranspiration, Et0Inputs, RadiationGeometry,
};
use crate::params::{CropModuleParams, EnvironmentParameters, SiteParameters};
use crate::soil_column::SoilColumn;
use crate::{DailyStep, SimTotals};

/// CH2O mass per assimilated CO2 mass.
const CO2_TO_CH2O: f64 = 30.0 / 44.0;

/// Carbon mass fraction of CH2O.
const CH2O_TO_C: f64 = 12.0 / 30.0;

/// Interception storage capacity per unit leaf area index [mm].
const INTERCEPTION_CAPACITY_PER_LAI: f64 = 0.5;

/// Fraction of a layer's plant available water extractable per day.
const MAX_DAILY_WATER_EXTRACTION: f64 = 0.5;

/// Inputs the daily crop step needs from its surroundings.
pub struct CropStepContext<'a> {
    pub record: &'a crate::climate::ClimateRecord,
    pub co2: f64,
    pub site: &'a SiteParameters,
    pub env: &'a EnvironmentParameters,
    pub module_params: &'a CropModuleParams,
    pub column: &'a SoilColumn,
    pub day: u32,
}

/// Result of a cutting or fruit harvest.
#[derive(Debug, Clone, PartialEq)]
pub struct BiomassRemoval {
    /// Dry matter leaving the field [kg DM ha-1].
    pub exported: f64,
    /// Dry matter left behind as residues [kg DM ha-1].
    pub residues: f64,
    /// N concentration of those residues [kg N kg DM-1].
    pub residue_n_concentration: f64,
}

// =============================================================================
// Stage response helpers
// =============================================================================

/// Effective temperature above the stage base, capped at the optimum.
fn effective_temperature(tavg: f64, base: f64, optimum: f64) -> f64 {
    (tavg.min(optimum) - base).max(0.0)
}

/// Vernalisation progress of one day as a function of air temperature;
/// full effect in the 0..7 °C window, fading linearly outside.
pub fn vernalisation_day(tavg: f64) -> f64 {
    if (0.0..=7.0).contains(&tavg) {
        1.0
    } else if (-4.0..0.0).contains(&tavg) {
        (tavg + 4.0) / 4.0
    } else if tavg > 7.0 && tavg < 18.0 {
        1.0 - (tavg - 7.0) / 11.0
    } else {
        0.0
    }
}

/// Development speed factor from the vernalisation state.
pub fn vernalisation_factor(vernalisation_days: f64, requirement: f64) -> f64 {
    if requirement <= 0.0 {
        1.0
    } else {
        (vernalisation_days / requirement).clamp(0.0, 1.0)
    }
}

/// Photoperiod response between the base and the requirement daylength.
pub fn daylength_factor(daylength: f64, base: f64, requirement: f64) -> f64 {
    if requirement <= 0.0 {
        1.0
    } else {
        ((daylength - base) / (requirement - base)).clamp(0.0, 1.0)
    }
}

/// Triangular temperature response of assimilation.
pub fn assimilation_temperature_factor(tavg: f64, min: f64, optimum: f64, max: f64) -> f64 {
    if tavg <= min || tavg >= max {
        0.0
    } else if tavg <= optimum {
        (tavg - min) / (optimum - min)
    } else {
        (max - tavg) / (max - optimum)
    }
}

/// Saturating CO2 response, 1 at 380 ppm.
pub fn co2_response(co2: f64) -> f64 {
    let response = |c: f64| (c - 80.0).max(0.0) / (c + 160.0);
    response(co2) / response(380.0)
}

/// Fraction of the soil shaded by the canopy.
pub fn soil_coverage_from_lai(lai: f64) -> f64 {
    1.0 - (-0.5 * lai).exp()
}

impl CropState {
    /// One day of crop development.
    pub fn step(&mut self, ctx: &CropStepContext, totals: &mut SimTotals) {
        if self.dying_out {
            return;
        }
        self.days_since_sowing += 1;

        let record = ctx.record;
        let geometry = radiation_geometry(record.julian_day, ctx.site.latitude);

        self.update_development(ctx, &geometry);
        self.update_kc();
        self.update_size();
        self.update_photosynthesis_and_partitioning(ctx, &geometry);
        self.update_stress(ctx, totals);
        self.update_root_growth(ctx);
        self.update_n_demand(ctx);
        self.update_water_demand(ctx);

        totals.days_with_crop += 1;
        totals.accumulated_n_stress += 1.0 - self.crop_n_redux;
        totals.accumulated_water_stress += 1.0 - self.transpiration_deficit;
        totals.accumulated_oxygen_stress += 1.0 - self.oxygen_deficit;
    }

    fn update_development(&mut self, ctx: &CropStepContext, geometry: &RadiationGeometry) {
        let stage = self.developmental_stage;
        let params = &self.params;
        let record = ctx.record;

        self.vernalisation_days += vernalisation_day(record.tavg);

        // Germination needs a moist but not flooded seedbed.
        if stage == 0 {
            if let Some(top) = ctx.column.layers.first() {
                let too_dry = top.moisture < top.permanent_wilting_point() + 0.005;
                let flooded = top.moisture >= top.saturation() - 1e-6;
                if too_dry || flooded {
                    return;
                }
            }
        }

        let vern = vernalisation_factor(
            self.vernalisation_days,
            params.vernalisation_requirement[stage],
        );
        let photo = daylength_factor(
            geometry.photoperiodic_day_length,
            params.base_daylength[stage],
            params.daylength_requirement[stage],
        );
        let effective = effective_temperature(
            record.tavg,
            params.base_temperature[stage],
            params.optimum_temperature[stage],
        );

        let progress = effective * vern * photo * ctx.env.time_step;
        self.stage_temperature_sums[stage] += progress;
        self.current_total_temperature_sum += progress;

        if self.stage_temperature_sums[stage] >= params.stage_temperature_sum[stage]
            && stage + 1 < params.number_of_stages
        {
            self.developmental_stage += 1;
            // Entering the generative phase marks anthesis; the last stage
            // marks maturity.
            if self.developmental_stage == 4 && self.anthesis_day.is_none() {
                self.anthesis_day = Some(ctx.day);
            }
            if self.maturity_reached() && self.maturity_day.is_none() {
                self.maturity_day = Some(ctx.day);
            }
        }
    }

    fn update_kc(&mut self) {
        let stage = self.developmental_stage;
        let params = &self.params;
        let previous = if stage == 0 {
            params.initial_kc_factor
        } else {
            params.stage_kc_factors[stage - 1]
        };
        let fraction = (self.stage_temperature_sums[stage]
            / params.stage_temperature_sum[stage].max(1e-9))
        .clamp(0.0, 1.0);
        self.kc_factor = previous + (params.stage_kc_factors[stage] - previous) * fraction;
    }

    fn update_size(&mut self) {
        let params = &self.params;
        let relative = self.relative_development();
        self.crop_height = params.max_crop_height
            * (relative / params.stage_at_max_height)
                .min(1.0)
                .powf(params.crop_height_p2);
        self.crop_diameter = params.max_crop_diameter
            * (relative / params.stage_at_max_diameter).min(1.0);
    }

    fn update_photosynthesis_and_partitioning(
        &mut self,
        ctx: &CropStepContext,
        geometry: &RadiationGeometry,
    ) {
        let stage = self.developmental_stage;
        let params = &self.params;
        let record = ctx.record;

        if stage == 0 {
            // Pre-emergence: the seed reserve feeds a little root and leaf
            // growth, no photosynthesis yet.
            self.gross_primary_production = 0.0;
            self.net_primary_production = 0.0;
            return;
        }

        let temperature_factor = assimilation_temperature_factor(
            record.tavg,
            params.min_temperature_for_assimilation,
            params.optimum_temperature_for_assimilation,
            params.max_temperature_for_assimilation,
        );
        let amax = params.max_assimilation_rate * temperature_factor * co2_response(ctx.co2);

        // Light limitation: canopy closure and the day's share of clear-sky
        // radiation.
        let clear_sky = 0.75 * geometry.extraterrestrial_radiation;
        let radiation_factor = if clear_sky > 0.0 {
            (record.globrad / clear_sky).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let canopy_factor = 1.0 - (-0.8 * self.leaf_area_index).exp();

        // [kg CO2 ha-1 d-1]
        let gross_co2 =
            amax * geometry.effective_day_length * canopy_factor * radiation_factor;
        // Yesterday's water and N status throttle today's assimilation.
        let gross_co2 = gross_co2 * self.transpiration_deficit.min(self.crop_n_redux);
        let gross_ch2o = gross_co2 * CO2_TO_CH2O;

        let respiration_temperature = 2.0_f64.powf((record.tavg - 25.0) / 10.0);
        let maintenance: f64 = Organ::ALL
            .iter()
            .map(|o| {
                self.organ_biomass[o.index()]
                    * params.organ_maintenance_respiration[o.index()]
                    * respiration_temperature
                    * 0.01
            })
            .sum();

        let available = (gross_ch2o - maintenance).max(0.0);
        let growth = available * ctx.module_params.growth_respiration_redux;
        let growth_respiration = available - growth;

        self.gross_primary_production = gross_ch2o * CH2O_TO_C;
        self.net_primary_production =
            (gross_ch2o - maintenance - growth_respiration) * CH2O_TO_C;

        // Partition the growth increment over the organs; the storage organ
        // share is scaled by the remaining fertility.
        let partitioning = params.assimilate_partitioning[stage];
        let mut increments = [0.0; ORGAN_COUNT];
        for organ in Organ::ALL {
            let mut share = partitioning[organ.index()];
            if organ == Organ::Fruit {
                share *= self.fertility_factor;
            }
            increments[organ.index()] = growth * share;
        }

        let senescence = params.organ_senescence_rate[stage];
        for organ in Organ::ALL {
            let i = organ.index();
            let dead = self.organ_biomass[i] * senescence[i];
            self.organ_biomass[i] += increments[i] - dead;
            self.organ_dead_biomass[i] += dead;
            if self.organ_biomass[i] < 0.0 {
                self.organ_biomass[i] = 0.0;
            }
        }

        // Leaf area follows the living leaf biomass.
        self.leaf_area_index =
            self.organ_biomass[Organ::Leaf.index()] * params.specific_leaf_area[stage];
        self.soil_coverage = soil_coverage_from_lai(self.leaf_area_index);
    }

    fn update_stress(&mut self, ctx: &CropStepContext, totals: &mut SimTotals) {
        let params = &self.params;
        let record = ctx.record;
        let stage = self.developmental_stage;

        // Heat sterility inside the sensitive heat-sum window.
        let in_window = self.current_total_temperature_sum
            >= params.begin_sensitive_phase_heat_stress
            && self.current_total_temperature_sum <= params.end_sensitive_phase_heat_stress;
        if in_window && record.tmax > params.critical_temperature_heat_stress {
            let fraction = ((record.tmax - params.critical_temperature_heat_stress)
                / (params.limiting_temperature_heat_stress
                    - params.critical_temperature_heat_stress))
                .clamp(0.0, 1.0);
            self.heat_stress_redux = 1.0 - fraction;
            self.fertility_factor = (self.fertility_factor * (1.0 - 0.1 * fraction)).max(0.0);
            totals.accumulated_heat_stress += fraction;
        } else {
            self.heat_stress_redux = 1.0;
        }

        // Drought during the same window costs fertility as well.
        if in_window && self.transpiration_deficit < params.drought_stress_threshold[stage] {
            let shortfall =
                params.drought_stress_threshold[stage] - self.transpiration_deficit;
            self.fertility_factor = (self.fertility_factor * (1.0 - 0.05 * shortfall)).max(0.0);
        }

        // A killing frost ends the crop; harvest turns it into residues.
        if record.tmin <= params.frost_kill_temperature {
            self.dying_out = true;
        }

        // Oxygen shortage in a waterlogged root zone.
        if let Some(top) = ctx.column.layers.first() {
            let air_filled = (top.saturation() - top.moisture).max(0.0);
            let critical = params.critical_oxygen_content[stage];
            self.oxygen_deficit = (air_filled / critical).clamp(0.0, 1.0);
        }
    }

    fn update_root_growth(&mut self, ctx: &CropStepContext) {
        let params = &self.params;
        let record = ctx.record;
        if record.tavg > params.minimum_temperature_root_growth {
            self.rooting_depth_m += params.root_penetration_rate
                * (record.tavg - params.minimum_temperature_root_growth);
        }
        let column_depth =
            ctx.env.layer_thickness * ctx.column.number_of_layers() as f64;
        self.rooting_depth_m = self
            .rooting_depth_m
            .min(params.crop_specific_max_rooting_depth)
            .min(column_depth);
        self.rooting_depth_layers = ((self.rooting_depth_m / ctx.env.layer_thickness).floor()
            as usize)
            .max(1)
            .min(ctx.column.number_of_layers());
    }

    fn update_n_demand(&mut self, ctx: &CropStepContext) {
        let params = &self.params;
        let module = ctx.module_params;

        let aboveground = self.above_ground_biomass();
        let aboveground_t_ha = (aboveground / 1000.0).max(1.0);

        // Critical N dilution: concentration declines as the stand grows.
        self.critical_n_concentration = (params.n_concentration_b0
            * aboveground_t_ha.powf(-params.n_concentration_pn)
            / 100.0)
            .max(params.minimum_n_concentration);
        self.target_n_concentration =
            (self.critical_n_concentration * params.luxury_n_coeff)
                .min(params.n_concentration_aboveground);

        let root_biomass = self.organ_biomass[Organ::Root.index()];
        let optimal_n = self.target_n_concentration * aboveground
            + params.n_concentration_root * root_biomass;
        let demand_kg_ha = (optimal_n - self.total_biomass_n)
            .max(0.0)
            .min(module.max_crop_n_demand)
            .min(params.max_n_uptake_param);

        self.n_uptake_from_layer.fill(0.0);
        if demand_kg_ha <= 0.0 || self.developmental_stage == 0 {
            self.crop_n_redux = 1.0;
            return;
        }

        // Distribute the demand over the rooted layers, weighted by their
        // extractable nitrate.
        let demand_kg_m2 = demand_kg_ha / crate::config::M2_PER_HA;
        let rooted = self.rooting_depth_layers.min(ctx.column.number_of_layers());
        let mut available = vec![0.0; rooted];
        let mut total_available = 0.0;
        for (i, layer) in ctx.column.layers.iter().take(rooted).enumerate() {
            available[i] =
                ((layer.no3 - module.minimum_available_n).max(0.0)) * layer.thickness;
            total_available += available[i];
        }

        let mut taken_total = 0.0;
        if total_available > 0.0 {
            for i in 0..rooted {
                let share = demand_kg_m2 * available[i] / total_available;
                let taken = share.min(available[i]);
                self.n_uptake_from_layer[i] = taken;
                taken_total += taken;
            }
        }

        let mut acquired_kg_ha = taken_total * crate::config::M2_PER_HA;
        if params.fixing_n && acquired_kg_ha < demand_kg_ha {
            // Legumes cover the shortfall biologically.
            acquired_kg_ha = demand_kg_ha;
        }
        self.total_biomass_n += acquired_kg_ha;

        let actual_concentration = if aboveground > 0.0 {
            (self.total_biomass_n - params.n_concentration_root * root_biomass).max(0.0)
                / aboveground
        } else {
            self.critical_n_concentration
        };
        self.crop_n_redux =
            (actual_concentration / self.critical_n_concentration).clamp(0.0, 1.0);
    }

    fn update_water_demand(&mut self, ctx: &CropStepContext) {
        let record = ctx.record;

        self.reference_evapotranspiration = record.et0.unwrap_or_else(|| {
            reference_evapotranspiration(&Et0Inputs {
                height_nn: ctx.site.height_nn,
                tmax: record.tmax,
                tmin: record.tmin,
                tmean: record.tavg,
                relhumid: record.relhumid,
                wind_speed: record.wind,
                wind_speed_height: ctx.env.wind_speed_height,
                globrad: record.globrad,
                julian_day: record.julian_day,
                latitude: ctx.site.latitude,
                reference_albedo: ctx.module_params.reference_albedo,
            })
        });

        let mut potential_et = self.reference_evapotranspiration * self.kc_factor;

        // Interception fills first and evaporates first.
        let capacity = INTERCEPTION_CAPACITY_PER_LAI * self.leaf_area_index;
        let intercepted = (capacity - self.interception_storage)
            .clamp(0.0, record.precip)
            .max(0.0);
        self.interception_storage += intercepted;
        self.net_precipitation = record.precip - intercepted;

        self.evaporated_from_intercept = self.interception_storage.min(potential_et);
        self.interception_storage -= self.evaporated_from_intercept;
        potential_et -= self.evaporated_from_intercept;
        self.remaining_evapotranspiration = potential_et;

        // Potential transpiration claims the covered share; distribute it
        // over the rooted layers by their plant available water.
        let potential_transpiration = potential_et * self.soil_coverage;
        self.transpiration_per_layer.fill(0.0);
        if potential_transpiration <= 0.0 || self.developmental_stage == 0 {
            self.transpiration_deficit = 1.0;
            return;
        }

        let rooted = self.rooting_depth_layers.min(ctx.column.number_of_layers());
        let mut available = vec![0.0; rooted];
        let mut total_available = 0.0;
        for (i, layer) in ctx.column.layers.iter().take(rooted).enumerate() {
            available[i] = ((layer.moisture - layer.permanent_wilting_point()).max(0.0))
                * layer.thickness
                * 1000.0;
            total_available += available[i];
        }

        let mut actual = 0.0;
        if total_available > 0.0 {
            for i in 0..rooted {
                let share = potential_transpiration * available[i] / total_available;
                let taken = share.min(MAX_DAILY_WATER_EXTRACTION * available[i]);
                self.transpiration_per_layer[i] = taken;
                actual += taken;
            }
        }

        self.transpiration_deficit = if potential_transpiration > 0.0 {
            (actual / potential_transpiration).clamp(0.0, 1.0)
        } else {
            1.0
        };
    }

    // -------------------------------------------------------------------------
    // Management hooks
    // -------------------------------------------------------------------------

    /// Remove the given fraction of each organ's biomass; `export_fraction`
    /// of the removed matter leaves the field, the rest stays as residues.
    /// The developmental stage is set back for regrowth.
    pub fn apply_cutting(
        &mut self,
        organ_fractions: &[(Organ, f64)],
        export_fraction: f64,
    ) -> BiomassRemoval {
        let n_concentration_before = self.residue_n_concentration();
        let total_before = self.total_biomass();

        let mut removed = 0.0;
        for &(organ, fraction) in organ_fractions {
            let fraction = fraction.clamp(0.0, 1.0);
            let i = organ.index();
            let cut = self.organ_biomass[i] * fraction;
            self.organ_biomass[i] -= cut;
            removed += cut;
        }

        // N leaves with the removed biomass share.
        if total_before > 0.0 {
            self.total_biomass_n *= 1.0 - removed / total_before;
        }

        let export_fraction = export_fraction.clamp(0.0, 1.0);
        let exported = removed * export_fraction;
        let residues = removed - exported;
        self.accumulated_cut_yield += exported;

        // Rewind phenology for regrowth.
        let new_stage = self.params.stage_after_cut.min(self.params.number_of_stages - 1);
        self.developmental_stage = new_stage;
        for stage in new_stage..self.params.number_of_stages {
            self.stage_temperature_sums[stage] = 0.0;
        }
        self.current_total_temperature_sum = self
            .params
            .stage_temperature_sum
            .iter()
            .take(new_stage)
            .sum();

        self.leaf_area_index = self.organ_biomass[Organ::Leaf.index()]
            * self.params.specific_leaf_area[self.developmental_stage];
        self.soil_coverage = soil_coverage_from_lai(self.leaf_area_index);

        BiomassRemoval {
            exported,
            residues,
            residue_n_concentration: n_concentration_before,
        }
    }

    /// Harvest a percentage of the storage organ without ending the crop.
    pub fn apply_fruit_harvest(&mut self, percentage: f64) -> BiomassRemoval {
        let n_concentration = self.residue_n_concentration();
        let fraction = (percentage / 100.0).clamp(0.0, 1.0);
        let i = Organ::Fruit.index();
        let removed = self.organ_biomass[i] * fraction;
        self.organ_biomass[i] -= removed;

        let total = self.total_biomass() + removed;
        if total > 0.0 {
            self.total_biomass_n *= 1.0 - removed / total;
        }
        self.accumulated_cut_yield += removed;

        BiomassRemoval {
            exported: removed,
            residues: 0.0,
            residue_n_concentration: n_concentration,
        }
    }
}

pub fn update_crop_growth(
    clock: Res<SimClock>,
    weather: Res<CurrentWeather>,
    site: Res<SiteParameters>,
    env: Res<EnvironmentParameters>,
    module_params: Res<CropModuleParams>,
    column: Res<SoilColumn>,
    mut active: ResMut<ActiveCrop>,
    mut totals: ResMut<SimTotals>,
) {
    if !clock.active {
        return;
    }
    let Some(crop) = active.crop.as_mut() else {
        return;
    };

    let record = weather.rec().clone();
    let ctx = CropStepContext {
        record: &record,
        co2: weather.co2,
        site: &site,
        env: &env,
        module_params: &module_params,
        column: &column,
        day: clock.day,
    };
    crop.step(&ctx, &mut totals);
}

pub struct CropGrowthPlugin;

impl Plugin for CropGrowthPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(FixedUpdate, update_crop_growth.in_set(DailyStep::Crop));
    }
}

// =============================================================================
// Tests
// =============================================================================
