//! Snow pack accumulation, settling, melt and release.
//!
//! The snow pack is tracked as frozen and liquid water stores with a bulk
//! density that increases as the pack settles. Melt water first fills the
//! pack's liquid retention capacity; only the excess is released towards
//! infiltration.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::params::SoilMoistureParams;

/// Snow depth below which the pack is considered gone [mm].
const MIN_SNOW_DEPTH: f64 = 0.01;

#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
pub struct SnowState {
    /// Snow depth [mm].
    pub depth: f64,
    /// Bulk density of the pack [kg dm-3].
    pub density: f64,
    /// Frozen water in the pack [mm].
    pub frozen_water: f64,
    /// Liquid water retained in the pack [mm].
    pub liquid_water: f64,
    /// Highest depth seen during the run [mm].
    pub max_depth: f64,
    /// Sum of daily depths [mm].
    pub accumulated_depth: f64,
    /// Water leaving the pack (or bypassing it) towards the surface [mm].
    pub water_to_infiltrate: f64,
}

impl Default for SnowState {
    fn default() -> Self {
        Self {
            depth: 0.0,
            density: 0.0,
            frozen_water: 0.0,
            liquid_water: 0.0,
            max_depth: 0.0,
            accumulated_depth: 0.0,
            water_to_infiltrate: 0.0,
        }
    }
}

impl SnowState {
    /// Advance the pack by one day of mean air temperature and net
    /// precipitation [mm].
    pub fn step(&mut self, params: &SoilMoistureParams, tmean: f64, net_precip: f64) {
        let (precip_water, precip_snow) = split_precipitation(params, tmean, net_precip);
        let corrected_precip = precip_water + precip_snow;

        let snowmelt = self.snowmelt(params, tmean);
        let refreeze = self.refreeze(params, tmean);

        let new_snow_density = new_snow_density(params, tmean, precip_snow);
        self.density = self.average_density(params, precip_snow, new_snow_density);

        self.frozen_water += precip_snow - snowmelt + refreeze;
        self.liquid_water += precip_water + snowmelt - refreeze;
        let mut swe = self.frozen_water + self.liquid_water;

        let retained = self.liquid_retention_capacity(params) * swe;

        let mut release = 0.0;
        if refreeze <= 0.0 && self.liquid_water > retained {
            release = self.liquid_water - retained;
            self.liquid_water -= release;
            swe = self.frozen_water + self.liquid_water;
        }

        self.update_depth(swe);

        self.water_to_infiltrate = if self.depth < MIN_SNOW_DEPTH {
            corrected_precip
        } else {
            release
        };
    }

    fn snowmelt(&self, params: &SoilMoistureParams, tmean: f64) -> f64 {
        let melting_factor = (1.4 * self.density / 0.1).min(4.7);
        if self.frozen_water <= 0.0 || tmean < params.snow_melt_temperature {
            return 0.0;
        }
        (melting_factor * (tmean - params.snow_melt_temperature)).min(self.frozen_water)
    }

    fn refreeze(&self, params: &SoilMoistureParams, tmean: f64) -> f64 {
        let cold = tmean.min(0.0);
        if cold >= params.refreeze_temperature || self.liquid_water <= 0.0 {
            return 0.0;
        }
        (params.refreeze_p1 * (params.refreeze_temperature - cold).powf(params.refreeze_p2))
            .min(self.liquid_water)
    }

    fn average_density(
        &self,
        params: &SoilMoistureParams,
        precip_snow: f64,
        new_snow_density: f64,
    ) -> f64 {
        if self.depth + precip_snow <= 0.0 {
            return 0.0;
        }
        let density = ((1.0 + params.snow_packing) * self.density * self.depth
            + new_snow_density * precip_snow)
            / (self.depth + precip_snow);
        density.min(params.new_snow_density_min + params.snow_max_additional_density)
    }

    fn liquid_retention_capacity(&self, params: &SoilMoistureParams) -> f64 {
        if self.frozen_water <= 0.0 || self.density <= 0.0 {
            return 0.0;
        }
        (params.snow_retention_capacity_max / 10.0 / self.density).clamp(
            params.snow_retention_capacity_min,
            params.snow_retention_capacity_max,
        )
    }

    fn update_depth(&mut self, swe: f64) {
        if swe <= 0.0 {
            self.depth = 0.0;
        } else {
            // Water density 1 kg/dm3 against the pack's bulk density.
            self.depth = swe / self.density;
            if self.depth > self.max_depth {
                self.max_depth = self.depth;
            }
            if self.depth < MIN_SNOW_DEPTH {
                self.depth = 0.0;
            }
        }
        if self.depth == 0.0 {
            self.density = 0.0;
            self.frozen_water = 0.0;
            self.liquid_water = 0.0;
        }
        self.accumulated_depth += self.depth;
    }
}

/// Split net precipitation into its liquid and frozen parts, linearly
/// between the liquid-water limit and the accumulation threshold, with the
/// configured gauge correction multipliers applied.
pub fn split_precipitation(
    params: &SoilMoistureParams,
    tmean: f64,
    net_precip: f64,
) -> (f64, f64) {
    let liquid_fraction = if tmean >= params.snow_accumulation_threshold {
        1.0
    } else if tmean <= params.temperature_limit_for_liquid_water {
        0.0
    } else {
        (tmean - params.temperature_limit_for_liquid_water)
            / (params.snow_accumulation_threshold - params.temperature_limit_for_liquid_water)
    };
    let water = liquid_fraction * params.correction_rain * net_precip;
    let snow = (1.0 - liquid_fraction) * params.correction_snow * net_precip;
    (water, snow)
}

/// Density of freshly fallen snow [kg dm-3]; warmer snowfalls pack denser.
pub fn new_snow_density(params: &SoilMoistureParams, tmean: f64, precip_snow: f64) -> f64 {
    if precip_snow <= 0.0 {
        return 0.0;
    }
    let factor = ((tmean - params.temperature_limit_for_liquid_water)
        / (params.snow_accumulation_threshold - params.temperature_limit_for_liquid_water))
        .clamp(0.0, 1.0);
    params.new_snow_density_min + params.snow_max_additional_density * factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SoilMoistureParams {
        SoilMoistureParams::default()
    }

    #[test]
    fn test_cold_day_accumulates_snow() {
        let mut snow = SnowState::default();
        snow.step(&params(), -5.0, 10.0);
        // All precipitation falls as snow, corrected by the snow gauge factor.
        assert!((snow.frozen_water - 10.0 * params().correction_snow).abs() < 1e-9);
        assert!(snow.depth > 0.0);
        assert_eq!(snow.water_to_infiltrate, 0.0);
    }

    #[test]
    fn test_warm_day_passes_rain_through() {
        let mut snow = SnowState::default();
        snow.step(&params(), 10.0, 8.0);
        assert_eq!(snow.depth, 0.0);
        assert!((snow.water_to_infiltrate - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_mixed_phase_between_limits() {
        let p = params();
        let (water, snowfall) = split_precipitation(&p, -0.6, 10.0);
        assert!(water > 0.0);
        assert!(snowfall > 0.0);
        // Colder day shifts the split towards snow.
        let (colder_water, colder_snow) = split_precipitation(&p, -2.0, 10.0);
        assert!(colder_water < water);
        assert!(colder_snow > snowfall);
    }

    #[test]
    fn test_no_melt_at_or_below_melt_temperature() {
        let p = params();
        let mut snow = SnowState::default();
        snow.step(&p, -5.0, 10.0);
        let frozen_before = snow.frozen_water;

        snow.step(&p, p.snow_melt_temperature, 0.0);
        assert!((snow.frozen_water - frozen_before).abs() < 1e-9);

        snow.step(&p, p.snow_melt_temperature + 2.0, 0.0);
        assert!(snow.frozen_water < frozen_before);
    }

    #[test]
    fn test_melt_eventually_releases_water() {
        let p = params();
        let mut snow = SnowState::default();
        snow.step(&p, -5.0, 20.0);
        let mut released = 0.0;
        for _ in 0..30 {
            snow.step(&p, 8.0, 0.0);
            released += snow.water_to_infiltrate;
        }
        // The whole pack (gauge-corrected) must come out as liquid water.
        assert!((released - 20.0 * p.correction_snow).abs() < 1e-6);
        assert_eq!(snow.depth, 0.0);
        assert_eq!(snow.frozen_water, 0.0);
    }

    #[test]
    fn test_refreeze_claims_liquid_water() {
        let p = params();
        let mut snow = SnowState::default();
        snow.step(&p, -5.0, 20.0);
        // Partial melt leaves liquid water in the pack.
        snow.step(&p, 3.0, 0.0);
        let liquid_before = snow.liquid_water;
        assert!(liquid_before > 0.0);

        snow.step(&p, -10.0, 0.0);
        assert!(snow.liquid_water < liquid_before);
        assert_eq!(snow.water_to_infiltrate, 0.0);
    }

    #[test]
    fn test_density_bounded() {
        let p = params();
        let mut snow = SnowState::default();
        for _ in 0..60 {
            snow.step(&p, -3.0, 2.0);
            assert!(snow.density <= p.new_snow_density_min + p.snow_max_additional_density + 1e-12);
        }
    }

    #[test]
    fn test_new_snow_density_bounds() {
        let p = params();
        assert_eq!(new_snow_density(&p, -10.0, 0.0), 0.0);
        assert!((new_snow_density(&p, -20.0, 5.0) - p.new_snow_density_min).abs() < 1e-12);
        assert!(
            (new_snow_density(&p, 5.0, 5.0)
                - (p.new_snow_density_min + p.snow_max_additional_density))
                .abs()
                < 1e-12
        );
    }
}
