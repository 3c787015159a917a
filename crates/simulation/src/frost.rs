//! Soil frost and thaw front tracking.
//!
//! Frost depth grows with accumulated negative degree-days under the snow
//! pack; the thaw front follows from above once the air warms. Frozen layers
//! get their percolation shape factor zeroed and, for the top layer, the
//! infiltration conductivity as well.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::params::SoilMoistureParams;
use crate::soil_column::SoilColumn;

/// Latent heat released or absorbed on freezing/thawing [MJ m-3 per unit
/// water content], after Stefan.
const LATENT_HEAT_FUSION: f64 = 0.335;

/// Hansson's frozen-phase impedance parameters.
const HANSSON_F1: f64 = 13.05;
const HANSSON_F2: f64 = 1.06;

#[derive(Resource, Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrostState {
    /// Depth of the frost front [m].
    pub frost_depth: f64,
    /// Depth of the thaw front [m].
    pub thaw_depth: f64,
    /// Accumulated negative degree-days [°C d].
    pub negative_degree_days: f64,
    /// Days with standing frost.
    pub frost_days: u32,
    /// Sum of daily frost depths [m].
    pub accumulated_frost_depth: f64,
    /// Air temperature attenuated by the snow pack [°C].
    pub temperature_under_snow: f64,
    /// Per-layer reduction of the percolation shape factor (0 = frozen).
    pub lambda_redux: Vec<f64>,
    /// Effective top-layer conductivity multiplier for infiltration.
    pub hydraulic_conductivity_redux: f64,
}

impl FrostState {
    pub fn new(number_of_layers: usize, hydraulic_conductivity_redux: f64) -> Self {
        Self {
            lambda_redux: vec![1.0; number_of_layers + 1],
            hydraulic_conductivity_redux,
            ..Default::default()
        }
    }

    pub fn lambda_redux(&self, layer: usize) -> f64 {
        self.lambda_redux.get(layer).copied().unwrap_or(1.0)
    }

    /// Advance frost and thaw fronts by one day and refresh the per-layer
    /// reduction factors on the column.
    pub fn step(
        &mut self,
        column: &mut SoilColumn,
        params: &SoilMoistureParams,
        tmean: f64,
        snow_depth_mm: f64,
    ) {
        if self.lambda_redux.len() != column.number_of_layers() + 1 {
            self.lambda_redux = vec![1.0; column.number_of_layers() + 1];
            self.hydraulic_conductivity_redux = params.hydraulic_conductivity_redux;
        }

        let mean_field_capacity = mean_field_capacity(column);
        let mean_bulk_density = mean_bulk_density_mg_m3(column);

        let sii = hansson_impedance(mean_field_capacity);
        let conductivity_frozen = heat_conductivity_frozen(mean_bulk_density, sii);
        let conductivity_unfrozen =
            heat_conductivity_unfrozen(mean_bulk_density, mean_field_capacity);

        self.temperature_under_snow = temperature_under_snow(tmean, snow_depth_mm, self.frost_depth);

        self.frost_depth = self.next_frost_depth(mean_field_capacity, conductivity_frozen);
        self.accumulated_frost_depth += self.frost_depth;
        self.thaw_depth = self.next_thaw_depth(conductivity_unfrozen, mean_field_capacity);

        self.update_layer_redux(column, params);
    }

    fn next_frost_depth(&mut self, mean_field_capacity: f64, conductivity_frozen: f64) -> f64 {
        let latent_heat = 1000.0 * (mean_field_capacity * 100.0) / 100.0 * LATENT_HEAT_FUSION;

        if self.frost_depth > 0.0 {
            self.frost_days += 1;
        }
        let latent_heat_transfer = 0.3 * self.frost_days as f64 / latent_heat;

        if self.temperature_under_snow < 0.0 {
            self.negative_degree_days -= self.temperature_under_snow;
        }
        if self.negative_degree_days < 0.01 {
            return 0.0;
        }

        let half_transfer = latent_heat_transfer / 2.0;
        (half_transfer * half_transfer
            + 2.0 * conductivity_frozen * self.negative_degree_days / latent_heat)
            .sqrt()
            - half_transfer
    }

    fn next_thaw_depth(&self, conductivity_unfrozen: f64, mean_field_capacity: f64) -> f64 {
        let degrees = self.temperature_under_snow.abs();

        let advance = if self.frost_depth == 0.0 {
            0.0
        } else {
            (2.0 * conductivity_unfrozen * degrees
                / (1000.0 * 79.0 * (mean_field_capacity * 100.0) / 100.0))
                .sqrt()
        };

        let signed = if self.temperature_under_snow < 0.0 {
            -advance
        } else {
            advance
        };
        (self.thaw_depth + signed).max(0.0)
    }

    fn update_layer_redux(&mut self, column: &mut SoilColumn, params: &SoilMoistureParams) {
        let layers = column.number_of_layers();

        for i in 0..layers {
            let thickness = column.layers[i].thickness;

            if (i as f64) < (self.frost_depth / thickness + 0.5).floor() {
                column.layers[i].frozen = true;
                self.lambda_redux[i] = 0.0;
                if i == 0 {
                    self.hydraulic_conductivity_redux = 0.0;
                }
            }

            if (i as f64) < (self.thaw_depth / thickness + 0.5).floor() {
                if self.thaw_depth < (i + 1) as f64 * thickness && self.thaw_depth < self.frost_depth
                {
                    // Thawing from above but still frozen below.
                    column.layers[i].frozen = true;
                    self.lambda_redux[i] = 0.0;
                    if i == 0 {
                        self.hydraulic_conductivity_redux = 0.0;
                    }
                } else {
                    column.layers[i].frozen = false;
                    self.lambda_redux[i] = 1.0;
                    if i == 0 {
                        self.hydraulic_conductivity_redux = 0.1;
                    }
                }
            }
        }

        // Thaw has caught up with the frost front: reset everything.
        if self.thaw_depth >= self.frost_depth {
            self.thaw_depth = 0.0;
            self.frost_depth = 0.0;
            self.negative_degree_days = 0.0;
            self.frost_days = 0;
            self.hydraulic_conductivity_redux = params.hydraulic_conductivity_redux;
            for i in 0..layers {
                column.layers[i].frozen = false;
                self.lambda_redux[i] = 1.0;
            }
        }
    }
}

/// Mean field capacity of the column [m3 m-3].
fn mean_field_capacity(column: &SoilColumn) -> f64 {
    let n = column.number_of_layers();
    if n == 0 {
        return 0.0;
    }
    column.layers.iter().map(|l| l.field_capacity()).sum::<f64>() / n as f64
}

/// Mean bulk density of the column [Mg m-3].
fn mean_bulk_density_mg_m3(column: &SoilColumn) -> f64 {
    let n = column.number_of_layers();
    if n == 0 {
        return 0.0;
    }
    column.layers.iter().map(|l| l.bulk_density()).sum::<f64>() / n as f64 / 1000.0
}

/// Impedance term of the frozen-soil conductivity.
fn hansson_impedance(mean_field_capacity: f64) -> f64 {
    (mean_field_capacity
        + (1.0 + HANSSON_F1 * mean_field_capacity.powf(HANSSON_F2) * mean_field_capacity))
        * 100.0
}

/// Heat conductivity of frozen soil [MJ m-1 K-1 d-1].
fn heat_conductivity_frozen(mean_bulk_density: f64, sii: f64) -> f64 {
    ((3.0 * mean_bulk_density - 1.7) * 0.001)
        / (1.0
            + (11.5 - 5.0 * mean_bulk_density)
                * (-50.0 * (sii / mean_bulk_density).powf(1.5)).exp())
        * 86_400.0
        * 4.184
        / 1_000_000.0
        * 100.0
}

/// Heat conductivity of unfrozen soil [W m-1 K-1].
fn heat_conductivity_unfrozen(mean_bulk_density: f64, mean_field_capacity: f64) -> f64 {
    ((3.0 * mean_bulk_density - 1.7) * 0.001)
        / (1.0
            + (11.5 - 5.0 * mean_bulk_density)
                * (-50.0 * ((mean_field_capacity * 100.0) / mean_bulk_density).powf(1.5)).exp())
        * 4.184
        * 100.0
}

/// Air temperature attenuated by the snow pack. Thin snow or shallow frost
/// pass the air temperature through unchanged.
pub fn temperature_under_snow(tmean: f64, snow_depth_mm: f64, frost_depth: f64) -> f64 {
    let snow_depth_cm = snow_depth_mm / 100.0;
    if snow_depth_cm < 0.01 || frost_depth < 0.01 {
        tmean
    } else {
        tmean / (1.0 + 10.0 * snow_depth_cm / frost_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{EnvironmentParameters, SoilParameters};

    fn column() -> SoilColumn {
        SoilColumn::from_profile(
            &vec![SoilParameters::default(); 20],
            &EnvironmentParameters::default(),
        )
    }

    #[test]
    fn test_week_of_hard_frost_freezes_top_layer() {
        let mut col = column();
        let params = SoilMoistureParams::default();
        let mut frost = FrostState::new(col.number_of_layers(), params.hydraulic_conductivity_redux);

        for _ in 0..7 {
            frost.step(&mut col, &params, -10.0, 0.0);
        }

        assert!(frost.frost_depth > 0.0);
        assert!(col.layers[0].frozen);
        assert_eq!(frost.lambda_redux(0), 0.0);
        assert_eq!(frost.hydraulic_conductivity_redux, 0.0);
    }

    #[test]
    fn test_frost_depth_grows_with_cold() {
        let mut col = column();
        let params = SoilMoistureParams::default();
        let mut frost = FrostState::new(col.number_of_layers(), params.hydraulic_conductivity_redux);

        frost.step(&mut col, &params, -10.0, 0.0);
        let shallow = frost.frost_depth;
        for _ in 0..13 {
            frost.step(&mut col, &params, -10.0, 0.0);
        }
        assert!(frost.frost_depth > shallow);
    }

    #[test]
    fn test_thaw_resets_everything() {
        let mut col = column();
        let params = SoilMoistureParams::default();
        let mut frost = FrostState::new(col.number_of_layers(), params.hydraulic_conductivity_redux);

        for _ in 0..10 {
            frost.step(&mut col, &params, -8.0, 0.0);
        }
        assert!(frost.frost_depth > 0.0);

        let mut thawed = false;
        for _ in 0..60 {
            frost.step(&mut col, &params, 12.0, 0.0);
            if frost.frost_depth == 0.0 {
                thawed = true;
                break;
            }
        }
        assert!(thawed, "soil never thawed");
        assert_eq!(frost.negative_degree_days, 0.0);
        assert_eq!(frost.frost_days, 0);
        assert!(!col.layers[0].frozen);
        assert_eq!(frost.lambda_redux(0), 1.0);
        assert_eq!(
            frost.hydraulic_conductivity_redux,
            params.hydraulic_conductivity_redux
        );
    }

    #[test]
    fn test_temperature_under_snow_attenuates() {
        // No snow or no frost: air temperature passes through.
        assert_eq!(temperature_under_snow(-5.0, 0.0, 0.5), -5.0);
        assert_eq!(temperature_under_snow(-5.0, 100.0, 0.0), -5.0);
        // Deep snow over frost dampens strongly.
        let damped = temperature_under_snow(-5.0, 200.0, 0.2);
        assert!(damped > -5.0 && damped < 0.0);
    }

    #[test]
    fn test_no_frost_without_negative_degrees() {
        let mut col = column();
        let params = SoilMoistureParams::default();
        let mut frost = FrostState::new(col.number_of_layers(), params.hydraulic_conductivity_redux);
        for _ in 0..10 {
            frost.step(&mut col, &params, 5.0, 0.0);
        }
        assert_eq!(frost.frost_depth, 0.0);
        assert!(!col.layers[0].frozen);
    }
}
