use bevy::prelude::*;
use serde::{Deserialize, Serialize};

pub mod climate;
pub mod config;
pub mod crop;
pub mod crop_growth;
pub mod diagnostics;
pub mod evapotranspiration;
pub mod frost;
pub mod management;
pub mod observation;
pub mod params;
pub mod snow;
pub mod soil_column;
pub mod soil_moisture;
pub mod soil_organic;
pub mod soil_temperature;
pub mod soil_transport;

#[cfg(test)]
pub mod test_harness;

#[cfg(test)]
mod integration_tests;

/// Fixed-update period. One fixed tick advances the simulation by exactly
/// one day; the driver (CLI or test harness) advances virtual time by this
/// amount per simulated day.
pub const DAY_TICK_SECONDS: f64 = 0.1;

/// The strictly ordered phases of one simulated day. Every process system
/// is a member of exactly one phase; the phases are chained, so a system
/// always observes the state left behind by the previous phase.
#[derive(SystemSet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DailyStep {
    /// Resolve today's climate record, effective CO2 and groundwater depth,
    /// reset daily accumulators.
    BeginDay,
    /// Apply management actions queued for today (fertiliser, irrigation,
    /// tillage, sowing, harvest), including deferred and top-dressing
    /// applications.
    Management,
    /// Heat conduction through the soil column.
    Temperature,
    /// Snow, frost and the water budget.
    Moisture,
    /// Carbon/nitrogen turnover and gaseous losses.
    Organic,
    /// Vertical nitrate transport and crop N uptake sink.
    Transport,
    /// Phenology, photosynthesis, partitioning, water and N demand.
    Crop,
    /// Invariant checks, observation row, day counter advance.
    Observe,
}

/// Daily and cropping-period bookkeeping of external inputs and crop stress.
#[derive(Resource, Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimTotals {
    /// Mineral fertiliser N applied today [kg N ha-1].
    pub daily_mineral_fertiliser_n: f64,
    /// Mineral fertiliser N applied since the last harvest [kg N ha-1].
    pub sum_mineral_fertiliser_n: f64,
    /// Organic fertiliser N applied today [kg N ha-1].
    pub daily_organic_fertiliser_n: f64,
    /// Organic fertiliser N applied since the last harvest [kg N ha-1].
    pub sum_organic_fertiliser_n: f64,
    /// Organic fertiliser dry matter applied today [kg DM ha-1].
    pub daily_organic_fertiliser_dm: f64,
    /// Organic fertiliser dry matter applied since the last harvest [kg DM ha-1].
    pub sum_organic_fertiliser_dm: f64,
    /// Irrigation water applied today [mm].
    pub daily_irrigation_water: f64,
    /// N dissolved in today's irrigation water [kg N ha-1].
    pub daily_irrigation_n: f64,
    /// Number of days a crop has been on the field.
    pub days_with_crop: u32,
    /// Accumulated (1 - stress factor) sums over the cropping period.
    pub accumulated_water_stress: f64,
    pub accumulated_heat_stress: f64,
    pub accumulated_n_stress: f64,
    pub accumulated_oxygen_stress: f64,
}

impl SimTotals {
    /// Reset the cropping-period fertiliser sums (called at harvest).
    pub fn reset_fertiliser_sums(&mut self) {
        self.sum_mineral_fertiliser_n = 0.0;
        self.sum_organic_fertiliser_n = 0.0;
        self.sum_organic_fertiliser_dm = 0.0;
    }
}

pub struct SimulationPlugin;

impl Plugin for SimulationPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(Time::<Fixed>::from_seconds(DAY_TICK_SECONDS));

        app.configure_sets(
            FixedUpdate,
            (
                DailyStep::BeginDay,
                DailyStep::Management,
                DailyStep::Temperature,
                DailyStep::Moisture,
                DailyStep::Organic,
                DailyStep::Transport,
                DailyStep::Crop,
                DailyStep::Observe,
            )
                .chain(),
        );

        // Shared state and parameter blocks. Parameter resources are plain
        // values constructed once; setups may replace them before the first
        // update.
        app.init_resource::<SimTotals>()
            .init_resource::<params::SiteParameters>()
            .init_resource::<params::EnvironmentParameters>()
            .init_resource::<params::SoilTemperatureParams>()
            .init_resource::<params::SoilMoistureParams>()
            .init_resource::<params::SoilOrganicParams>()
            .init_resource::<params::SoilTransportParams>()
            .init_resource::<params::CropModuleParams>()
            .init_resource::<soil_column::SoilColumn>()
            .init_resource::<crop::ActiveCrop>();

        app.add_plugins((
            climate::ClimatePlugin,
            management::ManagementPlugin,
            soil_temperature::SoilTemperaturePlugin,
            soil_moisture::SoilMoisturePlugin,
            soil_organic::SoilOrganicPlugin,
            soil_transport::SoilTransportPlugin,
            crop_growth::CropGrowthPlugin,
            diagnostics::DiagnosticsPlugin,
            observation::ObservationPlugin,
        ));
    }
}
