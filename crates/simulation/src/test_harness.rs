//! # TestPlot — headless integration test harness
//!
//! Wraps a headless `App` + `SimulationPlugin` behind a fluent builder.
//! Each call to `run_days` advances virtual time by exactly one fixed
//! period per day, so tests are fully deterministic.

use std::time::Duration;

use bevy::app::App;
use bevy::prelude::*;
use bevy::time::TimeUpdateStrategy;

use crate::climate::{ClimateRecord, ClimateSeries, SimClock};
use crate::crop::ActiveCrop;
use crate::diagnostics::DiagnosticsSink;
use crate::frost::FrostState;
use crate::management::ManagementPlan;
use crate::observation::DailyObservation;
use crate::params::{EnvironmentParameters, SiteParameters, SoilParameters};
use crate::snow::SnowState;
use crate::soil_column::SoilColumn;
use crate::soil_moisture::SoilMoistureState;
use crate::soil_organic::SoilOrganicState;
use crate::soil_transport::SoilTransportState;
use crate::{SimTotals, SimulationPlugin, DAY_TICK_SECONDS};

pub struct TestPlot {
    app: App,
}

impl TestPlot {
    /// A 2 m loam column under one year of mild, dry weather.
    pub fn new() -> Self {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins);
        app.add_plugins(SimulationPlugin);

        // One update == one simulated day, independent of wall-clock time.
        app.insert_resource(TimeUpdateStrategy::ManualDuration(Duration::from_secs_f64(
            DAY_TICK_SECONDS,
        )));

        // Prime the app while the climate series is still empty; the clock
        // stays inactive, so no simulation day is consumed here.
        app.update();

        let env = EnvironmentParameters::default();
        app.insert_resource(SoilColumn::from_profile(
            &vec![SoilParameters::default(); env.number_of_layers],
            &env,
        ));
        app.insert_resource(ClimateSeries {
            records: crate::climate::test_support::mild_series(365),
        });

        Self { app }
    }

    // -----------------------------------------------------------------------
    // Builders
    // -----------------------------------------------------------------------

    pub fn with_soil_profile(mut self, profile: &[SoilParameters]) -> Self {
        let env = self.app.world().resource::<EnvironmentParameters>().clone();
        self.app
            .insert_resource(SoilColumn::from_profile(profile, &env));
        self
    }

    pub fn with_climate(mut self, records: Vec<ClimateRecord>) -> Self {
        self.app.insert_resource(ClimateSeries { records });
        self
    }

    pub fn with_site(mut self, site: SiteParameters) -> Self {
        self.app.insert_resource(site);
        self
    }

    pub fn with_management(mut self, plan: ManagementPlan) -> Self {
        self.app.insert_resource(plan);
        self
    }

    /// Set every layer's moisture to the given fraction of field capacity.
    pub fn with_moisture_at_fc_fraction(mut self, fraction: f64) -> Self {
        let mut column = self.app.world_mut().resource_mut::<SoilColumn>();
        for layer in &mut column.layers {
            layer.moisture = layer.field_capacity() * fraction;
        }
        self
    }

    // -----------------------------------------------------------------------
    // Driving
    // -----------------------------------------------------------------------

    /// Advance the simulation by `n` days.
    pub fn run_days(&mut self, n: usize) {
        for _ in 0..n {
            self.app.update();
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn column(&self) -> &SoilColumn {
        self.app.world().resource::<SoilColumn>()
    }

    pub fn column_mut(&mut self) -> Mut<'_, SoilColumn> {
        self.app.world_mut().resource_mut::<SoilColumn>()
    }

    pub fn clock(&self) -> &SimClock {
        self.app.world().resource::<SimClock>()
    }

    pub fn crop(&self) -> &ActiveCrop {
        self.app.world().resource::<ActiveCrop>()
    }

    pub fn snow(&self) -> &SnowState {
        self.app.world().resource::<SnowState>()
    }

    pub fn frost(&self) -> &FrostState {
        self.app.world().resource::<FrostState>()
    }

    pub fn moisture_state(&self) -> &SoilMoistureState {
        self.app.world().resource::<SoilMoistureState>()
    }

    pub fn organic_state(&self) -> &SoilOrganicState {
        self.app.world().resource::<SoilOrganicState>()
    }

    pub fn transport_state(&self) -> &SoilTransportState {
        self.app.world().resource::<SoilTransportState>()
    }

    pub fn observation(&self) -> &DailyObservation {
        self.app.world().resource::<DailyObservation>()
    }

    pub fn totals(&self) -> &SimTotals {
        self.app.world().resource::<SimTotals>()
    }

    pub fn sink(&self) -> &DiagnosticsSink {
        self.app.world().resource::<DiagnosticsSink>()
    }
}

impl Default for TestPlot {
    fn default() -> Self {
        Self::new()
    }
}
