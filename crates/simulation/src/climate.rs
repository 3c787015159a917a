//! Climate series, simulation clock and per-day boundary conditions.
//!
//! `begin_day` resolves the current date's climate record into the
//! `CurrentWeather` resource together with the effective atmospheric CO2
//! concentration and groundwater depth, and resets the daily accumulators.
//! `advance_day` increments the clock at the very end of the daily chain.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::params::{EnvironmentParameters, SiteParameters};
use crate::{DailyStep, SimTotals};

/// One day of weather forcing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimateRecord {
    /// Day of year, 1..=366.
    pub julian_day: u32,
    pub year: i32,
    /// Air temperatures [°C].
    pub tmin: f64,
    pub tavg: f64,
    pub tmax: f64,
    /// Precipitation [mm].
    pub precip: f64,
    /// Global radiation [MJ m-2].
    pub globrad: f64,
    /// Relative humidity [0-1].
    pub relhumid: f64,
    /// Wind speed at measurement height [m s-1].
    pub wind: f64,
    /// Optional sunshine hours [h].
    pub sunshine_hours: Option<f64>,
    /// Optional reference evapotranspiration [mm]; takes precedence over
    /// every computed ET0 when present.
    pub et0: Option<f64>,
}

impl ClimateRecord {
    pub fn is_finite(&self) -> bool {
        self.tmin.is_finite()
            && self.tavg.is_finite()
            && self.tmax.is_finite()
            && self.precip.is_finite()
            && self.globrad.is_finite()
            && self.relhumid.is_finite()
            && self.wind.is_finite()
    }
}

/// The full, finite, ordered weather forcing of a run.
#[derive(Resource, Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClimateSeries {
    pub records: Vec<ClimateRecord>,
}

impl ClimateSeries {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Day counter of the run. `active` is true while the climate series still
/// has a record for the current day; every daily system early-returns when
/// it is false.
#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
pub struct SimClock {
    /// 0-based index into the climate series.
    pub day: u32,
    pub julian_day: u32,
    pub year: i32,
    pub active: bool,
}

impl Default for SimClock {
    fn default() -> Self {
        Self {
            day: 0,
            julian_day: 1,
            year: 0,
            active: false,
        }
    }
}

impl SimClock {
    pub fn is_leap_year(&self) -> bool {
        (self.year % 4 == 0 && self.year % 100 != 0) || self.year % 400 == 0
    }
}

/// Today's resolved boundary conditions.
#[derive(Resource, Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentWeather {
    pub record: Option<ClimateRecord>,
    /// Effective atmospheric CO2 concentration [ppm].
    pub co2: f64,
    /// Effective groundwater depth below surface [m].
    pub groundwater_depth: f64,
}

impl CurrentWeather {
    /// Panics only in tests; process systems guard on `SimClock::active`
    /// before touching the record.
    pub fn rec(&self) -> &ClimateRecord {
        self.record.as_ref().expect("no climate record resolved")
    }
}

/// Empirical atmospheric CO2 concentration [ppm] for a decimal date, used
/// when no fixed concentration is configured.
pub fn co2_for_date(year: i32, julian_day: u32, leap_year: bool) -> f64 {
    let days_in_year = if leap_year { 366.0 } else { 365.0 };
    let decimal_date = year as f64 + julian_day as f64 / days_in_year;
    222.0 + (0.01467 * (decimal_date - 1844.41)).exp() + 2.5 * ((decimal_date - 0.5) / 0.1592).sin()
}

/// Seasonal groundwater depth [m]: oscillates between the configured
/// minimum and maximum depth, shallowest mid `min_depth_month`.
pub fn groundwater_depth_for_date(
    min_depth: f64,
    max_depth: f64,
    min_depth_month: u32,
    julian_day: u32,
    leap_year: bool,
) -> f64 {
    let days_in_year = if leap_year { 366.0 } else { 365.0 };
    let mean_depth = (max_depth + min_depth) / 2.0;
    let amplitude = (max_depth - min_depth) / 2.0;
    let phase_day = min_depth_month as f64 * 30.0 - 15.0;
    let angle = ((julian_day as f64 - phase_day) / days_in_year * 360.0 - 90.0).to_radians();
    (mean_depth + amplitude * angle.sin()).clamp(min_depth.min(max_depth), max_depth.max(min_depth))
}

pub fn begin_day(
    series: Res<ClimateSeries>,
    site: Res<SiteParameters>,
    env: Res<EnvironmentParameters>,
    mut clock: ResMut<SimClock>,
    mut weather: ResMut<CurrentWeather>,
    mut totals: ResMut<SimTotals>,
) {
    let Some(record) = series.records.get(clock.day as usize) else {
        clock.active = false;
        weather.record = None;
        return;
    };

    clock.active = true;
    clock.julian_day = record.julian_day;
    clock.year = record.year;

    let leap = clock.is_leap_year();
    weather.co2 = env
        .atmospheric_co2
        .unwrap_or_else(|| co2_for_date(record.year, record.julian_day, leap));
    weather.groundwater_depth = groundwater_depth_for_date(
        site.min_groundwater_depth,
        site.max_groundwater_depth,
        site.min_groundwater_depth_month,
        record.julian_day,
        leap,
    );
    weather.record = Some(record.clone());

    totals.daily_mineral_fertiliser_n = 0.0;
    totals.daily_organic_fertiliser_n = 0.0;
    totals.daily_organic_fertiliser_dm = 0.0;
    totals.daily_irrigation_water = 0.0;
    totals.daily_irrigation_n = 0.0;
}

pub fn advance_day(mut clock: ResMut<SimClock>) {
    if clock.active {
        clock.day += 1;
    }
}

pub struct ClimatePlugin;

impl Plugin for ClimatePlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<ClimateSeries>()
            .init_resource::<SimClock>()
            .init_resource::<CurrentWeather>()
            .add_systems(FixedUpdate, begin_day.in_set(DailyStep::BeginDay))
            .add_systems(
                FixedUpdate,
                advance_day
                    .in_set(DailyStep::Observe)
                    .after(crate::observation::build_observation),
            );
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_co2_increases_over_decades() {
        let early = co2_for_date(1960, 180, false);
        let late = co2_for_date(2020, 180, false);
        assert!(late > early);
        assert!(early > 280.0 && early < 360.0, "got {early}");
        assert!(late > 380.0 && late < 460.0, "got {late}");
    }

    #[test]
    fn test_groundwater_depth_bounds() {
        for jd in [1u32, 60, 120, 180, 240, 300, 365] {
            let d = groundwater_depth_for_date(14.0, 18.0, 3, jd, false);
            assert!((14.0..=18.0).contains(&d), "day {jd}: {d}");
        }
    }

    #[test]
    fn test_groundwater_shallowest_near_min_month() {
        // Min depth month of March: mid March must be shallower than mid
        // September.
        let march = groundwater_depth_for_date(14.0, 18.0, 3, 75, false);
        let september = groundwater_depth_for_date(14.0, 18.0, 3, 258, false);
        assert!(march < september);
    }

    #[test]
    fn test_record_finiteness() {
        let mut rec = test_support::day(1);
        assert!(rec.is_finite());
        rec.tavg = f64::NAN;
        assert!(!rec.is_finite());
    }

    #[test]
    fn test_leap_year() {
        let clock = SimClock {
            year: 2000,
            ..Default::default()
        };
        assert!(clock.is_leap_year());
        let clock = SimClock {
            year: 1900,
            ..Default::default()
        };
        assert!(!clock.is_leap_year());
    }
}
