//! Solar radiation geometry and FAO-56 Penman–Monteith reference
//! evapotranspiration.
//!
//! The radiation geometry is shared between the reference ET calculation
//! and the crop's photosynthesis routines.

use std::f64::consts::PI;

/// Stefan–Boltzmann constant in the FAO-56 daily formulation
/// [MJ K-4 m-2 d-1].
const BOLTZMANN_CONSTANT: f64 = 4.9e-9;

/// FAO default bulk stomatal resistance of the reference crop [s m-1].
const REFERENCE_STOMATA_RESISTANCE: f64 = 100.0;

/// Daily solar geometry for a site latitude and day of year.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadiationGeometry {
    /// Solar declination [deg].
    pub declination: f64,
    /// sin(declination) * sin(latitude).
    pub sin_term: f64,
    /// cos(declination) * cos(latitude).
    pub cos_term: f64,
    /// Day lengths [h].
    pub astronomic_day_length: f64,
    pub effective_day_length: f64,
    pub photoperiodic_day_length: f64,
    /// Mean photosynthetically active radiation [J m-2 d-1 scale].
    pub phot_act_radiation_mean: f64,
    /// Clear and overcast day radiation [J m-2].
    pub clear_day_radiation: f64,
    pub overcast_day_radiation: f64,
    /// Extraterrestrial radiation [MJ m-2 d-1].
    pub extraterrestrial_radiation: f64,
}

/// Compute the day's solar geometry.
pub fn radiation_geometry(julian_day: u32, latitude: f64) -> RadiationGeometry {
    let jd = julian_day as f64;
    let declination = -23.4 * (2.0 * PI * (jd + 10.0) / 365.0).cos();
    let sin_term = (declination * PI / 180.0).sin() * (latitude * PI / 180.0).sin();
    let cos_term = (declination * PI / 180.0).cos() * (latitude * PI / 180.0).cos();

    let day_length = |threshold_deg: f64| -> f64 {
        let arg = ((-(threshold_deg * PI / 180.0).sin()) + sin_term) / cos_term;
        12.0 * (PI + 2.0 * arg.clamp(-1.0, 1.0).asin()) / PI
    };

    let astronomic_day_length = {
        let arg = (sin_term / cos_term).clamp(-1.0, 1.0);
        12.0 * (PI + 2.0 * arg.asin()) / PI
    };
    let effective_day_length = day_length(8.0);
    let photoperiodic_day_length = day_length(-6.0);

    let ratio_sq = ((sin_term / cos_term) * (sin_term / cos_term)).min(1.0);
    let phot_act_radiation_mean =
        3600.0 * (sin_term * astronomic_day_length + 24.0 / PI * cos_term * (1.0 - ratio_sq).sqrt());

    let clear_day_radiation = if phot_act_radiation_mean > 0.0 && astronomic_day_length > 0.0 {
        0.5 * 1300.0
            * phot_act_radiation_mean
            * (-0.14 / (phot_act_radiation_mean / (astronomic_day_length * 3600.0))).exp()
    } else {
        0.0
    };
    let overcast_day_radiation = 0.2 * clear_day_radiation;

    let solar_constant_term = 24.0 * 60.0 / PI * 8.20 * (1.0 + 0.033 * (2.0 * PI * jd / 365.0).cos());
    let sunset_hour_angle = (-(latitude * PI / 180.0).tan() * (declination * PI / 180.0).tan())
        .clamp(-1.0, 1.0)
        .acos();
    let extraterrestrial_radiation = solar_constant_term
        * (sunset_hour_angle * sin_term + cos_term * sunset_hour_angle.sin())
        / 100.0;

    RadiationGeometry {
        declination,
        sin_term,
        cos_term,
        astronomic_day_length,
        effective_day_length,
        photoperiodic_day_length,
        phot_act_radiation_mean,
        clear_day_radiation,
        overcast_day_radiation,
        extraterrestrial_radiation,
    }
}

/// Weather inputs of the reference ET calculation.
#[derive(Debug, Clone, Copy)]
pub struct Et0Inputs {
    pub height_nn: f64,
    pub tmax: f64,
    pub tmin: f64,
    pub tmean: f64,
    /// Relative humidity [0-1]; non-positive values request the FAO dew
    /// point fallback (dew point at tmin).
    pub relhumid: f64,
    pub wind_speed: f64,
    pub wind_speed_height: f64,
    pub globrad: f64,
    pub julian_day: u32,
    pub latitude: f64,
    pub reference_albedo: f64,
}

/// FAO-56 Penman–Monteith reference evapotranspiration [mm d-1].
pub fn reference_evapotranspiration(inputs: &Et0Inputs) -> f64 {
    let geometry = radiation_geometry(inputs.julian_day, inputs.latitude);

    let atmospheric_pressure =
        101.3 * ((293.0 - 0.0065 * inputs.height_nn) / 293.0).powf(5.26);
    let psychrometer_constant = 0.000665 * atmospheric_pressure;

    let svp = |t: f64| 0.6108 * ((17.27 * t) / (237.3 + t)).exp();
    let saturated_vapour_pressure = (svp(inputs.tmax) + svp(inputs.tmin)) / 2.0;

    let vapour_pressure = if inputs.relhumid <= 0.0 {
        svp(inputs.tmin)
    } else {
        inputs.relhumid * saturated_vapour_pressure
    };
    let saturation_deficit = saturated_vapour_pressure - vapour_pressure;

    let slope = 4098.0 * svp(inputs.tmean) / ((inputs.tmean + 237.3) * (inputs.tmean + 237.3));

    // Logarithmic wind profile to 2 m, floored at the FAO minimum.
    let wind_2m = (inputs.wind_speed * 4.87
        / (67.8 * inputs.wind_speed_height - 5.42).ln())
    .max(0.5);

    let surface_resistance = REFERENCE_STOMATA_RESISTANCE / 1.44;

    let clear_sky_radiation =
        (0.75 + 0.00002 * inputs.height_nn) * geometry.extraterrestrial_radiation;
    let relative_shortwave = if clear_sky_radiation > 0.0 {
        (inputs.globrad / clear_sky_radiation).min(1.0)
    } else {
        1.0
    };

    let shortwave_radiation = (1.0 - inputs.reference_albedo) * inputs.globrad;
    let longwave_radiation = BOLTZMANN_CONSTANT
        * (((inputs.tmin + 273.16).powi(4) + (inputs.tmax + 273.16).powi(4)) / 2.0)
        * (1.35 * relative_shortwave - 0.35)
        * (0.34 - 0.14 * vapour_pressure.sqrt());
    let net_radiation = shortwave_radiation - longwave_radiation;

    let et0 = (0.408 * slope * net_radiation
        + psychrometer_constant * (900.0 / (inputs.tmean + 273.0)) * wind_2m * saturation_deficit)
        / (slope + psychrometer_constant * (1.0 + surface_resistance / 208.0 * wind_2m));

    et0.max(0.0)
}
