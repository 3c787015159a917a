//! Parameter blocks consumed by the process modules.
//!
//! All of these are plain value types constructed once at simulation start
//! and read-only afterwards. Defaults follow the published parameter set of
//! the model family this engine belongs to; a setup file may replace any
//! block wholesale before the first update.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

// =============================================================================
// Site and environment
// =============================================================================

/// Fixed properties of the simulated site.
#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
pub struct SiteParameters {
    /// Geographic latitude [deg], positive north.
    pub latitude: f64,
    /// Ground slope [m m-1].
    pub slope: f64,
    /// Height above sea level [m].
    pub height_nn: f64,
    /// C:N ratio of the stabilised soil organic matter.
    pub soil_cn_ratio: f64,
    /// Annual atmospheric N deposition [kg N ha-1 a-1].
    pub n_deposition: f64,
    /// Deepest groundwater table over the year [m].
    pub max_groundwater_depth: f64,
    /// Shallowest groundwater table over the year [m].
    pub min_groundwater_depth: f64,
    /// Month (1-12) in which the groundwater table is shallowest.
    pub min_groundwater_depth_month: u32,
}

impl Default for SiteParameters {
    fn default() -> Self {
        Self {
            latitude: 52.5,
            slope: 0.01,
            height_nn: 50.0,
            soil_cn_ratio: 10.0,
            n_deposition: 20.0,
            max_groundwater_depth: 18.0,
            min_groundwater_depth: 16.0,
            min_groundwater_depth_month: 3,
        }
    }
}

/// Discretisation and boundary settings of the simulated column.
#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentParameters {
    /// Vertical extent of one layer [m].
    pub layer_thickness: f64,
    /// Number of layers in the column.
    pub number_of_layers: usize,
    /// Depth at which leaching leaves the accounted profile [m].
    pub leaching_depth: f64,
    /// Surface albedo [].
    pub albedo: f64,
    /// Fixed atmospheric CO2 concentration [ppm]; when absent an empirical
    /// year curve supplies the value.
    pub atmospheric_co2: Option<f64>,
    /// Height of the wind speed measurement [m].
    pub wind_speed_height: f64,
    /// Time step [d]; the core runs at exactly one day.
    pub time_step: f64,
    /// Maximum depth down to which mineralisation is computed [m].
    pub max_mineralisation_depth: f64,
    /// Depth over which plant available water controls the irrigation
    /// trigger [m].
    pub critical_moisture_depth: f64,
}

impl Default for EnvironmentParameters {
    fn default() -> Self {
        Self {
            layer_thickness: crate::config::DEFAULT_LAYER_THICKNESS,
            number_of_layers: crate::config::DEFAULT_LAYER_COUNT,
            leaching_depth: 1.6,
            albedo: 0.23,
            atmospheric_co2: None,
            wind_speed_height: 2.0,
            time_step: 1.0,
            max_mineralisation_depth: crate::config::DEFAULT_MAX_MINERALISATION_DEPTH,
            critical_moisture_depth: 0.3,
        }
    }
}

// =============================================================================
// Soil temperature
// =============================================================================

#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
pub struct SoilTemperatureParams {
    /// Temperature of the fixed bottom node; annual mean air temperature [°C].
    pub base_temperature: f64,
    /// Surface temperature at simulation start [°C].
    pub initial_surface_temperature: f64,
    /// Geometry stretch factor for the virtual node volumes [].
    pub n_tau: f64,
    /// Raw density of quartz [kg m-3].
    pub quartz_raw_density: f64,
    pub density_air: f64,
    pub density_water: f64,
    pub density_humus: f64,
    /// Specific heat capacities [J kg-1 K-1].
    pub specific_heat_capacity_air: f64,
    pub specific_heat_capacity_quartz: f64,
    pub specific_heat_capacity_water: f64,
    pub specific_heat_capacity_humus: f64,
    /// Constant volumetric moisture used by the heat capacity term when the
    /// column has not produced a moisture state yet [m3 m-3].
    pub soil_moisture_const: f64,
    /// Damping weight of the previous day's surface temperature [].
    pub damping_factor: f64,
}

impl Default for SoilTemperatureParams {
    fn default() -> Self {
        Self {
            base_temperature: 9.5,
            initial_surface_temperature: 10.0,
            n_tau: 0.65,
            quartz_raw_density: 2650.0,
            density_air: 1.25,
            density_water: 1000.0,
            density_humus: 1300.0,
            specific_heat_capacity_air: 1005.0,
            specific_heat_capacity_quartz: 750.0,
            specific_heat_capacity_water: 4192.0,
            specific_heat_capacity_humus: 1935.0,
            soil_moisture_const: 0.25,
            damping_factor: 0.8,
        }
    }
}

// =============================================================================
// Soil moisture (snow, frost, water budget)
// =============================================================================

#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
pub struct SoilMoistureParams {
    /// Base temperature for snowmelt [°C].
    pub snow_melt_temperature: f64,
    /// Above this air temperature all precipitation falls as rain [°C].
    pub snow_accumulation_threshold: f64,
    /// Below this air temperature all precipitation falls as snow [°C].
    pub temperature_limit_for_liquid_water: f64,
    /// Precipitation correction multipliers [].
    pub correction_rain: f64,
    pub correction_snow: f64,
    /// Base temperature for refreezing of liquid water in the snow pack [°C].
    pub refreeze_temperature: f64,
    pub refreeze_p1: f64,
    pub refreeze_p2: f64,
    /// Density of newly fallen snow [kg dm-3].
    pub new_snow_density_min: f64,
    /// Maximum density gain of a settling snow pack [kg dm-3].
    pub snow_max_additional_density: f64,
    /// Snow packing factor per day [].
    pub snow_packing: f64,
    /// Liquid water retention capacity bounds of the snow pack [].
    pub snow_retention_capacity_min: f64,
    pub snow_retention_capacity_max: f64,
    /// Surface roughness [m].
    pub surface_roughness: f64,
    /// Multiplier on saturated conductivity for infiltration [].
    pub hydraulic_conductivity_redux: f64,
    /// Water flux into the groundwater body at the water table [mm d-1].
    pub groundwater_discharge: f64,
    /// Upper bound of the layer-to-layer percolation rate [mm d-1].
    pub max_percolation_rate: f64,
    /// Crop coefficient applied to ET0 when no crop is planted [].
    pub kc_factor: f64,
    /// Saturated hydraulic conductivity of the top layer [mm d-1].
    pub saturated_hydraulic_conductivity: f64,
    /// Shape factor of the evaporation depth decay [].
    pub evaporation_zeta: f64,
    /// Slope parameter of the soil moisture evaporation reducer [].
    pub xsa_critical_soil_moisture: f64,
    /// Number of layers evaporation can reach [].
    pub maximum_evaporation_impact_depth: f64,
}

impl Default for SoilMoistureParams {
    fn default() -> Self {
        Self {
            snow_melt_temperature: 0.31,
            snow_accumulation_threshold: 1.8,
            temperature_limit_for_liquid_water: -3.0,
            correction_rain: 1.0,
            correction_snow: 1.14,
            refreeze_temperature: -1.7,
            refreeze_p1: 1.5,
            refreeze_p2: 0.36,
            new_snow_density_min: 0.1,
            snow_max_additional_density: 0.25,
            snow_packing: 0.01,
            snow_retention_capacity_min: 0.05,
            snow_retention_capacity_max: 0.17,
            surface_roughness: 0.02,
            hydraulic_conductivity_redux: 0.1,
            groundwater_discharge: 3.0,
            max_percolation_rate: 10.0,
            kc_factor: 0.75,
            saturated_hydraulic_conductivity: 8640.0,
            evaporation_zeta: 40.0,
            xsa_critical_soil_moisture: 0.1,
            maximum_evaporation_impact_depth: 5.0,
        }
    }
}

// =============================================================================
// Soil organic matter
// =============================================================================

#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
pub struct SoilOrganicParams {
    /// Standard first-order decomposition coefficients [d-1].
    pub som_slow_dec_coeff_standard: f64,
    pub som_fast_dec_coeff_standard: f64,
    /// Microbial biomass maintenance and death rate coefficients [d-1].
    pub smb_slow_maint_rate_standard: f64,
    pub smb_fast_maint_rate_standard: f64,
    pub smb_slow_death_rate_standard: f64,
    pub smb_fast_death_rate_standard: f64,
    /// Substrate utilisation efficiencies [].
    pub smb_utilization_efficiency: f64,
    pub som_slow_utilization_efficiency: f64,
    pub som_fast_utilization_efficiency: f64,
    pub aom_slow_utilization_efficiency: f64,
    pub aom_fast_utilization_efficiency: f64,
    /// Cap of the dynamically derived fast-AOM C:N ratio [].
    pub aom_fast_max_c_to_n: f64,
    /// Flow partitions between pools [].
    pub part_som_fast_to_som_slow: f64,
    pub part_smb_slow_to_som_fast: f64,
    pub part_smb_fast_to_som_fast: f64,
    pub part_som_to_smb_slow: f64,
    pub part_som_to_smb_fast: f64,
    /// C:N ratio of the microbial biomass [].
    pub cn_ratio_smb: f64,
    /// Clay content beyond which the clay protection effect saturates [kg kg-1].
    pub limit_clay_effect: f64,
    /// Nitrification rate coefficients [d-1].
    pub ammonia_oxidation_rate_coeff_standard: f64,
    pub nitrite_oxidation_rate_coeff_standard: f64,
    /// Denitrification parameters.
    pub transport_rate_coeff: f64,
    pub spec_anaerob_denitrification: f64,
    pub denit1: f64,
    pub denit2: f64,
    pub denit3: f64,
    /// Fraction of mineral N immobilisable per day [].
    pub immobilisation_rate_coeff_nh4: f64,
    pub immobilisation_rate_coeff_no3: f64,
    /// Urea hydrolysis parameters.
    pub hydrolysis_km: f64,
    pub hydrolysis_p1: f64,
    pub hydrolysis_p2: f64,
    pub activation_energy: f64,
    /// Fraction of nitrite converted to N2O per day at full response [].
    pub n2o_production_rate: f64,
    /// NH3 inhibition constant of nitrite oxidation [kg N m-3].
    pub inhibitor_nh3: f64,
}

impl Default for SoilOrganicParams {
    fn default() -> Self {
        Self {
            som_slow_dec_coeff_standard: 4.30e-5,
            som_fast_dec_coeff_standard: 1.40e-4,
            smb_slow_maint_rate_standard: 1.00e-3,
            smb_fast_maint_rate_standard: 1.00e-2,
            smb_slow_death_rate_standard: 1.00e-3,
            smb_fast_death_rate_standard: 1.00e-2,
            smb_utilization_efficiency: 0.60,
            som_slow_utilization_efficiency: 0.40,
            som_fast_utilization_efficiency: 0.50,
            aom_slow_utilization_efficiency: 0.40,
            aom_fast_utilization_efficiency: 0.10,
            aom_fast_max_c_to_n: 1000.0,
            part_som_fast_to_som_slow: 0.30,
            part_smb_slow_to_som_fast: 0.60,
            part_smb_fast_to_som_fast: 0.60,
            part_som_to_smb_slow: 0.0150,
            part_som_to_smb_fast: 0.0002,
            cn_ratio_smb: 6.70,
            limit_clay_effect: 0.25,
            ammonia_oxidation_rate_coeff_standard: 0.10,
            nitrite_oxidation_rate_coeff_standard: 0.20,
            transport_rate_coeff: 0.10,
            spec_anaerob_denitrification: 0.10,
            denit1: 0.2,
            denit2: 0.8,
            denit3: 0.9,
            immobilisation_rate_coeff_nh4: 0.5,
            immobilisation_rate_coeff_no3: 0.5,
            hydrolysis_km: 0.00334,
            hydrolysis_p1: 4.259e-12,
            hydrolysis_p2: 1.408e-12,
            activation_energy: 41_000.0,
            n2o_production_rate: 0.5,
            inhibitor_nh3: 1.0,
        }
    }
}

/// Physical constants of the organic matter chemistry.
pub mod organic_constants {
    /// Carbon content of added organic matter [kg C kg OM-1].
    pub const AOM_TO_C: f64 = 0.45;
    /// Carbon content of soil organic matter [kg C kg OM-1].
    pub const SOM_TO_C: f64 = 0.57;
    /// Molecular weight of urea [kg mol-1].
    pub const UREA_MOLECULAR_WEIGHT: f64 = 0.06006;
    /// N mass fraction of urea [].
    pub const UREA_TO_N: f64 = 0.46667;
    /// Molecular weight of NH3 [kg mol-1].
    pub const NH3_MOLECULAR_WEIGHT: f64 = 0.01703;
    /// Molecular weight of NH4 [kg mol-1].
    pub const NH4_MOLECULAR_WEIGHT: f64 = 0.01807;
    /// Acid dissociation constants.
    pub const PKA_HNO2: f64 = 3.29;
    pub const PKA_NH3: f64 = 6.5;
    /// Universal gas constant [J mol-1 K-1].
    pub const GAS_CONSTANT: f64 = 8.314;
}

// =============================================================================
// Soil transport
// =============================================================================

#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
pub struct SoilTransportParams {
    /// Dispersion length [m].
    pub dispersion_length: f64,
    /// Molecular diffusion coefficient in free water [m2 d-1].
    pub diffusion_coefficient_standard: f64,
    /// NO3 floor below which no transport or uptake removes more N [kg N m-3].
    pub minimum_available_n: f64,
}

impl Default for SoilTransportParams {
    fn default() -> Self {
        Self {
            dispersion_length: 0.049,
            diffusion_coefficient_standard: 0.000214,
            minimum_available_n: 7.5e-5,
        }
    }
}

// =============================================================================
// Crop module ambient parameters
// =============================================================================

/// Crop-independent parameters of the crop growth routines.
#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
pub struct CropModuleParams {
    /// Albedo of the FAO short grass reference surface [].
    pub reference_albedo: f64,
    /// Canopy reflection coefficient [].
    pub canopy_reflection_coefficient: f64,
    /// Reference maximum CO2 assimilation rate [kg CO2 ha-1 h-1].
    pub reference_max_assimilation_rate: f64,
    /// LAI of the reference canopy [].
    pub reference_leaf_area_index: f64,
    /// Maintenance respiration coefficients [].
    pub maintenance_respiration_p1: f64,
    pub maintenance_respiration_p2: f64,
    /// Reduction of assimilates lost to growth respiration [].
    pub growth_respiration_redux: f64,
    /// Mineral N a layer cannot be depleted below by root uptake [kg N m-2].
    pub minimum_available_n: f64,
    /// Upper bound of the daily crop N demand [kg N ha-1 d-1].
    pub max_crop_n_demand: f64,
    /// Shape parameter of the N uptake saturation curve [].
    pub saturation_beta: f64,
}

impl Default for CropModuleParams {
    fn default() -> Self {
        Self {
            reference_albedo: 0.23,
            canopy_reflection_coefficient: 0.08,
            reference_max_assimilation_rate: 30.0,
            reference_leaf_area_index: 1.44,
            maintenance_respiration_p1: 0.08,
            maintenance_respiration_p2: 0.047,
            growth_respiration_redux: 0.7,
            minimum_available_n: 7.5e-5,
            max_crop_n_demand: 6.0,
            saturation_beta: 2.5,
        }
    }
}

// =============================================================================
// Fertiliser catalogue entries
// =============================================================================

/// Partitioning of a mineral fertiliser into its N species.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MineralFertiliserPartition {
    pub id: String,
    /// Fractions summing to 1.
    pub nh4: f64,
    pub no3: f64,
    pub carbamid: f64,
}

impl MineralFertiliserPartition {
    pub fn new(id: &str, nh4: f64, no3: f64, carbamid: f64) -> Self {
        Self {
            id: id.to_string(),
            nh4,
            no3,
            carbamid,
        }
    }

    /// Calcium ammonium nitrate, the usual default.
    pub fn calcium_ammonium_nitrate() -> Self {
        Self::new("CAN", 0.5, 0.5, 0.0)
    }

    pub fn urea() -> Self {
        Self::new("U", 0.0, 0.0, 1.0)
    }
}

/// Initialisation parameters of an organic fertiliser or residue input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganicFertiliserParams {
    pub id: String,
    /// Dry matter content of the fresh mass [kg DM kg FM-1].
    pub aom_dry_matter_content: f64,
    /// Mineral N species contents of the dry matter [kg N kg DM-1].
    pub aom_nh4_content: f64,
    pub aom_no3_content: f64,
    pub aom_carbamid_content: f64,
    /// Standard decomposition coefficients of the created AOM pool [d-1].
    pub aom_slow_dec_coeff_standard: f64,
    pub aom_fast_dec_coeff_standard: f64,
    /// Partition of the added carbon into the slow and fast AOM fractions;
    /// the remainder goes directly to SOM fast [].
    pub part_aom_to_aom_slow: f64,
    pub part_aom_to_aom_fast: f64,
    /// C:N ratios of the fractions; a fast ratio of 0 requests dynamic
    /// derivation from the actual C and N added (plant residues).
    pub cn_ratio_aom_slow: f64,
    pub cn_ratio_aom_fast: f64,
    /// Routing of decomposed slow AOM into the microbial pools [].
    pub part_aom_slow_to_smb_slow: f64,
    pub part_aom_slow_to_smb_fast: f64,
}

impl OrganicFertiliserParams {
    /// Cattle slurry, a reasonable catalogue default.
    pub fn cattle_slurry() -> Self {
        Self {
            id: "CAS".to_string(),
            aom_dry_matter_content: 0.1,
            aom_nh4_content: 0.05,
            aom_no3_content: 0.0,
            aom_carbamid_content: 0.0,
            aom_slow_dec_coeff_standard: 2.0e-4,
            aom_fast_dec_coeff_standard: 2.0e-3,
            part_aom_to_aom_slow: 0.72,
            part_aom_to_aom_fast: 0.18,
            cn_ratio_aom_slow: 100.0,
            cn_ratio_aom_fast: 6.5,
            part_aom_slow_to_smb_slow: 0.0,
            part_aom_slow_to_smb_fast: 1.0,
        }
    }

    /// Crop residues; the fast C:N ratio is derived dynamically on addition.
    pub fn crop_residue() -> Self {
        Self {
            id: "RES".to_string(),
            aom_dry_matter_content: 1.0,
            aom_nh4_content: 0.0,
            aom_no3_content: 0.0,
            aom_carbamid_content: 0.0,
            aom_slow_dec_coeff_standard: 1.2e-4,
            aom_fast_dec_coeff_standard: 1.2e-3,
            part_aom_to_aom_slow: 0.67,
            part_aom_to_aom_fast: 0.33,
            cn_ratio_aom_slow: 100.0,
            cn_ratio_aom_fast: 0.0,
            part_aom_slow_to_smb_slow: 0.5,
            part_aom_slow_to_smb_fast: 0.5,
        }
    }
}

// =============================================================================
// Per-layer soil input
// =============================================================================

/// Texture class tag; selects the capillary rise rate curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextureClass {
    Sand,
    LoamySand,
    SandyLoam,
    Loam,
    SiltLoam,
    Silt,
    ClayLoam,
    Clay,
}

impl TextureClass {
    /// Capillary rise rate [m d-1] for a given distance between layer and
    /// groundwater table [dm]. Rates decline with distance and vanish beyond
    /// a class-specific reach; silty soils sustain rise the furthest.
    pub fn capillary_rise_rate(self, distance_dm: usize) -> f64 {
        let (rate_at_1dm, reach_dm, decay) = match self {
            TextureClass::Sand => (0.0055, 12, 0.45),
            TextureClass::LoamySand => (0.0050, 14, 0.35),
            TextureClass::SandyLoam => (0.0048, 17, 0.25),
            TextureClass::Loam => (0.0045, 22, 0.18),
            TextureClass::SiltLoam => (0.0042, 27, 0.12),
            TextureClass::Silt => (0.0040, 27, 0.10),
            TextureClass::ClayLoam => (0.0030, 20, 0.20),
            TextureClass::Clay => (0.0015, 12, 0.30),
        };
        if distance_dm == 0 || distance_dm > reach_dm {
            return 0.0;
        }
        rate_at_1dm * (-decay * (distance_dm as f64 - 1.0)).exp()
    }
}

/// Static description of one soil layer as supplied by the setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoilParameters {
    /// Mass fractions of the fine earth plus stones [kg kg-1].
    pub sand: f64,
    pub clay: f64,
    pub stone: f64,
    pub texture: TextureClass,
    pub ph: f64,
    /// Bulk density [kg m-3].
    pub bulk_density: f64,
    /// Volumetric hydraulic constants [m3 m-3].
    pub field_capacity: f64,
    pub saturation: f64,
    pub permanent_wilting_point: f64,
    /// Conductivity shape parameter; derived from texture when absent [].
    pub lambda: Option<f64>,
    /// Organic carbon mass fraction [kg C kg-1].
    pub soil_organic_carbon: f64,
    /// C:N ratio of this layer's stabilised organic matter.
    pub cn_ratio: f64,
    /// Initial mineral N contents [kg N m-3].
    pub initial_nh4: Option<f64>,
    pub initial_no3: Option<f64>,
    /// Initial moisture as percent of field capacity.
    pub moisture_percent_fc: f64,
}

impl SoilParameters {
    /// Silt mass fraction of the fine earth, derived.
    pub fn silt(&self) -> f64 {
        (1.0 - self.sand - self.clay).max(0.0)
    }

    /// Conductivity shape parameter; falls back to a texture-derived value.
    pub fn lambda_value(&self) -> f64 {
        self.lambda
            .unwrap_or_else(|| lambda_from_texture(self.sand, self.clay))
    }

    /// Reject physically impossible texture or hydraulics. The caller skips
    /// offending layers and records the message.
    pub fn validate(&self) -> Result<(), String> {
        if self.sand < 0.0 || self.clay < 0.0 || self.stone < 0.0 {
            return Err("negative texture fraction".to_string());
        }
        if self.sand + self.clay + self.stone > 1.0 + 1e-9 {
            return Err(format!(
                "sand + clay + stone = {:.3} exceeds 1",
                self.sand + self.clay + self.stone
            ));
        }
        if !(self.permanent_wilting_point <= self.field_capacity
            && self.field_capacity <= self.saturation)
        {
            return Err("requires pwp <= field capacity <= saturation".to_string());
        }
        if !self.bulk_density.is_finite() || self.bulk_density <= 0.0 {
            return Err("bulk density must be positive".to_string());
        }
        Ok(())
    }
}

impl Default for SoilParameters {
    /// A generic loam layer.
    fn default() -> Self {
        Self {
            sand: 0.4,
            clay: 0.2,
            stone: 0.0,
            texture: TextureClass::Loam,
            ph: 6.5,
            bulk_density: 1400.0,
            field_capacity: 0.33,
            saturation: 0.45,
            permanent_wilting_point: 0.12,
            lambda: None,
            soil_organic_carbon: 0.012,
            cn_ratio: 10.0,
            initial_nh4: None,
            initial_no3: None,
            moisture_percent_fc: 100.0,
        }
    }
}

/// Conductivity shape parameter from texture: sandy soils drain sharply,
/// clayey soils hold their gravitational water back.
pub fn lambda_from_texture(sand: f64, clay: f64) -> f64 {
    let silt = (1.0 - sand - clay).max(0.0);
    2.0 * sand * sand * 0.575 + clay * 0.1 + silt * 0.35
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_are_consistent() {
        let env = EnvironmentParameters::default();
        assert!(env.leaching_depth < env.layer_thickness * env.number_of_layers as f64);
        let site = SiteParameters::default();
        assert!(site.min_groundwater_depth <= site.max_groundwater_depth);
        assert!((1..=12).contains(&site.min_groundwater_depth_month));
    }

    #[test]
    fn test_fertiliser_partitions_sum_to_one() {
        for fp in [
            MineralFertiliserPartition::calcium_ammonium_nitrate(),
            MineralFertiliserPartition::urea(),
        ] {
            assert!((fp.nh4 + fp.no3 + fp.carbamid - 1.0).abs() < 1e-9, "{}", fp.id);
        }
    }

    #[test]
    fn test_lambda_from_texture_ordering() {
        let sandy = lambda_from_texture(0.9, 0.05);
        let loamy = lambda_from_texture(0.4, 0.2);
        let clayey = lambda_from_texture(0.1, 0.6);
        assert!(sandy > loamy);
        assert!(loamy > clayey);
    }

    #[test]
    fn test_capillary_rise_declines_with_distance() {
        let near = TextureClass::SiltLoam.capillary_rise_rate(2);
        let far = TextureClass::SiltLoam.capillary_rise_rate(10);
        assert!(near > far);
        assert!(far > 0.0);
        assert_eq!(TextureClass::SiltLoam.capillary_rise_rate(28), 0.0);
    }

    #[test]
    fn test_capillary_rise_sand_shorter_reach_than_silt() {
        assert_eq!(TextureClass::Sand.capillary_rise_rate(13), 0.0);
        assert!(TextureClass::Silt.capillary_rise_rate(13) > 0.0);
    }

    #[test]
    fn test_soil_parameters_validation() {
        let ok = SoilParameters::default();
        assert!(ok.validate().is_ok());

        let bad = SoilParameters {
            sand: 0.8,
            clay: 0.3,
            stone: 0.1,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let inverted = SoilParameters {
            field_capacity: 0.5,
            saturation: 0.4,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_silt_derived() {
        let sp = SoilParameters {
            sand: 0.4,
            clay: 0.2,
            ..Default::default()
        };
        assert!((sp.silt() - 0.4).abs() < 1e-12);
    }
}
