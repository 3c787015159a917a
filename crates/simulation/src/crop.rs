//! Crop parameter blocks and the state of the currently planted crop.
//!
//! Exactly one crop can be on the field at a time. It is created at sowing
//! from a catalogue parameter block and destroyed at harvest, leaving its
//! residues to the organic matter module.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// Number of modelled organs.
pub const ORGAN_COUNT: usize = 4;

/// Organ indices into the biomass and partitioning arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Organ {
    Root = 0,
    Leaf = 1,
    Shoot = 2,
    /// Storage organ carrying the primary yield.
    Fruit = 3,
}

impl Organ {
    pub const ALL: [Organ; ORGAN_COUNT] = [Organ::Root, Organ::Leaf, Organ::Shoot, Organ::Fruit];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Species/cultivar parameter block from the crop catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropParameters {
    pub id: String,
    pub name: String,

    /// Number of developmental stages; every per-stage vector has this
    /// length.
    pub number_of_stages: usize,
    /// Temperature response per stage [°C].
    pub base_temperature: Vec<f64>,
    pub optimum_temperature: Vec<f64>,
    /// Heat sum to complete each stage [°C d].
    pub stage_temperature_sum: Vec<f64>,
    /// Crop coefficient at the end of each stage [].
    pub stage_kc_factors: Vec<f64>,
    pub initial_kc_factor: f64,
    /// Vernalisation requirement per stage [d].
    pub vernalisation_requirement: Vec<f64>,
    /// Photoperiod response per stage [h].
    pub daylength_requirement: Vec<f64>,
    pub base_daylength: Vec<f64>,
    /// Transpiration-deficit threshold per stage below which growth and
    /// fertility suffer [].
    pub drought_stress_threshold: Vec<f64>,
    /// Critical volumetric air content per stage [].
    pub critical_oxygen_content: Vec<f64>,
    /// Specific leaf area per stage [m2 kg-1... ha kg-1 scale].
    pub specific_leaf_area: Vec<f64>,
    /// Assimilate partitioning per stage and organ; rows sum to <= 1.
    pub assimilate_partitioning: Vec<[f64; ORGAN_COUNT]>,
    /// Daily senescence rate per stage and organ [].
    pub organ_senescence_rate: Vec<[f64; ORGAN_COUNT]>,
    /// Maintenance and growth respiration coefficients per organ [].
    pub organ_maintenance_respiration: [f64; ORGAN_COUNT],
    pub organ_growth_respiration: [f64; ORGAN_COUNT],
    pub organ_aboveground: [bool; ORGAN_COUNT],
    /// Initial organ biomass at sowing [kg DM ha-1].
    pub initial_organ_biomass: [f64; ORGAN_COUNT],

    /// Maximum CO2 assimilation rate [kg CO2 ha-1 h-1].
    pub max_assimilation_rate: f64,
    pub min_temperature_for_assimilation: f64,
    pub optimum_temperature_for_assimilation: f64,
    pub max_temperature_for_assimilation: f64,

    pub max_crop_height: f64,
    pub max_crop_diameter: f64,
    /// Relative development at which height/diameter peak [].
    pub stage_at_max_height: f64,
    pub stage_at_max_diameter: f64,
    pub crop_height_p1: f64,
    pub crop_height_p2: f64,

    pub crop_specific_max_rooting_depth: f64,
    pub initial_rooting_depth: f64,
    /// Root front advance per degree day [m (°C d)-1].
    pub root_penetration_rate: f64,
    pub minimum_temperature_root_growth: f64,
    pub plant_density: f64,

    /// Critical N dilution curve coefficients.
    pub n_concentration_b0: f64,
    pub n_concentration_pn: f64,
    pub minimum_n_concentration: f64,
    pub n_concentration_root: f64,
    pub n_concentration_aboveground: f64,
    pub luxury_n_coeff: f64,
    pub max_n_uptake_param: f64,
    /// N concentration assigned to residues at harvest [kg N kg DM-1].
    pub residue_n_ratio: f64,
    pub fixing_n: bool,

    /// Heat sterility window on the total temperature sum scale [°C d].
    pub begin_sensitive_phase_heat_stress: f64,
    pub end_sensitive_phase_heat_stress: f64,
    pub critical_temperature_heat_stress: f64,
    pub limiting_temperature_heat_stress: f64,
    /// Air temperature below which the crop is killed [°C].
    pub frost_kill_temperature: f64,

    /// Heat-sum window of the automatic irrigation trigger [°C d].
    pub heat_sum_irrigation_start: f64,
    pub heat_sum_irrigation_end: f64,

    pub perennial: bool,
    /// Stage the crop is set back to after a cut.
    pub stage_after_cut: usize,
}

impl CropParameters {
    /// A six-stage winter cereal, the catalogue default used in tests.
    pub fn winter_wheat() -> Self {
        Self {
            id: "WW".to_string(),
            name: "winter wheat".to_string(),
            number_of_stages: 6,
            base_temperature: vec![0.0, 1.0, 1.0, 1.0, 9.0, 9.0],
            optimum_temperature: vec![30.0, 30.0, 30.0, 30.0, 30.0, 30.0],
            stage_temperature_sum: vec![148.0, 284.0, 380.0, 200.0, 420.0, 25.0],
            stage_kc_factors: vec![0.4, 0.7, 1.1, 1.1, 0.8, 0.25],
            initial_kc_factor: 0.4,
            vernalisation_requirement: vec![0.0, 50.0, 0.0, 0.0, 0.0, 0.0],
            daylength_requirement: vec![0.0, 20.0, 20.0, 0.0, 0.0, 0.0],
            base_daylength: vec![0.0, 7.0, 7.0, 0.0, 0.0, 0.0],
            drought_stress_threshold: vec![0.8, 0.8, 0.8, 0.8, 0.6, 0.5],
            critical_oxygen_content: vec![0.08; 6],
            specific_leaf_area: vec![0.002, 0.0019, 0.0019, 0.0016, 0.0014, 0.0014],
            assimilate_partitioning: vec![
                [0.50, 0.50, 0.00, 0.00],
                [0.20, 0.55, 0.25, 0.00],
                [0.13, 0.30, 0.57, 0.00],
                [0.00, 0.00, 0.30, 0.70],
                [0.00, 0.00, 0.00, 1.00],
                [0.00, 0.00, 0.00, 0.00],
            ],
            organ_senescence_rate: vec![
                [0.00, 0.00, 0.00, 0.00],
                [0.00, 0.00, 0.00, 0.00],
                [0.00, 0.003, 0.00, 0.00],
                [0.00, 0.01, 0.00, 0.00],
                [0.00, 0.03, 0.005, 0.00],
                [0.00, 0.05, 0.01, 0.00],
            ],
            organ_maintenance_respiration: [0.01, 0.03, 0.015, 0.01],
            organ_growth_respiration: [0.015, 0.03, 0.015, 0.01],
            organ_aboveground: [false, true, true, true],
            initial_organ_biomass: [53.0, 53.0, 0.0, 0.0],
            max_assimilation_rate: 30.0,
            min_temperature_for_assimilation: 4.0,
            optimum_temperature_for_assimilation: 25.0,
            max_temperature_for_assimilation: 35.0,
            max_crop_height: 0.83,
            max_crop_diameter: 0.005,
            stage_at_max_height: 0.6,
            stage_at_max_diameter: 0.5,
            crop_height_p1: 6.0,
            crop_height_p2: 0.5,
            crop_specific_max_rooting_depth: 1.3,
            initial_rooting_depth: 0.1,
            root_penetration_rate: 0.0011,
            minimum_temperature_root_growth: 1.3,
            plant_density: 220.0,
            n_concentration_b0: 5.3,
            n_concentration_pn: 0.44,
            minimum_n_concentration: 0.005,
            n_concentration_root: 0.02,
            n_concentration_aboveground: 0.06,
            luxury_n_coeff: 1.3,
            max_n_uptake_param: 3.145,
            residue_n_ratio: 0.75,
            fixing_n: false,
            begin_sensitive_phase_heat_stress: 720.0,
            end_sensitive_phase_heat_stress: 1260.0,
            critical_temperature_heat_stress: 31.0,
            limiting_temperature_heat_stress: 40.0,
            frost_kill_temperature: -25.0,
            heat_sum_irrigation_start: 100.0,
            heat_sum_irrigation_end: 1200.0,
            perennial: false,
            stage_after_cut: 2,
        }
    }

    /// Total heat sum from sowing to maturity [°C d].
    pub fn total_temperature_sum(&self) -> f64 {
        self.stage_temperature_sum.iter().sum()
    }
}

/// Daily state of the planted crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropState {
    pub params: CropParameters,

    /// Current developmental stage, 0 at sowing.
    pub developmental_stage: usize,
    /// Heat sum accumulated within each stage [°C d].
    pub stage_temperature_sums: Vec<f64>,
    pub current_total_temperature_sum: f64,
    pub vernalisation_days: f64,

    pub kc_factor: f64,
    pub leaf_area_index: f64,
    pub soil_coverage: f64,
    pub crop_height: f64,
    pub crop_diameter: f64,

    /// Living and senesced organ biomass [kg DM ha-1].
    pub organ_biomass: [f64; ORGAN_COUNT],
    pub organ_dead_biomass: [f64; ORGAN_COUNT],

    pub rooting_depth_m: f64,
    pub rooting_depth_layers: usize,

    /// Whole-plant N mass [kg N ha-1].
    pub total_biomass_n: f64,
    pub target_n_concentration: f64,
    pub critical_n_concentration: f64,
    /// N status factor, 1 = unstressed.
    pub crop_n_redux: f64,

    /// Interfaces to the soil modules, refreshed daily.
    pub transpiration_per_layer: Vec<f64>,
    pub n_uptake_from_layer: Vec<f64>,
    pub reference_evapotranspiration: f64,
    pub remaining_evapotranspiration: f64,
    pub evaporated_from_intercept: f64,
    pub interception_storage: f64,
    pub net_precipitation: f64,

    /// Carbon bookkeeping [kg C ha-1 d-1].
    pub gross_primary_production: f64,
    pub net_primary_production: f64,

    /// Stress factors of the day, 1 = unstressed.
    pub transpiration_deficit: f64,
    pub oxygen_deficit: f64,
    pub heat_stress_redux: f64,
    /// Fertility remaining after heat/frost/drought impact, scales the
    /// storage organ growth.
    pub fertility_factor: f64,

    pub accumulated_evapotranspiration: f64,
    pub accumulated_transpiration: f64,
    /// Exports removed by cuts and fruit harvests [kg DM ha-1].
    pub accumulated_cut_yield: f64,

    pub anthesis_day: Option<u32>,
    pub maturity_day: Option<u32>,
    pub dying_out: bool,
    pub days_since_sowing: u32,
}

impl CropState {
    pub fn new(params: CropParameters, number_of_soil_layers: usize) -> Self {
        let stages = params.number_of_stages;
        let initial_biomass = params.initial_organ_biomass;
        let initial_rooting_depth = params.initial_rooting_depth;
        let initial_kc = params.initial_kc_factor;
        let above_n = params.n_concentration_aboveground;
        let root_n = params.n_concentration_root;

        let mut state = Self {
            params,
            developmental_stage: 0,
            stage_temperature_sums: vec![0.0; stages],
            current_total_temperature_sum: 0.0,
            vernalisation_days: 0.0,
            kc_factor: initial_kc,
            leaf_area_index: 0.0,
            soil_coverage: 0.0,
            crop_height: 0.0,
            crop_diameter: 0.0,
            organ_biomass: initial_biomass,
            organ_dead_biomass: [0.0; ORGAN_COUNT],
            rooting_depth_m: initial_rooting_depth,
            rooting_depth_layers: 0,
            total_biomass_n: 0.0,
            target_n_concentration: above_n,
            critical_n_concentration: above_n * 0.6,
            crop_n_redux: 1.0,
            transpiration_per_layer: vec![0.0; number_of_soil_layers],
            n_uptake_from_layer: vec![0.0; number_of_soil_layers],
            reference_evapotranspiration: 0.0,
            remaining_evapotranspiration: 0.0,
            evaporated_from_intercept: 0.0,
            interception_storage: 0.0,
            net_precipitation: 0.0,
            gross_primary_production: 0.0,
            net_primary_production: 0.0,
            transpiration_deficit: 1.0,
            oxygen_deficit: 1.0,
            heat_stress_redux: 1.0,
            fertility_factor: 1.0,
            accumulated_evapotranspiration: 0.0,
            accumulated_transpiration: 0.0,
            accumulated_cut_yield: 0.0,
            anthesis_day: None,
            maturity_day: None,
            dying_out: false,
            days_since_sowing: 0,
        };
        state.total_biomass_n = state.organ_biomass[Organ::Root.index()] * root_n
            + state.above_ground_biomass() * above_n;
        state
    }

    /// Sum of living above-ground organ biomass [kg DM ha-1].
    pub fn above_ground_biomass(&self) -> f64 {
        Organ::ALL
            .iter()
            .filter(|o| self.params.organ_aboveground[o.index()])
            .map(|o| self.organ_biomass[o.index()])
            .sum()
    }

    pub fn total_biomass(&self) -> f64 {
        self.organ_biomass.iter().sum()
    }

    /// Storage organ biomass, the primary yield [kg DM ha-1].
    pub fn primary_yield(&self) -> f64 {
        self.organ_biomass[Organ::Fruit.index()]
    }

    /// Everything that stays on the field at harvest [kg DM ha-1].
    pub fn residue_biomass(&self) -> f64 {
        self.total_biomass() - self.primary_yield()
    }

    /// N concentration routed into residues at harvest.
    pub fn residue_n_concentration(&self) -> f64 {
        let total = self.total_biomass();
        if total <= 0.0 {
            return 0.0;
        }
        let mean_concentration = self.total_biomass_n / total;
        (mean_concentration * self.params.residue_n_ratio)
            .max(self.params.minimum_n_concentration)
    }

    /// Relative development through the whole cycle, 0..1.
    pub fn relative_development(&self) -> f64 {
        (self.current_total_temperature_sum / self.params.total_temperature_sum()).clamp(0.0, 1.0)
    }

    pub fn maturity_reached(&self) -> bool {
        self.developmental_stage >= self.params.number_of_stages - 1
    }
}

/// The crop currently on the field, if any.
#[derive(Resource, Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActiveCrop {
    pub crop: Option<CropState>,
}
