//! Checkpoint records mirroring the simulation state.
//!
//! The engine's own types stay serde-oriented; this module keeps flat
//! bitcode records and the conversions in both directions, so the wire
//! format is decoupled from the ECS resources.

use bitcode::{Decode, Encode};

use simulation::climate::SimClock;
use simulation::crop::{ActiveCrop, CropState, ORGAN_COUNT};
use simulation::frost::FrostState;
use simulation::management::CropCatalogue;
use simulation::params::{EnvironmentParameters, SoilParameters, TextureClass};
use simulation::snow::SnowState;
use simulation::soil_column::{AomPool, SoilColumn, SoilLayer};
use simulation::SimTotals;

use crate::file_header::{self, FLAG_COMPRESSED};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct AomRecord {
    pub aom_slow: f64,
    pub aom_fast: f64,
    pub slow_dec_coeff_standard: f64,
    pub fast_dec_coeff_standard: f64,
    pub part_aom_slow_to_smb_slow: f64,
    pub part_aom_slow_to_smb_fast: f64,
    pub cn_ratio_aom_slow: f64,
    pub cn_ratio_aom_fast: f64,
    pub days_after_application: u32,
    pub dry_matter_content: f64,
    pub nh4_content: f64,
    pub incorporated: bool,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct LayerRecord {
    // Static description, enough to rebuild the profile.
    pub sand: f64,
    pub clay: f64,
    pub stone: f64,
    pub texture: u8,
    pub ph: f64,
    pub bulk_density: f64,
    pub field_capacity: f64,
    pub saturation: f64,
    pub permanent_wilting_point: f64,
    pub lambda: Option<f64>,
    pub cn_ratio: f64,
    // Dynamic state.
    pub soil_organic_carbon: f64,
    pub moisture: f64,
    pub temperature: f64,
    pub frozen: bool,
    pub water_flux: f64,
    pub carbamid: f64,
    pub nh4: f64,
    pub no2: f64,
    pub no3: f64,
    pub som_slow: f64,
    pub som_fast: f64,
    pub smb_slow: f64,
    pub smb_fast: f64,
    pub aom_pools: Vec<AomRecord>,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct SnowRecord {
    pub depth: f64,
    pub density: f64,
    pub frozen_water: f64,
    pub liquid_water: f64,
    pub max_depth: f64,
    pub accumulated_depth: f64,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct FrostRecord {
    pub frost_depth: f64,
    pub thaw_depth: f64,
    pub negative_degree_days: f64,
    pub frost_days: u32,
    pub accumulated_frost_depth: f64,
    pub temperature_under_snow: f64,
    pub lambda_redux: Vec<f64>,
    pub hydraulic_conductivity_redux: f64,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct CropRecord {
    /// Catalogue id; the parameter block is resolved again on restore.
    pub crop_id: String,
    pub developmental_stage: u32,
    pub stage_temperature_sums: Vec<f64>,
    pub current_total_temperature_sum: f64,
    pub vernalisation_days: f64,
    pub kc_factor: f64,
    pub leaf_area_index: f64,
    pub soil_coverage: f64,
    pub crop_height: f64,
    pub organ_biomass: Vec<f64>,
    pub organ_dead_biomass: Vec<f64>,
    pub rooting_depth_m: f64,
    pub rooting_depth_layers: u32,
    pub total_biomass_n: f64,
    pub fertility_factor: f64,
    pub accumulated_evapotranspiration: f64,
    pub accumulated_transpiration: f64,
    pub accumulated_cut_yield: f64,
    pub days_since_sowing: u32,
    pub dying_out: bool,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct TotalsRecord {
    pub sum_mineral_fertiliser_n: f64,
    pub sum_organic_fertiliser_n: f64,
    pub sum_organic_fertiliser_dm: f64,
    pub days_with_crop: u32,
    pub accumulated_water_stress: f64,
    pub accumulated_heat_stress: f64,
    pub accumulated_n_stress: f64,
    pub accumulated_oxygen_stress: f64,
}

/// Everything a day-boundary checkpoint carries.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct CheckpointData {
    pub day: u32,
    pub julian_day: u32,
    pub year: i32,
    pub surface_water_storage: f64,
    pub interception_storage: f64,
    pub surface_temperature: f64,
    pub groundwater_table: u32,
    pub flux_at_lower_boundary: f64,
    pub layers: Vec<LayerRecord>,
    pub snow: SnowRecord,
    pub frost: FrostRecord,
    pub crop: Option<CropRecord>,
    pub totals: TotalsRecord,
}

// ---------------------------------------------------------------------------
// Texture tag <-> u8
// ---------------------------------------------------------------------------

fn texture_to_u8(texture: TextureClass) -> u8 {
    match texture {
        TextureClass::Sand => 0,
        TextureClass::LoamySand => 1,
        TextureClass::SandyLoam => 2,
        TextureClass::Loam => 3,
        TextureClass::SiltLoam => 4,
        TextureClass::Silt => 5,
        TextureClass::ClayLoam => 6,
        TextureClass::Clay => 7,
    }
}

fn u8_to_texture(value: u8) -> TextureClass {
    match value {
        0 => TextureClass::Sand,
        1 => TextureClass::LoamySand,
        2 => TextureClass::SandyLoam,
        4 => TextureClass::SiltLoam,
        5 => TextureClass::Silt,
        6 => TextureClass::ClayLoam,
        7 => TextureClass::Clay,
        _ => TextureClass::Loam,
    }
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

fn capture_layer(layer: &SoilLayer) -> LayerRecord {
    LayerRecord {
        sand: layer.params.sand,
        clay: layer.params.clay,
        stone: layer.params.stone,
        texture: texture_to_u8(layer.params.texture),
        ph: layer.params.ph,
        bulk_density: layer.params.bulk_density,
        field_capacity: layer.params.field_capacity,
        saturation: layer.params.saturation,
        permanent_wilting_point: layer.params.permanent_wilting_point,
        lambda: layer.params.lambda,
        cn_ratio: layer.params.cn_ratio,
        soil_organic_carbon: layer.soil_organic_carbon,
        moisture: layer.moisture,
        temperature: layer.temperature,
        frozen: layer.frozen,
        water_flux: layer.water_flux,
        carbamid: layer.carbamid,
        nh4: layer.nh4,
        no2: layer.no2,
        no3: layer.no3,
        som_slow: layer.som_slow,
        som_fast: layer.som_fast,
        smb_slow: layer.smb_slow,
        smb_fast: layer.smb_fast,
        aom_pools: layer
            .aom_pools
            .iter()
            .map(|p| AomRecord {
                aom_slow: p.aom_slow,
                aom_fast: p.aom_fast,
                slow_dec_coeff_standard: p.slow_dec_coeff_standard,
                fast_dec_coeff_standard: p.fast_dec_coeff_standard,
                part_aom_slow_to_smb_slow: p.part_aom_slow_to_smb_slow,
                part_aom_slow_to_smb_fast: p.part_aom_slow_to_smb_fast,
                cn_ratio_aom_slow: p.cn_ratio_aom_slow,
                cn_ratio_aom_fast: p.cn_ratio_aom_fast,
                days_after_application: p.days_after_application,
                dry_matter_content: p.dry_matter_content,
                nh4_content: p.nh4_content,
                incorporated: p.incorporated,
            })
            .collect(),
    }
}

/// Snapshot the simulation resources into a checkpoint record.
pub fn capture(
    clock: &SimClock,
    column: &SoilColumn,
    snow: &SnowState,
    frost: &FrostState,
    crop: &ActiveCrop,
    totals: &SimTotals,
) -> CheckpointData {
    CheckpointData {
        day: clock.day,
        julian_day: clock.julian_day,
        year: clock.year,
        surface_water_storage: column.surface_water_storage,
        interception_storage: column.interception_storage,
        surface_temperature: column.surface_temperature,
        groundwater_table: column.groundwater_table as u32,
        flux_at_lower_boundary: column.flux_at_lower_boundary,
        layers: column.layers.iter().map(capture_layer).collect(),
        snow: SnowRecord {
            depth: snow.depth,
            density: snow.density,
            frozen_water: snow.frozen_water,
            liquid_water: snow.liquid_water,
            max_depth: snow.max_depth,
            accumulated_depth: snow.accumulated_depth,
        },
        frost: FrostRecord {
            frost_depth: frost.frost_depth,
            thaw_depth: frost.thaw_depth,
            negative_degree_days: frost.negative_degree_days,
            frost_days: frost.frost_days,
            accumulated_frost_depth: frost.accumulated_frost_depth,
            temperature_under_snow: frost.temperature_under_snow,
            lambda_redux: frost.lambda_redux.clone(),
            hydraulic_conductivity_redux: frost.hydraulic_conductivity_redux,
        },
        crop: crop.crop.as_ref().map(|c| CropRecord {
            crop_id: c.params.id.clone(),
            developmental_stage: c.developmental_stage as u32,
            stage_temperature_sums: c.stage_temperature_sums.clone(),
            current_total_temperature_sum: c.current_total_temperature_sum,
            vernalisation_days: c.vernalisation_days,
            kc_factor: c.kc_factor,
            leaf_area_index: c.leaf_area_index,
            soil_coverage: c.soil_coverage,
            crop_height: c.crop_height,
            organ_biomass: c.organ_biomass.to_vec(),
            organ_dead_biomass: c.organ_dead_biomass.to_vec(),
            rooting_depth_m: c.rooting_depth_m,
            rooting_depth_layers: c.rooting_depth_layers as u32,
            total_biomass_n: c.total_biomass_n,
            fertility_factor: c.fertility_factor,
            accumulated_evapotranspiration: c.accumulated_evapotranspiration,
            accumulated_transpiration: c.accumulated_transpiration,
            accumulated_cut_yield: c.accumulated_cut_yield,
            days_since_sowing: c.days_since_sowing,
            dying_out: c.dying_out,
        }),
        totals: TotalsRecord {
            sum_mineral_fertiliser_n: totals.sum_mineral_fertiliser_n,
            sum_organic_fertiliser_n: totals.sum_organic_fertiliser_n,
            sum_organic_fertiliser_dm: totals.sum_organic_fertiliser_dm,
            days_with_crop: totals.days_with_crop,
            accumulated_water_stress: totals.accumulated_water_stress,
            accumulated_heat_stress: totals.accumulated_heat_stress,
            accumulated_n_stress: totals.accumulated_n_stress,
            accumulated_oxygen_stress: totals.accumulated_oxygen_stress,
        },
    }
}

// ---------------------------------------------------------------------------
// Restore
// ---------------------------------------------------------------------------

/// Rebuild the soil column from a checkpoint.
pub fn restore_column(data: &CheckpointData, env: &EnvironmentParameters) -> SoilColumn {
    let profile: Vec<SoilParameters> = data
        .layers
        .iter()
        .map(|r| SoilParameters {
            sand: r.sand,
            clay: r.clay,
            stone: r.stone,
            texture: u8_to_texture(r.texture),
            ph: r.ph,
            bulk_density: r.bulk_density,
            field_capacity: r.field_capacity,
            saturation: r.saturation,
            permanent_wilting_point: r.permanent_wilting_point,
            lambda: r.lambda,
            soil_organic_carbon: r.soil_organic_carbon,
            cn_ratio: r.cn_ratio,
            initial_nh4: Some(r.nh4),
            initial_no3: Some(r.no3),
            moisture_percent_fc: 100.0,
        })
        .collect();

    let mut column = SoilColumn::from_profile(&profile, env);
    for (layer, record) in column.layers.iter_mut().zip(&data.layers) {
        layer.soil_organic_carbon = record.soil_organic_carbon;
        layer.moisture = record.moisture;
        layer.temperature = record.temperature;
        layer.frozen = record.frozen;
        layer.water_flux = record.water_flux;
        layer.carbamid = record.carbamid;
        layer.nh4 = record.nh4;
        layer.no2 = record.no2;
        layer.no3 = record.no3;
        layer.som_slow = record.som_slow;
        layer.som_fast = record.som_fast;
        layer.smb_slow = record.smb_slow;
        layer.smb_fast = record.smb_fast;
        layer.aom_pools = record
            .aom_pools
            .iter()
            .map(|p| AomPool {
                aom_slow: p.aom_slow,
                aom_fast: p.aom_fast,
                slow_dec_coeff_standard: p.slow_dec_coeff_standard,
                fast_dec_coeff_standard: p.fast_dec_coeff_standard,
                part_aom_slow_to_smb_slow: p.part_aom_slow_to_smb_slow,
                part_aom_slow_to_smb_fast: p.part_aom_slow_to_smb_fast,
                cn_ratio_aom_slow: p.cn_ratio_aom_slow,
                cn_ratio_aom_fast: p.cn_ratio_aom_fast,
                days_after_application: p.days_after_application,
                dry_matter_content: p.dry_matter_content,
                nh4_content: p.nh4_content,
                incorporated: p.incorporated,
                ..Default::default()
            })
            .collect();
    }
    column.surface_water_storage = data.surface_water_storage;
    column.interception_storage = data.interception_storage;
    column.surface_temperature = data.surface_temperature;
    column.groundwater_table = data.groundwater_table as usize;
    column.flux_at_lower_boundary = data.flux_at_lower_boundary;
    column
}

/// Rebuild the planted crop; its parameter block comes from the catalogue.
pub fn restore_crop(
    data: &CheckpointData,
    catalogue: &CropCatalogue,
    number_of_layers: usize,
) -> Result<ActiveCrop, String> {
    let Some(record) = &data.crop else {
        return Ok(ActiveCrop::default());
    };
    let Some(params) = catalogue.get(&record.crop_id) else {
        return Err(format!(
            "checkpoint references unknown crop id {}",
            record.crop_id
        ));
    };

    let mut crop = CropState::new(params.clone(), number_of_layers);
    crop.developmental_stage = record.developmental_stage as usize;
    crop.stage_temperature_sums = record.stage_temperature_sums.clone();
    crop.current_total_temperature_sum = record.current_total_temperature_sum;
    crop.vernalisation_days = record.vernalisation_days;
    crop.kc_factor = record.kc_factor;
    crop.leaf_area_index = record.leaf_area_index;
    crop.soil_coverage = record.soil_coverage;
    crop.crop_height = record.crop_height;
    for (i, value) in record.organ_biomass.iter().take(ORGAN_COUNT).enumerate() {
        crop.organ_biomass[i] = *value;
    }
    for (i, value) in record
        .organ_dead_biomass
        .iter()
        .take(ORGAN_COUNT)
        .enumerate()
    {
        crop.organ_dead_biomass[i] = *value;
    }
    crop.rooting_depth_m = record.rooting_depth_m;
    crop.rooting_depth_layers = record.rooting_depth_layers as usize;
    crop.total_biomass_n = record.total_biomass_n;
    crop.fertility_factor = record.fertility_factor;
    crop.accumulated_evapotranspiration = record.accumulated_evapotranspiration;
    crop.accumulated_transpiration = record.accumulated_transpiration;
    crop.accumulated_cut_yield = record.accumulated_cut_yield;
    crop.days_since_sowing = record.days_since_sowing;
    crop.dying_out = record.dying_out;

    Ok(ActiveCrop { crop: Some(crop) })
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode, compress and wrap a checkpoint.
pub fn encode_checkpoint(data: &CheckpointData) -> Vec<u8> {
    let encoded = bitcode::encode(data);
    let compressed = lz4_flex::compress_prepend_size(&encoded);
    file_header::wrap_with_header(
        &compressed,
        data.day,
        encoded.len() as u32,
        FLAG_COMPRESSED,
    )
}

/// Unwrap, decompress and decode a checkpoint.
pub fn decode_checkpoint(bytes: &[u8]) -> Result<CheckpointData, String> {
    let (header, payload) = file_header::unwrap_header(bytes)?;
    let encoded = if header.flags & FLAG_COMPRESSED != 0 {
        lz4_flex::decompress_size_prepended(payload)
            .map_err(|e| format!("checkpoint decompression failed: {e}"))?
    } else {
        payload.to_vec()
    };
    if encoded.len() != header.uncompressed_size as usize {
        return Err(format!(
            "checkpoint size mismatch: header says {}, payload is {}",
            header.uncompressed_size,
            encoded.len()
        ));
    }
    bitcode::decode(&encoded).map_err(|e| format!("checkpoint decoding failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use simulation::params::SoilParameters;

    fn sample_checkpoint() -> CheckpointData {
        let env = EnvironmentParameters::default();
        let mut column =
            SoilColumn::from_profile(&vec![SoilParameters::default(); 20], &env);
        column.surface_water_storage = 3.5;
        column.layers[0].no3 = 0.02;
        column.layers[0].aom_pools.push(AomPool {
            aom_slow: 0.4,
            aom_fast: 0.1,
            cn_ratio_aom_slow: 100.0,
            cn_ratio_aom_fast: 8.0,
            days_after_application: 3,
            ..Default::default()
        });

        let clock = SimClock {
            day: 120,
            julian_day: 180,
            year: 2001,
            active: true,
        };
        let catalogue = CropCatalogue::default();
        let mut crop = ActiveCrop::default();
        let mut state = simulation::crop::CropState::new(
            catalogue.get("WW").unwrap().clone(),
            20,
        );
        state.developmental_stage = 3;
        state.leaf_area_index = 3.4;
        crop.crop = Some(state);

        capture(
            &clock,
            &column,
            &SnowState::default(),
            &FrostState::new(20, 0.1),
            &crop,
            &SimTotals::default(),
        )
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let data = sample_checkpoint();
        let bytes = encode_checkpoint(&data);
        let restored = decode_checkpoint(&bytes).unwrap();
        assert_eq!(data, restored);
    }

    #[test]
    fn test_restore_column_state() {
        let data = sample_checkpoint();
        let env = EnvironmentParameters::default();
        let column = restore_column(&data, &env);

        assert_eq!(column.number_of_layers(), 20);
        assert!((column.surface_water_storage - 3.5).abs() < 1e-12);
        assert!((column.layers[0].no3 - 0.02).abs() < 1e-12);
        assert_eq!(column.layers[0].aom_pools.len(), 1);
        assert_eq!(column.layers[0].aom_pools[0].days_after_application, 3);
    }

    #[test]
    fn test_restore_crop_from_catalogue() {
        let data = sample_checkpoint();
        let catalogue = CropCatalogue::default();
        let active = restore_crop(&data, &catalogue, 20).unwrap();
        let crop = active.crop.expect("crop missing after restore");
        assert_eq!(crop.developmental_stage, 3);
        assert!((crop.leaf_area_index - 3.4).abs() < 1e-12);
    }

    #[test]
    fn test_restore_crop_unknown_id_fails() {
        let mut data = sample_checkpoint();
        if let Some(crop) = data.crop.as_mut() {
            crop.crop_id = "NOPE".to_string();
        }
        let catalogue = CropCatalogue::default();
        assert!(restore_crop(&data, &catalogue, 20).is_err());
    }

    #[test]
    fn test_corrupt_bytes_rejected() {
        let data = sample_checkpoint();
        let mut bytes = encode_checkpoint(&data);
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        assert!(decode_checkpoint(&bytes).is_err());
    }

    #[test]
    fn test_compression_shrinks_payload() {
        let data = sample_checkpoint();
        let encoded = bitcode::encode(&data);
        let wrapped = encode_checkpoint(&data);
        // Uniform layer records compress well.
        assert!(wrapped.len() < encoded.len());
    }
}
