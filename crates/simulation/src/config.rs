//! Compile-time defaults and unit helpers shared across the engine.

/// Default vertical extent of one soil layer [m].
pub const DEFAULT_LAYER_THICKNESS: f64 = 0.1;

/// Default number of layers (2 m column at 0.1 m per layer).
pub const DEFAULT_LAYER_COUNT: usize = 20;

/// Default maximum depth down to which mineralisation is computed [m].
pub const DEFAULT_MAX_MINERALISATION_DEPTH: f64 = 0.4;

/// Tolerance above saturation accepted before a moisture invariant is
/// flagged [m3 m-3].
pub const MOISTURE_TOLERANCE: f64 = 1e-6;

/// Acceptable residual of the daily surface water balance [mm].
pub const WATER_BALANCE_TOLERANCE_MM: f64 = 0.01;

/// Acceptable residual of the daily nitrogen balance [kg N ha-1].
pub const N_BALANCE_TOLERANCE_KG_HA: f64 = 1e-4;

/// An AOM pool whose slow + fast carbon summed over all organic layers
/// falls below this threshold is removed from every layer [kg C m-2].
pub const AOM_POOL_DELETE_THRESHOLD: f64 = 1e-5;

/// Square metres per hectare.
pub const M2_PER_HA: f64 = 10_000.0;

/// Convert an areal amount [kg ha-1] into a volumetric layer concentration
/// [kg m-3] for a layer of the given thickness.
pub fn kg_ha_to_kg_m3(amount_kg_ha: f64, layer_thickness_m: f64) -> f64 {
    amount_kg_ha / M2_PER_HA / layer_thickness_m
}

/// Convert a volumetric layer concentration [kg m-3] back into an areal
/// amount [kg ha-1] for a layer of the given thickness.
pub fn kg_m3_to_kg_ha(amount_kg_m3: f64, layer_thickness_m: f64) -> f64 {
    amount_kg_m3 * M2_PER_HA * layer_thickness_m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kg_ha_roundtrip() {
        let kg_m3 = kg_ha_to_kg_m3(100.0, 0.1);
        assert!((kg_m3 - 0.1).abs() < 1e-12);
        let back = kg_m3_to_kg_ha(kg_m3, 0.1);
        assert!((back - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_column_depth_default() {
        let depth = DEFAULT_LAYER_THICKNESS * DEFAULT_LAYER_COUNT as f64;
        assert!((depth - 2.0).abs() < 1e-12);
    }
}
