//! Daily observation rows.
//!
//! Outputs are identified by a stable id; each id maps to a name, a unit
//! and a default rounding via a static metadata table. A request may target
//! a single layer or aggregate over a layer range; the extraction produces a
//! closed tagged value so heterogeneous outputs share one table.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::climate::SimClock;
use crate::crop::ActiveCrop;
use crate::diagnostics::DiagnosticsSink;
use crate::management::ManagementEvent;
use crate::snow::SnowState;
use crate::soil_column::SoilColumn;
use crate::soil_moisture::SoilMoistureState;
use crate::soil_organic::SoilOrganicState;
use crate::soil_temperature::SoilTemperatureState;
use crate::soil_transport::SoilTransportState;
use crate::frost::FrostState;
use crate::{config, DailyStep, SimTotals};

/// Closed set of value shapes an output can take.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutputValue {
    Number(f64),
    Integer(i64),
    Text(String),
    Series(Vec<f64>),
}

impl OutputValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            OutputValue::Number(v) => Some(*v),
            OutputValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }
}

/// Aggregation operators over layers (and, in post-processing, over time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationOp {
    Sum,
    Avg,
    Median,
    Min,
    Max,
    First,
    Last,
}

/// Which layers a per-layer output covers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LayerSelection {
    Single(usize),
    /// Inclusive range reduced with the operator.
    Range(usize, usize, AggregationOp),
    /// The full profile as a series.
    All,
}

/// Stable output identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputId {
    // Per-layer soil state.
    SoilMoisture,
    SoilTemperature,
    SoilNO3,
    SoilNH4,
    SoilCarbamid,
    // Surface and water budget.
    SurfaceTemperature,
    SnowDepth,
    FrostDepth,
    SurfaceWaterStorage,
    GroundwaterTableLayer,
    Runoff,
    Infiltration,
    CapillaryRise,
    FluxAtLowerBoundary,
    ReferenceEvapotranspiration,
    ActualEvapotranspiration,
    ActualEvaporation,
    ActualTranspiration,
    // Nitrogen and carbon turnover.
    NLeaching,
    Denitrification,
    N2OProduced,
    NH3Volatilised,
    NetNMineralisation,
    SoilOrganicCarbonTop,
    NetEcosystemProduction,
    NetEcosystemExchange,
    // Crop.
    CropName,
    DevelopmentalStage,
    LeafAreaIndex,
    CropHeight,
    AbovegroundBiomass,
    PrimaryYield,
    RootingDepth,
    CropNUptake,
    // Management accounting.
    MineralFertiliserN,
    OrganicFertiliserN,
    IrrigationWater,
    // Run status.
    DayStatus,
}

/// Static per-id metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputMeta {
    pub name: &'static str,
    pub unit: &'static str,
    /// Default decimal digits when rendering.
    pub rounding: u32,
}

pub fn metadata(id: OutputId) -> OutputMeta {
    use OutputId::*;
    let (name, unit, rounding) = match id {
        SoilMoisture => ("Mois", "m3 m-3", 3),
        SoilTemperature => ("STemp", "°C", 2),
        SoilNO3 => ("NO3", "kg N m-3", 5),
        SoilNH4 => ("NH4", "kg N m-3", 5),
        SoilCarbamid => ("Carbamid", "kg N m-3", 5),
        SurfaceTemperature => ("SurfTemp", "°C", 2),
        SnowDepth => ("SnowDepth", "mm", 1),
        FrostDepth => ("FrostDepth", "m", 2),
        SurfaceWaterStorage => ("SurfWaterStorage", "mm", 2),
        GroundwaterTableLayer => ("GWLayer", "", 0),
        Runoff => ("RunOff", "mm", 2),
        Infiltration => ("Infilt", "mm", 2),
        CapillaryRise => ("CapillRise", "m3 m-3", 4),
        FluxAtLowerBoundary => ("Recharge", "mm", 2),
        ReferenceEvapotranspiration => ("ET0", "mm", 2),
        ActualEvapotranspiration => ("ETa", "mm", 2),
        ActualEvaporation => ("Evap", "mm", 2),
        ActualTranspiration => ("Transp", "mm", 2),
        NLeaching => ("NLeach", "kg N ha-1", 3),
        Denitrification => ("Denit", "kg N ha-1", 3),
        N2OProduced => ("N2O", "kg N ha-1", 4),
        NH3Volatilised => ("NH3", "kg N ha-1", 4),
        NetNMineralisation => ("NetNMin", "kg N ha-1", 3),
        SoilOrganicCarbonTop => ("SOC", "kg C kg-1", 4),
        NetEcosystemProduction => ("NEP", "kg C ha-1", 2),
        NetEcosystemExchange => ("NEE", "kg C ha-1", 2),
        CropName => ("Crop", "", 0),
        DevelopmentalStage => ("Stage", "", 0),
        LeafAreaIndex => ("LAI", "m2 m-2", 3),
        CropHeight => ("Height", "m", 2),
        AbovegroundBiomass => ("AbBiom", "kg DM ha-1", 1),
        PrimaryYield => ("Yield", "kg DM ha-1", 1),
        RootingDepth => ("RootDep", "m", 2),
        CropNUptake => ("NUptake", "kg N ha-1", 3),
        MineralFertiliserN => ("MinFert", "kg N ha-1", 2),
        OrganicFertiliserN => ("OrgFert", "kg N ha-1", 2),
        IrrigationWater => ("Irrig", "mm", 1),
        DayStatus => ("Status", "", 0),
    };
    OutputMeta {
        name,
        unit,
        rounding,
    }
}

/// One requested output column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRequest {
    pub id: OutputId,
    /// Only meaningful for per-layer ids; `None` defaults to the topmost
    /// layer.
    pub layers: Option<LayerSelection>,
}

impl OutputRequest {
    pub fn plain(id: OutputId) -> Self {
        Self { id, layers: None }
    }
}

/// The run's requested output columns.
#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub requests: Vec<OutputRequest>,
}

impl Default for OutputSpec {
    fn default() -> Self {
        use OutputId::*;
        let mut requests: Vec<OutputRequest> = [
            SurfaceTemperature,
            SnowDepth,
            Runoff,
            Infiltration,
            ReferenceEvapotranspiration,
            ActualEvapotranspiration,
            NLeaching,
            Denitrification,
            N2OProduced,
            NetNMineralisation,
            CropName,
            DevelopmentalStage,
            LeafAreaIndex,
            AbovegroundBiomass,
            PrimaryYield,
            DayStatus,
        ]
        .into_iter()
        .map(OutputRequest::plain)
        .collect();
        requests.push(OutputRequest {
            id: SoilMoisture,
            layers: Some(LayerSelection::Range(0, 8, AggregationOp::Avg)),
        });
        requests.push(OutputRequest {
            id: SoilTemperature,
            layers: Some(LayerSelection::Single(0)),
        });
        Self { requests }
    }
}

/// The most recent observation row.
#[derive(Resource, Debug, Clone, Default, Serialize)]
pub struct DailyObservation {
    pub day: u32,
    pub julian_day: u32,
    pub year: i32,
    pub status_ok: bool,
    /// Management applied today, in order.
    pub events: Vec<String>,
    pub values: Vec<(OutputId, OutputValue)>,
}

impl DailyObservation {
    pub fn get(&self, id: OutputId) -> Option<&OutputValue> {
        self.values.iter().find(|(i, _)| *i == id).map(|(_, v)| v)
    }
}

/// Reduce a per-layer series with an aggregation operator.
pub fn aggregate(values: &[f64], op: AggregationOp) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    match op {
        AggregationOp::Sum => values.iter().sum(),
        AggregationOp::Avg => values.iter().sum::<f64>() / values.len() as f64,
        AggregationOp::Median => {
            let mut sorted = values.to_vec();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 0 {
                (sorted[mid - 1] + sorted[mid]) / 2.0
            } else {
                sorted[mid]
            }
        }
        AggregationOp::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        AggregationOp::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        AggregationOp::First => values[0],
        AggregationOp::Last => values[values.len() - 1],
    }
}

fn select_layers(values: &[f64], selection: Option<LayerSelection>) -> OutputValue {
    match selection.unwrap_or(LayerSelection::Single(0)) {
        LayerSelection::Single(i) => {
            OutputValue::Number(values.get(i).copied().unwrap_or(0.0))
        }
        LayerSelection::Range(from, to, op) => {
            let to = to.min(values.len().saturating_sub(1));
            if from > to {
                OutputValue::Number(0.0)
            } else {
                OutputValue::Number(aggregate(&values[from..=to], op))
            }
        }
        LayerSelection::All => OutputValue::Series(values.to_vec()),
    }
}

/// Everything the extraction reads, bundled to keep the signature sane.
struct ExtractionInputs<'a> {
    column: &'a SoilColumn,
    crop: &'a ActiveCrop,
    moisture: &'a SoilMoistureState,
    organic: &'a SoilOrganicState,
    transport: &'a SoilTransportState,
    snow: &'a SnowState,
    frost: &'a FrostState,
    totals: &'a SimTotals,
    sink: &'a DiagnosticsSink,
}

fn extract(inputs: &ExtractionInputs, request: &OutputRequest) -> OutputValue {
    use OutputId::*;
    let column = inputs.column;
    let crop = inputs.crop.crop.as_ref();

    let per_layer = |f: &dyn Fn(&crate::soil_column::SoilLayer) -> f64| -> Vec<f64> {
        column.layers.iter().map(|l| f(l)).collect()
    };

    match request.id {
        SoilMoisture => select_layers(&per_layer(&|l| l.moisture), request.layers),
        SoilTemperature => select_layers(&per_layer(&|l| l.temperature), request.layers),
        SoilNO3 => select_layers(&per_layer(&|l| l.no3), request.layers),
        SoilNH4 => select_layers(&per_layer(&|l| l.nh4), request.layers),
        SoilCarbamid => select_layers(&per_layer(&|l| l.carbamid), request.layers),

        SurfaceTemperature => OutputValue::Number(column.surface_temperature),
        SnowDepth => OutputValue::Number(inputs.snow.depth),
        FrostDepth => OutputValue::Number(inputs.frost.frost_depth),
        SurfaceWaterStorage => OutputValue::Number(column.surface_water_storage),
        GroundwaterTableLayer => OutputValue::Integer(column.groundwater_table as i64),
        Runoff => OutputValue::Number(inputs.moisture.surface_runoff),
        Infiltration => OutputValue::Number(inputs.moisture.infiltration),
        CapillaryRise => OutputValue::Number(inputs.moisture.capillary_rise),
        FluxAtLowerBoundary => OutputValue::Number(column.flux_at_lower_boundary),
        ReferenceEvapotranspiration => {
            OutputValue::Number(inputs.moisture.reference_evapotranspiration)
        }
        ActualEvapotranspiration => {
            OutputValue::Number(inputs.moisture.actual_evapotranspiration)
        }
        ActualEvaporation => OutputValue::Number(inputs.moisture.actual_evaporation),
        ActualTranspiration => OutputValue::Number(inputs.moisture.actual_transpiration),

        NLeaching => OutputValue::Number(inputs.transport.leaching_at_boundary),
        Denitrification => {
            OutputValue::Number(inputs.organic.total_denitrification * config::M2_PER_HA)
        }
        N2OProduced => OutputValue::Number(inputs.organic.n2o_produced),
        NH3Volatilised => {
            OutputValue::Number(inputs.organic.total_nh3_volatilised * config::M2_PER_HA)
        }
        NetNMineralisation => {
            OutputValue::Number(inputs.organic.net_n_mineralisation * config::M2_PER_HA)
        }
        SoilOrganicCarbonTop => {
            let organic_layers = column.number_of_organic_layers().max(1);
            let soc: f64 = column
                .layers
                .iter()
                .take(organic_layers)
                .map(|l| l.soil_organic_carbon)
                .sum();
            OutputValue::Number(soc / organic_layers as f64)
        }
        NetEcosystemProduction => OutputValue::Number(inputs.organic.net_ecosystem_production),
        NetEcosystemExchange => OutputValue::Number(inputs.organic.net_ecosystem_exchange),

        CropName => OutputValue::Text(
            crop.map(|c| c.params.name.clone()).unwrap_or_default(),
        ),
        DevelopmentalStage => {
            OutputValue::Integer(crop.map(|c| c.developmental_stage as i64).unwrap_or(-1))
        }
        LeafAreaIndex => OutputValue::Number(crop.map(|c| c.leaf_area_index).unwrap_or(0.0)),
        CropHeight => OutputValue::Number(crop.map(|c| c.crop_height).unwrap_or(0.0)),
        AbovegroundBiomass => {
            OutputValue::Number(crop.map(|c| c.above_ground_biomass()).unwrap_or(0.0))
        }
        PrimaryYield => OutputValue::Number(crop.map(|c| c.primary_yield()).unwrap_or(0.0)),
        RootingDepth => OutputValue::Number(crop.map(|c| c.rooting_depth_m).unwrap_or(0.0)),
        CropNUptake => OutputValue::Number(column.daily_crop_n_uptake_kg_ha()),

        MineralFertiliserN => OutputValue::Number(inputs.totals.daily_mineral_fertiliser_n),
        OrganicFertiliserN => OutputValue::Number(inputs.totals.daily_organic_fertiliser_n),
        IrrigationWater => OutputValue::Number(inputs.totals.daily_irrigation_water),

        DayStatus => OutputValue::Text(
            if inputs.sink.day_flagged {
                "flagged"
            } else {
                "ok"
            }
            .to_string(),
        ),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn build_observation(
    clock: Res<SimClock>,
    spec: Res<OutputSpec>,
    column: Res<SoilColumn>,
    crop: Res<ActiveCrop>,
    moisture: Res<SoilMoistureState>,
    organic: Res<SoilOrganicState>,
    transport: Res<SoilTransportState>,
    snow: Res<SnowState>,
    frost: Res<FrostState>,
    totals: Res<SimTotals>,
    sink: Res<DiagnosticsSink>,
    mut events: EventReader<ManagementEvent>,
    mut observation: ResMut<DailyObservation>,
) {
    if !clock.active {
        return;
    }

    let inputs = ExtractionInputs {
        column: &column,
        crop: &crop,
        moisture: &moisture,
        organic: &organic,
        transport: &transport,
        snow: &snow,
        frost: &frost,
        totals: &totals,
        sink: &sink,
    };

    observation.day = clock.day;
    observation.julian_day = clock.julian_day;
    observation.year = clock.year;
    observation.status_ok = !sink.day_flagged;
    observation.events = events.read().map(|e| e.description.clone()).collect();
    observation.values = spec
        .requests
        .iter()
        .map(|request| (request.id, extract(&inputs, request)))
        .collect();
}

pub struct ObservationPlugin;

impl Plugin for ObservationPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<OutputSpec>()
            .init_resource::<DailyObservation>()
            .add_systems(
                FixedUpdate,
                build_observation.in_set(DailyStep::Observe),
            );
    }
}
