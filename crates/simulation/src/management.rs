//! Management plan and its daily dispatch.
//!
//! Actions are plain dated records; the daily system first drains the
//! column's deferred fertiliser queue and the top-dressing store, then fires
//! every action scheduled for the current day.

use bevy::prelude::*;
use bevy::utils::HashMap;
use serde::{Deserialize, Serialize};

use crate::climate::SimClock;
use crate::crop::{ActiveCrop, CropParameters, CropState, Organ};
use crate::params::{MineralFertiliserPartition, OrganicFertiliserParams, SoilOrganicParams};
use crate::params::organic_constants as oc;
use crate::soil_column::{NMinApplication, SoilColumn};
use crate::soil_organic::SoilOrganicState;
use crate::{DailyStep, SimTotals};

/// One management action; fired on its scheduled day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ManagementAction {
    Sow {
        crop_id: String,
    },
    /// End the crop; the non-exported share returns as residues.
    Harvest,
    MineralFertiliser {
        fertiliser_id: String,
        amount_kg_ha: f64,
    },
    /// N-min method; may defer itself while the soil is too wet.
    NMinFertiliser {
        fertiliser_id: String,
        sampling_depth: f64,
        n_target: f64,
        n_target_30: f64,
        min_application: f64,
        max_application: f64,
        top_dressing_delay: u32,
    },
    /// Direct demand-driven application, never deferred.
    NDemandFertiliser {
        fertiliser_id: String,
        depth: f64,
        n_demand_kg_ha: f64,
    },
    OrganicFertiliser {
        fertiliser_id: String,
        amount_fm_kg_ha: f64,
        n_concentration: f64,
        incorporate: bool,
    },
    Tillage {
        depth: f64,
    },
    Irrigation {
        amount_mm: f64,
        n_concentration_mg_l: f64,
    },
    /// Irrigate only while the crop's heat-sum window is open and the
    /// plant available water has fallen to the threshold.
    IrrigationTrigger {
        threshold: f64,
        amount_mm: f64,
        n_concentration_mg_l: f64,
    },
    Cutting {
        organ_fractions: Vec<(Organ, f64)>,
        export_fraction: f64,
    },
    FruitHarvest {
        percentage: f64,
    },
}

/// Dated action list; days are 0-based indices into the climate series.
#[derive(Resource, Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagementPlan {
    pub entries: Vec<(u32, ManagementAction)>,
}

impl ManagementPlan {
    pub fn schedule(&mut self, day: u32, action: ManagementAction) {
        self.entries.push((day, action));
    }

    pub fn actions_for_day(&self, day: u32) -> Vec<ManagementAction> {
        self.entries
            .iter()
            .filter(|(d, _)| *d == day)
            .map(|(_, a)| a.clone())
            .collect()
    }
}

/// Crop catalogue keyed by crop id.
#[derive(Resource, Debug, Clone)]
pub struct CropCatalogue {
    crops: HashMap<String, CropParameters>,
}

impl Default for CropCatalogue {
    fn default() -> Self {
        let mut crops = HashMap::default();
        let wheat = CropParameters::winter_wheat();
        crops.insert(wheat.id.clone(), wheat);
        Self { crops }
    }
}

impl CropCatalogue {
    pub fn insert(&mut self, params: CropParameters) {
        self.crops.insert(params.id.clone(), params);
    }

    pub fn get(&self, id: &str) -> Option<&CropParameters> {
        self.crops.get(id)
    }
}

/// Mineral and organic fertiliser catalogues.
#[derive(Resource, Debug, Clone)]
pub struct FertiliserCatalogue {
    mineral: HashMap<String, MineralFertiliserPartition>,
    organic: HashMap<String, OrganicFertiliserParams>,
}

impl Default for FertiliserCatalogue {
    fn default() -> Self {
        let mut mineral = HashMap::default();
        for partition in [
            MineralFertiliserPartition::calcium_ammonium_nitrate(),
            MineralFertiliserPartition::urea(),
        ] {
            mineral.insert(partition.id.clone(), partition);
        }
        let mut organic = HashMap::default();
        for params in [
            OrganicFertiliserParams::cattle_slurry(),
            OrganicFertiliserParams::crop_residue(),
        ] {
            organic.insert(params.id.clone(), params);
        }
        Self { mineral, organic }
    }
}

impl FertiliserCatalogue {
    pub fn insert_mineral(&mut self, partition: MineralFertiliserPartition) {
        self.mineral.insert(partition.id.clone(), partition);
    }

    pub fn insert_organic(&mut self, params: OrganicFertiliserParams) {
        self.organic.insert(params.id.clone(), params);
    }

    pub fn mineral(&self, id: &str) -> Option<&MineralFertiliserPartition> {
        self.mineral.get(id)
    }

    pub fn organic(&self, id: &str) -> Option<&OrganicFertiliserParams> {
        self.organic.get(id)
    }
}

/// Fired for every applied action, consumed by the observation layer.
#[derive(Event, Debug, Clone)]
pub struct ManagementEvent {
    pub day: u32,
    pub description: String,
}

/// N mass carried by an organic fertiliser application [kg N per kg FM],
/// derived from its AOM partitioning and C:N ratios.
pub fn organic_fertiliser_n_fraction(params: &OrganicFertiliserParams, soil_cn_ratio: f64) -> f64 {
    let fast = if params.cn_ratio_aom_fast.abs() > 1.0e-7 {
        oc::AOM_TO_C * params.part_aom_to_aom_fast / params.cn_ratio_aom_fast
    } else {
        0.0
    };
    let slow = oc::AOM_TO_C * params.part_aom_to_aom_slow / params.cn_ratio_aom_slow;
    let som = (1.0 - params.part_aom_to_aom_fast - params.part_aom_to_aom_slow) * oc::AOM_TO_C
        / soil_cn_ratio;
    let conversion = fast + slow + som + params.aom_nh4_content + params.aom_no3_content;
    params.aom_dry_matter_content * conversion
}

#[allow(clippy::too_many_arguments)]
pub fn apply_management(
    clock: Res<SimClock>,
    plan: Res<ManagementPlan>,
    crops: Res<CropCatalogue>,
    fertilisers: Res<FertiliserCatalogue>,
    organic_params: Res<SoilOrganicParams>,
    mut column: ResMut<SoilColumn>,
    mut organic: ResMut<SoilOrganicState>,
    mut active: ResMut<ActiveCrop>,
    mut totals: ResMut<SimTotals>,
    mut events: EventWriter<ManagementEvent>,
) {
    if !clock.active || column.number_of_layers() == 0 {
        return;
    }
    let day = clock.day;

    // Standing daily work before any new action fires: retry deferred N-min
    // applications, then count the top-dressing delay down.
    let delayed = column.apply_possible_delayed_fertiliser();
    if delayed > 0.0 {
        totals.daily_mineral_fertiliser_n += delayed;
        totals.sum_mineral_fertiliser_n += delayed;
        events.send(ManagementEvent {
            day,
            description: format!("deferred fertilisation applied: {delayed:.1} kg N/ha"),
        });
    }
    let dressed = column.apply_possible_top_dressing();
    if dressed > 0.0 {
        totals.daily_mineral_fertiliser_n += dressed;
        totals.sum_mineral_fertiliser_n += dressed;
        events.send(ManagementEvent {
            day,
            description: format!("top dressing applied: {dressed:.1} kg N/ha"),
        });
    }

    for action in plan.actions_for_day(day) {
        match action {
            ManagementAction::Sow { crop_id } => {
                if active.crop.is_some() {
                    warn!("day {day}: sowing skipped, a crop is already planted");
                    continue;
                }
                let Some(params) = crops.get(&crop_id) else {
                    warn!("day {day}: unknown crop id {crop_id}");
                    continue;
                };
                active.crop = Some(CropState::new(params.clone(), column.number_of_layers()));
                events.send(ManagementEvent {
                    day,
                    description: format!("sowed {}", params.name),
                });
            }

            ManagementAction::Harvest => {
                let Some(crop) = active.crop.take() else {
                    warn!("day {day}: harvest skipped, no crop on the field");
                    continue;
                };
                let residues = crop.residue_biomass();
                let residue_n = crop.residue_n_concentration();
                if residues > 0.0 {
                    if let Some(residue_params) = fertilisers.organic("RES") {
                        organic.add_organic_matter(
                            &mut column,
                            &organic_params,
                            residue_params,
                            residues,
                            residue_n,
                            false,
                        );
                        // Residues enter at their actual N concentration.
                        totals.daily_organic_fertiliser_n += residues * residue_n;
                    }
                }
                events.send(ManagementEvent {
                    day,
                    description: format!(
                        "harvested {}: yield {:.0} kg/ha, residues {:.0} kg/ha",
                        crop.params.name,
                        crop.primary_yield(),
                        residues
                    ),
                });
                totals.reset_fertiliser_sums();
            }

            ManagementAction::MineralFertiliser {
                fertiliser_id,
                amount_kg_ha,
            } => {
                let Some(partition) = fertilisers.mineral(&fertiliser_id) else {
                    warn!("day {day}: unknown mineral fertiliser id {fertiliser_id}");
                    continue;
                };
                column.apply_mineral_fertiliser(partition, amount_kg_ha);
                totals.daily_mineral_fertiliser_n += amount_kg_ha.max(0.0);
                totals.sum_mineral_fertiliser_n += amount_kg_ha.max(0.0);
                events.send(ManagementEvent {
                    day,
                    description: format!(
                        "mineral fertiliser {fertiliser_id}: {amount_kg_ha:.1} kg N/ha"
                    ),
                });
            }

            ManagementAction::NMinFertiliser {
                fertiliser_id,
                sampling_depth,
                n_target,
                n_target_30,
                min_application,
                max_application,
                top_dressing_delay,
            } => {
                let Some(partition) = fertilisers.mineral(&fertiliser_id) else {
                    warn!("day {day}: unknown mineral fertiliser id {fertiliser_id}");
                    continue;
                };
                let recommended = column.apply_mineral_fertiliser_via_nmin(NMinApplication {
                    partition: partition.clone(),
                    sampling_depth,
                    n_target,
                    n_target_30,
                    min_application,
                    max_application,
                    top_dressing_delay,
                });
                // The recommendation includes any scheduled top dressing;
                // only the immediately applied share enters the totals now.
                let applied_now = recommended.min(max_application);
                totals.daily_mineral_fertiliser_n += applied_now;
                totals.sum_mineral_fertiliser_n += applied_now;
                events.send(ManagementEvent {
                    day,
                    description: format!("N-min fertilisation: {recommended:.1} kg N/ha"),
                });
            }

            ManagementAction::NDemandFertiliser {
                fertiliser_id,
                depth,
                n_demand_kg_ha,
            } => {
                let Some(partition) = fertilisers.mineral(&fertiliser_id) else {
                    warn!("day {day}: unknown mineral fertiliser id {fertiliser_id}");
                    continue;
                };
                let applied = column.apply_mineral_fertiliser_via_n_demand(
                    partition,
                    depth,
                    n_demand_kg_ha,
                );
                totals.daily_mineral_fertiliser_n += applied;
                totals.sum_mineral_fertiliser_n += applied;
                events.send(ManagementEvent {
                    day,
                    description: format!("demand fertilisation: {applied:.1} kg N/ha"),
                });
            }

            ManagementAction::OrganicFertiliser {
                fertiliser_id,
                amount_fm_kg_ha,
                n_concentration,
                incorporate,
            } => {
                let Some(params) = fertilisers.organic(&fertiliser_id) else {
                    warn!("day {day}: unknown organic fertiliser id {fertiliser_id}");
                    continue;
                };
                organic.add_organic_matter(
                    &mut column,
                    &organic_params,
                    params,
                    amount_fm_kg_ha,
                    n_concentration,
                    incorporate,
                );
                let soil_cn = column.layers[0].cn_ratio();
                let n_applied = amount_fm_kg_ha * organic_fertiliser_n_fraction(params, soil_cn);
                totals.daily_organic_fertiliser_n += n_applied;
                totals.sum_organic_fertiliser_n += n_applied;
                let dm = amount_fm_kg_ha * params.aom_dry_matter_content;
                totals.daily_organic_fertiliser_dm += dm;
                totals.sum_organic_fertiliser_dm += dm;
                events.send(ManagementEvent {
                    day,
                    description: format!(
                        "organic fertiliser {fertiliser_id}: {amount_fm_kg_ha:.0} kg FM/ha"
                    ),
                });
            }

            ManagementAction::Tillage { depth } => {
                column.apply_tillage(depth);
                events.send(ManagementEvent {
                    day,
                    description: format!("tillage to {depth:.2} m"),
                });
            }

            ManagementAction::Irrigation {
                amount_mm,
                n_concentration_mg_l,
            } => {
                column.apply_irrigation(amount_mm, n_concentration_mg_l);
                totals.daily_irrigation_water += amount_mm.max(0.0);
                totals.daily_irrigation_n += amount_mm.max(0.0) * n_concentration_mg_l * 0.01;
                events.send(ManagementEvent {
                    day,
                    description: format!("irrigation: {amount_mm:.1} mm"),
                });
            }

            ManagementAction::IrrigationTrigger {
                threshold,
                amount_mm,
                n_concentration_mg_l,
            } => {
                // Only between the crop's irrigation heat sums.
                let window_open = active.crop.as_ref().is_some_and(|c| {
                    c.current_total_temperature_sum >= c.params.heat_sum_irrigation_start
                        && c.current_total_temperature_sum <= c.params.heat_sum_irrigation_end
                });
                if !window_open {
                    continue;
                }
                if column.apply_irrigation_via_trigger(threshold, amount_mm, n_concentration_mg_l)
                {
                    totals.daily_irrigation_water += amount_mm;
                    totals.daily_irrigation_n += amount_mm * n_concentration_mg_l * 0.01;
                    events.send(ManagementEvent {
                        day,
                        description: format!("triggered irrigation: {amount_mm:.1} mm"),
                    });
                }
            }

            ManagementAction::Cutting {
                organ_fractions,
                export_fraction,
            } => {
                let Some(crop) = active.crop.as_mut() else {
                    warn!("day {day}: cutting skipped, no crop on the field");
                    continue;
                };
                let removal = crop.apply_cutting(&organ_fractions, export_fraction);
                if removal.residues > 0.0 {
                    if let Some(residue_params) = fertilisers.organic("RES") {
                        organic.add_organic_matter(
                            &mut column,
                            &organic_params,
                            residue_params,
                            removal.residues,
                            removal.residue_n_concentration,
                            false,
                        );
                        totals.daily_organic_fertiliser_n +=
                            removal.residues * removal.residue_n_concentration;
                    }
                }
                events.send(ManagementEvent {
                    day,
                    description: format!(
                        "cutting: exported {:.0} kg/ha, residues {:.0} kg/ha",
                        removal.exported, removal.residues
                    ),
                });
            }

            ManagementAction::FruitHarvest { percentage } => {
                let Some(crop) = active.crop.as_mut() else {
                    warn!("day {day}: fruit harvest skipped, no crop on the field");
                    continue;
                };
                let removal = crop.apply_fruit_harvest(percentage);
                events.send(ManagementEvent {
                    day,
                    description: format!("fruit harvest: {:.0} kg/ha", removal.exported),
                });
            }
        }
    }
}

pub struct ManagementPlugin;

impl Plugin for ManagementPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<ManagementPlan>()
            .init_resource::<CropCatalogue>()
            .init_resource::<FertiliserCatalogue>()
            .add_event::<ManagementEvent>()
            .add_systems(FixedUpdate, apply_management.in_set(DailyStep::Management));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_filters_by_day() {
        let mut plan = ManagementPlan::default();
        plan.schedule(
            3,
            ManagementAction::Irrigation {
                amount_mm: 10.0,
                n_concentration_mg_l: 0.0,
            },
        );
        plan.schedule(5, ManagementAction::Harvest);
        plan.schedule(
            3,
            ManagementAction::Tillage { depth: 0.2 },
        );

        assert_eq!(plan.actions_for_day(3).len(), 2);
        assert_eq!(plan.actions_for_day(4).len(), 0);
        assert_eq!(plan.actions_for_day(5).len(), 1);
    }

    #[test]
    fn test_default_catalogues() {
        let crops = CropCatalogue::default();
        assert!(crops.get("WW").is_some());
        assert!(crops.get("??").is_none());

        let fertilisers = FertiliserCatalogue::default();
        assert!(fertilisers.mineral("CAN").is_some());
        assert!(fertilisers.mineral("U").is_some());
        assert!(fertilisers.organic("CAS").is_some());
        assert!(fertilisers.organic("RES").is_some());
    }

    #[test]
    fn test_organic_fertiliser_n_fraction() {
        let slurry = OrganicFertiliserParams::cattle_slurry();
        let fraction = organic_fertiliser_n_fraction(&slurry, 10.0);
        // Slurry at 10% DM carries on the order of a percent N per kg FM.
        assert!(fraction > 0.0 && fraction < 0.05, "fraction = {fraction}");
    }
}
