//! Setup file ingestion and validation.
//!
//! The setup is one JSON document carrying site and environment overrides,
//! the soil profile, the climate series, catalogue entries, the management
//! plan and the requested outputs. Every referenced id must resolve and
//! every numeric must be finite; violations are fatal before the first
//! simulated day.

use std::fmt;

use serde::Deserialize;

use simulation::climate::ClimateRecord;
use simulation::crop::CropParameters;
use simulation::management::{ManagementAction, ManagementPlan};
use simulation::observation::OutputRequest;
use simulation::params::{
    EnvironmentParameters, MineralFertiliserPartition, OrganicFertiliserParams, SiteParameters,
    SoilParameters,
};

#[derive(Debug)]
pub enum SetupError {
    Io(String),
    Parse(String),
    Validation(String),
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Io(msg) => write!(f, "cannot read setup: {msg}"),
            SetupError::Parse(msg) => write!(f, "cannot parse setup: {msg}"),
            SetupError::Validation(msg) => write!(f, "invalid setup: {msg}"),
        }
    }
}

/// One dated management entry.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanEntry {
    pub day: u32,
    pub action: ManagementAction,
}

/// The whole setup document.
#[derive(Debug, Clone, Deserialize)]
pub struct Setup {
    #[serde(default)]
    pub site: Option<SiteParameters>,
    #[serde(default)]
    pub environment: Option<EnvironmentParameters>,
    pub soil: Vec<SoilParameters>,
    pub climate: Vec<ClimateRecord>,
    #[serde(default)]
    pub crops: Vec<CropParameters>,
    #[serde(default)]
    pub mineral_fertilisers: Vec<MineralFertiliserPartition>,
    #[serde(default)]
    pub organic_fertilisers: Vec<OrganicFertiliserParams>,
    #[serde(default)]
    pub management: Vec<PlanEntry>,
    #[serde(default)]
    pub outputs: Vec<OutputRequest>,
}

impl Setup {
    pub fn from_json(text: &str) -> Result<Self, SetupError> {
        let setup: Setup =
            serde_json::from_str(text).map_err(|e| SetupError::Parse(e.to_string()))?;
        setup.validate()?;
        Ok(setup)
    }

    pub fn management_plan(&self) -> ManagementPlan {
        let mut plan = ManagementPlan::default();
        for entry in &self.management {
            plan.schedule(entry.day, entry.action.clone());
        }
        plan
    }

    fn validate(&self) -> Result<(), SetupError> {
        if self.soil.is_empty() {
            return Err(SetupError::Validation("soil profile is empty".to_string()));
        }
        if self.climate.is_empty() {
            return Err(SetupError::Validation(
                "climate series is empty".to_string(),
            ));
        }
        for (i, record) in self.climate.iter().enumerate() {
            if !record.is_finite() {
                return Err(SetupError::Validation(format!(
                    "climate record {i} contains a non-finite value"
                )));
            }
            if !(1..=366).contains(&record.julian_day) {
                return Err(SetupError::Validation(format!(
                    "climate record {i} has julian day {}",
                    record.julian_day
                )));
            }
        }

        // Every referenced catalogue id must resolve to a built-in or a
        // setup-provided entry.
        let crop_known = |id: &str| {
            id == "WW" || self.crops.iter().any(|c| c.id == id)
        };
        let mineral_known = |id: &str| {
            id == "CAN" || id == "U" || self.mineral_fertilisers.iter().any(|f| f.id == id)
        };
        let organic_known = |id: &str| {
            id == "CAS" || id == "RES" || self.organic_fertilisers.iter().any(|f| f.id == id)
        };

        for entry in &self.management {
            if entry.day as usize >= self.climate.len() {
                return Err(SetupError::Validation(format!(
                    "management on day {} is outside the climate series ({} days)",
                    entry.day,
                    self.climate.len()
                )));
            }
            let missing = match &entry.action {
                ManagementAction::Sow { crop_id } if !crop_known(crop_id) => {
                    Some(format!("crop id {crop_id}"))
                }
                ManagementAction::MineralFertiliser { fertiliser_id, .. }
                | ManagementAction::NMinFertiliser { fertiliser_id, .. }
                | ManagementAction::NDemandFertiliser { fertiliser_id, .. }
                    if !mineral_known(fertiliser_id) =>
                {
                    Some(format!("mineral fertiliser id {fertiliser_id}"))
                }
                ManagementAction::OrganicFertiliser { fertiliser_id, .. }
                    if !organic_known(fertiliser_id) =>
                {
                    Some(format!("organic fertiliser id {fertiliser_id}"))
                }
                _ => None,
            };
            if let Some(what) = missing {
                return Err(SetupError::Validation(format!(
                    "management on day {} references unknown {what}",
                    entry.day
                )));
            }
        }

        Ok(())
    }
}
