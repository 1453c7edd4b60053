//! Climate projection workflow: import a calibrated parameter set, pick a
//! `model → horizon → scenario` combination among what the server offers,
//! then run.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::{Value, json};

pub const CALIBRATION_KEYS: [&str; 10] = [
    "hydroModel",
    "catchment",
    "objective",
    "transformation",
    "algorithm",
    "algorithmParams",
    "start",
    "end",
    "snowModel",
    "hydroParams",
];

pub const INVALID_CALIBRATION: &str = "This isn't a valid calibrated parameter file.";

/// A calibration file must carry exactly the expected keys.
pub fn verify_calibration(calibration: &Value) -> Result<(), &'static str> {
    let Some(object) = calibration.as_object() else {
        return Err(INVALID_CALIBRATION);
    };
    let found: BTreeSet<&str> = object.keys().map(String::as_str).collect();
    let expected: BTreeSet<&str> = CALIBRATION_KEYS.into_iter().collect();
    if found == expected {
        Ok(())
    } else {
        Err(INVALID_CALIBRATION)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigField {
    Model,
    Horizon,
    Scenario,
}

impl ConfigField {
    pub const ALL: [ConfigField; 3] =
        [ConfigField::Model, ConfigField::Horizon, ConfigField::Scenario];

    pub fn as_str(self) -> &'static str {
        match self {
            ConfigField::Model => "model",
            ConfigField::Horizon => "horizon",
            ConfigField::Scenario => "scenario",
        }
    }

    pub fn storage_key(self) -> &'static str {
        match self {
            ConfigField::Model => "holmes--projection--model",
            ConfigField::Horizon => "holmes--projection--horizon",
            ConfigField::Scenario => "holmes--projection--scenario",
        }
    }
}

/// One combination the server can project.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConfigOption {
    pub model: String,
    pub horizon: String,
    pub scenario: String,
}

pub fn parse_options(available: &Value) -> Result<Vec<ConfigOption>, serde_json::Error> {
    Vec::<ConfigOption>::deserialize(available)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub model: Option<String>,
    pub horizon: Option<String>,
    pub scenario: Option<String>,
}

impl Selection {
    pub fn get(&self, field: ConfigField) -> Option<&str> {
        match field {
            ConfigField::Model => self.model.as_deref(),
            ConfigField::Horizon => self.horizon.as_deref(),
            ConfigField::Scenario => self.scenario.as_deref(),
        }
    }

    pub fn set(&mut self, field: ConfigField, value: Option<String>) {
        match field {
            ConfigField::Model => self.model = value,
            ConfigField::Horizon => self.horizon = value,
            ConfigField::Scenario => self.scenario = value,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.model.is_some() && self.horizon.is_some() && self.scenario.is_some()
    }

    /// Snap the selection onto `options`, field by field: a current value is
    /// kept while some option still matches it together with the fields
    /// before it, otherwise the first matching option wins. An empty option
    /// list leaves the selection untouched.
    pub fn reconcile(&self, options: &[ConfigOption]) -> Selection {
        let Some(first) = options.first() else {
            return self.clone();
        };

        let model = self
            .model
            .as_ref()
            .filter(|model| options.iter().any(|o| &o.model == *model))
            .unwrap_or(&first.model)
            .clone();

        let for_model: Vec<&ConfigOption> = options.iter().filter(|o| o.model == model).collect();
        let horizon = self
            .horizon
            .as_ref()
            .filter(|horizon| for_model.iter().any(|o| &o.horizon == *horizon))
            .unwrap_or(&for_model[0].horizon)
            .clone();

        let for_horizon: Vec<&ConfigOption> = for_model
            .into_iter()
            .filter(|o| o.horizon == horizon)
            .collect();
        let scenario = self
            .scenario
            .as_ref()
            .filter(|scenario| for_horizon.iter().any(|o| &o.scenario == *scenario))
            .unwrap_or(&for_horizon[0].scenario)
            .clone();

        Selection {
            model: Some(model),
            horizon: Some(horizon),
            scenario: Some(scenario),
        }
    }

    /// Fields whose value differs from `other`, in cascade order.
    pub fn changed_fields(&self, other: &Selection) -> Vec<ConfigField> {
        ConfigField::ALL
            .into_iter()
            .filter(|field| self.get(*field) != other.get(*field))
            .collect()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "model": self.model,
            "horizon": self.horizon,
            "scenario": self.scenario,
        })
    }
}

/// Projection-specific part of the dashboard state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workflow {
    pub calibration: Option<Value>,
    pub selection: Selection,
}

impl Workflow {
    pub fn catchment(&self) -> Option<&Value> {
        self.calibration.as_ref().and_then(|c| c.get("catchment"))
    }

    /// Request body for a run, once everything is chosen.
    pub fn run_request(&self) -> Option<Value> {
        let calibration = self.calibration.as_ref()?;
        if !self.selection.is_complete() {
            return None;
        }
        Some(json!({
            "calibration": calibration,
            "config": self.selection.to_json(),
        }))
    }
}
