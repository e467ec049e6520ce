use crate::domain::model::{ConsumptionSnapshot, EntityState, SensorData, SensorStateClass};
use serde_json::{json, Map, Value};

pub const UNIT_CUBIC_METERS: &str = "m³";
pub const DEVICE_CLASS_WATER: &str = "water";
pub const ICON: &str = "mdi:water-pump";

/// Which snapshot value feeds a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotField {
    LastDelta,
    LastTotal,
    LastYearOverall,
    ThisYearOverall,
    HighestMonthly,
}

impl SnapshotField {
    pub fn read(&self, snapshot: &ConsumptionSnapshot) -> f64 {
        match self {
            SnapshotField::LastDelta => snapshot.last.delta,
            SnapshotField::LastTotal => snapshot.last.total,
            SnapshotField::LastYearOverall => snapshot.last_year_overall,
            SnapshotField::ThisYearOverall => snapshot.this_year_overall,
            SnapshotField::HighestMonthly => snapshot.highest_monthly,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SensorDescription {
    pub key: &'static str,
    pub field: SnapshotField,
    pub state_class: Option<SensorStateClass>,
}

/// Sensor slots in coordinator order. The index is part of each unique id.
pub const SENSOR_DESCRIPTIONS: [SensorDescription; 5] = [
    SensorDescription {
        key: "yesterday_delta",
        field: SnapshotField::LastDelta,
        state_class: None,
    },
    SensorDescription {
        key: "yesterday_total",
        field: SnapshotField::LastTotal,
        state_class: Some(SensorStateClass::Total),
    },
    SensorDescription {
        key: "last_year_delta",
        field: SnapshotField::LastYearOverall,
        state_class: None,
    },
    SensorDescription {
        key: "this_year_delta",
        field: SnapshotField::ThisYearOverall,
        state_class: None,
    },
    SensorDescription {
        key: "highest_monthly_delta",
        field: SnapshotField::HighestMonthly,
        state_class: None,
    },
];

/// A water sensor bound to one coordinator slot.
#[derive(Debug, Clone)]
pub struct SuezSensor {
    idx: usize,
    counter_id: String,
    unique_id: String,
    name: String,
    state_class: Option<SensorStateClass>,
    attribution: Option<String>,
    native_value: Option<f64>,
}

impl SuezSensor {
    pub fn new(idx: usize, entry: &SensorData) -> Self {
        tracing::debug!("Initializing sensor {} with {:?}", idx, entry);
        Self {
            idx,
            counter_id: entry.counter_id.clone(),
            unique_id: format!("suez_{}_{}", entry.counter_id, idx),
            name: format!("suez_{}_{}", entry.counter_id, entry.name),
            state_class: entry.state_class,
            attribution: entry.attribution.clone(),
            native_value: if entry.valid { entry.value } else { None },
        }
    }

    pub fn idx(&self) -> usize {
        self.idx
    }

    pub fn counter_id(&self) -> &str {
        &self.counter_id
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn native_value(&self) -> Option<f64> {
        self.native_value
    }

    pub fn entity_id(&self) -> String {
        let object_id: String = self
            .name
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("sensor.{}", object_id)
    }

    /// Applies fresh coordinator data. Returns whether the state must be written.
    pub fn handle_coordinator_update(&mut self, data: &[SensorData]) -> bool {
        let Some(sensor_data) = data.get(self.idx) else {
            tracing::warn!("No coordinator data for sensor {}", self.unique_id);
            return false;
        };
        tracing::info!("Updating {} with {:?}", self.name, sensor_data);
        if !sensor_data.valid {
            return false;
        }
        tracing::debug!("{} is valid, updating the value", self.name);
        self.native_value = sensor_data.value;
        if sensor_data.attribution.is_some() {
            self.attribution = sensor_data.attribution.clone();
        }
        true
    }

    pub fn to_state(&self) -> EntityState {
        let mut attributes = Map::new();
        attributes.insert("unit_of_measurement".into(), json!(UNIT_CUBIC_METERS));
        attributes.insert("device_class".into(), json!(DEVICE_CLASS_WATER));
        if let Some(state_class) = self.state_class {
            attributes.insert("state_class".into(), json!(state_class.as_str()));
        }
        attributes.insert("icon".into(), json!(ICON));
        attributes.insert("friendly_name".into(), json!(self.name));
        if let Some(attribution) = &self.attribution {
            attributes.insert("attribution".into(), Value::String(attribution.clone()));
        }

        EntityState {
            entity_id: self.entity_id(),
            state: self
                .native_value
                .map(|v| v.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            attributes,
        }
    }
}
