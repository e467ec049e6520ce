//! Typed reading of the portal's statistics arrays.
//!
//! Daily data (`statJData`) is a list of `[label, delta, total]` rows, one per
//! day of the month. Monthly data (`statMData`) is a list of
//! `[_, delta, total, label]` rows followed by three bare numbers: this year's
//! overall consumption, last year's, and the highest monthly value.

use crate::domain::model::Consumption;
use crate::utils::error::{Result, TsmeError};
use indexmap::IndexMap;
use serde_json::Value;

pub fn ensure_number(value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| TsmeError::TypeMismatchError {
        value: value.to_string(),
        expected: "number".to_string(),
    })
}

pub fn ensure_str(value: &Value) -> Result<&str> {
    value.as_str().ok_or_else(|| TsmeError::TypeMismatchError {
        value: value.to_string(),
        expected: "string".to_string(),
    })
}

fn ensure_array(value: &Value) -> Result<&Vec<Value>> {
    value.as_array().ok_or_else(|| TsmeError::TypeMismatchError {
        value: value.to_string(),
        expected: "array".to_string(),
    })
}

fn consumption_at(row: &[Value], delta_idx: usize) -> Result<Consumption> {
    let delta = row
        .get(delta_idx)
        .ok_or_else(|| TsmeError::unexpected("missing delta"))?;
    let total = row
        .get(delta_idx + 1)
        .ok_or_else(|| TsmeError::unexpected("missing total"))?;
    Ok(Consumption {
        delta: ensure_number(delta)?,
        total: ensure_number(total)?,
    })
}

/// Raises the portal's own error when a data response starts with `"ERR"`.
pub fn check_portal_error(json: &Value) -> Result<()> {
    let Some(items) = json.as_array() else {
        return Ok(());
    };
    if items.first().and_then(Value::as_str) == Some("ERR") {
        let message = match items.get(1) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "Unknown error".to_string(),
        };
        return Err(TsmeError::PortalError { message });
    }
    Ok(())
}

/// The daily row for `day` (1-based), or `None` when the month is shorter.
pub fn day_total(month: &Value, day: u32) -> Result<Option<f64>> {
    let rows = ensure_array(month)?;
    let Some(row) = rows.get(day.saturating_sub(1) as usize) else {
        return Ok(None);
    };
    let row = ensure_array(row)?;
    if row.len() != 3 {
        return Err(TsmeError::unexpected(format!(
            "daily row should have 3 items, got {}",
            row.len()
        )));
    }
    ensure_number(&row[2]).map(Some)
}

/// Yesterday's reading out of its month's daily rows.
pub fn day_consumption(month: &Value, day: u32) -> Result<Consumption> {
    let rows = ensure_array(month)?;
    let row = rows
        .get(day.saturating_sub(1) as usize)
        .ok_or_else(|| TsmeError::unexpected(format!("no data for day {}", day)))?;
    consumption_at(ensure_array(row)?, 1)
}

/// Daily rows keyed by their label, in portal order.
pub fn daily_map(month: &Value) -> Result<IndexMap<String, Consumption>> {
    let mut map = IndexMap::new();
    // an empty object stands for a month that could not be downloaded
    if month.as_object().is_some_and(|o| o.is_empty()) {
        return Ok(map);
    }
    for row in ensure_array(month)? {
        let row = ensure_array(row)?;
        let label = row
            .first()
            .ok_or_else(|| TsmeError::unexpected("empty daily row"))?;
        map.insert(ensure_str(label)?.to_string(), consumption_at(row, 1)?);
    }
    Ok(map)
}

#[derive(Debug, Clone, PartialEq)]
pub struct History {
    pub months: IndexMap<String, Consumption>,
    pub this_year_overall: f64,
    pub last_year_overall: f64,
    pub highest_monthly: f64,
}

pub fn history(json: &Value) -> Result<History> {
    let items = ensure_array(json).map_err(|_| TsmeError::unexpected("Cannot convert history"))?;
    let from_end = |offset: usize, what: &str| -> Result<f64> {
        items
            .len()
            .checked_sub(offset)
            .and_then(|idx| items.get(idx))
            .ok_or_else(|| TsmeError::unexpected(format!("Cannot convert {}", what)))
            .and_then(|value| {
                ensure_number(value)
                    .map_err(|_| TsmeError::unexpected(format!("Cannot convert {}", what)))
            })
    };

    let highest_monthly = from_end(1, "highest_monthly")?;
    let last_year_overall = from_end(2, "last_year_overall")?;
    let this_year_overall = from_end(3, "this_year_overall")?;

    let mut months = IndexMap::new();
    for row in &items[..items.len() - 3] {
        let parsed = ensure_array(row).and_then(|row| {
            let label = row
                .get(3)
                .ok_or_else(|| TsmeError::unexpected("missing month label"))?;
            Ok((ensure_str(label)?.to_string(), consumption_at(row, 1)?))
        });
        let (label, consumption) =
            parsed.map_err(|_| TsmeError::unexpected("Cannot convert history"))?;
        months.insert(label, consumption);
    }

    Ok(History {
        months,
        this_year_overall,
        last_year_overall,
        highest_monthly,
    })
}
