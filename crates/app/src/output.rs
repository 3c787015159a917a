//! CSV and JSON rendering of observation rows.

use simulation::observation::{metadata, DailyObservation, OutputSpec, OutputValue};

/// CSV header: fixed date/status columns followed by the requested outputs.
pub fn csv_header(spec: &OutputSpec) -> String {
    let mut columns = vec!["day".to_string(), "year".to_string(), "doy".to_string()];
    for request in &spec.requests {
        columns.push(metadata(request.id).name.to_string());
    }
    columns.join(",")
}

/// Second header line carrying the units.
pub fn csv_units(spec: &OutputSpec) -> String {
    let mut columns = vec![String::new(), String::new(), String::new()];
    for request in &spec.requests {
        columns.push(metadata(request.id).unit.to_string());
    }
    columns.join(",")
}

fn format_value(value: &OutputValue, rounding: u32) -> String {
    let digits = rounding as usize;
    match value {
        OutputValue::Number(v) => format!("{v:.digits$}"),
        OutputValue::Integer(v) => v.to_string(),
        OutputValue::Text(v) => v.clone(),
        OutputValue::Series(values) => {
            let joined: Vec<String> = values
                .iter()
                .map(|v| format!("{v:.digits$}"))
                .collect();
            format!("\"{}\"", joined.join(";"))
        }
    }
}

pub fn csv_row(observation: &DailyObservation) -> String {
    let mut columns = vec![
        observation.day.to_string(),
        observation.year.to_string(),
        observation.julian_day.to_string(),
    ];
    for (id, value) in &observation.values {
        columns.push(format_value(value, metadata(*id).rounding));
    }
    columns.join(",")
}

pub fn to_csv(spec: &OutputSpec, rows: &[DailyObservation]) -> String {
    let mut out = String::new();
    out.push_str(&csv_header(spec));
    out.push('\n');
    out.push_str(&csv_units(spec));
    out.push('\n');
    for row in rows {
        out.push_str(&csv_row(row));
        out.push('\n');
    }
    out
}

pub fn to_json(rows: &[DailyObservation]) -> Result<String, String> {
    serde_json::to_string_pretty(rows).map_err(|e| format!("cannot serialise output: {e}"))
}
