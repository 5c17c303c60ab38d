//! InfluxDB line protocol output formatter.

use crate::glucose::{GlucoseSample, GlucoseUnit};
use crate::output::OutputFormatter;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Boolean(bool),
    String(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Boolean(b) => write!(f, "{b}"),
            FieldValue::String(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        }
    }
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<String, String>,
    pub field_set: BTreeMap<String, FieldValue>,
    pub timestamp: Option<SystemTime>,
}

/// Escape commas, spaces and equals signs in tag keys and values.
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | ' ' | '=') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in data_point.tag_set.iter() {
        write!(fmt, ",{}={}", escape_tag(key), escape_tag(value))?;
    }
    Ok(())
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in data_point.field_set.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", key, value)?;
    }
    Ok(())
}

fn fmt_timestamp(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    if let Some(nanos) = data_point
        .timestamp
        .and_then(|time| time.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|since_epoch| since_epoch.as_nanos())
    {
        write!(fmt, " {}", nanos)?;
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.measurement)?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)?;
        fmt_timestamp(self, fmt)
    }
}

/// InfluxDB line protocol formatter.
///
/// Writes the glucose value in mg/dL, plus the value converted to mmol/L
/// when that is the display unit.
pub struct InfluxDbFormatter {
    measurement_name: String,
    unit: GlucoseUnit,
}

impl InfluxDbFormatter {
    pub fn new(measurement_name: String, unit: GlucoseUnit) -> Self {
        Self {
            measurement_name,
            unit,
        }
    }

    fn tag_set(&self, serial: &str) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("sensor".to_string(), serial.to_string());
        tags
    }

    fn field_set(&self, sample: &GlucoseSample) -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();
        fields.insert("glucose".into(), FieldValue::Float(sample.glucose));
        if self.unit == GlucoseUnit::Mmol {
            let mmol = (GlucoseUnit::to_mmol(sample.glucose) * 10.0).round() / 10.0;
            fields.insert("glucose_mmol".into(), FieldValue::Float(mmol));
        }
        if let Some(trend) = sample.trend {
            fields.insert("trend".into(), FieldValue::String(trend.to_string()));
        }
        fields.insert("valid".into(), FieldValue::Boolean(sample.is_state_valid));
        fields.insert(
            "sync_id".into(),
            FieldValue::String(sample.sync_identifier.clone()),
        );
        fields
    }

    fn to_data_point(&self, sample: &GlucoseSample, serial: &str) -> DataPoint {
        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set: self.tag_set(serial),
            field_set: self.field_set(sample),
            timestamp: Some(sample.start_date),
        }
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, sample: &GlucoseSample, serial: &str) -> String {
        format!("{}", self.to_data_point(sample, serial))
    }
}
