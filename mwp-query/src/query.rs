//! Composite Flux query construction.
//!
//! One query per window computes both aggregate families:
//! - sums over the flow and runtime fields
//! - means over the pressure, temperature and current fields
//!
//! Each family is grouped by (controller, zone); the two are unioned and
//! pivoted so the backend returns a single row per (controller, zone) with
//! the output columns listed in [`columns`].

use crate::range::QueryWindow;
use serde::Deserialize;
use std::fmt::{Display, Formatter, Write};

/// Output column names of the pivoted result.
pub mod columns {
    pub const TOTAL_FLOW: &str = "totalFlow";
    pub const TOTAL_SECONDS: &str = "totalSeconds";
    pub const AVG_PRESSURE: &str = "avgPSI";
    pub const AVG_TEMPERATURE: &str = "avgTempF";
    pub const AVG_CURRENT: &str = "avgAmps";
}

/// Tag and field names of the sensor measurement.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SensorFields {
    pub controller_tag: String,
    pub zone_tag: String,
    pub flow: String,
    pub runtime: String,
    pub pressure: String,
    pub temperature: String,
    pub current: String,
}

impl Default for SensorFields {
    fn default() -> Self {
        Self {
            controller_tag: "Controller".to_string(),
            zone_tag: "Zone".to_string(),
            flow: "intervalFlow".to_string(),
            runtime: "secondsOn".to_string(),
            pressure: "pressurePSI".to_string(),
            temperature: "temperatureF".to_string(),
            current: "amperage".to_string(),
        }
    }
}

/// Row selection by controller and, optionally, zone.
///
/// An empty controller list selects every controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerFilter {
    pub controllers: Vec<String>,
    pub zone: Option<String>,
}

impl ControllerFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn controllers<I, S>(controllers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            controllers: controllers.into_iter().map(Into::into).collect(),
            zone: None,
        }
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }
}

impl Display for ControllerFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.controllers.is_empty() {
            write!(f, "controllers=*")?;
        } else {
            write!(f, "controllers={}", self.controllers.join(","))?;
        }
        match &self.zone {
            Some(zone) => write!(f, " zone={}", zone),
            None => write!(f, " zone=*"),
        }
    }
}

/// Everything needed to render one aggregation query.
#[derive(Debug, Clone)]
pub struct AggregationQuery<'a> {
    pub bucket: &'a str,
    pub measurement: &'a str,
    pub timezone: Option<&'a str>,
    pub fields: &'a SensorFields,
    pub window: &'a QueryWindow,
    pub filter: &'a ControllerFilter,
}

impl AggregationQuery<'_> {
    /// Renders the Flux text of the query.
    pub fn to_flux(&self) -> String {
        let fields = self.fields;
        let controller = fields.controller_tag.as_str();
        let zone = fields.zone_tag.as_str();
        let range = self.window.flux_range();

        let mut query = String::new();

        if let Some(tz) = self.timezone {
            query.push_str("import \"timezone\"\n");
            let _ = writeln!(
                query,
                "option location = timezone.location(name: {})\n",
                flux_string(tz)
            );
        }

        // Shared row selection
        query.push_str("filterBase = (tables=<-, fieldFilter) =>\n  tables\n");
        let _ = writeln!(
            query,
            "    |> filter(fn: (r) => r._measurement == {})",
            flux_string(self.measurement)
        );
        let _ = writeln!(
            query,
            "    |> filter(fn: (r) => exists r.{c} and r.{c} != \"\" and exists r.{z} and r.{z} != \"\")",
            c = controller,
            z = zone
        );
        if !self.filter.controllers.is_empty() {
            let _ = writeln!(
                query,
                "    |> filter(fn: (r) => {})",
                equality_any(controller, self.filter.controllers.as_slice())
            );
        }
        if let Some(zone_id) = &self.filter.zone {
            let _ = writeln!(
                query,
                "    |> filter(fn: (r) => r.{} == {})",
                zone,
                flux_string(zone_id)
            );
        }
        query.push_str("    |> filter(fn: fieldFilter)\n\n");

        let group_fields = format!("[\"{}\", \"{}\", \"_field\"]", controller, zone);
        let group_keys = format!("[\"{}\", \"{}\"]", controller, zone);

        for (name, function, members) in [
            ("sums", "sum", [fields.flow.as_str(), fields.runtime.as_str()].as_slice()),
            (
                "means",
                "mean",
                [
                    fields.pressure.as_str(),
                    fields.temperature.as_str(),
                    fields.current.as_str(),
                ]
                .as_slice(),
            ),
        ] {
            let _ = writeln!(query, "{} = from(bucket: {})", name, flux_string(self.bucket));
            let _ = writeln!(query, "  |> range({})", range);
            let _ = writeln!(
                query,
                "  |> filterBase(fieldFilter: (r) => {})",
                equality_any("_field", members)
            );
            let _ = writeln!(query, "  |> group(columns: {})", group_fields);
            let _ = writeln!(query, "  |> {}()", function);
            let _ = writeln!(query, "  |> group(columns: {})\n", group_keys);
        }

        query.push_str("union(tables: [sums, means])\n");
        let _ = writeln!(
            query,
            "  |> pivot(rowKey: {}, columnKey: [\"_field\"], valueColumn: \"_value\")",
            group_keys
        );
        let mut entries = vec![
            format!("      {c}: r.{c}", c = controller),
            format!("      {z}: r.{z}", z = zone),
        ];
        for (column, source) in [
            (columns::TOTAL_FLOW, &fields.flow),
            (columns::TOTAL_SECONDS, &fields.runtime),
            (columns::AVG_PRESSURE, &fields.pressure),
            (columns::AVG_TEMPERATURE, &fields.temperature),
            (columns::AVG_CURRENT, &fields.current),
        ] {
            entries.push(format!(
                "      {}: if exists r.{s} then r.{s} else 0.0",
                column,
                s = source
            ));
        }
        query.push_str("  |> map(fn: (r) => ({\n");
        query.push_str(&entries.join(",\n"));
        query.push('\n');
        query.push_str("  }))\n");
        query.push_str("  |> yield(name: \"results\")\n");

        query
    }
}

/// `r.col == "a" or r.col == "b"`
fn equality_any<S: AsRef<str>>(column: &str, values: &[S]) -> String {
    values
        .iter()
        .map(|v| format!("r.{} == {}", column, flux_string(v.as_ref())))
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Quotes a value as a Flux string literal.
fn flux_string(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '$' => quoted.push_str("\\$"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
