//! Demonstration tools covering the whole result surface: plain text,
//! progress notifications, structured content, and base64 blobs.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use mcp_relay::{CallToolResult, Content, ErrorData, Notifier, ToolRegistry, ToolRoute};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

pub fn registry() -> ToolRegistry {
    ToolRegistry::new()
        .with_route(ToolRoute::new("echo", "Echo a message back", echo))
        .with_route(
            ToolRoute::new(
                "simulate_emissions",
                "Project annual emissions over a horizon, reporting progress per year",
                simulate_emissions,
            )
            .with_output_schema::<EmissionsSeries>(),
        )
        .with_route(ToolRoute::new(
            "search_directory",
            "Look a person up in the staff directory",
            search_directory,
        ))
        .with_route(ToolRoute::new(
            "convert_document",
            "Convert a document body to another format",
            convert_document,
        ))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EchoParams {
    /// Text to echo back.
    pub message: String,
}

async fn echo(params: EchoParams, _notifier: Notifier) -> Result<CallToolResult, ErrorData> {
    Ok(CallToolResult::success(vec![Content::text(params.message)]))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SimulateEmissionsParams {
    /// First year of the projection.
    pub start_year: u32,
    /// Number of years to project, capped at 50.
    pub years: u32,
    /// Emissions in the start year, in tonnes CO2e.
    pub baseline_tonnes: f64,
    /// Fractional reduction applied each year (0.05 means 5 percent).
    #[serde(default)]
    pub annual_reduction: f64,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct EmissionsPoint {
    /// Calendar year of the data point.
    pub year: u32,
    /// Projected emissions for that year, in tonnes CO2e.
    pub tonnes: f64,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct EmissionsSeries {
    pub series: Vec<EmissionsPoint>,
}

async fn simulate_emissions(
    params: SimulateEmissionsParams,
    notifier: Notifier,
) -> Result<CallToolResult, ErrorData> {
    let years = params.years.clamp(1, 50);
    info!(
        start_year = params.start_year,
        years, "starting emissions projection"
    );

    let mut series = Vec::with_capacity(years as usize);
    let mut tonnes = params.baseline_tonnes;
    for step in 0..years {
        let year = params.start_year.saturating_add(step);
        series.push(EmissionsPoint {
            year,
            tonnes: (tonnes * 10.0).round() / 10.0,
        });
        debug!(year, tonnes, "projection step");
        notifier
            .progress(
                (step + 1) as f64,
                Some(years as f64),
                Some(format!("projected {year}")),
            )
            .await;
        tonnes *= 1.0 - params.annual_reduction;
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let last = &series[series.len() - 1];
    let summary = format!(
        "Projected {} years: {:.1}t in {} down to {:.1}t in {}",
        years, params.baseline_tonnes, params.start_year, last.tonnes, last.year
    );
    let chart = render_chart(&series);
    Ok(
        CallToolResult::success(vec![
            Content::text(summary),
            Content::image(BASE64.encode(chart), "image/svg+xml"),
        ])
        .with_structured_content(json!({ "series": series })),
    )
}

/// Plot the series as a polyline in a fixed 320x120 viewbox.
fn render_chart(series: &[EmissionsPoint]) -> String {
    let max = series
        .iter()
        .map(|point| point.tonnes)
        .fold(1.0_f64, f64::max);
    let step = if series.len() > 1 {
        300.0 / (series.len() - 1) as f64
    } else {
        0.0
    };
    let points = series
        .iter()
        .enumerate()
        .map(|(i, point)| {
            let x = 10.0 + step * i as f64;
            let y = 110.0 - 100.0 * point.tonnes / max;
            format!("{x:.1},{y:.1}")
        })
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"0 0 320 120\">\
         <polyline fill=\"none\" stroke=\"black\" points=\"{points}\"/></svg>"
    )
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchDirectoryParams {
    /// Name or name fragment to look up, case-insensitive.
    pub name: String,
}

const DIRECTORY: &[(&str, &str, &str)] = &[
    ("Maya Lindqvist", "Platform engineer", "maya@example.com"),
    ("Jonas Berg", "Media pipeline lead", "jonas@example.com"),
    ("Priya Natarajan", "Site reliability", "priya@example.com"),
    ("Tomas Eriksson", "Product", "tomas@example.com"),
];

async fn search_directory(
    params: SearchDirectoryParams,
    _notifier: Notifier,
) -> Result<CallToolResult, ErrorData> {
    info!(name = %params.name, "directory lookup");
    let needle = params.name.to_lowercase();
    let matches: Vec<_> = DIRECTORY
        .iter()
        .filter(|(name, _, _)| name.to_lowercase().contains(&needle))
        .collect();

    if matches.is_empty() {
        return Ok(CallToolResult::success(vec![Content::text(format!(
            "No directory entries match '{}'",
            params.name
        ))])
        .with_structured_content(json!({ "entries": [] })));
    }

    let lines = matches
        .iter()
        .map(|(name, role, email)| format!("{name} ({role}) <{email}>"))
        .collect::<Vec<_>>()
        .join("\n");
    let entries = matches
        .iter()
        .map(|(name, role, email)| json!({ "name": name, "role": role, "email": email }))
        .collect::<Vec<_>>();
    Ok(CallToolResult::success(vec![Content::text(lines)])
        .with_structured_content(json!({ "entries": entries })))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ConvertDocumentParams {
    /// Document body to convert.
    pub content: String,
    /// Target format, either "html" or "markdown".
    pub target_format: String,
}

async fn convert_document(
    params: ConvertDocumentParams,
    _notifier: Notifier,
) -> Result<CallToolResult, ErrorData> {
    let (converted, mime_type) = match params.target_format.as_str() {
        "html" => (
            format!("<article>\n<p>{}</p>\n</article>\n", params.content),
            "text/html",
        ),
        "markdown" => (
            format!("# Converted document\n\n{}\n", params.content),
            "text/markdown",
        ),
        other => {
            return Err(ErrorData::invalid_params(
                format!("unsupported target format '{other}'"),
                None,
            ));
        }
    };
    let note = format!(
        "Converted {} bytes to {}",
        params.content.len(),
        params.target_format
    );
    Ok(CallToolResult::success(vec![Content::text(note)]).with_structured_content(json!({
        "mimeType": mime_type,
        "data": BASE64.encode(converted),
    })))
}
