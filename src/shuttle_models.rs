// Data models and route-table loading for the NYC school bus employee shuttle tracker
//
// Route data source:
// - Static routes CSV: https://raw.githubusercontent.com/vr00n/shuttle-tracker/main/routes.csv
//   Columns: route_name, stop_sequence, stop_intersection, stop_lat, stop_lon,
//            last_stop, last_stop_lat, last_stop_lon
//
// Telemetry source: Geotab (see geotab.rs)

use chrono::{TimeZone, Utc};
use chrono_tz::America::New_York;
use reqwest::blocking;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Data Structures
// ============================================================================

/// One row of the routes CSV. A route is the ordered set of rows sharing a
/// `route_name`; `stop_sequence` values come pre-sorted in the source file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteStop {
    pub route_name: String,
    pub stop_sequence: u32,
    pub stop_intersection: String,
    pub stop_lat: f64,
    pub stop_lon: f64,
    pub last_stop: String,
    pub last_stop_lat: f64,
    pub last_stop_lon: f64,
}

/// Last-known GPS fix for one vehicle. `fix_time` is the epoch second of the
/// fix when the telemetry record carried one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VehiclePosition {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub fix_time: Option<i64>,
}

/// Route names and destinations in first-appearance order, feeding the
/// route dropdown and the destination tabs in the frontend.
#[derive(Debug, Clone, Serialize)]
pub struct RouteDirectory {
    pub routes: Vec<String>,
    pub destinations: Vec<String>,
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerError {
    /// Geotab rejected the credentials or they were never supplied. Fatal to
    /// the session; nothing works without an authenticated client.
    AuthenticationFailure(String),
    /// Route CSV unreachable or malformed, or a fleet-wide telemetry failure.
    /// Ends the current render cycle with a message, no retry.
    DataUnavailable(String),
    /// Single-vehicle mode only: no record, or no coordinates, for the
    /// requested vehicle.
    PositionUnavailable(String),
    /// Rejected before any fetch is attempted (e.g. blank vehicle ID).
    InvalidUserInput(String),
}

impl std::fmt::Display for TrackerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerError::AuthenticationFailure(e) => write!(f, "Authentication failed: {}", e),
            TrackerError::DataUnavailable(e) => write!(f, "Data unavailable: {}", e),
            TrackerError::PositionUnavailable(e) => write!(f, "Vehicle position unavailable: {}", e),
            TrackerError::InvalidUserInput(e) => write!(f, "Invalid input: {}", e),
        }
    }
}

impl std::error::Error for TrackerError {}

pub type Result<T> = std::result::Result<T, TrackerError>;

// ============================================================================
// Route Table Loading
// ============================================================================

pub const ROUTES_CSV_URL: &str =
    "https://raw.githubusercontent.com/vr00n/shuttle-tracker/main/routes.csv";

const REQUEST_TIMEOUT_SECS: u64 = 30;

pub fn create_http_client() -> Result<blocking::Client> {
    blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| TrackerError::DataUnavailable(format!("Failed to create HTTP client: {}", e)))
}

/// Fetches the routes CSV and parses it. Any failure is terminal for the
/// current render cycle and surfaces to the user as DataUnavailable.
pub fn fetch_route_table(client: &blocking::Client, url: &str) -> Result<Vec<RouteStop>> {
    let response = client
        .get(url)
        .send()
        .map_err(|e| TrackerError::DataUnavailable(format!("Failed to fetch routes CSV: {}", e)))?;

    if !response.status().is_success() {
        return Err(TrackerError::DataUnavailable(format!(
            "Routes CSV returned error: {}",
            response.status()
        )));
    }

    let body = response
        .text()
        .map_err(|e| TrackerError::DataUnavailable(format!("Failed to read routes CSV: {}", e)))?;

    parse_route_table(&body)
}

/// Parses CSV text into RouteStop rows. Missing required columns and
/// unparseable fields are malformed data, not skippable rows.
pub fn parse_route_table(text: &str) -> Result<Vec<RouteStop>> {
    let mut rdr = csv::Reader::from_reader(text.as_bytes());

    let mut stops = Vec::new();
    for result in rdr.deserialize::<RouteStop>() {
        let stop = result
            .map_err(|e| TrackerError::DataUnavailable(format!("Malformed routes CSV: {}", e)))?;
        stops.push(stop);
    }

    if stops.is_empty() {
        return Err(TrackerError::DataUnavailable(
            "Routes CSV contains no stops".to_string(),
        ));
    }

    Ok(stops)
}

/// Groups stops by route, keeping routes in first-appearance order and rows
/// in source order within each route. The source file is already sorted by
/// `stop_sequence` within a route; no defensive re-sort is performed here.
pub fn group_by_route(stops: &[RouteStop]) -> Vec<(String, Vec<&RouteStop>)> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&RouteStop>> = HashMap::new();

    for stop in stops {
        if !groups.contains_key(&stop.route_name) {
            order.push(stop.route_name.clone());
        }
        groups.entry(stop.route_name.clone()).or_default().push(stop);
    }

    order
        .into_iter()
        .map(|name| {
            let group = groups.remove(&name).unwrap_or_default();
            (name, group)
        })
        .collect()
}

/// Distinct route names in first-appearance order.
pub fn route_names(stops: &[RouteStop]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for stop in stops {
        if !names.contains(&stop.route_name) {
            names.push(stop.route_name.clone());
        }
    }
    names
}

/// Distinct `last_stop` destinations in first-appearance order. One
/// destination tab is rendered per entry.
pub fn destinations(stops: &[RouteStop]) -> Vec<String> {
    let mut dests: Vec<String> = Vec::new();
    for stop in stops {
        if !dests.contains(&stop.last_stop) {
            dests.push(stop.last_stop.clone());
        }
    }
    dests
}

/// Formats a GPS fix timestamp in the fleet's local time zone for marker
/// popups.
pub fn format_fix_time(timestamp: i64) -> String {
    match Utc.timestamp_opt(timestamp, 0) {
        chrono::LocalResult::Single(dt) => dt
            .with_timezone(&New_York)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        _ => "unknown time".to_string(),
    }
}

pub fn get_current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CSV: &str = "\
route_name,stop_sequence,stop_intersection,stop_lat,stop_lon,last_stop,last_stop_lat,last_stop_lon
A,1,Main St & 1st Ave,40.70,-73.90,Depot,40.80,-74.00
A,2,Main St & 2nd Ave,40.71,-73.91,Depot,40.80,-74.00
B,1,Broad St & 5th Ave,40.72,-73.92,Yard,40.81,-74.01
B,2,Broad St & 6th Ave,40.73,-73.93,Yard,40.81,-74.01
C,1,Park Row & Pearl St,40.74,-73.94,Depot,40.80,-74.00
";

    #[test]
    fn parses_all_rows() {
        let stops = parse_route_table(SAMPLE_CSV).unwrap();
        assert_eq!(stops.len(), 5);
        assert_eq!(stops[0].route_name, "A");
        assert_eq!(stops[0].stop_sequence, 1);
        assert_eq!(stops[0].stop_intersection, "Main St & 1st Ave");
        assert_eq!(stops[4].last_stop, "Depot");
        assert_eq!(stops[4].last_stop_lat, 40.80);
    }

    #[test]
    fn missing_column_is_data_unavailable() {
        let text = "\
route_name,stop_sequence,stop_intersection
A,1,Main St & 1st Ave
";
        let err = parse_route_table(text).unwrap_err();
        assert!(matches!(err, TrackerError::DataUnavailable(_)));
    }

    #[test]
    fn unparseable_coordinate_is_data_unavailable() {
        let text = "\
route_name,stop_sequence,stop_intersection,stop_lat,stop_lon,last_stop,last_stop_lat,last_stop_lon
A,1,Main St,not-a-number,-73.90,Depot,40.80,-74.00
";
        let err = parse_route_table(text).unwrap_err();
        assert!(matches!(err, TrackerError::DataUnavailable(_)));
    }

    #[test]
    fn empty_table_is_data_unavailable() {
        let text = "\
route_name,stop_sequence,stop_intersection,stop_lat,stop_lon,last_stop,last_stop_lat,last_stop_lon
";
        let err = parse_route_table(text).unwrap_err();
        assert!(matches!(err, TrackerError::DataUnavailable(_)));
    }

    #[test]
    fn grouping_preserves_every_row_exactly_once() {
        let stops = parse_route_table(SAMPLE_CSV).unwrap();
        let groups = group_by_route(&stops);

        assert_eq!(
            groups.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(),
            vec!["A", "B", "C"]
        );

        let flattened: Vec<&RouteStop> =
            groups.iter().flat_map(|(_, rows)| rows.iter().copied()).collect();
        assert_eq!(flattened.len(), stops.len());
        for stop in &stops {
            assert_eq!(flattened.iter().filter(|s| ***s == *stop).count(), 1);
        }
    }

    #[test]
    fn grouping_keeps_source_order_within_route() {
        let stops = parse_route_table(SAMPLE_CSV).unwrap();
        let groups = group_by_route(&stops);
        let (_, route_a) = &groups[0];
        let sequences: Vec<u32> = route_a.iter().map(|s| s.stop_sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[test]
    fn fix_time_formats_in_eastern_time() {
        // 2024-05-01T12:30:00Z is 08:30 EDT
        assert_eq!(format_fix_time(1714566600), "2024-05-01 08:30:00");
    }

    #[test]
    fn route_names_and_destinations_are_distinct_in_order() {
        let stops = parse_route_table(SAMPLE_CSV).unwrap();
        assert_eq!(route_names(&stops), vec!["A", "B", "C"]);
        assert_eq!(destinations(&stops), vec!["Depot", "Yard"]);
    }
}
