// Map scene construction
//
// A scene is a declarative list of markers and polylines, independent of any
// rendering technology; the frontend turns it into Leaflet layers. Building
// a scene is a pure function of the route table, the current vehicle
// positions, and the selection. No I/O happens here and nothing is cached.

use serde::Serialize;
use std::collections::HashMap;

use crate::shuttle_models::{
    destinations, format_fix_time, group_by_route, Result, RouteStop, TrackerError,
    VehiclePosition,
};

// ============================================================================
// Scene Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarkerStyle {
    /// Tracked vehicle in single-vehicle mode.
    VehicleCurrent,
    /// Fleet vehicle; telemetry only guarantees the last reported fix.
    VehicleLastKnown,
    Stop,
    LastStop,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Marker {
    pub latitude: f64,
    pub longitude: f64,
    pub label: String,
    pub style: MarkerStyle,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Polyline {
    pub route_name: String,
    pub points: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MapScene {
    pub markers: Vec<Marker>,
    pub polylines: Vec<Polyline>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SceneTab {
    pub destination: String,
    pub scene: MapScene,
}

// ============================================================================
// Builders
// ============================================================================

/// Single-vehicle variant: the selected route's stops and line, plus the
/// tracked vehicle. The last-stop coordinate is not drawn in this mode.
pub fn build_single_route_scene(
    stops: &[RouteStop],
    route_name: &str,
    vehicle: &VehiclePosition,
) -> Result<MapScene> {
    if stops.is_empty() {
        return Err(TrackerError::DataUnavailable(
            "No route data to display".to_string(),
        ));
    }

    let selected: Vec<&RouteStop> =
        stops.iter().filter(|s| s.route_name == route_name).collect();
    if selected.is_empty() {
        return Err(TrackerError::DataUnavailable(format!(
            "Unknown route '{}'",
            route_name
        )));
    }

    let mut scene = MapScene {
        markers: Vec::new(),
        polylines: Vec::new(),
    };
    emit_route(&mut scene, route_name, &selected, false);

    scene.markers.push(vehicle_marker(
        vehicle,
        MarkerStyle::VehicleCurrent,
        "Current Position",
    ));

    Ok(scene)
}

/// Fleet variant: every route with its last-stop flag, plus one marker per
/// vehicle with a valid fix. An empty fleet renders routes only.
pub fn build_fleet_scene(
    stops: &[RouteStop],
    fleet: &HashMap<String, VehiclePosition>,
) -> Result<MapScene> {
    if stops.is_empty() {
        return Err(TrackerError::DataUnavailable(
            "No route data to display".to_string(),
        ));
    }

    let mut scene = MapScene {
        markers: Vec::new(),
        polylines: Vec::new(),
    };

    for (route_name, rows) in group_by_route(stops) {
        emit_route(&mut scene, &route_name, &rows, true);
    }
    emit_fleet(&mut scene, fleet, None);

    Ok(scene)
}

/// Tabbed variant: one tab per distinct destination, each scoped to the
/// routes terminating there. Vehicle markers appear on every tab unless
/// `scope_vehicles_to_tab` is set, in which case a vehicle is shown only on
/// tabs whose routes appear in its name.
pub fn build_destination_tabs(
    stops: &[RouteStop],
    fleet: &HashMap<String, VehiclePosition>,
    scope_vehicles_to_tab: bool,
) -> Result<Vec<SceneTab>> {
    if stops.is_empty() {
        return Err(TrackerError::DataUnavailable(
            "No route data to display".to_string(),
        ));
    }

    let mut tabs = Vec::new();
    for destination in destinations(stops) {
        let subset: Vec<RouteStop> = stops
            .iter()
            .filter(|s| s.last_stop == destination)
            .cloned()
            .collect();

        let mut scene = MapScene {
            markers: Vec::new(),
            polylines: Vec::new(),
        };

        let groups = group_by_route(&subset);
        for (route_name, rows) in &groups {
            emit_route(&mut scene, route_name, rows, true);
        }

        let route_filter: Option<Vec<&str>> = if scope_vehicles_to_tab {
            Some(groups.iter().map(|(name, _)| name.as_str()).collect())
        } else {
            None
        };
        emit_fleet(&mut scene, fleet, route_filter.as_deref());

        tabs.push(SceneTab {
            destination,
            scene,
        });
    }

    Ok(tabs)
}

// ============================================================================
// Emission Helpers
// ============================================================================

/// Emits one route's stop markers and polyline. Rows arrive in source order,
/// which the route table guarantees is stop_sequence order. A route with
/// zero stops contributes nothing.
fn emit_route(scene: &mut MapScene, route_name: &str, rows: &[&RouteStop], with_last_stop: bool) {
    if rows.is_empty() {
        return;
    }

    let mut points: Vec<(f64, f64)> = Vec::new();
    for row in rows {
        scene.markers.push(Marker {
            latitude: row.stop_lat,
            longitude: row.stop_lon,
            label: format!("Stop {}: {}", row.stop_sequence, row.stop_intersection),
            style: MarkerStyle::Stop,
        });
        points.push((row.stop_lat, row.stop_lon));
    }

    if with_last_stop {
        // Every row of a route carries the same last-stop columns.
        let terminal = rows[rows.len() - 1];
        points.push((terminal.last_stop_lat, terminal.last_stop_lon));
        scene.markers.push(Marker {
            latitude: terminal.last_stop_lat,
            longitude: terminal.last_stop_lon,
            label: format!("Last Stop: {}", terminal.last_stop),
            style: MarkerStyle::LastStop,
        });
    }

    scene.polylines.push(Polyline {
        route_name: route_name.to_string(),
        points,
    });
}

/// Emits fleet vehicle markers in name order so scene output is stable.
/// `route_filter`, when present, keeps only vehicles whose name mentions one
/// of the listed routes.
fn emit_fleet(
    scene: &mut MapScene,
    fleet: &HashMap<String, VehiclePosition>,
    route_filter: Option<&[&str]>,
) {
    let mut names: Vec<&String> = fleet.keys().collect();
    names.sort();

    for name in names {
        if let Some(routes) = route_filter {
            if !routes.iter().any(|r| mentions_route(name, r)) {
                continue;
            }
        }
        scene.markers.push(vehicle_marker(
            &fleet[name],
            MarkerStyle::VehicleLastKnown,
            "Last Known Position",
        ));
    }
}

/// Case-insensitive check that a vehicle name refers to a route. Single-word
/// route names must match a whole token of the vehicle name, so route "A"
/// does not match "Spare 9"; multi-word names match as substrings.
fn mentions_route(vehicle_name: &str, route_name: &str) -> bool {
    let target = route_name.to_lowercase();
    if target.contains(char::is_whitespace) {
        vehicle_name.to_lowercase().contains(&target)
    } else {
        vehicle_name
            .split(|c: char| !c.is_alphanumeric())
            .any(|token| token.to_lowercase() == target)
    }
}

fn vehicle_marker(vehicle: &VehiclePosition, style: MarkerStyle, caption: &str) -> Marker {
    let label = match vehicle.fix_time {
        Some(t) => format!("{} ({}, {})", vehicle.name, caption, format_fix_time(t)),
        None => format!("{} ({})", vehicle.name, caption),
    };
    Marker {
        latitude: vehicle.latitude,
        longitude: vehicle.longitude,
        label,
        style,
    }
}

// ============================================================================
// Tests
// ============================================================================
