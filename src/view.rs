// View controller
//
// The original UI re-ran the whole page script on every interaction. Here
// the cycle is an explicit state machine (Idle -> Fetching -> Rendering ->
// Idle) behind source traits, so the whole flow runs and tests without the
// web layer. Any error drops straight back to Idle; nothing is retried and
// interactions are strictly sequential.

use std::collections::HashMap;

use crate::geotab::GeotabClient;
use crate::scene::{
    build_destination_tabs, build_fleet_scene, build_single_route_scene, MapScene, SceneTab,
};
use crate::shuttle_models::{
    create_http_client, fetch_route_table, Result, RouteStop, TrackerError, VehiclePosition,
    ROUTES_CSV_URL,
};

// ============================================================================
// Data Sources
// ============================================================================

pub trait PositionSource {
    fn vehicle_position(&self, vehicle_id: &str) -> Result<VehiclePosition>;
    fn fleet_positions(&self) -> Result<HashMap<String, VehiclePosition>>;
}

impl PositionSource for GeotabClient {
    fn vehicle_position(&self, vehicle_id: &str) -> Result<VehiclePosition> {
        GeotabClient::vehicle_position(self, vehicle_id)
    }

    fn fleet_positions(&self) -> Result<HashMap<String, VehiclePosition>> {
        GeotabClient::fleet_positions(self)
    }
}

pub trait RouteSource {
    fn route_table(&self) -> Result<Vec<RouteStop>>;
}

/// Fetches the routes CSV over HTTP on every call; the table is never
/// cached across render cycles.
pub struct HttpRouteSource {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpRouteSource {
    pub fn new() -> Result<Self> {
        Self::with_url(ROUTES_CSV_URL)
    }

    pub fn with_url(url: &str) -> Result<Self> {
        Ok(HttpRouteSource {
            client: create_http_client()?,
            url: url.to_string(),
        })
    }
}

impl RouteSource for HttpRouteSource {
    fn route_table(&self) -> Result<Vec<RouteStop>> {
        fetch_route_table(&self.client, &self.url)
    }
}

// ============================================================================
// State Machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    Idle,
    Fetching,
    Rendering,
}

pub struct ViewController<'a> {
    positions: &'a dyn PositionSource,
    routes: &'a dyn RouteSource,
    state: ViewState,
    pub scope_vehicles_to_tab: bool,
}

impl<'a> ViewController<'a> {
    pub fn new(positions: &'a dyn PositionSource, routes: &'a dyn RouteSource) -> Self {
        ViewController {
            positions,
            routes,
            state: ViewState::Idle,
            scope_vehicles_to_tab: false,
        }
    }

    pub fn state(&self) -> ViewState {
        self.state
    }

    /// Single-vehicle mode: route selection plus a free-text vehicle ID.
    /// A blank ID is rejected before anything is fetched.
    pub fn track_vehicle(&mut self, route_name: &str, vehicle_id: &str) -> Result<MapScene> {
        if vehicle_id.trim().is_empty() {
            return Err(TrackerError::InvalidUserInput(
                "Please enter a valid Vehicle ID".to_string(),
            ));
        }

        self.state = ViewState::Fetching;
        let result = self.run_track(route_name, vehicle_id);
        self.state = ViewState::Idle;
        result
    }

    fn run_track(&mut self, route_name: &str, vehicle_id: &str) -> Result<MapScene> {
        let stops = self.routes.route_table()?;
        let vehicle = self.positions.vehicle_position(vehicle_id)?;
        self.state = ViewState::Rendering;
        build_single_route_scene(&stops, route_name, &vehicle)
    }

    /// Fleet mode: all routes, all vehicles currently reporting a fix.
    pub fn show_fleet(&mut self) -> Result<MapScene> {
        self.state = ViewState::Fetching;
        let result = self.run_fleet();
        self.state = ViewState::Idle;
        result
    }

    fn run_fleet(&mut self) -> Result<MapScene> {
        let stops = self.routes.route_table()?;
        let fleet = self.positions.fleet_positions()?;
        self.state = ViewState::Rendering;
        build_fleet_scene(&stops, &fleet)
    }

    /// Tabbed fleet mode: one map per destination.
    pub fn show_fleet_by_destination(&mut self) -> Result<Vec<SceneTab>> {
        self.state = ViewState::Fetching;
        let result = self.run_fleet_tabs();
        self.state = ViewState::Idle;
        result
    }

    fn run_fleet_tabs(&mut self) -> Result<Vec<SceneTab>> {
        let stops = self.routes.route_table()?;
        let fleet = self.positions.fleet_positions()?;
        self.state = ViewState::Rendering;
        build_destination_tabs(&stops, &fleet, self.scope_vehicles_to_tab)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::MarkerStyle;
    use std::cell::Cell;

    struct FakePositions {
        vehicles: HashMap<String, VehiclePosition>,
        fleet: Result<HashMap<String, VehiclePosition>>,
        calls: Cell<usize>,
    }

    impl FakePositions {
        fn with_vehicle(id: &str, name: &str, lat: f64, lon: f64) -> Self {
            let position = VehiclePosition {
                name: name.to_string(),
                latitude: lat,
                longitude: lon,
                fix_time: None,
            };
            let mut vehicles = HashMap::new();
            vehicles.insert(id.to_string(), position.clone());
            let mut fleet = HashMap::new();
            fleet.insert(name.to_string(), position);
            FakePositions {
                vehicles,
                fleet: Ok(fleet),
                calls: Cell::new(0),
            }
        }

        fn failing_fleet(message: &str) -> Self {
            FakePositions {
                vehicles: HashMap::new(),
                fleet: Err(TrackerError::DataUnavailable(message.to_string())),
                calls: Cell::new(0),
            }
        }

        fn empty_fleet() -> Self {
            FakePositions {
                vehicles: HashMap::new(),
                fleet: Ok(HashMap::new()),
                calls: Cell::new(0),
            }
        }
    }

    impl PositionSource for FakePositions {
        fn vehicle_position(&self, vehicle_id: &str) -> Result<VehiclePosition> {
            self.calls.set(self.calls.get() + 1);
            self.vehicles.get(vehicle_id).cloned().ok_or_else(|| {
                TrackerError::PositionUnavailable(format!(
                    "No status data available for vehicle '{}'",
                    vehicle_id
                ))
            })
        }

        fn fleet_positions(&self) -> Result<HashMap<String, VehiclePosition>> {
            self.calls.set(self.calls.get() + 1);
            self.fleet.clone()
        }
    }

    struct FakeRoutes {
        table: Result<Vec<RouteStop>>,
    }

    impl RouteSource for FakeRoutes {
        fn route_table(&self) -> Result<Vec<RouteStop>> {
            self.table.clone()
        }
    }

    fn sample_routes() -> FakeRoutes {
        FakeRoutes {
            table: Ok(vec![RouteStop {
                route_name: "A".to_string(),
                stop_sequence: 1,
                stop_intersection: "Main St & 1st Ave".to_string(),
                stop_lat: 40.70,
                stop_lon: -73.90,
                last_stop: "Depot".to_string(),
                last_stop_lat: 40.80,
                last_stop_lon: -74.00,
            }]),
        }
    }

    #[test]
    fn blank_vehicle_id_is_rejected_before_any_fetch() {
        let positions = FakePositions::empty_fleet();
        let routes = sample_routes();
        let mut controller = ViewController::new(&positions, &routes);

        let err = controller.track_vehicle("A", "   ").unwrap_err();
        assert!(matches!(err, TrackerError::InvalidUserInput(_)));
        assert_eq!(positions.calls.get(), 0);
        assert_eq!(controller.state(), ViewState::Idle);
    }

    #[test]
    fn unknown_vehicle_is_position_unavailable_and_returns_to_idle() {
        let positions = FakePositions::with_vehicle("b1", "Bus 1", 40.75, -73.95);
        let routes = sample_routes();
        let mut controller = ViewController::new(&positions, &routes);

        let err = controller.track_vehicle("A", "b999").unwrap_err();
        assert!(matches!(err, TrackerError::PositionUnavailable(_)));
        assert_eq!(controller.state(), ViewState::Idle);
    }

    #[test]
    fn tracking_a_known_vehicle_builds_the_scene() {
        let positions = FakePositions::with_vehicle("b1", "Bus 1", 40.75, -73.95);
        let routes = sample_routes();
        let mut controller = ViewController::new(&positions, &routes);

        let scene = controller.track_vehicle("A", "b1").unwrap();
        let vehicle_markers: Vec<_> = scene
            .markers
            .iter()
            .filter(|m| m.style == MarkerStyle::VehicleCurrent)
            .collect();
        assert_eq!(vehicle_markers.len(), 1);
        assert_eq!(vehicle_markers[0].latitude, 40.75);
        assert_eq!(vehicle_markers[0].longitude, -73.95);
        assert_eq!(controller.state(), ViewState::Idle);
    }

    #[test]
    fn fleet_fetch_failure_is_an_error_not_an_empty_map() {
        let positions = FakePositions::failing_fleet("session expired");
        let routes = sample_routes();
        let mut controller = ViewController::new(&positions, &routes);

        let err = controller.show_fleet().unwrap_err();
        assert!(matches!(err, TrackerError::DataUnavailable(_)));
        assert_eq!(controller.state(), ViewState::Idle);
    }

    #[test]
    fn empty_fleet_still_renders_routes() {
        let positions = FakePositions::empty_fleet();
        let routes = sample_routes();
        let mut controller = ViewController::new(&positions, &routes);

        let scene = controller.show_fleet().unwrap();
        assert_eq!(scene.polylines.len(), 1);
        assert!(scene
            .markers
            .iter()
            .all(|m| m.style != MarkerStyle::VehicleLastKnown));
    }

    #[test]
    fn route_table_failure_halts_the_cycle() {
        let positions = FakePositions::with_vehicle("b1", "Bus 1", 40.75, -73.95);
        let routes = FakeRoutes {
            table: Err(TrackerError::DataUnavailable("routes CSV unreachable".to_string())),
        };
        let mut controller = ViewController::new(&positions, &routes);

        let err = controller.track_vehicle("A", "b1").unwrap_err();
        assert!(matches!(err, TrackerError::DataUnavailable(_)));
        assert_eq!(positions.calls.get(), 0);
        assert_eq!(controller.state(), ViewState::Idle);
    }

    #[test]
    fn tabbed_mode_honors_the_vehicle_scoping_flag() {
        let positions = FakePositions::with_vehicle("b1", "Route A Bus 1", 40.75, -73.95);
        let routes = sample_routes();
        let mut controller = ViewController::new(&positions, &routes);

        let tabs = controller.show_fleet_by_destination().unwrap();
        assert_eq!(tabs.len(), 1);
        assert_eq!(
            tabs[0]
                .scene
                .markers
                .iter()
                .filter(|m| m.style == MarkerStyle::VehicleLastKnown)
                .count(),
            1
        );

        controller.scope_vehicles_to_tab = true;
        let tabs = controller.show_fleet_by_destination().unwrap();
        assert_eq!(
            tabs[0]
                .scene
                .markers
                .iter()
                .filter(|m| m.style == MarkerStyle::VehicleLastKnown)
                .count(),
            1
        );
    }
}
