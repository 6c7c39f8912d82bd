// Employee shuttle tracker server with embedded frontend
// Geotab fleet telemetry + static routes CSV, rendered on a Leaflet map

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

mod geotab;
mod scene;
mod shuttle_models;
mod view;

use geotab::{GeotabClient, GeotabConfig};
use shuttle_models::{destinations, route_names, RouteDirectory, TrackerError};
use view::{HttpRouteSource, RouteSource, ViewController};

// Embed static files at compile time
const INDEX_HTML: &str = include_str!("../static/shuttle.html");
const MAP_JS: &str = include_str!("../static/shuttle-map.js");

#[derive(Clone)]
struct AppState {
    client: Arc<GeotabClient>,
    routes: Arc<HttpRouteSource>,
    scope_vehicles_to_tab: bool,
}

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
    timestamp: i64,
    sources: Vec<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
            timestamp: shuttle_models::get_current_timestamp(),
            sources: vec!["Geotab".to_string(), "routes.csv".to_string()],
        }
    }

    fn error(message: String) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
            timestamp: shuttle_models::get_current_timestamp(),
            sources: vec![],
        }
    }
}

fn error_response(err: TrackerError) -> HttpResponse {
    let body = ApiResponse::<()>::error(err.to_string());
    match err {
        TrackerError::InvalidUserInput(_) => HttpResponse::BadRequest().json(body),
        TrackerError::PositionUnavailable(_) => HttpResponse::NotFound().json(body),
        TrackerError::DataUnavailable(_) => HttpResponse::BadGateway().json(body),
        TrackerError::AuthenticationFailure(_) => HttpResponse::InternalServerError().json(body),
    }
}

// ============================================================================
// Frontend Routes
// ============================================================================

async fn serve_index() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}

async fn serve_js() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("application/javascript; charset=utf-8")
        .body(MAP_JS)
}

// ============================================================================
// API Endpoints
// ============================================================================

async fn get_routes(state: web::Data<AppState>) -> HttpResponse {
    let state = state.into_inner();
    match tokio::task::spawn_blocking(move || {
        let stops = state.routes.route_table()?;
        Ok::<_, TrackerError>(RouteDirectory {
            routes: route_names(&stops),
            destinations: destinations(&stops),
        })
    })
    .await
    {
        Ok(Ok(directory)) => {
            println!(
                "🗺️  Route directory requested: {} routes, {} destinations",
                directory.routes.len(),
                directory.destinations.len()
            );
            HttpResponse::Ok().json(ApiResponse::success(directory))
        }
        Ok(Err(e)) => {
            eprintln!("⚠️  Route directory failed: {}", e);
            error_response(e)
        }
        Err(e) => {
            eprintln!("❌ Route directory task panicked: {}", e);
            HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error("Route lookup task panicked".to_string()))
        }
    }
}

#[derive(Deserialize)]
struct TrackQuery {
    route: String,
    vehicle: String,
}

async fn track_vehicle(
    state: web::Data<AppState>,
    query: web::Query<TrackQuery>,
) -> HttpResponse {
    let state = state.into_inner();
    let query = query.into_inner();

    match tokio::task::spawn_blocking(move || {
        let mut controller =
            ViewController::new(state.client.as_ref(), state.routes.as_ref());
        controller.track_vehicle(&query.route, &query.vehicle)
    })
    .await
    {
        Ok(Ok(scene)) => {
            println!(
                "🚌 Vehicle tracked: {} markers, {} polylines",
                scene.markers.len(),
                scene.polylines.len()
            );
            HttpResponse::Ok().json(ApiResponse::success(scene))
        }
        Ok(Err(e)) => {
            eprintln!("⚠️  Vehicle tracking failed: {}", e);
            error_response(e)
        }
        Err(e) => {
            eprintln!("❌ Tracking task panicked: {}", e);
            HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error("Tracking task panicked".to_string()))
        }
    }
}

async fn get_fleet(state: web::Data<AppState>) -> HttpResponse {
    let state = state.into_inner();
    match tokio::task::spawn_blocking(move || {
        let mut controller =
            ViewController::new(state.client.as_ref(), state.routes.as_ref());
        controller.show_fleet()
    })
    .await
    {
        Ok(Ok(scene)) => {
            println!(
                "🚍 Fleet scene: {} markers, {} polylines",
                scene.markers.len(),
                scene.polylines.len()
            );
            HttpResponse::Ok().json(ApiResponse::success(scene))
        }
        Ok(Err(e)) => {
            eprintln!("⚠️  Fleet scene failed: {}", e);
            error_response(e)
        }
        Err(e) => {
            eprintln!("❌ Fleet task panicked: {}", e);
            HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error("Fleet task panicked".to_string()))
        }
    }
}

async fn get_fleet_tabs(state: web::Data<AppState>) -> HttpResponse {
    let state = state.into_inner();
    match tokio::task::spawn_blocking(move || {
        let mut controller =
            ViewController::new(state.client.as_ref(), state.routes.as_ref());
        controller.scope_vehicles_to_tab = state.scope_vehicles_to_tab;
        controller.show_fleet_by_destination()
    })
    .await
    {
        Ok(Ok(tabs)) => {
            println!("🗂️  Fleet tabs: {} destinations", tabs.len());
            HttpResponse::Ok().json(ApiResponse::success(tabs))
        }
        Ok(Err(e)) => {
            eprintln!("⚠️  Fleet tabs failed: {}", e);
            error_response(e)
        }
        Err(e) => {
            eprintln!("❌ Fleet tabs task panicked: {}", e);
            HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error("Fleet tabs task panicked".to_string()))
        }
    }
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "Employee Shuttle Tracker",
        "version": "0.1.0",
        "sources": ["Geotab", "routes.csv"],
        "timestamp": shuttle_models::get_current_timestamp(),
        "embedded_frontend": true
    }))
}

// ============================================================================
// Server Setup
// ============================================================================

async fn run_server(state: AppState) -> std::io::Result<()> {
    println!("\n🌐 Server running on: http://0.0.0.0:8080");
    println!("📱 Web UI available at: http://localhost:8080\n");

    println!("📍 Available Routes:");
    println!("   GET  /                          - Web UI (embedded)");
    println!("   GET  /shuttle-map.js            - JavaScript (embedded)");
    println!("   GET  /health                    - Health check");
    println!("   GET  /api/shuttle/routes        - Route names and destinations");
    println!("   GET  /api/shuttle/track         - Single-vehicle scene (?route=..&vehicle=..)");
    println!("   GET  /api/shuttle/fleet         - Fleet scene, all routes");
    println!("   GET  /api/shuttle/fleet/tabs    - Fleet scenes grouped by destination\n");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            // Frontend routes
            .route("/", web::get().to(serve_index))
            .route("/shuttle-map.js", web::get().to(serve_js))
            // Health check
            .route("/health", web::get().to(health_check))
            // API routes
            .service(
                web::scope("/api/shuttle")
                    .route("/routes", web::get().to(get_routes))
                    .route("/track", web::get().to(track_vehicle))
                    .route("/fleet", web::get().to(get_fleet))
                    .route("/fleet/tabs", web::get().to(get_fleet_tabs)),
            )
    })
    .bind(("0.0.0.0", 8080))?
    .run()
    .await
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> std::io::Result<()> {
    println!("\n╔════════════════════════════════════════════╗");
    println!("║   🚌 Employee Shuttle Tracker Server       ║");
    println!("╚════════════════════════════════════════════╝\n");

    println!("🔐 Authenticating with Geotab...");
    let config = match GeotabConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            eprintln!("   Set GEOTAB_USERNAME and GEOTAB_PASSWORD and restart.");
            std::process::exit(1);
        }
    };

    // Authentication failure is fatal: nothing works without a session.
    let client = match GeotabClient::authenticate(&config) {
        Ok(client) => {
            println!("✓ Authenticated against database '{}'", config.database);
            client
        }
        Err(e) => {
            eprintln!("❌ {}", e);
            eprintln!("   Check credentials for server '{}'.", config.server);
            std::process::exit(1);
        }
    };

    let routes = match HttpRouteSource::new() {
        Ok(routes) => routes,
        Err(e) => {
            eprintln!("❌ Failed to set up route source: {}", e);
            std::process::exit(1);
        }
    };

    let scope_vehicles_to_tab = std::env::var("SHUTTLE_SCOPE_VEHICLES_TO_TAB")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if scope_vehicles_to_tab {
        println!("ℹ️  Destination tabs will only show vehicles named for their routes");
    }

    let state = AppState {
        client: Arc::new(client),
        routes: Arc::new(routes),
        scope_vehicles_to_tab,
    };

    actix_web::rt::System::new().block_on(run_server(state))
}
