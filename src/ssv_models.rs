// API models and data fetching for the Subpar station-complex service
// Public API: https://api.subpar.nyc
//
// API Endpoints:
// - Complex info (metadata, entrances, elevators, upcoming trains): {API}/complex/{id}
// - Upcoming arrivals only: {API}/upcoming/{id}
// - Elevators and escalators only: {API}/elevators/{id}

use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::America::New_York;
use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;
use reqwest::blocking;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// Data Structures
// ============================================================================

/// `[latitude, longitude]`, as served by the API.
pub type Coord = (f64, f64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexInfo {
    pub meta: Option<ComplexMeta>,
    #[serde(default)]
    pub upcoming: Vec<UpcomingTrain>,
    #[serde(default)]
    pub elevators: Vec<Elevator>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexMeta {
    pub name: String,
    pub ada: AdaStatus,
    #[serde(default)]
    pub ada_notes: Option<String>,
    #[serde(default)]
    pub routes: Vec<String>,
    pub coord: Coord,
    #[serde(default)]
    pub stop_name: Option<String>,
    #[serde(default)]
    pub entrances: Vec<Entrance>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdaStatus {
    #[serde(alias = "0")]
    No,
    #[serde(alias = "1")]
    Full,
    #[serde(alias = "2")]
    Partial,
}

impl fmt::Display for AdaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdaStatus::No => write!(f, "No"),
            AdaStatus::Full => write!(f, "Full"),
            AdaStatus::Partial => write!(f, "Partial"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entrance {
    pub entrance_type: EntranceType,
    #[serde(deserialize_with = "number_or_quoted")]
    pub entrance_latitude: f64,
    #[serde(deserialize_with = "number_or_quoted")]
    pub entrance_longitude: f64,
    #[serde(default)]
    pub daytime_routes: Vec<String>,
}

impl Entrance {
    pub fn coord(&self) -> Coord {
        (self.entrance_latitude, self.entrance_longitude)
    }
}

/// Physical entrance category. Anything the feed invents later lands in
/// `Other` and is not drawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntranceType {
    Elevator,
    StairEscalator,
    EasementStreet,
    EasementPassage,
    Escalator,
    Stair,
    Other(String),
}

impl From<String> for EntranceType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Elevator" => EntranceType::Elevator,
            "Stair/Escalator" => EntranceType::StairEscalator,
            "Easement - Street" => EntranceType::EasementStreet,
            "Easement - Passage" => EntranceType::EasementPassage,
            "Escalator" => EntranceType::Escalator,
            "Stair" => EntranceType::Stair,
            _ => EntranceType::Other(s),
        }
    }
}

impl From<EntranceType> for String {
    fn from(t: EntranceType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for EntranceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntranceType::Elevator => "Elevator",
            EntranceType::StairEscalator => "Stair/Escalator",
            EntranceType::EasementStreet => "Easement - Street",
            EntranceType::EasementPassage => "Easement - Passage",
            EntranceType::Escalator => "Escalator",
            EntranceType::Stair => "Stair",
            EntranceType::Other(s) => s.as_str(),
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpcomingTrain {
    pub trip: String,
    #[serde(default)]
    pub stop: Option<String>,
    pub arrival: DateTime<Utc>,
    pub message: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Elevator {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub lines: Vec<String>,
    pub is_escalator: bool,
    pub ada: bool,
    pub is_active: bool,
    #[serde(default)]
    pub desc: String,
    pub serving: String,
    #[serde(default)]
    pub buses: String,
    #[serde(default)]
    pub alt_desc: String,
    #[serde(default)]
    pub outage: Option<Outage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outage {
    pub start: DateTime<FixedOffset>,
    pub est_return: DateTime<FixedOffset>,
    #[serde(default)]
    pub reason: String,
    /// Whether the alternate path is ADA accessible.
    #[serde(default)]
    pub ada: bool,
    #[serde(default)]
    pub upcoming: bool,
    #[serde(default)]
    pub maintenance: bool,
    #[serde(default)]
    pub asof: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    North,
    South,
}

impl Direction {
    pub fn header(&self) -> &'static str {
        match self {
            Direction::North => "N/E",
            Direction::South => "S/W",
        }
    }
}

/// Route and direction decoded from a trip identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripRoute {
    pub route: String,
    pub direction: Direction,
}

// Entrance coordinates come through as numbers from the service but as
// quoted strings from the raw open-data dump.
fn number_or_quoted<'de, D: Deserializer<'de>>(deser: D) -> std::result::Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrQuoted {
        Number(f64),
        Quoted(String),
    }

    match NumberOrQuoted::deserialize(deser)? {
        NumberOrQuoted::Number(x) => Ok(x),
        NumberOrQuoted::Quoted(s) => s
            .trim()
            .parse()
            .map_err(|e| serde::de::Error::custom(format!("bad coordinate '{}': {}", s, e))),
    }
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum SSVError {
    MissingIdentifier(String),
    NetworkError(String),
    ParseError(String),
    TripFormat(String),
}

impl fmt::Display for SSVError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SSVError::MissingIdentifier(loc) => write!(f, "No complex id found in \"{}\"", loc),
            SSVError::NetworkError(e) => write!(f, "Network error: {}", e),
            SSVError::ParseError(e) => write!(f, "Parse error: {}", e),
            SSVError::TripFormat(trip) => write!(f, "Unrecognized trip id \"{}\"", trip),
        }
    }
}

impl std::error::Error for SSVError {}

pub type Result<T> = std::result::Result<T, SSVError>;

// ============================================================================
// Identifier and trip parsing
// ============================================================================

lazy_static! {
    static ref QUERY_ID: Regex = Regex::new(r"id=(\d+)").unwrap();
    // e.g. "085350_1..N03R", "084200_6X..N01R", "130600_GS.S01R".
    // Route and direction must be split by at least one non-alphanumeric
    // character, otherwise "_6N" could be route "6N" or route "6" north.
    static ref TRIP_ROUTE: Regex = Regex::new(r"_([A-Za-z0-9]+?)X?[^A-Za-z0-9]+([NS])").unwrap();
}

pub struct SSVModels;

impl SSVModels {
    const LOCATION_BASE: &'static str = "http://localhost/";

    /// Pull the complex id out of a location such as
    /// `https://subpar.nyc/c/611`, `/c/611/` or `/index.html?id=611`.
    pub fn resolve_complex_id(location: &str) -> Result<String> {
        let missing = || SSVError::MissingIdentifier(location.to_string());

        let url = match Url::parse(location) {
            Ok(url) => url,
            Err(_) => Url::parse(Self::LOCATION_BASE)
                .and_then(|base| base.join(location))
                .map_err(|_| missing())?,
        };

        if let Some(segments) = url.path_segments() {
            let segments: Vec<&str> = segments.collect();
            if let Some(idx) = segments.iter().position(|s| *s == "c") {
                if let Some(id) = segments.get(idx + 1).filter(|s| !s.is_empty()) {
                    debug!("complex id {} from path {}", id, url.path());
                    return Ok(id.to_string());
                }
            }
        }

        url.query()
            .and_then(|q| QUERY_ID.captures(q))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(missing)
    }

    pub fn parse_trip(trip: &str) -> Result<TripRoute> {
        let caps = TRIP_ROUTE
            .captures(trip)
            .ok_or_else(|| SSVError::TripFormat(trip.to_string()))?;
        let direction = match &caps[2] {
            "N" => Direction::North,
            _ => Direction::South,
        };
        Ok(TripRoute {
            route: caps[1].to_string(),
            direction,
        })
    }

    /// `Math.round`-style rounding: halves go towards positive infinity.
    pub fn round_half_up(x: f64) -> f64 {
        (x + 0.5).floor()
    }

    /// Calendar date of an outage boundary, as the service reported it.
    pub fn format_date(dt: &DateTime<FixedOffset>) -> String {
        dt.format("%Y-%m-%d").to_string()
    }

    pub fn format_time_ny(dt: &DateTime<Utc>) -> String {
        dt.with_timezone(&New_York).format("%H:%M:%S").to_string()
    }
}

// ============================================================================
// HTTP client
// ============================================================================

/// Remote source of station data. Implementations must be shareable with
/// the background fetch threads.
pub trait StationApi: Send + Sync + 'static {
    fn fetch_complex_info(&self, id: &str) -> Result<ComplexInfo>;
    fn fetch_upcoming(&self, id: &str) -> Result<Vec<UpcomingTrain>>;
    fn fetch_elevators(&self, id: &str) -> Result<Vec<Elevator>>;
}

pub struct ApiClient {
    base_url: String,
    client: blocking::Client,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SSVError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(ApiClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        info!("querying {}", url);

        let response = self.client.get(&url)
            .send()
            .map_err(|e| SSVError::NetworkError(format!("Failed to fetch {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(SSVError::NetworkError(format!("API returned error: {} for {}", response.status(), url)));
        }

        let body = response.text()
            .map_err(|e| SSVError::NetworkError(format!("Failed to read response: {}", e)))?;

        serde_json::from_str(&body)
            .map_err(|e| SSVError::ParseError(format!("Invalid JSON from {}: {}", url, e)))
    }
}

impl StationApi for ApiClient {
    fn fetch_complex_info(&self, id: &str) -> Result<ComplexInfo> {
        self.get_json(&format!("complex/{}", id))
    }

    fn fetch_upcoming(&self, id: &str) -> Result<Vec<UpcomingTrain>> {
        self.get_json(&format!("upcoming/{}", id))
    }

    fn fetch_elevators(&self, id: &str) -> Result<Vec<Elevator>> {
        self.get_json(&format!("elevators/{}", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_from_path_segment() {
        assert_eq!(SSVModels::resolve_complex_id("/x/c/42/y").unwrap(), "42");
        assert_eq!(SSVModels::resolve_complex_id("https://subpar.nyc/c/611").unwrap(), "611");
        assert_eq!(SSVModels::resolve_complex_id("/c/611/").unwrap(), "611");
    }

    #[test]
    fn test_resolve_from_query() {
        assert_eq!(SSVModels::resolve_complex_id("/x?id=42").unwrap(), "42");
        assert_eq!(SSVModels::resolve_complex_id("https://subpar.nyc/index.html?foo=1&id=318").unwrap(), "318");
    }

    #[test]
    fn test_path_wins_over_query() {
        assert_eq!(SSVModels::resolve_complex_id("/c/7?id=42").unwrap(), "7");
    }

    #[test]
    fn test_resolve_fails_without_identifier() {
        assert!(matches!(
            SSVModels::resolve_complex_id("/x/y"),
            Err(SSVError::MissingIdentifier(_))
        ));
        assert!(SSVModels::resolve_complex_id("/x?id=abc").is_err());
        // "c" as the last segment has nothing after it
        assert!(SSVModels::resolve_complex_id("/x/c").is_err());
        assert!(SSVModels::resolve_complex_id("").is_err());
    }

    #[test]
    fn test_parse_trip() {
        let t = SSVModels::parse_trip("085350_1..N03R").unwrap();
        assert_eq!(t.route, "1");
        assert_eq!(t.direction, Direction::North);

        let t = SSVModels::parse_trip("084200_6X..S01R").unwrap();
        assert_eq!(t.route, "6");
        assert_eq!(t.direction, Direction::South);

        let t = SSVModels::parse_trip("A20111204SAT_021150_B7X..N08R").unwrap();
        assert_eq!(t.route, "B7");
        assert_eq!(t.direction, Direction::North);

        let t = SSVModels::parse_trip("130600_GS.S01R").unwrap();
        assert_eq!(t.route, "GS");
    }

    #[test]
    fn test_parse_trip_rejects_garbage() {
        assert!(matches!(
            SSVModels::parse_trip("not-a-trip"),
            Err(SSVError::TripFormat(_))
        ));
        assert!(SSVModels::parse_trip("085350_1..E03R").is_err());
    }

    #[test]
    fn test_parse_trip_separators() {
        let t = SSVModels::parse_trip("101500_L--S02R").unwrap();
        assert_eq!(t.route, "L");
        assert_eq!(t.direction, Direction::South);

        let t = SSVModels::parse_trip("101500_A N55R").unwrap();
        assert_eq!(t.route, "A");
        assert_eq!(t.direction, Direction::North);

        // no separator: route and direction can't be told apart
        assert!(SSVModels::parse_trip("101500_6N01R").is_err());
    }

    #[test]
    fn test_round_half_up() {
        assert_eq!(SSVModels::round_half_up(2.5), 3.0);
        assert_eq!(SSVModels::round_half_up(-2.5), -2.0);
        assert_eq!(SSVModels::round_half_up(-2.6), -3.0);
    }

    #[test]
    fn test_complex_info_json() {
        let body = r#"{
            "meta": {
                "name": "14 St-Union Sq",
                "ada": "Full",
                "ada_notes": null,
                "coord": [40.734673, -73.989951],
                "routes": ["4", "5", "6", "L", "N", "Q", "R", "W"],
                "stops": ["635", "L03", "R20"],
                "entrances": [
                    {"entrance_type": "Elevator", "entrance_latitude": 40.7352, "entrance_longitude": -73.9905,
                     "daytime_routes": ["4", "5", "6"], "stop_name": "14 St-Union Sq"},
                    {"entrance_type": "Door", "entrance_latitude": "40.7341", "entrance_longitude": "-73.9899",
                     "daytime_routes": ["L"]}
                ]
            },
            "upcoming": [
                {"trip": "085350_6..N03R", "stop": "635N",
                 "arrival": "2024-03-01T14:05:00Z", "message": "2024-03-01T14:00:30Z"}
            ],
            "elevators": [
                {"id": "EL123", "complex_id": 602, "lines": ["L"], "is_escalator": false, "ada": true,
                 "is_active": true, "desc": "Street to mezzanine", "serving": "Street to mezzanine",
                 "nearby": [], "buses": "M14A", "alt_desc": "Use 3 Av",
                 "outage": {"id": "EL123", "start": "2024-02-28T09:35:00+05:00",
                            "est_return": "2024-03-04T23:45:00+05:00", "reason": "Repair",
                            "ada": false, "upcoming": false, "maintenance": false}}
            ]
        }"#;
        let info: ComplexInfo = serde_json::from_str(body).unwrap();
        let meta = info.meta.unwrap();
        assert_eq!(meta.ada, AdaStatus::Full);
        assert_eq!(meta.routes.len(), 8);
        assert_eq!(meta.entrances[0].entrance_type, EntranceType::Elevator);
        assert_eq!(meta.entrances[1].entrance_type, EntranceType::Other("Door".to_string()));
        assert_eq!(meta.entrances[1].coord(), (40.7341, -73.9899));
        assert_eq!(info.upcoming.len(), 1);
        let outage = info.elevators[0].outage.as_ref().unwrap();
        assert_eq!(SSVModels::format_date(&outage.start), "2024-02-28");
        assert!(outage.asof.is_none());
    }

    #[test]
    fn test_entrance_type_display_round_trips_known_names() {
        for name in ["Elevator", "Stair/Escalator", "Easement - Street", "Easement - Passage", "Escalator", "Stair"] {
            assert_eq!(EntranceType::from(name.to_string()).to_string(), name);
        }
    }

    #[test]
    fn test_api_client_trims_base_url() {
        let client = ApiClient::new("https://api.subpar.nyc/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "https://api.subpar.nyc");
    }

    /// Serve one canned HTTP response on a local port; the handle yields
    /// the request line the client sent.
    fn serve_once(status: &str, body: &str) -> (String, std::thread::JoinHandle<String>) {
        use std::io::{BufRead, BufReader, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            loop {
                let mut header = String::new();
                if reader.read_line(&mut header).unwrap() == 0 || header == "\r\n" {
                    break;
                }
            }
            reader.get_mut().write_all(response.as_bytes()).unwrap();
            request_line.trim_end().to_string()
        });
        (base, handle)
    }

    fn local_client(base_url: String) -> ApiClient {
        // Bypass any proxy configured in the environment.
        let client = blocking::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        ApiClient { base_url, client }
    }

    #[test]
    fn test_fetch_upcoming_requests_upcoming_path() {
        let body = r#"[{"trip":"085350_1..N03R","arrival":"2024-03-01T14:05:00Z","message":"2024-03-01T14:00:00Z"}]"#;
        let (base, server) = serve_once("200 OK", body);
        let client = local_client(base);

        let trains = client.fetch_upcoming("611").unwrap();
        assert_eq!(trains.len(), 1);
        assert_eq!(trains[0].trip, "085350_1..N03R");
        assert_eq!(server.join().unwrap(), "GET /upcoming/611 HTTP/1.1");
    }

    #[test]
    fn test_error_status_is_network_error() {
        let (base, server) = serve_once("404 Not Found", r#"{"error":"not found"}"#);
        let client = local_client(base);

        let result = client.fetch_complex_info("999");
        assert!(matches!(result, Err(SSVError::NetworkError(_))), "{:?}", result.err());
        assert_eq!(server.join().unwrap(), "GET /complex/999 HTTP/1.1");
    }

    #[test]
    fn test_malformed_body_is_parse_error() {
        let (base, server) = serve_once("200 OK", "{not json");
        let client = local_client(base);

        let result = client.fetch_elevators("611");
        assert!(matches!(result, Err(SSVError::ParseError(_))), "{:?}", result.err());
        assert_eq!(server.join().unwrap(), "GET /elevators/611 HTTP/1.1");
    }
}
