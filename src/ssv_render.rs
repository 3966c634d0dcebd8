// Render pipeline: response snapshots -> view models (+ map markers)
//
// Every renderer builds its output from scratch; callers swap the result
// in wholesale.
use crate::ssv_map::{IconSet, MapSurface, Marker, STATION_ZOOM};
use crate::ssv_models::{ComplexMeta, Coord, Direction, Elevator, Result, SSVModels, UpcomingTrain};
use chrono::{DateTime, Utc};
use log::{debug, trace};

// ============================================================================
// Station
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RouteBullet {
    pub route: String,
    pub asset: String,
}

pub fn make_bullet(route: &str) -> RouteBullet {
    RouteBullet {
        route: route.to_string(),
        asset: format!("/img/R{}.svg", route),
    }
}

impl RouteBullet {
    /// Trunk-line colour used for the bullet background.
    pub fn color(&self) -> (u8, u8, u8) {
        route_color(&self.route)
    }
}

pub fn route_color(route: &str) -> (u8, u8, u8) {
    let hex = match route.to_ascii_uppercase().as_str() {
        "1" | "2" | "3" => "EE352E",
        "4" | "5" | "6" => "00933C",
        "7" => "B933AD",
        "A" | "C" | "E" => "0039A6",
        "B" | "D" | "F" | "M" => "FF6319",
        "G" => "6CBE45",
        "J" | "Z" => "996633",
        "L" => "A7A9AC",
        "N" | "Q" | "R" | "W" => "FCCC0A",
        "T" => "00ADD0",
        "SI" | "SIR" => "0078C6",
        _ => "808183",
    };
    parse_hex_color(hex)
}

pub fn parse_hex_color(hex_color: &str) -> (u8, u8, u8) {
    let hex = hex_color.trim_start_matches('#');
    if hex.len() != 6 {
        return (128, 128, 128);
    }
    let r = u8::from_str_radix(&hex[0..2], 16).unwrap_or(128);
    let g = u8::from_str_radix(&hex[2..4], 16).unwrap_or(128);
    let b = u8::from_str_radix(&hex[4..6], 16).unwrap_or(128);
    (r, g, b)
}

/// Dark text on light bullets, white on everything else.
pub fn is_light(rgb: (u8, u8, u8)) -> bool {
    let (r, g, b) = rgb;
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32) / 255.0 > 0.5
}

#[derive(Debug, Clone)]
pub struct StationView {
    pub name: String,
    pub ada_text: String,
    pub bullets: Vec<RouteBullet>,
    pub window_title: String,
    pub coord: Coord,
}

pub fn render_station(meta: &ComplexMeta, icons: &IconSet, map: &mut dyn MapSurface) -> StationView {
    let mut ada_text = format!("ADA Compliance: {}", meta.ada);
    if let Some(notes) = meta.ada_notes.as_deref().filter(|n| !n.is_empty()) {
        ada_text.push_str(". ");
        ada_text.push_str(notes);
    }

    map.add_marker(Marker {
        coord: meta.coord,
        icon: icons.marker.clone(),
        popup: meta.stop_name.clone().unwrap_or_else(|| meta.name.clone()),
        z_index_offset: 0,
    });
    map.fly_to(meta.coord, STATION_ZOOM);

    let mut skipped = 0;
    for entrance in &meta.entrances {
        let Some((icon, z_index_offset)) = icons.for_entrance(&entrance.entrance_type) else {
            skipped += 1;
            continue;
        };
        map.add_marker(Marker {
            coord: entrance.coord(),
            icon: icon.clone(),
            popup: format!("\"{}\" to {}", entrance.entrance_type, entrance.daytime_routes.join(", ")),
            z_index_offset,
        });
    }
    debug!("{} entrances placed, {} skipped", meta.entrances.len() - skipped, skipped);

    StationView {
        name: meta.name.clone(),
        ada_text,
        bullets: meta.routes.iter().map(|r| make_bullet(r)).collect(),
        window_title: format!("Subpar | {}", meta.name),
        coord: meta.coord,
    }
}

// ============================================================================
// Upcoming arrivals
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ArrivalCell {
    pub arrival: DateTime<Utc>,
    pub message: DateTime<Utc>,
    pub text: String,
    pub missed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrivalRow {
    pub bullet: RouteBullet,
    /// Index into `ArrivalsBoard::cells`.
    pub cell: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ArrivalsBoard {
    pub north: Vec<ArrivalRow>,
    pub south: Vec<ArrivalRow>,
    pub cells: Vec<ArrivalCell>,
    /// Anchor of the aging indicator: newest message among rendered trains.
    pub newest_message: Option<DateTime<Utc>>,
    pub staleness_label: String,
    pub details_open: bool,
}

impl ArrivalsBoard {
    pub fn rows(&self, direction: Direction) -> &[ArrivalRow] {
        match direction {
            Direction::North => &self.north,
            Direction::South => &self.south,
        }
    }

    pub fn cell(&self, row: &ArrivalRow) -> &ArrivalCell {
        &self.cells[row.cell]
    }

    /// Seconds since the newest message, for the fading indicator.
    pub fn age_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.newest_message.map(|t| (now - t).num_seconds().max(0))
    }
}

pub fn sort_by_arrival(trains: &mut [UpcomingTrain]) {
    trains.sort_by(|a, b| a.arrival.cmp(&b.arrival));
}

pub fn render_arrivals(mut trains: Vec<UpcomingTrain>, now: DateTime<Utc>) -> Result<ArrivalsBoard> {
    debug!("rendering {} upcoming trains", trains.len());
    sort_by_arrival(&mut trains);

    let mut board = ArrivalsBoard {
        details_open: true,
        ..Default::default()
    };

    for train in trains {
        if train.arrival < now {
            trace!("skipping past arrival {:?}", train);
            continue;
        }
        let parsed = SSVModels::parse_trip(&train.trip)?;

        board.newest_message = Some(match board.newest_message {
            Some(t) => t.max(train.message),
            None => train.message,
        });
        let row = ArrivalRow {
            bullet: make_bullet(&parsed.route),
            cell: board.cells.len(),
        };
        board.cells.push(ArrivalCell {
            arrival: train.arrival,
            message: train.message,
            text: String::new(),
            missed: false,
        });
        match parsed.direction {
            Direction::North => board.north.push(row),
            Direction::South => board.south.push(row),
        }
    }

    refresh_etas(&mut board, now);
    Ok(board)
}

/// Minutes until `arrival`, rounded to a tenth.
pub fn eta_minutes(arrival: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let ms = (arrival - now).num_milliseconds() as f64;
    let m = SSVModels::round_half_up(ms / 60.0 / 100.0) / 10.0;
    // no "-0"
    if m == 0.0 { 0.0 } else { m }
}

/// Recompute countdowns and the staleness label without refetching.
pub fn refresh_etas(board: &mut ArrivalsBoard, now: DateTime<Utc>) {
    for cell in &mut board.cells {
        let m = eta_minutes(cell.arrival, now);
        cell.text = m.to_string();
        if m < 0.0 {
            cell.missed = true;
        }
    }
    board.staleness_label = match board.newest_message {
        Some(t) => {
            let age = SSVModels::round_half_up((now - t).num_milliseconds() as f64 / 1000.0);
            format!("As of {}s ago", age)
        }
        None => "No recent updates".to_string(),
    };
}

// ============================================================================
// Elevators and escalators
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ElevatorCard {
    pub icon: &'static str,
    pub label: &'static str,
    pub badges: String,
    pub body: Vec<String>,
    pub has_outage: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ElevatorPanel {
    pub cards: Vec<ElevatorCard>,
    /// Newest outage report time, when any outage is listed.
    pub asof: Option<DateTime<Utc>>,
    pub asof_label: Option<String>,
}

impl ElevatorPanel {
    pub fn outage_count(&self) -> usize {
        self.cards.iter().filter(|c| c.has_outage).count()
    }
}

/// Elevators first, escalators after; order within each group is kept.
pub fn sort_elevators(elevators: &mut [Elevator]) {
    elevators.sort_by_key(|e| e.is_escalator);
}

fn check(flag: bool) -> &'static str {
    if flag { "\u{2705}" } else { "\u{274C}" }
}

fn elevator_card(elev: &Elevator) -> ElevatorCard {
    let (icon, label) = if elev.is_escalator {
        ("/img/escalator2.svg", "Escalator")
    } else {
        ("/img/elevator4.svg", "Elevator")
    };
    let active = if elev.is_active { "\u{2705} Active" } else { "\u{274C} Inactive" };
    let outage = if elev.outage.is_some() { "\u{274C} Outage" } else { "" };
    let badges = format!("{}  {} ADA  {}", outage, check(elev.ada), active)
        .trim()
        .to_string();

    let body = match &elev.outage {
        Some(out) => vec![
            elev.serving.clone(),
            format!("Alternative: {}", elev.alt_desc),
            format!("Buses: {}", elev.buses),
            format!(
                "Starting {} until {}",
                SSVModels::format_date(&out.start),
                SSVModels::format_date(&out.est_return)
            ),
            format!("ADA {}. Reason: {}", check(out.ada), out.reason),
        ],
        None => vec![elev.serving.clone()],
    };

    ElevatorCard {
        icon,
        label,
        badges,
        body,
        has_outage: elev.outage.is_some(),
    }
}

/// `fetched_at` stands in for outages the service didn't timestamp.
pub fn render_elevators(mut elevators: Vec<Elevator>, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> ElevatorPanel {
    sort_elevators(&mut elevators);

    let asof = elevators
        .iter()
        .filter_map(|e| e.outage.as_ref())
        .map(|o| o.asof.unwrap_or(fetched_at))
        .max();

    let asof_label = asof.map(|t| {
        let mins = SSVModels::round_half_up((now - t).num_milliseconds() as f64 / 1000.0 / 60.0);
        format!("As of {} mins ago", mins)
    });

    ElevatorPanel {
        cards: elevators.iter().map(elevator_card).collect(),
        asof,
        asof_label,
    }
}
