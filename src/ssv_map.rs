// Map surface abstraction: markers, popups and camera moves
use crate::ssv_models::{Coord, EntranceType};
use geo::{Distance, Haversine, Point};

/// Initial view before the station coordinate is known (midtown Manhattan).
pub const DEFAULT_CENTER: Coord = (40.752, -73.98);
pub const DEFAULT_ZOOM: f32 = 15.0;
pub const STATION_ZOOM: f32 = 17.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Icon {
    pub asset: &'static str,
    pub size: [f32; 2],
    /// Point of the icon that sits on the coordinate. `None` centres it.
    pub anchor: Option<[f32; 2]>,
    /// Stand-in glyph for frontends that cannot draw the SVG asset.
    pub glyph: &'static str,
}

#[derive(Debug, Clone)]
pub struct IconSet {
    pub elevator: Icon,
    pub stair: Icon,
    pub marker: Icon,
    pub escalator: Icon,
}

impl Default for IconSet {
    fn default() -> Self {
        IconSet {
            elevator: Icon {
                asset: "/img/elevator4.svg",
                size: [50.0, 50.0],
                anchor: Some([25.0, 50.0]),
                glyph: "E",
            },
            stair: Icon {
                asset: "/img/stairs3.svg",
                size: [40.0, 40.0],
                anchor: Some([20.0, 40.0]),
                glyph: "S",
            },
            marker: Icon {
                asset: "/img/star1.svg",
                size: [35.0, 35.0],
                anchor: None,
                glyph: "★",
            },
            escalator: Icon {
                asset: "/img/escalator2.svg",
                size: [40.0, 40.0],
                anchor: Some([20.0, 40.0]),
                glyph: "≡",
            },
        }
    }
}

impl IconSet {
    /// Icon and z-offset for an entrance, or `None` for types we don't draw.
    pub fn for_entrance(&self, kind: &EntranceType) -> Option<(&Icon, i32)> {
        match kind {
            EntranceType::Elevator => Some((&self.elevator, 1000)),
            EntranceType::StairEscalator
            | EntranceType::EasementStreet
            | EntranceType::EasementPassage
            | EntranceType::Escalator => Some((&self.escalator, 0)),
            EntranceType::Stair => Some((&self.stair, 0)),
            EntranceType::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub coord: Coord,
    pub icon: Icon,
    pub popup: String,
    pub z_index_offset: i32,
}

/// Anything that can host station markers.
pub trait MapSurface {
    fn add_marker(&mut self, marker: Marker);
    fn fly_to(&mut self, center: Coord, zoom: f32);
}

/// Plain marker store; backs the terminal frontend.
#[derive(Debug, Clone)]
pub struct MarkerList {
    pub markers: Vec<Marker>,
    pub center: Coord,
    pub zoom: f32,
}

impl Default for MarkerList {
    fn default() -> Self {
        MarkerList {
            markers: Vec::new(),
            center: DEFAULT_CENTER,
            zoom: DEFAULT_ZOOM,
        }
    }
}

impl MarkerList {
    /// Markers in draw order: higher z-offset last so it ends up on top.
    pub fn draw_order(&self) -> Vec<&Marker> {
        let mut ordered: Vec<&Marker> = self.markers.iter().collect();
        ordered.sort_by_key(|m| m.z_index_offset);
        ordered
    }
}

impl MapSurface for MarkerList {
    fn add_marker(&mut self, marker: Marker) {
        self.markers.push(marker);
    }

    fn fly_to(&mut self, center: Coord, zoom: f32) {
        self.center = center;
        self.zoom = zoom;
    }
}

/// Great-circle distance in metres between two `(lat, lon)` pairs.
pub fn distance_m(a: Coord, b: Coord) -> f64 {
    let a = Point::new(a.1, a.0);
    let b = Point::new(b.1, b.0);
    Haversine.distance(a, b)
}
