// GUI implementation for the Subpar station viewer using egui/eframe
use crate::ssv_config::Config;
use crate::ssv_map::{DEFAULT_CENTER, DEFAULT_ZOOM, MapSurface, Marker};
use crate::ssv_models::{ApiClient, Coord, Direction, SSVModels};
use crate::ssv_render::{self, ArrivalsBoard, ElevatorPanel, RouteBullet, StationView};
use crate::ssv_state::{LoadState, Timing, ViewState};
use chrono::{DateTime, Local, Utc};
use eframe::egui;
use egui::{Align2, Color32, FontId, Pos2, RichText, Sense, Stroke, Ui, Vec2};
use egui_extras::{Column, TableBuilder};
use log::error;
use std::sync::Arc;
use std::time::{Duration, Instant};

const FLY_DURATION: Duration = Duration::from_millis(1500);
const MARKER_HIT_RADIUS: f32 = 14.0;

// ============================================================================
// Map canvas
// ============================================================================

struct Flight {
    from: Coord,
    from_zoom: f32,
    to: Coord,
    to_zoom: f32,
    started: Instant,
}

/// Marker-only map: no tiles, just the pins laid out around the camera.
pub struct MapCanvas {
    markers: Vec<Marker>,
    center: Coord,
    zoom: f32,
    flight: Option<Flight>,
    selected: Option<usize>,
}

impl Default for MapCanvas {
    fn default() -> Self {
        MapCanvas {
            markers: Vec::new(),
            center: DEFAULT_CENTER,
            zoom: DEFAULT_ZOOM,
            flight: None,
            selected: None,
        }
    }
}

impl MapSurface for MapCanvas {
    fn add_marker(&mut self, marker: Marker) {
        self.markers.push(marker);
    }

    fn fly_to(&mut self, center: Coord, zoom: f32) {
        let (from, from_zoom) = self.camera(Instant::now());
        self.flight = Some(Flight {
            from,
            from_zoom,
            to: center,
            to_zoom: zoom,
            started: Instant::now(),
        });
    }
}

fn mercator_y(lat: f64) -> f64 {
    let lat = lat.to_radians();
    (std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln().to_degrees()
}

impl MapCanvas {
    fn is_flying(&self) -> bool {
        self.flight.is_some()
    }

    /// Camera position, following an in-progress fly-to.
    fn camera(&self, now: Instant) -> (Coord, f32) {
        let Some(f) = &self.flight else {
            return (self.center, self.zoom);
        };
        let t = (now.saturating_duration_since(f.started).as_secs_f64() / FLY_DURATION.as_secs_f64()).min(1.0);
        let s = t * t * (3.0 - 2.0 * t);
        let lerp = |a: f64, b: f64| a + (b - a) * s;
        (
            (lerp(f.from.0, f.to.0), lerp(f.from.1, f.to.1)),
            lerp(f.from_zoom as f64, f.to_zoom as f64) as f32,
        )
    }

    fn land_if_done(&mut self, now: Instant) {
        if let Some(f) = &self.flight {
            if now.saturating_duration_since(f.started) >= FLY_DURATION {
                self.center = f.to;
                self.zoom = f.to_zoom;
                self.flight = None;
            }
        }
    }

    fn show(&mut self, ui: &mut Ui) {
        let now = Instant::now();
        self.land_if_done(now);
        let (center, zoom) = self.camera(now);

        let (response, painter) = ui.allocate_painter(ui.available_size(), Sense::click_and_drag());
        let rect = response.rect;
        painter.rect_filled(rect, 0.0, Color32::from_rgb(232, 236, 228));

        let px_per_deg = 256.0 * 2f64.powf(zoom as f64) / 360.0;
        let project = |c: Coord| -> Pos2 {
            let x = (c.1 - center.1) * px_per_deg;
            let y = -(mercator_y(c.0) - mercator_y(center.0)) * px_per_deg;
            rect.center() + Vec2::new(x as f32, y as f32)
        };

        if response.dragged() && !self.is_flying() {
            let d = response.drag_delta();
            self.center.1 -= d.x as f64 / px_per_deg;
            // close enough at street zoom
            self.center.0 += d.y as f64 / px_per_deg * center.0.to_radians().cos();
        }

        let mut order: Vec<usize> = (0..self.markers.len()).collect();
        order.sort_by_key(|&i| self.markers[i].z_index_offset);

        let mut hovered = None;
        for &i in &order {
            let marker = &self.markers[i];
            let pos = project(marker.coord);
            if !rect.expand(20.0).contains(pos) {
                continue;
            }
            let radius = marker.icon.size[0].min(marker.icon.size[1]) / 4.0;
            // anchored icons sit on top of their coordinate
            let pos = match marker.icon.anchor {
                Some(_) => pos - Vec2::new(0.0, radius),
                None => pos,
            };
            painter.circle_filled(pos, radius, Color32::WHITE);
            painter.circle_stroke(pos, radius, Stroke::new(2.0, Color32::from_rgb(40, 40, 40)));
            painter.text(pos, Align2::CENTER_CENTER, marker.icon.glyph, FontId::proportional(radius * 1.2), Color32::BLACK);

            if let Some(pointer) = response.hover_pos() {
                if pointer.distance(pos) <= MARKER_HIT_RADIUS.max(radius) {
                    hovered = Some(i);
                }
            }
        }

        if response.clicked() {
            self.selected = hovered;
        }

        if let Some(i) = self.selected {
            if let Some(marker) = self.markers.get(i) {
                let galley = painter.layout_no_wrap(marker.popup.clone(), FontId::proportional(13.0), Color32::BLACK);
                let anchor = project(marker.coord) - Vec2::new(0.0, 36.0);
                let popup_rect = Align2::CENTER_BOTTOM.anchor_size(anchor, galley.size());
                painter.rect_filled(popup_rect.expand(4.0), 4.0, Color32::from_white_alpha(235));
                painter.galley(popup_rect.min, galley, Color32::BLACK);
            }
        }

        if let Some(i) = hovered {
            response.on_hover_text(self.markers[i].popup.clone());
        }
    }
}

// ============================================================================
// Application State
// ============================================================================

pub struct SSVApp {
    state: Option<ViewState<ApiClient>>,
    map: MapCanvas,
    fatal: Option<String>,
    title: Option<String>,
}

impl SSVApp {
    pub fn new(_cc: &eframe::CreationContext<'_>, config: Config) -> Self {
        let mut app = SSVApp {
            state: None,
            map: MapCanvas::default(),
            fatal: None,
            title: None,
        };

        let complex_id = match SSVModels::resolve_complex_id(&config.location) {
            Ok(id) => id,
            Err(e) => {
                error!("{}", e);
                app.fatal = Some(e.to_string());
                return app;
            }
        };
        let api = match ApiClient::new(&config.api_url, config.request_timeout) {
            Ok(api) => api,
            Err(e) => {
                error!("{}", e);
                app.fatal = Some(e.to_string());
                return app;
            }
        };

        let mut state = ViewState::new(Arc::new(api), complex_id, Timing::from(&config));
        state.start();
        app.state = Some(state);
        app
    }
}

impl eframe::App for SSVApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("🚇 Subpar");
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    let now: DateTime<Local> = Local::now();
                    ui.label(now.format("%H:%M:%S").to_string());
                });
            });
        });

        if let Some(fatal) = &self.fatal {
            egui::CentralPanel::default().show(ctx, |ui| {
                ui.centered_and_justified(|ui| {
                    ui.colored_label(Color32::RED, format!("❌ {}", fatal));
                });
            });
            return;
        }
        let Some(state) = self.state.as_mut() else {
            return;
        };

        let wall = Utc::now();
        state.pump(Instant::now(), wall, &mut self.map);

        if let Some(station) = &state.station {
            if self.title.as_deref() != Some(station.window_title.as_str()) {
                ctx.send_viewport_cmd(egui::ViewportCommand::Title(station.window_title.clone()));
                self.title = Some(station.window_title.clone());
            }
        }

        // Wake up for the next timer, or sooner while something is moving.
        let mut repaint = state
            .next_deadline()
            .map(|d| d.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_secs(1))
            .min(Duration::from_secs(1));
        if state.is_fetching() || self.map.is_flying() {
            repaint = repaint.min(Duration::from_millis(50));
        }
        ctx.request_repaint_after(repaint);

        match state.load.clone() {
            LoadState::Idle | LoadState::Loading => {
                egui::CentralPanel::default().show(ctx, |ui| {
                    ui.centered_and_justified(|ui| {
                        ui.vertical_centered(|ui| {
                            ui.spinner();
                            ui.label(format!("Loading complex {}...", state.complex_id()));
                        });
                    });
                });
                return;
            }
            LoadState::Failed(e) => {
                let mut should_retry = false;
                egui::CentralPanel::default().show(ctx, |ui| {
                    ui.centered_and_justified(|ui| {
                        ui.vertical_centered(|ui| {
                            ui.colored_label(Color32::RED, "❌ Error");
                            ui.label(&e);
                            if ui.button("Retry").clicked() {
                                should_retry = true;
                            }
                        });
                    });
                });
                if should_retry {
                    state.start();
                }
                return;
            }
            LoadState::Ready => {}
        }

        egui::TopBottomPanel::top("station_panel").show(ctx, |ui| {
            if let Some(station) = &state.station {
                show_station_header(ui, station);
            }
            if let Some(e) = &state.last_error {
                ui.colored_label(Color32::from_rgb(255, 165, 0), format!("⚠️ {}", e));
            }
        });

        egui::SidePanel::right("data_panel").min_width(380.0).show(ctx, |ui| {
            egui::ScrollArea::vertical().show(ui, |ui| {
                if let Some(board) = &state.arrivals {
                    show_arrivals(ui, board, wall);
                }
                ui.add_space(12.0);
                show_elevators(ui, &state.elevators);
            });
        });

        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| self.map.show(ui));
    }
}

// ============================================================================
// View Implementations
// ============================================================================

fn bullet(ui: &mut Ui, bullet: &RouteBullet) {
    let rgb = bullet.color();
    let (r, g, b) = rgb;
    let text = if ssv_render::is_light(rgb) { Color32::BLACK } else { Color32::WHITE };
    ui.label(
        RichText::new(format!(" {} ", bullet.route))
            .strong()
            .color(text)
            .background_color(Color32::from_rgb(r, g, b)),
    );
}

fn show_station_header(ui: &mut Ui, station: &StationView) {
    ui.horizontal_wrapped(|ui| {
        ui.label(RichText::new(&station.name).size(20.0).strong());
        for b in &station.bullets {
            bullet(ui, b);
        }
    });
    ui.label(&station.ada_text);
}

fn lerp_color(a: Color32, b: Color32, t: f32) -> Color32 {
    let t = t.clamp(0.0, 1.0);
    let mix = |x: u8, y: u8| (x as f32 + (y as f32 - x as f32) * t).round() as u8;
    Color32::from_rgb(mix(a.r(), b.r()), mix(a.g(), b.g()), mix(a.b(), b.b()))
}

/// Fresh data reads green and drifts to red over two minutes.
fn aging_color(age_secs: i64) -> Color32 {
    let fresh = Color32::from_rgb(0, 160, 0);
    let stale = Color32::from_rgb(255, 165, 0);
    let dead = Color32::from_rgb(220, 0, 0);
    if age_secs <= 60 {
        lerp_color(fresh, stale, age_secs as f32 / 60.0)
    } else {
        lerp_color(stale, dead, (age_secs - 60) as f32 / 60.0)
    }
}

fn show_arrivals(ui: &mut Ui, board: &ArrivalsBoard, wall: DateTime<Utc>) {
    egui::CollapsingHeader::new(RichText::new("Upcoming trains").strong().size(16.0))
        .default_open(board.details_open)
        .show(ui, |ui| {
            let color = board.age_secs(wall).map(aging_color).unwrap_or(Color32::GRAY);
            ui.colored_label(color, &board.staleness_label);
            ui.add_space(4.0);

            ui.columns(2, |cols| {
                for (ui, direction) in cols.iter_mut().zip([Direction::North, Direction::South]) {
                    ui.push_id(direction.header(), |ui| arrivals_table(ui, board, direction));
                }
            });
        });
}

fn arrivals_table(ui: &mut Ui, board: &ArrivalsBoard, direction: Direction) {
    TableBuilder::new(ui)
        .striped(true)
        .column(Column::auto())
        .column(Column::remainder())
        .header(20.0, |mut header| {
            header.col(|ui| {
                ui.strong(direction.header());
            });
            header.col(|ui| {
                ui.strong("Minutes");
            });
        })
        .body(|mut body| {
            for row in board.rows(direction) {
                let cell = board.cell(row);
                body.row(22.0, |mut r| {
                    r.col(|ui| bullet(ui, &row.bullet));
                    r.col(|ui| {
                        let text = RichText::new(&cell.text);
                        let text = if cell.missed {
                            text.strikethrough().color(Color32::GRAY)
                        } else {
                            text
                        };
                        ui.label(text)
                            .on_hover_text(format!("Arrives {}", SSVModels::format_time_ny(&cell.arrival)));
                    });
                });
            }
        });
}

fn show_elevators(ui: &mut Ui, panel: &ElevatorPanel) {
    ui.horizontal(|ui| {
        ui.label(RichText::new("Elevators & escalators").strong().size(16.0));
        if let Some(label) = &panel.asof_label {
            ui.colored_label(Color32::from_rgb(255, 165, 0), label);
        }
    });
    ui.separator();

    if panel.cards.is_empty() {
        ui.label("No elevators or escalators listed for this complex.");
    }
    for card in &panel.cards {
        egui::Frame::group(ui.style()).show(ui, |ui| {
            ui.horizontal(|ui| {
                let glyph = if card.label == "Escalator" { "≡" } else { "E" };
                ui.label(RichText::new(glyph).strong().size(18.0));
                ui.strong(card.label);
                ui.label(&card.badges);
            });
            for line in &card.body {
                ui.label(line);
            }
        });
        ui.add_space(5.0);
    }
}

// ============================================================================
// Public entry point
// ============================================================================

pub fn run_gui(config: Config) -> Result<(), eframe::Error> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Subpar")
            .with_inner_size([1280.0, 800.0])
            .with_min_inner_size([800.0, 600.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Subpar Station Viewer",
        options,
        Box::new(|cc| Ok(Box::new(SSVApp::new(cc, config)))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aging_color_ramp() {
        assert_eq!(aging_color(0), Color32::from_rgb(0, 160, 0));
        assert_eq!(aging_color(60), Color32::from_rgb(255, 165, 0));
        assert_eq!(aging_color(500), Color32::from_rgb(220, 0, 0));
    }

    #[test]
    fn test_fly_to_lands_on_target() {
        let mut map = MapCanvas::default();
        map.fly_to((40.7559, -73.9871), 17.0);
        assert!(map.is_flying());
        let later = Instant::now() + FLY_DURATION;
        assert_eq!(map.camera(later), ((40.7559, -73.9871), 17.0));
        map.land_if_done(later);
        assert!(!map.is_flying());
        assert_eq!(map.center, (40.7559, -73.9871));
    }

    #[test]
    fn test_mercator_is_monotonic() {
        assert!(mercator_y(0.0).abs() < 1e-12);
        assert!(mercator_y(40.76) > mercator_y(40.75));
    }
}
