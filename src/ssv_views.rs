// Terminal views for the station viewer
use crate::ssv_map::{self, MarkerList};
use crate::ssv_models::{Direction, SSVModels};
use crate::ssv_render::{self, ArrivalsBoard, ElevatorPanel, RouteBullet, StationView};
use std::io::{self, Write};

pub struct SSVViews;

impl SSVViews {
    pub fn show_welcome(complex_id: &str, api_url: &str) {
        println!("\n{}", "═".repeat(70));
        println!("  🚇 SUBPAR STATION VIEWER");
        println!("{}", "═".repeat(70));
        println!("  Complex: {}", complex_id);
        println!("  Source:  {}", api_url);
        println!("{}", "═".repeat(70));
    }

    pub fn show_loading(message: &str) {
        print!("⏳ {}...", message);
        let _ = io::stdout().flush();
    }

    pub fn clear_loading() {
        print!("\r{}\r", " ".repeat(70));
        let _ = io::stdout().flush();
    }

    pub fn network_error(error: &str) {
        println!("\n{}", "═".repeat(70));
        println!("❌ COULD NOT LOAD STATION");
        println!("{}", "═".repeat(70));
        println!("  {}", error);
        println!("\n💡 Check the complex id and your internet connection.");
    }

    pub fn clear_screen() {
        print!("\x1B[2J\x1B[1;1H");
        let _ = io::stdout().flush();
    }

    pub fn show_station(station: &StationView, map: &MarkerList) {
        let bullets: Vec<String> = station.bullets.iter().map(Self::colorize_bullet).collect();
        println!("\n{}", "═".repeat(70));
        println!("🚉 {}  {}", station.name, bullets.join(" "));
        println!("   ♿ {}", station.ada_text);
        println!("{}", "═".repeat(70));

        let markers = map.draw_order();
        if markers.is_empty() {
            return;
        }
        println!("\n📍 Entrances ({} markers)", markers.len());
        for marker in markers.iter().rev() {
            let dist = ssv_map::distance_m(station.coord, marker.coord);
            println!("   {} {:<45} {:>5.0} m", marker.icon.glyph, marker.popup, dist);
        }
    }

    pub fn show_arrivals(board: &ArrivalsBoard) {
        println!("\n🕐 UPCOMING TRAINS   ({})", board.staleness_label);
        println!("{}", "─".repeat(70));

        let north = Self::table_lines(board, Direction::North);
        let south = Self::table_lines(board, Direction::South);
        println!("  {:<32}  {:<32}", Direction::North.header(), Direction::South.header());
        for i in 0..north.len().max(south.len()) {
            let left = north.get(i).map(String::as_str).unwrap_or("");
            let right = south.get(i).map(String::as_str).unwrap_or("");
            // ANSI escapes don't take up columns, so pad by hand
            let pad = 32usize.saturating_sub(Self::visible_width(left));
            println!("  {}{}  {}", left, " ".repeat(pad), right);
        }
        if board.cells.is_empty() {
            println!("  No upcoming trains.");
        }
    }

    fn table_lines(board: &ArrivalsBoard, direction: Direction) -> Vec<String> {
        board
            .rows(direction)
            .iter()
            .map(|row| {
                let cell = board.cell(row);
                let minutes = if cell.missed {
                    format!("⚫ {} min (missed)", cell.text)
                } else {
                    format!("{} min", cell.text)
                };
                let clock = SSVModels::format_time_ny(&cell.arrival);
                format!("{} {:<18} {}", Self::colorize_bullet(&row.bullet), minutes, clock)
            })
            .collect()
    }

    pub fn show_elevators(panel: &ElevatorPanel) {
        println!("\n🛗 ELEVATORS & ESCALATORS ({} listed, {} out)", panel.cards.len(), panel.outage_count());
        if let Some(label) = &panel.asof_label {
            println!("   {}", label);
        }
        println!("{}", "─".repeat(70));
        for card in &panel.cards {
            println!("  {:<10} {}", card.label, card.badges);
            for line in &card.body {
                println!("     {}", line);
            }
        }
    }

    pub fn show_footer(last_error: Option<&str>, next_poll_secs: Option<u64>, tick_secs: Option<u64>) {
        println!("\n{}", "─".repeat(70));
        if let Some(e) = last_error {
            println!("⚠️  Last refresh problem: {}", e);
        }
        if let Some(secs) = tick_secs {
            println!("🔄 Minutes recount every {}s", secs);
        }
        if let Some(secs) = next_poll_secs {
            println!("⏱️  Next refresh in {}s (press ENTER to exit)", secs);
        } else {
            println!("   Press ENTER to exit");
        }
    }

    pub fn goodbye_message() {
        println!("\n👋 Bye!");
    }

    fn colorize_bullet(bullet: &RouteBullet) -> String {
        let (r, g, b) = bullet.color();
        let text_color = if ssv_render::is_light((r, g, b)) { "30" } else { "97" };
        format!("\x1b[48;2;{};{};{}m\x1b[{}m {} \x1b[0m", r, g, b, text_color, bullet.route)
    }

    fn visible_width(s: &str) -> usize {
        let mut width = 0;
        let mut in_escape = false;
        for c in s.chars() {
            match (in_escape, c) {
                (false, '\x1b') => in_escape = true,
                (true, 'm') => in_escape = false,
                (true, _) => {}
                (false, _) => width += 1,
            }
        }
        width
    }
}
