// Controllers for the Subpar station viewer terminal mode
use crate::ssv_config::Config;
use crate::ssv_map::MarkerList;
use crate::ssv_models::{ApiClient, SSVModels, StationApi};
use crate::ssv_state::{LoadState, Timing, ViewState};
use crate::ssv_views::SSVViews;
use anyhow::{Context, bail};
use chrono::Utc;
use log::info;
use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

pub struct SSVControllers;

impl SSVControllers {
    const IDLE_WAIT: Duration = Duration::from_millis(250);

    /// Auto-refreshing terminal display; returns when the user presses
    /// Enter or stdin closes.
    pub fn run_terminal(config: &Config) -> anyhow::Result<()> {
        let complex_id = SSVModels::resolve_complex_id(&config.location)?;
        let api = ApiClient::new(&config.api_url, config.request_timeout)
            .context("Failed to set up the API client")?;

        SSVViews::show_welcome(&complex_id, api.base_url());

        let mut map = MarkerList::default();
        let mut state = ViewState::new(Arc::new(api), complex_id, Timing::from(config));

        SSVViews::show_loading("Loading station");
        state.start();
        state.settle(&mut map);
        SSVViews::clear_loading();

        if let LoadState::Failed(e) = &state.load {
            SSVViews::network_error(e);
            bail!("initial load failed: {}", e);
        }

        let enter = Self::spawn_stdin_watcher();
        Self::draw(&state, &map);

        loop {
            let wait = state
                .next_deadline()
                .map(|d| d.saturating_duration_since(Instant::now()))
                .unwrap_or(Self::IDLE_WAIT)
                .min(Self::IDLE_WAIT);

            match enter.recv_timeout(wait) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            if state.pump(Instant::now(), Utc::now(), &mut map) {
                Self::draw(&state, &map);
            }
        }

        info!("leaving terminal mode");
        state.teardown();
        SSVViews::goodbye_message();
        Ok(())
    }

    fn draw<A: StationApi>(state: &ViewState<A>, map: &MarkerList) {
        SSVViews::clear_screen();
        if let Some(station) = &state.station {
            SSVViews::show_station(station, map);
        }
        if let Some(board) = &state.arrivals {
            SSVViews::show_arrivals(board);
        }
        SSVViews::show_elevators(&state.elevators);

        let next_poll = state
            .poller()
            .and_then(|p| p.next_due())
            .map(|d| d.saturating_duration_since(Instant::now()).as_secs());
        let tick = state.ticker().map(|t| t.period().as_secs());
        SSVViews::show_footer(state.last_error.as_deref(), next_poll, tick);
    }

    /// One reader thread for the whole session; a line on stdin means "quit".
    fn spawn_stdin_watcher() -> Receiver<()> {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut input = String::new();
            if io::stdin().read_line(&mut input).is_ok() {
                let _ = tx.send(());
            }
        });
        rx
    }
}
