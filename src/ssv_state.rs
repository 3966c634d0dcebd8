// View state for one station complex: data snapshots, timers, in-flight fetches
use crate::ssv_config::Config;
use crate::ssv_map::{IconSet, MapSurface};
use crate::ssv_models::{ComplexInfo, Elevator, Result, StationApi, UpcomingTrain};
use crate::ssv_render::{self, ArrivalsBoard, ElevatorPanel, StationView};
use crate::ssv_timers::{self, RecurringTask};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use poll_promise::Promise;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub poll_period: Duration,
    pub tick_period: Duration,
    pub elevator_period: Option<Duration>,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            poll_period: Duration::from_secs(30),
            tick_period: Duration::from_secs(5),
            elevator_period: None,
        }
    }
}

impl From<&Config> for Timing {
    fn from(config: &Config) -> Self {
        Timing {
            poll_period: config.poll_period,
            tick_period: config.tick_period,
            elevator_period: config.elevator_period,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadState {
    Idle,
    Loading,
    Ready,
    Failed(String),
}

/// Result of a background fetch, stamped with the time it came back.
pub enum Fetched {
    Complex(Result<ComplexInfo>),
    Upcoming(Result<Vec<UpcomingTrain>>),
    Elevators(Result<Vec<Elevator>>),
}

pub struct Completed {
    pub fetched: Fetched,
    pub at: DateTime<Utc>,
}

pub struct ViewState<A: StationApi> {
    api: Arc<A>,
    complex_id: String,
    icons: IconSet,
    timing: Timing,

    pub load: LoadState,
    pub station: Option<StationView>,
    pub arrivals: Option<ArrivalsBoard>,
    pub elevators: ElevatorPanel,
    pub last_error: Option<String>,
    pub arrivals_renders: usize,

    ticker: Option<RecurringTask>,
    poller: Option<RecurringTask>,
    elevator_poller: Option<RecurringTask>,
    pending: Vec<Promise<Completed>>,
}

impl<A: StationApi> ViewState<A> {
    pub fn new(api: Arc<A>, complex_id: String, timing: Timing) -> Self {
        ViewState {
            api,
            complex_id,
            icons: IconSet::default(),
            timing,
            load: LoadState::Idle,
            station: None,
            arrivals: None,
            elevators: ElevatorPanel::default(),
            last_error: None,
            arrivals_renders: 0,
            ticker: None,
            poller: None,
            elevator_poller: None,
            pending: Vec::new(),
        }
    }

    pub fn complex_id(&self) -> &str {
        &self.complex_id
    }

    pub fn is_fetching(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn ticker(&self) -> Option<&RecurringTask> {
        self.ticker.as_ref()
    }

    pub fn poller(&self) -> Option<&RecurringTask> {
        self.poller.as_ref()
    }

    /// Kick off the complex-info request. Also used for "retry" after a
    /// failed first load.
    pub fn start(&mut self) {
        self.load = LoadState::Loading;
        self.spawn_complex();
    }

    fn spawn_complex(&mut self) {
        let api = Arc::clone(&self.api);
        let id = self.complex_id.clone();
        self.pending.push(Promise::spawn_thread("complex", move || Completed {
            fetched: Fetched::Complex(api.fetch_complex_info(&id)),
            at: Utc::now(),
        }));
    }

    fn spawn_upcoming(&mut self) {
        let api = Arc::clone(&self.api);
        let id = self.complex_id.clone();
        self.pending.push(Promise::spawn_thread("upcoming", move || Completed {
            fetched: Fetched::Upcoming(api.fetch_upcoming(&id)),
            at: Utc::now(),
        }));
    }

    fn spawn_elevators(&mut self) {
        let api = Arc::clone(&self.api);
        let id = self.complex_id.clone();
        self.pending.push(Promise::spawn_thread("elevators", move || Completed {
            fetched: Fetched::Elevators(api.fetch_elevators(&id)),
            at: Utc::now(),
        }));
    }

    /// One turn of the loop: apply finished fetches in completion order,
    /// then fire whichever timers are due. Returns whether anything visible
    /// changed.
    pub fn pump(&mut self, now: Instant, wall: DateTime<Utc>, map: &mut dyn MapSurface) -> bool {
        let mut finished = Vec::new();
        let mut still_pending = Vec::with_capacity(self.pending.len());
        for promise in self.pending.drain(..) {
            match promise.try_take() {
                Ok(done) => finished.push(done),
                Err(promise) => still_pending.push(promise),
            }
        }
        self.pending = still_pending;

        let mut changed = false;
        for done in finished {
            changed |= self.handle(done, now, wall, map);
        }

        if self.poller.as_mut().is_some_and(|t| t.poll(now)) {
            self.spawn_upcoming();
        }
        if self.elevator_poller.as_mut().is_some_and(|t| t.poll(now)) {
            self.spawn_elevators();
        }
        if self.ticker.as_mut().is_some_and(|t| t.poll(now)) {
            self.tick(wall);
            changed = true;
        }
        changed
    }

    /// Block until every in-flight fetch has come back and apply them.
    pub fn settle(&mut self, map: &mut dyn MapSurface) {
        while !self.pending.is_empty() {
            for promise in std::mem::take(&mut self.pending) {
                let done = promise.block_and_take();
                self.handle(done, Instant::now(), Utc::now(), map);
            }
        }
    }

    pub fn handle(&mut self, done: Completed, now: Instant, wall: DateTime<Utc>, map: &mut dyn MapSurface) -> bool {
        match done.fetched {
            Fetched::Complex(Ok(info)) => {
                self.apply_complex(info, done.at, now, wall, map);
            }
            Fetched::Complex(Err(e)) => {
                error!("complex {} fetch failed: {}", self.complex_id, e);
                if self.load != LoadState::Ready {
                    self.load = LoadState::Failed(e.to_string());
                }
                self.last_error = Some(e.to_string());
            }
            Fetched::Upcoming(Ok(trains)) => {
                self.apply_upcoming(trains, now, wall);
            }
            Fetched::Upcoming(Err(e)) => {
                error!("upcoming {} fetch failed: {}", self.complex_id, e);
                self.last_error = Some(e.to_string());
            }
            Fetched::Elevators(Ok(elevators)) => {
                self.apply_elevators(elevators, done.at, wall);
            }
            Fetched::Elevators(Err(e)) => {
                error!("elevators {} fetch failed: {}", self.complex_id, e);
                self.last_error = Some(e.to_string());
            }
        }
        true
    }

    pub fn apply_complex(
        &mut self,
        info: ComplexInfo,
        fetched_at: DateTime<Utc>,
        now: Instant,
        wall: DateTime<Utc>,
        map: &mut dyn MapSurface,
    ) {
        match &info.meta {
            Some(meta) => {
                info!("complex {}: {}", self.complex_id, meta.name);
                self.station = Some(ssv_render::render_station(meta, &self.icons, map));
            }
            None => warn!("complex {} came back without metadata", self.complex_id),
        }

        self.apply_upcoming(info.upcoming, now, wall);
        self.apply_elevators(info.elevators, fetched_at, wall);
        self.load = LoadState::Ready;

        if self.poller.is_none() {
            self.poller = Some(RecurringTask::start("upcoming poller", self.timing.poll_period, now));
        }
        if let (None, Some(period)) = (&self.elevator_poller, self.timing.elevator_period) {
            self.elevator_poller = Some(RecurringTask::start("elevator poller", period, now));
        }
    }

    /// Replace the arrivals board wholesale. A snapshot that fails to
    /// render leaves the previous board on screen.
    pub fn apply_upcoming(&mut self, trains: Vec<UpcomingTrain>, now: Instant, wall: DateTime<Utc>) {
        match ssv_render::render_arrivals(trains, wall) {
            Ok(board) => {
                let board_len = board.cells.len();
                self.arrivals = Some(board);
                self.arrivals_renders += 1;
                debug!(
                    "complex {}: arrivals board #{} with {} trains",
                    self.complex_id,
                    self.arrivals_renders,
                    board_len
                );
                if self.ticker.is_none() {
                    self.ticker = Some(RecurringTask::start("staleness ticker", self.timing.tick_period, now));
                }
            }
            Err(e) => {
                error!("arrivals render failed: {}", e);
                self.last_error = Some(e.to_string());
            }
        }
    }

    pub fn apply_elevators(&mut self, elevators: Vec<Elevator>, fetched_at: DateTime<Utc>, wall: DateTime<Utc>) {
        self.elevators = ssv_render::render_elevators(elevators, fetched_at, wall);
    }

    pub fn tick(&mut self, wall: DateTime<Utc>) {
        if let Some(board) = self.arrivals.as_mut() {
            ssv_render::refresh_etas(board, wall);
        }
    }

    /// Earliest moment a timer wants to run.
    pub fn next_deadline(&self) -> Option<Instant> {
        ssv_timers::next_deadline([&self.ticker, &self.poller, &self.elevator_poller])
    }

    /// Cancel every recurring task and forget in-flight fetches.
    pub fn teardown(&mut self) {
        for task in [&mut self.ticker, &mut self.poller, &mut self.elevator_poller]
            .into_iter()
            .flatten()
        {
            task.cancel();
        }
        if !self.pending.is_empty() {
            info!("dropping {} in-flight fetches", self.pending.len());
            self.pending.clear();
        }
    }
}

impl<A: StationApi> Drop for ViewState<A> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssv_map::MarkerList;
    use crate::ssv_models::{AdaStatus, ComplexMeta, SSVError};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeApi {
        complex: Option<ComplexInfo>,
        upcoming: Mutex<Vec<UpcomingTrain>>,
        upcoming_calls: AtomicUsize,
    }

    impl FakeApi {
        fn new(complex: Option<ComplexInfo>) -> Self {
            FakeApi {
                complex,
                upcoming: Mutex::new(Vec::new()),
                upcoming_calls: AtomicUsize::new(0),
            }
        }
    }

    impl StationApi for FakeApi {
        fn fetch_complex_info(&self, id: &str) -> Result<ComplexInfo> {
            self.complex
                .clone()
                .ok_or_else(|| SSVError::NetworkError(format!("complex '{}' not found", id)))
        }

        fn fetch_upcoming(&self, _id: &str) -> Result<Vec<UpcomingTrain>> {
            self.upcoming_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.upcoming.lock().unwrap().clone())
        }

        fn fetch_elevators(&self, _id: &str) -> Result<Vec<Elevator>> {
            Ok(Vec::new())
        }
    }

    fn train(trip: &str, wall: DateTime<Utc>, secs: i64) -> UpcomingTrain {
        UpcomingTrain {
            trip: trip.to_string(),
            stop: None,
            arrival: wall + chrono::Duration::seconds(secs),
            message: wall - chrono::Duration::seconds(10),
        }
    }

    fn complex(wall: DateTime<Utc>) -> ComplexInfo {
        ComplexInfo {
            meta: Some(ComplexMeta {
                name: "Times Sq-42 St".to_string(),
                ada: AdaStatus::Full,
                ada_notes: None,
                routes: vec!["1".into(), "7".into()],
                coord: (40.7559, -73.9871),
                stop_name: Some("Times Sq".to_string()),
                entrances: vec![],
            }),
            upcoming: vec![
                train("085350_1..N03R", wall, 120),
                train("085351_7..S03R", wall, 300),
            ],
            elevators: vec![],
        }
    }

    fn state(api: FakeApi) -> ViewState<FakeApi> {
        ViewState::new(Arc::new(api), "611".to_string(), Timing::default())
    }

    #[test]
    fn test_complex_render_starts_timers() {
        let wall = Utc::now();
        let now = Instant::now();
        let mut map = MarkerList::default();
        let mut st = state(FakeApi::new(None));

        assert!(st.poller().is_none() && st.ticker().is_none());
        st.apply_complex(complex(wall), wall, now, wall, &mut map);

        assert_eq!(st.load, LoadState::Ready);
        assert_eq!(st.station.as_ref().unwrap().window_title, "Subpar | Times Sq-42 St");
        assert_eq!(map.markers.len(), 1);
        assert_eq!(map.markers[0].popup, "Times Sq");
        assert_eq!(st.arrivals.as_ref().unwrap().cells.len(), 2);
        assert_eq!(st.poller().unwrap().period(), Duration::from_secs(30));
        assert_eq!(st.ticker().unwrap().period(), Duration::from_secs(5));
        assert_eq!(st.next_deadline(), Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn test_start_fetches_and_settles() {
        let mut map = MarkerList::default();
        let mut st = state(FakeApi::new(Some(complex(Utc::now()))));
        st.start();
        assert_eq!(st.load, LoadState::Loading);
        st.settle(&mut map);
        assert_eq!(st.load, LoadState::Ready);
        assert!(!st.is_fetching());
        assert!(st.station.is_some());
    }

    #[test]
    fn test_failed_first_load_has_no_timers() {
        let mut map = MarkerList::default();
        let mut st = state(FakeApi::new(None));
        st.start();
        st.settle(&mut map);
        assert!(matches!(st.load, LoadState::Failed(_)));
        assert!(st.poller().is_none());
        assert!(st.next_deadline().is_none());
    }

    #[test]
    fn test_poll_replaces_cell_cache() {
        let wall = Utc::now();
        let now = Instant::now();
        let mut map = MarkerList::default();
        let api = FakeApi::new(None);
        *api.upcoming.lock().unwrap() = vec![train("090000_L..S01R", wall, 600)];
        let mut st = state(api);
        st.apply_complex(complex(wall), wall, now, wall, &mut map);
        assert_eq!(st.arrivals.as_ref().unwrap().cells.len(), 2);

        // nothing due yet
        st.pump(now + Duration::from_secs(1), wall, &mut map);
        assert!(!st.is_fetching());

        st.pump(now + Duration::from_secs(30), wall, &mut map);
        assert!(st.is_fetching());
        st.settle(&mut map);

        assert_eq!(st.api.upcoming_calls.load(Ordering::SeqCst), 1);
        let board = st.arrivals.as_ref().unwrap();
        assert_eq!(board.cells.len(), 1);
        assert!(board.north.is_empty());
        assert_eq!(board.south[0].bullet.route, "L");
        assert_eq!(st.arrivals_renders, 2);
    }

    #[test]
    fn test_bad_snapshot_keeps_previous_board() {
        let wall = Utc::now();
        let now = Instant::now();
        let mut map = MarkerList::default();
        let mut st = state(FakeApi::new(None));
        st.apply_complex(complex(wall), wall, now, wall, &mut map);

        st.apply_upcoming(vec![train("nonsense", wall, 60)], now, wall);
        assert_eq!(st.arrivals.as_ref().unwrap().cells.len(), 2);
        assert!(st.last_error.as_deref().unwrap().contains("nonsense"));
    }

    #[test]
    fn test_ticker_marks_missed_trains() {
        let wall = Utc::now();
        let now = Instant::now();
        let mut map = MarkerList::default();
        let mut st = state(FakeApi::new(None));
        st.apply_complex(complex(wall), wall, now, wall, &mut map);

        let later = wall + chrono::Duration::seconds(150);
        assert!(st.pump(now + Duration::from_secs(5), later, &mut map));
        let board = st.arrivals.as_ref().unwrap();
        let first = board.cell(&board.north[0]);
        assert!(first.missed);
        assert_eq!(first.text, "-0.5");
        assert!(!board.cell(&board.south[0]).missed);

        st.pump(now + Duration::from_secs(10), wall, &mut map);
        let board = st.arrivals.as_ref().unwrap();
        assert!(board.cell(&board.north[0]).missed);
    }

    #[test]
    fn test_teardown_cancels_timers() {
        let wall = Utc::now();
        let now = Instant::now();
        let mut map = MarkerList::default();
        let mut st = state(FakeApi::new(None));
        st.apply_complex(complex(wall), wall, now, wall, &mut map);

        st.teardown();
        assert!(st.ticker().unwrap().is_cancelled());
        assert!(!st.pump(now + Duration::from_secs(300), wall, &mut map));
        assert!(!st.is_fetching());
        assert!(st.next_deadline().is_none());
    }

    #[test]
    fn test_missing_meta_still_renders_trains() {
        let wall = Utc::now();
        let now = Instant::now();
        let mut map = MarkerList::default();
        let mut st = state(FakeApi::new(None));
        let mut info = complex(wall);
        info.meta = None;
        st.apply_complex(info, wall, now, wall, &mut map);
        assert!(st.station.is_none());
        assert!(map.markers.is_empty());
        assert_eq!(st.arrivals.as_ref().unwrap().cells.len(), 2);
    }

    #[test]
    fn test_elevator_poller_only_when_configured() {
        let wall = Utc::now();
        let now = Instant::now();
        let mut map = MarkerList::default();
        let timing = Timing {
            elevator_period: Some(Duration::from_secs(600)),
            ..Timing::default()
        };
        let mut st = ViewState::new(Arc::new(FakeApi::new(None)), "611".to_string(), timing);
        st.apply_complex(complex(wall), wall, now, wall, &mut map);
        st.pump(now + Duration::from_secs(600), wall, &mut map);
        // upcoming + elevators
        assert_eq!(st.pending.len(), 2);
        st.settle(&mut map);
        assert!(st.elevators.cards.is_empty());
    }
}
