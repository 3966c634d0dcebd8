// Command line and environment configuration
use clap::Parser;
use log::warn;
use std::env;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.subpar.nyc";
pub const API_URL_VAR: &str = "SSV_API_URL";
pub const LOCATION_VAR: &str = "SSV_LOCATION";
/// Longest accepted period or timeout, in seconds (one day).
pub const MAX_SECS: u64 = 86_400;

#[derive(Parser, Debug, Clone)]
#[command(name = "ssv", version, about = "Real-time subway station viewer (entrances, elevators, arrivals)")]
pub struct Args {
    /// Station page location, e.g. https://subpar.nyc/c/611 or "/?id=611"
    pub location: Option<String>,

    /// Station complex id; shorthand for a "/c/<id>" location
    #[arg(long)]
    pub id: Option<String>,

    /// Base URL of the station API
    #[arg(long)]
    pub api_url: Option<String>,

    /// Auto-refreshing terminal display instead of the window
    #[arg(long)]
    pub terminal: bool,

    /// Seconds between upcoming-arrival refetches
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(0..=MAX_SECS))]
    pub poll_secs: u64,

    /// Seconds between countdown refreshes
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(0..=MAX_SECS))]
    pub tick_secs: u64,

    /// Minutes between elevator refetches (off unless given)
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=MAX_SECS / 60))]
    pub elevator_refresh_mins: Option<u64>,

    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 15, value_parser = clap::value_parser!(u64).range(0..=MAX_SECS))]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub location: String,
    pub terminal: bool,
    pub poll_period: Duration,
    pub tick_period: Duration,
    pub elevator_period: Option<Duration>,
    pub request_timeout: Duration,
}

impl Config {
    /// Command line first, then the environment (`.env` included), then
    /// built-in defaults.
    pub fn from_args(args: Args) -> Self {
        Self::resolve(args, |key| env::var(key).ok())
    }

    fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let location = match (args.id, args.location) {
            (Some(id), _) => format!("/c/{}", id),
            (None, Some(loc)) => loc,
            (None, None) => lookup(LOCATION_VAR).unwrap_or_default(),
        };

        let api_url = args
            .api_url
            .or_else(|| lookup(API_URL_VAR))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        Config {
            api_url,
            location,
            terminal: args.terminal,
            poll_period: Self::period("poll", args.poll_secs, 30),
            tick_period: Self::period("tick", args.tick_secs, 5),
            elevator_period: args
                .elevator_refresh_mins
                .filter(|m| *m > 0)
                .map(|m| Duration::from_secs(m.saturating_mul(60).min(MAX_SECS))),
            request_timeout: Self::period("timeout", args.timeout_secs, 15),
        }
    }

    fn period(what: &str, secs: u64, fallback: u64) -> Duration {
        if secs == 0 {
            warn!("{} period of 0s is not allowed, using {}s", what, fallback);
            return Duration::from_secs(fallback);
        }
        Duration::from_secs(secs.min(MAX_SECS))
    }
}
