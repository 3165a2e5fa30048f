use clap::Parser;
use fork_scout::discovery::ForkSort;
use secrecy::SecretString;
use std::{
    fmt::{Debug, Display},
    str::FromStr,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Repository as `owner/name`, URL or `git@` remote
    #[clap(env = "FORK_SCOUT_REPOSITORY")]
    pub repository: String,

    /// API OAuth access token
    #[clap(short, long, env)]
    pub api_token: Option<SecretString>,

    /// Repository API URL
    #[clap(long, env, default_value = "https://api.github.com")]
    pub api_url: String,

    /// Analyze only forks pushed to within this many days, 0 analyzes all of them
    #[clap(long, env, default_value_t = 365)]
    pub min_activity_days: u32,

    /// Report only forks with at least this many commits ahead of the parent
    #[clap(long, env, default_value_t = 1)]
    pub min_commits_ahead: u32,

    /// Maximal number of forks compared against the parent
    #[clap(long, env, default_value_t = 100, parse(try_from_str=max_forks_to_analyze_in_range))]
    pub max_forks_to_analyze: usize,

    /// Maximal number of forks listed, all of them when absent
    #[clap(long, env)]
    pub max_forks_to_list: Option<usize>,

    /// Include archived and disabled forks
    #[clap(long, env)]
    pub include_archived: bool,

    /// Maximal parallel comparison requests
    #[clap(short, long, env, default_value_t = 4, parse(try_from_str=concurrency_in_range))]
    pub concurrency: usize,

    /// Repository metadata cache time to live in seconds
    #[clap(long, env, default_value_t = 300)]
    pub cache_ttl_secs: u64,

    /// Retries of a rate limited or failed request
    #[clap(long, env, default_value_t = 3, parse(try_from_str=max_retries_in_range))]
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds
    #[clap(long, env, default_value_t = 1_000, parse(try_from_str=base_delay_ms_in_range))]
    pub base_delay_ms: u64,

    /// Multiplier of the retry delay after every attempt
    #[clap(long, env, default_value_t = 2.0, parse(try_from_str=backoff_factor_in_range))]
    pub backoff_factor: f64,

    /// Longest delay between retries in seconds
    #[clap(long, env, default_value_t = 60, parse(try_from_str=max_delay_secs_in_range))]
    pub max_delay_secs: u64,

    /// Longest wait for a rate limit reset in seconds
    #[clap(long, env, default_value_t = 900, parse(try_from_str=max_rate_limit_wait_secs_in_range))]
    pub max_rate_limit_wait_secs: u64,

    /// Timeout of a single request in seconds
    #[clap(long, env, default_value_t = 30, parse(try_from_str=call_timeout_secs_in_range))]
    pub call_timeout_secs: u64,

    /// Forks requested per listing page
    #[clap(long, env, default_value_t = 100, parse(try_from_str=page_size_in_range))]
    pub page_size: u32,

    /// Requests an unoptimized run spends per fork, used to estimate the saved calls
    #[clap(long, env, default_value_t = 1, parse(try_from_str=calls_per_fork_in_range))]
    pub calls_per_fork: u32,

    /// Consecutive failures opening the circuit breaker
    #[clap(long, env, default_value_t = 5, parse(try_from_str=failure_threshold_in_range))]
    pub failure_threshold: u32,

    /// Seconds the circuit breaker stays open
    #[clap(long, env, default_value_t = 60)]
    pub breaker_timeout_secs: u64,

    /// Fetch commits of forks needing analysis
    #[clap(long, env)]
    pub fetch_commits: bool,

    /// Most recent commits fetched per fork
    #[clap(long, env, default_value_t = 5, parse(try_from_str=max_commits_per_fork_in_range))]
    pub max_commits_per_fork: usize,

    /// Order of reported forks: commits-ahead, stars or pushed
    #[clap(short, long, env, default_value = "commits-ahead")]
    pub sort: ForkSort,

    /// Stop and report what was found after this many seconds
    #[clap(long, env)]
    pub deadline_secs: Option<u64>,
}

fn max_forks_to_analyze_in_range(value: &str) -> clap::Result<usize, String> {
    number_in_range(value, 1, 10_000, "max_forks_to_analyze".to_string())
}

fn concurrency_in_range(value: &str) -> clap::Result<usize, String> {
    number_in_range(value, 1, 64, "concurrency".to_string())
}

fn max_retries_in_range(value: &str) -> clap::Result<u32, String> {
    number_in_range(value, 0, 10, "max_retries".to_string())
}

fn base_delay_ms_in_range(value: &str) -> clap::Result<u64, String> {
    number_in_range(value, 1, 60_000, "base_delay_ms".to_string())
}

fn backoff_factor_in_range(value: &str) -> clap::Result<f64, String> {
    number_in_range(value, 1.0, 10.0, "backoff_factor".to_string())
}

fn max_delay_secs_in_range(value: &str) -> clap::Result<u64, String> {
    number_in_range(value, 1, 3_600, "max_delay_secs".to_string())
}

fn max_rate_limit_wait_secs_in_range(value: &str) -> clap::Result<u64, String> {
    number_in_range(value, 0, 24 * 60 * 60, "max_rate_limit_wait_secs".to_string())
}

fn call_timeout_secs_in_range(value: &str) -> clap::Result<u64, String> {
    number_in_range(value, 1, 600, "call_timeout_secs".to_string())
}

fn page_size_in_range(value: &str) -> clap::Result<u32, String> {
    number_in_range(value, 1, 100, "page_size".to_string())
}

fn calls_per_fork_in_range(value: &str) -> clap::Result<u32, String> {
    number_in_range(value, 1, 100, "calls_per_fork".to_string())
}

fn failure_threshold_in_range(value: &str) -> clap::Result<u32, String> {
    number_in_range(value, 1, u32::MAX, "failure_threshold".to_string())
}

fn max_commits_per_fork_in_range(value: &str) -> clap::Result<usize, String> {
    number_in_range(value, 1, 250, "max_commits_per_fork".to_string())
}

fn number_in_range<T>(value: &str, min: T, max: T, name: String) -> clap::Result<T, String>
where
    T: FromStr + PartialOrd + Display,
    <T as FromStr>::Err: Display,
{
    value.parse::<T>().map_err(|err| format!("{}", err)).and_then(|value| {
        if value < min || value > max {
            return Err(format!("{} is not in range {} .. {}.", name, min, max));
        }
        Ok(value)
    })
}
