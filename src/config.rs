use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Parser, Clone, Debug, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
pub struct Config {
	#[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379", help = "Address of the shared durable store")]
	pub redis_url: String,

	#[arg(long, env = "LOAD_LOCK_MAX_CONCURRENCY", default_value = "5", help = "Global concurrency cap (N_max)")]
	pub max_concurrency: i64,

	#[arg(
        long,
        env = "LOAD_LOCK_TICK_INTERVAL_MS",
        default_value = "10",
        value_parser = parse_millis,
        help = "Sleep between agent ticks in milliseconds"
    )]
	pub tick_interval: Duration,

	#[arg(
        long,
        env = "LOAD_LOCK_BLOCK_TIMEOUT_SECS",
        default_value = "1",
        help = "Timeout for blocking rotate calls in seconds"
    )]
	pub block_timeout_secs: u64,

	#[arg(long, env = "LOAD_LOCK_LOG_FORMAT", default_value = "text", value_enum, help = "Log output format")]
	pub log_format: LogFormat,

	#[command(subcommand)]
	pub command: Option<Command>,
}

#[derive(Subcommand, Clone, Debug, Serialize, Deserialize)]
pub enum Command {
	/// Run the agent loop until interrupted (default).
	Run,
	/// Flush the logical namespace and exit.
	Clean,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
	Text,
	Json,
}

impl Config {
	pub fn new() -> Self {
		Self::parse()
	}

	pub fn command(&self) -> Command {
		self.command.clone().unwrap_or(Command::Run)
	}

	#[cfg(test)]
	pub fn test() -> Self {
		Self {
			redis_url: "redis://127.0.0.1:6379".to_string(),
			max_concurrency: 2,
			tick_interval: Duration::from_millis(1),
			block_timeout_secs: 1,
			log_format: LogFormat::Text,
			command: Some(Command::Run),
		}
	}
}

fn parse_millis(s: &str) -> Result<Duration, std::num::ParseIntError> {
	s.parse::<u64>().map(Duration::from_millis)
}
