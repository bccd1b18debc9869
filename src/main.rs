use load_lock::config::{Command, Config};
use load_lock::{Agent, LoadLockError, RedisStore};
use prometheus::Registry;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
	let config = Config::new();
	init_tracing(&config);

	match run(config).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			tracing::error!(error = %err, "agent exited with a fatal error");
			ExitCode::FAILURE
		}
	}
}

async fn run(config: Config) -> Result<(), LoadLockError> {
	let store = RedisStore::connect(&config.redis_url).await?;
	store.ping().await?;

	let registry = Registry::new();
	let metrics = load_lock::metrics::Metrics::new(&registry)?;
	let agent = Agent::new(Arc::new(store), metrics, &config);

	match config.command() {
		Command::Run => agent.run().await,
		Command::Clean => {
			agent.clean().await?;
			tracing::info!("flushed load-lock namespace");
			Ok(())
		}
	}
}

fn init_tracing(config: &Config) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

	match config.log_format {
		load_lock::config::LogFormat::Json => subscriber.json().init(),
		load_lock::config::LogFormat::Text => subscriber.init(),
	}
}
