use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadLockError {
	#[error("Redis error: {0}")]
	RedisError(#[from] redis::RedisError),
	#[error("Prometheus error: {0}")]
	PrometheusError(#[from] prometheus::Error),
	#[error("JSON error: {0}")]
	JsonError(#[from] serde_json::Error),
	#[error("Conversion error: {0}")]
	ConversionError(String),
}
