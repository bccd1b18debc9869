//! Prometheus registry for the agent: every metric is created and
//! registered in one place at construction time.

use crate::error::LoadLockError;
use prometheus::{Counter, Gauge, Registry};

#[derive(Clone)]
pub struct Metrics {
	pub active_count: Gauge,
	pub dispatched_total: Counter,
	pub released_total: Counter,
	pub poison_dropped_total: Counter,
	pub reconciliations_total: Counter,
}

impl Metrics {
	/// # Errors
	/// Returns an error if a metric cannot be registered (e.g. name
	/// collision within `registry`).
	pub fn new(registry: &Registry) -> Result<Self, LoadLockError> {
		let active_count = Gauge::new("load_lock_active_count", "Jobs currently in progress")?;
		let dispatched_total = Counter::new("load_lock_dispatched_total", "Total jobs dispatched")?;
		let released_total = Counter::new("load_lock_released_total", "Total releases processed")?;
		let poison_dropped_total = Counter::new("load_lock_poison_dropped_total", "Total malformed messages dropped")?;
		let reconciliations_total = Counter::new("load_lock_reconciliations_total", "Total reconciliation corrections applied")?;

		registry.register(Box::new(active_count.clone()))?;
		registry.register(Box::new(dispatched_total.clone()))?;
		registry.register(Box::new(released_total.clone()))?;
		registry.register(Box::new(poison_dropped_total.clone()))?;
		registry.register(Box::new(reconciliations_total.clone()))?;

		Ok(Self { active_count, dispatched_total, released_total, poison_dropped_total, reconciliations_total })
	}
}
