//! Dispatcher: the fair, throttled picker. While the global counter
//! permits, claims the next eligible group in round-robin order, pops
//! its head job, and publishes the unlock.

use crate::error::LoadLockError;
use crate::metrics::Metrics;
use crate::protocol::Registration;
use crate::store::Store;
use crate::topology;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Dispatcher {
	store: Arc<dyn Store>,
	metrics: Metrics,
	max_concurrency: i64,
	block_timeout_secs: u64,
}

impl Dispatcher {
	pub fn new(store: Arc<dyn Store>, metrics: Metrics, max_concurrency: i64, block_timeout_secs: u64) -> Self {
		Self { store, metrics, max_concurrency, block_timeout_secs }
	}

	/// Runs one tick of the dispatcher. Returns `Ok(true)` on a
	/// successful dispatch.
	pub async fn tick(&self) -> Result<bool, LoadLockError> {
		let active_count_key = topology::active_count_key();

		if self.store.get_counter(&active_count_key).await? >= self.max_concurrency {
			return Ok(false);
		}

		// Reserve the slot before picking a group. active-count can run
		// ahead of active-groups-set between here and a successful
		// dispatch; the decrement below unwinds a failed attempt, and
		// reconciliation repairs any drift that still slips through.
		self.store.incr(&active_count_key).await?;

		match self.try_dispatch().await {
			Ok(true) => Ok(true),
			Ok(false) => {
				self.store.decr(&active_count_key).await?;
				Ok(false)
			}
			Err(err) => {
				self.store.decr(&active_count_key).await?;
				Err(err)
			}
		}
	}

	async fn try_dispatch(&self) -> Result<bool, LoadLockError> {
		let rotation = topology::groups_rotation();
		let active_groups_set = topology::active_groups_set();

		let rounds = self.store.list_len(&rotation).await?;
		if rounds == 0 {
			return Ok(false);
		}

		for _ in 0..rounds {
			let Some(candidate) = self.store.rotate(&rotation, &rotation, self.block_timeout_secs).await? else {
				return Ok(false);
			};

			if self.store.set_add(&active_groups_set, &candidate).await? {
				return self.dispatch_from(&candidate).await;
			}
		}

		debug!("selection exhausted {rounds} candidates without finding an idle group");
		Ok(false)
	}

	async fn dispatch_from(&self, group_queue: &str) -> Result<bool, LoadLockError> {
		let active_groups_set = topology::active_groups_set();
		let processing = topology::group_queue_processing(group_queue);

		let Some(raw) = self.store.rotate(group_queue, &processing, self.block_timeout_secs).await? else {
			// Drained between route and dispatch; undo the claim.
			self.store.set_remove(&active_groups_set, group_queue).await?;
			return Ok(false);
		};

		let registration: Registration = match serde_json::from_str(&raw) {
			Ok(registration) => registration,
			Err(err) => {
				warn!(error = %err, raw = %raw, "poison-dropping malformed queued registration");
				self.store.list_remove_first_match(&processing, &raw).await?;
				self.store.set_remove(&active_groups_set, group_queue).await?;
				self.metrics.poison_dropped_total.inc();
				return Ok(false);
			}
		};

		let channel = topology::unlock_channel(&registration.id);
		self.store.publish(&channel, "unlock").await?;
		self.store.list_remove_first_match(&processing, &raw).await?;
		self.metrics.dispatched_total.inc();
		info!(group = %registration.group, id = %registration.id, "dispatched job");
		Ok(true)
	}
}
