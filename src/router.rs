//! Ingress Router: consumes up to one registration per tick and routes
//! it to its group, registering the group in the fair rotation on
//! first sight.

use crate::error::LoadLockError;
use crate::metrics::Metrics;
use crate::protocol::Registration;
use crate::store::Store;
use crate::topology;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct IngressRouter {
	store: Arc<dyn Store>,
	metrics: Metrics,
	block_timeout_secs: u64,
}

impl IngressRouter {
	pub fn new(store: Arc<dyn Store>, metrics: Metrics, block_timeout_secs: u64) -> Self {
		Self { store, metrics, block_timeout_secs }
	}

	/// Runs one tick of the ingress router. Returns `Ok(true)` if a
	/// registration was routed (for observability only; the agent loop
	/// does not branch on it).
	pub async fn tick(&self) -> Result<bool, LoadLockError> {
		let inbox = topology::registration_queue();
		let processing = topology::registration_processing();

		if self.store.rotate(&inbox, &processing, self.block_timeout_secs).await?.is_none() {
			return Ok(false);
		}

		// Pick an item to work on. Covers the restart-recovery case: a
		// message already sitting in `processing` from a prior crash is
		// retried here in arrival order.
		let Some(raw) = self.store.rotate(&processing, &processing, self.block_timeout_secs).await? else {
			return Ok(false);
		};

		let registration: Registration = match serde_json::from_str(&raw) {
			Ok(registration) => registration,
			Err(err) => {
				warn!(error = %err, raw = %raw, "poison-dropping malformed registration");
				self.store.list_remove_first_match(&processing, &raw).await?;
				self.metrics.poison_dropped_total.inc();
				return Ok(false);
			}
		};

		self.route(&processing, &raw, &registration).await
	}

	async fn route(&self, processing: &str, raw: &str, registration: &Registration) -> Result<bool, LoadLockError> {
		let groups_set = topology::groups_set();
		let group_queue = topology::group_queue(&registration.group);
		let rotation = topology::groups_rotation();

		let added = self.store.set_add(&groups_set, &registration.group).await?;

		if let Err(err) = self.store.list_push_head(&group_queue, raw).await {
			if added {
				self.store.set_remove(&groups_set, &registration.group).await?;
			}
			return Err(err);
		}

		if added {
			if let Err(err) = self.store.list_push_head(&rotation, &group_queue).await {
				self.store.set_remove(&groups_set, &registration.group).await?;
				return Err(err);
			}
		}

		self.store.list_remove_first_match(processing, raw).await?;
		debug!(group = %registration.group, id = %registration.id, "routed registration");
		Ok(true)
	}
}
