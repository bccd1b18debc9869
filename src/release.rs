//! Release Handler: consumes the release inbox and clears the
//! per-group lock (and the global slot, if that transition actually
//! happened) for each release message.

use crate::error::LoadLockError;
use crate::metrics::Metrics;
use crate::protocol::Release;
use crate::store::Store;
use crate::topology;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ReleaseHandler {
	store: Arc<dyn Store>,
	metrics: Metrics,
	block_timeout_secs: u64,
}

impl ReleaseHandler {
	pub fn new(store: Arc<dyn Store>, metrics: Metrics, block_timeout_secs: u64) -> Self {
		Self { store, metrics, block_timeout_secs }
	}

	/// Runs one tick of the release handler. Returns `Ok(true)` if a
	/// release was processed.
	pub async fn tick(&self) -> Result<bool, LoadLockError> {
		let inbox = topology::release_queue();
		let processing = topology::release_processing();

		if self.store.rotate(&inbox, &processing, self.block_timeout_secs).await?.is_none() {
			return Ok(false);
		}

		let Some(raw) = self.store.rotate(&processing, &processing, self.block_timeout_secs).await? else {
			return Ok(false);
		};

		let release: Release = match serde_json::from_str(&raw) {
			Ok(release) => release,
			Err(err) => {
				warn!(error = %err, raw = %raw, "poison-dropping malformed release");
				self.store.list_remove_first_match(&processing, &raw).await?;
				self.metrics.poison_dropped_total.inc();
				return Ok(false);
			}
		};

		let group_queue = topology::group_queue(&release.group);
		let removed = self.store.set_remove(&topology::active_groups_set(), &group_queue).await?;

		if removed {
			self.store.decr(&topology::active_count_key()).await?;
			self.metrics.released_total.inc();
			debug!(group = %release.group, "released group");
		} else {
			debug!(group = %release.group, "duplicate or unknown release, no-op");
		}

		self.store.list_remove_first_match(&processing, &raw).await?;
		Ok(true)
	}
}
