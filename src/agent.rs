//! Agent Loop: the outer tick that drives reconciliation, the ingress
//! router, the release handler, and the dispatcher, then sleeps
//! briefly. The agent holds no in-memory state worth persisting — a
//! restart is just "re-read".

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::LoadLockError;
use crate::metrics::Metrics;
use crate::release::ReleaseHandler;
use crate::router::IngressRouter;
use crate::store::Store;
use crate::topology;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct Agent {
	store: Arc<dyn Store>,
	metrics: Metrics,
	router: IngressRouter,
	release_handler: ReleaseHandler,
	dispatcher: Dispatcher,
	tick_interval: Duration,
	block_timeout_secs: u64,
}

impl Agent {
	pub fn new(store: Arc<dyn Store>, metrics: Metrics, config: &Config) -> Self {
		let router = IngressRouter::new(store.clone(), metrics.clone(), config.block_timeout_secs);
		let release_handler = ReleaseHandler::new(store.clone(), metrics.clone(), config.block_timeout_secs);
		let dispatcher = Dispatcher::new(store.clone(), metrics.clone(), config.max_concurrency, config.block_timeout_secs);

		Self {
			store,
			metrics,
			router,
			release_handler,
			dispatcher,
			tick_interval: config.tick_interval,
			block_timeout_secs: config.block_timeout_secs,
		}
	}

	/// # Errors
	/// Returns an error if the store is unreachable.
	pub async fn startup(&self) -> Result<(), LoadLockError> {
		self.store.set_counter_if_absent(&topology::active_count_key(), 0).await
	}

	/// Runs the agent loop until the process is interrupted.
	pub async fn run(&self) -> Result<(), LoadLockError> {
		self.startup().await?;
		info!("agent loop starting");

		loop {
			tokio::select! {
				() = tokio::signal::ctrl_c() => {
					info!("received shutdown signal, exiting");
					return Ok(());
				}
				result = self.tick() => {
					result?;
				}
			}
			tokio::time::sleep(self.tick_interval).await;
		}
	}

	/// # Errors
	/// Returns an error from any of the store calls made this tick. A
	/// transient store error should be logged by the caller and retried
	/// next tick; nothing here is fatal.
	pub async fn tick(&self) -> Result<(), LoadLockError> {
		self.reconcile().await?;
		self.router.tick().await?;
		self.release_handler.tick().await?;
		self.dispatcher.tick().await?;
		Ok(())
	}

	/// Repairs the sources of drift the base design tolerates between
	/// ticks: `active-count` diverging from the size of
	/// `active-groups-set` (§4.3); idle, drained groups left stranded in
	/// the rotation wheel; and groups present in `groups-set` with
	/// pending work but missing from the wheel entirely, the way a crash
	/// between a group's first group-queue push and its rotation push
	/// can leave things (§4.2, §9).
	async fn reconcile(&self) -> Result<(), LoadLockError> {
		let active_groups_set = topology::active_groups_set();
		let active_count_key = topology::active_count_key();

		let observed = i64::try_from(self.store.set_len(&active_groups_set).await?).map_err(|err| LoadLockError::ConversionError(err.to_string()))?;
		let recorded = self.store.get_counter(&active_count_key).await?;

		if observed != recorded {
			warn!(recorded, observed, "reconciling active-count against active-groups-set");
			self.store.set_counter(&active_count_key, observed).await?;
			self.metrics.reconciliations_total.inc();
		}
		self.metrics.active_count.set(observed as f64);

		self.sweep_orphaned_groups().await
	}

	async fn sweep_orphaned_groups(&self) -> Result<(), LoadLockError> {
		let rotation = topology::groups_rotation();
		let active_groups_set = topology::active_groups_set();
		let groups_set = topology::groups_set();

		let rounds = self.store.list_len(&rotation).await?;
		for _ in 0..rounds {
			let Some(candidate) = self.store.rotate(&rotation, &rotation, self.block_timeout_secs).await? else {
				break;
			};

			let is_active = self.store.set_contains(&active_groups_set, &candidate).await?;
			let pending = self.store.list_len(&candidate).await?;

			if !is_active && pending == 0 {
				if let Some(group) = topology::group_name_from_queue(&candidate) {
					self.store.set_remove(&groups_set, group).await?;
				}
				self.store.list_remove_first_match(&rotation, &candidate).await?;
				self.metrics.reconciliations_total.inc();
				info!(group_queue = %candidate, "swept idle orphaned group from rotation");
			}
		}

		for group in self.store.set_members(&groups_set).await? {
			let group_queue = topology::group_queue(&group);
			if self.store.list_len(&group_queue).await? == 0 {
				continue;
			}
			if !self.store.list_contains(&rotation, &group_queue).await? {
				self.store.list_push_head(&rotation, &group_queue).await?;
				self.metrics.reconciliations_total.inc();
				warn!(group = %group, "re-admitted orphaned group missing from rotation wheel");
			}
		}

		Ok(())
	}

	/// Flushes the entire logical namespace. Intended for the `clean`
	/// admin command; not called from the tick loop.
	pub async fn clean(&self) -> Result<(), LoadLockError> {
		self.store.flush_namespace(&topology::namespace_prefix()).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::protocol::{Registration, Release};
	use crate::store::InMemoryStore;
	use prometheus::Registry;

	fn agent(store: Arc<dyn Store>) -> Agent {
		let metrics = Metrics::new(&Registry::new()).unwrap();
		Agent::new(store, metrics, &Config::test())
	}

	async fn push_registration(store: &InMemoryStore, id: &str, group: &str) {
		let raw = serde_json::to_string(&Registration { id: id.to_string(), group: group.to_string() }).unwrap();
		store.list_push_head(&topology::registration_queue(), &raw).await.unwrap();
	}

	async fn push_release(store: &InMemoryStore, group: &str) {
		let raw = serde_json::to_string(&Release { id: String::new(), group: group.to_string() }).unwrap();
		store.list_push_head(&topology::release_queue(), &raw).await.unwrap();
	}

	#[tokio::test]
	async fn single_group_single_job_end_to_end() {
		let store = Arc::new(InMemoryStore::new());
		let agent = agent(store.clone());
		agent.startup().await.unwrap();

		push_registration(&store, "a", "g1").await;
		agent.tick().await.unwrap();
		agent.tick().await.unwrap();

		assert_eq!(store.published(), vec![(topology::unlock_channel("a"), "unlock".to_string())]);
		assert_eq!(store.get_counter(&topology::active_count_key()).await.unwrap(), 1);

		push_release(&store, "g1").await;
		agent.tick().await.unwrap();
		agent.tick().await.unwrap();

		assert_eq!(store.get_counter(&topology::active_count_key()).await.unwrap(), 0);
	}

	#[tokio::test]
	async fn reconciliation_repairs_divergent_counter() {
		let store = Arc::new(InMemoryStore::new());
		let agent = agent(store.clone());

		let group_queue = topology::group_queue("g1");
		store.set_add(&topology::active_groups_set(), &group_queue).await.unwrap();
		store.set_counter(&topology::active_count_key(), 5).await.unwrap();

		agent.tick().await.unwrap();

		assert_eq!(store.get_counter(&topology::active_count_key()).await.unwrap(), 1);
	}

	#[tokio::test]
	async fn sweep_removes_idle_drained_group_but_not_active_or_pending_ones() {
		let store = Arc::new(InMemoryStore::new());
		let agent = agent(store.clone());

		// g1: idle and drained -> should be swept.
		let idle_queue = topology::group_queue("g1");
		store.set_add(&topology::groups_set(), "g1").await.unwrap();
		store.list_push_head(&topology::groups_rotation(), &idle_queue).await.unwrap();

		// g2: has pending work -> must survive.
		push_registration(&store, "b", "g2").await;
		let router = IngressRouter::new(store.clone(), Metrics::new(&Registry::new()).unwrap(), 1);
		router.tick().await.unwrap();

		// g3: currently active -> must survive.
		let active_queue = topology::group_queue("g3");
		store.set_add(&topology::groups_set(), "g3").await.unwrap();
		store.list_push_head(&topology::groups_rotation(), &active_queue).await.unwrap();
		store.set_add(&topology::active_groups_set(), &active_queue).await.unwrap();

		agent.tick().await.unwrap();

		let remaining = store.list_contents(&topology::groups_rotation());
		assert!(!remaining.contains(&idle_queue));
		assert!(remaining.contains(&topology::group_queue("g2")));
		assert!(remaining.contains(&active_queue));
	}

	#[tokio::test]
	async fn sweep_readmits_a_group_with_pending_work_missing_from_the_rotation() {
		let store = Arc::new(InMemoryStore::new());
		let agent = agent(store.clone());

		// Simulates a crash between the group-queue push and the
		// rotation push on a group's first registration: `g1` is a
		// member of `groups-set` and has a pending job, but the wheel
		// never got its entry.
		let group_queue = topology::group_queue("g1");
		store.set_add(&topology::groups_set(), "g1").await.unwrap();
		let raw = serde_json::to_string(&Registration { id: "a".to_string(), group: "g1".to_string() }).unwrap();
		store.list_push_head(&group_queue, &raw).await.unwrap();

		assert_eq!(store.list_len(&topology::groups_rotation()).await.unwrap(), 0);

		agent.tick().await.unwrap();

		assert!(store.list_contents(&topology::groups_rotation()).contains(&group_queue));
		assert_eq!(store.published(), vec![(topology::unlock_channel("a"), "unlock".to_string())]);
	}

	#[tokio::test]
	async fn clean_flushes_the_namespace() {
		let store = Arc::new(InMemoryStore::new());
		let agent = agent(store.clone());

		push_registration(&store, "a", "g1").await;
		agent.clean().await.unwrap();

		assert_eq!(store.list_len(&topology::registration_queue()).await.unwrap(), 0);
		assert_eq!(store.list_len(&topology::group_queue("g1")).await.unwrap(), 0);
	}
}
