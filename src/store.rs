//! Store Adapter: a thin wrapper exposing exactly the primitive
//! list/set/counter/pub-sub operations the core state machine needs.
//! Every operation is assumed atomic individually; multi-key atomicity
//! is not assumed here and is composed by the callers in `router`,
//! `release`, and `dispatcher`.

use crate::error::LoadLockError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

#[async_trait]
pub trait Store: Send + Sync {
	async fn get_counter(&self, key: &str) -> Result<i64, LoadLockError>;
	async fn set_counter_if_absent(&self, key: &str, value: i64) -> Result<(), LoadLockError>;
	async fn set_counter(&self, key: &str, value: i64) -> Result<(), LoadLockError>;
	async fn incr(&self, key: &str) -> Result<i64, LoadLockError>;
	async fn decr(&self, key: &str) -> Result<i64, LoadLockError>;

	async fn list_push_head(&self, key: &str, value: &str) -> Result<(), LoadLockError>;
	async fn list_len(&self, key: &str) -> Result<usize, LoadLockError>;
	async fn list_remove_first_match(&self, key: &str, value: &str) -> Result<(), LoadLockError>;

	async fn set_add(&self, key: &str, member: &str) -> Result<bool, LoadLockError>;
	async fn set_remove(&self, key: &str, member: &str) -> Result<bool, LoadLockError>;
	async fn set_len(&self, key: &str) -> Result<usize, LoadLockError>;
	async fn set_contains(&self, key: &str, member: &str) -> Result<bool, LoadLockError>;
	async fn set_members(&self, key: &str) -> Result<Vec<String>, LoadLockError>;

	async fn list_contains(&self, key: &str, value: &str) -> Result<bool, LoadLockError>;

	async fn publish(&self, channel: &str, payload: &str) -> Result<(), LoadLockError>;

	/// Atomically pops from the tail of `src` and pushes to the head of
	/// `dst`, blocking up to `timeout_secs` for an item to appear.
	/// Returns `None` on timeout. When `src == dst` this is a
	/// non-destructive peek-and-advance of a cyclic list.
	async fn rotate(&self, src: &str, dst: &str, timeout_secs: u64) -> Result<Option<String>, LoadLockError>;

	/// Flushes every key under the given namespace prefix. Intended for
	/// the `clean` admin command.
	async fn flush_namespace(&self, prefix: &str) -> Result<(), LoadLockError>;
}

/// Redis-backed implementation. Wraps a `ConnectionManager`, which is
/// already cheap to clone and safe to use concurrently, so unlike a
/// bare `redis::Connection` no external mutex is needed.
#[derive(Clone)]
pub struct RedisStore {
	conn: ConnectionManager,
}

impl RedisStore {
	/// # Errors
	/// Returns an error if the Redis client cannot be constructed or the
	/// initial connection cannot be established.
	pub async fn connect(redis_url: &str) -> Result<Self, LoadLockError> {
		let client = Client::open(redis_url)?;
		let conn = client.get_connection_manager().await?;
		Ok(Self { conn })
	}

	/// # Errors
	/// Returns an error if the store is unreachable.
	pub async fn ping(&self) -> Result<(), LoadLockError> {
		let mut conn = self.conn.clone();
		let _: String = redis::cmd("PING").query_async(&mut conn).await?;
		Ok(())
	}
}

#[async_trait]
impl Store for RedisStore {
	async fn get_counter(&self, key: &str) -> Result<i64, LoadLockError> {
		let mut conn = self.conn.clone();
		let value: Option<i64> = conn.get(key).await?;
		Ok(value.unwrap_or(0))
	}

	async fn set_counter_if_absent(&self, key: &str, value: i64) -> Result<(), LoadLockError> {
		let mut conn = self.conn.clone();
		let _: bool = conn.set_nx(key, value).await?;
		Ok(())
	}

	async fn set_counter(&self, key: &str, value: i64) -> Result<(), LoadLockError> {
		let mut conn = self.conn.clone();
		let _: () = conn.set(key, value).await?;
		Ok(())
	}

	async fn incr(&self, key: &str) -> Result<i64, LoadLockError> {
		let mut conn = self.conn.clone();
		let value: i64 = conn.incr(key, 1).await?;
		Ok(value)
	}

	async fn decr(&self, key: &str) -> Result<i64, LoadLockError> {
		let mut conn = self.conn.clone();
		let value: i64 = conn.decr(key, 1).await?;
		Ok(value)
	}

	async fn list_push_head(&self, key: &str, value: &str) -> Result<(), LoadLockError> {
		let mut conn = self.conn.clone();
		let _: i64 = conn.lpush(key, value).await?;
		Ok(())
	}

	async fn list_len(&self, key: &str) -> Result<usize, LoadLockError> {
		let mut conn = self.conn.clone();
		let len: usize = conn.llen(key).await?;
		Ok(len)
	}

	async fn list_remove_first_match(&self, key: &str, value: &str) -> Result<(), LoadLockError> {
		let mut conn = self.conn.clone();
		let _: i64 = conn.lrem(key, 1, value).await?;
		Ok(())
	}

	async fn set_add(&self, key: &str, member: &str) -> Result<bool, LoadLockError> {
		let mut conn = self.conn.clone();
		let added: i64 = conn.sadd(key, member).await?;
		Ok(added > 0)
	}

	async fn set_remove(&self, key: &str, member: &str) -> Result<bool, LoadLockError> {
		let mut conn = self.conn.clone();
		let removed: i64 = conn.srem(key, member).await?;
		Ok(removed > 0)
	}

	async fn set_len(&self, key: &str) -> Result<usize, LoadLockError> {
		let mut conn = self.conn.clone();
		let len: usize = conn.scard(key).await?;
		Ok(len)
	}

	async fn set_contains(&self, key: &str, member: &str) -> Result<bool, LoadLockError> {
		let mut conn = self.conn.clone();
		let contains: bool = conn.sismember(key, member).await?;
		Ok(contains)
	}

	async fn set_members(&self, key: &str) -> Result<Vec<String>, LoadLockError> {
		let mut conn = self.conn.clone();
		let members: Vec<String> = conn.smembers(key).await?;
		Ok(members)
	}

	async fn list_contains(&self, key: &str, value: &str) -> Result<bool, LoadLockError> {
		let mut conn = self.conn.clone();
		let position: Option<i64> = redis::cmd("LPOS").arg(key).arg(value).query_async(&mut conn).await?;
		Ok(position.is_some())
	}

	async fn publish(&self, channel: &str, payload: &str) -> Result<(), LoadLockError> {
		let mut conn = self.conn.clone();
		let _: i64 = conn.publish(channel, payload).await?;
		Ok(())
	}

	async fn rotate(&self, src: &str, dst: &str, timeout_secs: u64) -> Result<Option<String>, LoadLockError> {
		let mut conn = self.conn.clone();
		let item: Option<String> = redis::cmd("BRPOPLPUSH").arg(src).arg(dst).arg(timeout_secs).query_async(&mut conn).await?;
		Ok(item)
	}

	async fn flush_namespace(&self, prefix: &str) -> Result<(), LoadLockError> {
		let mut conn = self.conn.clone();
		let pattern = format!("{prefix}*");
		let mut cursor: u64 = 0;
		loop {
			let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN").arg(cursor).arg("MATCH").arg(&pattern).arg("COUNT").arg(200).query_async(&mut conn).await?;
			if !keys.is_empty() {
				let _: i64 = conn.del(&keys).await?;
			}
			cursor = next_cursor;
			if cursor == 0 {
				break;
			}
		}
		Ok(())
	}
}

/// In-memory fake of the store adapter, swappable behind the same
/// `Store` trait. Used by unit and property tests so the state machine
/// can be exercised without a running Redis. Blocking `rotate` calls
/// never actually block: an empty source returns `None` immediately,
/// which is sufficient to drive the agent loop deterministically one
/// tick at a time.
#[derive(Default)]
pub struct InMemoryStore {
	inner: Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
	counters: std::collections::HashMap<String, i64>,
	lists: std::collections::HashMap<String, VecDeque<String>>,
	sets: std::collections::HashMap<String, HashSet<String>>,
	published: Vec<(String, String)>,
}

impl InMemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Test helper: every `(channel, payload)` pair published so far.
	pub fn published(&self) -> Vec<(String, String)> {
		self.inner.lock().expect("poisoned").published.clone()
	}

	pub fn list_contents(&self, key: &str) -> Vec<String> {
		self.inner.lock().expect("poisoned").lists.get(key).cloned().unwrap_or_default().into_iter().collect()
	}
}

#[async_trait]
impl Store for InMemoryStore {
	async fn get_counter(&self, key: &str) -> Result<i64, LoadLockError> {
		Ok(*self.inner.lock().expect("poisoned").counters.get(key).unwrap_or(&0))
	}

	async fn set_counter_if_absent(&self, key: &str, value: i64) -> Result<(), LoadLockError> {
		self.inner.lock().expect("poisoned").counters.entry(key.to_string()).or_insert(value);
		Ok(())
	}

	async fn set_counter(&self, key: &str, value: i64) -> Result<(), LoadLockError> {
		self.inner.lock().expect("poisoned").counters.insert(key.to_string(), value);
		Ok(())
	}

	async fn incr(&self, key: &str) -> Result<i64, LoadLockError> {
		let mut inner = self.inner.lock().expect("poisoned");
		let entry = inner.counters.entry(key.to_string()).or_insert(0);
		*entry += 1;
		Ok(*entry)
	}

	async fn decr(&self, key: &str) -> Result<i64, LoadLockError> {
		let mut inner = self.inner.lock().expect("poisoned");
		let entry = inner.counters.entry(key.to_string()).or_insert(0);
		*entry -= 1;
		Ok(*entry)
	}

	async fn list_push_head(&self, key: &str, value: &str) -> Result<(), LoadLockError> {
		self.inner.lock().expect("poisoned").lists.entry(key.to_string()).or_default().push_front(value.to_string());
		Ok(())
	}

	async fn list_len(&self, key: &str) -> Result<usize, LoadLockError> {
		Ok(self.inner.lock().expect("poisoned").lists.get(key).map_or(0, VecDeque::len))
	}

	async fn list_remove_first_match(&self, key: &str, value: &str) -> Result<(), LoadLockError> {
		let mut inner = self.inner.lock().expect("poisoned");
		if let Some(list) = inner.lists.get_mut(key) {
			if let Some(pos) = list.iter().position(|item| item == value) {
				list.remove(pos);
			}
		}
		Ok(())
	}

	async fn set_add(&self, key: &str, member: &str) -> Result<bool, LoadLockError> {
		Ok(self.inner.lock().expect("poisoned").sets.entry(key.to_string()).or_default().insert(member.to_string()))
	}

	async fn set_remove(&self, key: &str, member: &str) -> Result<bool, LoadLockError> {
		Ok(self.inner.lock().expect("poisoned").sets.entry(key.to_string()).or_default().remove(member))
	}

	async fn set_len(&self, key: &str) -> Result<usize, LoadLockError> {
		Ok(self.inner.lock().expect("poisoned").sets.get(key).map_or(0, HashSet::len))
	}

	async fn set_contains(&self, key: &str, member: &str) -> Result<bool, LoadLockError> {
		Ok(self.inner.lock().expect("poisoned").sets.get(key).is_some_and(|set| set.contains(member)))
	}

	async fn set_members(&self, key: &str) -> Result<Vec<String>, LoadLockError> {
		Ok(self.inner.lock().expect("poisoned").sets.get(key).cloned().unwrap_or_default().into_iter().collect())
	}

	async fn list_contains(&self, key: &str, value: &str) -> Result<bool, LoadLockError> {
		Ok(self.inner.lock().expect("poisoned").lists.get(key).is_some_and(|list| list.iter().any(|item| item == value)))
	}

	async fn publish(&self, channel: &str, payload: &str) -> Result<(), LoadLockError> {
		self.inner.lock().expect("poisoned").published.push((channel.to_string(), payload.to_string()));
		Ok(())
	}

	async fn rotate(&self, src: &str, dst: &str, _timeout_secs: u64) -> Result<Option<String>, LoadLockError> {
		let mut inner = self.inner.lock().expect("poisoned");
		let popped = inner.lists.get_mut(src).and_then(VecDeque::pop_back);
		if let Some(item) = &popped {
			inner.lists.entry(dst.to_string()).or_default().push_front(item.clone());
		}
		Ok(popped)
	}

	async fn flush_namespace(&self, prefix: &str) -> Result<(), LoadLockError> {
		let mut inner = self.inner.lock().expect("poisoned");
		inner.counters.retain(|k, _| !k.starts_with(prefix));
		inner.lists.retain(|k, _| !k.starts_with(prefix));
		inner.sets.retain(|k, _| !k.starts_with(prefix));
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn rotate_moves_tail_to_head() {
		let store = InMemoryStore::new();
		store.list_push_head("src", "a").await.unwrap();
		store.list_push_head("src", "b").await.unwrap();
		// list is now [b, a] (head..tail); rotate pops tail ("a")
		let popped = store.rotate("src", "dst", 1).await.unwrap();
		assert_eq!(popped, Some("a".to_string()));
		assert_eq!(store.list_contents("dst"), vec!["a".to_string()]);
	}

	#[tokio::test]
	async fn rotate_on_same_list_is_a_cyclic_advance() {
		let store = InMemoryStore::new();
		store.list_push_head("wheel", "g1").await.unwrap();
		store.list_push_head("wheel", "g2").await.unwrap();
		store.list_push_head("wheel", "g3").await.unwrap();
		// [g3, g2, g1] -> rotate moves tail g1 to head -> [g1, g3, g2]
		let popped = store.rotate("wheel", "wheel", 1).await.unwrap();
		assert_eq!(popped, Some("g1".to_string()));
		assert_eq!(store.list_contents("wheel"), vec!["g1", "g3", "g2"]);
	}

	#[tokio::test]
	async fn rotate_on_empty_list_times_out() {
		let store = InMemoryStore::new();
		assert_eq!(store.rotate("missing", "missing", 1).await.unwrap(), None);
	}

	#[tokio::test]
	async fn set_add_reports_first_time_membership() {
		let store = InMemoryStore::new();
		assert!(store.set_add("s", "x").await.unwrap());
		assert!(!store.set_add("s", "x").await.unwrap());
	}

	#[tokio::test]
	async fn list_contains_checks_membership_without_mutating() {
		let store = InMemoryStore::new();
		store.list_push_head("wheel", "g1").await.unwrap();
		assert!(store.list_contains("wheel", "g1").await.unwrap());
		assert!(!store.list_contains("wheel", "g2").await.unwrap());
		assert_eq!(store.list_len("wheel").await.unwrap(), 1);
	}

	#[tokio::test]
	async fn set_members_lists_every_member() {
		let store = InMemoryStore::new();
		store.set_add("s", "a").await.unwrap();
		store.set_add("s", "b").await.unwrap();
		let mut members = store.set_members("s").await.unwrap();
		members.sort();
		assert_eq!(members, vec!["a".to_string(), "b".to_string()]);
	}
}
