//! Static key-naming scheme shared by every component. No behavior lives
//! here — just the conventions so the naming scheme cannot drift between
//! the router, the release handler, and the dispatcher.

const NAMESPACE: &str = "load-lock";

pub fn namespace_prefix() -> String {
	format!("{NAMESPACE}:")
}

pub fn active_count_key() -> String {
	format!("{NAMESPACE}:active-count")
}

pub fn registration_queue() -> String {
	format!("{NAMESPACE}:registration-queue")
}

pub fn registration_processing() -> String {
	format!("{}:processing", registration_queue())
}

pub fn release_queue() -> String {
	format!("{NAMESPACE}:release-queue")
}

pub fn release_processing() -> String {
	format!("{}:processing", release_queue())
}

pub fn groups_set() -> String {
	format!("{NAMESPACE}:groups-set")
}

pub fn groups_rotation() -> String {
	format!("{NAMESPACE}:groups-queue")
}

pub fn active_groups_set() -> String {
	format!("{NAMESPACE}:active-groups-set")
}

pub fn group_queue(group: &str) -> String {
	format!("{NAMESPACE}:group-queue:{group}")
}

/// Inverse of [`group_queue`]: recovers the bare group name from a
/// `group-queue:<group>` key, as stored in the rotation list.
pub fn group_name_from_queue(group_queue_key: &str) -> Option<&str> {
	let prefix = format!("{NAMESPACE}:group-queue:");
	group_queue_key.strip_prefix(prefix.as_str()).filter(|s| !s.is_empty())
}

pub fn group_queue_processing(group_queue_key: &str) -> String {
	format!("{group_queue_key}:processing")
}

pub fn unlock_channel(id: &str) -> String {
	format!("{NAMESPACE}:start:{id}")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keys_are_namespaced() {
		assert_eq!(active_count_key(), "load-lock:active-count");
		assert_eq!(registration_queue(), "load-lock:registration-queue");
		assert_eq!(registration_processing(), "load-lock:registration-queue:processing");
		assert_eq!(group_queue("g1"), "load-lock:group-queue:g1");
		assert_eq!(group_queue_processing(&group_queue("g1")), "load-lock:group-queue:g1:processing");
		assert_eq!(unlock_channel("job-42"), "load-lock:start:job-42");
	}

	#[test]
	fn group_name_round_trips_through_queue_key() {
		let queue_key = group_queue("g1");
		assert_eq!(group_name_from_queue(&queue_key), Some("g1"));
		assert_eq!(group_name_from_queue("not-a-group-queue-key"), None);
	}
}
