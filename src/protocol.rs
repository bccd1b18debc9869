//! Wire message formats clients push to the registration and release
//! inboxes. These are the only contracts the agent shares with the
//! (out of scope) client-side library.

use serde::{Deserialize, Serialize};

/// A job awaiting admission under `group`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Registration {
	#[serde(rename = "ID")]
	pub id: String,
	#[serde(rename = "Group")]
	pub group: String,
}

/// Announcement that a previously admitted job under `group` has finished.
/// `id` aids client-side correlation but carries no agent-side meaning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Release {
	#[serde(rename = "ID", default)]
	pub id: String,
	#[serde(rename = "Group")]
	pub group: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn registration_round_trips() {
		let reg = Registration { id: "a".into(), group: "g1".into() };
		let json = serde_json::to_string(&reg).unwrap();
		assert_eq!(json, r#"{"ID":"a","Group":"g1"}"#);
		let back: Registration = serde_json::from_str(&json).unwrap();
		assert_eq!(back, reg);
	}

	#[test]
	fn release_allows_missing_id() {
		let release: Release = serde_json::from_str(r#"{"Group":"g1"}"#).unwrap();
		assert_eq!(release.group, "g1");
		assert_eq!(release.id, "");
	}
}
