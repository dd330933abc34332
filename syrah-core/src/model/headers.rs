//! Case-insensitive, order-preserving, multi-value header container.
//!
//! `http::HeaderMap` preserves insertion order internally but normalizes
//! names to lowercase and does not round-trip the caller's original casing,
//! which the spec's invariant (iii) requires for re-emission fidelity. This
//! type keeps the original casing of the first-seen occurrence of each name
//! while indexing lookups case-insensitively.

use serde::{Deserialize, Serialize};

fn lower(s: &str) -> String {
	s.to_ascii_lowercase()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedHeaders {
	/// `(original-case name, value)` pairs in wire order. A name may repeat
	/// (e.g. `Set-Cookie`) and each occurrence is a distinct entry.
	entries: Vec<(String, String)>,
}

impl OrderedHeaders {
	pub fn new() -> Self {
		OrderedHeaders {
			entries: Vec::new(),
		}
	}

	/// Appends a header occurrence, preserving original casing and order.
	/// Matches HTTP semantics where a repeated header name is a distinct
	/// field-line, not an overwrite.
	pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
		self.entries.push((name.into(), value.into()));
	}

	/// Removes all occurrences of `name` then appends a single new value.
	pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
		let name = name.into();
		self.remove(&name);
		self.entries.push((name, value.into()));
	}

	pub fn remove(&mut self, name: &str) {
		let key = lower(name);
		self.entries.retain(|(n, _)| lower(n) != key);
	}

	/// First value for `name`, case-insensitive.
	pub fn get(&self, name: &str) -> Option<&str> {
		let key = lower(name);
		self
			.entries
			.iter()
			.find(|(n, _)| lower(n) == key)
			.map(|(_, v)| v.as_str())
	}

	/// All values for `name`, in wire order, case-insensitive.
	pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
		let key = lower(name);
		self
			.entries
			.iter()
			.filter(move |(n, _)| lower(n) == key)
			.map(|(_, v)| v.as_str())
	}

	pub fn contains(&self, name: &str) -> bool {
		self.get(name).is_some()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Returns the last token of `Transfer-Encoding`, lowercased, if present.
	pub fn transfer_encoding_last(&self) -> Option<String> {
		self
			.get("transfer-encoding")
			.and_then(|v| v.split(',').next_back())
			.map(|s| s.trim().to_ascii_lowercase())
	}

	pub fn content_length(&self) -> Option<u64> {
		self.get("content-length").and_then(|v| v.trim().parse().ok())
	}

	/// Comma-joins duplicate occurrences of non-list-unsafe headers, keeping
	/// `Set-Cookie` (and any other name the caller lists) as separate entries.
	/// Used when canonicalizing a parsed header block per invariant (iii).
	pub fn canonicalized(&self, keep_multi: &[&str]) -> OrderedHeaders {
		let mut out = OrderedHeaders::new();
		'outer: for (name, _) in &self.entries {
			let key = lower(name);
			if out.entries.iter().any(|(n, _)| lower(n) == key) {
				continue;
			}
			if keep_multi.iter().any(|m| lower(m) == key) {
				for (n2, v2) in &self.entries {
					if lower(n2) == key {
						out.entries.push((n2.clone(), v2.clone()));
					}
				}
				continue 'outer;
			}
			let joined = self
				.entries
				.iter()
				.filter(|(n2, _)| lower(n2) == key)
				.map(|(_, v2)| v2.as_str())
				.collect::<Vec<_>>()
				.join(", ");
			out.entries.push((name.clone(), joined));
		}
		out
	}
}

impl<'a> IntoIterator for &'a OrderedHeaders {
	type Item = (&'a str, &'a str);
	type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

	fn into_iter(self) -> Self::IntoIter {
		Box::new(self.iter())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn case_insensitive_get() {
		let mut h = OrderedHeaders::new();
		h.append("Content-Type", "text/plain");
		assert_eq!(h.get("content-type"), Some("text/plain"));
		assert_eq!(h.get("CONTENT-TYPE"), Some("text/plain"));
	}

	#[test]
	fn preserves_original_casing() {
		let mut h = OrderedHeaders::new();
		h.append("X-Custom-Header", "1");
		assert_eq!(h.iter().next().unwrap().0, "X-Custom-Header");
	}

	#[test]
	fn multi_value_set_cookie() {
		let mut h = OrderedHeaders::new();
		h.append("Set-Cookie", "a=1");
		h.append("Set-Cookie", "b=2");
		let all: Vec<_> = h.get_all("set-cookie").collect();
		assert_eq!(all, vec!["a=1", "b=2"]);
	}

	#[test]
	fn canonicalized_joins_duplicates_except_multi() {
		let mut h = OrderedHeaders::new();
		h.append("X-Foo", "a");
		h.append("X-Foo", "b");
		h.append("Set-Cookie", "a=1");
		h.append("Set-Cookie", "b=2");
		let c = h.canonicalized(&["set-cookie"]);
		assert_eq!(c.get("x-foo"), Some("a, b"));
		assert_eq!(c.get_all("set-cookie").count(), 2);
	}

	#[test]
	fn set_replaces_all_occurrences() {
		let mut h = OrderedHeaders::new();
		h.append("X-Foo", "a");
		h.append("X-Foo", "b");
		h.set("X-Foo", "c");
		assert_eq!(h.get_all("x-foo").collect::<Vec<_>>(), vec!["c"]);
	}
}
