//! The rule matcher (spec §4.E): a recursive sum type matched against
//! `(url, method, headers)` via a single tag-dispatched evaluator.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::headers::OrderedHeaders;
use super::request::Method;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Matcher {
	Url {
		pattern: String,
		#[serde(default)]
		is_regex: bool,
		#[serde(default = "default_true")]
		case_sensitive: bool,
		#[serde(skip, default)]
		compiled: OnceLock<Regex>,
	},
	Host {
		host: String,
		#[serde(default)]
		is_regex: bool,
	},
	Method {
		methods: Vec<Method>,
	},
	Header {
		name: String,
		#[serde(default)]
		value: Option<String>,
		#[serde(default)]
		is_regex: bool,
	},
	ContentType {
		types: Vec<String>,
	},
	All {
		children: Vec<Matcher>,
	},
	Any {
		children: Vec<Matcher>,
	},
	Not {
		child: Box<Matcher>,
	},
}

fn default_true() -> bool {
	true
}

/// Converts shell-style wildcards to an anchored regex: `*` -> any run of
/// non-`/`, `**` -> any run including `/`, `?` -> a single char.
pub fn wildcard_to_regex(pattern: &str, case_sensitive: bool) -> String {
	let mut out = String::from("^");
	let chars: Vec<char> = pattern.chars().collect();
	let mut i = 0;
	while i < chars.len() {
		match chars[i] {
			'*' if chars.get(i + 1) == Some(&'*') => {
				out.push_str(".*");
				i += 2;
			},
			'*' => {
				out.push_str("[^/]*");
				i += 1;
			},
			'?' => {
				out.push('.');
				i += 1;
			},
			c => {
				out.push_str(&regex::escape(&c.to_string()));
				i += 1;
			},
		}
	}
	out.push('$');
	if !case_sensitive {
		format!("(?i){out}")
	} else {
		out
	}
}

fn host_suffix_match(pattern: &str, host: &str) -> bool {
	let pattern = pattern.to_ascii_lowercase();
	let host = host.to_ascii_lowercase();
	host == pattern || host.ends_with(&format!(".{pattern}"))
}

pub struct MatchInput<'a> {
	/// Scheme-less match target: `host[:port]` + path + query (see
	/// `Request::match_target`). Never carries a `scheme://` prefix, so a
	/// leading single `*` in a `Url` pattern can reach the host.
	pub url: &'a str,
	pub host: &'a str,
	pub method: Method,
	pub headers: &'a OrderedHeaders,
	pub content_type: Option<&'a str>,
}

impl Matcher {
	pub fn matches(&self, input: &MatchInput) -> bool {
		match self {
			Matcher::Url {
				pattern,
				is_regex,
				case_sensitive,
				compiled,
			} => {
				let regex = compiled.get_or_init(|| {
					let pattern = if *is_regex {
						pattern.clone()
					} else {
						wildcard_to_regex(pattern, *case_sensitive)
					};
					Regex::new(&pattern).unwrap_or_else(|_| Regex::new("$.^").unwrap())
				});
				regex.is_match(input.url)
			},
			Matcher::Host { host, is_regex } => {
				if *is_regex {
					Regex::new(host).map(|r| r.is_match(input.host)).unwrap_or(false)
				} else {
					host_suffix_match(host, input.host)
				}
			},
			Matcher::Method { methods } => methods.contains(&input.method),
			Matcher::Header { name, value, is_regex } => {
				let Some(actual) = input.headers.get(name) else {
					return false;
				};
				match value {
					None => true,
					Some(expected) if *is_regex => {
						Regex::new(expected).map(|r| r.is_match(actual)).unwrap_or(false)
					},
					Some(expected) => actual.eq_ignore_ascii_case(expected),
				}
			},
			Matcher::ContentType { types } => match input.content_type {
				Some(ct) => types.iter().any(|t| t.eq_ignore_ascii_case(ct)),
				None => false,
			},
			Matcher::All { children } => children.iter().all(|c| c.matches(input)),
			Matcher::Any { children } => children.iter().any(|c| c.matches(input)),
			Matcher::Not { child } => !child.matches(input),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn input<'a>(url: &'a str, host: &'a str, headers: &'a OrderedHeaders) -> MatchInput<'a> {
		MatchInput {
			url,
			host,
			method: Method::Get,
			headers,
			content_type: None,
		}
	}

	#[test]
	fn wildcard_single_star_stops_at_slash() {
		let re = wildcard_to_regex("/api/*", true);
		let r = Regex::new(&re).unwrap();
		assert!(r.is_match("/api/users"));
		assert!(!r.is_match("/api/users/5"));
	}

	#[test]
	fn double_star_crosses_slash() {
		let re = wildcard_to_regex("**/users/**", true);
		let r = Regex::new(&re).unwrap();
		assert!(r.is_match("api.example.com/users/5"));
	}

	#[test]
	fn single_star_matches_against_scheme_less_target() {
		// Url matchers are evaluated against Request::match_target, which
		// drops the `scheme://` prefix (see pipeline.rs); a single leading
		// `*` therefore reaches the host instead of stalling on `//`.
		let re = wildcard_to_regex("*api.example.com/users*", true);
		let r = Regex::new(&re).unwrap();
		assert!(r.is_match("api.example.com/users/5"));
		assert!(!r.is_match("https://api.example.com/users/5"));
	}

	#[test]
	fn host_suffix_match_works() {
		assert!(host_suffix_match("example.com", "api.example.com"));
		assert!(host_suffix_match("example.com", "example.com"));
		assert!(!host_suffix_match("example.com", "notexample.com"));
	}

	#[test]
	fn all_empty_children_true_any_empty_false() {
		let headers = OrderedHeaders::new();
		let all = Matcher::All { children: vec![] };
		let any = Matcher::Any { children: vec![] };
		assert!(all.matches(&input("/", "h", &headers)));
		assert!(!any.matches(&input("/", "h", &headers)));
	}

	#[test]
	fn not_negates_child() {
		let headers = OrderedHeaders::new();
		let m = Matcher::Not {
			child: Box::new(Matcher::Host {
				host: "tracker.example".into(),
				is_regex: false,
			}),
		};
		assert!(m.matches(&input("/", "api.example.com", &headers)));
		assert!(!m.matches(&input("/", "tracker.example", &headers)));
	}
}
