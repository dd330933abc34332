//! Filter engine (spec §4.D): a recursive filter sum type evaluated against
//! a `Flow` snapshot.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::flow::Flow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
	Method,
	Url,
	Host,
	Path,
	StatusCode,
	RequestHeader,
	ResponseHeader,
	RequestBody,
	ResponseBody,
	ContentType,
	DurationMs,
	SizeBytes,
	Tags,
	Notes,
	IsMarked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
	Equals,
	NotEquals,
	Contains,
	NotContains,
	StartsWith,
	EndsWith,
	Regex,
	GreaterThan,
	LessThan,
	GreaterOrEqual,
	LessOrEqual,
	Exists,
	NotExists,
	InList,
	NotInList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
	And,
	Or,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Filter {
	Simple {
		field: Field,
		op: Operator,
		value: String,
		#[serde(default)]
		header_name: Option<String>,
		#[serde(default = "default_true")]
		is_enabled: bool,
	},
	Combined {
		combinator: Combinator,
		children: Vec<Filter>,
		#[serde(default = "default_true")]
		is_enabled: bool,
	},
	QuickSearch {
		text: String,
	},
}

fn default_true() -> bool {
	true
}

fn field_value(flow: &Flow, field: Field, header_name: Option<&str>) -> Option<String> {
	match field {
		Field::Method => Some(flow.request.method.as_str().to_string()),
		Field::Url => Some(flow.request.url()),
		Field::Host => Some(flow.request.host.clone()),
		Field::Path => Some(flow.request.path.clone()),
		Field::StatusCode => flow.response.as_ref().map(|r| r.status_code.to_string()),
		Field::RequestHeader => header_name.and_then(|n| flow.request.headers.get(n)).map(String::from),
		Field::ResponseHeader => header_name
			.and_then(|n| flow.response.as_ref()?.headers.get(n))
			.map(String::from),
		Field::RequestBody => Some(String::from_utf8_lossy(&flow.request.body_bytes).into_owned()),
		Field::ResponseBody => flow
			.response
			.as_ref()
			.map(|r| String::from_utf8_lossy(&r.body_bytes).into_owned()),
		Field::ContentType => Some(format!("{:?}", flow.request.content_type)),
		Field::DurationMs => flow.duration_ms().map(|d| d.to_string()),
		Field::SizeBytes => flow.response.as_ref().map(|r| r.body_bytes.len().to_string()),
		Field::Tags => Some(flow.tags.join(",")),
		Field::Notes => None,
		Field::IsMarked => Some(flow.is_marked.to_string()),
	}
}

fn compare_numeric(actual: &str, value: &str, op: Operator) -> bool {
	let (Ok(a), Ok(v)) = (actual.parse::<f64>(), value.parse::<f64>()) else {
		return false;
	};
	match op {
		Operator::GreaterThan => a > v,
		Operator::LessThan => a < v,
		Operator::GreaterOrEqual => a >= v,
		Operator::LessOrEqual => a <= v,
		_ => false,
	}
}

fn evaluate_simple(
	flow: &Flow,
	field: Field,
	op: Operator,
	value: &str,
	header_name: Option<&str>,
) -> bool {
	let actual = field_value(flow, field, header_name);
	match op {
		Operator::Exists => actual.is_some(),
		Operator::NotExists => actual.is_none(),
		_ => {
			let Some(actual) = actual else { return false };
			match op {
				Operator::Equals => actual.eq_ignore_ascii_case(value),
				Operator::NotEquals => !actual.eq_ignore_ascii_case(value),
				Operator::Contains => actual.to_lowercase().contains(&value.to_lowercase()),
				Operator::NotContains => !actual.to_lowercase().contains(&value.to_lowercase()),
				Operator::StartsWith => actual.to_lowercase().starts_with(&value.to_lowercase()),
				Operator::EndsWith => actual.to_lowercase().ends_with(&value.to_lowercase()),
				Operator::Regex => Regex::new(value).map(|r| r.is_match(&actual)).unwrap_or(false),
				Operator::GreaterThan
				| Operator::LessThan
				| Operator::GreaterOrEqual
				| Operator::LessOrEqual => compare_numeric(&actual, value, op),
				Operator::InList => value
					.split(',')
					.any(|v| v.trim().eq_ignore_ascii_case(actual.trim())),
				Operator::NotInList => !value
					.split(',')
					.any(|v| v.trim().eq_ignore_ascii_case(actual.trim())),
				Operator::Exists | Operator::NotExists => unreachable!(),
			}
		},
	}
}

fn quick_search_matches(flow: &Flow, text: &str) -> bool {
	let text = text.to_lowercase();
	let haystacks: Vec<String> = std::iter::once(flow.request.url())
		.chain(std::iter::once(flow.request.method.as_str().to_string()))
		.chain(flow.response.as_ref().map(|r| r.status_code.to_string()))
		.chain(std::iter::once(flow.request.host.clone()))
		.chain(std::iter::once(flow.request.path.clone()))
		.chain(flow.tags.iter().cloned())
		.chain(std::iter::once(
			String::from_utf8_lossy(&flow.request.body_bytes).into_owned(),
		))
		.chain(
			flow
				.response
				.as_ref()
				.map(|r| String::from_utf8_lossy(&r.body_bytes).into_owned()),
		)
		.collect();
	haystacks.iter().any(|h| h.to_lowercase().contains(&text))
}

impl Filter {
	pub fn matches(&self, flow: &Flow) -> bool {
		match self {
			Filter::Simple {
				field,
				op,
				value,
				header_name,
				is_enabled,
			} => {
				if !is_enabled {
					return true;
				}
				evaluate_simple(flow, *field, *op, value, header_name.as_deref())
			},
			Filter::Combined {
				combinator,
				children,
				is_enabled,
			} => {
				if !is_enabled {
					return true;
				}
				match combinator {
					Combinator::And => {
						if children.is_empty() {
							true
						} else {
							children.iter().all(|c| c.matches(flow))
						}
					},
					Combinator::Or => {
						if children.is_empty() {
							false
						} else {
							children.iter().any(|c| c.matches(flow))
						}
					},
				}
			},
			Filter::QuickSearch { text } => quick_search_matches(flow, text),
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DateRange {
	pub start_ns: Option<u128>,
	pub end_ns: Option<u128>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterState {
	pub quick_search: Option<Filter>,
	pub filters: Vec<Filter>,
	pub show_marked_only: bool,
	pub show_errors_only: bool,
	pub hidden_patterns: Vec<String>,
	pub selected_methods: Vec<String>,
	pub selected_status_codes: Vec<u16>,
	pub selected_content_types: Vec<String>,
	pub date_range: Option<DateRange>,
}

impl FilterState {
	pub fn matches(&self, flow: &Flow) -> bool {
		if let Some(q) = &self.quick_search {
			if !q.matches(flow) {
				return false;
			}
		}
		if !self.filters.iter().all(|f| f.matches(flow)) {
			return false;
		}
		if self.show_marked_only && !flow.is_marked {
			return false;
		}
		if self.show_errors_only && flow.error.is_none() {
			return false;
		}
		if !self.hidden_patterns.is_empty() {
			let url = flow.request.url();
			let hidden = self.hidden_patterns.iter().any(|p| {
				regex::Regex::new(&crate::model::matcher::wildcard_to_regex(p, false))
					.map(|r| r.is_match(&url))
					.unwrap_or(false)
			});
			if hidden {
				return false;
			}
		}
		if !self.selected_methods.is_empty()
			&& !self
				.selected_methods
				.iter()
				.any(|m| m.eq_ignore_ascii_case(flow.request.method.as_str()))
		{
			return false;
		}
		if !self.selected_status_codes.is_empty() {
			match flow.response.as_ref() {
				Some(r) if self.selected_status_codes.contains(&r.status_code) => {},
				_ => return false,
			}
		}
		if let Some(range) = &self.date_range {
			if let Some(start) = range.start_ns {
				if flow.request.timestamp_ns < start {
					return false;
				}
			}
			if let Some(end) = range.end_ns {
				if flow.request.timestamp_ns > end {
					return false;
				}
			}
		}
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::flow::Protocol;
	use crate::model::request::{ContentType, Method, Request, Scheme};
	use crate::model::{OrderedHeaders, Response};
	use uuid::Uuid;

	fn flow_with_url(url_path: &str) -> Flow {
		let req = Request {
			id: Uuid::nil(),
			method: Method::Get,
			scheme: Scheme::Http,
			host: "example.com".into(),
			port: 80,
			path: url_path.into(),
			query_string: "".into(),
			query_params: Default::default(),
			headers: OrderedHeaders::new(),
			body_bytes: bytes::Bytes::new(),
			content_type: ContentType::Other,
			content_length: None,
			http_version: "HTTP/1.1".into(),
			timestamp_ns: 0,
			is_secure: false,
			cookies: Vec::new(),
		};
		Flow::new(Uuid::nil(), Uuid::nil(), 1, req, Protocol::Http, Uuid::nil(), 0)
	}

	#[test]
	fn quick_search_matches_path() {
		let flow = flow_with_url("/v1/users");
		let f = Filter::QuickSearch { text: "USERS".into() };
		assert!(f.matches(&flow));
	}

	#[test]
	fn disabled_filter_passes_through() {
		let flow = flow_with_url("/anything");
		let f = Filter::Simple {
			field: Field::Path,
			op: Operator::Equals,
			value: "/nope".into(),
			header_name: None,
			is_enabled: false,
		};
		assert!(f.matches(&flow));
	}

	#[test]
	fn combined_and_empty_true_or_empty_false() {
		let flow = flow_with_url("/x");
		let and = Filter::Combined {
			combinator: Combinator::And,
			children: vec![],
			is_enabled: true,
		};
		let or = Filter::Combined {
			combinator: Combinator::Or,
			children: vec![],
			is_enabled: true,
		};
		assert!(and.matches(&flow));
		assert!(!or.matches(&flow));
	}

	#[test]
	fn invalid_regex_evaluates_false() {
		let flow = flow_with_url("/x");
		let f = Filter::Simple {
			field: Field::Path,
			op: Operator::Regex,
			value: "(".into(),
			header_name: None,
			is_enabled: true,
		};
		assert!(!f.matches(&flow));
	}

	#[test]
	fn in_list_parses_comma_separated() {
		let mut flow = flow_with_url("/x");
		flow.request.method = Method::Post;
		let f = Filter::Simple {
			field: Field::Method,
			op: Operator::InList,
			value: "GET, POST, PUT".into(),
			header_name: None,
			is_enabled: true,
		};
		assert!(f.matches(&flow));
	}

	#[test]
	fn response_status_code_filter_with_no_response_fails_non_exists_ops() {
		let flow = flow_with_url("/x");
		let f = Filter::Simple {
			field: Field::StatusCode,
			op: Operator::Equals,
			value: "200".into(),
			header_name: None,
			is_enabled: true,
		};
		assert!(!f.matches(&flow));
		let exists = Filter::Simple {
			field: Field::StatusCode,
			op: Operator::NotExists,
			value: "".into(),
			header_name: None,
			is_enabled: true,
		};
		assert!(exists.matches(&flow));
	}
}
