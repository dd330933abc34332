use serde::{Deserialize, Serialize};

use super::matcher::Matcher;
use crate::strng::Strng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
	Breakpoint,
	MapLocal,
	MapRemote,
	Block,
	Script,
	Throttle,
	ModifyHeaders,
	ModifyBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulePhase {
	Request,
	Response,
	Both,
}

impl RulePhase {
	pub fn applies_to(&self, phase: RulePhase) -> bool {
		*self == RulePhase::Both || *self == phase
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderEdit {
	pub name: String,
	pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindReplace {
	pub find: String,
	pub replace: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderEdits {
	#[serde(default)]
	pub set: Vec<HeaderEdit>,
	#[serde(default)]
	pub remove: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RuleAction {
	Block {
		status: u16,
		body: String,
		#[serde(default)]
		content_type: Option<String>,
	},
	MapRemote {
		authority: String,
		#[serde(default = "default_true")]
		preserve_path: bool,
		#[serde(default = "default_true")]
		preserve_query: bool,
		#[serde(default = "default_true")]
		preserve_headers: bool,
	},
	MapLocal {
		file_path: String,
		status: u16,
		content_type: String,
	},
	ModifyHeaders {
		edits: HeaderEdits,
	},
	ModifyBody {
		replacement: Option<String>,
		#[serde(default)]
		find_replace: Vec<FindReplace>,
	},
	Breakpoint,
	Script {
		script_id: String,
	},
	Throttle {
		preset: Option<String>,
		download_bps: Option<u64>,
		upload_bps: Option<u64>,
		latency_ms: Option<u64>,
		loss_pct: Option<f32>,
	},
}

fn default_true() -> bool {
	true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
	pub id: Strng,
	#[serde(rename = "type")]
	pub rule_type: RuleType,
	pub phase: RulePhase,
	pub matcher: Matcher,
	pub action: RuleAction,
	#[serde(default = "default_true")]
	pub is_enabled: bool,
	#[serde(default)]
	pub priority: i32,
	#[serde(default)]
	pub hit_count: u64,
	#[serde(default)]
	pub last_triggered_at_ns: Option<u128>,
}

impl Rule {
	/// Sorts a rule list by descending priority for first-match evaluation,
	/// stable on ties so insertion order is the tiebreak.
	pub fn sort_by_priority(rules: &mut [Rule]) {
		rules.sort_by(|a, b| b.priority.cmp(&a.priority));
	}
}
