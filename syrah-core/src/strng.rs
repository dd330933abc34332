//! A small interned-string newtype used for identifiers and header/rule
//! names that are cloned frequently but rarely mutated.

use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

#[derive(Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Default)]
pub struct Strng(Arc<str>);

impl Strng {
	pub fn new(s: impl Into<Arc<str>>) -> Self {
		Strng(s.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Deref for Strng {
	type Target = str;
	fn deref(&self) -> &str {
		&self.0
	}
}

impl Borrow<str> for Strng {
	fn borrow(&self) -> &str {
		&self.0
	}
}

impl From<&str> for Strng {
	fn from(s: &str) -> Self {
		Strng(Arc::from(s))
	}
}

impl From<String> for Strng {
	fn from(s: String) -> Self {
		Strng(Arc::from(s.into_boxed_str()))
	}
}

impl From<Arc<str>> for Strng {
	fn from(s: Arc<str>) -> Self {
		Strng(s)
	}
}

impl fmt::Display for Strng {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl fmt::Debug for Strng {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(&self.0, f)
	}
}

impl serde::Serialize for Strng {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.0)
	}
}

impl<'de> serde::Deserialize<'de> for Strng {
	fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		Ok(Strng::from(s))
	}
}

/// Build a `Strng` from a literal without an extra allocation at each call site
/// being obvious at the call site (mirrors the ergonomics of the teacher's macro).
#[macro_export]
macro_rules! strng {
	($s:expr) => {
		$crate::strng::Strng::from($s)
	};
}
