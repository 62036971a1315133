// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Helper for building event properties.

use serde::Serialize;
use serde_json::{Map, Value};

/// A builder for event properties.
///
/// # Example
///
/// ```
/// use flowtel_tracker::Properties;
///
/// let props = Properties::new()
///     .insert("productId", "sku_42")
///     .insert("price", 19.99)
///     .insert("quantity", 2);
/// assert_eq!(props.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Properties {
	inner: Map<String, Value>,
}

impl Properties {
	/// Creates a new empty Properties builder.
	pub fn new() -> Self {
		Self { inner: Map::new() }
	}

	/// Inserts a key-value pair.
	///
	/// The value can be anything convertible into a JSON value.
	pub fn insert<K, V>(mut self, key: K, value: V) -> Self
	where
		K: Into<String>,
		V: Into<Value>,
	{
		self.inner.insert(key.into(), value.into());
		self
	}

	/// Merges another Properties into this one; `other` wins on conflicts.
	pub fn merge(mut self, other: Properties) -> Self {
		self.inner.extend(other.inner);
		self
	}

	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	pub fn len(&self) -> usize {
		self.inner.len()
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.inner.get(key)
	}

	pub fn as_map(&self) -> &Map<String, Value> {
		&self.inner
	}

	/// Converts into the JSON object carried by an event record.
	pub fn into_map(self) -> Map<String, Value> {
		self.inner
	}
}

impl From<Map<String, Value>> for Properties {
	fn from(inner: Map<String, Value>) -> Self {
		Self { inner }
	}
}

impl From<Properties> for Value {
	fn from(props: Properties) -> Self {
		Value::Object(props.inner)
	}
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Properties {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		Self {
			inner: iter
				.into_iter()
				.map(|(k, v)| (k.into(), v.into()))
				.collect(),
		}
	}
}
