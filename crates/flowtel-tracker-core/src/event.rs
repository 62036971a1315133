// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tracked event records and the well-known storefront event types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Well-known storefront event types.
///
/// `track` accepts any event type string; these are the keys the dashboards
/// aggregate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
	/// User viewed a page.
	PageView,
	/// User viewed a product detail page.
	ProductViewed,
	/// User added an item to the cart.
	AddToCart,
	/// User removed an item from the cart.
	RemoveFromCart,
	/// User started the checkout process.
	CheckoutStarted,
	/// User completed a purchase.
	PurchaseCompleted,
}

impl EventType {
	pub const ALL: [EventType; 6] = [
		EventType::PageView,
		EventType::ProductViewed,
		EventType::AddToCart,
		EventType::RemoveFromCart,
		EventType::CheckoutStarted,
		EventType::PurchaseCompleted,
	];

	/// Returns the machine key sent as `eventType`.
	pub fn as_str(&self) -> &'static str {
		match self {
			EventType::PageView => "page_view",
			EventType::ProductViewed => "product_viewed",
			EventType::AddToCart => "add_to_cart",
			EventType::RemoveFromCart => "remove_from_cart",
			EventType::CheckoutStarted => "checkout_started",
			EventType::PurchaseCompleted => "purchase_completed",
		}
	}
}

impl fmt::Display for EventType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl AsRef<str> for EventType {
	fn as_ref(&self) -> &str {
		self.as_str()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
	type Err = UnknownEventType;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		EventType::ALL
			.into_iter()
			.find(|t| t.as_str() == s)
			.ok_or_else(|| UnknownEventType(s.to_string()))
	}
}

/// Converts a machine event key into its display name.
///
/// Each `_`-separated word gets an uppercase first letter and a lowercase
/// remainder: `add_to_cart` becomes `Add To Cart`.
pub fn format_event_name(event_type: &str) -> String {
	event_type
		.split('_')
		.map(|word| {
			let mut chars = word.chars();
			match chars.next() {
				Some(first) => first
					.to_uppercase()
					.chain(chars.flat_map(char::to_lowercase))
					.collect::<String>(),
				None => String::new(),
			}
		})
		.collect::<Vec<_>>()
		.join(" ")
}

/// A single tracked event as delivered to the collector.
///
/// The timestamp is taken when the record is created, not when it is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
	pub shop_id: String,
	pub session_id: String,
	pub event_type: String,
	pub event_name: String,
	#[serde(default)]
	pub properties: Map<String, Value>,
	#[serde(with = "iso_millis")]
	pub timestamp: DateTime<Utc>,
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub user_agent: String,
}

impl EventRecord {
	/// Creates a record stamped with the current time and a derived display name.
	pub fn new(
		shop_id: impl Into<String>,
		session_id: impl Into<String>,
		event_type: impl Into<String>,
		properties: Map<String, Value>,
		url: impl Into<String>,
		user_agent: impl Into<String>,
	) -> Self {
		let event_type = event_type.into();
		Self {
			shop_id: shop_id.into(),
			session_id: session_id.into(),
			event_name: format_event_name(&event_type),
			event_type,
			properties,
			timestamp: Utc::now(),
			url: url.into(),
			user_agent: user_agent.into(),
		}
	}

	/// Checks the fields the collector refuses to ingest without.
	pub fn validate(&self) -> Result<(), RecordError> {
		let required = [
			("shopId", &self.shop_id),
			("sessionId", &self.session_id),
			("eventType", &self.event_type),
			("eventName", &self.event_name),
		];

		for (field, value) in required {
			if value.is_empty() {
				return Err(RecordError::MissingField(field));
			}
		}

		Ok(())
	}
}

/// Collector-side rejection reasons for an event batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
	#[error("{0} is required")]
	MissingField(&'static str),

	#[error("batch must contain at least one event")]
	EmptyBatch,

	#[error("event at index {index}: {source}")]
	InBatch {
		index: usize,
		#[source]
		source: Box<RecordError>,
	},
}

/// Validates a batch the way the collector does before storing it.
pub fn validate_batch(events: &[EventRecord]) -> Result<(), RecordError> {
	if events.is_empty() {
		return Err(RecordError::EmptyBatch);
	}

	for (index, event) in events.iter().enumerate() {
		event.validate().map_err(|source| RecordError::InBatch {
			index,
			source: Box::new(source),
		})?;
	}

	Ok(())
}

/// RFC 3339 with millisecond precision and a `Z` suffix.
mod iso_millis {
	use chrono::{DateTime, SecondsFormat, Utc};
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Millis, true))
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = String::deserialize(deserializer)?;
		DateTime::parse_from_rfc3339(&raw)
			.map(|dt| dt.with_timezone(&Utc))
			.map_err(serde::de::Error::custom)
	}
}
