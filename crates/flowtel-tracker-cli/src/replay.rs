// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! JSON Lines event replay.

use anyhow::{Context, Result};
use flowtel_tracker::Tracker;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::warn;

/// One line of a replay file: `{"eventType": "...", "properties": {...}}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayLine {
	pub event_type: String,
	#[serde(default)]
	pub properties: Map<String, Value>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
	pub tracked: usize,
	pub skipped: usize,
}

/// Tracks every well-formed line. Blank lines are ignored and malformed
/// lines are reported and skipped.
pub async fn replay<R>(tracker: &Tracker, reader: R) -> Result<ReplayStats>
where
	R: AsyncBufRead + Unpin,
{
	let mut stats = ReplayStats::default();
	let mut lines = reader.lines();
	let mut number = 0usize;

	while let Some(line) = lines.next_line().await.context("failed to read replay input")? {
		number += 1;
		let line = line.trim();
		if line.is_empty() {
			continue;
		}

		match serde_json::from_str::<ReplayLine>(line) {
			Ok(event) => {
				tracker.track(&event.event_type, event.properties);
				stats.tracked += 1;
			}
			Err(e) => {
				warn!(line = number, error = %e, "Skipping malformed replay line");
				stats.skipped += 1;
			}
		}
	}

	Ok(stats)
}

/// Parses `KEY=VALUE`. The value is read as JSON when it parses, else as a string.
pub fn parse_property(raw: &str) -> Result<(String, Value)> {
	let (key, value) = raw
		.split_once('=')
		.with_context(|| format!("property {raw:?} is not KEY=VALUE"))?;
	let key = key.trim();
	anyhow::ensure!(!key.is_empty(), "property {raw:?} has an empty key");

	let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
	Ok((key.to_string(), value))
}
