// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! flowtel-track - send storefront events to a Flowtel collector
//!
//! Drives a tracker on a headless page: track one event or replay a JSON
//! Lines file, flush, then tear down.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowtel_tracker::{HeadlessPage, Host, Properties, Tracker, TrackerConfig};
use tokio::io::BufReader;
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod replay;

use config::ConfigLayer;

/// Send storefront events to a Flowtel collector
#[derive(Parser, Debug)]
#[command(name = "flowtel-track", version, about, long_about = None)]
struct Args {
	/// Path to a TOML configuration file
	#[arg(short, long, env = "FLOWTEL_CONFIG")]
	config: Option<PathBuf>,

	/// Collector endpoint URL
	#[arg(long)]
	endpoint: Option<String>,

	/// Shop identifier attached to every event
	#[arg(long)]
	shop_id: Option<String>,

	/// Events per batch
	#[arg(long)]
	batch_size: Option<usize>,

	/// Timer flush period in milliseconds
	#[arg(long)]
	flush_interval_ms: Option<u64>,

	/// In-process retries for transient delivery failures
	#[arg(long)]
	max_retries: Option<u32>,

	/// Do not record a page view for the headless page
	#[arg(long)]
	no_page_views: bool,

	/// Tracker diagnostics
	#[arg(short, long)]
	debug: bool,

	/// Output logs as JSON
	#[arg(long)]
	json_logs: bool,

	/// URL of the headless page events are recorded on
	#[arg(long, default_value = "about:blank")]
	page_url: String,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Track a single event
	Send {
		/// Event type, e.g. add_to_cart
		event_type: String,
		/// Event property (repeatable: -p KEY=VALUE)
		#[arg(short = 'p', long = "prop", value_name = "KEY=VALUE")]
		props: Vec<String>,
	},
	/// Track events from a JSON Lines file
	Replay {
		/// Input file, or - for stdin
		#[arg(default_value = "-")]
		path: String,
	},
	/// Print the resolved configuration
	Config,
}

impl Args {
	fn cli_layer(&self) -> ConfigLayer {
		ConfigLayer {
			shop_id: self.shop_id.clone(),
			endpoint: self.endpoint.clone(),
			batch_size: self.batch_size,
			flush_interval_ms: self.flush_interval_ms,
			debug: self.debug.then_some(true),
			auto_track_page_views: self.no_page_views.then_some(false),
			max_retries: self.max_retries,
			..ConfigLayer::default()
		}
	}

	fn resolve_config(&self) -> Result<TrackerConfig> {
		let mut layer = ConfigLayer::default();
		if let Some(path) = &self.config {
			layer = layer.merge(ConfigLayer::from_file(path)?);
		}
		layer = layer
			.merge(ConfigLayer::from_env()?)
			.merge(self.cli_layer());

		layer.finalize().context("invalid tracker configuration")
	}
}

fn init_tracing(debug: bool, json: bool) {
	let default = if debug {
		"warn,flowtel_tracker=debug,flowtel_common_http=debug,flowtel_track=debug"
	} else {
		"warn,flowtel_tracker=info,flowtel_track=info"
	};
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

	if json {
		tracing_subscriber::registry()
			.with(filter)
			.with(fmt::layer().json().with_writer(std::io::stderr))
			.init();
	} else {
		tracing_subscriber::registry()
			.with(filter)
			.with(fmt::layer().compact().with_writer(std::io::stderr))
			.init();
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();
	init_tracing(args.debug, args.json_logs);

	let config = args.resolve_config()?;
	debug!(?config, "Resolved configuration");

	if let Command::Config = args.command {
		println!("{}", serde_json::to_string_pretty(&config)?);
		return Ok(());
	}

	let page = Arc::new(HeadlessPage::new(&args.page_url));
	let tracker = Tracker::builder().host(Host::headless(page)).build();
	tracker.init(config).context("failed to initialize tracker")?;

	match &args.command {
		Command::Send { event_type, props } => {
			let properties = props
				.iter()
				.map(|raw| replay::parse_property(raw))
				.collect::<Result<Properties>>()?;
			tracker.track(event_type, properties);
		}
		Command::Replay { path } => {
			let stats = if path == "-" {
				replay::replay(&tracker, BufReader::new(tokio::io::stdin())).await?
			} else {
				let file = tokio::fs::File::open(path)
					.await
					.with_context(|| format!("failed to open {path}"))?;
				replay::replay(&tracker, BufReader::new(file)).await?
			};
			info!(
				tracked = stats.tracked,
				skipped = stats.skipped,
				"Replay finished"
			);
		}
		Command::Config => {}
	}

	// Size- or timer-triggered sends may still be in flight; wait them out.
	let result = tracker.drain().await;
	tracker.destroy();

	match result {
		Some(result) if result.success => {
			info!(count = result.event_count, "Events delivered");
			Ok(())
		}
		Some(result) => anyhow::bail!(
			"delivery of {} events failed: {}",
			result.event_count,
			result.error.unwrap_or_default()
		),
		None => anyhow::bail!("tracker was not active at shutdown"),
	}
}
