use anyhow::{Context, Result};
use clap::Parser;
use forwarder_account::{AccountInterface, LocalWallet};
use forwarder_config::{ConfigLoader, ForwarderConfig};
use forwarder_core::{submitter_config, ForwarderBuilder};
use forwarder_delivery::{AlloyDelivery, RelaySubmitter};
use forwarder_request::ForwardParams;
use forwarder_types::{Address, ForwardError, U256};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use cli::{Cli, Command, ForwardArgs};

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;

	let log_level = cli
		.log_level
		.clone()
		.unwrap_or_else(|| config.logging.level.clone());
	setup_tracing(&log_level)?;

	match cli.command {
		Command::Call { to, data, forward } => {
			let to = cli::parse_target("to", &to)?;
			let payload = cli::parse_payload(&data)?;
			relay(&config, &forward, |from| ForwardParams::call(from, to, payload)).await
		}
		Command::Deploy { bytecode, forward } => {
			let bytecode = cli::parse_payload(&bytecode)?;
			relay(&config, &forward, |from| ForwardParams::deploy(from, bytecode)).await
		}
		Command::NonceUsed { from, space, nonce } => {
			let from = cli::parse_target("from", &from)?;
			let nonce = cli::parse_u256("nonce", &nonce)?;
			nonce_used(&config, from, space, nonce).await
		}
		Command::Validate => validate(&config),
	}
}

fn delivery(config: &ForwarderConfig) -> Result<AlloyDelivery> {
	AlloyDelivery::from_private_key(&config.network.rpc_url, &config.relayer.private_key)
		.context("Failed to create delivery")
}

async fn relay<F>(config: &ForwarderConfig, args: &ForwardArgs, params: F) -> Result<()>
where
	F: FnOnce(Address) -> ForwardParams,
{
	let wallet = LocalWallet::new(&args.user_key).context("Invalid user key")?;
	let from = wallet.address().await?;

	let delivery = delivery(config)?;
	let relayer = delivery.relayer();
	let engine = ForwarderBuilder::new(config.clone())
		.with_account(Arc::new(wallet))
		.with_delivery(Arc::new(delivery), relayer)
		.build()
		.context("Failed to build forwarder engine")?;

	let params = args.apply(params(from))?;
	let timeout = args.timeout().unwrap_or(engine.confirmation_timeout());

	let prepared = engine.prepare(params).await.map_err(report)?;
	let submitted = engine
		.relay(prepared, args.relay_options())
		.await
		.map_err(report)?;

	let outcome = tokio::select! {
		outcome = engine.await_outcome(&submitted, timeout) => outcome.map_err(report)?,
		_ = signal::ctrl_c() => {
			anyhow::bail!(
				"Interrupted; transaction {} at counter {} may still be mined",
				submitted.hash(),
				submitted.counter()
			);
		}
	};

	println!("{}", serde_json::to_string_pretty(&outcome)?);
	Ok(())
}

fn report(e: ForwardError) -> ForwardError {
	error!(stage = ?e.stage(), retry = ?e.retry(), "Forward failed: {}", e);
	e
}

async fn nonce_used(
	config: &ForwarderConfig,
	from: Address,
	space: u32,
	nonce: U256,
) -> Result<()> {
	let delivery = delivery(config)?;
	let relayer = delivery.relayer();
	let submitter = RelaySubmitter::new(Arc::new(delivery), relayer, submitter_config(config));

	let used = submitter
		.is_nonce_used(from, space, nonce)
		.await
		.context("Failed to query verifier")?;

	info!(%from, space, %nonce, used, "Queried nonce");
	println!("{}", used);
	Ok(())
}

fn validate(config: &ForwarderConfig) -> Result<()> {
	// Derives the relayer address without contacting the node.
	let relayer = delivery(config)?.relayer();

	info!("Configuration is valid");
	info!("  RPC endpoint: {}", config.network.rpc_url);
	match config.network.chain_id {
		Some(chain_id) => info!("  Chain id: {}", chain_id),
		None => info!("  Chain id: resolved from the node"),
	}
	info!("  Relayer: {}", relayer);
	info!("  Verifier: {}", config.forwarder.verifying_contract);
	info!(
		"  Schema: {} (allowlist check: {})",
		config.forwarder.schema, config.forwarder.check_allowlist
	);
	Ok(())
}

fn setup_tracing(log_level: &str) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.try_init()
		.context("Failed to initialize tracing")?;

	Ok(())
}
