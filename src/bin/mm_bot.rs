//! Cross-venue market-making bot.
//!
//! Consumes the Binance book ticker for the source symbol and keeps a
//! layered maker book synchronized on DeltaDeFi. Configuration comes from
//! `config.yaml` (override with `CONFIG_PATH`) plus `.env` secrets.

use anyhow::Context;
use deltadefi_mm_bot::bin_common::{load_config_from_env, ConfigType, BinaryRunner, RunConfig};
use deltadefi_mm_bot::deltadefi::application::Supervisor;
use deltadefi_mm_bot::deltadefi::config::BotConfig;
use deltadefi_mm_bot::deltadefi::infrastructure::init_tracing_with_level;
use tracing::info;

struct MmBotRunner {
    run_config: RunConfig,
    config: BotConfig,
}

impl BinaryRunner for MmBotRunner {
    async fn run(&mut self) -> anyhow::Result<()> {
        info!(
            "Market: {} -> {}",
            self.config.market.symbol_src, self.config.market.symbol_dst
        );
        info!("Database: {}", self.config.database.path);
        info!(
            "Quote: {} layers, {}bps base spread, {} total liquidity",
            self.config.quote.num_layers,
            self.config.quote.base_spread_bps,
            self.config.quote.total_liquidity
        );
        info!(
            "API key: {}...",
            &self.config.api_key[..8.min(self.config.api_key.len())]
        );

        Supervisor::new(self.config.clone()).run().await
    }

    fn config(&self) -> &RunConfig {
        &self.run_config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let run_config = RunConfig::new("deltadefi-mm-bot");
    init_tracing_with_level(&run_config.log_level);

    let config_path = load_config_from_env(ConfigType::Bot);
    let config = BotConfig::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let mut runner = MmBotRunner { run_config, config };
    runner.execute().await
}
