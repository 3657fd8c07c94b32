mod action;
mod audience;
mod clock;
mod config;
mod entity;
mod error;
mod notify;
mod plugins;
mod prelude;
mod state;
mod sv;
mod sync;

use teloxide::Bot;
use tracing_subscriber::{
  EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::{
  audience::{AudienceResolver, StaticAudience},
  clock::SystemClock,
  config::Config,
  notify::{TelegramTransport, Transport, transport::LogTransport},
  plugins::{App, cron, server, telegram},
  prelude::*,
  state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
      "flashmob=debug,tower_http=debug,sea_orm=warn".into()
    }))
    .with(tracing_subscriber::fmt::layer())
    .init();

  let config = Config::from_env()?;

  info!("Starting Flash Mob Deals v{}", env!("CARGO_PKG_VERSION"));

  let bot = config.telegram_token.as_deref().map(Bot::new);
  let transport: Arc<dyn Transport> = match &bot {
    Some(bot) => Arc::new(TelegramTransport::new(bot.clone())),
    None => {
      warn!("TELOXIDE_TOKEN not set, outbound messages go to the log");
      Arc::new(LogTransport)
    }
  };

  let audience: Arc<dyn AudienceResolver> = match &config.audience_file {
    Some(path) => {
      let audience = StaticAudience::from_file(path)?;
      info!(members = audience.len(), "Audience loaded from {path}");
      Arc::new(audience)
    }
    None => {
      warn!("AUDIENCE_FILE not set, go-live broadcasts reach nobody");
      Arc::new(StaticAudience::new(Vec::new()))
    }
  };

  let app_state = Arc::new(
    AppState::new(config, transport, audience, Arc::new(SystemClock)).await?,
  );

  let mut app = App::new()
    .register(server::Plugin)
    .register(cron::GC)
    .register(cron::DealClock)
    .register(cron::RescueSweep)
    .register(cron::BatchSweep);

  if let Some(bot) = bot {
    app = app.register(telegram::Plugin::new(bot));
  }

  app.run(app_state).await;

  Ok(())
}
