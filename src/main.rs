//! UNISTOCK - multi-marketplace inventory and order management service

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use unistock::api::{self, AppState};
use unistock::auth::JwtKeys;
use unistock::config::Config;
use unistock::events::EventPublisher;
use unistock::forecast::StockForecaster;
use unistock::llm::{ChatCompletionsProvider, LlmProvider};
use unistock::marketplaces::{amazon, mercadolivre, AmazonClient, MarketplaceRegistry, MercadoLivreClient, ShopifyClient};
use unistock::reports::{self, Mailer, ResendMailer};
use unistock::sync::{ListingSyncService, PgStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = Config::from_env()?;

    let db = PgPoolOptions::new().max_connections(config.database_max_connections).connect(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&db).await?;
    let nats = match &config.nats_url {
        Some(url) => async_nats::connect(url.as_str()).await.map_err(|e| tracing::warn!(error = %e, "NATS unavailable, events stay local")).ok(),
        None => None,
    };
    let events = EventPublisher::new(nats);

    let http = reqwest::Client::builder().user_agent(concat!("unistock/", env!("CARGO_PKG_VERSION"))).build()?;
    let mercadolivre = Arc::new(MercadoLivreClient::new(http.clone(), mercadolivre::DEFAULT_BASE_URL, config.mercadolivre.clone()));
    let registry = MarketplaceRegistry::new()
        .with(mercadolivre.clone())
        .with(Arc::new(ShopifyClient::new(http.clone(), config.shopify_api_version.clone())))
        .with(Arc::new(AmazonClient::new(http.clone(), amazon::DEFAULT_API_URL, amazon::DEFAULT_LWA_URL, config.amazon.clone())));
    let llm: Option<Arc<dyn LlmProvider>> = config.llm.as_ref()
        .map(|c| Arc::new(ChatCompletionsProvider::new(http.clone(), c.base_url.as_str(), c.api_key.as_str(), c.model.as_str())) as Arc<dyn LlmProvider>);
    let mailer: Option<Arc<dyn Mailer>> = config.mailer.as_ref()
        .map(|m| Arc::new(ResendMailer::new(http.clone(), reports::RESEND_API_URL, m.api_key.as_str(), m.from.as_str())) as Arc<dyn Mailer>);

    let state = AppState {
        sync: ListingSyncService::new(Arc::new(PgStore::new(db.clone())), registry, events.clone()),
        forecaster: Arc::new(StockForecaster::new(config.forecast_cache_ttl, llm.clone())),
        jwt: JwtKeys::new(&config.jwt_secret),
        db: db.clone(),
        events,
        llm,
        mercadolivre,
        mailer: mailer.clone(),
    };

    match mailer {
        Some(mailer) => {
            let tick = config.report_tick;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(tick);
                loop {
                    interval.tick().await;
                    if let Err(e) = reports::run_due_reports(&db, mailer.as_ref(), Utc::now(), None).await {
                        tracing::error!(error = %e, "scheduled report run failed");
                    }
                }
            });
        }
        None => tracing::info!("RESEND_API_KEY not set, scheduled reports are disabled"),
    }

    let app = api::router(state);
    tracing::info!("🚀 UNISTOCK listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}
