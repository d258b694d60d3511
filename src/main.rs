use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use checkout_backend::api::{self, AppState};
use checkout_backend::checkout::{
    CheckoutService, CheckoutSessionStore, CheckoutSettings, CsrfGuard, InMemorySessionStore,
};
use checkout_backend::config::Config;
use checkout_backend::database::mandate_repository::PgMandateRepository;
use checkout_backend::database::memory::{InMemoryMandateRepository, InMemoryOrderRepository};
use checkout_backend::database::order_repository::PgOrderRepository;
use checkout_backend::database::repository::{MandateRepository, OrderRepository};
use checkout_backend::database::{self, PoolConfig};
use checkout_backend::orders::{LoggingObserver, OrderEventBus, OrderLifecycleManager};
use checkout_backend::payments::providers::{
    BankTransferGateway, CardGateway, DirectDebitGateway, ShapeValidator, WalletGateway,
};
use checkout_backend::payments::{ApiClient, GatewayRegistry};
use checkout_backend::webhooks::WebhookReconciler;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.server.is_production());

    tracing::info!("Starting checkout backend");
    tracing::info!("Environment: {}", config.server.environment);

    // Persistence
    let (db, orders, mandates): (_, Arc<dyn OrderRepository>, Arc<dyn MandateRepository>) =
        match &config.database {
            Some(db_config) => {
                let pool = database::init_pool(
                    &db_config.url,
                    Some(PoolConfig {
                        max_connections: db_config.max_connections,
                        ..PoolConfig::default()
                    }),
                )
                .await?;
                database::run_migrations(&pool).await?;
                (
                    Some(pool.clone()),
                    Arc::new(PgOrderRepository::new(pool.clone())),
                    Arc::new(PgMandateRepository::new(pool)),
                )
            }
            None => {
                tracing::warn!("DATABASE_URL not set, orders are kept in memory");
                (
                    None,
                    Arc::new(InMemoryOrderRepository::new()),
                    Arc::new(InMemoryMandateRepository::new()),
                )
            }
        };

    let sessions = session_store(&config).await?;

    // Gateways
    let mut client = ApiClient::new(config.http.client_config())?;
    if let Some(card) = &config.card {
        client = client.with_provider(card.endpoint());
    }
    if let Some(wallet) = &config.wallet {
        client = client.with_provider(wallet.endpoint());
    }
    let client = Arc::new(client);
    let capabilities = config.capabilities;

    let card = config
        .card
        .as_ref()
        .filter(|_| capabilities.card_enabled)
        .map(|c| Arc::new(CardGateway::new(client.clone(), c)));
    let wallet = config
        .wallet
        .as_ref()
        .filter(|_| capabilities.wallet_enabled)
        .map(|c| Arc::new(WalletGateway::new(client.clone(), c)));
    let direct_debit = capabilities.direct_debit_enabled.then(|| {
        Arc::new(DirectDebitGateway::new(
            config.direct_debit.clone(),
            Arc::new(ShapeValidator),
            mandates.clone(),
        ))
    });
    let bank_transfer = capabilities
        .bank_transfer_enabled
        .then(|| Arc::new(BankTransferGateway::new(config.bank_transfer.clone())));

    let mut gateways = GatewayRegistry::new();
    if let Some(g) = &card {
        gateways.register(g.clone());
    }
    if let Some(g) = &wallet {
        gateways.register(g.clone());
    }
    if let Some(g) = &direct_debit {
        gateways.register(g.clone());
    }
    if let Some(g) = &bank_transfer {
        gateways.register(g.clone());
    }
    tracing::info!(methods = ?gateways.methods(), "Payment gateways registered");

    let events = OrderEventBus::new().with_observer(Arc::new(LoggingObserver));
    let lifecycle = OrderLifecycleManager::new(orders, sessions.clone(), gateways, events);

    let mut reconciler =
        WebhookReconciler::new(lifecycle.clone(), &capabilities).with_mandates(mandates);
    if let Some(g) = card {
        reconciler = reconciler.with_source(g);
    }
    if let Some(g) = wallet {
        reconciler = reconciler.with_source(g);
    }
    if let Some(g) = direct_debit {
        reconciler = reconciler.with_source(g);
    }
    if let Some(g) = bank_transfer {
        reconciler = reconciler.with_source(g);
    }

    let checkout = CheckoutService::new(
        lifecycle.clone(),
        sessions,
        capabilities,
        CheckoutSettings {
            public_base_url: config.server.public_base_url.clone(),
            success_url: config.checkout.success_url.clone(),
            failure_url: config.checkout.failure_url.clone(),
        },
    );

    let state = AppState {
        checkout,
        lifecycle,
        reconciler: Arc::new(reconciler),
        csrf: CsrfGuard::new(&config.security.csrf_secret),
        admin_token: config.security.admin_api_token.as_deref().map(Arc::from),
        pending_order_ttl: chrono::Duration::seconds(config.checkout.pending_order_ttl_secs as i64),
        hold_alert_after: chrono::Duration::seconds(config.checkout.hold_alert_after_secs as i64),
        environment: config.server.environment.clone(),
        db,
    };

    let app = api::create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("HOST and PORT must form a socket address")?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(feature = "cache")]
async fn session_store(config: &Config) -> anyhow::Result<Arc<dyn CheckoutSessionStore>> {
    use checkout_backend::cache::{init_cache_pool, CacheConfig, RedisCache};
    use checkout_backend::checkout::session::RedisSessionStore;
    use std::time::Duration;

    match &config.redis {
        Some(redis) => {
            let pool = init_cache_pool(CacheConfig {
                redis_url: redis.url.clone(),
                ..CacheConfig::default()
            })
            .await?;
            // Sessions expire together with the pending-order window
            let ttl = Duration::from_secs(config.checkout.pending_order_ttl_secs);
            Ok(Arc::new(
                RedisSessionStore::new(RedisCache::new(pool)).with_ttl(ttl),
            ))
        }
        None => {
            tracing::warn!("REDIS_URL not set, checkout sessions are kept in memory");
            Ok(Arc::new(InMemorySessionStore::new()))
        }
    }
}

#[cfg(not(feature = "cache"))]
async fn session_store(_config: &Config) -> anyhow::Result<Arc<dyn CheckoutSessionStore>> {
    Ok(Arc::new(InMemorySessionStore::new()))
}
