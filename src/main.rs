//! Tollgate server binary.
//!
//! Loads configuration from the environment, wires stores, processors and
//! the side-effect pipeline, starts the reconciliation jobs and serves HTTP
//! until SIGINT/SIGTERM.

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tollgate::adapters::auth::JwtSessionValidator;
use tollgate::adapters::gateways::build_registry;
use tollgate::adapters::http::{build_router, AppState};
use tollgate::adapters::memory::{InMemoryPaymentStore, InMemorySubscriptionRepository};
use tollgate::adapters::notify::{HttpCallbackNotifier, HttpCartResumer, LoggingNotifier, NoopCartResumer};
use tollgate::adapters::panel::{PanelWebhookVerifier, RemnawaveClient};
use tollgate::adapters::postgres::{
    self, PostgresLedgerRepository, PostgresPaymentIntentStore, PostgresSubscriptionRepository,
    PostgresUserAccounts,
};
use tollgate::application::handlers::settlement::{
    CheckPaymentStatusHandler, CreatePaymentIntentHandler, HandleGatewayWebhookHandler,
    SettlementEngine, DEFAULT_CHECKOUT_TIMEOUT,
};
use tollgate::application::handlers::subscription::SyncPanelEventHandler;
use tollgate::application::reconciliation::{PanelSync, PaymentSweep};
use tollgate::application::side_effects::{
    AdminNotifyStage, BalanceCreditStage, CartResumeStage, PromoTierStage, ReferralRewardStage,
    SideEffectPipeline, SpawningDispatcher, UserNotifyStage,
};
use tollgate::config::{AppConfig, SideEffectsConfig, ValidationError};
use tollgate::ports::{
    CartResumer, GatewayRegistry, LedgerRepository, Notifier, PaymentIntentStore, SubscriptionRepository,
    UserAccounts,
};

type BoxError = Box<dyn Error + Send + Sync>;

/// The four stores, backed either by Postgres or by one in-memory instance.
struct Stores {
    intents: Arc<dyn PaymentIntentStore>,
    ledger: Arc<dyn LedgerRepository>,
    accounts: Arc<dyn UserAccounts>,
    subscriptions: Arc<dyn SubscriptionRepository>,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = AppConfig::load()?;
    init_tracing(&config);
    config.validate()?;

    info!(
        environment = ?config.server.environment,
        "Starting tollgate"
    );

    let stores = open_stores(&config).await?;
    let gateways = build_registry(&config.gateways)?;
    if gateways.is_empty() {
        warn!("No payment processors configured");
    }

    let pipeline = Arc::new(build_pipeline(&config.side_effects, &stores)?);
    info!(stages = ?pipeline.stage_names(), "Side-effect pipeline ready");

    let dispatcher = SpawningDispatcher::new(pipeline.clone());
    let engine = Arc::new(SettlementEngine::new(
        stores.intents.clone(),
        config.gateways.tolerance_policy(),
        Arc::new(dispatcher.clone()),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut jobs = Vec::new();

    if config.reconciliation.sweep_enabled {
        let sweep = PaymentSweep::new(
            stores.intents.clone(),
            gateways.clone(),
            engine.clone(),
            config.reconciliation.sweep(),
        )
        .with_credit_recovery(stores.ledger.clone(), pipeline.clone());
        let rx = shutdown_rx.clone();
        jobs.push(tokio::spawn(async move { sweep.run(rx).await }));
    }

    if config.reconciliation.panel_sync_enabled {
        match panel_client(&config) {
            Some(panel) => {
                let sync = PanelSync::new(
                    stores.subscriptions.clone(),
                    Arc::new(panel),
                    config.reconciliation.panel_sync(config.panel.sync_guard_secs),
                );
                let rx = shutdown_rx.clone();
                jobs.push(tokio::spawn(async move { sync.run(rx).await }));
            }
            None => warn!("Panel sync enabled but panel API is not configured, skipping"),
        }
    }

    let state = build_state(&config, &stores, gateways, engine)?;
    let app = build_router(state, config.server.request_timeout());

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, waiting for background jobs");
    let _ = shutdown_tx.send(true);
    futures::future::join_all(jobs).await;
    dispatcher.drain(config.side_effects.drain_timeout()).await;
    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.server.json_logs() {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn open_stores(config: &AppConfig) -> Result<Stores, BoxError> {
    if config.database.is_configured() {
        let pool = postgres::connect(&config.database).await?;
        info!(max_connections = config.database.max_connections, "Connected to PostgreSQL");
        return Ok(Stores {
            intents: Arc::new(PostgresPaymentIntentStore::new(pool.clone())),
            ledger: Arc::new(PostgresLedgerRepository::new(pool.clone())),
            accounts: Arc::new(PostgresUserAccounts::new(pool.clone())),
            subscriptions: Arc::new(PostgresSubscriptionRepository::new(pool)),
        });
    }

    if config.is_production() {
        return Err(ValidationError::MissingRequired("database.url").into());
    }
    warn!("No database URL configured, using in-memory stores");
    let memory = Arc::new(InMemoryPaymentStore::new());
    Ok(Stores {
        intents: memory.clone(),
        ledger: memory.clone(),
        accounts: memory,
        subscriptions: Arc::new(InMemorySubscriptionRepository::new()),
    })
}

fn notifier(config: &SideEffectsConfig) -> Arc<dyn Notifier> {
    if config.user_notify_url.is_none() && config.admin_notify_url.is_none() {
        return Arc::new(LoggingNotifier);
    }
    Arc::new(HttpCallbackNotifier::new(
        config.user_notify_url.clone(),
        config.admin_notify_url.clone(),
        config.callback_timeout(),
    ))
}

fn cart_resumer(config: &SideEffectsConfig) -> Arc<dyn CartResumer> {
    match &config.cart_resume_url {
        Some(url) => Arc::new(HttpCartResumer::new(url.clone(), config.callback_timeout())),
        None => Arc::new(NoopCartResumer),
    }
}

fn build_pipeline(config: &SideEffectsConfig, stores: &Stores) -> Result<SideEffectPipeline, ValidationError> {
    let notifier = notifier(config);
    Ok(SideEffectPipeline::new(config.retry_policy())
        .with_stage(Arc::new(BalanceCreditStage::new(stores.accounts.clone())))
        .with_stage(Arc::new(ReferralRewardStage::new(
            stores.accounts.clone(),
            stores.ledger.clone(),
            config.referral_percent,
        )))
        .with_stage(Arc::new(PromoTierStage::new(
            stores.accounts.clone(),
            stores.ledger.clone(),
            config.promo_ladder()?,
        )))
        .with_stage(Arc::new(UserNotifyStage::new(stores.accounts.clone(), notifier.clone())))
        .with_stage(Arc::new(AdminNotifyStage::new(notifier)))
        .with_stage(Arc::new(CartResumeStage::new(cart_resumer(config)))))
}

fn panel_client(config: &AppConfig) -> Option<RemnawaveClient> {
    let base_url = config.panel.api_base_url.clone().filter(|url| !url.is_empty())?;
    let token: SecretString = config.panel.api_token.clone()?;
    Some(RemnawaveClient::new(
        base_url,
        token,
        Duration::from_secs(config.panel.request_timeout_secs),
    ))
}

/// Longest per-processor timeout bounds the checkout call.
fn checkout_timeout(config: &AppConfig) -> Duration {
    config
        .gateways
        .enabled()
        .map(|(_, section)| Duration::from_secs(section.request_timeout_secs))
        .max()
        .unwrap_or(DEFAULT_CHECKOUT_TIMEOUT)
}

fn build_state(
    config: &AppConfig,
    stores: &Stores,
    gateways: GatewayRegistry,
    engine: Arc<SettlementEngine>,
) -> Result<AppState, ValidationError> {
    let jwt_secret = config
        .auth
        .jwt_secret
        .as_ref()
        .ok_or(ValidationError::MissingRequired("auth.jwt_secret"))?;
    let validator = JwtSessionValidator::new(jwt_secret, config.auth.issuer.as_deref(), config.auth.leeway_secs);

    let panel_events = SyncPanelEventHandler::new(
        stores.accounts.clone(),
        stores.subscriptions.clone(),
        notifier(&config.side_effects),
        config.panel.notifications.policy(),
    );

    Ok(AppState {
        create_payment_intent: Arc::new(
            CreatePaymentIntentHandler::new(stores.intents.clone(), gateways.clone())
                .with_checkout_timeout(checkout_timeout(config)),
        ),
        check_payment_status: Arc::new(
            CheckPaymentStatusHandler::new(stores.intents.clone(), gateways.clone(), engine.clone())
                .with_poll_timeout(Duration::from_secs(config.reconciliation.poll_timeout_secs)),
        ),
        gateway_webhooks: Arc::new(HandleGatewayWebhookHandler::new(gateways.clone(), engine)),
        panel_verifier: Arc::new(PanelWebhookVerifier::new(
            config.panel.webhook_secret.clone(),
            config.panel.max_body_bytes,
        )),
        panel_events: Arc::new(panel_events),
        session_validator: Arc::new(validator),
        trust_proxy_headers: config.server.trust_proxy_headers,
        gateways,
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
