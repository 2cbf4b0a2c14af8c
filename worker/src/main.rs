use std::sync::Arc;

use anyhow::Result;
use backend::usecases::{
    billing_webhooks::WebhookUseCase, gateway::BillingGateway,
    subscription_sync::SubscriptionSyncUseCase,
};
use crates::{
    domain::repositories::{
        jobs::JobRepository, payments::PaymentRepository, users::UserRepository,
        webhooks::BillingWebhookRepository,
    },
    infra::db::{
        postgres::postgres_connection,
        repositories::{
            jobs::JobPostgres, payments::PaymentPostgres, sync::SubscriptionSyncPostgres,
            users::UserPostgres, webhooks::BillingWebhookPostgres,
        },
    },
    payments::razorpay_client::RazorpayClient,
    reliability::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig},
};
use tracing::{error, info};
use worker::{
    axum_http, config,
    services::job_scheduler::JobScheduler,
    usecases::process_jobs::{JobRunner, PendingJobProcessor, SubscriptionSyncer, WebhookReplayer},
};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(error) = run().await {
        error!("Worker exited with error: {}", error);
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    crates::observability::init_observability("worker")?;

    let dotenvy_env = Arc::new(config::config_loader::load()?);
    info!("ENV has been loaded");

    let postgres_pool = postgres_connection::establish_connection(&dotenvy_env.database.url)?;
    info!("Postgres connection has been established");

    let db_pool_arc = Arc::new(postgres_pool);

    let gateway = Arc::new(RazorpayClient::new(
        dotenvy_env.razorpay.key_id.clone(),
        dotenvy_env.razorpay.key_secret.clone(),
        dotenvy_env.razorpay.webhook_secret.clone(),
    ));

    // One breaker instance guards every provider call this process makes.
    let breaker = Arc::new(CircuitBreaker::new(
        "razorpay",
        CircuitBreakerConfig::default(),
    ));

    let job_repository = Arc::new(JobPostgres::new(Arc::clone(&db_pool_arc)));
    let webhook_repository = Arc::new(BillingWebhookPostgres::new(Arc::clone(&db_pool_arc)));
    let sync_repository = Arc::new(SubscriptionSyncPostgres::new(Arc::clone(&db_pool_arc)));
    let payment_repository = Arc::new(PaymentPostgres::new(Arc::clone(&db_pool_arc)));
    let user_repository = Arc::new(UserPostgres::new(Arc::clone(&db_pool_arc)));

    let webhook_replayer: Arc<dyn WebhookReplayer> = Arc::new(WebhookUseCase::new(
        Arc::clone(&webhook_repository),
        Arc::clone(&job_repository),
        Arc::clone(&gateway),
    ));

    let syncer: Arc<dyn SubscriptionSyncer> = Arc::new(SubscriptionSyncUseCase::new(
        Arc::clone(&sync_repository),
        Arc::clone(&job_repository),
        Arc::clone(&gateway),
        Arc::clone(&breaker),
    ));

    let job_repo_dyn: Arc<dyn JobRepository + Send + Sync> = job_repository;
    let payment_repo_dyn: Arc<dyn PaymentRepository + Send + Sync> = payment_repository;
    let user_repo_dyn: Arc<dyn UserRepository + Send + Sync> = user_repository;
    let webhook_repo_dyn: Arc<dyn BillingWebhookRepository + Send + Sync> = webhook_repository;
    let gateway_dyn: Arc<dyn BillingGateway> = gateway;

    let processor: Arc<dyn PendingJobProcessor> = Arc::new(JobRunner::new(
        Arc::clone(&job_repo_dyn),
        payment_repo_dyn,
        user_repo_dyn,
        gateway_dyn,
        Arc::clone(&breaker),
        webhook_replayer,
        Arc::clone(&syncer),
    ));

    let scheduler = JobScheduler::new(
        Arc::clone(&processor),
        syncer,
        Arc::clone(&job_repo_dyn),
        webhook_repo_dyn,
        dotenvy_env.scheduler.clone(),
    );
    scheduler.start();

    axum_http::http_serve::start(
        Arc::clone(&dotenvy_env),
        scheduler,
        processor,
        job_repo_dyn,
        breaker,
    )
    .await?;

    Ok(())
}
