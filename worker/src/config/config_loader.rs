use anyhow::{Ok, Result};

use super::config_model::{Database, DotEnvyConfig, Ops, Razorpay, Scheduler, WorkerServer};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let worker_server = WorkerServer {
        port: std::env::var("SERVER_PORT_WORKER")
            .expect("SERVER_PORT_WORKER is invalid")
            .parse()?,
        timeout: std::env::var("SERVER_TIMEOUT")
            .expect("SERVER_TIMEOUT is invalid")
            .parse()?,
        body_limit: std::env::var("SERVER_BODY_LIMIT")
            .expect("SERVER_BODY_LIMIT is invalid")
            .parse()?,
    };

    let database = Database {
        url: std::env::var("DATABASE_URL").expect("DATABASE_URL is invalid"),
    };

    let razorpay = Razorpay {
        key_id: std::env::var("RAZORPAY_KEY_ID").expect("RAZORPAY_KEY_ID is invalid"),
        key_secret: std::env::var("RAZORPAY_KEY_SECRET").expect("RAZORPAY_KEY_SECRET is invalid"),
        webhook_secret: std::env::var("RAZORPAY_WEBHOOK_SECRET")
            .expect("RAZORPAY_WEBHOOK_SECRET is invalid"),
    };

    let scheduler = Scheduler {
        job_interval_secs: std::env::var("JOB_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()?,
        daily_sync_hour_utc: std::env::var("DAILY_SYNC_HOUR_UTC")
            .unwrap_or_else(|_| "2".to_string())
            .parse()?,
    };

    let ops = Ops {
        internal_token: std::env::var("INTERNAL_OPS_TOKEN")
            .ok()
            .filter(|token| !token.is_empty()),
    };

    Ok(DotEnvyConfig {
        worker_server,
        database,
        razorpay,
        scheduler,
        ops,
    })
}
