use anyhow::{Ok, Result};

use super::config_model::{Auth, BackendServer, Database, DotEnvyConfig, Razorpay};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let backend_server = BackendServer {
        port: std::env::var("SERVER_PORT_BACKEND")
            .expect("SERVER_PORT_BACKEND is invalid")
            .parse()?,
        body_limit: std::env::var("SERVER_BODY_LIMIT")
            .expect("SERVER_BODY_LIMIT is invalid")
            .parse()?,
        timeout: std::env::var("SERVER_TIMEOUT")
            .expect("SERVER_TIMEOUT is invalid")
            .parse()?,
    };

    let database = Database {
        url: std::env::var("DATABASE_URL").expect("DATABASE_URL is invalid"),
    };

    let auth = Auth {
        jwt_secret: std::env::var("JWT_USER_SECRET").expect("JWT_USER_SECRET is invalid"),
    };

    let razorpay = Razorpay {
        key_id: std::env::var("RAZORPAY_KEY_ID").expect("RAZORPAY_KEY_ID is invalid"),
        key_secret: std::env::var("RAZORPAY_KEY_SECRET").expect("RAZORPAY_KEY_SECRET is invalid"),
        webhook_secret: std::env::var("RAZORPAY_WEBHOOK_SECRET")
            .expect("RAZORPAY_WEBHOOK_SECRET is invalid"),
        plan_id: std::env::var("RAZORPAY_PLAN_ID").expect("RAZORPAY_PLAN_ID is invalid"),
    };

    Ok(DotEnvyConfig {
        backend_server,
        database,
        auth,
        razorpay,
    })
}
