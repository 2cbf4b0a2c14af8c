#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub worker_server: WorkerServer,
    pub database: Database,
    pub razorpay: Razorpay,
    pub scheduler: Scheduler,
    pub ops: Ops,
}

#[derive(Debug, Clone)]
pub struct WorkerServer {
    pub port: u16,
    pub timeout: u64,
    pub body_limit: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Razorpay {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    /// Seconds between pending-job ticks.
    pub job_interval_secs: u64,
    /// UTC hour (0-23) the daily reconciliation runs at.
    pub daily_sync_hour_utc: u32,
}

#[derive(Debug, Clone)]
pub struct Ops {
    /// Bearer token guarding the internal ops endpoints. Unset disables them.
    pub internal_token: Option<String>,
}
