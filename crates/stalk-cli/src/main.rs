//! stalk - demo worker on the in-process queue.
//!
//! Seeds an `emails` tube with JSON jobs (plus one stray job on `default`),
//! then runs a worker over them and prints the resulting counters.

mod logging;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use serde::Deserialize;
use tracing::{error, info};

use stalk_core::impls::InMemoryServer;
use stalk_core::ports::ProcessMemoryProbe;
use stalk_core::{
    retry_on_kind, Job, JobError, JobHandler, Tube, WorkerBuilder, WorkerConfig, WorkerError,
};

#[derive(Parser)]
#[command(name = "stalk")]
#[command(about = "Run a demo queue worker on the in-memory backend")]
#[command(version)]
struct Cli {
    /// Worker config (TOML)
    #[arg(short, long, value_name = "FILE", env = "STALK_CONFIG")]
    config: Option<PathBuf>,

    /// Number of email jobs to seed and process
    #[arg(long, default_value_t = 10)]
    jobs: u64,

    /// Stop after this many reservations instead of when the tube drains
    #[arg(long)]
    max_jobs: Option<u64>,

    /// Every n-th delivery attempt fails with a retryable timeout (0 = never)
    #[arg(long, default_value_t = 0)]
    fail_every: u64,

    #[arg(long, env = "LOG_LEVEL", default_value = "INFO")]
    log_level: String,

    /// json | pretty | compact
    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    log_format: String,
}

#[derive(Debug, Deserialize)]
struct EmailPayload {
    to: String,
    subject: String,
}

struct SendEmail {
    attempts: AtomicU64,
    fail_every: u64,
}

#[async_trait]
impl JobHandler for SendEmail {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let email: EmailPayload =
            serde_json::from_slice(job.body()).map_err(|e| JobError::from_source("validation", e))?;

        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        if self.fail_every > 0 && attempt % self.fail_every == 0 {
            return Err(JobError::new("timeout", format!("smtp timed out (attempt {attempt})")));
        }

        info!(job_id = %job.id(), to = %email.to, subject = %email.subject, "email sent");
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_logging(
        logging::parse_level(&cli.log_level),
        logging::LogFormat::parse(&cli.log_format),
    );

    if let Err(e) = run(cli).await {
        error!(error = %e, "worker failed");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), WorkerError> {
    let config = match &cli.config {
        Some(path) => WorkerConfig::load_from_file(path)?,
        None => WorkerConfig::default(),
    };

    let server = InMemoryServer::new();
    let emails = Tube::new("emails")?;
    server.put(&Tube::default_tube(), "stray").await;
    // 最後の 1 件は壊れた JSON → bury
    for i in 0..cli.jobs {
        let body = if i + 1 == cli.jobs && cli.jobs > 1 {
            b"{not json".to_vec()
        } else {
            serde_json::json!({
                "to": format!("user{i}@example.com"),
                "subject": "welcome",
            })
            .to_string()
            .into_bytes()
        };
        server.put(&emails, body).await;
    }

    let worker = WorkerBuilder::from_config(&config)
        .reserve_timeout(config.reserve_timeout().or(Some(Duration::from_secs(1))))
        .resource_probe(Arc::new(ProcessMemoryProbe::new()))
        .register_with_retry(
            "emails",
            SendEmail {
                attempts: AtomicU64::new(0),
                fail_every: cli.fail_every,
            },
            retry_on_kind("timeout"),
        )?
        .expect_tubes(&["emails"])
        .build(Arc::new(server.connect().await))
        .await?;
    info!(worker_id = %worker.id(), addr = %config.connect_options().addr(), "Worker initiated");

    let shutdown = worker.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, finishing current job");
            shutdown.request();
        }
    });

    // emails が空になったら止める
    let drained = worker.shutdown_handle();
    tokio::spawn({
        let server = server.clone();
        let emails = emails.clone();
        async move {
            loop {
                let c = server.counts(&emails).await;
                if c.ready + c.reserved + c.delayed == 0 {
                    drained.request();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    });

    let stats = match cli.max_jobs {
        Some(limit) => worker.run_for(limit).await?,
        None => worker.run().await?,
    };

    let counts = server.counts(&emails).await;
    println!(
        "{}",
        serde_json::json!({ "worker_id": worker.id().to_string(), "stats": stats, "emails": counts })
    );
    Ok(())
}
