//! # canvas-headless
//!
//! Opens a workspace, submits each prompt argument, waits for every job,
//! saves, and prints a summary.
//!
//! ```bash
//! canvas-headless --api-base-url http://localhost:8080 --workspace demo \
//!     "a red fox (@size:1024x768)" "the same fox at night @img1"
//! ```

use std::sync::Arc;

use canvas_client::{metrics, CliArgs, ClientConfig, HttpBackend, JobStatus, Services, Workspace};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing with optional JSON output (`RUST_LOG_FORMAT=json`).
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,canvas_client=debug"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = CliArgs::parse();
    let print_metrics = args.print_metrics;
    let prompts = args.prompts.clone();
    let config = ClientConfig::from(args);

    let metrics_handle = if print_metrics {
        let handle = metrics::init_metrics()
            .map_err(|e| anyhow::anyhow!("Failed to initialize Prometheus metrics: {e}"))?;
        Some(handle)
    } else {
        None
    };

    tracing::info!(
        "Opening workspace {} at {} (max {} concurrent job(s))",
        config.workspace,
        config.api_base_url,
        config.max_concurrency
    );
    let backend = HttpBackend::from_config(&config)?;
    let workspace = Workspace::open(config, Services::from_backend(Arc::new(backend))).await?;
    let report = workspace.load_report();
    println!(
        "loaded {} element(s); {} missing asset(s), {} local-only image(s){}",
        report.elements,
        report.missing_assets,
        report.local_only_images,
        if report.rebuilt_from_catalog {
            ", rebuilt from catalog"
        } else {
            ""
        }
    );

    let mut handles = Vec::new();
    let mut rejected = 0usize;
    for prompt in &prompts {
        match workspace.submit(prompt).await {
            Ok(jobs) => handles.extend(jobs.into_iter().map(|job| (prompt.clone(), job))),
            Err(e) if e.is_input_error() => {
                rejected += 1;
                println!("rejected  {prompt:?}: {e}");
            }
            Err(e) => return Err(e.into()),
        }
    }

    let (mut done, mut failed) = (0usize, 0usize);
    for (prompt, job) in handles {
        let outcome = job.outcome().await;
        let target = outcome.target_key.as_ref().map_or_else(|| "-".to_string(), ToString::to_string);
        match outcome.status {
            JobStatus::Done => {
                done += 1;
                println!("done      {prompt:?} -> {target} ({})", outcome.size);
            }
            JobStatus::Error(message) => {
                failed += 1;
                println!("failed    {prompt:?} -> {target}: {message}");
            }
        }
    }
    workspace.wait_resumed().await;

    workspace.flush().await;
    let saved = workspace.save_now().await?;
    println!(
        "{done} done, {failed} failed, {rejected} rejected; saved {} element(s)",
        saved.saved
    );
    if saved.skipped_local_only > 0 {
        println!("{} images not yet saved", saved.skipped_local_only);
    }

    if let Some(handle) = metrics_handle {
        println!("{}", handle.render());
    }
    Ok(())
}
