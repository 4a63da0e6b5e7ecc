use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use trainctl::config::Cli;
use trainctl::config::Commands;
use trainctl::config::GlobalArgs;
use trainctl::config::OutputFormat;
use trainctl::config::SubmitArgs;
use trainctl::domain::jobs;
use trainctl::domain::poll::PollConfig;
use trainctl::domain::submission::submit;
use trainctl::domain::submission::SubmitOutcome;
use trainctl::infrastructure::helm::Helm;
use trainctl::infrastructure::k8s::KubeStore;
use trainctl::infrastructure::kubectl::Kubectl;
use trainctl::output;
use trainctl::Context;
use utils::logging;
use utils::version;

const WAIT_INTERVAL: Duration = Duration::from_secs(2);

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    let log_dir = std::env::var_os(logging::LOG_PATH_ENV_VAR).map(PathBuf::from);
    let _guard = logging::init(cli.global.log_format.into(), log_dir);
    tracing::debug!("trainctl {}", &**version::VERSION);

    let cancellation_token = CancellationToken::new();
    let interrupt = cancellation_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            interrupt.cancel();
        }
    });

    let ctx = build_context(&cli.global, cancellation_token).await?;

    match cli.command {
        Commands::Submit(args) => run_submit(&ctx, &args).await,
        Commands::List(args) => {
            let summaries = jobs::list_jobs(&ctx)
                .await
                .map_err(|report| anyhow!("{report:?}"))?;
            print_jobs(&summaries, args.output)
        }
        Commands::Status(args) => {
            let job = jobs::job_status(&ctx, &args.name)
                .await
                .map_err(|report| anyhow!("{report:?}"))?;
            match args.output {
                OutputFormat::Json => println!("{}", output::render_json(&job)?),
                OutputFormat::Table => {
                    print!("{}", output::render_table(std::slice::from_ref(&job)))
                }
            }
            Ok(())
        }
        Commands::Delete(args) => {
            let mut failed = 0;
            for (name, result) in jobs::delete_jobs(&ctx, &args.names).await {
                match result {
                    Ok(()) => println!("{name} deleted"),
                    Err(report) => {
                        failed += 1;
                        tracing::error!(job = %name, "{report:?}");
                        eprintln!("{name}: {}", report.current_context());
                    }
                }
            }
            if failed > 0 {
                return Err(anyhow!("failed to delete {failed} job(s)"));
            }
            Ok(())
        }
    }
}

async fn build_context(
    global: &GlobalArgs,
    cancellation_token: CancellationToken,
) -> Result<Context> {
    let store = KubeStore::init(global.kubeconfig.as_deref())
        .await
        .map_err(|report| anyhow!("{report:?}"))?;
    Ok(Context::new(
        global.namespace.clone(),
        Arc::new(store),
        Arc::new(Helm::new(global.helm_bin.clone())),
        Arc::new(Kubectl::new(
            global.kubectl_bin.clone(),
            global.kubeconfig.clone(),
        )),
    )
    .with_cancellation_token(cancellation_token))
}

async fn run_submit(ctx: &Context, args: &SubmitArgs) -> Result<()> {
    let request = args.request().map_err(|report| anyhow!("{report:?}"))?;
    let outcome = submit(ctx, &request).await.map_err(|report| {
        anyhow!(
            "submission failed at the {} stage: {report:?}",
            report.current_context().stage()
        )
    })?;

    let name = match outcome {
        SubmitOutcome::DryRun { manifest_path } => {
            println!("{}", manifest_path.display());
            return Ok(());
        }
        SubmitOutcome::Submitted { name } => name,
    };
    println!("{name}");

    if let Some(timeout) = args.wait_timeout() {
        let chief = jobs::wait_for_job_ready(
            ctx,
            request.kind,
            &name,
            PollConfig::new(WAIT_INTERVAL, timeout),
        )
        .await
        .map_err(|report| anyhow!("{report:?}"))?;
        tracing::info!(job = %name, chief = %chief, "Job is ready");
    }
    Ok(())
}

fn print_jobs(jobs: &[api_types::JobSummary], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", output::render_json(jobs)?),
        OutputFormat::Table => print!("{}", output::render_table(jobs)),
    }
    Ok(())
}
