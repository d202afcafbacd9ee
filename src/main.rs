use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use dotenvy::dotenv;
use tracing::{error, info, warn};

mod config;
mod generation;
mod llm;
mod output;
mod state;
mod utils;

use config::Config;
use generation::{
    AspectRatio, BatchOutcome, BatchPolicy, GenerationRequest, Orchestrator, OrchestratorOptions,
    Region, Voice,
};
use llm::{load_image_file, GeminiClient, GeminiSettings, GenerativeCapability};
use state::StudioState;
use utils::http::build_http_client;
use utils::logging::init_logging;
use utils::timing::{complete_batch_timer, start_batch_timer};

#[derive(Debug, Clone, PartialEq)]
struct GenerateArgs {
    person_path: PathBuf,
    product_path: PathBuf,
    aspect_ratio: AspectRatio,
    voice: Voice,
    region: Region,
    result_count: usize,
    outfit_hint: Option<String>,
    background_hint: Option<String>,
    product_info: Option<String>,
    output_dir: Option<PathBuf>,
    partial: bool,
}

fn generate_usage() -> &'static str {
    "Usage: affiliate_shorts generate --person <path> --product <path> [--aspect 9:16|16:9] [--voice male|female] [--region south|north] [--count <n>] [--outfit <text>] [--background <text>] [--product-info <text>] [--out <dir>] [--partial]"
}

fn take_value<'a>(args: &'a [String], index: usize, flag: &str) -> anyhow::Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("Missing value for {flag}"))
}

fn parse_generate_args(args: &[String]) -> anyhow::Result<Option<GenerateArgs>> {
    if args.get(1).map(|value| value.as_str()) != Some("generate") {
        return Ok(None);
    }

    let mut person_path: Option<PathBuf> = None;
    let mut product_path: Option<PathBuf> = None;
    let mut aspect_ratio = AspectRatio::Portrait;
    let mut voice = Voice::Female;
    let mut region = Region::South;
    let mut result_count = 1;
    let mut outfit_hint = None;
    let mut background_hint = None;
    let mut product_info = None;
    let mut output_dir = None;
    let mut partial = false;

    let mut index = 2;
    while index < args.len() {
        let flag = args[index].as_str();
        match flag {
            "--person" => {
                index += 1;
                person_path = Some(PathBuf::from(take_value(args, index, flag)?));
            }
            "--product" => {
                index += 1;
                product_path = Some(PathBuf::from(take_value(args, index, flag)?));
            }
            "--aspect" => {
                index += 1;
                aspect_ratio = take_value(args, index, flag)?
                    .parse()
                    .map_err(|err: String| anyhow!(err))?;
            }
            "--voice" => {
                index += 1;
                voice = take_value(args, index, flag)?
                    .parse()
                    .map_err(|err: String| anyhow!(err))?;
            }
            "--region" => {
                index += 1;
                region = take_value(args, index, flag)?
                    .parse()
                    .map_err(|err: String| anyhow!(err))?;
            }
            "--count" => {
                index += 1;
                let value = take_value(args, index, flag)?;
                result_count = value
                    .parse::<usize>()
                    .map_err(|_| anyhow!("Invalid --count value: {value}"))?;
                if result_count == 0 {
                    return Err(anyhow!("--count must be at least 1"));
                }
            }
            "--outfit" => {
                index += 1;
                outfit_hint = Some(take_value(args, index, flag)?.to_string());
            }
            "--background" => {
                index += 1;
                background_hint = Some(take_value(args, index, flag)?.to_string());
            }
            "--product-info" => {
                index += 1;
                product_info = Some(take_value(args, index, flag)?.to_string());
            }
            "--out" => {
                index += 1;
                output_dir = Some(PathBuf::from(take_value(args, index, flag)?));
            }
            "--partial" => {
                partial = true;
            }
            "--help" | "-h" => {
                return Err(anyhow!(generate_usage()));
            }
            other => {
                return Err(anyhow!(
                    "Unknown generate argument: {other}\n{}",
                    generate_usage()
                ));
            }
        }
        index += 1;
    }

    let person_path = person_path.ok_or_else(|| anyhow!("--person is required"))?;
    let product_path = product_path.ok_or_else(|| anyhow!("--product is required"))?;

    Ok(Some(GenerateArgs {
        person_path,
        product_path,
        aspect_ratio,
        voice,
        region,
        result_count,
        outfit_hint,
        background_hint,
        product_info,
        output_dir,
        partial,
    }))
}

async fn build_request(args: &GenerateArgs) -> anyhow::Result<GenerationRequest> {
    let person = load_image_file(&args.person_path).await?;
    let product = load_image_file(&args.product_path).await?;

    let mut request = GenerationRequest::new(person, product);
    request.aspect_ratio = args.aspect_ratio;
    request.voice = args.voice;
    request.region = args.region;
    request.result_count = args.result_count;
    request.outfit_hint = args.outfit_hint.clone();
    request.background_hint = args.background_hint.clone();
    request.product_info = args.product_info.clone();
    Ok(request)
}

async fn run_generate(config: &Config, args: GenerateArgs) -> anyhow::Result<()> {
    let request = build_request(&args).await?;

    let http = build_http_client(Duration::from_secs(config.http_timeout_seconds))?;
    let capability: Arc<dyn GenerativeCapability> =
        Arc::new(GeminiClient::new(http, GeminiSettings::from_config(config)));
    let policy = if args.partial {
        BatchPolicy::Partial
    } else {
        config.batch_policy
    };
    let orchestrator = Orchestrator::new(
        capability,
        OrchestratorOptions {
            policy,
            max_concurrency: config.max_concurrent_units,
        },
    );

    let state = StudioState::new();
    let ticket = state.begin_batch();
    let interrupt_state = state.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && interrupt_state.is_busy() {
            warn!("Interrupt received; cancelling the running batch");
            interrupt_state.cancel_active();
        }
    });

    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| config.output_dir.clone());
    let batch_label = format!("batch-{}", ticket.generation);
    let aspect_ratio = request.aspect_ratio;
    let requested = request.result_count;
    let mut timer = start_batch_timer(&batch_label, requested);

    match orchestrator.run(request, &ticket.token).await {
        Ok(outcome) => {
            let written = output::write_outcome(
                &output_dir,
                aspect_ratio,
                requested,
                orchestrator.policy(),
                &outcome,
            )
            .await?;
            let (status, detail) = match &outcome {
                BatchOutcome::Partial(report) if !report.is_complete() => {
                    for (seed, err) in report.failures() {
                        warn!("Result {} failed: {}", seed + 1, err.user_message());
                    }
                    ("partial", Some(format!("{} failed", report.failures().count())))
                }
                _ => ("success", None),
            };
            let results = outcome.results().into_iter().cloned().collect::<Vec<_>>();
            if !state.publish(&ticket, results) {
                warn!("Batch {} finished after it was superseded; results dropped", batch_label);
            }
            complete_batch_timer(&mut timer, status, detail);
            info!(
                "Generated {} result(s); {} file(s) written under {}",
                state.results().len(),
                written.len(),
                output_dir.display()
            );
            Ok(())
        }
        Err(err) => {
            let message = err.user_message();
            state.publish_error(&ticket, message.clone());
            complete_batch_timer(&mut timer, "error", Some(err.to_string()));
            error!("Batch {} failed: {}", batch_label, err);
            Err(anyhow!(state.last_error().unwrap_or(message)))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let Some(generate_args) = parse_generate_args(&args)? else {
        eprintln!("{}", generate_usage());
        return Ok(());
    };

    let config = Config::load()?;
    let _guards = init_logging(&config.log_level, Path::new("logs"));
    info!("Starting affiliate_shorts");

    run_generate(&config, generate_args).await
}
