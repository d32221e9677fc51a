use std::path::Path;

use blogstack::assets::{Asset, LocalAssetPublisher, S3AssetPublisher};
use blogstack::config::{parse_args, Command, StackConfig};
use blogstack::deploy::{lookup_hosted_zone, CloudFormationEngine, Deployer};
use blogstack::engine::{self, LocalEngine};
use blogstack::error::{Result, EXIT_USAGE};
use blogstack::stacks::{api, edge, web, EDGE_STACK_NAME, WEB_STACK_NAME};
use blogstack::telemetry;
use blogstack::token::DeploymentToken;

/// Placeholder zone for runs that never reach Route53.
const LOCAL_HOSTED_ZONE_ID: &str = "ZLOCALHOSTEDZONE";

fn synth(config: &StackConfig, out: &Path) -> Result<()> {
    std::fs::create_dir_all(out)?;
    let edge_code = Asset::from_path("edge", &config.lambda_edge_lambda_path)?;
    let edge_template = edge::synth(config, &edge_code)?;
    let web_template = web::synth(config, &DeploymentToken::fresh())?;
    std::fs::write(out.join(format!("{EDGE_STACK_NAME}.template.json")), edge_template.to_json_pretty()?)?;
    std::fs::write(out.join(format!("{WEB_STACK_NAME}.template.json")), web_template.to_json_pretty()?)?;
    if config.enable_api {
        std::fs::write(out.join("api.rendered.yaml"), api::rendered_spec(config)?)?;
    }
    println!("Templates written to {}", out.display());
    Ok(())
}

async fn run(command: &Command, config: &StackConfig) -> Result<()> {
    match command {
        Command::Synth { out, .. } => synth(config, out),
        Command::Deploy { unit, .. } => {
            let zone = match (&config.hosted_zone_id, &config.certificate_arn) {
                (None, None) if unit.includes_edge() => Some(lookup_hosted_zone(&config.domain_name).await?),
                _ => None,
            };
            let engine = CloudFormationEngine::new();
            let assets = S3AssetPublisher::new(&config.target_account);
            let report = Deployer::new(config, &engine, &assets).with_hosted_zone(zone).deploy(*unit).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Simulate { unit, state, .. } => {
            let local = LocalEngine::with_state_file(&config.target_account, state.clone())?;
            let assets = LocalAssetPublisher::new(&config.target_account);
            let zone = config.hosted_zone_id.clone().or_else(|| Some(LOCAL_HOSTED_ZONE_ID.to_string()));
            let report = Deployer::new(config, &local, &assets).with_hosted_zone(zone).deploy(*unit).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            println!("{}", serde_json::to_string_pretty(&engine::summary(&local.state().await))?);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = match parse_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) => {
            if e.code == EXIT_USAGE {
                eprint!("{}", e.message);
            } else {
                print!("{}", e.message);
            }
            std::process::exit(e.code);
        }
    };
    telemetry::init_tracing();

    let config = match StackConfig::from_cli(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprint!("{}", e.message);
            std::process::exit(e.code);
        }
    };
    if let Err(e) = run(&cli.command, &config).await {
        tracing::error!(error = %e, "deployment failed");
        eprintln!("{e}");
        std::process::exit(e.exit_code());
    }
}
