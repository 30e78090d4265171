//! deploy-v3 deploys the Uniswap V3 contracts and keeps track of progress in a state file.

mod cli;

use std::{ffi::OsString, process::ExitCode, sync::Arc};

use alloy_core::primitives::Address;
use anyhow::Result;
use clap::{Parser, error::ErrorKind};

use cli::Cli;
use uniswap_v3_deploy::{
    ArtifactStore, DeployConfig, DeploymentReport, MigrationState, RpcChainClient, StateFile,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match parse_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(code) => return ExitCode::from(code),
    };

    // Initialize the logger. Stdout is reserved for the results.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = format!("{err:#}"), "Deployment failed");
            ExitCode::FAILURE
        }
    }
}

/// Parses the command line, printing usage errors, help and version output.
///
/// On error returns the process exit status: 0 after help or version, 1 otherwise.
fn parse_args<I, T>(args: I) -> Result<Cli, u8>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::try_parse_from(args).map_err(|err| {
        // Printing only fails if the terminal is gone.
        err.print().ok();
        match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
            _ => 1,
        }
    })
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let artifacts = ArtifactStore::load_dir(&cli.artifacts)?;
    let chain = Arc::new(RpcChainClient::connect(cli.json_rpc, cli.private_key).await?);

    let config = DeployConfig {
        chain,
        gas_price: cli.gas_price,
        weth9_address: cli.weth9_address,
        native_currency_label_bytes: cli.native_currency_label,
        v2_core_factory_address: cli.v2_core_factory_address.unwrap_or(Address::ZERO),
        owner_address: cli.owner_address,
    };

    let outcome = uniswap_v3_deploy::deploy(
        config,
        &artifacts,
        StateFile::new(&cli.state),
        cli.confirmations,
    )
    .await?;

    match outcome {
        Ok(report) => {
            println!("Deployment succeeded");
            println!("{}", results_json(&report)?);
            print_final_state(&report.state)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            tracing::error!(
                stage = failure.stage + 1,
                kind = %failure.error.kind(),
                error = %failure.error,
                "Deployment failed"
            );
            print_final_state(&failure.state)?;
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Step outputs of every stage as a JSON array of arrays.
fn results_json(report: &DeploymentReport) -> Result<String> {
    Ok(serde_json::to_string(&report.results())?)
}

fn print_final_state(state: &MigrationState) -> Result<()> {
    println!("Final state");
    println!("{}", serde_json::to_string(state)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::{TxHash, address};
    use uniswap_v3_deploy::{StageReport, StateKey, StateRecord, step::StepOutput};

    #[test]
    fn test_results_are_printed_per_stage() {
        let factory = address!("5fbdb2315678afecb367f032d93f642f64180aa3");
        let mut state = MigrationState::new();
        state
            .record(StateRecord::new(StateKey::V3CoreFactory, factory))
            .unwrap();

        let report = DeploymentReport {
            stages: vec![
                StageReport {
                    index: 0,
                    name: "core".into(),
                    outputs: vec![
                        StepOutput::new("Contract UniswapV3Factory deployed")
                            .with_address(factory)
                            .with_hash(TxHash::repeat_byte(1)),
                    ],
                },
                StageReport {
                    index: 1,
                    name: "periphery".into(),
                    outputs: vec![],
                },
            ],
            state,
        };

        let printed: serde_json::Value =
            serde_json::from_str(&results_json(&report).unwrap()).unwrap();

        assert_eq!(printed.as_array().unwrap().len(), 2);
        assert!(printed[0].is_array());
        assert_eq!(printed[0][0]["message"], "Contract UniswapV3Factory deployed");
        assert!(printed[0][0].get("name").is_none());
        assert_eq!(printed[1], serde_json::json!([]));
    }

    #[test]
    fn test_parse_args_exit_codes() {
        assert_eq!(parse_args(["deploy-v3", "--help"]).unwrap_err(), 0);
        assert_eq!(parse_args(["deploy-v3", "--version"]).unwrap_err(), 0);
        assert_eq!(parse_args(["deploy-v3", "--no-such-flag"]).unwrap_err(), 1);
    }
}
