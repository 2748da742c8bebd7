//! Vistador: visual regression runs from the command line
//!
//! ## Usage
//!
//! ```bash
//! vistador run plan.yaml                    # Compare a plan against baselines
//! vistador run plan.yaml -f junit -o r.xml  # JUnit report for CI
//! vistador accept plan.yaml --by alice      # Accept current images
//! vistador compare new.png old.png -m layout
//! vistador baselines list
//! vistador report report.json -f html -o report.html
//! ```

use clap::Parser;
use std::process::ExitCode;
use vistador::{
    handlers::{self, baselines::DeleteTarget},
    init_tracing, BaselinesCommand, Cli, CliConfig, CliResult, ColorChoice, Commands, Verbosity,
};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = build_config(&cli);
    init_tracing(config.verbosity, config.log_json);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: cannot start runtime: {e}");
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(dispatch(&config, cli.command)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(2)
        }
    }
}

fn build_config(cli: &Cli) -> CliConfig {
    let verbosity = Verbosity::from_flags(cli.quiet, cli.verbose);
    let color: ColorChoice = cli.color.clone().into();

    CliConfig::new()
        .with_verbosity(verbosity)
        .with_color(color)
        .with_config_path(cli.config.clone())
        .with_log_json(cli.log_json)
}

/// Exit 0 when everything passed, 1 on visual failures, 2 on errors
async fn dispatch(config: &CliConfig, command: Commands) -> CliResult<ExitCode> {
    match command {
        Commands::Run(args) => {
            let report = handlers::execute_run(config, &args).await?;
            Ok(exit_code(report.exit_code() == 0))
        }
        Commands::Compare(args) => {
            let result = handlers::execute_compare(config, &args)?;
            Ok(exit_code(result.outcome.is_passing()))
        }
        Commands::Accept(args) => {
            handlers::execute_accept(config, &args).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Baselines(args) => match args.command {
            BaselinesCommand::List { baseline_dir, json } => {
                handlers::execute_list(config, baseline_dir.as_ref(), json).await?;
                Ok(ExitCode::SUCCESS)
            }
            BaselinesCommand::Delete {
                app,
                test,
                checkpoint,
                viewport,
                environment,
                baseline_dir,
            } => {
                let target = DeleteTarget {
                    app: &app,
                    test: &test,
                    checkpoint: &checkpoint,
                    viewport: &viewport,
                    environment: environment.as_deref(),
                };
                let existed = handlers::execute_delete(config, &target, baseline_dir.as_ref()).await?;
                Ok(exit_code(existed))
            }
        },
        Commands::Report(args) => {
            handlers::execute_report(config, &args)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

const fn exit_code(passed: bool) -> ExitCode {
    if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
