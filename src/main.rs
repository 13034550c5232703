//! vac - automated I-V sweep
//!
//! Main entry point for the command line program.
//!
//! # Execution Flow
//!
//! 1. Parse arguments (exit -1 on error)
//! 2. Load `vac.yaml` plus `VAC__*` overrides (exit -3 on error)
//! 3. Initialize logging: daily file in `logs/`, `# E:`-style console on stderr
//! 4. Create `<base>/<YYYY-MM-DD_HH-MM-SS>_<name>/` (exit -2 on error)
//! 5. Start the tokio runtime; run the console and the sweep
//! 6. Exit 0 if the sweep completed or was stopped, 1 otherwise
//!
//! Console commands while running: `h` for help, `q` to stop.

use clap::Parser;
use vac::app::{StartupError, exit_code};
use vac::config::DEFAULT_CONFIG_FILE;
use vac::services::StackPlan;
use vac::{APP_NAME, AppConfig, Cli, ConfigManager, ExperimentLayout, VERSION};

fn main() {
    let code = run();
    std::process::exit(code);
}

/// Everything up to the exit code, so the log guard is dropped (and the
/// file log flushed) before the process exits.
fn prepare(
    config: &AppConfig,
    cli: &Cli,
) -> Result<(ExperimentLayout, tokio::runtime::Runtime), StartupError> {
    let started = chrono::Local::now().naive_local();
    let layout = ExperimentLayout::create(&config.output, &cli.experiment_name, started)
        .map_err(StartupError::ExperimentDir)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("vac-worker")
        .build()
        .map_err(StartupError::Runtime)?;

    Ok((layout, runtime))
}

fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                exit_code::BAD_ARGUMENTS
            } else {
                exit_code::SUCCESS
            };
            // Help and version go to stdout, usage errors to stderr
            let _ = e.print();
            return code;
        }
    };

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.into());
    let config = match ConfigManager::new(&config_path).load() {
        Ok(config) => config,
        Err(e) => {
            let err = StartupError::Config(e);
            eprintln!("# E: {}", err);
            return err.exit_code();
        }
    };

    let _guard = match vac::logging::setup_logging(&config.logging, cli.debug) {
        Ok(guard) => guard,
        Err(e) => {
            let err = StartupError::Logging(e);
            eprintln!("# E: {}", err);
            return err.exit_code();
        }
    };

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let (layout, runtime) = match prepare(&config, &cli) {
        Ok(prepared) => prepared,
        Err(e) => {
            tracing::error!("{}", e);
            return e.exit_code();
        }
    };

    let bus = vac::select_bus(&config, cli.simulate);
    let plan = StackPlan::from_config(
        &config,
        layout.data_log().to_path_buf(),
        layout.plot_log().to_path_buf(),
    );

    println!("Type h for help, q to stop the sweep");

    let summary = runtime.block_on(vac::run_experiment(
        &config,
        bus.as_ref(),
        &plan,
        tokio::io::BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    ));

    // Stdin reads run on a blocking thread that cannot be interrupted
    runtime.shutdown_timeout(std::time::Duration::from_secs(1));

    let code = summary.exit_code();
    tracing::info!(
        "Finished: {}, exit code {}",
        summary
            .stop_reason
            .map(|r| r.to_string())
            .unwrap_or_else(|| "no stop recorded".to_string()),
        code
    );
    code
}
