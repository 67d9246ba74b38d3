//! `module-check --war <path> --amp <path>`: run the pre-install checks of an AMP against a WAR.

use clap::Parser;
use resource_sdk::module_tool::{amp_module_details, ModuleError, WarHelper, WarSource};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "module-check", about = "Check that a module package fits a target WAR")]
struct Cli {
    /// Target WAR (archive or exploded directory).
    #[arg(long)]
    war: PathBuf,

    /// Module package (AMP archive or directory holding module.properties).
    #[arg(long)]
    amp: PathBuf,
}

fn run(cli: &Cli) -> Result<(), ModuleError> {
    let war = WarSource::open(&cli.war)?;
    let amp = WarSource::open(&cli.amp)?;
    let module = amp_module_details(&amp)?;
    let helper = WarHelper::new();

    if helper.is_share_war(&war)? {
        tracing::info!(war = %cli.war.display(), "target is a Share WAR");
    }
    helper.check_compatible_version(&war, &module)?;
    helper.check_compatible_edition(&war, &module)?;
    helper.check_module_dependencies(&war, &module)?;
    match helper.module_details_or_alias(&war, &module)? {
        Some(installed) => tracing::info!(
            module = %module.id,
            installed = %installed.version,
            installing = %module.version,
            "module already installed"
        ),
        None => tracing::info!(module = %module.id, version = %module.version, "module not yet installed"),
    }
    Ok(())
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("resource_sdk=info,module_check=info")))
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => {
            tracing::info!(war = %cli.war.display(), amp = %cli.amp.display(), "module is compatible");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "module check failed");
            ExitCode::FAILURE
        }
    }
}
