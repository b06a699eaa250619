// src/main.rs

use color_eyre::eyre::Result;
use tracing::debug;

use surface_sweep::app::App;
use surface_sweep::cli::CommandLine;
use surface_sweep::logging::initialize_logging;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let commands = CommandLine::parse_args();
    let settings = commands.tuning.settings();

    let log_path = initialize_logging(settings.verbose)?;
    debug!(log = %log_path.display(), "Logging initialized.");

    let app = App::new(settings)?;
    app.run(commands.command).await?;
    Ok(())
}
