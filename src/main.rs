mod cli;

use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};
use log::{debug, error};

use cli::Cli;
use imgsync::config::Config;
use imgsync::SyncError;

fn main() {
    let Some(project_dirs) = Config::project_dirs() else {
        eprintln!("Could not determine a home directory for imgsync");
        std::process::exit(1);
    };
    let config = Config::load_config(&project_dirs);

    // Keep the handle alive for the life of the process
    let _logger = match setup_logging(&config, project_dirs.data_local_dir()) {
        Ok(logger) => Some(logger),
        Err(e) => {
            eprintln!("Logging disabled: {}", e);
            None
        }
    };
    debug!("Command-line args: {:?}", std::env::args_os().collect::<Vec<_>>());

    if let Err(err) = Cli::handle_command_line(&config) {
        error!("{:?}", err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

fn setup_logging(config: &Config, data_dir: &std::path::Path) -> Result<LoggerHandle, SyncError> {
    let log_dir = data_dir.join("logs");

    Logger::try_with_str(config.logging.log_spec())
        .and_then(|logger| {
            logger
                .log_to_file(FileSpec::default().directory(log_dir).basename("imgsync"))
                .duplicate_to_stderr(Duplicate::Warn)
                .rotate(
                    Criterion::Size(10 * 1024 * 1024),
                    Naming::Timestamps,
                    Cleanup::KeepLogFiles(5),
                )
                .start()
        })
        .map_err(|e| SyncError::Error(format!("Failed to start logger: {}", e)))
}
