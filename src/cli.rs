use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::info;
use tokio::runtime::Runtime;

use imgsync::config::Config;
use imgsync::coordinator::SyncCoordinator;
use imgsync::error::SyncError;
use imgsync::files::FileStatus;
use imgsync::hash::Hash;
use imgsync::project::{Project, ProjectSettings};
use imgsync::scanner::ScanSummary;
use imgsync::updates::{LogSink, ProjectSnapshot};

#[derive(Parser)]
#[command(
    name = "imgsync",
    version,
    about = "imgsync: keeps a dataset project in step with its input directories"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a new project file
    Init {
        /// Project file to create
        #[arg(long = "project", short = 'p')]
        project: PathBuf,

        #[arg(long = "name", short = 'n')]
        name: String,

        /// First input directory
        #[arg(long = "input", short = 'i')]
        input: PathBuf,

        #[arg(long = "output", short = 'o')]
        output: PathBuf,

        #[arg(long = "max-width")]
        max_width: u32,

        #[arg(long = "max-height")]
        max_height: u32,
    },

    /// Register another input directory with a project
    #[command(name = "add-dir")]
    AddDir {
        #[arg(long = "project", short = 'p')]
        project: PathBuf,

        /// Directory to add
        path: String,
    },

    /// Scan every input directory once and exit
    Scan {
        #[arg(long = "project", short = 'p')]
        project: PathBuf,
    },

    /// Scan every input directory, then watch for changes until interrupted
    Sync {
        #[arg(long = "project", short = 'p')]
        project: PathBuf,
    },

    /// Show the project's directories and files
    Status {
        #[arg(long = "project", short = 'p')]
        project: PathBuf,

        /// Print the full snapshot as JSON
        #[arg(long = "json", default_value_t = false)]
        json: bool,
    },
}

impl Cli {
    pub fn handle_command_line(config: &Config) -> Result<(), SyncError> {
        let args = Cli::parse();

        match args.command {
            Command::Init {
                project,
                name,
                input,
                output,
                max_width,
                max_height,
            } => {
                let settings = ProjectSettings {
                    name,
                    input_dir: input,
                    output_dir: output,
                    max_width,
                    max_height,
                };
                let created = Project::create(&project, &settings)?;
                println!("Created project '{}' at {}", settings.name, project.display());
                created.close();
                Ok(())
            }
            Command::AddDir { project, path } => {
                let project = Project::open(&project)?;
                let directory = project.add_input_directory(&path)?;
                println!("Input directory {}: {}", directory.id, directory.path);
                project.close();
                Ok(())
            }
            Command::Scan { project } => Self::scan(&project, config),
            Command::Sync { project } => Self::sync(&project, config),
            Command::Status { project, json } => Self::status(&project, json),
        }
    }

    fn runtime() -> Result<Runtime, SyncError> {
        Runtime::new().map_err(|e| SyncError::Error(format!("Failed to create runtime: {}", e)))
    }

    fn scan(project_path: &Path, config: &Config) -> Result<(), SyncError> {
        let project = Project::open(project_path)?;
        let coordinator = SyncCoordinator::new(project.store(), config.sync.clone());
        let interrupt_token = Arc::new(AtomicBool::new(false));

        let scan_token = Arc::clone(&interrupt_token);
        let results = Self::runtime()?.block_on(async move {
            let mut scan = tokio::task::spawn_blocking(move || {
                let mut results = Vec::new();
                for directory in coordinator.store().get_directories()? {
                    let result = coordinator.scan(&directory, &scan_token);
                    let interrupted = matches!(result, Err(SyncError::ScanInterrupted));
                    results.push((directory, result));
                    if interrupted {
                        break;
                    }
                }
                Ok::<_, SyncError>(results)
            });

            let joined = tokio::select! {
                joined = &mut scan => joined,
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, stopping scan");
                    interrupt_token.store(true, Ordering::Release);
                    scan.await
                }
            };
            joined.map_err(|e| SyncError::Error(format!("Scan task failed: {}", e)))?
        })?;

        for (directory, result) in &results {
            match result {
                Ok(summary) => Self::print_scan_summary(&directory.path, summary),
                Err(e) => println!("{}: {}", directory.path, e),
            }
        }
        project.close();
        Ok(())
    }

    fn sync(project_path: &Path, config: &Config) -> Result<(), SyncError> {
        let project = Project::open(project_path)?;
        let coordinator = SyncCoordinator::new(project.store(), config.sync.clone())
            .with_sink(Arc::new(LogSink));

        Self::runtime()?.block_on(async move {
            let session = tokio::task::spawn_blocking(move || coordinator.start_all())
                .await
                .map_err(|e| SyncError::Error(format!("Sync startup failed: {}", e)))??;

            for (directory, e) in session.failures() {
                println!("Not syncing {}: {}", directory.path, e);
            }
            if session.handles().is_empty() {
                return Err(SyncError::Error("No input directory could be synced".into()));
            }
            for handle in session.handles() {
                println!("Watching {}", handle.directory().path);
            }
            println!("Press Ctrl-C to stop");

            tokio::signal::ctrl_c().await?;
            info!("Interrupt received, stopping sync");

            tokio::task::spawn_blocking(move || session.close())
                .await
                .map_err(|e| SyncError::Error(format!("Sync shutdown failed: {}", e)))
        })?;

        project.close();
        Ok(())
    }

    fn status(project_path: &Path, json: bool) -> Result<(), SyncError> {
        let project = Project::open(project_path)?;
        let snapshot = ProjectSnapshot::load(project.store().as_ref())?;

        if json {
            let out = serde_json::to_string_pretty(&snapshot)
                .map_err(|e| SyncError::Error(format!("Failed to serialize snapshot: {}", e)))?;
            println!("{}", out);
        } else {
            Self::print_status(&snapshot);
        }

        project.close();
        Ok(())
    }

    fn print_scan_summary(path: &str, summary: &ScanSummary) {
        println!("{}", path);
        println!("  New:       {}", summary.new_count);
        println!("  Updated:   {}", summary.updated_count);
        println!("  Found:     {}", summary.found_count);
        println!("  Missing:   {}", summary.missing_count);
        println!("  Unchanged: {}", summary.unchanged_count);
        if summary.skipped_count > 0 {
            println!("  Unreadable (not recorded): {}", summary.skipped_count);
        }
        if summary.failed_count > 0 {
            println!("  Failed to record: {}", summary.failed_count);
        }
    }

    fn print_status(snapshot: &ProjectSnapshot) {
        if let Some(name) = snapshot.meta.get("name") {
            println!("Project: {}", name);
        }
        for directory in &snapshot.directories {
            let files: Vec<_> = snapshot
                .files
                .iter()
                .filter(|f| f.input_dir_id == directory.id)
                .collect();
            println!("[{}] {} ({} files)", directory.id, directory.path, files.len());
            for file in files {
                let marker = match file.status {
                    FileStatus::New => "+",
                    FileStatus::Updated => "~",
                    FileStatus::Found => "=",
                    FileStatus::Missing => "-",
                };
                println!(
                    "  {} {:<8} {} {}",
                    marker,
                    file.status.as_ref(),
                    Hash::short_hash(file.content_hash.as_deref()),
                    file.relative_path
                );
            }
        }
    }
}
