use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use serde::Serialize;

use crate::error::SyncError;
use crate::files::InputDirectory;
use crate::store::{FileStore, SqliteStore};

/// User-supplied settings for a new project.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProjectSettings {
    pub name: String,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub max_width: u32,
    pub max_height: u32,
}

/// A project database: its input directories, their files, and the settings
/// it was created with.
pub struct Project {
    path: PathBuf,
    store: Arc<SqliteStore>,
}

impl Project {
    const META_NAME: &str = "name";
    const META_OUTPUT_DIR: &str = "outputDir";
    const META_MAX_WIDTH: &str = "maxWidth";
    const META_MAX_HEIGHT: &str = "maxHeight";
    const META_CREATED_AT: &str = "createdAt";
    const META_UPDATED_AT: &str = "updatedAt";

    pub fn create(save_location: &Path, settings: &ProjectSettings) -> Result<Self, SyncError> {
        Project::validate(save_location, settings)?;

        let store = SqliteStore::open(save_location)?;
        let now = Utc::now().timestamp().to_string();
        store.set_meta(&[
            (Project::META_NAME.into(), settings.name.trim().to_owned()),
            (
                Project::META_OUTPUT_DIR.into(),
                dunce::canonicalize(&settings.output_dir)?
                    .to_string_lossy()
                    .into_owned(),
            ),
            (Project::META_MAX_WIDTH.into(), settings.max_width.to_string()),
            (Project::META_MAX_HEIGHT.into(), settings.max_height.to_string()),
            (Project::META_CREATED_AT.into(), now.clone()),
            (Project::META_UPDATED_AT.into(), now),
        ])?;

        let project = Project {
            path: save_location.to_owned(),
            store: Arc::new(store),
        };
        project.register_directory(&settings.input_dir.to_string_lossy())?;

        info!("Created project '{}' at {}", settings.name.trim(), save_location.display());
        Ok(project)
    }

    pub fn open(path: &Path) -> Result<Self, SyncError> {
        if !path.is_file() {
            return Err(SyncError::InvalidProject(format!(
                "Project file '{}' does not exist",
                path.display()
            )));
        }

        let store = SqliteStore::open(path)?;
        if !store.get_meta()?.contains_key(Project::META_NAME) {
            return Err(SyncError::InvalidProject(format!(
                "'{}' is not an imgsync project",
                path.display()
            )));
        }

        debug!("Opened project at {}", path.display());
        Ok(Project {
            path: path.to_owned(),
            store: Arc::new(store),
        })
    }

    /// Checks every setting before anything is written to disk.
    pub fn validate(save_location: &Path, settings: &ProjectSettings) -> Result<(), SyncError> {
        if !settings.input_dir.is_dir() {
            return Err(SyncError::InvalidProject(
                "Input directory is required and must exist".into(),
            ));
        }
        if !settings.output_dir.is_dir() {
            return Err(SyncError::InvalidProject(
                "Output directory is required and must exist".into(),
            ));
        }

        let parent_exists = match save_location.parent() {
            Some(parent) if parent.as_os_str().is_empty() => true, // relative to the current directory
            Some(parent) => parent.is_dir(),
            None => false,
        };
        if save_location.as_os_str().is_empty() || !parent_exists {
            return Err(SyncError::InvalidProject(
                "Project save location is required and its parent directory must exist".into(),
            ));
        }
        if settings.name.trim().is_empty() {
            return Err(SyncError::InvalidProject("Project name is required".into()));
        }
        if settings.max_height == 0 {
            return Err(SyncError::InvalidProject(
                "Max height must be a positive number".into(),
            ));
        }
        if settings.max_width == 0 {
            return Err(SyncError::InvalidProject(
                "Max width must be a positive number".into(),
            ));
        }
        if save_location.exists() {
            return Err(SyncError::InvalidProject(format!(
                "Project file '{}' already exists",
                save_location.display()
            )));
        }

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store(&self) -> Arc<dyn FileStore> {
        self.store.clone()
    }

    pub fn name(&self) -> Result<String, SyncError> {
        Ok(self
            .store
            .get_meta()?
            .remove(Project::META_NAME)
            .unwrap_or_default())
    }

    pub fn input_directories(&self) -> Result<Vec<InputDirectory>, SyncError> {
        self.store.get_directories()
    }

    /// Registers another input directory. Registering the same directory twice
    /// returns the existing entry.
    pub fn add_input_directory(&self, path_arg: &str) -> Result<InputDirectory, SyncError> {
        let directory = self.register_directory(path_arg)?;
        self.store.set_meta(&[(
            Project::META_UPDATED_AT.into(),
            Utc::now().timestamp().to_string(),
        )])?;
        Ok(directory)
    }

    fn register_directory(&self, path_arg: &str) -> Result<InputDirectory, SyncError> {
        let canonical = Project::validate_and_canonicalize_path(path_arg)?;
        let directory = self.store.add_directory(&canonical.to_string_lossy())?;
        info!("Input directory {}: {}", directory.id, directory.path);
        Ok(directory)
    }

    pub fn validate_and_canonicalize_path(path_arg: &str) -> Result<PathBuf, SyncError> {
        let path_arg = path_arg.trim();
        if path_arg.is_empty() {
            return Err(SyncError::InvalidProject("Provided path is empty".into()));
        }

        let path = Path::new(path_arg);

        let absolute_path = if path.is_absolute() {
            path.to_owned()
        } else {
            env::current_dir()?.join(path)
        };

        if !absolute_path.exists() {
            return Err(SyncError::InvalidProject(format!(
                "Path '{}' does not exist",
                absolute_path.display()
            )));
        }

        let metadata = fs::symlink_metadata(&absolute_path)?;

        if metadata.file_type().is_symlink() {
            return Err(SyncError::InvalidProject(format!(
                "Path '{}' is a symlink and not allowed",
                absolute_path.display()
            )));
        }

        if !metadata.is_dir() {
            return Err(SyncError::InvalidProject(format!(
                "Path '{}' is not a directory",
                absolute_path.display()
            )));
        }

        // Canonicalize using Dunce (de-UNC) to strip the "UNC" (e.g., \\?\C) on Windows
        Ok(dunce::canonicalize(absolute_path)?)
    }

    /// Closes the database once no coordinator still holds the store.
    pub fn close(self) {
        match Arc::try_unwrap(self.store) {
            Ok(store) => store.close(),
            Err(_) => debug!("Project store still in use; it closes with its last user"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct Dirs {
        tmp: TempDir,
        input: PathBuf,
        output: PathBuf,
    }

    fn dirs() -> Dirs {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("input");
        let output = tmp.path().join("output");
        fs::create_dir(&input).unwrap();
        fs::create_dir(&output).unwrap();
        Dirs { tmp, input, output }
    }

    fn settings(d: &Dirs) -> ProjectSettings {
        ProjectSettings {
            name: "Birds".into(),
            input_dir: d.input.clone(),
            output_dir: d.output.clone(),
            max_width: 1024,
            max_height: 768,
        }
    }

    #[test]
    fn test_create_writes_meta_and_input_directory() {
        let d = dirs();
        let save = d.tmp.path().join("birds.imgsync");

        let project = Project::create(&save, &settings(&d)).unwrap();
        assert_eq!(project.name().unwrap(), "Birds");

        let meta = project.store().get_meta().unwrap();
        assert_eq!(meta.get("maxWidth").map(String::as_str), Some("1024"));
        assert_eq!(meta.get("maxHeight").map(String::as_str), Some("768"));
        assert!(meta.contains_key("createdAt"));
        assert!(meta.contains_key("updatedAt"));
        assert_eq!(
            meta.get("outputDir").map(PathBuf::from),
            Some(dunce::canonicalize(&d.output).unwrap())
        );

        let directories = project.input_directories().unwrap();
        assert_eq!(directories.len(), 1);
        assert_eq!(directories[0].root(), dunce::canonicalize(&d.input).unwrap());
        project.close();

        let reopened = Project::open(&save).unwrap();
        assert_eq!(reopened.input_directories().unwrap().len(), 1);
    }

    #[test]
    fn test_validation_failures() {
        let d = dirs();
        let save = d.tmp.path().join("p.imgsync");
        let good = settings(&d);

        let cases = [
            ProjectSettings {
                input_dir: d.tmp.path().join("nope"),
                ..good.clone()
            },
            ProjectSettings {
                output_dir: d.tmp.path().join("nope"),
                ..good.clone()
            },
            ProjectSettings {
                name: "  ".into(),
                ..good.clone()
            },
            ProjectSettings {
                max_width: 0,
                ..good.clone()
            },
            ProjectSettings {
                max_height: 0,
                ..good.clone()
            },
        ];
        for bad in &cases {
            assert!(matches!(
                Project::validate(&save, bad),
                Err(SyncError::InvalidProject(_))
            ));
        }

        let orphan = d.tmp.path().join("no-parent").join("p.imgsync");
        assert!(Project::validate(&orphan, &good).is_err());

        fs::write(&save, b"").unwrap();
        assert!(Project::validate(&save, &good).is_err());
    }

    #[test]
    fn test_open_rejects_missing_and_foreign_files() {
        let d = dirs();
        assert!(matches!(
            Project::open(&d.tmp.path().join("absent.imgsync")),
            Err(SyncError::InvalidProject(_))
        ));

        let foreign = d.tmp.path().join("foreign.db");
        SqliteStore::open(&foreign).unwrap().close();
        assert!(matches!(
            Project::open(&foreign),
            Err(SyncError::InvalidProject(_))
        ));
    }

    #[test]
    fn test_add_input_directory() {
        let d = dirs();
        let project = Project::create(&d.tmp.path().join("p.imgsync"), &settings(&d)).unwrap();

        let extra = d.tmp.path().join("extra");
        fs::create_dir(&extra).unwrap();
        let added = project.add_input_directory(&extra.to_string_lossy()).unwrap();
        let again = project.add_input_directory(&extra.to_string_lossy()).unwrap();
        assert_eq!(added, again);
        assert_eq!(project.input_directories().unwrap().len(), 2);

        let file = d.tmp.path().join("file.png");
        fs::write(&file, b"x").unwrap();
        assert!(project.add_input_directory(&file.to_string_lossy()).is_err());
        assert!(project.add_input_directory("").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_input_directory_is_rejected() {
        let d = dirs();
        let link = d.tmp.path().join("link");
        std::os::unix::fs::symlink(&d.input, &link).unwrap();
        assert!(Project::validate_and_canonicalize_path(&link.to_string_lossy()).is_err());
    }
}
