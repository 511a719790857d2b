use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Site '{site}' is not registered for project {project}")]
    UnknownSite { project: String, site: String },

    #[error("Representation {representation_id} not found in project {project}")]
    UnknownRepresentation {
        project: String,
        representation_id: String,
    },

    #[error("Representation {representation_id} already belongs to project {project}")]
    RepresentationInOtherProject {
        project: String,
        representation_id: String,
    },

    #[error("File {file_id} not found in project {project}")]
    UnknownFile { project: String, file_id: String },

    #[error("Site '{site}' already present on representation {representation_id}")]
    AlreadyAssigned {
        representation_id: String,
        site: String,
    },

    #[error("Site '{site}' not found on representation {representation_id}")]
    SiteNotAssigned {
        representation_id: String,
        site: String,
    },

    #[error("Root '{root}' is not configured for site '{site}' on this machine")]
    RootNotConfigured { site: String, root: String },

    #[error("Project {project} is not configured for sync")]
    ProjectNotConfigured { project: String },

    #[error("Invalid priority {0}: expected 1..=1000")]
    InvalidPriority(u32),

    #[error("Invalid progress value {0}: expected 0.0..=1.0")]
    InvalidProgress(f64),

    #[error("Invalid ID: {0}")]
    InvalidId(String),

    #[error("Invalid sync status: {0}")]
    InvalidStatus(String),

    #[error("Invalid file path template: {0}")]
    InvalidPath(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<core_runtime::Error> for SyncError {
    fn from(err: core_runtime::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
