use std::path::PathBuf;

/// An error type for the pipeline module.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// The camera count has no known pairwise layout.
    #[error("Unsupported camera count {0}, expected 1, 2 or 4")]
    UnsupportedCameraCount(usize),

    /// The per-camera settings do not cover every configured camera.
    #[error("Configuration lists {settings} camera settings for {cameras} cameras")]
    CameraSettingsMismatch {
        /// Number of per-camera entries present.
        settings: usize,
        /// Number of cameras configured.
        cameras: usize,
    },

    /// The capture backends do not cover every configured camera.
    #[error("{backends} capture backends given for {cameras} cameras")]
    BackendMismatch {
        /// Number of backends given.
        backends: usize,
        /// Number of cameras configured.
        cameras: usize,
    },

    /// The coordinator was started twice.
    #[error("The pipeline has already been started")]
    AlreadyStarted,

    /// A second recording was requested while one is in progress.
    #[error("A recording is already in progress")]
    RecordingInProgress,

    /// The configuration file could not be read or written.
    #[error("Failed to access the configuration file {0}")]
    ConfigFileError(PathBuf, #[source] std::io::Error),

    /// A worker thread could not be spawned.
    #[error("Failed to spawn the {0} worker thread")]
    ThreadSpawnError(String, #[source] std::io::Error),

    /// An error produced by the I/O layer.
    #[error("I/O layer error")]
    IoError(#[from] panostitch_io::IoError),
}
