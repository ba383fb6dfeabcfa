//! Local data-source checks run before anything is sent to Salesforce.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::AppError;

/// Largest data file accepted for a single upload, in bytes.
pub const MAX_SOURCE_SIZE: u64 = 1_048_576;

/// A data file that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceDescriptor {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Checks that `path` names a readable regular file no larger than
/// [`MAX_SOURCE_SIZE`].
///
/// The file is opened for reading, not just stat'ed, so permission problems
/// surface here rather than at upload time.
///
/// # Errors
///
/// - `AppError::DataSourceUnreadable` - Empty path, missing file, directory,
///   or no read permission
/// - `AppError::DataSourceTooLarge` - File exceeds the size limit
pub async fn validate(path: &Path) -> Result<DataSourceDescriptor, AppError> {
    let display = path.display().to_string();

    if path.as_os_str().is_empty() {
        return Err(AppError::DataSourceUnreadable {
            path: display,
            reason: "path is empty".to_string(),
        });
    }

    let unreadable = |e: std::io::Error| AppError::DataSourceUnreadable {
        path: display.clone(),
        reason: e.to_string(),
    };

    let file = tokio::fs::File::open(path).await.map_err(unreadable)?;
    let metadata = file.metadata().await.map_err(unreadable)?;

    if !metadata.is_file() {
        return Err(AppError::DataSourceUnreadable {
            path: display,
            reason: "not a regular file".to_string(),
        });
    }

    let size_bytes = metadata.len();
    if size_bytes > MAX_SOURCE_SIZE {
        return Err(AppError::DataSourceTooLarge {
            path: display,
            size_bytes,
            max_bytes: MAX_SOURCE_SIZE,
        });
    }

    debug!("[BULK-LOAD] Data source {} is {} bytes", path.display(), size_bytes);

    Ok(DataSourceDescriptor {
        path: path.to_path_buf(),
        size_bytes,
    })
}

/// Re-validates and reads the whole data source.
pub async fn read_contents(path: &Path) -> Result<Vec<u8>, AppError> {
    validate(path).await?;
    tokio::fs::read(path)
        .await
        .map_err(|e| AppError::DataSourceUnreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}
