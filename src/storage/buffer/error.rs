use thiserror::Error;

use crate::storage::disk::DiskManagerError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("disk manager error: {0}")]
    Disk(#[from] DiskManagerError),
}
