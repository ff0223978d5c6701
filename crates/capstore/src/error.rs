use thiserror::Error;

#[derive(Debug, Error)]
pub enum CapStoreError {
    #[error("cap is missing a non-zero inode")]
    MissingInode,
    #[error("cap is missing its authid")]
    MissingAuthId,
    #[error("cap is missing its clientid")]
    MissingClientId,
    #[error("cap is missing its clientuuid")]
    MissingClientUuid,
}
