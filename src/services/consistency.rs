//! Joint success check for dual writes.

use thiserror::Error;

/// One or both sinks could not be confirmed after a dual write.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("dual write failed (file present: {file_present}, database id present: {db_id_present})")]
pub struct DualWriteInconsistency {
    pub file_present: bool,
    pub db_id_present: bool,
}

/// Both sinks must report success; anything less is an inconsistency.
pub fn verify(file_present: bool, db_id_present: bool) -> Result<(), DualWriteInconsistency> {
    if file_present && db_id_present {
        Ok(())
    } else {
        Err(DualWriteInconsistency {
            file_present,
            db_id_present,
        })
    }
}
