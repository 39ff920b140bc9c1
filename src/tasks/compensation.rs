//! Undo records for failed runs

use crate::db::Session;
use anyhow::{Context, Result};

/// What must be undone if a run fails after its first checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Compensation {
    /// Nothing durable has been written yet
    #[default]
    None,
    /// The `installing` row of this mod was committed and must be removed
    RemoveInstalled { mod_id: String },
}

impl Compensation {
    /// Discard staged writes, then undo the committed checkpoint
    pub fn apply(&self, session: &mut Session) -> Result<()> {
        session
            .rollback()
            .context("Failed to discard staged writes")?;

        match self {
            Compensation::None => Ok(()),
            Compensation::RemoveInstalled { mod_id } => {
                tracing::info!("Rollback: removing installed revision of {}", mod_id);
                session.delete_installed(mod_id)?;
                session.commit()
            }
        }
    }
}
