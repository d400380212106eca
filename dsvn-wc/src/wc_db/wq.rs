//! Persistent work queue of the segment containing a path

use super::rows;
use super::WcDb;
use crate::error::{Result, WcError};
use crate::schema::in_txn;
use crate::workqueue::WorkItem;
use rusqlite::OptionalExtension;
use std::path::Path;

impl WcDb {
    pub fn wq_add(&self, wri_abspath: &Path, items: &[WorkItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let (seg, _) = self.parse(wri_abspath)?;
        let conn = seg.conn();
        in_txn(&conn, |c| rows::wq_insert(c, items))
    }

    /// Oldest queued item, left in place until [`WcDb::wq_completed`]
    pub fn wq_fetch(&self, wri_abspath: &Path) -> Result<Option<(i64, WorkItem)>> {
        let (seg, _) = self.parse(wri_abspath)?;
        let row: Option<(i64, String)> = seg
            .conn()
            .prepare_cached("SELECT id, work FROM work_queue ORDER BY id LIMIT 1")?
            .query_row([], |r| Ok((r.get(0)?, r.get(1)?)))
            .optional()?;
        match row {
            Some((id, work)) => {
                let item = WorkItem::decode(&work).map_err(|e| {
                    tracing::error!("Undecodable work item {}: {}", id, e);
                    WcError::Corrupt("Unrecognized work item in the queue".into())
                })?;
                Ok(Some((id, item)))
            }
            None => Ok(None),
        }
    }

    pub fn wq_completed(&self, wri_abspath: &Path, id: i64) -> Result<()> {
        let (seg, _) = self.parse(wri_abspath)?;
        seg.conn().execute("DELETE FROM work_queue WHERE id = ?1", [id])?;
        Ok(())
    }
}
