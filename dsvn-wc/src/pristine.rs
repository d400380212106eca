//! Pristine store: content-addressed file texts
//!
//! Blobs are stored at `.svn/pristine/<hex[..2]>/<sha1 hex>` of the segment
//! and recorded in the `pristine` table with their MD5 alias and size.

use crate::error::{Result, WcError};
use crate::types::Checksum;
use crate::wc_db::WcDb;
use bytes::Bytes;
use rusqlite::{Connection, OptionalExtension};
use sha1::{Digest, Sha1};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Map a checksum to the SHA-1 key of an installed text, translating MD5
pub(crate) fn conn_lookup_sha1(conn: &Connection, checksum: &Checksum) -> Result<Option<Checksum>> {
    let found: Option<Checksum> = if checksum.is_sha1() {
        conn.prepare_cached("SELECT checksum FROM pristine WHERE checksum = ?1")?
            .query_row([checksum.to_db()], |r| r.get(0))
            .optional()?
    } else {
        conn.prepare_cached("SELECT checksum FROM pristine WHERE md5_checksum = ?1")?
            .query_row([checksum.to_db()], |r| r.get(0))
            .optional()?
    };
    Ok(found)
}

fn conn_md5_of(conn: &Connection, sha1: &Checksum) -> Result<Option<Checksum>> {
    let md5: Option<Option<Checksum>> = conn
        .prepare_cached("SELECT md5_checksum FROM pristine WHERE checksum = ?1")?
        .query_row([sha1.to_db()], |r| r.get(0))
        .optional()?;
    Ok(md5.flatten())
}

/// Number of BASE and WORKING rows citing either form of a text
fn conn_reference_count(conn: &Connection, sha1: &Checksum, md5: Option<&Checksum>) -> Result<i64> {
    let md5 = md5.map(|c| c.to_db()).unwrap_or_default();
    let n: i64 = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM base_node WHERE checksum IN (?1, ?2)) + \
                (SELECT COUNT(*) FROM working_node WHERE checksum IN (?1, ?2))",
        rusqlite::params![sha1.to_db(), md5],
        |r| r.get(0),
    )?;
    Ok(n)
}

pub(crate) fn blob_path(pristine_dir: &Path, sha1: &Checksum) -> PathBuf {
    let hex = sha1.hex();
    pristine_dir.join(&hex[..2]).join(hex)
}

/// SHA-1, MD5 and size of a stream
pub fn checksum_reader(mut reader: impl Read) -> std::io::Result<(Checksum, Checksum, u64)> {
    let mut sha1 = Sha1::new();
    let mut md5 = md5::Context::new();
    let mut size = 0u64;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        sha1.update(&buf[..n]);
        md5.consume(&buf[..n]);
        size += n as u64;
    }
    Ok((Checksum::Sha1(sha1.finalize().into()), Checksum::Md5(md5.compute().0), size))
}

impl WcDb {
    /// Move `tempfile_abspath` into the pristine store of the segment it lives in
    pub fn pristine_install(&self, tempfile_abspath: &Path, sha1: &Checksum, md5: &Checksum) -> Result<()> {
        if !sha1.is_sha1() || md5.is_sha1() {
            return Err(WcError::InvalidArgument("pristine_install needs a SHA-1 and an MD5 checksum".into()));
        }
        let (seg, _) = self.parse(tempfile_abspath)?;
        let size = fs::metadata(tempfile_abspath)
            .map_err(|e| WcError::io(tempfile_abspath, e))?
            .len();

        let dest = blob_path(&seg.pristine_dir(), sha1);
        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir).map_err(|e| WcError::io(dir, e))?;
        }
        if dest.exists() {
            // Same content is already stored; the temp copy is redundant.
            if let Err(e) = fs::remove_file(tempfile_abspath) {
                tracing::warn!("Failed to remove {:?}: {}", tempfile_abspath, e);
            }
        } else {
            fs::rename(tempfile_abspath, &dest).map_err(|e| WcError::io(&dest, e))?;
        }

        seg.conn()
            .prepare_cached("INSERT OR IGNORE INTO pristine (checksum, md5_checksum, size) VALUES (?1, ?2, ?3)")?
            .execute(rusqlite::params![sha1.to_db(), md5.to_db(), size as i64])?;
        tracing::debug!("Installed pristine {} ({} bytes)", sha1, size);
        Ok(())
    }

    /// Write `contents` to a temp file of the segment holding `wri_abspath`
    /// and install it. Returns the SHA-1 and MD5 checksums.
    pub fn pristine_install_contents(&self, wri_abspath: &Path, contents: &[u8]) -> Result<(Checksum, Checksum)> {
        let tmp_dir = self.temp_wcroot_tempdir(wri_abspath)?;
        let tmp = tmp_dir.join(format!("pristine-{}.tmp", uuid::Uuid::new_v4()));
        let mut file = fs::File::create(&tmp).map_err(|e| WcError::io(&tmp, e))?;
        file.write_all(contents).map_err(|e| WcError::io(&tmp, e))?;
        file.sync_all().map_err(|e| WcError::io(&tmp, e))?;
        drop(file);

        let sha1 = Checksum::sha1_of(contents);
        let md5 = Checksum::md5_of(contents);
        self.pristine_install(&tmp, &sha1, &md5)?;
        Ok((sha1, md5))
    }

    /// Translate an MD5 checksum to the SHA-1 key of the same text
    pub fn pristine_get_sha1(&self, wri_abspath: &Path, checksum: &Checksum) -> Result<Checksum> {
        let (seg, _) = self.parse(wri_abspath)?;
        let found = conn_lookup_sha1(&seg.conn(), checksum)?;
        found.ok_or_else(|| WcError::Missing(checksum.to_db()))
    }

    pub fn pristine_get_md5(&self, wri_abspath: &Path, sha1: &Checksum) -> Result<Checksum> {
        let (seg, _) = self.parse(wri_abspath)?;
        let found = conn_md5_of(&seg.conn(), sha1)?;
        found.ok_or_else(|| WcError::Missing(sha1.to_db()))
    }

    pub fn pristine_get_path(&self, wri_abspath: &Path, checksum: &Checksum) -> Result<PathBuf> {
        let (seg, _) = self.parse(wri_abspath)?;
        let sha1 = conn_lookup_sha1(&seg.conn(), checksum)?.ok_or_else(|| WcError::Missing(checksum.to_db()))?;
        Ok(blob_path(&seg.pristine_dir(), &sha1))
    }

    pub fn pristine_read(&self, wri_abspath: &Path, checksum: &Checksum) -> Result<Bytes> {
        let path = self.pristine_get_path(wri_abspath, checksum)?;
        match fs::read(&path) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(WcError::Corrupt(format!(
                "Pristine text {} is recorded but missing on disk",
                checksum
            ))),
            Err(e) => Err(WcError::io(&path, e)),
        }
    }

    /// Whether the text is installed. The table row and the blob must agree.
    pub fn pristine_check(&self, wri_abspath: &Path, checksum: &Checksum) -> Result<bool> {
        let (seg, _) = self.parse(wri_abspath)?;
        let recorded = conn_lookup_sha1(&seg.conn(), checksum)?;
        match recorded {
            Some(sha1) => {
                if blob_path(&seg.pristine_dir(), &sha1).is_file() {
                    Ok(true)
                } else {
                    Err(WcError::Corrupt(format!("Pristine text {} is recorded but missing on disk", sha1)))
                }
            }
            None => {
                if checksum.is_sha1() && blob_path(&seg.pristine_dir(), checksum).exists() {
                    Err(WcError::Corrupt(format!("Pristine text {} is on disk but not recorded", checksum)))
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Delete a text unless any node still cites it by SHA-1 or MD5
    pub fn pristine_remove(&self, wri_abspath: &Path, checksum: &Checksum) -> Result<()> {
        let (seg, _) = self.parse(wri_abspath)?;
        let conn = seg.conn();
        let Some(sha1) = conn_lookup_sha1(&conn, checksum)? else {
            return Ok(());
        };
        let md5 = conn_md5_of(&conn, &sha1)?;
        let refs = conn_reference_count(&conn, &sha1, md5.as_ref())?;
        if refs > 0 {
            tracing::debug!("Keeping pristine {}: {} references", sha1, refs);
            return Ok(());
        }

        conn.execute("DELETE FROM pristine WHERE checksum = ?1", [sha1.to_db()])?;
        drop(conn);
        let path = blob_path(&seg.pristine_dir(), &sha1);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(WcError::io(&path, e)),
        }
        tracing::debug!("Removed pristine {}", sha1);
        Ok(())
    }

    /// Re-fetching a damaged text needs the repository layer
    pub fn pristine_repair(&self, _wri_abspath: &Path, _checksum: &Checksum) -> Result<()> {
        Err(WcError::NotImplemented("pristine_repair"))
    }

    /// Make sure the segment of `dst_abspath` holds the text that the segment
    /// of `src_abspath` stores under `sha1`
    pub(crate) fn pristine_transfer(&self, src_abspath: &Path, dst_abspath: &Path, sha1: &Checksum) -> Result<()> {
        if self.pristine_check(dst_abspath, sha1)? {
            return Ok(());
        }
        let data = self.pristine_read(src_abspath, sha1)?;
        let (installed, _) = self.pristine_install_contents(dst_abspath, &data)?;
        if &installed != sha1 {
            return Err(WcError::Corrupt(format!("Pristine text {} does not match its checksum", sha1)));
        }
        Ok(())
    }
}
