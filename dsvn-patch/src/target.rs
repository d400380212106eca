//! Patch targets
//!
//! A target is the working file a patch applies to, together with the
//! scratch files the patched text and rejected hunks are written to
//! before anything in the working copy changes.

use crate::error::{PatchError, Result};
use crate::lines::TargetContent;
use crate::parse::{Patch, canonicalize_dirent};
use crate::PatchOptions;
use dsvn_wc::node::{self, NodeStatus};
use dsvn_wc::translate::{self, EolStyle, KeywordMap, NATIVE_EOL, TranslatingWriter};
use dsvn_wc::{Kind, WcDb, WcError, paths, svn_props};
use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub(crate) type TargetReader = TargetContent<BufReader<File>>;

pub(crate) struct PatchTarget {
    /// Path as named in the patch, canonicalized
    pub canon_path: String,
    pub local_relpath: String,
    pub local_abspath: Option<PathBuf>,
    pub db_kind: Option<Kind>,
    pub kind_on_disk: Option<Kind>,
    pub locally_deleted: bool,
    pub skipped: bool,
    pub filtered: bool,
    pub had_rejects: bool,
    pub local_mods: bool,
    pub executable: bool,
    pub added: bool,
    pub deleted: bool,
    pub replaced: bool,
    pub eol_style: EolStyle,
    /// Present when the target file exists on disk
    pub content: Option<TargetReader>,
    pub patched: Option<TranslatingWriter<File>>,
    pub patched_file: Option<NamedTempFile>,
    pub reject_file: Option<NamedTempFile>,
}

impl PatchTarget {
    fn new(canon_path: String) -> Self {
        Self {
            canon_path,
            local_relpath: String::new(),
            local_abspath: None,
            db_kind: None,
            kind_on_disk: None,
            locally_deleted: false,
            skipped: false,
            filtered: false,
            had_rejects: false,
            local_mods: false,
            executable: false,
            added: false,
            deleted: false,
            replaced: false,
            eol_style: EolStyle::None,
            content: None,
            patched: None,
            patched_file: None,
            reject_file: None,
        }
    }

    /// Path used in notifications
    pub fn display_path(&self) -> PathBuf {
        match &self.local_abspath {
            Some(p) => p.clone(),
            None => PathBuf::from(&self.canon_path),
        }
    }

    pub fn patched_path(&self) -> Option<&Path> {
        self.patched_file.as_ref().map(|f| f.path())
    }

    pub fn reject_path(&self) -> Option<&Path> {
        self.reject_file.as_ref().map(|f| f.path())
    }

    /// Terminator for lines taken from the patch when the target has an
    /// eol style
    pub fn style_eol(&self) -> Option<&[u8]> {
        match &self.content {
            Some(content) if !matches!(content.eol_style(), EolStyle::None) => Some(content.eol_str()),
            _ => self.eol_style.eol(),
        }
    }

    /// Flush the patched text and hand back the scratch files. They are
    /// left on disk unless `remove`.
    pub fn close_streams(&mut self) -> Result<()> {
        if let Some(writer) = self.patched.take() {
            let path = self.patched_path().map(Path::to_path_buf).unwrap_or_default();
            let mut file = writer.finish().map_err(|e| PatchError::write(&path, e))?;
            file.flush().map_err(|e| PatchError::write(&path, e))?;
        }
        if let Some(reject) = self.reject_file.as_mut() {
            reject.flush().map_err(|e| PatchError::write(reject.path().to_path_buf(), e))?;
        }
        Ok(())
    }

    pub fn release_tempfiles(&mut self, remove: bool) {
        if remove {
            return;
        }
        for file in [self.patched_file.take(), self.reject_file.take()].into_iter().flatten() {
            match file.keep() {
                Ok((_, path)) => tracing::info!("Kept patch scratch file {:?}", path),
                Err(e) => tracing::warn!("Failed to keep patch scratch file: {}", e),
            }
        }
    }
}

/// Drop the first `count` components of `path`. The root of an absolute
/// path counts as a component.
pub fn strip_path(path: &str, count: usize) -> Result<String> {
    let mut components: Vec<&str> = Vec::new();
    if path.starts_with('/') {
        components.push("");
    }
    components.extend(path.split('/').filter(|c| !c.is_empty()));
    if count >= components.len() {
        return Err(PatchError::BadStripCount { count, path: path.to_string() });
    }
    Ok(components[count..].join("/"))
}

fn follow_kind(path: &Path) -> Result<Option<Kind>> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(Some(Kind::Dir)),
        Ok(meta) if meta.is_file() => Ok(Some(Kind::File)),
        Ok(_) => Ok(Some(Kind::Unknown)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(WcError::io(path, e).into()),
    }
}

fn skip(target: &mut PatchTarget, reason: &str) {
    tracing::debug!("Skipping '{}': {}", target.canon_path, reason);
    target.skipped = true;
}

/// Work out which working-copy node the patch names and whether it may be
/// patched at all
pub(crate) fn resolve_target_path(
    db: &WcDb,
    target: &mut PatchTarget,
    path_from_patchfile: &str,
    strip_count: usize,
    wc_root: &Path,
) -> Result<()> {
    target.canon_path = canonicalize_dirent(path_from_patchfile);
    if target.canon_path.is_empty() {
        skip(target, "empty path");
        return Ok(());
    }

    let stripped = if strip_count > 0 {
        strip_path(&target.canon_path, strip_count)?
    } else {
        target.canon_path.clone()
    };

    target.local_relpath = if stripped.starts_with('/') {
        match paths::abspath_skip_ancestor(wc_root, Path::new(&stripped)) {
            Some(relpath) => relpath,
            None => {
                skip(target, "not inside the working copy");
                return Ok(());
            }
        }
    } else {
        stripped
    };

    let Some(local_abspath) = paths::is_under_root(wc_root, &target.local_relpath) else {
        skip(target, "escapes the working copy");
        return Ok(());
    };

    let status = node::node_status(db, &local_abspath)?;
    if matches!(
        status,
        NodeStatus::Ignored | NodeStatus::Unversioned | NodeStatus::Missing | NodeStatus::Obstructed
    ) {
        target.local_abspath = Some(local_abspath);
        skip(target, "not a versioned file in place");
        return Ok(());
    }

    target.kind_on_disk = follow_kind(&local_abspath)?;
    target.locally_deleted = match node::is_status_deleted(db, &local_abspath) {
        Ok(deleted) => deleted,
        Err(WcError::NotFound(_)) | Err(WcError::NotWorkingCopy(_)) => false,
        Err(e) => return Err(e.into()),
    };
    target.db_kind = node::read_node_kind(db, &local_abspath, false)?;
    target.local_abspath = Some(local_abspath);

    if target.db_kind == Some(Kind::Dir) {
        skip(target, "is a directory");
    } else if target.locally_deleted && target.kind_on_disk.is_some() {
        // Replacing a deleted node that is still on disk is not supported.
        skip(target, "locally deleted but present");
    }
    Ok(())
}

fn read_target_props(db: &WcDb, abspath: &Path) -> Result<(EolStyle, KeywordMap)> {
    let props = match db.read_props(abspath) {
        Ok(props) => props,
        Err(WcError::NotFound(_)) => return Ok((EolStyle::None, KeywordMap::new())),
        Err(e) => return Err(e.into()),
    };
    let eol_style = EolStyle::from_props(&props);
    let keywords = if props.contains(svn_props::KEYWORDS) {
        let changed = node::node_changed_info(db, abspath)?;
        let url = node::node_url(db, abspath)?;
        translate::keywords_for(&props, changed.rev, url.as_deref(), changed.date, changed.author.as_deref())
    } else {
        KeywordMap::new()
    };
    Ok((eol_style, keywords))
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    false
}

/// Resolve the target of `patch` and open its content and scratch files
pub(crate) fn init_patch_target(
    db: &WcDb,
    patch: &Patch,
    wc_root: &Path,
    options: &PatchOptions,
) -> Result<PatchTarget> {
    let mut target = PatchTarget::new(patch.new_filename.clone());
    resolve_target_path(db, &mut target, &patch.new_filename, options.strip_count, wc_root)?;
    if target.skipped {
        return Ok(target);
    }
    let Some(abspath) = target.local_abspath.clone() else {
        return Ok(target);
    };

    let mut keywords = KeywordMap::new();
    if target.kind_on_disk == Some(Kind::File) {
        let file = File::open(&abspath).map_err(|e| WcError::io(&abspath, e))?;
        let meta = file.metadata().map_err(|e| WcError::io(&abspath, e))?;
        target.executable = is_executable(&meta);
        (target.eol_style, keywords) = read_target_props(db, &abspath)?;
        target.local_mods = target.db_kind.is_some() && node::text_modified(db, &abspath)?;
        target.content = Some(TargetContent::new(BufReader::new(file), target.eol_style.clone(), keywords.clone()));
    }

    let tmpdir = db.temp_wcroot_tempdir(wc_root)?;
    let patched_file = tempfile::Builder::new()
        .prefix("patch-")
        .suffix(".tmp")
        .tempfile_in(&tmpdir)
        .map_err(|e| WcError::io(&tmpdir, e))?;
    let patched_out = patched_file.as_file().try_clone().map_err(|e| WcError::io(patched_file.path(), e))?;
    target.patched = Some(TranslatingWriter::new(patched_out, &target.eol_style, keywords));
    target.patched_file = Some(patched_file);

    let mut reject_file = tempfile::Builder::new()
        .prefix("reject-")
        .suffix(".tmp")
        .tempfile_in(&tmpdir)
        .map_err(|e| WcError::io(&tmpdir, e))?;
    let mut header = Vec::new();
    header.extend_from_slice(format!("--- {}", target.canon_path).as_bytes());
    header.extend_from_slice(NATIVE_EOL);
    header.extend_from_slice(format!("+++ {}", target.canon_path).as_bytes());
    header.extend_from_slice(NATIVE_EOL);
    reject_file.write_all(&header).map_err(|e| PatchError::write(reject_file.path().to_path_buf(), e))?;
    target.reject_file = Some(reject_file);

    Ok(target)
}
