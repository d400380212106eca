//! Applying a patch file to a working copy
//!
//! Every target is patched into a scratch file first. Only once all hunks
//! have been matched and the result is complete is the working file
//! replaced, added or scheduled for deletion.

use crate::error::{PatchError, Result};
use crate::matcher::{self, HunkInfo};
use crate::notify::{ContentState, HunkNotification, Notification, Notifier, NotifyAction, PatchFilter};
use crate::parse::{Hunk, Patch, PatchFile};
use crate::target::{self, PatchTarget};
use crate::PatchOptions;
use dsvn_wc::cancel::{self, Cancel};
use dsvn_wc::node::{self, NodeStatus};
use dsvn_wc::translate::NATIVE_EOL;
use dsvn_wc::{Kind, WcDb, WcError};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Hooks supplied by the caller
#[derive(Default, Clone, Copy)]
pub struct Callbacks<'a> {
    pub notify: Option<&'a dyn Notifier>,
    pub filter: Option<&'a dyn PatchFilter>,
    pub cancel: Option<&'a dyn Cancel>,
}

impl Callbacks<'_> {
    fn notify(&self, notification: Notification) {
        if let Some(notifier) = self.notify {
            notifier.notify(&notification);
        }
    }

    fn check_cancel(&self) -> Result<()> {
        Ok(cancel::check_cancel(self.cancel)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HunkOutcome {
    pub original_start: usize,
    pub original_length: usize,
    pub modified_start: usize,
    pub modified_length: usize,
    pub matched_line: usize,
    pub rejected: bool,
    pub fuzz: usize,
}

impl HunkOutcome {
    fn new(info: &HunkInfo<'_>) -> Self {
        Self {
            original_start: info.hunk.original_start,
            original_length: info.hunk.original_length,
            modified_start: info.hunk.modified_start,
            modified_length: info.hunk.modified_length,
            matched_line: info.matched_line,
            rejected: info.rejected,
            fuzz: info.fuzz,
        }
    }
}

/// What happened to one target of the patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    pub canon_path: String,
    pub local_abspath: Option<PathBuf>,
    pub skipped: bool,
    pub added: bool,
    pub deleted: bool,
    pub replaced: bool,
    pub had_rejects: bool,
    pub local_mods: bool,
    pub hunks: Vec<HunkOutcome>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    /// Targets in patch order; filtered targets are left out
    pub targets: Vec<TargetOutcome>,
    /// Directories removed because every child was deleted
    pub deleted_dirs: Vec<PathBuf>,
}

impl PatchReport {
    pub fn has_rejects(&self) -> bool {
        self.targets.iter().any(|t| t.had_rejects)
    }
}

fn write_patched(target: &mut PatchTarget, data: &[u8]) -> Result<()> {
    let path = target.patched_path().map(Path::to_path_buf).unwrap_or_default();
    match target.patched.as_mut() {
        Some(writer) => writer.write_all(data).map_err(|e| PatchError::write(path, e)),
        None => Ok(()),
    }
}

/// Copy target lines to the patched text until `line` is reached, or to
/// the end of the file when `line` is 0
fn copy_lines_to_target(target: &mut PatchTarget, line: usize) -> Result<()> {
    loop {
        let Some(content) = target.content.as_mut() else {
            return Ok(());
        };
        if !((content.current_line() < line || line == 0) && !content.is_eof()) {
            return Ok(());
        }
        let mut buf = content.read_line()?;
        if !content.is_eof() {
            buf.extend_from_slice(content.eol_str());
        }
        write_patched(target, &buf)?;
    }
}

/// Append the hunk to the reject file
fn reject_hunk(target: &mut PatchTarget, hunk: &Hunk) -> Result<()> {
    let mut text = format!(
        "@@ -{},{} +{},{} @@",
        hunk.original_start, hunk.original_length, hunk.modified_start, hunk.modified_length
    )
    .into_bytes();
    text.extend_from_slice(NATIVE_EOL);
    for line in hunk.diff_text() {
        text.extend_from_slice(&line.content);
        text.extend_from_slice(&line.eol);
    }
    if let Some(reject) = target.reject_file.as_mut() {
        reject.write_all(&text).map_err(|e| PatchError::write(reject.path().to_path_buf(), e))?;
    }
    target.had_rejects = true;
    Ok(())
}

/// Write the hunk's modified text in place of the matched lines. Context
/// lines within the fuzz margin come from the target. Returns false if the
/// hunk had to be rejected after all.
fn apply_hunk(target: &mut PatchTarget, info: &HunkInfo<'_>) -> Result<bool> {
    let hunk = info.hunk;
    let fuzz = info.fuzz;

    if target.kind_on_disk == Some(Kind::File) {
        copy_lines_to_target(target, info.matched_line + fuzz)?;

        if let Some(content) = target.content.as_mut() {
            // Skip the replaced lines but not trailing context matched with fuzz.
            let line = (content.current_line() + hunk.original_length).saturating_sub(2 * fuzz).max(1);
            content.seek_to_line(line)?;
            if content.current_line() != line && !content.is_eof() {
                reject_hunk(target, hunk)?;
                return Ok(false);
            }
        }
    }

    let style_eol = target.style_eol().map(<[u8]>::to_vec);
    let last = hunk.modified_length.saturating_sub(fuzz);
    for (i, line) in hunk.modified_text().iter().enumerate() {
        let lines_read = i + 1;
        if lines_read <= fuzz || lines_read > last {
            continue;
        }
        let mut buf = line.content.clone();
        if !line.eol.is_empty() {
            match &style_eol {
                Some(eol) => buf.extend_from_slice(eol),
                None => buf.extend_from_slice(&line.eol),
            }
        }
        write_patched(target, &buf)?;
    }
    Ok(true)
}

fn file_size(path: &Path) -> Result<u64> {
    Ok(fs::metadata(path).map_err(|e| WcError::io(path, e))?.len())
}

/// Produce the patched text of one target and decide what installing it
/// means
fn apply_one_patch(
    db: &WcDb,
    patch: &Patch,
    wc_root: &Path,
    options: &PatchOptions,
    callbacks: &Callbacks<'_>,
) -> Result<(PatchTarget, Vec<HunkOutcome>)> {
    let mut target = target::init_patch_target(db, patch, wc_root, options)?;
    if target.skipped {
        return Ok((target, Vec::new()));
    }

    let filtered = match (callbacks.filter, target.patched_path(), target.reject_path()) {
        (Some(filter), Some(patched), Some(reject)) => filter.filter(&target.canon_path, patched, reject)?,
        _ => false,
    };
    if filtered {
        tracing::debug!("Target '{}' filtered out", target.canon_path);
        target.filtered = true;
        return Ok((target, Vec::new()));
    }

    let mut infos = matcher::match_hunks(
        target.content.as_mut(),
        &patch.hunks,
        options.max_fuzz,
        options.ignore_whitespace,
        callbacks.cancel,
    )?;

    for info in &mut infos {
        callbacks.check_cancel()?;
        if info.rejected {
            reject_hunk(&mut target, info.hunk)?;
        } else if !apply_hunk(&mut target, info)? {
            info.rejected = true;
        }
    }

    if target.kind_on_disk == Some(Kind::File) {
        copy_lines_to_target(&mut target, 0)?;
        if target.content.as_ref().is_some_and(|c| !c.is_eof()) {
            // Installing a partial copy would truncate the file.
            target.skipped = true;
        }
    }
    target.close_streams()?;

    let patched_size = match target.patched_path() {
        Some(path) => file_size(path)?,
        None => 0,
    };
    let working_size = match (&target.local_abspath, target.kind_on_disk) {
        (Some(path), Some(Kind::File)) => file_size(path)?,
        _ => 0,
    };
    if patched_size == 0 && working_size > 0 {
        target.deleted = target.db_kind == Some(Kind::File);
    } else if patched_size == 0 && working_size == 0 {
        if target.kind_on_disk.is_none() {
            target.skipped = true;
        }
    } else if patched_size > 0 && working_size == 0 {
        if target.locally_deleted {
            target.replaced = true;
        } else if target.db_kind.is_none() {
            target.added = true;
        }
    }

    Ok((target, infos.iter().map(HunkOutcome::new).collect()))
}

/// Add the versioned directories missing above an added target. Skips the
/// target if anything is in the way.
fn create_missing_parents(
    db: &WcDb,
    target: &mut PatchTarget,
    wc_root: &Path,
    dry_run: bool,
    callbacks: &Callbacks<'_>,
) -> Result<()> {
    let components: Vec<String> =
        target.local_relpath.split('/').filter(|c| !c.is_empty()).map(str::to_string).collect();
    let parents = &components[..components.len().saturating_sub(1)];

    let mut present = 0;
    let mut path = wc_root.to_path_buf();
    for component in parents {
        path.push(component);
        match node::read_node_kind(db, &path, true)? {
            Some(Kind::Dir) | Some(Kind::Subdir) => {
                if node::is_status_deleted(db, &path)? {
                    target.skipped = true;
                    break;
                }
                present += 1;
            }
            Some(_) => {
                target.skipped = true;
                break;
            }
            None => {
                if node::disk_kind(&path)?.is_some() {
                    // Unversioned item in the way
                    target.skipped = true;
                    break;
                }
            }
        }
    }
    if target.skipped {
        tracing::debug!("Cannot create parents of '{}'", target.local_relpath);
        return Ok(());
    }

    let mut path = wc_root.to_path_buf();
    for component in &parents[..present] {
        path.push(component);
    }
    for component in &parents[present..] {
        callbacks.check_cancel()?;
        path.push(component);
        if !dry_run {
            fs::create_dir(&path).map_err(|e| WcError::io(&path, e))?;
            node::add(db, &path)?;
        }
        let mut n = Notification::new(&path, NotifyAction::Add);
        n.kind = Some(Kind::Dir);
        callbacks.notify(n);
    }
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    let mode = perms.mode();
    // Execute bits follow read bits.
    perms.set_mode(mode | ((mode & 0o444) >> 2));
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Copy `from` over `to`, keeping the permissions of an existing `to`
fn copy_contents(from: &Path, to: &Path) -> Result<()> {
    let mut src = File::open(from).map_err(|e| WcError::io(from, e))?;
    let mut dst = File::create(to).map_err(|e| WcError::io(to, e))?;
    io::copy(&mut src, &mut dst).map_err(|e| PatchError::write(to, e))?;
    Ok(())
}

/// Move the patched text into the working copy
fn install_patched_target(
    db: &WcDb,
    target: &mut PatchTarget,
    wc_root: &Path,
    options: &PatchOptions,
    callbacks: &Callbacks<'_>,
) -> Result<()> {
    let Some(abspath) = target.local_abspath.clone() else {
        return Ok(());
    };

    if target.deleted {
        if !options.dry_run {
            node::delete(db, &abspath, false)?;
        }
        return Ok(());
    }

    if target.added {
        let parent_kind = match abspath.parent() {
            Some(parent) => node::read_node_kind(db, parent, false)?,
            None => None,
        };
        if !matches!(parent_kind, Some(Kind::Dir) | Some(Kind::Subdir)) {
            create_missing_parents(db, target, wc_root, options.dry_run, callbacks)?;
        }
    }

    if !options.dry_run && !target.skipped {
        if let Some(patched) = target.patched_path() {
            copy_contents(patched, &abspath)?;
        }
        if target.added || target.replaced {
            node::add(db, &abspath)?;
        }
        if target.executable {
            set_executable(&abspath).map_err(|e| WcError::io(&abspath, e))?;
        }
        tracing::info!("Patched '{}'", abspath.display());
    }
    Ok(())
}

/// Save the reject file next to the target
fn write_out_rejected_hunks(target: &PatchTarget, options: &PatchOptions) -> Result<()> {
    if options.dry_run || !options.keep_reject_files || !target.had_rejects {
        return Ok(());
    }
    let (Some(abspath), Some(reject)) = (&target.local_abspath, target.reject_path()) else {
        return Ok(());
    };
    let mut name = abspath.as_os_str().to_owned();
    name.push(".svnpatch.rej");
    let dest = PathBuf::from(name);
    copy_contents(reject, &dest)?;
    tracing::info!("Rejected hunks of '{}' saved to {:?}", target.canon_path, dest);
    Ok(())
}

fn send_patch_notification(target: &PatchTarget, hunks: &[HunkOutcome], callbacks: &Callbacks<'_>) {
    if callbacks.notify.is_none() {
        return;
    }
    let action = if target.skipped {
        NotifyAction::Skip
    } else if target.deleted {
        NotifyAction::Delete
    } else if target.added || target.replaced {
        NotifyAction::Add
    } else {
        NotifyAction::Patch
    };

    let mut n = Notification::new(target.display_path(), action);
    n.kind = Some(Kind::File);
    n.content_state = Some(if action == NotifyAction::Skip {
        match target.db_kind {
            None | Some(Kind::Unknown) => ContentState::Missing,
            Some(Kind::Dir) => ContentState::Obstructed,
            Some(_) => ContentState::Unknown,
        }
    } else if target.had_rejects {
        ContentState::Conflicted
    } else if target.local_mods {
        ContentState::Merged
    } else {
        ContentState::Changed
    });
    callbacks.notify(n);

    if action != NotifyAction::Patch {
        return;
    }
    for h in hunks {
        let action = if h.rejected { NotifyAction::RejectedHunk } else { NotifyAction::AppliedHunk };
        let mut n = Notification::new(target.display_path(), action);
        n.hunk = Some(HunkNotification {
            original_start: h.original_start,
            original_length: h.original_length,
            modified_start: h.modified_start,
            modified_length: h.modified_length,
            matched_line: h.matched_line,
            fuzz: h.fuzz,
        });
        callbacks.notify(n);
    }
}

fn push_if_unique(dirs: &mut Vec<PathBuf>, dir: PathBuf) {
    if !dirs.contains(&dir) {
        dirs.push(dir);
    }
}

/// True when every child of `dir` is being deleted, either as a target or
/// as a directory already found empty
fn check_dir_empty(db: &WcDb, dir: &Path, deleted_targets: &[PathBuf], deleted_dirs: &[PathBuf]) -> Result<bool> {
    // A working copy root stays, even when empty.
    match db.is_wcroot(dir) {
        Ok(true) => return Ok(false),
        Ok(false) => {}
        Err(WcError::NotFound(_)) | Err(WcError::NotWorkingCopy(_)) => return Ok(false),
        Err(e) => return Err(e.into()),
    }
    let children = node::walk_status(db, dir)?;
    Ok(children
        .iter()
        .filter(|(path, status)| path != dir && !matches!(status, NodeStatus::None | NodeStatus::Deleted))
        .all(|(path, _)| deleted_targets.contains(path) || deleted_dirs.contains(path)))
}

/// Delete the directories left empty by deleted targets, walking upwards
/// as long as parents become empty too
fn delete_empty_dirs(
    db: &WcDb,
    targets: &[TargetOutcome],
    wc_root: &Path,
    dry_run: bool,
    callbacks: &Callbacks<'_>,
) -> Result<Vec<PathBuf>> {
    let deleted_targets: Vec<PathBuf> =
        targets.iter().filter(|t| t.deleted).filter_map(|t| t.local_abspath.clone()).collect();
    if deleted_targets.is_empty() {
        return Ok(Vec::new());
    }

    let mut empty_dirs: Vec<PathBuf> = Vec::new();
    for target in targets {
        callbacks.check_cancel()?;
        let Some(parent) = target.local_abspath.as_deref().and_then(Path::parent) else {
            continue;
        };
        if empty_dirs.iter().any(|d| d == parent) {
            continue;
        }
        if check_dir_empty(db, parent, &deleted_targets, &[])? {
            empty_dirs.push(parent.to_path_buf());
        }
    }
    if empty_dirs.is_empty() {
        return Ok(Vec::new());
    }

    loop {
        let mut again = false;
        let mut next = Vec::new();
        for dir in &empty_dirs {
            callbacks.check_cancel()?;
            match dir.parent() {
                Some(parent) if parent.starts_with(wc_root) && check_dir_empty(db, parent, &deleted_targets, &empty_dirs)? => {
                    push_if_unique(&mut next, parent.to_path_buf());
                    again = true;
                }
                _ => push_if_unique(&mut next, dir.clone()),
            }
        }
        empty_dirs = next;
        if !again {
            break;
        }
    }
    // A directory whose parent is also listed goes with the parent.
    let minimal: Vec<PathBuf> = empty_dirs
        .iter()
        .filter(|d| !empty_dirs.iter().any(|other| other != *d && d.starts_with(other)))
        .cloned()
        .collect();

    for dir in &minimal {
        callbacks.check_cancel()?;
        if !dry_run {
            node::delete(db, dir, false)?;
        }
        let mut n = Notification::new(dir, NotifyAction::Delete);
        n.kind = Some(Kind::Dir);
        callbacks.notify(n);
        tracing::info!("Deleted emptied directory '{}'", dir.display());
    }
    Ok(minimal)
}

/// Apply every patch in `patch_path` to the working copy rooted at
/// `wc_root`. The whole working copy is write-locked for the duration.
pub fn apply_patch_file(
    db: &WcDb,
    patch_path: &Path,
    wc_root: &Path,
    options: &PatchOptions,
    callbacks: &Callbacks<'_>,
) -> Result<PatchReport> {
    if options.max_fuzz > crate::MAX_FUZZ {
        return Err(PatchError::InvalidArgument(format!(
            "fuzz factor {} exceeds the maximum of {}",
            options.max_fuzz,
            crate::MAX_FUZZ
        )));
    }
    let _lock = db.acquire_write_lock(wc_root, -1)?;
    let mut patch_file = PatchFile::open(patch_path)?;
    tracing::info!("Applying {:?} to {:?}", patch_path, wc_root);

    let mut report = PatchReport::default();
    while let Some(patch) = patch_file.next_patch(options.reverse, options.ignore_whitespace) {
        callbacks.check_cancel()?;
        let (mut target, hunks) = apply_one_patch(db, &patch, wc_root, options, callbacks)?;
        if !target.filtered {
            if !target.skipped {
                install_patched_target(db, &mut target, wc_root, options, callbacks)?;
                write_out_rejected_hunks(&target, options)?;
            }
            send_patch_notification(&target, &hunks, callbacks);
            report.targets.push(TargetOutcome {
                canon_path: target.canon_path.clone(),
                local_abspath: target.local_abspath.clone(),
                skipped: target.skipped,
                added: target.added,
                deleted: target.deleted,
                replaced: target.replaced,
                had_rejects: target.had_rejects,
                local_mods: target.local_mods,
                hunks,
            });
        }
        target.release_tempfiles(options.remove_tempfiles);
    }

    report.deleted_dirs = delete_empty_dirs(db, &report.targets, wc_root, options.dry_run, callbacks)?;
    tracing::info!(
        "Patch applied: {} targets, {} with rejects",
        report.targets.len(),
        report.targets.iter().filter(|t| t.had_rejects).count()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsvn_wc::{BaseNode, Depth};
    use std::cell::RefCell;
    use tempfile::TempDir;

    const URL: &str = "svn://example.org/repo";

    struct Fixture {
        tmp: TempDir,
        db: WcDb,
        root: PathBuf,
    }

    fn add_base_file(db: &WcDb, root: &Path, relpath: &str, contents: &[u8]) {
        let abspath = root.join(relpath);
        fs::write(&abspath, contents).unwrap();
        let (sha1, _) = db.pristine_install_contents(root, contents).unwrap();
        db.base_add_file(&abspath, &BaseNode::new(relpath, URL, "uuid", 1), &sha1, Some(contents.len() as i64), &[])
            .unwrap();
    }

    /// `iota` and `A/mu` at r1
    fn checkout() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("wc");
        let db = WcDb::new();
        db.init(&root, "", URL, "uuid", 1, Depth::Infinity).unwrap();
        db.base_add_directory(&root, &BaseNode::new("", URL, "uuid", 1), &["iota".into(), "A".into()], Depth::Infinity, &[])
            .unwrap();
        fs::create_dir(root.join("A")).unwrap();
        db.base_add_directory(&root.join("A"), &BaseNode::new("A", URL, "uuid", 1), &["mu".into()], Depth::Infinity, &[])
            .unwrap();
        add_base_file(&db, &root, "iota", b"This is the file 'iota'.\n");
        add_base_file(&db, &root, "A/mu", b"one\ntwo\nthree\nfour\nfive\n");
        Fixture { tmp, db, root }
    }

    fn run(f: &Fixture, patch: &str, options: &PatchOptions) -> (PatchReport, Vec<Notification>) {
        let patch_path = f.tmp.path().join("change.diff");
        fs::write(&patch_path, patch).unwrap();
        let seen = RefCell::new(Vec::new());
        let notify = |n: &Notification| seen.borrow_mut().push(n.clone());
        let callbacks = Callbacks { notify: Some(&notify), ..Default::default() };
        let report = apply_patch_file(&f.db, &patch_path, &f.root, options, &callbacks).unwrap();
        (report, seen.into_inner())
    }

    const MU_PATCH: &str = "\
Index: A/mu
===================================================================
--- A/mu\t(revision 1)
+++ A/mu\t(working copy)
@@ -2,3 +2,3 @@
 two
-three
+THREE
 four
";

    #[test]
    fn test_modifies_file() {
        let f = checkout();
        let (report, notes) = run(&f, MU_PATCH, &PatchOptions::default());
        assert_eq!(fs::read_to_string(f.root.join("A/mu")).unwrap(), "one\ntwo\nTHREE\nfour\nfive\n");
        assert!(!report.has_rejects());
        assert_eq!(notes[0].action, NotifyAction::Patch);
        assert_eq!(notes[0].content_state, Some(ContentState::Changed));
        assert_eq!(notes[1].action, NotifyAction::AppliedHunk);
        assert_eq!(node::node_status(&f.db, &f.root.join("A/mu")).unwrap(), NodeStatus::Modified);
        assert!(!f.db.wclocked(&f.root).unwrap());
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let f = checkout();
        let options = PatchOptions { dry_run: true, ..Default::default() };
        let (report, _) = run(&f, MU_PATCH, &options);
        assert_eq!(report.targets.len(), 1);
        assert_eq!(fs::read_to_string(f.root.join("A/mu")).unwrap(), "one\ntwo\nthree\nfour\nfive\n");
    }

    #[test]
    fn test_rejected_hunk_writes_reject_file() {
        let f = checkout();
        let patch = "--- iota\n+++ iota\n@@ -1 +1 @@\n-nothing like this\n+replacement\n";
        let (report, notes) = run(&f, patch, &PatchOptions::default());
        assert!(report.has_rejects());
        assert_eq!(notes[0].content_state, Some(ContentState::Conflicted));
        assert_eq!(notes[1].action, NotifyAction::RejectedHunk);
        assert_eq!(fs::read_to_string(f.root.join("iota")).unwrap(), "This is the file 'iota'.\n");

        let reject = fs::read(f.root.join("iota.svnpatch.rej")).unwrap();
        let eol = String::from_utf8_lossy(NATIVE_EOL);
        let expected = format!(
            "--- iota{eol}+++ iota{eol}@@ -1,1 +1,1 @@{eol}-nothing like this\n+replacement\n"
        );
        assert_eq!(String::from_utf8_lossy(&reject), expected);
    }

    #[test]
    fn test_adds_file_with_missing_parents() {
        let f = checkout();
        let patch = "--- B/C/new.txt\n+++ B/C/new.txt\n@@ -0,0 +1,2 @@\n+hello\n+world\n";
        let (report, notes) = run(&f, patch, &PatchOptions::default());
        let new = f.root.join("B/C/new.txt");
        assert!(report.targets[0].added);
        assert_eq!(fs::read_to_string(&new).unwrap(), "hello\nworld\n");
        assert_eq!(node::node_status(&f.db, &f.root.join("B")).unwrap(), NodeStatus::Added);
        assert_eq!(node::node_status(&f.db, &new).unwrap(), NodeStatus::Added);

        let actions: Vec<_> = notes.iter().map(|n| (n.action, n.kind)).collect();
        assert_eq!(
            actions,
            vec![
                (NotifyAction::Add, Some(Kind::Dir)),
                (NotifyAction::Add, Some(Kind::Dir)),
                (NotifyAction::Add, Some(Kind::File)),
            ]
        );
    }

    #[test]
    fn test_deleting_last_file_removes_directory() {
        let f = checkout();
        let patch = "--- A/mu\n+++ A/mu\n@@ -1,5 +0,0 @@\n-one\n-two\n-three\n-four\n-five\n";
        let (report, notes) = run(&f, patch, &PatchOptions::default());
        assert!(report.targets[0].deleted);
        assert_eq!(report.deleted_dirs, vec![f.root.join("A")]);
        assert_eq!(node::node_status(&f.db, &f.root.join("A")).unwrap(), NodeStatus::Deleted);
        assert!(!f.root.join("A").exists());
        assert_eq!(notes.last().map(|n| (n.action, n.kind)), Some((NotifyAction::Delete, Some(Kind::Dir))));
    }

    #[test]
    fn test_unversioned_file_is_skipped() {
        let f = checkout();
        fs::write(f.root.join("stray"), b"x\n").unwrap();
        let patch = "--- stray\n+++ stray\n@@ -1 +1 @@\n-x\n+y\n";
        let (report, notes) = run(&f, patch, &PatchOptions::default());
        assert!(report.targets[0].skipped);
        assert_eq!(notes[0].action, NotifyAction::Skip);
        assert_eq!(notes[0].content_state, Some(ContentState::Missing));
        assert_eq!(fs::read(f.root.join("stray")).unwrap(), b"x\n");
    }

    #[test]
    fn test_filter_leaves_target_out() {
        let f = checkout();
        let patch_path = f.tmp.path().join("change.diff");
        fs::write(&patch_path, MU_PATCH).unwrap();
        let filter = |path: &str, patched: &Path, reject: &Path| {
            assert!(patched.exists() && reject.exists());
            path == "A/mu"
        };
        let callbacks = Callbacks { filter: Some(&filter), ..Default::default() };
        let report = apply_patch_file(&f.db, &patch_path, &f.root, &PatchOptions::default(), &callbacks).unwrap();
        assert!(report.targets.is_empty());
        assert_eq!(fs::read_to_string(f.root.join("A/mu")).unwrap(), "one\ntwo\nthree\nfour\nfive\n");
    }

    #[test]
    fn test_locked_working_copy_fails() {
        let f = checkout();
        let other = WcDb::new();
        let _guard = other.acquire_write_lock(&f.root, 0).unwrap();
        let patch_path = f.tmp.path().join("change.diff");
        fs::write(&patch_path, MU_PATCH).unwrap();
        let err = apply_patch_file(&f.db, &patch_path, &f.root, &PatchOptions::default(), &Callbacks::default())
            .unwrap_err();
        assert!(matches!(err, PatchError::Wc(WcError::Locked(_))));
    }

    #[test]
    fn test_excessive_fuzz_is_refused() {
        let f = checkout();
        let options = PatchOptions { max_fuzz: 9, ..Default::default() };
        let err = apply_patch_file(&f.db, Path::new("unused.diff"), &f.root, &options, &Callbacks::default())
            .unwrap_err();
        assert!(matches!(err, PatchError::InvalidArgument(_)));
    }
}
