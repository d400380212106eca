//! Hunk matching
//!
//! A hunk is looked for at its recorded start line first, then at the
//! closest earlier position, then anywhere after. Each fuzz level lets the
//! outermost context lines differ. Lines already claimed by an earlier
//! hunk are never matched twice.

use crate::error::Result;
use crate::lines::TargetContent;
use crate::parse::Hunk;
use dsvn_wc::cancel::{self, Cancel};
use dsvn_wc::translate;
use std::io::{self, BufRead, Seek};

/// Where a hunk applies, if anywhere
#[derive(Debug, Clone, Copy)]
pub struct HunkInfo<'a> {
    pub hunk: &'a Hunk,
    /// First target line replaced by the hunk; 0 when rejected
    pub matched_line: usize,
    pub rejected: bool,
    pub fuzz: usize,
}

impl HunkInfo<'_> {
    fn claims(&self, line: usize) -> bool {
        !self.rejected && line >= self.matched_line && line < self.matched_line + self.hunk.original_length
    }
}

fn collapse_whitespace(line: &[u8]) -> Vec<u8> {
    line.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect()
}

/// Whether `hunk` matches at the current line. The read position is
/// unchanged afterwards.
pub fn match_hunk<R: BufRead + Seek>(
    content: &mut TargetContent<R>,
    hunk: &Hunk,
    fuzz: usize,
    ignore_whitespace: bool,
) -> io::Result<bool> {
    if content.is_eof() {
        return Ok(false);
    }
    let saved_line = content.current_line();
    let original = hunk.original_text();
    let trailing_fuzz_from = hunk.original_length.checked_sub(fuzz);

    let mut lines_read = 0;
    let mut lines_matched = false;
    let mut hunk_eof;
    loop {
        let hunk_line = original.get(lines_read);
        hunk_eof = hunk_line.is_none();
        lines_read += 1;
        let target_line = content.read_line()?;

        if let Some(hunk_line) = hunk_line {
            let hunk_line = if content.keywords().is_empty() {
                hunk_line.content.clone()
            } else {
                translate::contract_keywords(&hunk_line.content, content.keywords())
            };
            lines_matched = if lines_read <= fuzz && hunk.leading_context > fuzz {
                true
            } else if trailing_fuzz_from.is_some_and(|from| lines_read > from) && hunk.trailing_context > fuzz {
                true
            } else if ignore_whitespace {
                collapse_whitespace(&hunk_line) == collapse_whitespace(&target_line)
            } else {
                hunk_line == target_line
            };
        }
        if !lines_matched || hunk_eof || content.is_eof() {
            break;
        }
    }

    let matched = if hunk_eof {
        lines_matched
    } else if content.is_eof() {
        // A target without a final newline ends before the hunk does.
        lines_matched && original.get(lines_read).is_none()
    } else {
        false
    };
    content.seek_to_line(saved_line)?;
    Ok(matched)
}

/// Scan forward from the current line up to, not including, `upper_line`
/// (0 scans to the end). Returns the first match when `match_first`, the
/// last one otherwise, or 0.
#[allow(clippy::too_many_arguments)]
pub fn scan_for_match<R: BufRead + Seek>(
    content: &mut TargetContent<R>,
    hunk: &Hunk,
    claimed: &[HunkInfo<'_>],
    match_first: bool,
    upper_line: usize,
    fuzz: usize,
    ignore_whitespace: bool,
    cancel: Option<&dyn Cancel>,
) -> Result<usize> {
    let mut matched_line = 0;
    while (content.current_line() < upper_line || upper_line == 0) && !content.is_eof() {
        cancel::check_cancel(cancel)?;
        let current = content.current_line();
        if match_hunk(content, hunk, fuzz, ignore_whitespace)? && !claimed.iter().any(|hi| hi.claims(current)) {
            matched_line = current;
            if match_first {
                break;
            }
        }
        if !content.is_eof() {
            content.seek_to_line(current + 1)?;
        }
    }
    Ok(matched_line)
}

/// Locate `hunk` at one fuzz level. `content` is `None` when the target
/// file does not exist.
pub fn get_hunk_info<'a, R: BufRead + Seek>(
    content: Option<&mut TargetContent<R>>,
    hunk: &'a Hunk,
    claimed: &[HunkInfo<'_>],
    fuzz: usize,
    ignore_whitespace: bool,
    cancel: Option<&dyn Cancel>,
) -> Result<HunkInfo<'a>> {
    let original_start = hunk.original_start;

    let matched_line = match content {
        // Only a file that is not there yet can take a hunk creating it.
        _ if original_start == 0 => usize::from(content.is_none()),
        None => 0,
        Some(content) => {
            let saved_line = content.current_line();
            content.seek_to_line(original_start)?;
            let mut matched_line = if content.current_line() == original_start {
                scan_for_match(content, hunk, claimed, true, original_start + 1, fuzz, ignore_whitespace, cancel)?
            } else {
                0
            };

            if matched_line != original_start {
                // Closest match before the expected position
                content.seek_to_line(1)?;
                matched_line =
                    scan_for_match(content, hunk, claimed, false, original_start, fuzz, ignore_whitespace, cancel)?;

                if matched_line == 0 {
                    // Then the first one after it
                    matched_line = scan_for_match(content, hunk, claimed, true, 0, fuzz, ignore_whitespace, cancel)?;
                }
            }
            content.seek_to_line(saved_line)?;
            matched_line
        }
    };

    Ok(HunkInfo { hunk, matched_line, rejected: matched_line == 0, fuzz })
}

/// Locate every hunk, raising the fuzz level up to `max_fuzz` for hunks
/// that do not match exactly
pub fn match_hunks<'a, R: BufRead + Seek>(
    mut content: Option<&mut TargetContent<R>>,
    hunks: &'a [Hunk],
    max_fuzz: usize,
    ignore_whitespace: bool,
    cancel: Option<&dyn Cancel>,
) -> Result<Vec<HunkInfo<'a>>> {
    let mut infos: Vec<HunkInfo<'a>> = Vec::with_capacity(hunks.len());
    for hunk in hunks {
        let mut fuzz = 0;
        let info = loop {
            let info = get_hunk_info(content.as_deref_mut(), hunk, &infos, fuzz, ignore_whitespace, cancel)?;
            if !info.rejected || fuzz >= max_fuzz {
                break info;
            }
            fuzz += 1;
        };
        if info.rejected {
            tracing::debug!("Hunk @@ -{},{} rejected", hunk.original_start, hunk.original_length);
        } else {
            tracing::debug!(
                "Hunk @@ -{},{} matched at line {} with fuzz {}",
                hunk.original_start,
                hunk.original_length,
                info.matched_line,
                info.fuzz
            );
        }
        infos.push(info);
    }
    Ok(infos)
}
