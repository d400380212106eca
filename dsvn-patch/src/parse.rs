//! Unified diff parser
//!
//! A patch file holds a sequence of per-file patches. Each starts with a
//! `--- old` / `+++ new` header pair and carries hunks introduced by
//! `@@ -o,ol +m,ml @@`. Anything else between patches (`Index:` lines,
//! property sections, commentary) is skipped.

use crate::error::{PatchError, Result};
use crate::lines::{Line, split_lines};
use std::fs;
use std::path::{Path, PathBuf};

const MINUS: &[u8] = b"--- ";
const PLUS: &[u8] = b"+++ ";
const ATAT: &[u8] = b"@@";

/// One hunk with its original and modified texts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hunk {
    pub original_start: usize,
    pub original_length: usize,
    pub modified_start: usize,
    pub modified_length: usize,
    /// Context lines before the first change
    pub leading_context: usize,
    /// Context lines after the last change
    pub trailing_context: usize,
    diff_text: Vec<Line>,
    original_text: Vec<Line>,
    modified_text: Vec<Line>,
}

impl Hunk {
    /// Raw body lines as they appear in the patch (with `+` and `-`
    /// swapped when parsed in reverse)
    pub fn diff_text(&self) -> &[Line] {
        &self.diff_text
    }

    pub fn original_text(&self) -> &[Line] {
        &self.original_text
    }

    pub fn modified_text(&self) -> &[Line] {
        &self.modified_text
    }
}

/// Changes to one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub old_filename: String,
    pub new_filename: String,
    /// Sorted by `original_start`
    pub hunks: Vec<Hunk>,
}

/// An open patch file, read patch by patch
pub struct PatchFile {
    path: PathBuf,
    lines: Vec<Line>,
    pos: usize,
}

impl PatchFile {
    pub fn open(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|e| PatchError::Wc(dsvn_wc::WcError::io(path, e)))?;
        let mut file = Self::from_bytes(&data);
        file.path = path.to_path_buf();
        Ok(file)
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        Self { path: PathBuf::new(), lines: split_lines(data), pos: 0 }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn at_eof(&self) -> bool {
        match self.lines.get(self.pos) {
            None => true,
            Some(line) => self.pos + 1 == self.lines.len() && line.content.is_empty(),
        }
    }

    /// Next line and whether it is the unterminated last one
    fn read_line(&mut self) -> Option<(&Line, bool)> {
        let index = self.pos;
        if index >= self.lines.len() {
            return None;
        }
        self.pos += 1;
        let eof = self.pos == self.lines.len();
        Some((&self.lines[index], eof))
    }

    /// Parse the next patch. `None` once no further header pair is found.
    pub fn next_patch(&mut self, reverse: bool, ignore_whitespace: bool) -> Option<Patch> {
        if self.at_eof() {
            return None;
        }

        let mut minus_name = None;
        let mut plus_name = None;
        while let Some((line, eof)) = self.read_line() {
            if minus_name.is_some() {
                if let Some(name) = header_filename(&line.content, PLUS) {
                    plus_name = Some(name);
                    break;
                }
                // A `---` line not followed by `+++` is not a header.
                minus_name = None;
            }
            if let Some(name) = header_filename(&line.content, MINUS) {
                minus_name = Some(name);
            }
            if eof {
                break;
            }
        }

        let (Some(minus_name), Some(plus_name)) = (minus_name, plus_name) else {
            return None;
        };
        let (old_filename, new_filename) = if reverse { (plus_name, minus_name) } else { (minus_name, plus_name) };

        let mut hunks = Vec::new();
        while let Some(hunk) = self.next_hunk(reverse, ignore_whitespace) {
            hunks.push(hunk);
        }
        hunks.sort_by_key(|h| h.original_start);
        tracing::debug!("Parsed patch for '{}' with {} hunks", new_filename, hunks.len());
        Some(Patch { old_filename, new_filename, hunks })
    }

    fn next_hunk(&mut self, reverse: bool, ignore_whitespace: bool) -> Option<Hunk> {
        if self.at_eof() {
            return None;
        }
        let (add, del) = if reverse { (b'-', b'+') } else { (b'+', b'-') };

        let mut hunk = Hunk::default();
        let mut in_hunk = false;
        let mut hunk_seen = false;
        let mut changed_line_seen = false;
        let mut original_lines = 0;
        let mut modified_lines = 0;
        let mut start = self.pos;
        let mut end = self.pos;

        loop {
            let line_pos = self.pos;
            let Some((line, eof)) = self.read_line() else {
                end = self.pos;
                break;
            };
            let content = line.content.clone();
            let line_is_empty_eof = eof && content.is_empty();

            if content.first() == Some(&b'\\') {
                if line_is_empty_eof || eof {
                    end = self.pos;
                    break;
                }
                continue;
            }

            if in_hunk {
                if !hunk_seen {
                    start = line_pos;
                }
                let c = content.first().copied().unwrap_or(0);
                if original_lines > 0
                    && modified_lines > 0
                    && (c == b' ' || (!eof && content.is_empty()) || (ignore_whitespace && c != del && c != add))
                {
                    hunk_seen = true;
                    original_lines -= 1;
                    modified_lines -= 1;
                    if changed_line_seen {
                        hunk.trailing_context += 1;
                    } else {
                        hunk.leading_context += 1;
                    }
                } else if original_lines > 0 && c == del {
                    hunk_seen = true;
                    changed_line_seen = true;
                    hunk.trailing_context = 0;
                    original_lines -= 1;
                } else if modified_lines > 0 && c == add {
                    hunk_seen = true;
                    changed_line_seen = true;
                    hunk.trailing_context = 0;
                    modified_lines -= 1;
                } else {
                    // First line past the hunk; the next parse starts here.
                    end = line_pos;
                    self.pos = line_pos;
                    break;
                }
            } else if content.starts_with(ATAT) {
                if let Some(ranges) = parse_hunk_header(&content, reverse) {
                    (hunk.original_start, hunk.original_length, hunk.modified_start, hunk.modified_length) = ranges;
                    original_lines = hunk.original_length;
                    modified_lines = hunk.modified_length;
                    in_hunk = true;
                }
            } else if content.starts_with(MINUS) {
                // Header of the next patch
                self.pos = line_pos;
                break;
            }

            if line_is_empty_eof || eof {
                end = self.pos;
                break;
            }
        }

        if !hunk_seen || start >= end {
            return None;
        }
        self.fill_texts(&mut hunk, start, end, reverse);
        Some(hunk)
    }

    /// Build the three texts of a hunk from its body lines
    fn fill_texts(&self, hunk: &mut Hunk, start: usize, end: usize, reverse: bool) {
        #[derive(Clone, Copy)]
        enum Last {
            None,
            Original,
            Modified,
            Both,
        }
        let mut original: Vec<Line> = Vec::new();
        let mut modified: Vec<Line> = Vec::new();
        let mut last = Last::None;

        for line in &self.lines[start..end] {
            let c = line.content.first().copied();
            match c {
                Some(b'\\') => {
                    // "\ No newline at end of file" belongs to the line before it.
                    if matches!(last, Last::Original | Last::Both) {
                        if let Some(l) = original.last_mut() {
                            l.eol.clear();
                        }
                    }
                    if matches!(last, Last::Modified | Last::Both) {
                        if let Some(l) = modified.last_mut() {
                            l.eol.clear();
                        }
                    }
                }
                Some(b'-') => {
                    original.push(strip_marker(line));
                    last = Last::Original;
                }
                Some(b'+') => {
                    modified.push(strip_marker(line));
                    last = Last::Modified;
                }
                _ => {
                    let stripped = strip_marker(line);
                    original.push(stripped.clone());
                    modified.push(stripped);
                    last = Last::Both;
                }
            }
        }

        let mut diff_text: Vec<Line> = self.lines[start..end].to_vec();
        if reverse {
            for line in &mut diff_text {
                match line.content.first_mut() {
                    Some(c) if *c == b'+' => *c = b'-',
                    Some(c) if *c == b'-' => *c = b'+',
                    _ => {}
                }
            }
            std::mem::swap(&mut original, &mut modified);
        }
        hunk.diff_text = diff_text;
        hunk.original_text = original;
        hunk.modified_text = modified;
    }
}

/// File name of a `--- ` or `+++ ` line, cut at the first tab
fn header_filename(content: &[u8], indicator: &[u8]) -> Option<String> {
    if content.len() <= indicator.len() || !content.starts_with(indicator) {
        return None;
    }
    let name = &content[indicator.len()..];
    let name = match name.iter().position(|&b| b == b'\t') {
        Some(tab) => &name[..tab],
        None => name,
    };
    Some(canonicalize_dirent(&String::from_utf8_lossy(name)))
}

fn strip_marker(line: &Line) -> Line {
    let content = match line.content.first() {
        Some(b' ' | b'+' | b'-') => line.content[1..].to_vec(),
        _ => line.content.clone(),
    };
    Line { content, eol: line.eol.clone() }
}

/// `start[,length]`; a missing length means 1
fn parse_range(range: &str) -> Option<(usize, usize)> {
    if range.is_empty() {
        return None;
    }
    match range.split_once(',') {
        Some((start, length)) if !length.is_empty() => Some((start.parse().ok()?, length.parse().ok()?)),
        Some(_) => None,
        None => Some((range.parse().ok()?, 1)),
    }
}

/// Ranges of `@@ -o[,ol] +m[,ml] @@`, already swapped when `reverse`.
/// Text after the closing `@@` is ignored.
fn parse_hunk_header(header: &[u8], reverse: bool) -> Option<(usize, usize, usize, usize)> {
    let header = std::str::from_utf8(header).ok()?;
    let rest = header.strip_prefix("@@ -")?;
    let (first, rest) = rest.split_once(' ')?;
    let rest = rest.strip_prefix('+')?;
    let (second, rest) = rest.split_once(' ')?;
    if !rest.starts_with("@@") {
        return None;
    }
    let (os, ol) = parse_range(first)?;
    let (ms, ml) = parse_range(second)?;
    if reverse { Some((ms, ml, os, ol)) } else { Some((os, ol, ms, ml)) }
}

/// Canonical dirent: no repeated or trailing separators, no `.` components
pub fn canonicalize_dirent(path: &str) -> String {
    let path = path.trim_end_matches(['\r', '\n']);
    let absolute = path.starts_with('/');
    let joined = path
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect::<Vec<_>>()
        .join("/");
    if absolute { format!("/{}", joined) } else { joined }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = "\
Index: iota
===================================================================
--- iota\t(revision 1)
+++ iota\t(working copy)
@@ -1,3 +1,3 @@
 one
-two
+TWO
 three
@@ -10,2 +10,3 @@ fn context()
 ten
+ten and a half
 eleven
";

    fn contents(lines: &[Line]) -> Vec<String> {
        lines.iter().map(|l| String::from_utf8_lossy(&l.content).into_owned()).collect()
    }

    #[test]
    fn test_parse_simple_patch() {
        let mut file = PatchFile::from_bytes(SIMPLE.as_bytes());
        let patch = file.next_patch(false, false).unwrap();
        assert_eq!(patch.old_filename, "iota");
        assert_eq!(patch.new_filename, "iota");
        assert_eq!(patch.hunks.len(), 2);

        let h = &patch.hunks[0];
        assert_eq!((h.original_start, h.original_length, h.modified_start, h.modified_length), (1, 3, 1, 3));
        assert_eq!((h.leading_context, h.trailing_context), (1, 1));
        assert_eq!(contents(h.original_text()), ["one", "two", "three"]);
        assert_eq!(contents(h.modified_text()), ["one", "TWO", "three"]);
        assert_eq!(h.diff_text().len(), 4);

        let h = &patch.hunks[1];
        assert_eq!(h.original_start, 10);
        assert_eq!(contents(h.modified_text()), ["ten", "ten and a half", "eleven"]);
        assert!(file.next_patch(false, false).is_none());
    }

    #[test]
    fn test_reverse_swaps_everything() {
        let mut file = PatchFile::from_bytes(SIMPLE.as_bytes());
        let patch = file.next_patch(true, false).unwrap();
        let h = &patch.hunks[0];
        assert_eq!(contents(h.original_text()), ["one", "TWO", "three"]);
        assert_eq!(contents(h.modified_text()), ["one", "two", "three"]);
        assert_eq!(h.diff_text()[1].content, b"+two");
        assert_eq!(patch.hunks[1].original_length, 3);
    }

    #[test]
    fn test_multiple_patches_and_missing_lengths() {
        let text = "\
--- a/x
+++ b/x
@@ -5 +5 @@
-old
+new
--- a/y
+++ b/y
@@ -0,0 +1,2 @@
+first
+second
";
        let mut file = PatchFile::from_bytes(text.as_bytes());
        let x = file.next_patch(false, false).unwrap();
        assert_eq!(x.new_filename, "b/x");
        assert_eq!((x.hunks[0].original_length, x.hunks[0].modified_length), (1, 1));

        let y = file.next_patch(false, false).unwrap();
        assert_eq!(y.old_filename, "a/y");
        assert_eq!(y.hunks[0].original_start, 0);
        assert!(y.hunks[0].original_text().is_empty());
        assert_eq!(contents(y.hunks[0].modified_text()), ["first", "second"]);
        assert!(file.next_patch(false, false).is_none());
    }

    #[test]
    fn test_no_newline_marker_strips_terminator() {
        let text = "\
--- f
+++ f
@@ -1,2 +1,2 @@
 keep
-last
\\ No newline at end of file
+LAST
\\ No newline at end of file
";
        let mut file = PatchFile::from_bytes(text.as_bytes());
        let patch = file.next_patch(false, false).unwrap();
        let h = &patch.hunks[0];
        assert_eq!(h.original_text()[1], Line::new("last", ""));
        assert_eq!(h.modified_text()[1], Line::new("LAST", ""));
        assert_eq!(h.modified_text()[0].eol, b"\n");
        assert_eq!(h.diff_text().len(), 5);
    }

    #[test]
    fn test_hunks_are_sorted() {
        let text = "--- f\n+++ f\n@@ -20 +20 @@\n-b\n+B\n@@ -3 +3 @@\n-a\n+A\n";
        let mut file = PatchFile::from_bytes(text.as_bytes());
        let patch = file.next_patch(false, false).unwrap();
        let starts: Vec<_> = patch.hunks.iter().map(|h| h.original_start).collect();
        assert_eq!(starts, [3, 20]);
    }

    #[test]
    fn test_context_in_the_middle_is_not_trailing() {
        let text = "--- f\n+++ f\n@@ -1,4 +1,4 @@\n-a\n+A\n b\n-c\n+C\n d\n";
        let mut file = PatchFile::from_bytes(text.as_bytes());
        let h = &file.next_patch(false, false).unwrap().hunks[0];
        assert_eq!((h.leading_context, h.trailing_context), (0, 1));
    }

    #[test]
    fn test_garbage_is_not_a_patch() {
        let mut file = PatchFile::from_bytes(b"just some text\n--- lonely\nnothing\n");
        assert!(file.next_patch(false, false).is_none());
    }

    #[test]
    fn test_canonicalize_dirent() {
        assert_eq!(canonicalize_dirent("./a//b/"), "a/b");
        assert_eq!(canonicalize_dirent("/abs/./path"), "/abs/path");
        assert_eq!(canonicalize_dirent("."), "");
    }

    #[test]
    fn test_header_ranges() {
        assert_eq!(parse_hunk_header(b"@@ -1,2 +3,4 @@ trailing", false), Some((1, 2, 3, 4)));
        assert_eq!(parse_hunk_header(b"@@ -1,2 +3,4 @@", true), Some((3, 4, 1, 2)));
        assert_eq!(parse_hunk_header(b"@@ -1, +3 @@", false), None);
        assert_eq!(parse_hunk_header(b"@@ -1 +3", false), None);
    }
}
