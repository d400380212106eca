//! Line-ending and keyword translation between repository normal form and
//! the working file

use crate::properties::{PropertySet, svn_props};
use crate::types::Revnum;
use chrono::{TimeZone, Utc};
use std::collections::BTreeMap;
use std::io::{self, Write};

/// Longest `$Keyword: value $` span that is recognized
const MAX_KEYWORD_LEN: usize = 255;

#[cfg(windows)]
pub const NATIVE_EOL: &[u8] = b"\r\n";
#[cfg(not(windows))]
pub const NATIVE_EOL: &[u8] = b"\n";

/// How a file's line endings are repaired on checkout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EolStyle {
    None,
    Native,
    Fixed(Vec<u8>),
}

impl EolStyle {
    /// Interpret an `svn:eol-style` value; unknown values translate nothing
    pub fn from_prop(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None => EolStyle::None,
            Some("native") => EolStyle::Native,
            Some("LF") => EolStyle::Fixed(b"\n".to_vec()),
            Some("CRLF") => EolStyle::Fixed(b"\r\n".to_vec()),
            Some("CR") => EolStyle::Fixed(b"\r".to_vec()),
            Some(other) => {
                tracing::warn!("Unrecognized svn:eol-style '{}'", other);
                EolStyle::None
            }
        }
    }

    pub fn from_props(props: &PropertySet) -> Self {
        Self::from_prop(props.get_str(svn_props::EOL_STYLE))
    }

    /// Line ending written into the working file, `None` to keep the original
    pub fn eol(&self) -> Option<&[u8]> {
        match self {
            EolStyle::None => None,
            EolStyle::Native => Some(NATIVE_EOL),
            EolStyle::Fixed(eol) => Some(eol),
        }
    }
}

/// Keyword name to expanded value
pub type KeywordMap = BTreeMap<String, Vec<u8>>;

fn format_long_date(micros: i64) -> String {
    match Utc.timestamp_micros(micros).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S +0000 (%a, %d %b %Y)").to_string(),
        None => String::new(),
    }
}

fn format_short_date(micros: i64) -> String {
    match Utc.timestamp_micros(micros).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%SZ").to_string(),
        None => String::new(),
    }
}

/// Build the map for the keywords named in an `svn:keywords` value.
///
/// Naming any alias of a keyword enables all of its aliases.
pub fn build_keywords(
    keywords_prop: &str,
    rev: Option<Revnum>,
    url: Option<&str>,
    date: Option<i64>,
    author: Option<&str>,
) -> KeywordMap {
    let mut map = KeywordMap::new();
    let rev_str = rev.map(|r| r.to_string()).unwrap_or_default();
    let url_str = url.unwrap_or_default();
    let author_str = author.unwrap_or_default();

    for word in keywords_prop.split_whitespace() {
        let aliases: &[&str] = match word {
            "LastChangedRevision" | "Revision" => &["LastChangedRevision", "Revision", "Rev"],
            w if w.eq_ignore_ascii_case("Rev") => &["LastChangedRevision", "Revision", "Rev"],
            "LastChangedDate" => &["LastChangedDate", "Date"],
            w if w.eq_ignore_ascii_case("Date") => &["LastChangedDate", "Date"],
            "LastChangedBy" => &["LastChangedBy", "Author"],
            w if w.eq_ignore_ascii_case("Author") => &["LastChangedBy", "Author"],
            "HeadURL" => &["HeadURL", "URL"],
            w if w.eq_ignore_ascii_case("URL") => &["HeadURL", "URL"],
            w if w.eq_ignore_ascii_case("Id") => &["Id"],
            _ => continue,
        };
        for &name in aliases {
            let value = match name {
                "LastChangedRevision" | "Revision" | "Rev" => rev_str.clone(),
                "LastChangedDate" | "Date" => date.map(format_long_date).unwrap_or_default(),
                "LastChangedBy" | "Author" => author_str.to_string(),
                "HeadURL" | "URL" => url_str.to_string(),
                _ => {
                    let base = url_str.rsplit('/').next().unwrap_or_default();
                    let short = date.map(format_short_date).unwrap_or_default();
                    format!("{} {} {} {}", base, rev_str, short, author_str)
                }
            };
            map.insert(name.to_string(), value.into_bytes());
        }
    }
    map
}

/// Keywords of a node from its properties and last-changed information
pub fn keywords_for(
    props: &PropertySet,
    rev: Option<Revnum>,
    url: Option<&str>,
    date: Option<i64>,
    author: Option<&str>,
) -> KeywordMap {
    match props.get_str(svn_props::KEYWORDS) {
        Some(value) => build_keywords(value, rev, url, date, author),
        None => KeywordMap::new(),
    }
}

/// If `s` starts with a keyword of `keywords`, the index of its closing `$`
/// and the keyword name
fn match_keyword<'a>(s: &[u8], keywords: &'a KeywordMap) -> Option<(usize, &'a str)> {
    let limit = s.len().min(MAX_KEYWORD_LEN);
    let close = s[1..limit].iter().position(|&b| b == b'$')? + 1;
    let inner = &s[1..close];
    if inner.iter().any(|&b| b == b'\n' || b == b'\r') {
        return None;
    }
    let name_end = inner.iter().position(|&b| b == b':').unwrap_or(inner.len());
    let name = std::str::from_utf8(&inner[..name_end]).ok()?;
    let (key, _) = keywords.get_key_value(name)?;
    if name_end < inner.len() {
        // `$Name: value $`: a space after the colon and before the closing `$`.
        let rest = &inner[name_end + 1..];
        if rest.first() != Some(&b' ') || rest.last() != Some(&b' ') {
            return None;
        }
    }
    Some((close, key.as_str()))
}

fn translate_keywords(line: &[u8], keywords: &KeywordMap, expand: bool) -> Vec<u8> {
    if keywords.is_empty() || !line.contains(&b'$') {
        return line.to_vec();
    }
    let mut out = Vec::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        if line[i] == b'$' {
            if let Some((close, name)) = match_keyword(&line[i..], keywords) {
                out.push(b'$');
                out.extend_from_slice(name.as_bytes());
                match keywords.get(name) {
                    Some(value) if expand && !value.is_empty() => {
                        out.extend_from_slice(b": ");
                        out.extend_from_slice(value);
                        out.extend_from_slice(b" $");
                    }
                    _ => out.push(b'$'),
                }
                i += close + 1;
                continue;
            }
        }
        out.push(line[i]);
        i += 1;
    }
    out
}

/// `$Rev$` becomes `$Rev: 42 $`; existing expansions are refreshed
pub fn expand_keywords(line: &[u8], keywords: &KeywordMap) -> Vec<u8> {
    translate_keywords(line, keywords, true)
}

/// `$Rev: 42 $` becomes `$Rev$`
pub fn contract_keywords(line: &[u8], keywords: &KeywordMap) -> Vec<u8> {
    translate_keywords(line, keywords, false)
}

/// Writer that repairs line endings and expands keywords on the way to `inner`.
///
/// Partial lines are buffered; call [`TranslatingWriter::finish`] to write
/// the last line.
pub struct TranslatingWriter<W: Write> {
    inner: W,
    eol: Option<Vec<u8>>,
    keywords: KeywordMap,
    expand: bool,
    pending: Vec<u8>,
}

impl<W: Write> TranslatingWriter<W> {
    pub fn new(inner: W, eol: &EolStyle, keywords: KeywordMap) -> Self {
        Self { inner, eol: eol.eol().map(<[u8]>::to_vec), keywords, expand: true, pending: Vec::new() }
    }

    /// Translate to repository normal form: `\n` endings for files with an
    /// eol style, contracted keywords
    pub fn to_normal_form(inner: W, eol: &EolStyle, keywords: KeywordMap) -> Self {
        let eol = match eol {
            EolStyle::None => None,
            _ => Some(b"\n".to_vec()),
        };
        Self { inner, eol, keywords, expand: false, pending: Vec::new() }
    }

    fn emit_line(&mut self, content_len: usize, eol_len: usize) -> io::Result<()> {
        let content = translate_keywords(&self.pending[..content_len], &self.keywords, self.expand);
        self.inner.write_all(&content)?;
        if eol_len > 0 {
            match &self.eol {
                Some(eol) => self.inner.write_all(eol)?,
                None => self.inner.write_all(&self.pending[content_len..content_len + eol_len])?,
            }
        }
        self.pending.drain(..content_len + eol_len);
        Ok(())
    }

    /// Emit every complete line in `pending`
    fn drain_lines(&mut self) -> io::Result<()> {
        loop {
            let Some(pos) = self.pending.iter().position(|&b| b == b'\n' || b == b'\r') else {
                return Ok(());
            };
            let eol_len = if self.pending[pos] == b'\r' {
                match self.pending.get(pos + 1) {
                    Some(b'\n') => 2,
                    Some(_) => 1,
                    // A trailing CR may still become CRLF.
                    None => return Ok(()),
                }
            } else {
                1
            };
            self.emit_line(pos, eol_len)?;
        }
    }

    /// Write out any buffered partial line and return the inner writer
    pub fn finish(mut self) -> io::Result<W> {
        if let Some(pos) = self.pending.iter().position(|&b| b == b'\r') {
            if pos + 1 == self.pending.len() {
                self.emit_line(pos, 1)?;
            }
        }
        if !self.pending.is_empty() {
            let len = self.pending.len();
            self.emit_line(len, 0)?;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for TranslatingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        self.drain_lines()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Translate a whole buffer into working-file form
pub fn translate_bytes(data: &[u8], eol: &EolStyle, keywords: &KeywordMap) -> io::Result<Vec<u8>> {
    let mut writer = TranslatingWriter::new(Vec::with_capacity(data.len()), eol, keywords.clone());
    writer.write_all(data)?;
    writer.finish()
}

/// Translate a working file's contents back into repository normal form
pub fn normalize_bytes(data: &[u8], eol: &EolStyle, keywords: &KeywordMap) -> io::Result<Vec<u8>> {
    let mut writer = TranslatingWriter::to_normal_form(Vec::with_capacity(data.len()), eol, keywords.clone());
    writer.write_all(data)?;
    writer.finish()
}
