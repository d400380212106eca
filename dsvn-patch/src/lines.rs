//! Line-oriented access to patch targets
//!
//! A target is read one line at a time. The stream offset of every line
//! visited is remembered, so seeking back to an earlier line is a single
//! `seek` instead of a re-scan from the top.

use dsvn_wc::translate::{self, EolStyle, KeywordMap};
use std::io::{self, BufRead, Cursor, Seek, SeekFrom};

/// A line split from its terminator. `eol` is empty for a final line
/// without one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Line {
    pub content: Vec<u8>,
    pub eol: Vec<u8>,
}

impl Line {
    pub fn new(content: impl Into<Vec<u8>>, eol: impl Into<Vec<u8>>) -> Self {
        Self { content: content.into(), eol: eol.into() }
    }
}

/// Read one line, accepting `\n`, `\r\n` and a lone `\r` as terminators.
/// Returns the line and whether the stream ended before a terminator.
pub fn read_line_detect_eol<R: BufRead>(reader: &mut R) -> io::Result<(Line, bool)> {
    let mut content = Vec::new();
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok((Line { content, eol: Vec::new() }, true));
        }
        match buf.iter().position(|&b| b == b'\n' || b == b'\r') {
            Some(i) => {
                content.extend_from_slice(&buf[..i]);
                let terminator = buf[i];
                reader.consume(i + 1);
                if terminator == b'\n' {
                    return Ok((Line { content, eol: b"\n".to_vec() }, false));
                }
                let crlf = reader.fill_buf()?.first() == Some(&b'\n');
                if crlf {
                    reader.consume(1);
                    return Ok((Line { content, eol: b"\r\n".to_vec() }, false));
                }
                return Ok((Line { content, eol: b"\r".to_vec() }, false));
            }
            None => {
                let n = buf.len();
                content.extend_from_slice(buf);
                reader.consume(n);
            }
        }
    }
}

/// Split a buffer into lines. The last element is whatever follows the
/// final terminator, possibly empty.
pub fn split_lines(data: &[u8]) -> Vec<Line> {
    let mut cursor = Cursor::new(data);
    let mut lines = Vec::new();
    loop {
        // Reading from memory cannot fail.
        let Ok((line, eof)) = read_line_detect_eol(&mut cursor) else {
            break;
        };
        lines.push(line);
        if eof {
            break;
        }
    }
    lines
}

/// Read position in a target file, counted in 1-based lines
pub struct TargetContent<R> {
    reader: R,
    current_line: usize,
    /// `marks[n]` is the stream offset where line `n + 1` starts
    marks: Vec<u64>,
    eof: bool,
    eol_style: EolStyle,
    /// Terminator used for copied lines: the style's, or the one last read
    eol_str: Vec<u8>,
    keywords: KeywordMap,
}

impl<R: BufRead + Seek> TargetContent<R> {
    pub fn new(reader: R, eol_style: EolStyle, keywords: KeywordMap) -> Self {
        let eol_str = eol_style.eol().map(<[u8]>::to_vec).unwrap_or_default();
        Self { reader, current_line: 1, marks: Vec::new(), eof: false, eol_style, eol_str, keywords }
    }

    pub fn current_line(&self) -> usize {
        self.current_line
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn eol_style(&self) -> &EolStyle {
        &self.eol_style
    }

    pub fn eol_str(&self) -> &[u8] {
        &self.eol_str
    }

    pub fn keywords(&self) -> &KeywordMap {
        &self.keywords
    }

    /// Read the line at the current position with keywords contracted.
    /// Past the end an empty line is returned.
    pub fn read_line(&mut self) -> io::Result<Vec<u8>> {
        if self.eof {
            return Ok(Vec::new());
        }
        if self.current_line == self.marks.len() + 1 {
            let pos = self.reader.stream_position()?;
            self.marks.push(pos);
        }

        let (line, eof) = read_line_detect_eol(&mut self.reader)?;
        self.eof = eof;
        if matches!(self.eol_style, EolStyle::None) {
            self.eol_str = line.eol;
        }
        if !self.eof {
            self.current_line += 1;
        }
        if self.keywords.is_empty() {
            Ok(line.content)
        } else {
            Ok(translate::contract_keywords(&line.content, &self.keywords))
        }
    }

    /// Move to `line`, reading forward when it has not been visited yet.
    /// Stops early at the end of the file.
    pub fn seek_to_line(&mut self, line: usize) -> io::Result<()> {
        let line = line.max(1);
        if line == self.current_line {
            return Ok(());
        }
        let saved_line = self.current_line;
        let saved_eof = self.eof;

        if line <= self.marks.len() {
            self.reader.seek(SeekFrom::Start(self.marks[line - 1]))?;
            self.current_line = line;
        } else {
            while !self.eof && self.current_line < line {
                self.read_line()?;
            }
        }

        if saved_eof && saved_line > self.current_line {
            self.eof = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(data: &[u8]) -> TargetContent<Cursor<Vec<u8>>> {
        TargetContent::new(Cursor::new(data.to_vec()), EolStyle::None, KeywordMap::new())
    }

    #[test]
    fn test_detects_each_terminator() {
        let lines = split_lines(b"a\nb\r\nc\rd");
        assert_eq!(
            lines,
            vec![Line::new("a", "\n"), Line::new("b", "\r\n"), Line::new("c", "\r"), Line::new("d", "")]
        );
        assert_eq!(split_lines(b"x\n").last(), Some(&Line::default()));
    }

    #[test]
    fn test_read_counts_lines_until_eof() {
        let mut t = target(b"one\ntwo\n");
        assert_eq!(t.read_line().unwrap(), b"one");
        assert_eq!(t.current_line(), 2);
        assert_eq!(t.read_line().unwrap(), b"two");
        assert_eq!(t.eol_str(), b"\n");
        assert!(!t.is_eof());
        assert_eq!(t.read_line().unwrap(), b"");
        assert!(t.is_eof());
        assert_eq!(t.current_line(), 3);
    }

    #[test]
    fn test_last_line_without_newline_sets_eof() {
        let mut t = target(b"one\ntwo");
        t.read_line().unwrap();
        assert_eq!(t.read_line().unwrap(), b"two");
        assert!(t.is_eof());
        assert_eq!(t.current_line(), 2);
    }

    #[test]
    fn test_seek_back_uses_marks_and_clears_eof() {
        let mut t = target(b"1\n2\n3\n");
        t.seek_to_line(10).unwrap();
        assert!(t.is_eof());
        assert_eq!(t.current_line(), 4);

        t.seek_to_line(2).unwrap();
        assert!(!t.is_eof());
        assert_eq!(t.current_line(), 2);
        assert_eq!(t.read_line().unwrap(), b"2");
    }

    #[test]
    fn test_fixed_style_keeps_its_terminator() {
        let mut t = TargetContent::new(Cursor::new(b"a\r\n".to_vec()), EolStyle::Fixed(b"\n".to_vec()), KeywordMap::new());
        t.read_line().unwrap();
        assert_eq!(t.eol_str(), b"\n");
    }

    #[test]
    fn test_keywords_are_contracted() {
        let mut keywords = KeywordMap::new();
        keywords.insert("Rev".into(), b"7".to_vec());
        let mut t = TargetContent::new(Cursor::new(b"$Rev: 7 $\n".to_vec()), EolStyle::None, keywords);
        assert_eq!(t.read_line().unwrap(), b"$Rev$");
    }
}
