//! Source files as the pipeline sees them.

use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    Lf,
    Crlf,
    Mixed,
    /// No line breaks at all
    None,
}

impl LineEnding {
    pub fn detect(text: &str) -> Self {
        let lf = text.matches('\n').count();
        let crlf = text.matches("\r\n").count();
        match (lf, crlf) {
            (0, _) => LineEnding::None,
            (n, c) if c == n => LineEnding::Crlf,
            (_, 0) => LineEnding::Lf,
            _ => LineEnding::Mixed,
        }
    }
}

/// Encoding metadata kept alongside the decoded text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Encoding {
    /// File started with a UTF-8 byte order mark
    pub bom: bool,
    pub line_ending: LineEnding,
}

impl Default for Encoding {
    fn default() -> Self {
        Self {
            bom: false,
            line_ending: LineEnding::Lf,
        }
    }
}

/// One file under remediation.
///
/// `original` never changes after loading; `current` is replaced at the end
/// of every verified iteration.
#[derive(Debug, Clone)]
pub struct SourceFile {
    path: PathBuf,
    original: String,
    current: String,
    encoding: Encoding,
}

impl SourceFile {
    /// Wrap in-memory text. The path is an identity only.
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        let text = text.into();
        let encoding = Encoding {
            bom: false,
            line_ending: LineEnding::detect(&text),
        };
        Self {
            path: path.into(),
            current: text.clone(),
            original: text,
            encoding,
        }
    }

    /// Read and decode `path`. The BOM is stripped from the text and
    /// restored by [`SourceFile::to_bytes`].
    pub fn load(path: &Path) -> io::Result<Self> {
        let bytes = fs::read(path)?;
        Self::from_bytes(path, bytes)
    }

    pub fn from_bytes(path: impl Into<PathBuf>, bytes: Vec<u8>) -> io::Result<Self> {
        let path = path.into();
        let (bom, body) = match bytes.strip_prefix(UTF8_BOM) {
            Some(rest) => (true, rest.to_vec()),
            None => (false, bytes),
        };
        let text = String::from_utf8(body).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not valid UTF-8: {}", path.display(), e.utf8_error()),
            )
        })?;

        let mut file = Self::new(path, text);
        file.encoding.bom = bom;
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn set_current(&mut self, text: String) {
        self.current = text;
    }

    pub fn is_modified(&self) -> bool {
        self.current != self.original
    }

    /// Bytes to write back for the current text.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.current.len() + UTF8_BOM.len());
        if self.encoding.bom {
            out.extend_from_slice(UTF8_BOM);
        }
        out.extend_from_slice(self.current.as_bytes());
        out
    }
}
