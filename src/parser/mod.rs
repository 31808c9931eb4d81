pub mod remote;

#[cfg(test)]
mod tests;

use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

pub use self::remote::RemotePdfParser;
use crate::config::{ParserConfig, PdfBackend};
use crate::{RagError, Result};

/// File extensions with a parser, lower-case
pub const SUPPORTED_EXTENSIONS: [&str; 2] = ["txt", "pdf"];

/// Lower-cased extension of `path`, if it has one
#[inline]
pub fn file_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

/// Reads plain-text files
#[derive(Debug, Clone, Copy, Default)]
pub struct TextParser;

impl TextParser {
    /// File content, decoded lossily when it is not valid UTF-8
    #[inline]
    pub fn parse(&self, path: &Path) -> Result<String> {
        let bytes = fs::read(path)?;
        match String::from_utf8(bytes) {
            Ok(text) => Ok(text),
            Err(e) => {
                warn!(
                    "{} is not valid UTF-8, replacing undecodable bytes",
                    path.display()
                );
                Ok(String::from_utf8_lossy(e.as_bytes()).into_owned())
            }
        }
    }
}

/// In-process PDF text extraction
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalPdfParser;

impl LocalPdfParser {
    #[inline]
    pub fn parse(&self, path: &Path) -> Result<String> {
        let bytes = fs::read(path)?;
        pdf_extract::extract_text_from_mem(&bytes).map_err(|e| {
            RagError::Parse(format!("Failed to extract text from {}: {}", path.display(), e))
        })
    }
}

#[derive(Debug, Clone)]
pub enum PdfParser {
    Local(LocalPdfParser),
    /// Remote extraction job, optionally falling back to local extraction
    Remote {
        remote: RemotePdfParser,
        local_fallback: bool,
    },
}

impl PdfParser {
    /// Pick the backend. A remote backend without an API key fails here
    /// rather than on the first file.
    #[inline]
    pub fn from_config(config: &ParserConfig) -> Result<Self> {
        let remote = match config.pdf_backend {
            PdfBackend::Local => None,
            PdfBackend::Remote => Some(RemotePdfParser::from_config(config)?),
            PdfBackend::Auto => {
                if config.api_key().is_some() {
                    Some(RemotePdfParser::from_config(config)?)
                } else {
                    info!(
                        "No API key in ${}, using local PDF extraction",
                        config.api_key_env
                    );
                    None
                }
            }
        };

        Ok(match remote {
            Some(remote) => Self::Remote {
                remote,
                local_fallback: config.local_fallback,
            },
            None => Self::Local(LocalPdfParser),
        })
    }

    #[inline]
    pub fn parse(&self, path: &Path) -> Result<String> {
        match self {
            Self::Local(local) => local.parse(path),
            Self::Remote {
                remote,
                local_fallback,
            } => match remote.parse(path) {
                Ok(text) => Ok(text),
                Err(e) if *local_fallback => {
                    warn!(
                        "Remote PDF parsing failed for {}, falling back to local extraction: {}",
                        path.display(),
                        e
                    );
                    LocalPdfParser.parse(path)
                }
                Err(e) => Err(e),
            },
        }
    }

    #[inline]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}

/// Dispatches files to a parser by extension
#[derive(Debug, Clone)]
pub struct DocumentParser {
    text: TextParser,
    pdf: PdfParser,
}

impl DocumentParser {
    #[inline]
    pub fn new(pdf: PdfParser) -> Self {
        Self {
            text: TextParser,
            pdf,
        }
    }

    #[inline]
    pub fn from_config(config: &ParserConfig) -> Result<Self> {
        Ok(Self::new(PdfParser::from_config(config)?))
    }

    #[inline]
    pub fn supports(&self, path: &Path) -> bool {
        file_extension(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
    }

    #[inline]
    pub fn pdf_parser(&self) -> &PdfParser {
        &self.pdf
    }

    /// Trimmed text of `path`, or `None` when the file type is unsupported,
    /// the file cannot be read, or nothing but whitespace was extracted
    #[inline]
    pub fn parse(&self, path: &Path) -> Option<String> {
        let result = match file_extension(path).as_deref() {
            Some("txt") => self.text.parse(path),
            Some("pdf") => self.pdf.parse(path),
            other => {
                warn!(
                    "Unsupported file type {:?}: {}",
                    other.unwrap_or(""),
                    path.display()
                );
                return None;
            }
        };

        match result {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    warn!("No text extracted from {}", path.display());
                    None
                } else {
                    debug!(
                        "Parsed {} ({} chars)",
                        path.display(),
                        text.chars().count()
                    );
                    Some(text.to_string())
                }
            }
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        }
    }
}
