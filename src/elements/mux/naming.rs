//! Output file naming for the muxing node.

use crate::error::{Error, Result};
use chrono::Local;
use chrono::format::{Item, StrftimeItems};
use std::fmt::{self, Write};
use std::path::PathBuf;

/// What a naming callback knows about the file it names.
#[derive(Debug, Clone)]
pub struct FileNameContext {
    /// Zero-based index of the file within this muxer's lifetime.
    pub index: u64,
    /// Whether the file was opened by a manual split.
    pub manual_split: bool,
}

/// Path template: `<dir>/<prefix>[_<timestamp>][_<index>].<extension>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    /// Output directory.
    pub dir: PathBuf,
    /// File name prefix.
    pub prefix: String,
    /// `chrono` format string for a local-time component, if any.
    pub timestamp: Option<String>,
    /// Zero-pad the index to this many digits; 0 omits the index.
    pub index_digits: usize,
    /// Extension without the leading dot.
    pub extension: String,
}

impl Default for PathTemplate {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            prefix: "record".to_string(),
            timestamp: None,
            index_digits: 4,
            extension: "mgf".to_string(),
        }
    }
}

impl PathTemplate {
    /// Set the local-time component, rejecting an invalid chrono format.
    pub fn with_timestamp(mut self, format: impl Into<String>) -> Result<Self> {
        let format = format.into();
        check_time_format(&format)?;
        self.timestamp = Some(format);
        Ok(self)
    }

    /// Check the template for errors that would only show when rendering.
    pub fn validate(&self) -> Result<()> {
        match &self.timestamp {
            Some(format) => check_time_format(format),
            None => Ok(()),
        }
    }

    /// Render the path for a file.
    ///
    /// An invalid timestamp format is left out of the name.
    pub fn render(&self, ctx: &FileNameContext) -> PathBuf {
        let mut name = self.prefix.clone();
        if let Some(format) = &self.timestamp {
            let mut stamp = String::new();
            if write!(stamp, "{}", Local::now().format(format)).is_ok() {
                name.push('_');
                name.push_str(&stamp);
            } else {
                tracing::warn!(format = %format, "invalid timestamp format in file name template");
            }
        }
        if self.index_digits > 0 {
            name.push_str(&format!("_{:0width$}", ctx.index, width = self.index_digits));
        }
        if !self.extension.is_empty() {
            name.push('.');
            name.push_str(&self.extension);
        }
        self.dir.join(name)
    }
}

fn check_time_format(format: &str) -> Result<()> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(Error::Config(format!("invalid timestamp format '{format}'")));
    }
    Ok(())
}

/// Injected naming function.
pub type NamingCallback = Box<dyn FnMut(&FileNameContext) -> PathBuf + Send>;

/// Generates the path of every new output file.
pub enum FileNamer {
    /// Built-in template.
    Template(PathTemplate),
    /// Application-provided function.
    Custom(NamingCallback),
}

impl FileNamer {
    /// Produce the path for the next file.
    pub fn next_path(&mut self, ctx: &FileNameContext) -> PathBuf {
        match self {
            FileNamer::Template(template) => template.render(ctx),
            FileNamer::Custom(callback) => callback(ctx),
        }
    }
}

impl Default for FileNamer {
    fn default() -> Self {
        FileNamer::Template(PathTemplate::default())
    }
}

impl fmt::Debug for FileNamer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileNamer::Template(template) => f.debug_tuple("Template").field(template).finish(),
            FileNamer::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
