//! Rendering template sets into configuration files

use servelet_core::{RuntimeParameters, ServeletError, ServeletResult};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::template::{Escape, Template};
use crate::writer::write_atomic;

/// Where a template's text comes from
#[derive(Debug, Clone)]
pub enum TemplateSource {
    /// Template compiled into the binary
    Builtin(&'static str),
    /// Template read from a file
    File(PathBuf),
    /// Template given as a string
    Inline(String),
}

impl TemplateSource {
    fn load(&self) -> ServeletResult<String> {
        match self {
            TemplateSource::Builtin(text) => Ok(text.to_string()),
            TemplateSource::Inline(text) => Ok(text.clone()),
            TemplateSource::File(path) => std::fs::read_to_string(path).map_err(|e| {
                ServeletError::Config(format!(
                    "Failed to read template {}: {}",
                    path.display(),
                    e
                ))
            }),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    template: Template,
    escape: Escape,
    output: PathBuf,
}

/// One rendered file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub name: String,
    pub path: PathBuf,
    pub contents: String,
}

/// Output of a render: every file of the set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    pub files: Vec<RenderedFile>,
}

impl RenderedConfig {
    /// Rendered file by template name
    pub fn get(&self, name: &str) -> Option<&RenderedFile> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Write every file atomically
    pub fn write(&self) -> ServeletResult<()> {
        for file in &self.files {
            write_atomic(&file.path, file.contents.as_bytes())?;
            info!(template = %file.name, path = %file.path.display(), "Rendered configuration");
        }
        Ok(())
    }
}

/// Renders a set of templates from runtime parameters
///
/// Rendering is all-or-nothing: every template is rendered in memory first,
/// and nothing is written unless all of them succeed.
#[derive(Debug, Clone, Default)]
pub struct ConfigTemplater {
    entries: Vec<Entry>,
}

impl ConfigTemplater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named template rendered to `output`, substituting values verbatim
    pub fn with_template(
        self,
        name: impl Into<String>,
        source: TemplateSource,
        output: impl AsRef<Path>,
    ) -> ServeletResult<Self> {
        self.with_escaped_template(name, source, output, Escape::None)
    }

    /// Add a named template whose substituted values are escaped with `escape`
    pub fn with_escaped_template(
        mut self,
        name: impl Into<String>,
        source: TemplateSource,
        output: impl AsRef<Path>,
        escape: Escape,
    ) -> ServeletResult<Self> {
        let name = name.into();
        let text = source.load()?;
        let template = Template::parse(&text).map_err(|e| match e {
            ServeletError::Template(msg) => ServeletError::Template(format!("{}: {}", name, msg)),
            other => other,
        })?;
        debug!(template = %name, placeholders = ?template.placeholders(), "Loaded template");

        self.entries.push(Entry {
            name,
            template,
            escape,
            output: output.as_ref().to_path_buf(),
        });
        Ok(self)
    }

    /// Render every template in memory
    pub fn render(&self, params: &RuntimeParameters) -> ServeletResult<RenderedConfig> {
        let files = self
            .entries
            .iter()
            .map(|entry| {
                Ok(RenderedFile {
                    name: entry.name.clone(),
                    path: entry.output.clone(),
                    contents: entry.template.render_escaped(params, entry.escape)?,
                })
            })
            .collect::<ServeletResult<Vec<_>>>()?;
        Ok(RenderedConfig { files })
    }

    /// Render every template, then write all files
    pub fn render_to_disk(&self, params: &RuntimeParameters) -> ServeletResult<RenderedConfig> {
        let rendered = self.render(params)?;
        rendered.write()?;
        Ok(rendered)
    }
}
