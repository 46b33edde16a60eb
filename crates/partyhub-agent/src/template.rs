use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Per-file size cap (characters).
const MAX_TEMPLATE_CHARS: usize = 20_000;

/// Templates shipped with the binary, used when no override file exists.
const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    (
        "generate_tasks_system",
        "You write content for a party game of truth or dare.\n\
         Audience: {{age_group}}. Explicit content allowed: {{explicit}}.\n\
         Write every item in {{language}}. Keep each item to one sentence.\n\
         Answer with a JSON object: {\"truths\": [string], \"dares\": [string]}.",
    ),
    (
        "generate_tasks_user",
        "Category: {{category}}.\n\
         Write {{count}} new truths and {{count}} new dares for this category.",
    ),
];

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template not found: {name}")]
    NotFound { name: String },

    #[error("failed to read template {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Loads a named prompt template and fills in `{{placeholder}}` markers.
pub trait TemplateLoader: Send + Sync {
    fn load_and_replace(
        &self,
        name: &str,
        placeholders: &[(&str, &str)],
    ) -> Result<String, TemplateError>;
}

/// File-backed templates (`<dir>/<name>.md`) with built-in fallbacks.
#[derive(Debug, Clone, Default)]
pub struct PromptTemplates {
    dir: Option<PathBuf>,
}

impl PromptTemplates {
    pub fn new(dir: Option<&str>) -> Self {
        Self {
            dir: dir.map(PathBuf::from),
        }
    }

    fn load(&self, name: &str) -> Result<String, TemplateError> {
        if let Some(dir) = &self.dir {
            let path = dir.join(format!("{name}.md"));
            if path.is_file() {
                return read_capped(&path);
            }
        }

        BUILTIN_TEMPLATES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, body)| body.to_string())
            .ok_or_else(|| TemplateError::NotFound {
                name: name.to_string(),
            })
    }
}

impl TemplateLoader for PromptTemplates {
    fn load_and_replace(
        &self,
        name: &str,
        placeholders: &[(&str, &str)],
    ) -> Result<String, TemplateError> {
        let mut text = self.load(name)?;
        for (key, value) in placeholders {
            text = text.replace(&format!("{{{{{key}}}}}"), value);
        }
        if text.contains("{{") {
            warn!(template = name, "template has unresolved placeholders");
        }
        Ok(text)
    }
}

fn read_capped(path: &Path) -> Result<String, TemplateError> {
    let mut content = std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
        path: path.display().to_string(),
        source,
    })?;
    if content.len() > MAX_TEMPLATE_CHARS {
        warn!(path = %path.display(), "template truncated to {} chars", MAX_TEMPLATE_CHARS);
        let mut cut = MAX_TEMPLATE_CHARS;
        while !content.is_char_boundary(cut) {
            cut -= 1;
        }
        content.truncate(cut);
    }
    debug!(path = %path.display(), "loaded prompt template");
    Ok(content)
}
