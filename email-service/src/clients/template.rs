use std::{
    fmt::Display,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, error, info, warn};

const TEMPLATE_EXTENSION: &str = "html";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template '{0}' not found")]
    NotFound(String),

    #[error("template '{name}' could not be read")]
    Unreadable {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("template '{template}' uses {placeholder} but only {provided} arguments were given")]
    UnresolvedPlaceholder {
        template: String,
        placeholder: String,
        provided: usize,
    },
}

/// Source of raw template text, addressed by logical name.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn load(&self, name: &str) -> Result<String, TemplateError>;
}

/// Reads `<root>/<name>.html`.
pub struct FileTemplateStore {
    root: PathBuf,
}

impl FileTemplateStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        info!(template_dir = %root.display(), "File template store initialized");
        Self { root }
    }
}

#[async_trait]
impl TemplateStore for FileTemplateStore {
    async fn load(&self, name: &str) -> Result<String, TemplateError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(TemplateError::NotFound(name.to_string()));
        }

        let path = self.root.join(format!("{}.{}", name, TEMPLATE_EXTENSION));
        debug!(template = name, path = %path.display(), "Loading template");

        tokio::fs::read_to_string(&path).await.map_err(|e| {
            warn!(template = name, path = %path.display(), error = %e, "Error while loading template");
            match e.kind() {
                ErrorKind::NotFound => TemplateError::NotFound(name.to_string()),
                _ => TemplateError::Unreadable {
                    name: name.to_string(),
                    source: e,
                },
            }
        })
    }
}

/// Positional template rendering on top of a [`TemplateStore`], caching the
/// raw text of every template it has loaded.
pub struct TemplateRenderer {
    store: Arc<dyn TemplateStore>,
    cache: DashMap<String, Arc<str>>,
}

impl TemplateRenderer {
    pub fn new(store: Arc<dyn TemplateStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
        }
    }

    /// Renders `name`, replacing every `{N}` with the N-th argument.
    pub async fn render(
        &self,
        name: &str,
        args: &[&(dyn Display + Sync)],
    ) -> Result<String, TemplateError> {
        let text = self.template_text(name).await?;
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();

        debug!(template = name, argument_count = args.len(), "Rendering template");

        substitute(name, &text, &args).inspect_err(|e| {
            error!(template = name, error = %e, "Template does not match its arguments");
        })
    }

    async fn template_text(&self, name: &str) -> Result<Arc<str>, TemplateError> {
        let cached = self.cache.get(name).map(|entry| Arc::clone(entry.value()));
        if let Some(text) = cached {
            return Ok(text);
        }

        let text: Arc<str> = self.store.load(name).await?.into();
        self.cache.insert(name.to_string(), Arc::clone(&text));
        Ok(text)
    }
}

/// Braces that do not enclose a plain index are kept verbatim, so inline CSS
/// and scripts in HTML templates pass through untouched.
fn substitute(template: &str, text: &str, args: &[String]) -> Result<String, TemplateError> {
    let mut rendered = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();

        if digits == 0 || !after[digits..].starts_with('}') {
            rendered.push('{');
            rest = after;
            continue;
        }

        let value = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|index| args.get(index))
            .ok_or_else(|| TemplateError::UnresolvedPlaceholder {
                template: template.to_string(),
                placeholder: format!("{{{}}}", &after[..digits]),
                provided: args.len(),
            })?;

        rendered.push_str(value);
        rest = &after[digits + 1..];
    }

    rendered.push_str(rest);
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn replaces_positional_placeholders() {
        let rendered = substitute(
            "verification",
            "Hi {0}, confirm at {1}. Link expires in {2} minutes. Bye {0}!",
            &args(&["John", "http://test-link.org", "15"]),
        )
        .unwrap();

        assert_eq!(
            rendered,
            "Hi John, confirm at http://test-link.org. Link expires in 15 minutes. Bye John!"
        );
    }

    #[test]
    fn leaves_non_placeholder_braces_alone() {
        let text = "<style>p { color: red; }</style><p>{0}</p>{x}{}{1a}";

        let rendered = substitute("t", text, &args(&["ok"])).unwrap();

        assert_eq!(rendered, "<style>p { color: red; }</style><p>ok</p>{x}{}{1a}");
    }

    #[test]
    fn arguments_are_not_rescanned() {
        let rendered = substitute("t", "{0}", &args(&["{1}"])).unwrap();
        assert_eq!(rendered, "{1}");
    }

    #[test]
    fn out_of_range_placeholder_is_an_error() {
        let error = substitute("order-created", "{0} {3}", &args(&["a", "b"])).unwrap_err();

        match error {
            TemplateError::UnresolvedPlaceholder {
                template,
                placeholder,
                provided,
            } => {
                assert_eq!(template, "order-created");
                assert_eq!(placeholder, "{3}");
                assert_eq!(provided, 2);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn oversized_index_is_an_error() {
        let result = substitute("t", "{99999999999999999999999}", &args(&["a"]));
        assert!(matches!(
            result,
            Err(TemplateError::UnresolvedPlaceholder { .. })
        ));
    }

    #[test]
    fn handles_unclosed_and_trailing_braces() {
        assert_eq!(substitute("t", "a {0", &args(&["x"])).unwrap(), "a {0");
        assert_eq!(substitute("t", "{", &args(&[])).unwrap(), "{");
        assert_eq!(substitute("t", "{{0}}", &args(&["x"])).unwrap(), "{x}");
    }

    #[tokio::test]
    async fn file_store_reports_missing_templates() {
        let store = FileTemplateStore::new(std::env::temp_dir().join("no-such-template-dir"));

        assert!(matches!(
            store.load("verification").await,
            Err(TemplateError::NotFound(_))
        ));
        assert!(matches!(
            store.load("../etc/passwd").await,
            Err(TemplateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn file_store_reads_named_html_file() {
        let dir = std::env::temp_dir().join(format!("email-templates-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("welcome.html"), "<p>Hello {0}</p>")
            .await
            .unwrap();

        let store = FileTemplateStore::new(&dir);
        let text = store.load("welcome").await.unwrap();

        assert_eq!(text, "<p>Hello {0}</p>");

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
