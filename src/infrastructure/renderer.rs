//! Manifest rendering
//!
//! Templates are minijinja documents looked up by id in the templates
//! directory. Ids that point at an existing file (local overrides) are read
//! from that path instead.

use minijinja::{Environment, Error as TemplateError, ErrorKind, Value};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::RenderError;

/// `render(template, data) -> text`
pub trait ManifestRenderer: Send + Sync {
    /// Render one template id with `context`
    fn render(&self, id: &str, context: &Value) -> Result<String, RenderError>;

    /// Render templates in order into one multi-document YAML stream,
    /// skipping templates that render to nothing
    fn render_all(&self, ids: &[String], context: &Value) -> Result<String, RenderError> {
        let mut stream = String::new();
        for id in ids {
            let rendered = self.render(id, context)?;
            let document = rendered.trim_end();
            if document.trim().is_empty() {
                continue;
            }
            if !document.starts_with("---") {
                stream.push_str("---\n");
            }
            stream.push_str(document);
            stream.push('\n');
        }
        Ok(stream)
    }
}

/// minijinja backed renderer
pub struct TemplateRenderer {
    templates_dir: PathBuf,
    env: Environment<'static>,
}

impl TemplateRenderer {
    pub fn new(templates_dir: impl Into<PathBuf>) -> Self {
        let templates_dir = templates_dir.into();
        let mut env = Environment::new();
        // partials such as `_pod.yaml` are included by name
        env.set_loader(minijinja::path_loader(templates_dir.clone()));
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_keep_trailing_newline(true);
        env.add_filter("to_json", to_json);
        Self { templates_dir, env }
    }

    fn source_path(&self, id: &str) -> PathBuf {
        let as_path = Path::new(id);
        if as_path.is_file() {
            as_path.to_path_buf()
        } else {
            self.templates_dir.join(id)
        }
    }

    /// Render a template source directly
    pub fn render_str<S: Serialize>(
        &self,
        id: &str,
        source: &str,
        data: S,
    ) -> Result<String, RenderError> {
        self.env
            .render_str(source, data)
            .map_err(|e| RenderError::Template {
                id: id.to_string(),
                message: format!("{:#}", e),
            })
    }
}

impl ManifestRenderer for TemplateRenderer {
    fn render(&self, id: &str, context: &Value) -> Result<String, RenderError> {
        let path = self.source_path(id);
        debug!("Rendering {} from {}", id, path.display());
        if !path.is_file() {
            return Err(RenderError::TemplateNotFound { id: id.to_string() });
        }
        let source = std::fs::read_to_string(&path).map_err(|source| RenderError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.render_str(id, &source, context)
    }
}

/// Serialize any value as inline JSON, which YAML accepts verbatim
fn to_json(value: Value) -> Result<String, TemplateError> {
    serde_json::to_string(&value)
        .map_err(|e| TemplateError::new(ErrorKind::InvalidOperation, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn renderer_with(files: &[(&str, &str)]) -> (tempfile::TempDir, TemplateRenderer) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        let renderer = TemplateRenderer::new(dir.path());
        (dir, renderer)
    }

    #[test]
    fn test_render_all_joins_documents_and_skips_empty() {
        let (_dir, renderer) = renderer_with(&[
            ("service.yaml", "kind: Service\nmetadata:\n  name: {{ name }}\n"),
            ("empty.yaml", "{% if false %}kind: Nothing{% endif %}\n"),
            ("namespace.yaml", "---\nkind: Namespace\n"),
        ]);
        let data = Value::from_serialize(BTreeMap::from([("name", "myapp")]));
        let ids = vec![
            "namespace.yaml".to_string(),
            "empty.yaml".to_string(),
            "service.yaml".to_string(),
        ];
        let rendered = renderer.render_all(&ids, &data).unwrap();
        assert_eq!(
            rendered,
            "---\nkind: Namespace\n---\nkind: Service\nmetadata:\n  name: myapp\n"
        );
    }

    #[test]
    fn test_override_path_is_read_directly() {
        let (_dir, renderer) = renderer_with(&[("service.yaml", "builtin\n")]);
        let overrides = tempfile::tempdir().unwrap();
        let path = overrides.path().join("service.yaml");
        std::fs::write(&path, "override {{ name }}\n").unwrap();

        let data = Value::from_serialize(BTreeMap::from([("name", "myapp")]));
        let rendered = renderer.render(path.to_str().unwrap(), &data).unwrap();
        assert_eq!(rendered, "override myapp\n");
    }

    #[test]
    fn test_partials_are_included_from_templates_dir() {
        let (_dir, renderer) = renderer_with(&[
            ("_labels.yaml", "  app: {{ name }}\n"),
            ("deployment.yaml", "labels:\n{% include \"_labels.yaml\" %}\n"),
        ]);
        let data = Value::from_serialize(BTreeMap::from([("name", "myapp")]));
        let rendered = renderer.render("deployment.yaml", &data).unwrap();
        assert_eq!(rendered, "labels:\n  app: myapp\n");
    }

    #[test]
    fn test_missing_template() {
        let (_dir, renderer) = renderer_with(&[]);
        let err = renderer.render("ingress.yaml", &Value::UNDEFINED).unwrap_err();
        assert!(matches!(err, RenderError::TemplateNotFound { .. }));
    }

    #[test]
    fn test_to_json_filter() {
        let (_dir, renderer) = renderer_with(&[]);
        let data = BTreeMap::from([("labels", BTreeMap::from([("app", "x")]))]);
        let rendered = renderer
            .render_str("inline", "{{ labels | to_json }}", &data)
            .unwrap();
        assert_eq!(rendered, r#"{"app":"x"}"#);
    }
}
