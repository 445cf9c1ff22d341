//! Build recipe generation
//!
//! Renders a Dockerfile for a resolved `BuildConfig` and writes it into the
//! workspace. The executor only depends on the outcome.

use dockyard_core::domain::build::{BuildConfig, ConfigError, Language};
use std::path::Path;
use tracing::debug;

pub const DOCKERFILE_NAME: &str = "Dockerfile";

/// Produces the build descriptor for a workspace
pub trait RecipeGenerator: Send + Sync {
    fn generate(&self, dir: &Path, config: &BuildConfig) -> Result<(), ConfigError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DockerfileGenerator;

impl DockerfileGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Renders the Dockerfile contents for a configuration
    pub fn render(&self, config: &BuildConfig) -> Result<String, ConfigError> {
        config.validate()?;

        let mut lines = vec![format!("FROM {}", base_image(config.language))];
        lines.push("WORKDIR /app".to_string());
        lines.push("COPY . .".to_string());

        for step in [&config.install_cmd, &config.build_cmd] {
            let step = step.trim();
            if !step.is_empty() {
                lines.push(format!("RUN {}", step));
            }
        }

        for (key, value) in &config.env {
            lines.push(format!("ENV {}={}", key, quote_env(value)));
        }

        lines.push(format!("EXPOSE {}", config.port));
        lines.push(format!(
            "CMD [\"sh\", \"-c\", \"{}\"]",
            escape_json(config.start_cmd.trim())
        ));

        let mut content = lines.join("\n");
        content.push('\n');
        Ok(content)
    }
}

impl RecipeGenerator for DockerfileGenerator {
    fn generate(&self, dir: &Path, config: &BuildConfig) -> Result<(), ConfigError> {
        let content = self.render(config)?;
        let path = dir.join(DOCKERFILE_NAME);

        std::fs::write(&path, content).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })?;

        debug!("Wrote {}", path.display());
        Ok(())
    }
}

fn base_image(language: Language) -> &'static str {
    match language {
        Language::Node => "node:22-alpine",
        Language::Python => "python:3.9",
        Language::Go => "golang:1.20",
        Language::Java => "maven:3.9-eclipse-temurin-17",
    }
}

/// Quotes an `ENV` value when it contains characters Dockerfile would split on
fn quote_env(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| !c.is_whitespace() && c != '"' && c != '\\')
    {
        return value.to_string();
    }
    format!("\"{}\"", escape_json(value))
}

fn escape_json(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}
