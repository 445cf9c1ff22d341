//! Build domain types
//!
//! A build is one end-to-end attempt to fetch, package and run a repository.
//! This module holds the request accepted by the intake layer and the
//! resolved configuration the runner packages it with.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of one deployment attempt
///
/// Scopes the build's log conduit for as long as the intake keeps it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(Uuid);

impl BuildId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BuildId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for BuildId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request to build and deploy a repository
///
/// Immutable once accepted. Empty override strings and a zero port mean
/// "use the application type default".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    pub repo_url: String,

    #[serde(default)]
    pub app_type: String,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_cmd: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_cmd: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_cmd: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl BuildRequest {
    pub fn new(repo_url: impl Into<String>, app_type: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            app_type: app_type.into(),
            ..Default::default()
        }
    }
}

/// Application types with known defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
    React,
    NextJs,
    Flask,
    Go,
    Java,
    Node,
    Vite,
}

impl AppType {
    /// Parses an application type tag
    ///
    /// Unrecognized tags resolve to `Node`, matching how untyped
    /// JavaScript projects are usually laid out.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "react" => AppType::React,
            "nextjs" => AppType::NextJs,
            "flask" => AppType::Flask,
            "go" => AppType::Go,
            "java" => AppType::Java,
            "vite" => AppType::Vite,
            _ => AppType::Node,
        }
    }

    /// Default packaging settings for this application type
    pub fn defaults(self) -> AppDefaults {
        match self {
            AppType::React | AppType::Vite => AppDefaults {
                language: Language::Node,
                install_cmd: "npm install",
                build_cmd: "npm run build",
                start_cmd: "npx serve dist",
                port: 3000,
                output_folder: Some("dist"),
            },
            AppType::NextJs => AppDefaults {
                language: Language::Node,
                install_cmd: "npm install",
                build_cmd: "npm run build",
                start_cmd: "npm run start",
                port: 3000,
                output_folder: Some(".next"),
            },
            AppType::Flask => AppDefaults {
                language: Language::Python,
                install_cmd: "pip install -r requirements.txt",
                build_cmd: "",
                start_cmd: "python app.py",
                port: 5000,
                output_folder: None,
            },
            AppType::Go => AppDefaults {
                language: Language::Go,
                install_cmd: "",
                build_cmd: "go build -o app .",
                start_cmd: "./app",
                port: 8080,
                output_folder: None,
            },
            AppType::Java => AppDefaults {
                language: Language::Java,
                install_cmd: "mvn install",
                build_cmd: "mvn package",
                start_cmd: "java -jar target/app.jar",
                port: 8080,
                output_folder: None,
            },
            AppType::Node => AppDefaults {
                language: Language::Node,
                install_cmd: "npm install",
                build_cmd: "",
                start_cmd: "npm start",
                port: 3000,
                output_folder: None,
            },
        }
    }
}

impl fmt::Display for AppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            AppType::React => "react",
            AppType::NextJs => "nextjs",
            AppType::Flask => "flask",
            AppType::Go => "go",
            AppType::Java => "java",
            AppType::Node => "node",
            AppType::Vite => "vite",
        };
        write!(f, "{}", tag)
    }
}

/// Language toolchain the image is built on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Node,
    Python,
    Go,
    Java,
}

/// Static defaults for one application type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppDefaults {
    pub language: Language,
    pub install_cmd: &'static str,
    pub build_cmd: &'static str,
    pub start_cmd: &'static str,
    pub port: u16,
    pub output_folder: Option<&'static str>,
}

/// Build configuration after merging request overrides with type defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    pub app_type: AppType,
    pub language: Language,
    pub install_cmd: String,
    pub build_cmd: String,
    pub start_cmd: String,
    pub port: u16,
    pub output_folder: Option<String>,
    pub env: BTreeMap<String, String>,
}

impl BuildConfig {
    /// Resolves the configuration for a request
    ///
    /// Every explicitly set field wins over the application type default.
    pub fn resolve(request: &BuildRequest) -> Result<Self, ConfigError> {
        let app_type = AppType::from_tag(&request.app_type);
        let defaults = app_type.defaults();

        let config = BuildConfig {
            app_type,
            language: defaults.language,
            install_cmd: coalesce(request.install_cmd.as_deref(), defaults.install_cmd),
            build_cmd: coalesce(request.build_cmd.as_deref(), defaults.build_cmd),
            start_cmd: coalesce(request.start_cmd.as_deref(), defaults.start_cmd),
            port: request.port.filter(|p| *p != 0).unwrap_or(defaults.port),
            output_folder: defaults.output_folder.map(str::to_string),
            env: request.env.clone(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_cmd.trim().is_empty() {
            return Err(ConfigError::MissingCommand("start"));
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if let Some(key) = self.env.keys().find(|k| !is_env_key(k)) {
            return Err(ConfigError::InvalidEnvKey(key.clone()));
        }

        Ok(())
    }
}

fn coalesce(value: Option<&str>, fallback: &str) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => fallback.to_string(),
    }
}

fn is_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Errors raised while resolving or rendering a build configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no {0} command configured")]
    MissingCommand(&'static str),

    #[error("invalid container port {0}")]
    InvalidPort(u16),

    #[error("invalid environment variable name '{0}'")]
    InvalidEnvKey(String),

    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
