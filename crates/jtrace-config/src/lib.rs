//! Configuration for the jtrace execution tracer.
//!
//! The config is an optional TOML file:
//!
//! ```toml
//! java = "/usr/lib/jvm/java-21/bin/java"
//! javac = "/usr/lib/jvm/java-21/bin/javac"
//! connect_attempts = 50
//! connect_retry_interval_ms = 100
//! builtin_packages = ["java.", "javax.", "jdk."]
//!
//! [logging]
//! level = "debug"
//! json = false
//! ```
//!
//! Every key is optional; unknown keys are rejected so typos surface early.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer;

/// Environment variable overriding [`TracerConfig::java`].
pub const JAVA_ENV: &str = "JTRACE_JAVA";
/// Environment variable overriding [`TracerConfig::javac`].
pub const JAVAC_ENV: &str = "JTRACE_JAVAC";

/// Type-name prefixes whose instances are shown as opaque stubs instead of
/// having their implementation fields walked.
pub const DEFAULT_BUILTIN_PACKAGES: &[&str] = &[
    "com.sun.",
    "java.",
    "javax.",
    "jdk.",
    "netscape.javascript.",
    "org.ietf.jgss.",
    "org.w3c.dom.",
    "org.xml.sax.",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TracerConfig {
    /// `java` launcher used to run the debuggee.
    #[serde(default = "TracerConfig::default_java")]
    pub java: PathBuf,

    /// `javac` used to compile the submitted source.
    #[serde(default = "TracerConfig::default_javac")]
    pub javac: PathBuf,

    /// How many times to try attaching to the debuggee's JDWP listener.
    #[serde(default = "TracerConfig::default_connect_attempts")]
    pub connect_attempts: u32,

    #[serde(default = "TracerConfig::default_connect_retry_interval_ms")]
    pub connect_retry_interval_ms: u64,

    #[serde(default = "TracerConfig::default_builtin_packages")]
    pub builtin_packages: Vec<String>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TracerConfig {
    fn default_java() -> PathBuf {
        PathBuf::from("java")
    }

    fn default_javac() -> PathBuf {
        PathBuf::from("javac")
    }

    fn default_connect_attempts() -> u32 {
        50
    }

    fn default_connect_retry_interval_ms() -> u64 {
        100
    }

    fn default_builtin_packages() -> Vec<String> {
        DEFAULT_BUILTIN_PACKAGES
            .iter()
            .map(|prefix| (*prefix).to_owned())
            .collect()
    }

    /// Load a config file from TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `JTRACE_JAVA` / `JTRACE_JAVAC` from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var_os(key).map(PathBuf::from))
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<PathBuf>) -> Self {
        if let Some(java) = lookup(JAVA_ENV).filter(|p| !p.as_os_str().is_empty()) {
            self.java = java;
        }
        if let Some(javac) = lookup(JAVAC_ENV).filter(|p| !p.as_os_str().is_empty()) {
            self.javac = javac;
        }
        self
    }

    pub fn connect_retry_interval(&self) -> Duration {
        Duration::from_millis(self.connect_retry_interval_ms)
    }

    /// Whether `type_name` falls in one of the configured standard-library
    /// namespaces.
    pub fn is_builtin_type(&self, type_name: &str) -> bool {
        self.builtin_packages
            .iter()
            .any(|prefix| type_name.starts_with(prefix.as_str()))
    }
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            java: Self::default_java(),
            javac: Self::default_javac(),
            connect_attempts: Self::default_connect_attempts(),
            connect_retry_interval_ms: Self::default_connect_retry_interval_ms(),
            builtin_packages: Self::default_builtin_packages(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// A level (`warn`, `debug`, ...) or a full `EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json: bool,

    /// Append logs to this file instead of stderr.
    ///
    /// If the file cannot be opened, logs fall back to stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "warn".to_owned()
    }

    fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            "off" | "none" => "off".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::WARN.into())
        })
    }

    /// The effective filter: the configured level with `RUST_LOG` merged on top.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            file: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The default `Display` embeds a source snippet; keep just the message.
        ConfigError::Toml(err.message().to_owned())
    }
}

static TRACING_INIT: Once = Once::new();

/// Install the global `tracing` subscriber.
///
/// Logs go to stderr (or the configured file); stdout is reserved for trace
/// documents. Only the first call has an effect.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();
        let writer = LogWriter::new(config.file.as_deref());

        let layer = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Stderr, or an append-mode log file shared between writer handles.
#[derive(Clone)]
struct LogWriter {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl LogWriter {
    fn new(path: Option<&Path>) -> Self {
        let file = path
            .and_then(|path| OpenOptions::new().create(true).append(true).open(path).ok())
            .map(|file| Arc::new(Mutex::new(file)));
        Self { file }
    }
}

enum LogSink {
    Stderr(io::Stderr),
    File(Arc<Mutex<std::fs::File>>),
}

impl io::Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            LogSink::Stderr(stderr) => stderr.write(buf),
            LogSink::File(file) => match file.lock() {
                Ok(mut file) => file.write(buf),
                Err(poisoned) => poisoned.into_inner().write(buf),
            },
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LogSink::Stderr(stderr) => stderr.flush(),
            LogSink::File(file) => match file.lock() {
                Ok(mut file) => file.flush(),
                Err(poisoned) => poisoned.into_inner().flush(),
            },
        }
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogSink;

    fn make_writer(&'a self) -> Self::Writer {
        match &self.file {
            Some(file) => LogSink::File(file.clone()),
            None => LogSink::Stderr(io::stderr()),
        }
    }
}
