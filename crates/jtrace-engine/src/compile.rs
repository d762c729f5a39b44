use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use jtrace_config::TracerConfig;
use tempfile::TempDir;
use tokio::process::Command;

use crate::error::{Result, TraceError};
use crate::source_index::SourceIndex;

/// What the session needs to know about a compiled program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramClasses {
    /// Binary names of every class `javac` emitted.
    pub names: BTreeSet<String>,
    /// Binary name of the class declaring `main`.
    pub entry_point: String,
}

/// A compiled single-file program in an owned working directory.
///
/// Dropping it removes the directory.
#[derive(Debug)]
pub struct CompiledProgram {
    dir: TempDir,
    classes: ProgramClasses,
    index: SourceIndex,
}

impl CompiledProgram {
    /// Classpath root holding the emitted `.class` files.
    pub fn artifact_root(&self) -> &Path {
        self.dir.path()
    }

    pub fn classes(&self) -> &ProgramClasses {
        &self.classes
    }

    pub fn entry_point(&self) -> &str {
        &self.classes.entry_point
    }

    pub fn source_index(&self) -> &SourceIndex {
        &self.index
    }
}

/// Compile `source` with `javac -g`.
///
/// The source must declare exactly one public top-level type and exactly one
/// `public static void main(String[])`.
pub async fn compile(source: &str, config: &TracerConfig) -> Result<CompiledProgram> {
    let index = SourceIndex::parse(source);
    let public_type = single_public_type(&index)?;
    let entry_point = single_main_class(&index)?;

    let dir = tempfile::Builder::new().prefix("jtrace").tempdir()?;
    let source_file = source_path(dir.path(), &public_type);
    if let Some(parent) = source_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&source_file, source)?;

    run_javac(config, &source_file, dir.path()).await?;

    let names: BTreeSet<String> = collect_class_files(dir.path())?
        .iter()
        .filter_map(|class_file| class_name_from_class_file(dir.path(), class_file))
        .collect();
    if names.is_empty() {
        return Err(TraceError::Compilation {
            diagnostics: "javac produced no class files".to_owned(),
        });
    }
    tracing::debug!(
        target: "jtrace.engine",
        entry_point = %entry_point,
        classes = names.len(),
        "compiled program"
    );

    Ok(CompiledProgram {
        dir,
        classes: ProgramClasses { names, entry_point },
        index,
    })
}

fn format_lines(lines: impl Iterator<Item = u32>) -> String {
    let lines: Vec<String> = lines.map(|line| line.to_string()).collect();
    format!("[{}]", lines.join(", "))
}

/// Binary name of the one public top-level type.
fn single_public_type(index: &SourceIndex) -> Result<String> {
    let public = index.public_top_level_types();
    match public.as_slice() {
        [ty] => Ok(ty.binary_name.clone()),
        _ => Err(TraceError::AmbiguousEntryPoint(format!(
            "Java source code must have exactly one public top-level type declaration. \
             Found {} such declarations on lines {}.",
            public.len(),
            format_lines(public.iter().map(|ty| ty.line)),
        ))),
    }
}

/// Binary name of the type declaring the one `main` method.
fn single_main_class(index: &SourceIndex) -> Result<String> {
    let mains = index.main_methods();
    match mains.as_slice() {
        [main] => Ok(main.declaring_type.clone()),
        _ => Err(TraceError::AmbiguousEntryPoint(format!(
            "Java source code must have exactly one main method. \
             Found {} main methods on lines {}.",
            mains.len(),
            format_lines(mains.iter().map(|m| m.line)),
        ))),
    }
}

/// `demo.app.Main` → `<root>/demo/app/Main.java`.
fn source_path(root: &Path, binary_name: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    let mut segments = binary_name.split('.').peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_some() {
            path.push(segment);
        } else {
            path.push(format!("{segment}.java"));
        }
    }
    path
}

async fn run_javac(config: &TracerConfig, source_file: &Path, output_dir: &Path) -> Result<()> {
    let mut cmd = Command::new(&config.javac);
    cmd.arg("-g");
    cmd.arg("-encoding");
    cmd.arg("UTF-8");
    cmd.arg("-d");
    cmd.arg(output_dir);
    cmd.arg(source_file);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|err| TraceError::Compilation {
        diagnostics: format!("failed to spawn {}: {err}", config.javac.display()),
    })?;

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(stdout) = stdout.as_mut() {
            let _ = tokio::io::AsyncReadExt::read_to_end(stdout, &mut buf).await;
        }
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(stderr) = stderr.as_mut() {
            let _ = tokio::io::AsyncReadExt::read_to_end(stderr, &mut buf).await;
        }
        buf
    });

    let status = child.wait().await?;
    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    if !status.success() {
        return Err(TraceError::Compilation {
            diagnostics: format_javac_failure(&stdout, &stderr),
        });
    }
    Ok(())
}

fn collect_class_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    collect_class_files_inner(dir, &mut out)?;
    Ok(out)
}

fn collect_class_files_inner(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_class_files_inner(&path, out)?;
        } else if path.extension().and_then(|s| s.to_str()) == Some("class") {
            out.push(path);
        }
    }
    Ok(())
}

/// `<root>/a/b/C$D.class` → `a.b.C$D`.
fn class_name_from_class_file(output_dir: &Path, class_file: &Path) -> Option<String> {
    let rel = class_file.strip_prefix(output_dir).ok()?;
    let mut components: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(os) => Some(os.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    let last = components.pop()?;
    let last = last.strip_suffix(".class").unwrap_or(&last).to_string();
    components.push(last);
    Some(components.join("."))
}

fn format_javac_failure(stdout: &[u8], stderr: &[u8]) -> String {
    let mut combined = String::new();
    if !stdout.is_empty() {
        combined.push_str(&String::from_utf8_lossy(stdout));
    }
    if !stderr.is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&String::from_utf8_lossy(stderr));
    }
    let trimmed = combined.trim();
    if trimmed.is_empty() {
        "javac exited unsuccessfully".to_owned()
    } else {
        trimmed.to_owned()
    }
}
