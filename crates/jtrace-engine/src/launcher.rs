use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::process::Stdio;
use std::sync::Arc;

use jtrace_config::TracerConfig;
use jtrace_jdwp::JdwpClient;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::compile::CompiledProgram;
use crate::error::{Result, TraceError};

/// Bytes the debuggee has written to stdout/stderr so far.
#[derive(Debug, Clone, Default)]
pub struct OutputCapture {
    stdout: Arc<Mutex<Vec<u8>>>,
    stderr: Arc<Mutex<Vec<u8>>>,
}

impl OutputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdout(&self) -> Vec<u8> {
        self.stdout.lock().clone()
    }

    pub fn stderr(&self) -> Vec<u8> {
        self.stderr.lock().clone()
    }

    pub fn append_stdout(&self, bytes: &[u8]) {
        self.stdout.lock().extend_from_slice(bytes);
    }

    pub fn append_stderr(&self, bytes: &[u8]) {
        self.stderr.lock().extend_from_slice(bytes);
    }

    fn drain<R>(mut reader: R, sink: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
                }
            }
        })
    }
}

/// A `java` process started with the JDWP agent and an attached client.
pub struct Debuggee {
    child: Child,
    client: JdwpClient,
    output: OutputCapture,
    drains: Vec<JoinHandle<()>>,
}

impl Debuggee {
    /// Start `program`'s entry point suspended and attach to it.
    pub async fn launch(program: &CompiledProgram, config: &TracerConfig) -> Result<Self> {
        let port = pick_free_port()?;
        let agent = format!(
            "-agentlib:jdwp=transport=dt_socket,server=y,suspend=y,quiet=y,address=127.0.0.1:{port}"
        );

        let mut cmd = Command::new(&config.java);
        cmd.kill_on_drop(true);
        cmd.arg(agent)
            .arg("-cp")
            .arg(program.artifact_root())
            .arg(program.entry_point());
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|err| {
            TraceError::Launch(format!("failed to spawn {}: {err}", config.java.display()))
        })?;
        tracing::debug!(
            target: "jtrace.engine",
            pid = child.id(),
            port,
            entry_point = program.entry_point(),
            "spawned debuggee"
        );

        let output = OutputCapture::new();
        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(OutputCapture::drain(stdout, output.stdout.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(OutputCapture::drain(stderr, output.stderr.clone()));
        }

        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let client = attach(&mut child, addr, config).await?;

        Ok(Self {
            child,
            client,
            output,
            drains,
        })
    }

    pub fn client(&self) -> &JdwpClient {
        &self.client
    }

    pub fn output(&self) -> &OutputCapture {
        &self.output
    }

    /// Release the VM, stop the process and wait for the output readers.
    pub async fn shutdown(mut self) {
        if let Err(err) = self.client.vm_dispose().await {
            tracing::debug!(target: "jtrace.engine", error = %err, "dispose failed");
        }
        self.client.shutdown();
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        for drain in self.drains.drain(..) {
            let _ = drain.await;
        }
    }
}

async fn attach(child: &mut Child, addr: SocketAddr, config: &TracerConfig) -> Result<JdwpClient> {
    let attempts = config.connect_attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        if let Some(status) = child.try_wait()? {
            return Err(TraceError::Launch(format!(
                "debuggee exited before accepting a debugger connection ({status})"
            )));
        }

        match JdwpClient::connect(addr).await {
            Ok(client) => return Ok(client),
            Err(err) => {
                tracing::trace!(target: "jtrace.engine", attempt, error = %err, "JDWP attach failed");
                last_error = Some(err);
            }
        }
        tokio::time::sleep(config.connect_retry_interval()).await;
    }

    let reason = last_error
        .map(|err| err.to_string())
        .unwrap_or_else(|| "no attempts made".to_owned());
    Err(TraceError::Launch(format!(
        "could not attach to debuggee at {addr} after {attempts} attempts: {reason}"
    )))
}

fn pick_free_port() -> Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}
