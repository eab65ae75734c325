use std::ffi::{OsStr, OsString};
use std::io::{self, Read};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use kiff_render_api::{RenderError, RenderResult};
use wait_timeout::ChildExt;

/// Limit applied to every external invocation unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// An external program plus the leading arguments needed to reach it
/// (`flatpak run --command=kicad-cli org.kicad.KiCad`).
#[derive(Debug, Clone)]
pub struct ToolCommand {
    label: String,
    program: OsString,
    prefix: Vec<OsString>,
    timeout: Duration,
}

/// Captured output of a successful invocation.
#[derive(Debug)]
pub struct ProcessOutput {
    /// Raw standard output.
    pub stdout: Vec<u8>,
    /// Standard error, lossily decoded.
    pub stderr: String,
}

impl ToolCommand {
    /// Invoke `program` directly.
    #[must_use]
    pub fn new(label: impl Into<String>, program: impl Into<OsString>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            prefix: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Invoke `program` with fixed leading arguments.
    #[must_use]
    pub fn with_prefix<I, S>(mut self, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.prefix = prefix.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the per-invocation timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Name used in logs and errors.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run the tool, failing on spawn errors, timeouts and non-zero exits.
    ///
    /// # Errors
    ///
    /// [`RenderError::Io`] when the process cannot be spawned or reaped,
    /// [`RenderError::Timeout`] when it overruns, and
    /// [`RenderError::CommandFailed`] on unsuccessful exit.
    pub fn run<S: AsRef<OsStr>>(&self, args: &[S]) -> RenderResult<ProcessOutput> {
        let mut command = Command::new(&self.program);
        command.args(&self.prefix);
        command.args(args);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        tracing::info!("$ {}", self.command_line(args));

        let mut child = command.spawn().map_err(|source| RenderError::Io {
            path: self.program.to_string_lossy().into_owned(),
            source,
        })?;

        let stdout_handle = child.stdout.take().map(|mut stdout| {
            thread::spawn(move || -> io::Result<Vec<u8>> {
                let mut buffer = Vec::new();
                stdout.read_to_end(&mut buffer)?;
                Ok(buffer)
            })
        });

        let stderr_handle = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || -> io::Result<Vec<u8>> {
                let mut buffer = Vec::new();
                stderr.read_to_end(&mut buffer)?;
                Ok(buffer)
            })
        });

        match child.wait_timeout(self.timeout) {
            Ok(Some(_)) => (),
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(RenderError::Timeout {
                    tool: self.label.clone(),
                    seconds: self.timeout.as_secs(),
                });
            }
            Err(source) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(self.io_error(source));
            }
        }

        let status = child.wait().map_err(|source| self.io_error(source))?;

        let stdout = self.join_reader(stdout_handle)?;
        let stderr = String::from_utf8_lossy(&self.join_reader(stderr_handle)?).into_owned();

        if !status.success() {
            let code = status
                .code()
                .map_or_else(|| "terminated".to_string(), |c| c.to_string());
            return Err(RenderError::CommandFailed {
                tool: self.label.clone(),
                status: code,
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(ProcessOutput { stdout, stderr })
    }

    fn join_reader(
        &self,
        handle: Option<thread::JoinHandle<io::Result<Vec<u8>>>>,
    ) -> RenderResult<Vec<u8>> {
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| {
                    self.io_error(io::Error::new(
                        io::ErrorKind::Other,
                        "output reader thread panicked",
                    ))
                })?
                .map_err(|source| self.io_error(source)),
            None => Ok(Vec::new()),
        }
    }

    fn io_error(&self, source: io::Error) -> RenderError {
        RenderError::Io {
            path: self.label.clone(),
            source,
        }
    }

    fn command_line<S: AsRef<OsStr>>(&self, args: &[S]) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.prefix.iter().map(OsString::as_os_str))
            .chain(args.iter().map(AsRef::as_ref))
            .map(|part| part.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
