// Encoder process lifecycle: spawn, progress stream, stderr drain, termination

use super::error::JobError;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// How long a terminated process gets to exit before it is killed
pub const TERMINATE_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Default)]
struct HandleState {
    exited: bool,
    termination_requested: bool,
}

/// Shared handle used to stop a running process from another thread
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    program: String,
    state: Mutex<HandleState>,
    exited_cv: Condvar,
}

impl ProcessHandle {
    fn new(pid: u32, program: String) -> Self {
        Self {
            pid,
            program,
            state: Mutex::new(HandleState::default()),
            exited_cv: Condvar::new(),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether `terminate` was called before the process exited
    pub fn termination_requested(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.termination_requested)
            .unwrap_or(false)
    }

    pub fn has_exited(&self) -> bool {
        self.state.lock().map(|s| s.exited).unwrap_or(true)
    }

    fn mark_exited(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.exited = true;
        }
        self.exited_cv.notify_all();
    }

    /// Ask the process to stop, then force it after `TERMINATE_GRACE`.
    ///
    /// Blocks until the process has exited or been killed. Safe to call
    /// repeatedly and after exit; never fails. Signals are only sent while
    /// the state lock shows the pid unreaped.
    pub fn terminate(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.exited {
            return;
        }
        state.termination_requested = true;

        debug!(pid = self.pid, program = %self.program, "terminating process");
        send_terminate(self.pid);

        let Ok((state, _)) = self
            .exited_cv
            .wait_timeout_while(state, TERMINATE_GRACE, |s| !s.exited)
        else {
            return;
        };

        if !state.exited {
            warn!(
                pid = self.pid,
                program = %self.program,
                "process ignored termination, killing"
            );
            send_kill(self.pid);
        }
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; a stale pid only yields ESRCH
    let rc = unsafe { libc::kill(pid, signal) };
    if rc != 0 {
        debug!(pid, signal, "kill returned {}", std::io::Error::last_os_error());
    }
}

#[cfg(unix)]
fn send_terminate(pid: u32) {
    send_signal(pid, libc::SIGTERM);
}

#[cfg(unix)]
fn send_kill(pid: u32) {
    send_signal(pid, libc::SIGKILL);
}

#[cfg(not(unix))]
fn taskkill(pid: u32, force: bool) {
    let mut cmd = Command::new("taskkill");
    cmd.arg("/PID").arg(pid.to_string());
    if force {
        cmd.arg("/F");
    }
    if let Err(e) = cmd.stdout(Stdio::null()).stderr(Stdio::null()).status() {
        debug!(pid, "taskkill failed: {}", e);
    }
}

#[cfg(not(unix))]
fn send_terminate(pid: u32) {
    taskkill(pid, false);
}

#[cfg(not(unix))]
fn send_kill(pid: u32) {
    taskkill(pid, true);
}

/// Exit status plus everything the process wrote to stderr
#[derive(Debug)]
pub struct ProcessOutcome {
    pub status: ExitStatus,
    pub diagnostics: Vec<String>,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn diagnostics_text(&self) -> String {
        self.diagnostics.join("\n")
    }

    /// Non-empty diagnostic lines joined with "; ", or the exit status when silent
    pub fn error_message(&self) -> String {
        let lines: Vec<&str> = self
            .diagnostics
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect();
        if lines.is_empty() {
            match self.status.code() {
                Some(code) => format!("ffmpeg exited with status {}", code),
                None => format!("ffmpeg exited with {}", self.status),
            }
        } else {
            lines.join("; ")
        }
    }
}

/// A spawned encoder whose stderr is already being drained
pub struct RunningProcess {
    child: Child,
    stdout: Option<BufReader<ChildStdout>>,
    stderr_thread: Option<JoinHandle<Vec<String>>>,
    handle: Arc<ProcessHandle>,
}

impl RunningProcess {
    /// Spawn `cmd` with stdin closed and stdout/stderr piped
    pub fn spawn(mut cmd: Command) -> Result<Self, JobError> {
        let program = cmd.get_program().to_string_lossy().into_owned();
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| JobError::Launch {
            program: program.clone(),
            source,
        })?;

        // Drain stderr from the start so a chatty encoder never blocks on a full pipe
        let stderr_thread = child.stderr.take().map(|stderr| {
            thread::spawn(move || {
                BufReader::new(stderr)
                    .lines()
                    .map_while(Result::ok)
                    .collect::<Vec<_>>()
            })
        });
        let stdout = child.stdout.take().map(BufReader::new);
        let handle = Arc::new(ProcessHandle::new(child.id(), program));
        debug!(pid = handle.pid, program = %handle.program, "spawned");

        Ok(Self {
            child,
            stdout,
            stderr_thread,
            handle,
        })
    }

    pub fn handle(&self) -> Arc<ProcessHandle> {
        Arc::clone(&self.handle)
    }

    /// Lines of the progress stream (stdout); ends at EOF or on a read error
    pub fn progress_lines(&mut self) -> impl Iterator<Item = String> + '_ {
        self.stdout
            .as_mut()
            .into_iter()
            .flat_map(|reader| reader.lines().map_while(Result::ok))
    }

    /// Consume the rest of stdout, reap the process and collect stderr
    pub fn drain_and_wait(mut self) -> ProcessOutcome {
        if let Some(mut reader) = self.stdout.take() {
            let mut sink = Vec::new();
            let _ = reader.read_to_end(&mut sink);
        }

        // The pid stays valid until reaped; mark exit first so no signal
        // can reach a recycled pid
        if wait_until_exited(self.handle.pid) {
            self.handle.mark_exited();
        }

        let status = match self.child.wait() {
            Ok(status) => status,
            Err(e) => {
                warn!(pid = self.handle.pid, "wait failed: {}", e);
                let _ = self.child.kill();
                self.child.wait().unwrap_or_else(|_| failed_status())
            }
        };
        self.handle.mark_exited();

        let diagnostics = self
            .stderr_thread
            .take()
            .and_then(|t| t.join().ok())
            .unwrap_or_default();

        debug!(pid = self.handle.pid, %status, "process exited");
        ProcessOutcome {
            status,
            diagnostics,
        }
    }
}

/// Block until `pid` has exited without reaping it. False if that cannot be
/// observed, in which case the caller finds out from `wait`.
#[cfg(unix)]
fn wait_until_exited(pid: u32) -> bool {
    let Ok(id) = libc::id_t::try_from(pid) else {
        return false;
    };
    loop {
        // SAFETY: siginfo_t is plain data and waitid only writes into it
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        // SAFETY: WNOWAIT leaves the child waitable for Child::wait
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                id,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return true;
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            debug!(pid, "waitid failed: {}", err);
            return false;
        }
    }
}

#[cfg(not(unix))]
fn wait_until_exited(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn failed_status() -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    ExitStatus::from_raw(1 << 8)
}

#[cfg(windows)]
fn failed_status() -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;
    ExitStatus::from_raw(1)
}
