//! Child process management, including function execution.

use std::fs::File;
use std::io::Read;
use std::io::Write;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use nix::fcntl::OFlag;
use nix::sys::signal::Signal;
use nix::sys::signal::{self};
use nix::sys::wait::WaitPidFlag;
use nix::sys::wait::WaitStatus;
use nix::sys::wait::waitpid;
use nix::unistd::ForkResult;
use nix::unistd::Pid;
use nix::unistd::fork;
use nix::unistd::pipe2;

/// The largest error message a child writes to its notification pipe.
///
/// The parent only drains the pipe after the child exits, so a message must fit
/// in the pipe buffer. A pipe holds at least `PIPE_BUF` bytes.
const MAX_MESSAGE_LEN: usize = libc::PIPE_BUF;

/// Cut `msg` to at most `MAX_MESSAGE_LEN` bytes on a character boundary.
fn truncate_message(msg: &str) -> &str {
    if msg.len() <= MAX_MESSAGE_LEN {
        return msg;
    }
    let mut end = MAX_MESSAGE_LEN;
    while !msg.is_char_boundary(end) {
        end -= 1;
    }
    &msg[..end]
}

/// A wrapper around a child process.
///
/// The child runs a single function and exits. If the function fails, its
/// error message is written to a notification pipe and collected by `wait`.
/// Dropping a `Child` kills and reaps the process.
pub struct Child {
    /// The process ID of the child.
    pid: Pid,

    /// The read end of the notification pipe.
    notification: File,

    /// The cached result from the child process.
    result: Option<Result<(), String>>,
}

impl Child {
    /// Run a function in a child process.
    ///
    /// # Arguments
    ///
    /// * `f` - The function to run in the child process. If it returns an
    ///   error, the message is passed back to the parent and the child exits
    ///   with a non-zero status.
    ///
    /// # Returns
    ///
    /// A new `Child` instance if the process was forked, or an error otherwise.
    pub fn run<F>(f: F) -> Result<Self>
    where
        F: FnOnce() -> Result<()>,
    {
        let (read_fd, write_fd) =
            pipe2(OFlag::O_CLOEXEC).with_context(|| "Failed to create notification pipe")?;

        // The child only runs `f` and then calls `_exit`, so it never returns
        // into state shared with the parent.
        match unsafe { fork() }.with_context(|| "Failed to fork child process")? {
            ForkResult::Child => {
                drop(read_fd);
                let code = match f() {
                    Ok(()) => 0,
                    Err(error) => {
                        let mut pipe = File::from(write_fd);
                        let msg = format!("{error:#}");
                        let _ = pipe.write_all(truncate_message(&msg).as_bytes());
                        1
                    }
                };
                unsafe { libc::_exit(code) };
            }
            ForkResult::Parent { child } => Ok(Self {
                pid: child,
                notification: File::from(read_fd),
                result: None,
            }),
        }
    }

    /// Return the process ID of the child.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Check if the child process is still alive.
    ///
    /// A child whose state cannot be queried is reported as not alive.
    pub fn alive(&mut self) -> bool {
        if self.result.is_some() {
            return false;
        }
        matches!(self.reap(false), Ok(false))
    }

    /// Wait for the child process to exit and return its result.
    pub fn wait(&mut self) -> Result<()> {
        if self.result.is_none() {
            self.reap(true)?;
        }
        match &self.result {
            Some(Ok(())) => Ok(()),
            Some(Err(msg)) => Err(anyhow!("{}", msg)),
            None => Err(anyhow!("child {} was not reaped", self.pid)),
        }
    }

    /// Kill the child process with the given signal.
    pub fn kill(&mut self, signal: Signal) -> Result<()> {
        if !self.alive() {
            return Ok(());
        }
        signal::kill(self.pid, signal).with_context(|| "Failed to kill child process")?;
        Ok(())
    }

    /// Attempt to collect the exit status, returning whether the child exited.
    fn reap(&mut self, block: bool) -> Result<bool> {
        let flags = if block {
            None
        } else {
            Some(WaitPidFlag::WNOHANG)
        };
        let result = loop {
            match waitpid(self.pid, flags) {
                Ok(WaitStatus::Exited(_, 0)) => break Ok(()),
                Ok(WaitStatus::Exited(_, code)) => {
                    break Err(format!("Child process exited with code {code}"));
                }
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    break Err(format!("Child process was killed by signal {signal}"));
                }
                Ok(WaitStatus::StillAlive) => return Ok(false),
                Ok(_) => continue, // Stopped or continued; keep waiting.
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => {
                    return Err(anyhow!("Failed to wait for child {}: {}", self.pid, e));
                }
            }
        };

        // A child that failed leaves its error message in the pipe.
        let mut buffer = String::new();
        let _ = self.notification.read_to_string(&mut buffer);
        self.result = Some(match result {
            Ok(()) if buffer.is_empty() => Ok(()),
            Ok(()) => Err(format!("Child process error: {buffer}")),
            Err(status) if buffer.is_empty() => Err(status),
            Err(_) => Err(format!("Child process error: {buffer}")),
        });
        Ok(true)
    }
}

impl Drop for Child {
    fn drop(&mut self) {
        let _ = self.kill(Signal::SIGKILL);
        let _ = self.wait();
    }
}
