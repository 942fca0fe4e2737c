//! Background process detachment.
//!
//! [`Detach::spawn`] runs a job in a daemonized grandchild (double fork
//! plus `setsid`) and waits only until the job reports readiness over a
//! pipe. If the process cannot fork, or the caller asked for foreground
//! mode, the fallback hooks run and the job runs inline instead.

use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};

use nix::libc;
use nix::sys::signal::{SigHandler, Signal, signal};
use nix::sys::wait::waitpid;
use nix::unistd::{ForkResult, chdir, fork, pipe, setsid};
use serde::{Deserialize, Serialize};

/// What the detached job reports back to the process that spawned it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum DetachStatus {
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "failed")]
    Failed { error: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DetachError {
    #[error("pipe: {0}")]
    Pipe(#[source] nix::Error),
    #[error("failed to leave the terminal session: {0}")]
    Daemonize(#[source] nix::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("MessagePack encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("MessagePack decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("detached process exited without reporting status")]
    NoStatus,
    #[error("{0}")]
    Failed(String),
}

/// Handle through which a job signals that it is up.
///
/// Only the first report is delivered; later ones are ignored. Inline
/// jobs get a handle with nowhere to report to.
#[derive(Debug)]
pub struct Readiness {
    pipe: Option<File>,
}

impl Readiness {
    pub(crate) fn inline() -> Self {
        Self { pipe: None }
    }

    fn over(pipe: OwnedFd) -> Self {
        Self {
            pipe: Some(File::from(pipe)),
        }
    }

    /// Whether the job runs in a detached process.
    pub fn is_detached(&self) -> bool {
        self.pipe.is_some()
    }

    pub fn ready(&mut self) {
        self.report(&DetachStatus::Ready);
    }

    pub fn fail(&mut self, error: impl Display) {
        self.report(&DetachStatus::Failed {
            error: error.to_string(),
        });
    }

    fn report(&mut self, status: &DetachStatus) {
        let Some(mut pipe) = self.pipe.take() else {
            return;
        };
        let sent = rmp_serde::to_vec_named(status)
            .map_err(DetachError::from)
            .and_then(|payload| Ok(pipe.write_all(&payload)?));
        if let Err(e) = sent {
            tracing::debug!(error = %e, "failed to report detach status");
        }
    }
}

type Hook = Box<dyn FnOnce()>;

/// Builder for running a job detached from the calling process.
#[derive(Default)]
pub struct Detach {
    before: Vec<Hook>,
    fallback: Vec<Hook>,
    foreground: bool,
}

impl Detach {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` in the calling process just before forking.
    pub fn before_detach(mut self, hook: impl FnOnce() + 'static) -> Self {
        self.before.push(Box::new(hook));
        self
    }

    /// Run `hook` before the job when it has to run inline.
    pub fn on_fallback(mut self, hook: impl FnOnce() + 'static) -> Self {
        self.fallback.push(Box::new(hook));
        self
    }

    /// Skip detachment and run the job inline.
    pub fn foreground(mut self, foreground: bool) -> Self {
        self.foreground = foreground;
        self
    }

    /// Run `job` in a detached grandchild.
    ///
    /// Returns once the job has reported readiness (or failure). The
    /// grandchild exits when the job returns and never comes back here.
    /// Inline, this returns when the job does.
    pub fn spawn<F, E>(self, job: F) -> Result<(), DetachError>
    where
        F: FnOnce(&mut Readiness) -> Result<(), E>,
        E: Display,
    {
        if self.foreground {
            return run_inline(self.fallback, job);
        }

        for hook in self.before {
            hook();
        }
        let (reader, writer) = pipe().map_err(DetachError::Pipe)?;

        // SAFETY: no threads are running and no display connection is open
        // yet; the child only forks again, calls setsid and exits.
        match unsafe { fork() } {
            Err(e) => {
                tracing::warn!(error = %e, "fork failed, running in foreground");
                drop((reader, writer));
                run_inline(self.fallback, job)
            }
            Ok(ForkResult::Parent { child }) => {
                drop(writer);
                // The intermediate child exits as soon as it has forked.
                if let Err(e) = waitpid(child, None) {
                    tracing::debug!(error = %e, "waitpid on intermediate child");
                }
                let mut status = Vec::new();
                File::from(reader).read_to_end(&mut status)?;
                decode_status(&status)
            }
            Ok(ForkResult::Child) => {
                drop(reader);
                if setsid().is_err() {
                    unsafe { libc::_exit(1) };
                }
                match unsafe { fork() } {
                    Ok(ForkResult::Child) => {}
                    Ok(ForkResult::Parent { .. }) => unsafe { libc::_exit(0) },
                    Err(e) => {
                        Readiness::over(writer).fail(format!("second fork failed: {e}"));
                        unsafe { libc::_exit(1) };
                    }
                }
                run_detached(writer, job)
            }
        }
    }
}

fn run_inline<F, E>(fallback: Vec<Hook>, job: F) -> Result<(), DetachError>
where
    F: FnOnce(&mut Readiness) -> Result<(), E>,
    E: Display,
{
    for hook in fallback {
        hook();
    }
    job(&mut Readiness::inline()).map_err(|e| DetachError::Failed(e.to_string()))
}

fn run_detached<F, E>(writer: OwnedFd, job: F) -> !
where
    F: FnOnce(&mut Readiness) -> Result<(), E>,
    E: Display,
{
    let mut readiness = Readiness::over(writer);
    if let Err(e) = daemonize() {
        readiness.fail(format!("failed to detach: {e}"));
        std::process::exit(1);
    }

    let code = match job(&mut readiness) {
        Ok(()) => {
            readiness.ready();
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "detached job failed");
            readiness.fail(&e);
            1
        }
    };
    std::process::exit(code)
}

/// Leave the caller's terminal and working directory behind. Stderr is
/// kept so the job can still log.
fn daemonize() -> Result<(), DetachError> {
    // SAFETY: installing SIG_IGN does not run any handler code.
    unsafe { signal(Signal::SIGHUP, SigHandler::SigIgn) }.map_err(DetachError::Daemonize)?;
    chdir("/").map_err(DetachError::Daemonize)?;

    let null = OpenOptions::new().read(true).write(true).open("/dev/null")?;
    let fd = null.as_raw_fd();
    // SAFETY: dup2 onto the standard descriptors; `null` stays open
    // until both calls return.
    if unsafe { libc::dup2(fd, 0) } < 0 || unsafe { libc::dup2(fd, 1) } < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

fn decode_status(bytes: &[u8]) -> Result<(), DetachError> {
    if bytes.is_empty() {
        return Err(DetachError::NoStatus);
    }
    match rmp_serde::from_slice(bytes)? {
        DetachStatus::Ready => Ok(()),
        DetachStatus::Failed { error } => Err(DetachError::Failed(error)),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn status_crosses_the_pipe_as_msgpack() {
        let failed = DetachStatus::Failed {
            error: "failed to acquire ownership of CLIPBOARD".into(),
        };
        let bytes = rmp_serde::to_vec_named(&failed).unwrap();
        assert!(matches!(
            decode_status(&bytes),
            Err(DetachError::Failed(e)) if e.contains("CLIPBOARD")
        ));

        let ready = rmp_serde::to_vec_named(&DetachStatus::Ready).unwrap();
        assert!(decode_status(&ready).is_ok());
    }

    #[test]
    fn silent_exit_is_an_error() {
        assert!(matches!(decode_status(&[]), Err(DetachError::NoStatus)));
        assert!(matches!(
            decode_status(&[0xc1]),
            Err(DetachError::Decode(_))
        ));
    }

    #[test]
    fn foreground_runs_fallbacks_then_job_inline() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (before, fallback, job) = (Rc::clone(&log), Rc::clone(&log), Rc::clone(&log));

        Detach::new()
            .before_detach(move || before.borrow_mut().push("before"))
            .on_fallback(move || fallback.borrow_mut().push("fallback"))
            .foreground(true)
            .spawn(|readiness| {
                assert!(!readiness.is_detached());
                readiness.ready();
                job.borrow_mut().push("job");
                Ok::<_, String>(())
            })
            .unwrap();

        assert_eq!(*log.borrow(), vec!["fallback", "job"]);
    }

    #[test]
    fn inline_job_failure_is_returned() {
        let err = Detach::new()
            .foreground(true)
            .spawn(|_| Err("no display"))
            .unwrap_err();
        assert!(matches!(err, DetachError::Failed(e) if e == "no display"));
    }

    #[test]
    fn readiness_reports_once() {
        let (reader, writer) = pipe().unwrap();
        let mut readiness = Readiness::over(writer);
        assert!(readiness.is_detached());
        readiness.ready();
        readiness.fail("too late");
        drop(readiness);

        let mut bytes = Vec::new();
        File::from(reader).read_to_end(&mut bytes).unwrap();
        assert!(decode_status(&bytes).is_ok());
    }
}
