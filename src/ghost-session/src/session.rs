//! Session state machine (spec.md §4.6).
//!
//! Every hypervisor call is issued from a single dedicated thread per
//! session (the "hypervisor queue"); the caller of `Session`'s public
//! methods plays the role of the coordination domain, blocking on the
//! queue's result before committing a state transition. This keeps the
//! ordering guarantee spec.md §5 requires ("after a transition is
//! committed, no callback reports a strictly older state") without needing
//! an actual event loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};
use ghost_bundle::lock::{self, LockOwner};
use parking_lot::{Condvar, Mutex};

use crate::adapter::{AdapterError, HypervisorAdapter, MachineSpec};
use crate::error::{Result, SessionError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Initialized,
    Starting,
    Running,
    Stopping,
    Stopped,
    Suspending,
}

type Job = Box<dyn FnOnce() + Send>;

/// Tracks termination under one lock shared by `request_stop`'s
/// observe-`Stopping`-then-register-waiter path and `handle_termination`'s
/// set-`Done`-then-drain path, so neither can interleave with the other:
/// a late `request_stop` either sees `Done` and returns the result directly,
/// or sees `Pending` and registers before any drain can run.
enum Termination {
    Pending(Vec<Sender<Result<()>>>),
    Done(Result<()>),
}

struct Shared {
    state: Mutex<SessionState>,
    state_changed: Condvar,
    termination: Mutex<Termination>,
}

/// Drives a single VM's lifetime against a [`HypervisorAdapter`]. Owns the
/// bundle's PID lock for as long as the VM is running or suspending.
pub struct Session {
    shared: Arc<Shared>,
    adapter: Arc<dyn HypervisorAdapter>,
    job_tx: Sender<Job>,
    _worker: JoinHandle<()>,
    lock_path: PathBuf,
    suspend_path: PathBuf,
    owner: LockOwner,
    /// Invoked with the new `isSuspended` value at the point spec.md §4.6
    /// requires it committed: after save-state succeeds, before the lock is
    /// released. Left as a caller hook since `StoredConfig` persistence is
    /// a controller concern, not a session one.
    on_suspended_changed: Box<dyn Fn(bool) -> std::io::Result<()> + Send + Sync>,
}

impl Session {
    pub fn new(
        adapter: Arc<dyn HypervisorAdapter>,
        lock_path: PathBuf,
        suspend_path: PathBuf,
        owner: LockOwner,
        on_suspended_changed: Box<dyn Fn(bool) -> std::io::Result<()> + Send + Sync>,
    ) -> Self {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let worker = std::thread::Builder::new()
            .name("ghost-session-hv-queue".into())
            .spawn(move || {
                for job in job_rx {
                    job();
                }
            })
            .expect("failed to spawn hypervisor queue thread");

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::Initialized),
                state_changed: Condvar::new(),
                termination: Mutex::new(Termination::Pending(Vec::new())),
            }),
            adapter,
            job_tx,
            _worker: worker,
            lock_path,
            suspend_path,
            owner,
            on_suspended_changed,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    fn set_state(&self, new: SessionState) {
        let mut state = self.shared.state.lock();
        *state = new;
        self.shared.state_changed.notify_all();
    }

    /// Runs `f` on the hypervisor queue and blocks the caller until it
    /// completes, returning its result.
    fn run_on_queue<T, F>(&self, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce(&dyn HypervisorAdapter) -> T + Send + 'static,
    {
        let adapter = self.adapter.clone();
        let (tx, rx) = bounded(1);
        self.job_tx
            .send(Box::new(move || {
                let result = f(adapter.as_ref());
                let _ = tx.send(result);
            }))
            .expect("hypervisor queue thread is gone");
        rx.recv().expect("hypervisor queue dropped result")
    }

    pub fn start(&self, spec: MachineSpec) -> Result<()> {
        {
            let state = self.shared.state.lock();
            if *state != SessionState::Initialized {
                return Err(SessionError::InvalidState(*state));
            }
        }
        lock::acquire_lock(&self.lock_path, self.owner)?;
        self.set_state(SessionState::Starting);

        let result = self.run_on_queue(move |adapter| -> Result<()> {
            adapter.create_configuration(&spec)?;
            adapter.start()?;
            Ok(())
        });

        match result {
            Ok(()) => {
                self.set_state(SessionState::Running);
                Ok(())
            }
            Err(e) => {
                let _ = lock::release_lock(&self.lock_path);
                self.set_state(SessionState::Stopped);
                Err(e)
            }
        }
    }

    /// Idempotent termination handler: commits at most one `stopped`
    /// transition and resolves every queued `request_stop` continuation
    /// with the same result.
    fn handle_termination(&self, result: Result<()>) -> Result<()> {
        let mut termination = self.shared.termination.lock();
        let waiters = match &mut *termination {
            Termination::Done(prior) => return clone_result(prior),
            Termination::Pending(waiters) => std::mem::take(waiters),
        };
        *termination = Termination::Done(clone_result(&result));
        drop(termination);

        let _ = lock::release_lock(&self.lock_path);
        self.set_state(SessionState::Stopped);

        for waiter in waiters {
            let _ = waiter.send(clone_result(&result));
        }
        result
    }

    pub fn request_stop(&self, force: bool) -> Result<()> {
        let state = *self.shared.state.lock();
        match state {
            SessionState::Stopped => return Ok(()),
            SessionState::Stopping => {
                let mut termination = self.shared.termination.lock();
                match &mut *termination {
                    Termination::Done(result) => return clone_result(result),
                    Termination::Pending(waiters) => {
                        let (tx, rx) = bounded(1);
                        waiters.push(tx);
                        drop(termination);
                        return rx.recv().expect("termination handler dropped sender");
                    }
                }
            }
            _ => {}
        }

        self.set_state(SessionState::Stopping);
        let result = self
            .run_on_queue(move |adapter| adapter.request_stop(force).map_err(SessionError::from));
        self.handle_termination(result)
    }

    /// Call when the hypervisor reports an unprompted guest stop or error,
    /// rather than in response to a `request_stop` the session issued.
    pub fn notify_guest_stopped(&self, error: Option<AdapterError>) -> Result<()> {
        self.set_state(SessionState::Stopping);
        let result = match error {
            Some(e) => Err(SessionError::from(e)),
            None => Ok(()),
        };
        self.handle_termination(result)
    }

    pub fn suspend(&self) -> Result<()> {
        {
            let state = self.shared.state.lock();
            if *state != SessionState::Running {
                return Err(SessionError::InvalidState(*state));
            }
        }
        self.set_state(SessionState::Suspending);

        let suspend_path = self.suspend_path.clone();
        let save_result = self.run_on_queue(move |adapter| -> Result<()> {
            adapter.pause()?;
            adapter.save_state(&suspend_path)?;
            Ok(())
        });

        match save_result {
            Ok(()) => {
                (self.on_suspended_changed)(true)?;
                let _ = lock::release_lock(&self.lock_path);
                self.set_state(SessionState::Stopped);
                Ok(())
            }
            Err(e) => {
                let resume_result = self.run_on_queue(|adapter| adapter.resume());
                self.set_state(SessionState::Running);
                if let Err(resume_err) = resume_result {
                    tracing::error!(error = %resume_err, "failed to resume after suspend failure");
                }
                Err(e)
            }
        }
    }

    /// Resumes a suspended VM into a fresh session: `initialized → starting
    /// → running`. Errors with [`SessionError::NotSuspended`] if
    /// `suspend_path` doesn't exist.
    pub fn resume(&self, spec: MachineSpec) -> Result<()> {
        {
            let state = self.shared.state.lock();
            if *state != SessionState::Initialized {
                return Err(SessionError::InvalidState(*state));
            }
        }
        if !self.suspend_path.exists() {
            return Err(SessionError::NotSuspended);
        }

        lock::acquire_lock(&self.lock_path, self.owner)?;
        self.set_state(SessionState::Starting);

        let suspend_path = self.suspend_path.clone();
        let result = self.run_on_queue(move |adapter| -> Result<()> {
            adapter.create_configuration(&spec)?;
            adapter.restore_state(&suspend_path)?;
            adapter.resume()?;
            Ok(())
        });

        match result {
            Ok(()) => {
                std::fs::remove_file(&self.suspend_path).ok();
                (self.on_suspended_changed)(false)?;
                self.set_state(SessionState::Running);
                Ok(())
            }
            Err(e) => {
                let _ = lock::release_lock(&self.lock_path);
                self.set_state(SessionState::Stopped);
                Err(e)
            }
        }
    }
}

fn clone_result(result: &Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(SessionError::InvalidState(s)) => Err(SessionError::InvalidState(*s)),
        Err(SessionError::NotSuspended) => Err(SessionError::NotSuspended),
        Err(SessionError::Adapter(e)) => Err(SessionError::Adapter(e.clone())),
        Err(SessionError::Bundle(_)) => Err(SessionError::Adapter(AdapterError::new(
            "bundle error during termination",
        ))),
        Err(SessionError::Io(e)) => Err(SessionError::Adapter(AdapterError::new(e.to_string()))),
    }
}
