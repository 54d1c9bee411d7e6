//! Host-facing kernel.
//!
//! Owns the execution counter and turns controller outcomes into the
//! replies a notebook front end expects.

use ivbs_shared::completeness::{analyze, Completeness};
use ivbs_shared::rpc::{
    CompleteParams, CompleteResult, ExecuteParams, ExecutePayload, ExecuteResult, ExecuteStatus,
    HistoryParams, HistoryResult, InspectParams, InspectResult, KernelInfoResult, ShutdownResult,
};
use tracing::{debug, info};

use crate::config::IvbsConfig;
use crate::controller::SessionController;
use crate::history::HistoryError;
use crate::supervisor::{Supervisor, SupervisorError};

/// Only access type the history request serves
const TAIL_ACCESS: &str = "tail";

pub struct Kernel {
    controller: SessionController,
    execution_count: u64,
    teardown_requested: bool,
}

impl Kernel {
    pub fn new(controller: SessionController) -> Self {
        Self {
            controller,
            execution_count: 0,
            teardown_requested: false,
        }
    }

    pub fn from_config(config: &IvbsConfig) -> Self {
        Self::new(SessionController::from_config(config))
    }

    /// Launch the interpreter session
    pub fn start(&mut self) -> Result<(), SupervisorError> {
        self.controller.supervisor_mut().start()
    }

    pub fn execution_count(&self) -> u64 {
        self.execution_count
    }

    pub fn supervisor(&self) -> &Supervisor {
        self.controller.supervisor()
    }

    /// A teardown snippet ran; the host should call `terminate_app` once
    /// the reply is out
    pub fn teardown_requested(&self) -> bool {
        self.teardown_requested
    }

    pub fn execute(&mut self, params: &ExecuteParams) -> ExecuteResult {
        self.execution_count += 1;
        let count = self.execution_count;
        let outcome = self.controller.handle(count as i64, &params.code);

        let mut payload = Vec::new();
        if outcome.clear_screen {
            payload.push(ExecutePayload::ClearOutput);
        }
        if outcome.teardown {
            self.teardown_requested = true;
            payload.push(ExecutePayload::Teardown);
        }
        if outcome.reset {
            self.execution_count = 0;
        }

        let status = if outcome.failed {
            ExecuteStatus::Error
        } else {
            ExecuteStatus::Ok
        };
        debug!(execution_count = count, ?status, "Executed");

        let (stdout, stderr) = if params.silent {
            (None, None)
        } else {
            (non_empty(outcome.stdout), non_empty(outcome.stderr))
        };

        ExecuteResult {
            status,
            execution_count: count,
            stdout,
            stderr,
            payload,
        }
    }

    pub fn is_complete(&self, code: &str) -> Completeness {
        analyze(code)
    }

    /// Stop the session, or restart it and reset the counter.
    pub fn shutdown(&mut self, restart: bool) -> Result<ShutdownResult, SupervisorError> {
        let supervisor = self.controller.supervisor_mut();
        if restart {
            supervisor.restart()?;
            self.execution_count = 0;
            info!("Kernel restarted");
        } else {
            match supervisor.shutdown() {
                Ok(()) => info!("Kernel shut down"),
                Err(SupervisorError::NotRunning) => debug!("Shutdown with no interpreter running"),
                Err(e) => return Err(e),
            }
        }
        Ok(ShutdownResult { restarted: restart })
    }

    /// First `n` records across sessions, in the order sessions started.
    /// Anything but a `tail` request for inputs with a positive count
    /// yields nothing.
    pub fn history(&self, params: &HistoryParams) -> Result<HistoryResult, HistoryError> {
        let n = match params.n {
            Some(n) if n > 0 && params.hist_access_type == TAIL_ACCESS && !params.output => n,
            _ => return Ok(HistoryResult::default()),
        };

        let records = self.controller.supervisor().history().tail(n as usize)?;
        Ok(HistoryResult {
            history: records.into_iter().map(|r| r.into_tuple()).collect(),
        })
    }

    pub fn complete(&self, params: &CompleteParams) -> CompleteResult {
        CompleteResult::empty(params.cursor_pos)
    }

    pub fn inspect(&self, _params: &InspectParams) -> InspectResult {
        InspectResult::not_found()
    }

    pub fn kernel_info(&self) -> KernelInfoResult {
        KernelInfoResult::current()
    }

    /// Kill the interpreter, signal the parent and exit the process.
    pub fn terminate_app(&mut self) -> ! {
        self.controller.supervisor_mut().terminate_app()
    }
}

fn non_empty(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}
