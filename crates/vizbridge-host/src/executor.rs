//! Command executor -- runs code units against one persistent environment.
//!
//! Bindings made by one call are visible to the next. The environment is
//! created lazily on first use and only ever replaced wholesale: on
//! [`Executor::reset`] or when a restore installs a fresh one.

use vizbridge_protocol::ExecutionReport;

use crate::capabilities::{Fault, OutputCapture, ScriptRuntime};

pub struct Executor<R: ScriptRuntime> {
    runtime: R,
    environment: Option<R::Environment>,
}

impl<R: ScriptRuntime> Executor<R> {
    pub fn new(runtime: R) -> Self {
        Self {
            runtime,
            environment: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.runtime.is_ready()
    }

    /// Run `code` and report its captured output.
    ///
    /// A fault in the code is a normal outcome (`ok = false`). `Err` means
    /// no environment could be created, so nothing ran.
    pub fn execute(&mut self, code: &str) -> Result<ExecutionReport, Fault> {
        if self.environment.is_none() {
            self.environment = Some(self.runtime.new_environment()?);
        }
        let Some(env) = self.environment.as_mut() else {
            return Err(Fault::new("execution environment unavailable"));
        };

        let mut output = OutputCapture::default();
        let outcome = self.runtime.run(env, code, &mut output);

        let report = match outcome {
            Ok(()) => ExecutionReport {
                ok: true,
                stdout: output.stdout,
                stderr: output.stderr,
                error: None,
                diagnostic: None,
            },
            Err(fault) => {
                tracing::debug!(error = %fault, "executor: code raised a fault");
                ExecutionReport {
                    ok: false,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    error: Some(fault.message),
                    diagnostic: fault.trace,
                }
            }
        };
        Ok(report)
    }

    /// Discard the environment and build a fresh one.
    ///
    /// If building fails the old environment is dropped anyway and the next
    /// `execute` retries creation.
    pub fn reset(&mut self) -> Result<(), Fault> {
        self.environment = None;
        let env = self.runtime.new_environment()?;
        self.environment = Some(env);
        Ok(())
    }

    /// Build an environment without installing it.
    pub fn fresh_environment(&mut self) -> Result<R::Environment, Fault> {
        self.runtime.new_environment()
    }

    /// Replace the live environment with `env`.
    pub fn install(&mut self, env: R::Environment) {
        self.environment = Some(env);
    }

    pub fn has_environment(&self) -> bool {
        self.environment.is_some()
    }
}
