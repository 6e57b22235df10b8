//! Test doubles for cluster commands
//!
//! Wraps [`MockCommandExecutor`] so that a single closure answers every
//! command, timeout-bound or not, and each invocation is recorded in order.

use std::sync::{Arc, Mutex};

use super::MockCommandExecutor;
use crate::Error;

/// Ordered record of the commands an executor received
#[derive(Clone, Default)]
pub(crate) struct CommandLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CommandLog {
    fn record(&self, args: &[String]) {
        self.calls.lock().unwrap().push(args.join(" "));
    }

    /// Every command, space-joined
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of commands starting with `prefix`
    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Index of the first command starting with `prefix`
    pub(crate) fn position(&self, prefix: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.starts_with(prefix))
    }

    /// Index of the last command starting with `prefix`
    pub(crate) fn last_position(&self, prefix: &str) -> Option<usize> {
        self.calls().iter().rposition(|c| c.starts_with(prefix))
    }
}

/// Executor that answers every command with `handler`
pub(crate) fn scripted_executor<F>(handler: F) -> (MockCommandExecutor, CommandLog)
where
    F: Fn(&[String]) -> Result<String, Error> + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    let log = CommandLog::default();
    let mut exec = MockCommandExecutor::new();

    let (h, l) = (handler.clone(), log.clone());
    exec.expect_execute().returning(move |_, args| {
        l.record(args);
        h(args)
    });

    let (h, l) = (handler, log.clone());
    exec.expect_execute_with_timeout()
        .returning(move |_, _, args| {
            l.record(args);
            h(args)
        });

    (exec, log)
}

/// Fallback for commands a test does not expect
pub(crate) fn unexpected(args: &[String]) -> Result<String, Error> {
    Err(Error::command(args, "unexpected ceph command"))
}
