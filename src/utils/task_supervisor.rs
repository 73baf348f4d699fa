use std::collections::BTreeMap;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{error, info};
use crate::error::{Error, Result};

/// Keeps the handles of long-running poll loops so the binary can notice a
/// loop that stopped and abort all of them on shutdown.
///
/// ```ignore
/// let mut supervisor = TaskSupervisor::new();
/// supervisor.spawn("poll:BTC", async move { /* loop */ });
/// if let Err(e) = supervisor.check_health() {
///     error!("{}", e);
/// }
/// ```
pub struct TaskSupervisor {
    tasks: BTreeMap<String, JoinHandle<()>>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        TaskSupervisor {
            tasks: BTreeMap::new(),
        }
    }

    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F) -> &mut Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        info!("Spawned task {}", name);
        if let Some(previous) = self.tasks.insert(name.clone(), tokio::spawn(future)) {
            previous.abort();
            info!("Replaced task {}", name);
        }
        self
    }

    /// Poll loops never finish on their own; a finished handle means the
    /// loop exited or panicked. Finished tasks are dropped from tracking.
    pub fn check_health(&mut self) -> Result<()> {
        let finished: Vec<String> = self.tasks.iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();

        if finished.is_empty() {
            return Ok(());
        }
        for name in &finished {
            self.tasks.remove(name);
        }
        let message = format!("tasks stopped unexpectedly: {}", finished.join(", "));
        error!("{}", message);
        Err(Error::TaskFailure(message))
    }

    pub fn active_task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn shutdown_all(&mut self) {
        info!("Shutting down {} tasks", self.tasks.len());
        for (name, handle) in std::mem::take(&mut self.tasks) {
            handle.abort();
            info!("Aborted task {}", name);
        }
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn detects_stopped_task() {
        let mut supervisor = TaskSupervisor::new();
        supervisor
            .spawn("forever", std::future::pending())
            .spawn("short", async {});
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = supervisor.check_health().unwrap_err();
        assert!(matches!(err, Error::TaskFailure(ref m) if m.contains("short")));
        assert_eq!(supervisor.active_task_count(), 1);
        assert!(supervisor.check_health().is_ok());

        supervisor.shutdown_all();
        assert_eq!(supervisor.active_task_count(), 0);
    }
}
