use std::collections::HashMap;
use std::time::Duration;

use conductor_core::api::OrchestratorEvent;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Progress bars for one plan run, fed from orchestrator events.
///
/// One overall bar counts finished tasks; every executing task gets a spinner
/// until it completes, fails or is skipped.
pub struct ProgressMonitor {
    multi: MultiProgress,
    overall: ProgressBar,
    task_bars: HashMap<String, ProgressBar>,
    enabled: bool,
}

impl ProgressMonitor {
    pub fn new(multi: MultiProgress, enabled: bool) -> Self {
        let overall = if enabled {
            let bar = multi.add(ProgressBar::new(0));
            if let Ok(style) = ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} tasks ({percent}%) {msg}")
            {
                bar.set_style(style.progress_chars("█▓▒░  "));
            }
            bar
        } else {
            ProgressBar::hidden()
        };

        Self {
            multi,
            overall,
            task_bars: HashMap::new(),
            enabled,
        }
    }

    pub fn observe(&mut self, event: &OrchestratorEvent) {
        if !self.enabled {
            return;
        }
        match event {
            OrchestratorEvent::PlanStarted { total_tasks, .. } => {
                self.overall.set_length(*total_tasks as u64);
                self.overall.set_message("starting");
            }
            OrchestratorEvent::BatchStarted {
                phase_id, task_ids, ..
            } => {
                self.overall
                    .set_message(format!("{phase_id}: {} task(s)", task_ids.len()));
            }
            OrchestratorEvent::TaskStarted {
                task_id, attempt, ..
            } => self.start_task(task_id, *attempt),
            OrchestratorEvent::TaskRetrying {
                task_id,
                attempt,
                delay_ms,
                ..
            } => {
                if let Some(bar) = self.task_bars.get(task_id) {
                    bar.set_message(format!("↻ {task_id} (attempt {attempt} in {delay_ms}ms)"));
                }
            }
            OrchestratorEvent::TaskCompleted {
                task_id,
                duration_ms,
                ..
            } => self.finish_task(task_id, format!("✅ {task_id} ({duration_ms}ms)")),
            OrchestratorEvent::TaskFailed { task_id, error, .. } => {
                if let Some(bar) = self.task_bars.remove(task_id) {
                    bar.finish_with_message(format!("❌ {task_id}: {error}"));
                }
            }
            OrchestratorEvent::TaskSkipped { task_id, .. } => {
                self.finish_task(task_id, format!("⏭ {task_id} (skipped)"))
            }
            OrchestratorEvent::RolledBack { checkpoint_id, .. } => {
                self.overall
                    .set_message(format!("rolled back to {checkpoint_id}"));
            }
            OrchestratorEvent::CheckpointReached { checkpoint_id, .. } => {
                self.overall
                    .set_message(format!("waiting at {checkpoint_id}"));
            }
            OrchestratorEvent::CheckpointResolved {
                checkpoint_id,
                decision,
                ..
            } => {
                self.overall
                    .set_message(format!("{checkpoint_id}: {decision}"));
            }
            OrchestratorEvent::PlanFinished { status, .. } => {
                self.overall.finish_with_message(format!("{status:?}"));
            }
        }
    }

    fn start_task(&mut self, task_id: &str, attempt: u32) {
        let bar = self.task_bars.entry(task_id.to_string()).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new_spinner());
            if let Ok(style) = ProgressStyle::default_spinner().template("  {spinner:.green} {msg}") {
                bar.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
            }
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        });
        if attempt > 1 {
            bar.set_message(format!("⏳ {task_id} (attempt {attempt})"));
        } else {
            bar.set_message(format!("⏳ {task_id}"));
        }
    }

    fn finish_task(&mut self, task_id: &str, message: String) {
        if let Some(bar) = self.task_bars.remove(task_id) {
            bar.finish_with_message(message);
        }
        self.overall.inc(1);
    }

    #[cfg(test)]
    fn position(&self) -> u64 {
        self.overall.position()
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        for (_, bar) in self.task_bars.drain() {
            bar.finish_and_clear();
        }
    }
}
