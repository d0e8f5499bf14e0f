//! Owns the schedulers and applies commands to the shared pipeline.

use std::{sync::Arc, time::Duration};

use chrono::Local;
use parking_lot::Mutex;

use crate::{
    commands::{Command, CommandReply},
    error::Result,
    info,
    pipeline::{MonitorSelection, RenderOutcome, RenderPipeline},
    scheduler::{SchedulerState, TickScheduler},
    warn,
};

pub type SharedPipeline = Arc<Mutex<RenderPipeline>>;

fn render_job(pipeline: SharedPipeline, source: &'static str) -> impl FnMut(chrono::DateTime<Local>) + Send {
    move |now| {
        let outcome = pipeline.lock().render(now);
        if outcome == RenderOutcome::Abandoned {
            warn!("[LIVEPAPER][{}] Frame abandoned", source);
        }
    }
}

pub struct Runtime {
    pipeline: SharedPipeline,
    ticker: TickScheduler,
    timer: TickScheduler,
}

impl Runtime {
    pub fn new(pipeline: SharedPipeline) -> Self {
        Self {
            pipeline,
            ticker: TickScheduler::second_aligned(),
            timer: TickScheduler::every(Duration::from_secs(60)),
        }
    }

    pub fn pipeline(&self) -> &SharedPipeline {
        &self.pipeline
    }

    pub fn render_now(&self) -> RenderOutcome {
        self.pipeline.lock().render(Local::now())
    }

    pub fn start_ticker(&mut self) -> Result<bool> {
        self.ticker.start(render_job(Arc::clone(&self.pipeline), "TICK"))
    }

    /// (Re)start the user timer with a new period.
    pub fn start_timer(&mut self, period: Duration) -> Result<bool> {
        self.timer.stop();
        self.timer = TickScheduler::every(period);
        self.timer.start(render_job(Arc::clone(&self.pipeline), "TIMER"))
    }

    pub fn stop_timer(&mut self) {
        self.timer.stop();
    }

    /// Stop both schedulers. Must not be called with the pipeline locked.
    pub fn stop_all(&mut self) {
        self.ticker.stop();
        self.timer.stop();
    }

    pub fn execute(&mut self, command: Command) -> CommandReply {
        match command {
            Command::Select(selection) => {
                let count = self.pipeline.lock().monitor_count();
                if let MonitorSelection::Index(i) = selection {
                    if i >= count {
                        return CommandReply::say(format!("monitor {i} does not exist ({count} connected)"));
                    }
                }
                self.pipeline.lock().set_selection(selection);
                CommandReply::say(format!("selected {selection:?}"))
            }
            Command::Update => match self.render_now() {
                RenderOutcome::Published { monitors, .. } => {
                    CommandReply::say(format!("updated {monitors} monitor(s)"))
                }
                RenderOutcome::Skipped => CommandReply::say("update skipped"),
                RenderOutcome::Abandoned => CommandReply::say("update failed; previous frame kept"),
            },
            Command::TimerStart(period) => match self.start_timer(period) {
                Ok(_) => CommandReply::say(format!("timer every {}s", period.as_secs())),
                Err(e) => CommandReply::say(format!("timer failed to start: {e}")),
            },
            Command::TimerStop => {
                self.stop_timer();
                CommandReply::say("timer stopped")
            }
            Command::Status => {
                let line = self.pipeline.lock().status_line();
                let ticker = if self.ticker.state() == SchedulerState::Running { "on" } else { "off" };
                let timer = if self.timer.state() == SchedulerState::Running { "on" } else { "off" };
                CommandReply::say(format!("{line} ticker={ticker} timer={timer}"))
            }
            Command::Reload => {
                let loaded = self.pipeline.lock().reload_widgets();
                info!("[LIVEPAPER][COMMAND] Reloaded {} widget(s)", loaded);
                CommandReply::say(format!("reloaded {loaded} widget(s)"))
            }
            Command::Quit => {
                self.stop_all();
                CommandReply::quit("restoring wallpaper and exiting")
            }
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{BackendMode, PublishPolicy, WallpaperBackend},
        backup::BackupRestoreManager,
        base_cache::NEUTRAL_FILL,
        compositor::MonitorBackground,
        geometry::Rect,
        placement::PlacementBus,
        platform::{DesktopShell, HeadlessShell},
        utility::AddonDirs,
        widgets::{WidgetPluginHost, WidgetRegistry},
    };
    use tempfile::TempDir;

    fn runtime() -> (TempDir, Runtime) {
        let tmp = TempDir::new().unwrap();
        let dirs = AddonDirs::under(tmp.path());
        dirs.create_all().unwrap();
        let shell: Arc<dyn DesktopShell> =
            Arc::new(HeadlessShell::new(vec![Rect::new(0, 0, 32, 16), Rect::new(32, 0, 32, 16)]));
        let backup = Arc::new(BackupRestoreManager::new(Arc::clone(&shell), dirs.clone()));
        let backend = WallpaperBackend::select(
            Arc::clone(&shell),
            BackendMode::Span,
            &dirs.output,
            PublishPolicy::default(),
        );
        let host = WidgetPluginHost::new(WidgetRegistry::with_builtins(), Arc::new(PlacementBus::new()));
        let pipeline = RenderPipeline::new(shell, backup, backend, host, MonitorBackground::Solid, NEUTRAL_FILL);
        (tmp, Runtime::new(Arc::new(Mutex::new(pipeline))))
    }

    #[test]
    fn commands_drive_the_pipeline() {
        let (_tmp, mut rt) = runtime();

        assert_eq!(rt.execute(Command::Update).message, "updated 2 monitor(s)");
        assert!(rt.execute(Command::Select(MonitorSelection::Index(5))).message.contains("does not exist"));
        rt.execute(Command::Select(MonitorSelection::Index(1)));
        assert_eq!(rt.pipeline().lock().selection(), MonitorSelection::Index(1));

        let status = rt.execute(Command::Status).message;
        assert!(status.contains("frames=1"), "{status}");
        assert!(status.contains("timer=off"), "{status}");

        let quit = rt.execute(Command::Quit);
        assert!(quit.quit);
    }

    #[test]
    fn timer_renders_until_stopped() {
        let (_tmp, mut rt) = runtime();
        rt.start_timer(Duration::from_millis(10)).unwrap();
        std::thread::sleep(Duration::from_millis(80));
        rt.execute(Command::TimerStop);
        let frames = rt.pipeline().lock().stats().frames;
        assert!(frames >= 2, "only {frames} frame(s)");
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(rt.pipeline().lock().stats().frames, frames);
    }
}
