//! Ordered cleanup callbacks run once on the way out, whatever the way out is:
//! normal exit, quit command, stdin EOF, a panic, or a console control event.

use std::{
    any::Any,
    cell::Cell,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
};

use parking_lot::Mutex;

use crate::{error, info};

type Hook = Box<dyn FnOnce() + Send>;

thread_local! {
    static CONTAINED: Cell<bool> = const { Cell::new(false) };
}

static GLOBAL: OnceLock<Arc<ShutdownHooks>> = OnceLock::new();

pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run `f`, turning a panic into `Err(message)`. While inside, the process
/// panic hook only logs instead of shutting down.
pub fn contain<R>(f: impl FnOnce() -> R) -> std::result::Result<R, String> {
    let outer = CONTAINED.with(|c| c.replace(true));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    CONTAINED.with(|c| c.set(outer));
    result.map_err(|payload| panic_message(payload.as_ref()))
}

pub fn is_contained() -> bool {
    CONTAINED.with(Cell::get)
}

#[derive(Default)]
pub struct ShutdownHooks {
    hooks: Mutex<Vec<(String, Hook)>>,
    ran: AtomicBool,
}

impl ShutdownHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, hook: impl FnOnce() + Send + 'static) {
        self.hooks.lock().push((name.to_string(), Box::new(hook)));
    }

    #[cfg(test)]
    pub fn has_run(&self) -> bool {
        self.ran.load(Ordering::SeqCst)
    }

    /// Run every hook in registration order. Only the first call does
    /// anything; returns how many hooks completed without panicking.
    pub fn run(&self, reason: &str) -> usize {
        if self.ran.swap(true, Ordering::SeqCst) {
            return 0;
        }

        let hooks = std::mem::take(&mut *self.hooks.lock());
        info!("[LIVEPAPER][SHUTDOWN] Running {} hook(s): {}", hooks.len(), reason);

        let mut completed = 0;
        for (name, hook) in hooks {
            match contain(hook) {
                Ok(()) => completed += 1,
                Err(msg) => error!("[LIVEPAPER][SHUTDOWN] Hook '{}' panicked: {}", name, msg),
            }
        }
        completed
    }
}

/// Make `hooks` reachable from the panic hook and the console handler.
pub fn install_global(hooks: Arc<ShutdownHooks>) {
    let _ = GLOBAL.set(hooks);
}

pub fn run_global(reason: &str) {
    if let Some(hooks) = GLOBAL.get() {
        hooks.run(reason);
    }
}

/// Log every panic; panics outside [`contain`] also trigger the shutdown
/// hooks so the wallpaper is restored before the process dies.
pub fn install_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        if is_contained() {
            error!("[LIVEPAPER][PANIC] Contained: {}", panic_info);
            return;
        }
        error!("[LIVEPAPER][PANIC] {}", panic_info);
        run_global("panic");
    }));
}

#[cfg(windows)]
pub fn install_console_handler() {
    use windows::core::BOOL;
    use windows::Win32::System::Console::SetConsoleCtrlHandler;

    unsafe extern "system" fn handler(ctrl_type: u32) -> BOOL {
        run_global(&format!("console control event {ctrl_type}"));
        // Let the default handler terminate the process.
        BOOL(0)
    }

    unsafe {
        if SetConsoleCtrlHandler(Some(handler), true).is_err() {
            crate::warn!("[LIVEPAPER][SHUTDOWN] SetConsoleCtrlHandler failed");
        }
    }
}

#[cfg(not(windows))]
pub fn install_console_handler() {}
