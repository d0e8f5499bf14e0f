use std::{
    fs::OpenOptions,
    io::Write,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        mpsc::{self, Sender},
        Mutex, OnceLock,
    },
    thread,
};

use crate::utility::addon_root_dir;

/* =========================
   GLOBAL STATE
   ========================= */

static DEBUG: AtomicBool = AtomicBool::new(false);
static MIN_LEVEL: AtomicU8 = AtomicU8::new(Level::Warn as u8);
static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static LOG_TX: OnceLock<Mutex<Sender<String>>> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Level {
    /// `log_level` from config. Anything unrecognised means warn.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "error" => Self::Error,
            "info" | "debug" | "trace" => Self::Info,
            _ => Self::Warn,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Info,
            3 => Self::Error,
            _ => Self::Warn,
        }
    }
}

/// Debug mode lets everything through; errors always pass.
fn passes(level: Level, debug: bool, min: Level) -> bool {
    debug || level == Level::Error || level >= min
}

/* =========================
   PUBLIC API
   ========================= */

/// Start the writer thread. Later calls only adjust the filters.
pub fn init(debug: bool, level: &str) {
    set_debug(debug);
    set_level(level);
    if LOG_TX.get().is_some() {
        return;
    }

    let path = log_path().clone();
    let (tx, rx) = mpsc::channel::<String>();
    if LOG_TX.set(Mutex::new(tx)).is_err() {
        return;
    }

    let spawned = thread::Builder::new().name("livepaper-log".to_string()).spawn(move || {
        let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) else {
            return;
        };

        while let Ok(line) = rx.recv() {
            let _ = writeln!(file, "{line}");
            let _ = file.flush();
        }
    });
    if let Err(e) = spawned {
        eprintln!("livepaper: log writer unavailable: {e}");
    }
}

pub fn set_debug(debug: bool) {
    DEBUG.store(debug, Ordering::Relaxed);
}

pub fn set_level(level: &str) {
    MIN_LEVEL.store(Level::parse(level) as u8, Ordering::Relaxed);
}

#[inline]
pub fn should_log(level: Level) -> bool {
    passes(
        level,
        DEBUG.load(Ordering::Relaxed),
        Level::from_u8(MIN_LEVEL.load(Ordering::Relaxed)),
    )
}

/* =========================
   INTERNAL
   ========================= */

#[inline]
pub fn enqueue(level: Level, msg: String) {
    let Some(tx) = LOG_TX.get() else {
        return;
    };
    let line = format!("{} [{}] {msg}", timestamp(), level.tag());
    if let Ok(tx) = tx.lock() {
        let _ = tx.send(line);
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/* =========================
   MACROS
   ========================= */

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        if $crate::logging::should_log($crate::logging::Level::Info) {
            $crate::logging::enqueue($crate::logging::Level::Info, format!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        if $crate::logging::should_log($crate::logging::Level::Warn) {
            $crate::logging::enqueue($crate::logging::Level::Warn, format!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        $crate::logging::enqueue($crate::logging::Level::Error, format!($($arg)*));
    }};
}

/* =========================
   PATH
   ========================= */

fn log_path() -> &'static PathBuf {
    LOG_PATH.get_or_init(|| {
        let root = addon_root_dir();
        let _ = std::fs::create_dir_all(&root);
        root.join("sentinel.livepaper.log")
    })
}
