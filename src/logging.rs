//! Logging backend which writes to a file and, in debug builds, over UDP.

use chrono::Local;
use log::{Level, Metadata, Record};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::{fs::File, io::Write, net, sync::mpsc, sync::Mutex};

/// Where debug builds send packed log messages.
const DEBUG_SINK: &str = "127.0.0.1:4568";

#[derive(Clone, Copy, Serialize, Deserialize)]
enum MessageType {
    Normal,
    Error,
    Warning,
    Debug,
}

#[derive(Serialize, Deserialize)]
struct Message {
    module: String,
    msg_type: MessageType,
    string: String,
    time: String,
}

impl Message {
    fn pack(&self) -> Option<Vec<u8>> {
        let serialized = bincode::serialize::<Message>(self).ok()?;

        let mut bytes = Vec::from(u32::to_le_bytes(serialized.len() as u32 + 4));
        bytes.extend(&serialized);

        Some(bytes)
    }

    fn write_to_file(&self, file: &mut File) {
        let level_name = match self.msg_type {
            MessageType::Normal => "info",
            MessageType::Error => "error",
            MessageType::Warning => "warning",
            MessageType::Debug => "debug",
        };

        //      [date time] [module] [level] Text
        let _ = file.write_fmt(format_args!(
            "[{}] [{}] [{}] {}\n",
            self.time, self.module, level_name, self.string
        ));
    }
}

pub struct Logger;

impl Logger {
    fn commit(&self, record: &Record) {
        let msg_type = match record.level() {
            Level::Error => MessageType::Error,
            Level::Warn => MessageType::Warning,
            Level::Info => MessageType::Normal,
            Level::Debug | Level::Trace => MessageType::Debug,
        };

        let module_path = match record.module_path() {
            Some(path) => path,
            None => return,
        };

        let message = Message {
            module: module_path
                .split("::")
                .last()
                .unwrap_or("unknown")
                .to_string(),
            msg_type,
            string: format!("{}", record.args()),
            time: Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        };

        if let Some(sender) = MSG_SENDER.get() {
            if let Ok(sender) = sender.lock() {
                let _ = sender.send(message);
            }
        }
    }
}

impl log::Log for Logger {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.commit(record);
        }
    }

    fn flush(&self) {}
}

static LOGGER: Logger = Logger;
static MSG_SENDER: OnceCell<Mutex<mpsc::Sender<Message>>> = OnceCell::new();
static INIT: OnceCell<()> = OnceCell::new();

/// Installs the logger, the writer thread and the panic hook. Safe to call
/// more than once; only the first call does anything.
///
/// The panic hook only records the panic. Substitution is best-effort and
/// must never take the host page down with it, so the previous hook runs
/// afterwards and nothing aborts here.
pub fn init() {
    INIT.get_or_init(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let backtrace = std::backtrace::Backtrace::force_capture();
            log::error!("panic in audio substitution layer: {info}\n{backtrace}");
            previous(info);
        }));

        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(log::LevelFilter::max());
        }

        let (sender, receiver) = mpsc::channel();
        let _ = MSG_SENDER.set(Mutex::new(sender));

        // Only attempt to connect over UDP if we're in debug mode.
        let socket = if cfg!(feature = "debug") {
            net::UdpSocket::bind("0.0.0.0:0").ok()
        } else {
            None
        };

        let mut file = File::create(std::env::temp_dir().join("resound.log")).ok();

        // Write on a background thread so the page's call paths never block
        // on file or socket I/O.
        std::thread::spawn(move || {
            while let Ok(msg) = receiver.recv() {
                if let Some(file) = file.as_mut() {
                    msg.write_to_file(file);
                }

                if let Some(socket) = &socket {
                    if let Some(bin) = msg.pack() {
                        let _ = socket.send_to(&bin, DEBUG_SINK);
                    }
                }
            }
        });
    });
}
