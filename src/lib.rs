//! Runtime audio substitution for a host page: maps configured sound paths
//! to replacement sources and patches every audio-loading entry point so
//! the swap is transparent to page code.

pub mod config;
pub mod host;
pub mod logging;
pub mod patch;
pub mod resolve;
pub mod update;

use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

use config::Config;
use host::Page;
use patch::library::WatchOutcome;
use resolve::Resolver;
use update::WindowMessage;

/// Handles to a live injection: the shared resolver, the update channel and
/// the library watcher, when one is running.
pub struct Injection {
    pub resolver: Arc<Resolver>,
    pub updates: mpsc::Sender<WindowMessage>,
    pub listener: JoinHandle<()>,
    pub library_watch: Option<JoinHandle<WatchOutcome>>,
}

/// Sets up substitution on `page`. Returns `None` when there is nothing to
/// do: the page was already injected, or the embedded configuration is
/// absent, malformed or disabled.
pub fn inject(page: &Arc<Page>) -> Option<Injection> {
    logging::init();

    if !page.mark_injected() {
        log::warn!("page already injected; leaving the existing layer in place");
        return None;
    }

    let config = Config::from_carrier(page.config_carrier.as_deref());

    if !config.enabled {
        log::info!("substitution disabled by configuration");
        return None;
    }

    log::info!(
        "initialising audio substitution ({} configured sound(s), package version {})",
        config.sounds.len(),
        env!("CARGO_PKG_VERSION")
    );

    let resolver = Arc::new(Resolver::new(
        config,
        page.location.clone(),
        page.script_url.clone(),
    ));

    let library_watch = patch::install_all(page, &resolver);

    let (updates, listener) = update::spawn(Arc::clone(&resolver), page.window);

    log::info!(
        "ready: intercepting element construction, source assignment, the audio library, request open and fetch"
    );

    Some(Injection {
        resolver,
        updates,
        listener,
        library_watch,
    })
}
