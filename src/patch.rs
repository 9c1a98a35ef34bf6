//! The five interception points. Each patch is independently installable,
//! substitutes on a resolution hit and silently falls through to the
//! original behaviour on any miss.

pub mod element;
pub mod library;
pub mod net;

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::host::Page;
use crate::resolve::Resolver;

/// Installs every interception point. Returns the library watcher handle
/// when the library was absent and a bounded watch had to be started.
pub fn install_all(
    page: &Arc<Page>,
    resolver: &Arc<Resolver>,
) -> Option<JoinHandle<library::WatchOutcome>> {
    element::install(page, resolver);
    net::install(page, resolver);
    library::install(page, resolver)
}
