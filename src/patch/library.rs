//! Override for the third-party audio library's sound constructor, with a
//! bounded watch for the library arriving after injection.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use once_cell::sync::Lazy;

use crate::host::{LibraryConstructor, Page, Source};
use crate::resolve::Resolver;

/// How often the watcher re-checks for the library global.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How many checks the watcher makes before giving up.
pub const POLL_BUDGET: u32 = 50;

/// Formats a substituted source may plausibly use. The library's declared
/// hint can't be trusted once the source has been swapped.
static WIDENED_FORMATS: Lazy<Vec<String>> = Lazy::new(|| {
    ["mp3", "wav", "ogg", "webm"]
        .iter()
        .map(|format| format.to_string())
        .collect()
});

/// The result of a bounded watch for the library global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The library appeared and was wrapped on the given attempt.
    Installed { attempts: u32 },

    /// The attempt budget ran out. The other interception points carry on.
    Exhausted,
}

/// Wraps the library constructor now if the library has loaded; otherwise
/// starts a bounded background watch and returns its handle.
pub fn install(page: &Arc<Page>, resolver: &Arc<Resolver>) -> Option<JoinHandle<WatchOutcome>> {
    if try_install(page, resolver) {
        log::info!("audio library constructor wrapped");
        return None;
    }

    Some(watch(
        Arc::clone(page),
        Arc::clone(resolver),
        POLL_INTERVAL,
        POLL_BUDGET,
    ))
}

fn try_install(page: &Arc<Page>, resolver: &Arc<Resolver>) -> bool {
    let resolver = Arc::clone(resolver);
    page.try_replace_library(|original| wrap(original, resolver))
}

/// Polls for the library on a background thread. The loop ends on the first
/// successful wrap, so an already-wrapped constructor is never wrapped again;
/// running out of attempts is reported rather than retried forever.
pub fn watch(
    page: Arc<Page>,
    resolver: Arc<Resolver>,
    interval: Duration,
    budget: u32,
) -> JoinHandle<WatchOutcome> {
    thread::spawn(move || {
        for attempt in 1..=budget {
            thread::sleep(interval);

            if try_install(&page, &resolver) {
                log::info!("audio library constructor wrapped after {attempt} attempt(s)");
                return WatchOutcome::Installed { attempts: attempt };
            }
        }

        log::warn!("audio library never appeared; continuing with the other interception points");
        WatchOutcome::Exhausted
    })
}

/// Builds the replacement constructor. Only the first entry of the source
/// list is rewritten, the format hint is widened, and the prototype token
/// and every static member are copied over so no capability is lost.
fn wrap(original: LibraryConstructor, resolver: Arc<Resolver>) -> LibraryConstructor {
    let proto = original.proto;
    let statics = original.statics.clone();

    LibraryConstructor::new(proto, statics, move |mut options| {
        let first = options.src.first().cloned();

        if let Some(first) = first {
            if let Some((id, replacement)) = resolver.replacement_for(&first) {
                log::info!("library constructor intercepted for '{id}'");
                options.src[0] = Source::Url(replacement.into_string());
                options.format = WIDENED_FORMATS.clone();
            }
        }

        original.construct(options)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Mode, SoundConfig};
    use crate::host::LibraryOptions;

    const DATA: &str = "data:audio/mp3;base64,AAAA";

    fn fixture(with_library: bool) -> (Arc<Page>, Arc<Resolver>) {
        let page = Arc::new(Page::new("https://host.example/app", 1));

        if with_library {
            page.provide_library(LibraryConstructor::native(5));
        }

        let mut config = Config::default();
        config.enabled = true;
        config.sounds.insert(
            "incoming".to_string(),
            SoundConfig {
                path: Some("/client/incoming.mp3".to_string()),
                mode: Mode::Custom,
                custom_data: Some(DATA.to_string()),
                ..SoundConfig::default()
            },
        );

        let resolver = Arc::new(Resolver::new(config, page.location.clone(), None));

        (page, resolver)
    }

    #[test]
    fn wrap_rewrites_only_the_first_source_entry() {
        let (page, resolver) = fixture(true);

        assert!(install(&page, &resolver).is_none());

        let sound = page
            .new_library_sound(LibraryOptions {
                src: vec![
                    Source::Url("/client/incoming.mp3".to_string()),
                    Source::Url("/client/incoming.ogg".to_string()),
                ],
                format: vec!["mp3".to_string()],
                volume: Some(0.5),
                autoplay: false,
            })
            .unwrap();

        assert_eq!(sound.options.src[0], Source::Url(DATA.to_string()));
        assert_eq!(
            sound.options.src[1],
            Source::Url("/client/incoming.ogg".to_string())
        );
        assert_eq!(sound.options.format, vec!["mp3", "wav", "ogg", "webm"]);
        assert_eq!(sound.options.volume, Some(0.5));
    }

    #[test]
    fn wrap_copies_prototype_and_statics() {
        let (page, resolver) = fixture(true);
        let statics_before = page.library_statics().unwrap();
        let proto_before = page.library_proto().unwrap();

        install(&page, &resolver);

        assert_eq!(page.library_proto(), Some(proto_before));
        assert_eq!(page.library_statics(), Some(statics_before));
    }

    #[test]
    fn miss_leaves_options_untouched() {
        let (page, resolver) = fixture(true);
        install(&page, &resolver);

        let options = LibraryOptions {
            src: vec![Source::Url("/other.mp3".to_string())],
            format: vec!["mp3".to_string()],
            ..LibraryOptions::default()
        };

        let sound = page.new_library_sound(options.clone()).unwrap();
        assert_eq!(sound.options, options);
    }

    #[test]
    fn watch_wraps_a_late_library_and_stops() {
        let (page, resolver) = fixture(false);

        let handle = watch(
            Arc::clone(&page),
            Arc::clone(&resolver),
            Duration::from_millis(5),
            40,
        );

        thread::sleep(Duration::from_millis(25));
        page.provide_library(LibraryConstructor::native(5));

        // Joining proves the watcher terminated on success, so no later
        // attempt can wrap the constructor a second time.
        match handle.join().unwrap() {
            WatchOutcome::Installed { attempts } => assert!(attempts <= 40),
            WatchOutcome::Exhausted => panic!("watcher gave up with the library present"),
        }

        let sound = page
            .new_library_sound(LibraryOptions {
                src: vec![Source::Url("/client/incoming.mp3".to_string())],
                ..LibraryOptions::default()
            })
            .unwrap();

        assert_eq!(sound.options.src[0], Source::Url(DATA.to_string()));
    }

    #[test]
    fn watch_exhausts_when_the_library_never_appears() {
        let (page, resolver) = fixture(false);

        let handle = watch(
            Arc::clone(&page),
            Arc::clone(&resolver),
            Duration::from_millis(1),
            3,
        );

        assert_eq!(handle.join().unwrap(), WatchOutcome::Exhausted);
        assert!(!page.has_library());
    }
}
