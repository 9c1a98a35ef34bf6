//! Maps observed resource URLs to sound ids and sound ids to replacement
//! sources. `Resolver` is the shared context handed to every interception
//! point; it owns the configuration, the path index and the memo cache.

use std::collections::HashMap;
use std::sync::Mutex;

use cached::proc_macro::cached;
use itertools::Itertools;

use crate::config::{Config, ConfigUpdate, Mode, SoundId};
use crate::host::Source;

/// A concrete replacement source for a sound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Replacement {
    /// A self-contained inline payload (a `data:` URI), usable directly.
    Inline(String),

    /// A fetchable asset URL.
    Asset(String),
}

impl Replacement {
    fn classify(value: String) -> Replacement {
        if value.starts_with("data:") {
            Replacement::Inline(value)
        } else {
            Replacement::Asset(value)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Replacement::Inline(value) | Replacement::Asset(value) => value,
        }
    }

    pub fn into_string(self) -> String {
        match self {
            Replacement::Inline(value) | Replacement::Asset(value) => value,
        }
    }
}

/// The path-to-id index, rebuilt wholesale from the configuration and never
/// patched incrementally.
///
/// Entries are kept sorted by descending path length, so a lookup that could
/// suffix-match more than one configured path resolves to the longest one.
#[derive(Debug, Default)]
struct PathIndex {
    entries: Vec<(String, SoundId)>,
}

impl PathIndex {
    fn build(config: &Config) -> PathIndex {
        // Flatten the main path and every alias for each sound. Sounds are
        // iterated in id order, so an identical path claimed twice resolves
        // deterministically to the later id.
        let mut by_path: HashMap<&str, &str> = HashMap::new();

        for (id, sound) in &config.sounds {
            for path in sound.all_paths() {
                log::trace!("mapping {path} -> {id} ({})", sound.mode);
                by_path.insert(path, id.as_str());
            }
        }

        let entries = by_path
            .into_iter()
            .map(|(path, id)| (path.to_string(), id.to_string()))
            .sorted_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)))
            .collect_vec();

        log::debug!("path index rebuilt with {} entries", entries.len());

        PathIndex { entries }
    }

    fn lookup(&self, pathname: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(path, _)| pathname == path.as_str() || pathname.ends_with(path.as_str()))
            .map(|(_, id)| id.as_str())
    }
}

pub struct Resolver {
    config: Mutex<Config>,
    index: Mutex<PathIndex>,
    cache: Mutex<HashMap<SoundId, Replacement>>,
    location: String,
    script_url: Option<String>,
}

impl Resolver {
    pub fn new(config: Config, location: impl Into<String>, script_url: Option<String>) -> Resolver {
        let index = PathIndex::build(&config);

        Resolver {
            config: Mutex::new(config),
            index: Mutex::new(index),
            cache: Mutex::new(HashMap::new()),
            location: location.into(),
            script_url,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.lock().unwrap().enabled
    }

    /// Maps a candidate source to the id of a configured sound.
    ///
    /// A list candidate is represented by its first entry only: the first
    /// entry is taken to stand for the logical asset across formats.
    pub fn resolve_sound_id(&self, candidate: &Source) -> Option<SoundId> {
        let url = match candidate {
            Source::Url(url) => url,
            Source::List(list) => match list.first() {
                Some(Source::Url(url)) => url,
                _ => return None,
            },
            Source::Opaque => return None,
        };

        let pathname = pathname(url, &self.location)?;

        let index = self.index.lock().unwrap();
        index.lookup(&pathname).map(str::to_string)
    }

    /// Maps a sound id to its replacement source, if one applies. Never
    /// performs I/O; fetching the replacement is the delegated-to API's job.
    pub fn resolve_source(&self, id: &str) -> Option<Replacement> {
        let config = self.config.lock().unwrap();

        if !config.enabled {
            return None;
        }

        let sound = config.sounds.get(id)?;

        match sound.mode {
            // No substitution, even when stale custom data is still present.
            Mode::Original => None,

            Mode::Custom => {
                if let Some(hit) = self.cache.lock().unwrap().get(id) {
                    return Some(hit.clone());
                }

                let data = match &sound.custom_data {
                    Some(data) => data.clone(),
                    None => {
                        log::warn!("sound '{id}' is set to custom audio but has no data");
                        return None;
                    }
                };

                let replacement = Replacement::classify(data);

                self.cache
                    .lock()
                    .unwrap()
                    .insert(id.to_string(), replacement.clone());

                Some(replacement)
            }

            Mode::Preset => {
                let file = match &sound.preset_file {
                    Some(file) => file,
                    None => {
                        log::warn!("sound '{id}' is set to a preset but names no file");
                        return None;
                    }
                };

                let base = match self.script_url.clone().and_then(installation_base) {
                    Some(base) => base,
                    None => {
                        log::warn!("cannot resolve preset for '{id}': installation base unknown");
                        return None;
                    }
                };

                // The sound id doubles as the preset category segment.
                Some(Replacement::Asset(format!(
                    "{base}sounds/{id}/{}",
                    encode_component(file)
                )))
            }
        }
    }

    /// Composes id and source resolution: the single call every interception
    /// point makes. `None` means "leave the original source alone".
    pub fn replacement_for(&self, candidate: &Source) -> Option<(SoundId, Replacement)> {
        let id = self.resolve_sound_id(candidate)?;
        let replacement = self.resolve_source(&id)?;

        Some((id, replacement))
    }

    /// Applies a validated live update: merge, then a full index rebuild and
    /// full cache invalidation. Only resolutions that start after this call
    /// observe the new configuration.
    pub fn apply_update(&self, update: ConfigUpdate) {
        let mut config = self.config.lock().unwrap();
        config.merge(update);

        *self.index.lock().unwrap() = PathIndex::build(&config);
        self.cache.lock().unwrap().clear();

        log::info!("configuration updated; changes apply to new audio requests");
    }
}

/// Derives the installation base from the executing script's own URL by
/// dropping the final path segment. Memoized: the script location never
/// changes within a page's lifetime.
#[cached]
fn installation_base(script_url: String) -> Option<String> {
    let cut = script_url.rfind('/')?;
    let base = &script_url[..=cut];

    // A bare scheme shell ("https://") is not a location we can extend.
    if base.ends_with("//") {
        return None;
    }

    Some(base.to_string())
}

/// Extracts the path component of `candidate` resolved against the page
/// location `base`. Anything unparseable yields `None` rather than an error,
/// so a malformed URL can never break unrelated playback.
fn pathname(candidate: &str, base: &str) -> Option<String> {
    let candidate = strip_after(strip_after(candidate, '#'), '?');

    if candidate.is_empty() {
        return None;
    }

    if let Some(rest) = candidate.strip_prefix("//") {
        return Some(path_after_authority(rest));
    }

    if let Some((scheme, rest)) = split_scheme(candidate) {
        if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
            // Non-hierarchical schemes have no pathname to match against.
            return None;
        }

        let rest = rest.strip_prefix("//")?;
        return Some(path_after_authority(rest));
    }

    if candidate.starts_with('/') {
        return Some(normalise(candidate));
    }

    // A relative reference resolves against the directory of the base path.
    let base_path = base_pathname(base);
    let dir = match base_path.rfind('/') {
        Some(pos) => base_path[..=pos].to_string(),
        None => "/".to_string(),
    };

    Some(normalise(&format!("{dir}{candidate}")))
}

fn strip_after(s: &str, marker: char) -> &str {
    match s.find(marker) {
        Some(pos) => &s[..pos],
        None => s,
    }
}

/// Splits `scheme:rest`, requiring the usual scheme shape: a letter followed
/// by letters, digits, `+`, `-` or `.`.
fn split_scheme(s: &str) -> Option<(&str, &str)> {
    let colon = s.find(':')?;
    let scheme = &s[..colon];

    let mut chars = scheme.chars();
    let first = chars.next()?;

    if !first.is_ascii_alphabetic() {
        return None;
    }

    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        return None;
    }

    Some((scheme, &s[colon + 1..]))
}

/// Given everything after `scheme://`, skips the authority and returns the
/// normalised path.
fn path_after_authority(rest: &str) -> String {
    match rest.find('/') {
        Some(pos) => normalise(&rest[pos..]),
        None => "/".to_string(),
    }
}

fn base_pathname(base: &str) -> String {
    pathname(base, "/").unwrap_or_else(|| "/".to_string())
}

/// Collapses empty, `.` and `..` segments. The input always starts with `/`.
fn normalise(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    format!("/{}", segments.join("/"))
}

/// Percent-encodes `value` for use as a single path segment. Matches the
/// usual component-encoding unreserved set.
fn encode_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());

    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(byte as char),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }

    out
}
