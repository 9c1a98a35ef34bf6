//! Models the page's audio-loading surface: the constructors, accessors and
//! network primitives that the patch layer swaps out in place. Page code
//! calls through these slots exactly as it would call the real entry points.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Identity token for a window. Live-update messages carry the sender's id,
/// which must match the page's own id to be accepted.
pub type WindowId = u64;

/// Identity token for a constructor's prototype. A wrapper must carry the
/// original's token over so identity checks against the original type still
/// pass after patching.
pub type ProtoId = u32;

/// The prototype shared by media elements created through the page's own
/// audio constructor.
pub const PROTO_AUDIO: ProtoId = 1;

/// A candidate source value as page code supplies it: a URL string, an
/// ordered list of fallback candidates, or something that is neither.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Url(String),
    List(Vec<Source>),
    Opaque,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// A media element. The raw source slot is written only through the page's
/// accessor pair, mirroring the property it models.
#[derive(Debug)]
pub struct MediaElement {
    pub kind: MediaKind,
    pub proto: ProtoId,
    src: String,
}

impl MediaElement {
    pub fn new(kind: MediaKind, proto: ProtoId) -> MediaElement {
        MediaElement {
            kind,
            proto,
            src: String::new(),
        }
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    /// Writes the raw slot directly. Only the native accessor should do this;
    /// everything else goes through `Page::set_src`.
    pub fn write_src(&mut self, value: &str) {
        self.src = value.to_string();
    }
}

/// The audio element constructor.
pub struct AudioConstructor {
    pub proto: ProtoId,
    build: Box<dyn Fn(Option<Source>) -> MediaElement + Send + Sync>,
}

impl AudioConstructor {
    pub fn new(
        proto: ProtoId,
        build: impl Fn(Option<Source>) -> MediaElement + Send + Sync + 'static,
    ) -> AudioConstructor {
        AudioConstructor {
            proto,
            build: Box::new(build),
        }
    }

    /// The page's own constructor: creates an audio element and assigns the
    /// source directly if one was given.
    pub fn native(proto: ProtoId) -> AudioConstructor {
        AudioConstructor::new(proto, move |src| {
            let mut element = MediaElement::new(MediaKind::Audio, proto);

            if let Some(Source::Url(url)) = src {
                element.write_src(&url);
            }

            element
        })
    }

    pub fn construct(&self, src: Option<Source>) -> MediaElement {
        (self.build)(src)
    }
}

pub type Getter = Box<dyn Fn(&MediaElement) -> String + Send + Sync>;
pub type Setter = Box<dyn Fn(&mut MediaElement, Source) + Send + Sync>;

/// The source accessor pair on the shared media-element prototype.
pub struct SrcAccessor {
    getter: Getter,
    setter: Setter,
}

impl SrcAccessor {
    pub fn new(
        getter: impl Fn(&MediaElement) -> String + Send + Sync + 'static,
        setter: impl Fn(&mut MediaElement, Source) + Send + Sync + 'static,
    ) -> SrcAccessor {
        SrcAccessor::from_parts(Box::new(getter), Box::new(setter))
    }

    pub fn from_parts(getter: Getter, setter: Setter) -> SrcAccessor {
        SrcAccessor { getter, setter }
    }

    pub fn native() -> SrcAccessor {
        SrcAccessor::new(
            |element| element.src().to_string(),
            |element, value| match value {
                Source::Url(url) => element.write_src(&url),

                // The real setter coerces; nothing else stringifies to a
                // playable location.
                _ => element.write_src(""),
            },
        )
    }

    pub fn get(&self, element: &MediaElement) -> String {
        (self.getter)(element)
    }

    pub fn set(&self, element: &mut MediaElement, value: Source) {
        (self.setter)(element, value)
    }

    /// Splits the pair so a patch can keep one half and wrap the other.
    pub fn into_parts(self) -> (Getter, Setter) {
        (self.getter, self.setter)
    }
}

/// Options accepted by the third-party library's sound constructor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LibraryOptions {
    pub src: Vec<Source>,
    pub format: Vec<String>,
    pub volume: Option<f64>,
    pub autoplay: bool,
}

/// A sound handle produced by the library. Keeps the options it was built
/// from so behaviour is observable.
#[derive(Debug)]
pub struct LibrarySound {
    pub options: LibraryOptions,
}

/// The third-party library's sound constructor, including the static members
/// page code may reach through it.
pub struct LibraryConstructor {
    pub proto: ProtoId,
    pub statics: BTreeMap<String, String>,
    build: Box<dyn Fn(LibraryOptions) -> LibrarySound + Send + Sync>,
}

impl LibraryConstructor {
    pub fn new(
        proto: ProtoId,
        statics: BTreeMap<String, String>,
        build: impl Fn(LibraryOptions) -> LibrarySound + Send + Sync + 'static,
    ) -> LibraryConstructor {
        LibraryConstructor {
            proto,
            statics,
            build: Box::new(build),
        }
    }

    pub fn native(proto: ProtoId) -> LibraryConstructor {
        let statics = BTreeMap::from([
            ("usingWebAudio".to_string(), "true".to_string()),
            ("volume".to_string(), "fn".to_string()),
            ("mute".to_string(), "fn".to_string()),
            ("unload".to_string(), "fn".to_string()),
        ]);

        LibraryConstructor::new(proto, statics, |options| LibrarySound { options })
    }

    pub fn construct(&self, options: LibraryOptions) -> LibrarySound {
        (self.build)(options)
    }
}

/// A request produced by the networking primitive's open entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedRequest {
    pub method: String,
    pub url: String,
    pub rest: Vec<String>,
}

pub type OpenFn = Box<dyn Fn(&str, &str, &[String]) -> OpenedRequest + Send + Sync>;

/// Input accepted by fetch: a plain URL, a request-like object, or something
/// the layer cannot interpret.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchInput {
    Url(String),
    Request { url: String },
    Opaque,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

pub type FetchFn = Box<dyn Fn(FetchInput) -> FetchResponse + Send + Sync>;

fn native_open() -> OpenFn {
    Box::new(|method, url, rest| OpenedRequest {
        method: method.to_string(),
        url: url.to_string(),
        rest: rest.to_vec(),
    })
}

fn native_fetch() -> FetchFn {
    Box::new(|input| {
        let url = match input {
            FetchInput::Url(url) => url,
            FetchInput::Request { url } => url,
            FetchInput::Opaque => String::new(),
        };

        FetchResponse {
            url: url.clone(),
            content_type: None,
            body: format!("remote:{url}").into_bytes(),
        }
    })
}

/// One page's audio-loading surface. Every patchable entry point lives in a
/// slot behind its own lock; page code calls through the slots, and the
/// patch layer replaces their contents in place.
pub struct Page {
    pub location: String,
    pub window: WindowId,
    pub script_url: Option<String>,
    pub config_carrier: Option<String>,
    audio: Mutex<Option<AudioConstructor>>,
    media_src: Mutex<Option<SrcAccessor>>,
    library: Mutex<Option<LibraryConstructor>>,
    open: Mutex<Option<OpenFn>>,
    fetch: Mutex<Option<FetchFn>>,
    injected: AtomicBool,
}

impl Page {
    pub fn new(location: impl Into<String>, window: WindowId) -> Page {
        Page {
            location: location.into(),
            window,
            script_url: None,
            config_carrier: None,
            audio: Mutex::new(Some(AudioConstructor::native(PROTO_AUDIO))),
            media_src: Mutex::new(Some(SrcAccessor::native())),
            library: Mutex::new(None),
            open: Mutex::new(Some(native_open())),
            fetch: Mutex::new(Some(native_fetch())),
            injected: AtomicBool::new(false),
        }
    }

    /// Flips the injection marker. Returns true if this call claimed the
    /// page, false if it was already injected.
    pub fn mark_injected(&self) -> bool {
        !self.injected.swap(true, Ordering::SeqCst)
    }

    pub fn new_audio(&self, src: Option<Source>) -> MediaElement {
        let slot = self.audio.lock().unwrap();
        slot.as_ref().expect("audio constructor missing").construct(src)
    }

    pub fn audio_proto(&self) -> ProtoId {
        self.audio.lock().unwrap().as_ref().expect("audio constructor missing").proto
    }

    pub fn get_src(&self, element: &MediaElement) -> String {
        let slot = self.media_src.lock().unwrap();
        slot.as_ref().expect("source accessor missing").get(element)
    }

    pub fn set_src(&self, element: &mut MediaElement, value: Source) {
        let slot = self.media_src.lock().unwrap();
        slot.as_ref().expect("source accessor missing").set(element, value);
    }

    /// Page script has loaded the library: its constructor becomes available.
    pub fn provide_library(&self, constructor: LibraryConstructor) {
        *self.library.lock().unwrap() = Some(constructor);
    }

    pub fn has_library(&self) -> bool {
        self.library.lock().unwrap().is_some()
    }

    pub fn library_proto(&self) -> Option<ProtoId> {
        self.library.lock().unwrap().as_ref().map(|lib| lib.proto)
    }

    pub fn library_statics(&self) -> Option<BTreeMap<String, String>> {
        self.library.lock().unwrap().as_ref().map(|lib| lib.statics.clone())
    }

    /// Constructs a sound through the library, or `None` if the library has
    /// not loaded.
    pub fn new_library_sound(&self, options: LibraryOptions) -> Option<LibrarySound> {
        let slot = self.library.lock().unwrap();
        slot.as_ref().map(|lib| lib.construct(options))
    }

    pub fn open_request(&self, method: &str, url: &str, rest: &[String]) -> OpenedRequest {
        let slot = self.open.lock().unwrap();
        slot.as_ref().expect("open primitive missing")(method, url, rest)
    }

    pub fn fetch(&self, input: FetchInput) -> FetchResponse {
        let slot = self.fetch.lock().unwrap();
        slot.as_ref().expect("fetch primitive missing")(input)
    }

    pub fn replace_audio(&self, wrap: impl FnOnce(AudioConstructor) -> AudioConstructor) {
        let mut slot = self.audio.lock().unwrap();
        let original = slot.take().expect("audio constructor missing");
        *slot = Some(wrap(original));
    }

    pub fn replace_media_src(&self, wrap: impl FnOnce(SrcAccessor) -> SrcAccessor) {
        let mut slot = self.media_src.lock().unwrap();
        let original = slot.take().expect("source accessor missing");
        *slot = Some(wrap(original));
    }

    /// Wraps the library constructor if the library global is present.
    /// Returns false without side effects when it is not.
    pub fn try_replace_library(
        &self,
        wrap: impl FnOnce(LibraryConstructor) -> LibraryConstructor,
    ) -> bool {
        let mut slot = self.library.lock().unwrap();

        match slot.take() {
            Some(original) => {
                *slot = Some(wrap(original));
                true
            }
            None => false,
        }
    }

    pub fn replace_open(&self, wrap: impl FnOnce(OpenFn) -> OpenFn) {
        let mut slot = self.open.lock().unwrap();
        let original = slot.take().expect("open primitive missing");
        *slot = Some(wrap(original));
    }

    pub fn replace_fetch(&self, wrap: impl FnOnce(FetchFn) -> FetchFn) {
        let mut slot = self.fetch.lock().unwrap();
        let original = slot.take().expect("fetch primitive missing");
        *slot = Some(wrap(original));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_constructor_assigns_source() {
        let page = Page::new("https://host/app", 1);
        let element = page.new_audio(Some(Source::Url("/a.mp3".to_string())));

        assert_eq!(element.kind, MediaKind::Audio);
        assert_eq!(element.src(), "/a.mp3");
    }

    #[test]
    fn accessor_round_trips_through_page() {
        let page = Page::new("https://host/app", 1);
        let mut element = page.new_audio(None);

        page.set_src(&mut element, Source::Url("/b.mp3".to_string()));
        assert_eq!(page.get_src(&element), "/b.mp3");
    }

    #[test]
    fn injection_marker_claims_once() {
        let page = Page::new("https://host/app", 1);

        assert!(page.mark_injected());
        assert!(!page.mark_injected());
    }

    #[test]
    fn library_slot_starts_empty() {
        let page = Page::new("https://host/app", 1);

        assert!(!page.has_library());
        assert!(!page.try_replace_library(|lib| lib));

        page.provide_library(LibraryConstructor::native(7));
        assert_eq!(page.library_proto(), Some(7));
    }
}
