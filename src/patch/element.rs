//! Overrides for the audio element constructor and for the source accessor
//! on the shared media-element prototype.

use std::sync::Arc;

use crate::host::{AudioConstructor, MediaKind, Page, Source, SrcAccessor};
use crate::resolve::Resolver;

pub fn install(page: &Arc<Page>, resolver: &Arc<Resolver>) {
    install_constructor(page, resolver);
    install_src_setter(page, resolver);
}

/// Wraps the audio element constructor. The prototype token is carried over
/// so identity checks against the original type still pass.
fn install_constructor(page: &Arc<Page>, resolver: &Arc<Resolver>) {
    let resolver = Arc::clone(resolver);

    page.replace_audio(|original| {
        let proto = original.proto;

        AudioConstructor::new(proto, move |src| {
            let src = src.map(|value| match resolver.replacement_for(&value) {
                Some((id, replacement)) => {
                    log::info!("audio constructor intercepted for '{id}'");
                    Source::Url(replacement.into_string())
                }
                None => value,
            });

            original.construct(src)
        })
    });
}

/// Wraps the setter half of the accessor pair. The getter moves across
/// untouched. Substitution applies only to audio elements; a video element's
/// assignment delegates with its value unchanged.
fn install_src_setter(page: &Arc<Page>, resolver: &Arc<Resolver>) {
    let resolver = Arc::clone(resolver);

    page.replace_media_src(|accessor| {
        let (getter, setter) = accessor.into_parts();

        SrcAccessor::from_parts(
            getter,
            Box::new(move |element, value| {
                if element.kind == MediaKind::Audio {
                    if let Some((id, replacement)) = resolver.replacement_for(&value) {
                        log::info!("source setter intercepted for '{id}'");
                        return setter(element, Source::Url(replacement.into_string()));
                    }
                }

                setter(element, value)
            }),
        )
    });
}
