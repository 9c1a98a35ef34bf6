//! Overrides for the request-open and fetch network primitives.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use eyre::{eyre, Result};
use lazy_static::lazy_static;
use regex::Regex;

use crate::host::{FetchInput, FetchResponse, Page, Source};
use crate::resolve::{Replacement, Resolver};

lazy_static! {
    // data:[<media type>][;base64],<payload>
    static ref DATA_URI: Regex = Regex::new(r"^data:([^;,]*)(;base64)?,(.*)$").unwrap();
}

pub fn install(page: &Arc<Page>, resolver: &Arc<Resolver>) {
    install_open(page, resolver);
    install_fetch(page, resolver);
}

/// Wraps the request-open primitive. The URL argument is substituted; the
/// method and all trailing arguments pass through unchanged.
fn install_open(page: &Arc<Page>, resolver: &Arc<Resolver>) {
    let resolver = Arc::clone(resolver);

    page.replace_open(|original| {
        Box::new(move |method, url, rest| {
            match resolver.replacement_for(&Source::Url(url.to_string())) {
                Some((id, replacement)) => {
                    log::info!("request open intercepted for '{id}'");
                    original(method, replacement.as_str(), rest)
                }
                None => original(method, url, rest),
            }
        })
    });
}

/// Wraps fetch. An inline replacement is served directly from its payload
/// rather than being handed to the original fetch, which could not load it;
/// an asset replacement delegates with the substituted URL.
fn install_fetch(page: &Arc<Page>, resolver: &Arc<Resolver>) {
    let resolver = Arc::clone(resolver);

    page.replace_fetch(|original| {
        Box::new(move |input| {
            let url = match &input {
                FetchInput::Url(url) => Some(url.clone()),
                FetchInput::Request { url } => Some(url.clone()),
                FetchInput::Opaque => None,
            };

            if let Some(url) = url {
                if let Some((id, replacement)) = resolver.replacement_for(&Source::Url(url)) {
                    log::info!("fetch intercepted for '{id}'");

                    match replacement {
                        Replacement::Inline(data) => match serve_inline(&data) {
                            Ok(response) => return response,
                            Err(err) => {
                                log::error!("failed to serve inline data for '{id}': {err}");
                                // Fall through to the untouched original call.
                            }
                        },
                        Replacement::Asset(url) => return original(FetchInput::Url(url)),
                    }
                }
            }

            original(input)
        })
    });
}

/// Builds a response directly from an inline `data:` payload.
fn serve_inline(data_uri: &str) -> Result<FetchResponse> {
    let captures = DATA_URI
        .captures(data_uri)
        .ok_or_else(|| eyre!("not a data URI"))?;

    let content_type = match captures.get(1).map(|m| m.as_str()) {
        Some("") | None => None,
        Some(media) => Some(media.to_string()),
    };

    let payload = captures.get(3).map_or("", |m| m.as_str());

    let body = if captures.get(2).is_some() {
        BASE64.decode(payload)?
    } else {
        percent_decode(payload)
    };

    Ok(FetchResponse {
        url: data_uri.to_string(),
        content_type,
        body,
    })
}

/// Decodes percent escapes, passing malformed escapes through as-is.
fn percent_decode(payload: &str) -> Vec<u8> {
    let bytes = payload.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();

            if let Some(byte) = hex.and_then(|hex| u8::from_str_radix(hex, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }

        out.push(bytes[i]);
        i += 1;
    }

    out
}
