//! SMIL layout reconstruction for multipart messages.
//!
//! Multipart messages usually carry an `application/smil` part describing
//! how the other parts are presented: a sequence of `<par>` groups
//! ("slides"), each listing media references by `src`. This module parses
//! that markup into a [`Presentation`] and resolves it against a message's
//! parts to produce the render order (a list of part ids).
//!
//! ```text
//! <par><text src="t1"/><img src="i1"/></par>    → slide 0: [text t1, image i1]
//! <par><audio src="a1"/></par>                  → slide 1: [audio a1]
//! ```
//!
//! Parsing never fails upward: malformed markup yields an empty
//! presentation. Media elements outside any `<par>` are collected into an
//! implicit slide.

use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;
use tracing::debug;

use crate::models::Part;

#[derive(Debug, Error)]
pub enum SmilError {
    #[error("malformed SMIL: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("malformed SMIL attribute: {0}")]
    Attr(#[from] AttrError),
    #[error("unterminated <par> element")]
    UnterminatedPar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Image,
    Video,
    Audio,
    Text,
}

impl MediaType {
    fn from_element(name: &[u8]) -> Option<Self> {
        match name.to_ascii_lowercase().as_slice() {
            b"img" | b"image" => Some(MediaType::Image),
            b"video" => Some(MediaType::Video),
            b"audio" => Some(MediaType::Audio),
            b"text" => Some(MediaType::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Text => "text",
        }
    }
}

/// One media reference inside a slide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub media_type: MediaType,
    pub src: String,
}

/// One parallel timing group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slide {
    pub items: Vec<MediaItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Presentation {
    pub slides: Vec<Slide>,
}

impl Presentation {
    pub fn is_empty(&self) -> bool {
        self.slides.iter().all(|s| s.items.is_empty())
    }
}

/// Parse SMIL markup, degrading to an empty presentation on any error.
pub fn parse(markup: &str) -> Presentation {
    match try_parse(markup) {
        Ok(p) => p,
        Err(e) => {
            debug!(error = %e, "discarding unparseable SMIL");
            Presentation::default()
        }
    }
}

/// Parse SMIL markup, reporting malformed input.
pub fn try_parse(markup: &str) -> Result<Presentation, SmilError> {
    let mut reader = Reader::from_str(markup);
    reader.config_mut().trim_text(true);

    let mut slides = Vec::new();
    let mut current = Slide::default();
    let mut loose = Slide::default();
    let mut par_depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if is_par(&e) {
                    if par_depth == 0 {
                        flush(&mut slides, &mut loose);
                    }
                    par_depth += 1;
                } else if let Some(item) = media_item(&e)? {
                    push_item(item, par_depth, &mut current, &mut loose);
                }
            }
            Event::Empty(e) => {
                if is_par(&e) {
                    // `<par/>` is an empty slide; nothing to render.
                    if par_depth == 0 {
                        flush(&mut slides, &mut loose);
                    }
                } else if let Some(item) = media_item(&e)? {
                    push_item(item, par_depth, &mut current, &mut loose);
                }
            }
            Event::End(e) => {
                if e.local_name().as_ref().eq_ignore_ascii_case(b"par") && par_depth > 0 {
                    par_depth -= 1;
                    if par_depth == 0 {
                        flush(&mut slides, &mut current);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if par_depth > 0 {
        return Err(SmilError::UnterminatedPar);
    }
    flush(&mut slides, &mut loose);

    Ok(Presentation { slides })
}

fn is_par(e: &BytesStart<'_>) -> bool {
    e.local_name().as_ref().eq_ignore_ascii_case(b"par")
}

fn media_item(e: &BytesStart<'_>) -> Result<Option<MediaItem>, SmilError> {
    let Some(media_type) = MediaType::from_element(e.local_name().as_ref()) else {
        return Ok(None);
    };
    let Some(attr) = e.try_get_attribute("src")? else {
        return Ok(None);
    };
    let src = attr.unescape_value()?.trim().to_string();
    if src.is_empty() {
        return Ok(None);
    }
    Ok(Some(MediaItem { media_type, src }))
}

fn push_item(item: MediaItem, par_depth: usize, current: &mut Slide, loose: &mut Slide) {
    if par_depth > 0 {
        current.items.push(item);
    } else {
        loose.items.push(item);
    }
}

fn flush(slides: &mut Vec<Slide>, slide: &mut Slide) {
    if !slide.items.is_empty() {
        slides.push(std::mem::take(slide));
    }
}

/// Canonical form of a cross-reference key: no `cid:` prefix, no
/// surrounding angle brackets.
fn ref_key(raw: &str) -> &str {
    let mut key = raw.trim();
    if key
        .get(..4)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("cid:"))
    {
        key = &key[4..];
    }
    key.trim_start_matches('<').trim_end_matches('>')
}

fn find_part<'a>(src: &str, parts: &'a [Part]) -> Option<&'a Part> {
    let wanted = ref_key(src);
    parts
        .iter()
        .find(|p| p.content_id.as_deref().map(ref_key) == Some(wanted))
        .or_else(|| {
            parts
                .iter()
                .find(|p| p.content_location.as_deref().map(ref_key) == Some(wanted))
        })
}

/// Resolve a presentation to part ids in markup document order.
///
/// Each `src` matches a part's `content_id` first, then its
/// `content_location`; among equal keys the first part in `parts` wins.
/// Unmatched items are skipped.
pub fn to_render_order(presentation: &Presentation, parts: &[Part]) -> Vec<String> {
    presentation
        .slides
        .iter()
        .flat_map(|slide| slide.items.iter())
        .filter_map(|item| find_part(&item.src, parts))
        .map(|part| part.part_id.clone())
        .collect()
}
