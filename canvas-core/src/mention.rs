//! Inline `@imgN` references and `(@size: WxH)` directives in prompt text.

use std::ops::Range;

use crate::element::{ElementKey, Size};
use crate::scene::Scene;
use crate::{CanvasError, CanvasResult};

const REF_PREFIX: &str = "@img";
const SIZE_OPEN: &str = "(@size";

/// A prompt split into the parts the job queue needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPrompt {
    /// Text exactly as the user typed it.
    pub display_text: String,
    /// Text sent to the backend: size directives removed, whitespace collapsed.
    pub request_text: String,
    /// Explicit size, from the first size directive.
    pub size: Option<Size>,
    /// Referenced ids in order of first appearance.
    pub references: Vec<u32>,
}

/// The token that refers to a reference id.
#[must_use]
pub fn mention_token(ref_id: u32) -> String {
    format!("{REF_PREFIX}{ref_id}")
}

/// Parse free text into a [`ParsedPrompt`].
///
/// # Errors
///
/// Returns [`CanvasError::InvalidSize`] for a malformed size directive and
/// [`CanvasError::EmptyPrompt`] when nothing but directives and references
/// remain.
pub fn parse_prompt(text: &str) -> CanvasResult<ParsedPrompt> {
    let (stripped, size) = extract_size_directive(text)?;
    let references = find_references(&stripped);
    let request_text = collapse_whitespace(&stripped);

    let mut rest = 0;
    let mut has_words = false;
    for (_, span) in reference_spans(&stripped) {
        has_words |= !stripped[rest..span.start].trim().is_empty();
        rest = span.end;
    }
    has_words |= !stripped[rest..].trim().is_empty();
    if !has_words {
        return Err(CanvasError::EmptyPrompt);
    }

    Ok(ParsedPrompt {
        display_text: text.to_string(),
        request_text,
        size,
        references,
    })
}

/// Remove every `(@size: WxH)` directive, returning the remaining text and the
/// first size found.
///
/// # Errors
///
/// Returns [`CanvasError::InvalidSize`] if a directive is unterminated or its
/// size does not parse.
pub fn extract_size_directive(text: &str) -> CanvasResult<(String, Option<Size>)> {
    let lower = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut size = None;
    let mut cursor = 0;

    while let Some(found) = lower[cursor..].find(SIZE_OPEN) {
        let start = cursor + found;
        let close = lower[start..]
            .find(')')
            .map(|i| start + i)
            .ok_or_else(|| CanvasError::InvalidSize(text[start..].to_string()))?;
        let inner = &text[start + SIZE_OPEN.len()..close];
        let value = inner.trim_start().strip_prefix(':').unwrap_or(inner);
        let parsed = Size::parse(value)?;
        size.get_or_insert(parsed);
        out.push_str(&text[cursor..start]);
        out.push(' ');
        cursor = close + 1;
    }
    out.push_str(&text[cursor..]);
    Ok((out, size))
}

/// Ids of every `@imgN` token, deduplicated, in order of first appearance.
#[must_use]
pub fn find_references(text: &str) -> Vec<u32> {
    let mut refs = Vec::new();
    for (id, _) in reference_spans(text) {
        if !refs.contains(&id) {
            refs.push(id);
        }
    }
    refs
}

/// Every well-formed `@imgN` token with its byte span.
fn reference_spans(text: &str) -> Vec<(u32, Range<usize>)> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while let Some(found) = text[i..].find(REF_PREFIX) {
        let at = i + found;
        let digits_start = at + REF_PREFIX.len();
        let digits_end = bytes[digits_start..]
            .iter()
            .position(|b| !b.is_ascii_digit())
            .map_or(bytes.len(), |p| digits_start + p);
        let boundary_ok = at == 0 || !bytes[at - 1].is_ascii_alphanumeric();
        if boundary_ok && digits_end > digits_start {
            if let Ok(id) = text[digits_start..digits_end].parse::<u32>() {
                if id > 0 {
                    spans.push((id, at..digits_end));
                }
            }
        }
        i = digits_end.max(at + 1);
    }
    spans
}

/// Map reference ids to element keys, preserving order.
///
/// # Errors
///
/// Returns [`CanvasError::UnresolvedReference`] for the first id that names
/// no element.
pub fn resolve_references(scene: &Scene, references: &[u32]) -> CanvasResult<Vec<ElementKey>> {
    references
        .iter()
        .map(|id| {
            scene
                .by_ref_id(*id)
                .map(|el| el.key.clone())
                .ok_or(CanvasError::UnresolvedReference(*id))
        })
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{CanvasElement, ElementKind, ImageContent};
    use crate::geometry::Rect;

    #[test]
    fn test_size_directive_extracted_anywhere() {
        let parsed = parse_prompt("a red fox (@size:1024x768)").expect("parse");
        assert_eq!(parsed.size, Some(Size::new(1024, 768)));
        assert_eq!(parsed.request_text, "a red fox");
        assert_eq!(parsed.display_text, "a red fox (@size:1024x768)");

        let parsed = parse_prompt("(@Size: 512 x 256) tall tower").expect("parse");
        assert_eq!(parsed.size, Some(Size::new(512, 256)));
        assert_eq!(parsed.request_text, "tall tower");
    }

    #[test]
    fn test_first_size_wins_and_all_are_removed() {
        let parsed = parse_prompt("x (@size: 64x64) y (@size: 128x128) z").expect("parse");
        assert_eq!(parsed.size, Some(Size::new(64, 64)));
        assert_eq!(parsed.request_text, "x y z");
    }

    #[test]
    fn test_bad_size_directive_is_input_error() {
        let err = parse_prompt("fox (@size: huge)").expect_err("should fail");
        assert!(err.is_input_error());
        assert!(parse_prompt("fox (@size: 10x10").is_err());
    }

    #[test]
    fn test_references_in_text_order() {
        assert_eq!(find_references("@img2 with @img1 and @img2 again"), vec![2, 1]);
        assert_eq!(find_references("mail me@img3 please"), Vec::<u32>::new());
        assert_eq!(find_references("@img and @img0 and @imgx"), Vec::<u32>::new());
        assert_eq!(find_references("(@img12)"), vec![12]);
    }

    #[test]
    fn test_empty_prompt_rejected() {
        assert!(matches!(parse_prompt("   "), Err(CanvasError::EmptyPrompt)));
        assert!(matches!(parse_prompt("(@size: 64x64)"), Err(CanvasError::EmptyPrompt)));
        assert!(matches!(parse_prompt("@img1 @img2"), Err(CanvasError::EmptyPrompt)));
        assert!(matches!(parse_prompt("@img1 @img12"), Err(CanvasError::EmptyPrompt)));
        assert!(matches!(parse_prompt("@img12 @img1 @img12"), Err(CanvasError::EmptyPrompt)));
    }

    #[test]
    fn test_words_around_longer_tokens_survive() {
        let parsed = parse_prompt("@img1 with @img12").expect("parse");
        assert_eq!(parsed.references, vec![1, 12]);
        assert_eq!(parsed.request_text, "@img1 with @img12");
        // A malformed token is ordinary text.
        assert!(parse_prompt("@img0").is_ok());
    }

    #[test]
    fn test_resolve_references() {
        let mut scene = Scene::new();
        let a = scene
            .insert(CanvasElement::new(
                ElementKind::Image(ImageContent::from_src("https://x/a.png")),
                Rect::new(0.0, 0.0, 10.0, 10.0),
            ))
            .expect("insert");
        let b = scene
            .insert(CanvasElement::new(
                ElementKind::Image(ImageContent::from_src("https://x/b.png")),
                Rect::new(20.0, 0.0, 10.0, 10.0),
            ))
            .expect("insert");
        scene.ensure_ref_id(&b).expect("ref");
        scene.ensure_ref_id(&a).expect("ref");

        assert_eq!(resolve_references(&scene, &[2, 1]).expect("resolve"), vec![a, b]);
        assert!(matches!(
            resolve_references(&scene, &[1, 9]),
            Err(CanvasError::UnresolvedReference(9))
        ));
    }
}
