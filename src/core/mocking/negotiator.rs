//! `Accept` header negotiation over the media types a mock can answer with.
use super::response::is_json_media_type;

#[derive(Debug, Clone, PartialEq)]
struct AcceptRange<'a> {
    kind: &'a str,
    subtype: &'a str,
    quality: f32,
}

impl AcceptRange<'_> {
    /// Match specificity; `None` when the range does not cover `media_type`.
    fn specificity(&self, media_type: &str) -> Option<u8> {
        let essence = media_type.split(';').next().unwrap_or_default().trim();
        let (kind, subtype) = essence.split_once('/')?;
        match (self.kind, self.subtype) {
            ("*", "*") => Some(0),
            (k, "*") if k.eq_ignore_ascii_case(kind) => Some(1),
            (k, s) if k.eq_ignore_ascii_case(kind) && s.eq_ignore_ascii_case(subtype) => Some(2),
            _ => None,
        }
    }
}

fn parse_accept(header: &str) -> Vec<AcceptRange<'_>> {
    header
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let range = pieces.next()?.trim();
            let (kind, subtype) = range.split_once('/')?;
            let quality = pieces
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0)
                .clamp(0.0, 1.0);
            Some(AcceptRange {
                kind: kind.trim(),
                subtype: subtype.trim(),
                quality,
            })
        })
        .collect()
}

/// Preferred media type when the client expresses no usable preference: the only one, else
/// a JSON type, else the first.
pub fn default_media_type<'a>(available: &[&'a str]) -> Option<&'a str> {
    match available {
        [] => None,
        [only] => Some(*only),
        _ => available
            .iter()
            .copied()
            .find(|m| is_json_media_type(m))
            .or_else(|| available.first().copied()),
    }
}

/// Picks the media type to answer with.
///
/// The most specific matching range sets a type's quality. The highest quality wins and ties
/// go to the default order. When nothing in `Accept` matches, the default is served anyway.
pub fn negotiate<'a>(accept: Option<&str>, available: &[&'a str]) -> Option<&'a str> {
    let ranges = match accept.map(parse_accept) {
        Some(ranges) if !ranges.is_empty() => ranges,
        _ => return default_media_type(available),
    };

    let preferred = default_media_type(available);
    let mut best: Option<(&'a str, f32)> = None;
    for media_type in available.iter().copied() {
        let quality = ranges
            .iter()
            .filter_map(|r| r.specificity(media_type).map(|s| (s, r.quality)))
            .max_by_key(|(specificity, _)| *specificity)
            .map(|(_, q)| q)
            .unwrap_or(0.0);
        if quality <= 0.0 {
            continue;
        }
        best = match best {
            Some((_, q)) if q > quality => best,
            Some((current, q)) if q == quality && Some(current) == preferred => best,
            Some((_, q)) if q == quality && Some(media_type) != preferred => best,
            _ => Some((media_type, quality)),
        };
    }

    best.map(|(m, _)| m).or(preferred)
}
