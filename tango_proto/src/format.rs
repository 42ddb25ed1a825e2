//! Decoding of the markup embedded in message bodies.
//!
//! Messages arrive with optional formatting tags prepended to the body: a
//! name-color tag `<nRRGGBB/>` and a font tag `<f xSSRRGGBB="face">`, where
//! the `x` payload is either a combined size+color or a color alone. The
//! body itself is pseudo-HTML that has to be flattened back to plain text.

/// The fixed font face table. Posts reference faces by index.
pub const FONT_FACES: [&str; 9] = [
    "Arial",
    "Comic Sans",
    "Georgia",
    "Handwriting",
    "Impact",
    "Palatino",
    "Papyrus",
    "Times New Roman",
    "Typewriter",
];

/// Sizes available to non-premium accounts.
pub const FONT_SIZES: [u8; 6] = [9, 10, 11, 12, 13, 14];

/// Which side channel a post was sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    None,
    Red,
    Blue,
    Both,
}

/// Badge displayed beside a post's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Badge {
    None,
    Mod,
    Staff,
}

impl Channel {
    fn from_bits(value: u32) -> Self {
        match value & 3 {
            0 => Self::None,
            1 => Self::Red,
            2 => Self::Blue,
            _ => Self::Both,
        }
    }

    /// The bit pattern used when sending a post to this channel.
    pub fn wire_value(self) -> u32 {
        let n = self as u32;
        ((n & 2) << 2 | (n & 1)) << 8
    }
}

impl Badge {
    fn from_bits(value: u32) -> Self {
        match value & 3 {
            1 => Self::Mod,
            2 => Self::Staff,
            _ => Self::None,
        }
    }
}

/// Unpack the combined channel/badge field carried on each post.
///
/// Badge lives in bits 5-6; the raw channel in bits 8-12, which collapses
/// to none/red/blue/both as `(raw&1) | ((raw&8)>>2) | ((raw&16)>>3)`.
pub fn unpack_channel_badge(value: u32) -> (Badge, Channel) {
    let badge = (value >> 5) & 3;
    let raw = (value >> 8) & 31;
    let channel = (raw & 1) | ((raw & 8) >> 2) | ((raw & 16) >> 3);
    (Badge::from_bits(badge), Channel::from_bits(channel))
}

/// Formatting extracted from a post's leading markup tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostFormat {
    pub name_color: String,
    pub font_color: String,
    pub font_size: u8,
    pub font_face: String,
}

impl Default for PostFormat {
    fn default() -> Self {
        Self {
            name_color: String::new(),
            font_color: String::new(),
            font_size: 11,
            font_face: FONT_FACES[0].to_string(),
        }
    }
}

/// Extract formatting from the markup prefix of `raw`, if present.
pub fn parse_format(raw: &str) -> PostFormat {
    let mut fmt = PostFormat::default();
    let mut rest = raw;

    if let Some(tail) = rest.strip_prefix("<n") {
        if let Some(end) = tail.find("/>") {
            let color = &tail[..end];
            if (1..=6).contains(&color.len()) && color.chars().all(|c| c.is_ascii_hexdigit()) {
                fmt.name_color = color.to_string();
                rest = &tail[end + 2..];
            }
        }
    }

    if let Some(tail) = rest.strip_prefix("<f x") {
        if let Some((payload, after)) = tail.split_once("=\"") {
            if let Some((face, _)) = after.split_once('"') {
                let payload_ok = (2..=8).contains(&payload.len())
                    && payload.chars().all(|c| c.is_ascii_hexdigit());
                if payload_ok && face.chars().all(|c| c.is_ascii_alphanumeric()) {
                    // Field-length parity disambiguates a combined
                    // size+color payload from a color alone.
                    if payload.len() % 3 == 2 {
                        fmt.font_size = payload[..2].parse().unwrap_or(11);
                        fmt.font_color = payload[2..].to_string();
                    } else {
                        fmt.font_color = payload.to_string();
                    }
                    fmt.font_face = match face.parse::<usize>() {
                        Ok(index) => FONT_FACES
                            .get(index)
                            .unwrap_or(&FONT_FACES[0])
                            .to_string(),
                        // Not an index: a literal font name
                        Err(_) => face.to_string(),
                    };
                }
            }
        }
    }

    fmt
}

const HTML_ENTITIES: [(&str, &str); 7] = [
    ("&#39;", "'"),
    ("&gt;", ">"),
    ("&lt;", "<"),
    ("&quot;", "\""),
    ("&apos;", "'"),
    ("&nbsp;", " "),
    ("&amp;", "&"),
];

/// Flatten a raw message body to plain text: `<br>` tags become newlines,
/// every other tag vanishes, entities are decoded, trailing newlines are
/// trimmed, and thumbnail image links are rewritten to their full-size
/// counterparts.
pub fn format_body(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let mut text = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('<') {
        match rest[start..].find('>') {
            Some(offset) => {
                text.push_str(&rest[..start]);
                let tag = rest[start + 1..start + offset]
                    .trim_start_matches('/')
                    .trim_end_matches('/');
                if tag == "br" {
                    text.push('\n');
                }
                rest = &rest[start + offset + 1..];
            }
            // Unterminated tag; keep the remainder as-is
            None => break,
        }
    }
    text.push_str(rest);

    for (entity, replacement) in HTML_ENTITIES {
        if text.contains(entity) {
            text = text.replace(entity, replacement);
        }
    }

    let trimmed = text.trim_end_matches('\n').len();
    text.truncate(trimmed);

    rewrite_thumbnail_urls(&text)
}

const THUMB_HOST: &str = "ust.chatango.com/";

/// Rewrite `…ust.chatango.com/…/t_NNN.ext` image links to the full-size
/// `l_` variant.
fn rewrite_thumbnail_urls(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    'outer: while let Some(host) = rest.find(THUMB_HOST) {
        let scheme_ok = rest[..host].ends_with("http://") || rest[..host].ends_with("https://");
        let path_start = host + THUMB_HOST.len();
        if !scheme_ok {
            out.push_str(&rest[..path_start]);
            rest = &rest[path_start..];
            continue;
        }

        // Look for a path segment of the shape t_<digits>.<word>
        let path = &rest[path_start..];
        for (offset, _) in path.match_indices("/t_") {
            let tail = &path[offset + 3..];
            let digits = tail.chars().take_while(|c| c.is_ascii_digit()).count();
            let dotted = tail[digits..].starts_with('.');
            if digits > 0 && dotted {
                let absolute = path_start + offset + 1;
                out.push_str(&rest[..absolute]);
                out.push('l');
                rest = &rest[absolute + 1..];
                continue 'outer;
            }
        }

        out.push_str(&rest[..path_start]);
        rest = &rest[path_start..];
    }

    out.push_str(rest);
    out
}
