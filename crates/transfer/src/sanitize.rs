//! Filename sanitization and randomized naming.
//!
//! Client-supplied filenames are reduced to a single safe path segment:
//! - only the final segment survives (`/` and `\` both split)
//! - Unicode is decomposed and diacritics dropped (`café` -> `cafe`)
//! - everything outside `[A-Za-z0-9_-]` becomes `_`, runs collapse
//! - exactly one dot remains, in front of the lowercased extension
//!
//! Randomized names replace the cleaned stem with a token drawn from a
//! URL-safe alphabet. Callers pass the random source, so a seeded RNG gives
//! reproducible names.

use rand::Rng;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::policy::UploadPolicy;

/// Length of randomized filename tokens.
pub const TOKEN_LENGTH: usize = 16;

/// Maximum length of a cleaned stem, in characters.
pub const MAX_STEM_LENGTH: usize = 128;

/// Maximum length of a cleaned extension, in characters.
pub const MAX_EXTENSION_LENGTH: usize = 16;

/// Maximum length of a cleaned filename prefix, in characters.
pub const MAX_PREFIX_LENGTH: usize = 64;

/// Stem used when nothing survives cleaning.
const FALLBACK_STEM: &str = "file";

/// URL-safe token alphabet (64 symbols, 6 bits per character).
const TOKEN_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// A filename reduced to a safe stem and optional extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedName {
    /// Cleaned base name, never empty.
    pub stem: String,
    /// Lowercased extension without the dot.
    pub extension: Option<String>,
    /// Whether cleaning changed the input in any way.
    ///
    /// Distinct inputs can only render to the same name when at least one of
    /// them was altered.
    pub altered: bool,
}

impl SanitizedName {
    /// Render as `stem` or `stem.ext`.
    pub fn file_name(&self) -> String {
        match &self.extension {
            Some(ext) => format!("{}.{}", self.stem, ext),
            None => self.stem.clone(),
        }
    }
}

/// Sanitize an arbitrary filename into a single safe path segment.
pub fn sanitize_filename(input: &str) -> SanitizedName {
    let segment = final_segment(input);
    let (raw_stem, raw_ext) = split_extension(segment);

    let stem = match clean_component(raw_stem, MAX_STEM_LENGTH) {
        s if s.is_empty() => FALLBACK_STEM.to_string(),
        s => s,
    };
    let extension = raw_ext.map(clean_extension).filter(|e| !e.is_empty());

    let mut name = SanitizedName {
        stem,
        extension,
        altered: false,
    };
    name.altered = name.file_name() != input;
    name
}

/// Extension of `input` as the client sent it, lowercased but not cleaned.
///
/// Allow-list checks use this so that `x.p-ng` is judged as `p-ng` and not
/// as the `png` it would be stored under.
pub fn declared_extension(input: &str) -> Option<String> {
    let (_, raw_ext) = split_extension(final_segment(input));
    raw_ext.map(str::to_lowercase)
}

/// Generate a token of `len` characters from the URL-safe alphabet.
pub fn generate_token<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

/// Derive the on-disk name for a sanitized upload under `policy`.
///
/// Randomized mode renders `prefix + token + .ext`; otherwise
/// `prefix + stem + .ext`.
pub fn saved_file_name<R: Rng + ?Sized>(
    name: &SanitizedName,
    policy: &UploadPolicy,
    rng: &mut R,
) -> String {
    let prefix = clean_prefix(policy.filename_prefix());
    let base = if policy.randomize_filename() {
        generate_token(rng, TOKEN_LENGTH)
    } else {
        name.stem.clone()
    };

    match &name.extension {
        Some(ext) => format!("{prefix}{base}.{ext}"),
        None => format!("{prefix}{base}"),
    }
}

/// Sanitize a name for use inside a `Content-Disposition` header.
pub fn header_filename(input: &str) -> String {
    sanitize_filename(input).file_name()
}

fn final_segment(input: &str) -> &str {
    input
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or("")
}

/// Split at the last dot. A leading dot (`.bashrc`) or a trailing one does
/// not start an extension.
fn split_extension(segment: &str) -> (&str, Option<&str>) {
    match segment.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < segment.len() => {
            (&segment[..idx], Some(&segment[idx + 1..]))
        }
        _ => (segment, None),
    }
}

fn clean_component(raw: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_underscore = false;

    for c in raw.nfkd().filter(|c| !is_combining_mark(*c)) {
        let c = if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            c
        } else {
            '_'
        };

        if c == '_' {
            if prev_underscore {
                continue;
            }
            prev_underscore = true;
        } else {
            prev_underscore = false;
        }
        out.push(c);
    }

    let trimmed = out.trim_matches(|c| c == '_' || c == '-');
    // ASCII only at this point, so byte slicing is char-safe.
    let capped = &trimmed[..trimmed.len().min(max_len)];
    capped.trim_end_matches(|c| c == '_' || c == '-').to_string()
}

fn clean_extension(raw: &str) -> String {
    raw.nfkd()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .take(MAX_EXTENSION_LENGTH)
        .collect()
}

fn clean_prefix(prefix: &str) -> String {
    prefix
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_PREFIX_LENGTH)
        .collect()
}
