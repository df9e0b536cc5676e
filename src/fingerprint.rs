//! Coarse change detection: normalize the page text and hash it.
//!
//! This is the cheap pre-filter that runs before structured parsing is
//! even attempted. Normalization strips everything that churns without
//! the leaderboard itself changing (scripts, chrome, timestamps,
//! analytics tokens) and, when the leaderboard region can be located,
//! hashes only that region.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::warn;

static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script>").unwrap());
static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style>").unwrap());
static CHROME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:nav|footer|aside)\b[^>]*>.*?</(?:nav|footer|aside)>").unwrap()
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static UPDATED_AT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:last\s+updated|updated\s+at|generated\s+at|timestamp)\b[^\n<]{0,80}")
        .unwrap()
});
static ISO_TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}(?::\d{2})?(?:\s*UTC|\s*GMT|Z)?\b").unwrap()
});
static TRACKING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:ga|gtm|utm_[a-z_]+|analytics|tracking)\b").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Markers that anchor the leaderboard region within the page.
static ANCHOR_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)arena\s+llm\s+leaderboard",
        r"(?i)overall[-\s]+no[-\s]+style[-\s]+control",
        r#"(?i)(?:id|class)=["'][^"']*leaderboard[^"']*["']"#,
        r"(?i)>\s*leaderboard\s*<",
        r"(?i)\b(?:rank|model|score|elo)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Bytes of context kept on each side of the anchored region.
const REGION_PADDING: usize = 5000;

fn normalize_text(content: &str) -> String {
    let text = TAG_RE.replace_all(content, " ");
    let text = crate::parser::decode_entities(&text);
    let text = UPDATED_AT_RE.replace_all(&text, " ");
    let text = ISO_TIMESTAMP_RE.replace_all(&text, " ");
    let text = TRACKING_RE.replace_all(&text, " ");
    WS_RE.replace_all(&text, " ").trim().to_string()
}

/// Reduce a raw HTML document to the stable text the fingerprint covers.
pub fn normalize_for_hash(html: &str) -> String {
    let base = COMMENT_RE.replace_all(html, " ");
    let base = SCRIPT_RE.replace_all(&base, " ");
    let base = STYLE_RE.replace_all(&base, " ");
    let base = CHROME_RE.replace_all(&base, " ");

    let mut min_start = usize::MAX;
    let mut max_end = 0usize;
    for anchor in ANCHOR_RES.iter() {
        for m in anchor.find_iter(&base) {
            min_start = min_start.min(m.start());
            max_end = max_end.max(m.end());
        }
    }

    if max_end > 0 {
        let start = floor_char_boundary(&base, min_start.saturating_sub(REGION_PADDING));
        let end = ceil_char_boundary(&base, (max_end + REGION_PADDING).min(base.len()));
        let focused = normalize_text(&base[start..end]);
        if !focused.is_empty() {
            return focused;
        }
    }

    warn!("focused leaderboard extraction failed; hashing whole normalized page");
    normalize_text(&base)
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// SHA-256 hex digest of the normalized page text.
pub fn fingerprint(html: &str) -> String {
    let normalized = normalize_for_hash(html);
    let digest = Sha256::digest(normalized.as_bytes());
    format!("{digest:x}")
}

/// Short display form used in notifications and logs.
pub fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}
