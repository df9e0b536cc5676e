//! HTML-to-record parsing for the leaderboard table.
//!
//! The page is treated as text: tables, rows, and cells are pulled out
//! with regexes, the same way the page's volatile markup is handled in
//! [`crate::fingerprint`]. Rows become [`ModelRecord`]s; stray rows that
//! are not genuine leaderboard entries are filtered out.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use thiserror::Error;

use crate::spread::decode_rank_spread;
use crate::types::{ModelRecord, PageMeta, Snapshot};

/// No usable table anywhere in the document. The caller falls back to
/// coarse fingerprint-only handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no leaderboard table found in document")]
pub struct ParseError;

/// Parse result plus row-level diagnostics.
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub snapshot: Snapshot,
    /// Rows dropped for missing rank or model name. Numeric-only model
    /// names are a deliberate filter and are not counted here.
    pub skipped_rows: usize,
}

static TABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<table\b[^>]*>(.*?)</table>").unwrap());
static ROW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").unwrap());
static CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<t[hd]\b[^>]*>(.*?)</t[hd]>").unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static NUMERIC_ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(?:x([0-9a-fA-F]+)|([0-9]+));").unwrap());
static HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<a\b[^>]*\bhref=["']([^"']+)["']"#).unwrap());
static LINK_TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<a\b[^>]*>(.*?)</a>").unwrap());

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\s+\d{1,2},?\s+\d{4}")
        .unwrap()
});
static TOTAL_VOTES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([\d,]+)\s+votes").unwrap());
static TOTAL_MODELS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+models").unwrap());

static FIRST_INT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());
static SCORE_CI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(-?\d[\d,]*)\s*[±+\-/]\s*(\d[\d,]*)").unwrap());
static BARE_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-?\d[\d,]*").unwrap());
static PRELIMINARY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)preliminary").unwrap());
static ORG_LICENSE_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[·|/]\s*").unwrap());
static LICENSE_HINT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:proprietary|open|apache|mit|cc|gpl|bsd)").unwrap());

/// Displayed ranks beyond this are page noise, not leaderboard entries.
const MAX_PLAUSIBLE_RANK: u32 = 1000;

/// Strip tags, decode entities, and collapse whitespace.
fn strip_tags(fragment: &str) -> String {
    let text = TAG_RE.replace_all(fragment, " ");
    let text = decode_entities(&text);
    WS_RE.replace_all(&text, " ").trim().to_string()
}

/// Decode the handful of entities the page actually uses, plus numeric
/// character references. Shared with the fingerprint normalizer.
pub(crate) fn decode_entities(text: &str) -> String {
    let text = NUMERIC_ENTITY_RE.replace_all(text, |caps: &Captures| {
        let code = caps
            .get(1)
            .map(|hex| u32::from_str_radix(hex.as_str(), 16))
            .unwrap_or_else(|| caps[2].parse());
        code.ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    text.replace("&nbsp;", " ")
        .replace("&middot;", "\u{b7}")
        .replace("&plusmn;", "\u{b1}")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Page-level information outside the table: displayed date, total vote
/// and model counts.
pub fn parse_page_metadata(html: &str) -> PageMeta {
    PageMeta {
        leaderboard_date: DATE_RE.find(html).map(|m| m.as_str().to_string()),
        total_votes: TOTAL_VOTES_RE
            .captures(html)
            .and_then(|c| c[1].replace(',', "").parse().ok()),
        total_models: TOTAL_MODELS_RE
            .captures(html)
            .and_then(|c| c[1].parse().ok()),
    }
}

/// Logical column indices detected from a header row.
#[derive(Debug, Clone, Default)]
struct ColumnMap {
    rank: Option<usize>,
    rank_spread: Option<usize>,
    model: Option<usize>,
    score: Option<usize>,
    ci: Option<usize>,
    votes: Option<usize>,
    organization: Option<usize>,
    license: Option<usize>,
}

impl ColumnMap {
    fn detect(header_cells: &[&str]) -> Self {
        static PATTERNS: LazyLock<Vec<(usize, Regex)>> = LazyLock::new(|| {
            [
                r"(?i)^\s*(?:#|rank)\s*$",
                r"(?i)rank\s*spread",
                r"(?i)^\s*model\s*$",
                r"(?i)^\s*(?:arena\s+)?score\s*$",
                r"(?i)^\s*(?:95%\s*)?ci\s*$",
                r"(?i)^\s*votes?\s*$",
                r"(?i)^\s*(?:org|organization)\s*$",
                r"(?i)^\s*licen[cs]e\s*$",
            ]
            .iter()
            .enumerate()
            .map(|(slot, pat)| (slot, Regex::new(pat).unwrap()))
            .collect()
        });

        let mut map = Self::default();
        for (idx, raw_cell) in header_cells.iter().enumerate() {
            let text = strip_tags(raw_cell);
            for (slot, pattern) in PATTERNS.iter() {
                if !pattern.is_match(&text) {
                    continue;
                }
                let field = match slot {
                    0 => &mut map.rank,
                    1 => &mut map.rank_spread,
                    2 => &mut map.model,
                    3 => &mut map.score,
                    4 => &mut map.ci,
                    5 => &mut map.votes,
                    6 => &mut map.organization,
                    _ => &mut map.license,
                };
                if field.is_none() {
                    *field = Some(idx);
                }
                break;
            }
        }
        map
    }

    fn has_identity(&self) -> bool {
        self.rank.is_some() && self.model.is_some()
    }
}

fn row_cells(row_html: &str) -> Vec<&str> {
    CELL_RE
        .captures_iter(row_html)
        .map(|c| c.get(1).unwrap().as_str())
        .collect()
}

/// Parsed `score±ci` cell. The CI part and the Preliminary marker are
/// both optional.
fn parse_score_ci(text: &str) -> (Option<i64>, Option<u32>, bool) {
    let is_preliminary = PRELIMINARY_RE.is_match(text);
    let cleaned = PRELIMINARY_RE.replace_all(text, "");
    let cleaned = cleaned.trim();

    if let Some(caps) = SCORE_CI_RE.captures(cleaned) {
        let score = caps[1].replace(',', "").parse().ok();
        let ci = caps[2].replace(',', "").parse().ok();
        return (score, ci, is_preliminary);
    }
    let score = BARE_NUMBER_RE
        .find(cleaned)
        .and_then(|m| m.as_str().replace(',', "").parse().ok());
    (score, None, is_preliminary)
}

/// Model identity pulled from the model cell: name, link, and whatever
/// organization/license text trails the link.
#[derive(Debug, Default)]
struct ModelCell {
    name: String,
    url: String,
    organization: String,
    license: String,
}

fn parse_model_cell(cell_html: &str) -> ModelCell {
    let mut out = ModelCell::default();

    if let Some(caps) = HREF_RE.captures(cell_html) {
        out.url = caps[1].to_string();
    }

    let full_text = strip_tags(cell_html);
    let link_text = LINK_TEXT_RE
        .captures(cell_html)
        .map(|c| strip_tags(c.get(1).unwrap().as_str()))
        .filter(|t| !t.is_empty());

    let remainder = match link_text {
        Some(name) => {
            let rest = full_text.replacen(&name, "", 1).trim().to_string();
            out.name = name;
            rest
        }
        None => {
            out.name = full_text;
            String::new()
        }
    };

    if !remainder.is_empty() {
        let parts: Vec<&str> = ORG_LICENSE_SPLIT_RE
            .split(&remainder)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        match parts.as_slice() {
            [org, license, ..] => {
                out.organization = org.to_string();
                out.license = license.to_string();
            }
            [single] => {
                if LICENSE_HINT_RE.is_match(single) {
                    out.license = single.to_string();
                } else {
                    out.organization = single.to_string();
                }
            }
            [] => {}
        }
    }

    out
}

fn parse_votes(text: &str) -> Option<u64> {
    FIRST_INT_RE
        .find(&text.replace(',', ""))
        .and_then(|m| m.as_str().parse().ok())
}

fn first_int(text: &str) -> Option<u32> {
    FIRST_INT_RE.find(text).and_then(|m| m.as_str().parse().ok())
}

/// One data row → record, or None when rank/model are missing.
fn parse_row(cells: &[&str], columns: &ColumnMap) -> Option<ModelRecord> {
    if cells.len() < 2 {
        return None;
    }

    let rank_text = strip_tags(cells.get(columns.rank.unwrap_or(0))?);
    let rank = first_int(&rank_text)?;
    if rank == 0 || rank > MAX_PLAUSIBLE_RANK {
        return None;
    }

    let model_cell = parse_model_cell(cells.get(columns.model?)?);
    if model_cell.name.is_empty() {
        return None;
    }

    let mut record = ModelRecord {
        rank,
        rank_ub: rank,
        rank_lb: rank,
        rank_spread_raw: String::new(),
        model_name: model_cell.name,
        organization: model_cell.organization,
        license: model_cell.license,
        score: 0,
        ci: 0,
        votes: 0,
        is_preliminary: false,
        model_url: model_cell.url,
    };

    if let Some(text) = columns.rank_spread.and_then(|i| cells.get(i)) {
        let raw = strip_tags(text);
        // Decode failure means "interval unavailable": keep (rank, rank).
        if let Ok((ub, lb)) = decode_rank_spread(&raw, rank) {
            record.rank_ub = ub;
            record.rank_lb = lb;
        }
        record.rank_spread_raw = raw;
    }

    if let Some(text) = columns.score.and_then(|i| cells.get(i)) {
        let (score, ci, preliminary) = parse_score_ci(&strip_tags(text));
        if let Some(score) = score {
            record.score = score;
        }
        if let Some(ci) = ci {
            record.ci = ci;
        }
        record.is_preliminary = preliminary;
    }

    if let Some(text) = columns.ci.and_then(|i| cells.get(i)) {
        if let Some(ci) = first_int(&strip_tags(text)) {
            record.ci = ci;
        }
    }

    if let Some(text) = columns.organization.and_then(|i| cells.get(i)) {
        let org = strip_tags(text);
        if !org.is_empty() {
            record.organization = org;
        }
    }

    if let Some(text) = columns.license.and_then(|i| cells.get(i)) {
        let license = strip_tags(text);
        if !license.is_empty() {
            record.license = license;
        }
    }

    if let Some(text) = columns.votes.and_then(|i| cells.get(i)) {
        if let Some(votes) = parse_votes(&strip_tags(text)) {
            record.votes = votes;
        }
    }

    // The marker usually rides in the score cell, but some layouts give
    // it its own badge cell. The model cell is exempt so a model whose
    // name contains "preliminary" doesn't flip the flag.
    if !record.is_preliminary {
        record.is_preliminary = cells.iter().enumerate().any(|(i, cell)| {
            Some(i) != columns.model && PRELIMINARY_RE.is_match(&strip_tags(cell))
        });
    }

    Some(record)
}

/// Model names that are nothing but digits are stray metadata rows, not
/// leaderboard entries.
fn is_noise_name(name: &str) -> bool {
    let trimmed = name.trim();
    trimmed.is_empty() || trimmed.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Debug, Default)]
struct TableResult {
    records: Vec<ModelRecord>,
    skipped: usize,
}

/// Parse one table whose columns were identified from a header row.
fn parse_table(rows: &[&str], columns: &ColumnMap, header_idx: usize) -> TableResult {
    let mut result = TableResult::default();
    for row_html in rows.iter().skip(header_idx + 1) {
        let cells = row_cells(row_html);
        if cells.is_empty() {
            continue;
        }
        match parse_row(&cells, columns) {
            Some(record) if is_noise_name(&record.model_name) => {}
            Some(record) => result.records.push(record),
            None => result.skipped += 1,
        }
    }
    result
}

/// Positional fallback for a table with no recognizable header: leading
/// integer rank, a lettered model-name cell, then the first cell that
/// parses as a score.
fn parse_table_positional(rows: &[&str]) -> TableResult {
    let mut result = TableResult::default();
    for row_html in rows {
        let cells: Vec<String> = row_cells(row_html)
            .iter()
            .map(|c| strip_tags(c))
            .filter(|c| !c.is_empty())
            .collect();
        if cells.len() < 2 {
            continue;
        }

        let Some(rank) = cells[0].parse::<u32>().ok().filter(|r| *r >= 1) else {
            continue;
        };
        if rank > MAX_PLAUSIBLE_RANK {
            continue;
        }
        let name = cells[1].clone();
        if is_noise_name(&name) {
            continue;
        }

        let mut record = ModelRecord {
            rank,
            rank_ub: rank,
            rank_lb: rank,
            rank_spread_raw: String::new(),
            model_name: name,
            organization: String::new(),
            license: String::new(),
            score: 0,
            ci: 0,
            votes: 0,
            is_preliminary: false,
            model_url: String::new(),
        };
        for cell in &cells[2..] {
            let (score, ci, preliminary) = parse_score_ci(cell);
            if let Some(score) = score {
                record.score = score;
                record.ci = ci.unwrap_or(0);
                record.is_preliminary = preliminary;
                break;
            }
        }
        result.records.push(record);
    }
    result
}

/// Locate the leaderboard table and parse it into ordered records.
///
/// Table selection runs two predicates in priority order: first any table
/// whose header row carries recognizable rank and model labels (the one
/// yielding the most records wins), then the first header-less table of
/// plausible shape (>= 5 columns, >= 2 rows) parsed positionally. Records
/// keep their source order; nothing is re-sorted here.
pub fn parse_leaderboard_table(html: &str) -> Result<TableParse, ParseError> {
    let tables: Vec<&str> = TABLE_RE
        .captures_iter(html)
        .map(|c| c.get(1).unwrap().as_str())
        .collect();

    let mut best: Option<TableResult> = None;
    let mut fallback: Option<TableResult> = None;

    for table_html in &tables {
        let rows: Vec<&str> = ROW_RE
            .captures_iter(table_html)
            .map(|c| c.get(1).unwrap().as_str())
            .collect();
        if rows.is_empty() {
            continue;
        }

        // The header is normally the first row, but some layouts put a
        // caption row above it.
        let header = rows
            .iter()
            .take(3)
            .enumerate()
            .map(|(idx, row)| {
                let cells = row_cells(row);
                (idx, ColumnMap::detect(&cells))
            })
            .find(|(_, map)| map.has_identity());

        if let Some((header_idx, columns)) = header {
            let parsed = parse_table(&rows, &columns, header_idx);
            if best
                .as_ref()
                .is_none_or(|b| parsed.records.len() > b.records.len())
            {
                best = Some(parsed);
            }
        } else if fallback.is_none() && rows.len() >= 2 {
            let width = rows.iter().map(|r| row_cells(r).len()).max().unwrap_or(0);
            if width >= 5 {
                fallback = Some(parse_table_positional(&rows));
            }
        }
    }

    let result = best.or(fallback).ok_or(ParseError)?;
    Ok(TableParse {
        records: result.records,
        skipped_rows: result.skipped,
    })
}

/// Records plus row diagnostics from one table.
#[derive(Debug, Clone)]
pub struct TableParse {
    pub records: Vec<ModelRecord>,
    pub skipped_rows: usize,
}

/// Parse a raw HTML document into a snapshot. Pure: the capture timestamp
/// is an input, and identical input yields identical output.
pub fn parse_html(html: &str, captured_at: DateTime<Utc>) -> Result<ParseOutcome, ParseError> {
    let meta = parse_page_metadata(html);
    let table = parse_leaderboard_table(html)?;
    Ok(ParseOutcome {
        snapshot: Snapshot::new(captured_at, meta, table.records),
        skipped_rows: table.skipped_rows,
    })
}
