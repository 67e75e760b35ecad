// Metadata token extraction for task text
//
// Tokens: #tag, @mention, +modifier[:value], _due/_done/_created/_wip:<date>, _spent:<minutes>
// A token only counts when it starts the text or follows whitespace.

use crate::model::{Modifier, TaskDates};
use regex::Regex;
use std::sync::LazyLock;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)#(\w[\w\-/]*)").unwrap());

static MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)@(\w[\w\-]*)").unwrap());

static MODIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)\+(\w[\w\-]*)(?::(\S+))?").unwrap());

/// Only the four known keys; any other `_key:date` stays in the description
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|\s)_(due|done|created|wip):(\d{4}-\d{2}-\d{2}(?:T\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?Z?)?)\b",
    )
    .unwrap()
});

static SPENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)_spent:(\d+)\b").unwrap());

/// Matches a whole date value as written in a `_key:` token
static DATE_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}(?:T\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?Z?)?$").unwrap()
});

/// Everything recognised in a piece of task text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub description: String,
    pub tags: Vec<String>,
    pub mentions: Vec<String>,
    pub modifiers: Vec<Modifier>,
    pub dates: TaskDates,
    pub time_spent: Option<u32>,
}

/// Extract all metadata from `text` and return it with the cleaned description.
///
/// Stripping a token can expose another one (`#a#b` leaves `#b` after whitespace),
/// so extraction repeats until the remaining text holds no tokens. That keeps the
/// result stable when the rendered line is parsed again.
pub fn extract(text: &str) -> Extracted {
    let mut out = Extracted::default();
    let mut remaining = text.to_string();

    while has_tokens(&remaining) {
        for tag in extract_tags(&remaining) {
            push_unique(&mut out.tags, tag);
        }
        for mention in extract_mentions(&remaining) {
            push_unique(&mut out.mentions, mention);
        }
        for modifier in extract_modifiers(&remaining) {
            if !out.modifiers.iter().any(|m| m.name == modifier.name) {
                out.modifiers.push(modifier);
            }
        }
        let dates = extract_dates(&remaining);
        out.dates.due = out.dates.due.take().or(dates.due);
        out.dates.done = out.dates.done.take().or(dates.done);
        out.dates.created = out.dates.created.take().or(dates.created);
        out.dates.wip = out.dates.wip.take().or(dates.wip);
        if out.time_spent.is_none() {
            out.time_spent = extract_time_spent(&remaining);
        }

        remaining = strip_tokens(&remaining);
    }

    out.description = collapse_whitespace(&remaining);
    out
}

/// Lowercase `#tags` in order of appearance, without duplicates
pub fn extract_tags(text: &str) -> Vec<String> {
    let mut tags = Vec::new();
    for caps in TAG_RE.captures_iter(text) {
        push_unique(&mut tags, caps[1].to_lowercase());
    }
    tags
}

/// Lowercase `@mentions` in order of appearance, without duplicates
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut mentions = Vec::new();
    for caps in MENTION_RE.captures_iter(text) {
        push_unique(&mut mentions, caps[1].to_lowercase());
    }
    mentions
}

/// `+name[:value]` modifiers; the first occurrence of a name wins
pub fn extract_modifiers(text: &str) -> Vec<Modifier> {
    let mut modifiers: Vec<Modifier> = Vec::new();
    for caps in MODIFIER_RE.captures_iter(text) {
        let name = caps[1].to_lowercase();
        if modifiers.iter().any(|m| m.name == name) {
            continue;
        }
        modifiers.push(match caps.get(2) {
            Some(value) => Modifier::with_value(name, value.as_str()),
            None => Modifier::new(name),
        });
    }
    modifiers
}

/// Known dated fields; the first occurrence of a key wins
pub fn extract_dates(text: &str) -> TaskDates {
    let mut dates = TaskDates::default();
    for caps in DATE_RE.captures_iter(text) {
        let value = caps[2].to_string();
        let slot = match &caps[1] {
            "due" => &mut dates.due,
            "done" => &mut dates.done,
            "created" => &mut dates.created,
            "wip" => &mut dates.wip,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }
    dates
}

pub fn extract_time_spent(text: &str) -> Option<u32> {
    SPENT_RE
        .captures_iter(text)
        .find_map(|caps| caps[1].parse().ok())
}

/// Whether a value can be written after `_due:` and friends
pub fn is_date_value(value: &str) -> bool {
    DATE_VALUE_RE.is_match(value)
        && chrono::NaiveDate::parse_from_str(&value[..10], "%Y-%m-%d").is_ok()
}

/// Whether `name` survives a render/extract cycle as a bare tag or mention
pub fn is_token_name(name: &str) -> bool {
    let tags = extract_tags(&format!("#{}", name));
    tags.len() == 1 && tags[0] == name.to_lowercase()
}

fn has_tokens(text: &str) -> bool {
    TAG_RE.is_match(text)
        || MENTION_RE.is_match(text)
        || MODIFIER_RE.is_match(text)
        || DATE_RE.is_match(text)
        || SPENT_RE.captures_iter(text).any(|caps| is_minutes(&caps[1]))
}

fn strip_tokens(text: &str) -> String {
    let text = TAG_RE.replace_all(text, " ");
    let text = MENTION_RE.replace_all(&text, " ");
    let text = MODIFIER_RE.replace_all(&text, " ");
    let text = DATE_RE.replace_all(&text, " ");
    // A `_spent` value that doesn't fit stays in the description rather than being lost
    SPENT_RE
        .replace_all(&text, |caps: &regex::Captures| {
            if is_minutes(&caps[1]) {
                " ".to_string()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn is_minutes(value: &str) -> bool {
    value.parse::<u32>().is_ok()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}
