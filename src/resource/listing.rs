//! Directory listing entries and their presentation.

use std::cmp::Ordering;
use std::time::SystemTime;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use time::OffsetDateTime;
use time::macros::format_description;

use crate::mime::MimeTypes;
use crate::template::ListingItem;

/// Characters escaped when a file name becomes part of a link.
const LINK_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'\'')
    .add(b'+')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// One entry of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: SystemTime,
}

/// Sorts directories first, then by name within each group.
pub fn sort_entries(entries: &mut [DirEntry]) {
    entries.sort_by(|a, b| match (a.is_dir, b.is_dir) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.name.cmp(&b.name),
    });
}

/// Formats a byte count in SI units (base 1000), e.g. `1.5 kB`.
pub fn human_size(bytes: u64) -> String {
    const UNIT: u64 = 1000;
    const PREFIXES: [char; 6] = ['k', 'M', 'G', 'T', 'P', 'E'];

    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut exp = 0;
    let mut scaled = bytes;
    while scaled >= UNIT && exp < PREFIXES.len() {
        scaled /= UNIT;
        exp += 1;
    }
    let value = bytes as f64 / (UNIT as f64).powi(exp as i32);
    format!("{value:.1} {}B", PREFIXES[exp - 1])
}

/// Formats a timestamp as `2024-Jan-05 13:04:22 UTC`.
pub fn format_modified(modified: SystemTime) -> String {
    let format =
        format_description!("[year]-[month repr:short]-[day] [hour]:[minute]:[second] UTC");
    OffsetDateTime::from(modified)
        .format(&format)
        .unwrap_or_else(|_| String::from("--"))
}

/// Builds the template rows for `entries` listed under `base_uri`.
///
/// Links are absolute so they work whether or not `base_uri` ends in `/`.
pub fn listing_items(base_uri: &str, entries: &[DirEntry], mime: &MimeTypes) -> Vec<ListingItem> {
    let base = base_uri
        .trim_end_matches('/')
        .split('/')
        .map(|segment| utf8_percent_encode(segment, LINK_ESCAPE).to_string())
        .collect::<Vec<_>>()
        .join("/");
    entries
        .iter()
        .map(|entry| {
            let encoded = utf8_percent_encode(&entry.name, LINK_ESCAPE).to_string();
            let (link, bs, size, kind) = if entry.is_dir {
                (format!("{base}/{encoded}/"), "/", String::from("--"), "Directory")
            } else {
                (
                    format!("{base}/{encoded}"),
                    "",
                    human_size(entry.size),
                    mime.lookup(&entry.name),
                )
            };
            ListingItem {
                name: entry.name.clone(),
                link,
                bs: bs.to_owned(),
                modified: format_modified(entry.modified),
                size,
                kind: kind.to_owned(),
            }
        })
        .collect()
}
