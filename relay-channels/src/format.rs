//! Outbound message splitting.
//!
//! Messaging gateways cap message length (Discord: 2000 characters). Long
//! responses are split greedily at the coarsest boundary that fits:
//! paragraphs, then lines, then words. A single word longer than the limit
//! is cut at exactly `max_len` characters.
//!
//! Lengths are counted in characters, not bytes.

/// Maximum message length for Discord.
pub const MAX_MESSAGE_LENGTH: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Paragraph,
    Line,
    Word,
}

impl Boundary {
    const fn separator(self) -> &'static str {
        match self {
            Self::Paragraph => "\n\n",
            Self::Line => "\n",
            Self::Word => " ",
        }
    }

    const fn finer(self) -> Option<Self> {
        match self {
            Self::Paragraph => Some(Self::Line),
            Self::Line => Some(Self::Word),
            Self::Word => None,
        }
    }

    /// Non-blank pieces of `text` at this granularity.
    fn pieces(self, text: &str) -> Vec<&str> {
        match self {
            Self::Paragraph => text
                .split("\n\n")
                .map(|p| p.trim_matches('\n').trim_end())
                .filter(|p| !p.trim().is_empty())
                .collect(),
            Self::Line => text
                .split('\n')
                .map(str::trim_end)
                .filter(|l| !l.trim().is_empty())
                .collect(),
            Self::Word => text.split_whitespace().collect(),
        }
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split a message into segments of at most `max_len` characters.
///
/// Empty input yields no segments; input that already fits yields the
/// trimmed input. Segments keep reading order and are never empty.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let text = text.trim();

    if text.is_empty() {
        return Vec::new();
    }
    if char_len(text) <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    pack(text, max_len, Boundary::Paragraph, &mut chunks);

    if chunks.is_empty() {
        return hard_split(text, max_len);
    }
    chunks
}

/// Greedily pack the pieces of `text` into `out`, recursing into finer
/// boundaries for pieces that do not fit on their own.
fn pack(text: &str, max_len: usize, boundary: Boundary, out: &mut Vec<String>) {
    let separator = boundary.separator();
    let separator_len = separator.len();

    let mut current = String::new();
    let mut current_len = 0;

    for piece in boundary.pieces(text) {
        let piece_len = char_len(piece);

        if piece_len > max_len {
            flush(&mut current, &mut current_len, out);
            match boundary.finer() {
                Some(finer) => pack(piece, max_len, finer, out),
                None => out.extend(hard_split(piece, max_len)),
            }
            continue;
        }

        if current_len > 0 && current_len + separator_len + piece_len > max_len {
            flush(&mut current, &mut current_len, out);
        }

        if current_len > 0 {
            current.push_str(separator);
            current_len += separator_len;
        }
        current.push_str(piece);
        current_len += piece_len;
    }

    flush(&mut current, &mut current_len, out);
}

fn flush(current: &mut String, current_len: &mut usize, out: &mut Vec<String>) {
    if !current.trim().is_empty() {
        out.push(std::mem::take(current));
    } else {
        current.clear();
    }
    *current_len = 0;
}

/// Cut `text` into slices of exactly `max_len` characters (the last may be shorter).
fn hard_split(text: &str, max_len: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_len.max(1))
        .map(|c| c.iter().collect())
        .collect()
}
