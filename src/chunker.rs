//! Splits chapter text into size-bounded chunks at safe boundaries.
//!
//! Paragraph breaks are preferred, then sentence ends, then a hard split at
//! the limit. Every byte of the input ends up either in a chunk's `source` or
//! in its `separator`, so reassembly is exact.

use crate::error::ChunkError;
use crate::job::Chunk;
use regex::Regex;
use std::sync::LazyLock;

/// Blank line(s) between paragraphs, including any indentation that follows.
static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t\r]*\n\s*").expect("Invalid PARAGRAPH_BREAK"));

/// Sentence terminators. Western punctuation needs trailing whitespace (or the
/// end of the text) so that "3.14" stays whole; CJK punctuation does not.
static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[.!?…]+["'”’)\]]*(?:\s+|$)|[。！？]+[」』）"”]*\s*"#)
        .expect("Invalid SENTENCE_END")
});

/// A piece of text plus the separator that follows it, as byte offsets.
#[derive(Debug, Clone, Copy)]
struct Atom {
    start: usize,
    end: usize,
    sep_end: usize,
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split `text` into ordered chunks of at most `max_chunk_chars` characters.
pub fn split(text: &str, max_chunk_chars: usize) -> Result<Vec<Chunk>, ChunkError> {
    if max_chunk_chars == 0 {
        return Err(ChunkError::InvalidLimit);
    }
    if text.trim().is_empty() {
        return Err(ChunkError::EmptyInput);
    }

    let mut atoms = Vec::new();
    for para in split_paragraphs(text) {
        if char_len(&text[para.start..para.end]) <= max_chunk_chars {
            atoms.push(para);
            continue;
        }
        for sentence in split_sentences(text, para) {
            if char_len(&text[sentence.start..sentence.end]) <= max_chunk_chars {
                atoms.push(sentence);
            } else {
                atoms.extend(hard_split(text, sentence, max_chunk_chars));
            }
        }
    }

    Ok(pack(text, &atoms, max_chunk_chars))
}

/// Concatenate chunk texts in index order with their recorded separators.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut sorted: Vec<&Chunk> = chunks.iter().collect();
    sorted.sort_by_key(|c| c.index);

    let mut out = String::new();
    for chunk in sorted {
        out.push_str(chunk.final_text());
        out.push_str(&chunk.separator);
    }
    out
}

fn split_paragraphs(text: &str) -> Vec<Atom> {
    let mut atoms = Vec::new();
    let mut last = 0;

    for m in PARAGRAPH_BREAK.find_iter(text) {
        let body = &text[last..m.start()];
        let end = last + body.trim_end().len();
        atoms.push(Atom {
            start: last,
            end,
            sep_end: m.end(),
        });
        last = m.end();
    }

    let body = &text[last..];
    atoms.push(Atom {
        start: last,
        end: last + body.trim_end().len(),
        sep_end: text.len(),
    });
    atoms
}

fn split_sentences(text: &str, para: Atom) -> Vec<Atom> {
    let body = &text[para.start..para.end];
    let mut atoms = Vec::new();
    let mut last = 0;

    for m in SENTENCE_END.find_iter(body) {
        let end = m.start() + m.as_str().trim_end().len();
        atoms.push(Atom {
            start: para.start + last,
            end: para.start + end,
            sep_end: para.start + m.end(),
        });
        last = m.end();
    }
    if last < body.len() {
        atoms.push(Atom {
            start: para.start + last,
            end: para.end,
            sep_end: para.end,
        });
    }

    // The paragraph's own separator follows its final sentence.
    if let Some(final_atom) = atoms.last_mut() {
        final_atom.sep_end = para.sep_end;
    }
    atoms
}

fn hard_split(text: &str, atom: Atom, max_chunk_chars: usize) -> Vec<Atom> {
    let body = &text[atom.start..atom.end];
    let mut boundaries: Vec<usize> = body
        .char_indices()
        .map(|(i, _)| i)
        .step_by(max_chunk_chars)
        .skip(1)
        .collect();
    boundaries.push(body.len());

    let mut atoms = Vec::with_capacity(boundaries.len());
    let mut last = 0;
    for b in boundaries {
        atoms.push(Atom {
            start: atom.start + last,
            end: atom.start + b,
            sep_end: atom.start + b,
        });
        last = b;
    }
    if let Some(final_atom) = atoms.last_mut() {
        final_atom.sep_end = atom.sep_end;
    }
    atoms
}

/// Greedily merge consecutive atoms while the merged text stays within the limit.
fn pack(text: &str, atoms: &[Atom], max_chunk_chars: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current: Option<(Atom, usize)> = None;

    for &atom in atoms {
        let atom_len = char_len(&text[atom.start..atom.end]);
        current = match current {
            None => Some((atom, atom_len)),
            Some((cur, len)) => {
                let sep_len = char_len(&text[cur.end..cur.sep_end]);
                if len + sep_len + atom_len <= max_chunk_chars {
                    let merged = Atom {
                        start: cur.start,
                        end: atom.end,
                        sep_end: atom.sep_end,
                    };
                    Some((merged, len + sep_len + atom_len))
                } else {
                    chunks.push(to_chunk(text, chunks.len(), cur));
                    Some((atom, atom_len))
                }
            }
        };
    }

    if let Some((cur, _)) = current {
        chunks.push(to_chunk(text, chunks.len(), cur));
    }
    chunks
}

fn to_chunk(text: &str, index: usize, atom: Atom) -> Chunk {
    Chunk::new(
        index,
        text[atom.start..atom.end].to_string(),
        text[atom.end..atom.sep_end].to_string(),
    )
}
