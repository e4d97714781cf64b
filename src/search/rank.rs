//! `rank()`: relevance scoring over FTS3/FTS4 `matchinfo()` statistics.
//!
//! The function is called by SQLite once per candidate row:
//!
//! ```sql
//! SELECT * FROM docs
//! WHERE textContents MATCH ?
//! ORDER BY rank(matchinfo(docs), 0.0, 1.0, 0.0, 0.0) DESC
//! ```
//!
//! The first argument is the default (`pcx`) matchinfo blob, followed by one
//! weight per table column. For every phrase of the query and every column the
//! score grows by `(hits in this row / hits in all rows) * column weight`.
//! A larger score means a more relevant row.

use rusqlite::Connection;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ValueRef;
use thiserror::Error;

/// Name the scoring function is registered under.
pub const RANK_FUNCTION_NAME: &str = "rank";

const WORD_BYTES: usize = 4;
const HEADER_WORDS: usize = 2;
const WORDS_PER_ENTRY: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RankError {
    #[error("no args passed to function rank()")]
    MissingArguments,
    #[error("first argument to rank() must be a matchinfo blob")]
    NotABlob,
    #[error("invalid matchinfo blob passed to function rank() ({len} bytes)")]
    InvalidBlob { len: usize },
    #[error("invalid args (expected: {expected}, got: {got}) passed to function rank()")]
    ArgumentCount { expected: usize, got: usize },
}

/// Hit statistics of one phrase in one column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhraseColumnHits {
    /// Occurrences of the phrase in this column of the current row.
    pub local: u32,
    /// Occurrences of the phrase in this column across all rows.
    pub global: u32,
    /// Rows whose column contains the phrase at least once.
    pub docs: u32,
}

/// Decoded `matchinfo()` blob, phrase-major and column-minor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchInfo {
    phrase_count: usize,
    column_count: usize,
    hits: Vec<PhraseColumnHits>,
}

impl MatchInfo {
    /// Byte length of a well-formed blob for the given dimensions.
    pub const fn expected_len(phrase_count: usize, column_count: usize) -> usize {
        (HEADER_WORDS + WORDS_PER_ENTRY * column_count * phrase_count) * WORD_BYTES
    }

    /// Decode and validate a raw blob (native-endian 32-bit words).
    pub fn decode(blob: &[u8]) -> Result<Self, RankError> {
        let invalid = || RankError::InvalidBlob { len: blob.len() };
        if blob.len() % WORD_BYTES != 0 {
            return Err(invalid());
        }

        let words: Vec<u32> = blob
            .chunks_exact(WORD_BYTES)
            .map(|w| u32::from_ne_bytes([w[0], w[1], w[2], w[3]]))
            .collect();
        let (phrase_count, column_count) = match words.as_slice() {
            [p, c, ..] => (*p as usize, *c as usize),
            _ => (0, 0),
        };

        let entries = phrase_count
            .checked_mul(column_count)
            .ok_or_else(invalid)?;
        let expected_words = entries
            .checked_mul(WORDS_PER_ENTRY)
            .and_then(|n| n.checked_add(HEADER_WORDS))
            .ok_or_else(invalid)?;
        if words.len() != expected_words {
            return Err(invalid());
        }

        let hits = words[HEADER_WORDS..]
            .chunks_exact(WORDS_PER_ENTRY)
            .map(|e| PhraseColumnHits {
                local: e[0],
                global: e[1],
                docs: e[2],
            })
            .collect();

        Ok(Self {
            phrase_count,
            column_count,
            hits,
        })
    }

    /// Build from explicit statistics; `hits` is phrase-major.
    pub fn from_hits(
        phrase_count: usize,
        column_count: usize,
        hits: Vec<PhraseColumnHits>,
    ) -> Result<Self, RankError> {
        if hits.len() != phrase_count * column_count {
            return Err(RankError::InvalidBlob {
                len: HEADER_WORDS * WORD_BYTES + hits.len() * WORDS_PER_ENTRY * WORD_BYTES,
            });
        }
        Ok(Self {
            phrase_count,
            column_count,
            hits,
        })
    }

    /// Encode back into the layout SQLite produces.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::expected_len(self.phrase_count, self.column_count));
        out.extend_from_slice(&(self.phrase_count as u32).to_ne_bytes());
        out.extend_from_slice(&(self.column_count as u32).to_ne_bytes());
        for h in &self.hits {
            out.extend_from_slice(&h.local.to_ne_bytes());
            out.extend_from_slice(&h.global.to_ne_bytes());
            out.extend_from_slice(&h.docs.to_ne_bytes());
        }
        out
    }

    pub fn phrase_count(&self) -> usize {
        self.phrase_count
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    pub fn hits(&self, phrase: usize, column: usize) -> Option<PhraseColumnHits> {
        if phrase >= self.phrase_count || column >= self.column_count {
            return None;
        }
        self.hits.get(phrase * self.column_count + column).copied()
    }

    /// Sum of `local / global * weight` over every phrase and column with hits.
    pub fn score(&self, weights: &[f64]) -> Result<f64, RankError> {
        if weights.len() != self.column_count {
            return Err(RankError::ArgumentCount {
                expected: self.column_count + 1,
                got: weights.len() + 1,
            });
        }

        let mut score = 0.0;
        for phrase in self.hits.chunks_exact(self.column_count.max(1)) {
            for (hit, weight) in phrase.iter().zip(weights) {
                if hit.local == 0 {
                    continue;
                }
                // A row hit is always counted in the global total.
                debug_assert!(hit.global >= hit.local, "matchinfo global < local");
                if hit.global == 0 {
                    continue;
                }
                score += (f64::from(hit.local) / f64::from(hit.global)) * weight;
            }
        }
        Ok(score)
    }
}

fn user_error(err: RankError) -> rusqlite::Error {
    rusqlite::Error::UserFunctionError(Box::new(err))
}

fn rank_scalar(ctx: &Context<'_>) -> rusqlite::Result<f64> {
    if ctx.is_empty() {
        return Err(user_error(RankError::MissingArguments));
    }
    let info = match ctx.get_raw(0) {
        ValueRef::Blob(blob) => MatchInfo::decode(blob).map_err(user_error)?,
        _ => return Err(user_error(RankError::NotABlob)),
    };

    let got = ctx.len();
    if got != info.column_count() + 1 {
        return Err(user_error(RankError::ArgumentCount {
            expected: info.column_count() + 1,
            got,
        }));
    }

    let weights = (1..got)
        .map(|i| ctx.get::<f64>(i))
        .collect::<rusqlite::Result<Vec<_>>>()?;
    info.score(&weights).map_err(user_error)
}

/// Register `rank()` on the connection.
pub fn register_rank_function(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        RANK_FUNCTION_NAME,
        -1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        rank_scalar,
    )
}
