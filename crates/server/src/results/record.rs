// crates/server/src/results/record.rs
//! One decoded artifact row.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

/// A row of a tweet artifact.
///
/// The columns the crawler always writes are typed; every other column is
/// carried through unchanged, in file order, and serialized alongside them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TweetRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_str: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retweet_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favorite_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tweet_url: Option<String>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl TweetRecord {
    /// Build a record from `(column, cell)` pairs in column order.
    pub fn from_cells<I>(cells: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut record = Self::default();
        for (column, cell) in cells {
            record.set(column, cell);
        }
        record
    }

    fn set(&mut self, column: String, cell: Value) {
        let text_slot = match column.as_str() {
            "id_str" => Some(&mut self.id_str),
            "full_text" => Some(&mut self.full_text),
            "username" => Some(&mut self.username),
            "created_at" => Some(&mut self.created_at),
            "tweet_url" => Some(&mut self.tweet_url),
            _ => None,
        };
        if let Some(slot) = text_slot {
            *slot = Some(cell_text(cell));
            return;
        }

        let counter_slot = match column.as_str() {
            "retweet_count" => Some(&mut self.retweet_count),
            "favorite_count" => Some(&mut self.favorite_count),
            "reply_count" => Some(&mut self.reply_count),
            _ => None,
        };
        if let Some(slot) = counter_slot {
            if let Some(n) = cell_count(&cell) {
                *slot = Some(n);
                return;
            }
            // Not a count after all; keep the raw cell rather than lose it.
        }

        self.extra.insert(column, cell);
    }

    /// Number of populated columns, known and extra.
    pub fn len(&self) -> usize {
        let known = [
            self.id_str.is_some(),
            self.full_text.is_some(),
            self.username.is_some(),
            self.created_at.is_some(),
            self.retweet_count.is_some(),
            self.favorite_count.is_some(),
            self.reply_count.is_some(),
            self.tweet_url.is_some(),
        ];
        known.iter().filter(|&&set| set).count() + self.extra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cell_text(cell: Value) -> String {
    match cell {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn cell_count(cell: &Value) -> Option<u64> {
    match cell {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
