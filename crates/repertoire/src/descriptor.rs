use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tunesmith_core::TuneError;

pub const DEFAULT_WILDCARD: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderKind {
    UnitLength,
    Meter,
    Key,
}

impl std::fmt::Display for HeaderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HeaderKind::UnitLength => "unit length",
            HeaderKind::Meter => "meter",
            HeaderKind::Key => "key",
        };
        f.write_str(name)
    }
}

/// How a model spells its header fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderRules {
    pub unit_length_prefix: String,
    pub meter_prefix: String,
    pub key_prefix: String,
    pub inline_open: String,
    pub inline_close: String,
    pub no_meter: String,
    pub no_key: String,
}

impl Default for HeaderRules {
    fn default() -> Self {
        Self {
            unit_length_prefix: "L:".to_string(),
            meter_prefix: "M:".to_string(),
            key_prefix: "K:".to_string(),
            inline_open: "[".to_string(),
            inline_close: "]".to_string(),
            no_meter: "M:none".to_string(),
            no_key: "K:none".to_string(),
        }
    }
}

impl HeaderRules {
    pub fn prefix(&self, kind: HeaderKind) -> &str {
        match kind {
            HeaderKind::UnitLength => &self.unit_length_prefix,
            HeaderKind::Meter => &self.meter_prefix,
            HeaderKind::Key => &self.key_prefix,
        }
    }

    pub fn inline(&self, token: &str) -> String {
        format!("{}{}{}", self.inline_open, token, self.inline_close)
    }

    pub fn is_inline(&self, token: &str) -> bool {
        token.len() >= self.inline_open.len() + self.inline_close.len()
            && token.starts_with(&self.inline_open)
            && token.ends_with(&self.inline_close)
    }

    /// `[M:3/4]` -> `M:3/4`; anything else is returned untouched.
    pub fn strip_inline<'a>(&self, token: &'a str) -> &'a str {
        if self.is_inline(token) {
            &token[self.inline_open.len()..token.len() - self.inline_close.len()]
        } else {
            token
        }
    }

    /// True for both the bare (`M:4/4`) and inline (`[M:4/4]`) spelling.
    pub fn carries(&self, kind: HeaderKind, token: &str) -> bool {
        let prefix = self.prefix(kind);
        !prefix.is_empty() && self.strip_inline(token).starts_with(prefix)
    }

    pub fn header_kind(&self, token: &str) -> Option<HeaderKind> {
        [HeaderKind::Meter, HeaderKind::Key, HeaderKind::UnitLength]
            .into_iter()
            .find(|kind| self.carries(*kind, token))
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct HeaderTables {
    #[serde(default)]
    pub l: Vec<String>,
    pub m: Option<Vec<String>>,
    pub k: Option<Vec<String>>,
}

/// A descriptor as written on disk. Required fields are optional here so a
/// missing one can be reported by name instead of as a parse error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RawDescriptor {
    pub id: Option<String>,
    pub display_name: Option<String>,
    #[serde(default)]
    pub rank: i32,
    pub parameters: Option<PathBuf>,
    pub tokens: Option<Vec<String>>,
    pub wildcard: Option<String>,
    #[serde(default)]
    pub header: HeaderTables,
    #[serde(default)]
    pub rules: HeaderRules,
    pub l_for_m: Option<BTreeMap<String, BTreeMap<String, f64>>>,
}

impl RawDescriptor {
    pub fn into_descriptor(self, origin: &str) -> Result<ModelDescriptor, TuneError> {
        let corrupt = |reason: &str| TuneError::CorruptDescriptor {
            path: origin.to_string(),
            reason: reason.to_string(),
        };

        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| corrupt("missing field `id`"))?;
        let tokens = self
            .tokens
            .filter(|tokens| !tokens.is_empty())
            .ok_or_else(|| corrupt("missing field `tokens`"))?;
        let meters = self.header.m.ok_or_else(|| corrupt("missing field `header.m`"))?;
        let keys = self.header.k.ok_or_else(|| corrupt("missing field `header.k`"))?;
        let wildcard = self.wildcard.unwrap_or_else(|| DEFAULT_WILDCARD.to_string());

        let mut vocabulary: BTreeSet<String> = tokens.into_iter().collect();
        vocabulary.insert(wildcard.clone());

        if let Some(table) = &self.l_for_m {
            for (meter, freqs) in table {
                if freqs.values().any(|w| !w.is_finite() || *w < 0.0) {
                    return Err(corrupt(&format!("negative frequency for {}", meter)));
                }
            }
        }

        Ok(ModelDescriptor {
            display_name: self.display_name.unwrap_or_else(|| id.clone()),
            id,
            rank: self.rank,
            parameters: self.parameters,
            vocabulary,
            wildcard,
            unit_lengths: self.header.l,
            meters,
            keys,
            unit_length_for_meter: self.l_for_m,
            rules: self.rules,
        })
    }
}

/// Everything the rest of the system needs to know about one model.
/// Immutable once loaded.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub rank: i32,
    /// Trained parameters handed to the engine, if the engine needs them.
    pub parameters: Option<PathBuf>,
    pub wildcard: String,
    pub rules: HeaderRules,
    vocabulary: BTreeSet<String>,
    unit_lengths: Vec<String>,
    meters: Vec<String>,
    keys: Vec<String>,
    unit_length_for_meter: Option<BTreeMap<String, BTreeMap<String, f64>>>,
}

impl ModelDescriptor {
    pub fn vocabulary(&self) -> &BTreeSet<String> {
        &self.vocabulary
    }

    pub fn header_tokens(&self, kind: HeaderKind) -> &[String] {
        match kind {
            HeaderKind::UnitLength => &self.unit_lengths,
            HeaderKind::Meter => &self.meters,
            HeaderKind::Key => &self.keys,
        }
    }

    pub fn has_frequency_table(&self) -> bool {
        self.unit_length_for_meter.is_some()
    }

    /// Exact membership only; empty strings are ignored.
    pub fn accepts_tokens<S: AsRef<str>>(&self, tokens: &[S]) -> bool {
        tokens
            .iter()
            .map(AsRef::as_ref)
            .filter(|t| !t.is_empty())
            .all(|t| self.vocabulary.contains(t))
    }

    /// A header token is valid if it is listed for its kind either as written
    /// or in the model's inline bracket spelling. An empty token is valid only
    /// when the model has no tokens of that kind.
    pub fn accepts_header(&self, kind: HeaderKind, token: &str) -> bool {
        let table = self.header_tokens(kind);
        if token.is_empty() {
            return table.is_empty();
        }
        let inline = self.rules.inline(token);
        table.iter().any(|t| t == token || *t == inline)
    }

    /// Pick a unit length for `meter`, weighted by how often the model saw it.
    /// The same seed and meter always give the same answer.
    pub fn sample_unit_length(&self, meter: &str, seed: u64) -> String {
        let Some(table) = &self.unit_length_for_meter else {
            return String::new();
        };
        if meter == self.wildcard {
            return self.wildcard.clone();
        }
        let freqs = table
            .get(meter)
            .or_else(|| table.get(&self.rules.inline(meter)))
            .or_else(|| table.get(self.rules.strip_inline(meter)));
        let Some(freqs) = freqs else {
            return String::new();
        };

        let (choices, weights): (Vec<&String>, Vec<f64>) =
            freqs.iter().map(|(l, w)| (l, *w)).unzip();
        let Ok(dist) = WeightedIndex::new(&weights) else {
            return String::new();
        };
        let mut rng = StdRng::seed_from_u64(seed);
        choices[dist.sample(&mut rng)].clone()
    }
}
