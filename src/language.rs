//! Supported language preferences.
//!
//! The relay addresses languages by FLORES-200 style tags (`eng_Latn`,
//! `spa_Latn`, ...). The set is closed: the relay only loads models for
//! these pairs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A language the relay can translate into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Language {
    /// English.
    #[default]
    #[serde(rename = "eng_Latn")]
    English,
    /// Spanish.
    #[serde(rename = "spa_Latn")]
    Spanish,
    /// French.
    #[serde(rename = "fra_Latn")]
    French,
    /// German.
    #[serde(rename = "deu_Latn")]
    German,
    /// Italian.
    #[serde(rename = "ita_Latn")]
    Italian,
    /// Chinese (Simplified).
    #[serde(rename = "zho_Hans")]
    ChineseSimplified,
    /// Hindi.
    #[serde(rename = "hin_Deva")]
    Hindi,
    /// Japanese.
    #[serde(rename = "jpn_Jpan")]
    Japanese,
}

impl Language {
    /// Every supported language, in picker order.
    pub const ALL: [Self; 8] = [
        Self::English,
        Self::Spanish,
        Self::French,
        Self::German,
        Self::Italian,
        Self::ChineseSimplified,
        Self::Hindi,
        Self::Japanese,
    ];

    /// Wire tag sent in the `lang` query parameter.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::English => "eng_Latn",
            Self::Spanish => "spa_Latn",
            Self::French => "fra_Latn",
            Self::German => "deu_Latn",
            Self::Italian => "ita_Latn",
            Self::ChineseSimplified => "zho_Hans",
            Self::Hindi => "hin_Deva",
            Self::Japanese => "jpn_Jpan",
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::English => "English",
            Self::Spanish => "Spanish",
            Self::French => "French",
            Self::German => "German",
            Self::Italian => "Italian",
            Self::ChineseSimplified => "Chinese (Simplified)",
            Self::Hindi => "Hindi",
            Self::Japanese => "Japanese",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Returned when a tag is not one of [`Language::ALL`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported language tag {0:?}")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|lang| lang.tag() == s)
            .ok_or_else(|| UnknownLanguage(s.to_string()))
    }
}
