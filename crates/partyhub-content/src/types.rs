use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Target audience of a category or task. Ordered from youngest to oldest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeGroup {
    Kids,
    Teen,
    Adults,
}

impl AgeGroup {
    /// Whether content from a category of this age group may be served to
    /// `target`. Adults-only categories only suit adults, teen categories
    /// never suit kids.
    pub fn suits(self, target: AgeGroup) -> bool {
        self <= target
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgeGroup::Kids => write!(f, "kids"),
            AgeGroup::Teen => write!(f, "teen"),
            AgeGroup::Adults => write!(f, "adults"),
        }
    }
}

impl FromStr for AgeGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kids" => Ok(AgeGroup::Kids),
            "teen" => Ok(AgeGroup::Teen),
            "adults" => Ok(AgeGroup::Adults),
            other => Err(format!("unknown age group: {other}")),
        }
    }
}

/// Supported content languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Fr,
    Es,
    De,
}

impl Language {
    /// Every supported language, in generation order.
    pub const ALL: [Language; 4] = [Language::En, Language::Fr, Language::Es, Language::De];

    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Fr => "fr",
            Language::Es => "es",
            Language::De => "de",
        }
    }

    /// English name, used inside generation prompts.
    pub fn name(self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Fr => "French",
            Language::Es => "Spanish",
            Language::De => "German",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|l| l.code() == s)
            .ok_or_else(|| format!("unsupported language: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Truth,
    Dare,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Truth => write!(f, "truth"),
            TaskKind::Dare => write!(f, "dare"),
        }
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "truth" => Ok(TaskKind::Truth),
            "dare" => Ok(TaskKind::Dare),
            other => Err(format!("unknown task kind: {other}")),
        }
    }
}

/// An active (not soft-deleted) category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub label: String,
    pub age_group: AgeGroup,
    /// Explicit content; generation prompts switch to explicit mode.
    pub requires_consent: bool,
}

#[derive(Debug, Clone)]
pub struct NewCategory {
    pub label: String,
    pub age_group: AgeGroup,
    pub requires_consent: bool,
}

/// A truth or dare ready to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub category_id: i64,
    pub kind: TaskKind,
    pub language: Language,
    pub age_group: AgeGroup,
    pub text: String,
}
