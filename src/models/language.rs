//! Supported submission languages

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{container_images, languages};

/// Closed set of languages the sandbox can execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    C,
    Cpp,
    Java,
    Javascript,
}

/// A language identifier outside the supported table
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported language: {0}")]
pub struct UnsupportedLanguage(pub String);

impl Language {
    /// Every supported language, in table order
    pub const ALL: [Language; 5] = [
        Language::Python,
        Language::C,
        Language::Cpp,
        Language::Java,
        Language::Javascript,
    ];

    /// Get language identifier as string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => languages::PYTHON,
            Self::C => languages::C,
            Self::Cpp => languages::CPP,
            Self::Java => languages::JAVA,
            Self::Javascript => languages::JAVASCRIPT,
        }
    }

    /// Docker image with the toolchain for this language
    pub fn image(&self) -> &'static str {
        match self {
            Self::Python => container_images::PYTHON,
            Self::C => container_images::C,
            Self::Cpp => container_images::CPP,
            Self::Java => container_images::JAVA,
            Self::Javascript => container_images::JAVASCRIPT,
        }
    }
}

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            languages::PYTHON => Ok(Self::Python),
            languages::C => Ok(Self::C),
            languages::CPP => Ok(Self::Cpp),
            languages::JAVA => Ok(Self::Java),
            languages::JAVASCRIPT => Ok(Self::Javascript),
            _ => Err(UnsupportedLanguage(s.to_string())),
        }
    }
}

impl TryFrom<String> for Language {
    type Error = UnsupportedLanguage;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
