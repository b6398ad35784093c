//! Request/response types shared by the handlers.

use serde::{Deserialize, Serialize};

/// Caption language requested by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Zh,
}

impl Language {
    /// Parse a client language code. Anything other than `zh` means English,
    /// so a typo never triggers a translation call.
    pub fn from_code(code: &str) -> Self {
        if code.trim().eq_ignore_ascii_case("zh") {
            Self::Zh
        } else {
            Self::En
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Zh => "zh",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ImageUrlQuery {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CaptionResponse {
    pub caption: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_codes() {
        assert_eq!(Language::from_code("zh"), Language::Zh);
        assert_eq!(Language::from_code(" ZH "), Language::Zh);
        assert_eq!(Language::from_code("en"), Language::En);
        assert_eq!(Language::from_code("fr"), Language::En);
        assert_eq!(Language::from_code(""), Language::En);
        assert_eq!(Language::Zh.code(), "zh");
    }
}
