use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a time log was recorded from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    Desktop,
    Mobile,
    Browser,
    BrowserExtension,
    Teams,
    Upwork,
    Hubstaff,
}

impl Default for Source {
    fn default() -> Self {
        Source::Teams
    }
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Desktop => "DESKTOP",
            Source::Mobile => "MOBILE",
            Source::Browser => "BROWSER",
            Source::BrowserExtension => "BROWSER_EXTENSION",
            Source::Teams => "TEAMS",
            Source::Upwork => "UPWORK",
            Source::Hubstaff => "HUBSTAFF",
        }
    }

    /// A source is foreign when it is not the one this client records as.
    pub fn is_foreign_to(&self, own: Source) -> bool {
        *self != own
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
