//! Form steps

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Collection holding per-form progress records
pub const FORMS_COLLECTION: &str = "formularios";

/// One page of the intake form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Step {
    #[serde(rename = "pessoal")]
    Personal,
    #[serde(rename = "social")]
    Social,
    #[serde(rename = "incapacidade")]
    Incapacity,
    #[serde(rename = "profissional")]
    Professional,
    #[serde(rename = "documentos")]
    Documents,
}

impl Step {
    /// All steps in form order
    pub const ALL: [Step; 5] = [
        Step::Personal,
        Step::Social,
        Step::Incapacity,
        Step::Professional,
        Step::Documents,
    ];

    /// Collection the step's records live in
    pub fn collection(self) -> &'static str {
        match self {
            Step::Personal => "pessoal",
            Step::Social => "social",
            Step::Incapacity => "incapacidade",
            Step::Professional => "profissional",
            Step::Documents => "documentos",
        }
    }

    /// Position in the form, starting at 0
    pub fn index(self) -> usize {
        Self::ALL.iter().position(|s| *s == self).unwrap_or(0)
    }

    pub fn next(self) -> Option<Step> {
        Self::ALL.get(self.index() + 1).copied()
    }

    pub fn previous(self) -> Option<Step> {
        self.index().checked_sub(1).map(|i| Self::ALL[i])
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

impl FromStr for Step {
    type Err = String;

    /// Accepts the collection name or the English step name, case-insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pessoal" | "personal" => Ok(Step::Personal),
            "social" => Ok(Step::Social),
            "incapacidade" | "incapacity" => Ok(Step::Incapacity),
            "profissional" | "professional" => Ok(Step::Professional),
            "documentos" | "documents" => Ok(Step::Documents),
            other => Err(format!(
                "Unknown step '{}'. Expected one of: pessoal, social, incapacidade, profissional, documentos",
                other
            )),
        }
    }
}
