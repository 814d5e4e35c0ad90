use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCapability {
    DocumentIntelligence,
    GenericOcr,
}

impl ProviderCapability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentIntelligence => "document_intelligence",
            Self::GenericOcr => "generic_ocr",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "document_intelligence" => Some(Self::DocumentIntelligence),
            "generic_ocr" => Some(Self::GenericOcr),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller preference for which provider leads the chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    #[default]
    Auto,
    DocumentIntelligence,
    GenericOcr,
}

impl ExtractionMethod {
    pub fn preferred(&self) -> Option<ProviderCapability> {
        match self {
            Self::Auto => None,
            Self::DocumentIntelligence => Some(ProviderCapability::DocumentIntelligence),
            Self::GenericOcr => Some(ProviderCapability::GenericOcr),
        }
    }

    /// Reorders `chain` so the preferred provider runs first; the rest keep their order.
    pub fn order_chain(&self, chain: &[ProviderCapability]) -> Vec<ProviderCapability> {
        let Some(preferred) = self.preferred() else {
            return chain.to_vec();
        };

        let mut ordered = Vec::with_capacity(chain.len());
        if chain.contains(&preferred) {
            ordered.push(preferred);
        }
        ordered.extend(chain.iter().copied().filter(|capability| *capability != preferred));
        ordered
    }
}

impl std::str::FromStr for ExtractionMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "document_intelligence" => Ok(Self::DocumentIntelligence),
            "generic_ocr" | "ocr" => Ok(Self::GenericOcr),
            other => Err(format!(
                "unsupported extraction method `{other}` (expected auto|document_intelligence|generic_ocr)"
            )),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTable {
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }
}

/// Provider output reduced to the shape the parser consumes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedDocument {
    pub provider: ProviderCapability,
    pub text: String,
    pub tables: Vec<RawTable>,
}
