use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn generate() -> Self {
        Self(format!("CLI-{}", uuid::Uuid::new_v4()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: ClientId,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClientRecord {
    /// New clients carry only the name; contact details wait for manual review.
    pub fn named(id: ClientId, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            email: None,
            phone: None,
            company: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fills only fields that are currently empty. Returns whether anything changed.
    pub fn fill_missing(
        &mut self,
        phone: Option<&str>,
        company: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        let mut changed = fill_slot(&mut self.phone, phone);
        changed |= fill_slot(&mut self.company, company);
        if changed {
            self.updated_at = now;
        }
        changed
    }
}

fn fill_slot(slot: &mut Option<String>, candidate: Option<&str>) -> bool {
    let occupied = slot.as_deref().is_some_and(|value| !value.trim().is_empty());
    match candidate.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) if !occupied => {
            *slot = Some(value.to_string());
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{ClientId, ClientRecord};

    #[test]
    fn fill_missing_never_overwrites() {
        let now = Utc::now();
        let mut client = ClientRecord::named(ClientId("c-1".to_string()), "JOAO DA SILVA", now);
        client.phone = Some("(11) 99999-0000".to_string());

        let changed = client.fill_missing(Some("(21) 3333-4444"), Some("Silva Moveis"), now);

        assert!(changed);
        assert_eq!(client.phone.as_deref(), Some("(11) 99999-0000"));
        assert_eq!(client.company.as_deref(), Some("Silva Moveis"));
        assert!(!client.fill_missing(None, Some("Outra"), now));
    }

    #[test]
    fn blank_values_count_as_empty() {
        let now = Utc::now();
        let mut client = ClientRecord::named(ClientId("c-2".to_string()), "MARIA SOUZA", now);
        client.company = Some("  ".to_string());

        assert!(!client.fill_missing(Some("   "), None, now));
        assert!(client.fill_missing(None, Some("Souza ME"), now));
        assert_eq!(client.company.as_deref(), Some("Souza ME"));
    }
}
