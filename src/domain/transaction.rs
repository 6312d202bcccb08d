use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Cents;

pub type TransactionId = i64;

/// Lifecycle stage of a transaction.
///
/// The integer codes are persisted in the `transaction_status` lookup table and
/// must stay stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Registered, waiting to be billed
    Pending,
    /// An invoice has been generated for it
    Billed,
    /// Its invoice has been paid
    Paid,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 3] = [
        TransactionStatus::Pending,
        TransactionStatus::Billed,
        TransactionStatus::Paid,
    ];

    pub fn code(&self) -> i64 {
        match self {
            TransactionStatus::Pending => 1,
            TransactionStatus::Billed => 2,
            TransactionStatus::Paid => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(TransactionStatus::Pending),
            2 => Some(TransactionStatus::Billed),
            3 => Some(TransactionStatus::Paid),
            _ => None,
        }
    }

    /// Label seeded into the lookup table.
    pub fn label(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "Pending",
            TransactionStatus::Billed => "Billed",
            TransactionStatus::Paid => "Paid",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Billed => "billed",
            TransactionStatus::Paid => "paid",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(TransactionStatus::Pending),
            "billed" => Some(TransactionStatus::Billed),
            "paid" => Some(TransactionStatus::Paid),
            _ => None,
        }
    }

    /// The only status reachable from this one through the normal flow.
    pub fn next(&self) -> Option<Self> {
        match self {
            TransactionStatus::Pending => Some(TransactionStatus::Billed),
            TransactionStatus::Billed => Some(TransactionStatus::Paid),
            TransactionStatus::Paid => None,
        }
    }

    /// Status only moves forward one step at a time: Pending -> Billed -> Paid.
    pub fn can_transition_to(&self, target: TransactionStatus) -> bool {
        self.next() == Some(target)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A monetary movement record awaiting billing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Assigned by the store, monotonically increasing
    pub id: TransactionId,
    /// Who the money goes to
    pub recipient: String,
    /// Always positive
    pub amount_cents: Cents,
    pub description: Option<String>,
    /// Local wall-clock time at registration
    pub created_at: NaiveDateTime,
    pub status: TransactionStatus,
}

/// A validated transaction that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    recipient: String,
    amount_cents: Cents,
    description: Option<String>,
}

impl NewTransaction {
    pub fn new(
        recipient: impl Into<String>,
        amount_cents: Cents,
        description: Option<String>,
    ) -> Result<Self, InvalidTransaction> {
        let recipient = recipient.into();
        if recipient.trim().is_empty() {
            return Err(InvalidTransaction::EmptyRecipient);
        }
        if amount_cents <= 0 {
            return Err(InvalidTransaction::NonPositiveAmount(amount_cents));
        }

        // Blank descriptions are stored as absent
        let description = description.filter(|d| !d.trim().is_empty());

        Ok(Self {
            recipient,
            amount_cents,
            description,
        })
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn amount_cents(&self) -> Cents {
        self.amount_cents
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Attach the store-assigned id and timestamp. New transactions are always Pending.
    pub fn into_transaction(self, id: TransactionId, created_at: NaiveDateTime) -> Transaction {
        Transaction {
            id,
            recipient: self.recipient,
            amount_cents: self.amount_cents,
            description: self.description,
            created_at,
            status: TransactionStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTransaction {
    #[error("recipient must not be empty")]
    EmptyRecipient,

    #[error("amount has to be greater than zero (got {0} cents)")]
    NonPositiveAmount(Cents),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_stable() {
        assert_eq!(TransactionStatus::Pending.code(), 1);
        assert_eq!(TransactionStatus::Billed.code(), 2);
        assert_eq!(TransactionStatus::Paid.code(), 3);
        for status in TransactionStatus::ALL {
            assert_eq!(TransactionStatus::from_code(status.code()), Some(status));
            assert_eq!(TransactionStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TransactionStatus::from_code(0), None);
        assert_eq!(TransactionStatus::from_code(4), None);
        assert_eq!(TransactionStatus::from_str("BILLED"), Some(TransactionStatus::Billed));
    }

    #[test]
    fn test_status_only_moves_forward() {
        use TransactionStatus::*;

        assert!(Pending.can_transition_to(Billed));
        assert!(Billed.can_transition_to(Paid));

        assert!(!Pending.can_transition_to(Paid)); // No skipping Billed
        assert!(!Billed.can_transition_to(Pending));
        assert!(!Paid.can_transition_to(Billed));
        assert!(!Paid.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn test_new_transaction_requires_positive_amount() {
        assert_eq!(
            NewTransaction::new("Acme", 0, None),
            Err(InvalidTransaction::NonPositiveAmount(0))
        );
        assert_eq!(
            NewTransaction::new("Acme", -100, None),
            Err(InvalidTransaction::NonPositiveAmount(-100))
        );
        assert!(NewTransaction::new("Acme", 1, None).is_ok());
    }

    #[test]
    fn test_new_transaction_requires_recipient() {
        assert_eq!(
            NewTransaction::new("   ", 500, None),
            Err(InvalidTransaction::EmptyRecipient)
        );
    }

    #[test]
    fn test_blank_description_is_dropped() {
        let new = NewTransaction::new("Acme", 500, Some("  ".into())).unwrap();
        assert_eq!(new.description(), None);

        let new = NewTransaction::new("Acme", 500, Some("Consulting".into())).unwrap();
        assert_eq!(new.description(), Some("Consulting"));
    }
}
