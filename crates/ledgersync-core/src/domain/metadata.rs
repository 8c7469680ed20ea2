//! Ledger identity and descriptive metadata
//!
//! Each ledger folder describes the ledger it holds so other devices can
//! list and adopt it. Two formats exist in the wild:
//!
//! - **V2** (canonical): a versioned JSON document in [`METADATA_FILE`]
//!   inside the ledger folder. This is what new folders get.
//! - **V1** (legacy, read only): one folder property per field, with the
//!   folder title doubling as the label.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::LedgerId;

/// Canonical metadata file inside a ledger folder
pub const METADATA_FILE: &str = "metadata.json";

/// Human readable notice placed in every new ledger folder
pub const WARNING_FILE: &str = "IMPORTANT_INFORMATION.txt";

/// Contents of [`WARNING_FILE`]
pub const WARNING_TEXT: &str = "\
This folder is used to synchronize an expense ledger between devices.
The files in it are written and read by the synchronization engine.
Do not modify, move or delete them, or the ledger may no longer sync.
";

/// Folder property identifying a ledger folder
pub const LEDGER_UUID_PROPERTY: &str = "ledgerUuid";

/// Folder property carrying the ledger label, for people browsing the store
pub const LEDGER_LABEL_PROPERTY: &str = "ledgerLabel";

/// Title of the backup folder in the root
pub const BACKUP_FOLDER: &str = "BACKUPS";

/// Property marking the backup folder
pub const BACKUP_FOLDER_PROPERTY: &str = "isBackupFolder";

/// Version written into new metadata documents
pub const METADATA_VERSION: u32 = 2;

/// Color assigned when none is recorded (ARGB)
pub const DEFAULT_COLOR: i32 = 0xff00_9688_u32 as i32;

/// Legacy per-field property keys
pub mod legacy {
    pub const UUID: &str = "accountMetadataUuid";
    pub const TYPE: &str = "accountMetadataType";
    pub const OPENING_BALANCE: &str = "accountMetadataOpeningBalance";
    pub const DESCRIPTION: &str = "accountMetadataDescription";
    pub const COLOR: &str = "accountMetadataColor";
    pub const CURRENCY: &str = "accountMetadataCurrency";
}

// ============================================================================
// AccountType
// ============================================================================

/// Kind of account a ledger tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    #[default]
    Cash,
    Bank,
    Ccard,
    Asset,
    Liability,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Cash => "CASH",
            AccountType::Bank => "BANK",
            AccountType::Ccard => "CCARD",
            AccountType::Asset => "ASSET",
            AccountType::Liability => "LIABILITY",
        }
    }
}

impl Display for AccountType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CASH" => Ok(AccountType::Cash),
            "BANK" => Ok(AccountType::Bank),
            "CCARD" => Ok(AccountType::Ccard),
            "ASSET" => Ok(AccountType::Asset),
            "LIABILITY" => Ok(AccountType::Liability),
            other => Err(DomainError::InvalidMetadata(format!(
                "unknown account type: {other}"
            ))),
        }
    }
}

// ============================================================================
// LedgerMetadata
// ============================================================================

/// Identity and description of one ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerMetadata {
    pub uuid: LedgerId,
    pub label: String,
    #[serde(default)]
    pub description: String,
    /// ISO 4217 code
    pub currency: String,
    /// Opening balance in minor units of `currency`
    #[serde(default)]
    pub opening_balance: i64,
    #[serde(default, rename = "type")]
    pub account_type: AccountType,
    #[serde(default = "default_color")]
    pub color: i32,
}

fn default_color() -> i32 {
    DEFAULT_COLOR
}

#[derive(Serialize, Deserialize)]
struct MetadataDocument {
    version: u32,
    #[serde(flatten)]
    metadata: LedgerMetadata,
}

impl LedgerMetadata {
    /// Creates metadata with default description, balance, type and color
    pub fn new(uuid: LedgerId, label: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            uuid,
            label: label.into(),
            description: String::new(),
            currency: currency.into(),
            opening_balance: 0,
            account_type: AccountType::default(),
            color: DEFAULT_COLOR,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_opening_balance(mut self, opening_balance: i64) -> Self {
        self.opening_balance = opening_balance;
        self
    }

    pub fn with_account_type(mut self, account_type: AccountType) -> Self {
        self.account_type = account_type;
        self
    }

    pub fn with_color(mut self, color: i32) -> Self {
        self.color = color;
        self
    }

    /// Checks the fields a ledger folder cannot do without
    ///
    /// # Errors
    /// Returns `DomainError::InvalidMetadata` for a blank label or a
    /// currency that is not three ASCII letters
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.label.trim().is_empty() {
            return Err(DomainError::InvalidMetadata(
                "label cannot be empty".to_string(),
            ));
        }
        if self.currency.len() != 3 || !self.currency.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(DomainError::InvalidMetadata(format!(
                "invalid currency code: {}",
                self.currency
            )));
        }
        Ok(())
    }

    /// Serializes into a V2 metadata document
    ///
    /// # Errors
    /// Returns `DomainError::ParseFailed` if serialization fails
    pub fn encode(&self) -> Result<Vec<u8>, DomainError> {
        let document = MetadataDocument {
            version: METADATA_VERSION,
            metadata: self.clone(),
        };
        serde_json::to_vec_pretty(&document).map_err(|e| DomainError::parse("ledger metadata", e))
    }

    /// Properties written on a newly created ledger folder
    ///
    /// Values are cut to fit `max_property_bytes`.
    pub fn folder_properties(&self, max_property_bytes: usize) -> BTreeMap<String, String> {
        let mut properties = BTreeMap::new();
        properties.insert(
            LEDGER_UUID_PROPERTY.to_string(),
            fit_property(LEDGER_UUID_PROPERTY, &self.uuid.to_string(), max_property_bytes),
        );
        properties.insert(
            LEDGER_LABEL_PROPERTY.to_string(),
            fit_property(LEDGER_LABEL_PROPERTY, &self.label, max_property_bytes),
        );
        properties
    }
}

// ============================================================================
// Stored formats
// ============================================================================

/// Legacy per-field metadata read from folder properties
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LegacyMetadataFields {
    pub title: String,
    pub uuid: Option<String>,
    pub account_type: Option<String>,
    pub opening_balance: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub currency: Option<String>,
}

impl LegacyMetadataFields {
    /// Picks the legacy fields out of a folder's properties
    pub fn from_properties(title: impl Into<String>, properties: &BTreeMap<String, String>) -> Self {
        let get = |key: &str| properties.get(key).cloned();
        Self {
            title: title.into(),
            uuid: get(legacy::UUID),
            account_type: get(legacy::TYPE),
            opening_balance: get(legacy::OPENING_BALANCE),
            description: get(legacy::DESCRIPTION),
            color: get(legacy::COLOR),
            currency: get(legacy::CURRENCY),
        }
    }
}

/// Metadata as found in a ledger folder, before interpretation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataFormat {
    V1(LegacyMetadataFields),
    /// Plain (already decrypted) contents of [`METADATA_FILE`]
    V2(Vec<u8>),
}

impl MetadataFormat {
    /// Interprets the stored metadata
    ///
    /// Missing optional legacy fields get defaults; `home_currency` stands
    /// in for a missing currency.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidMetadata` when the UUID is missing or a
    /// field cannot be parsed, `DomainError::ParseFailed` for an unreadable
    /// or unsupported V2 document
    pub fn resolve(self, home_currency: &str) -> Result<LedgerMetadata, DomainError> {
        match self {
            MetadataFormat::V2(bytes) => {
                let document: MetadataDocument = serde_json::from_slice(&bytes)
                    .map_err(|e| DomainError::parse("ledger metadata", e))?;
                if document.version != METADATA_VERSION {
                    return Err(DomainError::parse(
                        "ledger metadata",
                        format!("unsupported version {}", document.version),
                    ));
                }
                Ok(document.metadata)
            }
            MetadataFormat::V1(fields) => {
                let uuid = fields
                    .uuid
                    .as_deref()
                    .ok_or_else(|| DomainError::InvalidMetadata("uuid not set".to_string()))?
                    .parse::<LedgerId>()?;
                let account_type = match fields.account_type.as_deref() {
                    Some(t) => t.parse()?,
                    None => AccountType::default(),
                };
                let opening_balance = match fields.opening_balance.as_deref() {
                    Some(v) => v.trim().parse::<i64>().map_err(|e| {
                        DomainError::InvalidMetadata(format!("opening balance {v}: {e}"))
                    })?,
                    None => 0,
                };
                let color = match fields.color.as_deref() {
                    Some(v) => v
                        .trim()
                        .parse::<i32>()
                        .map_err(|e| DomainError::InvalidMetadata(format!("color {v}: {e}")))?,
                    None => DEFAULT_COLOR,
                };
                Ok(LedgerMetadata {
                    uuid,
                    label: fields.title,
                    description: fields.description.unwrap_or_default(),
                    currency: fields
                        .currency
                        .unwrap_or_else(|| home_currency.to_string()),
                    opening_balance,
                    account_type,
                    color,
                })
            }
        }
    }
}

/// Cuts `value` so that key and value together fit in `max_bytes`
///
/// Truncation happens on a character boundary. A limit of 0 means the
/// backend has none.
pub fn fit_property(key: &str, value: &str, max_bytes: usize) -> String {
    if max_bytes == 0 {
        return value.to_string();
    }
    let budget = max_bytes.saturating_sub(key.len());
    if value.len() <= budget {
        return value.to_string();
    }
    let mut end = budget;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LedgerMetadata {
        LedgerMetadata::new(LedgerId::new(), "Wallet", "EUR")
            .with_description("Pocket money")
            .with_opening_balance(12_50)
            .with_account_type(AccountType::Bank)
    }

    #[test]
    fn test_v2_document_roundtrip() {
        let metadata = sample();
        let bytes = metadata.encode().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("\"version\": 2"));
        assert!(text.contains("\"type\": \"BANK\""));

        let decoded = MetadataFormat::V2(bytes).resolve("USD").unwrap();
        assert_eq!(decoded, metadata);
    }

    #[test]
    fn test_v2_rejects_unknown_version() {
        let doc = br#"{"version":7,"uuid":"5f0e4a3c-4a4b-4b8e-9d38-0c3b0c2b1d11","label":"x","currency":"EUR"}"#;
        assert!(MetadataFormat::V2(doc.to_vec()).resolve("EUR").is_err());
    }

    #[test]
    fn test_v1_defaults() {
        let id = LedgerId::new();
        let mut props = BTreeMap::new();
        props.insert(legacy::UUID.to_string(), id.to_string());

        let metadata = MetadataFormat::V1(LegacyMetadataFields::from_properties("Old", &props))
            .resolve("CHF")
            .unwrap();

        assert_eq!(metadata.uuid, id);
        assert_eq!(metadata.label, "Old");
        assert_eq!(metadata.currency, "CHF");
        assert_eq!(metadata.account_type, AccountType::Cash);
        assert_eq!(metadata.opening_balance, 0);
        assert_eq!(metadata.color, DEFAULT_COLOR);
        assert_eq!(metadata.description, "");
    }

    #[test]
    fn test_v1_full_fields() {
        let id = LedgerId::new();
        let props: BTreeMap<String, String> = [
            (legacy::UUID, id.to_string()),
            (legacy::TYPE, "CCARD".to_string()),
            (legacy::OPENING_BALANCE, "-500".to_string()),
            (legacy::DESCRIPTION, "Visa".to_string()),
            (legacy::COLOR, "-1".to_string()),
            (legacy::CURRENCY, "GBP".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let metadata = MetadataFormat::V1(LegacyMetadataFields::from_properties("Card", &props))
            .resolve("EUR")
            .unwrap();
        assert_eq!(metadata.account_type, AccountType::Ccard);
        assert_eq!(metadata.opening_balance, -500);
        assert_eq!(metadata.color, -1);
        assert_eq!(metadata.currency, "GBP");
    }

    #[test]
    fn test_v1_requires_uuid() {
        let err = MetadataFormat::V1(LegacyMetadataFields {
            title: "No id".to_string(),
            ..Default::default()
        })
        .resolve("EUR")
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidMetadata(_)));
    }

    #[test]
    fn test_validate() {
        assert!(sample().validate().is_ok());
        assert!(LedgerMetadata::new(LedgerId::new(), " ", "EUR").validate().is_err());
        assert!(LedgerMetadata::new(LedgerId::new(), "x", "EURO").validate().is_err());
    }

    #[test]
    fn test_fit_property_truncates_on_char_boundary() {
        assert_eq!(fit_property("k", "abcdef", 4), "abc");
        assert_eq!(fit_property("k", "abc", 0), "abc");
        assert_eq!(fit_property("k", "ab", 124), "ab");
        // "é" is two bytes; budget of 2 cannot split it
        assert_eq!(fit_property("k", "aé", 3), "a");
    }

    #[test]
    fn test_folder_properties_fit_limit() {
        let metadata = LedgerMetadata::new(LedgerId::new(), "x".repeat(300), "EUR");
        let props = metadata.folder_properties(124);
        let label = &props[LEDGER_LABEL_PROPERTY];
        assert_eq!(label.len() + LEDGER_LABEL_PROPERTY.len(), 124);
        assert_eq!(props[LEDGER_UUID_PROPERTY], metadata.uuid.to_string());
    }

    #[test]
    fn test_account_type_parse() {
        assert_eq!("bank".parse::<AccountType>().unwrap(), AccountType::Bank);
        assert!("SAVINGS".parse::<AccountType>().is_err());
        assert_eq!(AccountType::Liability.to_string(), "LIABILITY");
    }
}
