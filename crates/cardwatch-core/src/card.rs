//! Identity card data model.
//!
//! These records are produced by the card access layer and held by a card
//! session while the card stays in the reader. The core never interprets
//! their contents.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Gender as recorded on the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    /// Male
    Male,
    /// Female
    Female,
    /// Not recorded
    Unknown,
}

/// Personal identity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Printed card number
    pub card_number: String,
    /// Chip serial number
    pub chip_number: String,
    /// First day of validity
    pub card_validity_begin: NaiveDate,
    /// Last day of validity
    pub card_validity_end: NaiveDate,
    /// Municipality that delivered the card
    pub card_delivery_municipality: String,
    /// National register number
    pub national_number: String,
    /// Last name
    pub name: String,
    /// First name(s)
    pub first_name: String,
    /// Middle name or initial
    #[serde(default)]
    pub middle_name: Option<String>,
    /// Nationality
    pub nationality: String,
    /// Place of birth
    pub place_of_birth: String,
    /// Date of birth
    pub date_of_birth: NaiveDate,
    /// Gender
    pub gender: Gender,
}

impl Identity {
    /// Full display name, "First Middle Last".
    pub fn full_name(&self) -> String {
        match &self.middle_name {
            Some(middle) if !middle.is_empty() => {
                format!("{} {} {}", self.first_name, middle, self.name)
            }
            _ => format!("{} {}", self.first_name, self.name),
        }
    }

    /// Whether the card is valid on the given day.
    pub fn is_valid_on(&self, day: NaiveDate) -> bool {
        self.card_validity_begin <= day && day <= self.card_validity_end
    }
}

/// Residence address record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Street and house number
    pub street_and_number: String,
    /// Postal code
    pub zip: String,
    /// Municipality
    pub municipality: String,
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {} {}", self.street_and_number, self.zip, self.municipality)
    }
}

/// Holder photo as stored on the card.
///
/// The bytes are shared; cloning a photo does not copy the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    /// JPEG-encoded image bytes
    jpeg: Arc<[u8]>,
}

impl Photo {
    /// Wrap JPEG bytes.
    pub fn new(jpeg: impl Into<Arc<[u8]>>) -> Self {
        Self { jpeg: jpeg.into() }
    }

    /// The encoded image.
    pub fn jpeg(&self) -> &[u8] {
        &self.jpeg
    }

    /// Size of the encoded image in bytes.
    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    /// Whether the image is empty.
    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }

    /// Whether two photos share the same image buffer.
    pub fn shares_buffer(&self, other: &Photo) -> bool {
        Arc::ptr_eq(&self.jpeg, &other.jpeg)
    }
}

/// An X.509 certificate as read from the card.
///
/// Kept as DER bytes; no parsing or validation happens here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// Subject distinguished name, for display
    pub subject: String,
    /// DER encoding
    pub der: Vec<u8>,
}

impl Certificate {
    /// Create a certificate from its subject and DER bytes.
    pub fn new(subject: impl Into<String>, der: impl Into<Vec<u8>>) -> Self {
        Self {
            subject: subject.into(),
            der: der.into(),
        }
    }
}

/// Certificate chain ordered from end-entity (leaf) to root.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CertificateChain(Vec<Certificate>);

impl CertificateChain {
    /// Create a chain from certificates ordered leaf first.
    pub fn new(certificates: Vec<Certificate>) -> Self {
        Self(certificates)
    }

    /// End-entity certificate.
    pub fn leaf(&self) -> Option<&Certificate> {
        self.0.first()
    }

    /// Root certificate.
    pub fn root(&self) -> Option<&Certificate> {
        self.0.last()
    }

    /// Number of certificates in the chain.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the chain holds no certificates.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate leaf to root.
    pub fn iter(&self) -> std::slice::Iter<'_, Certificate> {
        self.0.iter()
    }
}

impl From<Vec<Certificate>> for CertificateChain {
    fn from(certificates: Vec<Certificate>) -> Self {
        Self(certificates)
    }
}

/// Everything read from the card currently in the reader.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CardData {
    /// Identity record
    pub identity: Option<Identity>,
    /// Address record
    pub address: Option<Address>,
    /// Holder photo
    pub photo: Option<Photo>,
    /// Authentication certificate chain
    pub auth_chain: Option<CertificateChain>,
    /// Signing certificate chain
    pub sign_chain: Option<CertificateChain>,
}

impl CardData {
    /// Drop every field.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Whether no field has been read.
    pub fn is_empty(&self) -> bool {
        self.identity.is_none()
            && self.address.is_none()
            && self.photo.is_none()
            && self.auth_chain.is_none()
            && self.sign_chain.is_none()
    }
}
