//! In-process simulated card reader.
//!
//! [`SimulatedCard`] implements [`CardAccess`] over an in-memory reader that
//! callers attach, detach, and load with cards from any thread. Failures can
//! be injected per operation. Waits are bounded by a poll interval, the way a
//! PC/SC status-change call is bounded by its timeout, so a stopped session
//! always gets control back.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cardwatch_core::{
    Address, Certificate, CertificateChain, Error, Gender, Identity, Photo, Result,
};

use crate::access::CardAccess;

/// Card access operations, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `has_reader`
    HasReader,
    /// `wait_for_reader`
    WaitForReader,
    /// `is_card_present`
    IsCardPresent,
    /// `wait_for_card_present`
    WaitForCardPresent,
    /// `is_card_still_present`
    IsCardStillPresent,
    /// `read_identity`
    ReadIdentity,
    /// `read_address`
    ReadAddress,
    /// `read_photo`
    ReadPhoto,
    /// `read_auth_cert_chain`
    ReadAuthCertChain,
    /// `read_sign_cert_chain`
    ReadSignCertChain,
    /// `change_pin`
    ChangePin,
}

/// Everything stored on a simulated card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardContents {
    /// Identity record
    pub identity: Identity,
    /// Address record
    pub address: Address,
    /// Holder photo
    pub photo: Photo,
    /// Authentication chain, leaf first
    pub auth_chain: CertificateChain,
    /// Signing chain, leaf first
    pub sign_chain: CertificateChain,
}

impl CardContents {
    /// Load card contents from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse card contents from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// A complete, fictitious card.
    pub fn sample() -> Self {
        let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default();
        let root = Certificate::new("CN=Citizen Root CA, C=BE", vec![0x30, 0x82, 0x03, 0x01]);
        let ca = Certificate::new("CN=Citizen CA, C=BE", vec![0x30, 0x82, 0x03, 0x02]);

        Self {
            identity: Identity {
                card_number: "591123456789".to_string(),
                chip_number: "534C494E33660013".to_string(),
                card_validity_begin: date(2021, 4, 12),
                card_validity_end: date(2031, 4, 12),
                card_delivery_municipality: "Leuven".to_string(),
                national_number: "90021512345".to_string(),
                name: "Janssens".to_string(),
                first_name: "Pieter".to_string(),
                middle_name: Some("J".to_string()),
                nationality: "Belg".to_string(),
                place_of_birth: "Antwerpen".to_string(),
                date_of_birth: date(1990, 2, 15),
                gender: Gender::Male,
            },
            address: Address {
                street_and_number: "Bondgenotenlaan 1".to_string(),
                zip: "3000".to_string(),
                municipality: "Leuven".to_string(),
            },
            photo: Photo::new(vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9]),
            auth_chain: CertificateChain::new(vec![
                Certificate::new(
                    "CN=Pieter Janssens (Authentication), C=BE",
                    vec![0x30, 0x82, 0x04, 0x01],
                ),
                ca.clone(),
                root.clone(),
            ]),
            sign_chain: CertificateChain::new(vec![
                Certificate::new(
                    "CN=Pieter Janssens (Signature), C=BE",
                    vec![0x30, 0x82, 0x04, 0x02],
                ),
                ca,
                root,
            ]),
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    reader: bool,
    card: Option<CardContents>,
    failures: HashMap<Operation, VecDeque<String>>,
    calls: HashMap<Operation, usize>,
    pin_changes: usize,
}

impl SimState {
    fn card_present(&self) -> bool {
        self.reader && self.card.is_some()
    }

    fn card(&self) -> Result<&CardContents> {
        if !self.reader {
            return Err(Error::ReaderUnavailable);
        }
        self.card.as_ref().ok_or(Error::CardRemoved)
    }
}

/// Simulated reader with at most one card.
#[derive(Debug)]
pub struct SimulatedCard {
    state: Mutex<SimState>,
    changed: Condvar,
    poll_interval: Duration,
}

impl SimulatedCard {
    /// Create a reader-less simulation with a 200ms poll interval.
    pub fn new() -> Self {
        Self::with_poll_interval(Duration::from_millis(200))
    }

    /// Create a reader-less simulation with a custom poll interval.
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            changed: Condvar::new(),
            poll_interval,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut SimState)) {
        f(&mut self.lock());
        self.changed.notify_all();
    }

    /// Attach the reader.
    pub fn attach_reader(&self) {
        debug!("Simulated reader attached");
        self.update(|state| state.reader = true);
    }

    /// Detach the reader, taking any card with it.
    pub fn detach_reader(&self) {
        debug!("Simulated reader detached");
        self.update(|state| {
            state.reader = false;
            state.card = None;
        });
    }

    /// Insert a card, replacing any card already seated.
    pub fn insert_card(&self, contents: CardContents) {
        debug!(
            "Simulated card inserted: {}",
            contents.identity.full_name()
        );
        self.update(|state| state.card = Some(contents));
    }

    /// Remove the card.
    pub fn remove_card(&self) {
        debug!("Simulated card removed");
        self.update(|state| state.card = None);
    }

    /// Make the next call of `operation` fail with `message`.
    ///
    /// Calls may be queued; each failure is consumed once.
    pub fn fail_next(&self, operation: Operation, message: impl Into<String>) {
        let message = message.into();
        self.update(|state| {
            state
                .failures
                .entry(operation)
                .or_default()
                .push_back(message)
        });
    }

    /// Number of times `operation` has been called.
    pub fn calls(&self, operation: Operation) -> usize {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Number of PIN changes that succeeded.
    pub fn pin_changes(&self) -> usize {
        self.lock().pin_changes
    }

    /// Whether the reader is attached.
    pub fn reader_attached(&self) -> bool {
        self.lock().reader
    }

    /// Count the call and consume an injected failure, if any.
    fn enter(&self, operation: Operation) -> Result<MutexGuard<'_, SimState>> {
        let mut state = self.lock();
        *state.calls.entry(operation).or_insert(0) += 1;

        let failure = state
            .failures
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);
        match failure {
            Some(message) => {
                debug!("Injected failure for {:?}: {}", operation, message);
                Err(Error::Operation(message))
            }
            None => Ok(state),
        }
    }

    fn read<T>(&self, operation: Operation, field: impl FnOnce(&CardContents) -> T) -> Result<T> {
        let state = self.enter(operation)?;
        let card = state.card()?;
        Ok(field(card))
    }
}

impl Default for SimulatedCard {
    fn default() -> Self {
        Self::new()
    }
}

impl CardAccess for SimulatedCard {
    fn has_reader(&self) -> Result<bool> {
        Ok(self.enter(Operation::HasReader)?.reader)
    }

    fn wait_for_reader(&self) -> Result<()> {
        let state = self.enter(Operation::WaitForReader)?;
        let _ = self
            .changed
            .wait_timeout_while(state, self.poll_interval, |state| !state.reader)
            .unwrap_or_else(PoisonError::into_inner);
        Ok(())
    }

    fn is_card_present(&self) -> Result<bool> {
        Ok(self.enter(Operation::IsCardPresent)?.card_present())
    }

    fn wait_for_card_present(&self) -> Result<()> {
        let state = self.enter(Operation::WaitForCardPresent)?;
        let (state, _) = self
            .changed
            .wait_timeout_while(state, self.poll_interval, |state| {
                state.reader && state.card.is_none()
            })
            .unwrap_or_else(PoisonError::into_inner);

        if state.reader {
            Ok(())
        } else {
            Err(Error::ReaderUnavailable)
        }
    }

    fn is_card_still_present(&self) -> Result<bool> {
        Ok(self.enter(Operation::IsCardStillPresent)?.card_present())
    }

    fn read_identity(&self) -> Result<Identity> {
        self.read(Operation::ReadIdentity, |card| card.identity.clone())
    }

    fn read_address(&self) -> Result<Address> {
        self.read(Operation::ReadAddress, |card| card.address.clone())
    }

    fn read_photo(&self) -> Result<Photo> {
        self.read(Operation::ReadPhoto, |card| card.photo.clone())
    }

    fn read_auth_cert_chain(&self) -> Result<CertificateChain> {
        self.read(Operation::ReadAuthCertChain, |card| card.auth_chain.clone())
    }

    fn read_sign_cert_chain(&self) -> Result<CertificateChain> {
        self.read(Operation::ReadSignCertChain, |card| card.sign_chain.clone())
    }

    fn change_pin(&self) -> Result<()> {
        let mut state = self.enter(Operation::ChangePin)?;
        state.card()?;
        state.pin_changes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn sim() -> SimulatedCard {
        SimulatedCard::with_poll_interval(Duration::from_millis(20))
    }

    #[test]
    fn test_presence() {
        let card = sim();
        assert!(!card.has_reader().unwrap());
        assert!(!card.is_card_present().unwrap());

        card.attach_reader();
        assert!(card.has_reader().unwrap());
        assert!(!card.is_card_present().unwrap());

        card.insert_card(CardContents::sample());
        assert!(card.is_card_present().unwrap());
        assert!(card.is_card_still_present().unwrap());

        card.remove_card();
        assert!(!card.is_card_still_present().unwrap());
    }

    #[test]
    fn test_detach_takes_card() {
        let card = sim();
        card.attach_reader();
        card.insert_card(CardContents::sample());

        card.detach_reader();
        assert!(!card.reader_attached());
        card.attach_reader();
        assert!(!card.is_card_present().unwrap());
    }

    #[test]
    fn test_reads_return_contents() {
        let card = sim();
        card.attach_reader();
        card.insert_card(CardContents::sample());

        let identity = card.read_identity().unwrap();
        assert_eq!(identity.name, "Janssens");
        assert_eq!(card.read_address().unwrap().zip, "3000");
        assert!(!card.read_photo().unwrap().is_empty());
        assert_eq!(card.read_auth_cert_chain().unwrap().len(), 3);
        assert_eq!(
            card.read_sign_cert_chain().unwrap().root().unwrap().subject,
            "CN=Citizen Root CA, C=BE"
        );
    }

    #[test]
    fn test_read_without_card() {
        let card = sim();
        assert!(matches!(card.read_identity(), Err(Error::ReaderUnavailable)));

        card.attach_reader();
        assert!(matches!(card.read_photo(), Err(Error::CardRemoved)));
    }

    #[test]
    fn test_injected_failure_consumed_once() {
        let card = sim();
        card.attach_reader();
        card.insert_card(CardContents::sample());
        card.fail_next(Operation::ReadAddress, "SW 6982");

        let err = card.read_address().unwrap_err();
        assert_eq!(err.to_string(), "Card operation failed: SW 6982");
        assert!(card.read_address().is_ok());
        assert_eq!(card.calls(Operation::ReadAddress), 2);
    }

    #[test]
    fn test_change_pin_counts() {
        let card = sim();
        card.attach_reader();
        card.insert_card(CardContents::sample());

        card.change_pin().unwrap();
        card.fail_next(Operation::ChangePin, "PIN blocked");
        assert!(card.change_pin().is_err());
        assert_eq!(card.pin_changes(), 1);
        assert_eq!(card.calls(Operation::ChangePin), 2);
    }

    #[test]
    fn test_wait_for_reader_times_out() {
        let card = sim();
        let start = Instant::now();
        card.wait_for_reader().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(!card.has_reader().unwrap());
    }

    #[test]
    fn test_wait_for_card_wakes_on_insert() {
        let card = Arc::new(SimulatedCard::with_poll_interval(Duration::from_secs(5)));
        card.attach_reader();

        let inserter = Arc::clone(&card);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            inserter.insert_card(CardContents::sample());
        });

        let start = Instant::now();
        card.wait_for_card_present().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(card.is_card_present().unwrap());
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_for_card_without_reader() {
        let card = sim();
        assert!(matches!(
            card.wait_for_card_present(),
            Err(Error::ReaderUnavailable)
        ));
    }

    #[test]
    fn test_contents_yaml() {
        let yaml = serde_yaml::to_string(&CardContents::sample()).unwrap();
        let contents = CardContents::from_yaml(&yaml).unwrap();
        assert_eq!(contents, CardContents::sample());

        assert!(CardContents::from_yaml("identity: 3").is_err());
    }
}
