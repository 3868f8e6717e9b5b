//! Card access seam.
//!
//! A card session does not talk to readers itself. It drives an
//! implementation of [`CardAccess`], which wraps whatever reader library is
//! in use (PC/SC, a vendor middleware, or [`SimulatedCard`] in tests).
//!
//! [`SimulatedCard`]: crate::SimulatedCard

use cardwatch_core::{Address, CertificateChain, Identity, Photo, Result};

/// Blocking primitives for reader/card presence and card data retrieval.
///
/// All methods are called from the session's background thread only, one at
/// a time. Implementations report a missing card with
/// [`Error::CardRemoved`], a vanished reader with
/// [`Error::ReaderUnavailable`], and anything else with
/// [`Error::Operation`]; the session decides what each means.
///
/// [`Error::CardRemoved`]: cardwatch_core::Error::CardRemoved
/// [`Error::ReaderUnavailable`]: cardwatch_core::Error::ReaderUnavailable
/// [`Error::Operation`]: cardwatch_core::Error::Operation
pub trait CardAccess: Send + Sync {
    /// Check whether at least one reader is attached.
    fn has_reader(&self) -> Result<bool>;

    /// Block until a reader is attached.
    ///
    /// May return early (like a status-change timeout); the session probes
    /// again afterwards.
    fn wait_for_reader(&self) -> Result<()>;

    /// Check whether a card is seated in a reader.
    fn is_card_present(&self) -> Result<bool>;

    /// Block until a card is inserted.
    ///
    /// May return early; the session probes again afterwards.
    fn wait_for_card_present(&self) -> Result<()>;

    /// Check whether the card that was read is still seated.
    fn is_card_still_present(&self) -> Result<bool>;

    /// Read the identity record.
    fn read_identity(&self) -> Result<Identity>;

    /// Read the address record.
    fn read_address(&self) -> Result<Address>;

    /// Read the holder photo.
    fn read_photo(&self) -> Result<Photo>;

    /// Read the authentication certificate chain, leaf first.
    fn read_auth_cert_chain(&self) -> Result<CertificateChain>;

    /// Read the signing certificate chain, leaf first.
    fn read_sign_cert_chain(&self) -> Result<CertificateChain>;

    /// Run the card's PIN change procedure.
    ///
    /// PIN entry happens inside the implementation (pinpad or dialog).
    fn change_pin(&self) -> Result<()>;
}
