//! Card session state machine and background read loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cardwatch_core::{
    Activity, Address, CardData, CertificateChain, CommandOutcome, Error, Identity,
    PendingCommand, Photo, Result, SessionConfig, SessionState, SessionStatus,
};

use crate::access::CardAccess;
use crate::observer::{ObserverRegistry, SessionObserver, SubscriptionId};

/// Mutable session data. Guarded by a single lock.
#[derive(Debug, Default)]
struct Shared {
    state: SessionState,
    activity: Activity,
    pending: PendingCommand,
    data: CardData,
    last_command: Option<CommandOutcome>,
    /// Last snapshot sent on the watch channel
    published: SessionStatus,
}

impl Shared {
    fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            activity: self.activity,
            pending_command: self.pending,
            has_identity: self.data.identity.is_some(),
            has_address: self.data.address.is_some(),
            has_photo: self.data.photo.is_some(),
            has_auth_chain: self.data.auth_chain.is_some(),
            has_sign_chain: self.data.sign_chain.is_some(),
            last_command: self.last_command.clone(),
        }
    }

    fn is_ready_for_command(&self) -> bool {
        self.state == SessionState::CardPresent
            && self.activity == Activity::Idle
            && self.pending.is_none()
    }

    /// Move to a presence state. Leaving `CardPresent` resets the activity.
    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        if state != SessionState::CardPresent {
            self.activity = Activity::Idle;
        }
    }

    /// Forget the card: data, pending command and command outcome.
    fn reset(&mut self, state: SessionState) {
        self.data.clear();
        self.pending = PendingCommand::None;
        self.last_command = None;
        self.set_state(state);
    }
}

struct Inner {
    access: Arc<dyn CardAccess>,
    config: SessionConfig,
    shared: Mutex<Shared>,
    observers: ObserverRegistry,
    status_tx: watch::Sender<SessionStatus>,
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// A card session.
///
/// Owns the reader/card state machine and runs it on one background thread.
/// Cloning yields another handle to the same session.
///
/// # Cancellation
///
/// [`stop`](Self::stop) is cooperative. The loop checks for it at the top of
/// each probe cycle and after each idle sleep while a read card stays
/// present. It is not checked during a read sequence, a PIN change, the error
/// pause, or while the card access layer blocks in a wait.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use cardwatch_session::{CardSession, SimulatedCard};
///
/// let card = Arc::new(SimulatedCard::new());
/// let session = CardSession::new(card.clone());
/// session.subscribe(|| println!("state changed"));
/// assert!(!session.is_ready_for_command());
/// ```
#[derive(Clone)]
pub struct CardSession {
    inner: Arc<Inner>,
}

impl CardSession {
    /// Create a session with default timing.
    pub fn new(access: Arc<dyn CardAccess>) -> Self {
        Self::with_config(access, SessionConfig::default())
    }

    /// Create a session with custom timing.
    pub fn with_config(access: Arc<dyn CardAccess>, config: SessionConfig) -> Self {
        let shared = Shared::default();
        let (status_tx, _) = watch::channel(shared.status());

        Self {
            inner: Arc::new(Inner {
                access,
                config,
                shared: Mutex::new(shared),
                observers: ObserverRegistry::new(),
                status_tx,
                running: AtomicBool::new(false),
                cancel: Mutex::new(CancellationToken::new()),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Start the background loop.
    ///
    /// Returns `Ok(false)` without doing anything if a loop is already
    /// running, including one that was stopped but has not exited yet; call
    /// [`join`](Self::join) before restarting a stopped session.
    pub fn start(&self) -> Result<bool> {
        // Held until the new token is installed so a concurrent stop()
        // cancels either the old loop or the new one.
        let mut cancel = self
            .inner
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Card session already running");
            return Ok(false);
        }

        let token = CancellationToken::new();
        *cancel = token.clone();
        drop(cancel);

        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("card-session".to_string())
            .spawn(move || inner.run(token));

        match spawned {
            Ok(handle) => {
                *self
                    .inner
                    .worker
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(handle);
                info!("Card session started");
                Ok(true)
            }
            Err(e) => {
                self.inner.running.store(false, Ordering::Release);
                error!("Failed to spawn card session thread: {}", e);
                Err(Error::Io(e))
            }
        }
    }

    /// Ask the background loop to exit at its next cancellation check.
    pub fn stop(&self) {
        info!("Stopping card session");
        self.inner
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    /// Block until the background thread has exited.
    pub fn join(&self) {
        let handle = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Card session thread panicked");
                self.inner.running.store(false, Ordering::Release);
            }
        }
    }

    /// Whether the background loop is running.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Request a PIN change.
    ///
    /// Accepted only when [`is_ready_for_command`](Self::is_ready_for_command)
    /// holds; otherwise the request is dropped and `false` is returned.
    ///
    /// The accessors see the pending command at once. The watch channel and
    /// observers see it when the background loop picks it up, so this never
    /// blocks on a held [`watch`](Self::watch) borrow.
    pub fn request_change_pin(&self) -> bool {
        let mut shared = self.inner.shared();
        if !shared.is_ready_for_command() {
            debug!(
                "PIN change request dropped: state={}, activity={}, pending={:?}",
                shared.state, shared.activity, shared.pending
            );
            return false;
        }

        shared.pending = PendingCommand::ChangePin;
        info!("PIN change requested");
        true
    }

    /// Whether a command would be accepted right now.
    pub fn is_ready_for_command(&self) -> bool {
        self.inner.shared().is_ready_for_command()
    }

    /// Register an observer. It is called on the background thread after
    /// every committed change.
    pub fn subscribe<O>(&self, observer: O) -> SubscriptionId
    where
        O: SessionObserver + 'static,
    {
        self.inner.observers.subscribe(Arc::new(observer))
    }

    /// Remove an observer.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        self.inner.observers.unsubscribe(id)
    }

    /// Receiver that always holds the latest status snapshot.
    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Consistent snapshot of the whole session.
    pub fn status(&self) -> SessionStatus {
        self.inner.shared().status()
    }

    /// Current presence state.
    pub fn state(&self) -> SessionState {
        self.inner.shared().state
    }

    /// Current activity.
    pub fn activity(&self) -> Activity {
        self.inner.shared().activity
    }

    /// Command waiting to run.
    pub fn pending_command(&self) -> PendingCommand {
        self.inner.shared().pending
    }

    /// Outcome of the last serviced command for the current card.
    pub fn last_command(&self) -> Option<CommandOutcome> {
        self.inner.shared().last_command.clone()
    }

    /// Everything read from the current card so far.
    pub fn card_data(&self) -> CardData {
        self.inner.shared().data.clone()
    }

    /// Identity record of the current card.
    pub fn identity(&self) -> Option<Identity> {
        self.inner.shared().data.identity.clone()
    }

    /// Address record of the current card.
    pub fn address(&self) -> Option<Address> {
        self.inner.shared().data.address.clone()
    }

    /// Photo of the current card.
    pub fn photo(&self) -> Option<Photo> {
        self.inner.shared().data.photo.clone()
    }

    /// Authentication certificate chain of the current card.
    pub fn auth_cert_chain(&self) -> Option<CertificateChain> {
        self.inner.shared().data.auth_chain.clone()
    }

    /// Signing certificate chain of the current card.
    pub fn sign_cert_chain(&self) -> Option<CertificateChain> {
        self.inner.shared().data.sign_chain.clone()
    }

    /// Whether the identity record has been read.
    pub fn has_identity(&self) -> bool {
        self.inner.shared().data.identity.is_some()
    }

    /// Whether the address record has been read.
    pub fn has_address(&self) -> bool {
        self.inner.shared().data.address.is_some()
    }

    /// Whether the photo has been read.
    pub fn has_photo(&self) -> bool {
        self.inner.shared().data.photo.is_some()
    }

    /// Whether the authentication chain has been read.
    pub fn has_auth_cert_chain(&self) -> bool {
        self.inner.shared().data.auth_chain.is_some()
    }

    /// Whether the signing chain has been read.
    pub fn has_sign_cert_chain(&self) -> bool {
        self.inner.shared().data.sign_chain.is_some()
    }
}

impl std::fmt::Debug for CardSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardSession")
            .field("status", &self.status())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Clears the running flag when the loop exits, including by unwinding.
struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Inner {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a mutation and publish the result if it differs from the last
    /// published snapshot.
    ///
    /// Only the background thread commits, so the watch channel stays in
    /// commit order even though it is written after the lock is released.
    /// Neither the channel nor the observers are touched under the lock.
    fn commit(&self, mutate: impl FnOnce(&mut Shared)) {
        let status = {
            let mut shared = self.shared();
            mutate(&mut shared);
            let after = shared.status();
            if after == shared.published {
                return;
            }
            debug!(
                "Session status: {} / {} -> {} / {}",
                shared.published.state,
                shared.published.activity,
                after.state,
                after.activity
            );
            shared.published = after.clone();
            after
        };

        self.status_tx.send_replace(status);
        self.observers.notify();
    }

    /// Publish changes made by foreground callers.
    fn publish(&self) {
        self.commit(|_| ());
    }

    fn run(&self, token: CancellationToken) {
        let _running = RunningFlag(&self.running);
        info!("Card session loop running");

        while !token.is_cancelled() {
            match self.cycle(&token) {
                Ok(()) => {}
                Err(err) if err.is_transition() => self.card_gone(&err),
                Err(err) => self.fail(err),
            }
        }

        self.commit(|shared| shared.reset(SessionState::Idle));
        info!("Card session loop exited");
    }

    /// One pass from the top: probe reader, probe card, read, then service
    /// the card until it leaves.
    fn cycle(&self, token: &CancellationToken) -> Result<()> {
        if !self.access.has_reader().map_err(Error::unrecoverable)? {
            self.commit(|shared| shared.reset(SessionState::NoReaders));
            debug!("Waiting for a card reader");
            self.access.wait_for_reader().map_err(Error::unrecoverable)?;
            return Ok(());
        }

        if !self.access.is_card_present().map_err(Error::unrecoverable)? {
            self.commit(|shared| shared.reset(SessionState::NoCardPresent));
            debug!("Waiting for a card");
            self.access
                .wait_for_card_present()
                .map_err(Error::unrecoverable)?;
            return Ok(());
        }

        self.read_card()?;
        self.service_card(token)
    }

    /// Read every field in order, publishing each as soon as it arrives.
    fn read_card(&self) -> Result<()> {
        info!("Card inserted, reading");
        self.commit(|shared| {
            shared.reset(SessionState::CardPresent);
            shared.activity = Activity::ReadingIdentity;
        });

        self.read_step(
            Activity::ReadingIdentity,
            |access| access.read_identity(),
            |data, identity| data.identity = Some(identity),
        )?;
        self.read_step(
            Activity::ReadingAddress,
            |access| access.read_address(),
            |data, address| data.address = Some(address),
        )?;
        self.read_step(
            Activity::ReadingPhoto,
            |access| access.read_photo(),
            |data, photo| data.photo = Some(photo),
        )?;
        self.read_step(
            Activity::ReadingAuthChain,
            |access| access.read_auth_cert_chain(),
            |data, chain| data.auth_chain = Some(chain),
        )?;
        self.read_step(
            Activity::ReadingSignChain,
            |access| access.read_sign_cert_chain(),
            |data, chain| data.sign_chain = Some(chain),
        )?;

        info!("Card read complete");
        Ok(())
    }

    /// Run one read step, then store its result and advance the activity in
    /// a single commit.
    fn read_step<T>(
        &self,
        step: Activity,
        read: impl FnOnce(&dyn CardAccess) -> Result<T>,
        store: impl FnOnce(&mut CardData, T),
    ) -> Result<()> {
        debug!("Read step: {}", step);
        let value = read(&*self.access).map_err(|e| e.during_read(step))?;
        self.commit(|shared| {
            store(&mut shared.data, value);
            shared.activity = step.next();
        });
        Ok(())
    }

    /// Idle with a read card: service commands, sleep, re-check presence.
    ///
    /// Returns `Err(CardRemoved)` when the card leaves and `Ok` when stopped.
    fn service_card(&self, token: &CancellationToken) -> Result<()> {
        loop {
            if !self
                .access
                .is_card_still_present()
                .map_err(Error::unrecoverable)?
            {
                return Err(Error::CardRemoved);
            }

            let pending = self.shared().pending;
            match pending {
                PendingCommand::ChangePin => {
                    self.publish();
                    let result = self.change_pin();
                    self.finish_command(result)?;
                }
                PendingCommand::None => {
                    thread::sleep(self.config.idle_wait);
                    if token.is_cancelled() {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn change_pin(&self) -> Result<()> {
        info!("Changing PIN");
        self.access.change_pin().map_err(Error::during_pin_change)
    }

    /// Record a command's outcome and clear it.
    ///
    /// A failed PIN change is logged and kept as the last outcome; it does
    /// not put the session in the error state. Presence changes propagate.
    fn finish_command(&self, result: Result<()>) -> Result<()> {
        let outcome = match result {
            Ok(()) => {
                info!("PIN changed");
                CommandOutcome::PinChanged
            }
            Err(err) if err.is_transition() => return Err(err),
            Err(err) => {
                error!("{}", err);
                CommandOutcome::PinChangeFailed {
                    reason: err.to_string(),
                }
            }
        };

        self.commit(|shared| {
            shared.pending = PendingCommand::None;
            shared.last_command = Some(outcome);
        });
        Ok(())
    }

    /// Card or reader went away: drop everything and fall back.
    fn card_gone(&self, reason: &Error) {
        let state = match reason {
            Error::ReaderUnavailable => SessionState::NoReaders,
            _ => SessionState::NoCardPresent,
        };
        info!("{}; session now {}", reason, state);
        self.commit(|shared| shared.reset(state));
    }

    /// Abort the cycle: error state, pause, then idle.
    fn fail(&self, err: Error) {
        error!("Card session error: {}", err);
        self.commit(|shared| shared.reset(SessionState::Error));

        thread::sleep(self.config.error_pause);

        warn!("Recovering from error, probing readers again");
        self.commit(|shared| shared.set_state(SessionState::Idle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedCard;
    use proptest::prelude::*;

    fn any_state() -> impl Strategy<Value = SessionState> {
        prop_oneof![
            Just(SessionState::Idle),
            Just(SessionState::Error),
            Just(SessionState::NoReaders),
            Just(SessionState::NoCardPresent),
            Just(SessionState::CardPresent),
        ]
    }

    fn any_activity() -> impl Strategy<Value = Activity> {
        prop_oneof![
            Just(Activity::Idle),
            Just(Activity::ReadingIdentity),
            Just(Activity::ReadingAddress),
            Just(Activity::ReadingPhoto),
            Just(Activity::ReadingAuthChain),
            Just(Activity::ReadingSignChain),
        ]
    }

    proptest! {
        /// A PIN change is queued only for a read card with nothing queued,
        /// and never twice.
        #[test]
        fn request_change_pin_queues_once_for_idle_card(
            state in any_state(),
            activity in any_activity(),
            queued in any::<bool>(),
        ) {
            let session = CardSession::new(Arc::new(SimulatedCard::new()));
            session.inner.commit(|shared| {
                shared.state = state;
                shared.activity = activity;
                if queued {
                    shared.pending = PendingCommand::ChangePin;
                }
            });

            let accepted = session.request_change_pin();
            prop_assert_eq!(
                accepted,
                state == SessionState::CardPresent && activity == Activity::Idle && !queued
            );
            prop_assert_eq!(
                session.pending_command() == PendingCommand::ChangePin,
                accepted || queued
            );
            prop_assert!(!session.request_change_pin());
            prop_assert!(!session.is_ready_for_command());
        }
    }

    #[test]
    fn test_shared_leaving_card_present_resets_activity() {
        let mut shared = Shared {
            state: SessionState::CardPresent,
            activity: Activity::ReadingPhoto,
            ..Default::default()
        };

        shared.set_state(SessionState::NoCardPresent);
        assert_eq!(shared.activity, Activity::Idle);
    }

    #[test]
    fn test_shared_reset_clears_card() {
        let mut shared = Shared {
            state: SessionState::CardPresent,
            pending: PendingCommand::ChangePin,
            last_command: Some(CommandOutcome::PinChanged),
            ..Default::default()
        };
        shared.data.photo = Some(Photo::new(vec![1, 2, 3]));

        shared.reset(SessionState::Error);
        let status = shared.status();
        assert_eq!(status.state, SessionState::Error);
        assert_eq!(status.pending_command, PendingCommand::None);
        assert!(!status.has_photo);
        assert!(status.last_command.is_none());
    }

    #[test]
    fn test_new_session_is_idle() {
        let session = CardSession::new(Arc::new(SimulatedCard::new()));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.activity(), Activity::Idle);
        assert_eq!(session.pending_command(), PendingCommand::None);
        assert!(!session.is_running());
        assert!(session.card_data().is_empty());
    }

    #[test]
    fn test_change_pin_rejected_when_not_ready() {
        let session = CardSession::new(Arc::new(SimulatedCard::new()));
        assert!(!session.request_change_pin());
        assert_eq!(session.pending_command(), PendingCommand::None);
    }

    #[test]
    fn test_commit_skips_unchanged_snapshot() {
        let session = CardSession::new(Arc::new(SimulatedCard::new()));
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        session.subscribe(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        session
            .inner
            .commit(|shared| shared.reset(SessionState::NoReaders));
        session
            .inner
            .commit(|shared| shared.reset(SessionState::NoReaders));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(session.watch().borrow().state, SessionState::NoReaders);
    }

    #[test]
    fn test_request_change_pin_when_ready() {
        let session = CardSession::new(Arc::new(SimulatedCard::new()));
        session
            .inner
            .commit(|shared| shared.reset(SessionState::CardPresent));

        assert!(session.is_ready_for_command());
        assert!(session.request_change_pin());
        assert!(!session.request_change_pin());
        assert_eq!(session.pending_command(), PendingCommand::ChangePin);

        let rx = session.watch();
        assert_eq!(rx.borrow().pending_command, PendingCommand::None);
        session.inner.publish();
        assert_eq!(rx.borrow().pending_command, PendingCommand::ChangePin);
    }

    #[test]
    fn test_failed_pin_change_is_recorded_not_raised() {
        let session = CardSession::new(Arc::new(SimulatedCard::new()));
        session.inner.commit(|shared| {
            shared.reset(SessionState::CardPresent);
            shared.pending = PendingCommand::ChangePin;
        });

        let result = session
            .inner
            .finish_command(Err(Error::PinChangeFailure("PIN blocked".to_string())));
        assert!(result.is_ok());
        assert_eq!(session.state(), SessionState::CardPresent);
        assert_eq!(session.pending_command(), PendingCommand::None);
        assert_eq!(
            session.last_command(),
            Some(CommandOutcome::PinChangeFailed {
                reason: "PIN change failed: PIN blocked".to_string()
            })
        );
    }

    #[test]
    fn test_card_removed_during_pin_change_propagates() {
        let session = CardSession::new(Arc::new(SimulatedCard::new()));
        let result = session.inner.finish_command(Err(Error::CardRemoved));
        assert!(matches!(result, Err(Error::CardRemoved)));
    }

    #[test]
    fn test_watch_snapshot_serializes_outcome() {
        let session = CardSession::new(Arc::new(SimulatedCard::new()));
        session.inner.commit(|shared| {
            shared.set_state(SessionState::CardPresent);
            shared.last_command = Some(CommandOutcome::PinChangeFailed {
                reason: "PIN blocked".to_string(),
            });
        });

        let json = serde_json::to_value(&*session.watch().borrow()).unwrap();
        assert_eq!(json["state"], "state_eidpresent");
        assert_eq!(json["pending_command"], "none");
        assert_eq!(json["last_command"]["outcome"], "pin_change_failed");
        assert_eq!(json["last_command"]["reason"], "PIN blocked");
    }
}
