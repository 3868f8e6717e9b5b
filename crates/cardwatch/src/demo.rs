//! Scripted reader and card activity against a simulated card.

use std::time::Duration;

use cardwatch_core::{SessionState, SimulationSettings};
use cardwatch_session::{CardContents, CardSession, Operation, SimulatedCard, SubscriptionId};
use tokio::time::sleep;
use tracing::{info, warn};

/// Subscribe an observer that logs every committed status as JSON.
pub fn log_transitions(session: &CardSession) -> SubscriptionId {
    let status = session.watch();
    session.subscribe(move || {
        let snapshot = status.borrow().clone();
        match serde_json::to_string(&snapshot) {
            Ok(json) => info!("Card session: {}", json),
            Err(e) => warn!("Failed to serialize session status: {}", e),
        }
    })
}

/// Play the configured script: attach the reader, insert the card,
/// optionally change the PIN, then remove the card.
///
/// Without `remove_after_ms` the card stays in and this never returns.
pub async fn run_script(
    card: &SimulatedCard,
    session: &CardSession,
    settings: &SimulationSettings,
    contents: CardContents,
) -> anyhow::Result<()> {
    let mut status = session.watch();

    sleep(Duration::from_millis(settings.reader_delay_ms)).await;
    info!("Attaching reader");
    card.attach_reader();

    sleep(Duration::from_millis(settings.insert_delay_ms)).await;
    info!("Inserting card");
    card.insert_card(contents);

    if settings.change_pin {
        if settings.pin_change_fails {
            card.fail_next(Operation::ChangePin, "PIN change refused by card");
        }

        status.wait_for(|s| s.is_ready_for_command()).await?;
        if session.request_change_pin() {
            info!("PIN change requested");
            status
                .wait_for(|s| s.last_command.is_some() || s.state != SessionState::CardPresent)
                .await?;
        }
    }

    let Some(remove_after) = settings.remove_after_ms else {
        std::future::pending::<()>().await;
        return Ok(());
    };

    sleep(Duration::from_millis(remove_after)).await;
    info!("Removing card");
    card.remove_card();

    status
        .wait_for(|s| s.state != SessionState::CardPresent)
        .await?;
    Ok(())
}
