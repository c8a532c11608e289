//! Scriptable in-memory `LedgerClient`.

use async_trait::async_trait;
use stagepass_core::event::{DomainEvent, TICKETING_SERVICE};
use stagepass_core::ledger::{
    ActorId, Amount, CreateEventArgs, EventDetail, LedgerClient, LedgerError, LedgerSubscription,
    RawNotification, TicketDetail, TxReceipt,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A recorded `mint_tickets` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintCall {
    /// Ledger event id minted against.
    pub event_id: u64,
    /// Buyer actor.
    pub buyer: ActorId,
    /// Requested amount.
    pub amount: u32,
    /// Requested zone slots.
    pub zones: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    connected: bool,
    deny_connectivity: u32,
    events: HashMap<u64, EventDetail>,
    tickets: HashMap<u64, TicketDetail>,
    write_failures: VecDeque<LedgerError>,
    read_failures: VecDeque<LedgerError>,
    mint_calls: Vec<MintCall>,
    subscribers: HashMap<u64, (String, mpsc::Sender<RawNotification>)>,
    next_subscriber: u64,
    next_tx: u64,
    unsubscribes: u64,
}

/// In-memory ledger double.
///
/// Records every write call, pops scripted failures in order, and pushes
/// notifications to live subscribers. Nothing is emitted automatically —
/// tests decide when the "chain" confirms.
#[derive(Clone)]
pub struct InMemoryLedger {
    program: ActorId,
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryLedger {
    /// Create a connected ledger double for the given program id.
    #[must_use]
    pub fn new(program: ActorId) -> Self {
        Self {
            program,
            inner: Arc::new(Mutex::new(Inner {
                connected: true,
                next_tx: 1,
                ..Inner::default()
            })),
        }
    }

    /// Flip connectivity.
    pub fn set_connected(&self, connected: bool) {
        self.inner.lock().unwrap().connected = connected;
    }

    /// Report disconnected for the next `n` connectivity checks, then
    /// connected again. Drives the ingestor's bounded startup wait.
    pub fn deny_connectivity_checks(&self, n: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.deny_connectivity = n;
    }

    /// Script the next write operation to fail with `error`.
    pub fn fail_next_write(&self, error: LedgerError) {
        self.inner.lock().unwrap().write_failures.push_back(error);
    }

    /// Script the next read operation to fail with `error`.
    pub fn fail_next_read(&self, error: LedgerError) {
        self.inner.lock().unwrap().read_failures.push_back(error);
    }

    /// Seed an on-ledger event state.
    pub fn put_event_detail(&self, detail: EventDetail) {
        self.inner.lock().unwrap().events.insert(detail.id, detail);
    }

    /// Seed an on-ledger ticket state.
    pub fn put_ticket_detail(&self, detail: TicketDetail) {
        self.inner.lock().unwrap().tickets.insert(detail.id, detail);
    }

    /// Every `mint_tickets` call so far, in order.
    #[must_use]
    pub fn mint_calls(&self) -> Vec<MintCall> {
        self.inner.lock().unwrap().mint_calls.clone()
    }

    /// How many subscriptions have been dropped (disposer runs).
    #[must_use]
    pub fn unsubscribe_count(&self) -> u64 {
        self.inner.lock().unwrap().unsubscribes
    }

    /// Live subscriber count.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }

    /// Emit a domain event to subscribers, as the program would: encoded
    /// envelope, program source, broadcast destination.
    ///
    /// # Panics
    ///
    /// Panics if the event fails to encode (test fixture bug).
    pub fn emit(&self, event: &DomainEvent) {
        let payload = event.encode().unwrap();
        self.emit_raw(RawNotification {
            source: self.program,
            destination: ActorId::ZERO,
            payload,
        });
    }

    /// Emit an arbitrary raw notification (corrupt payloads, foreign
    /// sources, wrong destinations).
    pub fn emit_raw(&self, notification: RawNotification) {
        let subscribers: Vec<mpsc::Sender<RawNotification>> = {
            let inner = self.inner.lock().unwrap();
            inner
                .subscribers
                .values()
                .filter(|(service, _)| service == TICKETING_SERVICE)
                .map(|(_, tx)| tx.clone())
                .collect()
        };
        for tx in subscribers {
            // A full or closed channel drops the notification, matching a
            // node that stops buffering for a dead consumer.
            let _ = tx.try_send(notification.clone());
        }
    }

    fn next_receipt(inner: &mut Inner) -> TxReceipt {
        let n = inner.next_tx;
        inner.next_tx += 1;
        TxReceipt {
            tx_hash: format!("0xtx{n:08x}"),
            block_hash: format!("0xblk{n:08x}"),
            response: serde_json::Value::Null,
        }
    }

    fn write_op(&self) -> Result<TxReceipt, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.write_failures.pop_front() {
            return Err(error);
        }
        Ok(Self::next_receipt(&mut inner))
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    fn program_id(&self) -> ActorId {
        self.program
    }

    async fn is_connected(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.deny_connectivity > 0 {
            inner.deny_connectivity -= 1;
            return false;
        }
        inner.connected
    }

    async fn create_event(&self, _args: CreateEventArgs) -> Result<TxReceipt, LedgerError> {
        self.write_op()
    }

    async fn mint_tickets(
        &self,
        event_id: u64,
        buyer: ActorId,
        amount: u32,
        zones: &[String],
    ) -> Result<TxReceipt, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.mint_calls.push(MintCall {
            event_id,
            buyer,
            amount,
            zones: zones.to_vec(),
        });
        if let Some(error) = inner.write_failures.pop_front() {
            return Err(error);
        }
        Ok(Self::next_receipt(&mut inner))
    }

    async fn mark_used(&self, _ticket_id: u64) -> Result<TxReceipt, LedgerError> {
        self.write_op()
    }

    async fn list_ticket(&self, _ticket_id: u64, _price: Amount) -> Result<TxReceipt, LedgerError> {
        self.write_op()
    }

    async fn buy_ticket(&self, _listing_id: u64) -> Result<TxReceipt, LedgerError> {
        self.write_op()
    }

    async fn cancel_listing(&self, _listing_id: u64) -> Result<TxReceipt, LedgerError> {
        self.write_op()
    }

    async fn event(&self, event_id: u64) -> Result<Option<EventDetail>, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.read_failures.pop_front() {
            return Err(error);
        }
        Ok(inner.events.get(&event_id).cloned())
    }

    async fn ticket(&self, ticket_id: u64) -> Result<Option<TicketDetail>, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.read_failures.pop_front() {
            return Err(error);
        }
        Ok(inner.tickets.get(&ticket_id).cloned())
    }

    async fn subscribe(&self, service: &str) -> Result<LedgerSubscription, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.connected {
            return Err(LedgerError::NotConnected);
        }
        let (tx, rx) = mpsc::channel(64);
        let id = inner.next_subscriber;
        inner.next_subscriber += 1;
        inner.subscribers.insert(id, (service.to_string(), tx));

        let registry = Arc::clone(&self.inner);
        let disposer = Box::new(move || {
            let mut inner = registry.lock().unwrap();
            inner.subscribers.remove(&id);
            inner.unsubscribes += 1;
        });
        Ok(LedgerSubscription::new(rx, disposer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropping_a_subscription_runs_the_disposer() {
        let ledger = InMemoryLedger::new(ActorId::new([1u8; 32]));
        let subscription = ledger.subscribe(TICKETING_SERVICE).await.unwrap();
        assert_eq!(ledger.subscriber_count(), 1);
        drop(subscription);
        assert_eq!(ledger.subscriber_count(), 0);
        assert_eq!(ledger.unsubscribe_count(), 1);
    }

    #[tokio::test]
    async fn emitted_events_reach_subscribers() {
        let ledger = InMemoryLedger::new(ActorId::new([2u8; 32]));
        let mut subscription = ledger.subscribe(TICKETING_SERVICE).await.unwrap();

        ledger.emit(&DomainEvent::TicketUsed(
            stagepass_core::event::TicketUsedPayload {
                ticket_id: 9,
                used_at: 1_700_000_000,
            },
        ));

        let raw = subscription.recv().await.unwrap();
        assert_eq!(raw.source, ledger.program_id());
        assert!(raw.destination.is_zero());
        assert!(matches!(
            DomainEvent::decode(&raw.payload),
            Ok(DomainEvent::TicketUsed(_))
        ));
    }

    #[tokio::test]
    async fn scripted_write_failures_pop_in_order() {
        let ledger = InMemoryLedger::new(ActorId::new([3u8; 32]));
        ledger.fail_next_write(LedgerError::Rpc("boom".into()));
        let err = ledger
            .mint_tickets(1, ActorId::new([4u8; 32]), 1, &[])
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::Rpc("boom".into()));
        assert!(ledger.mint_tickets(1, ActorId::new([4u8; 32]), 1, &[]).await.is_ok());
        assert_eq!(ledger.mint_calls().len(), 2);
    }
}
