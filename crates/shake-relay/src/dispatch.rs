use crate::event::EventLookup;
use crate::forward::{ForwardOutcome, Forwarder, QueueRecord, Topic};
use crate::gate::{AftershockGate, GateDecision};
use crate::message::{Action, InboundMessage};
use crate::metrics::counters;
use tracing::{error, info, warn};

/// Terminal state of one dispatched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A record was delivered downstream.
    Forwarded(Topic),
    /// The downstream send failed; the record is lost.
    ForwardFailed(Topic),
    /// The alarm's event could not be found.
    EventNotFound,
    /// The alarm fell inside an active aftershock zone.
    Suppressed,
    /// The action keyword was not recognized.
    UnknownAction,
}

/// Routes decoded messages: alarms go through lookup and the aftershock
/// gate, cancels go straight downstream.
pub struct Dispatcher {
    lookup: Box<dyn EventLookup>,
    gate: Option<AftershockGate>,
    forwarder: Forwarder,
}

impl Dispatcher {
    /// `gate` is `None` when aftershock handling is disabled.
    pub fn new(lookup: Box<dyn EventLookup>, gate: Option<AftershockGate>, forwarder: Forwarder) -> Self {
        Self {
            lookup,
            gate,
            forwarder,
        }
    }

    /// Handle one message from `peer`. Never fails; every outcome is logged.
    pub async fn dispatch(&mut self, msg: &InboundMessage, peer: &str) -> DispatchOutcome {
        counters::messages_total(msg.action.label());
        match &msg.action {
            Action::Alarm => self.alarm(&msg.event_id, peer).await,
            Action::Cancel => {
                info!("{}: cancel for event {}", peer, msg.event_id);
                self.forward(QueueRecord::cancel(&msg.event_id), &msg.event_id)
                    .await
            }
            Action::Unknown(keyword) => {
                warn!(
                    "{}: unknown action {:?} for event {}, ignoring",
                    peer, keyword, msg.event_id
                );
                DispatchOutcome::UnknownAction
            }
        }
    }

    async fn alarm(&mut self, event_id: &str, peer: &str) -> DispatchOutcome {
        let event = match self.lookup.lookup(event_id).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                warn!("{}: alarm for unknown event {}, abandoned", peer, event_id);
                return DispatchOutcome::EventNotFound;
            }
            Err(e) => {
                warn!("{}: lookup of event {} failed: {}, abandoned", peer, event_id, e);
                return DispatchOutcome::EventNotFound;
            }
        };
        let composite_id = event.composite_id();

        if let Some(gate) = self.gate.as_mut() {
            if let GateDecision::Suppressed { zone_id } = gate.evaluate(&event) {
                counters::alarms_suppressed_total();
                warn!(
                    "{}: event {} (M{:.1}) is inside aftershock zone {}, abandoned",
                    peer,
                    composite_id,
                    event.magnitude,
                    zone_id.as_deref().unwrap_or("?")
                );
                return DispatchOutcome::Suppressed;
            }
        }

        self.forward(QueueRecord::origin(&event), &composite_id).await
    }

    async fn forward(&self, record: QueueRecord, event_id: &str) -> DispatchOutcome {
        let topic = record.topic;
        match self.forwarder.send(&record).await {
            ForwardOutcome::Sent => {
                counters::forwards_total(topic.as_str(), "sent");
                info!("forwarded {} for event {}", topic, event_id);
                DispatchOutcome::Forwarded(topic)
            }
            ForwardOutcome::Failed(reason) => {
                counters::forwards_total(topic.as_str(), "failed");
                error!("failed to forward {} for event {}: {}", topic, event_id, reason);
                DispatchOutcome::ForwardFailed(topic)
            }
        }
    }
}
