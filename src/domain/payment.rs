//! The `Payment` aggregate: a charge taken for one reserved order.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{Aggregate, AggregateRoot, Change};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payment {
    pub order_id: Option<Uuid>,
}

impl Payment {
    /// Take payment for `order_id`.
    ///
    /// # Errors
    ///
    /// Never fails for a fresh root.
    pub fn create(order_id: Uuid) -> Result<Change<Self>, PaymentError> {
        AggregateRoot::<Self>::create(PaymentCommand::Create { order_id })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentCommand {
    Create { order_id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PaymentEvent {
    Created { order_id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentError {
    #[error("payment already created")]
    AlreadyCreated,
}

impl Aggregate for Payment {
    const AGGREGATE_TYPE: &'static str = "payment";
    type Command = PaymentCommand;
    type DomainEvent = PaymentEvent;
    type Error = PaymentError;

    fn handle(&self, cmd: PaymentCommand) -> Result<Vec<PaymentEvent>, PaymentError> {
        match cmd {
            PaymentCommand::Create { order_id } => {
                if self.order_id.is_some() {
                    return Err(PaymentError::AlreadyCreated);
                }
                Ok(vec![PaymentEvent::Created { order_id }])
            }
        }
    }

    fn apply(mut self, event: &PaymentEvent) -> Self {
        match event {
            PaymentEvent::Created { order_id } => self.order_id = Some(*order_id),
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_topic_is_qualified() {
        let change = Payment::create(Uuid::new_v4()).expect("fresh payment");
        let write = change.to_stream_write().expect("encode");
        assert_eq!(write.events.len(), 1);
        assert_eq!(write.events[0].topic, "payment.Created");
    }
}
