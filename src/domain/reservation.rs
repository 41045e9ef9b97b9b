//! The `Reservation` aggregate: stock held for one order.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{Aggregate, AggregateRoot, Change};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reservation {
    /// `None` until created.
    pub order_id: Option<Uuid>,
}

impl Reservation {
    /// Reserve stock for `order_id`.
    ///
    /// # Errors
    ///
    /// Never fails for a fresh root.
    pub fn create(order_id: Uuid) -> Result<Change<Self>, ReservationError> {
        AggregateRoot::<Self>::create(ReservationCommand::Create { order_id })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationCommand {
    Create { order_id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ReservationEvent {
    Created { order_id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReservationError {
    #[error("reservation already created")]
    AlreadyCreated,
}

impl Aggregate for Reservation {
    const AGGREGATE_TYPE: &'static str = "reservation";
    type Command = ReservationCommand;
    type DomainEvent = ReservationEvent;
    type Error = ReservationError;

    fn handle(&self, cmd: ReservationCommand) -> Result<Vec<ReservationEvent>, ReservationError> {
        match cmd {
            ReservationCommand::Create { order_id } => {
                if self.order_id.is_some() {
                    return Err(ReservationError::AlreadyCreated);
                }
                Ok(vec![ReservationEvent::Created { order_id }])
            }
        }
    }

    fn apply(mut self, event: &ReservationEvent) -> Self {
        match event {
            ReservationEvent::Created { order_id } => self.order_id = Some(*order_id),
        }
        self
    }
}
