//! The `Order` aggregate: created per command, then reserved, then paid.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{Aggregate, AggregateRoot, Change};

/// An order placed on behalf of a `CreateOrder` command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Order {
    /// The command that caused this order. `None` until created.
    pub command_id: Option<Uuid>,
    pub reservation_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
}

impl Order {
    /// Start a new order for the given command.
    ///
    /// # Errors
    ///
    /// Never fails for a fresh root; the signature mirrors [`Aggregate::handle`].
    pub fn create(command_id: Uuid) -> Result<Change<Self>, OrderError> {
        AggregateRoot::<Self>::create(OrderCommand::Create { command_id })
    }

    pub fn is_reserved(&self) -> bool {
        self.reservation_id.is_some()
    }

    pub fn is_paid(&self) -> bool {
        self.payment_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderCommand {
    Create { command_id: Uuid },
    SetReserved { reservation_id: Uuid },
    SetPaid { payment_id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    Created { command_id: Uuid },
    Reserved { reservation_id: Uuid },
    /// Carries the command id so the command stage can finish without
    /// loading the order.
    Paid { payment_id: Uuid, command_id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("order already created")]
    AlreadyCreated,
    #[error("order not created")]
    NotCreated,
    #[error("order already reserved")]
    AlreadyReserved,
    #[error("order already paid")]
    AlreadyPaid,
}

impl Aggregate for Order {
    const AGGREGATE_TYPE: &'static str = "order";
    type Command = OrderCommand;
    type DomainEvent = OrderEvent;
    type Error = OrderError;

    fn handle(&self, cmd: OrderCommand) -> Result<Vec<OrderEvent>, OrderError> {
        match cmd {
            OrderCommand::Create { command_id } => {
                if self.command_id.is_some() {
                    return Err(OrderError::AlreadyCreated);
                }
                Ok(vec![OrderEvent::Created { command_id }])
            }
            OrderCommand::SetReserved { reservation_id } => {
                if self.command_id.is_none() {
                    return Err(OrderError::NotCreated);
                }
                if self.is_reserved() {
                    return Err(OrderError::AlreadyReserved);
                }
                Ok(vec![OrderEvent::Reserved { reservation_id }])
            }
            OrderCommand::SetPaid { payment_id } => {
                let Some(command_id) = self.command_id else {
                    return Err(OrderError::NotCreated);
                };
                if self.is_paid() {
                    return Err(OrderError::AlreadyPaid);
                }
                Ok(vec![OrderEvent::Paid {
                    payment_id,
                    command_id,
                }])
            }
        }
    }

    fn apply(mut self, event: &OrderEvent) -> Self {
        match event {
            OrderEvent::Created { command_id } => self.command_id = Some(*command_id),
            OrderEvent::Reserved { reservation_id } => self.reservation_id = Some(*reservation_id),
            OrderEvent::Paid { payment_id, .. } => self.payment_id = Some(*payment_id),
        }
        self
    }
}
