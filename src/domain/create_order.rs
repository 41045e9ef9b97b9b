//! The `CreateOrder` command aggregate.
//!
//! Submitted by clients; tracks which order it produced and whether that
//! order has been paid.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{Aggregate, AggregateRoot, Change};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOrder {
    pub created: bool,
    pub order_id: Option<Uuid>,
    pub done: bool,
}

impl CreateOrder {
    /// Submit a new order command.
    ///
    /// # Errors
    ///
    /// Never fails for a fresh root.
    pub fn create() -> Result<Change<Self>, CreateOrderError> {
        AggregateRoot::<Self>::create(CreateOrderCommand::Create)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOrderCommand {
    Create,
    AssignOrder { order_id: Uuid },
    MarkDone,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CreateOrderEvent {
    Created,
    OrderIdAssigned { order_id: Uuid },
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CreateOrderError {
    #[error("command already created")]
    AlreadyCreated,
    #[error("command not created")]
    NotCreated,
    #[error("command already assigned to order {0}")]
    OrderAlreadyAssigned(Uuid),
    #[error("command already done")]
    AlreadyDone,
}

impl Aggregate for CreateOrder {
    const AGGREGATE_TYPE: &'static str = "create_order";
    type Command = CreateOrderCommand;
    type DomainEvent = CreateOrderEvent;
    type Error = CreateOrderError;

    fn handle(&self, cmd: CreateOrderCommand) -> Result<Vec<CreateOrderEvent>, CreateOrderError> {
        if matches!(cmd, CreateOrderCommand::Create) {
            if self.created {
                return Err(CreateOrderError::AlreadyCreated);
            }
            return Ok(vec![CreateOrderEvent::Created]);
        }
        if !self.created {
            return Err(CreateOrderError::NotCreated);
        }
        match cmd {
            CreateOrderCommand::AssignOrder { order_id } => match self.order_id {
                Some(existing) if existing == order_id => Ok(vec![]),
                Some(existing) => Err(CreateOrderError::OrderAlreadyAssigned(existing)),
                None => Ok(vec![CreateOrderEvent::OrderIdAssigned { order_id }]),
            },
            CreateOrderCommand::MarkDone => {
                if self.done {
                    return Err(CreateOrderError::AlreadyDone);
                }
                Ok(vec![CreateOrderEvent::Done])
            }
            CreateOrderCommand::Create => Ok(vec![]),
        }
    }

    fn apply(mut self, event: &CreateOrderEvent) -> Self {
        match event {
            CreateOrderEvent::Created => self.created = true,
            CreateOrderEvent::OrderIdAssigned { order_id } => self.order_id = Some(*order_id),
            CreateOrderEvent::Done => self.done = true,
        }
        self
    }
}
