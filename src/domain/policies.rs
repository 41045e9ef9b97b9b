//! The four stages of the order saga and the events they react to.

use crate::aggregate::{Aggregate, Change};
use crate::error::PolicyError;
use crate::event::{StoredEvent, decode_domain_event};
use crate::policy::{Inbound, Policy, Reaction, Repository, TopicEvent};

use super::create_order::{CreateOrder, CreateOrderCommand, CreateOrderEvent};
use super::order::{Order, OrderCommand, OrderEvent};
use super::payment::{Payment, PaymentEvent};
use super::reservation::{Reservation, ReservationEvent};

/// Every event that flows through the saga, decoded by topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaEvent {
    CreateOrder(CreateOrderEvent),
    Order(OrderEvent),
    Reservation(ReservationEvent),
    Payment(PaymentEvent),
}

impl TopicEvent for SagaEvent {
    fn decode(event: &StoredEvent) -> serde_json::Result<Option<Self>> {
        if let Some(e) = decode_domain_event::<CreateOrder>(event)? {
            return Ok(Some(Self::CreateOrder(e)));
        }
        if let Some(e) = decode_domain_event::<Order>(event)? {
            return Ok(Some(Self::Order(e)));
        }
        if let Some(e) = decode_domain_event::<Reservation>(event)? {
            return Ok(Some(Self::Reservation(e)));
        }
        Ok(decode_domain_event::<Payment>(event)?.map(Self::Payment))
    }
}

/// Turn a decided command into a reaction; an empty change is a no-op.
fn react_with<A: Aggregate>(
    decided: Result<Change<A>, A::Error>,
) -> Result<Option<Reaction>, PolicyError> {
    let change = decided.map_err(PolicyError::rejected)?;
    if change.is_empty() {
        return Ok(None);
    }
    Ok(Some(Reaction::from_change(&change)?))
}

/// Owns `CreateOrder` commands; records which order each produced and
/// finishes the command once that order is paid.
#[derive(Debug, Default)]
pub struct Commands;

impl Policy for Commands {
    const NAME: &'static str = "commands";
    type Event = SagaEvent;

    fn react(
        &self,
        repository: &Repository,
        inbound: &Inbound<SagaEvent>,
    ) -> Result<Option<Reaction>, PolicyError> {
        match &inbound.event {
            SagaEvent::Order(OrderEvent::Created { command_id }) => {
                let cmd = repository.get::<CreateOrder>(*command_id)?;
                react_with(cmd.execute(CreateOrderCommand::AssignOrder {
                    order_id: inbound.originator_id,
                }))
            }
            SagaEvent::Order(OrderEvent::Paid { command_id, .. }) => {
                let cmd = repository.get::<CreateOrder>(*command_id)?;
                react_with(cmd.execute(CreateOrderCommand::MarkDone))
            }
            _ => Ok(None),
        }
    }
}

/// Owns orders: creates one per command, then records its reservation and
/// payment.
#[derive(Debug, Default)]
pub struct Orders;

impl Policy for Orders {
    const NAME: &'static str = "orders";
    type Event = SagaEvent;

    fn react(
        &self,
        repository: &Repository,
        inbound: &Inbound<SagaEvent>,
    ) -> Result<Option<Reaction>, PolicyError> {
        match &inbound.event {
            SagaEvent::CreateOrder(CreateOrderEvent::Created) => {
                react_with(Order::create(inbound.originator_id))
            }
            SagaEvent::Reservation(ReservationEvent::Created { order_id }) => {
                let order = repository.get::<Order>(*order_id)?;
                react_with(order.execute(OrderCommand::SetReserved {
                    reservation_id: inbound.originator_id,
                }))
            }
            SagaEvent::Payment(PaymentEvent::Created { order_id }) => {
                let order = repository.get::<Order>(*order_id)?;
                react_with(order.execute(OrderCommand::SetPaid {
                    payment_id: inbound.originator_id,
                }))
            }
            _ => Ok(None),
        }
    }
}

/// Reserves stock for every new order.
#[derive(Debug, Default)]
pub struct Reservations;

impl Policy for Reservations {
    const NAME: &'static str = "reservations";
    type Event = SagaEvent;

    fn react(
        &self,
        _repository: &Repository,
        inbound: &Inbound<SagaEvent>,
    ) -> Result<Option<Reaction>, PolicyError> {
        match &inbound.event {
            SagaEvent::Order(OrderEvent::Created { .. }) => {
                react_with(Reservation::create(inbound.originator_id))
            }
            _ => Ok(None),
        }
    }
}

/// Takes payment for every reserved order.
#[derive(Debug, Default)]
pub struct Payments;

impl Policy for Payments {
    const NAME: &'static str = "payments";
    type Event = SagaEvent;

    fn react(
        &self,
        _repository: &Repository,
        inbound: &Inbound<SagaEvent>,
    ) -> Result<Option<Reaction>, PolicyError> {
        match &inbound.event {
            SagaEvent::Order(OrderEvent::Reserved { .. }) => {
                react_with(Payment::create(inbound.originator_id))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;
    use crate::recorder::{MemoryRecorder, Recorder};

    fn inbound(upstream: &str, originator_id: Uuid, event: SagaEvent) -> Inbound<SagaEvent> {
        Inbound {
            upstream: upstream.into(),
            position: 0,
            originator_id,
            originator_version: 0,
            event,
        }
    }

    fn store<A: Aggregate>(recorder: &dyn Recorder, app: &str, change: &Change<A>) {
        let write = change.to_stream_write().expect("encode");
        recorder
            .append(app, write.originator_id, write.expected_version, write.events)
            .expect("append");
    }

    #[test]
    fn saga_event_decodes_each_aggregate() {
        let recorder = MemoryRecorder::new();
        let change = Payment::create(Uuid::new_v4()).expect("create");
        store(&recorder, "payments", &change);
        let stored = recorder
            .notifications("payments", 0, 1)
            .expect("read")
            .pop()
            .expect("one")
            .event;
        assert!(matches!(
            SagaEvent::decode(&stored).expect("decode"),
            Some(SagaEvent::Payment(PaymentEvent::Created { .. }))
        ));
    }

    #[test]
    fn orders_creates_order_for_command() {
        let command_id = Uuid::new_v4();
        let repository = Repository::new(Arc::new(MemoryRecorder::new()), "orders");
        let reaction = Orders
            .react(
                &repository,
                &inbound("commands", command_id, SagaEvent::CreateOrder(CreateOrderEvent::Created)),
            )
            .expect("react")
            .expect("an order is created");
        assert_eq!(reaction.write.expected_version, 0);
        assert_eq!(reaction.write.events[0].topic, "order.Created");
    }

    #[test]
    fn orders_rejects_second_reservation() {
        let recorder: Arc<dyn Recorder> = Arc::new(MemoryRecorder::new());
        let created = Order::create(Uuid::new_v4()).expect("create");
        let reserved = created
            .root
            .execute(OrderCommand::SetReserved {
                reservation_id: Uuid::new_v4(),
            })
            .expect("reserve");
        store(&*recorder, "orders", &created);
        store(&*recorder, "orders", &reserved);

        let repository = Repository::new(recorder, "orders");
        let err = Orders
            .react(
                &repository,
                &inbound(
                    "reservations",
                    Uuid::new_v4(),
                    SagaEvent::Reservation(ReservationEvent::Created {
                        order_id: created.id(),
                    }),
                ),
            )
            .expect_err("already reserved");
        assert!(matches!(err, PolicyError::InvalidStateTransition(_)));
    }

    #[test]
    fn commands_marks_done_on_paid() {
        let recorder: Arc<dyn Recorder> = Arc::new(MemoryRecorder::new());
        let command = CreateOrder::create().expect("create");
        store(&*recorder, "commands", &command);

        let repository = Repository::new(recorder, "commands");
        let reaction = Commands
            .react(
                &repository,
                &inbound(
                    "orders",
                    Uuid::new_v4(),
                    SagaEvent::Order(OrderEvent::Paid {
                        payment_id: Uuid::new_v4(),
                        command_id: command.id(),
                    }),
                ),
            )
            .expect("react")
            .expect("command finishes");
        assert_eq!(reaction.write.originator_id, command.id());
        assert_eq!(reaction.write.expected_version, 1);
        assert_eq!(reaction.write.events[0].topic, "create_order.Done");
    }

    #[test]
    fn payments_ignore_unreserved_events() {
        let repository = Repository::new(Arc::new(MemoryRecorder::new()), "payments");
        let reaction = Payments
            .react(
                &repository,
                &inbound(
                    "orders",
                    Uuid::new_v4(),
                    SagaEvent::Order(OrderEvent::Created {
                        command_id: Uuid::new_v4(),
                    }),
                ),
            )
            .expect("react");
        assert!(reaction.is_none());
    }

    #[test]
    fn commands_unknown_command_is_not_found() {
        let repository = Repository::new(Arc::new(MemoryRecorder::new()), "commands");
        let err = Commands
            .react(
                &repository,
                &inbound(
                    "orders",
                    Uuid::new_v4(),
                    SagaEvent::Order(OrderEvent::Created {
                        command_id: Uuid::new_v4(),
                    }),
                ),
            )
            .expect_err("no such command");
        assert!(matches!(err, PolicyError::UnknownAggregate(_)));
    }
}
