//! The order saga: commands become orders, orders are reserved and paid,
//! and the command is marked done.
//!
//! ```text
//! commands ⇄ orders ⇄ reservations
//!              ⇅
//!           payments
//! ```

mod create_order;
mod order;
mod payment;
mod policies;
mod reservation;

pub use create_order::{CreateOrder, CreateOrderCommand, CreateOrderError, CreateOrderEvent};
pub use order::{Order, OrderCommand, OrderError, OrderEvent};
pub use payment::{Payment, PaymentCommand, PaymentError, PaymentEvent};
pub use policies::{Commands, Orders, Payments, Reservations, SagaEvent};
pub use reservation::{Reservation, ReservationCommand, ReservationError, ReservationEvent};

use crate::policy::Policy;
use crate::runner::SystemBuilder;

/// A builder with the four saga stages registered and piped together.
///
/// Callers may still set a recorder or config before building.
pub fn order_system() -> SystemBuilder {
    SystemBuilder::new()
        .stage(Commands)
        .stage(Orders)
        .stage(Reservations)
        .stage(Payments)
        .pipe(&[Commands::NAME, Orders::NAME, Commands::NAME])
        .pipe(&[Orders::NAME, Reservations::NAME, Orders::NAME])
        .pipe(&[Orders::NAME, Payments::NAME, Orders::NAME])
}
