//! Demo workflows built on the `saga` crate.
//!
//! - `Saga`: books seats, pays through the `Pay` sub-workflow and registers
//!   the order, compensating on failure.
//! - `Pay`: waits up to three minutes for a `payEvent` signal.
//! - `WaitEvent`: waits up to a minute for a `MyEvent` guess.
//! - `CallChain`: three slow operations, each fed the previous output.
//! - `CallTwoChains`: two `CallChain` children in parallel.

pub mod booking;
pub mod chain;
pub mod error;
pub mod money;
pub mod payloads;
pub mod payment;
pub mod services;
pub mod two_chains;
pub mod wait_event;

use std::sync::Arc;
use std::time::Duration;

use saga::{OperationRegistry, WorkflowRegistry};

pub use error::BookingError;
pub use money::Money;
pub use payloads::{
    BookingRequest, BookingStatus, PaymentReceipt, Registration, RegistrationData,
    SeatsReservation,
};
pub use services::{
    FixedRandom, InMemoryPaymentService, InMemoryRegistrationService, InMemorySeatService,
    PaymentService, RandomSource, RegistrationService, SeatService, SeededRandom, ThreadRandom,
};

/// Collaborators and tunables shared by the demo operations.
#[derive(Clone)]
pub struct DemoServices {
    pub seats: Arc<dyn SeatService>,
    pub payments: Arc<dyn PaymentService>,
    pub registrations: Arc<dyn RegistrationService>,
    pub random: Arc<dyn RandomSource>,
    /// Delay each chain link sleeps before answering.
    pub link_delay: Duration,
}

impl DemoServices {
    /// In-memory collaborators, thread-local randomness and the default link delay.
    pub fn in_memory() -> Self {
        Self {
            seats: Arc::new(InMemorySeatService::new()),
            payments: Arc::new(InMemoryPaymentService::new()),
            registrations: Arc::new(InMemoryRegistrationService::new()),
            random: Arc::new(ThreadRandom),
            link_delay: chain::default_link_delay(),
        }
    }

    pub fn with_seats(mut self, seats: Arc<dyn SeatService>) -> Self {
        self.seats = seats;
        self
    }

    pub fn with_payments(mut self, payments: Arc<dyn PaymentService>) -> Self {
        self.payments = payments;
        self
    }

    pub fn with_registrations(mut self, registrations: Arc<dyn RegistrationService>) -> Self {
        self.registrations = registrations;
        self
    }

    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn with_link_delay(mut self, link_delay: Duration) -> Self {
        self.link_delay = link_delay;
        self
    }
}

impl Default for DemoServices {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Registers every demo operation and workflow.
pub fn register_all(services: &DemoServices) -> (OperationRegistry, WorkflowRegistry) {
    let mut operations = OperationRegistry::new();
    booking::register_operations(&mut operations, services);
    wait_event::register_operations(&mut operations, services);
    chain::register_operations(&mut operations, services);

    let mut workflows = WorkflowRegistry::new();
    booking::register_workflows(&mut workflows);
    payment::register_workflows(&mut workflows);
    wait_event::register_workflows(&mut workflows);
    chain::register_workflows(&mut workflows);
    two_chains::register_workflows(&mut workflows);

    tracing::debug!(
        operations = ?operations.names(),
        workflows = ?workflows.names(),
        "demo workflows registered"
    );
    (operations, workflows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_all_names() {
        let (operations, workflows) = register_all(&DemoServices::in_memory());

        assert_eq!(
            operations.names(),
            vec![
                "BookSeats",
                "CancelPayment",
                "GetRandom",
                "Link1",
                "Link2",
                "Link3",
                "RegisterAndNotify",
                "ReleaseSeats",
            ]
        );
        assert_eq!(
            workflows.names(),
            vec!["CallChain", "CallTwoChains", "Pay", "Saga", "WaitEvent"]
        );
    }
}
