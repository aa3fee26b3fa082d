//! Collaborators behind the booking operations.

pub mod payments;
pub mod random;
pub mod registrations;
pub mod seats;

pub use payments::{InMemoryPaymentService, PaymentService};
pub use random::{FixedRandom, RandomSource, SeededRandom, ThreadRandom};
pub use registrations::{InMemoryRegistrationService, RegistrationService};
pub use seats::{InMemorySeatService, SeatService};
