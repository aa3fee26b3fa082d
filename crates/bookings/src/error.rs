//! Booking error types.

use saga::SagaError;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the booking collaborators.
#[derive(Debug, Error)]
pub enum BookingError {
    /// One or more requested seats cannot be booked.
    #[error("Seats unavailable: {0:?}")]
    SeatsUnavailable(Vec<u32>),

    /// A booking request named no seats.
    #[error("No seats requested")]
    NoSeats,

    /// The payment gateway could not cancel a transaction.
    #[error("Cancel failed for transaction {0}")]
    CancelFailed(Uuid),

    /// The registration service refused the booking.
    #[error("Registration rejected: {0}")]
    RegistrationRejected(String),

    /// A chain link received input it cannot parse.
    #[error("Invalid chain input: {0}")]
    InvalidChainInput(String),
}

impl BookingError {
    /// Returns true for failures that the saga treats as a declined step.
    pub fn is_declined(&self) -> bool {
        matches!(
            self,
            BookingError::SeatsUnavailable(_) | BookingError::RegistrationRejected(_)
        )
    }

    /// Converts the error into the failure of operation `operation`.
    pub fn into_operation_error(self, operation: &str) -> SagaError {
        SagaError::operation_failed(operation, self)
    }
}
