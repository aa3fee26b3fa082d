//! Payloads exchanged between the booking workflows and their operations.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::Money;

/// Seats booked when no request is given.
pub const DEFAULT_SEATS: [u32; 2] = [5, 7];

/// Customer recorded when no request is given.
pub const DEFAULT_CUSTOMER: &str = "test customer";

/// Input of the booking saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookingRequest {
    pub seats: Vec<u32>,
    pub customer_data: String,
}

impl Default for BookingRequest {
    fn default() -> Self {
        Self {
            seats: DEFAULT_SEATS.to_vec(),
            customer_data: DEFAULT_CUSTOMER.to_string(),
        }
    }
}

/// Result of booking seats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatsReservation {
    pub price: Money,
}

/// Result of a successful payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub transaction_id: Uuid,
}

/// Input of the registration step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationData {
    pub seats: Vec<u32>,
    pub transaction_id: Uuid,
    pub customer_data: String,
}

/// Result of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub order_id: String,
}

/// Output of the booking saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingStatus {
    pub succeeded: bool,
    pub order_id: Option<String>,
}
