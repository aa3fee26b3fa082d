//! Registration service trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::BookingError;
use crate::payloads::{Registration, RegistrationData};

/// Order ID issued by the in-memory registration service.
pub const DEMO_ORDER_ID: &str = "2022 0009 1234";

/// Trait for registering a paid booking and notifying the customer.
#[async_trait]
pub trait RegistrationService: Send + Sync {
    /// Registers the booking and returns the order.
    async fn register(&self, data: &RegistrationData) -> Result<Registration, BookingError>;
}

#[derive(Debug, Default)]
struct InMemoryRegistrationState {
    registered: Vec<RegistrationData>,
    reject: bool,
}

/// In-memory registration service that always issues [`DEMO_ORDER_ID`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistrationService {
    state: Arc<RwLock<InMemoryRegistrationState>>,
}

impl InMemoryRegistrationService {
    /// Creates a new in-memory registration service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to reject every registration.
    pub fn set_reject(&self, reject: bool) {
        self.state.write().unwrap_or_else(|e| e.into_inner()).reject = reject;
    }

    /// Returns the registrations accepted so far.
    pub fn registered(&self) -> Vec<RegistrationData> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .registered
            .clone()
    }
}

#[async_trait]
impl RegistrationService for InMemoryRegistrationService {
    async fn register(&self, data: &RegistrationData) -> Result<Registration, BookingError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.reject {
            return Err(BookingError::RegistrationRejected(data.customer_data.clone()));
        }
        state.registered.push(data.clone());
        Ok(Registration {
            order_id: DEMO_ORDER_ID.to_string(),
        })
    }
}
