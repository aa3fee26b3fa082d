//! Payment gateway trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::BookingError;

/// Trait for payment operations that run outside the payment workflow.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Cancels (refunds) a completed payment.
    async fn cancel(&self, transaction_id: Uuid) -> Result<(), BookingError>;
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    canceled: Vec<Uuid>,
    fail_on_cancel: bool,
}

/// In-memory payment gateway.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentService {
    /// Creates a new in-memory payment gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the gateway to fail every cancel call.
    pub fn set_fail_on_cancel(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .fail_on_cancel = fail;
    }

    /// Returns the canceled transactions, in order.
    pub fn canceled(&self) -> Vec<Uuid> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .canceled
            .clone()
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn cancel(&self, transaction_id: Uuid) -> Result<(), BookingError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.fail_on_cancel {
            return Err(BookingError::CancelFailed(transaction_id));
        }
        state.canceled.push(transaction_id);
        Ok(())
    }
}
