//! Seat service trait and in-memory implementation.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::BookingError;
use crate::money::Money;

/// Trait for seat booking operations.
#[async_trait]
pub trait SeatService: Send + Sync {
    /// Books the given seats and returns the total price.
    async fn book(&self, seats: &[u32]) -> Result<Money, BookingError>;

    /// Releases previously booked seats.
    async fn release(&self, seats: &[u32]) -> Result<(), BookingError>;
}

#[derive(Debug)]
struct InMemorySeatState {
    price: Money,
    booked: BTreeSet<u32>,
    unavailable: BTreeSet<u32>,
    releases: Vec<Vec<u32>>,
}

/// In-memory seat service.
///
/// Every booking costs the same flat price.
#[derive(Debug, Clone)]
pub struct InMemorySeatService {
    state: Arc<RwLock<InMemorySeatState>>,
}

impl InMemorySeatService {
    /// Creates a seat service charging $1000 per booking.
    pub fn new() -> Self {
        Self::with_price(Money::from_dollars(1000))
    }

    /// Creates a seat service charging `price` per booking.
    pub fn with_price(price: Money) -> Self {
        Self {
            state: Arc::new(RwLock::new(InMemorySeatState {
                price,
                booked: BTreeSet::new(),
                unavailable: BTreeSet::new(),
                releases: Vec::new(),
            })),
        }
    }

    /// Marks seats as impossible to book.
    pub fn mark_unavailable(&self, seats: &[u32]) {
        self.write().unavailable.extend(seats.iter().copied());
    }

    /// Returns the currently booked seats.
    pub fn booked(&self) -> Vec<u32> {
        self.read().booked.iter().copied().collect()
    }

    /// Returns every release call, in order.
    pub fn releases(&self) -> Vec<Vec<u32>> {
        self.read().releases.clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, InMemorySeatState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemorySeatState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemorySeatService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SeatService for InMemorySeatService {
    async fn book(&self, seats: &[u32]) -> Result<Money, BookingError> {
        if seats.is_empty() {
            return Err(BookingError::NoSeats);
        }

        let mut state = self.write();
        let blocked: Vec<u32> = seats
            .iter()
            .copied()
            .filter(|seat| state.unavailable.contains(seat))
            .collect();
        if !blocked.is_empty() {
            return Err(BookingError::SeatsUnavailable(blocked));
        }

        state.booked.extend(seats.iter().copied());
        Ok(state.price)
    }

    async fn release(&self, seats: &[u32]) -> Result<(), BookingError> {
        let mut state = self.write();
        for seat in seats {
            state.booked.remove(seat);
        }
        state.releases.push(seats.to_vec());
        Ok(())
    }
}
