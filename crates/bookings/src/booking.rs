//! The seat-booking saga: book seats, pay, register.

use saga::{
    OperationRegistry, SagaDefinition, SagaError, Step, StepResult, WorkflowContext,
    WorkflowRegistry,
};
use uuid::Uuid;

use crate::DemoServices;
use crate::payloads::{
    BookingRequest, BookingStatus, PaymentReceipt, Registration, RegistrationData,
    SeatsReservation,
};
use crate::payment::PAY;

pub const SAGA: &str = "Saga";
pub const BOOK_SEATS: &str = "BookSeats";
pub const RELEASE_SEATS: &str = "ReleaseSeats";
pub const CANCEL_PAYMENT: &str = "CancelPayment";
pub const REGISTER_AND_NOTIFY: &str = "RegisterAndNotify";

/// Builds the booking saga.
///
/// | step       | forward             | compensation    |
/// |------------|---------------------|-----------------|
/// | book_seats | `BookSeats`         | `ReleaseSeats`  |
/// | pay        | `Pay` sub-workflow  | `CancelPayment` |
/// | register   | `RegisterAndNotify` | none            |
pub fn booking_saga() -> SagaDefinition {
    SagaDefinition::new("seat-booking")
        .step(
            Step::operation("book_seats", BOOK_SEATS)
                .with_input(|ctx| Ok(ctx.input_as::<BookingRequest>()?.seats))
                .compensate_with_input(RELEASE_SEATS),
        )
        .step(
            Step::sub_workflow("pay", PAY)
                .with_input(|ctx| Ok(ctx.payload_as::<SeatsReservation>("book_seats")?.price))
                .compensate_with(
                    CANCEL_PAYMENT,
                    |_: serde_json::Value, receipt: PaymentReceipt| receipt.transaction_id,
                ),
        )
        .step(
            Step::operation("register", REGISTER_AND_NOTIFY).with_input(|ctx| {
                let request: BookingRequest = ctx.input_as()?;
                let receipt: PaymentReceipt = ctx.payload_as("pay")?;
                Ok(RegistrationData {
                    seats: request.seats,
                    transaction_id: receipt.transaction_id,
                    customer_data: request.customer_data,
                })
            }),
        )
}

/// The `Saga` workflow. A `null` input books the default seats.
pub async fn saga_workflow(ctx: WorkflowContext) -> Result<BookingStatus, SagaError> {
    let request = ctx
        .input::<Option<BookingRequest>>()?
        .unwrap_or_default();
    tracing::info!(seats = ?request.seats, "booking started");

    let outcome = ctx.run_saga(&booking_saga(), &request).await?;
    let order_id = outcome
        .payload_as::<Registration>()?
        .map(|registration| registration.order_id);

    let label = if outcome.succeeded { "booked" } else { "rolled_back" };
    metrics::counter!("bookings_total", "outcome" => label).increment(1);

    Ok(BookingStatus {
        succeeded: outcome.succeeded,
        order_id,
    })
}

pub(crate) fn register_operations(operations: &mut OperationRegistry, services: &DemoServices) {
    let seats = services.seats.clone();
    operations.register(BOOK_SEATS, move |requested: Vec<u32>| {
        let seats = seats.clone();
        async move {
            tracing::warn!(seats = ?requested, "booking seats");
            match seats.book(&requested).await {
                Ok(price) => Ok(StepResult::succeeded(SeatsReservation { price })),
                Err(e) if e.is_declined() => {
                    tracing::warn!(error = %e, "seats not booked");
                    Ok(StepResult::failed())
                }
                Err(e) => Err(e.into_operation_error(BOOK_SEATS)),
            }
        }
    });

    let seats = services.seats.clone();
    operations.register(RELEASE_SEATS, move |requested: Vec<u32>| {
        let seats = seats.clone();
        async move {
            tracing::warn!(seats = ?requested, "releasing seats");
            seats
                .release(&requested)
                .await
                .map_err(|e| e.into_operation_error(RELEASE_SEATS))
        }
    });

    let payments = services.payments.clone();
    operations.register(CANCEL_PAYMENT, move |transaction_id: Uuid| {
        let payments = payments.clone();
        async move {
            tracing::warn!(%transaction_id, "cancel payment");
            payments
                .cancel(transaction_id)
                .await
                .map_err(|e| e.into_operation_error(CANCEL_PAYMENT))
        }
    });

    let registrations = services.registrations.clone();
    operations.register(REGISTER_AND_NOTIFY, move |data: RegistrationData| {
        let registrations = registrations.clone();
        async move {
            tracing::warn!(?data, "register and notify");
            match registrations.register(&data).await {
                Ok(registration) => Ok(StepResult::succeeded(registration)),
                Err(e) if e.is_declined() => Ok(StepResult::failed()),
                Err(e) => Err(e.into_operation_error(REGISTER_AND_NOTIFY)),
            }
        }
    });
}

pub(crate) fn register_workflows(workflows: &mut WorkflowRegistry) {
    workflows.register(SAGA, saga_workflow);
}
