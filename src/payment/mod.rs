//! Payment Protocol
//!
//! Wire types and the HTTP client for the escrow payment service.

pub mod client;
pub mod types;

pub use client::{PaymentClient, PaymentError, PaymentLedger};
#[cfg(test)]
pub use client::MockPaymentLedger;
pub use types::{
    find_listed_state, CreateInvoiceRequest, Invoice, LockResult, PaymentState, PurchaseRequest,
    SubmitResultRequest, PAYMENT_LIST_FIELDS, PURCHASE_LIST_FIELDS,
};
