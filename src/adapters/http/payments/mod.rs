//! HTTP adapter for payment endpoints.
//!
//! - `POST /payments` - Open a checkout with a processor
//! - `GET /payments/:order_id` - Public status, polling the processor if unsettled

pub mod dto;
pub mod handlers;
pub mod routes;

pub use dto::{CreatePaymentRequest, CreatePaymentResponse, ErrorResponse};
pub use routes::payment_routes;
