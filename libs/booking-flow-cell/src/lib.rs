pub mod error;
pub mod models;
pub mod services;

// Re-export the flow surface for host applications
pub use error::BookingFlowError;
pub use models::*;
pub use services::*;
