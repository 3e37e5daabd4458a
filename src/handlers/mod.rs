pub mod mpesa_handlers;
pub mod payment_handlers;
pub mod webhook_handlers;
