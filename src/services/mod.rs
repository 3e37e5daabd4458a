pub mod email_service;
pub mod mpesa_service;
pub mod provider;
pub mod reconciliation;
pub mod stripe_service;
