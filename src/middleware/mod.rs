pub mod security;
pub mod stripe_webhook;
