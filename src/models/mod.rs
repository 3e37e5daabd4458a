pub mod stk_callback;
pub mod stripe_event;
pub mod transaction;
