pub mod mpesa;
pub mod payments;
