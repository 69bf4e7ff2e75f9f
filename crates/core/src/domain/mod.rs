pub mod cart;
pub mod inventory;
pub mod negotiation;
pub mod order;
pub mod payment;
pub mod quotation;
