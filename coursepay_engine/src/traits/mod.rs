//! Behaviour contracts for storage backends.
//!
//! The engine never talks to a database directly; it goes through the repository traits defined here. A backend
//! implements all three repositories plus [`CommerceDatabase`], and is responsible for drawing the transaction
//! boundaries each operation documents.

mod repositories;

pub use repositories::{
    BasketRepository,
    CommerceDatabase,
    CommerceError,
    OrderRepository,
    PaymentEventRepository,
};
