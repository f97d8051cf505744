//! Data models for Libris

pub mod book;
pub mod loan;
pub mod payment;
pub mod review;
pub mod user;

// Re-export commonly used types
pub use book::Book;
pub use loan::{ActiveLoan, HistoryEntry, LoanDetails};
pub use payment::{Payment, PaymentCard};
pub use review::Review;
pub use user::{Role, User, UserShort};
