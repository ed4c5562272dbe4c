//! Data models for Biblion

pub mod book;
pub mod loan;
pub mod user;

// Re-export commonly used types
pub use book::{Book, BookCategory, BookQuery, NewBook, UpdateBook};
pub use loan::{Loan, LoanStatus, NewLoan, UpdateLoan};
pub use user::{Actor, NewUser, PublicUser, UpdateUser, User, UserRole};
