pub mod database;
pub mod error;
pub mod options;
pub mod results;
pub mod schema;
pub mod users;
pub mod votes;

pub use database::Database;
pub use error::StoreError;
pub use options::{OptionRepo, OptionRow};
pub use results::ResultsRepo;
pub use users::{SessionToken, UserRepo, UserRow};
pub use votes::{VoteRecord, VoteRepo};
