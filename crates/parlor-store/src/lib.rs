pub mod database;
pub mod messages;
pub mod schema;
pub mod users;

pub use database::Database;
pub use messages::MessageRepo;
pub use parlor_core::StoreError;
pub use users::UserRepo;
