pub mod providers;
pub mod users;

pub use providers::ProviderDao;
pub use users::UserDao;
