pub mod card;
pub mod maintenance;
pub mod reader;
pub mod resource;
pub mod usage;
pub mod user;

pub use card::SqliteCardRepository;
pub use maintenance::SqliteMaintenanceRepository;
pub use reader::SqliteReaderRepository;
pub use resource::SqliteResourceRepository;
pub use usage::SqliteUsageRepository;
pub use user::SqliteUserRepository;
