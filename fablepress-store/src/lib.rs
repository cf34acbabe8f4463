pub mod app_config;
pub mod database;
pub mod event_repo;
pub mod events;
pub mod order_repo;
pub mod redis_repo;
pub mod storybook_repo;

pub use database::DbClient;
pub use event_repo::PgEventRepository;
pub use events::EventProducer;
pub use order_repo::PgOrderRepository;
pub use redis_repo::RedisClient;
pub use storybook_repo::PgStorybookRepository;
