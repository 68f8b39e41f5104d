pub mod coordinator_actor;
pub mod notification_hub;
pub mod session_registry;
pub mod store_actor;

pub use coordinator_actor::CoordinatorHandle;
pub use notification_hub::NotificationHub;
pub use session_registry::SessionRegistry;
pub use store_actor::StoreHandle;
