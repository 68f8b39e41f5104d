mod access;
mod admin;
pub mod error;
mod cookies;
mod session;
mod ws;

pub use access::{heartbeat, release_access, request_access, status};
pub use admin::{
    admin_key, clear_cookies, delete_cookies, detailed_clients, import_cookies, kick_client,
    server_info, set_client_priority, set_max_clients, smart_import_cookies,
};
pub use cookies::{cookies_for_domains, domains, get_all_cookies, health};
pub use session::create_session;
pub use ws::ws_handler;
