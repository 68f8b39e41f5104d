mod access;
mod cookie;
mod notification;
mod session;

pub use access::{AccessRecord, Decision, Promoted, QueueEntry, QueueReason, ReleaseResult};
pub use cookie::{looks_logged_in, normalize_domain, Cookie, CookieKey};
pub use notification::Notification;
pub use session::{ParseSessionIdError, Session, SessionId};
