pub mod parsing_session;
pub mod session_log;
pub mod supplier_url;

pub use parsing_session::{Lifecycle, ParsingSession, RunMode, SessionStatus};
pub use session_log::{NewLogEntry, SessionLog};
pub use supplier_url::{SupplierUrl, SupplierUrlStatus};
