//! IMAP command handlers for the fake server, one module per command
//! the client issues: CAPABILITY, NOOP, LOGIN, SELECT, FETCH, STORE,
//! EXPUNGE and LOGOUT.

mod fetch;
mod store;

pub use capability::handle_capability;
pub use expunge::handle_expunge;
pub use fetch::handle_fetch;
pub use login::handle_login;
pub use logout::handle_logout;
pub use noop::handle_noop;
pub use select::handle_select;
pub use store::{StoreArgs, handle_store};
