pub mod block;
pub mod history;
pub mod identity;
pub mod session;
