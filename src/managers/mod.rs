pub mod operation;
pub mod session;
