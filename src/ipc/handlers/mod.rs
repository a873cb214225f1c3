pub mod admin;
pub mod assignments;
pub mod attendance;
pub mod auth;
pub mod core;
pub mod fees;
pub mod marks;
pub mod subjects;
