pub mod apps;
pub mod health;
pub mod session;
