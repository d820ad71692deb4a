pub mod email;
pub mod event;
pub mod health;
pub mod retry;
pub mod status;
pub mod user;
