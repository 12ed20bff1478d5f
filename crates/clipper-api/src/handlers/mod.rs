//! Request handlers.

pub mod admin;
pub mod health;
pub mod jobs;
pub mod process;
pub mod projects;
pub mod upload;

pub use admin::*;
pub use health::*;
pub use jobs::*;
pub use process::*;
pub use projects::*;
pub use upload::*;
