//! Command implementations.

pub mod helpers;
pub mod init;
pub mod repos;
pub mod sync;
pub mod ticket;
pub mod users;
pub mod worker;

pub use init::run_init;
pub use repos::{
    run_repos_add, run_repos_grant, run_repos_list, run_repos_mirror_updated, run_repos_remove,
};
pub use sync::{run_sync, run_sync_all};
pub use ticket::run_ticket;
pub use users::run_users_add;
pub use worker::run_worker;
