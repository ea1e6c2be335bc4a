pub mod cli;
pub mod coral;
pub mod errors;
pub mod notify;
pub mod oauth;
pub mod policy;
pub mod presence;
pub mod routes;
pub mod state;
pub mod store;
pub mod traits;

pub mod docs {
    pub mod terminology;
}
