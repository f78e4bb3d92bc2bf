mod open;
mod models;
mod insert;
mod query;
mod schema;
mod trend;

pub use open::Db;
pub use models::*;
pub use query::*;
pub use trend::*;
