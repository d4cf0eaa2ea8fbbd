pub mod store;

pub use store::{AppendLog, RedisStore};
