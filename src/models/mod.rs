pub mod id;
pub mod presence;
pub mod rates;
pub mod report;
pub mod server;
pub mod shard;
pub mod task;
pub mod user;

pub use id::Id;

pub type JsonObject = serde_json::value::Map<String, serde_json::Value>;
pub type JsonValue = serde_json::Value;
