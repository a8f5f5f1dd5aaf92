pub mod codec;
pub mod drain;
pub mod graphmirror;
pub mod relational;

pub use graphmirror::SurrealGraphMirror;
pub use relational::RocksRelationalStore;
