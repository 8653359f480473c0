pub mod conf;
pub mod deref;
pub mod events;
pub mod indexer;
pub mod locking;
pub mod model;
pub mod repository;
pub mod sharding;
pub mod updater;
