pub mod in_memory_store;
pub mod mongo_store;
pub mod timed_store;

pub use in_memory_store::InMemoryDocumentStore;
pub use mongo_store::MongoDocumentStore;
pub use timed_store::TimedDocumentStore;
