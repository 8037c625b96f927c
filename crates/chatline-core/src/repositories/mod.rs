pub mod conversation_repository;
pub mod conversation_sqlite_repository;
pub mod error;
pub mod in_memory_repository;

pub use conversation_repository::{BoxFuture, ConversationRepository};
pub use conversation_sqlite_repository::ConversationSqliteRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use in_memory_repository::InMemoryConversationRepository;
