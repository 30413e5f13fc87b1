mod core;
mod index;
mod schema;

pub use self::core::Database;
pub use self::core::DbLockErrorExt;
pub use self::index::{
    decode_embedding, encode_embedding, META_EMBEDDING_DIMENSION, META_EMBEDDING_MODEL,
};
