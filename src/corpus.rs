pub mod compression;
pub mod corpus_db;
pub mod packer;

pub use corpus_db::CorpusDb;
