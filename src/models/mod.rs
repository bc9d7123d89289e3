pub mod corpus_record;
pub mod generation;
pub mod job;
pub mod question;
pub mod usage;
