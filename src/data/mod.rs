pub mod ingest;
pub mod observation;
pub mod registry;
pub mod table;
